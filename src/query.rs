//! Read-only projections over the ledger for explorers and the REST layer
//!
//! Every function here takes a ledger reference and returns a serializable
//! summary; nothing mutates. Confirmations count from the tip inclusive:
//! a transaction in the tip block has one confirmation.

use crate::config::ChainParams;
use crate::ledger::{Block, Ledger, Validator};
use crate::transaction::Transaction;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub network_id: String,
    pub tip_height: u64,
    pub tip_hash: String,
    pub pool_size: usize,
    pub total_supply: u64,
    pub minted: u64,
    pub validator_count: usize,
    pub active_validator_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainInfo {
    pub network_id: String,
    pub height: u64,
    pub tip_hash: String,
    pub genesis_hash: String,
    pub params: ChainParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockView {
    pub hash: String,
    pub height: u64,
    pub parent_hash: String,
    pub timestamp: u64,
    pub merkle_root: String,
    pub proposer: String,
    pub nonce: u32,
    pub transaction_count: usize,
    pub transactions: Vec<Transaction>,
}

impl BlockView {
    fn from_block(block: &Block) -> Self {
        BlockView {
            hash: block.hash(),
            height: block.header.height,
            parent_hash: block.header.parent_hash.clone(),
            timestamp: block.header.timestamp,
            merkle_root: block.header.merkle_root.clone(),
            proposer: block.header.proposer.clone(),
            nonce: block.header.nonce,
            transaction_count: block.transactions.len(),
            transactions: block.transactions.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionView {
    pub transaction: Transaction,
    pub block_height: u64,
    pub block_hash: String,
    pub confirmations: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressView {
    pub address: String,
    pub balance: u64,
    pub sequence: u64,
    pub staked: u64,
    pub validator: Option<Validator>,
    pub history: Vec<TransactionView>,
}

pub fn node_status(ledger: &Ledger) -> NodeStatus {
    NodeStatus {
        network_id: ledger.params().network_id.clone(),
        tip_height: ledger.height(),
        tip_hash: ledger.tip_hash(),
        pool_size: ledger.pool.len(),
        total_supply: ledger.total_supply(),
        minted: ledger.minted(),
        validator_count: ledger.state.validators.len(),
        active_validator_count: ledger.state.active_validators().len(),
    }
}

pub fn chain_info(ledger: &Ledger) -> ChainInfo {
    ChainInfo {
        network_id: ledger.params().network_id.clone(),
        height: ledger.height(),
        tip_hash: ledger.tip_hash(),
        genesis_hash: ledger.genesis_hash(),
        params: ledger.params().clone(),
    }
}

pub fn latest_blocks(ledger: &Ledger, count: usize) -> Vec<BlockView> {
    ledger.latest_blocks(count).iter().map(BlockView::from_block).collect()
}

pub fn block_by_height(ledger: &Ledger, height: u64) -> Option<BlockView> {
    ledger.block_by_height(height).map(BlockView::from_block)
}

pub fn block_by_hash(ledger: &Ledger, hash: &str) -> Option<BlockView> {
    ledger.block_by_hash(hash).map(BlockView::from_block)
}

pub fn transaction(ledger: &Ledger, id: &str) -> Option<TransactionView> {
    let height = ledger.transaction_height(id)?;
    let block = ledger.block_by_height(height)?;
    let tx = block.transactions.iter().find(|tx| tx.id == id)?;
    Some(TransactionView {
        transaction: tx.clone(),
        block_height: height,
        block_hash: block.hash(),
        confirmations: ledger.height() - height + 1,
    })
}

pub fn address_view(ledger: &Ledger, address: &str) -> AddressView {
    let account = ledger.state.account(address);
    let tip_height = ledger.height();

    let mut history = Vec::new();
    for height in 0..=tip_height {
        let Some(block) = ledger.block_by_height(height) else { continue };
        let block_hash = block.hash();
        for tx in &block.transactions {
            if tx.sender == address || tx.recipient == address {
                history.push(TransactionView {
                    transaction: tx.clone(),
                    block_height: height,
                    block_hash: block_hash.clone(),
                    confirmations: tip_height - height + 1,
                });
            }
        }
    }

    AddressView {
        address: address.to_string(),
        balance: account.map(|a| a.balance).unwrap_or(0),
        sequence: account.map(|a| a.sequence).unwrap_or(0),
        staked: account.map(|a| a.staked).unwrap_or(0),
        validator: ledger.state.validator(address).cloned(),
        history,
    }
}
