use crate::config::ChainParams;
use crate::consensus;
use crate::crypto::{self, KeyPair, ZERO_HASH};
use crate::error::{NodeError, Result};
use crate::ledger::core::state::{AccountState, BlockUndo};
use crate::ledger::core::validation::check_block_structure;
use crate::pool::TxPool;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Well-known proposer literal carried by the genesis block.
pub const GENESIS_PROPOSER: &str = "AURUM_GENESIS";

/// Reorgs deeper than this are not attempted; side blocks falling this far
/// behind the tip are pruned.
pub const MAX_REORG_DEPTH: u64 = 128;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub parent_hash: String,
    pub timestamp: u64,
    pub merkle_root: String,
    pub proposer: String,
    /// Opaque field reserved for future difficulty use.
    pub nonce: u32,
}

impl BlockHeader {
    /// Canonical header bytes: compact JSON, keys in declared order. This is
    /// what gets hashed for the block identifier and signed by the proposer.
    pub fn signing_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("canonical header encoding cannot fail")
    }

    pub fn hash(&self) -> String {
        crypto::sha256_hex(&self.signing_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub signature: Option<String>,
}

impl Block {
    pub fn hash(&self) -> String {
        self.header.hash()
    }

    /// The genesis block is fully determined by the chain parameters, so
    /// every node starts from the same hash.
    pub fn genesis(params: &ChainParams) -> Self {
        Block {
            header: BlockHeader {
                height: 0,
                parent_hash: ZERO_HASH.to_string(),
                timestamp: params.genesis_timestamp,
                merkle_root: ZERO_HASH.to_string(),
                proposer: GENESIS_PROPOSER.to_string(),
                nonce: 0,
            },
            transactions: Vec::new(),
            signature: None,
        }
    }

    pub fn sign(&mut self, keypair: &KeyPair) -> Result<()> {
        let signature = keypair.sign(&self.header.signing_bytes())?;
        self.signature = Some(hex::encode(signature));
        Ok(())
    }

    pub fn signature_bytes(&self) -> Result<Vec<u8>> {
        let sig = self
            .signature
            .as_ref()
            .ok_or_else(|| NodeError::InvalidBlock("block not signed".to_string()))?;
        hex::decode(sig).map_err(|e| NodeError::CryptoError(format!("invalid signature hex: {}", e)))
    }
}

/// Merkle root over the block's transactions. Leaves are the raw id bytes;
/// an odd node is paired with itself; the empty list hashes to all zeros.
pub fn merkle_root(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return ZERO_HASH.to_string();
    }
    let mut level: Vec<[u8; 32]> = transactions.iter().map(|tx| tx.leaf_hash()).collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = *pair.get(1).unwrap_or(&pair[0]);
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&left);
            buf[32..].copy_from_slice(&right);
            next.push(crypto::sha256(&buf));
        }
        level = next;
    }
    hex::encode(level[0])
}

/// What happened to a received block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    /// Extended the main chain tip.
    Appended,
    /// A side branch overtook the main chain and the ledger switched to it.
    Reorged { reverted: u64, applied: u64 },
    /// Buffered on a side branch; the main chain is unchanged.
    SideBranch,
    /// Already known, on the main chain or in the side buffer.
    Known,
}

/// Full ledger state serialized as one document for snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub params: ChainParams,
    pub blocks: Vec<Block>,
    pub accounts: AccountState,
    pub pool: Vec<Transaction>,
    pub minted: u64,
}

/// The chain, transaction pool, account state and validator registry,
/// together with the validation rules that tie them together. All mutation
/// goes through a single logical writer (the node orchestrator).
#[derive(Clone)]
pub struct Ledger {
    params: ChainParams,
    blocks: Vec<Block>,
    index_by_hash: HashMap<String, u64>,
    tx_index: HashMap<String, u64>,
    pub state: AccountState,
    pub pool: TxPool,
    minted: u64,
    journal: Vec<BlockUndo>,
    side_blocks: HashMap<String, Block>,
    side_children: HashMap<String, Vec<String>>,
}

impl Ledger {
    pub fn new(params: ChainParams) -> Result<Self> {
        let mut ledger = Ledger {
            params: params.clone(),
            blocks: Vec::new(),
            index_by_hash: HashMap::new(),
            tx_index: HashMap::new(),
            state: AccountState::new(),
            pool: TxPool::default(),
            minted: 0,
            journal: Vec::new(),
            side_blocks: HashMap::new(),
            side_children: HashMap::new(),
        };
        let genesis = Block::genesis(&params);
        ledger.apply_block_inner(&genesis)?;
        Ok(ledger)
    }

    /// Rebuild a ledger from a snapshot by replaying every block through the
    /// normal validation path. Replay both restores the state and re-verifies
    /// the stored chain.
    pub fn restore(snapshot: LedgerSnapshot) -> Result<Self> {
        let mut blocks = snapshot.blocks.into_iter();
        let genesis = blocks
            .next()
            .ok_or_else(|| NodeError::StorageFailure("snapshot contains no blocks".to_string()))?;

        let ledger_genesis = Block::genesis(&snapshot.params);
        if genesis.hash() != ledger_genesis.hash() {
            return Err(NodeError::StorageFailure(
                "snapshot genesis does not match chain parameters".to_string(),
            ));
        }

        let mut ledger = Ledger::new(snapshot.params)?;
        for block in blocks {
            ledger.apply_block_inner(&block)?;
        }

        let now = now_ms();
        for tx in snapshot.pool {
            // Best effort: entries invalidated while the node was down are dropped.
            let _ = ledger.submit_transaction_at(tx, now);
        }
        Ok(ledger)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            params: self.params.clone(),
            blocks: self.blocks.clone(),
            accounts: self.state.clone(),
            pool: self.pool.transactions(),
            minted: self.minted,
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn tip(&self) -> &Block {
        self.blocks.last().expect("chain always contains genesis")
    }

    pub fn tip_hash(&self) -> String {
        self.tip().hash()
    }

    pub fn height(&self) -> u64 {
        self.tip().header.height
    }

    pub fn genesis_hash(&self) -> String {
        self.blocks[0].hash()
    }

    pub fn minted(&self) -> u64 {
        self.minted
    }

    /// Total supply: the genesis allocation plus every minted reward. Burned
    /// fees are not subtracted; supply counts minted units.
    pub fn total_supply(&self) -> u64 {
        self.params.initial_supply + self.minted
    }

    pub fn block_by_height(&self, height: u64) -> Option<&Block> {
        self.blocks.get(height as usize)
    }

    pub fn block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.index_by_hash.get(hash).and_then(|h| self.blocks.get(*h as usize))
    }

    pub fn contains_block(&self, hash: &str) -> bool {
        self.index_by_hash.contains_key(hash)
    }

    pub fn contains_transaction(&self, id: &str) -> bool {
        self.tx_index.contains_key(id)
    }

    /// Height of the block containing the transaction, if confirmed.
    pub fn transaction_height(&self, id: &str) -> Option<u64> {
        self.tx_index.get(id).copied()
    }

    /// A contiguous run of blocks for gossip responses.
    pub fn blocks_range(&self, from_height: u64, count: u64) -> Vec<Block> {
        let from = from_height as usize;
        if from >= self.blocks.len() {
            return Vec::new();
        }
        let to = from.saturating_add(count as usize).min(self.blocks.len());
        self.blocks[from..to].to_vec()
    }

    pub fn latest_blocks(&self, count: usize) -> Vec<Block> {
        let start = self.blocks.len().saturating_sub(count);
        self.blocks[start..].iter().rev().cloned().collect()
    }

    /// The proposer every honest node expects for the next height, derived
    /// from the tip hash and the current active validator set.
    pub fn expected_proposer(&self) -> Option<String> {
        let seed = consensus::election_seed(&self.tip_hash());
        let active = self.state.active_validators();
        consensus::elect_proposer(&active, seed)
    }

    /// Validate a transaction and admit it to the pool.
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<()> {
        self.submit_transaction_at(tx, now_ms())
    }

    fn submit_transaction_at(&mut self, tx: Transaction, now: u64) -> Result<()> {
        if tx.is_reward() {
            return Err(NodeError::InvalidTransaction(
                "rewards are synthesized by the ledger, not submitted".to_string(),
            ));
        }
        if self.tx_index.contains_key(&tx.id) || self.pool.contains(&tx.id) {
            return Err(NodeError::DuplicateTransaction(tx.id));
        }
        tx.validate(&self.state, &self.params)?;
        self.pool.insert(tx, now)
    }

    /// Assemble a block on top of the current tip: pool transactions in
    /// priority order, each checked against the simulated post-state, then
    /// the synthesized reward, then the signed header.
    pub fn assemble_block(&self, keypair: &KeyPair) -> Result<Block> {
        let proposer = keypair.address();
        let timestamp = now_ms();
        let height = self.height() + 1;

        let mut sim = self.state.clone();
        let mut scratch = BlockUndo::default();
        let mut selected = Vec::new();
        for tx in self.pool.ordered() {
            if selected.len() >= self.params.max_block_txs {
                break;
            }
            if tx.validate(&sim, &self.params).is_ok()
                && sim.apply_transaction(&tx, &self.params, &mut scratch).is_ok()
            {
                selected.push(tx);
            }
        }
        selected.push(Transaction::reward(proposer.clone(), self.params.block_reward, timestamp, height));

        let header = BlockHeader {
            height,
            parent_hash: self.tip_hash(),
            timestamp,
            merkle_root: merkle_root(&selected),
            proposer,
            nonce: 0,
        };
        let mut block = Block { header, transactions: selected, signature: None };
        block.sign(keypair)?;
        Ok(block)
    }

    /// Handle a block from any source: append to the tip, buffer on a side
    /// branch, or switch branches when a side branch overtakes the tip.
    pub fn receive_block(&mut self, block: Block) -> Result<BlockOutcome> {
        let hash = block.hash();
        if self.index_by_hash.contains_key(&hash) || self.side_blocks.contains_key(&hash) {
            return Ok(BlockOutcome::Known);
        }

        if block.header.parent_hash == self.tip_hash() {
            self.apply_block_inner(&block)?;
            self.prune_side_branches();
            self.connect_buffered_children(&hash)?;
            return Ok(BlockOutcome::Appended);
        }

        if block.header.height + MAX_REORG_DEPTH <= self.height() {
            return Err(NodeError::InvalidBlock(format!(
                "block at height {} is too far behind the tip",
                block.header.height
            )));
        }

        self.side_blocks.insert(hash.clone(), block.clone());
        self.side_children
            .entry(block.header.parent_hash.clone())
            .or_default()
            .push(hash.clone());
        self.try_switch(&hash)
    }

    /// Sequentially validate and apply one block on top of the current tip.
    fn apply_block_inner(&mut self, block: &Block) -> Result<()> {
        let is_genesis = block.header.height == 0 && self.blocks.is_empty();

        if !is_genesis {
            let expected_height = self.height() + 1;
            if block.header.height != expected_height {
                return Err(NodeError::InvalidHeight {
                    expected: expected_height,
                    got: block.header.height,
                });
            }
            let tip_hash = self.tip_hash();
            if block.header.parent_hash != tip_hash {
                return Err(NodeError::InvalidParent {
                    expected: tip_hash,
                    got: block.header.parent_hash.clone(),
                });
            }

            let signature = block.signature_bytes()?;
            let recovered = crypto::recover_address(&block.header.signing_bytes(), &signature)
                .map_err(|_| NodeError::InvalidSignature)?;
            if recovered != block.header.proposer {
                return Err(NodeError::InvalidSignature);
            }

            // Until the first stake lands there are no validators at all;
            // any correctly signed proposer may bootstrap the chain.
            if self.state.has_active_validators() {
                match self.state.validator(&block.header.proposer) {
                    Some(v) if v.active => {}
                    _ => return Err(NodeError::UnknownProposer(block.header.proposer.clone())),
                }
            }
        }

        check_block_structure(block)?;

        if let Some(reward) = block.transactions.iter().find(|tx| tx.is_reward()) {
            let projected = self
                .params
                .initial_supply
                .saturating_add(self.minted)
                .saturating_add(reward.amount);
            if projected > self.params.max_supply {
                return Err(NodeError::InvalidBlock(
                    "reward would exceed the maximum supply".to_string(),
                ));
            }
        }

        let mut undo = BlockUndo::default();
        for tx in &block.transactions {
            if self.tx_index.contains_key(&tx.id) {
                self.state.revert(&undo);
                return Err(NodeError::DuplicateTransaction(tx.id.clone()));
            }
            let result = tx
                .validate(&self.state, &self.params)
                .and_then(|_| self.state.apply_transaction(tx, &self.params, &mut undo));
            if let Err(e) = result {
                self.state.revert(&undo);
                return Err(e);
            }
        }

        let computed = merkle_root(&block.transactions);
        if computed != block.header.merkle_root {
            self.state.revert(&undo);
            return Err(NodeError::InvalidMerkleRoot);
        }

        if !is_genesis {
            self.state.record_production(&block.header.proposer, block.header.height, &mut undo);
        }

        let hash = block.hash();
        self.index_by_hash.insert(hash, block.header.height);
        for tx in &block.transactions {
            self.tx_index.insert(tx.id.clone(), block.header.height);
            self.pool.remove(&tx.id);
        }
        self.minted += undo.minted;
        self.journal.push(undo);
        self.blocks.push(block.clone());
        Ok(())
    }

    /// Pop the tip block, reverting its state effects through the journal.
    fn detach_tip(&mut self) -> Result<Block> {
        if self.blocks.len() <= 1 {
            return Err(NodeError::InvalidBlock("cannot detach the genesis block".to_string()));
        }
        let block = self.blocks.pop().expect("checked above");
        let undo = self.journal.pop().expect("journal tracks blocks");
        self.state.revert(&undo);
        self.minted -= undo.minted;
        self.index_by_hash.remove(&block.hash());
        for tx in &block.transactions {
            self.tx_index.remove(&tx.id);
        }
        Ok(block)
    }

    /// Attempt to switch to the side branch reachable from `candidate_hash`.
    fn try_switch(&mut self, candidate_hash: &str) -> Result<BlockOutcome> {
        let branch_tip = self.deepest_descendant(candidate_hash);
        let candidate = self.side_blocks[&branch_tip].clone();
        if candidate.header.height <= self.height() {
            return Ok(BlockOutcome::SideBranch);
        }

        // Walk parents back to the main chain.
        let mut branch = vec![candidate];
        loop {
            let parent_hash = branch.last().expect("non-empty").header.parent_hash.clone();
            match self.side_blocks.get(&parent_hash) {
                Some(parent) => branch.push(parent.clone()),
                None => break,
            }
        }
        let fork_parent = branch.last().expect("non-empty").header.parent_hash.clone();
        let ancestor_height = match self.index_by_hash.get(&fork_parent) {
            Some(h) => *h,
            // Links are still missing; wait for sync to fill them.
            None => return Ok(BlockOutcome::SideBranch),
        };
        branch.reverse();

        for (i, b) in branch.iter().enumerate() {
            if b.header.height != ancestor_height + 1 + i as u64 {
                return Ok(BlockOutcome::SideBranch);
            }
        }

        // Rewind the main chain to the common ancestor.
        let mut detached = Vec::new();
        while self.height() > ancestor_height {
            detached.push(self.detach_tip()?);
        }
        detached.reverse();

        let mut applied = 0usize;
        let mut failure = None;
        for b in &branch {
            match self.apply_block_inner(b) {
                Ok(()) => applied += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            // Roll back the partial branch and restore the original chain.
            for _ in 0..applied {
                self.detach_tip()?;
            }
            for b in &detached {
                self.apply_block_inner(b).map_err(|e| {
                    NodeError::InvalidBlock(format!("failed to restore main chain: {}", e))
                })?;
            }
            for b in &branch {
                self.drop_side_block(&b.hash());
            }
            return Err(err);
        }

        for b in &branch {
            self.drop_side_block(&b.hash());
        }

        // The replaced blocks become a side branch themselves; their
        // transactions go back to the pool when still valid.
        let now = now_ms();
        for b in &detached {
            let hash = b.hash();
            self.side_blocks.insert(hash.clone(), b.clone());
            self.side_children
                .entry(b.header.parent_hash.clone())
                .or_default()
                .push(hash);
            for tx in &b.transactions {
                if tx.is_reward() || self.tx_index.contains_key(&tx.id) {
                    continue;
                }
                if tx.validate(&self.state, &self.params).is_ok() {
                    let _ = self.pool.insert(tx.clone(), now);
                }
            }
        }

        self.prune_side_branches();
        Ok(BlockOutcome::Reorged { reverted: detached.len() as u64, applied: applied as u64 })
    }

    /// Blocks can arrive out of order: once a block lands on the main chain,
    /// buffered descendants waiting on it get a chance to extend the tip.
    fn connect_buffered_children(&mut self, parent_hash: &str) -> Result<()> {
        let children = match self.side_children.get(parent_hash) {
            Some(children) => children.clone(),
            None => return Ok(()),
        };
        for child in children {
            if self.side_blocks.contains_key(&child) {
                // A bad buffered branch must not fail the append that
                // triggered the connection attempt.
                if let Err(e) = self.try_switch(&child) {
                    tracing::debug!(code = e.code(), "buffered branch rejected: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Follow side-branch children down from `hash` to the highest block.
    fn deepest_descendant(&self, hash: &str) -> String {
        let mut best = hash.to_string();
        let mut best_height = self.side_blocks[hash].header.height;
        let mut stack = vec![hash.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(children) = self.side_children.get(&current) {
                for child in children {
                    if let Some(block) = self.side_blocks.get(child) {
                        if block.header.height > best_height {
                            best = child.clone();
                            best_height = block.header.height;
                        }
                        stack.push(child.clone());
                    }
                }
            }
        }
        best
    }

    fn drop_side_block(&mut self, hash: &str) {
        if let Some(block) = self.side_blocks.remove(hash) {
            if let Some(children) = self.side_children.get_mut(&block.header.parent_hash) {
                children.retain(|c| c != hash);
                if children.is_empty() {
                    self.side_children.remove(&block.header.parent_hash);
                }
            }
        }
    }

    fn prune_side_branches(&mut self) {
        let tip_height = self.height();
        let stale: Vec<String> = self
            .side_blocks
            .iter()
            .filter(|(_, b)| b.header.height + MAX_REORG_DEPTH <= tip_height)
            .map(|(h, _)| h.clone())
            .collect();
        for hash in stale {
            self.drop_side_block(&hash);
        }
    }
}
