//! Wire protocol for the gossip overlay
//!
//! One JSON document per WebSocket text frame, each the envelope
//! `{type, data, from, timestamp}`. Payload field names are fixed by the
//! protocol and use camelCase on the wire.

use crate::error::{NodeError, Result};
use crate::ledger::{now_ms, Block};
use crate::transaction::Transaction;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Frames larger than this are rejected and the peer disconnected.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Upper bound on blocks returned for one GetBlocks request.
pub const MAX_BLOCKS_PER_BATCH: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Handshake,
    Disconnect,
    GetPeers,
    Peers,
    GetBlocks,
    Blocks,
    GetTransactions,
    Transactions,
    NewBlock,
    NewTransaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub data: serde_json::Value,
    pub from: String,
    pub timestamp: u64,
}

impl Frame {
    pub fn new<T: Serialize>(kind: MessageType, data: &T, from: &str) -> Result<Frame> {
        Ok(Frame {
            kind,
            data: serde_json::to_value(data)
                .map_err(|e| NodeError::NetworkError(format!("frame encoding failed: {}", e)))?,
            from: from.to_string(),
            timestamp: now_ms(),
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| NodeError::NetworkError(format!("malformed {:?} payload: {}", self.kind, e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakePayload {
    pub node_id: String,
    pub version: String,
    pub listen_port: u16,
    pub network_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectPayload {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GetPeersPayload {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersPayload {
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBlocksPayload {
    pub from_height: u64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocksPayload {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GetTransactionsPayload {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionsPayload {
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBlockPayload {
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransactionPayload {
    pub transaction: Transaction,
}
