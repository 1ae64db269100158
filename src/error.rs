//! Error types for the Aurum node

use std::fmt;

#[derive(Debug, Clone)]
pub enum NodeError {
    InvalidSignature,
    InvalidSequence { expected: u64, got: u64 },
    InsufficientBalance { needed: u64, available: u64 },
    InsufficientStake { needed: u64, staked: u64 },
    StakeBelowMinimum { amount: u64, min_stake: u64 },
    UnknownSender(String),
    InvalidParent { expected: String, got: String },
    InvalidHeight { expected: u64, got: u64 },
    InvalidMerkleRoot,
    UnknownProposer(String),
    DuplicateTransaction(String),
    PoolFull,
    NetworkIdMismatch { ours: String, theirs: String },
    HandshakeTimeout,
    PeerSlow(String),
    InvalidCredential,
    CorruptKeystore(String),
    StorageFailure(String),
    InvalidTransaction(String),
    InvalidBlock(String),
    CryptoError(String),
    WalletError(String),
    NetworkError(String),
    Cancelled,
    IoError(String),
}

impl NodeError {
    /// Stable machine-readable identifier used in logs, the query surface
    /// and tests.
    pub fn code(&self) -> &'static str {
        match self {
            NodeError::InvalidSignature => "InvalidSignature",
            NodeError::InvalidSequence { .. } => "InvalidSequence",
            NodeError::InsufficientBalance { .. } => "InsufficientBalance",
            NodeError::InsufficientStake { .. } => "InsufficientStake",
            NodeError::StakeBelowMinimum { .. } => "StakeBelowMinimum",
            NodeError::UnknownSender(_) => "UnknownSender",
            NodeError::InvalidParent { .. } => "InvalidParent",
            NodeError::InvalidHeight { .. } => "InvalidHeight",
            NodeError::InvalidMerkleRoot => "InvalidMerkleRoot",
            NodeError::UnknownProposer(_) => "UnknownProposer",
            NodeError::DuplicateTransaction(_) => "DuplicateTransaction",
            NodeError::PoolFull => "PoolFull",
            NodeError::NetworkIdMismatch { .. } => "NetworkIdMismatch",
            NodeError::HandshakeTimeout => "HandshakeTimeout",
            NodeError::PeerSlow(_) => "PeerSlow",
            NodeError::InvalidCredential => "InvalidCredential",
            NodeError::CorruptKeystore(_) => "CorruptKeystore",
            NodeError::StorageFailure(_) => "StorageFailure",
            NodeError::InvalidTransaction(_) => "InvalidTransaction",
            NodeError::InvalidBlock(_) => "InvalidBlock",
            NodeError::CryptoError(_) => "CryptoError",
            NodeError::WalletError(_) => "WalletError",
            NodeError::NetworkError(_) => "NetworkError",
            NodeError::Cancelled => "Cancelled",
            NodeError::IoError(_) => "IoError",
        }
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeError::InvalidSignature => write!(f, "Invalid signature"),
            NodeError::InvalidSequence { expected, got } => {
                write!(f, "Invalid sequence number: expected {}, got {}", expected, got)
            }
            NodeError::InsufficientBalance { needed, available } => {
                write!(f, "Insufficient balance: need {}, have {}", needed, available)
            }
            NodeError::InsufficientStake { needed, staked } => {
                write!(f, "Insufficient stake: need {}, have {}", needed, staked)
            }
            NodeError::StakeBelowMinimum { amount, min_stake } => {
                write!(f, "Stake of {} is below the minimum of {}", amount, min_stake)
            }
            NodeError::UnknownSender(addr) => write!(f, "Unknown sender account: {}", addr),
            NodeError::InvalidParent { expected, got } => {
                write!(f, "Invalid parent hash: expected {}, got {}", expected, got)
            }
            NodeError::InvalidHeight { expected, got } => {
                write!(f, "Invalid block height: expected {}, got {}", expected, got)
            }
            NodeError::InvalidMerkleRoot => write!(f, "Merkle root mismatch"),
            NodeError::UnknownProposer(addr) => write!(f, "Unknown proposer: {}", addr),
            NodeError::DuplicateTransaction(id) => write!(f, "Duplicate transaction: {}", id),
            NodeError::PoolFull => write!(f, "Transaction pool is full"),
            NodeError::NetworkIdMismatch { ours, theirs } => {
                write!(f, "Network id mismatch: ours {}, theirs {}", ours, theirs)
            }
            NodeError::HandshakeTimeout => write!(f, "Handshake timed out"),
            NodeError::PeerSlow(id) => write!(f, "Peer {} too slow, outbound queue full", id),
            NodeError::InvalidCredential => write!(f, "Invalid credential"),
            NodeError::CorruptKeystore(msg) => write!(f, "Corrupt keystore: {}", msg),
            NodeError::StorageFailure(msg) => write!(f, "Storage failure: {}", msg),
            NodeError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {}", msg),
            NodeError::InvalidBlock(msg) => write!(f, "Invalid block: {}", msg),
            NodeError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            NodeError::WalletError(msg) => write!(f, "Wallet error: {}", msg),
            NodeError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            NodeError::Cancelled => write!(f, "Cancelled"),
            NodeError::IoError(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::StorageFailure(format!("serialization: {}", err))
    }
}

impl From<rusqlite::Error> for NodeError {
    fn from(err: rusqlite::Error) -> Self {
        NodeError::StorageFailure(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, NodeError>;
