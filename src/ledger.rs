//! Ledger facade: chain, state, and block-level validation

pub mod core;

pub use core::chain::{
    merkle_root, now_ms, Block, BlockHeader, BlockOutcome, Ledger, LedgerSnapshot,
    GENESIS_PROPOSER, MAX_REORG_DEPTH,
};
pub use core::state::{Account, AccountState, BlockUndo, Validator};
