//! Aurum - a Proof-of-Stake blockchain full node
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`ledger`] - Chain, account state, validation, fork handling
//! - [`transaction`] - Transaction types and validation
//! - [`pool`] - Pending transaction pool
//! - [`consensus`] - Stake-weighted proposer election
//!
//! ## Cryptography
//! - [`crypto`] - secp256k1 keys, recoverable signatures, addresses
//! - [`keystore`] - Encrypted key records and wallet operations
//!
//! ## Networking
//! - [`network`] - Gossip overlay: peer sessions, broadcast, discovery
//! - [`sync`] - Batch chain synchronization
//!
//! ## Node
//! - [`node`] - Orchestrator: lifecycle, event loop, validator loop
//! - [`persistence`] - Key-value storage and state snapshots
//! - [`query`] - Read-only projections for explorers
//! - [`api`] - REST layer over the query surface
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration and chain parameters
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod consensus;
pub mod ledger;
pub mod pool;
pub mod transaction;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;
pub mod keystore;

// ============================================================================
// Networking
// ============================================================================
pub mod network;
pub mod sync;

// ============================================================================
// Node
// ============================================================================
pub mod node;
pub mod persistence;
pub mod query;

#[cfg(feature = "api")]
pub mod api;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
