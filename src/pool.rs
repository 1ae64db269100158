//! Pending transaction pool
//!
//! Entries are stored by value, keyed by content hash. Selection order for
//! block assembly is descending fee, ties broken by earliest timestamp and
//! then lexicographic id.

use crate::error::{NodeError, Result};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

pub const DEFAULT_POOL_CAPACITY: usize = 10_000;

/// Entries older than this are purged.
pub const DEFAULT_POOL_TTL_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PoolEntry {
    tx: Transaction,
    received_at: u64,
}

#[derive(Debug, Clone)]
pub struct TxPool {
    entries: HashMap<String, PoolEntry>,
    capacity: usize,
    ttl_ms: u64,
}

impl Default for TxPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, DEFAULT_POOL_TTL_MS)
    }
}

fn priority(a: &Transaction, b: &Transaction) -> Ordering {
    b.fee
        .cmp(&a.fee)
        .then(a.timestamp.cmp(&b.timestamp))
        .then(a.id.cmp(&b.id))
}

impl TxPool {
    pub fn new(capacity: usize, ttl_ms: u64) -> Self {
        TxPool { entries: HashMap::new(), capacity, ttl_ms }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Insert an already-validated transaction. When full, a higher-fee
    /// arrival evicts the lowest-priority entry; otherwise the pool rejects.
    pub fn insert(&mut self, tx: Transaction, now: u64) -> Result<()> {
        if self.entries.contains_key(&tx.id) {
            return Err(NodeError::DuplicateTransaction(tx.id));
        }
        if self.entries.len() >= self.capacity {
            let lowest = self
                .entries
                .values()
                .max_by(|a, b| priority(&a.tx, &b.tx))
                .map(|e| (e.tx.id.clone(), e.tx.fee));
            match lowest {
                Some((lowest_id, lowest_fee)) if tx.fee > lowest_fee => {
                    self.entries.remove(&lowest_id);
                }
                _ => return Err(NodeError::PoolFull),
            }
        }
        self.entries.insert(tx.id.clone(), PoolEntry { tx, received_at: now });
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<Transaction> {
        self.entries.remove(id).map(|e| e.tx)
    }

    /// All pending transactions in selection order.
    pub fn ordered(&self) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self.entries.values().map(|e| e.tx.clone()).collect();
        txs.sort_by(priority);
        txs
    }

    /// Unordered snapshot, used by gossip responses and persistence.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.entries.values().map(|e| e.tx.clone()).collect()
    }

    /// Drop entries older than the TTL. Returns how many were purged.
    pub fn purge_expired(&mut self, now: u64) -> usize {
        let ttl = self.ttl_ms;
        let before = self.entries.len();
        self.entries.retain(|_, e| now.saturating_sub(e.received_at) <= ttl);
        before - self.entries.len()
    }
}
