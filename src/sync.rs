//! Chain synchronization
//!
//! Batch-driven catch-up: ask a random eligible peer for
//! `GetBlocks(local_tip + 1, batch)` and apply serially, repeating while
//! batches arrive non-empty and valid. Peers that serve bad batches collect
//! failure strikes and are cooled off; stale entries age out.

use crate::error::{NodeError, Result};
use crate::ledger::Ledger;
use crate::network::PeerManager;
use crate::persistence::ChainStore;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default number of blocks requested per batch.
pub const DEFAULT_BATCH_SIZE: u64 = 64;

/// Peer sync information
#[derive(Debug, Clone)]
pub struct PeerSyncInfo {
    pub id: String,
    pub height: u64,
    pub last_seen: Instant,
    pub blocks_received: u64,
    pub sync_failures: u32,
}

impl PeerSyncInfo {
    pub fn new(id: String, height: u64) -> Self {
        Self { id, height, last_seen: Instant::now(), blocks_received: 0, sync_failures: 0 }
    }

    /// Three strikes and the peer is skipped for sync.
    pub fn is_unreliable(&self) -> bool {
        self.sync_failures >= 3
    }

    /// Not seen in 5 minutes.
    pub fn is_stale(&self) -> bool {
        self.last_seen.elapsed() > Duration::from_secs(300)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
    Synced,
    Failed,
}

/// Tracks sync-eligible peers and drives batch catch-up rounds.
pub struct Synchronizer {
    peers: RwLock<HashMap<String, PeerSyncInfo>>,
    state: RwLock<SyncState>,
    batch_size: u64,
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl Synchronizer {
    pub fn new(batch_size: u64) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            state: RwLock::new(SyncState::Idle),
            batch_size,
        }
    }

    pub async fn register_peer(&self, id: &str) {
        let mut peers = self.peers.write().await;
        peers.entry(id.to_string()).or_insert_with(|| PeerSyncInfo::new(id.to_string(), 0));
    }

    pub async fn remove_peer(&self, id: &str) {
        self.peers.write().await.remove(id);
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn update_peer_height(&self, id: &str, height: u64) {
        if let Some(peer) = self.peers.write().await.get_mut(id) {
            peer.height = peer.height.max(height);
            peer.last_seen = Instant::now();
        }
    }

    pub async fn record_blocks_received(&self, id: &str, count: u64) {
        if let Some(peer) = self.peers.write().await.get_mut(id) {
            peer.blocks_received += count;
            peer.last_seen = Instant::now();
        }
    }

    pub async fn record_sync_failure(&self, id: &str) {
        if let Some(peer) = self.peers.write().await.get_mut(id) {
            peer.sync_failures += 1;
            peer.last_seen = Instant::now();
            if peer.is_unreliable() {
                warn!(peer = %id, "peer marked unreliable for sync");
            }
        }
    }

    pub async fn get_peer_info(&self, id: &str) -> Option<PeerSyncInfo> {
        self.peers.read().await.get(id).cloned()
    }

    pub async fn state(&self) -> SyncState {
        *self.state.read().await
    }

    async fn set_state(&self, state: SyncState) {
        *self.state.write().await = state;
    }

    pub async fn cleanup_stale_peers(&self) {
        let mut peers = self.peers.write().await;
        peers.retain(|id, peer| {
            if peer.is_stale() {
                debug!(peer = %id, "removing stale sync peer");
                false
            } else {
                true
            }
        });
    }

    async fn pick_peer(&self) -> Option<String> {
        let peers = self.peers.read().await;
        let eligible: Vec<&PeerSyncInfo> = peers
            .values()
            .filter(|p| !p.is_unreliable() && !p.is_stale())
            .collect();
        if eligible.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..eligible.len());
        Some(eligible[index].id.clone())
    }

    /// One catch-up round against a random eligible connected peer. Returns
    /// the number of blocks applied.
    pub async fn run_once(
        &self,
        manager: &Arc<PeerManager>,
        ledger: &Arc<RwLock<Ledger>>,
        store: Option<&ChainStore>,
    ) -> Result<u64> {
        let peer_id = match self.pick_peer().await {
            Some(id) if manager.is_connected(&id).await => id,
            Some(id) => {
                self.remove_peer(&id).await;
                return Ok(0);
            }
            None => return Ok(0),
        };

        self.set_state(SyncState::Syncing).await;
        let mut applied = 0u64;

        loop {
            let from_height = ledger.read().await.height() + 1;
            let batch = match manager.request_blocks(&peer_id, from_height, self.batch_size).await {
                Ok(batch) => batch,
                Err(NodeError::Cancelled) => {
                    self.set_state(SyncState::Idle).await;
                    return Err(NodeError::Cancelled);
                }
                Err(e) => {
                    self.record_sync_failure(&peer_id).await;
                    self.set_state(SyncState::Failed).await;
                    return Err(e);
                }
            };
            if batch.is_empty() {
                break;
            }

            let count = batch.len() as u64;
            for block in batch {
                let result = ledger.write().await.receive_block(block.clone());
                match result {
                    Ok(_) => {
                        // Mark synced blocks seen so their gossip echo is dropped.
                        manager.note_block_seen(&block.hash());
                        if let Some(store) = store {
                            if let Err(e) = store.put_block(&block) {
                                warn!(code = e.code(), "block write failed during sync: {}", e);
                            }
                        }
                        applied += 1;
                    }
                    Err(e) => {
                        warn!(peer = %peer_id, code = e.code(), "invalid block during sync: {}", e);
                        self.record_sync_failure(&peer_id).await;
                        self.set_state(SyncState::Failed).await;
                        return Err(e);
                    }
                }
            }
            self.record_blocks_received(&peer_id, count).await;
        }

        if applied > 0 {
            info!(peer = %peer_id, blocks = applied, "sync round complete");
        }
        self.set_state(SyncState::Synced).await;
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_peer() {
        let sync = Synchronizer::default();
        sync.register_peer("n1").await;
        assert_eq!(sync.peer_count().await, 1);
        // Registration is idempotent.
        sync.register_peer("n1").await;
        assert_eq!(sync.peer_count().await, 1);
    }

    #[tokio::test]
    async fn test_failure_tracking() {
        let sync = Synchronizer::default();
        sync.register_peer("n1").await;

        for _ in 0..3 {
            sync.record_sync_failure("n1").await;
        }
        let info = sync.get_peer_info("n1").await.unwrap();
        assert!(info.is_unreliable());
        // Unreliable peers are never picked.
        assert!(sync.pick_peer().await.is_none());
    }

    #[tokio::test]
    async fn test_height_updates_keep_maximum() {
        let sync = Synchronizer::default();
        sync.register_peer("n1").await;

        sync.update_peer_height("n1", 10).await;
        sync.update_peer_height("n1", 7).await;
        assert_eq!(sync.get_peer_info("n1").await.unwrap().height, 10);
    }

    #[tokio::test]
    async fn test_blocks_received_accumulate() {
        let sync = Synchronizer::default();
        sync.register_peer("n1").await;

        sync.record_blocks_received("n1", 64).await;
        sync.record_blocks_received("n1", 3).await;
        assert_eq!(sync.get_peer_info("n1").await.unwrap().blocks_received, 67);
    }

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let sync = Synchronizer::default();
        assert_eq!(sync.state().await, SyncState::Idle);
    }
}
