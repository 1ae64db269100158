//! Node orchestrator
//!
//! Bridges gossip and ledger, owns the lifecycle, runs the validator loop.
//! The orchestrator is the single logical ledger writer: every mutation
//! funnels through its event loop or the validator tick, both serialized by
//! the ledger lock. Collaborators (ledger, peer manager, store, keystore)
//! are constructed independently and injected.

use crate::config::Config;
use crate::crypto::KeyPair;
use crate::error::{NodeError, Result};
use crate::keystore::Keystore;
use crate::ledger::{now_ms, Block, BlockOutcome, Ledger, LedgerSnapshot};
use crate::network::{NetworkEvent, PeerManager};
use crate::persistence::ChainStore;
use crate::sync::Synchronizer;
use crate::transaction::Transaction;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Consecutive snapshot failures tolerated before the node shuts down.
const MAX_SNAPSHOT_FAILURES: u32 = 3;

/// Cooperative shutdown grace period.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const SNAPSHOT_QUEUE_SIZE: usize = 8;

pub struct Node {
    pub config: Config,
    pub ledger: Arc<RwLock<Ledger>>,
    pub peers: Arc<PeerManager>,
    pub store: Arc<ChainStore>,
    pub keystore: Arc<Keystore>,
    pub synchronizer: Arc<Synchronizer>,
    validator_key: Option<KeyPair>,
    events_rx: Mutex<Option<mpsc::Receiver<NetworkEvent>>>,
    snapshot_tx: mpsc::Sender<LedgerSnapshot>,
    snapshot_rx: Mutex<Option<mpsc::Receiver<LedgerSnapshot>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Load persisted state and construct the node's collaborators. Nothing
    /// is spawned yet; `start` does that.
    pub async fn init(config: Config) -> Result<Arc<Self>> {
        let data_dir = PathBuf::from(&config.node.data_dir);
        std::fs::create_dir_all(&data_dir)?;

        let store = Arc::new(ChainStore::open(&data_dir)?);

        let ledger = match store.load_snapshot() {
            Ok(Some(snapshot)) => {
                if snapshot.params.network_id != config.params.network_id {
                    warn!(
                        on_disk = %snapshot.params.network_id,
                        configured = %config.params.network_id,
                        "snapshot network id differs from config; the on-disk chain wins"
                    );
                }
                match Ledger::restore(snapshot) {
                    Ok(ledger) => ledger,
                    Err(e) => {
                        warn!(code = e.code(), "snapshot restore failed, starting fresh: {}", e);
                        Ledger::new(config.params.clone())?
                    }
                }
            }
            Ok(None) => Ledger::new(config.params.clone())?,
            Err(e) => {
                warn!(code = e.code(), "snapshot unreadable, starting fresh: {}", e);
                Ledger::new(config.params.clone())?
            }
        };

        let mut ledger = ledger;
        // Blocks written to the KV store after the last snapshot get
        // re-validated through the normal append path.
        match store.blocks_above(ledger.height()) {
            Ok(extra) => {
                for block in extra {
                    let height = block.header.height;
                    match ledger.receive_block(block) {
                        Ok(BlockOutcome::Appended) => {
                            debug!(height, "recovered block from kv store")
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(height, code = e.code(), "kv block failed re-validation: {}", e);
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!(code = e.code(), "kv recovery scan failed: {}", e),
        }
        info!(height = ledger.height(), tip = %ledger.tip_hash(), "ledger loaded");

        let keystore = Arc::new(Keystore::open(&data_dir.join("wallets"))?);

        let validator_key = if config.validator.enabled {
            let address = config.validator.address.clone().ok_or_else(|| {
                NodeError::WalletError("validator.enabled requires validator.address".to_string())
            })?;
            let password = std::env::var("AURUM_VALIDATOR_PASSWORD")
                .ok()
                .or_else(|| config.validator.password.clone())
                .ok_or_else(|| {
                    NodeError::WalletError(
                        "validator password missing; set AURUM_VALIDATOR_PASSWORD".to_string(),
                    )
                })?;
            let keypair = keystore.load(&address, &password)?;
            info!(address = %keypair.address(), "validator key loaded");
            Some(keypair)
        } else {
            None
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // The on-disk chain decides the network id the node gossips under.
        let network_id = ledger.params().network_id.clone();
        let ledger = Arc::new(RwLock::new(ledger));
        let (peers, events_rx) = PeerManager::new(
            network_id,
            config.network.p2p_port,
            config.network.max_peers,
            ledger.clone(),
            shutdown_rx.clone(),
        );
        let (snapshot_tx, snapshot_rx) = mpsc::channel(SNAPSHOT_QUEUE_SIZE);

        Ok(Arc::new(Node {
            config,
            ledger,
            peers,
            store,
            keystore,
            synchronizer: Arc::new(Synchronizer::default()),
            validator_key,
            events_rx: Mutex::new(Some(events_rx)),
            snapshot_tx,
            snapshot_rx: Mutex::new(Some(snapshot_rx)),
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the background tasks and run the event loop until shutdown.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        info!(
            network = %self.config.params.network_id,
            node_id = %self.peers.node_id(),
            p2p_port = self.config.network.p2p_port,
            "starting node"
        );

        let mut tasks = Vec::new();

        let listener = self.peers.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = listener.listen().await {
                error!(code = e.code(), "gossip listener failed: {}", e);
            }
        }));

        for peer in &self.config.network.bootstrap_peers {
            match peer.rsplit_once(':') {
                Some((host, port)) => match port.parse::<u16>() {
                    Ok(port) => self.peers.spawn_dial(host.to_string(), port),
                    Err(_) => warn!(peer = %peer, "bootstrap entry has an invalid port"),
                },
                None => warn!(peer = %peer, "bootstrap entry is not host:port"),
            }
        }

        let snapshot_rx = self
            .snapshot_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| NodeError::NetworkError("node already started".to_string()))?;
        tasks.push(self.spawn_snapshot_writer(snapshot_rx));
        tasks.push(self.spawn_validator_loop());
        tasks.push(self.spawn_sync_loop());

        self.tasks.lock().await.extend(tasks);

        let events_rx = self
            .events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| NodeError::NetworkError("node already started".to_string()))?;
        self.run_event_loop(events_rx).await;
        Ok(())
    }

    /// Signal shutdown, flush a final snapshot, and join tasks within the
    /// grace period.
    pub async fn stop(&self) {
        info!("stopping node");
        let _ = self.shutdown_tx.send(true);
        self.peers.disconnect_all("shutdown").await;

        let snapshot = self.ledger.read().await.snapshot();
        if let Err(e) = self.store.write_snapshot(&snapshot) {
            error!(code = e.code(), "final snapshot failed: {}", e);
        }

        let mut tasks = self.tasks.lock().await;
        for mut task in tasks.drain(..) {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!("task did not unwind within the grace period, aborting");
                task.abort();
            }
        }
        info!("node stopped");
    }

    async fn run_event_loop(self: &Arc<Self>, mut events: mpsc::Receiver<NetworkEvent>) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn handle_event(self: &Arc<Self>, event: NetworkEvent) {
        match event {
            NetworkEvent::PeerConnected { id } => {
                info!(peer = %id, "peer connected");
                self.synchronizer.register_peer(&id).await;
                if self.config.network.enable_discovery {
                    let peers = self.peers.clone();
                    let peer_id = id.clone();
                    tokio::spawn(async move {
                        // Learned peers come back through the event channel.
                        match peers.request_peers(&peer_id).await {
                            Ok(found) if !found.is_empty() => {
                                peers.emit(NetworkEvent::PeersDiscovered { peers: found }).await;
                            }
                            Ok(_) => {}
                            Err(e) => debug!(peer = %peer_id, code = e.code(), "peer discovery failed: {}", e),
                        }
                    });
                }
            }
            NetworkEvent::PeerDisconnected { id, reason } => {
                info!(peer = %id, reason = %reason, "peer disconnected");
                self.synchronizer.remove_peer(&id).await;
            }
            NetworkEvent::BlockReceived { from, block } => {
                self.handle_block(&from, block).await;
            }
            NetworkEvent::TransactionReceived { from, transaction } => {
                self.handle_transaction(&from, transaction).await;
            }
            NetworkEvent::PeersDiscovered { peers } => {
                if !self.config.network.enable_discovery {
                    return;
                }
                for peer in peers {
                    if peer.id == self.peers.node_id() {
                        continue;
                    }
                    if !self.peers.has_capacity().await {
                        break;
                    }
                    if !self.peers.is_connected(&peer.id).await {
                        self.peers.spawn_dial(peer.ip, peer.port);
                    }
                }
            }
        }
    }

    async fn handle_block(self: &Arc<Self>, from: &str, block: Block) {
        let height = block.header.height;
        self.synchronizer.update_peer_height(from, height).await;

        let outcome = self.ledger.write().await.receive_block(block.clone());
        match outcome {
            Ok(BlockOutcome::Appended) | Ok(BlockOutcome::Reorged { .. }) => {
                info!(height, from = %from, "block accepted");
                self.persist_block(&block).await;
                self.schedule_snapshot(height).await;
                if let Err(e) = self.peers.broadcast_block(&block).await {
                    debug!(code = e.code(), "block rebroadcast failed: {}", e);
                }
            }
            Ok(BlockOutcome::SideBranch) => {
                debug!(height, from = %from, "block buffered on side branch");
            }
            Ok(BlockOutcome::Known) => {}
            Err(e) => {
                // Validation errors are local: drop the block, keep the peer.
                warn!(height, from = %from, code = e.code(), "block rejected: {}", e);
            }
        }
    }

    async fn handle_transaction(self: &Arc<Self>, from: &str, transaction: Transaction) {
        let result = self.ledger.write().await.submit_transaction(transaction.clone());
        match result {
            Ok(()) => {
                debug!(id = %transaction.id, from = %from, "transaction pooled");
                if let Err(e) = self.peers.broadcast_transaction(&transaction).await {
                    debug!(code = e.code(), "transaction rebroadcast failed: {}", e);
                }
            }
            Err(e) => {
                debug!(id = %transaction.id, from = %from, code = e.code(), "transaction rejected: {}", e);
            }
        }
    }

    /// Submit a locally created transaction (CLI or API), pooling and
    /// broadcasting it on acceptance.
    pub async fn submit_local_transaction(&self, transaction: Transaction) -> Result<()> {
        self.ledger.write().await.submit_transaction(transaction.clone())?;
        if let Err(e) = self.peers.broadcast_transaction(&transaction).await {
            debug!(code = e.code(), "local transaction broadcast failed: {}", e);
        }
        Ok(())
    }

    async fn persist_block(&self, block: &Block) {
        // Fire-and-forget: KV errors are logged, never fatal to validation.
        if let Err(e) = self.store.put_block(block) {
            warn!(height = block.header.height, code = e.code(), "block write failed: {}", e);
        }
    }

    async fn schedule_snapshot(&self, height: u64) {
        let interval = self.config.node.snapshot_interval.max(1);
        if height % interval != 0 {
            return;
        }
        let snapshot = self.ledger.read().await.snapshot();
        // Never block validation on the writer; a full queue skips this one.
        if self.snapshot_tx.try_send(snapshot).is_err() {
            debug!(height, "snapshot queue full, skipping");
        }
    }

    fn spawn_snapshot_writer(self: &Arc<Self>, mut jobs: mpsc::Receiver<LedgerSnapshot>) -> JoinHandle<()> {
        let store = self.store.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut consecutive_failures = 0u32;
            loop {
                tokio::select! {
                    job = jobs.recv() => {
                        let snapshot = match job {
                            Some(snapshot) => snapshot,
                            None => break,
                        };
                        match store.write_snapshot(&snapshot) {
                            Ok(()) => consecutive_failures = 0,
                            Err(e) => {
                                consecutive_failures += 1;
                                error!(
                                    code = e.code(),
                                    consecutive_failures,
                                    "snapshot write failed: {}", e
                                );
                                if consecutive_failures >= MAX_SNAPSHOT_FAILURES {
                                    error!("repeated snapshot failures, shutting down");
                                    let _ = shutdown_tx.send(true);
                                    break;
                                }
                            }
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    fn spawn_validator_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let node = self.clone();
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let Some(keypair) = node.validator_key.clone() else {
                return;
            };
            let block_time = node.config.params.block_time_ms;
            let mut ticker =
                tokio::time::interval(Duration::from_millis((block_time / 3).max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => node.validator_tick(&keypair).await,
                    _ = shutdown.changed() => return,
                }
            }
        })
    }

    async fn validator_tick(self: &Arc<Self>, keypair: &KeyPair) {
        let address = keypair.address();
        let block = {
            let ledger = self.ledger.read().await;
            let elapsed = now_ms().saturating_sub(ledger.tip().header.timestamp);
            if elapsed < self.config.params.block_time_ms {
                return;
            }
            let our_turn = match ledger.expected_proposer() {
                Some(expected) => expected == address,
                // No validators registered yet: a configured producer may
                // bootstrap the chain.
                None => !ledger.state.has_active_validators(),
            };
            if !our_turn {
                return;
            }
            match ledger.assemble_block(keypair) {
                Ok(block) => block,
                Err(e) => {
                    warn!(code = e.code(), "block assembly failed: {}", e);
                    return;
                }
            }
        };

        let height = block.header.height;
        let outcome = self.ledger.write().await.receive_block(block.clone());
        match outcome {
            Ok(BlockOutcome::Appended) => {
                info!(height, hash = %block.hash(), txs = block.transactions.len(), "block produced");
                self.persist_block(&block).await;
                self.schedule_snapshot(height).await;
                if let Err(e) = self.peers.broadcast_block(&block).await {
                    debug!(code = e.code(), "produced block broadcast failed: {}", e);
                }
            }
            Ok(outcome) => {
                // The tip moved between assembly and apply; drop ours.
                debug!(height, ?outcome, "produced block superseded");
            }
            Err(e) => warn!(height, code = e.code(), "produced block rejected: {}", e),
        }
    }

    fn spawn_sync_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let node = self.clone();
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(
                (node.config.params.block_time_ms / 2).max(1_000),
            ));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match node
                            .synchronizer
                            .run_once(&node.peers, &node.ledger, Some(&node.store))
                            .await
                        {
                            Ok(0) => {}
                            Ok(_) => {
                                let height = node.ledger.read().await.height();
                                node.schedule_snapshot(height).await;
                            }
                            Err(NodeError::Cancelled) => return,
                            Err(e) => debug!(code = e.code(), "sync round failed: {}", e),
                        }
                        let purged = node.ledger.write().await.pool.purge_expired(now_ms());
                        if purged > 0 {
                            debug!(purged, "expired pool entries dropped");
                        }
                        node.synchronizer.cleanup_stale_peers().await;
                    }
                    _ = shutdown.changed() => return,
                }
            }
        })
    }
}
