//! Peer manager: listener, dialing, broadcast, discovery bookkeeping
//!
//! The manager owns the peer table; sessions register and unregister
//! themselves. Ledger reads for serving GetBlocks/GetTransactions happen
//! here, while NewBlock/NewTransaction are forwarded to the orchestrator as
//! events and only rebroadcast after local acceptance.

use crate::error::{NodeError, Result};
use crate::ledger::{Block, Ledger};
use crate::network::message::{
    BlocksPayload, Frame, GetBlocksPayload, GetPeersPayload, HandshakePayload, MessageType,
    NewBlockPayload, NewTransactionPayload, PeerInfo, PeersPayload,
};
use crate::network::peer::{run_session, Direction, PeerHandle, REQUEST_TIMEOUT};
use crate::transaction::Transaction;
use lru::LruCache;
use rand::Rng;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_tungstenite::{accept_async, connect_async};
use tracing::{debug, info, warn};

/// Content-hash dedup window per broadcast kind.
const DEDUP_CACHE_SIZE: usize = 4096;

const EVENT_CHANNEL_SIZE: usize = 1024;

/// Events delivered to the orchestrator, serialized per peer in arrival order.
#[derive(Debug)]
pub enum NetworkEvent {
    PeerConnected { id: String },
    PeerDisconnected { id: String, reason: String },
    BlockReceived { from: String, block: Block },
    TransactionReceived { from: String, transaction: Transaction },
    PeersDiscovered { peers: Vec<PeerInfo> },
}

pub struct PeerManager {
    node_id: String,
    network_id: String,
    listen_port: u16,
    max_peers: usize,
    ledger: Arc<RwLock<Ledger>>,
    peers: RwLock<HashMap<String, Arc<PeerHandle>>>,
    events: mpsc::Sender<NetworkEvent>,
    seen_blocks: parking_lot::Mutex<LruCache<String, ()>>,
    seen_txs: parking_lot::Mutex<LruCache<String, ()>>,
    shutdown: watch::Receiver<bool>,
}

impl PeerManager {
    pub fn new(
        network_id: String,
        listen_port: u16,
        max_peers: usize,
        ledger: Arc<RwLock<Ledger>>,
        shutdown: watch::Receiver<bool>,
    ) -> (Arc<Self>, mpsc::Receiver<NetworkEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let node_id = {
            let mut bytes = [0u8; 16];
            rand::thread_rng().fill(&mut bytes);
            hex::encode(bytes)
        };
        let cache_size = NonZeroUsize::new(DEDUP_CACHE_SIZE).expect("nonzero");
        let manager = Arc::new(PeerManager {
            node_id,
            network_id,
            listen_port,
            max_peers,
            ledger,
            peers: RwLock::new(HashMap::new()),
            events,
            seen_blocks: parking_lot::Mutex::new(LruCache::new(cache_size)),
            seen_txs: parking_lot::Mutex::new(LruCache::new(cache_size)),
            shutdown,
        });
        (manager, events_rx)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn ledger(&self) -> &Arc<RwLock<Ledger>> {
        &self.ledger
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }

    pub fn handshake_payload(&self) -> HandshakePayload {
        HandshakePayload {
            node_id: self.node_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            listen_port: self.listen_port,
            network_id: self.network_id.clone(),
        }
    }

    pub async fn emit(&self, event: NetworkEvent) {
        if self.events.send(event).await.is_err() {
            debug!("orchestrator event channel closed");
        }
    }

    /// Accept loop for the listening port. Runs until shutdown.
    pub async fn listen(self: Arc<Self>) -> Result<()> {
        let bind = format!("0.0.0.0:{}", self.listen_port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| NodeError::NetworkError(format!("p2p port {} unavailable: {}", self.listen_port, e)))?;
        info!(addr = %bind, "gossip listener started");

        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let manager = self.clone();
                    tokio::spawn(async move {
                        let ws = match accept_async(stream).await {
                            Ok(ws) => ws,
                            Err(e) => {
                                debug!(peer = %addr, error = %e, "websocket accept failed");
                                return;
                            }
                        };
                        if let Err(e) =
                            run_session(ws, Direction::Inbound, addr.ip().to_string(), manager).await
                        {
                            debug!(peer = %addr, code = e.code(), "inbound session ended: {}", e);
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("gossip listener stopping");
                    return Ok(());
                }
            }
        }
    }

    /// Dial a peer in the background.
    pub fn spawn_dial(self: &Arc<Self>, host: String, port: u16) {
        let manager = self.clone();
        tokio::spawn(async move {
            let url = format!("ws://{}:{}", host, port);
            let ws = match connect_async(url.as_str()).await {
                Ok((ws, _)) => ws,
                Err(e) => {
                    debug!(peer = %url, error = %e, "dial failed");
                    return;
                }
            };
            if let Err(e) = run_session(ws, Direction::Outbound, host, manager).await {
                debug!(peer = %url, code = e.code(), "outbound session ended: {}", e);
            }
        });
    }

    pub(crate) async fn register(&self, handle: Arc<PeerHandle>) -> Result<()> {
        let mut peers = self.peers.write().await;
        if peers.len() >= self.max_peers {
            return Err(NodeError::NetworkError("peer table full".to_string()));
        }
        if peers.contains_key(&handle.id) {
            return Err(NodeError::NetworkError(format!("peer {} already connected", handle.id)));
        }
        peers.insert(handle.id.clone(), handle);
        Ok(())
    }

    pub(crate) async fn unregister(&self, id: &str) {
        self.peers.write().await.remove(id);
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peer_ids(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    pub async fn has_capacity(&self) -> bool {
        self.peers.read().await.len() < self.max_peers
    }

    pub async fn is_connected(&self, id: &str) -> bool {
        self.peers.read().await.contains_key(id)
    }

    async fn peer(&self, id: &str) -> Option<Arc<PeerHandle>> {
        self.peers.read().await.get(id).cloned()
    }

    pub async fn random_peer_id(&self) -> Option<String> {
        let peers = self.peers.read().await;
        if peers.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..peers.len());
        peers.keys().nth(index).cloned()
    }

    pub async fn peer_infos(&self) -> Vec<PeerInfo> {
        self.peers
            .read()
            .await
            .values()
            .map(|handle| PeerInfo {
                id: handle.id.clone(),
                ip: handle.remote_ip.clone(),
                port: handle.info.listen_port,
            })
            .collect()
    }

    pub(crate) async fn peer_infos_except(&self, excluded: &str) -> Vec<PeerInfo> {
        self.peer_infos().await.into_iter().filter(|p| p.id != excluded).collect()
    }

    /// True when this block hash has not been seen before. Marks it seen.
    pub fn note_block_seen(&self, hash: &str) -> bool {
        self.seen_blocks.lock().put(hash.to_string(), ()).is_none()
    }

    /// True when this transaction id has not been seen before. Marks it seen.
    pub fn note_transaction_seen(&self, id: &str) -> bool {
        self.seen_txs.lock().put(id.to_string(), ()).is_none()
    }

    /// Best-effort broadcast to every connected peer, once per local
    /// acceptance. Callers must only invoke this after the ledger accepted
    /// the block.
    pub async fn broadcast_block(&self, block: &Block) -> Result<()> {
        self.note_block_seen(&block.hash());
        let frame = Frame::new(
            MessageType::NewBlock,
            &NewBlockPayload { block: block.clone() },
            &self.node_id,
        )?;
        self.broadcast(frame).await;
        Ok(())
    }

    pub async fn broadcast_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.note_transaction_seen(&transaction.id);
        let frame = Frame::new(
            MessageType::NewTransaction,
            &NewTransactionPayload { transaction: transaction.clone() },
            &self.node_id,
        )?;
        self.broadcast(frame).await;
        Ok(())
    }

    async fn broadcast(&self, frame: Frame) {
        let handles: Vec<Arc<PeerHandle>> = self.peers.read().await.values().cloned().collect();
        for handle in handles {
            if let Err(e) = handle.send(frame.clone()) {
                debug!(peer = %handle.id, code = e.code(), "broadcast dropped: {}", e);
            }
        }
    }

    /// Ask one peer for a block batch. Timeouts resolve to an empty batch;
    /// shutdown resolves to `Cancelled`.
    pub async fn request_blocks(&self, peer_id: &str, from_height: u64, count: u64) -> Result<Vec<Block>> {
        let handle = self
            .peer(peer_id)
            .await
            .ok_or_else(|| NodeError::NetworkError(format!("unknown peer {}", peer_id)))?;
        let rx = handle.expect_response(MessageType::Blocks);
        let frame = Frame::new(
            MessageType::GetBlocks,
            &GetBlocksPayload { from_height, count },
            &self.node_id,
        )?;
        handle.send(frame)?;

        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            response = tokio::time::timeout(REQUEST_TIMEOUT, rx) => match response {
                Ok(Ok(frame)) => Ok(frame.decode::<BlocksPayload>()?.blocks),
                Ok(Err(_)) | Err(_) => Ok(Vec::new()),
            },
            _ = shutdown.changed() => Err(NodeError::Cancelled),
        }
    }

    /// Ask one peer for its peer list.
    pub async fn request_peers(&self, peer_id: &str) -> Result<Vec<PeerInfo>> {
        let handle = self
            .peer(peer_id)
            .await
            .ok_or_else(|| NodeError::NetworkError(format!("unknown peer {}", peer_id)))?;
        let rx = handle.expect_response(MessageType::Peers);
        let frame = Frame::new(MessageType::GetPeers, &GetPeersPayload {}, &self.node_id)?;
        handle.send(frame)?;

        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            response = tokio::time::timeout(REQUEST_TIMEOUT, rx) => match response {
                Ok(Ok(frame)) => Ok(frame.decode::<PeersPayload>()?.peers),
                Ok(Err(_)) | Err(_) => Ok(Vec::new()),
            },
            _ = shutdown.changed() => Err(NodeError::Cancelled),
        }
    }

    /// Close every session with the given reason.
    pub async fn disconnect_all(&self, reason: &str) {
        let handles: Vec<Arc<PeerHandle>> = self.peers.read().await.values().cloned().collect();
        for handle in handles {
            handle.close(reason);
        }
    }
}
