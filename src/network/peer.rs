//! Per-peer session handling
//!
//! Each connected peer is one WebSocket session: a bounded outbound queue,
//! a reader loop dispatching inbound frames in arrival order, and a slot
//! for at most one pending request per response type. The session task owns
//! the socket; everything else talks to it through the `PeerHandle`.

use crate::error::{NodeError, Result};
use crate::network::manager::{NetworkEvent, PeerManager};
use crate::network::message::{
    BlocksPayload, DisconnectPayload, Frame, GetBlocksPayload, HandshakePayload, MessageType,
    NewBlockPayload, NewTransactionPayload, PeersPayload, TransactionsPayload, MAX_BLOCKS_PER_BATCH,
    MAX_FRAME_BYTES,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

/// Both sides must complete the handshake within this window.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Request/response pairs resolve to empty after this long.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded outbound queue per peer; overflow disconnects the peer.
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Shared handle to a live session. Dropping it does not close the session;
/// `close(reason)` does.
pub struct PeerHandle {
    pub id: String,
    pub info: HandshakePayload,
    pub remote_ip: String,
    outbound: mpsc::Sender<Frame>,
    pending: parking_lot::Mutex<HashMap<MessageType, oneshot::Sender<Frame>>>,
    close_tx: watch::Sender<Option<String>>,
}

impl PeerHandle {
    /// Queue a frame for delivery. A full queue means the peer cannot keep
    /// up and the session is torn down with reason "slow".
    pub fn send(&self, frame: Frame) -> Result<()> {
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.close("slow");
                Err(NodeError::PeerSlow(self.id.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(NodeError::NetworkError(format!("peer {} session closed", self.id)))
            }
        }
    }

    /// Register interest in the next frame of `kind` from this peer.
    pub fn expect_response(&self, kind: MessageType) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(kind, tx);
        rx
    }

    fn fulfill(&self, frame: &Frame) -> bool {
        if let Some(tx) = self.pending.lock().remove(&frame.kind) {
            return tx.send(frame.clone()).is_ok();
        }
        false
    }

    pub fn close(&self, reason: &str) {
        let _ = self.close_tx.send(Some(reason.to_string()));
    }
}

/// Wait for the first frame and require it to be a handshake.
async fn read_handshake<S>(ws: &mut WebSocketStream<S>) -> Result<HandshakePayload>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, ws.next())
        .await
        .map_err(|_| NodeError::HandshakeTimeout)?
        .ok_or_else(|| NodeError::NetworkError("connection closed during handshake".to_string()))?
        .map_err(|e| NodeError::NetworkError(format!("handshake read failed: {}", e)))?;

    let text = frame
        .into_text()
        .map_err(|_| NodeError::NetworkError("non-text handshake frame".to_string()))?;
    let frame: Frame = serde_json::from_str(&text)
        .map_err(|e| NodeError::NetworkError(format!("malformed handshake frame: {}", e)))?;
    if frame.kind != MessageType::Handshake {
        return Err(NodeError::NetworkError(format!(
            "expected Handshake, got {:?}",
            frame.kind
        )));
    }
    frame.decode()
}

async fn send_frame<S>(ws: &mut WebSocketStream<S>, frame: &Frame) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let text = serde_json::to_string(frame)
        .map_err(|e| NodeError::NetworkError(format!("frame encoding failed: {}", e)))?;
    ws.send(Message::Text(text))
        .await
        .map_err(|e| NodeError::NetworkError(format!("send failed: {}", e)))
}

/// Drive one peer session to completion. Returns once the peer disconnects,
/// the manager closes the handle, or shutdown is signalled.
pub async fn run_session<S>(
    mut ws: WebSocketStream<S>,
    direction: Direction,
    remote_ip: String,
    manager: Arc<PeerManager>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ours = manager.handshake_payload();

    // Symmetric handshake: the dialer speaks first, the listener answers.
    let theirs = match direction {
        Direction::Outbound => {
            let frame = Frame::new(MessageType::Handshake, &ours, &ours.node_id)?;
            send_frame(&mut ws, &frame).await?;
            read_handshake(&mut ws).await?
        }
        Direction::Inbound => {
            let theirs = read_handshake(&mut ws).await?;
            let frame = Frame::new(MessageType::Handshake, &ours, &ours.node_id)?;
            send_frame(&mut ws, &frame).await?;
            theirs
        }
    };

    if theirs.network_id != ours.network_id {
        let reason = DisconnectPayload { reason: "network id mismatch".to_string() };
        let frame = Frame::new(MessageType::Disconnect, &reason, &ours.node_id)?;
        let _ = send_frame(&mut ws, &frame).await;
        return Err(NodeError::NetworkIdMismatch {
            ours: ours.network_id,
            theirs: theirs.network_id,
        });
    }
    if theirs.node_id == ours.node_id {
        let reason = DisconnectPayload { reason: "self connection".to_string() };
        let frame = Frame::new(MessageType::Disconnect, &reason, &ours.node_id)?;
        let _ = send_frame(&mut ws, &frame).await;
        return Err(NodeError::NetworkError("connected to self".to_string()));
    }

    let (out_tx, mut out_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
    let (close_tx, mut close_rx) = watch::channel(None::<String>);
    let handle = Arc::new(PeerHandle {
        id: theirs.node_id.clone(),
        info: theirs.clone(),
        remote_ip,
        outbound: out_tx,
        pending: parking_lot::Mutex::new(HashMap::new()),
        close_tx,
    });

    if let Err(e) = manager.register(handle.clone()).await {
        let reason = DisconnectPayload { reason: "peer table full".to_string() };
        let frame = Frame::new(MessageType::Disconnect, &reason, &ours.node_id)?;
        let _ = send_frame(&mut ws, &frame).await;
        return Err(e);
    }
    manager
        .emit(NetworkEvent::PeerConnected { id: handle.id.clone() })
        .await;

    let mut shutdown = manager.shutdown_signal();
    let mut disconnect_reason = "closed".to_string();

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if let Err(e) = send_frame(&mut ws, &frame).await {
                            debug!(peer = %handle.id, error = %e, "outbound send failed");
                            disconnect_reason = "send failure".to_string();
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = close_rx.changed() => {
                let reason = close_rx.borrow().clone().unwrap_or_else(|| "closed".to_string());
                let payload = DisconnectPayload { reason: reason.clone() };
                if let Ok(frame) = Frame::new(MessageType::Disconnect, &payload, &ours.node_id) {
                    let _ = send_frame(&mut ws, &frame).await;
                }
                disconnect_reason = reason;
                break;
            }
            _ = shutdown.changed() => {
                let payload = DisconnectPayload { reason: "shutdown".to_string() };
                if let Ok(frame) = Frame::new(MessageType::Disconnect, &payload, &ours.node_id) {
                    let _ = send_frame(&mut ws, &frame).await;
                }
                disconnect_reason = "shutdown".to_string();
                break;
            }
            inbound = ws.next() => {
                let message = match inbound {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        debug!(peer = %handle.id, error = %e, "read failed");
                        disconnect_reason = "read failure".to_string();
                        break;
                    }
                    None => break,
                };
                match message {
                    Message::Text(text) => {
                        if text.len() > MAX_FRAME_BYTES {
                            warn!(peer = %handle.id, size = text.len(), "oversized frame");
                            disconnect_reason = "oversized frame".to_string();
                            break;
                        }
                        let frame: Frame = match serde_json::from_str(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(peer = %handle.id, error = %e, "malformed frame");
                                disconnect_reason = "malformed frame".to_string();
                                break;
                            }
                        };
                        match dispatch(&mut ws, &frame, &handle, &manager, &ours.node_id).await {
                            Ok(true) => {}
                            Ok(false) => {
                                disconnect_reason = frame
                                    .decode::<DisconnectPayload>()
                                    .map(|p| p.reason)
                                    .unwrap_or_else(|_| "disconnect".to_string());
                                break;
                            }
                            Err(e) => {
                                debug!(peer = %handle.id, error = %e, "dispatch failed");
                                disconnect_reason = "protocol error".to_string();
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    // Control frames are handled by the library; anything
                    // else is off-protocol.
                    Message::Ping(_) | Message::Pong(_) => {}
                    _ => {
                        disconnect_reason = "non-text frame".to_string();
                        break;
                    }
                }
            }
        }
    }

    manager.unregister(&handle.id).await;
    manager
        .emit(NetworkEvent::PeerDisconnected { id: handle.id.clone(), reason: disconnect_reason })
        .await;
    let _ = ws.close(None).await;
    Ok(())
}

/// Handle one inbound frame. Returns Ok(false) when the session must end.
async fn dispatch<S>(
    ws: &mut WebSocketStream<S>,
    frame: &Frame,
    handle: &Arc<PeerHandle>,
    manager: &Arc<PeerManager>,
    our_id: &str,
) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match frame.kind {
        MessageType::Handshake => {
            // Already handshaken; a repeat is harmless noise.
        }
        MessageType::Disconnect => return Ok(false),
        MessageType::GetPeers => {
            let peers = manager.peer_infos_except(&handle.id).await;
            let reply = Frame::new(MessageType::Peers, &PeersPayload { peers }, our_id)?;
            send_frame(ws, &reply).await?;
        }
        MessageType::GetBlocks => {
            let request: GetBlocksPayload = frame.decode()?;
            let count = request.count.min(MAX_BLOCKS_PER_BATCH);
            let blocks = manager.ledger().read().await.blocks_range(request.from_height, count);
            let reply = Frame::new(MessageType::Blocks, &BlocksPayload { blocks }, our_id)?;
            send_frame(ws, &reply).await?;
        }
        MessageType::GetTransactions => {
            let transactions = manager.ledger().read().await.pool.transactions();
            let reply =
                Frame::new(MessageType::Transactions, &TransactionsPayload { transactions }, our_id)?;
            send_frame(ws, &reply).await?;
        }
        MessageType::Peers => {
            if !handle.fulfill(frame) {
                // Unsolicited peer lists still feed discovery.
                let payload: PeersPayload = frame.decode()?;
                manager.emit(NetworkEvent::PeersDiscovered { peers: payload.peers }).await;
            }
        }
        MessageType::Blocks | MessageType::Transactions => {
            handle.fulfill(frame);
        }
        MessageType::NewBlock => {
            let payload: NewBlockPayload = frame.decode()?;
            // Content-hash dedup suppresses gossip loops.
            if manager.note_block_seen(&payload.block.hash()) {
                manager
                    .emit(NetworkEvent::BlockReceived {
                        from: handle.id.clone(),
                        block: payload.block,
                    })
                    .await;
            }
        }
        MessageType::NewTransaction => {
            let payload: NewTransactionPayload = frame.decode()?;
            if manager.note_transaction_seen(&payload.transaction.id) {
                manager
                    .emit(NetworkEvent::TransactionReceived {
                        from: handle.id.clone(),
                        transaction: payload.transaction,
                    })
                    .await;
            }
        }
    }
    Ok(true)
}
