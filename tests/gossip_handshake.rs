//! Gossip overlay: handshake, broadcast, and block fetch over real sockets

use aurum::config::ChainParams;
use aurum::crypto::KeyPair;
use aurum::ledger::{merkle_root, Block, BlockHeader, Ledger};
use aurum::network::{NetworkEvent, PeerManager};
use aurum::transaction::Transaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn new_manager(
    network_id: &str,
) -> (Arc<PeerManager>, mpsc::Receiver<NetworkEvent>, u16, watch::Sender<bool>) {
    let port = free_port();
    let ledger = Arc::new(RwLock::new(Ledger::new(ChainParams::default()).unwrap()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (manager, events) =
        PeerManager::new(network_id.to_string(), port, 8, ledger, shutdown_rx);
    (manager, events, port, shutdown_tx)
}

async fn start_listener(manager: &Arc<PeerManager>) {
    let listener = manager.clone();
    tokio::spawn(async move {
        let _ = listener.listen().await;
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
}

async fn wait_for_peers(manager: &Arc<PeerManager>, count: usize) -> bool {
    for _ in 0..50 {
        if manager.peer_count().await == count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

/// A peer on a different network id is rejected during the handshake and
/// never enters the peer table on either side.
#[tokio::test]
async fn test_network_id_mismatch_terminates_session() {
    let (server, _server_events, server_port, _s) = new_manager("aurum-test");
    start_listener(&server).await;

    let (client, _client_events, _, _c) = new_manager("other");
    client.spawn_dial("127.0.0.1".to_string(), server_port);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(server.peer_count().await, 0);
    assert_eq!(client.peer_count().await, 0);
}

#[tokio::test]
async fn test_matching_handshake_connects_both_sides() {
    let (server, mut server_events, server_port, _s) = new_manager("aurum-test");
    start_listener(&server).await;

    let (client, _client_events, _, _c) = new_manager("aurum-test");
    client.spawn_dial("127.0.0.1".to_string(), server_port);

    assert!(wait_for_peers(&server, 1).await);
    assert!(wait_for_peers(&client, 1).await);
    assert!(server.is_connected(client.node_id()).await);
    assert!(client.is_connected(server.node_id()).await);

    let event = tokio::time::timeout(Duration::from_secs(5), server_events.recv())
        .await
        .expect("expected a peer event")
        .expect("event channel open");
    assert!(matches!(event, NetworkEvent::PeerConnected { .. }));
}

/// NewTransaction broadcast reaches the peer as an orchestrator event, and
/// the dedup cache swallows the echo.
#[tokio::test]
async fn test_transaction_broadcast_reaches_peer_once() {
    let (server, mut server_events, server_port, _s) = new_manager("aurum-test");
    start_listener(&server).await;
    let (client, _client_events, _, _c) = new_manager("aurum-test");
    client.spawn_dial("127.0.0.1".to_string(), server_port);
    assert!(wait_for_peers(&client, 1).await);

    let tx = Transaction::reward("aur1somebody".to_string(), 5, 1, 1);
    client.broadcast_transaction(&tx).await.unwrap();
    // A second broadcast of the same payload is best-effort allowed locally;
    // the receiver's dedup must still deliver it upward only once.
    client.broadcast_transaction(&tx).await.unwrap();

    let mut received = 0;
    loop {
        match tokio::time::timeout(Duration::from_secs(2), server_events.recv()).await {
            Ok(Some(NetworkEvent::TransactionReceived { transaction, .. })) => {
                assert_eq!(transaction.id, tx.id);
                received += 1;
            }
            Ok(Some(_)) => continue,
            _ => break,
        }
    }
    assert_eq!(received, 1);
}

/// GetBlocks request/response: the client fetches the server's chain.
#[tokio::test]
async fn test_block_fetch_round_trip() {
    let (server, _server_events, server_port, _s) = new_manager("aurum-test");

    // Give the server one block beyond genesis.
    let producer = KeyPair::generate();
    {
        let mut ledger = server.ledger().write().await;
        let txs = vec![Transaction::reward(producer.address(), 5, 10, 1)];
        let header = BlockHeader {
            height: 1,
            parent_hash: ledger.tip_hash(),
            timestamp: 10,
            merkle_root: merkle_root(&txs),
            proposer: producer.address(),
            nonce: 0,
        };
        let mut block = Block { header, transactions: txs, signature: None };
        block.sign(&producer).unwrap();
        ledger.receive_block(block).unwrap();
    }
    start_listener(&server).await;

    let (client, _client_events, _, _c) = new_manager("aurum-test");
    client.spawn_dial("127.0.0.1".to_string(), server_port);
    assert!(wait_for_peers(&client, 1).await);

    let blocks = client.request_blocks(server.node_id(), 1, 64).await.unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].header.height, 1);

    // Past the tip resolves to an empty batch.
    let empty = client.request_blocks(server.node_id(), 2, 64).await.unwrap();
    assert!(empty.is_empty());
}
