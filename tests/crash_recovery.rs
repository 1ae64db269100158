//! Crash recovery: snapshot restore plus re-validation of KV-only blocks

use aurum::config::Config;
use aurum::crypto::KeyPair;
use aurum::ledger::{merkle_root, Block, BlockHeader, Ledger};
use aurum::node::Node;
use aurum::transaction::{Transaction, TxKind};
use tempfile::TempDir;

fn make_block(parent: &Block, producer: &KeyPair, txs: Vec<Transaction>, timestamp: u64) -> Block {
    let header = BlockHeader {
        height: parent.header.height + 1,
        parent_hash: parent.hash(),
        timestamp,
        merkle_root: merkle_root(&txs),
        proposer: producer.address(),
        nonce: 0,
    };
    let mut block = Block { header, transactions: txs, signature: None };
    block.sign(producer).unwrap();
    block
}

fn config_for(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.node.data_dir = dir.path().to_string_lossy().to_string();
    config
}

#[tokio::test]
async fn test_genesis_only_node() {
    let dir = TempDir::new().unwrap();
    let node = Node::init(config_for(&dir)).await.unwrap();

    let ledger = node.ledger.read().await;
    assert_eq!(ledger.height(), 0);
    assert_eq!(ledger.tip().header.parent_hash, "0".repeat(64));
    assert_eq!(ledger.tip().header.proposer, "AURUM_GENESIS");
    assert_eq!(ledger.total_supply(), ledger.params().initial_supply);
}

#[tokio::test]
async fn test_local_submission_enters_pool() {
    let dir = TempDir::new().unwrap();
    let producer = KeyPair::generate();
    let alice = KeyPair::generate();
    let node = Node::init(config_for(&dir)).await.unwrap();

    {
        let mut ledger = node.ledger.write().await;
        let genesis = ledger.tip().clone();
        let b1 = make_block(&genesis, &producer, vec![Transaction::reward(alice.address(), 100, 10, 1)], 10);
        ledger.receive_block(b1).unwrap();
    }

    let mut tx = Transaction::new(
        TxKind::Transfer,
        alice.address(),
        producer.address(),
        10,
        1,
        20,
        None,
        0,
    );
    tx.sign(&alice).unwrap();

    node.submit_local_transaction(tx.clone()).await.unwrap();
    assert!(node.ledger.read().await.pool.contains(&tx.id));

    // Re-submission of a pooled transaction is a duplicate.
    let result = node.submit_local_transaction(tx).await;
    assert_eq!(result.unwrap_err().code(), "DuplicateTransaction");
}

#[tokio::test]
async fn test_restart_restores_tip_pool_and_accounts() {
    let dir = TempDir::new().unwrap();
    let producer = KeyPair::generate();
    let alice = KeyPair::generate();

    let pending_id;
    let tip_hash;
    {
        let node = Node::init(config_for(&dir)).await.unwrap();
        {
            let mut ledger = node.ledger.write().await;
            let genesis = ledger.tip().clone();
            let b1 = make_block(&genesis, &producer, vec![Transaction::reward(alice.address(), 100, 10, 1)], 10);
            ledger.receive_block(b1.clone()).unwrap();
            node.store.put_block(&b1).unwrap();

            let mut pending = Transaction::new(
                TxKind::Transfer,
                alice.address(),
                producer.address(),
                10,
                1,
                20,
                None,
                0,
            );
            pending.sign(&alice).unwrap();
            pending_id = pending.id.clone();
            ledger.submit_transaction(pending).unwrap();
            tip_hash = ledger.tip_hash();
        }
        // stop() flushes the final snapshot even when the node never ran.
        node.stop().await;
    }

    let node = Node::init(config_for(&dir)).await.unwrap();
    let ledger = node.ledger.read().await;
    assert_eq!(ledger.height(), 1);
    assert_eq!(ledger.tip_hash(), tip_hash);
    assert_eq!(ledger.state.account(&alice.address()).unwrap().balance, 100);
    assert!(ledger.pool.contains(&pending_id));
}

#[tokio::test]
async fn test_kv_only_blocks_are_revalidated_on_restart() {
    let dir = TempDir::new().unwrap();
    let producer = KeyPair::generate();
    let alice = KeyPair::generate();

    let b2_hash;
    {
        let node = Node::init(config_for(&dir)).await.unwrap();
        let mut ledger = node.ledger.write().await;

        let genesis = ledger.tip().clone();
        let b1 = make_block(&genesis, &producer, vec![Transaction::reward(alice.address(), 100, 10, 1)], 10);
        ledger.receive_block(b1.clone()).unwrap();
        node.store.put_block(&b1).unwrap();

        // Snapshot covers only height 1; height 2 exists in the KV store alone,
        // as if the crash hit between the block write and the next snapshot.
        node.store.write_snapshot(&ledger.snapshot()).unwrap();

        let b2 = make_block(&b1, &producer, vec![Transaction::reward(producer.address(), 5, 20, 2)], 20);
        ledger.receive_block(b2.clone()).unwrap();
        node.store.put_block(&b2).unwrap();
        b2_hash = b2.hash();
    }

    let node = Node::init(config_for(&dir)).await.unwrap();
    let ledger = node.ledger.read().await;
    assert_eq!(ledger.height(), 2);
    assert_eq!(ledger.tip_hash(), b2_hash);
    assert_eq!(ledger.state.account(&producer.address()).unwrap().balance, 5);
}

#[tokio::test]
async fn test_tampered_kv_block_is_dropped_on_restart() {
    let dir = TempDir::new().unwrap();
    let producer = KeyPair::generate();

    {
        let node = Node::init(config_for(&dir)).await.unwrap();
        let mut ledger = node.ledger.write().await;
        let genesis = ledger.tip().clone();
        let b1 = make_block(&genesis, &producer, vec![Transaction::reward(producer.address(), 5, 10, 1)], 10);
        ledger.receive_block(b1.clone()).unwrap();
        node.store.put_block(&b1).unwrap();
        node.store.write_snapshot(&ledger.snapshot()).unwrap();

        // A block that was never applied: the header was altered after
        // signing, so both its merkle root and signature are wrong.
        let mut forged = make_block(&b1, &producer, vec![Transaction::reward(producer.address(), 5, 20, 2)], 20);
        forged.header.merkle_root = "1".repeat(64);
        node.store.put_block(&forged).unwrap();
    }

    let node = Node::init(config_for(&dir)).await.unwrap();
    let ledger = node.ledger.read().await;
    // The forged block fails re-validation and recovery stops at the snapshot tip.
    assert_eq!(ledger.height(), 1);
}

#[tokio::test]
async fn test_snapshot_survives_ledger_equivalence() {
    let dir = TempDir::new().unwrap();
    let producer = KeyPair::generate();

    let node = Node::init(config_for(&dir)).await.unwrap();
    {
        let mut ledger = node.ledger.write().await;
        let genesis = ledger.tip().clone();
        let b1 = make_block(&genesis, &producer, vec![Transaction::reward(producer.address(), 7, 10, 1)], 10);
        ledger.receive_block(b1).unwrap();
    }

    let snapshot = node.ledger.read().await.snapshot();
    node.store.write_snapshot(&snapshot).unwrap();

    let restored = Ledger::restore(node.store.load_snapshot().unwrap().unwrap()).unwrap();
    let original = node.ledger.read().await;
    assert_eq!(restored.tip_hash(), original.tip_hash());
    assert_eq!(restored.minted(), original.minted());
    assert_eq!(restored.total_supply(), original.total_supply());
}
