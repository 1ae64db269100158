//! Integration tests for wallet creation and transaction handling

use aurum::config::ChainParams;
use aurum::crypto::{self, KeyPair};
use aurum::keystore::Keystore;
use aurum::ledger::{merkle_root, Block, BlockHeader, Ledger};
use aurum::transaction::{Transaction, TxKind};
use tempfile::TempDir;

fn open_keystore(dir: &TempDir) -> Result<Keystore, Box<dyn std::error::Error>> {
    Ok(Keystore::open(&dir.path().join("wallets"))?)
}

/// Append a block crediting `recipient` so it can spend in later blocks.
fn credit(ledger: &mut Ledger, producer: &KeyPair, recipient: &str, amount: u64) {
    let reward = Transaction::reward(recipient.to_string(), amount, ledger.tip().header.timestamp + 1, ledger.height() + 1);
    let txs = vec![reward];
    let header = BlockHeader {
        height: ledger.height() + 1,
        parent_hash: ledger.tip_hash(),
        timestamp: ledger.tip().header.timestamp + 15_000,
        merkle_root: merkle_root(&txs),
        proposer: producer.address(),
        nonce: 0,
    };
    let mut block = Block { header, transactions: txs, signature: None };
    block.sign(producer).unwrap();
    ledger.receive_block(block).unwrap();
}

#[test]
fn test_wallet_creation() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let keystore = open_keystore(&dir)?;

    let record = keystore.create("test_wallet", "password")?;

    assert_eq!(record.name, "test_wallet");
    assert!(crypto::is_valid_address(&record.address));
    assert_eq!(record.address.len(), 44);
    assert!(record.address.starts_with("aur1"));
    assert_eq!(record.public_key.len(), 66);
    assert!(record.created > 0);

    // One file per address under wallets/.
    let path = dir.path().join("wallets").join(format!("{}.json", record.address));
    assert!(path.exists());

    // The plaintext private key must never be on disk.
    let raw = std::fs::read_to_string(&path)?;
    assert!(!raw.contains("secret"));
    assert_eq!(record.crypto.cipher, "aes-256-ctr");
    assert_eq!(record.crypto.kdf, "scrypt");
    assert_eq!(record.crypto.kdfparams.n, 16_384);

    Ok(())
}

#[test]
fn test_create_two_wallets() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let keystore = open_keystore(&dir)?;

    let alice = keystore.create("alice", "a")?;
    let bob = keystore.create("bob", "b")?;

    assert_ne!(alice.address, bob.address);
    assert_ne!(alice.public_key, bob.public_key);
    assert_eq!(keystore.list()?.len(), 2);

    Ok(())
}

#[test]
fn test_wallet_load_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let keystore = open_keystore(&dir)?;

    let record = keystore.create("persistent", "secret-password")?;
    let keypair = keystore.load(&record.address, "secret-password")?;
    assert_eq!(keypair.address(), record.address);

    // Wrong password and missing wallet surface as the same error kind.
    let wrong = keystore.load(&record.address, "not-the-password");
    let missing = keystore.load("aur1000000000000000000000000000000000000babe", "x");
    assert_eq!(wrong.unwrap_err().code(), "InvalidCredential");
    assert_eq!(missing.unwrap_err().code(), "InvalidCredential");

    Ok(())
}

#[test]
fn test_signed_transaction_confirms_on_chain() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let keystore = open_keystore(&dir)?;

    let sender = keystore.create("sender", "pw")?;
    let recipient = keystore.create("recipient", "pw")?;

    let mut ledger = Ledger::new(ChainParams::default())?;
    let producer = KeyPair::generate();
    credit(&mut ledger, &producer, &sender.address, 100);

    // Sequence comes from the ledger at signing time.
    let sequence = ledger.state.account(&sender.address).unwrap().sequence;
    let tx = keystore.create_transaction(
        &sender.address,
        &recipient.address,
        10,
        1,
        "pw",
        TxKind::Transfer,
        sequence,
        None,
    )?;

    ledger.submit_transaction(tx.clone())?;
    let block = ledger.assemble_block(&producer)?;
    ledger.receive_block(block)?;

    assert_eq!(ledger.state.account(&sender.address).unwrap().balance, 89);
    assert_eq!(ledger.state.account(&sender.address).unwrap().sequence, 1);
    assert_eq!(ledger.state.account(&recipient.address).unwrap().balance, 10);
    assert!(ledger.contains_transaction(&tx.id));

    Ok(())
}

#[test]
fn test_stale_sequence_from_wallet_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let keystore = open_keystore(&dir)?;
    let sender = keystore.create("sender", "pw")?;

    let mut ledger = Ledger::new(ChainParams::default())?;
    let producer = KeyPair::generate();
    credit(&mut ledger, &producer, &sender.address, 100);

    // A wallet that always signs with sequence zero only works once.
    let first = keystore.create_transaction(
        &sender.address,
        &producer.address(),
        10,
        1,
        "pw",
        TxKind::Transfer,
        0,
        None,
    )?;
    ledger.submit_transaction(first)?;
    let block = ledger.assemble_block(&producer)?;
    ledger.receive_block(block)?;

    let second = keystore.create_transaction(
        &sender.address,
        &producer.address(),
        10,
        1,
        "pw",
        TxKind::Transfer,
        0,
        None,
    )?;
    let result = ledger.submit_transaction(second);
    assert_eq!(result.unwrap_err().code(), "InvalidSequence");

    Ok(())
}
