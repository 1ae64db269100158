//! Persistence layer for the Aurum node
//!
//! Two artifacts live under the data directory: a key-value store for
//! per-block and per-transaction records (`blockchain/db/`), and a full
//! ledger snapshot (`blockchain_state.json`) written atomically through a
//! temp file. KV writes are fire-and-forget; the snapshot is the recovery
//! anchor and KV-only blocks above it are re-validated on startup.

use crate::error::{NodeError, Result};
use crate::ledger::{Block, LedgerSnapshot};
use crate::transaction::Transaction;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Abstraction over the key-value backend: string keys, byte values.
pub trait KvStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// SQLite-backed store, one table of key/value pairs.
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| NodeError::StorageFailure(format!("failed to open database: {}", e)))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| NodeError::StorageFailure(format!("failed to create kv table: {}", e)))?;
        Ok(SqliteKv { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| NodeError::StorageFailure("database mutex poisoned".to_string()))
    }
}

impl KvStore for SqliteKv {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryKv {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut map = self.map.lock().map_err(|_| {
            NodeError::StorageFailure("memory kv mutex poisoned".to_string())
        })?;
        map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.map.lock().map_err(|_| {
            NodeError::StorageFailure("memory kv mutex poisoned".to_string())
        })?;
        Ok(map.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.map.lock().map_err(|_| {
            NodeError::StorageFailure("memory kv mutex poisoned".to_string())
        })?;
        map.remove(key);
        Ok(())
    }
}

fn block_height_key(height: u64) -> String {
    format!("block:h:{}", height)
}

fn block_hash_key(hash: &str) -> String {
    format!("block:x:{}", hash)
}

fn tx_key(id: &str) -> String {
    format!("tx:{}", id)
}

/// The node's storage facade: a KV backend plus the snapshot file.
pub struct ChainStore {
    kv: Box<dyn KvStore>,
    snapshot_path: PathBuf,
}

impl ChainStore {
    pub fn new(kv: Box<dyn KvStore>, data_dir: &Path) -> Self {
        ChainStore { kv, snapshot_path: data_dir.join("blockchain_state.json") }
    }

    /// Open the default SQLite-backed store under `<data-dir>/blockchain/db/`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let kv = SqliteKv::open(&data_dir.join("blockchain").join("db").join("kv.sqlite"))?;
        Ok(Self::new(Box::new(kv), data_dir))
    }

    /// Index a block under both its height and header hash, and each of its
    /// transactions under its id.
    pub fn put_block(&self, block: &Block) -> Result<()> {
        let encoded = serde_json::to_vec(block)?;
        self.kv.put(&block_height_key(block.header.height), &encoded)?;
        self.kv.put(&block_hash_key(&block.hash()), &encoded)?;
        for tx in &block.transactions {
            self.kv.put(&tx_key(&tx.id), &serde_json::to_vec(tx)?)?;
        }
        Ok(())
    }

    pub fn block_by_height(&self, height: u64) -> Result<Option<Block>> {
        match self.kv.get(&block_height_key(height))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn block_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        match self.kv.get(&block_hash_key(hash))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn transaction(&self, id: &str) -> Result<Option<Transaction>> {
        match self.kv.get(&tx_key(id))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Write the full ledger snapshot through a temp file and rename, so a
    /// crash mid-write never leaves a truncated snapshot behind.
    pub fn write_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let encoded = serde_json::to_vec(snapshot)?;
        let tmp = self.snapshot_path.with_extension("json.tmp");
        fs::write(&tmp, &encoded)?;
        fs::rename(&tmp, &self.snapshot_path)
            .map_err(|e| NodeError::StorageFailure(format!("snapshot rename failed: {}", e)))?;
        Ok(())
    }

    pub fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&self.snapshot_path)?;
        let snapshot = serde_json::from_slice(&raw)
            .map_err(|e| NodeError::StorageFailure(format!("corrupt snapshot: {}", e)))?;
        Ok(Some(snapshot))
    }

    /// Blocks present only in the KV store, above the snapshot tip. These
    /// get re-validated through the normal append path on recovery.
    pub fn blocks_above(&self, height: u64) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        let mut next = height + 1;
        while let Some(block) = self.block_by_height(next)? {
            blocks.push(block);
            next += 1;
        }
        Ok(blocks)
    }
}
