//! Encrypted keystore and wallet operations
//!
//! One JSON file per address under `<data-dir>/wallets/`. Private keys are
//! encrypted with AES-256-CTR under a scrypt-derived key. A wrong password
//! and a missing wallet file surface identically as `InvalidCredential`, so
//! callers cannot enumerate which addresses exist.

use crate::crypto::KeyPair;
use crate::error::{NodeError, Result};
use crate::ledger::now_ms;
use crate::transaction::{Transaction, TxKind};
use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::rngs::OsRng;
use rand::RngCore;
use scrypt::{scrypt, Params as ScryptParams};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

const CIPHER_ID: &str = "aes-256-ctr";
const KDF_ID: &str = "scrypt";
const SCRYPT_N: u32 = 16_384;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const SCRYPT_DKLEN: u32 = 32;
const SALT_LEN: usize = 32;
const IV_LEN: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub n: u32,
    pub r: u32,
    pub p: u32,
    pub dklen: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoRecord {
    pub cipher: String,
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
    pub kdf: String,
    pub kdfparams: KdfParams,
}

/// On-disk wallet record. Never contains the plaintext private key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreRecord {
    pub address: String,
    pub name: String,
    pub public_key: String,
    pub created: u64,
    pub crypto: CryptoRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletSummary {
    pub address: String,
    pub name: String,
    pub created: u64,
}

fn derive_key(password: &str, salt: &[u8], params: &KdfParams) -> Result<[u8; 32]> {
    if !params.n.is_power_of_two() || params.n < 2 {
        return Err(NodeError::CorruptKeystore(format!("invalid scrypt n: {}", params.n)));
    }
    if params.dklen != SCRYPT_DKLEN {
        return Err(NodeError::CorruptKeystore(format!("invalid scrypt dklen: {}", params.dklen)));
    }
    let log_n = params.n.trailing_zeros() as u8;
    let scrypt_params = ScryptParams::new(log_n, params.r, params.p, params.dklen as usize)
        .map_err(|e| NodeError::CorruptKeystore(format!("invalid scrypt params: {}", e)))?;

    let mut key = [0u8; 32];
    scrypt(password.as_bytes(), salt, &scrypt_params, &mut key)
        .map_err(|e| NodeError::CryptoError(format!("scrypt failed: {}", e)))?;
    Ok(key)
}

/// Encrypt a 32-byte secret key under a password.
pub fn encrypt_secret(secret: &[u8], password: &str) -> Result<CryptoRecord> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let kdfparams = KdfParams { n: SCRYPT_N, r: SCRYPT_R, p: SCRYPT_P, dklen: SCRYPT_DKLEN };
    let key = derive_key(password, &salt, &kdfparams)?;

    let mut buf = secret.to_vec();
    let mut cipher = Aes256Ctr::new(&key.into(), &iv.into());
    cipher.apply_keystream(&mut buf);

    Ok(CryptoRecord {
        cipher: CIPHER_ID.to_string(),
        ciphertext: hex::encode(buf),
        iv: hex::encode(iv),
        salt: hex::encode(salt),
        kdf: KDF_ID.to_string(),
        kdfparams,
    })
}

/// Decrypt a keystore crypto record. CTR has no authentication tag; the
/// caller must check the decrypted key against the recorded address.
pub fn decrypt_secret(record: &CryptoRecord, password: &str) -> Result<Vec<u8>> {
    if record.cipher != CIPHER_ID {
        return Err(NodeError::CorruptKeystore(format!("unsupported cipher: {}", record.cipher)));
    }
    if record.kdf != KDF_ID {
        return Err(NodeError::CorruptKeystore(format!("unsupported kdf: {}", record.kdf)));
    }

    let salt = hex::decode(&record.salt)
        .map_err(|e| NodeError::CorruptKeystore(format!("invalid salt hex: {}", e)))?;
    let iv = hex::decode(&record.iv)
        .map_err(|e| NodeError::CorruptKeystore(format!("invalid iv hex: {}", e)))?;
    if iv.len() != IV_LEN {
        return Err(NodeError::CorruptKeystore(format!("invalid iv length: {}", iv.len())));
    }
    let mut buf = hex::decode(&record.ciphertext)
        .map_err(|e| NodeError::CorruptKeystore(format!("invalid ciphertext hex: {}", e)))?;

    let key = derive_key(password, &salt, &record.kdfparams)?;
    let mut iv_bytes = [0u8; IV_LEN];
    iv_bytes.copy_from_slice(&iv);

    let mut cipher = Aes256Ctr::new(&key.into(), &iv_bytes.into());
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}

/// The wallet directory. Only wallet operations touch it; an address-file
/// collision is an error, never an overwrite.
pub struct Keystore {
    dir: PathBuf,
}

impl Keystore {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Keystore { dir: dir.to_path_buf() })
    }

    fn record_path(&self, address: &str) -> PathBuf {
        self.dir.join(format!("{}.json", address))
    }

    /// Generate a keypair, encrypt it, and write one file per address.
    pub fn create(&self, name: &str, password: &str) -> Result<KeystoreRecord> {
        let keypair = KeyPair::generate();
        self.store(&keypair, name, password)
    }

    /// Import an existing private key given as hex.
    pub fn import(&self, private_key_hex: &str, name: &str, password: &str) -> Result<KeystoreRecord> {
        let bytes = hex::decode(private_key_hex)
            .map_err(|e| NodeError::WalletError(format!("invalid private key hex: {}", e)))?;
        let keypair = KeyPair::from_secret_bytes(&bytes)?;
        self.store(&keypair, name, password)
    }

    fn store(&self, keypair: &KeyPair, name: &str, password: &str) -> Result<KeystoreRecord> {
        let address = keypair.address();
        let path = self.record_path(&address);
        if path.exists() {
            return Err(NodeError::WalletError(format!(
                "wallet file for {} already exists",
                address
            )));
        }

        let record = KeystoreRecord {
            address: address.clone(),
            name: name.to_string(),
            public_key: hex::encode(keypair.public_key_bytes()),
            created: now_ms(),
            crypto: encrypt_secret(&keypair.secret_key.secret_bytes(), password)?,
        };
        fs::write(&path, serde_json::to_string_pretty(&record)?)?;
        Ok(record)
    }

    /// Load and decrypt a wallet. Missing files and wrong passwords are
    /// indistinguishable in the returned error.
    pub fn load(&self, address: &str, password: &str) -> Result<KeyPair> {
        let path = self.record_path(address);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(address, error = %e, "wallet file not readable");
                return Err(NodeError::InvalidCredential);
            }
        };
        let record: KeystoreRecord = serde_json::from_str(&raw)
            .map_err(|e| NodeError::CorruptKeystore(format!("malformed wallet file: {}", e)))?;

        let secret = decrypt_secret(&record.crypto, password)?;
        let keypair = match KeyPair::from_secret_bytes(&secret) {
            Ok(kp) => kp,
            Err(_) => return Err(NodeError::InvalidCredential),
        };
        if keypair.address() != record.address {
            return Err(NodeError::InvalidCredential);
        }
        Ok(keypair)
    }

    pub fn list(&self) -> Result<Vec<WalletSummary>> {
        let mut wallets = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path)?;
            match serde_json::from_str::<KeystoreRecord>(&raw) {
                Ok(record) => wallets.push(WalletSummary {
                    address: record.address,
                    name: record.name,
                    created: record.created,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable wallet file"),
            }
        }
        wallets.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(wallets)
    }

    /// Build and sign a transaction from a stored wallet. `sequence` must be
    /// the sender's current ledger sequence at signing time.
    #[allow(clippy::too_many_arguments)]
    pub fn create_transaction(
        &self,
        from: &str,
        to: &str,
        amount: u64,
        fee: u64,
        password: &str,
        kind: TxKind,
        sequence: u64,
        payload: Option<String>,
    ) -> Result<Transaction> {
        let keypair = self.load(from, password)?;
        let mut tx = Transaction::new(
            kind,
            from.to_string(),
            to.to_string(),
            amount,
            fee,
            now_ms(),
            payload,
            sequence,
        );
        tx.sign(&keypair)?;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use tempfile::TempDir;

    fn open_keystore(dir: &TempDir) -> Keystore {
        Keystore::open(&dir.path().join("wallets")).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let keypair = KeyPair::generate();
        let secret = keypair.secret_key.secret_bytes();

        let record = encrypt_secret(&secret, "hunter2").unwrap();
        assert_eq!(record.cipher, CIPHER_ID);
        assert_eq!(record.kdfparams.n, SCRYPT_N);

        let decrypted = decrypt_secret(&record, "hunter2").unwrap();
        assert_eq!(decrypted, secret.to_vec());
    }

    #[test]
    fn test_wrong_password_yields_different_bytes() {
        let keypair = KeyPair::generate();
        let secret = keypair.secret_key.secret_bytes();

        let record = encrypt_secret(&secret, "correct").unwrap();
        let wrong = decrypt_secret(&record, "incorrect").unwrap();
        assert_ne!(wrong, secret.to_vec());
    }

    #[test]
    fn test_create_and_load_wallet() {
        let dir = TempDir::new().unwrap();
        let keystore = open_keystore(&dir);

        let record = keystore.create("alice", "pass").unwrap();
        assert!(crypto::is_valid_address(&record.address));

        let keypair = keystore.load(&record.address, "pass").unwrap();
        assert_eq!(keypair.address(), record.address);
    }

    #[test]
    fn test_wrong_password_is_invalid_credential() {
        let dir = TempDir::new().unwrap();
        let keystore = open_keystore(&dir);

        let record = keystore.create("alice", "pass").unwrap();
        let result = keystore.load(&record.address, "wrong");
        assert!(matches!(result, Err(NodeError::InvalidCredential)));
    }

    #[test]
    fn test_missing_wallet_is_invalid_credential() {
        let dir = TempDir::new().unwrap();
        let keystore = open_keystore(&dir);

        let result = keystore.load("aur1000000000000000000000000000000000000babe", "pass");
        assert!(matches!(result, Err(NodeError::InvalidCredential)));
    }

    #[test]
    fn test_import_roundtrip() {
        let dir = TempDir::new().unwrap();
        let keystore = open_keystore(&dir);

        let original = KeyPair::generate();
        let secret_hex = hex::encode(original.secret_key.secret_bytes());

        let record = keystore.import(&secret_hex, "imported", "pass").unwrap();
        assert_eq!(record.address, original.address());

        let loaded = keystore.load(&record.address, "pass").unwrap();
        assert_eq!(loaded.address(), original.address());
    }

    #[test]
    fn test_duplicate_address_file_is_error() {
        let dir = TempDir::new().unwrap();
        let keystore = open_keystore(&dir);

        let original = KeyPair::generate();
        let secret_hex = hex::encode(original.secret_key.secret_bytes());
        keystore.import(&secret_hex, "first", "pass").unwrap();

        let result = keystore.import(&secret_hex, "second", "pass");
        assert!(matches!(result, Err(NodeError::WalletError(_))));
    }

    #[test]
    fn test_list_wallets() {
        let dir = TempDir::new().unwrap();
        let keystore = open_keystore(&dir);

        keystore.create("alice", "a").unwrap();
        keystore.create("bob", "b").unwrap();

        let wallets = keystore.list().unwrap();
        assert_eq!(wallets.len(), 2);
    }

    #[test]
    fn test_created_transaction_verifies() {
        let dir = TempDir::new().unwrap();
        let keystore = open_keystore(&dir);
        let record = keystore.create("alice", "pass").unwrap();

        let tx = keystore
            .create_transaction(
                &record.address,
                "aur1000000000000000000000000000000000000babe",
                10,
                1,
                "pass",
                TxKind::Transfer,
                0,
                None,
            )
            .unwrap();

        assert!(tx.validate_stateless().is_ok());
        assert_eq!(tx.sender, record.address);
        assert_eq!(tx.sequence, 0);
    }
}
