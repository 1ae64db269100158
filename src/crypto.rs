//! Cryptographic primitives for Aurum
//!
//! All signatures are recoverable ECDSA over secp256k1. The chain stores
//! addresses, not public keys, so verification always goes through public
//! key recovery: the 65th signature byte is the recovery id.

use crate::error::NodeError;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
/// This prevents repeated, unnecessary context creation.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Human-readable address prefix.
pub const ADDRESS_PREFIX: &str = "aur1";

/// Length of a rendered address: prefix plus the 40-hex-char RIPEMD-160 digest.
pub const ADDRESS_LENGTH: usize = 44;

/// Recoverable signature size: 64 compact bytes plus one recovery byte.
pub const SIGNATURE_SIZE: usize = 65;

/// The all-zero hash, used as the genesis parent and the empty Merkle root.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// SHA-256 of arbitrary bytes, as a raw array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 of arbitrary bytes, hex-encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Derive the chain address for a public key:
/// `"aur1" + hex(ripemd160(sha256(compressed_pub)))`.
pub fn derive_address(public_key: &PublicKey) -> String {
    let sha = Sha256::digest(public_key.serialize());
    let rip = Ripemd160::digest(sha);
    format!("{}{}", ADDRESS_PREFIX, hex::encode(rip))
}

/// Quick shape check on an address string.
pub fn is_valid_address(address: &str) -> bool {
    address.len() == ADDRESS_LENGTH
        && address.starts_with(ADDRESS_PREFIX)
        && address[ADDRESS_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    /// The secp256k1 crate rejection-samples the scalar internally.
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair { secret_key, public_key }
    }

    /// Creates a KeyPair from an existing SecretKey.
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair { secret_key, public_key }
    }

    /// Creates a KeyPair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, NodeError> {
        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| NodeError::CryptoError(format!("Invalid secret key bytes: {}", e)))?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// The chain address of this keypair.
    pub fn address(&self) -> String {
        derive_address(&self.public_key)
    }

    /// The compressed 33-byte public key encoding.
    pub fn public_key_bytes(&self) -> [u8; 33] {
        self.public_key.serialize()
    }

    /// Signs a message (hashed with SHA-256 first) and returns the 65-byte
    /// recoverable signature.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_SIZE], NodeError> {
        let digest = sha256(message);
        let message = Message::from_digest_slice(&digest)
            .map_err(|e| NodeError::CryptoError(format!("Failed to create message: {}", e)))?;

        let signature = SECP256K1_CONTEXT.sign_ecdsa_recoverable(&message, &self.secret_key);
        let (recovery_id, compact) = signature.serialize_compact();

        let mut out = [0u8; SIGNATURE_SIZE];
        out[..64].copy_from_slice(&compact);
        out[64] = recovery_id.to_i32() as u8;
        Ok(out)
    }
}

/// Recover the public key that produced a 65-byte signature over `message`.
pub fn recover_public(message: &[u8], signature: &[u8]) -> Result<PublicKey, NodeError> {
    if signature.len() != SIGNATURE_SIZE {
        return Err(NodeError::CryptoError(format!(
            "Signature must be {} bytes, got {}",
            SIGNATURE_SIZE,
            signature.len()
        )));
    }

    let recovery_id = RecoveryId::from_i32(signature[64] as i32)
        .map_err(|e| NodeError::CryptoError(format!("Invalid recovery id: {}", e)))?;
    let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id)
        .map_err(|e| NodeError::CryptoError(format!("Invalid signature: {}", e)))?;

    let digest = sha256(message);
    let message = Message::from_digest_slice(&digest)
        .map_err(|e| NodeError::CryptoError(format!("Failed to create message: {}", e)))?;

    SECP256K1_CONTEXT
        .recover_ecdsa(&message, &recoverable)
        .map_err(|_| NodeError::CryptoError("Public key recovery failed".to_string()))
}

/// Verifies a 65-byte signature against a known public key. The recovery
/// byte is ignored for plain verification.
pub fn verify_signature(
    public_key: &PublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), NodeError> {
    let recovered = recover_public(message, signature)?;
    if &recovered == public_key {
        Ok(())
    } else {
        Err(NodeError::InvalidSignature)
    }
}

/// Recover the signer's address from a 65-byte signature. This is the
/// verification path the ledger uses, since only addresses are stored.
pub fn recover_address(message: &[u8], signature: &[u8]) -> Result<String, NodeError> {
    Ok(derive_address(&recover_public(message, signature)?))
}
