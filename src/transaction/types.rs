/// Transaction types for the Aurum ledger
use crate::crypto::{self, KeyPair};
use crate::error::NodeError;
use serde::{Deserialize, Serialize};

/// Sender literal carried by synthesized reward transactions.
pub const NETWORK_SENDER: &str = "network";

/// Maximum serialized transaction size in bytes to prevent DoS.
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Transfer,
    Reward,
    Stake,
    Unstake,
    /// Reserved: parses and hashes, never valid in a block.
    ContractDeploy,
    /// Reserved: parses and hashes, never valid in a block.
    ContractCall,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Transfer => "transfer",
            TxKind::Reward => "reward",
            TxKind::Stake => "stake",
            TxKind::Unstake => "unstake",
            TxKind::ContractDeploy => "contract_deploy",
            TxKind::ContractCall => "contract_call",
        }
    }
}

/// An immutable ledger record. The identifier is the SHA-256 of the
/// canonical payload encoding (every field except `id` and `signature`,
/// keys in declared order, compact JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub kind: TxKind,
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub fee: u64,
    pub timestamp: u64,
    pub payload: Option<String>,
    pub sequence: u64,
    pub signature: Option<String>,
}

/// Canonical payload view: field order here is the declared order and must
/// not change, it is what every node hashes and signs.
#[derive(Serialize)]
struct TxPayload<'a> {
    kind: TxKind,
    sender: &'a str,
    recipient: &'a str,
    amount: u64,
    fee: u64,
    timestamp: u64,
    payload: &'a Option<String>,
    sequence: u64,
}

impl Transaction {
    /// Build an unsigned transaction; the id is computed immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: TxKind,
        sender: String,
        recipient: String,
        amount: u64,
        fee: u64,
        timestamp: u64,
        payload: Option<String>,
        sequence: u64,
    ) -> Self {
        let mut tx = Transaction {
            id: String::new(),
            kind,
            sender,
            recipient,
            amount,
            fee,
            timestamp,
            payload,
            sequence,
            signature: None,
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Synthesize a reward transaction. Rewards carry no signature and the
    /// well-known network sender; the sequence slot holds the height the
    /// reward is minted at, which keeps equal rewards to the same recipient
    /// distinguishable.
    pub fn reward(recipient: String, amount: u64, timestamp: u64, height: u64) -> Self {
        Transaction::new(
            TxKind::Reward,
            NETWORK_SENDER.to_string(),
            recipient,
            amount,
            0,
            timestamp,
            None,
            height,
        )
    }

    /// The canonical byte encoding used for both the identifier hash and
    /// signing. Defined once; every other path must call this.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let view = TxPayload {
            kind: self.kind,
            sender: &self.sender,
            recipient: &self.recipient,
            amount: self.amount,
            fee: self.fee,
            timestamp: self.timestamp,
            payload: &self.payload,
            sequence: self.sequence,
        };
        serde_json::to_vec(&view).expect("canonical transaction encoding cannot fail")
    }

    /// Recompute the content identifier from the canonical encoding.
    pub fn compute_id(&self) -> String {
        crypto::sha256_hex(&self.signing_bytes())
    }

    /// Raw 32-byte leaf hash for the Merkle tree. Identical to the id bytes.
    pub fn leaf_hash(&self) -> [u8; 32] {
        crypto::sha256(&self.signing_bytes())
    }

    /// Sign with the given keypair and attach the hex-encoded signature.
    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), NodeError> {
        let signature = keypair.sign(&self.signing_bytes())?;
        self.signature = Some(hex::encode(signature));
        Ok(())
    }

    /// Decode the attached signature, if any.
    pub fn signature_bytes(&self) -> Result<Vec<u8>, NodeError> {
        let sig = self
            .signature
            .as_ref()
            .ok_or_else(|| NodeError::InvalidTransaction("transaction not signed".to_string()))?;
        hex::decode(sig).map_err(|e| NodeError::CryptoError(format!("invalid signature hex: {}", e)))
    }

    pub fn is_reward(&self) -> bool {
        self.kind == TxKind::Reward
    }

    /// Validate serialized size to prevent oversized payload abuse.
    pub fn validate_size(&self) -> Result<(), NodeError> {
        let serialized = serde_json::to_vec(self)
            .map_err(|e| NodeError::InvalidTransaction(format!("serialization failed: {}", e)))?;
        if serialized.len() > MAX_TRANSACTION_SIZE {
            return Err(NodeError::InvalidTransaction(format!(
                "transaction too large: {} bytes (max: {})",
                serialized.len(),
                MAX_TRANSACTION_SIZE
            )));
        }
        Ok(())
    }
}
