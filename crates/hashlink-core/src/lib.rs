pub mod constants;
pub mod ledger;
pub mod mine;
pub mod store;
pub mod verify;
pub mod wallet;

use constants::{GENESIS_PROOF, MINING_SENDER};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub use ledger::{Committed, Ledger, LedgerConfig, LoadError, MineError, RejectReason, SaveError};
pub use store::{MemoryStore, Snapshot, SnapshotStore, StorageError};
pub use verify::ConsensusParams;
pub use wallet::Wallet;

pub type Hash = [u8; 32];
pub type Amount = u64;
/// Signed because a replayed history is not guaranteed to be solvent.
pub type Balance = i128;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("reward transaction must not carry a signature")]
    SignedReward,
}

/// A ledger entry. Rewards mint supply and are only ever created by mining;
/// transfers move funds between identities and carry the sender's signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "TransactionRecord", try_from = "TransactionRecord")]
pub enum Transaction {
    Reward {
        recipient: String,
        amount: Amount,
    },
    Transfer {
        sender: String,
        recipient: String,
        signature: String,
        amount: Amount,
    },
}

/// Persisted shape of a transaction, shared by both variants.
#[derive(Serialize, Deserialize)]
struct TransactionRecord {
    sender: String,
    recipient: String,
    signature: String,
    amount: Amount,
}

impl From<Transaction> for TransactionRecord {
    fn from(tx: Transaction) -> Self {
        match tx {
            Transaction::Reward { recipient, amount } => Self {
                sender: MINING_SENDER.to_string(),
                recipient,
                signature: String::new(),
                amount,
            },
            Transaction::Transfer {
                sender,
                recipient,
                signature,
                amount,
            } => Self {
                sender,
                recipient,
                signature,
                amount,
            },
        }
    }
}

impl TryFrom<TransactionRecord> for Transaction {
    type Error = TransactionError;

    fn try_from(record: TransactionRecord) -> Result<Self, Self::Error> {
        if record.sender == MINING_SENDER {
            if !record.signature.is_empty() {
                return Err(TransactionError::SignedReward);
            }
            return Ok(Transaction::reward(record.recipient, record.amount));
        }
        Ok(Transaction::transfer(
            record.sender,
            record.recipient,
            record.signature,
            record.amount,
        ))
    }
}

/// The signed/hashed view of a transaction: sender, recipient, amount, in that order.
#[derive(Serialize)]
struct CanonicalTx<'a> {
    sender: &'a str,
    recipient: &'a str,
    amount: Amount,
}

impl Transaction {
    pub fn reward(recipient: impl Into<String>, amount: Amount) -> Self {
        Transaction::Reward {
            recipient: recipient.into(),
            amount,
        }
    }

    pub fn transfer(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        signature: impl Into<String>,
        amount: Amount,
    ) -> Self {
        Transaction::Transfer {
            sender: sender.into(),
            recipient: recipient.into(),
            signature: signature.into(),
            amount,
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            Transaction::Reward { .. } => MINING_SENDER,
            Transaction::Transfer { sender, .. } => sender,
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            Transaction::Reward { recipient, .. } | Transaction::Transfer { recipient, .. } => {
                recipient
            }
        }
    }

    pub fn signature(&self) -> &str {
        match self {
            Transaction::Reward { .. } => "",
            Transaction::Transfer { signature, .. } => signature,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            Transaction::Reward { amount, .. } | Transaction::Transfer { amount, .. } => *amount,
        }
    }

    pub fn is_reward(&self) -> bool {
        matches!(self, Transaction::Reward { .. })
    }

    fn canonical(&self) -> CanonicalTx<'_> {
        CanonicalTx {
            sender: self.sender(),
            recipient: self.recipient(),
            amount: self.amount(),
        }
    }

    /// Bytes covered by the sender's signature.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_triple(self.sender(), self.recipient(), self.amount())
    }
}

pub fn canonical_triple(sender: &str, recipient: &str, amount: Amount) -> Vec<u8> {
    to_canonical_json(&CanonicalTx {
        sender,
        recipient,
        amount,
    })
}

pub fn canonical_transactions(txs: &[Transaction]) -> Vec<u8> {
    let view: Vec<CanonicalTx<'_>> = txs.iter().map(Transaction::canonical).collect();
    to_canonical_json(&view)
}

fn to_canonical_json<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    // Only strings and integers reach here; writing them into memory cannot fail.
    serde_json::to_vec(value).expect("canonical form is always serializable")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    /// Hex digest of the previous block, empty for genesis.
    pub previous_hash: String,
    pub transactions: Vec<Transaction>,
    pub proof: u64,
    pub timestamp: u64,
}

/// Keys are declared alphabetically so the rendering never depends on field order.
#[derive(Serialize)]
struct CanonicalBlock<'a> {
    index: u64,
    previous_hash: &'a str,
    proof: u64,
    timestamp: u64,
    transactions: Vec<CanonicalTx<'a>>,
}

impl Block {
    pub fn new(index: u64, previous_hash: String, transactions: Vec<Transaction>, proof: u64) -> Self {
        Self {
            index,
            previous_hash,
            transactions,
            proof,
            timestamp: unix_now(),
        }
    }

    pub fn genesis() -> Self {
        Self {
            index: 0,
            previous_hash: String::new(),
            transactions: vec![],
            proof: GENESIS_PROOF,
            timestamp: 0,
        }
    }

    pub fn hash(&self) -> String {
        hash_block(self)
    }

    fn canonical_bytes(&self) -> Vec<u8> {
        to_canonical_json(&CanonicalBlock {
            index: self.index,
            previous_hash: &self.previous_hash,
            proof: self.proof,
            timestamp: self.timestamp,
            transactions: self.transactions.iter().map(Transaction::canonical).collect(),
        })
    }
}

pub fn sha256(bytes: &[u8]) -> Hash {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..]);
    out
}

pub fn hash_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}

/// Hex SHA-256 of the block's canonical form. Signatures are not covered.
pub fn hash_block(block: &Block) -> String {
    hash_hex(&block.canonical_bytes())
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

pub mod pow {
    use super::{canonical_transactions, Hash, Transaction};
    use sha2::{Digest, Sha256};
    use std::sync::atomic::{AtomicBool, Ordering};
    use thiserror::Error;

    /// Why a proof search ended without a proof.
    #[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
    pub enum SearchError {
        #[error("proof-of-work search cancelled")]
        Cancelled,

        #[error("no nonce in the u64 range meets the target")]
        Exhausted,
    }

    /// Hasher primed with `canonical(txs) ++ last_hash`; each guess only appends the nonce.
    pub(crate) fn proof_prefix(txs: &[Transaction], last_hash: &str) -> Sha256 {
        let mut hasher = Sha256::new();
        hasher.update(canonical_transactions(txs));
        hasher.update(last_hash.as_bytes());
        hasher
    }

    pub(crate) fn guess_meets(prefix: &Sha256, proof: u64, difficulty: u32) -> bool {
        let mut hasher = prefix.clone();
        hasher.update(proof.to_string().as_bytes());
        let mut h = [0u8; 32];
        h.copy_from_slice(&hasher.finalize()[..]);
        count_leading_zero_bits(&h) >= difficulty
    }

    /// Hash of `canonical(txs) ++ last_hash ++ proof`.
    pub fn proof_hash(txs: &[Transaction], last_hash: &str, proof: u64) -> Hash {
        let mut hasher = proof_prefix(txs, last_hash);
        hasher.update(proof.to_string().as_bytes());
        let mut h = [0u8; 32];
        h.copy_from_slice(&hasher.finalize()[..]);
        h
    }

    pub fn valid_proof(txs: &[Transaction], last_hash: &str, proof: u64, difficulty: u32) -> bool {
        guess_meets(&proof_prefix(txs, last_hash), proof, difficulty)
    }

    /// Smallest nonce satisfying [`valid_proof`], counting up from zero.
    /// `cancel` is polled before every guess.
    pub fn proof_of_work(
        txs: &[Transaction],
        last_hash: &str,
        difficulty: u32,
        cancel: &AtomicBool,
    ) -> Result<u64, SearchError> {
        let prefix = proof_prefix(txs, last_hash);
        let mut proof = 0u64;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(SearchError::Cancelled);
            }
            if guess_meets(&prefix, proof, difficulty) {
                return Ok(proof);
            }
            proof = proof.checked_add(1).ok_or(SearchError::Exhausted)?;
        }
    }

    pub fn count_leading_zero_bits(hash: &Hash) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += 8;
            } else {
                total += b.leading_zeros();
                break;
            }
        }
        total
    }
}
