use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod bootstrap;
pub mod chain;
pub mod constants;
pub mod error;
pub mod mine;
pub mod net;
pub mod node;
pub mod pool;
pub mod wire;

pub use chain::{ChainStore, Placement};
pub use error::{ConsensusError, Result};
pub use mine::{MineOutcome, MiningSignal};
pub use node::{ChainState, ChainStatus, EngineConfig, Keychain};
pub use pool::TransactionPool;

/// Lowercase hex SHA-256 digest of a block's canonical serialization.
pub type BlockHash = String;

/// A single key/value write. Fields are declared in lexicographic order so the
/// derived serialization is already the canonical one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub key: String,
    pub origin: String,
    pub value: String,
}

impl Transaction {
    pub fn new(key: impl Into<String>, value: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            origin: origin.into(),
            value: value.into(),
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value && self.origin == other.origin
    }
}

impl Eq for Transaction {}

/// Ordered transactions plus header. The hash is recomputed on demand from the
/// current fields and never cached.
///
/// Field declaration order is the wire and hashing layout; do not reorder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub nonce: u64,
    pub previous_hash: BlockHash,
    pub timestamp: f64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(
        index: u64,
        transactions: Vec<Transaction>,
        timestamp: f64,
        previous_hash: impl Into<BlockHash>,
    ) -> Self {
        Self {
            index,
            nonce: 0,
            previous_hash: previous_hash.into(),
            timestamp,
            transactions,
        }
    }

    /// Index 0, no transactions, parent `"0"`.
    pub fn genesis() -> Self {
        Self::new(0, vec![], unix_timestamp(), constants::GENESIS_PREVIOUS_HASH)
    }

    pub fn is_genesis(&self) -> bool {
        self.previous_hash == constants::GENESIS_PREVIOUS_HASH
    }

    /// Compact JSON with fields in declaration order. Shared by hashing and
    /// the wire codec.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("block fields always serialize")
    }

    pub fn compute_hash(&self) -> BlockHash {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn proof(&self, difficulty: usize) -> bool {
        pow::meets_difficulty(&self.compute_hash(), difficulty)
    }

    pub fn increment_nonce(&mut self) {
        self.nonce = self.nonce.wrapping_add(1);
    }

    pub fn contains(&self, tr: &Transaction) -> bool {
        self.transactions.contains(tr)
    }
}

/// Seconds since the Unix epoch with sub-second precision.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

pub mod pow {
    use super::Block;
    use crate::mine::MiningSignal;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SearchOutcome {
        Found,
        Interrupted,
    }

    pub fn count_leading_zero_hex(hash: &str) -> usize {
        hash.chars().take_while(|c| *c == '0').count()
    }

    pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
        count_leading_zero_hex(hash) >= difficulty
    }

    /// Mine the block from nonce 0 until its hash has at least `difficulty`
    /// leading zero hex characters. Not preemptible.
    pub fn mine_block(mut block: Block, difficulty: usize) -> Block {
        block.nonce = 0;
        while !block.proof(difficulty) {
            block.increment_nonce();
        }
        block
    }

    /// Preemptible search continuing from the block's current nonce. The signal
    /// is checked before every increment, so a raised signal stops the search
    /// within one hash.
    pub fn search(block: &mut Block, difficulty: usize, signal: &MiningSignal) -> SearchOutcome {
        loop {
            if block.proof(difficulty) {
                return SearchOutcome::Found;
            }
            if signal.is_raised() {
                return SearchOutcome::Interrupted;
            }
            block.increment_nonce();
        }
    }
}
