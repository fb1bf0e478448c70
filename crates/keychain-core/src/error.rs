//! Error kinds raised by the consensus engine.

use thiserror::Error;

use crate::BlockHash;

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Every variant is non-fatal: the caller drops the offending input and the
/// node keeps serving its last good state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Block hash does not carry the required zero prefix.
    #[error("block {hash} does not meet difficulty {difficulty}")]
    InvalidProof { hash: BlockHash, difficulty: usize },

    /// No master tip, branch tail or branch block matches the parent hash.
    #[error("block {hash} has no known parent {previous_hash}")]
    OrphanBlock {
        hash: BlockHash,
        previous_hash: BlockHash,
    },

    /// A peer RPC failed while joining the network.
    #[error("peer {address} unavailable: {reason}")]
    NetworkUnavailable { address: String, reason: String },

    /// Peer-supplied block data failed decoding or field validation.
    #[error("malformed wire block: {0}")]
    MalformedWireBlock(String),
}

impl ConsensusError {
    pub fn unavailable(address: &str, reason: impl ToString) -> Self {
        Self::NetworkUnavailable {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }
}
