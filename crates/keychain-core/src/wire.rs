//! Versioned wire codec for blocks, transactions and full chains.
//!
//! The block inside the envelope is encoded with the same derived
//! serialization [`Block::canonical_bytes`] hashes, so a block that crosses the
//! wire hashes identically on both sides.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::WIRE_VERSION;
use crate::error::{ConsensusError, Result};
use crate::{Block, Transaction};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireBlock {
    pub version: u32,
    pub block: Block,
}

impl WireBlock {
    pub fn new(block: Block) -> Self {
        Self {
            version: WIRE_VERSION,
            block,
        }
    }

    pub fn into_block(self) -> Result<Block> {
        if self.version != WIRE_VERSION {
            return Err(ConsensusError::MalformedWireBlock(format!(
                "unsupported wire version {} (expected {WIRE_VERSION})",
                self.version
            )));
        }
        Ok(self.block)
    }
}

/// Chain export served to joining peers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireChain {
    pub length: usize,
    pub chain: Vec<WireBlock>,
}

pub fn encode_block(block: &Block) -> String {
    serde_json::to_string(&WireBlock::new(block.clone())).expect("wire block always serializes")
}

pub fn decode_block(payload: &str) -> Result<Block> {
    serde_json::from_str::<WireBlock>(payload)
        .map_err(|e| ConsensusError::MalformedWireBlock(e.to_string()))?
        .into_block()
}

pub fn encode_transaction(tr: &Transaction) -> String {
    serde_json::to_string(tr).expect("transaction always serializes")
}

pub fn decode_transaction(payload: &str) -> Result<Transaction> {
    serde_json::from_str(payload).map_err(|e| ConsensusError::MalformedWireBlock(e.to_string()))
}

pub fn encode_chain(blocks: &[Block]) -> WireChain {
    WireChain {
        length: blocks.len(),
        chain: blocks.iter().cloned().map(WireBlock::new).collect(),
    }
}

/// Rebuild a chain from a peer's export, preserving block order. Fails on an
/// empty chain or on any block that does not decode.
pub fn decode_chain(value: Value) -> Result<Vec<Block>> {
    let wire: WireChain =
        serde_json::from_value(value).map_err(|e| ConsensusError::MalformedWireBlock(e.to_string()))?;
    if wire.chain.is_empty() {
        return Err(ConsensusError::MalformedWireBlock("peer returned an empty chain".into()));
    }
    wire.chain.into_iter().map(WireBlock::into_block).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block() -> Block {
        Block::new(3, vec![Transaction::new("k", "v", "n1")], 1_700_000_000.25, "00ab")
    }

    #[test]
    fn decoded_block_keeps_its_hash() {
        let sent = block();
        let decoded = decode_block(&encode_block(&sent)).unwrap();
        assert_eq!(decoded, sent);
        assert_eq!(decoded.compute_hash(), sent.compute_hash());
    }

    #[test]
    fn rejects_missing_fields() {
        let payload = json!({
            "version": 1,
            "block": { "index": 1, "nonce": 0, "timestamp": 1.0, "transactions": [] }
        })
        .to_string();
        let err = decode_block(&payload).unwrap_err();
        assert!(matches!(err, ConsensusError::MalformedWireBlock(_)));
    }

    #[test]
    fn rejects_ill_typed_transactions() {
        let payload = json!({
            "version": 1,
            "block": {
                "index": 1, "nonce": 0, "previous_hash": "0", "timestamp": 1.0,
                "transactions": [{ "key": "a", "value": 1 }]
            }
        })
        .to_string();
        assert!(decode_block(&payload).is_err());
    }

    #[test]
    fn rejects_unknown_version() {
        let mut wire = serde_json::to_value(WireBlock::new(block())).unwrap();
        wire["version"] = json!(99);
        let err = decode_block(&wire.to_string()).unwrap_err();
        assert!(err.to_string().contains("unsupported wire version 99"));
    }

    #[test]
    fn chain_keeps_order() {
        let genesis = Block::genesis();
        let next = Block::new(1, vec![], 2.0, genesis.compute_hash());
        let value = serde_json::to_value(encode_chain(&[genesis.clone(), next.clone()])).unwrap();
        assert_eq!(value["length"], json!(2));
        let blocks = decode_chain(value).unwrap();
        assert_eq!(blocks, vec![genesis, next]);
    }

    #[test]
    fn empty_chain_is_malformed() {
        let err = decode_chain(json!({ "length": 0, "chain": [] })).unwrap_err();
        assert!(matches!(err, ConsensusError::MalformedWireBlock(_)));
    }

    #[test]
    fn transaction_payload_roundtrip() {
        let tr = Transaction::new("k", "v", "n1");
        assert_eq!(decode_transaction(&encode_transaction(&tr)).unwrap(), tr);
        assert!(decode_transaction("{\"key\":\"k\"}").is_err());
    }
}
