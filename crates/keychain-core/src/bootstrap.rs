//! Joining the network: learn peers from the bootstrap node, ask every peer
//! for its last master hash, and import the chain the majority reports.
//!
//! The imported chain is installed without re-checking proofs or hash links;
//! trust rests entirely on the majority count.

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{ConsensusError, Result};
use crate::net::{Gossip, PeerRpc, Route};
use crate::node::Keychain;
use crate::wire;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Own address is the bootstrap address; the node keeps its genesis chain.
    Origin,
    /// Chain imported from `source`.
    Joined { source: String, length: usize },
}

pub struct BootstrapResolver<'a, G, P> {
    node: &'a Keychain<G>,
    rpc: &'a P,
}

impl<'a, G: Gossip, P: PeerRpc> BootstrapResolver<'a, G, P> {
    pub fn new(node: &'a Keychain<G>, rpc: &'a P) -> Self {
        Self { node, rpc }
    }

    pub async fn bootstrap(&self, bootstrap_address: &str) -> Result<BootstrapOutcome> {
        let own_address = self.node.gossip().own_address().to_string();
        if bootstrap_address == own_address {
            info!("{own_address} is the bootstrap node, starting from genesis");
            return Ok(BootstrapOutcome::Origin);
        }

        info!("bootstrapping from {bootstrap_address}");
        let reply = self
            .rpc
            .send_to_one(bootstrap_address, Route::Peers, None)
            .await?;
        for peer in parse_peers(bootstrap_address, &reply)? {
            self.node.add_peer(&peer);
        }
        self.node.add_peer(bootstrap_address);

        let mut reports = Vec::new();
        for peer in self.node.peers() {
            let body = json!({ "address": own_address });
            let reply = self.rpc.send_to_one(&peer, Route::AddNode, Some(body)).await?;
            let hash = reply
                .as_str()
                .ok_or_else(|| {
                    ConsensusError::MalformedWireBlock(format!("addNode reply from {peer} is not a hash"))
                })?
                .to_string();
            debug!("peer {peer} reports last master hash {hash}");
            reports.push((peer, hash));
        }

        let source = select_majority(&reports)
            .unwrap_or(bootstrap_address)
            .to_string();
        let reply = self.rpc.send_to_one(&source, Route::Blockchain, None).await?;
        let blocks = wire::decode_chain(reply)?;
        let length = blocks.len();
        self.node.replace_master(blocks)?;

        info!("bootstrap complete, chain is {length} block(s) long (from {source})");
        Ok(BootstrapOutcome::Joined { source, length })
    }
}

fn parse_peers(address: &str, reply: &Value) -> Result<Vec<String>> {
    let peers = reply
        .get("peers")
        .and_then(Value::as_array)
        .ok_or_else(|| ConsensusError::unavailable(address, "peer list missing"))?;
    Ok(peers
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

/// Address of the first peer reporting the hash most peers agree on. Ties go
/// to the hash reported first.
pub fn select_majority(reports: &[(String, String)]) -> Option<&str> {
    let mut tally: Vec<(&str, usize)> = Vec::new();
    for (_, hash) in reports {
        match tally.iter_mut().find(|(h, _)| *h == hash.as_str()) {
            Some((_, count)) => *count += 1,
            None => tally.push((hash.as_str(), 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (hash, count) in tally {
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((hash, count));
        }
    }

    let (best_hash, _) = best?;
    reports
        .iter()
        .find(|(_, hash)| hash == best_hash)
        .map(|(address, _)| address.as_str())
}
