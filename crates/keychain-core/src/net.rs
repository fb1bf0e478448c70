//! Collaborator seams: best-effort gossip to every peer and point-to-point
//! peer RPC. The node crate implements both over HTTP.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::SEEN_CACHE_CAPACITY;
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Transaction,
    Block,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Transaction => "transaction",
            Topic::Block => "block",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipMessage {
    /// Assigned by the originating node and kept on every relay. Dedup keys
    /// on this, so two separate puts of the same transaction both travel.
    pub id: String,
    pub topic: Topic,
    pub message: String,
    pub sender: String,
}

impl GossipMessage {
    /// A fresh message originated by `sender`.
    pub fn new(topic: Topic, message: impl Into<String>, sender: impl Into<String>) -> Self {
        let sender = sender.into();
        Self {
            id: format!("{sender}/{:016x}", rand::random::<u64>()),
            topic,
            message: message.into(),
            sender,
        }
    }

    /// The same message forwarded by `sender`.
    pub fn relayed(&self, sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            ..self.clone()
        }
    }
}

pub trait Gossip: Send + Sync + 'static {
    /// Address peers use to reach this node.
    fn own_address(&self) -> &str;

    /// Register a peer. Returns false for duplicates and for our own address.
    fn add_peer(&self, address: &str) -> bool;

    fn peers(&self) -> Vec<String>;

    /// Fire-and-forget send to every known peer.
    fn broadcast(&self, topic: Topic, payload: String);

    /// Dedup filter for inbound gossip. Returns whether the message is new,
    /// along with the message to process.
    fn deliver(&self, message: GossipMessage) -> (bool, GossipMessage);
}

/// Ids of the most recent gossip messages. The oldest id is evicted once
/// `capacity` is reached.
#[derive(Debug)]
pub struct SeenFilter {
    capacity: usize,
    seen: Mutex<SeenIds>,
}

#[derive(Debug, Default)]
struct SeenIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl Default for SeenFilter {
    fn default() -> Self {
        Self::new(SEEN_CACHE_CAPACITY)
    }
}

impl SeenFilter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: Mutex::new(SeenIds::default()),
        }
    }

    /// True the first time a message id is observed.
    pub fn first_sighting(&self, message: &GossipMessage) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if !seen.ids.insert(message.id.clone()) {
            return false;
        }
        seen.order.push_back(message.id.clone());
        if seen.order.len() > self.capacity {
            if let Some(oldest) = seen.order.pop_front() {
                seen.ids.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Known peers in registration order, without duplicates or self.
#[derive(Debug)]
pub struct PeerSet {
    own_address: String,
    peers: RwLock<Vec<String>>,
}

impl PeerSet {
    pub fn new(own_address: impl Into<String>) -> Self {
        Self {
            own_address: own_address.into(),
            peers: RwLock::new(Vec::new()),
        }
    }

    pub fn own_address(&self) -> &str {
        &self.own_address
    }

    pub fn add(&self, address: &str) -> bool {
        if address.is_empty() || address == self.own_address {
            return false;
        }
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        if peers.iter().any(|p| p == address) {
            return false;
        }
        peers.push(address.to_string());
        true
    }

    pub fn list(&self) -> Vec<String> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    /// Peer list of the contacted node.
    Peers,
    /// Announce self; replies with the peer's last master hash.
    AddNode,
    /// Full serialized master chain.
    Blockchain,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Peers => "peers",
            Route::AddNode => "addNode",
            Route::Blockchain => "blockchain",
        }
    }
}

pub trait PeerRpc: Send + Sync {
    /// One request to one peer. Transport and status failures surface as
    /// `NetworkUnavailable`.
    fn send_to_one(
        &self,
        address: &str,
        route: Route,
        body: Option<Value>,
    ) -> impl Future<Output = Result<Value>> + Send;
}
