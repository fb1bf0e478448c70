#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use keychain_core::error::{ConsensusError, Result};
use keychain_core::net::{Gossip, GossipMessage, PeerRpc, PeerSet, Route, SeenFilter, Topic};
use keychain_core::{pow, Block, ChainStore, EngineConfig, Keychain, Transaction};
use rand::Rng;
use serde_json::Value;

pub const DIFFICULTY: usize = 2;

/// Gossip that keeps every broadcast in memory.
#[derive(Debug)]
pub struct LoopbackGossip {
    peers: PeerSet,
    seen: SeenFilter,
    sent: Mutex<Vec<GossipMessage>>,
}

impl LoopbackGossip {
    pub fn new(own_address: &str) -> Arc<Self> {
        Arc::new(Self {
            peers: PeerSet::new(own_address),
            seen: SeenFilter::default(),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Messages broadcast on `topic` since the last drain.
    pub fn drain(&self, topic: Topic) -> Vec<GossipMessage> {
        let mut sent = self.sent.lock().unwrap();
        let (matching, rest): (Vec<_>, Vec<_>) = sent.drain(..).partition(|m| m.topic == topic);
        *sent = rest;
        matching
    }
}

impl Gossip for LoopbackGossip {
    fn own_address(&self) -> &str {
        self.peers.own_address()
    }

    fn add_peer(&self, address: &str) -> bool {
        self.peers.add(address)
    }

    fn peers(&self) -> Vec<String> {
        self.peers.list()
    }

    fn broadcast(&self, topic: Topic, payload: String) {
        let message = GossipMessage::new(topic, payload, self.own_address());
        self.seen.first_sighting(&message);
        self.sent.lock().unwrap().push(message);
    }

    fn deliver(&self, message: GossipMessage) -> (bool, GossipMessage) {
        (self.seen.first_sighting(&message), message)
    }
}

/// Peer RPC answering from a fixed script and recording every call.
#[derive(Debug, Default)]
pub struct ScriptedRpc {
    replies: HashMap<(String, Route), Value>,
    pub calls: Mutex<Vec<(String, Route, Option<Value>)>>,
}

impl ScriptedRpc {
    pub fn reply(mut self, address: &str, route: Route, value: Value) -> Self {
        self.replies.insert((address.to_string(), route), value);
        self
    }

    pub fn called(&self, route: Route) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r, _)| *r == route)
            .map(|(a, _, _)| a.clone())
            .collect()
    }
}

impl PeerRpc for ScriptedRpc {
    fn send_to_one(
        &self,
        address: &str,
        route: Route,
        body: Option<Value>,
    ) -> impl Future<Output = Result<Value>> + Send {
        self.calls
            .lock()
            .unwrap()
            .push((address.to_string(), route, body));
        let result = self
            .replies
            .get(&(address.to_string(), route))
            .cloned()
            .ok_or_else(|| ConsensusError::unavailable(address, "connection refused"));
        async move { result }
    }
}

pub fn node_with(
    genesis: &Block,
    own_address: &str,
    config: EngineConfig,
) -> (Keychain<LoopbackGossip>, Arc<LoopbackGossip>) {
    let gossip = LoopbackGossip::new(own_address);
    let store = ChainStore::with_genesis(genesis.clone(), config.difficulty);
    (Keychain::with_store(store, gossip.clone(), config), gossip)
}

pub fn miner_config() -> EngineConfig {
    EngineConfig::miner()
        .with_difficulty(DIFFICULTY)
        .with_poll_interval(Duration::from_millis(5))
}

pub fn mined_on(parent: &Block, transactions: Vec<Transaction>) -> Block {
    let block = Block::new(
        parent.index + 1,
        transactions,
        parent.timestamp + 1.0,
        parent.compute_hash(),
    );
    pow::mine_block(block, DIFFICULTY)
}

pub fn random_transactions(n: usize, origin: &str) -> Vec<Transaction> {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|i| {
            let value: u32 = rng.gen();
            Transaction::new(format!("key-{i}"), value.to_string(), origin)
        })
        .collect()
}

/// Poll `check` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}
