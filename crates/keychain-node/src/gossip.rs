//! Best-effort gossip over HTTP. Every send is a detached task on the node's
//! runtime, so callers on the miner thread never wait on peers.

use std::sync::Arc;

use keychain_core::net::{Gossip, GossipMessage, PeerSet, SeenFilter, Topic};
use reqwest::Client;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::constants::BROADCAST_ROUTE;

#[derive(Debug)]
pub struct HttpGossip {
    peers: PeerSet,
    seen: SeenFilter,
    client: Client,
    runtime: Handle,
}

impl HttpGossip {
    pub fn new(own_address: impl Into<String>, client: Client, runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            peers: PeerSet::new(own_address),
            seen: SeenFilter::default(),
            client,
            runtime,
        })
    }

    /// A new message from this node, already marked seen so echoes drop.
    fn originate(&self, topic: Topic, payload: String) -> GossipMessage {
        let message = GossipMessage::new(topic, payload, self.own_address());
        self.seen.first_sighting(&message);
        message
    }

    fn post_to(&self, targets: Vec<String>, message: GossipMessage) {
        for peer in targets {
            let client = self.client.clone();
            let message = message.clone();
            self.runtime.spawn(async move {
                let url = format!("http://{peer}/{BROADCAST_ROUTE}");
                let sent = client
                    .post(url)
                    .json(&message)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status());
                match sent {
                    Ok(_) => debug!("{} gossip delivered to {peer}", message.topic),
                    Err(err) => warn!("{} gossip to {peer} failed: {err}", message.topic),
                }
            });
        }
    }
}

impl Gossip for HttpGossip {
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
        let message = self.originate(topic, payload);
        self.post_to(self.peers(), message);
    }

    fn deliver(&self, message: GossipMessage) -> (bool, GossipMessage) {
        if !self.seen.first_sighting(&message) {
            return (false, message);
        }
        let targets = self
            .peers()
            .into_iter()
            .filter(|p| *p != message.sender)
            .collect();
        self.post_to(targets, message.relayed(self.own_address()));
        (true, message)
    }
}
