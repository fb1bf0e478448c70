use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use keychain_core::net::{Gossip, GossipMessage, Topic};
use keychain_core::wire::{self, WireChain};
use keychain_core::{ChainStatus, ConsensusError, Keychain, Transaction};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::gossip::HttpGossip;

#[derive(Clone)]
pub struct AppState {
    pub node: Keychain<HttpGossip>,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

/// Acknowledgement returned by gossip and write routes.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Delivered {
    pub deliver: bool,
}

const DELIVERED: Delivered = Delivered { deliver: true };

#[derive(Serialize)]
struct Peers {
    peers: Vec<String>,
}

#[derive(Deserialize)]
pub struct AddressQuery {
    pub address: String,
}

#[derive(Deserialize)]
pub struct KeyQuery {
    pub key: String,
}

#[derive(Deserialize)]
pub struct PutRequest {
    pub key: String,
    pub value: String,
    /// Defaults to the receiving node's own address.
    pub origin: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValueReply {
    pub value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValuesReply {
    pub values: Vec<String>,
}

/// Errors surfaced over HTTP.
#[derive(Debug)]
pub enum ApiError {
    Consensus(ConsensusError),
    /// Blocking work on the chain state did not finish.
    Internal(String),
}

impl From<ConsensusError> for ApiError {
    fn from(err: ConsensusError) -> Self {
        Self::Consensus(err)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Consensus(err) => {
                let status = match err {
                    ConsensusError::MalformedWireBlock(_) => StatusCode::BAD_REQUEST,
                    ConsensusError::InvalidProof { .. } | ConsensusError::OrphanBlock { .. } => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    ConsensusError::NetworkUnavailable { .. } => StatusCode::BAD_GATEWAY,
                };
                (status, err.to_string())
            }
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(Health { status: "ok" }) }))
        .route("/heartbeat", get(|| async { Json(DELIVERED) }))
        .route("/blockchain", get(blockchain))
        .route("/addNode", get(add_node))
        .route("/peers", get(peers))
        .route("/broadcast", post(broadcast))
        .route("/put", post(put))
        .route("/retrieve", get(retrieve))
        .route("/retrieve_all", get(retrieve_all))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn blockchain(State(state): State<AppState>) -> Json<WireChain> {
    Json(wire::encode_chain(&state.node.master_chain()))
}

async fn add_node(
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Json<String> {
    if state.node.add_peer(&query.address) {
        info!("peer {} joined", query.address);
    }
    Json(state.node.last_master_hash())
}

async fn peers(State(state): State<AppState>) -> Json<Peers> {
    Json(Peers {
        peers: state.node.peers(),
    })
}

/// Inbound gossip. Payloads are decoded before the dedup filter so nothing
/// malformed is marked seen or relayed. Confirming a block can wait on the
/// chain lock while the miner prepares a candidate, so it runs off the async
/// workers.
async fn broadcast(
    State(state): State<AppState>,
    Json(message): Json<GossipMessage>,
) -> Result<Json<Delivered>, ApiError> {
    let gossip = state.node.gossip();
    match message.topic {
        Topic::Transaction => {
            let tr = wire::decode_transaction(&message.message)?;
            if gossip.deliver(message).0 {
                state.node.submit_transaction(tr, false);
            }
        }
        Topic::Block => {
            let block = wire::decode_block(&message.message)?;
            if gossip.deliver(message).0 {
                let node = state.node.clone();
                if !tokio::task::spawn_blocking(move || node.confirm(block)).await? {
                    debug!("gossiped block not added");
                }
            } else {
                debug!("duplicate block gossip dropped");
            }
        }
    }
    Ok(Json(DELIVERED))
}

async fn put(State(state): State<AppState>, Json(req): Json<PutRequest>) -> Json<Delivered> {
    let origin = req
        .origin
        .unwrap_or_else(|| state.node.gossip().own_address().to_string());
    state
        .node
        .submit_transaction(Transaction::new(req.key, req.value, origin), true);
    Json(DELIVERED)
}

async fn retrieve(State(state): State<AppState>, Query(query): Query<KeyQuery>) -> Json<ValueReply> {
    Json(ValueReply {
        value: state.node.retrieve(&query.key),
    })
}

async fn retrieve_all(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Json<ValuesReply> {
    Json(ValuesReply {
        values: state.node.retrieve_all(&query.key),
    })
}

async fn status(State(state): State<AppState>) -> Json<ChainStatus> {
    Json(state.node.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keychain_core::{pow, Block, EngineConfig};
    use reqwest::Client;
    use tokio::runtime::Handle;

    const DIFFICULTY: usize = 2;

    fn state() -> AppState {
        let gossip = HttpGossip::new("127.0.0.1:5000", Client::new(), Handle::current());
        AppState {
            node: Keychain::new(gossip, EngineConfig::default().with_difficulty(DIFFICULTY)),
        }
    }

    fn block_message(block: &Block) -> GossipMessage {
        GossipMessage::new(Topic::Block, wire::encode_block(block), "127.0.0.1:5001")
    }

    #[tokio::test]
    async fn put_defaults_origin_to_own_address() {
        let state = state();
        let req = PutRequest {
            key: "color".into(),
            value: "blue".into(),
            origin: None,
        };
        let Json(ack) = put(State(state.clone()), Json(req)).await;
        assert_eq!(ack, DELIVERED);
        assert_eq!(
            state.node.pending(),
            vec![Transaction::new("color", "blue", "127.0.0.1:5000")]
        );
    }

    #[tokio::test]
    async fn add_node_registers_peer_and_returns_master_hash() {
        let state = state();
        let query = AddressQuery {
            address: "127.0.0.1:5001".into(),
        };
        let Json(hash) = add_node(State(state.clone()), Query(query)).await;
        assert_eq!(hash, state.node.last_master_hash());
        assert_eq!(state.node.peers(), vec!["127.0.0.1:5001"]);
    }

    #[tokio::test]
    async fn gossiped_blocks_build_the_master_chain() {
        let state = state();
        let genesis = state.node.master_chain().remove(0);
        let b1 = pow::mine_block(
            Block::new(1, vec![Transaction::new("k", "1", "p")], 1.0, genesis.compute_hash()),
            DIFFICULTY,
        );
        let b2 = pow::mine_block(
            Block::new(2, vec![Transaction::new("k", "2", "p")], 2.0, b1.compute_hash()),
            DIFFICULTY,
        );
        let first = block_message(&b1);
        let relayed = first.relayed("127.0.0.1:5002");
        for message in [first, block_message(&b2), relayed] {
            broadcast(State(state.clone()), Json(message)).await.unwrap();
        }

        let Json(chain) = blockchain(State(state.clone())).await;
        assert_eq!(chain.length, 2);
        let Json(reply) = retrieve(
            State(state.clone()),
            Query(KeyQuery { key: "k".into() }),
        )
        .await;
        assert_eq!(reply.value.as_deref(), Some("1"));
        let Json(status) = status(State(state)).await;
        assert_eq!(status.last_hash, b2.compute_hash());
        assert!(status.valid);
    }

    #[tokio::test]
    async fn every_gossiped_put_is_pending_even_when_repeated() {
        let state = state();
        let puts = [
            Transaction::new("k", "1", "127.0.0.1:5001"),
            Transaction::new("k", "2", "127.0.0.1:5001"),
            Transaction::new("k", "1", "127.0.0.1:5001"),
        ];
        for tr in &puts {
            let message = GossipMessage::new(
                Topic::Transaction,
                wire::encode_transaction(tr),
                "127.0.0.1:5001",
            );
            broadcast(State(state.clone()), Json(message)).await.unwrap();
        }
        assert_eq!(state.node.pending(), puts.to_vec());
    }

    #[tokio::test]
    async fn malformed_gossip_is_a_bad_request() {
        let state = state();
        let message = GossipMessage::new(Topic::Block, "{\"version\":1}", "127.0.0.1:5001");
        let err = broadcast(State(state.clone()), Json(message.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        // not marked seen, a well-formed copy would still be processed
        assert!(state.node.gossip().deliver(message).0);
    }

    #[test]
    fn consensus_errors_map_to_statuses() {
        let orphan = ApiError::from(ConsensusError::OrphanBlock {
            hash: "ab".into(),
            previous_hash: "cd".into(),
        });
        assert_eq!(orphan.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
        let down = ApiError::from(ConsensusError::unavailable("p:1", "refused"));
        assert_eq!(down.into_response().status(), StatusCode::BAD_GATEWAY);
        let stuck = ApiError::Internal("task cancelled".into());
        assert_eq!(stuck.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
