use std::future::Future;
use std::time::Duration;

use keychain_core::error::{ConsensusError, Result};
use keychain_core::net::{PeerRpc, Route};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::constants::CONNECT_TIMEOUT_SECS;

/// Point-to-point peer requests over HTTP GET. A JSON object body is sent as
/// query parameters.
#[derive(Debug, Clone)]
pub struct HttpPeerRpc {
    client: Client,
}

impl HttpPeerRpc {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: peer_client(timeout)?,
        })
    }
}

/// Client for every request a node makes to its peers, gossip included.
/// Connecting is capped separately so a dead peer fails fast even under a
/// long overall timeout.
pub fn peer_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(CONNECT_TIMEOUT_SECS)))
        .build()
}

fn query_pairs(body: Option<&Value>) -> Vec<(String, String)> {
    let Some(fields) = body.and_then(Value::as_object) else {
        return Vec::new();
    };
    fields
        .iter()
        .map(|(k, v)| {
            let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
            (k.clone(), v)
        })
        .collect()
}

impl PeerRpc for HttpPeerRpc {
    fn send_to_one(
        &self,
        address: &str,
        route: Route,
        body: Option<Value>,
    ) -> impl Future<Output = Result<Value>> + Send {
        let address = address.to_string();
        let url = format!("http://{address}/{}", route.path());
        let request = self.client.get(url).query(&query_pairs(body.as_ref()));

        async move {
            debug!("requesting /{} from {address}", route.path());
            let response = request
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| ConsensusError::unavailable(&address, e))?;
            response
                .json::<Value>()
                .await
                .map_err(|e| ConsensusError::unavailable(&address, e))
        }
    }
}
