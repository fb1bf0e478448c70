mod api;
mod constants;
mod gossip;
mod rpc;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use keychain_core::bootstrap::{BootstrapOutcome, BootstrapResolver};
use keychain_core::constants::{MINER_POLL_INTERVAL_MS, PEER_RPC_TIMEOUT_SECS};
use keychain_core::{EngineConfig, Keychain};
use tokio::runtime::Handle;
use tracing::{info, warn, Level};

use crate::api::AppState;
use crate::constants::DEFAULT_LISTEN;
use crate::gossip::HttpGossip;
use crate::rpc::{peer_client, HttpPeerRpc};

#[derive(Parser, Debug)]
#[command(name = "keychain-node")]
#[command(about = "KeyChain node: replicated key-value log over proof-of-work")]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:5000
    #[arg(long, default_value = DEFAULT_LISTEN)]
    listen: SocketAddr,

    /// Address announced to peers (defaults to --listen)
    #[arg(long)]
    advertise: Option<String>,

    /// Node to join through (defaults to our own address, starting a new network)
    #[arg(long)]
    bootstrap: Option<String>,

    /// Run the background miner
    #[arg(long)]
    miner: bool,

    /// Miner idle wait between pool checks
    #[arg(long, default_value_t = MINER_POLL_INTERVAL_MS)]
    poll_interval_ms: u64,

    /// Timeout for every peer request
    #[arg(long, default_value_t = PEER_RPC_TIMEOUT_SECS)]
    rpc_timeout_secs: u64,
}

impl Args {
    fn own_address(&self) -> String {
        self.advertise
            .clone()
            .unwrap_or_else(|| self.listen.to_string())
    }

    fn bootstrap_address(&self) -> String {
        self.bootstrap.clone().unwrap_or_else(|| self.own_address())
    }

    fn engine_config(&self) -> EngineConfig {
        let config = if self.miner {
            EngineConfig::miner()
        } else {
            EngineConfig::default()
        };
        config.with_poll_interval(Duration::from_millis(self.poll_interval_ms))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let own_address = args.own_address();
    let timeout = Duration::from_secs(args.rpc_timeout_secs);

    let gossip = HttpGossip::new(own_address.clone(), peer_client(timeout)?, Handle::current());
    let node = Keychain::new(gossip, args.engine_config());
    let rpc = HttpPeerRpc::new(timeout)?;

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!(
        "keychain-node listening on http://{} as {own_address}",
        listener.local_addr()?
    );
    let app = api::router(AppState { node: node.clone() });
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    let bootstrap = args.bootstrap_address();
    let outcome = BootstrapResolver::new(&node, &rpc)
        .bootstrap(&bootstrap)
        .await
        .with_context(|| format!("bootstrap through {bootstrap} failed"))?;
    if let BootstrapOutcome::Joined { source, length } = outcome {
        info!("joined the network with {length} block(s) from {source}");
    }

    let miner = node.spawn_miner()?;
    server.await??;

    node.shutdown();
    if let Some(handle) = miner {
        tokio::task::spawn_blocking(move || handle.join())
            .await?
            .map_err(|_| anyhow::anyhow!("miner thread panicked"))?;
    }
    info!("keychain-node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
