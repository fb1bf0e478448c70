use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "keychain-cli")]
#[command(about = "CLI client for a KeyChain node")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args, Debug)]
struct Node {
    /// Node base URL (e.g. http://127.0.0.1:5000)
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    node: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a value under a key
    Put {
        #[command(flatten)]
        node: Node,
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
        /// Writer identity (defaults to the node's address)
        #[arg(long)]
        origin: Option<String>,
    },
    /// Latest committed value of a key
    Retrieve {
        #[command(flatten)]
        node: Node,
        #[arg(long)]
        key: String,
    },
    /// Every committed value of a key, newest first
    RetrieveAll {
        #[command(flatten)]
        node: Node,
        #[arg(long)]
        key: String,
    },
    /// Master chain export
    Chain {
        #[command(flatten)]
        node: Node,
    },
    /// Known peers
    Peers {
        #[command(flatten)]
        node: Node,
    },
    /// Chain length, tip hashes, pending count and validity
    Status {
        #[command(flatten)]
        node: Node,
    },
}

#[derive(Serialize)]
struct Put {
    key: String,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
}

/// Outgoing request for a subcommand.
#[derive(Debug, PartialEq)]
enum Request {
    Get { url: String, query: Vec<(&'static str, String)> },
    Post { url: String, body: serde_json::Value },
}

impl Command {
    fn request(self) -> Result<Request> {
        let get = |node: Node, path: &str, query| Request::Get {
            url: format!("{}/{path}", node.node.trim_end_matches('/')),
            query,
        };
        Ok(match self {
            Command::Put {
                node,
                key,
                value,
                origin,
            } => Request::Post {
                url: format!("{}/put", node.node.trim_end_matches('/')),
                body: serde_json::to_value(Put { key, value, origin })?,
            },
            Command::Retrieve { node, key } => get(node, "retrieve", vec![("key", key)]),
            Command::RetrieveAll { node, key } => get(node, "retrieve_all", vec![("key", key)]),
            Command::Chain { node } => get(node, "blockchain", vec![]),
            Command::Peers { node } => get(node, "peers", vec![]),
            Command::Status { node } => get(node, "status", vec![]),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let res = match cli.cmd.request()? {
        Request::Get { url, query } => {
            debug!("GET {url}");
            client.get(url).query(&query).send().await?
        }
        Request::Post { url, body } => {
            debug!("POST {url}");
            client.post(url).json(&body).send().await?
        }
    };
    let status = res.status();
    let body = res.text().await?;
    println!("status: {}", status);
    println!("{body}");
    Ok(())
}
