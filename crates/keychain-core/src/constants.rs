pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
/// Leading zero hex characters a block hash needs to count as proof of work.
pub const POW_DIFFICULTY: usize = 4;
pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const WIRE_VERSION: u32 = 1;
pub const MINER_POLL_INTERVAL_MS: u64 = 1000;
pub const PEER_RPC_TIMEOUT_SECS: u64 = 5;
/// Gossip message ids remembered for dedup.
pub const SEEN_CACHE_CAPACITY: usize = 10_000;
