//! Shared node handle: one lock over chain and pool, a mining signal, and the
//! confirmation path for blocks delivered by peers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::chain::ChainStore;
use crate::constants::{MINER_POLL_INTERVAL_MS, POW_DIFFICULTY};
use crate::error::Result;
use crate::mine::MiningSignal;
use crate::net::{Gossip, Topic};
use crate::pool::TransactionPool;
use crate::{wire, Block, BlockHash, Transaction};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Run the background miner and reconcile confirmations against it.
    pub miner: bool,
    pub difficulty: usize,
    /// Idle wait between pool checks when nothing is pending.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            miner: false,
            difficulty: POW_DIFFICULTY,
            poll_interval: Duration::from_millis(MINER_POLL_INTERVAL_MS),
        }
    }
}

impl EngineConfig {
    pub fn miner() -> Self {
        Self {
            miner: true,
            ..Self::default()
        }
    }

    pub fn with_difficulty(mut self, difficulty: usize) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// The candidate currently being searched, as seen by confirmations.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub(crate) transactions: Vec<Transaction>,
    /// Set once a competing block was accepted; the miner must drop its block.
    pub(crate) superseded: bool,
}

/// Everything guarded by the single writer lock.
#[derive(Debug)]
pub struct ChainState {
    pub store: ChainStore,
    pub pool: TransactionPool,
    pub(crate) in_flight: Option<InFlight>,
}

impl ChainState {
    fn new(store: ChainStore) -> Self {
        Self {
            store,
            pool: TransactionPool::new(),
            in_flight: None,
        }
    }

    /// Mark the in-flight candidate superseded and hand back its transactions.
    pub(crate) fn supersede_in_flight(&mut self) -> Vec<Transaction> {
        match self.in_flight.as_mut() {
            Some(in_flight) => {
                in_flight.superseded = true;
                std::mem::take(&mut in_flight.transactions)
            }
            None => Vec::new(),
        }
    }

    /// Drop from the pool and from the local candidate everything `foreign`
    /// committed, then requeue what the candidate still holds.
    fn reconcile(&mut self, foreign: &Block) -> usize {
        let mut local = self.supersede_in_flight();
        for tr in &foreign.transactions {
            self.pool.remove(tr);
            if let Some(pos) = local.iter().position(|t| t == tr) {
                local.remove(pos);
            }
        }
        self.pool.requeue(local)
    }
}

struct Shared {
    state: Mutex<ChainState>,
    signal: MiningSignal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainStatus {
    pub length: usize,
    pub last_master_hash: BlockHash,
    pub last_hash: BlockHash,
    pub pending: usize,
    pub branches: usize,
    pub valid: bool,
    pub miner: bool,
}

pub struct Keychain<G> {
    shared: Arc<Shared>,
    gossip: Arc<G>,
    config: EngineConfig,
}

impl<G> Clone for Keychain<G> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            gossip: self.gossip.clone(),
            config: self.config.clone(),
        }
    }
}

impl<G: Gossip> Keychain<G> {
    /// A node starting from a fresh genesis block.
    pub fn new(gossip: Arc<G>, config: EngineConfig) -> Self {
        let store = ChainStore::new(config.difficulty);
        Self::with_store(store, gossip, config)
    }

    pub fn with_store(store: ChainStore, gossip: Arc<G>, config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ChainState::new(store)),
                signal: MiningSignal::default(),
            }),
            gossip,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gossip(&self) -> &Arc<G> {
        &self.gossip
    }

    pub(crate) fn signal(&self) -> &MiningSignal {
        &self.shared.signal
    }

    /// Exclusive access to chain and pool. Never held across peer I/O.
    pub fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a put. Local puts are gossiped; puts that arrived by gossip are not.
    pub fn submit_transaction(&self, tr: Transaction, rebroadcast: bool) {
        self.lock().pool.add(tr.clone());
        debug!("transaction {}={} from {} queued", tr.key, tr.value, tr.origin);
        if rebroadcast {
            self.gossip
                .broadcast(Topic::Transaction, wire::encode_transaction(&tr));
        }
    }

    /// Reconcile a block delivered by a peer against local mining state.
    pub fn confirm(&self, foreign: Block) -> bool {
        let hash = foreign.compute_hash();
        if !self.config.miner {
            let mut state = self.lock();
            state.pool.clear();
            return state.store.add_block(foreign);
        }

        info!("confirming incoming block {hash}");
        self.signal().raise();
        let mut state = self.lock();
        if !state.store.add_block(foreign.clone()) {
            // an earlier accepted block may still owe the miner a preemption
            if state.in_flight.as_ref().is_none_or(|f| !f.superseded) {
                self.signal().reset();
            }
            return false;
        }
        let requeued = state.reconcile(&foreign);
        // raised again under the lock: a candidate prepared after the first
        // raise has reset it. The miner consumes it with the superseded
        // candidate.
        self.signal().raise();
        info!("block {hash} confirmed by peer, {requeued} transaction(s) requeued");
        true
    }

    /// Install a chain fetched from a peer. Any in-flight candidate is
    /// superseded and its transactions go back to the pool.
    pub fn replace_master(&self, blocks: Vec<Block>) -> Result<()> {
        let mut state = self.lock();
        state.store.replace_master(blocks)?;
        let salvaged = state.supersede_in_flight();
        state.pool.requeue(salvaged);
        self.signal().raise();
        Ok(())
    }

    pub fn add_peer(&self, address: &str) -> bool {
        self.gossip.add_peer(address)
    }

    pub fn peers(&self) -> Vec<String> {
        self.gossip.peers()
    }

    pub fn master_chain(&self) -> Vec<Block> {
        self.lock().store.master_blocks()
    }

    pub fn last_master_hash(&self) -> BlockHash {
        self.lock().store.last_master_hash()
    }

    pub fn last_hash(&self) -> BlockHash {
        self.lock().store.last_hash().to_owned()
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.lock().pool.to_vec()
    }

    pub fn is_valid(&self) -> bool {
        self.lock().store.is_valid()
    }

    pub fn retrieve(&self, key: &str) -> Option<String> {
        self.lock().store.retrieve(key)
    }

    pub fn retrieve_all(&self, key: &str) -> Vec<String> {
        self.lock().store.retrieve_all(key)
    }

    pub fn status(&self) -> ChainStatus {
        let state = self.lock();
        ChainStatus {
            length: state.store.master_len(),
            last_master_hash: state.store.last_master_hash(),
            last_hash: state.store.last_hash().to_owned(),
            pending: state.pool.len(),
            branches: state.store.branch_count(),
            valid: state.store.is_valid(),
            miner: self.config.miner,
        }
    }
}
