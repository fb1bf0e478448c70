use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::net::{Gossip, Topic};
use crate::node::{InFlight, Keychain};
use crate::pow::{self, SearchOutcome};
use crate::{unix_timestamp, wire, Block, BlockHash};

/// Cross-thread signal polled by the nonce search before every increment.
///
/// `raise` asks the miner to pause and check whether its candidate was
/// superseded; `stop` ends the miner loop for good.
#[derive(Debug, Default)]
pub struct MiningSignal {
    preempt: AtomicBool,
    stop: AtomicBool,
}

impl MiningSignal {
    pub fn raise(&self) {
        self.preempt.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.preempt.store(false, Ordering::Release);
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn is_raised(&self) -> bool {
        self.preempt.load(Ordering::Acquire) || self.is_stopped()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MineOutcome {
    /// Nothing pending.
    Idle,
    /// Block found, added locally and broadcast.
    Mined(BlockHash),
    /// A confirmed peer block superseded the candidate.
    Preempted,
    /// The chain store refused the mined block; its transactions were requeued.
    Rejected,
    /// Shutdown was requested mid-search; the candidate was requeued.
    Stopped,
}

impl<G: Gossip> Keychain<G> {
    /// Drain the pool into a new candidate on top of the current last hash.
    pub(crate) fn prepare_candidate(&self) -> Option<Block> {
        let mut state = self.lock();
        if state.pool.is_empty() {
            return None;
        }
        let queued = state.pool.len();
        let transactions = state.pool.snapshot_and_clear(queued);
        let previous_hash = state.store.last_hash().to_owned();
        let index = state.store.next_index(&previous_hash);
        state.in_flight = Some(InFlight {
            transactions: transactions.clone(),
            superseded: false,
        });
        self.signal().reset();
        debug!("mining block {index} with {queued} transaction(s) on {previous_hash}");
        Some(Block::new(index, transactions, unix_timestamp(), previous_hash))
    }

    /// One miner cycle: build a candidate, search for proof, submit.
    pub fn mine_once(&self) -> MineOutcome {
        match self.prepare_candidate() {
            Some(candidate) => self.mine_candidate(candidate),
            None => MineOutcome::Idle,
        }
    }

    pub(crate) fn mine_candidate(&self, mut candidate: Block) -> MineOutcome {
        let difficulty = self.lock().store.difficulty();
        candidate.nonce = 0;
        loop {
            match pow::search(&mut candidate, difficulty, self.signal()) {
                SearchOutcome::Found => break,
                SearchOutcome::Interrupted => {
                    // blocks until a pending confirmation has decided
                    let mut state = self.lock();
                    if self.signal().is_stopped() {
                        let salvaged = state.supersede_in_flight();
                        state.pool.requeue(salvaged);
                        state.in_flight = None;
                        return MineOutcome::Stopped;
                    }
                    if state.in_flight.as_ref().is_none_or(|f| f.superseded) {
                        state.in_flight = None;
                        info!("mining of block {} preempted", candidate.index);
                        return MineOutcome::Preempted;
                    }
                    drop(state);
                    thread::yield_now();
                }
            }
        }
        self.submit_mined(candidate)
    }

    fn submit_mined(&self, candidate: Block) -> MineOutcome {
        let hash = candidate.compute_hash();
        {
            let mut state = self.lock();
            match state.in_flight.take() {
                Some(in_flight) if !in_flight.superseded => {}
                _ => {
                    info!("dropping mined block {hash}, superseded by a confirmed block");
                    return MineOutcome::Preempted;
                }
            }
            if let Err(err) = state.store.try_add_block(candidate.clone()) {
                let requeued = state.pool.requeue(candidate.transactions.clone());
                warn!("mined block {hash} rejected ({err}), {requeued} transaction(s) requeued");
                return MineOutcome::Rejected;
            }
            state.store.set_last_hash(hash.clone());
        }
        self.gossip().broadcast(Topic::Block, wire::encode_block(&candidate));
        info!("mined block {} hash {hash}", candidate.index);
        MineOutcome::Mined(hash)
    }

    /// Perpetual miner loop. Returns only after [`Keychain::shutdown`].
    pub fn run_miner(&self) {
        info!("miner started");
        while !self.signal().is_stopped() {
            match self.mine_once() {
                MineOutcome::Idle => thread::sleep(self.config().poll_interval),
                MineOutcome::Stopped => break,
                _ => {}
            }
        }
        info!("miner stopped");
    }

    /// Start the miner on its own thread. Non-mining nodes get `None`.
    pub fn spawn_miner(&self) -> std::io::Result<Option<JoinHandle<()>>> {
        if !self.config().miner {
            return Ok(None);
        }
        let node = self.clone();
        thread::Builder::new()
            .name("miner".into())
            .spawn(move || node.run_miner())
            .map(Some)
    }

    pub fn shutdown(&self) {
        self.signal().stop();
    }
}
