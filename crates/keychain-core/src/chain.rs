//! Master chain plus candidate branches.
//!
//! Blocks live once in an arena keyed by hash. The master chain and every
//! branch are lists of hashes into that arena, so forking a branch copies hash
//! lists and never block content.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::constants::GENESIS_PREVIOUS_HASH;
use crate::error::{ConsensusError, Result};
use crate::{pow, Block, BlockHash};

/// Where an accepted block ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Direct successor of the master tip, started its own single-block
    /// branch. The longest-chain rule is not evaluated on this path.
    NewBranch,
    /// Appended to the branch whose tail is its parent.
    Extended { promoted: usize },
    /// Parent sits inside a branch; the branch prefix was copied into a new
    /// branch ending with this block.
    Forked { promoted: usize },
}

impl Placement {
    /// Number of blocks moved into the master chain by this insertion.
    pub fn promoted(&self) -> usize {
        match self {
            Placement::NewBranch => 0,
            Placement::Extended { promoted } | Placement::Forked { promoted } => *promoted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChainStore {
    difficulty: usize,
    arena: HashMap<BlockHash, Block>,
    master: Vec<BlockHash>,
    branches: Vec<Vec<BlockHash>>,
    last_hash: BlockHash,
}

impl ChainStore {
    /// A fresh chain holding only a new genesis block.
    pub fn new(difficulty: usize) -> Self {
        Self::with_genesis(Block::genesis(), difficulty)
    }

    pub fn with_genesis(genesis: Block, difficulty: usize) -> Self {
        let hash = genesis.compute_hash();
        let mut arena = HashMap::new();
        arena.insert(hash.clone(), genesis);
        Self {
            difficulty,
            arena,
            master: vec![hash.clone()],
            branches: Vec::new(),
            last_hash: hash,
        }
    }

    /// Swap the master chain for `blocks` wholesale, dropping every branch.
    /// The blocks are taken as given, with no proof or linkage check.
    pub fn replace_master(&mut self, blocks: Vec<Block>) -> Result<()> {
        if blocks.is_empty() {
            return Err(ConsensusError::MalformedWireBlock(
                "cannot replace master with an empty chain".into(),
            ));
        }
        let mut arena = HashMap::with_capacity(blocks.len());
        let mut master = Vec::with_capacity(blocks.len());
        for block in blocks {
            let hash = block.compute_hash();
            master.push(hash.clone());
            arena.insert(hash, block);
        }
        self.last_hash = master.last().cloned().unwrap_or_default();
        self.arena = arena;
        self.master = master;
        self.branches.clear();
        Ok(())
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Hash the miner builds its next candidate on.
    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    pub fn set_last_hash(&mut self, hash: BlockHash) {
        self.last_hash = hash;
    }

    pub fn last_master_hash(&self) -> BlockHash {
        self.tip().compute_hash()
    }

    pub fn tip(&self) -> &Block {
        let tip = self.master.last().expect("master chain always holds genesis");
        &self.arena[tip]
    }

    pub fn master_len(&self) -> usize {
        self.master.len()
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    pub fn get(&self, hash: &str) -> Option<&Block> {
        self.arena.get(hash)
    }

    pub fn master_chain(&self) -> impl DoubleEndedIterator<Item = &Block> + '_ {
        self.master.iter().map(|h| &self.arena[h])
    }

    pub fn master_blocks(&self) -> Vec<Block> {
        self.master_chain().cloned().collect()
    }

    pub fn branches(&self) -> Vec<Vec<&Block>> {
        self.branches
            .iter()
            .map(|b| b.iter().map(|h| &self.arena[h]).collect())
            .collect()
    }

    /// Index for a block built on `parent`.
    pub fn next_index(&self, parent: &str) -> u64 {
        self.arena
            .get(parent)
            .map(|b| b.index + 1)
            .unwrap_or(self.master.len() as u64)
    }

    pub fn add_block(&mut self, candidate: Block) -> bool {
        match self.try_add_block(candidate) {
            Ok(_) => true,
            Err(err) => {
                warn!("block rejected: {err}");
                false
            }
        }
    }

    /// Place `candidate` on the master tip, a branch tail or inside a branch,
    /// then apply the longest-chain rule unless it started a new branch.
    pub fn try_add_block(&mut self, candidate: Block) -> Result<Placement> {
        let hash = candidate.compute_hash();
        if !pow::meets_difficulty(&hash, self.difficulty) {
            return Err(ConsensusError::InvalidProof {
                hash,
                difficulty: self.difficulty,
            });
        }

        let parent = candidate.previous_hash.clone();
        let index = candidate.index;

        if self.master.last() == Some(&parent) {
            self.arena.insert(hash.clone(), candidate);
            self.branches.push(vec![hash.clone()]);
            debug!("block {index} hash {hash} started a new branch");
            return Ok(Placement::NewBranch);
        }

        let forked = if let Some(i) = self
            .branches
            .iter()
            .position(|b| b.last() == Some(&parent))
        {
            self.branches[i].push(hash.clone());
            debug!("block {index} hash {hash} extended branch {i}");
            false
        } else if let Some((i, k)) = self.find_in_branches(&parent) {
            let mut branch = self.branches[i][..=k].to_vec();
            branch.push(hash.clone());
            self.branches.push(branch);
            debug!("block {index} hash {hash} forked branch {i} at {k}");
            true
        } else {
            return Err(ConsensusError::OrphanBlock {
                hash,
                previous_hash: parent,
            });
        };

        self.arena.insert(hash, candidate);
        let promoted = self.apply_longest_chain_rule();
        Ok(if forked {
            Placement::Forked { promoted }
        } else {
            Placement::Extended { promoted }
        })
    }

    fn find_in_branches(&self, hash: &str) -> Option<(usize, usize)> {
        self.branches.iter().enumerate().find_map(|(i, branch)| {
            branch.iter().position(|h| h == hash).map(|k| (i, k))
        })
    }

    /// Promote all but the tip of the longest branch (last one on ties) once
    /// it holds two or more blocks. Every other branch is discarded.
    fn apply_longest_chain_rule(&mut self) -> usize {
        let Some(longest) = self.branches.iter().max_by_key(|b| b.len()) else {
            return 0;
        };
        if longest.len() < 2 {
            return 0;
        }

        let mut longest = longest.clone();
        let Some(tip) = longest.pop() else {
            return 0;
        };
        let promoted = longest.len();
        for hash in &longest {
            info!("block {} hash {hash} added to master", self.arena[hash].index);
        }
        self.master.extend(longest);
        self.last_hash = tip.clone();
        self.branches = vec![vec![tip]];
        self.prune_arena();
        promoted
    }

    fn prune_arena(&mut self) {
        let live: HashSet<&BlockHash> = self
            .master
            .iter()
            .chain(self.branches.iter().flatten())
            .collect();
        let dead: Vec<BlockHash> = self
            .arena
            .keys()
            .filter(|h| !live.contains(h))
            .cloned()
            .collect();
        for hash in dead {
            self.arena.remove(&hash);
        }
    }

    /// Walk back from the master tail checking hash links and proofs. Genesis
    /// proof is not checked.
    pub fn is_valid(&self) -> bool {
        let chain: Vec<&Block> = self.master_chain().collect();
        let mut it = chain.len() - 1;
        while chain[it].previous_hash != GENESIS_PREVIOUS_HASH {
            if it == 0 {
                return false;
            }
            let current = chain[it];
            if current.previous_hash != chain[it - 1].compute_hash() || !current.proof(self.difficulty) {
                return false;
            }
            it -= 1;
        }
        true
    }

    /// Latest value written for `key` on the master chain.
    pub fn retrieve(&self, key: &str) -> Option<String> {
        self.master_chain()
            .rev()
            .flat_map(|b| b.transactions.iter().rev())
            .find(|t| t.key == key)
            .map(|t| t.value.clone())
    }

    /// Every value written for `key` on the master chain, newest first.
    pub fn retrieve_all(&self, key: &str) -> Vec<String> {
        self.master_chain()
            .rev()
            .flat_map(|b| b.transactions.iter().rev())
            .filter(|t| t.key == key)
            .map(|t| t.value.clone())
            .collect()
    }
}
