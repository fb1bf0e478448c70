//! Pending transactions awaiting inclusion in a block.

use crate::Transaction;

/// Ordered multiset. A transaction may sit here and inside the block currently
/// being mined at the same time.
#[derive(Debug, Default, Clone)]
pub struct TransactionPool {
    pending: Vec<Transaction>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn add(&mut self, tr: Transaction) {
        self.pending.push(tr);
    }

    pub fn contains(&self, tr: &Transaction) -> bool {
        self.pending.contains(tr)
    }

    /// Remove the first `n` entries in order and hand them back. Entries added
    /// after this call stay for the next snapshot.
    pub fn snapshot_and_clear(&mut self, n: usize) -> Vec<Transaction> {
        let n = n.min(self.pending.len());
        self.pending.drain(..n).collect()
    }

    /// Remove the first occurrence of `tr`. Returns whether one was found.
    pub fn remove(&mut self, tr: &Transaction) -> bool {
        match self.pending.iter().position(|p| p == tr) {
            Some(pos) => {
                self.pending.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Put back every transaction that is not already pending. Returns how many
    /// were requeued.
    pub fn requeue<I>(&mut self, transactions: I) -> usize
    where
        I: IntoIterator<Item = Transaction>,
    {
        let mut requeued = 0;
        for tr in transactions {
            if !self.contains(&tr) {
                self.pending.push(tr);
                requeued += 1;
            }
        }
        requeued
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.pending.iter()
    }

    pub fn to_vec(&self) -> Vec<Transaction> {
        self.pending.clone()
    }
}
