//! Pending transactions waiting to be mined, in arrival order.

use crate::crypto::{hash_to_string, Hash};
use crate::error::ChainError;
use crate::transaction::BlockTransaction;
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_MEMPOOL_SIZE: usize = 10_000;

#[derive(Debug, Clone)]
struct PendingEntry {
    seq: u64,
    tx: BlockTransaction,
    /// Candidate blocks that had to leave this transaction out.
    rejections: u32,
}

#[derive(Debug, Clone)]
pub struct Mempool {
    entries: HashMap<Hash, PendingEntry>,
    order: BTreeMap<u64, Hash>,
    next_seq: u64,
    max_size: usize,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}

impl Mempool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMPOOL_SIZE)
    }

    pub fn with_capacity(max_size: usize) -> Self {
        Mempool {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            max_size,
        }
    }

    /// Queues a transaction that already passed admission checks.
    pub fn add_transaction(&mut self, tx: BlockTransaction) -> Result<(), ChainError> {
        if self.entries.contains_key(&tx.tx_hash) {
            return Err(ChainError::DuplicateTransaction(tx.hash_str()));
        }
        if self.entries.len() >= self.max_size {
            return Err(ChainError::MempoolFull);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, tx.tx_hash);
        self.entries.insert(tx.tx_hash, PendingEntry { seq, tx, rejections: 0 });
        Ok(())
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn get_transaction(&self, hash: &Hash) -> Option<&BlockTransaction> {
        self.entries.get(hash).map(|entry| &entry.tx)
    }

    pub fn remove_transaction(&mut self, hash: &Hash) -> Option<BlockTransaction> {
        let entry = self.entries.remove(hash)?;
        self.order.remove(&entry.seq);
        Some(entry.tx)
    }

    /// Counts one more candidate block that left `hash` out and returns the total.
    pub fn record_rejection(&mut self, hash: &Hash) -> u32 {
        match self.entries.get_mut(hash) {
            Some(entry) => {
                entry.rejections += 1;
                entry.rejections
            }
            None => 0,
        }
    }

    /// Drops every transaction a committed block included.
    pub fn remove_confirmed<'a>(&mut self, hashes: impl IntoIterator<Item = &'a Hash>) -> usize {
        let mut removed = 0;
        for hash in hashes {
            if self.remove_transaction(hash).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, remaining = self.len(), "pruned confirmed transactions");
        }
        removed
    }

    /// Oldest first, at most `limit`.
    pub fn get_transactions(&self, limit: usize) -> Vec<BlockTransaction> {
        self.order
            .values()
            .take(limit)
            .filter_map(|hash| self.entries.get(hash).map(|entry| entry.tx.clone()))
            .collect()
    }

    pub fn get_all_transactions(&self) -> Vec<BlockTransaction> {
        self.get_transactions(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hashes(&self) -> Vec<String> {
        self.order.values().map(hash_to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, Signer};
    use crate::transaction::{Tx, TxOutput};

    fn transfer(keypair: &KeyPair, nonce: u64) -> BlockTransaction {
        let tx = Tx::transfer(keypair.address(), nonce, vec![TxOutput::new(keypair.address(), 1)], 0);
        BlockTransaction::signed(&tx, keypair).unwrap()
    }

    #[test]
    fn test_fifo_order() {
        let keypair = KeyPair::generate();
        let mut pool = Mempool::new();
        let txs: Vec<_> = (1..=4).map(|n| transfer(&keypair, n)).collect();
        for tx in &txs {
            pool.add_transaction(tx.clone()).unwrap();
        }
        assert_eq!(pool.get_transactions(2), txs[..2].to_vec());
        assert_eq!(pool.get_all_transactions(), txs);

        pool.remove_transaction(&txs[1].tx_hash);
        let remaining: Vec<_> = pool.get_all_transactions().into_iter().map(|t| t.tx_hash).collect();
        assert_eq!(remaining, vec![txs[0].tx_hash, txs[2].tx_hash, txs[3].tx_hash]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let keypair = KeyPair::generate();
        let mut pool = Mempool::new();
        let tx = transfer(&keypair, 1);
        pool.add_transaction(tx.clone()).unwrap();
        assert!(matches!(pool.add_transaction(tx), Err(ChainError::DuplicateTransaction(_))));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_capacity_enforced() {
        let keypair = KeyPair::generate();
        let mut pool = Mempool::with_capacity(2);
        pool.add_transaction(transfer(&keypair, 1)).unwrap();
        pool.add_transaction(transfer(&keypair, 2)).unwrap();
        assert!(matches!(pool.add_transaction(transfer(&keypair, 3)), Err(ChainError::MempoolFull)));
    }

    #[test]
    fn test_rejections_counted_per_transaction() {
        let keypair = KeyPair::generate();
        let mut pool = Mempool::new();
        let a = transfer(&keypair, 1);
        let b = transfer(&keypair, 2);
        pool.add_transaction(a.clone()).unwrap();
        pool.add_transaction(b.clone()).unwrap();

        assert_eq!(pool.record_rejection(&a.tx_hash), 1);
        assert_eq!(pool.record_rejection(&a.tx_hash), 2);
        assert_eq!(pool.record_rejection(&b.tx_hash), 1);
        pool.remove_transaction(&a.tx_hash);
        assert_eq!(pool.record_rejection(&a.tx_hash), 0);
    }

    #[test]
    fn test_remove_confirmed() {
        let keypair = KeyPair::generate();
        let mut pool = Mempool::new();
        let a = transfer(&keypair, 1);
        let b = transfer(&keypair, 2);
        pool.add_transaction(a.clone()).unwrap();
        pool.add_transaction(b.clone()).unwrap();

        let unknown = transfer(&keypair, 9).tx_hash;
        assert_eq!(pool.remove_confirmed([&a.tx_hash, &unknown]), 1);
        assert!(!pool.contains(&a.tx_hash));
        assert!(pool.contains(&b.tx_hash));
        assert!(pool.get_transaction(&b.tx_hash).is_some());
        assert_eq!(pool.hashes(), vec![b.hash_str()]);
    }
}
