//! Proof-of-work: sealing blocks and assembling candidates from the mempool.

use crate::blockchain::{subsidy_at, Block, BlockExecutor, ChainHead, SealedBlock, StateView, fill_state_commitment};
use crate::crypto::{Address, Hash};
use crate::error::ChainError;
use crate::transaction::{BlockTransaction, Tx, TxOutput};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Nonces tried between two looks at the cancel flag.
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Count of zero bits before the first set bit, scanning bytes MSB first.
pub fn leading_zero_bits(hash: &[u8]) -> u32 {
    let mut zero_bits = 0;
    for byte in hash {
        if *byte == 0 {
            zero_bits += 8;
        } else {
            zero_bits += byte.leading_zeros();
            break;
        }
    }
    zero_bits
}

/// A seal is valid when the hash has exactly `difficulty_bits` leading zero bits.
pub fn verify_seal(hash: &Hash, difficulty_bits: u32) -> bool {
    leading_zero_bits(hash) == difficulty_bits
}

/// Re-hashes `block` as it stands and checks the seal at `difficulty_bits`.
pub fn verify_block_seal(block: &Block, difficulty_bits: u32) -> Result<bool, ChainError> {
    Ok(verify_seal(&block.seal_hash()?, difficulty_bits))
}

/// Shared flag that stops an in-progress [`mine`] call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Once set the flag stays set.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Searches nonces starting at `block.nonce` until the seal hash matches.
///
/// Fails with `MiningCancelled` once `cancel` is set.
pub fn mine(mut block: Block, difficulty_bits: u32, cancel: &CancelToken) -> Result<SealedBlock, ChainError> {
    let mut tried: u64 = 0;
    loop {
        if tried % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(ChainError::MiningCancelled);
        }
        let hash = block.seal_hash()?;
        if verify_seal(&hash, difficulty_bits) {
            tracing::debug!(nonce = block.nonce, tried, "found seal");
            return SealedBlock::from_parts(block, hash);
        }
        tried += 1;
        block.nonce = match block.nonce.checked_add(1) {
            Some(nonce) => nonce,
            None => {
                // Nonce space exhausted: move the timestamp and start over
                block.timestamp += 1;
                0
            }
        };
    }
}

/// A block candidate and what happened to the offered transactions.
#[derive(Debug)]
pub struct AssembledBlock {
    pub block: Block,
    pub included: Vec<Hash>,
    pub rejected: Vec<(Hash, ChainError)>,
}

/// Builds an unsealed child of `head` from `pending`, in order.
///
/// Each transaction is tried against the state left by the ones before it;
/// failures are dropped. The coinbase pays subsidy plus fees to `reward_address`
/// and goes first. The state commitment is filled in.
pub fn assemble_block<V: StateView + ?Sized>(
    view: &V,
    head: &ChainHead,
    pending: &[BlockTransaction],
    reward_address: Address,
    max_transactions: usize,
) -> Result<AssembledBlock, ChainError> {
    let height = head
        .height
        .checked_add(1)
        .ok_or_else(|| ChainError::InvalidBlock("height overflow".to_string()))?;

    let mut executor = BlockExecutor::new(view, height);
    let mut accepted = Vec::new();
    let mut included = Vec::new();
    let mut rejected = Vec::new();
    for block_tx in pending {
        if accepted.len() >= max_transactions {
            break;
        }
        let mut attempt = executor.clone();
        match attempt.apply_transaction(block_tx) {
            Ok(tx) if !tx.is_coinbase() => {
                executor = attempt;
                included.push(block_tx.tx_hash);
                accepted.push(block_tx.clone());
            }
            Ok(_) => rejected.push((
                block_tx.tx_hash,
                ChainError::Malformed("pending coinbase transaction".to_string()),
            )),
            Err(e) => rejected.push((block_tx.tx_hash, e)),
        }
    }

    let reward = subsidy_at(height)
        .checked_add(executor.total_fees())
        .ok_or_else(|| ChainError::AmountOverflow("subsidy plus fees".to_string()))?;
    let coinbase = BlockTransaction::unsigned(&Tx::coinbase(vec![TxOutput::new(reward_address, reward)]))?;

    let mut transactions = Vec::with_capacity(accepted.len() + 1);
    transactions.push(coinbase);
    transactions.extend(accepted);

    let mut block = Block::new(head.hash, transactions);
    fill_state_commitment(view, &mut block, height)?;
    Ok(AssembledBlock {
        block,
        included,
        rejected,
    })
}
