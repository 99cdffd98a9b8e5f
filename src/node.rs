use crate::blockchain::{
    apply_block, verify_genesis, AccountState, Block, ChainHead, ChainParams, Publisher, SealedBlock, StateDelta,
};
use crate::codec;
use crate::config::Config;
use crate::crypto::{hash_to_string, Address, Hash};
use crate::error::ChainError;
use crate::mempool::Mempool;
use crate::miner::{self, AssembledBlock, CancelToken};
use crate::persistence::{Database, Persistence};
use crate::transaction::BlockTransaction;
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_BLOCK_TRANSACTIONS: usize = 500;

/// Candidates a transaction waiting for an earlier nonce may miss before it is evicted.
pub const MAX_CANDIDATE_REJECTIONS: u32 = 16;

/// The ledger: committed state, pending transactions and the commit section.
///
/// Every state change goes through [`ChainEngine::validate_and_commit_block`],
/// which holds `commit_lock` for the whole read-validate-write sequence.
/// Sealing a candidate never holds it.
pub struct ChainEngine {
    store: Arc<dyn Persistence>,
    params: ChainParams,
    mempool: Mutex<Mempool>,
    commit_lock: Mutex<()>,
    mining: Mutex<Option<CancelToken>>,
    max_block_transactions: usize,
}

impl ChainEngine {
    /// Verifies the configured genesis and imports it into an empty store,
    /// or checks that the stored chain starts with it.
    pub fn open(store: Arc<dyn Persistence>, params: ChainParams) -> Result<Self, ChainError> {
        let (genesis, delta) = verify_genesis(&params)?;

        match store.chain_head()? {
            None => {
                store.commit_block(&genesis, &delta)?;
                info!("Imported genesis block {}", genesis.hash_str());
            }
            Some(head) => {
                let stored = store
                    .load_block(0)?
                    .ok_or_else(|| ChainError::GenesisMismatch("stored chain has no block 0".to_string()))?;
                if stored.hash() != genesis.hash() {
                    return Err(ChainError::GenesisMismatch(format!(
                        "stored genesis {} differs from configured {}",
                        stored.hash_str(),
                        genesis.hash_str()
                    )));
                }
                info!("Opened chain at height {} ({})", head.height, hash_to_string(&head.hash));
            }
        }

        Ok(ChainEngine {
            store,
            params,
            mempool: Mutex::new(Mempool::new()),
            commit_lock: Mutex::new(()),
            mining: Mutex::new(None),
            max_block_transactions: DEFAULT_MAX_BLOCK_TRANSACTIONS,
        })
    }

    pub fn with_mempool(mut self, mempool: Mempool) -> Self {
        self.mempool = Mutex::new(mempool);
        self
    }

    pub fn with_max_block_transactions(mut self, max: usize) -> Self {
        self.max_block_transactions = max;
        self
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn chain_head(&self) -> Result<ChainHead, ChainError> {
        self.store
            .chain_head()?
            .ok_or_else(|| ChainError::StorageFailure("chain has no blocks".to_string()))
    }

    /// Admits a transaction to the mempool after stateless checks.
    ///
    /// Transactions whose nonce is already used are refused here; everything
    /// else stateful is decided when a block includes them.
    pub fn submit_transaction(&self, block_tx: BlockTransaction) -> Result<Hash, ChainError> {
        let tx = block_tx.verify_basics()?;
        if tx.is_coinbase() {
            return Err(ChainError::Malformed(
                "coinbase transactions cannot be submitted".to_string(),
            ));
        }
        if let Some(sender) = tx.signing_address {
            let current = self.account_state(&sender)?.nonce;
            if tx.replay_nonce <= current {
                return Err(ChainError::NonceOutOfSync {
                    address: sender.to_string(),
                    expected: current + 1,
                    got: tx.replay_nonce,
                });
            }
        }

        let hash = block_tx.tx_hash;
        self.mempool.lock().add_transaction(block_tx.clone())?;
        if let Err(e) = self.store.add_pending(&block_tx) {
            self.mempool.lock().remove_transaction(&hash);
            return Err(e);
        }
        debug!(tx = %hash_to_string(&hash), pending = self.mempool_len(), "transaction accepted");
        Ok(hash)
    }

    /// Pulls transactions queued in the store by other processes into the mempool.
    pub fn sync_pending(&self) -> Result<usize, ChainError> {
        let stored = self.store.pending_transactions()?;
        let mut invalid = Vec::new();
        let mut added = 0;

        let mut mempool = self.mempool.lock();
        for block_tx in stored {
            if mempool.contains(&block_tx.tx_hash) {
                continue;
            }
            if let Err(e) = block_tx.verify_basics() {
                warn!(tx = %block_tx.hash_str(), error = %e, "discarding stored pending transaction");
                invalid.push(block_tx.tx_hash);
                continue;
            }
            match mempool.add_transaction(block_tx) {
                Ok(()) => added += 1,
                Err(ChainError::MempoolFull) => break,
                Err(e) => debug!(error = %e, "stored pending transaction skipped"),
            }
        }
        drop(mempool);

        if !invalid.is_empty() {
            self.store.remove_pending(&invalid)?;
        }
        if added > 0 {
            debug!(added, "loaded pending transactions from the store");
        }
        Ok(added)
    }

    /// Nonce for the next transaction signed by `address`, counting pending ones.
    pub fn next_nonce(&self, address: &Address) -> Result<u64, ChainError> {
        self.sync_pending()?;
        let mut nonce = self.account_state(address)?.nonce;
        let pending = self.mempool.lock().get_all_transactions();
        for block_tx in pending {
            let tx = codec::decode_tx(block_tx.raw_tx_bytes())?;
            if tx.signing_address.as_ref() == Some(address) {
                nonce = nonce.max(tx.replay_nonce);
            }
        }
        nonce
            .checked_add(1)
            .ok_or_else(|| ChainError::AmountOverflow(format!("nonce of {}", address)))
    }

    /// Validates `block` as the child of the current head and commits it atomically.
    pub fn validate_and_commit_block(&self, block: &SealedBlock) -> Result<StateDelta, ChainError> {
        let _guard = self.commit_lock.lock();

        let head = self.chain_head()?;
        let height = head.height + 1;
        if block.block().previous_hash != Some(head.hash) {
            return Err(ChainError::InvalidBlock(format!(
                "block {} does not extend head {}",
                block.hash_str(),
                hash_to_string(&head.hash)
            )));
        }
        if !miner::verify_block_seal(block.block(), self.params.difficulty_bits)? {
            return Err(ChainError::InvalidProofOfWork);
        }

        let delta = apply_block(self.store.as_ref(), block.block(), height)?;
        self.store.commit_block(block, &delta)?;

        let included: Vec<Hash> = block.block().transactions.iter().map(|t| t.tx_hash).collect();
        self.mempool.lock().remove_confirmed(&included);
        self.cancel_mining();

        info!(
            height,
            hash = %block.hash_str(),
            transactions = included.len(),
            fees = delta.total_fees,
            "committed block"
        );
        Ok(delta)
    }

    /// Assembles a child of the current head from `pending` and seals it.
    ///
    /// Fails with `MiningCancelled` when another block is committed first.
    pub fn mine_once(&self, pending: &[BlockTransaction], reward_address: Address) -> Result<SealedBlock, ChainError> {
        let cancel = self.start_mining();
        let assembled = self.prepare_candidate(pending, reward_address)?;
        self.seal(assembled.block, &cancel)
    }

    /// [`ChainEngine::mine_once`] over the current mempool contents.
    pub fn mine_from_mempool(&self, reward_address: Address) -> Result<SealedBlock, ChainError> {
        self.sync_pending()?;
        let pending = self.mempool.lock().get_all_transactions();
        self.mine_once(&pending, reward_address)
    }

    /// Like [`ChainEngine::mine_from_mempool`], but only seals a candidate
    /// that includes at least one pending transaction.
    pub fn mine_pending(&self, reward_address: Address) -> Result<Option<SealedBlock>, ChainError> {
        self.sync_pending()?;
        let pending = self.mempool.lock().get_all_transactions();
        if pending.is_empty() {
            return Ok(None);
        }

        let cancel = self.start_mining();
        let assembled = self.prepare_candidate(&pending, reward_address)?;
        if assembled.included.is_empty() {
            debug!(pending = self.mempool_len(), "no pending transaction fits the next block");
            return Ok(None);
        }
        self.seal(assembled.block, &cancel).map(Some)
    }

    fn start_mining(&self) -> CancelToken {
        let cancel = CancelToken::new();
        *self.mining.lock() = Some(cancel.clone());
        cancel
    }

    fn prepare_candidate(&self, pending: &[BlockTransaction], reward_address: Address) -> Result<AssembledBlock, ChainError> {
        let assembled = {
            let _guard = self.commit_lock.lock();
            let head = self.chain_head()?;
            miner::assemble_block(
                self.store.as_ref(),
                &head,
                pending,
                reward_address,
                self.max_block_transactions,
            )?
        };
        self.evict_rejected(&assembled.rejected)?;
        Ok(assembled)
    }

    /// Drops pending transactions a candidate refused. Only a transaction
    /// waiting for an earlier nonce stays, and only for a bounded number of candidates.
    fn evict_rejected(&self, rejected: &[(Hash, ChainError)]) -> Result<(), ChainError> {
        let mut evicted = Vec::new();
        let mut mempool = self.mempool.lock();
        for (hash, err) in rejected {
            let waiting = matches!(err, ChainError::NonceOutOfSync { expected, got, .. } if got > expected);
            let rejections = mempool.record_rejection(hash);
            if waiting && rejections < MAX_CANDIDATE_REJECTIONS {
                debug!(tx = %hash_to_string(hash), rejections, "transaction waits for an earlier nonce");
                continue;
            }
            warn!(tx = %hash_to_string(hash), error = %err, rejections, "evicting pending transaction");
            mempool.remove_transaction(hash);
            evicted.push(*hash);
        }
        drop(mempool);

        if !evicted.is_empty() {
            self.store.remove_pending(&evicted)?;
        }
        Ok(())
    }

    fn seal(&self, block: Block, cancel: &CancelToken) -> Result<SealedBlock, ChainError> {
        debug!(
            transactions = block.transactions.len(),
            difficulty = self.params.difficulty_bits,
            "sealing candidate"
        );
        miner::mine(block, self.params.difficulty_bits, cancel)
    }

    /// Stops the in-flight mining attempt, if any.
    pub fn cancel_mining(&self) {
        if let Some(token) = self.mining.lock().take() {
            token.cancel();
        }
    }

    pub fn account_state(&self, address: &Address) -> Result<AccountState, ChainError> {
        Ok(self
            .store
            .account_states(std::slice::from_ref(address))?
            .remove(address)
            .unwrap_or_default())
    }

    pub fn block_at(&self, height: u64) -> Result<Option<SealedBlock>, ChainError> {
        self.store.load_block(height)
    }

    /// The publisher `address` currently signs for.
    pub fn publisher_for(&self, address: &Address) -> Result<Option<Publisher>, ChainError> {
        let head = self.chain_head()?;
        let record = self
            .store
            .publisher_keys(address)?
            .into_iter()
            .find(|r| r.is_valid_at(head.height));
        match record {
            Some(record) => self.store.publisher(record.publisher_id),
            None => Ok(None),
        }
    }

    pub fn fact(&self, publisher_id: u64, key: &str) -> Result<Option<String>, ChainError> {
        self.store.fact(publisher_id, key)
    }

    pub fn document_height(&self, publisher_id: u64, document_id: &str) -> Result<Option<u64>, ChainError> {
        self.store.document_height(publisher_id, document_id)
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().len()
    }
}

pub struct Node {
    pub config: Config,
    pub engine: Arc<ChainEngine>,
}

impl Node {
    pub fn init(config: Config) -> Result<Self, ChainError> {
        config.validate()?;

        let db_path = std::path::Path::new(&config.database.path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let store: Arc<dyn Persistence> = Arc::new(Database::open(&config.database.path)?);
        let engine = ChainEngine::open(store, ChainParams::mainnet()?)?
            .with_mempool(Mempool::with_capacity(config.mempool.max_size))
            .with_max_block_transactions(config.miner.max_block_transactions);

        Ok(Self {
            config,
            engine: Arc::new(engine),
        })
    }

    /// Runs until Ctrl-C, mining in the background when enabled.
    pub async fn run(self: Arc<Self>) -> Result<(), ChainError> {
        let miner_task = match self.config.miner.reward_address()? {
            Some(reward) if self.config.miner.enabled => {
                let poll = Duration::from_secs(self.config.miner.poll_interval_secs);
                info!("Mining enabled, rewards to {}", reward);
                Some(tokio::spawn(Node::run_miner(self.engine.clone(), reward, poll)))
            }
            _ => None,
        };

        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.engine.chain_head() {
                        Ok(head) => info!(
                            "Node running: height = {}, head = {}, pending = {}",
                            head.height,
                            hash_to_string(&head.hash),
                            self.engine.mempool_len()
                        ),
                        Err(e) => error!("Cannot read chain head: {}", e),
                    }
                }
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                    info!("Shutting down");
                    break;
                }
            }
        }

        self.engine.cancel_mining();
        if let Some(task) = miner_task {
            task.abort();
        }
        Ok(())
    }

    /// Mines whenever a pending transaction fits the next block. Sealing runs
    /// on a blocking thread; a block committed meanwhile cancels it.
    pub async fn run_miner(engine: Arc<ChainEngine>, reward: Address, poll: Duration) {
        loop {
            let worker = engine.clone();
            let result = tokio::task::spawn_blocking(move || -> Result<Option<(SealedBlock, StateDelta)>, ChainError> {
                match worker.mine_pending(reward)? {
                    Some(sealed) => {
                        let delta = worker.validate_and_commit_block(&sealed)?;
                        Ok(Some((sealed, delta)))
                    }
                    None => Ok(None),
                }
            })
            .await;

            match result {
                Ok(Ok(Some((sealed, delta)))) => {
                    info!("Mined new block at height {} ({})", delta.height, sealed.hash_str());
                }
                Ok(Ok(None)) => tokio::time::sleep(poll).await,
                Ok(Err(ChainError::MiningCancelled)) => {
                    debug!("Head moved while mining, starting over");
                }
                Ok(Err(e)) => {
                    warn!("Mining failed: {}", e);
                    tokio::time::sleep(poll).await;
                }
                Err(e) => {
                    error!("Miner task panicked: {}", e);
                    tokio::time::sleep(poll).await;
                }
            }
        }
    }
}
