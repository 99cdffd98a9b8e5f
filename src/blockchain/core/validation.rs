//! Block state transition: pure with respect to committed state.
//!
//! [`apply_block`] reads through a [`StateView`] and returns a [`StateDelta`];
//! nothing is written until the caller commits the delta.

use crate::crypto::{hash_to_string, Address, Hash};
use crate::error::ChainError;
use crate::transaction::{BlockTransaction, DocumentPayload, Tx, TxKind};

use super::chain::{subsidy_at, Block};
use super::publisher::PublisherRegistry;
use super::state::{state_commitment, AccountState, AccountStates, DocumentRecord, Fact, StateDelta, StateView};

/// Applies transactions one at a time on top of a [`StateView`].
///
/// Cloning an executor snapshots its pending changes, which block assembly
/// uses to try a transaction and drop it on failure.
pub struct BlockExecutor<'a, V: ?Sized> {
    view: &'a V,
    height: u64,
    states: AccountStates,
    registry: PublisherRegistry<'a, V>,
    facts: Vec<Fact>,
    documents: Vec<DocumentRecord>,
    coinbase_count: usize,
    coinbase_amount: u64,
    total_fees: u64,
}

impl<'a, V: ?Sized> Clone for BlockExecutor<'a, V> {
    fn clone(&self) -> Self {
        BlockExecutor {
            view: self.view,
            height: self.height,
            states: self.states.clone(),
            registry: self.registry.clone(),
            facts: self.facts.clone(),
            documents: self.documents.clone(),
            coinbase_count: self.coinbase_count,
            coinbase_amount: self.coinbase_amount,
            total_fees: self.total_fees,
        }
    }
}

impl<'a, V: StateView + ?Sized> BlockExecutor<'a, V> {
    pub fn new(view: &'a V, height: u64) -> Self {
        BlockExecutor {
            view,
            height,
            states: AccountStates::new(),
            registry: PublisherRegistry::new(view),
            facts: Vec::new(),
            documents: Vec::new(),
            coinbase_count: 0,
            coinbase_amount: 0,
            total_fees: 0,
        }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn total_fees(&self) -> u64 {
        self.total_fees
    }

    /// Loads `address` into the touched set, creating a zero account if unseen.
    fn touch(&mut self, address: &Address) -> Result<&mut AccountState, ChainError> {
        if !self.states.contains_key(address) {
            let state = self
                .view
                .account_states(std::slice::from_ref(address))?
                .remove(address)
                .unwrap_or_default();
            self.states.insert(*address, state);
        }
        self.states
            .get_mut(address)
            .ok_or_else(|| ChainError::StorageFailure("account state cache".to_string()))
    }

    /// Verifies and applies one transaction. On error the executor may hold
    /// partial changes and must be discarded.
    pub fn apply_transaction(&mut self, block_tx: &BlockTransaction) -> Result<Tx, ChainError> {
        let tx = block_tx.verify_basics()?;

        match tx.kind() {
            TxKind::Coinbase => {
                self.coinbase_count += 1;
                if tx.miner_fee_amount != 0 {
                    return Err(ChainError::InvalidCoinbaseAmount {
                        expected: 0,
                        got: tx.miner_fee_amount,
                    });
                }
            }
            TxKind::Standard => self.debit_sender(&tx)?,
        }

        self.total_fees = self
            .total_fees
            .checked_add(tx.miner_fee_amount)
            .ok_or_else(|| ChainError::AmountOverflow("block fees".to_string()))?;

        if let Some(document) = tx.document()? {
            self.publish(&tx, document)?;
        }

        for output in &tx.outputs {
            self.touch(&output.recipient)?.credit(output.amount)?;
            if tx.is_coinbase() {
                self.coinbase_amount = self
                    .coinbase_amount
                    .checked_add(output.amount)
                    .ok_or_else(|| ChainError::AmountOverflow("coinbase outputs".to_string()))?;
            }
        }
        Ok(tx)
    }

    fn debit_sender(&mut self, tx: &Tx) -> Result<(), ChainError> {
        let sender = tx
            .signing_address
            .ok_or_else(|| ChainError::BadSignature("Unsigned non-coinbase tx".to_string()))?;
        let state = self.touch(&sender)?;

        let expected = state
            .nonce
            .checked_add(1)
            .ok_or_else(|| ChainError::AmountOverflow(format!("nonce of {}", sender)))?;
        if tx.replay_nonce != expected {
            return Err(ChainError::NonceOutOfSync {
                address: sender.to_string(),
                expected,
                got: tx.replay_nonce,
            });
        }

        // Outputs first, then the fee
        let mut balance = state.balance;
        let spends = tx
            .outputs
            .iter()
            .map(|o| o.amount)
            .chain(std::iter::once(tx.miner_fee_amount));
        for amount in spends {
            if amount > balance {
                return Err(ChainError::InsufficientBalance {
                    address: sender.to_string(),
                    balance,
                    amount,
                });
            }
            balance -= amount;
        }

        state.balance = balance;
        state.nonce = expected;
        Ok(())
    }

    fn publish(&mut self, tx: &Tx, document: DocumentPayload) -> Result<(), ChainError> {
        let signer = tx.signing_address.ok_or_else(|| {
            ChainError::KeyMismatch("published data without a signing address".to_string())
        })?;
        if tx.is_coinbase() && self.height != 0 {
            return Err(ChainError::KeyMismatch(
                "unsigned coinbase may only publish in the genesis block".to_string(),
            ));
        }
        if let Some(claimed) = document.claimed_address() {
            if *claimed != signer {
                return Err(ChainError::KeyMismatch(format!(
                    "document claims {} but is signed by {}",
                    claimed, signer
                )));
            }
        }

        // A registered key may only rotate; introducing it again is refused
        let publisher = match &document {
            DocumentPayload::Introduce { .. } | DocumentPayload::Rotate { .. } => {
                self.registry.introduce_or_rotate(&document, self.height)?
            }
            DocumentPayload::Fact { .. } => self.registry.resolve_publisher(&signer, self.height)?,
        };

        for (key, value) in document.fields() {
            self.facts.push(Fact {
                publisher_id: publisher.publisher_id,
                key: key.clone(),
                value: value.clone(),
            });
        }
        self.documents.push(DocumentRecord {
            publisher_id: publisher.publisher_id,
            document_id: document.document_id().to_string(),
            height: self.height,
        });
        Ok(())
    }

    /// Block-level checks after all transactions, and the resulting commitment.
    pub fn finish(self) -> Result<StateDelta, ChainError> {
        if self.coinbase_count != 1 {
            return Err(ChainError::InvalidCoinbaseCount(self.coinbase_count));
        }
        let expected = subsidy_at(self.height)
            .checked_add(self.total_fees)
            .ok_or_else(|| ChainError::AmountOverflow("subsidy plus fees".to_string()))?;
        if self.coinbase_amount != expected {
            return Err(ChainError::InvalidCoinbaseAmount {
                expected,
                got: self.coinbase_amount,
            });
        }

        let state_commitment = state_commitment(&self.states)?;
        Ok(StateDelta {
            height: self.height,
            states: self.states,
            publisher_events: self.registry.into_events(),
            facts: self.facts,
            documents: self.documents,
            state_commitment,
            total_fees: self.total_fees,
            coinbase_amount: self.coinbase_amount,
        })
    }
}

fn check_structure(block: &Block, height: u64) -> Result<(), ChainError> {
    let genesis_height = height == 0;
    if block.is_genesis() != genesis_height {
        return Err(ChainError::InvalidBlock(format!(
            "genesis flag set: {}, height: {}",
            block.is_genesis(),
            height
        )));
    }
    if block.previous_hash.is_none() != genesis_height {
        return Err(ChainError::InvalidBlock(format!(
            "previous hash present: {}, height: {}",
            block.previous_hash.is_some(),
            height
        )));
    }
    Ok(())
}

/// Runs every transaction of `block` at `height`, ignoring its declared commitment.
pub fn simulate_block<V: StateView + ?Sized>(view: &V, block: &Block, height: u64) -> Result<StateDelta, ChainError> {
    check_structure(block, height)?;
    let mut executor = BlockExecutor::new(view, height);
    for block_tx in &block.transactions {
        executor.apply_transaction(block_tx)?;
    }
    executor.finish()
}

/// Full state transition: [`simulate_block`] plus the declared commitment check.
pub fn apply_block<V: StateView + ?Sized>(view: &V, block: &Block, height: u64) -> Result<StateDelta, ChainError> {
    let delta = simulate_block(view, block, height)?;
    if delta.state_commitment != block.state_commitment {
        return Err(ChainError::StateMismatch {
            computed: delta.commitment_str(),
            declared: hash_to_string(&block.state_commitment),
        });
    }
    Ok(delta)
}

/// Sets `block.state_commitment` to the value [`simulate_block`] computes.
pub fn fill_state_commitment<V: StateView + ?Sized>(view: &V, block: &mut Block, height: u64) -> Result<Hash, ChainError> {
    let delta = simulate_block(view, block, height)?;
    block.state_commitment = delta.state_commitment;
    Ok(delta.state_commitment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{BlockFlag, BLOCK_SUBSIDY};
    use crate::crypto::{hash256, KeyPair, Signer};
    use crate::transaction::{TxOutput, DOC_ADDRESS_KEY, DOC_ID_KEY, DOC_NAME_KEY, DOC_NEW_ADDRESS_KEY, INTRODUCE_DOC_ID};

    fn coinbase(to: Address, amount: u64) -> BlockTransaction {
        BlockTransaction::unsigned(&Tx::coinbase(vec![TxOutput::new(to, amount)])).unwrap()
    }

    fn block_at(height: u64, transactions: Vec<BlockTransaction>) -> Block {
        let mut block = Block::new(hash256(b"parent"), transactions);
        if height == 0 {
            block.previous_hash = None;
            block.flags = vec![BlockFlag::Genesis];
        }
        block
    }

    fn funded(address: Address, balance: u64) -> AccountStates {
        let mut states = AccountStates::new();
        states.insert(address, AccountState { balance, nonce: 0, data: String::new() });
        states
    }

    #[test]
    fn test_transfer_scenario() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate().address();
        let miner = KeyPair::generate().address();
        let view = funded(alice.address(), 100_000);

        let transfer = Tx::transfer(alice.address(), 1, vec![TxOutput::new(bob, 40_000)], 100);
        let block = block_at(
            1,
            vec![
                coinbase(miner, BLOCK_SUBSIDY + 100),
                BlockTransaction::signed(&transfer, &alice).unwrap(),
            ],
        );
        let delta = simulate_block(&view, &block, 1).unwrap();

        assert_eq!(delta.states[&alice.address()], AccountState { balance: 59_900, nonce: 1, data: String::new() });
        assert_eq!(delta.states[&bob].balance, 40_000);
        assert_eq!(delta.states[&bob].nonce, 0);
        assert_eq!(delta.states[&miner].balance, BLOCK_SUBSIDY + 100);
        assert_eq!(delta.total_fees, 100);
        assert_eq!(delta.states.len(), 3);
    }

    #[test]
    fn test_replayed_transfer_rejected() {
        let alice = KeyPair::generate();
        let miner = KeyPair::generate().address();
        let view = funded(alice.address(), 100_000);
        let signed = BlockTransaction::signed(
            &Tx::transfer(alice.address(), 1, vec![TxOutput::new(miner, 1)], 0),
            &alice,
        )
        .unwrap();

        let block = block_at(1, vec![coinbase(miner, BLOCK_SUBSIDY), signed.clone(), signed]);
        assert!(matches!(
            simulate_block(&view, &block, 1),
            Err(ChainError::NonceOutOfSync { expected: 2, got: 1, .. })
        ));
    }

    #[test]
    fn test_nonce_must_be_next() {
        let alice = KeyPair::generate();
        let miner = KeyPair::generate().address();
        let mut view = funded(alice.address(), 100_000);
        let pay = |nonce| {
            let tx = Tx::transfer(alice.address(), nonce, vec![TxOutput::new(miner, 1)], 0);
            BlockTransaction::signed(&tx, &alice).unwrap()
        };

        let skip = block_at(1, vec![coinbase(miner, BLOCK_SUBSIDY), pay(3)]);
        assert!(matches!(
            simulate_block(&view, &skip, 1),
            Err(ChainError::NonceOutOfSync { expected: 1, got: 3, .. })
        ));

        view.get_mut(&alice.address()).unwrap().nonce = 3;
        let stale = block_at(1, vec![coinbase(miner, BLOCK_SUBSIDY), pay(1)]);
        assert!(matches!(
            simulate_block(&view, &stale, 1),
            Err(ChainError::NonceOutOfSync { expected: 4, got: 1, .. })
        ));

        let next = block_at(1, vec![coinbase(miner, BLOCK_SUBSIDY), pay(4)]);
        assert_eq!(simulate_block(&view, &next, 1).unwrap().states[&alice.address()].nonce, 4);
    }

    #[test]
    fn test_signed_coinbase_accepted() {
        let miner = KeyPair::generate();
        let view = AccountStates::new();
        let signed = BlockTransaction::signed(&Tx::coinbase(vec![TxOutput::new(miner.address(), BLOCK_SUBSIDY)]), &miner).unwrap();
        assert!(signed.signature.is_some());

        let mut block = block_at(1, vec![signed]);
        fill_state_commitment(&view, &mut block, 1).unwrap();
        let delta = apply_block(&view, &block, 1).unwrap();
        assert_eq!(delta.coinbase_amount, BLOCK_SUBSIDY);
        assert_eq!(delta.states[&miner.address()].balance, BLOCK_SUBSIDY);
    }

    #[test]
    fn test_insufficient_balance_counts_fee() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate().address();
        let view = funded(alice.address(), 1_000);

        let exact = Tx::transfer(alice.address(), 1, vec![TxOutput::new(bob, 990)], 10);
        let block = block_at(1, vec![coinbase(bob, BLOCK_SUBSIDY + 10), BlockTransaction::signed(&exact, &alice).unwrap()]);
        assert_eq!(simulate_block(&view, &block, 1).unwrap().states[&alice.address()].balance, 0);

        let over = Tx::transfer(alice.address(), 1, vec![TxOutput::new(bob, 990)], 11);
        let block = block_at(1, vec![coinbase(bob, BLOCK_SUBSIDY + 11), BlockTransaction::signed(&over, &alice).unwrap()]);
        assert!(matches!(
            simulate_block(&view, &block, 1),
            Err(ChainError::InsufficientBalance { balance: 10, amount: 11, .. })
        ));
    }

    #[test]
    fn test_coinbase_rules() {
        let miner = KeyPair::generate().address();
        let view = AccountStates::new();

        let none = block_at(1, vec![]);
        assert!(matches!(simulate_block(&view, &none, 1), Err(ChainError::InvalidCoinbaseCount(0))));

        let two = block_at(1, vec![coinbase(miner, BLOCK_SUBSIDY), coinbase(miner, 0)]);
        assert!(matches!(simulate_block(&view, &two, 1), Err(ChainError::InvalidCoinbaseCount(2))));

        let greedy = block_at(1, vec![coinbase(miner, BLOCK_SUBSIDY + 1)]);
        assert!(matches!(
            simulate_block(&view, &greedy, 1),
            Err(ChainError::InvalidCoinbaseAmount { expected: BLOCK_SUBSIDY, .. })
        ));

        let mut with_fee = Tx::coinbase(vec![TxOutput::new(miner, BLOCK_SUBSIDY)]);
        with_fee.miner_fee_amount = 5;
        let block = block_at(1, vec![BlockTransaction::unsigned(&with_fee).unwrap()]);
        assert!(matches!(
            simulate_block(&view, &block, 1),
            Err(ChainError::InvalidCoinbaseAmount { expected: 0, got: 5 })
        ));
    }

    #[test]
    fn test_commitment_checked_and_pure() {
        let miner = KeyPair::generate().address();
        let view = AccountStates::new();
        let mut block = block_at(1, vec![coinbase(miner, BLOCK_SUBSIDY)]);

        assert!(matches!(apply_block(&view, &block, 1), Err(ChainError::StateMismatch { .. })));
        let commitment = fill_state_commitment(&view, &mut block, 1).unwrap();

        let first = apply_block(&view, &block, 1).unwrap();
        let second = apply_block(&view, &block, 1).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.state_commitment, commitment);
        assert!(view.is_empty());
    }

    #[test]
    fn test_commitment_covers_touched_accounts_only() {
        let alice = KeyPair::generate();
        let idle = KeyPair::generate().address();
        let miner = KeyPair::generate().address();
        let mut view = funded(alice.address(), 500);
        view.insert(idle, AccountState { balance: 7, ..Default::default() });

        let block = block_at(1, vec![coinbase(miner, BLOCK_SUBSIDY)]);
        let delta = simulate_block(&view, &block, 1).unwrap();
        let mut expected = AccountStates::new();
        expected.insert(miner, AccountState { balance: BLOCK_SUBSIDY, ..Default::default() });
        assert_eq!(delta.state_commitment, state_commitment(&expected).unwrap());
    }

    #[test]
    fn test_transaction_order_independent_when_disjoint() {
        let alice = KeyPair::generate();
        let carol = KeyPair::generate();
        let bob = KeyPair::generate().address();
        let miner = KeyPair::generate().address();
        let mut view = funded(alice.address(), 1_000);
        view.insert(carol.address(), AccountState { balance: 1_000, ..Default::default() });

        let a = BlockTransaction::signed(&Tx::transfer(alice.address(), 1, vec![TxOutput::new(bob, 10)], 1), &alice).unwrap();
        let c = BlockTransaction::signed(&Tx::transfer(carol.address(), 1, vec![TxOutput::new(bob, 20)], 2), &carol).unwrap();
        let cb = coinbase(miner, BLOCK_SUBSIDY + 3);

        let forward = simulate_block(&view, &block_at(1, vec![cb.clone(), a.clone(), c.clone()]), 1).unwrap();
        let reverse = simulate_block(&view, &block_at(1, vec![c, a, cb]), 1).unwrap();
        assert_eq!(forward.state_commitment, reverse.state_commitment);
        assert_eq!(forward.states[&bob].balance, 30);
    }

    #[test]
    fn test_structure_checks() {
        let miner = KeyPair::generate().address();
        let view = AccountStates::new();

        let mut flagged = block_at(1, vec![coinbase(miner, BLOCK_SUBSIDY)]);
        flagged.flags = vec![BlockFlag::Genesis];
        assert!(matches!(simulate_block(&view, &flagged, 1), Err(ChainError::InvalidBlock(_))));

        let mut orphan = block_at(1, vec![coinbase(miner, BLOCK_SUBSIDY)]);
        orphan.previous_hash = None;
        assert!(matches!(simulate_block(&view, &orphan, 1), Err(ChainError::InvalidBlock(_))));
    }

    fn intro_tx(keypair: &KeyPair, nonce: u64, name: &str) -> Tx {
        Tx::transfer(keypair.address(), nonce, vec![], 0).with_published_data([
            (DOC_ID_KEY, INTRODUCE_DOC_ID.to_string()),
            (DOC_NAME_KEY, name.to_string()),
            (DOC_ADDRESS_KEY, keypair.address().to_string()),
            ("homepage", "https://example.org".to_string()),
        ])
    }

    #[test]
    fn test_publisher_introduction_and_facts() {
        let alice = KeyPair::generate();
        let miner = KeyPair::generate().address();
        let view = funded(alice.address(), 10);

        let intro = BlockTransaction::signed(&intro_tx(&alice, 1, "Alice"), &alice).unwrap();
        let fact = Tx::transfer(alice.address(), 2, vec![], 0)
            .with_published_data([(DOC_ID_KEY, "profile"), ("age", "30"), ("_hidden", "x")]);
        let fact = BlockTransaction::signed(&fact, &alice).unwrap();

        let block = block_at(1, vec![coinbase(miner, BLOCK_SUBSIDY), intro, fact]);
        let delta = simulate_block(&view, &block, 1).unwrap();

        assert_eq!(delta.publisher_events.len(), 1);
        assert_eq!(
            delta.facts,
            vec![
                Fact { publisher_id: 1, key: "homepage".to_string(), value: "https://example.org".to_string() },
                Fact { publisher_id: 1, key: "age".to_string(), value: "30".to_string() },
            ]
        );
        assert_eq!(delta.documents[0].document_id, INTRODUCE_DOC_ID);
        assert_eq!(delta.documents[1].document_id, "profile");
        assert_eq!(delta.documents[1].height, 1);
    }

    #[test]
    fn test_fact_from_unknown_key_rejected() {
        let stranger = KeyPair::generate();
        let miner = KeyPair::generate().address();
        let view = funded(stranger.address(), 10);
        let fact = Tx::transfer(stranger.address(), 1, vec![], 0).with_published_data([(DOC_ID_KEY, "news")]);
        let block = block_at(1, vec![coinbase(miner, BLOCK_SUBSIDY), BlockTransaction::signed(&fact, &stranger).unwrap()]);
        assert!(matches!(simulate_block(&view, &block, 1), Err(ChainError::UnknownOrExpiredKey(_))));
    }

    #[test]
    fn test_claimed_key_must_match_signer() {
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let miner = KeyPair::generate().address();
        let view = funded(mallory.address(), 10);

        let mut forged = intro_tx(&alice, 1, "Alice");
        forged.signing_address = Some(mallory.address());
        let block = block_at(1, vec![coinbase(miner, BLOCK_SUBSIDY), BlockTransaction::signed(&forged, &mallory).unwrap()]);
        assert!(matches!(simulate_block(&view, &block, 1), Err(ChainError::KeyMismatch(_))));
    }

    #[test]
    fn test_coinbase_publishing_only_at_genesis() {
        let founder = KeyPair::generate().address();
        let view = AccountStates::new();
        let mut tx = Tx::coinbase(vec![TxOutput::new(founder, BLOCK_SUBSIDY)]).with_published_data([
            (DOC_ID_KEY, INTRODUCE_DOC_ID.to_string()),
            (DOC_NAME_KEY, "Founder".to_string()),
            (DOC_ADDRESS_KEY, founder.to_string()),
        ]);
        tx.signing_address = Some(founder);
        let btx = BlockTransaction::unsigned(&tx).unwrap();

        let genesis = simulate_block(&view, &block_at(0, vec![btx.clone()]), 0).unwrap();
        assert_eq!(genesis.publisher_events.len(), 1);
        assert!(matches!(
            simulate_block(&view, &block_at(1, vec![btx]), 1),
            Err(ChainError::KeyMismatch(_))
        ));
    }

    #[test]
    fn test_current_publisher_cannot_introduce_again() {
        let alice = KeyPair::generate();
        let miner = KeyPair::generate().address();
        let view = funded(alice.address(), 10);

        let intro = BlockTransaction::signed(&intro_tx(&alice, 1, "Alice"), &alice).unwrap();
        let again = BlockTransaction::signed(&intro_tx(&alice, 2, "Alice Renamed"), &alice).unwrap();
        let block = block_at(1, vec![coinbase(miner, BLOCK_SUBSIDY), intro, again]);
        assert!(matches!(simulate_block(&view, &block, 1), Err(ChainError::KeyAlreadyRegistered(_))));
    }

    #[test]
    fn test_rotation_within_block() {
        let alice = KeyPair::generate();
        let next = KeyPair::generate();
        let miner = KeyPair::generate().address();
        let mut view = funded(alice.address(), 10);
        view.insert(next.address(), AccountState::default());

        let intro = BlockTransaction::signed(&intro_tx(&alice, 1, "Alice"), &alice).unwrap();
        let rotate = intro_tx(&alice, 2, "Alice v2")
            .with_published_data([(DOC_NEW_ADDRESS_KEY, next.address().to_string())]);
        let rotate = BlockTransaction::signed(&rotate, &alice).unwrap();
        let fact = Tx::transfer(next.address(), 1, vec![], 0).with_published_data([(DOC_ID_KEY, "post")]);
        let fact = BlockTransaction::signed(&fact, &next).unwrap();

        let block = block_at(5, vec![coinbase(miner, BLOCK_SUBSIDY), intro, rotate, fact]);
        let delta = simulate_block(&view, &block, 5).unwrap();
        assert_eq!(delta.publisher_events.len(), 2);
        assert!(delta.documents.iter().all(|d| d.publisher_id == 1));

        // The retired key can no longer publish in the same block
        let late = Tx::transfer(alice.address(), 3, vec![], 0).with_published_data([(DOC_ID_KEY, "late")]);
        let mut transactions = block.transactions.clone();
        transactions.push(BlockTransaction::signed(&late, &alice).unwrap());
        assert!(matches!(
            simulate_block(&view, &block_at(5, transactions), 5),
            Err(ChainError::UnknownOrExpiredKey(_))
        ));
    }
}
