use crate::crypto::{hash256, hash_to_string, Address, Hash};
use crate::error::ChainError;
use std::collections::{BTreeMap, HashMap};

use super::publisher::{PublisherEvent, PublisherRecord};

/// Balance, last used nonce and the free-form data slot of one address.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AccountState {
    #[serde(rename = "b")]
    pub balance: u64,
    #[serde(rename = "n")]
    pub nonce: u64,
    #[serde(rename = "d", default)]
    pub data: String,
}

impl AccountState {
    pub fn credit(&mut self, amount: u64) -> Result<(), ChainError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| ChainError::AmountOverflow(format!("balance {} + {}", self.balance, amount)))?;
        Ok(())
    }
}

pub type AccountStates = HashMap<Address, AccountState>;

/// `hash256` of the compact JSON object mapping each address string to its state.
///
/// Keys are serialized in sorted order, so the result does not depend on
/// how the map was built. An empty set hashes `{}`.
pub fn state_commitment(states: &AccountStates) -> Result<Hash, ChainError> {
    let ordered: BTreeMap<String, &AccountState> = states
        .iter()
        .map(|(address, state)| (address.to_string(), state))
        .collect();
    Ok(hash256(&serde_json::to_vec(&ordered)?))
}

/// Read access to committed chain state, as seen by the state transition function.
pub trait StateView {
    /// States of the given addresses. Unknown addresses are simply absent.
    fn account_states(&self, addresses: &[Address]) -> Result<AccountStates, ChainError>;

    /// Every validity window ever registered for `address`, in any publisher.
    fn publisher_keys(&self, address: &Address) -> Result<Vec<PublisherRecord>, ChainError>;

    /// Identifier the next introduced publisher receives.
    fn next_publisher_id(&self) -> Result<u64, ChainError>;
}

/// A bare snapshot of balances. Has no publishers.
impl StateView for AccountStates {
    fn account_states(&self, addresses: &[Address]) -> Result<AccountStates, ChainError> {
        Ok(addresses
            .iter()
            .filter_map(|a| self.get(a).map(|s| (*a, s.clone())))
            .collect())
    }

    fn publisher_keys(&self, _address: &Address) -> Result<Vec<PublisherRecord>, ChainError> {
        Ok(Vec::new())
    }

    fn next_publisher_id(&self) -> Result<u64, ChainError> {
        Ok(1)
    }
}

/// A `(publisher, key) -> value` pair taken from published data.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fact {
    pub publisher_id: u64,
    pub key: String,
    pub value: String,
}

/// Height at which a publisher last published a document id.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DocumentRecord {
    pub publisher_id: u64,
    pub document_id: String,
    pub height: u64,
}

/// Everything a block changes, computed without touching storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDelta {
    pub height: u64,
    /// Post-block state of every address the block touched.
    pub states: AccountStates,
    pub publisher_events: Vec<PublisherEvent>,
    pub facts: Vec<Fact>,
    pub documents: Vec<DocumentRecord>,
    pub state_commitment: Hash,
    pub total_fees: u64,
    pub coinbase_amount: u64,
}

impl StateDelta {
    pub fn commitment_str(&self) -> String {
        hash_to_string(&self.state_commitment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_from_str, KeyPair, Signer};

    #[test]
    fn test_empty_commitment_hashes_empty_object() {
        assert_eq!(state_commitment(&AccountStates::new()).unwrap(), hash256(b"{}"));
    }

    #[test]
    fn test_commitment_matches_known_vector() {
        let address: Address = "WAm0N27skTxuE-iqkKgTz-zJIqImheNRkuuvGj2xzz7hw".parse().unwrap();
        let mut states = AccountStates::new();
        states.insert(
            address,
            AccountState {
                balance: 1_000_000,
                nonce: 0,
                data: String::new(),
            },
        );
        assert_eq!(
            state_commitment(&states).unwrap(),
            hash_from_str("S6QfOaMbH3FoSomyAk3rMAGkXnAPjwSH2Ro-Fy8hZ6Q").unwrap()
        );
    }

    #[test]
    fn test_commitment_independent_of_insertion_order() {
        let keys: Vec<Address> = (0..8).map(|_| KeyPair::generate().address()).collect();
        let mut forward = AccountStates::new();
        let mut backward = AccountStates::new();
        for (i, key) in keys.iter().enumerate() {
            forward.insert(*key, AccountState { balance: i as u64, ..Default::default() });
        }
        for (i, key) in keys.iter().enumerate().rev() {
            backward.insert(*key, AccountState { balance: i as u64, ..Default::default() });
        }
        assert_eq!(state_commitment(&forward).unwrap(), state_commitment(&backward).unwrap());

        forward.get_mut(&keys[0]).unwrap().nonce = 1;
        assert_ne!(state_commitment(&forward).unwrap(), state_commitment(&backward).unwrap());
    }

    #[test]
    fn test_credit_overflow() {
        let mut state = AccountState { balance: u64::MAX - 1, ..Default::default() };
        state.credit(1).unwrap();
        assert!(matches!(state.credit(1), Err(ChainError::AmountOverflow(_))));
        assert_eq!(state.balance, u64::MAX);
    }

    #[test]
    fn test_snapshot_view_omits_unknown_addresses() {
        let known = KeyPair::generate().address();
        let unknown = KeyPair::generate().address();
        let mut states = AccountStates::new();
        states.insert(known, AccountState::default());
        let loaded = states.account_states(&[known, unknown]).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key(&known));
        assert!(states.publisher_keys(&known).unwrap().is_empty());
    }
}
