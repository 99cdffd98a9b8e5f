//! Publisher identities and their key validity windows.
//!
//! A publisher is introduced once and can later move to a new signing
//! address. Every address it ever used keeps a half-open window
//! `[since_height, until_height)`; at most one window of a publisher is open.

use crate::crypto::Address;
use crate::error::ChainError;
use crate::transaction::DocumentPayload;
use std::collections::HashMap;

use super::state::StateView;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PublisherRecord {
    pub publisher_id: u64,
    pub display_name: String,
    pub address: Address,
    pub since_height: u64,
    /// `None` while the key is current.
    pub until_height: Option<u64>,
}

impl PublisherRecord {
    pub fn is_valid_at(&self, height: u64) -> bool {
        self.since_height <= height && self.until_height.map_or(true, |until| height < until)
    }
}

/// A publisher with every key it has used, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publisher {
    pub publisher_id: u64,
    pub display_name: String,
    pub keys: Vec<PublisherRecord>,
}

impl Publisher {
    /// The key with an open validity window, if any.
    pub fn current_address(&self) -> Option<Address> {
        self.keys
            .iter()
            .find(|k| k.until_height.is_none())
            .map(|k| k.address)
    }
}

/// Registry changes produced while applying a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherEvent {
    Introduced(PublisherRecord),
    Rotated {
        /// Old address, closed at `new_key.since_height`.
        retired: Address,
        new_key: PublisherRecord,
    },
}

/// Uncommitted view of the publisher registry during one block.
///
/// Reads fall through to the committed [`StateView`]; writes stay in memory
/// until the caller persists [`PublisherRegistry::into_events`].
pub struct PublisherRegistry<'a, V: ?Sized> {
    view: &'a V,
    keys: HashMap<Address, Vec<PublisherRecord>>,
    next_id: Option<u64>,
    events: Vec<PublisherEvent>,
}

impl<'a, V: ?Sized> Clone for PublisherRegistry<'a, V> {
    fn clone(&self) -> Self {
        PublisherRegistry {
            view: self.view,
            keys: self.keys.clone(),
            next_id: self.next_id,
            events: self.events.clone(),
        }
    }
}

impl<'a, V: StateView + ?Sized> PublisherRegistry<'a, V> {
    pub fn new(view: &'a V) -> Self {
        PublisherRegistry {
            view,
            keys: HashMap::new(),
            next_id: None,
            events: Vec::new(),
        }
    }

    fn windows(&mut self, address: &Address) -> Result<&mut Vec<PublisherRecord>, ChainError> {
        if !self.keys.contains_key(address) {
            let loaded = self.view.publisher_keys(address)?;
            self.keys.insert(*address, loaded);
        }
        self.keys
            .get_mut(address)
            .ok_or_else(|| ChainError::StorageFailure("publisher key cache".to_string()))
    }

    /// True if `address` was ever registered to any publisher.
    pub fn is_registered(&mut self, address: &Address) -> Result<bool, ChainError> {
        Ok(!self.windows(address)?.is_empty())
    }

    /// The publisher whose window for `address` contains `height`.
    pub fn resolve_publisher(&mut self, address: &Address, height: u64) -> Result<PublisherRecord, ChainError> {
        self.windows(address)?
            .iter()
            .find(|record| record.is_valid_at(height))
            .cloned()
            .ok_or_else(|| {
                ChainError::UnknownOrExpiredKey(format!("{} is not a valid publisher key at height {}", address, height))
            })
    }

    /// Registers a new publisher, or rotates an existing one to a fresh address.
    ///
    /// Returns the record now valid for the publisher.
    pub fn introduce_or_rotate(&mut self, payload: &DocumentPayload, height: u64) -> Result<PublisherRecord, ChainError> {
        match payload {
            DocumentPayload::Introduce { name, address, .. } => {
                if self.is_registered(address)? {
                    return Err(ChainError::KeyAlreadyRegistered(format!(
                        "{} already belongs to a publisher; rotation needs _newkey",
                        address
                    )));
                }
                let publisher_id = self.allocate_id()?;
                let record = PublisherRecord {
                    publisher_id,
                    display_name: name.clone(),
                    address: *address,
                    since_height: height,
                    until_height: None,
                };
                self.windows(address)?.push(record.clone());
                self.events.push(PublisherEvent::Introduced(record.clone()));
                Ok(record)
            }
            DocumentPayload::Rotate {
                name,
                address,
                new_address,
                ..
            } => {
                let current = self.resolve_publisher(address, height)?;
                if self.is_registered(new_address)? {
                    return Err(ChainError::KeyAlreadyRegistered(format!(
                        "cannot rotate to {}: already registered",
                        new_address
                    )));
                }
                for record in self.windows(address)?.iter_mut() {
                    if record.publisher_id == current.publisher_id && record.is_valid_at(height) {
                        record.until_height = Some(height);
                    }
                }
                let new_key = PublisherRecord {
                    publisher_id: current.publisher_id,
                    display_name: name.clone(),
                    address: *new_address,
                    since_height: height,
                    until_height: None,
                };
                self.windows(new_address)?.push(new_key.clone());
                self.events.push(PublisherEvent::Rotated {
                    retired: *address,
                    new_key: new_key.clone(),
                });
                Ok(new_key)
            }
            DocumentPayload::Fact { id, .. } => Err(ChainError::Malformed(format!(
                "document {} is not a publisher introduction",
                id
            ))),
        }
    }

    fn allocate_id(&mut self) -> Result<u64, ChainError> {
        let id = match self.next_id {
            Some(id) => id,
            None => self.view.next_publisher_id()?,
        };
        self.next_id = Some(
            id.checked_add(1)
                .ok_or_else(|| ChainError::AmountOverflow("publisher id".to_string()))?,
        );
        Ok(id)
    }

    pub fn events(&self) -> &[PublisherEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<PublisherEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::AccountStates;
    use crate::crypto::{KeyPair, Signer};
    use std::collections::BTreeMap;

    fn introduce(name: &str, address: Address) -> DocumentPayload {
        DocumentPayload::Introduce {
            name: name.to_string(),
            address,
            fields: BTreeMap::new(),
        }
    }

    fn rotate(name: &str, address: Address, new_address: Address) -> DocumentPayload {
        DocumentPayload::Rotate {
            name: name.to_string(),
            address,
            new_address,
            fields: BTreeMap::new(),
        }
    }

    #[test]
    fn test_introduce_then_resolve() {
        let empty = AccountStates::new();
        let mut registry = PublisherRegistry::new(&empty);
        let alice = KeyPair::generate().address();

        assert!(matches!(
            registry.resolve_publisher(&alice, 3),
            Err(ChainError::UnknownOrExpiredKey(_))
        ));
        let record = registry.introduce_or_rotate(&introduce("Alice", alice), 3).unwrap();
        assert_eq!(record.publisher_id, 1);
        assert_eq!(registry.resolve_publisher(&alice, 3).unwrap(), record);
        assert_eq!(registry.resolve_publisher(&alice, 1_000).unwrap(), record);
        assert!(registry.resolve_publisher(&alice, 2).is_err());
    }

    #[test]
    fn test_ids_are_sequential() {
        let empty = AccountStates::new();
        let mut registry = PublisherRegistry::new(&empty);
        let a = registry
            .introduce_or_rotate(&introduce("a", KeyPair::generate().address()), 1)
            .unwrap();
        let b = registry
            .introduce_or_rotate(&introduce("b", KeyPair::generate().address()), 1)
            .unwrap();
        assert_eq!((a.publisher_id, b.publisher_id), (1, 2));
        assert_eq!(registry.events().len(), 2);
    }

    #[test]
    fn test_reintroduction_rejected() {
        let empty = AccountStates::new();
        let mut registry = PublisherRegistry::new(&empty);
        let alice = KeyPair::generate().address();
        registry.introduce_or_rotate(&introduce("Alice", alice), 1).unwrap();
        assert!(matches!(
            registry.introduce_or_rotate(&introduce("Alice again", alice), 2),
            Err(ChainError::KeyAlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_rotation_moves_window() {
        let empty = AccountStates::new();
        let mut registry = PublisherRegistry::new(&empty);
        let old = KeyPair::generate().address();
        let new = KeyPair::generate().address();
        let first = registry.introduce_or_rotate(&introduce("Alice", old), 10).unwrap();
        let rotated = registry.introduce_or_rotate(&rotate("Alice B.", old, new), 20).unwrap();

        assert_eq!(rotated.publisher_id, first.publisher_id);
        assert_eq!(rotated.display_name, "Alice B.");
        // Old key still resolves for history before the rotation height
        assert_eq!(registry.resolve_publisher(&old, 19).unwrap().publisher_id, first.publisher_id);
        assert!(matches!(
            registry.resolve_publisher(&old, 20),
            Err(ChainError::UnknownOrExpiredKey(_))
        ));
        assert_eq!(registry.resolve_publisher(&new, 20).unwrap(), rotated);
        assert!(registry.resolve_publisher(&new, 19).is_err());

        match &registry.events()[1] {
            PublisherEvent::Rotated { retired, new_key } => {
                assert_eq!(*retired, old);
                assert_eq!(new_key, &rotated);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_rotation_requires_current_key_and_fresh_target() {
        let empty = AccountStates::new();
        let mut registry = PublisherRegistry::new(&empty);
        let a = KeyPair::generate().address();
        let b = KeyPair::generate().address();
        let stranger = KeyPair::generate().address();

        assert!(matches!(
            registry.introduce_or_rotate(&rotate("x", stranger, a), 1),
            Err(ChainError::UnknownOrExpiredKey(_))
        ));

        registry.introduce_or_rotate(&introduce("A", a), 1).unwrap();
        registry.introduce_or_rotate(&introduce("B", b), 1).unwrap();
        assert!(matches!(
            registry.introduce_or_rotate(&rotate("A", a, b), 2),
            Err(ChainError::KeyAlreadyRegistered(_))
        ));
        // A retired key cannot be reused either
        let c = KeyPair::generate().address();
        registry.introduce_or_rotate(&rotate("A", a, c), 3).unwrap();
        assert!(matches!(
            registry.introduce_or_rotate(&rotate("A", c, a), 4),
            Err(ChainError::KeyAlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_fact_document_is_not_an_introduction() {
        let empty = AccountStates::new();
        let mut registry = PublisherRegistry::new(&empty);
        let doc = DocumentPayload::Fact {
            id: "profile".to_string(),
            claimed_address: None,
            fields: BTreeMap::new(),
        };
        assert!(matches!(registry.introduce_or_rotate(&doc, 1), Err(ChainError::Malformed(_))));
    }

    #[test]
    fn test_window_bounds_are_half_open() {
        let record = PublisherRecord {
            publisher_id: 1,
            display_name: "x".to_string(),
            address: KeyPair::generate().address(),
            since_height: 5,
            until_height: Some(8),
        };
        assert!(!record.is_valid_at(4));
        assert!(record.is_valid_at(5));
        assert!(record.is_valid_at(7));
        assert!(!record.is_valid_at(8));
    }
}
