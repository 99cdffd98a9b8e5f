//! Database persistence layer for wotchain

use crate::blockchain::{
    AccountState, AccountStates, ChainHead, Publisher, PublisherEvent, PublisherRecord, SealedBlock, StateDelta,
    StateView,
};
use crate::codec;
use crate::crypto::{Address, Hash};
use crate::error::ChainError;
use crate::transaction::BlockTransaction;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Abstraction for persistence backends. Implementations must apply a
/// block and its state delta atomically: either everything or nothing.
pub trait Persistence: StateView + Send + Sync {
    fn chain_head(&self) -> Result<Option<ChainHead>, ChainError>;
    fn commit_block(&self, block: &SealedBlock, delta: &StateDelta) -> Result<(), ChainError>;
    fn load_block(&self, height: u64) -> Result<Option<SealedBlock>, ChainError>;
    fn publisher(&self, publisher_id: u64) -> Result<Option<Publisher>, ChainError>;
    fn fact(&self, publisher_id: u64, key: &str) -> Result<Option<String>, ChainError>;
    fn document_height(&self, publisher_id: u64, document_id: &str) -> Result<Option<u64>, ChainError>;

    /// Queues a transaction for mining. Adding a known hash is a no-op.
    fn add_pending(&self, block_tx: &BlockTransaction) -> Result<(), ChainError>;
    fn remove_pending(&self, hashes: &[Hash]) -> Result<(), ChainError>;
    /// Queued transactions, oldest first.
    fn pending_transactions(&self) -> Result<Vec<BlockTransaction>, ChainError>;
}

fn expected_height(head: Option<ChainHead>) -> u64 {
    head.map_or(0, |h| h.height + 1)
}

fn check_commit_height(head: Option<ChainHead>, delta: &StateDelta) -> Result<(), ChainError> {
    let expected = expected_height(head);
    if delta.height != expected {
        return Err(ChainError::InvalidBlock(format!(
            "cannot commit height {} on top of height {:?}",
            delta.height,
            head.map(|h| h.height)
        )));
    }
    Ok(())
}

fn hash_from_blob(bytes: Vec<u8>) -> Result<Hash, ChainError> {
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| ChainError::StorageFailure(format!("Stored hash has {} bytes", b.len())))
}

fn address_from_column(s: &str) -> Result<Address, ChainError> {
    s.parse()
        .map_err(|e| ChainError::StorageFailure(format!("Stored address {} is invalid: {}", s, e)))
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS blocks (
        height INTEGER PRIMARY KEY,
        hash BLOB NOT NULL UNIQUE,
        ts INTEGER NOT NULL,
        data BLOB NOT NULL
    );
    CREATE TABLE IF NOT EXISTS state (
        address TEXT PRIMARY KEY,
        balance INTEGER NOT NULL,
        nonce INTEGER NOT NULL,
        data TEXT NOT NULL DEFAULT ''
    );
    CREATE TABLE IF NOT EXISTS publisher (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        created_height INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS publisher_key (
        address TEXT PRIMARY KEY,
        publisher_id INTEGER NOT NULL REFERENCES publisher(id),
        since_height INTEGER NOT NULL,
        until_height INTEGER
    );
    CREATE INDEX IF NOT EXISTS publisher_key_publisher ON publisher_key(publisher_id);
    CREATE TABLE IF NOT EXISTS fact (
        publisher_id INTEGER NOT NULL REFERENCES publisher(id),
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        height INTEGER NOT NULL,
        UNIQUE (publisher_id, key)
    );
    CREATE TABLE IF NOT EXISTS document (
        publisher_id INTEGER NOT NULL REFERENCES publisher(id),
        document_id TEXT NOT NULL,
        height INTEGER NOT NULL,
        PRIMARY KEY (publisher_id, document_id)
    );
    CREATE TABLE IF NOT EXISTS pending (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hash BLOB NOT NULL UNIQUE,
        tx TEXT NOT NULL
    );
";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::StorageFailure(format!("Failed to open database {}: {}", path, e)))?;

        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| ChainError::StorageFailure(format!("Failed to enable WAL: {}", e)))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| ChainError::StorageFailure(format!("Failed to enable foreign keys: {}", e)))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| ChainError::StorageFailure(format!("Failed to create schema: {}", e)))?;

        tracing::debug!(path, journal_mode = %mode, "database opened");
        Ok(Database { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ChainError> {
        self.conn
            .lock()
            .map_err(|_| ChainError::StorageFailure("Mutex poisoned".to_string()))
    }

    fn head_on(conn: &Connection) -> Result<Option<ChainHead>, ChainError> {
        let row = conn
            .query_row(
                "SELECT height, hash FROM blocks ORDER BY height DESC LIMIT 1",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()
            .map_err(|e| ChainError::StorageFailure(format!("Failed to query chain head: {}", e)))?;
        row.map(|(height, hash)| {
            Ok(ChainHead {
                height: height as u64,
                hash: hash_from_blob(hash)?,
            })
        })
        .transpose()
    }

    fn apply_publisher_event(tx: &rusqlite::Transaction<'_>, event: &PublisherEvent) -> Result<(), ChainError> {
        match event {
            PublisherEvent::Introduced(record) => {
                tx.execute(
                    "INSERT INTO publisher (id, name, created_height) VALUES (?1, ?2, ?3)",
                    params![record.publisher_id as i64, record.display_name, record.since_height as i64],
                )
                .map_err(|e| ChainError::StorageFailure(format!("Failed to save publisher: {}", e)))?;
            }
            PublisherEvent::Rotated { retired, new_key } => {
                tx.execute(
                    "UPDATE publisher_key SET until_height = ?1 WHERE address = ?2 AND until_height IS NULL",
                    params![new_key.since_height as i64, retired.to_string()],
                )
                .map_err(|e| ChainError::StorageFailure(format!("Failed to retire key: {}", e)))?;
                tx.execute(
                    "UPDATE publisher SET name = ?1 WHERE id = ?2",
                    params![new_key.display_name, new_key.publisher_id as i64],
                )
                .map_err(|e| ChainError::StorageFailure(format!("Failed to rename publisher: {}", e)))?;
            }
        }
        let record = match event {
            PublisherEvent::Introduced(record) => record,
            PublisherEvent::Rotated { new_key, .. } => new_key,
        };
        tx.execute(
            "INSERT INTO publisher_key (address, publisher_id, since_height, until_height) VALUES (?1, ?2, ?3, NULL)",
            params![record.address.to_string(), record.publisher_id as i64, record.since_height as i64],
        )
        .map_err(|e| ChainError::StorageFailure(format!("Failed to save publisher key: {}", e)))?;
        Ok(())
    }
}

impl StateView for Database {
    fn account_states(&self, addresses: &[Address]) -> Result<AccountStates, ChainError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached("SELECT balance, nonce, data FROM state WHERE address = ?1")
            .map_err(|e| ChainError::StorageFailure(format!("Failed to prepare query: {}", e)))?;

        let mut states = AccountStates::new();
        for address in addresses {
            let state = stmt
                .query_row(params![address.to_string()], |row| {
                    Ok(AccountState {
                        balance: row.get::<_, i64>(0)? as u64,
                        nonce: row.get::<_, i64>(1)? as u64,
                        data: row.get(2)?,
                    })
                })
                .optional()
                .map_err(|e| ChainError::StorageFailure(format!("Failed to load state of {}: {}", address, e)))?;
            if let Some(state) = state {
                states.insert(*address, state);
            }
        }
        Ok(states)
    }

    fn publisher_keys(&self, address: &Address) -> Result<Vec<PublisherRecord>, ChainError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT k.publisher_id, p.name, k.since_height, k.until_height
                 FROM publisher_key k JOIN publisher p ON p.id = k.publisher_id
                 WHERE k.address = ?1",
            )
            .map_err(|e| ChainError::StorageFailure(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![address.to_string()], |row| {
                Ok(PublisherRecord {
                    publisher_id: row.get::<_, i64>(0)? as u64,
                    display_name: row.get(1)?,
                    address: *address,
                    since_height: row.get::<_, i64>(2)? as u64,
                    until_height: row.get::<_, Option<i64>>(3)?.map(|h| h as u64),
                })
            })
            .map_err(|e| ChainError::StorageFailure(format!("Failed to query publisher keys: {}", e)))?;

        let mut records = Vec::new();
        for record in rows {
            records.push(
                record.map_err(|e| ChainError::StorageFailure(format!("Failed to load publisher key: {}", e)))?,
            );
        }
        Ok(records)
    }

    fn next_publisher_id(&self) -> Result<u64, ChainError> {
        let conn = self.lock()?;
        let next: i64 = conn
            .query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM publisher", [], |row| row.get(0))
            .map_err(|e| ChainError::StorageFailure(format!("Failed to query publisher ids: {}", e)))?;
        Ok(next as u64)
    }
}

impl Persistence for Database {
    fn chain_head(&self) -> Result<Option<ChainHead>, ChainError> {
        let conn = self.lock()?;
        Self::head_on(&conn)
    }

    fn commit_block(&self, block: &SealedBlock, delta: &StateDelta) -> Result<(), ChainError> {
        let archive = codec::compress(&block.block().encode()?)?;

        let conn = self.lock()?;
        // Dropping `tx` without commit rolls everything back
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| ChainError::StorageFailure(format!("Failed to start transaction: {}", e)))?;

        check_commit_height(Self::head_on(&tx)?, delta)?;

        tx.execute(
            "INSERT INTO blocks (height, hash, ts, data) VALUES (?1, ?2, ?3, ?4)",
            params![delta.height as i64, block.hash().to_vec(), block.block().timestamp, archive],
        )
        .map_err(|e| ChainError::StorageFailure(format!("Failed to save block: {}", e)))?;

        for (address, state) in &delta.states {
            tx.execute(
                "INSERT OR REPLACE INTO state (address, balance, nonce, data) VALUES (?1, ?2, ?3, ?4)",
                params![address.to_string(), state.balance as i64, state.nonce as i64, state.data],
            )
            .map_err(|e| ChainError::StorageFailure(format!("Failed to save state of {}: {}", address, e)))?;
        }

        for event in &delta.publisher_events {
            Self::apply_publisher_event(&tx, event)?;
        }

        for fact in &delta.facts {
            tx.execute(
                "INSERT OR REPLACE INTO fact (publisher_id, key, value, height) VALUES (?1, ?2, ?3, ?4)",
                params![fact.publisher_id as i64, fact.key, fact.value, delta.height as i64],
            )
            .map_err(|e| ChainError::StorageFailure(format!("Failed to save fact: {}", e)))?;
        }

        for document in &delta.documents {
            tx.execute(
                "INSERT OR REPLACE INTO document (publisher_id, document_id, height) VALUES (?1, ?2, ?3)",
                params![document.publisher_id as i64, document.document_id, document.height as i64],
            )
            .map_err(|e| ChainError::StorageFailure(format!("Failed to save document: {}", e)))?;
        }

        for included in &block.block().transactions {
            tx.execute("DELETE FROM pending WHERE hash = ?1", params![included.tx_hash.to_vec()])
                .map_err(|e| ChainError::StorageFailure(format!("Failed to prune pending: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| ChainError::StorageFailure(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    fn load_block(&self, height: u64) -> Result<Option<SealedBlock>, ChainError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT hash, data FROM blocks WHERE height = ?1",
                params![height as i64],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()
            .map_err(|e| ChainError::StorageFailure(format!("Failed to load block {}: {}", height, e)))?;
        drop(conn);

        let Some((hash, archive)) = row else {
            return Ok(None);
        };
        let block = codec::decode_block(&codec::decompress(&archive)?)?;
        SealedBlock::from_parts(block, hash_from_blob(hash)?).map(Some)
    }

    fn publisher(&self, publisher_id: u64) -> Result<Option<Publisher>, ChainError> {
        let conn = self.lock()?;
        let name: Option<String> = conn
            .query_row(
                "SELECT name FROM publisher WHERE id = ?1",
                params![publisher_id as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ChainError::StorageFailure(format!("Failed to load publisher: {}", e)))?;
        let Some(display_name) = name else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare("SELECT address, since_height, until_height FROM publisher_key WHERE publisher_id = ?1 ORDER BY since_height ASC")
            .map_err(|e| ChainError::StorageFailure(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![publisher_id as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            })
            .map_err(|e| ChainError::StorageFailure(format!("Failed to query publisher keys: {}", e)))?;

        let mut keys = Vec::new();
        for row in rows {
            let (address, since, until) =
                row.map_err(|e| ChainError::StorageFailure(format!("Failed to load publisher key: {}", e)))?;
            keys.push(PublisherRecord {
                publisher_id,
                display_name: display_name.clone(),
                address: address_from_column(&address)?,
                since_height: since as u64,
                until_height: until.map(|h| h as u64),
            });
        }
        Ok(Some(Publisher {
            publisher_id,
            display_name,
            keys,
        }))
    }

    fn fact(&self, publisher_id: u64, key: &str) -> Result<Option<String>, ChainError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM fact WHERE publisher_id = ?1 AND key = ?2",
            params![publisher_id as i64, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| ChainError::StorageFailure(format!("Failed to load fact: {}", e)))
    }

    fn document_height(&self, publisher_id: u64, document_id: &str) -> Result<Option<u64>, ChainError> {
        let conn = self.lock()?;
        let height: Option<i64> = conn
            .query_row(
                "SELECT height FROM document WHERE publisher_id = ?1 AND document_id = ?2",
                params![publisher_id as i64, document_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ChainError::StorageFailure(format!("Failed to load document: {}", e)))?;
        Ok(height.map(|h| h as u64))
    }

    fn add_pending(&self, block_tx: &BlockTransaction) -> Result<(), ChainError> {
        let json = serde_json::to_string(block_tx)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO pending (hash, tx) VALUES (?1, ?2)",
            params![block_tx.tx_hash.to_vec(), json],
        )
        .map_err(|e| ChainError::StorageFailure(format!("Failed to queue transaction: {}", e)))?;
        Ok(())
    }

    fn remove_pending(&self, hashes: &[Hash]) -> Result<(), ChainError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached("DELETE FROM pending WHERE hash = ?1")
            .map_err(|e| ChainError::StorageFailure(format!("Failed to prepare query: {}", e)))?;
        for hash in hashes {
            stmt.execute(params![hash.to_vec()])
                .map_err(|e| ChainError::StorageFailure(format!("Failed to drop pending transaction: {}", e)))?;
        }
        Ok(())
    }

    fn pending_transactions(&self) -> Result<Vec<BlockTransaction>, ChainError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached("SELECT tx FROM pending ORDER BY id ASC")
            .map_err(|e| ChainError::StorageFailure(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| ChainError::StorageFailure(format!("Failed to query pending: {}", e)))?;

        let mut pending = Vec::new();
        for row in rows {
            let json = row.map_err(|e| ChainError::StorageFailure(format!("Failed to load pending: {}", e)))?;
            let block_tx = serde_json::from_str(&json)
                .map_err(|e| ChainError::StorageFailure(format!("Stored pending transaction is invalid: {}", e)))?;
            pending.push(block_tx);
        }
        Ok(pending)
    }
}

#[derive(Clone, Default)]
struct MemoryChain {
    blocks: Vec<SealedBlock>,
    states: AccountStates,
    publishers: BTreeMap<u64, String>,
    keys: HashMap<Address, Vec<PublisherRecord>>,
    facts: HashMap<(u64, String), String>,
    documents: HashMap<(u64, String), u64>,
    pending: Vec<BlockTransaction>,
}

impl MemoryChain {
    fn head(&self) -> Option<ChainHead> {
        self.blocks.last().map(|b| ChainHead {
            height: (self.blocks.len() - 1) as u64,
            hash: b.hash(),
        })
    }

    fn with_current_name(&self, mut record: PublisherRecord) -> PublisherRecord {
        if let Some(name) = self.publishers.get(&record.publisher_id) {
            record.display_name = name.clone();
        }
        record
    }

    fn apply(&mut self, block: &SealedBlock, delta: &StateDelta) -> Result<(), ChainError> {
        check_commit_height(self.head(), delta)?;
        if self.blocks.iter().any(|b| b.hash() == block.hash()) {
            return Err(ChainError::StorageFailure(format!("Block {} already stored", block.hash_str())));
        }
        self.blocks.push(block.clone());
        for (address, state) in &delta.states {
            self.states.insert(*address, state.clone());
        }
        for event in &delta.publisher_events {
            let record = match event {
                PublisherEvent::Introduced(record) => record,
                PublisherEvent::Rotated { retired, new_key } => {
                    for key in self.keys.entry(*retired).or_default() {
                        if key.until_height.is_none() {
                            key.until_height = Some(new_key.since_height);
                        }
                    }
                    new_key
                }
            };
            self.publishers.insert(record.publisher_id, record.display_name.clone());
            self.keys.entry(record.address).or_default().push(record.clone());
        }
        for fact in &delta.facts {
            self.facts
                .insert((fact.publisher_id, fact.key.clone()), fact.value.clone());
        }
        for document in &delta.documents {
            self.documents
                .insert((document.publisher_id, document.document_id.clone()), document.height);
        }
        let included: Vec<Hash> = block.block().transactions.iter().map(|t| t.tx_hash).collect();
        self.pending.retain(|p| !included.contains(&p.tx_hash));
        Ok(())
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    inner: Arc<Mutex<MemoryChain>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryChain>, ChainError> {
        self.inner
            .lock()
            .map_err(|_| ChainError::StorageFailure("Mutex poisoned".to_string()))
    }
}

impl StateView for InMemoryPersistence {
    fn account_states(&self, addresses: &[Address]) -> Result<AccountStates, ChainError> {
        self.lock()?.states.account_states(addresses)
    }

    fn publisher_keys(&self, address: &Address) -> Result<Vec<PublisherRecord>, ChainError> {
        let chain = self.lock()?;
        Ok(chain
            .keys
            .get(address)
            .into_iter()
            .flatten()
            .map(|r| chain.with_current_name(r.clone()))
            .collect())
    }

    fn next_publisher_id(&self) -> Result<u64, ChainError> {
        Ok(self.lock()?.publishers.keys().next_back().map_or(1, |id| id + 1))
    }
}

impl Persistence for InMemoryPersistence {
    fn chain_head(&self) -> Result<Option<ChainHead>, ChainError> {
        Ok(self.lock()?.head())
    }

    fn commit_block(&self, block: &SealedBlock, delta: &StateDelta) -> Result<(), ChainError> {
        let mut chain = self.lock()?;
        let mut next = chain.clone();
        next.apply(block, delta)?;
        *chain = next;
        Ok(())
    }

    fn load_block(&self, height: u64) -> Result<Option<SealedBlock>, ChainError> {
        let chain = self.lock()?;
        Ok(usize::try_from(height)
            .ok()
            .and_then(|h| chain.blocks.get(h))
            .cloned())
    }

    fn publisher(&self, publisher_id: u64) -> Result<Option<Publisher>, ChainError> {
        let chain = self.lock()?;
        let Some(display_name) = chain.publishers.get(&publisher_id).cloned() else {
            return Ok(None);
        };
        let mut keys: Vec<PublisherRecord> = chain
            .keys
            .values()
            .flatten()
            .filter(|r| r.publisher_id == publisher_id)
            .map(|r| chain.with_current_name(r.clone()))
            .collect();
        keys.sort_by_key(|r| r.since_height);
        Ok(Some(Publisher {
            publisher_id,
            display_name,
            keys,
        }))
    }

    fn fact(&self, publisher_id: u64, key: &str) -> Result<Option<String>, ChainError> {
        Ok(self.lock()?.facts.get(&(publisher_id, key.to_string())).cloned())
    }

    fn document_height(&self, publisher_id: u64, document_id: &str) -> Result<Option<u64>, ChainError> {
        Ok(self
            .lock()?
            .documents
            .get(&(publisher_id, document_id.to_string()))
            .copied())
    }

    fn add_pending(&self, block_tx: &BlockTransaction) -> Result<(), ChainError> {
        let mut chain = self.lock()?;
        if !chain.pending.iter().any(|p| p.tx_hash == block_tx.tx_hash) {
            chain.pending.push(block_tx.clone());
        }
        Ok(())
    }

    fn remove_pending(&self, hashes: &[Hash]) -> Result<(), ChainError> {
        self.lock()?.pending.retain(|p| !hashes.contains(&p.tx_hash));
        Ok(())
    }

    fn pending_transactions(&self) -> Result<Vec<BlockTransaction>, ChainError> {
        Ok(self.lock()?.pending.clone())
    }
}
