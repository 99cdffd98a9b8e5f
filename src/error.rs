//! Error types for wotchain

/// Every failure the ledger engine can report.
///
/// Validation errors are recoverable at the call site: a rejected transaction
/// is dropped, a rejected block leaves prior state untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("Malformed data: {0}")]
    Malformed(String),
    #[error("Hash mismatch: {0}")]
    HashMismatch(String),
    #[error("Bad signature: {0}")]
    BadSignature(String),
    #[error("Missing document id: {0}")]
    MissingDocumentId(String),
    #[error("Key mismatch: {0}")]
    KeyMismatch(String),
    #[error("Unknown or expired publisher key: {0}")]
    UnknownOrExpiredKey(String),
    #[error("Publisher key already registered: {0}")]
    KeyAlreadyRegistered(String),
    #[error("Nonce out of sync for {address}: expecting {expected}, got {got}")]
    NonceOutOfSync {
        address: String,
        expected: u64,
        got: u64,
    },
    #[error("Insufficient balance for {address}: balance is {balance}, need {amount}")]
    InsufficientBalance {
        address: String,
        balance: u64,
        amount: u64,
    },
    #[error("Exactly 1 coinbase expected in every block, got {0}")]
    InvalidCoinbaseCount(usize),
    #[error("Invalid coinbase amount: expecting {expected}, got {got}")]
    InvalidCoinbaseAmount { expected: u64, got: u64 },
    #[error("State commitment mismatch: computed {computed}, block declares {declared}")]
    StateMismatch { computed: String, declared: String },
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Invalid proof of work")]
    InvalidProofOfWork,
    #[error("Genesis block self-check failed: {0}")]
    GenesisMismatch(String),
    #[error("Mining attempt cancelled")]
    MiningCancelled,
    #[error("Mempool is full")]
    MempoolFull,
    #[error("Transaction already pending: {0}")]
    DuplicateTransaction(String),
    #[error("Storage failure: {0}")]
    StorageFailure(String),
    #[error("Cryptographic error: {0}")]
    CryptoError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::StorageFailure(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Malformed(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
