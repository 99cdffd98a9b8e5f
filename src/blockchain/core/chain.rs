use crate::codec::{self, b64_hash, b64_opt_hash};
use crate::crypto::{block_seal_hash, hash_to_string, Hash};
use crate::error::ChainError;
use crate::transaction::BlockTransaction;

/// Smallest-unit count of one coin (4 decimals).
pub const ONE_COIN: u64 = 10_000;

/// Constant block reward. A halving schedule would change only [`subsidy_at`].
pub const BLOCK_SUBSIDY: u64 = 100 * ONE_COIN;

/// Required leading zero bits of every block seal hash.
pub const GENESIS_DIFFICULTY_BITS: u32 = 8;

pub fn subsidy_at(_height: u64) -> u64 {
    BLOCK_SUBSIDY
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockFlag {
    Genesis,
}

/// A block in canonical form. Its hash is derived, see [`SealedBlock`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    /// `None` only for the genesis block.
    #[serde(rename = "p", with = "b64_opt_hash")]
    pub previous_hash: Option<Hash>,
    #[serde(rename = "T")]
    pub timestamp: i64,
    #[serde(rename = "n")]
    pub nonce: u64,
    #[serde(rename = "f", default)]
    pub flags: Vec<BlockFlag>,
    #[serde(rename = "t")]
    pub transactions: Vec<BlockTransaction>,
    #[serde(rename = "s", with = "b64_hash")]
    pub state_commitment: Hash,
}

impl Block {
    /// Unsealed candidate stamped with the current UTC time.
    pub fn new(previous_hash: Hash, transactions: Vec<BlockTransaction>) -> Self {
        Block {
            previous_hash: Some(previous_hash),
            timestamp: chrono::Utc::now().timestamp(),
            nonce: 0,
            flags: Vec::new(),
            transactions,
            state_commitment: [0u8; 32],
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.flags.contains(&BlockFlag::Genesis)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ChainError> {
        codec::encode_block(self)
    }

    /// Block identity: `block_seal_hash` over the canonical encoding, nonce included.
    pub fn seal_hash(&self) -> Result<Hash, ChainError> {
        Ok(block_seal_hash(&self.encode()?))
    }
}

/// A block together with its cached identity hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlock {
    block: Block,
    hash: Hash,
}

impl SealedBlock {
    pub fn seal(block: Block) -> Result<Self, ChainError> {
        let hash = block.seal_hash()?;
        Ok(SealedBlock { block, hash })
    }

    /// Rebuilds a sealed block from storage, checking the recorded hash.
    pub fn from_parts(block: Block, hash: Hash) -> Result<Self, ChainError> {
        let sealed = Self::seal(block)?;
        if sealed.hash != hash {
            return Err(ChainError::HashMismatch(format!(
                "Block hash doesn't match block data: expecting {}, got {}",
                hash_to_string(&hash),
                sealed.hash_str()
            )));
        }
        Ok(sealed)
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn hash_str(&self) -> String {
        hash_to_string(&self.hash)
    }

    pub fn into_block(self) -> Block {
        self.block
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHead {
    pub height: u64,
    pub hash: Hash,
}

/// Consensus parameters a node is started with.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub difficulty_bits: u32,
    pub genesis: Block,
    /// When set, the genesis block must hash to exactly this value.
    pub expected_genesis_hash: Option<Hash>,
}

impl ChainParams {
    /// Chain rooted at the hard-coded genesis block.
    pub fn mainnet() -> Result<Self, ChainError> {
        Ok(ChainParams {
            difficulty_bits: GENESIS_DIFFICULTY_BITS,
            genesis: super::genesis::genesis_block()?,
            expected_genesis_hash: Some(super::genesis::genesis_hash()?),
        })
    }

    /// Chain rooted at a locally built genesis, see [`super::genesis::build_genesis`].
    pub fn devnet(genesis: SealedBlock, difficulty_bits: u32) -> Self {
        ChainParams {
            difficulty_bits,
            expected_genesis_hash: Some(genesis.hash()),
            genesis: genesis.into_block(),
        }
    }
}
