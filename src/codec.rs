//! Canonical encoding of transactions and blocks.
//!
//! Hashes are computed over these bytes, so the encoding is part of consensus:
//! compact JSON, struct fields in declaration order, maps as `BTreeMap`
//! (keys in byte order), optional fields omitted when absent.

use crate::blockchain::Block;
use crate::crypto::{hash_from_str, hash_to_string, Hash};
use crate::error::ChainError;
use crate::transaction::Tx;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub fn encode_tx(tx: &Tx) -> Result<String, ChainError> {
    Ok(serde_json::to_string(tx)?)
}

pub fn decode_tx(raw: &[u8]) -> Result<Tx, ChainError> {
    serde_json::from_slice(raw).map_err(|e| ChainError::Malformed(format!("Cannot decode tx: {}", e)))
}

pub fn encode_block(block: &Block) -> Result<Vec<u8>, ChainError> {
    Ok(serde_json::to_vec(block)?)
}

pub fn decode_block(bytes: &[u8]) -> Result<Block, ChainError> {
    serde_json::from_slice(bytes)
        .map_err(|e| ChainError::Malformed(format!("Cannot decode block: {}", e)))
}

/// Archive form of a block: gzip over the canonical bytes.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>, ChainError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, ChainError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ChainError::Malformed(format!("Corrupt block archive: {}", e)))?;
    Ok(out)
}

/// Serde adapter: a [`Hash`] as unpadded base64url.
pub mod b64_hash {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hash_to_string(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        let s = String::deserialize(deserializer)?;
        hash_from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: an optional [`Hash`], with `None` written as `""`.
pub mod b64_opt_hash {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Option<Hash>, serializer: S) -> Result<S::Ok, S::Error> {
        match hash {
            Some(hash) => serializer.serialize_str(&hash_to_string(hash)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Hash>, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(None);
        }
        hash_from_str(&s).map(Some).map_err(serde::de::Error::custom)
    }
}
