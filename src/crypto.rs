//! Cryptographic primitives for wotchain
//!
//! Two digests are consensus-critical and must never change:
//! - [`hash256`] (SHA-256) binds transaction hashes and state commitments;
//! - [`block_seal_hash`] (SHA-512/256) is block identity and proof-of-work.

use crate::error::ChainError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use sha2::{Digest, Sha256, Sha512_256};
use std::fmt;
use std::str::FromStr;

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// 256-bit digest used everywhere a hash is stored.
pub type Hash = [u8; 32];

/// Type tag leading both the string and byte form of an address.
pub const ADDRESS_PREFIX: char = 'W';

/// Length of [`address_to_bytes`] output: tag byte plus compressed key.
pub const ADDRESS_BYTES_LEN: usize = PUBLIC_KEY_SIZE + 1;

pub fn hash256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

pub fn block_seal_hash(data: &[u8]) -> Hash {
    Sha512_256::digest(data).into()
}

pub fn encode_base64url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn decode_base64url(s: &str) -> Result<Vec<u8>, ChainError> {
    URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| ChainError::Malformed(format!("Invalid base64url '{}': {}", s, e)))
}

pub fn hash_to_string(hash: &Hash) -> String {
    encode_base64url(hash)
}

pub fn hash_from_str(s: &str) -> Result<Hash, ChainError> {
    let bytes = decode_base64url(s)?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| ChainError::Malformed(format!("Hash must be 32 bytes, got {}", b.len())))
}

/// An account identifier: the compressed secp256k1 public key of its owner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; PUBLIC_KEY_SIZE]);

impl Address {
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Address(public_key.serialize())
    }

    /// Validates that the bytes are a point on the curve.
    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        let public_key = PublicKey::from_slice(bytes)
            .map_err(|e| ChainError::CryptoError(format!("Invalid public key: {}", e)))?;
        Ok(Self::from_public_key(&public_key))
    }

    pub fn key_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn public_key(&self) -> Result<PublicKey, ChainError> {
        PublicKey::from_slice(&self.0)
            .map_err(|e| ChainError::CryptoError(format!("Invalid public key: {}", e)))
    }

    /// Verifies `signature` over `message` against this address' key.
    ///
    /// Malformed signatures are errors; a well-formed signature by another key is `Ok(false)`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool, ChainError> {
        match verify_signature(&self.0, message, signature) {
            Ok(()) => Ok(true),
            Err(ChainError::BadSignature(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ADDRESS_PREFIX, encode_base64url(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s.strip_prefix(ADDRESS_PREFIX).ok_or_else(|| {
            ChainError::CryptoError(format!("Invalid address prefix in '{}'", s))
        })?;
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| ChainError::CryptoError(format!("Invalid address encoding: {}", e)))?;
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(ChainError::CryptoError(format!(
                "Address key must be {} bytes, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            )));
        }
        Address::from_key_bytes(&bytes)
    }
}

impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Raw byte form: the prefix tag followed by the compressed key.
pub fn address_to_bytes(address: &Address) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ADDRESS_BYTES_LEN);
    bytes.push(ADDRESS_PREFIX as u8);
    bytes.extend_from_slice(address.key_bytes());
    bytes
}

pub fn bytes_to_address(bytes: &[u8]) -> Result<Address, ChainError> {
    if bytes.len() != ADDRESS_BYTES_LEN {
        return Err(ChainError::CryptoError(format!(
            "Address must be {} bytes, got {}",
            ADDRESS_BYTES_LEN,
            bytes.len()
        )));
    }
    if bytes[0] != ADDRESS_PREFIX as u8 {
        return Err(ChainError::CryptoError(format!(
            "Invalid address type tag 0x{:02x}",
            bytes[0]
        )));
    }
    Address::from_key_bytes(&bytes[1..])
}

/// A signing capability. The ledger never handles key material beyond this.
pub trait Signer {
    fn address(&self) -> Address;
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, ChainError>;
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        Self::from_secret_key(secret_key)
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Creates a KeyPair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| {
            if bytes.len() != SECRET_KEY_SIZE {
                ChainError::CryptoError(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    bytes.len()
                ))
            } else {
                ChainError::CryptoError(format!("Invalid secret key bytes: {}", e))
            }
        })?;

        Ok(Self::from_secret_key(secret_key))
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Signs the SHA-256 digest of `message`; returns the compact signature.
    pub fn sign_compact(&self, message: &[u8]) -> Result<[u8; COMPACT_SIGNATURE_SIZE], ChainError> {
        let message = Message::from_digest_slice(&hash256(message))
            .map_err(|e| ChainError::CryptoError(format!("Failed to create message: {}", e)))?;
        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact())
    }
}

impl Signer for KeyPair {
    fn address(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, ChainError> {
        Ok(self.sign_compact(message)?.to_vec())
    }
}

/// Verifies an ECDSA signature given the raw public key bytes, message, and signature bytes.
///
/// Pure: malformed input is reported as an error, never a panic.
pub fn verify_signature(
    public_key_bytes: &[u8],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<(), ChainError> {
    if public_key_bytes.len() != PUBLIC_KEY_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Public key must be exactly {} bytes (compressed), got {}",
            PUBLIC_KEY_SIZE,
            public_key_bytes.len()
        )));
    }
    if signature_bytes.len() != COMPACT_SIGNATURE_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Signature must be exactly {} bytes (compact), got {}",
            COMPACT_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }

    let public_key = PublicKey::from_slice(public_key_bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid public key: {}", e)))?;

    let message = Message::from_digest_slice(&hash256(message))
        .map_err(|e| ChainError::CryptoError(format!("Failed to create message: {}", e)))?;

    let signature = Signature::from_compact(signature_bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid signature: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| ChainError::BadSignature("Signature verification failed".to_string()))
}
