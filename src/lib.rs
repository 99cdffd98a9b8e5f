//! wotchain - an account-based proof-of-work ledger with a publisher registry
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Blockchain
//! - [`blockchain`] - Blocks, account state, publisher registry and the state transition
//! - [`transaction`] - Transaction types and stateless verification
//! - [`codec`] - Canonical encoding that hashes are computed over
//! - [`mempool`] - Pending transactions
//!
//! ## Consensus
//! - [`miner`] - Proof-of-work sealing and block assembly
//!
//! ## Cryptography
//! - [`crypto`] - Hashes, addresses and signatures (secp256k1)
//!
//! ## State Management
//! - [`persistence`] - Storage backends (SQLite and in-memory)
//!
//! ## Node
//! - [`node`] - Chain engine and the background miner
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Blockchain
// ============================================================================
pub mod blockchain;
pub mod codec;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod miner;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Node
// ============================================================================
pub mod node;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
