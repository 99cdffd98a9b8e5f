// Thin re-export module: implementation is in `blockchain/core.rs`, split into
// chain types, account state, the publisher registry and block validation.

pub mod core;
pub use core::*;
