// core.rs splits consensus responsibilities into submodules.
pub mod chain;
pub mod genesis;
pub mod publisher;
pub mod state;
pub mod validation;

pub use chain::*;
pub use genesis::{build_genesis, genesis_block, verify_genesis};
pub use publisher::*;
pub use state::*;
pub use validation::*;
