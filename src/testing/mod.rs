//! Testing Utilities Module
//!
//! In-process stand-ins for the router's collaborators, so every adapter flow can run without
//! a node, an MPC cluster or a database.
//!
//! ## Submodules
//!
//! - `mock_transport` - scripted JSON-RPC / REST transport that records every request
//! - `mpc_signer` - local secp256k1 key answering as the MPC cluster
//! - `nonce_store` - in-memory swap nonce records
//! - `fixtures` - node-shaped receipts, logs, blocks and ABI return data (EVM)

pub mod mock_transport;
pub mod mpc_signer;
pub mod nonce_store;

#[cfg(feature = "evm")]
pub mod fixtures;

// Re-export commonly used items
pub use mock_transport::*;
pub use mpc_signer::*;
pub use nonce_store::*;

#[cfg(feature = "evm")]
pub use fixtures::*;
