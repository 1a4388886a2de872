//! Swap-Router: Cross-Chain Swap Router Core
//!
//! This crate holds the chain-facing half of a cross-chain asset router: it verifies swap-outs
//! on source chains and builds, signs and broadcasts the matching swap-ins on destination chains.
//!
//! - **Bridge Capability Set** - one trait family every chain adapter implements
//! - **Value Engine** - decimal conversion, fees and swap bounds over `U256`
//! - **Gateway Layer** - first-success, aggregate and broadcast fan-out over RPC endpoints
//! - **Nonce Allocation** - pool-adjusted or locally allocated account nonces
//! - **Registry** - process-wide config, bridges and router identity, with hot reload
//! - **EVM Module** - anySwap router verification, transaction build, MPC sign and send
//! - **BTC Module** - UTXO chain reads through an Esplora REST indexer
//! - **Testing Module** - scripted transport, local MPC signer and in-memory nonce store
//!
//! ## Feature Flags
//!
//! - `evm` - Enable the EVM chain adapter (default)
//! - `btc` - Enable the UTXO chain adapter (default)
//! - `testing` - Enable in-memory test doubles
//! - `full` - Enable all features

// Core modules (always available)
pub mod bridge;
pub mod config;
pub mod error;
pub mod gateway;
pub mod mpc;
pub mod nonce;
pub mod registry;
pub mod reload;
pub mod retry;
pub mod rpc;
pub mod tokens;
pub mod types;

// Chain-specific modules (feature-gated)
#[cfg(feature = "evm")]
pub mod evm;

#[cfg(feature = "btc")]
pub mod btc;

// Testing utilities (feature-gated)
#[cfg(feature = "testing")]
pub mod testing;

// Re-export commonly used items at the crate root
pub use bridge::{
    Bridge, ConfigHolder, ConfigLoader, MpcSignable, NonceSetter, RawTx, SignedTx, SwapCandidate,
};
pub use config::{ChainConfig, ExtraConfig, GatewayConfig, RouterConfig, SwapConfig, TokenConfig};
pub use error::{ErrorClass, SwapError, SwapResult};
pub use gateway::GatewayPool;
pub use mpc::MpcSigner;
pub use nonce::{NonceManager, NonceStore};
pub use registry::{
    BridgeContext, BridgeFactory, ConfigSource, DefaultBridgeFactory, Registry, StaticConfigSource,
};
pub use reload::{spawn_background_tasks, BackgroundTasks};
pub use retry::RetryConfig;
pub use rpc::{HttpTransport, RpcTransport};
pub use tokens::{calc_swap_value, check_token_swap_value, convert_token_value, to_bits, FeePolicy};
pub use types::{
    BuildTxArgs, ChainId, LogIndex, RegisterArgs, SwapInfo, SwapTxInfo, SwapType, TxStatus,
    VerifyArgs,
};
