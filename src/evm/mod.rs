//! EVM Chain Adapter
//!
//! Implements the bridge capability set for EVM-compatible chains (Ethereum, BSC, Polygon,
//! etc.) against the anySwap router contracts.
//!
//! ## Submodules
//!
//! - `address` - EIP-55 validation, MPC key binding, EIP-1167 proxy detection
//! - `build` - swap-in transaction construction, gas and nonce policy
//! - `client` - JSON-RPC reads through the gateway pool
//! - `contracts` - router and token bindings using alloy sol! macro
//! - `init` - startup/reload cross-checks against live contract state
//! - `register` - discovery of every swap-out in a transaction
//! - `send` - broadcast to every endpoint
//! - `sign` - MPC signing and signature recovery
//! - `verify` - the swap-out verification state machine

pub mod address;
pub mod build;
pub mod client;
pub mod contracts;
pub mod init;
pub mod register;
pub mod send;
pub mod sign;
pub mod verify;

use crate::bridge::{Bridge, ChainState, ConfigHolder, NonceSetter, RawTx, SignedTx, SwapCandidate};
use crate::config::{ExtraConfig, TokenConfig};
use crate::error::{SwapError, SwapResult};
use crate::gateway::GatewayPool;
use crate::nonce::NonceManager;
use crate::registry::{BridgeContext, Registry};
use crate::types::{BuildTxArgs, ChainId, RegisterArgs, SwapTxInfo, TxStatus, VerifyArgs};
use address::{BoundedCache, MAX_CONTRACT_CODE_HASHES, MAX_EIP1167_PROXIES};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

pub use address::{is_valid_address, verify_mpc_pubkey};
pub use client::{RpcBlock, RpcLog, RpcReceipt, RpcTransaction};
pub use contracts::SwapoutEvent;

/// Bridge adapter of one EVM chain
pub struct EvmBridge {
    chain_id: ChainId,
    pub(crate) state: ChainState,
    pub(crate) nonces: NonceManager,
    pub(crate) ctx: BridgeContext,
    pub(crate) eip1167_proxies: BoundedCache<Address, Address>,
    pub(crate) code_hashes: BoundedCache<Address, B256>,
    /// Last built nonce per sender, for the sanity window
    pub(crate) built_nonces: Mutex<HashMap<String, u64>>,
    /// Self-adjusting gas price ceiling used when no max is configured
    pub(crate) auto_max_gas_price: Mutex<Option<u128>>,
}

impl std::fmt::Debug for EvmBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmBridge")
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl EvmBridge {
    pub fn new(chain_id: &ChainId, ctx: BridgeContext) -> Self {
        let key = chain_id.to_string();
        Self {
            chain_id: *chain_id,
            state: ChainState::new(&key),
            nonces: NonceManager::new(&key),
            ctx,
            eip1167_proxies: BoundedCache::new(MAX_EIP1167_PROXIES),
            code_hashes: BoundedCache::new(MAX_CONTRACT_CODE_HASHES),
            built_nonces: Mutex::new(HashMap::new()),
            auto_max_gas_price: Mutex::new(None),
        }
    }

    pub fn chain_id_value(&self) -> ChainId {
        self.chain_id
    }

    pub(crate) fn chain_id_str(&self) -> &str {
        self.state.chain_id()
    }

    pub(crate) fn gateway_pool(&self) -> Arc<GatewayPool> {
        self.state.gateway()
    }

    /// Registry handle; a dropped registry leaves nothing to route to
    pub(crate) fn registry(&self) -> SwapResult<Arc<Registry>> {
        self.ctx.registry().ok_or(SwapError::NoBridgeForChainId)
    }

    /// Operational switches, defaults when detached from a registry
    pub(crate) async fn extra(&self) -> Arc<ExtraConfig> {
        match self.ctx.registry() {
            Some(registry) => registry.extra().await,
            None => Arc::new(ExtraConfig::default()),
        }
    }

    /// Router serving a token: its own override, else the chain's router
    pub(crate) async fn router_contract_of(&self, token: &TokenConfig) -> Option<String> {
        match &token.router_contract {
            Some(router) if !router.is_empty() => Some(router.clone()),
            _ => self.chain_config().await.map(|cfg| cfg.router_contract.clone()),
        }
    }

    /// Chain router plus every token-level router override
    pub(crate) async fn router_contracts(&self) -> Vec<Address> {
        let mut routers = Vec::new();
        if let Some(cfg) = self.chain_config().await {
            if let Ok(router) = Address::from_str(&cfg.router_contract) {
                routers.push(router);
            }
        }
        for token in self.state.active_tokens().await {
            if let Some(router) = token.router_contract.as_deref() {
                if let Ok(router) = Address::from_str(router) {
                    if !routers.contains(&router) {
                        routers.push(router);
                    }
                }
            }
        }
        routers
    }
}

// ============================================================================
// Capability set
// ============================================================================

impl ConfigHolder for EvmBridge {
    fn state(&self) -> &ChainState {
        &self.state
    }
}

#[async_trait]
impl NonceSetter for EvmBridge {
    fn nonces(&self) -> &NonceManager {
        &self.nonces
    }

    async fn get_pool_nonce(&self, address: &str) -> SwapResult<u64> {
        self.ctx
            .retry
            .run("get_pool_nonce", || self.get_pool_nonce_at(address, "pending"))
            .await
    }
}

#[async_trait]
impl Bridge for EvmBridge {
    fn as_nonce_setter(&self) -> Option<&dyn NonceSetter> {
        Some(self)
    }

    fn is_valid_address(&self, address: &str) -> bool {
        is_valid_address(address)
    }

    async fn get_latest_block_number(&self) -> SwapResult<u64> {
        self.latest_block_number().await
    }

    async fn get_latest_block_number_of(&self, url: &str) -> SwapResult<u64> {
        self.latest_block_number_of(url).await
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> SwapResult<TxStatus> {
        let receipt = self.get_transaction_receipt(tx_hash).await?;
        let height = receipt.block_height();
        if height == 0 {
            return Err(SwapError::TxNotFound);
        }
        let latest = self.latest_block_number().await?;
        if let Some(registry) = self.ctx.registry() {
            registry.set_latest_block(self.chain_id_str(), latest);
        }
        let block_time = match self.get_block_by_number(Some(height)).await {
            Ok(block) => block.timestamp.to::<u64>(),
            Err(_) => 0,
        };
        Ok(TxStatus {
            confirmations: latest.saturating_sub(height),
            block_height: height,
            block_hash: receipt
                .block_hash
                .map(|hash| format!("{:#x}", hash))
                .unwrap_or_default(),
            block_time,
        })
    }

    async fn register_swap(&self, tx_hash: &str, args: &RegisterArgs) -> Vec<SwapCandidate> {
        self.register_router_swap(tx_hash, args).await
    }

    async fn verify_transaction(&self, tx_hash: &str, args: &VerifyArgs) -> SwapResult<SwapTxInfo> {
        self.verify_router_swap_tx(tx_hash, args).await
    }

    async fn build_raw_transaction(&self, args: &mut BuildTxArgs) -> SwapResult<RawTx> {
        self.build_router_swap_tx(args).await
    }

    async fn send_transaction(&self, signed_tx: &SignedTx) -> SwapResult<String> {
        self.send_signed_tx(signed_tx).await
    }
}
