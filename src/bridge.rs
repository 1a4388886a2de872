//! Bridge capability interface
//!
//! Every chain adapter is assembled from small role traits:
//!
//! - [`ConfigHolder`]: accessors over the adapter's chain, token and gateway state
//! - [`ConfigLoader`]: fatal init steps plus soft-fail reload
//! - [`MpcSignable`]: message-hash computation, MPC delegation, signature verification
//! - [`NonceSetter`]: pool nonce reads and the local ratchet (account chains only)
//!
//! [`Bridge`] is the superset the registry holds as `Arc<dyn Bridge>`. Shared state lives in
//! [`ChainState`], which each adapter embeds and exposes through [`ConfigHolder::state`].

use crate::config::{ChainConfig, GatewayConfig, TokenConfig};
use crate::error::{SwapError, SwapResult};
use crate::gateway::GatewayPool;
use crate::nonce::NonceManager;
use crate::types::{BuildTxArgs, RegisterArgs, SwapTxInfo, TxStatus, VerifyArgs};
use alloy::consensus::{TxEnvelope, TypedTransaction};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

// ============================================================================
// Token entries
// ============================================================================

/// Token config slot of one contract address
///
/// Removal leaves a `Removed` marker instead of deleting the key, so a token that disappears on
/// reload is distinguishable from one that was never configured.
#[derive(Debug, Clone)]
pub enum TokenEntry {
    Active(Arc<TokenConfig>),
    Removed,
}

impl TokenEntry {
    pub fn active(&self) -> Option<&Arc<TokenConfig>> {
        match self {
            TokenEntry::Active(cfg) => Some(cfg),
            TokenEntry::Removed => None,
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, TokenEntry::Removed)
    }
}

// ============================================================================
// Shared chain state
// ============================================================================

/// Config state every adapter embeds
///
/// One lock per logical map; nothing here is held across network calls.
#[derive(Debug)]
pub struct ChainState {
    chain_id: String,
    gateway: Arc<GatewayPool>,
    chain_config: RwLock<Option<Arc<ChainConfig>>>,
    tokens: RwLock<HashMap<String, TokenEntry>>,
}

impl ChainState {
    pub fn new(chain_id: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            gateway: Arc::new(GatewayPool::new(chain_id, GatewayConfig::default())),
            chain_config: RwLock::new(None),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn gateway(&self) -> Arc<GatewayPool> {
        self.gateway.clone()
    }

    pub async fn chain_config(&self) -> Option<Arc<ChainConfig>> {
        self.chain_config.read().await.clone()
    }

    pub async fn set_chain_config(&self, cfg: ChainConfig) {
        *self.chain_config.write().await = Some(Arc::new(cfg));
    }

    pub async fn token_entry(&self, address: &str) -> Option<TokenEntry> {
        self.tokens.read().await.get(&address.to_lowercase()).cloned()
    }

    pub async fn token_config(&self, address: &str) -> Option<Arc<TokenConfig>> {
        self.token_entry(address)
            .await
            .and_then(|entry| entry.active().cloned())
    }

    pub async fn set_token_config(&self, address: &str, cfg: TokenConfig) {
        let key = address.to_lowercase();
        let mut tokens = self.tokens.write().await;
        if matches!(tokens.get(&key), Some(TokenEntry::Removed)) {
            info!(
                chain_id = %self.chain_id,
                token = %key,
                token_id = %cfg.token_id,
                "Restore removed token config"
            );
        }
        tokens.insert(key, TokenEntry::Active(Arc::new(cfg)));
    }

    /// Tombstone the entry; unknown addresses stay unknown
    pub async fn remove_token_config(&self, address: &str) {
        let key = address.to_lowercase();
        let mut tokens = self.tokens.write().await;
        if let Some(entry) = tokens.get_mut(&key) {
            *entry = TokenEntry::Removed;
        }
    }

    /// Active token configs, for router-override discovery
    pub async fn active_tokens(&self) -> Vec<Arc<TokenConfig>> {
        self.tokens
            .read()
            .await
            .values()
            .filter_map(|entry| entry.active().cloned())
            .collect()
    }
}

// ============================================================================
// Transactions in flight
// ============================================================================

/// Unsigned destination-chain transaction
#[derive(Debug, Clone, PartialEq)]
pub enum RawTx {
    Evm(TypedTransaction),
}

/// Signed transaction ready for broadcast
#[derive(Debug, Clone, PartialEq)]
pub enum SignedTx {
    Evm(TxEnvelope),
}

/// One discovered swap-out candidate and its verification outcome
#[derive(Debug, Clone, PartialEq)]
pub struct SwapCandidate {
    pub info: SwapTxInfo,
    pub error: Option<SwapError>,
}

impl SwapCandidate {
    pub fn ok(info: SwapTxInfo) -> Self {
        Self { info, error: None }
    }

    pub fn failed(info: SwapTxInfo, error: SwapError) -> Self {
        Self {
            info,
            error: Some(error),
        }
    }
}

// ============================================================================
// Role traits
// ============================================================================

/// Accessors over the adapter's held config
#[async_trait]
pub trait ConfigHolder: Send + Sync {
    fn state(&self) -> &ChainState;

    fn chain_id(&self) -> &str {
        self.state().chain_id()
    }

    fn gateway(&self) -> Arc<GatewayPool> {
        self.state().gateway()
    }

    async fn chain_config(&self) -> Option<Arc<ChainConfig>> {
        self.state().chain_config().await
    }

    async fn token_config(&self, address: &str) -> Option<Arc<TokenConfig>> {
        self.state().token_config(address).await
    }

    async fn token_entry(&self, address: &str) -> Option<TokenEntry> {
        self.state().token_entry(address).await
    }

    async fn remove_token_config(&self, address: &str) {
        info!(chain_id = %self.chain_id(), token = %address, "Remove token config");
        self.state().remove_token_config(address).await
    }

    /// Replace the gateway wholesale (hot reload)
    fn set_gateway_config(&self, cfg: GatewayConfig) {
        self.gateway().replace_config(cfg)
    }
}

/// Startup and reload of chain, token and gateway config
///
/// `init_*` cross-check static config against live contract state and return an error on any
/// mismatch; nothing is committed unless every check passed. The `reload_*` variants run the
/// same checks but only log failures, keeping the previous state.
#[async_trait]
pub trait ConfigLoader: ConfigHolder {
    async fn init_gateway_config(&self, cfg: GatewayConfig) -> eyre::Result<()>;

    async fn init_chain_config(&self, cfg: ChainConfig) -> eyre::Result<()>;

    async fn init_token_config(&self, cfg: TokenConfig) -> eyre::Result<()>;

    /// Read MPC, factory and wrapped-native addresses of a router contract into the registry
    async fn init_router_info(&self, router_contract: &str) -> eyre::Result<()>;

    /// Runs once after chain config is set
    async fn init_after_config(&self) -> eyre::Result<()>;

    async fn reload_chain_config(&self, cfg: ChainConfig) -> bool {
        let chain_id = cfg.chain_id;
        match self.init_chain_config(cfg).await {
            Ok(()) => true,
            Err(e) => {
                warn!(chain_id = %chain_id, error = %e, "[reload] keep previous chain config");
                false
            }
        }
    }

    async fn reload_token_config(&self, cfg: TokenConfig) -> bool {
        let token_id = cfg.token_id.clone();
        match self.init_token_config(cfg).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    chain_id = %self.chain_id(),
                    token_id = %token_id,
                    error = %e,
                    "[reload] keep previous token config"
                );
                false
            }
        }
    }
}

/// MPC signing of built transactions
#[async_trait]
pub trait MpcSignable: Send + Sync {
    /// Sign through the MPC cluster; returns the signed tx and its hash
    async fn mpc_sign_transaction(
        &self,
        raw_tx: &RawTx,
        args: &BuildTxArgs,
    ) -> SwapResult<(SignedTx, String)>;

    /// Check that `msg_hashes` is exactly the signing hash of `raw_tx`
    fn verify_msg_hash(&self, raw_tx: &RawTx, msg_hashes: &[String]) -> SwapResult<()>;
}

/// Nonce handling of account chains
#[async_trait]
pub trait NonceSetter: Send + Sync {
    fn nonces(&self) -> &NonceManager;

    /// Pending nonce reported by the gateway
    async fn get_pool_nonce(&self, address: &str) -> SwapResult<u64>;

    async fn set_nonce(&self, address: &str, value: u64) {
        self.nonces().set_nonce(address, value).await
    }

    async fn adjust_nonce(&self, address: &str, pool_nonce: u64) -> u64 {
        self.nonces().adjust_nonce(address, pool_nonce).await
    }

    /// Seed the local ratchet from the stored next nonce and the pending pool nonce
    async fn init_swap_nonce(&self, address: &str, stored: u64) -> u64 {
        let pending = self.get_pool_nonce(address).await.ok();
        self.nonces().init_swap_nonce(address, stored, pending).await
    }

    fn recycle_swap_nonce(&self, address: &str, nonce: u64) {
        self.nonces().recycle_swap_nonce(address, nonce)
    }
}

/// Full capability set of a chain adapter
#[async_trait]
pub trait Bridge: ConfigLoader + MpcSignable {
    fn as_nonce_setter(&self) -> Option<&dyn NonceSetter> {
        None
    }

    /// Address format and checksum validation
    fn is_valid_address(&self, address: &str) -> bool;

    async fn get_latest_block_number(&self) -> SwapResult<u64>;

    /// Latest block of one endpoint (gateway reordering)
    async fn get_latest_block_number_of(&self, url: &str) -> SwapResult<u64>;

    async fn get_transaction_status(&self, tx_hash: &str) -> SwapResult<TxStatus>;

    /// Discover every swap-out in a transaction, one candidate per event
    ///
    /// Never fails as a whole: per-candidate errors are reported in [`SwapCandidate::error`].
    async fn register_swap(&self, tx_hash: &str, args: &RegisterArgs) -> Vec<SwapCandidate>;

    /// Re-verify the swap-out at one known log index
    async fn verify_transaction(&self, tx_hash: &str, args: &VerifyArgs) -> SwapResult<SwapTxInfo>;

    /// Build the destination transaction; defaults chosen are written back into `args`
    async fn build_raw_transaction(&self, args: &mut BuildTxArgs) -> SwapResult<RawTx>;

    /// Broadcast; re-sending an already known tx is not an error
    async fn send_transaction(&self, signed_tx: &SignedTx) -> SwapResult<String>;
}
