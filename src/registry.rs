//! Router registry
//!
//! Explicitly constructed join table of the router: chain id → bridge, (token id, chain id) →
//! multichain token address, router contract → router info, MPC address → public key and
//! (token id, from chain, to chain) → swap config.
//!
//! [`Registry::init`] fails fast on misconfiguration. [`Registry::reload`] runs the same checks
//! but only logs failures and keeps the previous state; it reports whether everything applied.

use crate::bridge::Bridge;
use crate::config::{ChainConfig, ExtraConfig, GatewayConfig, RouterConfig, SwapConfig, TokenConfig};
use crate::mpc::MpcSigner;
use crate::nonce::NonceStore;
use crate::retry::RetryConfig;
use crate::rpc::RpcTransport;
use crate::tokens::Blacklist;
use crate::types::{ChainId, RouterInfo, SwapType};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// Wildcard chain id in swap config keys
const ANY_CHAIN_ID: &str = "0";

// ============================================================================
// Config source
// ============================================================================

/// Where chain, token and swap configs come from
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Re-read the backing store; called at the start of every reload
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn identifier(&self) -> String;

    async fn swap_type(&self) -> SwapType;

    async fn extra_config(&self) -> ExtraConfig;

    async fn all_chain_ids(&self) -> Result<Vec<ChainId>>;

    async fn all_token_ids(&self) -> Result<Vec<String>>;

    async fn chain_config(&self, chain_id: &ChainId) -> Result<Option<ChainConfig>>;

    async fn gateway_config(&self, chain_id: &ChainId) -> Result<Option<GatewayConfig>>;

    async fn token_config(&self, token_id: &str, chain_id: &ChainId) -> Result<Option<TokenConfig>>;

    /// Contract address representing `token_id` on `chain_id`
    async fn multichain_token(&self, token_id: &str, chain_id: &ChainId) -> Result<Option<String>> {
        Ok(self
            .token_config(token_id, chain_id)
            .await?
            .map(|cfg| cfg.contract_address))
    }

    async fn swap_configs(&self, token_id: &str) -> Result<Vec<SwapConfig>>;

    async fn mpc_public_key(&self, mpc_address: &str) -> Result<Option<String>>;
}

/// [`ConfigSource`] backed by a [`RouterConfig`], optionally re-read from its file on refresh
#[derive(Debug)]
pub struct StaticConfigSource {
    path: Option<PathBuf>,
    config: RwLock<Arc<RouterConfig>>,
}

impl StaticConfigSource {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            path: None,
            config: RwLock::new(Arc::new(config)),
        }
    }

    pub fn from_file(path: PathBuf) -> Result<Self> {
        let config = RouterConfig::load(&path)?;
        Ok(Self {
            path: Some(path),
            config: RwLock::new(Arc::new(config)),
        })
    }

    /// Swap in a new config (tests and admin tooling)
    pub async fn replace(&self, config: RouterConfig) {
        *self.config.write().await = Arc::new(config);
    }

    pub async fn current(&self) -> Arc<RouterConfig> {
        self.config.read().await.clone()
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn refresh(&self) -> Result<()> {
        if let Some(path) = &self.path {
            let config = RouterConfig::load(path)?;
            self.replace(config).await;
            info!(path = %path.display(), "[reload] router config file re-read");
        }
        Ok(())
    }

    async fn identifier(&self) -> String {
        self.current().await.identifier.clone()
    }

    async fn swap_type(&self) -> SwapType {
        self.current().await.swap_type
    }

    async fn extra_config(&self) -> ExtraConfig {
        self.current().await.extra.clone()
    }

    async fn all_chain_ids(&self) -> Result<Vec<ChainId>> {
        Ok(self.current().await.chains.iter().map(|c| c.chain_id).collect())
    }

    async fn all_token_ids(&self) -> Result<Vec<String>> {
        let config = self.current().await;
        let mut seen = HashSet::new();
        Ok(config
            .tokens
            .iter()
            .filter(|t| seen.insert(t.token_id.clone()))
            .map(|t| t.token_id.clone())
            .collect())
    }

    async fn chain_config(&self, chain_id: &ChainId) -> Result<Option<ChainConfig>> {
        Ok(self
            .current()
            .await
            .chains
            .iter()
            .find(|c| c.chain_id == *chain_id)
            .cloned())
    }

    async fn gateway_config(&self, chain_id: &ChainId) -> Result<Option<GatewayConfig>> {
        Ok(self.current().await.gateways.get(&chain_id.to_string()).cloned())
    }

    async fn token_config(&self, token_id: &str, chain_id: &ChainId) -> Result<Option<TokenConfig>> {
        Ok(self
            .current()
            .await
            .tokens
            .iter()
            .find(|t| t.chain_id == *chain_id && t.token_id == token_id)
            .cloned())
    }

    async fn swap_configs(&self, token_id: &str) -> Result<Vec<SwapConfig>> {
        Ok(self
            .current()
            .await
            .swap_configs
            .iter()
            .filter(|s| s.token_id.eq_ignore_ascii_case(token_id))
            .cloned()
            .collect())
    }

    async fn mpc_public_key(&self, mpc_address: &str) -> Result<Option<String>> {
        Ok(self
            .current()
            .await
            .mpc_public_keys
            .iter()
            .find(|(addr, _)| addr.eq_ignore_ascii_case(mpc_address))
            .map(|(_, key)| key.clone()))
    }
}

// ============================================================================
// Bridge construction
// ============================================================================

/// Collaborators handed to every adapter
#[derive(Clone)]
pub struct BridgeContext {
    pub transport: Arc<dyn RpcTransport>,
    pub signer: Arc<dyn MpcSigner>,
    pub nonce_store: Arc<dyn NonceStore>,
    pub registry: Weak<Registry>,
    pub sign_timeout: Duration,
    pub retry: RetryConfig,
}

impl BridgeContext {
    /// Registry handle; adapters never outlive it in practice
    pub fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.upgrade()
    }
}

/// Creates the adapter serving a chain id
pub trait BridgeFactory: Send + Sync {
    fn create(&self, chain_id: &ChainId, registry: Weak<Registry>) -> Result<Arc<dyn Bridge>>;

    /// Retry policy for init-time RPC reads
    fn retry(&self) -> RetryConfig {
        RetryConfig::default()
    }
}

/// Dispatches UTXO stub chain ids to the UTXO adapter and everything else to the EVM adapter
#[derive(Clone)]
pub struct DefaultBridgeFactory {
    transport: Arc<dyn RpcTransport>,
    signer: Arc<dyn MpcSigner>,
    nonce_store: Arc<dyn NonceStore>,
    sign_timeout: Duration,
    retry: RetryConfig,
}

impl DefaultBridgeFactory {
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        signer: Arc<dyn MpcSigner>,
        nonce_store: Arc<dyn NonceStore>,
        sign_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            signer,
            nonce_store,
            sign_timeout,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn context(&self, registry: Weak<Registry>) -> BridgeContext {
        BridgeContext {
            transport: self.transport.clone(),
            signer: self.signer.clone(),
            nonce_store: self.nonce_store.clone(),
            registry,
            sign_timeout: self.sign_timeout,
            retry: self.retry,
        }
    }
}

impl BridgeFactory for DefaultBridgeFactory {
    fn create(&self, chain_id: &ChainId, registry: Weak<Registry>) -> Result<Arc<dyn Bridge>> {
        if chain_id.is_zero() {
            return Err(eyre!("wrong chain id {}", chain_id));
        }
        let ctx = self.context(registry);

        #[cfg(feature = "btc")]
        {
            if crate::btc::supports_chain_id(chain_id) {
                return Ok(Arc::new(crate::btc::BtcBridge::new(chain_id, ctx)));
            }
        }

        #[cfg(feature = "evm")]
        return Ok(Arc::new(crate::evm::EvmBridge::new(chain_id, ctx)));

        #[cfg(not(feature = "evm"))]
        {
            let _ = ctx;
            Err(eyre!("no adapter for chain {}", chain_id))
        }
    }

    fn retry(&self) -> RetryConfig {
        self.retry
    }
}

// ============================================================================
// Registry
// ============================================================================

type SwapConfigTable = HashMap<String, HashMap<String, Arc<SwapConfig>>>;

/// Process-wide router state, passed explicitly to whatever orchestrates swaps
pub struct Registry {
    source: Arc<dyn ConfigSource>,
    factory: Arc<dyn BridgeFactory>,
    retry: RetryConfig,
    identifier: RwLock<String>,
    swap_type: RwLock<SwapType>,
    extra: RwLock<Arc<ExtraConfig>>,
    blacklist: RwLock<Arc<Blacklist>>,
    bridges: RwLock<HashMap<String, Arc<dyn Bridge>>>,
    chain_ids: RwLock<Vec<String>>,
    token_ids: RwLock<Vec<String>>,
    /// lower(token id) → chain id → token address
    multichain_tokens: RwLock<HashMap<String, HashMap<String, String>>>,
    /// "lower(router):chain id" → router info
    router_infos: RwLock<HashMap<String, RouterInfo>>,
    /// lower(mpc address) → public key
    mpc_public_keys: RwLock<HashMap<String, String>>,
    /// token id → from chain → to chain → config
    swap_configs: RwLock<HashMap<String, SwapConfigTable>>,
    gateway_overrides: RwLock<HashMap<String, GatewayConfig>>,
    paused_chains: RwLock<HashSet<String>>,
    latest_blocks: Mutex<HashMap<String, u64>>,
    router_info_loaded: Mutex<HashSet<String>>,
    reload_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

fn router_info_key(router: &str, chain_id: &str) -> String {
    format!("{}:{}", router.to_lowercase(), chain_id)
}

impl Registry {
    pub fn new(source: Arc<dyn ConfigSource>, factory: Arc<dyn BridgeFactory>) -> Arc<Self> {
        let retry = factory.retry();
        Arc::new(Self {
            source,
            factory,
            retry,
            identifier: RwLock::new(String::new()),
            swap_type: RwLock::new(SwapType::default()),
            extra: RwLock::new(Arc::new(ExtraConfig::default())),
            blacklist: RwLock::new(Arc::new(Blacklist::default())),
            bridges: RwLock::new(HashMap::new()),
            chain_ids: RwLock::new(Vec::new()),
            token_ids: RwLock::new(Vec::new()),
            multichain_tokens: RwLock::new(HashMap::new()),
            router_infos: RwLock::new(HashMap::new()),
            mpc_public_keys: RwLock::new(HashMap::new()),
            swap_configs: RwLock::new(HashMap::new()),
            gateway_overrides: RwLock::new(HashMap::new()),
            paused_chains: RwLock::new(HashSet::new()),
            latest_blocks: Mutex::new(HashMap::new()),
            router_info_loaded: Mutex::new(HashSet::new()),
            reload_lock: tokio::sync::Mutex::new(()),
        })
    }

    // ========================================================================
    // Init
    // ========================================================================

    /// Build and initialise every bridge
    ///
    /// Misconfiguration is returned as an error. With `dont_panic_in_init_router` a failing
    /// chain or token is logged and skipped instead.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        info!("Start init router bridges");
        self.load_settings().await?;
        let dont_panic = self.extra().await.dont_panic_in_init_router;

        let chain_ids = self.filtered_chain_ids().await?;
        info!(chain_ids = ?chain_ids.iter().map(|c| c.to_string()).collect::<Vec<_>>(), "Get all chain ids success");
        if chain_ids.is_empty() {
            return Err(eyre!("empty chain IDs"));
        }

        let token_ids = self.filtered_token_ids().await?;
        info!(token_ids = ?token_ids, "Get all token ids success");
        if token_ids.is_empty() && self.swap_type().await != SwapType::AnyCallSwap {
            return Err(eyre!("empty token IDs"));
        }

        let results = join_all(
            chain_ids
                .iter()
                .map(|chain_id| self.init_chain(chain_id, &token_ids, dont_panic)),
        )
        .await;

        let mut ready = Vec::with_capacity(chain_ids.len());
        for (chain_id, result) in chain_ids.iter().zip(results) {
            match result {
                Ok(()) => ready.push(chain_id.to_string()),
                Err(e) if dont_panic => {
                    error!(chain_id = %chain_id, error = %e, "Init chain failed, chain skipped");
                }
                Err(e) => {
                    self.clear_router_info_loaded();
                    return Err(e.wrap_err(format!("init chain {} failed", chain_id)));
                }
            }
        }

        *self.chain_ids.write().await = ready;
        *self.token_ids.write().await = token_ids;

        if let Err(e) = self.load_swap_configs().await {
            if !dont_panic {
                self.clear_router_info_loaded();
                return Err(e);
            }
            error!(error = %e, "Load swap configs failed");
        }

        self.clear_router_info_loaded();
        info!("Init router bridges finished");
        Ok(())
    }

    async fn load_settings(&self) -> Result<()> {
        let extra = self.source.extra_config().await;
        let blacklist = Blacklist::new(&extra.chain_id_blacklist, &extra.token_id_blacklist)?;
        *self.identifier.write().await = self.source.identifier().await;
        *self.swap_type.write().await = self.source.swap_type().await;
        *self.blacklist.write().await = Arc::new(blacklist);
        *self.extra.write().await = Arc::new(extra);
        Ok(())
    }

    async fn filtered_chain_ids(&self) -> Result<Vec<ChainId>> {
        let blacklist = self.blacklist().await;
        let all = self
            .source
            .all_chain_ids()
            .await
            .wrap_err("call all_chain_ids failed")?;
        Ok(all
            .into_iter()
            .filter(|chain_id| {
                let black = blacklist.is_chain_id_in_black_list(&chain_id.to_string());
                if black {
                    debug!(chain_id = %chain_id, "Ignore chain id in black list");
                }
                !black
            })
            .collect())
    }

    async fn filtered_token_ids(&self) -> Result<Vec<String>> {
        let blacklist = self.blacklist().await;
        let all = self
            .source
            .all_token_ids()
            .await
            .wrap_err("call all_token_ids failed")?;
        Ok(all
            .into_iter()
            .filter(|token_id| {
                let black = blacklist.is_token_id_in_black_list(token_id);
                if black {
                    debug!(token_id = %token_id, "Ignore token id in black list");
                }
                !black
            })
            .collect())
    }

    async fn init_chain(
        self: &Arc<Self>,
        chain_id: &ChainId,
        token_ids: &[String],
        dont_panic: bool,
    ) -> Result<()> {
        let key = chain_id.to_string();
        let bridge = self.factory.create(chain_id, Arc::downgrade(self))?;

        self.init_gateway(&bridge, chain_id, true).await?;
        self.adjust_gateway_once(&bridge).await;

        let chain_cfg = self.checked_chain_config(chain_id).await?;
        self.init_router_info_once(&bridge, &chain_cfg.router_contract)
            .await?;
        let block_chain = chain_cfg.block_chain.clone();
        bridge.init_chain_config(chain_cfg).await?;
        info!(chain_id = %chain_id, block_chain = %block_chain, "Init chain config success");

        bridge.init_after_config().await?;
        self.bridges.write().await.insert(key.clone(), bridge.clone());

        let results = join_all(
            token_ids
                .iter()
                .map(|token_id| self.init_token(&bridge, token_id, chain_id, false)),
        )
        .await;
        for (token_id, result) in token_ids.iter().zip(results) {
            if let Err(e) = result {
                if !dont_panic {
                    return Err(e.wrap_err(format!("init token {} failed", token_id)));
                }
                error!(chain_id = %chain_id, token_id = %token_id, error = %e, "Init token config failed");
            }
        }
        Ok(())
    }

    async fn init_gateway(
        &self,
        bridge: &Arc<dyn Bridge>,
        chain_id: &ChainId,
        check_latest: bool,
    ) -> Result<()> {
        let key = chain_id.to_string();
        let override_cfg = self.gateway_overrides.read().await.get(&key).cloned();
        let cfg = match override_cfg {
            Some(cfg) => cfg,
            None => self
                .source
                .gateway_config(chain_id)
                .await?
                .ok_or_else(|| eyre!("gateway not found for chain {}", chain_id))?,
        };
        bridge.init_gateway_config(cfg).await?;

        if check_latest {
            let latest = self
                .retry
                .run("get_latest_block_number", || bridge.get_latest_block_number())
                .await
                .map_err(|e| eyre!("get latest block number of chain {} failed: {}", chain_id, e))?;
            self.set_latest_block(&key, latest);
            info!(chain_id = %chain_id, latest_block = latest, "Init gateway config success");
        }
        Ok(())
    }

    async fn checked_chain_config(&self, chain_id: &ChainId) -> Result<ChainConfig> {
        let cfg = self
            .source
            .chain_config(chain_id)
            .await
            .wrap_err_with(|| format!("get chain config of {} failed", chain_id))?
            .ok_or_else(|| eyre!("chain config not found for chain {}", chain_id))?;
        if cfg.chain_id != *chain_id {
            return Err(eyre!(
                "verify chain ID mismatch, in config {} in chain ids {}",
                cfg.chain_id,
                chain_id
            ));
        }
        cfg.validate()?;
        Ok(cfg)
    }

    async fn init_router_info_once(&self, bridge: &Arc<dyn Bridge>, router: &str) -> Result<()> {
        if router.is_empty() {
            return Ok(());
        }
        let key = format!("{}:{}", bridge.chain_id(), router).to_lowercase();
        if self.is_router_info_loaded(&key) {
            return Ok(());
        }
        bridge
            .init_router_info(router)
            .await
            .wrap_err_with(|| format!("init router info of {} failed", router))?;
        self.lock_loaded().insert(key);
        Ok(())
    }

    fn lock_loaded(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.router_info_loaded.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn is_router_info_loaded(&self, key: &str) -> bool {
        self.lock_loaded().contains(key)
    }

    fn clear_router_info_loaded(&self) {
        self.lock_loaded().clear();
    }

    async fn init_token(
        &self,
        bridge: &Arc<dyn Bridge>,
        token_id: &str,
        chain_id: &ChainId,
        is_reload: bool,
    ) -> Result<()> {
        if token_id.is_empty() {
            return Err(eyre!("empty token ID"));
        }
        let Some(token_addr) = self.source.multichain_token(token_id, chain_id).await? else {
            debug!(chain_id = %chain_id, token_id = %token_id, "Token address is empty");
            return Ok(());
        };
        let Some(cfg) = self.source.token_config(token_id, chain_id).await? else {
            debug!(chain_id = %chain_id, token_id = %token_id, token = %token_addr, "Token config not found");
            return Ok(());
        };
        if !token_addr.eq_ignore_ascii_case(&cfg.contract_address) {
            return Err(eyre!(
                "verify token address mismatch, in config {} in multichain {}",
                cfg.contract_address,
                token_addr
            ));
        }
        if cfg.token_id != token_id {
            return Err(eyre!(
                "verify token ID mismatch, in config {} in token ids {}",
                cfg.token_id,
                token_id
            ));
        }
        cfg.validate(self.swap_type().await)?;

        if let Some(router) = cfg.router_contract.clone() {
            self.init_router_info_once(bridge, &router).await?;
        }

        let decimals = cfg.decimals;
        if is_reload {
            if !bridge.reload_token_config(cfg).await {
                return Err(eyre!("reload token config of {} failed", token_id));
            }
        } else {
            bridge.init_token_config(cfg).await?;
        }
        self.set_multichain_token(token_id, &chain_id.to_string(), &token_addr)
            .await;
        info!(
            chain_id = %chain_id,
            token_id = %token_id,
            token = %token_addr,
            decimals = decimals,
            is_reload = is_reload,
            "Init token config success"
        );
        Ok(())
    }

    /// Resolve swap configs for every pair of chains supporting each token id
    ///
    /// Fallback order: `[from][to]`, `[from]["0"]`, `["0"][to]`, `["0"]["0"]`.
    async fn load_swap_configs(&self) -> Result<()> {
        if self.swap_type().await != SwapType::Erc20Swap {
            return Ok(());
        }
        let chain_ids = self.all_chain_ids().await;
        let token_ids = self.all_token_ids().await;

        let mut table = HashMap::new();
        for token_id in &token_ids {
            let mut supported = Vec::new();
            for chain_id in &chain_ids {
                if self.multichain_token(token_id, chain_id).await.is_some() {
                    supported.push(chain_id.clone());
                }
            }
            if supported.is_empty() {
                continue;
            }
            let configs = self
                .source
                .swap_configs(token_id)
                .await
                .wrap_err_with(|| format!("get swap configs of {} failed", token_id))?;
            for cfg in &configs {
                cfg.validate()?;
            }
            table.insert(token_id.to_lowercase(), resolve_swap_configs(&configs, &supported));
        }
        *self.swap_configs.write().await = table;
        info!(tokens = token_ids.len(), "Load all swap configs success");
        Ok(())
    }

    // ========================================================================
    // Reload
    // ========================================================================

    /// Re-apply config from the source without restarting
    ///
    /// Removed chains are dropped, removed token ids are tombstoned on every bridge, new chains
    /// are initialised and existing ones reloaded. Returns whether everything applied.
    pub async fn reload(self: &Arc<Self>) -> bool {
        let _guard = self.reload_lock.lock().await;
        info!("[reload] start reload router config");

        if let Err(e) = self.source.refresh().await {
            error!(error = %e, "[reload] refresh config source failed");
            return false;
        }
        if let Err(e) = self.load_settings().await {
            error!(error = %e, "[reload] load settings failed");
            return false;
        }

        let chain_ids = match self.filtered_chain_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "[reload] call all_chain_ids failed");
                return false;
            }
        };
        if chain_ids.is_empty() {
            error!("[reload] empty chain IDs");
        }
        let chain_keys: Vec<String> = chain_ids.iter().map(|c| c.to_string()).collect();

        {
            let mut bridges = self.bridges.write().await;
            let removed: Vec<String> = bridges
                .keys()
                .filter(|key| !chain_keys.contains(key))
                .cloned()
                .collect();
            for key in removed {
                info!(chain_id = %key, "[reload] remove bridge");
                bridges.remove(&key);
            }
        }

        let token_ids = match self.filtered_token_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "[reload] call all_token_ids failed");
                return false;
            }
        };
        if token_ids.is_empty() && self.swap_type().await != SwapType::AnyCallSwap {
            error!("[reload] empty token IDs");
        }
        let removed_token_ids: Vec<String> = self
            .all_token_ids()
            .await
            .into_iter()
            .filter(|id| !token_ids.contains(id))
            .collect();
        if !removed_token_ids.is_empty() {
            info!(removed_token_ids = ?removed_token_ids, "[reload] remove token ids");
        }

        let mut all_ok = true;
        let mut ready = Vec::with_capacity(chain_ids.len());
        for chain_id in &chain_ids {
            if self
                .reload_chain(chain_id, &token_ids, &removed_token_ids)
                .await
            {
                ready.push(chain_id.to_string());
            } else {
                all_ok = false;
                if self.get_bridge(&chain_id.to_string()).await.is_some() {
                    ready.push(chain_id.to_string());
                }
            }
        }

        {
            let mut multichain = self.multichain_tokens.write().await;
            for token_id in &removed_token_ids {
                multichain.remove(&token_id.to_lowercase());
            }
        }
        *self.chain_ids.write().await = ready;
        *self.token_ids.write().await = token_ids;

        let swap_result = self.load_swap_configs().await;
        self.clear_router_info_loaded();
        if let Err(e) = swap_result {
            error!(error = %e, "[reload] load swap configs failed");
            return false;
        }

        info!(success = all_ok, "[reload] reload router config finished");
        all_ok
    }

    async fn reload_chain(
        self: &Arc<Self>,
        chain_id: &ChainId,
        token_ids: &[String],
        removed_token_ids: &[String],
    ) -> bool {
        let key = chain_id.to_string();
        let (bridge, is_new) = match self.get_bridge(&key).await {
            Some(bridge) => (bridge, false),
            None => {
                info!(chain_id = %chain_id, "[reload] add new bridge");
                match self.factory.create(chain_id, Arc::downgrade(self)) {
                    Ok(bridge) => (bridge, true),
                    Err(e) => {
                        error!(chain_id = %chain_id, error = %e, "[reload] create bridge failed");
                        return false;
                    }
                }
            }
        };

        let mut ok = true;
        if let Err(e) = self.init_gateway(&bridge, chain_id, is_new).await {
            warn!(chain_id = %chain_id, error = %e, "[reload] init gateway config failed");
            if is_new {
                return false;
            }
            ok = false;
        }
        self.adjust_gateway_once(&bridge).await;

        let chain_ok = match self.checked_chain_config(chain_id).await {
            Ok(cfg) => match self.init_router_info_once(&bridge, &cfg.router_contract).await {
                Ok(()) => {
                    if is_new {
                        match bridge.init_chain_config(cfg).await {
                            Ok(()) => true,
                            Err(e) => {
                                warn!(chain_id = %chain_id, error = %e, "[reload] init chain config failed");
                                false
                            }
                        }
                    } else {
                        bridge.reload_chain_config(cfg).await
                    }
                }
                Err(e) => {
                    warn!(chain_id = %chain_id, error = %e, "[reload] init router info failed");
                    false
                }
            },
            Err(e) => {
                warn!(chain_id = %chain_id, error = %e, "[reload] check chain config failed");
                false
            }
        };
        if !chain_ok {
            if is_new {
                return false;
            }
            ok = false;
        }

        if is_new {
            if let Err(e) = bridge.init_after_config().await {
                error!(chain_id = %chain_id, error = %e, "[reload] init after config failed");
                return false;
            }
            self.bridges.write().await.insert(key.clone(), bridge.clone());
        }

        for token_id in removed_token_ids {
            if let Some(token_addr) = self.multichain_token(token_id, &key).await {
                info!(chain_id = %chain_id, token_id = %token_id, token = %token_addr, "[reload] remove token config");
                bridge.remove_token_config(&token_addr).await;
            }
        }

        for token_id in token_ids {
            if let Err(e) = self.init_token(&bridge, token_id, chain_id, true).await {
                warn!(chain_id = %chain_id, token_id = %token_id, error = %e, "[reload] set token config failed");
                ok = false;
            }
        }
        ok
    }

    // ========================================================================
    // Gateways
    // ========================================================================

    async fn adjust_gateway_once(&self, bridge: &Arc<dyn Bridge>) {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        self.adjust_gateway_order(bridge, &shutdown_rx).await;
    }

    /// Reorder one chain's endpoints by latest block height
    pub async fn adjust_gateway_order(&self, bridge: &Arc<dyn Bridge>, shutdown: &watch::Receiver<bool>) {
        let gateway = bridge.gateway();
        let prober = bridge.clone();
        let max_height = gateway
            .adjust_order(
                move |url| {
                    let prober = prober.clone();
                    async move { prober.get_latest_block_number_of(&url).await }
                },
                shutdown,
            )
            .await;
        if let Some(height) = max_height {
            self.set_latest_block(bridge.chain_id(), height);
        }
    }

    /// Apply hot-reloaded gateway configs; returns how many bridges were updated
    pub async fn apply_gateway_configs(&self, gateways: HashMap<String, GatewayConfig>) -> usize {
        let bridges = self.bridges().await;
        let mut updated = 0;
        for (chain_id, bridge) in &bridges {
            if let Some(cfg) = gateways.get(chain_id) {
                bridge.set_gateway_config(cfg.clone());
                updated += 1;
            }
        }
        *self.gateway_overrides.write().await = gateways;
        updated
    }

    pub fn set_latest_block(&self, chain_id: &str, height: u64) {
        let mut blocks = match self.latest_blocks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = blocks.entry(chain_id.to_string()).or_insert(0);
        if height > *entry {
            *entry = height;
        }
    }

    /// Highest block height seen for a chain
    pub fn cached_latest_block(&self, chain_id: &str) -> Option<u64> {
        match self.latest_blocks.lock() {
            Ok(blocks) => blocks.get(chain_id).copied(),
            Err(poisoned) => poisoned.into_inner().get(chain_id).copied(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub async fn identifier(&self) -> String {
        self.identifier.read().await.clone()
    }

    pub async fn swap_type(&self) -> SwapType {
        *self.swap_type.read().await
    }

    pub async fn extra(&self) -> Arc<ExtraConfig> {
        self.extra.read().await.clone()
    }

    pub async fn blacklist(&self) -> Arc<Blacklist> {
        self.blacklist.read().await.clone()
    }

    pub async fn get_bridge(&self, chain_id: &str) -> Option<Arc<dyn Bridge>> {
        self.bridges.read().await.get(chain_id).cloned()
    }

    pub async fn bridges(&self) -> Vec<(String, Arc<dyn Bridge>)> {
        self.bridges
            .read()
            .await
            .iter()
            .map(|(id, bridge)| (id.clone(), bridge.clone()))
            .collect()
    }

    /// Register a bridge directly (tests and embedders with custom adapters)
    pub async fn set_bridge(&self, chain_id: &str, bridge: Arc<dyn Bridge>) {
        self.bridges.write().await.insert(chain_id.to_string(), bridge);
    }

    pub async fn all_chain_ids(&self) -> Vec<String> {
        self.chain_ids.read().await.clone()
    }

    pub async fn all_token_ids(&self) -> Vec<String> {
        self.token_ids.read().await.clone()
    }

    pub async fn multichain_token(&self, token_id: &str, chain_id: &str) -> Option<String> {
        self.multichain_tokens
            .read()
            .await
            .get(&token_id.to_lowercase())
            .and_then(|chains| chains.get(chain_id))
            .cloned()
    }

    pub async fn set_multichain_token(&self, token_id: &str, chain_id: &str, token_addr: &str) {
        self.multichain_tokens
            .write()
            .await
            .entry(token_id.to_lowercase())
            .or_default()
            .insert(chain_id.to_string(), token_addr.to_string());
    }

    pub async fn router_info(&self, router: &str, chain_id: &str) -> Option<RouterInfo> {
        self.router_infos
            .read()
            .await
            .get(&router_info_key(router, chain_id))
            .cloned()
    }

    pub async fn set_router_info(&self, router: &str, chain_id: &str, info: RouterInfo) {
        info!(
            chain_id = %chain_id,
            router = %router,
            router_mpc = %info.router_mpc,
            "Set router info"
        );
        self.router_infos
            .write()
            .await
            .insert(router_info_key(router, chain_id), info);
    }

    /// Cached public key of an MPC address
    pub async fn mpc_public_key(&self, mpc_address: &str) -> Option<String> {
        self.mpc_public_keys
            .read()
            .await
            .get(&mpc_address.to_lowercase())
            .cloned()
    }

    pub async fn set_mpc_public_key(&self, mpc_address: &str, pubkey: &str) {
        self.mpc_public_keys
            .write()
            .await
            .insert(mpc_address.to_lowercase(), pubkey.to_string());
    }

    /// Public key of an MPC address from the config source
    pub async fn lookup_mpc_public_key(&self, mpc_address: &str) -> Result<String> {
        self.source
            .mpc_public_key(mpc_address)
            .await?
            .ok_or_else(|| eyre!("mpc public key not found for {}", mpc_address))
    }

    /// Resolved swap config of a (token id, from chain, to chain) triple
    pub async fn swap_config(&self, token_id: &str, from_chain_id: &str, to_chain_id: &str) -> Option<Arc<SwapConfig>> {
        self.swap_configs
            .read()
            .await
            .get(&token_id.to_lowercase())
            .and_then(|table| table.get(from_chain_id))
            .and_then(|to| to.get(to_chain_id))
            .cloned()
    }

    pub async fn is_swap_in_black_list(&self, from_chain_id: &str, to_chain_id: &str, token_id: &str) -> bool {
        self.blacklist()
            .await
            .is_swap_in_black_list(from_chain_id, to_chain_id, token_id)
    }

    /// Stop building swap-ins into a chain
    pub async fn pause_chain(&self, chain_id: &str) {
        warn!(chain_id = %chain_id, "Pause swap into chain");
        self.paused_chains.write().await.insert(chain_id.to_string());
    }

    pub async fn unpause_chain(&self, chain_id: &str) {
        info!(chain_id = %chain_id, "Unpause swap into chain");
        self.paused_chains.write().await.remove(chain_id);
    }

    pub async fn is_chain_paused(&self, chain_id: &str) -> bool {
        self.paused_chains.read().await.contains(chain_id)
    }
}

/// Resolve `[from][to]` configs for every ordered pair of distinct supported chains
fn resolve_swap_configs(configs: &[SwapConfig], supported: &[String]) -> SwapConfigTable {
    let mut by_pair: SwapConfigTable = HashMap::new();
    for cfg in configs {
        by_pair
            .entry(cfg.from_chain_id.to_string())
            .or_default()
            .insert(cfg.to_chain_id.to_string(), Arc::new(cfg.clone()));
    }
    let lookup = |from: &str, to: &str| by_pair.get(from).and_then(|m| m.get(to)).cloned();

    let mut resolved: SwapConfigTable = HashMap::new();
    for from in supported {
        for to in supported {
            if from == to {
                continue;
            }
            let cfg = lookup(from, to)
                .or_else(|| lookup(from, ANY_CHAIN_ID))
                .or_else(|| lookup(ANY_CHAIN_ID, to))
                .or_else(|| lookup(ANY_CHAIN_ID, ANY_CHAIN_ID));
            if let Some(cfg) = cfg {
                resolved.entry(from.clone()).or_default().insert(to.clone(), cfg);
            }
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    fn swap(from: u64, to: u64, max: u64) -> SwapConfig {
        SwapConfig {
            token_id: "USDC".to_string(),
            from_chain_id: ChainId::from_u64(from),
            to_chain_id: ChainId::from_u64(to),
            maximum_swap: U256::from(max),
            minimum_swap: U256::from(1u64),
            big_value_threshold: U256::from(max),
            swap_fee_rate_per_million: 0,
            maximum_swap_fee: U256::ZERO,
            minimum_swap_fee: U256::ZERO,
        }
    }

    fn chains(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_swap_config_exact_pair_wins() {
        let configs = vec![swap(1, 56, 100), swap(1, 0, 200), swap(0, 0, 300)];
        let table = resolve_swap_configs(&configs, &chains(&["1", "56", "137"]));
        assert_eq!(table["1"]["56"].maximum_swap, U256::from(100u64));
        assert_eq!(table["1"]["137"].maximum_swap, U256::from(200u64));
        assert_eq!(table["56"]["1"].maximum_swap, U256::from(300u64));
    }

    #[test]
    fn test_swap_config_wildcard_source() {
        let configs = vec![swap(0, 137, 400), swap(0, 0, 300)];
        let table = resolve_swap_configs(&configs, &chains(&["1", "56", "137"]));
        assert_eq!(table["1"]["137"].maximum_swap, U256::from(400u64));
        assert_eq!(table["56"]["137"].maximum_swap, U256::from(400u64));
        assert_eq!(table["137"]["1"].maximum_swap, U256::from(300u64));
    }

    #[test]
    fn test_swap_config_missing_and_same_chain() {
        let configs = vec![swap(1, 56, 100)];
        let table = resolve_swap_configs(&configs, &chains(&["1", "56"]));
        assert!(table.get("56").is_none());
        assert!(table["1"].get("1").is_none());
    }

    #[test]
    fn test_router_info_key_lowercases_router() {
        assert_eq!(router_info_key("0xABC", "56"), "0xabc:56");
    }

    #[tokio::test]
    async fn test_static_source_token_ids_deduplicated_in_order() {
        let mut cfg = RouterConfig::default();
        cfg.tokens = vec![
            TokenConfig::new(ChainId::from_u64(1), "USDC", "0x01", 6),
            TokenConfig::new(ChainId::from_u64(1), "WETH", "0x02", 18),
            TokenConfig::new(ChainId::from_u64(56), "USDC", "0x03", 18),
        ];
        let source = StaticConfigSource::new(cfg);
        assert_eq!(source.all_token_ids().await.unwrap(), vec!["USDC", "WETH"]);
        let token = source
            .token_config("USDC", &ChainId::from_u64(56))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.contract_address, "0x03");
        assert_eq!(
            source
                .multichain_token("WETH", &ChainId::from_u64(56))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_static_source_mpc_key_case_insensitive() {
        let mut cfg = RouterConfig::default();
        cfg.mpc_public_keys
            .insert("0xAbC".to_string(), "0x04aa".to_string());
        let source = StaticConfigSource::new(cfg);
        assert_eq!(
            source.mpc_public_key("0xabc").await.unwrap(),
            Some("0x04aa".to_string())
        );
        assert_eq!(source.mpc_public_key("0xdef").await.unwrap(), None);
    }
}
