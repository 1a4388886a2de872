//! Router configuration
//!
//! Static chain/token/swap/gateway configuration, loaded from a TOML file with
//! `SWAP_ROUTER__`-prefixed environment overrides (a `.env` file is honoured).
//!
//! ```toml
//! identifier = "router-mainnet"
//! swap_type = "erc20swap"
//!
//! [[chains]]
//! chain_id = "56"
//! block_chain = "BSC"
//! router_contract = "0x..."
//! confirmations = 15
//!
//! [gateways.56]
//! api_address = ["https://bsc-dataseed1.binance.org"]
//! ```

use crate::types::{ChainId, SwapType};
use alloy::primitives::{Address, U256};
use eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Deserializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// URL Validation
// ============================================================================

/// Validates that a URL uses http/https and has a host component.
pub fn validate_rpc_url(url_str: &str, name: &str) -> Result<()> {
    let parsed =
        url::Url::parse(url_str).map_err(|e| eyre!("{} must be a valid URL: {}", name, e))?;

    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(eyre!(
            "{} must use http:// or https:// scheme, got {}",
            name,
            scheme
        ));
    }

    if parsed.host_str().is_none() {
        return Err(eyre!("{} must have a host component", name));
    }

    Ok(())
}

/// Host part of an endpoint URL; paths and queries often carry API keys
pub fn redact_url(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(parsed) => format!(
            "{}://{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or("<none>")
        ),
        Err(_) => "<invalid>".to_string(),
    }
}

/// Accepts `"1000"`, `"0x3e8"` or a bare integer
pub(crate) fn de_u256<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<U256, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(U256::from(n)),
        Raw::Str(s) => U256::from_str(s.trim()).map_err(serde::de::Error::custom),
    }
}

fn de_opt_u128<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u128>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }
    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n as u128)),
        Some(Raw::Str(s)) => s.trim().parse::<u128>().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Parse and require a non-zero EVM address
pub fn parse_address(value: &str, name: &str) -> Result<Address> {
    let address =
        Address::from_str(value.trim()).map_err(|e| eyre!("invalid {} '{}': {}", name, value, e))?;
    if address == Address::ZERO {
        return Err(eyre!("{} is the zero address", name));
    }
    Ok(address)
}

fn default_adjust_interval() -> u64 {
    60
}

fn default_rpc_timeout() -> u64 {
    30
}

fn default_sign_timeout() -> u64 {
    120
}

fn default_gas_limit() -> u64 {
    90_000
}

// ============================================================================
// Chain configuration
// ============================================================================

/// One supported chain
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    /// Chain family name (e.g. "ETH", "BSC", "BTC")
    pub block_chain: String,
    pub router_contract: String,
    pub confirmations: u64,
    #[serde(default)]
    pub initial_height: u64,
    #[serde(default)]
    pub plus_gas_price_percentage: u64,
}

impl ChainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_chain.is_empty() {
            return Err(eyre!("chain {} must config 'block_chain'", self.chain_id));
        }
        if self.confirmations == 0 {
            return Err(eyre!("chain {} must config nonzero 'confirmations'", self.chain_id));
        }
        if self.router_contract.is_empty() {
            return Err(eyre!("chain {} must config 'router_contract'", self.chain_id));
        }
        if self.plus_gas_price_percentage > 10_000 {
            return Err(eyre!(
                "chain {} 'plus_gas_price_percentage' {} exceeds 10000",
                self.chain_id,
                self.plus_gas_price_percentage
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Token configuration
// ============================================================================

pub const MINT_BURN_WRAPPER_TOKEN_VERSION: u64 = 10_000;
pub const FORCE_ANY_SWAP_IN_AUTO_TOKEN_VERSION: u64 = 10_001;
pub const PAUSE_SWAP_INTO_TOKEN_VERSION: u64 = 90_000;

/// One token on one chain
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenConfig {
    pub chain_id: ChainId,
    pub token_id: String,
    #[serde(default)]
    pub decimals: u8,
    pub contract_address: String,
    #[serde(default)]
    pub contract_version: u64,
    /// Overrides the chain's router contract for this token
    #[serde(default)]
    pub router_contract: Option<String>,
    #[serde(skip)]
    underlying: Option<Address>,
    #[serde(skip)]
    pub checked: bool,
}

impl TokenConfig {
    pub fn new(chain_id: ChainId, token_id: &str, contract_address: &str, decimals: u8) -> Self {
        Self {
            chain_id,
            token_id: token_id.to_string(),
            decimals,
            contract_address: contract_address.to_string(),
            contract_version: 0,
            router_contract: None,
            underlying: None,
            checked: false,
        }
    }

    pub fn validate(&self, swap_type: SwapType) -> Result<()> {
        if self.token_id.is_empty() {
            return Err(eyre!("token must config 'token_id'"));
        }
        if self.contract_address.is_empty() {
            return Err(eyre!("token {} must config 'contract_address'", self.token_id));
        }
        if swap_type != SwapType::Erc20Swap && self.decimals != 0 {
            return Err(eyre!(
                "token {} of non erc20 router must have zero decimals",
                self.token_id
            ));
        }
        Ok(())
    }

    pub fn is_standard_version(&self) -> bool {
        self.contract_version < MINT_BURN_WRAPPER_TOKEN_VERSION
    }

    pub fn is_wrapper_version(&self) -> bool {
        (MINT_BURN_WRAPPER_TOKEN_VERSION..PAUSE_SWAP_INTO_TOKEN_VERSION)
            .contains(&self.contract_version)
    }

    pub fn is_force_any_swap_in_auto(&self) -> bool {
        self.contract_version == FORCE_ANY_SWAP_IN_AUTO_TOKEN_VERSION
    }

    pub fn is_pause_swap_into(&self) -> bool {
        self.contract_version >= PAUSE_SWAP_INTO_TOKEN_VERSION
    }

    /// Underlying asset discovered on-chain, zero when none
    pub fn underlying(&self) -> Address {
        self.underlying.unwrap_or(Address::ZERO)
    }

    pub fn has_underlying(&self) -> bool {
        self.underlying() != Address::ZERO
    }

    pub fn set_underlying(&mut self, underlying: Address) {
        self.underlying = Some(underlying);
    }
}

// ============================================================================
// Swap configuration
// ============================================================================

/// Swap bounds and fees per (token id, from chain, to chain), in 18-decimal units
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SwapConfig {
    pub token_id: String,
    pub from_chain_id: ChainId,
    pub to_chain_id: ChainId,
    #[serde(deserialize_with = "de_u256")]
    pub maximum_swap: U256,
    #[serde(deserialize_with = "de_u256")]
    pub minimum_swap: U256,
    #[serde(deserialize_with = "de_u256")]
    pub big_value_threshold: U256,
    #[serde(default)]
    pub swap_fee_rate_per_million: u64,
    #[serde(default, deserialize_with = "de_u256")]
    pub maximum_swap_fee: U256,
    #[serde(default, deserialize_with = "de_u256")]
    pub minimum_swap_fee: U256,
}

impl SwapConfig {
    pub fn validate(&self) -> Result<()> {
        let key = format!("{}:{}->{}", self.token_id, self.from_chain_id, self.to_chain_id);
        if self.maximum_swap.is_zero() {
            return Err(eyre!("swap config {}: zero 'maximum_swap'", key));
        }
        if self.minimum_swap.is_zero() {
            return Err(eyre!("swap config {}: zero 'minimum_swap'", key));
        }
        if self.minimum_swap > self.maximum_swap {
            return Err(eyre!("swap config {}: 'minimum_swap' > 'maximum_swap'", key));
        }
        if self.big_value_threshold.is_zero() {
            return Err(eyre!("swap config {}: zero 'big_value_threshold'", key));
        }
        if self.swap_fee_rate_per_million >= 1_000_000 {
            return Err(eyre!(
                "swap config {}: 'swap_fee_rate_per_million' {} must be below 1000000",
                key,
                self.swap_fee_rate_per_million
            ));
        }
        if self.minimum_swap_fee > self.maximum_swap_fee {
            return Err(eyre!("swap config {}: 'minimum_swap_fee' > 'maximum_swap_fee'", key));
        }
        if self.minimum_swap < self.minimum_swap_fee {
            return Err(eyre!("swap config {}: 'minimum_swap' < 'minimum_swap_fee'", key));
        }
        if self.swap_fee_rate_per_million == 0 && !self.minimum_swap_fee.is_zero() {
            return Err(eyre!(
                "swap config {}: zero fee rate requires zero 'minimum_swap_fee'",
                key
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Gateway configuration
// ============================================================================

/// RPC endpoints of one chain
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub api_address: Vec<String>,
    #[serde(default)]
    pub api_address_ext: Vec<String>,
    #[serde(default)]
    pub finalize_api_address: Vec<String>,
}

impl GatewayConfig {
    pub fn new(api_address: Vec<String>) -> Self {
        Self {
            api_address,
            ..Default::default()
        }
    }

    /// Primary endpoints followed by the extended ones
    pub fn all_urls(&self) -> Vec<String> {
        self.api_address
            .iter()
            .chain(self.api_address_ext.iter())
            .cloned()
            .collect()
    }

    pub fn validate(&self, chain_id: &str) -> Result<()> {
        if self.api_address.is_empty() && self.api_address_ext.is_empty() {
            return Err(eyre!("gateway of chain {} has no api address", chain_id));
        }
        for url in self
            .api_address
            .iter()
            .chain(self.api_address_ext.iter())
            .chain(self.finalize_api_address.iter())
        {
            validate_rpc_url(url, &format!("gateway of chain {}", chain_id))?;
        }
        Ok(())
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |urls: &[String]| urls.iter().map(|u| redact_url(u)).collect::<Vec<_>>();
        f.debug_struct("GatewayConfig")
            .field("api_address", &redact(&self.api_address))
            .field("api_address_ext", &redact(&self.api_address_ext))
            .field("finalize_api_address", &redact(&self.finalize_api_address))
            .finish()
    }
}

// ============================================================================
// Extra (operational) configuration
// ============================================================================

/// Gas-price aggregation policy across endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalcMethod {
    First,
    Max,
    #[default]
    Median,
}

/// EIP-1559 settings of one chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DynamicFeeTxConfig {
    #[serde(default)]
    pub plus_gas_tip_cap_percent: u64,
    #[serde(default)]
    pub plus_gas_fee_cap_percent: u64,
    #[serde(default, deserialize_with = "de_opt_u128")]
    pub max_gas_tip_cap: Option<u128>,
    #[serde(default, deserialize_with = "de_opt_u128")]
    pub max_gas_fee_cap: Option<u128>,
}

/// Operational switches; maps are keyed by chain id or token id strings
#[derive(Debug, Clone, Deserialize)]
pub struct ExtraConfig {
    #[serde(default)]
    pub allow_call_by_contract: bool,
    #[serde(default)]
    pub allow_call_by_constructor: bool,
    #[serde(default)]
    pub check_eip1167_master: bool,
    #[serde(default)]
    pub call_by_contract_whitelist: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub call_by_contract_code_hash_whitelist: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub big_value_whitelist: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub base_fee_percent: HashMap<String, i64>,
    #[serde(default)]
    pub calc_gas_price_method: HashMap<String, CalcMethod>,
    #[serde(default)]
    pub chain_id_blacklist: Vec<String>,
    #[serde(default)]
    pub token_id_blacklist: Vec<String>,
    /// Token id → source chain ids whose swapouts are refused
    #[serde(default)]
    pub swapout_forbid: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub forbid_permit_swapout: bool,
    /// Chains signing in parallel with locally allocated nonces
    #[serde(default)]
    pub parallel_swap: Vec<String>,
    #[serde(default)]
    pub dynamic_fee_tx: HashMap<String, DynamicFeeTxConfig>,
    #[serde(default)]
    pub max_gas_price: HashMap<String, u128>,
    #[serde(default)]
    pub fixed_gas_price: HashMap<String, u128>,
    #[serde(default)]
    pub default_gas_limit: HashMap<String, u64>,
    #[serde(default)]
    pub max_gas_limit: HashMap<String, u64>,
    #[serde(default)]
    pub max_plus_gas_price_percentage: u64,
    #[serde(default)]
    pub replace_plus_gas_price_percent: u64,
    /// Chains with balance-delta verification
    #[serde(default)]
    pub check_token_balance: Vec<String>,
    /// Chains whose routers expose a swapout id registry
    #[serde(default)]
    pub check_swapout_id: Vec<String>,
    #[serde(default)]
    pub dont_panic_in_init_router: bool,
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_adjust_interval")]
    pub adjust_gateway_interval_secs: u64,
}

impl Default for ExtraConfig {
    fn default() -> Self {
        Self {
            allow_call_by_contract: false,
            allow_call_by_constructor: false,
            check_eip1167_master: false,
            call_by_contract_whitelist: HashMap::new(),
            call_by_contract_code_hash_whitelist: HashMap::new(),
            big_value_whitelist: HashMap::new(),
            base_fee_percent: HashMap::new(),
            calc_gas_price_method: HashMap::new(),
            chain_id_blacklist: Vec::new(),
            token_id_blacklist: Vec::new(),
            swapout_forbid: HashMap::new(),
            forbid_permit_swapout: false,
            parallel_swap: Vec::new(),
            dynamic_fee_tx: HashMap::new(),
            max_gas_price: HashMap::new(),
            fixed_gas_price: HashMap::new(),
            default_gas_limit: HashMap::new(),
            max_gas_limit: HashMap::new(),
            max_plus_gas_price_percentage: 0,
            replace_plus_gas_price_percent: 0,
            check_token_balance: Vec::new(),
            check_swapout_id: Vec::new(),
            dont_panic_in_init_router: false,
            rpc_timeout_secs: default_rpc_timeout(),
            adjust_gateway_interval_secs: default_adjust_interval(),
        }
    }
}

impl ExtraConfig {
    fn contains(list: &[String], value: &str) -> bool {
        list.iter().any(|item| item.eq_ignore_ascii_case(value))
    }

    fn chain_list_contains(map: &HashMap<String, Vec<String>>, chain_id: &str, value: &str) -> bool {
        map.get(chain_id)
            .map(|list| Self::contains(list, value))
            .unwrap_or(false)
    }

    pub fn is_in_call_by_contract_whitelist(&self, chain_id: &str, caller: &str) -> bool {
        Self::chain_list_contains(&self.call_by_contract_whitelist, chain_id, caller)
    }

    pub fn is_in_call_by_contract_code_hash_whitelist(&self, chain_id: &str, code_hash: &str) -> bool {
        Self::chain_list_contains(&self.call_by_contract_code_hash_whitelist, chain_id, code_hash)
    }

    pub fn is_in_big_value_whitelist(&self, token_id: &str, caller: &str) -> bool {
        if caller.is_empty() {
            return false;
        }
        self.big_value_whitelist
            .iter()
            .filter(|(id, _)| id.eq_ignore_ascii_case(token_id))
            .any(|(_, list)| Self::contains(list, caller))
    }

    pub fn is_swapout_forbidden(&self, token_id: &str, from_chain_id: &str) -> bool {
        self.swapout_forbid
            .iter()
            .filter(|(id, _)| id.eq_ignore_ascii_case(token_id))
            .any(|(_, chains)| Self::contains(chains, from_chain_id))
    }

    pub fn base_fee_percent(&self, chain_id: &str) -> i64 {
        self.base_fee_percent.get(chain_id).copied().unwrap_or(0)
    }

    pub fn calc_gas_price_method(&self, chain_id: &str) -> CalcMethod {
        self.calc_gas_price_method
            .get(chain_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn is_parallel_swap_enabled(&self, chain_id: &str) -> bool {
        Self::contains(&self.parallel_swap, chain_id)
    }

    pub fn dynamic_fee_tx(&self, chain_id: &str) -> Option<&DynamicFeeTxConfig> {
        self.dynamic_fee_tx.get(chain_id)
    }

    pub fn max_gas_price(&self, chain_id: &str) -> Option<u128> {
        self.max_gas_price.get(chain_id).copied()
    }

    pub fn fixed_gas_price(&self, chain_id: &str) -> Option<u128> {
        self.fixed_gas_price.get(chain_id).copied()
    }

    pub fn default_gas_limit(&self, chain_id: &str) -> u64 {
        self.default_gas_limit
            .get(chain_id)
            .copied()
            .unwrap_or_else(default_gas_limit)
    }

    pub fn max_gas_limit(&self, chain_id: &str) -> Option<u64> {
        self.max_gas_limit.get(chain_id).copied().filter(|l| *l > 0)
    }

    pub fn is_check_token_balance_enabled(&self, chain_id: &str) -> bool {
        Self::contains(&self.check_token_balance, chain_id)
    }

    pub fn is_check_swapout_id_enabled(&self, chain_id: &str) -> bool {
        Self::contains(&self.check_swapout_id, chain_id)
    }

    /// Per-request timeout of the HTTP transport
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, list) in [
            ("chain_id_blacklist", &self.chain_id_blacklist),
            ("token_id_blacklist", &self.token_id_blacklist),
        ] {
            let mut seen = HashSet::new();
            for item in list {
                if !seen.insert(item.to_lowercase()) {
                    return Err(eyre!("duplicate '{}' in {}", item, name));
                }
            }
        }
        if self.adjust_gateway_interval_secs == 0 {
            return Err(eyre!("'adjust_gateway_interval_secs' must be positive"));
        }
        if self.rpc_timeout_secs == 0 {
            return Err(eyre!("'rpc_timeout_secs' must be positive"));
        }
        Ok(())
    }
}

// ============================================================================
// Router configuration
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OnchainConfig {
    /// Periodic reload cycle; zero disables the periodic task
    #[serde(default)]
    pub reload_cycle_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MpcConfig {
    #[serde(default = "default_sign_timeout")]
    pub sign_timeout_secs: u64,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            sign_timeout_secs: default_sign_timeout(),
        }
    }
}

/// Whole router configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub swap_type: SwapType,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
    #[serde(default)]
    pub swap_configs: Vec<SwapConfig>,
    #[serde(default)]
    pub gateways: HashMap<String, GatewayConfig>,
    /// MPC address → uncompressed public key (hex)
    #[serde(default)]
    pub mpc_public_keys: HashMap<String, String>,
    #[serde(default)]
    pub extra: ExtraConfig,
    #[serde(default)]
    pub onchain: OnchainConfig,
    #[serde(default)]
    pub mpc: MpcConfig,
    /// Separate gateway file watched for hot reload
    #[serde(default)]
    pub gateway_config_file: Option<PathBuf>,
}

impl RouterConfig {
    /// Load from a TOML file plus environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("SWAP_ROUTER").separator("__"))
            .build()
            .wrap_err_with(|| format!("Failed to read router config {}", path.display()))?;

        let cfg: RouterConfig = settings
            .try_deserialize()
            .wrap_err("Failed to parse router config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse from TOML text (no environment overrides)
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: RouterConfig = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .wrap_err("Failed to read router config")?
            .try_deserialize()
            .wrap_err("Failed to parse router config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let mut chain_ids = HashSet::new();
        for chain in &self.chains {
            chain.validate()?;
            if !chain_ids.insert(chain.chain_id) {
                return Err(eyre!("duplicate chain config {}", chain.chain_id));
            }
        }
        let mut token_keys = HashSet::new();
        for token in &self.tokens {
            token.validate(self.swap_type)?;
            let key = (token.chain_id, token.contract_address.to_lowercase());
            if !token_keys.insert(key) {
                return Err(eyre!(
                    "duplicate token config {} on chain {}",
                    token.contract_address,
                    token.chain_id
                ));
            }
        }
        for swap in &self.swap_configs {
            swap.validate()?;
        }
        for (chain_id, gateway) in &self.gateways {
            gateway.validate(chain_id)?;
        }
        self.extra.validate()?;
        Ok(())
    }
}

/// Gateway-only file used by the hot-reload watcher
#[derive(Debug, Clone, Default, Deserialize)]
struct GatewayFile {
    #[serde(default)]
    gateways: HashMap<String, GatewayConfig>,
}

/// Load and validate the gateway section of a (hot-reloadable) config file
pub fn load_gateway_configs(path: &Path) -> Result<HashMap<String, GatewayConfig>> {
    let file: GatewayFile = config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .wrap_err_with(|| format!("Failed to read gateway config {}", path.display()))?
        .try_deserialize()
        .wrap_err("Failed to parse gateway config")?;
    for (chain_id, gateway) in &file.gateways {
        gateway.validate(chain_id)?;
    }
    Ok(file.gateways)
}
