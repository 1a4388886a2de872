//! Startup and reload cross-checks of static config against live contract state

use super::contracts::{AnyToken, MintBurnWrapper, Router};
use super::EvmBridge;
use crate::bridge::{ConfigHolder, ConfigLoader, NonceSetter};
use crate::config::{parse_address, ChainConfig, GatewayConfig, TokenConfig};
use crate::types::{lower_hex, RouterInfo};
use alloy::primitives::Address;
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use tracing::{info, warn};

impl EvmBridge {
    // ========================================================================
    // Contract reads
    // ========================================================================

    pub async fn get_mpc_address(&self, router: &Address) -> crate::error::SwapResult<Address> {
        Ok(self.call_contract(router, &Router::mpcCall {}, "latest").await?._0)
    }

    pub async fn get_factory_address(&self, router: &Address) -> crate::error::SwapResult<Address> {
        Ok(self.call_contract(router, &Router::factoryCall {}, "latest").await?._0)
    }

    pub async fn get_wnative_address(&self, router: &Address) -> crate::error::SwapResult<Address> {
        Ok(self.call_contract(router, &Router::wNATIVECall {}, "latest").await?._0)
    }

    pub async fn get_erc20_decimals(&self, token: &Address) -> crate::error::SwapResult<u8> {
        Ok(self.call_contract(token, &AnyToken::decimalsCall {}, "latest").await?._0)
    }

    pub async fn get_underlying_address(&self, token: &Address) -> crate::error::SwapResult<Address> {
        Ok(self.call_contract(token, &AnyToken::underlyingCall {}, "latest").await?._0)
    }

    // ========================================================================
    // Token checks
    // ========================================================================

    async fn check_token_decimals(&self, token: &Address, cfg: &TokenConfig) -> Result<()> {
        let decimals = self
            .get_erc20_decimals(token)
            .await
            .map_err(|e| eyre!("get decimals of {} failed: {}", token, e))?;
        if decimals != cfg.decimals {
            return Err(eyre!(
                "token decimals mismatch, have {} want {}",
                decimals,
                cfg.decimals
            ));
        }
        info!(
            chain_id = %self.chain_id_str(),
            token_id = %cfg.token_id,
            token = %token,
            decimals = decimals,
            "Check token decimals success"
        );
        Ok(())
    }

    /// Standard tokens must name the router as minter
    async fn check_token_minter(&self, token: &Address, cfg: &TokenConfig, router: &Address) -> Result<()> {
        if !cfg.is_standard_version() {
            return Ok(());
        }
        let is_minter = match cfg.contract_version {
            1 | 2 => {
                let owner = self
                    .call_contract(token, &AnyToken::ownerCall {}, "latest")
                    .await
                    .map_err(|e| eyre!("get owner of {} failed: {}", token, e))?
                    ._0;
                owner == *router
            }
            3 => {
                let vault = self
                    .call_contract(token, &AnyToken::vaultCall {}, "latest")
                    .await
                    .map_err(|e| eyre!("get vault of {} failed: {}", token, e))?
                    ._0;
                vault == *router
            }
            _ => {
                self.call_contract(token, &AnyToken::isMinterCall { account: *router }, "latest")
                    .await
                    .map_err(|e| eyre!("call isMinter of {} failed: {}", token, e))?
                    ._0
            }
        };
        if !is_minter {
            return Err(eyre!(
                "router contract {} is not the minter of token {} (version {})",
                router,
                token,
                cfg.contract_version
            ));
        }
        Ok(())
    }

    /// Decimals, minter and underlying of a token; marks it checked
    async fn check_token_config(&self, cfg: &mut TokenConfig) -> Result<()> {
        if cfg.checked {
            return Ok(());
        }
        let token = parse_address(&cfg.contract_address, "token contract")?;

        if !cfg.is_standard_version() {
            let wrapped = self
                .call_contract(&token, &MintBurnWrapper::tokenCall {}, "latest")
                .await
                .map_err(|e| eyre!("get wrapped token of {} failed: {}", token, e))?
                ._0;
            self.check_token_decimals(&wrapped, cfg).await?;
            cfg.checked = true;
            return Ok(());
        }

        self.check_token_decimals(&token, cfg).await?;

        let router = match &cfg.router_contract {
            Some(router) => router.clone(),
            None => self
                .chain_config()
                .await
                .map(|c| c.router_contract.clone())
                .ok_or_else(|| eyre!("chain config of {} not initialised", self.chain_id_str()))?,
        };
        let router = parse_address(&router, "router contract")?;
        self.check_token_minter(&token, cfg, &router).await?;

        match self.get_underlying_address(&token).await {
            Ok(underlying) => cfg.set_underlying(underlying),
            Err(e) if cfg.is_standard_version() => {
                return Err(eyre!("get underlying of {} failed: {}", token, e));
            }
            Err(_) => cfg.set_underlying(Address::ZERO),
        }
        info!(
            chain_id = %self.chain_id_str(),
            token_id = %cfg.token_id,
            token = %token,
            version = cfg.contract_version,
            underlying = %cfg.underlying(),
            "Check token config success"
        );
        cfg.checked = true;
        Ok(())
    }
}

#[async_trait]
impl ConfigLoader for EvmBridge {
    async fn init_gateway_config(&self, cfg: GatewayConfig) -> Result<()> {
        cfg.validate(self.chain_id_str())?;
        self.set_gateway_config(cfg);
        Ok(())
    }

    async fn init_chain_config(&self, cfg: ChainConfig) -> Result<()> {
        cfg.validate()?;
        if cfg.chain_id.to_string() != self.chain_id_str() {
            return Err(eyre!(
                "chain id mismatch, in config {} in bridge {}",
                cfg.chain_id,
                self.chain_id_str()
            ));
        }
        parse_address(&cfg.router_contract, "router contract")?;
        self.state.set_chain_config(cfg).await;
        Ok(())
    }

    async fn init_token_config(&self, cfg: TokenConfig) -> Result<()> {
        let mut cfg = cfg;
        let token_id = cfg.token_id.clone();
        let address = cfg.contract_address.clone();
        self.check_token_config(&mut cfg).await.wrap_err_with(|| {
            format!(
                "check token config of {} on chain {} failed",
                token_id,
                self.chain_id_str()
            )
        })?;
        self.state.set_token_config(&address, cfg).await;
        Ok(())
    }

    async fn init_router_info(&self, router_contract: &str) -> Result<()> {
        if router_contract.is_empty() {
            return Ok(());
        }
        let chain_id = self.chain_id_str().to_string();
        let registry = self
            .ctx
            .registry()
            .ok_or_else(|| eyre!("registry dropped while initialising chain {}", chain_id))?;
        let router = parse_address(router_contract, "router contract")?;
        info!(chain_id = %chain_id, router = %router_contract, "Start init router info");

        let factory = match self.get_factory_address(&router).await {
            Ok(addr) => lower_hex(&addr),
            Err(e) => {
                warn!(chain_id = %chain_id, router = %router_contract, error = %e, "Get router factory address failed");
                String::new()
            }
        };
        let wnative = match self.get_wnative_address(&router).await {
            Ok(addr) => lower_hex(&addr),
            Err(e) => {
                warn!(chain_id = %chain_id, router = %router_contract, error = %e, "Get router wNative address failed");
                String::new()
            }
        };

        let mpc = self
            .ctx
            .retry
            .run("get_mpc_address", || self.get_mpc_address(&router))
            .await
            .map_err(|e| eyre!("get router mpc address of {} failed: {}", router_contract, e))?;
        if mpc == Address::ZERO {
            return Err(eyre!(
                "empty router mpc address of router contract {} on chain {}",
                router_contract,
                chain_id
            ));
        }
        let mpc = lower_hex(&mpc);
        let pubkey = registry.lookup_mpc_public_key(&mpc).await?;
        super::address::verify_mpc_pubkey(&mpc, &pubkey)?;

        registry
            .set_router_info(
                router_contract,
                &chain_id,
                RouterInfo {
                    router_mpc: mpc.clone(),
                    router_factory: factory,
                    router_wnative: wnative,
                },
            )
            .await;
        registry.set_mpc_public_key(&mpc, &pubkey).await;
        info!(chain_id = %chain_id, router = %router_contract, router_mpc = %mpc, "Init router info success");

        let store = self.ctx.nonce_store.clone();
        let mut stored = 0;
        for attempt in 1..=3 {
            match store.find_next_swap_nonce(&chain_id, &mpc).await {
                Ok(nonce) => {
                    stored = nonce;
                    break;
                }
                Err(e) => warn!(chain_id = %chain_id, account = %mpc, attempt = attempt, error = %e, "Find next swap nonce failed"),
            }
        }
        self.init_swap_nonce(&mpc, stored).await;
        Ok(())
    }

    async fn init_after_config(&self) -> Result<()> {
        let configured = self
            .chain_config()
            .await
            .ok_or_else(|| eyre!("chain config of {} not initialised", self.chain_id_str()))?
            .chain_id;
        let online = self
            .ctx
            .retry
            .run("eth_chainId", || self.get_signer_chain_id())
            .await
            .map_err(|e| eyre!("get signer chain id of {} failed: {}", configured, e))?;
        if configured.as_u64() != Some(online) {
            return Err(eyre!(
                "chain id mismatch, in config {} in bridge {}",
                configured,
                online
            ));
        }
        let dynamic = self.extra().await.dynamic_fee_tx(self.chain_id_str()).is_some();
        info!(chain_id = online, is_eip1559 = dynamic, "Init signer success");
        Ok(())
    }
}
