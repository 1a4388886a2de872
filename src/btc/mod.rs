//! UTXO Chain Adapter
//!
//! Bitcoin-style chains behind an Esplora REST indexer. These chains have no native chain ID, so
//! they are addressed by stub chain IDs. Only the read side is served here: address checks,
//! tip height and transaction status. The ERC20 router flow does not exist on UTXO chains, so
//! swap verification, build, sign and send report `SwapTypeNotSupported`.

pub mod address;

use crate::bridge::{
    Bridge, ChainState, ConfigHolder, ConfigLoader, MpcSignable, RawTx, SignedTx, SwapCandidate,
};
use crate::config::{ChainConfig, GatewayConfig, TokenConfig};
use crate::error::{SwapError, SwapResult};
use crate::gateway::first_success;
use crate::registry::BridgeContext;
use crate::types::{stub_chain_id, BuildTxArgs, ChainId, RegisterArgs, SwapTxInfo, TxStatus, VerifyArgs};
use async_trait::async_trait;
use eyre::{eyre, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

pub const MAINNET_NAME: &str = "BTC";
pub const TESTNET_NAME: &str = "BTC_TEST";

pub fn mainnet_chain_id() -> ChainId {
    stub_chain_id(MAINNET_NAME)
}

pub fn testnet_chain_id() -> ChainId {
    stub_chain_id(TESTNET_NAME)
}

/// Whether `chain_id` is one of the stub chain IDs served here
pub fn supports_chain_id(chain_id: &ChainId) -> bool {
    *chain_id == mainnet_chain_id() || *chain_id == testnet_chain_id()
}

/// `GET /tx/{hash}/status`
#[derive(Debug, Clone, Deserialize)]
struct EsploraTxStatus {
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u64>,
    #[serde(default)]
    block_hash: Option<String>,
    #[serde(default)]
    block_time: Option<u64>,
}

/// Tip height comes back as a bare number, sometimes as text
fn parse_height(value: Value) -> SwapResult<u64> {
    match &value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| SwapError::ParseData(format!("tip height '{}'", value)))
}

fn trim_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Bridge adapter of a UTXO chain
pub struct BtcBridge {
    chain_id: ChainId,
    testnet: bool,
    state: ChainState,
    ctx: BridgeContext,
}

impl std::fmt::Debug for BtcBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtcBridge")
            .field("chain_id", &self.chain_id)
            .field("testnet", &self.testnet)
            .finish_non_exhaustive()
    }
}

impl BtcBridge {
    pub fn new(chain_id: &ChainId, ctx: BridgeContext) -> Self {
        Self {
            chain_id: *chain_id,
            testnet: *chain_id == testnet_chain_id(),
            state: ChainState::new(&chain_id.to_string()),
            ctx,
        }
    }

    pub fn is_testnet(&self) -> bool {
        self.testnet
    }

    async fn get_json(&self, url: String) -> SwapResult<Value> {
        self.ctx.transport.get(&url).await
    }

    async fn get_tx_status(&self, tx_hash: &str) -> SwapResult<EsploraTxStatus> {
        let urls = self.state.gateway().api_urls();
        let value = first_success(&urls, "GET /tx/status", tx_hash, |url| {
            self.get_json(format!("{}/tx/{}/status", trim_url(&url), tx_hash))
        })
        .await?;
        serde_json::from_value(value).map_err(|e| SwapError::ParseData(format!("tx status: {}", e)))
    }
}

impl ConfigHolder for BtcBridge {
    fn state(&self) -> &ChainState {
        &self.state
    }
}

#[async_trait]
impl ConfigLoader for BtcBridge {
    async fn init_gateway_config(&self, cfg: GatewayConfig) -> Result<()> {
        cfg.validate(self.chain_id())?;
        self.set_gateway_config(cfg);
        Ok(())
    }

    async fn init_chain_config(&self, cfg: ChainConfig) -> Result<()> {
        cfg.validate()?;
        if cfg.chain_id != self.chain_id {
            return Err(eyre!(
                "chain id mismatch, in config {} in bridge {}",
                cfg.chain_id,
                self.chain_id
            ));
        }
        self.state.set_chain_config(cfg).await;
        Ok(())
    }

    async fn init_token_config(&self, cfg: TokenConfig) -> Result<()> {
        if cfg.contract_address.is_empty() {
            return Err(eyre!("empty token address of {} on chain {}", cfg.token_id, self.chain_id));
        }
        let address = cfg.contract_address.clone();
        self.state.set_token_config(&address, cfg).await;
        Ok(())
    }

    async fn init_router_info(&self, router_contract: &str) -> Result<()> {
        info!(chain_id = %self.chain_id, router = %router_contract, "No router contract on utxo chain");
        Ok(())
    }

    async fn init_after_config(&self) -> Result<()> {
        info!(chain_id = %self.chain_id, testnet = self.testnet, "Init utxo bridge success");
        Ok(())
    }
}

#[async_trait]
impl MpcSignable for BtcBridge {
    async fn mpc_sign_transaction(&self, _raw_tx: &RawTx, _args: &BuildTxArgs) -> SwapResult<(SignedTx, String)> {
        Err(SwapError::SwapTypeNotSupported)
    }

    fn verify_msg_hash(&self, _raw_tx: &RawTx, _msg_hashes: &[String]) -> SwapResult<()> {
        Err(SwapError::SwapTypeNotSupported)
    }
}

#[async_trait]
impl Bridge for BtcBridge {
    fn is_valid_address(&self, address: &str) -> bool {
        address::is_valid_address(address, self.testnet)
    }

    async fn get_latest_block_number(&self) -> SwapResult<u64> {
        let urls = self.state.gateway().api_urls();
        let value = first_success(&urls, "GET /blocks/tip/height", (), |url| {
            self.get_json(format!("{}/blocks/tip/height", trim_url(&url)))
        })
        .await?;
        parse_height(value)
    }

    async fn get_latest_block_number_of(&self, url: &str) -> SwapResult<u64> {
        parse_height(self.get_json(format!("{}/blocks/tip/height", trim_url(url))).await?)
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> SwapResult<TxStatus> {
        let status = self.get_tx_status(tx_hash).await?;
        let height = match (status.confirmed, status.block_height) {
            (true, Some(height)) => height,
            _ => return Err(SwapError::TxNotStable),
        };
        let latest = self.get_latest_block_number().await?;
        if let Some(registry) = self.ctx.registry() {
            registry.set_latest_block(self.chain_id(), latest);
        }
        Ok(TxStatus {
            // the inclusion block counts as the first confirmation
            confirmations: latest.saturating_sub(height) + 1,
            block_height: height,
            block_hash: status.block_hash.unwrap_or_default(),
            block_time: status.block_time.unwrap_or_default(),
        })
    }

    async fn register_swap(&self, tx_hash: &str, args: &RegisterArgs) -> Vec<SwapCandidate> {
        let index = args.log_index.specific().unwrap_or(0);
        let info = SwapTxInfo::new(args.swap_type, tx_hash, index);
        vec![SwapCandidate::failed(info, SwapError::SwapTypeNotSupported)]
    }

    async fn verify_transaction(&self, _tx_hash: &str, _args: &VerifyArgs) -> SwapResult<SwapTxInfo> {
        Err(SwapError::SwapTypeNotSupported)
    }

    async fn build_raw_transaction(&self, _args: &mut BuildTxArgs) -> SwapResult<RawTx> {
        Err(SwapError::SwapTypeNotSupported)
    }

    async fn send_transaction(&self, _signed_tx: &SignedTx) -> SwapResult<String> {
        Err(SwapError::SwapTypeNotSupported)
    }
}
