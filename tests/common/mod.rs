//! Shared harness for the router integration tests
//!
//! Two scripted EVM chains behind one [`MockTransport`]:
//!
//! - chain `1` at `http://eth.test`, router `0x11..11`, USDC `0x33..33` with 6 decimals
//! - chain `56` at `http://bsc.test`, router `0x22..22`, USDC `0x44..44` with 18 decimals
//!
//! Both routers report the [`LocalMpcSigner`] address as their MPC, so built swap-ins can be
//! signed and recovered end to end. Swap-outs are scripted at block 900 with the source tip at
//! 1000.

#![allow(dead_code)]

use alloy::primitives::{Address, B256, U256};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use swap_router::testing::{
    block_json, receipt_json, swapout_v6_log, EvmChainScript, LocalMpcSigner, MemoryNonceStore,
    MockTransport,
};
use swap_router::types::{lower_hex, SwapType, VerifyArgs};
use swap_router::{Bridge, DefaultBridgeFactory, Registry, RetryConfig, RouterConfig, StaticConfigSource};

pub const ETH_URL: &str = "http://eth.test";
pub const BSC_URL: &str = "http://bsc.test";

pub const ETH_LATEST: u64 = 1000;
pub const SWAP_BLOCK: u64 = 900;
pub const SWAP_TIME: u64 = 1_700_000_000;

pub fn eth_router() -> Address {
    Address::repeat_byte(0x11)
}

pub fn bsc_router() -> Address {
    Address::repeat_byte(0x22)
}

pub fn usdc_eth() -> Address {
    Address::repeat_byte(0x33)
}

pub fn usdc_bsc() -> Address {
    Address::repeat_byte(0x44)
}

pub fn swapper() -> Address {
    Address::repeat_byte(0xaa)
}

pub fn receiver() -> Address {
    Address::repeat_byte(0xbb)
}

/// `amount` whole USDC in source (6 decimal) units
pub fn usdc(amount: u64) -> U256 {
    U256::from(amount) * U256::from(1_000_000u64)
}

pub fn tx_hash(byte: u8) -> B256 {
    B256::repeat_byte(byte)
}

pub fn hash_str(hash: B256) -> String {
    format!("{:#x}", hash)
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init()
        .ok();
}

/// Router config of the two scripted chains, with `extra_toml` appended verbatim
pub fn router_toml(mpc: &str, pubkey: &str, extra_toml: &str) -> String {
    format!(
        r#"
identifier = "router-test"
swap_type = "erc20swap"

[[chains]]
chain_id = "1"
block_chain = "ETH"
router_contract = "{eth_router}"
confirmations = 12

[[chains]]
chain_id = "56"
block_chain = "BSC"
router_contract = "{bsc_router}"
confirmations = 15

[[tokens]]
chain_id = "1"
token_id = "USDC"
decimals = 6
contract_address = "{usdc_eth}"

[[tokens]]
chain_id = "56"
token_id = "USDC"
decimals = 18
contract_address = "{usdc_bsc}"

[[swap_configs]]
token_id = "USDC"
from_chain_id = "1"
to_chain_id = "56"
maximum_swap = "1000000000000000000000000"
minimum_swap = "10000000000000000000"
big_value_threshold = "100000000000000000000000"
swap_fee_rate_per_million = 1000
maximum_swap_fee = "10000000000000000000"
minimum_swap_fee = "1000000000000000000"

[[swap_configs]]
token_id = "USDC"
from_chain_id = "56"
to_chain_id = "1"
maximum_swap = "1000000000000000000000000"
minimum_swap = "10000000000000000000"
big_value_threshold = "100000000000000000000000"
swap_fee_rate_per_million = 1000
maximum_swap_fee = "10000000000000000000"
minimum_swap_fee = "1000000000000000000"

[gateways.1]
api_address = ["{eth_url}"]

[gateways.56]
api_address = ["{bsc_url}"]

[mpc_public_keys]
"{mpc}" = "{pubkey}"

{extra_toml}
"#,
        eth_router = lower_hex(&eth_router()),
        bsc_router = lower_hex(&bsc_router()),
        usdc_eth = lower_hex(&usdc_eth()),
        usdc_bsc = lower_hex(&usdc_bsc()),
        eth_url = ETH_URL,
        bsc_url = BSC_URL,
        mpc = mpc,
        pubkey = pubkey,
        extra_toml = extra_toml,
    )
}

/// Initialised registry over the scripted chains
pub struct Harness {
    pub registry: Arc<Registry>,
    pub transport: Arc<MockTransport>,
    pub signer: Arc<LocalMpcSigner>,
    pub nonce_store: Arc<MemoryNonceStore>,
    pub source: Arc<StaticConfigSource>,
    pub eth: EvmChainScript,
    pub bsc: EvmChainScript,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with("").await
    }

    pub async fn start_with(extra_toml: &str) -> Self {
        Self::try_start(extra_toml, |_| {})
            .await
            .expect("registry init should succeed")
    }

    /// Like [`Harness::start_with`], with `tweak` applied to the script before init
    pub async fn try_start(extra_toml: &str, tweak: impl FnOnce(&MockTransport)) -> eyre::Result<Self> {
        init_tracing();

        let signer = Arc::new(LocalMpcSigner::random());
        let mpc = signer.address();
        let config = RouterConfig::from_toml_str(&router_toml(
            &lower_hex(&mpc),
            &signer.pubkey_hex(),
            extra_toml,
        ))?;

        let transport = Arc::new(MockTransport::new());
        let eth = EvmChainScript {
            chain_id: 1,
            url: ETH_URL.to_string(),
            router: eth_router(),
            mpc,
            latest_block: ETH_LATEST,
        };
        let bsc = EvmChainScript {
            chain_id: 56,
            url: BSC_URL.to_string(),
            router: bsc_router(),
            mpc,
            latest_block: 5000,
        };
        eth.install(&transport);
        eth.install_token(&transport, usdc_eth(), 6);
        bsc.install(&transport);
        bsc.install_token(&transport, usdc_bsc(), 18);
        transport.on(
            "eth_getBlockByNumber",
            block_json(SWAP_BLOCK, SWAP_TIME, Some(1_000_000_000)),
        );
        tweak(&transport);

        let nonce_store = Arc::new(MemoryNonceStore::new());
        let source = Arc::new(StaticConfigSource::new(config));
        let factory = DefaultBridgeFactory::new(
            transport.clone(),
            signer.clone(),
            nonce_store.clone(),
            Duration::from_secs(5),
        )
        .with_retry(RetryConfig::immediate(1));
        let registry = Registry::new(source.clone(), Arc::new(factory));
        registry.init().await?;

        tracing::info!(mpc = %mpc, "Harness ready");

        Ok(Self {
            registry,
            transport,
            signer,
            nonce_store,
            source,
            eth,
            bsc,
        })
    }

    pub async fn bridge(&self, chain_id: &str) -> Arc<dyn Bridge> {
        self.registry
            .get_bridge(chain_id)
            .await
            .unwrap_or_else(|| panic!("bridge {} should be registered", chain_id))
    }

    pub fn mpc(&self) -> String {
        lower_hex(&self.signer.address())
    }

    /// Receipt of `hash` on chain 1: sent by the swapper to the chain 1 router at block 900
    pub fn script_receipt(&self, hash: B256, logs: Vec<Value>) {
        self.transport.on_params(
            "eth_getTransactionReceipt",
            json!([hash_str(hash)]),
            receipt_json(hash, SWAP_BLOCK, swapper(), Some(eth_router()), logs),
        );
    }
}

/// Chain 1 → `to_chain_id` USDC swap-out of `amount` to the receiver
pub fn usdc_swapout(amount: U256, to_chain_id: u64) -> Value {
    swapout_v6_log(
        eth_router(),
        usdc_eth(),
        swapper(),
        receiver(),
        amount,
        1,
        to_chain_id,
    )
}

pub fn verify_args(log_index: usize) -> VerifyArgs {
    VerifyArgs {
        swap_type: SwapType::Erc20Swap,
        log_index,
        allow_unstable: false,
        allow_before_initial_height: false,
    }
}
