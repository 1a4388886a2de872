//! Gateway Fan-out Integration Test
//!
//! Endpoint failover and hot-reloaded gateway configs through a live registry.
//!
//! ## Running
//!
//! ```bash
//! cargo test --test gateway_fanout -- --nocapture
//! ```

mod common;

use common::*;
use std::collections::HashMap;
use swap_router::testing::receipt_json;
use swap_router::bridge::ConfigHolder;
use swap_router::{Bridge, GatewayConfig, SwapError};

const ETH_A: &str = "http://eth-a.test";
const ETH_B: &str = "http://eth-b.test";
const ETH_D: &str = "http://eth-d.test";

fn receipt_urls(harness: &Harness) -> Vec<String> {
    harness
        .transport
        .requests()
        .into_iter()
        .filter(|r| r.method == "eth_getTransactionReceipt")
        .map(|r| r.url)
        .collect()
}

#[tokio::test]
async fn test_first_success_stops_after_first_healthy_endpoint() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x21);
    harness.script_receipt(hash, vec![usdc_swapout(usdc(1000), 56)]);

    let gateways = HashMap::from([(
        "1".to_string(),
        GatewayConfig::new(vec![
            ETH_A.to_string(),
            ETH_B.to_string(),
            ETH_URL.to_string(),
            ETH_D.to_string(),
        ]),
    )]);
    assert_eq!(harness.registry.apply_gateway_configs(gateways).await, 1);

    harness.transport.set_down(ETH_A, true).set_down(ETH_B, true);
    harness.transport.reset_requests();

    let status = harness
        .bridge("1")
        .await
        .get_transaction_status(&hash_str(hash))
        .await
        .expect("status through the third endpoint");
    assert_eq!(status.block_height, SWAP_BLOCK);
    assert_eq!(status.confirmations, ETH_LATEST - SWAP_BLOCK);
    assert_eq!(status.block_time, SWAP_TIME);

    assert_eq!(receipt_urls(&harness), vec![ETH_A, ETH_B, ETH_URL]);
}

#[tokio::test]
async fn test_every_endpoint_down() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x22);
    harness.script_receipt(hash, vec![usdc_swapout(usdc(1000), 56)]);
    harness.transport.set_down(ETH_URL, true);

    let err = harness
        .bridge("1")
        .await
        .get_transaction_status(&hash_str(hash))
        .await
        .unwrap_err();
    assert!(err.is(&SwapError::RpcQueryError), "got {:?}", err);
    assert!(err.to_string().contains("eth_getTransactionReceipt"));
}

#[tokio::test]
async fn test_extended_endpoints_serve_missing_receipts() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x23);
    let ext = "http://eth-archive.test";

    let mut cfg = GatewayConfig::new(vec![ETH_URL.to_string()]);
    cfg.api_address_ext = vec![ext.to_string()];
    harness
        .registry
        .apply_gateway_configs(HashMap::from([("1".to_string(), cfg)]))
        .await;

    // only the archive endpoint knows the tx
    harness.transport.on_url(
        ext,
        "eth_getTransactionReceipt",
        receipt_json(hash, SWAP_BLOCK, swapper(), Some(eth_router()), vec![]),
    );

    let status = harness
        .bridge("1")
        .await
        .get_transaction_status(&hash_str(hash))
        .await
        .expect("receipt from the extended endpoint");
    assert_eq!(status.block_height, SWAP_BLOCK);
    assert_eq!(receipt_urls(&harness), vec![ETH_URL, ext]);
}

#[tokio::test]
async fn test_gateway_override_survives_reload() {
    let harness = Harness::start().await;
    let gateways = HashMap::from([(
        "56".to_string(),
        GatewayConfig::new(vec![BSC_URL.to_string(), "http://bsc-b.test".to_string()]),
    )]);
    harness.registry.apply_gateway_configs(gateways).await;

    harness.registry.reload().await;

    let bridge = harness.bridge("56").await;
    assert_eq!(
        bridge.gateway().config().api_address,
        vec![BSC_URL.to_string(), "http://bsc-b.test".to_string()]
    );
}
