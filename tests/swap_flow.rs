//! Swap-in Flow Integration Test
//!
//! Verify on chain 1, then build, MPC-sign and broadcast the swap-in on chain 56.
//!
//! ## Running
//!
//! ```bash
//! cargo test --test swap_flow -- --nocapture
//! ```

mod common;

use alloy::primitives::U256;
use common::*;
use serde_json::json;
use swap_router::bridge::{RawTx, SignedTx};
use swap_router::evm::sign::signing_hash;
use swap_router::types::{lower_hex, BuildTxArgs, SwapArgs, SwapTxInfo};
use swap_router::{Bridge, MpcSignable, NonceSetter, SwapError};

const GAS_PRICE: u128 = 5_000_000_000;

fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::from(10u64).pow(U256::from(18u64))
}

fn script_destination(harness: &Harness, pool_nonce: u64) {
    harness
        .transport
        .on("eth_gasPrice", json!(format!("{:#x}", GAS_PRICE)))
        .on("eth_estimateGas", json!("0x186a0"))
        // 10 ether
        .on("eth_getBalance", json!("0x8ac7230489e80000"))
        .on_url(BSC_URL, "eth_getTransactionCount", json!(format!("{:#x}", pool_nonce)));
}

fn build_args(harness: &Harness, info: &SwapTxInfo) -> BuildTxArgs {
    BuildTxArgs {
        swap: SwapArgs {
            identifier: "router-test".to_string(),
            swap_id: info.hash.clone(),
            swap_type: info.swap_type,
            bind: info.bind.clone(),
            log_index: info.log_index,
            from_chain_id: info.from_chain_id,
            to_chain_id: info.to_chain_id,
            swap_info: info.swap_info.clone(),
        },
        from: harness.mpc(),
        origin_from: info.from.clone(),
        origin_tx_to: info.tx_to.clone(),
        origin_value: info.value,
        ..Default::default()
    }
}

async fn verified_swapout(harness: &Harness, byte: u8) -> SwapTxInfo {
    let hash = tx_hash(byte);
    harness.script_receipt(hash, vec![usdc_swapout(usdc(1000), 56)]);
    harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .expect("swap-out should verify")
}

#[tokio::test]
async fn test_build_sign_send_swap_in() {
    let harness = Harness::start().await;
    let info = verified_swapout(&harness, 0x31).await;
    script_destination(&harness, 5);

    let bridge = harness.bridge("56").await;
    let mut args = build_args(&harness, &info);
    let raw = bridge
        .build_raw_transaction(&mut args)
        .await
        .expect("swap-in should build");

    // 1000 USDC minus the 0.1% fee, rescaled from 6 to 18 decimals
    assert_eq!(args.swap_value, ether(999));
    assert_eq!(args.to, lower_hex(&bsc_router()));
    assert!(args.input.is_some());
    let eth = args.extra.eth_extra.clone().expect("eth extras filled in");
    assert_eq!(eth.gas_price, Some(GAS_PRICE));
    assert_eq!(eth.gas, Some(130_000));
    assert_eq!(eth.nonce, Some(5));

    let RawTx::Evm(tx) = &raw;
    let msg_hash = format!("{:#x}", signing_hash(tx).expect("legacy tx hash"));
    assert!(bridge.verify_msg_hash(&raw, &[msg_hash.clone()]).is_ok());
    assert_eq!(
        bridge.verify_msg_hash(&raw, &[msg_hash.clone(), msg_hash]),
        Err(SwapError::WrongCountOfMsgHashes)
    );
    assert_eq!(
        bridge.verify_msg_hash(&raw, &[hash_str(tx_hash(0xee))]),
        Err(SwapError::MsgHashMismatch)
    );

    let (signed, signed_hash) = bridge
        .mpc_sign_transaction(&raw, &args)
        .await
        .expect("mpc should sign");
    assert_eq!(harness.signer.rounds(), 1);
    let SignedTx::Evm(envelope) = &signed;
    assert_eq!(
        envelope.recover_signer().expect("recoverable signature"),
        harness.signer.address()
    );

    harness
        .transport
        .on("eth_sendRawTransaction", json!(signed_hash.clone()));
    let sent = bridge
        .send_transaction(&signed)
        .await
        .expect("broadcast should succeed");
    assert_eq!(sent, signed_hash);

    let nonces = bridge.as_nonce_setter().expect("evm chains track nonces");
    assert_eq!(nonces.nonces().get_swap_nonce(&harness.mpc()).await, 6);
}

#[tokio::test]
async fn test_build_rebuilds_same_transaction() {
    let harness = Harness::start().await;
    let info = verified_swapout(&harness, 0x32).await;
    script_destination(&harness, 2);

    let bridge = harness.bridge("56").await;
    let mut args = build_args(&harness, &info);
    let RawTx::Evm(first) = bridge.build_raw_transaction(&mut args).await.unwrap();

    // a retry with the filled-in args reuses every chosen default
    harness.transport.on("eth_gasPrice", json!("0x1"));
    let mut retry = args.clone();
    retry.input = None;
    let RawTx::Evm(second) = bridge.build_raw_transaction(&mut retry).await.unwrap();
    assert_eq!(signing_hash(&first).unwrap(), signing_hash(&second).unwrap());
    assert_eq!(retry.extra, args.extra);
}

#[tokio::test]
async fn test_build_into_paused_chain() {
    let harness = Harness::start().await;
    let info = verified_swapout(&harness, 0x33).await;
    script_destination(&harness, 0);
    harness.registry.pause_chain("56").await;

    let mut args = build_args(&harness, &info);
    let err = harness
        .bridge("56")
        .await
        .build_raw_transaction(&mut args)
        .await
        .unwrap_err();
    assert_eq!(err, SwapError::PauseSwapInto);

    harness.registry.unpause_chain("56").await;
    let mut args = build_args(&harness, &info);
    assert!(harness.bridge("56").await.build_raw_transaction(&mut args).await.is_ok());
}

#[tokio::test]
async fn test_build_from_wrong_sender() {
    let harness = Harness::start().await;
    let info = verified_swapout(&harness, 0x34).await;
    script_destination(&harness, 0);

    let mut args = build_args(&harness, &info);
    args.from = lower_hex(&receiver());
    let err = harness
        .bridge("56")
        .await
        .build_raw_transaction(&mut args)
        .await
        .unwrap_err();
    assert_eq!(err, SwapError::SenderMismatch);
}

#[tokio::test]
async fn test_build_on_wrong_destination() {
    let harness = Harness::start().await;
    let info = verified_swapout(&harness, 0x35).await;

    let mut args = build_args(&harness, &info);
    let err = harness
        .bridge("1")
        .await
        .build_raw_transaction(&mut args)
        .await
        .unwrap_err();
    assert_eq!(err, SwapError::ToChainIdMismatch);
}

#[tokio::test]
async fn test_build_without_coin_balance() {
    let harness = Harness::start().await;
    let info = verified_swapout(&harness, 0x36).await;
    script_destination(&harness, 0);
    harness.transport.on("eth_getBalance", json!("0x0"));

    let mut args = build_args(&harness, &info);
    let err = harness
        .bridge("56")
        .await
        .build_raw_transaction(&mut args)
        .await
        .unwrap_err();
    assert!(matches!(err, SwapError::NotEnoughBalance(_)), "got {:?}", err);
    // a failed build does not consume a nonce
    assert!(args.extra.eth_extra.and_then(|e| e.nonce).is_none());
}

#[tokio::test]
async fn test_send_rejected_everywhere() {
    let harness = Harness::start().await;
    let info = verified_swapout(&harness, 0x37).await;
    script_destination(&harness, 0);

    let bridge = harness.bridge("56").await;
    let mut args = build_args(&harness, &info);
    let raw = bridge.build_raw_transaction(&mut args).await.unwrap();
    let (signed, _) = bridge.mpc_sign_transaction(&raw, &args).await.unwrap();

    harness
        .transport
        .fail("eth_sendRawTransaction", "insufficient funds for gas * price + value");
    assert!(bridge.send_transaction(&signed).await.is_err());
    let nonces = bridge.as_nonce_setter().unwrap();
    assert_eq!(nonces.nonces().get_swap_nonce(&harness.mpc()).await, 0);

    harness
        .transport
        .fail("eth_sendRawTransaction", "already known");
    assert!(bridge.send_transaction(&signed).await.is_ok());
    assert_eq!(nonces.nonces().get_swap_nonce(&harness.mpc()).await, 1);
}

#[tokio::test]
async fn test_parallel_build_recycles_rejected_nonce() {
    let harness = Harness::start_with("[extra]\nparallel_swap = [\"56\"]\n").await;
    let info = verified_swapout(&harness, 0x38).await;
    script_destination(&harness, 0);

    let bridge = harness.bridge("56").await;
    let nonces = bridge.as_nonce_setter().expect("evm chains track nonces");
    // far beyond any plausible first nonce
    nonces
        .nonces()
        .init_swap_nonce(&harness.mpc(), 20_000_000, None)
        .await;

    let mut args = build_args(&harness, &info);
    let err = bridge.build_raw_transaction(&mut args).await.unwrap_err();
    assert!(matches!(err, SwapError::NonceOutOfRange { .. }), "got {:?}", err);
    assert_eq!(nonces.nonces().recycled_nonce(&harness.mpc()), Some(20_000_000));
    assert!(args.extra.eth_extra.and_then(|e| e.nonce).is_none());
}
