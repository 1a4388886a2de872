//! Swap-out Verification Integration Test
//!
//! Runs the chain 1 adapter's verify and register flows against scripted receipts.
//!
//! ## Running
//!
//! ```bash
//! cargo test --test verify_scenarios -- --nocapture
//! ```

mod common;

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use common::*;
use serde_json::json;
use swap_router::evm::contracts::{AnyToken, Router};
use swap_router::testing::{
    abi_address, abi_bool, abi_u256, receipt_json, removed, swapout_v6_log, swapout_v7_log,
    transaction_json, transfer_log, truncate_data,
};
use swap_router::types::{lower_hex, ChainId, LogIndex, RegisterArgs, SwapType};
use swap_router::{Bridge, SwapError};

fn underlying() -> Address {
    Address::repeat_byte(0x55)
}

/// Receipt of `hash` on chain 1 whose direct recipient is `tx_to`
fn script_receipt_to(harness: &Harness, hash: B256, tx_to: Address, logs: Vec<serde_json::Value>) {
    harness.transport.on_params(
        "eth_getTransactionReceipt",
        json!([hash_str(hash)]),
        receipt_json(hash, SWAP_BLOCK, swapper(), Some(tx_to), logs),
    );
}

async fn verify_err(harness: &Harness, hash: B256) -> SwapError {
    harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .unwrap_err()
}

/// Runtime code of an EIP-1167 minimal proxy in front of `master`
fn eip1167_code(master: Address) -> String {
    format!(
        "0x363d3d373d3d3d363d73{}5af43d82803e903d91602b57fd5bf3",
        hex::encode(master)
    )
}

#[tokio::test]
async fn test_verify_swapout_success() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x01);
    harness.script_receipt(hash, vec![usdc_swapout(usdc(1000), 56)]);

    let bridge = harness.bridge("1").await;
    let info = bridge
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .expect("swap-out should verify");

    assert_eq!(info.hash, hash_str(hash));
    assert_eq!(info.height, SWAP_BLOCK);
    assert_eq!(info.timestamp, SWAP_TIME);
    assert_eq!(info.value, usdc(1000));
    assert_eq!(info.bind, lower_hex(&receiver()));
    assert_eq!(info.from, lower_hex(&swapper()));
    assert_eq!(info.to, lower_hex(&eth_router()));
    assert_eq!(info.tx_to, lower_hex(&eth_router()));
    assert_eq!(info.from_chain_id, ChainId::from_u64(1));
    assert_eq!(info.to_chain_id, ChainId::from_u64(56));
    assert_eq!(info.token_id(), "USDC");
    let erc20 = info.swap_info.erc20().expect("erc20 swap info");
    assert_eq!(erc20.token, lower_hex(&usdc_eth()));
    assert!(erc20.swapout_id.is_none());
}

#[tokio::test]
async fn test_verify_log_from_unknown_contract() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x02);
    let log = swapout_v6_log(
        Address::repeat_byte(0x99),
        usdc_eth(),
        swapper(),
        receiver(),
        usdc(1000),
        1,
        56,
    );
    harness.script_receipt(hash, vec![log]);

    let err = harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .unwrap_err();
    assert_eq!(err, SwapError::TxWithWrongContract);
}

#[tokio::test]
async fn test_verify_removed_log() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x03);
    harness.script_receipt(hash, vec![removed(usdc_swapout(usdc(1000), 56))]);

    let err = harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .unwrap_err();
    assert_eq!(err, SwapError::TxWithRemovedLog);
}

#[tokio::test]
async fn test_verify_short_log_data() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x04);
    harness.script_receipt(hash, vec![truncate_data(usdc_swapout(usdc(1000), 56), 64)]);

    let err = harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .unwrap_err();
    assert!(matches!(err, SwapError::ParseData(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_verify_unknown_destination_chain() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x05);
    harness.script_receipt(hash, vec![usdc_swapout(usdc(1000), 137)]);

    let err = harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .unwrap_err();
    assert_eq!(err, SwapError::NoBridgeForChainId);
}

#[tokio::test]
async fn test_verify_value_below_minimum() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x06);
    harness.script_receipt(hash, vec![usdc_swapout(usdc(5), 56)]);

    let err = harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .unwrap_err();
    assert_eq!(err, SwapError::TxWithWrongValue);
}

#[tokio::test]
async fn test_verify_unstable_then_stable() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x07);
    harness.script_receipt(hash, vec![usdc_swapout(usdc(1000), 56)]);
    harness.eth.set_latest_block(&harness.transport, SWAP_BLOCK + 5);

    let bridge = harness.bridge("1").await;
    let err = bridge
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .unwrap_err();
    assert_eq!(err, SwapError::TxNotStable);

    let mut args = verify_args(0);
    args.allow_unstable = true;
    assert!(bridge.verify_transaction(&hash_str(hash), &args).await.is_ok());

    harness.eth.set_latest_block(&harness.transport, SWAP_BLOCK + 12);
    assert!(bridge
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_verify_log_index_out_of_range() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x08);
    harness.script_receipt(hash, vec![usdc_swapout(usdc(1000), 56)]);

    let err = harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &verify_args(3))
        .await
        .unwrap_err();
    assert_eq!(err, SwapError::LogIndexOutOfRange);
}

#[tokio::test]
async fn test_verify_is_idempotent() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x09);
    harness.script_receipt(hash, vec![usdc_swapout(usdc(250), 56)]);

    let bridge = harness.bridge("1").await;
    let first = bridge.verify_transaction(&hash_str(hash), &verify_args(0)).await;
    let second = bridge.verify_transaction(&hash_str(hash), &verify_args(0)).await;
    assert!(first.is_ok());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_register_discovers_every_swapout() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x0a);

    // a router log carrying a non swap-out topic
    let router_transfer = transfer_log(eth_router(), swapper(), receiver(), usdc(1));

    harness.script_receipt(
        hash,
        vec![
            transfer_log(usdc_eth(), swapper(), Address::ZERO, usdc(100)),
            usdc_swapout(usdc(100), 56),
            router_transfer,
            usdc_swapout(usdc(300), 56),
        ],
    );
    let bridge = harness.bridge("1").await;

    let all = RegisterArgs {
        swap_type: SwapType::Erc20Swap,
        log_index: LogIndex::All,
        allow_before_initial_height: false,
    };
    let candidates = bridge.register_swap(&hash_str(hash), &all).await;
    tracing::info!(count = candidates.len(), "Registered candidates");
    assert_eq!(candidates.len(), 2);
    assert!(candidates.iter().all(|c| c.error.is_none()));
    assert_eq!(candidates[0].info.log_index, 1);
    assert_eq!(candidates[0].info.value, usdc(100));
    assert_eq!(candidates[1].info.log_index, 3);
    assert_eq!(candidates[1].info.value, usdc(300));

    let specific = |index| RegisterArgs {
        swap_type: SwapType::Erc20Swap,
        log_index: LogIndex::Specific(index),
        allow_before_initial_height: false,
    };
    let first = bridge.register_swap(&hash_str(hash), &specific(0)).await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].error, Some(SwapError::TxWithWrongContract));

    let third = bridge.register_swap(&hash_str(hash), &specific(2)).await;
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].error, Some(SwapError::SwapoutLogNotFound));

    let second = bridge.register_swap(&hash_str(hash), &specific(1)).await;
    assert_eq!(second.len(), 1);
    assert!(second[0].error.is_none());
}

#[tokio::test]
async fn test_register_without_swapout() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x0b);
    harness.script_receipt(
        hash,
        vec![transfer_log(usdc_eth(), swapper(), receiver(), U256::from(1u64))],
    );

    let args = RegisterArgs {
        swap_type: SwapType::Erc20Swap,
        log_index: LogIndex::All,
        allow_before_initial_height: false,
    };
    let candidates = harness
        .bridge("1")
        .await
        .register_swap(&hash_str(hash), &args)
        .await;
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].error, Some(SwapError::SwapoutLogNotFound));
}

#[tokio::test]
async fn test_verify_missing_receipt() {
    let harness = Harness::start().await;
    let err = harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(tx_hash(0x0c)), &verify_args(0))
        .await
        .unwrap_err();
    assert_eq!(err, SwapError::TxNotFound);
}

#[tokio::test]
async fn test_verify_receipt_rpc_outage_is_not_missing_tx() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x0d);
    harness.script_receipt(hash, vec![usdc_swapout(usdc(1000), 56)]);
    harness.transport.set_down(ETH_URL, true);

    let err = verify_err(&harness, hash).await;
    assert!(err.is(&SwapError::RpcQueryError), "got {:?}", err);
    assert_ne!(err, SwapError::TxNotFound);
}

#[tokio::test]
async fn test_verify_removed_log_of_unknown_token() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x0e);
    let log = swapout_v6_log(
        eth_router(),
        Address::repeat_byte(0x77),
        swapper(),
        receiver(),
        usdc(1000),
        1,
        56,
    );
    harness.script_receipt(hash, vec![removed(log)]);

    assert_eq!(verify_err(&harness, hash).await, SwapError::TxWithRemovedLog);
}

// ============================================================================
// Safety checks
// ============================================================================

#[tokio::test]
async fn test_verify_underlying_payment_below_threshold() {
    let harness = Harness::try_start("", |mock| {
        mock.on_call(usdc_eth(), AnyToken::underlyingCall::SELECTOR, abi_address(underlying()));
    })
    .await
    .expect("init with an underlying token");

    // 79% of the claimed value reached the token
    let short = tx_hash(0x21);
    harness.script_receipt(
        short,
        vec![
            transfer_log(underlying(), swapper(), usdc_eth(), usdc(790)),
            usdc_swapout(usdc(1000), 56),
        ],
    );
    let err = harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(short), &verify_args(1))
        .await
        .unwrap_err();
    assert_eq!(err, SwapError::VerifyTxUnsafe);

    let paid = tx_hash(0x22);
    harness.script_receipt(
        paid,
        vec![
            transfer_log(underlying(), swapper(), usdc_eth(), usdc(1000)),
            usdc_swapout(usdc(1000), 56),
        ],
    );
    assert!(harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(paid), &verify_args(1))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_verify_underlying_scan_stops_at_mint() {
    let harness = Harness::try_start("", |mock| {
        mock.on_call(usdc_eth(), AnyToken::underlyingCall::SELECTOR, abi_address(underlying()));
    })
    .await
    .expect("init with an underlying token");

    // the payment sits behind a mint of the wrapping token
    let hash = tx_hash(0x23);
    harness.script_receipt(
        hash,
        vec![
            transfer_log(underlying(), swapper(), usdc_eth(), usdc(1000)),
            transfer_log(usdc_eth(), Address::ZERO, swapper(), usdc(1000)),
            usdc_swapout(usdc(1000), 56),
        ],
    );
    let err = harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &verify_args(2))
        .await
        .unwrap_err();
    assert_eq!(err, SwapError::VerifyTxUnsafe);
}

#[tokio::test]
async fn test_verify_token_balance_delta() {
    let harness = Harness::start_with("[extra]\ncheck_token_balance = [\"1\"]\n").await;
    let hash = tx_hash(0x24);
    harness.script_receipt(hash, vec![usdc_swapout(usdc(1000), 56)]);

    let balance_of = AnyToken::balanceOfCall::SELECTOR;
    let before = format!("{:#x}", SWAP_BLOCK - 1);
    let after = format!("{:#x}", SWAP_BLOCK);
    harness
        .transport
        .on_call_at(usdc_eth(), balance_of, &before, abi_u256(usdc(1000)))
        .on_call_at(usdc_eth(), balance_of, &after, abi_u256(usdc(500)));
    assert_eq!(verify_err(&harness, hash).await, SwapError::VerifyTxUnsafe);

    harness
        .transport
        .on_call_at(usdc_eth(), balance_of, &after, abi_u256(U256::ZERO));
    assert!(harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_verify_call_by_contract_allowlist() {
    let caller = Address::repeat_byte(0x66);
    let hash = tx_hash(0x25);

    let harness = Harness::start().await;
    script_receipt_to(&harness, hash, caller, vec![usdc_swapout(usdc(1000), 56)]);
    assert_eq!(verify_err(&harness, hash).await, SwapError::TxWithWrongContract);

    let extra = format!(
        "[extra]\ncall_by_contract_whitelist = {{ \"1\" = [\"{}\"] }}\n",
        lower_hex(&caller)
    );
    let harness = Harness::start_with(&extra).await;
    script_receipt_to(&harness, hash, caller, vec![usdc_swapout(usdc(1000), 56)]);
    let info = harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .expect("allowlisted caller");
    assert_eq!(info.tx_to, lower_hex(&caller));
}

#[tokio::test]
async fn test_verify_call_through_eip1167_proxy() {
    let proxy = Address::repeat_byte(0x67);
    let master = Address::repeat_byte(0x68);
    let hash = tx_hash(0x26);
    let extra = format!(
        "[extra]\ncheck_eip1167_master = true\ncall_by_contract_whitelist = {{ \"1\" = [\"{}\"] }}\n",
        lower_hex(&master)
    );
    let harness = Harness::start_with(&extra).await;
    script_receipt_to(&harness, hash, proxy, vec![usdc_swapout(usdc(1000), 56)]);

    // not a proxy yet
    harness.transport.on_url(ETH_URL, "eth_getCode", json!("0x6080"));
    assert_eq!(verify_err(&harness, hash).await, SwapError::TxWithWrongContract);

    harness
        .transport
        .on_url(ETH_URL, "eth_getCode", json!(eip1167_code(master)));
    assert!(harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_verify_call_by_allowlisted_code_hash() {
    let caller = Address::repeat_byte(0x69);
    let code = Bytes::from(vec![0x60, 0x80, 0x60, 0x40, 0x52]);
    let hash = tx_hash(0x27);

    let extra = format!(
        "[extra]\ncall_by_contract_code_hash_whitelist = {{ \"1\" = [\"{:#x}\"] }}\n",
        keccak256(&code)
    );
    let harness = Harness::start_with(&extra).await;
    script_receipt_to(&harness, hash, caller, vec![usdc_swapout(usdc(1000), 56)]);
    harness.transport.on_url(ETH_URL, "eth_getCode", json!(code));
    assert!(harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .is_ok());

    let other = Address::repeat_byte(0x6a);
    let rejected = tx_hash(0x28);
    harness
        .transport
        .on_url(ETH_URL, "eth_getCode", json!(Bytes::from(vec![0x60, 0x00])));
    script_receipt_to(&harness, rejected, other, vec![usdc_swapout(usdc(1000), 56)]);
    assert_eq!(verify_err(&harness, rejected).await, SwapError::TxWithWrongContract);
}

#[tokio::test]
async fn test_verify_before_initial_height() {
    let harness = Harness::start().await;
    let mut cfg = (*harness.source.current().await).clone();
    cfg.chains[0].initial_height = SWAP_BLOCK + 50;
    harness.source.replace(cfg).await;
    assert!(harness.registry.reload().await);

    let hash = tx_hash(0x29);
    harness.script_receipt(hash, vec![usdc_swapout(usdc(1000), 56)]);
    assert_eq!(verify_err(&harness, hash).await, SwapError::TxBeforeInitialHeight);

    // backfill of old swaps
    let mut args = verify_args(0);
    args.allow_before_initial_height = true;
    assert!(harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &args)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_verify_v7_swapout_id_registry() {
    let harness = Harness::start_with("[extra]\ncheck_swapout_id = [\"1\"]\n").await;
    let hash = tx_hash(0x2a);
    let swapout_id = B256::repeat_byte(0x7a);
    harness.script_receipt(
        hash,
        vec![swapout_v7_log(
            eth_router(),
            swapout_id,
            usdc_eth(),
            swapper(),
            &lower_hex(&receiver()),
            usdc(1000),
            56,
        )],
    );

    let exists = Router::isSwapoutIDExistCall::SELECTOR;
    harness.transport.on_call(eth_router(), exists, abi_bool(false));
    assert_eq!(verify_err(&harness, hash).await, SwapError::SwapoutIdNotExist);

    harness.transport.on_call(eth_router(), exists, abi_bool(true));
    let info = harness
        .bridge("1")
        .await
        .verify_transaction(&hash_str(hash), &verify_args(0))
        .await
        .expect("registered swapout id");
    let erc20 = info.swap_info.erc20().expect("erc20 swap info");
    assert_eq!(erc20.swapout_id, Some(format!("{:#x}", swapout_id)));
    assert_eq!(info.from_chain_id, ChainId::from_u64(1));
}

#[tokio::test]
async fn test_verify_permit_swapout_forbidden() {
    let harness = Harness::start_with("[extra]\nforbid_permit_swapout = true\n").await;
    let hash = tx_hash(0x2b);
    harness.script_receipt(hash, vec![usdc_swapout(usdc(1000), 56)]);

    let mut input = Router::anySwapOutUnderlyingWithPermitCall::SELECTOR.to_vec();
    input.extend_from_slice(&[0u8; 32]);
    harness.transport.on_params(
        "eth_getTransactionByHash",
        json!([hash_str(hash)]),
        transaction_json(hash, swapper(), Some(eth_router()), Bytes::from(input), 0),
    );
    assert_eq!(verify_err(&harness, hash).await, SwapError::SwapoutForbidden);
}

#[tokio::test]
async fn test_verify_token_swapout_forbidden() {
    let harness = Harness::start_with("[extra]\nswapout_forbid = { USDC = [\"1\"] }\n").await;
    let hash = tx_hash(0x2c);
    harness.script_receipt(hash, vec![usdc_swapout(usdc(1000), 56)]);

    assert_eq!(verify_err(&harness, hash).await, SwapError::SwapoutForbidden);
}

#[tokio::test]
async fn test_verify_wrong_bind_address() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x2d);
    harness.script_receipt(
        hash,
        vec![swapout_v7_log(
            eth_router(),
            B256::repeat_byte(0x7b),
            usdc_eth(),
            swapper(),
            "not-an-address",
            usdc(1000),
            56,
        )],
    );

    assert_eq!(verify_err(&harness, hash).await, SwapError::WrongBindAddress);
}

#[tokio::test]
async fn test_verify_from_chain_id_mismatch() {
    let harness = Harness::start().await;
    let hash = tx_hash(0x2e);
    let log = swapout_v6_log(
        eth_router(),
        usdc_eth(),
        swapper(),
        receiver(),
        usdc(1000),
        137,
        56,
    );
    harness.script_receipt(hash, vec![log]);

    assert_eq!(verify_err(&harness, hash).await, SwapError::FromChainIdMismatch);
}
