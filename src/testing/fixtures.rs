//! Node-shaped JSON and ABI return data for scripting [`MockTransport`]
//!
//! Builders return exactly what a JSON-RPC node would put in `result`, so scripted chains go
//! through the same decoding as live ones.

use super::MockTransport;
use crate::evm::contracts::{AnyToken, Router, RouterV6, RouterV7};
use alloy::primitives::{Address, Bytes, LogData, B256, U256};
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use serde_json::{json, Value};

// ============================================================================
// ABI return values
// ============================================================================

pub fn abi_address(address: Address) -> Bytes {
    Bytes::from(address.abi_encode())
}

pub fn abi_u256(value: U256) -> Bytes {
    Bytes::from(value.abi_encode())
}

pub fn abi_u8(value: u8) -> Bytes {
    Bytes::from(U256::from(value).abi_encode())
}

pub fn abi_bool(value: bool) -> Bytes {
    Bytes::from(value.abi_encode())
}

// ============================================================================
// Logs
// ============================================================================

fn log_json(address: Address, data: &LogData) -> Value {
    json!({
        "address": address,
        "topics": data.topics(),
        "data": data.data,
        "removed": false,
    })
}

/// Router v6 `LogAnySwapOut` with an address receiver
pub fn swapout_v6_log(
    router: Address,
    token: Address,
    from: Address,
    to: Address,
    amount: U256,
    from_chain_id: u64,
    to_chain_id: u64,
) -> Value {
    let event = RouterV6::LogAnySwapOut {
        token,
        from,
        to,
        amount,
        fromChainID: U256::from(from_chain_id),
        toChainID: U256::from(to_chain_id),
    };
    log_json(router, &event.encode_log_data())
}

/// Router v7 `LogAnySwapOut` with a swapout ID and a string receiver
pub fn swapout_v7_log(
    router: Address,
    swapout_id: B256,
    token: Address,
    from: Address,
    receiver: &str,
    amount: U256,
    to_chain_id: u64,
) -> Value {
    let event = RouterV7::LogAnySwapOut {
        swapoutID: swapout_id,
        token,
        from,
        receiver: receiver.to_string(),
        amount,
        toChainID: U256::from(to_chain_id),
    };
    log_json(router, &event.encode_log_data())
}

/// ERC20 `Transfer`
pub fn transfer_log(token: Address, from: Address, to: Address, amount: U256) -> Value {
    let event = AnyToken::Transfer {
        from,
        to,
        value: amount,
    };
    log_json(token, &event.encode_log_data())
}

/// Flag a log as dropped by a reorg
pub fn removed(mut log: Value) -> Value {
    log["removed"] = json!(true);
    log
}

/// Cut a log's data down to `len` bytes
pub fn truncate_data(mut log: Value, len: usize) -> Value {
    let data = log["data"].as_str().unwrap_or("0x").trim_start_matches("0x").to_string();
    let keep = (len * 2).min(data.len());
    log["data"] = json!(format!("0x{}", &data[..keep]));
    log
}

// ============================================================================
// Receipts, transactions and blocks
// ============================================================================

pub fn receipt_json(tx_hash: B256, block: u64, from: Address, to: Option<Address>, logs: Vec<Value>) -> Value {
    let logs: Vec<Value> = logs
        .into_iter()
        .enumerate()
        .map(|(index, mut log)| {
            log["logIndex"] = json!(format!("{:#x}", index));
            log
        })
        .collect();
    json!({
        "transactionHash": tx_hash,
        "blockNumber": format!("{:#x}", block),
        "blockHash": B256::repeat_byte(0xbb),
        "status": "0x1",
        "from": from,
        "to": to,
        "logs": logs,
    })
}

pub fn failed_receipt_json(tx_hash: B256, block: u64, from: Address, to: Option<Address>) -> Value {
    let mut receipt = receipt_json(tx_hash, block, from, to, Vec::new());
    receipt["status"] = json!("0x0");
    receipt
}

pub fn transaction_json(tx_hash: B256, from: Address, to: Option<Address>, input: Bytes, nonce: u64) -> Value {
    json!({
        "hash": tx_hash,
        "from": from,
        "to": to,
        "input": input,
        "nonce": format!("{:#x}", nonce),
    })
}

pub fn block_json(number: u64, timestamp: u64, base_fee: Option<u128>) -> Value {
    json!({
        "number": format!("{:#x}", number),
        "hash": B256::repeat_byte(0xbb),
        "timestamp": format!("{:#x}", timestamp),
        "baseFeePerGas": base_fee.map(|fee| format!("{:#x}", fee)),
    })
}

// ============================================================================
// Whole-chain scripts
// ============================================================================

/// One scripted EVM chain behind a single endpoint
#[derive(Debug, Clone)]
pub struct EvmChainScript {
    pub chain_id: u64,
    pub url: String,
    pub router: Address,
    pub mpc: Address,
    pub latest_block: u64,
}

impl EvmChainScript {
    /// Everything init reads: chain id, height, router identity and the account nonce
    pub fn install(&self, mock: &MockTransport) {
        mock.on_url(&self.url, "eth_chainId", json!(format!("{:#x}", self.chain_id)))
            .on_url(&self.url, "eth_blockNumber", json!(format!("{:#x}", self.latest_block)))
            .on_url(&self.url, "eth_getTransactionCount", json!("0x0"))
            .on_call(self.router, Router::mpcCall::SELECTOR, abi_address(self.mpc))
            .on_call(self.router, Router::factoryCall::SELECTOR, abi_address(Address::repeat_byte(0xfa)))
            .on_call(self.router, Router::wNATIVECall::SELECTOR, abi_address(Address::repeat_byte(0xfe)));
    }

    /// A standard token minted by this chain's router, without underlying
    pub fn install_token(&self, mock: &MockTransport, token: Address, decimals: u8) {
        mock.on_call(token, AnyToken::decimalsCall::SELECTOR, abi_u8(decimals))
            .on_call(token, AnyToken::isMinterCall::SELECTOR, abi_bool(true))
            .on_call(token, AnyToken::underlyingCall::SELECTOR, abi_address(Address::ZERO));
    }

    pub fn set_latest_block(&self, mock: &MockTransport, height: u64) {
        mock.on_url(&self.url, "eth_blockNumber", json!(format!("{:#x}", height)));
    }
}
