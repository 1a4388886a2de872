//! EVM JSON-RPC reads
//!
//! Every query goes through the chain's gateway pool: idempotent lookups use
//! [`first_success`], quantities on which endpoints may disagree use [`collect_all`] plus
//! [`aggregate`]. Receipts and transactions fall back to the extended endpoint list when the
//! primary list comes back empty-handed.

use super::EvmBridge;
use crate::config::CalcMethod;
use crate::error::{SwapError, SwapResult};
use crate::gateway::{aggregate, collect_all, first_success, median};
use crate::rpc::{decode, quantity_u128, quantity_u64, RpcTransport};
use alloy::primitives::{Address, Bytes, B256, U256, U64};
use alloy::sol_types::SolCall;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// RPC result types
// ============================================================================

/// Event log as returned inside a receipt
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub removed: Option<bool>,
    #[serde(default)]
    pub log_index: Option<U64>,
}

impl RpcLog {
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub block_hash: Option<B256>,
    #[serde(default)]
    pub status: Option<U64>,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
}

impl RpcReceipt {
    pub fn is_status_ok(&self) -> bool {
        self.status.map(|s| s.to::<u64>() == 1).unwrap_or(false)
    }

    pub fn block_height(&self) -> u64 {
        self.block_number.map(|n| n.to::<u64>()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: B256,
    #[serde(default)]
    pub input: Bytes,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    pub nonce: U64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub number: U64,
    #[serde(default)]
    pub hash: Option<B256>,
    pub timestamp: U64,
    #[serde(default)]
    pub base_fee_per_gas: Option<U256>,
}

fn hex_u64(value: u64) -> String {
    format!("{:#x}", value)
}

/// Hex block tag of `height`
pub(crate) fn block_tag(height: u64) -> String {
    hex_u64(height)
}

impl EvmBridge {
    // ========================================================================
    // Raw calls
    // ========================================================================

    async fn call_url(&self, url: &str, method: &str, params: Value) -> SwapResult<Value> {
        self.ctx.transport.call(url, method, params).await
    }

    /// One method on the primary endpoints, first success wins
    async fn call_first<T, F, Fut>(&self, urls: &[String], method: &str, params: Value, parse: F) -> SwapResult<T>
    where
        F: Fn(Value) -> Fut,
        Fut: Future<Output = SwapResult<T>>,
    {
        let debug_params = params.clone();
        first_success(urls, method, debug_params, |url| {
            let params = params.clone();
            let parse = &parse;
            async move {
                let value = self.call_url(&url, method, params).await?;
                if value.is_null() {
                    return Err(SwapError::NotFound);
                }
                parse(value).await
            }
        })
        .await
    }

    /// Primary endpoints first, then the extended list on RPC or not-found errors
    async fn call_with_ext<T, F, Fut>(&self, method: &str, params: Value, parse: F) -> SwapResult<T>
    where
        F: Fn(Value) -> Fut,
        Fut: Future<Output = SwapResult<T>>,
    {
        let gateway = self.gateway_pool();
        let result = self
            .call_first(&gateway.api_urls(), method, params.clone(), &parse)
            .await;
        match result {
            Err(e) if e.is_rpc_query_or_not_found() => {
                let ext = gateway.ext_urls();
                if ext.is_empty() {
                    return Err(e);
                }
                debug!(chain_id = %self.chain_id_str(), method = method, "Retry on extended gateways");
                self.call_first(&ext, method, params, &parse).await
            }
            other => other,
        }
    }

    /// Query every primary endpoint and aggregate the quantities
    async fn collect_quantity<T, F>(&self, method: &str, params: Value, parse: F) -> SwapResult<Vec<T>>
    where
        F: Fn(Value) -> SwapResult<T>,
    {
        let urls = self.gateway_pool().api_urls();
        let debug_params = params.clone();
        collect_all(&urls, method, debug_params, |url| {
            let params = params.clone();
            let parse = &parse;
            async move { parse(self.call_url(&url, method, params).await?) }
        })
        .await
    }

    // ========================================================================
    // Blocks and transactions
    // ========================================================================

    /// Highest latest block over the primary endpoints
    pub async fn latest_block_number(&self) -> SwapResult<u64> {
        let heights = self
            .collect_quantity("eth_blockNumber", json!([]), |v| quantity_u64(v, "eth_blockNumber"))
            .await?;
        aggregate(&heights, CalcMethod::Max).ok_or(SwapError::RpcQueryError)
    }

    pub async fn latest_block_number_of(&self, url: &str) -> SwapResult<u64> {
        let value = self.call_url(url, "eth_blockNumber", json!([])).await?;
        quantity_u64(value, "eth_blockNumber")
    }

    pub async fn get_block_by_number(&self, number: Option<u64>) -> SwapResult<RpcBlock> {
        let tag = number.map(hex_u64).unwrap_or_else(|| "latest".to_string());
        let urls = self.gateway_pool().api_urls();
        self.call_first(&urls, "eth_getBlockByNumber", json!([tag, false]), |v| async move {
            decode(v, "eth_getBlockByNumber")
        })
        .await
    }

    pub async fn get_transaction_receipt(&self, tx_hash: &str) -> SwapResult<RpcReceipt> {
        self.call_with_ext("eth_getTransactionReceipt", json!([tx_hash]), |v| async move {
            decode(v, "eth_getTransactionReceipt")
        })
        .await
    }

    pub async fn get_transaction_by_hash(&self, tx_hash: &str) -> SwapResult<RpcTransaction> {
        self.call_with_ext("eth_getTransactionByHash", json!([tx_hash]), |v| async move {
            decode(v, "eth_getTransactionByHash")
        })
        .await
    }

    /// Chain ID reported by the gateway
    pub async fn get_signer_chain_id(&self) -> SwapResult<u64> {
        let urls = self.gateway_pool().api_urls();
        self.call_first(&urls, "eth_chainId", json!([]), |v| async move {
            quantity_u64(v, "eth_chainId")
        })
        .await
    }

    // ========================================================================
    // Accounts and contracts
    // ========================================================================

    pub async fn get_code(&self, address: &Address) -> SwapResult<Bytes> {
        let urls = self.gateway_pool().api_urls();
        self.call_first(&urls, "eth_getCode", json!([address, "latest"]), |v| async move {
            decode(v, "eth_getCode")
        })
        .await
    }

    pub async fn get_balance(&self, address: &Address) -> SwapResult<U256> {
        let urls = self.gateway_pool().api_urls();
        self.call_first(&urls, "eth_getBalance", json!([address, "pending"]), |v| async move {
            decode(v, "eth_getBalance")
        })
        .await
    }

    /// `eth_call` at `block` (a tag or hex height)
    pub async fn eth_call(&self, to: &Address, data: Bytes, block: &str) -> SwapResult<Bytes> {
        let urls = self.gateway_pool().api_urls();
        let params = json!([{ "to": to, "data": data }, block]);
        self.call_first(&urls, "eth_call", params, |v| async move { decode(v, "eth_call") })
            .await
    }

    /// ABI-encoded contract call with decoded return
    pub async fn call_contract<C: SolCall>(&self, to: &Address, call: &C, block: &str) -> SwapResult<C::Return> {
        let output = self.eth_call(to, Bytes::from(call.abi_encode()), block).await?;
        C::abi_decode_returns(&output, true)
            .map_err(|e| SwapError::ParseData(format!("{} returns: {}", C::SIGNATURE, e)))
    }

    // ========================================================================
    // Gas and nonce
    // ========================================================================

    /// Gas price suggestion aggregated per the chain's calc method (median by default)
    pub async fn suggest_price(&self) -> SwapResult<u128> {
        let prices = self
            .collect_quantity("eth_gasPrice", json!([]), |v| quantity_u128(v, "eth_gasPrice"))
            .await?;
        let method = self.extra().await.calc_gas_price_method(self.chain_id_str());
        aggregate(&prices, method).ok_or(SwapError::RpcQueryError)
    }

    /// Highest priority fee suggestion over the endpoints
    pub async fn suggest_gas_tip_cap(&self) -> SwapResult<u128> {
        let tips = self
            .collect_quantity("eth_maxPriorityFeePerGas", json!([]), |v| {
                quantity_u128(v, "eth_maxPriorityFeePerGas")
            })
            .await?;
        aggregate(&tips, CalcMethod::Max).ok_or(SwapError::RpcQueryError)
    }

    /// Base fee of the latest block
    pub async fn get_base_fee(&self) -> SwapResult<u128> {
        let block = self.get_block_by_number(None).await?;
        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| SwapError::wrap(SwapError::NotFound, "eth_getBlockByNumber", "latest", "no base fee"))?;
        u128::try_from(base_fee).map_err(|_| SwapError::ParseData("base fee overflows u128".to_string()))
    }

    /// Median account nonce over the endpoints at `tag` (`pending` or `latest`)
    pub async fn get_pool_nonce_at(&self, address: &str, tag: &str) -> SwapResult<u64> {
        let nonces = self
            .collect_quantity("eth_getTransactionCount", json!([address, tag]), |v| {
                quantity_u64(v, "eth_getTransactionCount")
            })
            .await?;
        median(&nonces).ok_or(SwapError::RpcQueryError)
    }

    pub async fn estimate_gas(&self, from: &str, to: &str, value: U256, input: &Bytes) -> SwapResult<u64> {
        let urls = self.gateway_pool().api_urls();
        let params = json!([{ "from": from, "to": to, "value": value, "data": input }]);
        self.call_first(&urls, "eth_estimateGas", params, |v| async move {
            quantity_u64(v, "eth_estimateGas")
        })
        .await
    }
}

/// Broadcast raw bytes to one endpoint
///
/// Owns its inputs so it can run on a spawned broadcast task.
pub(crate) async fn send_raw_transaction(
    transport: Arc<dyn RpcTransport>,
    url: String,
    raw: String,
) -> SwapResult<String> {
    let value = transport
        .call(&url, "eth_sendRawTransaction", json!([raw]))
        .await?;
    decode::<B256>(value, "eth_sendRawTransaction").map(|hash| format!("{:#x}", hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_decodes_node_json() {
        let receipt: RpcReceipt = serde_json::from_value(json!({
            "transactionHash": format!("0x{}", "11".repeat(32)),
            "blockNumber": "0x10",
            "blockHash": format!("0x{}", "22".repeat(32)),
            "status": "0x1",
            "from": "0x00000000000000000000000000000000000000aa",
            "to": null,
            "gasUsed": "0x5208",
            "logs": [{
                "address": "0x00000000000000000000000000000000000000bb",
                "topics": [],
                "data": "0x",
                "logIndex": "0x0",
                "removed": false
            }]
        }))
        .unwrap();
        assert!(receipt.is_status_ok());
        assert_eq!(receipt.block_height(), 16);
        assert!(receipt.to.is_none());
        assert_eq!(receipt.logs.len(), 1);
        assert!(!receipt.logs[0].is_removed());
    }

    #[test]
    fn test_receipt_failed_status() {
        let receipt: RpcReceipt = serde_json::from_value(json!({
            "transactionHash": format!("0x{}", "11".repeat(32)),
            "status": "0x0",
            "from": "0x00000000000000000000000000000000000000aa",
            "logs": []
        }))
        .unwrap();
        assert!(!receipt.is_status_ok());
        assert_eq!(receipt.block_height(), 0);
    }

    #[test]
    fn test_block_tag_hex() {
        assert_eq!(block_tag(255), "0xff");
    }
}
