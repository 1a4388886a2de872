//! Raw chain transport
//!
//! [`RpcTransport`] is the one seam between chain adapters and the network: a JSON-RPC `call` for
//! account chains and a REST `get` for Esplora-style UTXO indexers. [`HttpTransport`] is the
//! production implementation on `reqwest`; tests script responses per URL and method.

use crate::config::ExtraConfig;
use crate::error::{SwapError, SwapResult};
use alloy::primitives::{U256, U64};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::trace;

/// One request against one endpoint
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// JSON-RPC call; a `null` result is returned as `Value::Null`
    async fn call(&self, url: &str, method: &str, params: Value) -> SwapResult<Value>;

    /// REST GET of `url`, body parsed as JSON (plain numbers parse too)
    async fn get(&self, url: &str) -> SwapResult<Value>;
}

/// JSON-RPC response envelope
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// `reqwest`-backed transport with a fixed per-request timeout
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> eyre::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    /// Transport honouring `extra.rpc_timeout_secs`
    pub fn from_config(extra: &ExtraConfig) -> eyre::Result<Self> {
        Self::new(extra.rpc_timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, url: &str, method: &str, params: Value) -> SwapResult<Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SwapError::wrap(SwapError::RpcQueryError, method, &params, e))?
            .json::<RpcResponse>()
            .await
            .map_err(|e| SwapError::wrap(SwapError::RpcQueryError, method, &params, e))?;

        if let Some(error) = response.error {
            trace!(method = method, code = error.code, message = %error.message, "RPC error");
            return Err(SwapError::wrap(
                SwapError::RpcQueryError,
                method,
                &params,
                format!("{} - {}", error.code, error.message),
            ));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn get(&self, url: &str) -> SwapResult<Value> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SwapError::wrap(SwapError::RpcQueryError, "GET", url, e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SwapError::wrap(SwapError::NotFound, "GET", url, "404"));
        }
        if !response.status().is_success() {
            return Err(SwapError::wrap(
                SwapError::RpcQueryError,
                "GET",
                url,
                response.status(),
            ));
        }

        let text = response
            .text()
            .await
            .map_err(|e| SwapError::wrap(SwapError::RpcQueryError, "GET", url, e))?;
        serde_json::from_str(text.trim())
            .or_else(|_| Ok(Value::String(text.trim().to_string())))
    }
}

// ============================================================================
// Result decoding
// ============================================================================

/// Deserialize an RPC result, mapping failures to `ParseData`
pub fn decode<T: DeserializeOwned>(value: Value, method: &str) -> SwapResult<T> {
    serde_json::from_value(value)
        .map_err(|e| SwapError::ParseData(format!("{} result: {}", method, e)))
}

/// Hex quantity (`"0x1a"`) as u64
pub fn quantity_u64(value: Value, method: &str) -> SwapResult<u64> {
    let quantity: U64 = decode(value, method)?;
    Ok(quantity.to::<u64>())
}

/// Hex quantity as u128; gas prices never exceed it
pub fn quantity_u128(value: Value, method: &str) -> SwapResult<u128> {
    let quantity: U256 = decode(value, method)?;
    u128::try_from(quantity)
        .map_err(|_| SwapError::ParseData(format!("{} result overflows u128", method)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hex_quantities() {
        assert_eq!(quantity_u64(Value::from("0x1a"), "eth_blockNumber"), Ok(26));
        assert_eq!(
            quantity_u128(Value::from("0x3b9aca00"), "eth_gasPrice"),
            Ok(1_000_000_000)
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = quantity_u64(Value::from("pending"), "eth_blockNumber").unwrap_err();
        assert!(err.is(&SwapError::ParseData(String::new())));
        assert!(quantity_u64(Value::Null, "eth_blockNumber").is_err());
    }

    #[test]
    fn test_http_transport_uses_configured_timeout() {
        let extra = ExtraConfig {
            rpc_timeout_secs: 7,
            ..Default::default()
        };
        let transport = HttpTransport::from_config(&extra).unwrap();
        assert_eq!(transport.timeout(), Duration::from_secs(7));
        assert_eq!(
            HttpTransport::from_config(&ExtraConfig::default()).unwrap().timeout(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_rpc_response_error_envelope() {
        let response: RpcResponse = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32000, "message": "nonce too low" }
        }))
        .unwrap();
        assert!(response.result.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.code, -32000);
        assert_eq!(error.message, "nonce too low");
    }
}
