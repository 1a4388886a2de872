//! Scripted JSON-RPC / REST transport
//!
//! Responses are matched most specific first:
//!
//! 1. endpoint marked as down
//! 2. scripted method error
//! 3. exact `(method, params)` response
//! 4. per-endpoint `(url, method)` response
//! 5. `eth_call` rule on `(to, selector, block)`, block-specific rules before any-block rules
//! 6. per-method response
//!
//! Anything unscripted fails with a wrapped `NotFound`. Every request is recorded.

use crate::error::{SwapError, SwapResult};
use crate::rpc::RpcTransport;
use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Mutex;

/// One recorded request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub url: String,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone)]
struct EthCallRule {
    to: Address,
    selector: [u8; 4],
    block: Option<String>,
    result: Result<Bytes, String>,
}

#[derive(Debug, Default)]
struct MockState {
    methods: HashMap<String, Value>,
    exact: HashMap<(String, String), Value>,
    per_url: HashMap<(String, String), Value>,
    method_errors: HashMap<String, String>,
    eth_calls: Vec<EthCallRule>,
    down_urls: HashSet<String>,
    gets: HashMap<String, Value>,
    requests: Vec<Request>,
}

/// Transport answering from a script instead of the network
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

fn eth_call_target(params: &Value) -> Option<(Address, [u8; 4], String)> {
    let call = params.get(0)?;
    let to = Address::from_str(call.get("to")?.as_str()?).ok()?;
    let data = call
        .get("data")
        .or_else(|| call.get("input"))
        .and_then(Value::as_str)?;
    let data = hex::decode(data.trim_start_matches("0x")).ok()?;
    let selector: [u8; 4] = data.get(..4)?.try_into().ok()?;
    let block = params
        .get(1)
        .and_then(Value::as_str)
        .unwrap_or("latest")
        .to_lowercase();
    Some((to, selector, block))
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    // ========================================================================
    // Scripting
    // ========================================================================

    /// Answer every call of `method` with `result`
    pub fn on(&self, method: &str, result: Value) -> &Self {
        self.with_state(|s| s.methods.insert(method.to_string(), result));
        self
    }

    /// Answer `method` with these exact `params`
    pub fn on_params(&self, method: &str, params: Value, result: Value) -> &Self {
        self.with_state(|s| s.exact.insert((method.to_string(), params.to_string()), result));
        self
    }

    /// Answer `method` on `url` only
    pub fn on_url(&self, url: &str, method: &str, result: Value) -> &Self {
        self.with_state(|s| s.per_url.insert((url.to_string(), method.to_string()), result));
        self
    }

    /// Fail every call of `method` with an RPC error carrying `message`
    pub fn fail(&self, method: &str, message: &str) -> &Self {
        self.with_state(|s| s.method_errors.insert(method.to_string(), message.to_string()));
        self
    }

    /// Stop failing `method`
    pub fn clear_failure(&self, method: &str) -> &Self {
        self.with_state(|s| s.method_errors.remove(method));
        self
    }

    /// Answer `eth_call` to `to` with `selector` at any block
    pub fn on_call(&self, to: Address, selector: [u8; 4], result: impl Into<Bytes>) -> &Self {
        self.push_eth_call(to, selector, None, Ok(result.into()))
    }

    /// Answer `eth_call` to `to` with `selector` at `block` only (hex tag or name)
    pub fn on_call_at(&self, to: Address, selector: [u8; 4], block: &str, result: impl Into<Bytes>) -> &Self {
        self.push_eth_call(to, selector, Some(block.to_lowercase()), Ok(result.into()))
    }

    /// Fail `eth_call` to `to` with `selector` at `block`, or at any block when `None`
    pub fn fail_call(&self, to: Address, selector: [u8; 4], block: Option<&str>, message: &str) -> &Self {
        self.push_eth_call(
            to,
            selector,
            block.map(str::to_lowercase),
            Err(message.to_string()),
        )
    }

    fn push_eth_call(
        &self,
        to: Address,
        selector: [u8; 4],
        block: Option<String>,
        result: Result<Bytes, String>,
    ) -> &Self {
        self.with_state(|s| {
            s.eth_calls.push(EthCallRule {
                to,
                selector,
                block,
                result,
            })
        });
        self
    }

    /// Every request to `url` fails
    pub fn set_down(&self, url: &str, down: bool) -> &Self {
        self.with_state(|s| {
            if down {
                s.down_urls.insert(url.to_string());
            } else {
                s.down_urls.remove(url);
            }
        });
        self
    }

    /// Answer a REST GET of `url`
    pub fn on_get(&self, url: &str, body: Value) -> &Self {
        self.with_state(|s| s.gets.insert(url.to_string(), body));
        self
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn requests(&self) -> Vec<Request> {
        self.with_state(|s| s.requests.clone())
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.with_state(|s| s.requests.iter().filter(|r| r.url == url).count())
    }

    pub fn calls_of(&self, method: &str) -> usize {
        self.with_state(|s| s.requests.iter().filter(|r| r.method == method).count())
    }

    pub fn reset_requests(&self) {
        self.with_state(|s| s.requests.clear())
    }

    fn answer(state: &MockState, url: &str, method: &str, params: &Value) -> SwapResult<Value> {
        if state.down_urls.contains(url) {
            return Err(SwapError::wrap(SwapError::RpcQueryError, method, params, "connection refused"));
        }
        if let Some(message) = state.method_errors.get(method) {
            return Err(SwapError::wrap(SwapError::RpcQueryError, method, params, message));
        }
        if let Some(result) = state.exact.get(&(method.to_string(), params.to_string())) {
            return Ok(result.clone());
        }
        if let Some(result) = state.per_url.get(&(url.to_string(), method.to_string())) {
            return Ok(result.clone());
        }
        if method == "eth_call" {
            if let Some((to, selector, block)) = eth_call_target(params) {
                let matching = |rule: &&EthCallRule| rule.to == to && rule.selector == selector;
                let rule = state
                    .eth_calls
                    .iter()
                    .rev()
                    .filter(matching)
                    .find(|rule| rule.block.as_deref() == Some(block.as_str()))
                    .or_else(|| {
                        state
                            .eth_calls
                            .iter()
                            .rev()
                            .filter(matching)
                            .find(|rule| rule.block.is_none())
                    });
                if let Some(rule) = rule {
                    return match &rule.result {
                        Ok(bytes) => Ok(Value::String(bytes.to_string())),
                        Err(message) => Err(SwapError::wrap(SwapError::RpcQueryError, method, params, message)),
                    };
                }
            }
        }
        if let Some(result) = state.methods.get(method) {
            return Ok(result.clone());
        }
        Err(SwapError::wrap(SwapError::NotFound, method, params, "not scripted"))
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn call(&self, url: &str, method: &str, params: Value) -> SwapResult<Value> {
        self.with_state(|s| {
            s.requests.push(Request {
                url: url.to_string(),
                method: method.to_string(),
                params: params.clone(),
            });
            Self::answer(s, url, method, &params)
        })
    }

    async fn get(&self, url: &str) -> SwapResult<Value> {
        self.with_state(|s| {
            s.requests.push(Request {
                url: url.to_string(),
                method: "GET".to_string(),
                params: Value::Null,
            });
            if s.down_urls.iter().any(|down| url.starts_with(down.as_str())) {
                return Err(SwapError::wrap(SwapError::RpcQueryError, "GET", url, "connection refused"));
            }
            s.gets
                .get(url)
                .cloned()
                .ok_or_else(|| SwapError::wrap(SwapError::NotFound, "GET", url, "404"))
        })
    }
}
