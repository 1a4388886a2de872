//! Fixed-count retry helpers
//!
//! RPC reads that matter at init and build time (router MPC, pool nonce, gas price) are retried
//! a fixed number of times with a fixed sleep between attempts.

use crate::error::{SwapError, SwapResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Sleep between attempts
    pub interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// No sleeping; used by tests and by callers that already fanned out
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            interval: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds or the attempts are exhausted; the last error is returned
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> SwapResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SwapResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(what = what, attempt = attempt, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(what = what, attempt = attempt, attempts = attempts, error = %e, "Attempt failed");
                    last_err = Some(e);
                }
            }
            if attempt < attempts && !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }
        }
        Err(last_err.unwrap_or(SwapError::RpcQueryError))
    }
}

/// Outcome classes of a failed `eth_sendRawTransaction`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorClass {
    /// The node already has this tx (or a tx with its nonce)
    AlreadySubmitted,
    /// Gas price too low for the pool or for replacement
    Underpriced,
    /// Endpoint unavailable; another endpoint may accept
    Transient,
    /// Rejected outright
    Permanent,
}

/// Classify a node's broadcast error message
pub fn classify_send_error(error: &str) -> SendErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("already known")
        || error_lower.contains("nonce too low")
        || error_lower.contains("already imported")
        || error_lower.contains("known transaction")
    {
        return SendErrorClass::AlreadySubmitted;
    }

    if error_lower.contains("underpriced")
        || error_lower.contains("replacement transaction")
        || error_lower.contains("gas price too low")
        || error_lower.contains("max fee per gas less than")
    {
        return SendErrorClass::Underpriced;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("connection")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return SendErrorClass::Transient;
    }

    SendErrorClass::Permanent
}
