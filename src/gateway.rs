//! Gateway resilience layer
//!
//! Per-chain endpoint pool plus the fan-out strategies every adapter reads through:
//!
//! - [`first_success`]: try endpoints in order, stop at the first success
//! - [`collect_all`] + [`aggregate`]: query all endpoints, combine with first/max/median
//! - [`broadcast`]: send to every endpoint concurrently and collect every outcome
//! - [`GatewayPool::adjust_order`]: reorder endpoints by block-height freshness
//!
//! The pool's URL list is copy-on-write: readers clone an `Arc<Vec<String>>` and never see a
//! partially updated list; the reorder job and the hot-reload watcher replace it whole.

use crate::config::{CalcMethod, GatewayConfig};
use crate::error::{SwapError, SwapResult};
use std::collections::HashMap;
use std::future::Future;
use std::ops::{Add, Div, Sub};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Consecutive failures after which an endpoint leaves the ordered list
pub const MAX_CONTINUOUS_FAILURES: u64 = 3;

// ============================================================================
// Endpoint pool
// ============================================================================

/// Endpoint pool of one chain
#[derive(Debug)]
pub struct GatewayPool {
    chain_id: String,
    config: RwLock<Arc<GatewayConfig>>,
    urls: RwLock<Arc<Vec<String>>>,
    failures: Mutex<HashMap<String, u64>>,
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    match lock.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn write<T>(lock: &RwLock<T>, value: T) {
    match lock.write() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}

impl GatewayPool {
    pub fn new(chain_id: &str, config: GatewayConfig) -> Self {
        let urls = Arc::new(config.all_urls());
        Self {
            chain_id: chain_id.to_string(),
            config: RwLock::new(Arc::new(config)),
            urls: RwLock::new(urls),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Current endpoint order (primary and extended endpoints, best first)
    pub fn urls(&self) -> Arc<Vec<String>> {
        read(&self.urls)
    }

    /// Configured gateway, as last loaded
    pub fn config(&self) -> Arc<GatewayConfig> {
        read(&self.config)
    }

    /// Configured order of every endpoint, ignoring adjustments
    pub fn origin_urls(&self) -> Vec<String> {
        self.config().all_urls()
    }

    /// Primary endpoints, best first
    ///
    /// Follows the adjusted order; falls back to the configured list when adjustment dropped
    /// every primary endpoint.
    pub fn api_urls(&self) -> Vec<String> {
        let config = self.config();
        let ordered: Vec<String> = self
            .urls()
            .iter()
            .filter(|url| config.api_address.contains(url))
            .cloned()
            .collect();
        if ordered.is_empty() {
            config.api_address.clone()
        } else {
            ordered
        }
    }

    /// Extended endpoints used as a fallback for receipt and tx reads
    pub fn ext_urls(&self) -> Vec<String> {
        self.config().api_address_ext.clone()
    }

    /// Finality endpoints, falling back to the current order when none are configured
    pub fn finalize_urls(&self) -> Vec<String> {
        let config = self.config();
        if config.finalize_api_address.is_empty() {
            self.urls().as_ref().clone()
        } else {
            config.finalize_api_address.clone()
        }
    }

    /// Hot reload: replace the configured gateway and reset the order
    pub fn replace_config(&self, config: GatewayConfig) {
        let urls = Arc::new(config.all_urls());
        info!(
            chain_id = %self.chain_id,
            count = urls.len(),
            gateway = ?config,
            "Gateway config replaced"
        );
        write(&self.config, Arc::new(config));
        write(&self.urls, urls);
    }

    /// Replace the endpoint order wholesale
    pub fn set_urls(&self, urls: Vec<String>) {
        write(&self.urls, Arc::new(urls));
    }

    /// Consecutive failure count of an endpoint
    pub fn failure_count(&self, url: &str) -> u64 {
        match self.failures.lock() {
            Ok(failures) => failures.get(url).copied().unwrap_or(0),
            Err(poisoned) => poisoned.into_inner().get(url).copied().unwrap_or(0),
        }
    }

    /// Record a height probe; returns false when the endpoint should stay out of the order
    fn record_probe(&self, url: &str, ok: bool) -> bool {
        let mut failures = match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = failures.entry(url.to_string()).or_insert(0);
        if ok {
            if *count > 0 {
                info!(chain_id = %self.chain_id, url = %url, "Recover low quality gateway");
                *count = 0;
            }
            return true;
        }
        *count += 1;
        if *count >= MAX_CONTINUOUS_FAILURES {
            if *count == MAX_CONTINUOUS_FAILURES {
                warn!(chain_id = %self.chain_id, url = %url, "Remove low quality gateway");
            }
            return false;
        }
        true
    }

    /// Re-score every configured endpoint by its latest block height and reorder
    ///
    /// Endpoints are probed in reverse configured order and the result reversed back, so the
    /// stable sort by height keeps the configured order among ties. Endpoints with
    /// [`MAX_CONTINUOUS_FAILURES`] consecutive failures are left out until they answer again;
    /// if nothing is usable the configured order is restored. Returns the highest height seen.
    pub async fn adjust_order<F, Fut>(&self, fetch_height: F, shutdown: &watch::Receiver<bool>) -> Option<u64>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = SwapResult<u64>>,
    {
        let origin = self.origin_urls();
        let mut weighted: Vec<(String, u64)> = Vec::with_capacity(origin.len());
        let mut max_height = 0u64;

        for url in origin.iter().rev() {
            if *shutdown.borrow() {
                return None;
            }
            let height = match fetch_height(url.clone()).await {
                Ok(height) => {
                    self.record_probe(url, true);
                    height
                }
                Err(e) => {
                    debug!(chain_id = %self.chain_id, url = %url, error = %e, "Gateway height probe failed");
                    if !self.record_probe(url, false) {
                        continue;
                    }
                    0
                }
            };
            max_height = max_height.max(height);
            weighted.push((url.clone(), height));
        }

        if !weighted.is_empty() {
            weighted.reverse();
            weighted.sort_by(|a, b| b.1.cmp(&a.1));
            self.set_urls(weighted.into_iter().map(|(url, _)| url).collect());
        } else if !origin.is_empty() {
            info!(chain_id = %self.chain_id, count = origin.len(), "Reset to original gateways");
            self.set_urls(origin);
        }

        (max_height > 0).then_some(max_height)
    }
}

// ============================================================================
// Fan-out strategies
// ============================================================================

/// Try each endpoint in order and return the first success
///
/// Stops at the first success, so exactly `M + 1` endpoints are tried when the first `M` fail.
/// All failing yields the last error wrapped with `method` and `params`.
pub async fn first_success<T, F, Fut>(
    urls: &[String],
    method: &str,
    params: impl std::fmt::Debug,
    mut op: F,
) -> SwapResult<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = SwapResult<T>>,
{
    if urls.is_empty() {
        return Err(SwapError::EmptyUrls);
    }
    let mut last_err = None;
    for url in urls {
        match op(url.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(method = method, url = %url, error = %e, "Gateway call failed");
                last_err = Some(e);
            }
        }
    }
    Err(SwapError::wrap_rpc(last_err, method, params))
}

/// Query every endpoint concurrently; successes come back in endpoint order
pub async fn collect_all<T, F, Fut>(
    urls: &[String],
    method: &str,
    params: impl std::fmt::Debug,
    op: F,
) -> SwapResult<Vec<T>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = SwapResult<T>>,
{
    if urls.is_empty() {
        return Err(SwapError::EmptyUrls);
    }
    let results = futures::future::join_all(urls.iter().map(|url| op(url.clone()))).await;
    let mut values = Vec::with_capacity(results.len());
    let mut last_err = None;
    for (url, result) in urls.iter().zip(results) {
        match result {
            Ok(value) => values.push(value),
            Err(e) => {
                debug!(method = method, url = %url, error = %e, "Gateway call failed");
                last_err = Some(e);
            }
        }
    }
    if values.is_empty() {
        return Err(SwapError::wrap_rpc(last_err, method, params));
    }
    debug!(method = method, urls = urls.len(), valid = values.len(), "Gateway fan-out finished");
    Ok(values)
}

/// Combine endpoint answers: first in endpoint order, max, or median
///
/// The median of an even count is the floor of the mean of the two middle values.
pub fn aggregate<T>(values: &[T], method: CalcMethod) -> Option<T>
where
    T: Copy + Ord + Add<Output = T> + Sub<Output = T> + Div<Output = T> + From<u8>,
{
    match method {
        CalcMethod::First => values.first().copied(),
        CalcMethod::Max => values.iter().max().copied(),
        CalcMethod::Median => median(values),
    }
}

pub fn median<T>(values: &[T]) -> Option<T>
where
    T: Copy + Ord + Add<Output = T> + Sub<Output = T> + Div<Output = T> + From<u8>,
{
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort();
    let count = sorted.len();
    let mid = (count - 1) / 2;
    if count % 2 != 0 {
        Some(sorted[mid])
    } else {
        let (low, high) = (sorted[mid], sorted[mid + 1]);
        Some(low + (high - low) / T::from(2))
    }
}

/// Send to every endpoint concurrently and wait for all of them
///
/// Each endpoint gets its own task; the results come back in completion order. Dropping the
/// returned future aborts the outstanding tasks.
pub async fn broadcast<T, F, Fut>(urls: &[String], op: F) -> Vec<(String, SwapResult<T>)>
where
    T: Send + 'static,
    F: Fn(String) -> Fut,
    Fut: Future<Output = SwapResult<T>> + Send + 'static,
{
    let mut join_set = JoinSet::new();
    for url in urls {
        let fut = op(url.clone());
        let url = url.clone();
        join_set.spawn(async move { (url, fut.await) });
    }

    let mut results = Vec::with_capacity(urls.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => warn!(error = %e, "Broadcast task failed"),
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("http://node-{}.test", i)).collect()
    }

    fn pool(n: usize) -> GatewayPool {
        GatewayPool::new("1", GatewayConfig::new(urls(n)))
    }

    #[tokio::test]
    async fn test_first_success_stops_at_first_ok() {
        let list = urls(5);
        let attempts = AtomicUsize::new(0);
        let result = first_success(&list, "eth_blockNumber", (), |url| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if url.ends_with("node-2.test") {
                    Ok(42u64)
                } else if url.ends_with("node-3.test") || url.ends_with("node-4.test") {
                    Ok(0u64)
                } else {
                    Err(SwapError::RpcQueryError)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_first_success_all_fail_wraps_last_error() {
        let list = urls(2);
        let result: SwapResult<u64> = first_success(&list, "eth_getCode", ["0xabc"], |_| async {
            Err(SwapError::TxNotFound)
        })
        .await;
        let err = result.unwrap_err();
        assert!(err.is(&SwapError::NotFound));
        assert!(err.to_string().contains("eth_getCode"));
    }

    #[tokio::test]
    async fn test_first_success_empty_urls() {
        let result: SwapResult<u64> = first_success(&[], "eth_chainId", (), |_| async { Ok(1) }).await;
        assert_eq!(result, Err(SwapError::EmptyUrls));
    }

    #[test]
    fn test_aggregate_policies() {
        let values = [30u128, 10, 20, 40];
        assert_eq!(aggregate(&values, CalcMethod::First), Some(30));
        assert_eq!(aggregate(&values, CalcMethod::Max), Some(40));
        assert_eq!(aggregate(&values, CalcMethod::Median), Some(25));
        assert_eq!(aggregate(&[7u64, 1, 100], CalcMethod::Median), Some(7));
        assert_eq!(aggregate::<u64>(&[], CalcMethod::Median), None);
        assert_eq!(median(&[3u64, 4]), Some(3));
    }

    #[tokio::test]
    async fn test_collect_all_skips_failures() {
        let list = urls(3);
        let values = collect_all(&list, "eth_gasPrice", (), |url| async move {
            if url.ends_with("node-1.test") {
                Err(SwapError::RpcQueryError)
            } else {
                Ok(url.len())
            }
        })
        .await
        .unwrap();
        assert_eq!(values.len(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_endpoint() {
        let list = urls(4);
        let results = broadcast(&list, |url| async move {
            if url.ends_with("node-0.test") {
                Err(SwapError::RpcQueryError)
            } else {
                Ok(url)
            }
        })
        .await;
        assert_eq!(results.len(), 4);
        assert_eq!(results.iter().filter(|(_, r)| r.is_ok()).count(), 3);
    }

    #[tokio::test]
    async fn test_adjust_order_sorts_by_height_keeping_ties_stable() {
        let pool = pool(4);
        let (_tx, rx) = watch::channel(false);
        let max = pool
            .adjust_order(
                |url| async move {
                    Ok(match url.as_str() {
                        "http://node-0.test" => 100,
                        "http://node-1.test" => 105,
                        "http://node-2.test" => 105,
                        _ => 90,
                    })
                },
                &rx,
            )
            .await;
        assert_eq!(max, Some(105));
        assert_eq!(
            pool.urls().as_ref(),
            &vec![
                "http://node-1.test".to_string(),
                "http://node-2.test".to_string(),
                "http://node-0.test".to_string(),
                "http://node-3.test".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_adjust_order_drops_after_three_failures_and_recovers() {
        let pool = pool(2);
        let (_tx, rx) = watch::channel(false);
        let healthy = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

        let probe = |healthy: std::sync::Arc<std::sync::atomic::AtomicBool>| {
            move |url: String| {
                let healthy = healthy.clone();
                async move {
                    if url.ends_with("node-1.test") && !healthy.load(Ordering::SeqCst) {
                        Err(SwapError::RpcQueryError)
                    } else {
                        Ok(10u64)
                    }
                }
            }
        };

        for _ in 0..2 {
            pool.adjust_order(probe(healthy.clone()), &rx).await;
            assert_eq!(pool.urls().len(), 2);
        }
        pool.adjust_order(probe(healthy.clone()), &rx).await;
        assert_eq!(pool.urls().as_ref(), &vec!["http://node-0.test".to_string()]);
        assert_eq!(pool.failure_count("http://node-1.test"), 3);

        healthy.store(true, Ordering::SeqCst);
        pool.adjust_order(probe(healthy.clone()), &rx).await;
        assert_eq!(pool.urls().len(), 2);
        assert_eq!(pool.failure_count("http://node-1.test"), 0);
    }

    #[tokio::test]
    async fn test_adjust_order_resets_when_nothing_usable() {
        let pool = pool(2);
        pool.set_urls(vec!["http://node-1.test".to_string()]);
        let (_tx, rx) = watch::channel(false);
        for _ in 0..3 {
            let max = pool
                .adjust_order(|_| async { Err::<u64, _>(SwapError::RpcQueryError) }, &rx)
                .await;
            assert_eq!(max, None);
        }
        assert_eq!(pool.urls().as_ref(), &urls(2));
    }

    #[tokio::test]
    async fn test_adjust_order_stops_on_shutdown() {
        let pool = pool(3);
        pool.set_urls(vec!["http://node-2.test".to_string()]);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let max = pool.adjust_order(|_| async { Ok(1u64) }, &rx).await;
        assert_eq!(max, None);
        assert_eq!(pool.urls().as_ref(), &vec!["http://node-2.test".to_string()]);
    }

    #[test]
    fn test_replace_config_swaps_whole_list() {
        let pool = pool(2);
        let before = pool.urls();
        pool.replace_config(GatewayConfig::new(vec!["http://other.test".to_string()]));
        assert_eq!(before.len(), 2);
        assert_eq!(pool.urls().as_ref(), &vec!["http://other.test".to_string()]);
        assert_eq!(pool.api_urls(), vec!["http://other.test".to_string()]);
    }

    #[test]
    fn test_api_urls_follow_adjusted_order() {
        let mut cfg = GatewayConfig::new(urls(3));
        cfg.api_address_ext = vec!["http://ext.test".to_string()];
        let pool = GatewayPool::new("1", cfg);
        pool.set_urls(vec![
            "http://ext.test".to_string(),
            "http://node-2.test".to_string(),
            "http://node-0.test".to_string(),
        ]);
        assert_eq!(
            pool.api_urls(),
            vec!["http://node-2.test".to_string(), "http://node-0.test".to_string()]
        );
        assert_eq!(pool.ext_urls(), vec!["http://ext.test".to_string()]);

        pool.set_urls(vec!["http://ext.test".to_string()]);
        assert_eq!(pool.api_urls(), urls(3));
    }
}
