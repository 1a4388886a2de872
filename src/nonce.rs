//! Nonce allocation
//!
//! Two disciplines, chosen per chain:
//!
//! - **Pool read-through with ratchet**: the pending nonce reported by the gateway, raised to the
//!   highest nonce this process has already assigned ([`NonceManager::adjust_nonce`]).
//! - **Local auto-increment** for parallel signing: strictly increasing values from local state,
//!   seeded from the persistent store, one lock per address ([`NonceManager::allocate_nonce`]).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Recycled nonces become reusable only after this long
pub const RECYCLE_ACK_INTERVAL: Duration = Duration::from_secs(300);

/// Persistent next-nonce bookkeeping (read-only from here)
#[async_trait]
pub trait NonceStore: Send + Sync {
    async fn find_next_swap_nonce(&self, chain_id: &str, address: &str) -> eyre::Result<u64>;
}

#[derive(Debug, Clone, Copy)]
struct RecycledNonce {
    nonce: u64,
    since: Instant,
}

/// Per-chain nonce state keyed by lowercased sender address
#[derive(Debug)]
pub struct NonceManager {
    chain_id: String,
    swap_nonce: Mutex<HashMap<String, Arc<tokio::sync::Mutex<u64>>>>,
    recycled: Mutex<HashMap<String, RecycledNonce>>,
    recycle_ack: Duration,
}

impl NonceManager {
    pub fn new(chain_id: &str) -> Self {
        Self::with_recycle_ack(chain_id, RECYCLE_ACK_INTERVAL)
    }

    pub fn with_recycle_ack(chain_id: &str, recycle_ack: Duration) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            swap_nonce: Mutex::new(HashMap::new()),
            recycled: Mutex::new(HashMap::new()),
            recycle_ack,
        }
    }

    /// Slot of one address, created at zero on first use
    fn slot(&self, address: &str) -> Arc<tokio::sync::Mutex<u64>> {
        let account = address.to_lowercase();
        let mut map = match self.swap_nonce.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(account).or_default().clone()
    }

    fn existing_slot(&self, address: &str) -> Option<Arc<tokio::sync::Mutex<u64>>> {
        let map = match self.swap_nonce.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(&address.to_lowercase()).cloned()
    }

    /// Highest nonce recorded for `address`, zero when unknown
    pub async fn get_swap_nonce(&self, address: &str) -> u64 {
        match self.existing_slot(address) {
            Some(slot) => *slot.lock().await,
            None => 0,
        }
    }

    /// Never hand out less than what this process already assigned
    pub async fn adjust_nonce(&self, address: &str, pool_nonce: u64) -> u64 {
        let local = self.get_swap_nonce(address).await;
        if local > pool_nonce {
            debug!(
                chain_id = %self.chain_id,
                account = %address,
                pool_nonce = pool_nonce,
                local_nonce = local,
                "Pool nonce lags local nonce"
            );
            local
        } else {
            pool_nonce
        }
    }

    /// Ratchet the recorded nonce up to `value`; lower values are ignored
    pub async fn set_nonce(&self, address: &str, value: u64) {
        let slot = self.slot(address);
        let mut nonce = slot.lock().await;
        if *nonce < value {
            *nonce = value;
        }
    }

    /// Seed from the persistent store, keeping the pending pool nonce when it is higher
    pub async fn init_swap_nonce(&self, address: &str, stored: u64, pending: Option<u64>) -> u64 {
        let mut nonce = stored;
        match pending {
            Some(pending) if pending > stored => {
                warn!(
                    chain_id = %self.chain_id,
                    account = %address,
                    db_nonce = stored,
                    account_nonce = pending,
                    "Init swap nonce with on-chain account nonce"
                );
                nonce = pending;
            }
            Some(_) => {}
            None => warn!(
                chain_id = %self.chain_id,
                account = %address,
                "Init swap nonce without pending pool nonce"
            ),
        }
        let slot = self.slot(address);
        *slot.lock().await = nonce;
        info!(chain_id = %self.chain_id, account = %address, nonce = nonce, "Init swap nonce success");
        nonce
    }

    /// Local auto-increment allocation
    ///
    /// A recycled nonce older than the ack interval is reused first; otherwise the current value
    /// is returned and the counter advanced, under the address's own lock.
    pub async fn allocate_nonce(&self, address: &str) -> u64 {
        if let Some(nonce) = self.take_recycled(address) {
            info!(chain_id = %self.chain_id, account = %address, nonce = nonce, "Allocate recycled swap nonce");
            return nonce;
        }
        let slot = self.slot(address);
        let mut next = slot.lock().await;
        let nonce = *next;
        *next += 1;
        nonce
    }

    fn take_recycled(&self, address: &str) -> Option<u64> {
        let mut recycled = match self.recycled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let account = address.to_lowercase();
        let record = recycled.get(&account)?;
        if record.since.elapsed() < self.recycle_ack {
            return None;
        }
        let nonce = record.nonce;
        recycled.remove(&account);
        Some(nonce)
    }

    /// Recycled nonce of `address` waiting to be reused
    pub fn recycled_nonce(&self, address: &str) -> Option<u64> {
        let recycled = match self.recycled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        recycled.get(&address.to_lowercase()).map(|record| record.nonce)
    }

    /// Return an allocated but unused nonce; the lowest outstanding one is kept
    pub fn recycle_swap_nonce(&self, address: &str, nonce: u64) {
        let mut recycled = match self.recycled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        recycled
            .entry(address.to_lowercase())
            .and_modify(|record| {
                if nonce < record.nonce {
                    *record = RecycledNonce { nonce, since: now };
                }
            })
            .or_insert(RecycledNonce { nonce, since: now });
    }
}
