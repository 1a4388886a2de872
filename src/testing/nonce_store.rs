//! In-memory swap nonce store

use crate::nonce::NonceStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Next-nonce records keyed by `(chain id, lowercased address)`; absent means zero
#[derive(Debug, Default)]
pub struct MemoryNonceStore {
    next: Mutex<HashMap<(String, String), u64>>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, chain_id: &str, address: &str, next_nonce: u64) {
        let mut next = match self.next.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        next.insert((chain_id.to_string(), address.to_lowercase()), next_nonce);
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn find_next_swap_nonce(&self, chain_id: &str, address: &str) -> eyre::Result<u64> {
        let next = match self.next.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(next
            .get(&(chain_id.to_string(), address.to_lowercase()))
            .copied()
            .unwrap_or(0))
    }
}
