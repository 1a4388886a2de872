//! EVM address checks: EIP-55 validation, MPC key binding and EIP-1167 proxy detection

use super::EvmBridge;
use alloy::primitives::{keccak256, Address, B256};
use eyre::{eyre, Result};
use std::collections::HashMap;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::debug;

/// Runtime code of an EIP-1167 minimal proxy, around the 20-byte master address
const EIP1167_PREFIX: [u8; 10] = [0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d, 0x3d, 0x36, 0x3d, 0x73];
const EIP1167_SUFFIX: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];
pub const EIP1167_CODE_LEN: usize = 45;

pub const MAX_EIP1167_PROXIES: usize = 10_000;
pub const MAX_CONTRACT_CODE_HASHES: usize = 2_000;

/// Hex address, with a valid EIP-55 checksum whenever it has upper-case letters
pub fn is_valid_address(address: &str) -> bool {
    let Some(hex) = address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) else {
        return false;
    };
    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return false;
    }
    if !hex.bytes().any(|b| b.is_ascii_uppercase()) {
        return true;
    }
    match Address::from_str(address) {
        Ok(parsed) => parsed.to_checksum(None)[2..] == *hex,
        Err(_) => false,
    }
}

/// Check that an uncompressed secp256k1 public key derives to `mpc_address`
pub fn verify_mpc_pubkey(mpc_address: &str, pubkey: &str) -> Result<()> {
    let address =
        Address::from_str(mpc_address).map_err(|_| eyre!("wrong mpc address '{}'", mpc_address))?;
    let bytes = hex::decode(pubkey.trim_start_matches("0x"))
        .map_err(|_| eyre!("wrong mpc public key '{}'", pubkey))?;
    if bytes.len() != 65 || bytes[0] != 0x04 {
        return Err(eyre!("wrong mpc public key '{}'", pubkey));
    }
    let derived = Address::from_slice(&keccak256(&bytes[1..])[12..]);
    if derived != address {
        return Err(eyre!(
            "mpc address {} and public key address {} is not match",
            mpc_address,
            derived
        ));
    }
    Ok(())
}

/// Master implementation of an EIP-1167 proxy from its runtime code
pub fn parse_eip1167_master(code: &[u8]) -> Option<Address> {
    if code.len() != EIP1167_CODE_LEN
        || code[..10] != EIP1167_PREFIX
        || code[30..] != EIP1167_SUFFIX
    {
        return None;
    }
    Some(Address::from_slice(&code[10..30]))
}

// ============================================================================
// Bounded caches
// ============================================================================

/// Lookup cache that clears itself once it grows past `cap`
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    cap: usize,
    entries: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash, V: Copy> BoundedCache<K, V> {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, V>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).copied()
    }

    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.lock();
        if entries.len() >= self.cap {
            entries.clear();
        }
        entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EvmBridge {
    /// Master of an EIP-1167 proxy, zero when `proxy` is not one
    pub async fn get_eip1167_master(&self, proxy: &Address) -> Address {
        if let Some(master) = self.eip1167_proxies.get(proxy) {
            return master;
        }
        let code = match self.get_code(proxy).await {
            Ok(code) => code,
            Err(e) => {
                debug!(chain_id = %self.chain_id_str(), proxy = %proxy, error = %e, "Get proxy code failed");
                return Address::ZERO;
            }
        };
        match parse_eip1167_master(&code) {
            Some(master) => {
                self.eip1167_proxies.insert(*proxy, master);
                master
            }
            None => Address::ZERO,
        }
    }

    /// keccak256 of the runtime code, zero when it cannot be read or is empty
    pub async fn get_contract_code_hash(&self, contract: &Address) -> B256 {
        if let Some(hash) = self.code_hashes.get(contract) {
            return hash;
        }
        let code = match self.get_code(contract).await {
            Ok(code) if !code.is_empty() => code,
            _ => return B256::ZERO,
        };
        let hash = keccak256(&code);
        self.code_hashes.insert(*contract, hash);
        hash
    }
}
