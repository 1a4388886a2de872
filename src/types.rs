//! Common types for cross-chain swaps
//!
//! The swap lifecycle threads these values through register → verify → build → sign → send.

use alloy::primitives::{keccak256, Address, Bytes, U256};
use eyre::{eyre, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Chain ID
// ============================================================================

/// Base of synthetic chain IDs for chains without a native chain ID concept
pub const STUB_CHAIN_ID_BASE: u64 = 1_000_000_000_000;

/// Big-integer chain ID, string-encoded in configs and keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChainId(pub U256);

impl ChainId {
    pub fn from_u64(id: u64) -> Self {
        ChainId(U256::from(id))
    }

    /// Chain ID as u64, if it fits (EVM signer chain IDs always do)
    pub fn as_u64(&self) -> Option<u64> {
        u64::try_from(self.0).ok()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for ChainId {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(eyre!("empty chain id"));
        }
        let value = if let Some(hex) = s.strip_prefix("0x") {
            U256::from_str_radix(hex, 16)
        } else {
            U256::from_str_radix(s, 10)
        }
        .map_err(|e| eyre!("invalid chain id '{}': {}", s, e))?;
        Ok(ChainId(value))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        ChainId::from_u64(id)
    }
}

impl From<U256> for ChainId {
    fn from(id: U256) -> Self {
        ChainId(id)
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Str(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(ChainId::from_u64(n)),
            Raw::Str(s) => ChainId::from_str(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// Synthetic chain ID for a named non-EVM network
///
/// `STUB_CHAIN_ID_BASE + keccak256(upper(name)) mod STUB_CHAIN_ID_BASE`
pub fn stub_chain_id(name: &str) -> ChainId {
    let base = U256::from(STUB_CHAIN_ID_BASE);
    let hash = keccak256(name.to_uppercase().as_bytes());
    let id = U256::from_be_bytes(hash.0) % base;
    ChainId(base + id)
}

// ============================================================================
// Swap type and log index
// ============================================================================

/// Router swap type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapType {
    #[default]
    #[serde(alias = "erc20")]
    Erc20Swap,
    #[serde(alias = "nft")]
    NftSwap,
    #[serde(alias = "anycall")]
    AnyCallSwap,
}

impl SwapType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapType::Erc20Swap => "erc20swap",
            SwapType::NftSwap => "nftswap",
            SwapType::AnyCallSwap => "anycallswap",
        }
    }
}

impl fmt::Display for SwapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SwapType {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "erc20swap" | "erc20" => Ok(SwapType::Erc20Swap),
            "nftswap" | "nft" => Ok(SwapType::NftSwap),
            "anycallswap" | "anycall" => Ok(SwapType::AnyCallSwap),
            other => Err(eyre!("unknown swap type '{}'", other)),
        }
    }
}

/// Which event(s) of a transaction to consider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogIndex {
    /// Scan every event in the transaction (discovery)
    #[default]
    All,
    /// Only the event at this position
    Specific(usize),
}

impl LogIndex {
    pub fn specific(&self) -> Option<usize> {
        match self {
            LogIndex::All => None,
            LogIndex::Specific(index) => Some(*index),
        }
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogIndex::All => write!(f, "all"),
            LogIndex::Specific(index) => write!(f, "{}", index),
        }
    }
}

// ============================================================================
// Swap info
// ============================================================================

/// ERC20 swap-out details decoded from the router event
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Erc20SwapInfo {
    /// Source-chain token that was swapped out
    pub token: String,
    pub token_id: String,
    /// Content-addressed swapout ID (v7 routers only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swapout_id: Option<String>,
    #[serde(default)]
    pub for_native: bool,
    #[serde(default)]
    pub for_underlying: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftSwapInfo {
    pub token: String,
    pub token_id: String,
    pub ids: Vec<U256>,
    pub amounts: Vec<U256>,
    pub batch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyCallSwapInfo {
    pub call_from: String,
    pub call_to: String,
    pub call_data: Bytes,
}

/// Polymorphic swap payload, tagged by [`SwapType`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SwapInfo {
    Erc20(Erc20SwapInfo),
    Nft(NftSwapInfo),
    AnyCall(AnyCallSwapInfo),
}

impl SwapInfo {
    pub fn swap_type(&self) -> SwapType {
        match self {
            SwapInfo::Erc20(_) => SwapType::Erc20Swap,
            SwapInfo::Nft(_) => SwapType::NftSwap,
            SwapInfo::AnyCall(_) => SwapType::AnyCallSwap,
        }
    }

    pub fn token_id(&self) -> &str {
        match self {
            SwapInfo::Erc20(info) => &info.token_id,
            SwapInfo::Nft(info) => &info.token_id,
            SwapInfo::AnyCall(_) => "",
        }
    }

    pub fn erc20(&self) -> Option<&Erc20SwapInfo> {
        match self {
            SwapInfo::Erc20(info) => Some(info),
            _ => None,
        }
    }

    pub fn erc20_mut(&mut self) -> Option<&mut Erc20SwapInfo> {
        match self {
            SwapInfo::Erc20(info) => Some(info),
            _ => None,
        }
    }
}

impl Default for SwapInfo {
    fn default() -> Self {
        SwapInfo::Erc20(Erc20SwapInfo::default())
    }
}

/// Verified swap-out, threaded through verify → build → sign
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTxInfo {
    pub swap_info: SwapInfo,
    pub swap_type: SwapType,
    pub hash: String,
    pub height: u64,
    pub timestamp: u64,
    /// Swapper (event `from`, falls back to tx sender)
    pub from: String,
    /// Direct recipient of the source transaction
    pub tx_to: String,
    /// Contract that emitted the swap-out event
    pub to: String,
    /// Receiver on the destination chain
    pub bind: String,
    pub value: U256,
    pub log_index: usize,
    pub from_chain_id: ChainId,
    pub to_chain_id: ChainId,
}

impl SwapTxInfo {
    pub fn new(swap_type: SwapType, tx_hash: &str, log_index: usize) -> Self {
        let swap_info = match swap_type {
            SwapType::Erc20Swap => SwapInfo::Erc20(Erc20SwapInfo::default()),
            SwapType::NftSwap => SwapInfo::Nft(NftSwapInfo::default()),
            SwapType::AnyCallSwap => SwapInfo::AnyCall(AnyCallSwapInfo::default()),
        };
        Self {
            swap_info,
            swap_type,
            hash: tx_hash.to_lowercase(),
            log_index,
            ..Default::default()
        }
    }

    pub fn token_id(&self) -> &str {
        self.swap_info.token_id()
    }
}

/// Transaction inclusion status
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxStatus {
    pub confirmations: u64,
    pub block_height: u64,
    pub block_hash: String,
    pub block_time: u64,
}

// ============================================================================
// Operation arguments
// ============================================================================

/// Arguments of a targeted re-verification
#[derive(Debug, Clone, Default)]
pub struct VerifyArgs {
    pub swap_type: SwapType,
    pub log_index: usize,
    pub allow_unstable: bool,
    /// Backfill escape hatch: accept txs mined before the chain's initial height
    pub allow_before_initial_height: bool,
}

/// Arguments of swap discovery in a transaction
#[derive(Debug, Clone, Default)]
pub struct RegisterArgs {
    pub swap_type: SwapType,
    pub log_index: LogIndex,
    pub allow_before_initial_height: bool,
}

/// Swap identity carried into the build stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapArgs {
    pub identifier: String,
    pub swap_id: String,
    pub swap_type: SwapType,
    pub bind: String,
    pub log_index: usize,
    pub from_chain_id: ChainId,
    pub to_chain_id: ChainId,
    pub swap_info: SwapInfo,
}

impl SwapArgs {
    pub fn token_id(&self) -> &str {
        self.swap_info.token_id()
    }
}

/// EVM build extras, filled with the defaults chosen at build time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthExtraArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_tip_cap: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_fee_cap: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<u64>,
}

/// Chain-specific extras bag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_extra: Option<EthExtraArgs>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub replace_num: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Everything needed to build the destination-chain transaction
#[derive(Debug, Clone, Default)]
pub struct BuildTxArgs {
    pub swap: SwapArgs,
    pub from: String,
    pub to: String,
    pub value: U256,
    pub origin_from: String,
    pub origin_tx_to: String,
    /// Amount on the source chain before fee and decimal conversion
    pub origin_value: U256,
    /// Amount credited on the destination chain
    pub swap_value: U256,
    pub input: Option<Bytes>,
    pub extra: ExtraArgs,
}

impl BuildTxArgs {
    pub fn token_id(&self) -> &str {
        self.swap.token_id()
    }

    pub fn eth_extra_mut(&mut self) -> &mut EthExtraArgs {
        self.extra.eth_extra.get_or_insert_with(EthExtraArgs::default)
    }

    pub fn replace_num(&self) -> u64 {
        self.extra.replace_num
    }
}

/// Router identity discovered on-chain
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouterInfo {
    pub router_mpc: String,
    pub router_factory: String,
    pub router_wnative: String,
}

/// Lowercase 0x-hex rendering used for every address key and comparison
pub fn lower_hex(address: &Address) -> String {
    format!("{:#x}", address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_parse_decimal_and_hex() {
        assert_eq!(ChainId::from_str("56").unwrap(), ChainId::from_u64(56));
        assert_eq!(ChainId::from_str("0x38").unwrap(), ChainId::from_u64(56));
        assert!(ChainId::from_str("").is_err());
        assert!(ChainId::from_str("-1").is_err());
        assert!(ChainId::from_str("abc").is_err());
    }

    #[test]
    fn test_chain_id_serde_string_and_number() {
        let id: ChainId = serde_json::from_str("\"137\"").unwrap();
        assert_eq!(id, ChainId::from_u64(137));
        let id: ChainId = serde_json::from_str("137").unwrap();
        assert_eq!(id, ChainId::from_u64(137));
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"137\"");
    }

    #[test]
    fn test_stub_chain_id_range_and_distinct() {
        let main = stub_chain_id("BTC");
        let test = stub_chain_id("BTC_TEST");
        let base = U256::from(STUB_CHAIN_ID_BASE);
        assert!(main.0 >= base && main.0 < base * U256::from(2));
        assert_ne!(main, test);
        assert_eq!(main, stub_chain_id("btc"));
    }

    #[test]
    fn test_swap_type_from_str() {
        assert_eq!(SwapType::from_str("erc20swap").unwrap(), SwapType::Erc20Swap);
        assert_eq!(SwapType::from_str("NFT").unwrap(), SwapType::NftSwap);
        assert!(SwapType::from_str("gas").is_err());
        assert_eq!(SwapType::AnyCallSwap.to_string(), "anycallswap");
    }

    #[test]
    fn test_log_index_specific() {
        assert_eq!(LogIndex::All.specific(), None);
        assert_eq!(LogIndex::Specific(0).specific(), Some(0));
        assert_eq!(LogIndex::Specific(3).to_string(), "3");
    }

    #[test]
    fn test_swap_tx_info_new_lowercases_hash() {
        let info = SwapTxInfo::new(SwapType::Erc20Swap, "0xABCDEF", 2);
        assert_eq!(info.hash, "0xabcdef");
        assert_eq!(info.log_index, 2);
        assert!(info.swap_info.erc20().is_some());
    }

    #[test]
    fn test_extra_args_json_skips_empty() {
        let mut args = BuildTxArgs::default();
        args.eth_extra_mut().gas = Some(21000);
        let json = serde_json::to_string(&args.extra).unwrap();
        assert_eq!(json, r#"{"ethExtra":{"gas":21000}}"#);
    }

    #[test]
    fn test_lower_hex_address() {
        let addr = Address::repeat_byte(0xAB);
        assert_eq!(lower_hex(&addr), format!("0x{}", "ab".repeat(20)));
    }
}
