//! Token value engine: decimal conversion, fees, swap bounds and blacklists
//!
//! Pure integer arithmetic over `U256`. Swap and fee amounts in [`SwapConfig`] are configured in
//! 18-decimal units and converted to the source token's decimals at use. Every division
//! truncates, so a swap never credits more than was burned.

use crate::config::SwapConfig;
use alloy::primitives::U256;
use eyre::{eyre, Result};
use std::collections::HashSet;
use tracing::warn;

/// Decimals the swap/fee amounts of [`SwapConfig`] are expressed in
pub const CONFIG_DECIMALS: u8 = 18;

const FEE_RATE_DENOMINATOR: u64 = 1_000_000;

fn pow10(exp: u8) -> Option<U256> {
    U256::from(10u64).checked_pow(U256::from(exp))
}

/// Rescale `value` from `from_decimals` to `to_decimals`, truncating
///
/// An upscale that overflows yields zero, which every bounds check rejects.
pub fn convert_token_value(value: U256, from_decimals: u8, to_decimals: u8) -> U256 {
    if from_decimals == to_decimals {
        return value;
    }
    if from_decimals > to_decimals {
        match pow10(from_decimals - to_decimals) {
            Some(divisor) => value / divisor,
            None => U256::ZERO,
        }
    } else {
        pow10(to_decimals - from_decimals)
            .and_then(|factor| value.checked_mul(factor))
            .unwrap_or(U256::ZERO)
    }
}

/// Parse a human decimal string ("1.2345") into smallest units
///
/// At most one decimal point, digits only on both sides; excess fraction digits truncate.
pub fn to_bits(value: &str, decimals: u8) -> Option<U256> {
    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() > 2 {
        return None;
    }
    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    let int_part = parts[0];
    if !is_digits(int_part) {
        return None;
    }
    let one = pow10(decimals)?;
    let mut result = U256::from_str_radix(int_part, 10).ok()?.checked_mul(one)?;

    if let Some(frac_part) = parts.get(1) {
        if !is_digits(frac_part) {
            return None;
        }
        let frac_len = u8::try_from(frac_part.len()).ok()?;
        let frac = U256::from_str_radix(frac_part, 10).ok()?;
        let scaled = frac.checked_mul(one)? / pow10(frac_len)?;
        result = result.checked_add(scaled)?;
    }
    Some(result)
}

/// Caller-specific adjustments to the configured fee
#[derive(Debug, Clone, Copy, Default)]
pub struct FeePolicy {
    /// Origin sender or tx recipient is in the big-value whitelist
    pub whitelisted: bool,
    /// Destination chain's base fee percent applied on top of the minimum fee
    pub base_fee_percent: i64,
}

/// Amount credited on the destination chain: subtract the fee, then rescale decimals
pub fn calc_swap_value(
    cfg: &SwapConfig,
    value: U256,
    from_decimals: u8,
    to_decimals: u8,
    policy: &FeePolicy,
) -> U256 {
    let mut value_left = value;

    if cfg.swap_fee_rate_per_million > 0 {
        let min_fee = convert_token_value(cfg.minimum_swap_fee, CONFIG_DECIMALS, from_decimals);
        let swap_fee = if policy.whitelisted {
            min_fee
        } else {
            let max_fee =
                convert_token_value(cfg.maximum_swap_fee, CONFIG_DECIMALS, from_decimals);
            let fee = value.saturating_mul(U256::from(cfg.swap_fee_rate_per_million))
                / U256::from(FEE_RATE_DENOMINATOR);
            let fee = if fee < min_fee {
                min_fee
            } else if fee > max_fee {
                max_fee
            } else {
                fee
            };
            apply_base_fee(fee, min_fee, policy.base_fee_percent)
        };

        if value <= swap_fee {
            warn!(
                value = %value,
                swap_fee = %swap_fee,
                min_fee = %min_fee,
                token_id = %cfg.token_id,
                to_chain_id = %cfg.to_chain_id,
                "Swap value does not cover the fee"
            );
            return U256::ZERO;
        }
        value_left = value - swap_fee;
    }

    convert_token_value(value_left, from_decimals, to_decimals)
}

fn apply_base_fee(fee: U256, min_fee: U256, percent: i64) -> U256 {
    if percent == 0 || min_fee.is_zero() {
        return fee;
    }
    let adjust = min_fee.saturating_mul(U256::from(percent.unsigned_abs())) / U256::from(100u64);
    if percent > 0 {
        fee.saturating_add(adjust)
    } else {
        fee.saturating_sub(adjust)
    }
}

/// Bounds check before committing to a swap
///
/// `value` must be positive, inside `[minimum_swap, maximum_swap]` (whitelisted callers may
/// exceed the maximum) and still positive after fee and decimal conversion.
pub fn check_token_swap_value(
    cfg: &SwapConfig,
    value: U256,
    from_decimals: u8,
    to_decimals: u8,
    policy: &FeePolicy,
) -> bool {
    if value.is_zero() {
        return false;
    }
    let min_swap = convert_token_value(cfg.minimum_swap, CONFIG_DECIMALS, from_decimals);
    if value < min_swap {
        return false;
    }
    let max_swap = convert_token_value(cfg.maximum_swap, CONFIG_DECIMALS, from_decimals);
    if value > max_swap && !policy.whitelisted {
        return false;
    }
    calc_swap_value(cfg, value, from_decimals, to_decimals, policy) > U256::ZERO
}

/// Swaps above the big-value threshold need manual review unless whitelisted
pub fn is_big_value_swap(cfg: &SwapConfig, value: U256, from_decimals: u8, whitelisted: bool) -> bool {
    if whitelisted {
        return false;
    }
    let threshold = convert_token_value(cfg.big_value_threshold, CONFIG_DECIMALS, from_decimals);
    value > threshold
}

// ============================================================================
// Blacklists
// ============================================================================

/// Chain and token blacklists, built once when config is loaded
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    chain_ids: HashSet<String>,
    token_ids: HashSet<String>,
}

impl Blacklist {
    /// Build from config lists; duplicate entries are a config error
    pub fn new(chain_ids: &[String], token_ids: &[String]) -> Result<Self> {
        let mut blacklist = Blacklist::default();
        for chain_id in chain_ids {
            if !blacklist.chain_ids.insert(chain_id.trim().to_string()) {
                return Err(eyre!("duplicate chain id '{}' in black list", chain_id));
            }
        }
        for token_id in token_ids {
            if !blacklist.token_ids.insert(token_id.trim().to_lowercase()) {
                return Err(eyre!("duplicate token id '{}' in black list", token_id));
            }
        }
        Ok(blacklist)
    }

    pub fn is_chain_id_in_black_list(&self, chain_id: &str) -> bool {
        self.chain_ids.contains(chain_id)
    }

    pub fn is_token_id_in_black_list(&self, token_id: &str) -> bool {
        self.token_ids.contains(&token_id.to_lowercase())
    }

    pub fn is_swap_in_black_list(&self, from_chain_id: &str, to_chain_id: &str, token_id: &str) -> bool {
        self.is_chain_id_in_black_list(from_chain_id)
            || self.is_chain_id_in_black_list(to_chain_id)
            || self.is_token_id_in_black_list(token_id)
    }
}
