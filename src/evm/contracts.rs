//! Router and token contract ABI definitions
//!
//! Uses alloy's sol! macro for call encoding and return decoding. Calls go out through the
//! adapter's own gateway layer, so no provider bindings are generated.
//!
//! `LogAnySwapOut` is overloaded across router generations; each variant lives in its own
//! interface so the three topic hashes stay distinct.

#![allow(clippy::too_many_arguments)]

use alloy::primitives::{keccak256, B256};
use alloy::sol;
use alloy::sol_types::SolEvent;

sol! {
    /// Swap router (anySwapIn family plus identity getters)
    interface Router {
        // ========================================================================
        // Swap In
        // ========================================================================

        function anySwapIn(bytes32 txs, address token, address to, uint256 amount, uint256 fromChainID) external;

        function anySwapInUnderlying(bytes32 txs, address token, address to, uint256 amount, uint256 fromChainID) external;

        function anySwapInAuto(bytes32 txs, address token, address to, uint256 amount, uint256 fromChainID) external;

        // ========================================================================
        // Permit Swap Out
        // ========================================================================

        function anySwapOutUnderlyingWithPermit(address from, address token, address to, uint256 amount, uint256 deadline, uint8 v, bytes32 r, bytes32 s, uint256 toChainID) external;

        function anySwapOutUnderlyingWithTransferPermit(address from, address token, address to, uint256 amount, uint256 deadline, uint8 v, bytes32 r, bytes32 s, uint256 toChainID) external;

        // ========================================================================
        // Identity
        // ========================================================================

        function mpc() external view returns (address);

        function factory() external view returns (address);

        function wNATIVE() external view returns (address);

        /// v7 swapout registry
        function isSwapoutIDExist(bytes32 swapoutID) external view returns (bool);
    }

    /// Bridge-issued token (anyToken)
    interface AnyToken {
        function decimals() external view returns (uint8);

        function balanceOf(address account) external view returns (uint256);

        function underlying() external view returns (address);

        function owner() external view returns (address);

        function vault() external view returns (address);

        function isMinter(address account) external view returns (bool);

        event Transfer(address indexed from, address indexed to, uint256 value);
    }

    /// Mint/burn wrapper around an existing token
    interface MintBurnWrapper {
        function token() external view returns (address);
    }

    /// v6 router, address receiver
    interface RouterV6 {
        event LogAnySwapOut(address indexed token, address indexed from, address indexed to, uint256 amount, uint256 fromChainID, uint256 toChainID);
    }

    /// v6 router, string receiver (non-EVM destinations)
    interface RouterV6String {
        event LogAnySwapOut(address indexed token, address indexed from, string to, uint256 amount, uint256 fromChainID, uint256 toChainID);
    }

    /// v7 router with content-addressed swapout IDs
    interface RouterV7 {
        event LogAnySwapOut(bytes32 indexed swapoutID, address indexed token, address indexed from, string receiver, uint256 amount, uint256 toChainID);
    }
}

/// Recognized swap-out event variants, keyed by `topics[0]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapoutEvent {
    V6,
    V6String,
    V7,
}

impl SwapoutEvent {
    pub fn from_topic(topic: &B256) -> Option<Self> {
        if *topic == RouterV6::LogAnySwapOut::SIGNATURE_HASH {
            Some(SwapoutEvent::V6)
        } else if *topic == RouterV6String::LogAnySwapOut::SIGNATURE_HASH {
            Some(SwapoutEvent::V6String)
        } else if *topic == RouterV7::LogAnySwapOut::SIGNATURE_HASH {
            Some(SwapoutEvent::V7)
        } else {
            None
        }
    }

    pub fn topic(&self) -> B256 {
        match self {
            SwapoutEvent::V6 => RouterV6::LogAnySwapOut::SIGNATURE_HASH,
            SwapoutEvent::V6String => RouterV6String::LogAnySwapOut::SIGNATURE_HASH,
            SwapoutEvent::V7 => RouterV7::LogAnySwapOut::SIGNATURE_HASH,
        }
    }
}

/// ERC20 `Transfer(address,address,uint256)` topic
pub fn transfer_topic() -> B256 {
    AnyToken::Transfer::SIGNATURE_HASH
}

/// Topic of a raw event signature string
pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}
