//! Error taxonomy shared by every chain adapter
//!
//! Adapter operations return [`SwapError`], a closed set of sentinel kinds. RPC failures are
//! wrapped with the method and parameters of the failing call but keep their sentinel identity,
//! so callers branch on `err.is(&SwapError::NotFound)` instead of message text.

use std::fmt;
use thiserror::Error;

/// Result alias for chain-adapter operations
pub type SwapResult<T> = std::result::Result<T, SwapError>;

/// Sentinel errors returned by bridge operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwapError {
    // ========================================================================
    // Transaction lookup and receipt shape
    // ========================================================================
    #[error("tx not found")]
    TxNotFound,
    #[error("tx not stable")]
    TxNotStable,
    #[error("tx before initial block height")]
    TxBeforeInitialHeight,
    #[error("tx with wrong receipt")]
    TxWithWrongReceipt,
    #[error("tx with wrong contract")]
    TxWithWrongContract,
    #[error("tx with wrong topics")]
    TxWithWrongTopics,
    #[error("tx with removed log")]
    TxWithRemovedLog,
    #[error("log index out of range")]
    LogIndexOutOfRange,
    #[error("swapout log not found")]
    SwapoutLogNotFound,
    #[error("parse data error: {0}")]
    ParseData(String),

    // ========================================================================
    // Swap content
    // ========================================================================
    #[error("tx with wrong value")]
    TxWithWrongValue,
    #[error("tx with wrong path")]
    TxWithWrongPath,
    #[error("wrong bind address")]
    WrongBindAddress,
    #[error("from chainID mismatch")]
    FromChainIdMismatch,
    #[error("to chainID mismatch")]
    ToChainIdMismatch,
    #[error("from and to chainID are same")]
    SameFromAndToChainId,
    #[error("swap type not supported in this operation")]
    SwapTypeNotSupported,
    #[error("swap is in black list")]
    SwapInBlacklist,
    #[error("swapout is forbidden")]
    SwapoutForbidden,
    #[error("swapout id not exist")]
    SwapoutIdNotExist,
    #[error("[tx maybe unsafe]")]
    VerifyTxUnsafe,

    // ========================================================================
    // Cross-chain resolution
    // ========================================================================
    #[error("no bridge for chain id")]
    NoBridgeForChainId,
    #[error("miss token config")]
    MissTokenConfig,
    #[error("no underlying token")]
    NoUnderlyingToken,
    #[error("miss router info")]
    MissRouterInfo,
    #[error("miss mpc public key")]
    MissMpcPublicKey,
    #[error("pause swap into dest chain")]
    PauseSwapInto,

    // ========================================================================
    // Build, sign and send
    // ========================================================================
    #[error("sender mismatch")]
    SenderMismatch,
    #[error("wrong raw tx")]
    WrongRawTx,
    #[error("wrong count of msg hashes")]
    WrongCountOfMsgHashes,
    #[error("msg hash mismatch")]
    MsgHashMismatch,
    #[error("wrong signature: {0}")]
    WrongSignature(String),
    #[error("estimate gas failed")]
    EstimateGasFailed,
    #[error("build tx error and delay: {0}")]
    BuildTxErrorAndDelay(String),
    #[error("miss dynamic fee tx config")]
    MissDynamicFeeConfig,
    #[error("nonce out of range: cached {cached}, got {nonce}")]
    NonceOutOfRange { cached: u64, nonce: u64 },
    #[error("not enough coin balance: {0}")]
    NotEnoughBalance(String),

    // ========================================================================
    // RPC
    // ========================================================================
    #[error("rpc query error")]
    RpcQueryError,
    #[error("not found")]
    NotFound,
    #[error("empty gateway urls")]
    EmptyUrls,
    #[error("{kind}: call '{call}' failed, err='{detail}'")]
    Wrapped {
        kind: Box<SwapError>,
        call: String,
        detail: String,
    },
}

/// Coarse classification used by callers to decide on retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Candidate does not describe a recognized swap; try the next one
    SoftVerify,
    /// Claimed and actual on-chain effect disagree; never auto-retry
    HardVerify,
    /// Endpoint failure; retried a fixed number of times
    Transient,
    /// Destination side not configured yet; retryable by the caller
    CrossChain,
    /// Anything else (build/sign guard failures, malformed input)
    Other,
}

impl SwapError {
    /// Wrap an RPC failure with the call description, keeping `kind` as identity.
    pub fn wrap(kind: SwapError, method: &str, params: impl fmt::Debug, detail: impl fmt::Display) -> Self {
        SwapError::Wrapped {
            kind: Box::new(kind),
            call: format!("{} {:?}", method, params),
            detail: detail.to_string(),
        }
    }

    /// Wrap the last error of a failed RPC query.
    ///
    /// Errors that are already wrapped or already a sentinel keep their identity; a missing
    /// error means every endpoint answered "nothing", which is `NotFound`.
    pub fn wrap_rpc(last: Option<SwapError>, method: &str, params: impl fmt::Debug) -> Self {
        match last {
            None => SwapError::wrap(SwapError::NotFound, method, params, "not found"),
            Some(err @ SwapError::Wrapped { .. }) => err,
            Some(err) => {
                let kind = match &err {
                    SwapError::NotFound | SwapError::TxNotFound => SwapError::NotFound,
                    _ => SwapError::RpcQueryError,
                };
                SwapError::wrap(kind, method, params, err)
            }
        }
    }

    /// Unwrap to the sentinel kind
    pub fn root(&self) -> &SwapError {
        match self {
            SwapError::Wrapped { kind, .. } => kind.root(),
            other => other,
        }
    }

    /// Sentinel identity check that sees through wrapping
    pub fn is(&self, other: &SwapError) -> bool {
        std::mem::discriminant(self.root()) == std::mem::discriminant(other.root())
    }

    pub fn is_rpc_query_or_not_found(&self) -> bool {
        matches!(
            self.root(),
            SwapError::RpcQueryError | SwapError::NotFound | SwapError::TxNotFound
        )
    }

    /// Whether a failed verification should still be registered for later review.
    pub fn should_register_router_swap(err: Option<&SwapError>) -> bool {
        match err {
            None => true,
            Some(err) => matches!(
                err.root(),
                SwapError::TxWithWrongValue
                    | SwapError::TxWithWrongPath
                    | SwapError::MissTokenConfig
                    | SwapError::NoUnderlyingToken
                    | SwapError::VerifyTxUnsafe
                    | SwapError::SwapoutForbidden
            ),
        }
    }

    /// Soft errors let discovery move on to the next log index
    pub fn is_soft_verify(&self) -> bool {
        matches!(
            self.root(),
            SwapError::SwapoutLogNotFound | SwapError::TxWithWrongContract
        )
    }

    pub fn class(&self) -> ErrorClass {
        match self.root() {
            SwapError::SwapoutLogNotFound
            | SwapError::TxWithWrongContract
            | SwapError::TxWithWrongTopics
            | SwapError::ParseData(_)
            | SwapError::LogIndexOutOfRange
            | SwapError::TxNotStable
            | SwapError::TxNotFound
            | SwapError::TxBeforeInitialHeight
            | SwapError::TxWithWrongReceipt => ErrorClass::SoftVerify,
            SwapError::VerifyTxUnsafe
            | SwapError::TxWithRemovedLog
            | SwapError::SwapoutIdNotExist
            | SwapError::TxWithWrongValue
            | SwapError::FromChainIdMismatch
            | SwapError::WrongBindAddress => ErrorClass::HardVerify,
            SwapError::RpcQueryError | SwapError::NotFound | SwapError::EmptyUrls => {
                ErrorClass::Transient
            }
            SwapError::NoBridgeForChainId
            | SwapError::MissTokenConfig
            | SwapError::MissRouterInfo
            | SwapError::MissMpcPublicKey
            | SwapError::NoUnderlyingToken => ErrorClass::CrossChain,
            _ => ErrorClass::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_error_keeps_identity() {
        let err = SwapError::wrap(
            SwapError::RpcQueryError,
            "eth_getTransactionReceipt",
            ["0xabc"],
            "connection refused",
        );
        assert!(err.is(&SwapError::RpcQueryError));
        assert!(!err.is(&SwapError::NotFound));
        assert!(err.is_rpc_query_or_not_found());
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[test]
    fn test_wrapped_error_message() {
        let err = SwapError::wrap(SwapError::NotFound, "eth_blockNumber", (), "no result");
        assert_eq!(
            err.to_string(),
            "not found: call 'eth_blockNumber ()' failed, err='no result'"
        );
    }

    #[test]
    fn test_wrap_rpc_defaults_to_not_found() {
        let err = SwapError::wrap_rpc(None, "eth_gasPrice", ());
        assert!(err.is(&SwapError::NotFound));
    }

    #[test]
    fn test_wrap_rpc_does_not_double_wrap() {
        let inner = SwapError::wrap(SwapError::RpcQueryError, "eth_call", (), "timeout");
        let err = SwapError::wrap_rpc(Some(inner.clone()), "eth_call", ());
        assert_eq!(err, inner);
    }

    #[test]
    fn test_should_register_router_swap() {
        assert!(SwapError::should_register_router_swap(None));
        assert!(SwapError::should_register_router_swap(Some(
            &SwapError::TxWithWrongValue
        )));
        assert!(SwapError::should_register_router_swap(Some(
            &SwapError::VerifyTxUnsafe
        )));
        assert!(!SwapError::should_register_router_swap(Some(
            &SwapError::TxNotStable
        )));
        assert!(!SwapError::should_register_router_swap(Some(
            &SwapError::SwapoutLogNotFound
        )));
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(SwapError::SwapoutLogNotFound.class(), ErrorClass::SoftVerify);
        assert_eq!(SwapError::VerifyTxUnsafe.class(), ErrorClass::HardVerify);
        assert_eq!(SwapError::NoBridgeForChainId.class(), ErrorClass::CrossChain);
        assert_eq!(SwapError::SenderMismatch.class(), ErrorClass::Other);
        assert!(SwapError::TxWithWrongContract.is_soft_verify());
        assert!(!SwapError::VerifyTxUnsafe.is_soft_verify());
    }
}
