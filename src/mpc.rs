//! MPC signing collaborator
//!
//! The threshold-signing cluster is reached through [`MpcSigner`]; this module only enforces the
//! single-signature contract and the signing timeout. Curve-specific splitting and sender
//! recovery belong to each chain adapter.

use crate::error::{SwapError, SwapResult};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

/// Threshold ECDSA signing cluster
#[async_trait]
pub trait MpcSigner: Send + Sync {
    /// Sign one message hash (0x-prefixed hex) with the key behind `pubkey`
    ///
    /// Returns the key id of the signing round and the rsv signatures as hex strings.
    async fn do_sign_one_ec(
        &self,
        pubkey: &str,
        msg_hash: &str,
        context: &str,
    ) -> eyre::Result<(String, Vec<String>)>;
}

/// One signature from the cluster, enforcing exactly one rsv
pub async fn sign_one(
    signer: &dyn MpcSigner,
    pubkey: &str,
    msg_hash: &str,
    context: &str,
    timeout: Duration,
    swap_id: &str,
) -> SwapResult<(String, String)> {
    info!(swap_id = %swap_id, msg_hash = %msg_hash, "MPC sign start");

    let (key_id, rsvs) =
        match tokio::time::timeout(timeout, signer.do_sign_one_ec(pubkey, msg_hash, context)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(swap_id = %swap_id, error = %e, "MPC sign failed");
                return Err(SwapError::wrap(SwapError::RpcQueryError, "DoSignOneEC", msg_hash, e));
            }
            Err(_) => {
                warn!(swap_id = %swap_id, timeout_secs = timeout.as_secs(), "MPC sign timed out");
                return Err(SwapError::wrap(
                    SwapError::RpcQueryError,
                    "DoSignOneEC",
                    msg_hash,
                    "timeout",
                ));
            }
        };

    if rsvs.len() != 1 {
        warn!(swap_id = %swap_id, key_id = %key_id, rsvs = rsvs.len(), "MPC sign requires exactly one rsv");
        return Err(SwapError::WrongSignature(format!(
            "require one rsv but got {}",
            rsvs.len()
        )));
    }

    info!(swap_id = %swap_id, key_id = %key_id, msg_hash = %msg_hash, "MPC sign finished");
    let rsv = rsvs.into_iter().next().unwrap_or_default();
    Ok((key_id, rsv))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSigner(Vec<String>);

    #[async_trait]
    impl MpcSigner for FixedSigner {
        async fn do_sign_one_ec(&self, _: &str, _: &str, _: &str) -> eyre::Result<(String, Vec<String>)> {
            Ok(("key-1".to_string(), self.0.clone()))
        }
    }

    struct SlowSigner;

    #[async_trait]
    impl MpcSigner for SlowSigner {
        async fn do_sign_one_ec(&self, _: &str, _: &str, _: &str) -> eyre::Result<(String, Vec<String>)> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(("late".to_string(), vec![]))
        }
    }

    #[tokio::test]
    async fn test_sign_one_requires_exactly_one_rsv() {
        let signer = FixedSigner(vec!["0xaa".to_string(), "0xbb".to_string()]);
        let err = sign_one(&signer, "04", "0x01", "{}", Duration::from_secs(1), "swap")
            .await
            .unwrap_err();
        assert!(err.is(&SwapError::WrongSignature(String::new())));

        let signer = FixedSigner(vec![]);
        assert!(sign_one(&signer, "04", "0x01", "{}", Duration::from_secs(1), "swap")
            .await
            .is_err());

        let signer = FixedSigner(vec!["0xaa".to_string()]);
        let (key_id, rsv) = sign_one(&signer, "04", "0x01", "{}", Duration::from_secs(1), "swap")
            .await
            .unwrap();
        assert_eq!(key_id, "key-1");
        assert_eq!(rsv, "0xaa");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_one_times_out() {
        let err = sign_one(&SlowSigner, "04", "0x01", "{}", Duration::from_secs(120), "swap")
            .await
            .unwrap_err();
        assert!(err.is(&SwapError::RpcQueryError));
    }
}
