//! Discovery of every swap-out in one transaction

use super::EvmBridge;
use crate::bridge::SwapCandidate;
use crate::error::SwapError;
use crate::types::{LogIndex, RegisterArgs, SwapTxInfo, SwapType};
use tracing::{debug, info};

impl EvmBridge {
    /// One candidate per swap-out log, each carrying its own verification outcome
    ///
    /// Stability is not required at registration; the stable pass happens at verify time.
    /// Logs that are simply not swap-outs of our routers are skipped. A transaction with no
    /// swap-out at all yields a single `SwapoutLogNotFound` candidate.
    pub async fn register_router_swap(&self, tx_hash: &str, args: &RegisterArgs) -> Vec<SwapCandidate> {
        let start = match args.log_index {
            LogIndex::All => 0,
            LogIndex::Specific(index) => index,
        };
        let mut base = SwapTxInfo::new(args.swap_type, tx_hash, start);
        base.from_chain_id = self.chain_id_value();

        if args.swap_type != SwapType::Erc20Swap {
            return vec![SwapCandidate::failed(base, SwapError::SwapTypeNotSupported)];
        }

        let receipt = match self
            .get_swap_receipt(&mut base, true, args.allow_before_initial_height)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                self.log_verify_error(&base, &e);
                return vec![SwapCandidate::failed(base, e)];
            }
        };

        if let LogIndex::Specific(index) = args.log_index {
            let mut info = base;
            return match self.verify_swap_log(&mut info, &receipt, index).await {
                Ok(()) => vec![SwapCandidate::ok(info)],
                Err(e) => {
                    self.log_verify_error(&info, &e);
                    vec![SwapCandidate::failed(info, e)]
                }
            };
        }

        let mut candidates = Vec::new();
        for index in 0..receipt.logs.len() {
            let mut info = base.clone();
            info.log_index = index;
            match self.verify_swap_log(&mut info, &receipt, index).await {
                Ok(()) => candidates.push(SwapCandidate::ok(info)),
                Err(e) if e.is_soft_verify() => {
                    debug!(
                        chain_id = %self.chain_id_str(),
                        tx_hash = %tx_hash,
                        log_index = index,
                        error = %e,
                        "Skip non swapout log"
                    );
                }
                Err(e) => {
                    self.log_verify_error(&info, &e);
                    candidates.push(SwapCandidate::failed(info, e));
                }
            }
        }

        if candidates.is_empty() {
            return vec![SwapCandidate::failed(base, SwapError::SwapoutLogNotFound)];
        }
        info!(
            chain_id = %self.chain_id_str(),
            tx_hash = %tx_hash,
            count = candidates.len(),
            "Register router swap"
        );
        candidates
    }
}
