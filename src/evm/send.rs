//! Broadcast of signed transactions

use super::client::send_raw_transaction;
use super::EvmBridge;
use crate::bridge::{NonceSetter, SignedTx};
use crate::error::{SwapError, SwapResult};
use crate::gateway::broadcast;
use crate::retry::{classify_send_error, SendErrorClass};
use crate::types::lower_hex;
use alloy::consensus::Transaction;
use alloy::eips::eip2718::Encodable2718;
use tracing::{debug, info, warn};

impl EvmBridge {
    /// Send to every endpoint; succeeds when any endpoint accepted or already knows the tx
    pub async fn send_signed_tx(&self, signed_tx: &SignedTx) -> SwapResult<String> {
        let SignedTx::Evm(envelope) = signed_tx;
        let tx_hash = format!("{:#x}", envelope.tx_hash());
        let raw = format!("0x{}", hex::encode(envelope.encoded_2718()));
        let urls = self.gateway_pool().urls();
        if urls.is_empty() {
            return Err(SwapError::EmptyUrls);
        }

        let transport = self.ctx.transport.clone();
        let results = broadcast(&urls, |url| {
            send_raw_transaction(transport.clone(), url, raw.clone())
        })
        .await;

        let mut accepted = false;
        let mut nonce_too_low = false;
        let mut last_err = None;
        for (url, result) in results {
            match result {
                Ok(hash) => {
                    if hash != tx_hash {
                        warn!(chain_id = %self.chain_id_str(), url = %url, have = %hash, want = %tx_hash, "Send tx hash mismatch");
                    }
                    accepted = true;
                }
                Err(e) => {
                    let message = e.to_string();
                    match classify_send_error(&message) {
                        SendErrorClass::AlreadySubmitted if message.to_lowercase().contains("nonce too low") => {
                            nonce_too_low = true;
                            last_err = Some(e);
                        }
                        SendErrorClass::AlreadySubmitted => {
                            debug!(chain_id = %self.chain_id_str(), url = %url, tx_hash = %tx_hash, "Tx already known");
                            accepted = true;
                        }
                        class => {
                            debug!(
                                chain_id = %self.chain_id_str(),
                                url = %url,
                                tx_hash = %tx_hash,
                                class = ?class,
                                error = %e,
                                "Send tx failed"
                            );
                            last_err = Some(e);
                        }
                    }
                }
            }
        }

        // a lower nonce than pending is only fine if this very tx got mined
        if !accepted && nonce_too_low && self.get_transaction_receipt(&tx_hash).await.is_ok() {
            accepted = true;
        }

        if !accepted {
            let err = last_err.unwrap_or(SwapError::RpcQueryError);
            warn!(chain_id = %self.chain_id_str(), tx_hash = %tx_hash, error = %err, "Send transaction failed");
            return Err(err);
        }

        let sender = envelope
            .recover_signer()
            .map_err(|e| SwapError::WrongSignature(e.to_string()))?;
        let nonce = envelope.nonce();
        self.set_nonce(&lower_hex(&sender), nonce + 1).await;
        info!(
            chain_id = %self.chain_id_str(),
            tx_hash = %tx_hash,
            from = %sender,
            nonce = nonce,
            "Send transaction success"
        );
        Ok(tx_hash)
    }
}
