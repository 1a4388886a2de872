//! MPC signing of built swap-in transactions

use super::EvmBridge;
use crate::bridge::{ConfigHolder, MpcSignable, RawTx, SignedTx};
use crate::error::{SwapError, SwapResult};
use crate::mpc::sign_one;
use crate::types::BuildTxArgs;
use alloy::consensus::{SignableTransaction, TxEnvelope, TypedTransaction};
use alloy::primitives::{Address, PrimitiveSignature, B256, U256};
use async_trait::async_trait;
use std::str::FromStr;
use tracing::{error, info};

const SIGNATURE_LENGTH: usize = 65;

/// Hash the signer commits to (EIP-155 for legacy, EIP-2718 payload for 1559)
pub fn signing_hash(tx: &TypedTransaction) -> SwapResult<B256> {
    match tx {
        TypedTransaction::Legacy(tx) => Ok(tx.signature_hash()),
        TypedTransaction::Eip1559(tx) => Ok(tx.signature_hash()),
        _ => Err(SwapError::WrongRawTx),
    }
}

fn attach_signature(tx: &TypedTransaction, signature: PrimitiveSignature) -> SwapResult<TxEnvelope> {
    match tx.clone() {
        TypedTransaction::Legacy(tx) => Ok(tx.into_signed(signature).into()),
        TypedTransaction::Eip1559(tx) => Ok(tx.into_signed(signature).into()),
        _ => Err(SwapError::WrongRawTx),
    }
}

fn tx_receiver(tx: &TypedTransaction) -> Option<Address> {
    match tx {
        TypedTransaction::Legacy(tx) => tx.to.to().copied(),
        TypedTransaction::Eip1559(tx) => tx.to.to().copied(),
        _ => None,
    }
}

/// Split a 65-byte rsv hex string, normalising `v` to a parity bit
pub fn parse_rsv(rsv: &str) -> SwapResult<(U256, U256, bool)> {
    let bytes = hex::decode(rsv.trim_start_matches("0x"))
        .map_err(|e| SwapError::WrongSignature(format!("decode rsv: {}", e)))?;
    if bytes.len() != SIGNATURE_LENGTH {
        return Err(SwapError::WrongSignature(format!(
            "wrong signature length, have {} want {}",
            bytes.len(),
            SIGNATURE_LENGTH
        )));
    }
    let r = U256::from_be_slice(&bytes[..32]);
    let s = U256::from_be_slice(&bytes[32..64]);
    let v = bytes[64];
    let v = if v >= 27 { v - 27 } else { v };
    Ok((r, s, v & 1 == 1))
}

/// Signature over `msg_hash` recovering to `sender`, trying both parities
pub fn recover_with_sender(
    msg_hash: &B256,
    r: U256,
    s: U256,
    parity: bool,
    sender: &Address,
) -> SwapResult<PrimitiveSignature> {
    for y_parity in [parity, !parity] {
        let signature = PrimitiveSignature::new(r, s, y_parity);
        if let Ok(recovered) = signature.recover_address_from_prehash(msg_hash) {
            if recovered == *sender {
                return Ok(signature);
            }
        }
    }
    Err(SwapError::SenderMismatch)
}

impl EvmBridge {
    /// Signed tx receiver must be the router serving the token on this chain
    async fn verify_transaction_receiver(&self, tx: &TypedTransaction, token_id: &str) -> SwapResult<()> {
        let receiver = tx_receiver(tx).ok_or(SwapError::WrongRawTx)?;
        if receiver == Address::ZERO {
            return Err(SwapError::WrongRawTx);
        }
        let registry = self.registry()?;
        let token = registry
            .multichain_token(token_id, self.chain_id_str())
            .await
            .ok_or(SwapError::MissTokenConfig)?;
        let token_cfg = self.token_config(&token).await.ok_or(SwapError::MissTokenConfig)?;
        let router = self
            .router_contract_of(&token_cfg)
            .await
            .ok_or(SwapError::MissRouterInfo)?;
        let router = Address::from_str(&router).map_err(|_| SwapError::MissRouterInfo)?;
        if receiver != router {
            error!(
                chain_id = %self.chain_id_str(),
                have = %receiver,
                want = %router,
                "[sign] tx receiver mismatch"
            );
            return Err(SwapError::WrongRawTx);
        }
        Ok(())
    }
}

#[async_trait]
impl MpcSignable for EvmBridge {
    async fn mpc_sign_transaction(&self, raw_tx: &RawTx, args: &BuildTxArgs) -> SwapResult<(SignedTx, String)> {
        let RawTx::Evm(tx) = raw_tx;
        self.verify_transaction_receiver(tx, args.token_id()).await?;

        let registry = self.registry()?;
        let pubkey = registry
            .mpc_public_key(&args.from)
            .await
            .ok_or(SwapError::MissMpcPublicKey)?;
        let sender = Address::from_str(&args.from).map_err(|_| SwapError::SenderMismatch)?;

        let msg_hash = signing_hash(tx)?;
        let context = serde_json::to_string(&args.extra)
            .map_err(|e| SwapError::ParseData(format!("encode sign context: {}", e)))?;
        let (key_id, rsv) = sign_one(
            self.ctx.signer.as_ref(),
            &pubkey,
            &format!("{:#x}", msg_hash),
            &context,
            self.ctx.sign_timeout,
            &args.swap.swap_id,
        )
        .await?;

        let (r, s, parity) = parse_rsv(&rsv).inspect_err(|e| {
            error!(key_id = %key_id, swap_id = %args.swap.swap_id, error = %e, "Wrong mpc signature");
        })?;
        let signature = recover_with_sender(&msg_hash, r, s, parity, &sender)?;
        let envelope = attach_signature(tx, signature)?;
        let tx_hash = format!("{:#x}", envelope.tx_hash());

        info!(
            chain_id = %self.chain_id_str(),
            key_id = %key_id,
            swap_id = %args.swap.swap_id,
            tx_hash = %tx_hash,
            nonce = ?args.extra.eth_extra.as_ref().and_then(|e| e.nonce),
            "MPC sign transaction success"
        );
        Ok((SignedTx::Evm(envelope), tx_hash))
    }

    fn verify_msg_hash(&self, raw_tx: &RawTx, msg_hashes: &[String]) -> SwapResult<()> {
        let RawTx::Evm(tx) = raw_tx;
        if msg_hashes.len() != 1 {
            return Err(SwapError::WrongCountOfMsgHashes);
        }
        let expected = signing_hash(tx)?;
        let given = B256::from_str(&msg_hashes[0]).map_err(|_| SwapError::MsgHashMismatch)?;
        if given != expected {
            return Err(SwapError::MsgHashMismatch);
        }
        Ok(())
    }
}
