//! Local-key stand-in for the MPC cluster

use crate::mpc::MpcSigner;
use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use eyre::{eyre, Result};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Signs with one in-process secp256k1 key, answering as the MPC cluster would
#[derive(Debug)]
pub struct LocalMpcSigner {
    signer: PrivateKeySigner,
    rounds: AtomicUsize,
    /// Extra copies of the signature, to exercise the one-rsv rule
    duplicate_rsv: bool,
}

impl LocalMpcSigner {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self {
            signer,
            rounds: AtomicUsize::new(0),
            duplicate_rsv: false,
        }
    }

    pub fn random() -> Self {
        Self::new(PrivateKeySigner::random())
    }

    pub fn from_private_key(private_key: &str) -> Result<Self> {
        Ok(Self::new(private_key.parse()?))
    }

    /// Answer every round with two rsv values
    pub fn with_duplicate_rsv(mut self) -> Self {
        self.duplicate_rsv = true;
        self
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Uncompressed `0x04`-prefixed public key, hex without `0x`
    pub fn pubkey_hex(&self) -> String {
        let point = self.signer.credential().verifying_key().to_encoded_point(false);
        hex::encode(point.as_bytes())
    }

    /// Signing rounds served so far
    pub fn rounds(&self) -> usize {
        self.rounds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MpcSigner for LocalMpcSigner {
    async fn do_sign_one_ec(&self, pubkey: &str, msg_hash: &str, _context: &str) -> Result<(String, Vec<String>)> {
        if !pubkey.trim_start_matches("0x").eq_ignore_ascii_case(&self.pubkey_hex()) {
            return Err(eyre!("unknown public key {}", pubkey));
        }
        let hash = B256::from_str(msg_hash).map_err(|e| eyre!("bad msg hash {}: {}", msg_hash, e))?;
        let signature = self.signer.sign_hash_sync(&hash)?;
        // r || s || v with v as 0/1
        let mut rsv = signature.as_bytes().to_vec();
        rsv[64] = u8::from(signature.v());
        let rsv = hex::encode(rsv);

        let round = self.rounds.fetch_add(1, Ordering::SeqCst);
        let key_id = format!("local-{}", round);
        let mut rsvs = vec![rsv.clone()];
        if self.duplicate_rsv {
            rsvs.push(rsv);
        }
        Ok((key_id, rsvs))
    }
}
