//! Swap-out verification
//!
//! Receipt → caller allowlist → log parse → swapout-id → underlying received → balance delta →
//! cross-chain resolution → forbid/permit policy. Everything up to the log parse describes
//! whether a log is a swap-out at all; the later steps are safety checks whose failures are
//! never downgraded.

use super::client::{block_tag, RpcLog, RpcReceipt};
use super::contracts::{transfer_topic, AnyToken, Router, RouterV6, RouterV6String, RouterV7, SwapoutEvent};
use super::EvmBridge;
use crate::bridge::ConfigHolder;
use crate::config::{ExtraConfig, TokenConfig};
use crate::error::{ErrorClass, SwapError, SwapResult};
use crate::tokens::{check_token_swap_value, FeePolicy};
use crate::types::{lower_hex, ChainId, SwapTxInfo, SwapType, VerifyArgs};
use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A transfer must cover this share of the claimed value (fee-on-transfer slack)
const MIN_RECEIVED_PERCENT: u64 = 80;

const V6_DATA_LEN: usize = 96;

/// Fields decoded from a router swap-out event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapoutLog {
    pub event: SwapoutEvent,
    pub token: Address,
    pub from: Address,
    pub bind: String,
    pub value: U256,
    pub from_chain_id: ChainId,
    pub to_chain_id: ChainId,
    pub swapout_id: Option<B256>,
}

fn parse_error(event: SwapoutEvent, e: impl std::fmt::Display) -> SwapError {
    SwapError::ParseData(format!("{:?} LogAnySwapOut: {}", event, e))
}

/// Decode a swap-out log whose `topics[0]` already identified `event`
///
/// v7 events carry no source chain id; it is `this_chain`.
pub fn decode_swapout(event: SwapoutEvent, log: &RpcLog, this_chain: ChainId) -> SwapResult<SwapoutLog> {
    let topics = log.topics.iter().copied();
    match event {
        SwapoutEvent::V6 => {
            if log.topics.len() != 4 {
                return Err(SwapError::TxWithWrongTopics);
            }
            if log.data.len() != V6_DATA_LEN {
                return Err(parse_error(
                    event,
                    format!("data length {} != {}", log.data.len(), V6_DATA_LEN),
                ));
            }
            let ev = RouterV6::LogAnySwapOut::decode_raw_log(topics, &log.data, true)
                .map_err(|e| parse_error(event, e))?;
            Ok(SwapoutLog {
                event,
                token: ev.token,
                from: ev.from,
                bind: lower_hex(&ev.to),
                value: ev.amount,
                from_chain_id: ChainId::from(ev.fromChainID),
                to_chain_id: ChainId::from(ev.toChainID),
                swapout_id: None,
            })
        }
        SwapoutEvent::V6String => {
            if log.topics.len() != 3 {
                return Err(SwapError::TxWithWrongTopics);
            }
            let ev = RouterV6String::LogAnySwapOut::decode_raw_log(topics, &log.data, true)
                .map_err(|e| parse_error(event, e))?;
            Ok(SwapoutLog {
                event,
                token: ev.token,
                from: ev.from,
                bind: ev.to,
                value: ev.amount,
                from_chain_id: ChainId::from(ev.fromChainID),
                to_chain_id: ChainId::from(ev.toChainID),
                swapout_id: None,
            })
        }
        SwapoutEvent::V7 => {
            if log.topics.len() != 4 {
                return Err(SwapError::TxWithWrongTopics);
            }
            let ev = RouterV7::LogAnySwapOut::decode_raw_log(topics, &log.data, true)
                .map_err(|e| parse_error(event, e))?;
            Ok(SwapoutLog {
                event,
                token: ev.token,
                from: ev.from,
                bind: ev.receiver,
                value: ev.amount,
                from_chain_id: this_chain,
                to_chain_id: ChainId::from(ev.toChainID),
                swapout_id: Some(ev.swapoutID),
            })
        }
    }
}

// ============================================================================
// Transfer log helpers
// ============================================================================

/// `(from, to, amount)` of an ERC20 `Transfer` log
fn parse_transfer(log: &RpcLog) -> Option<(Address, Address, U256)> {
    if log.topics.len() != 3 || log.topics[0] != transfer_topic() || log.data.len() != 32 {
        return None;
    }
    Some((
        Address::from_word(log.topics[1]),
        Address::from_word(log.topics[2]),
        U256::from_be_slice(&log.data),
    ))
}

fn covers(amount: U256, value: U256) -> bool {
    amount.saturating_mul(U256::from(100u64)) >= value.saturating_mul(U256::from(MIN_RECEIVED_PERCENT))
}

/// Walk logs backwards from the swap-out looking for what paid for it
///
/// Passes on an underlying transfer from the swapper into the wrapping token, or a burn of the
/// wrapping token by the swapper, covering at least 80% of `value`. The scan stops at the
/// previous router log and at a mint of the wrapping token (previous hop).
pub fn find_underlying_received(
    logs: &[RpcLog],
    log_index: usize,
    routers: &[Address],
    token: Address,
    underlying: Address,
    swapper: Address,
    value: U256,
) -> bool {
    let end = log_index.min(logs.len());
    for log in logs[..end].iter().rev() {
        if routers.contains(&log.address) {
            break;
        }
        let Some((from, to, amount)) = parse_transfer(log) else {
            continue;
        };
        if log.address == token && from == Address::ZERO {
            break;
        }
        if !covers(amount, value) {
            continue;
        }
        if log.address == underlying && from == swapper && to == token {
            return true;
        }
        if log.address == token && from == swapper && to == Address::ZERO {
            return true;
        }
    }
    false
}

/// Net amount of `asset` moved into (`incoming`) or out of `account` by the receipt's transfers
pub fn sum_transfer_logs(logs: &[RpcLog], asset: Address, account: Address, incoming: bool) -> U256 {
    logs.iter()
        .filter(|log| log.address == asset)
        .filter_map(parse_transfer)
        .filter(|(from, to, _)| if incoming { *to == account } else { *from == account })
        .fold(U256::ZERO, |sum, (_, _, amount)| sum.saturating_add(amount))
}

impl EvmBridge {
    // ========================================================================
    // Entry point
    // ========================================================================

    pub async fn verify_router_swap_tx(&self, tx_hash: &str, args: &VerifyArgs) -> SwapResult<SwapTxInfo> {
        if args.swap_type != SwapType::Erc20Swap {
            return Err(SwapError::SwapTypeNotSupported);
        }
        let mut info = SwapTxInfo::new(args.swap_type, tx_hash, args.log_index);
        info.from_chain_id = self.chain_id_value();

        let result = async {
            let receipt = self
                .get_swap_receipt(&mut info, args.allow_unstable, args.allow_before_initial_height)
                .await?;
            self.verify_swap_log(&mut info, &receipt, args.log_index).await
        }
        .await;

        match result {
            Ok(()) => {
                if !args.allow_unstable {
                    info!(
                        chain_id = %self.chain_id_str(),
                        tx_hash = %info.hash,
                        log_index = info.log_index,
                        height = info.height,
                        from = %info.from,
                        bind = %info.bind,
                        value = %info.value,
                        to_chain_id = %info.to_chain_id,
                        token_id = %info.token_id(),
                        "Verify router swap tx stable pass"
                    );
                }
                Ok(info)
            }
            Err(e) => {
                self.log_verify_error(&info, &e);
                Err(e)
            }
        }
    }

    pub(crate) fn log_verify_error(&self, info: &SwapTxInfo, e: &SwapError) {
        if e.class() == ErrorClass::HardVerify {
            error!(
                chain_id = %self.chain_id_str(),
                tx_hash = %info.hash,
                log_index = info.log_index,
                error = %e,
                "Verify router swap tx failed"
            );
        } else {
            debug!(
                chain_id = %self.chain_id_str(),
                tx_hash = %info.hash,
                log_index = info.log_index,
                error = %e,
                "Verify router swap tx failed"
            );
        }
    }

    // ========================================================================
    // Receipt
    // ========================================================================

    /// Fetch the receipt and run every tx-level check
    pub(crate) async fn get_swap_receipt(
        &self,
        info: &mut SwapTxInfo,
        allow_unstable: bool,
        allow_before_initial_height: bool,
    ) -> SwapResult<RpcReceipt> {
        let receipt = match self.get_transaction_receipt(&info.hash).await {
            Ok(receipt) => receipt,
            Err(e) if e.is(&SwapError::NotFound) || e.is(&SwapError::TxNotFound) => {
                debug!(chain_id = %self.chain_id_str(), tx_hash = %info.hash, error = %e, "Tx receipt not found");
                return Err(SwapError::TxNotFound);
            }
            Err(e) => {
                debug!(chain_id = %self.chain_id_str(), tx_hash = %info.hash, error = %e, "Get tx receipt failed");
                return Err(e);
            }
        };
        let height = receipt.block_height();
        if height == 0 {
            return Err(SwapError::TxNotFound);
        }

        let chain_cfg = self.chain_config().await.ok_or(SwapError::NoBridgeForChainId)?;
        if height < chain_cfg.initial_height {
            if !allow_before_initial_height {
                return Err(SwapError::TxBeforeInitialHeight);
            }
            warn!(
                chain_id = %self.chain_id_str(),
                tx_hash = %info.hash,
                height = height,
                initial_height = chain_cfg.initial_height,
                "Accept tx before initial height"
            );
        }
        info.height = height;
        info.timestamp = match self.get_block_by_number(Some(height)).await {
            Ok(block) => block.timestamp.to::<u64>(),
            Err(_) => 0,
        };

        if !allow_unstable {
            let latest = self.latest_block_number().await?;
            let confirmations = latest.saturating_sub(height);
            if confirmations < chain_cfg.confirmations {
                return Err(SwapError::TxNotStable);
            }
        }

        if !receipt.is_status_ok() {
            return Err(SwapError::TxWithWrongReceipt);
        }

        let extra = self.extra().await;
        if receipt.to.is_none() && !extra.allow_call_by_constructor {
            return Err(SwapError::TxWithWrongContract);
        }
        info.tx_to = receipt.to.map(|to| lower_hex(&to)).unwrap_or_default();
        info.from = lower_hex(&receipt.from);

        if let Some(to) = receipt.to {
            self.check_call_by_contract(&to, &extra).await?;
        }
        Ok(receipt)
    }

    /// Direct recipient must be a router unless allowlisted
    async fn check_call_by_contract(&self, tx_to: &Address, extra: &ExtraConfig) -> SwapResult<()> {
        if extra.allow_call_by_contract || self.router_contracts().await.contains(tx_to) {
            return Ok(());
        }
        let chain_id = self.chain_id_str();
        if extra.is_in_call_by_contract_whitelist(chain_id, &lower_hex(tx_to)) {
            return Ok(());
        }
        if extra.check_eip1167_master {
            let master = self.get_eip1167_master(tx_to).await;
            if master != Address::ZERO
                && extra.is_in_call_by_contract_whitelist(chain_id, &lower_hex(&master))
            {
                return Ok(());
            }
        }
        let has_code_hashes = extra
            .call_by_contract_code_hash_whitelist
            .get(chain_id)
            .is_some_and(|list| !list.is_empty());
        if has_code_hashes {
            let code_hash = self.get_contract_code_hash(tx_to).await;
            if code_hash != B256::ZERO
                && extra.is_in_call_by_contract_code_hash_whitelist(chain_id, &format!("{:#x}", code_hash))
            {
                return Ok(());
            }
        }
        debug!(chain_id = %chain_id, tx_to = %tx_to, "Tx to is not an allowed caller");
        Err(SwapError::TxWithWrongContract)
    }

    // ========================================================================
    // Log
    // ========================================================================

    /// Verify the swap-out at `log_index` of an already checked receipt
    pub(crate) async fn verify_swap_log(
        &self,
        info: &mut SwapTxInfo,
        receipt: &RpcReceipt,
        log_index: usize,
    ) -> SwapResult<()> {
        let log = receipt
            .logs
            .get(log_index)
            .ok_or(SwapError::LogIndexOutOfRange)?;
        let (parsed, token_cfg) = self.parse_swapout_log(info, log).await?;
        let extra = self.extra().await;

        self.check_swapout_id(&parsed, log, &extra).await?;
        if token_cfg.has_underlying() {
            let routers = self.router_contracts().await;
            let received = find_underlying_received(
                &receipt.logs,
                log_index,
                &routers,
                parsed.token,
                token_cfg.underlying(),
                parsed.from,
                parsed.value,
            );
            if !received {
                return Err(SwapError::VerifyTxUnsafe);
            }
        }
        if extra.is_check_token_balance_enabled(self.chain_id_str()) {
            self.check_token_balance_delta(&parsed, &token_cfg, receipt, info.height)
                .await?;
        }
        self.check_swap_info(info, &token_cfg).await?;
        self.check_swapout_policy(info, &extra).await
    }

    async fn parse_swapout_log(
        &self,
        info: &mut SwapTxInfo,
        log: &RpcLog,
    ) -> SwapResult<(SwapoutLog, Arc<TokenConfig>)> {
        if !self.router_contracts().await.contains(&log.address) {
            return Err(SwapError::TxWithWrongContract);
        }
        let event = log
            .topics
            .first()
            .and_then(SwapoutEvent::from_topic)
            .ok_or(SwapError::SwapoutLogNotFound)?;
        let parsed = decode_swapout(event, log, self.chain_id_value())?;

        let token = lower_hex(&parsed.token);
        info.to = lower_hex(&log.address);
        info.from = lower_hex(&parsed.from);
        info.bind = parsed.bind.clone();
        info.value = parsed.value;
        info.from_chain_id = parsed.from_chain_id;
        info.to_chain_id = parsed.to_chain_id;
        if let Some(erc20) = info.swap_info.erc20_mut() {
            erc20.token = token.clone();
            erc20.swapout_id = parsed.swapout_id.map(|id| format!("{:#x}", id));
        }

        if log.is_removed() {
            return Err(SwapError::TxWithRemovedLog);
        }

        let token_cfg = self
            .token_config(&token)
            .await
            .ok_or(SwapError::MissTokenConfig)?;
        if let Some(erc20) = info.swap_info.erc20_mut() {
            erc20.token_id = token_cfg.token_id.clone();
        }
        let router = self.router_contract_of(&token_cfg).await.unwrap_or_default();
        if !router.eq_ignore_ascii_case(&info.to) {
            return Err(SwapError::TxWithWrongContract);
        }
        Ok((parsed, token_cfg))
    }

    // ========================================================================
    // Safety checks
    // ========================================================================

    async fn check_swapout_id(&self, parsed: &SwapoutLog, log: &RpcLog, extra: &ExtraConfig) -> SwapResult<()> {
        let Some(swapout_id) = parsed.swapout_id else {
            return Ok(());
        };
        if !extra.is_check_swapout_id_enabled(self.chain_id_str()) {
            return Ok(());
        }
        let call = Router::isSwapoutIDExistCall {
            swapoutID: swapout_id,
        };
        let exists = self.call_contract(&log.address, &call, "latest").await?._0;
        if !exists {
            return Err(SwapError::SwapoutIdNotExist);
        }
        Ok(())
    }

    async fn balance_at(&self, asset: &Address, account: Address, block: &str) -> SwapResult<U256> {
        let call = AnyToken::balanceOfCall { account };
        Ok(self.call_contract(asset, &call, block).await?._0)
    }

    /// Re-derive the 80% guarantee from balances at `height - 1` and `height`
    ///
    /// Underlying tokens: the wrapping token's underlying balance grows. Otherwise the swapper's
    /// token balance shrinks. Falls back to the receipt's transfer logs when historical state is
    /// unavailable.
    async fn check_token_balance_delta(
        &self,
        parsed: &SwapoutLog,
        token_cfg: &TokenConfig,
        receipt: &RpcReceipt,
        height: u64,
    ) -> SwapResult<()> {
        let (asset, account, incoming) = if token_cfg.has_underlying() {
            (token_cfg.underlying(), parsed.token, true)
        } else {
            (parsed.token, parsed.from, false)
        };
        let before_tag = block_tag(height.saturating_sub(1));
        let after_tag = block_tag(height);
        let (before, after) = tokio::join!(
            self.balance_at(&asset, account, &before_tag),
            self.balance_at(&asset, account, &after_tag)
        );
        let delta = match (before, after) {
            (Ok(before), Ok(after)) if incoming => after.saturating_sub(before),
            (Ok(before), Ok(after)) => before.saturating_sub(after),
            (Err(e), _) | (_, Err(e)) => {
                debug!(
                    chain_id = %self.chain_id_str(),
                    asset = %asset,
                    account = %account,
                    error = %e,
                    "Historical balance unavailable, sum transfer logs"
                );
                sum_transfer_logs(&receipt.logs, asset, account, incoming)
            }
        };
        if !covers(delta, parsed.value) {
            warn!(
                chain_id = %self.chain_id_str(),
                asset = %asset,
                account = %account,
                delta = %delta,
                value = %parsed.value,
                "Token balance delta below swap value"
            );
            return Err(SwapError::VerifyTxUnsafe);
        }
        Ok(())
    }

    /// Resolve the destination side and recheck the value with both decimals
    async fn check_swap_info(&self, info: &SwapTxInfo, src_cfg: &TokenConfig) -> SwapResult<()> {
        if info.from_chain_id != self.chain_id_value() {
            return Err(SwapError::FromChainIdMismatch);
        }
        if info.to_chain_id == info.from_chain_id {
            return Err(SwapError::SameFromAndToChainId);
        }
        let registry = self.registry()?;
        let from_chain_id = info.from_chain_id.to_string();
        let to_chain_id = info.to_chain_id.to_string();
        let token_id = info.token_id();

        if registry
            .is_swap_in_black_list(&from_chain_id, &to_chain_id, token_id)
            .await
        {
            return Err(SwapError::SwapInBlacklist);
        }
        let dst_bridge = registry
            .get_bridge(&to_chain_id)
            .await
            .ok_or(SwapError::NoBridgeForChainId)?;
        let dst_token = registry
            .multichain_token(token_id, &to_chain_id)
            .await
            .ok_or(SwapError::MissTokenConfig)?;
        let dst_cfg = dst_bridge
            .token_config(&dst_token)
            .await
            .ok_or(SwapError::MissTokenConfig)?;
        if dst_cfg.is_pause_swap_into() {
            return Err(SwapError::PauseSwapInto);
        }
        if !dst_bridge.is_valid_address(&info.bind) {
            return Err(SwapError::WrongBindAddress);
        }

        let swap_cfg = registry
            .swap_config(token_id, &from_chain_id, &to_chain_id)
            .await
            .ok_or(SwapError::MissTokenConfig)?;
        let extra = registry.extra().await;
        let policy = FeePolicy {
            whitelisted: extra.is_in_big_value_whitelist(token_id, &info.from)
                || extra.is_in_big_value_whitelist(token_id, &info.tx_to),
            base_fee_percent: extra.base_fee_percent(&to_chain_id),
        };
        if !check_token_swap_value(&swap_cfg, info.value, src_cfg.decimals, dst_cfg.decimals, &policy) {
            return Err(SwapError::TxWithWrongValue);
        }
        Ok(())
    }

    /// Per-token swapout forbid list and the permit swap-out ban
    async fn check_swapout_policy(&self, info: &SwapTxInfo, extra: &ExtraConfig) -> SwapResult<()> {
        if extra.is_swapout_forbidden(info.token_id(), &info.from_chain_id.to_string()) {
            return Err(SwapError::SwapoutForbidden);
        }
        if extra.forbid_permit_swapout {
            let tx = self.get_transaction_by_hash(&info.hash).await?;
            let selector = tx.input.get(..4).unwrap_or_default();
            if selector == Router::anySwapOutUnderlyingWithPermitCall::SELECTOR
                || selector == Router::anySwapOutUnderlyingWithTransferPermitCall::SELECTOR
            {
                return Err(SwapError::SwapoutForbidden);
            }
        }
        Ok(())
    }
}
