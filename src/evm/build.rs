//! Swap-in transaction construction
//!
//! Guards first, then the router input, then gas and nonce defaults. Every default chosen is
//! written back into the build args so a retry of the same swap rebuilds the same transaction.

use super::contracts::Router;
use super::EvmBridge;
use crate::bridge::{ConfigHolder, NonceSetter, RawTx};
use crate::config::{DynamicFeeTxConfig, ExtraConfig, TokenConfig};
use crate::error::{SwapError, SwapResult};
use crate::registry::Registry;
use crate::tokens::{calc_swap_value, FeePolicy};
use crate::types::{BuildTxArgs, SwapType};
use alloy::consensus::{TxEip1559, TxLegacy, TypedTransaction};
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::sol_types::SolCall;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

/// Coin kept on the sender on top of value and fees (0.1 native)
const MIN_RESERVE_FEE: u128 = 100_000_000_000_000_000;

/// Allowed distance between consecutive built nonces of one sender
const NONCE_WINDOW: u64 = 1000;
/// Upper bound on the first nonce built for a sender
const MAX_FIRST_NONCE: u64 = 10_000_000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn add_percent(value: u128, percent: u64) -> u128 {
    value.saturating_mul(100 + u128::from(percent)) / 100
}

/// Zero `max` means uncapped
fn cap_percent(percent: u64, max: u64) -> u64 {
    if max > 0 && percent > max {
        max
    } else {
        percent
    }
}

/// `true` when `nonce` is implausibly far from the last one built for the sender
pub fn is_nonce_out_of_range(cached: u64, nonce: u64) -> bool {
    if cached > 0 {
        nonce > cached.saturating_add(NONCE_WINDOW) || nonce.saturating_add(NONCE_WINDOW) < cached
    } else {
        nonce > MAX_FIRST_NONCE
    }
}

impl EvmBridge {
    pub async fn build_router_swap_tx(&self, args: &mut BuildTxArgs) -> SwapResult<RawTx> {
        if args.swap.swap_type != SwapType::Erc20Swap {
            return Err(SwapError::SwapTypeNotSupported);
        }
        if args.swap.to_chain_id != self.chain_id_value() {
            return Err(SwapError::ToChainIdMismatch);
        }
        if args.input.is_some() {
            return Err(SwapError::WrongRawTx);
        }
        if args.from.is_empty() {
            return Err(SwapError::SenderMismatch);
        }

        let registry = self.registry()?;
        let chain_id = self.chain_id_str();
        if registry.is_chain_paused(chain_id).await {
            return Err(SwapError::PauseSwapInto);
        }
        let token_id = args.token_id().to_string();
        let multichain_token = registry
            .multichain_token(&token_id, chain_id)
            .await
            .ok_or(SwapError::MissTokenConfig)?;
        let dst_cfg = self
            .token_config(&multichain_token)
            .await
            .ok_or(SwapError::MissTokenConfig)?;
        if dst_cfg.is_pause_swap_into() {
            return Err(SwapError::PauseSwapInto);
        }
        let router = self
            .router_contract_of(&dst_cfg)
            .await
            .ok_or(SwapError::MissRouterInfo)?;
        let router_info = registry
            .router_info(&router, chain_id)
            .await
            .ok_or(SwapError::MissRouterInfo)?;
        if !args.from.eq_ignore_ascii_case(&router_info.router_mpc) {
            error!(
                chain_id = %chain_id,
                have = %args.from,
                want = %router_info.router_mpc,
                "Build tx mpc mismatch"
            );
            return Err(SwapError::SenderMismatch);
        }

        self.build_swap_in_input(args, &registry, &multichain_token, &dst_cfg, &router)
            .await?;
        self.set_defaults(args).await?;
        self.build_tx(args).await
    }

    // ========================================================================
    // Input
    // ========================================================================

    async fn build_swap_in_input(
        &self,
        args: &mut BuildTxArgs,
        registry: &Arc<Registry>,
        multichain_token: &str,
        dst_cfg: &TokenConfig,
        router: &str,
    ) -> SwapResult<()> {
        let receiver = match Address::from_str(&args.swap.bind) {
            Ok(receiver) if receiver != Address::ZERO => receiver,
            _ => {
                warn!(chain_id = %self.chain_id_str(), bind = %args.swap.bind, "Swap in to wrong receiver");
                return Err(SwapError::WrongBindAddress);
            }
        };

        let from_chain_id = args.swap.from_chain_id.to_string();
        let erc20 = args.swap.swap_info.erc20().cloned().unwrap_or_default();
        let from_bridge = registry
            .get_bridge(&from_chain_id)
            .await
            .ok_or(SwapError::NoBridgeForChainId)?;
        let src_cfg = from_bridge
            .token_config(&erc20.token)
            .await
            .ok_or(SwapError::MissTokenConfig)?;
        let token_id = args.token_id().to_string();
        let swap_cfg = registry
            .swap_config(&token_id, &from_chain_id, self.chain_id_str())
            .await
            .ok_or(SwapError::MissTokenConfig)?;

        let extra = registry.extra().await;
        let policy = FeePolicy {
            whitelisted: extra.is_in_big_value_whitelist(&token_id, &args.origin_from)
                || extra.is_in_big_value_whitelist(&token_id, &args.origin_tx_to),
            base_fee_percent: extra.base_fee_percent(self.chain_id_str()),
        };
        let amount = calc_swap_value(
            &swap_cfg,
            args.origin_value,
            src_cfg.decimals,
            dst_cfg.decimals,
            &policy,
        );
        if amount.is_zero() {
            return Err(SwapError::TxWithWrongValue);
        }

        let txs = B256::from_str(&args.swap.swap_id)
            .map_err(|e| SwapError::ParseData(format!("swap id '{}': {}", args.swap.swap_id, e)))?;
        let token = Address::from_str(multichain_token)
            .map_err(|e| SwapError::ParseData(format!("token '{}': {}", multichain_token, e)))?;
        let from_chain = args.swap.from_chain_id.0;

        let input = if erc20.for_underlying {
            Router::anySwapInUnderlyingCall {
                txs,
                token,
                to: receiver,
                amount,
                fromChainID: from_chain,
            }
            .abi_encode()
        } else if dst_cfg.is_force_any_swap_in_auto() || dst_cfg.has_underlying() {
            Router::anySwapInAutoCall {
                txs,
                token,
                to: receiver,
                amount,
                fromChainID: from_chain,
            }
            .abi_encode()
        } else {
            Router::anySwapInCall {
                txs,
                token,
                to: receiver,
                amount,
                fromChainID: from_chain,
            }
            .abi_encode()
        };

        args.input = Some(Bytes::from(input));
        args.to = router.to_lowercase();
        args.swap_value = amount;
        Ok(())
    }

    // ========================================================================
    // Gas
    // ========================================================================

    async fn set_defaults(&self, args: &mut BuildTxArgs) -> SwapResult<()> {
        let extra = self.extra().await;
        let chain_id = self.chain_id_str();
        let replace_num = args.replace_num();
        let current = args.extra.eth_extra.clone().unwrap_or_default();

        if let Some(dynamic) = extra.dynamic_fee_tx(chain_id) {
            let tip = match current.gas_tip_cap {
                Some(tip) => tip,
                None => self.get_gas_tip_cap(dynamic, replace_num, &extra).await?,
            };
            let fee_cap = match current.gas_fee_cap {
                Some(fee_cap) => fee_cap,
                None => self.get_gas_fee_cap(dynamic, tip).await?,
            };
            let eth = args.eth_extra_mut();
            eth.gas_tip_cap = Some(tip);
            eth.gas_fee_cap = Some(fee_cap);
            eth.gas_price = None;
        } else if current.gas_price.is_none() {
            let price = self.get_gas_price(replace_num, &extra).await?;
            let eth = args.eth_extra_mut();
            eth.gas_price = Some(price);
            eth.gas_tip_cap = None;
            eth.gas_fee_cap = None;
        }

        if current.gas.is_none() {
            let input = args.input.clone().unwrap_or_default();
            let estimated = match self.estimate_gas(&args.from, &args.to, args.value, &input).await {
                Ok(gas) => gas,
                Err(e) => {
                    error!(
                        chain_id = %chain_id,
                        swap_id = %args.swap.swap_id,
                        from = %args.from,
                        to = %args.to,
                        error = %e,
                        "Build swap tx estimate gas failed"
                    );
                    return Err(SwapError::BuildTxErrorAndDelay(format!(
                        "{}: {}",
                        SwapError::EstimateGasFailed,
                        e
                    )));
                }
            };
            let gas = estimated
                .saturating_add(estimated * 30 / 100)
                .max(extra.default_gas_limit(chain_id));
            if let Some(max) = extra.max_gas_limit(chain_id) {
                if gas > max {
                    warn!(
                        chain_id = %chain_id,
                        swap_id = %args.swap.swap_id,
                        gas_limit = gas,
                        max_gas_limit = max,
                        "Build swap tx estimated gas is too large"
                    );
                    return Err(SwapError::BuildTxErrorAndDelay(format!(
                        "estimated gas {} is too large on chain {}",
                        gas, chain_id
                    )));
                }
            }
            args.eth_extra_mut().gas = Some(gas);
        }
        Ok(())
    }

    async fn get_gas_price(&self, replace_num: u64, extra: &ExtraConfig) -> SwapResult<u128> {
        let chain_id = self.chain_id_str();
        let max = extra.max_gas_price(chain_id);
        let fixed = extra.fixed_gas_price(chain_id);
        let price = match fixed {
            Some(fixed) if replace_num == 0 || max == Some(fixed) => return Ok(fixed),
            Some(fixed) => fixed,
            None => {
                self.ctx
                    .retry
                    .run("eth_gasPrice", || self.suggest_price())
                    .await?
            }
        };

        let plus = match fixed {
            Some(_) => 0,
            None => self
                .chain_config()
                .await
                .map(|cfg| cfg.plus_gas_price_percentage)
                .unwrap_or(0),
        };
        let (price, auto_max) = self.adjust_swap_gas_price(price, plus, replace_num, extra);

        match max {
            Some(max) if price > max => {
                warn!(chain_id = %chain_id, gas_price = price, max = max, "Gas price exceeded maximum limit");
                Err(SwapError::BuildTxErrorAndDelay(format!(
                    "gas price {} exceeded config maximum limit {}",
                    price, max
                )))
            }
            None if price > auto_max => {
                warn!(chain_id = %chain_id, gas_price = price, auto_max = auto_max, "Gas price exceeded auto maximum limit");
                Err(SwapError::BuildTxErrorAndDelay(format!(
                    "gas price {} exceeded auto maximum limit {}",
                    price, auto_max
                )))
            }
            _ => Ok(price),
        }
    }

    /// Apply plus and replace percentages, then move the auto ceiling
    ///
    /// The ceiling resets to ten times the new price when that is lower, otherwise it grows by a
    /// tenth, so a sudden jump above it is caught while gradual rises are followed.
    fn adjust_swap_gas_price(&self, price: u128, plus: u64, replace_num: u64, extra: &ExtraConfig) -> (u128, u128) {
        let percent = plus.saturating_add(replace_num.saturating_mul(extra.replace_plus_gas_price_percent));
        let price = add_percent(price, cap_percent(percent, extra.max_plus_gas_price_percentage));

        let ten_times = price.saturating_mul(10);
        let mut auto_max = lock(&self.auto_max_gas_price);
        let next = match *auto_max {
            Some(current) if current <= ten_times => current.saturating_add(current / 10),
            _ => ten_times,
        };
        *auto_max = Some(next);
        (price, next)
    }

    async fn get_gas_tip_cap(&self, dynamic: &DynamicFeeTxConfig, replace_num: u64, extra: &ExtraConfig) -> SwapResult<u128> {
        let tip = self
            .ctx
            .retry
            .run("eth_maxPriorityFeePerGas", || self.suggest_gas_tip_cap())
            .await?;
        let percent = dynamic
            .plus_gas_tip_cap_percent
            .saturating_add(replace_num.saturating_mul(extra.replace_plus_gas_price_percent));
        let tip = add_percent(tip, cap_percent(percent, extra.max_plus_gas_price_percentage));
        Ok(match dynamic.max_gas_tip_cap {
            Some(max) => tip.min(max),
            None => tip,
        })
    }

    async fn get_gas_fee_cap(&self, dynamic: &DynamicFeeTxConfig, tip: u128) -> SwapResult<u128> {
        let base_fee = self
            .ctx
            .retry
            .run("eth_getBlockByNumber", || self.get_base_fee())
            .await?;
        let fee_cap = add_percent(
            tip.saturating_add(base_fee.saturating_mul(2)),
            dynamic.plus_gas_fee_cap_percent,
        );
        Ok(match dynamic.max_gas_fee_cap {
            Some(max) => fee_cap.min(max),
            None => fee_cap,
        })
    }

    // ========================================================================
    // Balance and nonce
    // ========================================================================

    async fn check_coin_balance(&self, sender: &str, need: U256) -> SwapResult<()> {
        let address = Address::from_str(sender).map_err(|_| SwapError::SenderMismatch)?;
        let balance = self
            .ctx
            .retry
            .run("eth_getBalance", || self.get_balance(&address))
            .await?;
        if balance < need {
            warn!(
                chain_id = %self.chain_id_str(),
                sender = %sender,
                balance = %balance,
                need = %need,
                "Not enough coin balance"
            );
            return Err(SwapError::NotEnoughBalance(format!("{} < {}", balance, need)));
        }
        Ok(())
    }

    /// Local allocation on parallel chains, else the adjusted pool nonce
    async fn get_account_nonce(&self, from: &str, extra: &ExtraConfig) -> SwapResult<u64> {
        if extra.is_parallel_swap_enabled(self.chain_id_str()) {
            return Ok(self.nonces.allocate_nonce(from).await);
        }
        let pool = self.get_pool_nonce(from).await?;
        Ok(self.adjust_nonce(from, pool).await)
    }

    fn check_nonce_window(&self, from: &str, nonce: u64) -> SwapResult<()> {
        let key = format!("{}:{}", self.chain_id_str(), from.to_lowercase());
        let mut built = lock(&self.built_nonces);
        let cached = built.get(&key).copied().unwrap_or(0);
        if is_nonce_out_of_range(cached, nonce) {
            return Err(SwapError::NonceOutOfRange { cached, nonce });
        }
        built.insert(key, nonce);
        Ok(())
    }

    // ========================================================================
    // Transaction
    // ========================================================================

    async fn build_tx(&self, args: &mut BuildTxArgs) -> SwapResult<RawTx> {
        let extra = self.extra().await;
        let is_dynamic = extra.dynamic_fee_tx(self.chain_id_str()).is_some();
        let eth = args.extra.eth_extra.clone().unwrap_or_default();
        let gas_limit = eth
            .gas
            .ok_or_else(|| SwapError::BuildTxErrorAndDelay("missing gas limit".to_string()))?;
        let to = Address::from_str(&args.to).map_err(|_| SwapError::WrongRawTx)?;
        let input = args.input.clone().unwrap_or_default();

        let fee_per_gas = if is_dynamic {
            eth.gas_fee_cap.ok_or(SwapError::MissDynamicFeeConfig)?
        } else {
            eth.gas_price
                .ok_or_else(|| SwapError::BuildTxErrorAndDelay("missing gas price".to_string()))?
        };
        let gas_fee = U256::from(fee_per_gas).saturating_mul(U256::from(gas_limit));
        let need = args
            .value
            .saturating_add(U256::from(MIN_RESERVE_FEE))
            .saturating_add(gas_fee.saturating_mul(U256::from(5u64)));
        self.check_coin_balance(&args.from, need).await?;

        let chain_id = self
            .chain_id_value()
            .as_u64()
            .ok_or(SwapError::ToChainIdMismatch)?;

        // assigned last so a failed build above does not burn a nonce
        let (nonce, allocated) = match eth.nonce {
            Some(nonce) => (nonce, false),
            None => {
                let nonce = self.get_account_nonce(&args.from, &extra).await?;
                args.eth_extra_mut().nonce = Some(nonce);
                (nonce, extra.is_parallel_swap_enabled(self.chain_id_str()))
            }
        };
        if let Err(e) = self.check_nonce_window(&args.from, nonce) {
            if allocated {
                warn!(
                    chain_id = %self.chain_id_str(),
                    swap_id = %args.swap.swap_id,
                    from = %args.from,
                    nonce = nonce,
                    "Recycle nonce of failed build"
                );
                self.recycle_swap_nonce(&args.from, nonce);
                args.eth_extra_mut().nonce = None;
            }
            return Err(e);
        }
        let tx = if is_dynamic {
            TypedTransaction::Eip1559(TxEip1559 {
                chain_id,
                nonce,
                gas_limit,
                max_fee_per_gas: eth.gas_fee_cap.unwrap_or_default(),
                max_priority_fee_per_gas: eth.gas_tip_cap.unwrap_or_default(),
                to: TxKind::Call(to),
                value: args.value,
                access_list: Default::default(),
                input,
            })
        } else {
            TypedTransaction::Legacy(TxLegacy {
                chain_id: Some(chain_id),
                nonce,
                gas_price: eth.gas_price.unwrap_or_default(),
                gas_limit,
                to: TxKind::Call(to),
                value: args.value,
                input,
            })
        };

        info!(
            identifier = %args.swap.identifier,
            swap_id = %args.swap.swap_id,
            from_chain_id = %args.swap.from_chain_id,
            to_chain_id = %args.swap.to_chain_id,
            from = %args.from,
            to = %args.to,
            bind = %args.swap.bind,
            nonce = nonce,
            gas_limit = gas_limit,
            gas_price = ?eth.gas_price,
            gas_tip_cap = ?eth.gas_tip_cap,
            gas_fee_cap = ?eth.gas_fee_cap,
            replace_num = args.replace_num(),
            origin_value = %args.origin_value,
            swap_value = %args.swap_value,
            token_id = %args.token_id(),
            "Build erc20swap raw tx"
        );
        Ok(RawTx::Evm(tx))
    }
}
