//! Market engine
//!
//! `Market` owns the state, the clock and the three collaborators. Every
//! operation runs against a copy of the state (effects), swaps the copy in,
//! then executes the custody transfers (interactions). If a transfer fails
//! the completed ones are reversed and the old state is put back.

use std::sync::{Arc, Mutex, PoisonError};

use log::{error, info, warn};

use crate::auditor::AccountLiquidity;
use crate::config::{DampSpeed, LiquidationIncentive, MarketParams};
use crate::custody::{Custody, Transfer};
use crate::error::{MarketError, Result};
use crate::fixed::{BorrowAtMaturity, DepositAtMaturity, RepayAtMaturity, WithdrawAtMaturity};
use crate::floating::{FloatingBorrow, FloatingDeposit, FloatingRepay, FloatingWithdraw};
use crate::liquidation::{BadDebtClearing, Liquidation};
use crate::oracle::Oracle;
use crate::rate_model::RateModel;
use crate::state::{Env, MarketState};
use crate::types::{AccountId, Amount, AssetId, Fraction, Maturity, Timestamp};

pub struct Market<R, O, C> {
    state: MarketState,
    rates: R,
    oracle: O,
    custody: C,
    now: Timestamp,
}

impl<R: RateModel, O: Oracle, C: Custody> Market<R, O, C> {
    pub fn new(params: MarketParams, rates: R, oracle: O, custody: C, now: Timestamp) -> Result<Self> {
        let state = MarketState::new(params, now)?;
        info!("market for {} opened at {}", state.params.asset, now);
        Ok(Self {
            state,
            rates,
            oracle,
            custody,
            now,
        })
    }

    pub fn state(&self) -> &MarketState {
        &self.state
    }

    pub fn params(&self) -> &MarketParams {
        &self.state.params
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Move the clock to `now`; it never runs backwards
    pub fn set_time(&mut self, now: Timestamp) -> Result<()> {
        if now < self.now {
            return Err(MarketError::ClockRewind {
                current: self.now,
                requested: now,
            });
        }
        self.now = now;
        Ok(())
    }

    pub fn advance_time(&mut self, seconds: u64) {
        self.now = self.now.saturating_add(seconds);
    }

    pub fn rate_model(&self) -> &R {
        &self.rates
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    pub fn custody(&self) -> &C {
        &self.custody
    }

    pub fn custody_mut(&mut self) -> &mut C {
        &mut self.custody
    }

    // ========================================
    // Commit machinery
    // ========================================

    fn transact<T, F>(&mut self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut MarketState, &Env) -> Result<(T, Vec<Transfer>)>,
    {
        let mut next = self.state.clone();
        let (receipt, transfers) = {
            let env = Env {
                now: self.now,
                rates: &self.rates,
                oracle: &self.oracle,
            };
            f(&mut next, &env)?
        };

        let previous = std::mem::replace(&mut self.state, next);
        if let Err(err) = self.execute(&transfers) {
            self.state = previous;
            warn!("{} reverted at {}: {}", op, self.now, err);
            return Err(err);
        }
        Ok(receipt)
    }

    fn execute(&mut self, transfers: &[Transfer]) -> Result<()> {
        for (index, transfer) in transfers.iter().enumerate() {
            if let Err(err) = transfer.execute(&mut self.custody) {
                for done in transfers[..index].iter().rev() {
                    if let Err(undo) = done.reversed().execute(&mut self.custody) {
                        error!("failed to unwind {:?}: {}", done, undo);
                    }
                }
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Run `f` on a scratch copy and discard the result state
    fn dry_run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut MarketState, &Env) -> Result<T>,
    {
        let mut scratch = self.state.clone();
        let env = Env {
            now: self.now,
            rates: &self.rates,
            oracle: &self.oracle,
        };
        f(&mut scratch, &env)
    }

    // ========================================
    // Fixed operations
    // ========================================

    pub fn deposit_at_maturity(
        &mut self,
        maturity: Maturity,
        assets: Amount,
        min_assets_required: Amount,
        depositor: &AccountId,
        receiver: &AccountId,
    ) -> Result<DepositAtMaturity> {
        self.transact("deposit_at_maturity", |state, env| {
            state.deposit_at_maturity(env, maturity, assets, min_assets_required, depositor, receiver)
        })
    }

    pub fn borrow_at_maturity(
        &mut self,
        maturity: Maturity,
        assets: Amount,
        max_assets: Amount,
        borrower: &AccountId,
        receiver: &AccountId,
    ) -> Result<BorrowAtMaturity> {
        self.transact("borrow_at_maturity", |state, env| {
            state.borrow_at_maturity(env, maturity, assets, max_assets, borrower, receiver)
        })
    }

    pub fn repay_at_maturity(
        &mut self,
        maturity: Maturity,
        position_assets: Amount,
        max_assets: Amount,
        payer: &AccountId,
        borrower: &AccountId,
    ) -> Result<RepayAtMaturity> {
        self.transact("repay_at_maturity", |state, env| {
            state.repay_at_maturity(env, maturity, position_assets, max_assets, payer, borrower)
        })
    }

    pub fn withdraw_at_maturity(
        &mut self,
        maturity: Maturity,
        position_assets: Amount,
        min_assets_required: Amount,
        receiver: &AccountId,
        owner: &AccountId,
    ) -> Result<WithdrawAtMaturity> {
        self.transact("withdraw_at_maturity", |state, env| {
            state.withdraw_at_maturity(env, maturity, position_assets, min_assets_required, receiver, owner)
        })
    }

    // ========================================
    // Floating operations
    // ========================================

    pub fn deposit(&mut self, assets: Amount, depositor: &AccountId, receiver: &AccountId) -> Result<FloatingDeposit> {
        self.transact("deposit", |state, env| state.deposit(env, assets, depositor, receiver))
    }

    pub fn withdraw(&mut self, assets: Amount, receiver: &AccountId, owner: &AccountId) -> Result<FloatingWithdraw> {
        self.transact("withdraw", |state, env| state.withdraw(env, assets, receiver, owner))
    }

    pub fn borrow(&mut self, assets: Amount, borrower: &AccountId, receiver: &AccountId) -> Result<FloatingBorrow> {
        self.transact("borrow", |state, env| state.borrow(env, assets, borrower, receiver))
    }

    pub fn repay(&mut self, assets: Amount, payer: &AccountId, borrower: &AccountId) -> Result<FloatingRepay> {
        self.transact("repay", |state, env| state.repay(env, assets, payer, borrower))
    }

    pub fn deposit_collateral(&mut self, asset: &AssetId, amount: Amount, account: &AccountId) -> Result<()> {
        self.transact("deposit_collateral", |state, env| {
            Ok(((), state.deposit_collateral(env, asset, amount, account)?))
        })
    }

    pub fn withdraw_collateral(
        &mut self,
        asset: &AssetId,
        amount: Amount,
        account: &AccountId,
        receiver: &AccountId,
    ) -> Result<()> {
        self.transact("withdraw_collateral", |state, env| {
            Ok(((), state.withdraw_collateral(env, asset, amount, account, receiver)?))
        })
    }

    // ========================================
    // Liquidation
    // ========================================

    pub fn liquidate(
        &mut self,
        liquidator: &AccountId,
        borrower: &AccountId,
        max_assets: Amount,
        seize_asset: &AssetId,
    ) -> Result<Liquidation> {
        self.transact("liquidate", |state, env| {
            state.liquidate(env, liquidator, borrower, max_assets, seize_asset)
        })
    }

    /// Absorb a collateral-less borrower's debt with the accumulator
    pub fn clear_bad_debt(&mut self, borrower: &AccountId) -> Result<BadDebtClearing> {
        self.transact("clear_bad_debt", |state, env| {
            state.settle_shares(env)?;
            if state.has_collateral(borrower) {
                return Err(MarketError::InsufficientShortfall);
            }
            Ok((state.clear_bad_debt(env.now, borrower)?, Vec::new()))
        })
    }

    // ========================================
    // Admin
    // ========================================

    pub fn set_backup_fee_rate(&mut self, rate: Fraction) -> Result<()> {
        self.transact("set_backup_fee_rate", |state, _| Ok((state.set_backup_fee_rate(rate)?, Vec::new())))
    }

    pub fn set_penalty_rate(&mut self, rate: Fraction) -> Result<()> {
        self.transact("set_penalty_rate", |state, _| Ok((state.set_penalty_rate(rate)?, Vec::new())))
    }

    pub fn set_reserve_factor(&mut self, factor: Fraction) -> Result<()> {
        self.transact("set_reserve_factor", |state, _| Ok((state.set_reserve_factor(factor)?, Vec::new())))
    }

    pub fn set_smooth_factor(&mut self, factor: Fraction) -> Result<()> {
        self.transact("set_smooth_factor", |state, env| {
            Ok((state.set_smooth_factor(env, factor)?, Vec::new()))
        })
    }

    pub fn set_max_future_pools(&mut self, pools: u8) -> Result<()> {
        self.transact("set_max_future_pools", |state, env| {
            Ok((state.set_max_future_pools(env, pools)?, Vec::new()))
        })
    }

    pub fn set_damp_speeds(&mut self, assets: DampSpeed, utilization: DampSpeed) -> Result<()> {
        self.transact("set_damp_speeds", |state, env| {
            Ok((state.set_damp_speeds(env, assets, utilization)?, Vec::new()))
        })
    }

    pub fn set_treasury(&mut self, treasury: Option<AccountId>, fee_rate: Fraction) -> Result<()> {
        self.transact("set_treasury", |state, env| {
            Ok((state.set_treasury(env, treasury, fee_rate)?, Vec::new()))
        })
    }

    pub fn set_fixed_borrow_threshold(&mut self, threshold: Fraction, min_factor: Fraction) -> Result<()> {
        self.transact("set_fixed_borrow_threshold", |state, _| {
            Ok((state.set_fixed_borrow_threshold(threshold, min_factor)?, Vec::new()))
        })
    }

    pub fn set_liquidation_incentive(&mut self, incentive: LiquidationIncentive) -> Result<()> {
        self.transact("set_liquidation_incentive", |state, _| {
            Ok((state.set_liquidation_incentive(incentive)?, Vec::new()))
        })
    }

    // ========================================
    // Views
    // ========================================

    /// Position value at maturity for depositing `assets` now
    pub fn preview_deposit_at_maturity(&self, maturity: Maturity, assets: Amount) -> Result<Amount> {
        self.dry_run(|state, env| state.preview_deposit_at_maturity(env, maturity, assets))
    }

    /// Amount owed at maturity for borrowing `assets` now
    pub fn preview_borrow_at_maturity(&self, maturity: Maturity, assets: Amount) -> Result<Amount> {
        self.dry_run(|state, env| state.preview_borrow_at_maturity(env, maturity, assets))
    }

    /// Assets `borrower` would pay to cover `position_assets` now
    pub fn preview_repay_at_maturity(
        &self,
        maturity: Maturity,
        position_assets: Amount,
        borrower: &AccountId,
    ) -> Result<Amount> {
        self.dry_run(|state, env| {
            state
                .repay_at_maturity(env, maturity, position_assets, Amount::MAX, borrower, borrower)
                .map(|(receipt, _)| receipt.actual_repay)
        })
    }

    /// Assets `owner` would receive for `position_assets` now
    pub fn preview_withdraw_at_maturity(
        &self,
        maturity: Maturity,
        position_assets: Amount,
        owner: &AccountId,
    ) -> Result<Amount> {
        self.dry_run(|state, env| {
            state
                .withdraw_at_maturity(env, maturity, position_assets, 0, owner, owner)
                .map(|(receipt, _)| receipt.assets_discounted)
        })
    }

    /// Backup assets including pending interest, pool earnings and
    /// accumulator release
    pub fn total_assets(&self) -> Result<Amount> {
        self.dry_run(|state, env| {
            state.settle_shares(env)?;
            Ok(state.backup.assets)
        })
    }

    /// Backup-pool assets redeemable by `account` now
    pub fn floating_assets_of(&self, account: &AccountId) -> Result<Amount> {
        self.dry_run(|state, env| {
            state.settle_shares(env)?;
            state.backup.assets_of(account)
        })
    }

    pub fn account_liquidity(&self, account: &AccountId) -> Result<AccountLiquidity> {
        self.dry_run(|state, env| {
            state.settle_floating(env)?;
            state.account_liquidity(account, env.now, env.oracle)
        })
    }

    /// Total debt of `account`, penalties and floating interest included
    pub fn debt_of(&self, account: &AccountId) -> Result<Amount> {
        self.dry_run(|state, env| {
            state.settle_floating(env)?;
            state.debt_of(account, env.now)
        })
    }
}

/// Thread-safe handle: one coarse lock, one transition at a time
pub struct SharedMarket<R, O, C> {
    inner: Arc<Mutex<Market<R, O, C>>>,
}

impl<R, O, C> Clone for SharedMarket<R, O, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RateModel, O: Oracle, C: Custody> SharedMarket<R, O, C> {
    pub fn new(market: Market<R, O, C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(market)),
        }
    }

    /// Run `f` with exclusive access to the market.
    ///
    /// A panic inside a previous holder cannot leave a half-applied state
    /// behind: state is only replaced after a transition succeeds.
    pub fn with<T>(&self, f: impl FnOnce(&mut Market<R, O, C>) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
