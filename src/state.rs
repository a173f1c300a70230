//! Market state and the steps shared by every transition
//!
//! `MarketState` is plain data: cloning it snapshots the whole market. The
//! engine runs each operation against a clone and swaps it in on success.

use std::collections::BTreeMap;

use fixed_model::{
    add, mul_div_up, mul_wad_down, mul_wad_up, pool_state, sub, Accrual, FixedPool, PoolState, WAD,
};
use log::{debug, warn};
use serde::Serialize;

use crate::accumulator::EarningsAccumulator;
use crate::auditor::{AccountLiquidity, CollateralBook};
use crate::backup::{BackupPool, DebtAccrual};
use crate::config::{validate_adjust_factor, MarketParams};
use crate::error::{MarketError, Result};
use crate::oracle::Oracle;
use crate::positions::PositionLedger;
use crate::rate_model::{RateModel, UtilizationState};
use crate::types::{AccountId, Amount, AssetId, Fraction, Maturity, Side, Timestamp};

/// Collaborators visible to a transition
pub struct Env<'a> {
    pub now: Timestamp,
    pub rates: &'a dyn RateModel,
    pub oracle: &'a dyn Oracle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketState {
    pub params: MarketParams,
    pub pools: BTreeMap<Maturity, FixedPool>,
    pub positions: PositionLedger,
    pub backup: BackupPool,
    pub accumulator: EarningsAccumulator,
    pub collateral: CollateralBook,
}

/// Collateral factor of `asset`, rejected unless in `(0, 1]`
pub(crate) fn adjust_factor(oracle: &dyn Oracle, asset: &AssetId) -> Result<Fraction> {
    let factor = oracle.collateral_factor(asset)?;
    validate_adjust_factor(factor)?;
    Ok(factor)
}

impl MarketState {
    pub fn new(params: MarketParams, now: Timestamp) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            pools: BTreeMap::new(),
            positions: PositionLedger::new(),
            backup: BackupPool::new(now),
            accumulator: EarningsAccumulator::new(now),
            collateral: CollateralBook::default(),
        })
    }

    /// Pool at `maturity`, empty if never used
    pub fn pool(&self, maturity: Maturity) -> FixedPool {
        self.pools.get(&maturity).copied().unwrap_or_default()
    }

    pub fn check_pool_state(
        &self,
        maturity: Maturity,
        now: Timestamp,
        accepted: &[PoolState],
    ) -> Result<PoolState> {
        let observed = pool_state(maturity, now, self.params.max_future_pools);
        if !accepted.contains(&observed) {
            return Err(MarketError::UnmatchedPoolState {
                maturity,
                observed,
                accepted: accepted.to_vec(),
            });
        }
        Ok(observed)
    }

    // ========================================
    // Accrual
    // ========================================

    /// Run the accrual step of one pool and route its output
    pub(crate) fn accrue_pool(&mut self, maturity: Maturity, now: Timestamp) -> Result<Accrual> {
        let pool = self.pools.entry(maturity).or_default();
        let accrual = pool.accrue_earnings(maturity, now)?;
        if accrual.earnings > 0 {
            self.backup.assets = add(self.backup.assets, accrual.earnings)?;
            debug!("maturity {}: accrued {} to backup", maturity, accrual.earnings);
        }
        if accrual.stale > 0 {
            self.accumulator.collect(accrual.stale)?;
            warn!(
                "maturity {}: swept {} stale unassigned earnings to the accumulator",
                maturity, accrual.stale
            );
        }
        Ok(accrual)
    }

    /// Accrue every pool still holding unassigned earnings
    pub(crate) fn accrue_all_pools(&mut self, now: Timestamp) -> Result<Amount> {
        let pending: Vec<Maturity> = self
            .pools
            .iter()
            .filter(|(_, pool)| pool.unassigned_earnings > 0)
            .map(|(maturity, _)| *maturity)
            .collect();
        let mut earnings = 0;
        for maturity in pending {
            earnings = add(earnings, self.accrue_pool(maturity, now)?.earnings)?;
        }
        Ok(earnings)
    }

    /// Give a pool's unassigned earnings to the backup pool once nothing is
    /// borrowed against it any more
    pub(crate) fn sweep_if_unborrowed(&mut self, maturity: Maturity) -> Result<Amount> {
        let Some(pool) = self.pools.get_mut(&maturity) else {
            return Ok(0);
        };
        if pool.borrowed > 0 || pool.unassigned_earnings == 0 {
            return Ok(0);
        }
        let swept = pool.unassigned_earnings;
        pool.unassigned_earnings = 0;
        self.backup.assets = add(self.backup.assets, swept)?;
        debug!("maturity {}: borrowed side cleared, {} unassigned to backup", maturity, swept);
        Ok(swept)
    }

    /// Damp averages, then accrue floating debt and pay its treasury fee
    pub(crate) fn settle_floating(&mut self, env: &Env) -> Result<DebtAccrual> {
        self.backup.update_averages(env.now, &self.params)?;
        let accrual = self
            .backup
            .accrue_debt(env.now, env.rates, self.params.treasury_fee_rate)?;
        self.deposit_to_treasury(accrual.treasury_fee)?;
        Ok(accrual)
    }

    /// Move the released part of the accumulator into backup assets
    pub(crate) fn release_accumulator(&mut self, now: Timestamp) -> Result<Amount> {
        let released = self.accumulator.release(
            now,
            self.params.smooth_factor,
            self.params.max_future_pools,
        )?;
        self.backup.assets = add(self.backup.assets, released)?;
        if released > 0 {
            debug!("accumulator released {}", released);
        }
        Ok(released)
    }

    /// Floating debt, pending pool earnings and accumulator release
    pub(crate) fn settle_shares(&mut self, env: &Env) -> Result<()> {
        self.settle_floating(env)?;
        self.accrue_all_pools(env.now)?;
        self.release_accumulator(env.now)?;
        Ok(())
    }

    // ========================================
    // Treasury
    // ========================================

    /// Mint backup shares worth `fee` to the treasury
    pub(crate) fn deposit_to_treasury(&mut self, fee: Amount) -> Result<()> {
        if fee == 0 {
            return Ok(());
        }
        if let Some(treasury) = self.params.treasury.clone() {
            let shares = self.backup.preview_deposit(fee)?;
            self.backup.mint(&treasury, shares)?;
        }
        self.backup.assets = add(self.backup.assets, fee)?;
        Ok(())
    }

    /// Skim the treasury part of a fixed fee; returns what is left
    pub(crate) fn charge_treasury_fee(&mut self, fee: Amount) -> Result<Amount> {
        let treasury_fee = mul_wad_down(fee, self.params.treasury_fee_rate)?;
        self.deposit_to_treasury(treasury_fee)?;
        Ok(fee - treasury_fee)
    }

    // ========================================
    // Utilization and liquidity
    // ========================================

    pub(crate) fn utilization_state(&self, backup_supplied: Amount) -> Result<UtilizationState> {
        let pools = self.params.max_future_pools as u128;
        let average = self.backup.assets_average;
        let fixed_utilization = if average == 0 {
            if backup_supplied == 0 {
                0
            } else {
                u128::MAX
            }
        } else {
            mul_div_up(backup_supplied, WAD * pools, average)?
        };
        Ok(UtilizationState {
            fixed_utilization,
            floating_utilization: self.backup.floating_utilization()?,
            global_utilization: self.backup.global_utilization()?,
            assets_average: average,
            max_future_pools: self.params.max_future_pools,
        })
    }

    /// Late-repay penalty on `total` owed since `maturity`
    pub(crate) fn penalty(&self, total: Amount, maturity: Maturity, now: Timestamp) -> Result<Amount> {
        if now <= maturity {
            return Ok(0);
        }
        let rate = self
            .params
            .penalty_rate
            .checked_mul((now - maturity) as u128)
            .ok_or(fixed_model::MathError::Overflow)?;
        Ok(mul_wad_down(total, rate)?)
    }

    /// Fixed borrows (with penalties) plus floating debt of `account`
    pub fn debt_of(&self, account: &AccountId, now: Timestamp) -> Result<Amount> {
        let mut debt = self.backup.debt_of(account)?;
        for (maturity, position) in self.positions.positions(Side::Borrow, account) {
            let total = position.total()?;
            debt = add(debt, add(total, self.penalty(total, maturity, now)?)?)?;
        }
        Ok(debt)
    }

    pub fn account_liquidity(
        &self,
        account: &AccountId,
        now: Timestamp,
        oracle: &dyn Oracle,
    ) -> Result<AccountLiquidity> {
        let asset = &self.params.asset;
        let price = oracle.price_of(asset)?;
        let factor = adjust_factor(oracle, asset)?;
        let mut liquidity = AccountLiquidity::default();

        let deposit = self.backup.assets_of(account)?;
        if deposit > 0 {
            liquidity.add_collateral(mul_wad_down(deposit, price)?, factor)?;
        }
        for (collateral_asset, balance) in self.collateral.balances_of(account) {
            if *balance == 0 {
                continue;
            }
            let collateral_price = oracle.price_of(collateral_asset)?;
            let collateral_factor = adjust_factor(oracle, collateral_asset)?;
            liquidity.add_collateral(mul_wad_down(*balance, collateral_price)?, collateral_factor)?;
        }

        let debt = self.debt_of(account, now)?;
        if debt > 0 {
            liquidity.add_debt(mul_wad_up(debt, price)?, factor)?;
        }
        Ok(liquidity)
    }

    /// Fails if `account` is left with a shortfall
    pub(crate) fn check_liquidity(&self, account: &AccountId, env: &Env) -> Result<()> {
        if self.account_liquidity(account, env.now, env.oracle)?.has_shortfall() {
            return Err(MarketError::InsufficientAccountLiquidity);
        }
        Ok(())
    }

    /// Whether `account` still holds anything that can be seized
    pub fn has_collateral(&self, account: &AccountId) -> bool {
        self.backup.shares_of(account) > 0
            || self.collateral.balances_of(account).any(|(_, balance)| *balance > 0)
    }

    // ========================================
    // Bookkeeping checks
    // ========================================

    /// Sum of principal recorded in positions never exceeds the pool totals
    pub fn check_pool_consistency(&self) -> bool {
        self.pools.iter().all(|(maturity, pool)| {
            self.positions.total_principal(Side::Borrow, *maturity) <= pool.borrowed
                && self.positions.total_principal(Side::Deposit, *maturity) <= pool.supplied
        })
    }

    /// `backup_borrowed` equals the backup supply summed over pools
    pub fn check_backup_borrowed(&self) -> bool {
        let total: Option<Amount> = self
            .pools
            .values()
            .try_fold(0u128, |acc, pool| acc.checked_add(pool.backup_supplied()));
        total == Some(self.backup.backup_borrowed)
    }

    /// Total unassigned earnings across pools
    pub fn total_unassigned(&self) -> Amount {
        self.pools.values().map(|pool| pool.unassigned_earnings).sum()
    }

    pub(crate) fn reduce_backup_borrowed(&mut self, amount: Amount) -> Result<()> {
        self.backup.backup_borrowed = sub(self.backup.backup_borrowed, amount)?;
        Ok(())
    }

    pub(crate) fn increase_backup_borrowed(&mut self, amount: Amount) -> Result<()> {
        self.backup.backup_borrowed = add(self.backup.backup_borrowed, amount)?;
        Ok(())
    }
}
