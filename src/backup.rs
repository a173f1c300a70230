//! Backup (floating) pool
//!
//! A share vault over the market asset. It lends directly at the floating
//! rate and finances whatever part of a maturity's borrows that maturity's
//! own deposits do not cover (`backup_borrowed`).

use std::collections::BTreeMap;

use fixed_model::{
    add, exp_neg_wad, intervals_ahead, mul_div_down, mul_div_up, mul_wad_down, sub, WAD, YEAR,
};
use log::debug;
use serde::Serialize;

use crate::config::{DampSpeed, MarketParams};
use crate::error::{MarketError, Result};
use crate::rate_model::RateModel;
use crate::types::{AccountId, Amount, Fraction, Maturity, Timestamp};

/// Interest added by one floating-debt update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DebtAccrual {
    pub interest: Amount,
    /// Part of `interest` owed to the treasury
    pub treasury_fee: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupPool {
    /// Total assets owned by shareholders
    pub assets: Amount,
    /// Outstanding floating debt including accrued interest
    pub debt: Amount,
    /// Principal lent to maturity pools
    pub backup_borrowed: Amount,
    pub assets_average: Amount,
    pub utilization_average: Fraction,
    pub last_average_update: Timestamp,
    pub last_debt_update: Timestamp,
    pub total_shares: Amount,
    shares: BTreeMap<AccountId, Amount>,
    pub total_borrow_shares: Amount,
    borrow_shares: BTreeMap<AccountId, Amount>,
}

/// Move `average` towards `current`: `weight = exp(-speed * dt)`
fn damp(average: Amount, current: Amount, dt: u64, speed: DampSpeed) -> Result<Amount> {
    let speed = if current < average { speed.down } else { speed.up };
    let exponent = speed.checked_mul(dt as u128).ok_or(fixed_model::MathError::Overflow)?;
    let weight = exp_neg_wad(exponent)?;
    Ok(add(mul_wad_down(average, weight)?, mul_wad_down(current, WAD - weight)?)?)
}

impl BackupPool {
    pub fn new(now: Timestamp) -> Self {
        Self {
            last_average_update: now,
            last_debt_update: now,
            ..Default::default()
        }
    }

    /// `(debt + backup_borrowed) / assets`
    pub fn global_utilization(&self) -> Result<Fraction> {
        if self.assets == 0 {
            return Ok(0);
        }
        Ok(mul_div_up(add(self.debt, self.backup_borrowed)?, WAD, self.assets)?)
    }

    /// `debt / assets`
    pub fn floating_utilization(&self) -> Result<Fraction> {
        if self.assets == 0 {
            return Ok(0);
        }
        Ok(mul_div_up(self.debt, WAD, self.assets)?)
    }

    /// Damp both averages towards their current values
    pub fn update_averages(&mut self, now: Timestamp, params: &MarketParams) -> Result<()> {
        let dt = now.saturating_sub(self.last_average_update);
        if dt == 0 {
            return Ok(());
        }
        self.assets_average = damp(self.assets_average, self.assets, dt, params.assets_damp)?;
        let utilization = self.global_utilization()?;
        self.utilization_average =
            damp(self.utilization_average, utilization, dt, params.utilization_damp)?;
        self.last_average_update = now;
        Ok(())
    }

    /// Accrue floating interest since the last update
    pub fn accrue_debt(
        &mut self,
        now: Timestamp,
        rates: &dyn RateModel,
        treasury_fee_rate: Fraction,
    ) -> Result<DebtAccrual> {
        let dt = now.saturating_sub(self.last_debt_update);
        if dt == 0 {
            return Ok(DebtAccrual::default());
        }
        self.last_debt_update = now;
        if self.debt == 0 {
            return Ok(DebtAccrual::default());
        }

        let yearly = rates.floating_rate(self.floating_utilization()?)?;
        let rate = mul_div_down(yearly, dt as u128, YEAR as u128)?;
        let interest = mul_wad_down(self.debt, rate)?;
        let treasury_fee = mul_wad_down(interest, treasury_fee_rate)?;

        self.debt = add(self.debt, interest)?;
        self.assets = add(self.assets, interest - treasury_fee)?;
        debug!(
            "floating debt accrued: dt={} rate={} interest={} treasury={}",
            dt, rate, interest, treasury_fee
        );
        Ok(DebtAccrual {
            interest,
            treasury_fee,
        })
    }

    // ========================================
    // Deposit shares
    // ========================================

    /// Shares minted for `assets`, rounded down
    pub fn preview_deposit(&self, assets: Amount) -> Result<Amount> {
        if self.total_shares == 0 || self.assets == 0 {
            return Ok(assets);
        }
        Ok(mul_div_down(assets, self.total_shares, self.assets)?)
    }

    /// Shares burned to take out `assets`, rounded up
    pub fn preview_withdraw(&self, assets: Amount) -> Result<Amount> {
        if self.total_shares == 0 || self.assets == 0 {
            return Ok(assets);
        }
        Ok(mul_div_up(assets, self.total_shares, self.assets)?)
    }

    pub fn convert_to_assets(&self, shares: Amount) -> Result<Amount> {
        if self.total_shares == 0 {
            return Ok(shares);
        }
        Ok(mul_div_down(shares, self.assets, self.total_shares)?)
    }

    pub fn shares_of(&self, account: &AccountId) -> Amount {
        self.shares.get(account).copied().unwrap_or(0)
    }

    pub fn assets_of(&self, account: &AccountId) -> Result<Amount> {
        self.convert_to_assets(self.shares_of(account))
    }

    pub fn shareholders(&self) -> impl Iterator<Item = (&AccountId, &Amount)> {
        self.shares.iter()
    }

    pub fn mint(&mut self, account: &AccountId, shares: Amount) -> Result<()> {
        self.total_shares = add(self.total_shares, shares)?;
        let balance = self.shares.entry(account.clone()).or_default();
        *balance = add(*balance, shares)?;
        Ok(())
    }

    pub fn burn(&mut self, account: &AccountId, shares: Amount) -> Result<()> {
        let balance = self.shares_of(account);
        if balance < shares {
            return Err(MarketError::InsufficientBalance);
        }
        self.total_shares = sub(self.total_shares, shares)?;
        if balance == shares {
            self.shares.remove(account);
        } else {
            self.shares.insert(account.clone(), balance - shares);
        }
        Ok(())
    }

    // ========================================
    // Borrow shares
    // ========================================

    /// Borrow shares for `assets` of new debt, rounded up
    pub fn preview_borrow(&self, assets: Amount) -> Result<Amount> {
        if self.total_borrow_shares == 0 || self.debt == 0 {
            return Ok(assets);
        }
        Ok(mul_div_up(assets, self.total_borrow_shares, self.debt)?)
    }

    /// Borrow shares extinguished by repaying `assets`, rounded down
    pub fn preview_repay(&self, assets: Amount) -> Result<Amount> {
        if self.debt == 0 {
            return Ok(0);
        }
        Ok(mul_div_down(assets, self.total_borrow_shares, self.debt)?)
    }

    pub fn borrow_shares_of(&self, account: &AccountId) -> Amount {
        self.borrow_shares.get(account).copied().unwrap_or(0)
    }

    /// Floating debt of `account`, rounded up
    pub fn debt_of(&self, account: &AccountId) -> Result<Amount> {
        if self.total_borrow_shares == 0 {
            return Ok(0);
        }
        Ok(mul_div_up(
            self.borrow_shares_of(account),
            self.debt,
            self.total_borrow_shares,
        )?)
    }

    pub fn borrowers(&self) -> impl Iterator<Item = &AccountId> {
        self.borrow_shares.keys()
    }

    pub fn mint_borrow_shares(&mut self, account: &AccountId, shares: Amount) -> Result<()> {
        self.total_borrow_shares = add(self.total_borrow_shares, shares)?;
        let balance = self.borrow_shares.entry(account.clone()).or_default();
        *balance = add(*balance, shares)?;
        Ok(())
    }

    pub fn burn_borrow_shares(&mut self, account: &AccountId, shares: Amount) -> Result<()> {
        let balance = self.borrow_shares_of(account);
        if balance < shares {
            return Err(MarketError::InsufficientBalance);
        }
        self.total_borrow_shares = sub(self.total_borrow_shares, shares)?;
        if balance == shares {
            self.borrow_shares.remove(account);
        } else {
            self.borrow_shares.insert(account.clone(), balance - shares);
        }
        Ok(())
    }

    /// Repay up to `assets` of `account`'s floating debt.
    ///
    /// Returns the assets actually owed for the burned shares.
    pub fn repay_floating(&mut self, account: &AccountId, assets: Amount) -> Result<Amount> {
        let owed = self.debt_of(account)?;
        let (shares, actual) = if assets >= owed {
            (self.borrow_shares_of(account), owed)
        } else {
            (self.preview_repay(assets)?, assets)
        };
        self.burn_borrow_shares(account, shares)?;
        self.debt = self.debt.saturating_sub(actual);
        if self.total_borrow_shares == 0 {
            self.debt = 0;
        }
        Ok(actual)
    }

    // ========================================
    // Liquidity limits
    // ========================================

    /// Backup supply a maturity may draw: the nearest maturity gets the full
    /// threshold, farther ones a linearly smaller slice, floored at the
    /// minimum factor
    pub fn fixed_borrow_capacity(
        &self,
        maturity: Maturity,
        now: Timestamp,
        params: &MarketParams,
    ) -> Result<Amount> {
        let pools = params.max_future_pools as u128;
        let ahead = intervals_ahead(maturity, now) as u128;
        let slope = mul_div_down(
            params.fixed_borrow_threshold,
            (pools + 1).saturating_sub(ahead),
            pools,
        )?;
        let factor = slope.max(params.min_threshold_factor);
        Ok(mul_wad_down(self.assets_average, factor)?)
    }

    /// Lent out (floating and to maturities) plus `extra` must stay within
    /// the non-reserved part of assets
    pub fn check_reserve(&self, extra: Amount, reserve_factor: Fraction) -> Result<()> {
        let lendable = mul_wad_down(self.assets, WAD - reserve_factor)?;
        if add(add(self.debt, self.backup_borrowed)?, extra)? > lendable {
            return Err(MarketError::InsufficientProtocolLiquidity);
        }
        Ok(())
    }

    /// Lent out must stay within assets
    pub fn check_solvent(&self) -> Result<()> {
        if add(self.debt, self.backup_borrowed)? > self.assets {
            return Err(MarketError::InsufficientProtocolLiquidity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarketConfig;
    use crate::rate_model::FlatRateModel;

    fn params() -> MarketParams {
        MarketConfig::default().params().unwrap()
    }

    #[test]
    fn test_share_math() {
        let alice = AccountId::from("alice");
        let mut pool = BackupPool::new(0);
        assert_eq!(pool.preview_deposit(1_000), Ok(1_000));
        pool.mint(&alice, 1_000).unwrap();
        pool.assets = 1_000;

        // price doubles
        pool.assets = 2_000;
        assert_eq!(pool.preview_deposit(1_000), Ok(500));
        assert_eq!(pool.preview_withdraw(1_001), Ok(501));
        assert_eq!(pool.assets_of(&alice), Ok(2_000));

        assert_eq!(pool.burn(&alice, 1_001), Err(MarketError::InsufficientBalance));
        pool.burn(&alice, 1_000).unwrap();
        assert_eq!(pool.total_shares, 0);
        assert_eq!(pool.shareholders().count(), 0);
    }

    #[test]
    fn test_averages_move_towards_current() {
        let p = params();
        let mut pool = BackupPool::new(0);
        pool.assets = 1_000 * WAD;

        pool.update_averages(100, &p).unwrap();
        let after_short = pool.assets_average;
        assert!(after_short > 0 && after_short < pool.assets);

        pool.update_averages(100_000, &p).unwrap();
        assert!(pool.assets_average > after_short);
        assert!(pool.assets - pool.assets_average < WAD);

        // falling assets use the faster down speed
        pool.assets = 0;
        pool.update_averages(100_010, &p).unwrap();
        assert!(pool.assets_average < 100 * WAD);
    }

    #[test]
    fn test_accrue_debt_with_treasury_fee() {
        let rates = FlatRateModel {
            fixed_yearly: 0,
            floating_yearly: WAD / 10,
        };
        let mut pool = BackupPool::new(0);
        pool.assets = 1_000 * WAD;
        pool.debt = 100 * WAD;

        let accrual = pool.accrue_debt(YEAR, &rates, WAD / 10).unwrap();
        assert_eq!(accrual.interest, 10 * WAD);
        assert_eq!(accrual.treasury_fee, WAD);
        assert_eq!(pool.debt, 110 * WAD);
        assert_eq!(pool.assets, 1_009 * WAD);
        assert_eq!(pool.last_debt_update, YEAR);

        // same timestamp is a no-op
        assert_eq!(pool.accrue_debt(YEAR, &rates, 0), Ok(DebtAccrual::default()));
    }

    #[test]
    fn test_floating_repay_caps_at_debt() {
        let bob = AccountId::from("bob");
        let mut pool = BackupPool::new(0);
        let shares = pool.preview_borrow(100).unwrap();
        pool.mint_borrow_shares(&bob, shares).unwrap();
        pool.debt = 110;

        assert_eq!(pool.debt_of(&bob), Ok(110));
        assert_eq!(pool.repay_floating(&bob, 55), Ok(55));
        assert_eq!(pool.debt, 55);
        assert_eq!(pool.repay_floating(&bob, 1_000), Ok(55));
        assert_eq!(pool.debt, 0);
        assert_eq!(pool.total_borrow_shares, 0);
    }

    #[test]
    fn test_capacity_declines_with_distance() {
        let p = params();
        let mut pool = BackupPool::new(0);
        pool.assets_average = 1_000 * WAD;
        let now = 0;
        let near = pool
            .fixed_borrow_capacity(fixed_model::INTERVAL, now, &p)
            .unwrap();
        let far = pool
            .fixed_borrow_capacity(6 * fixed_model::INTERVAL, now, &p)
            .unwrap();
        assert_eq!(near, 600 * WAD);
        assert_eq!(far, 250 * WAD);
        assert!(far < near);
    }

    #[test]
    fn test_reserve_check() {
        let mut pool = BackupPool::new(0);
        pool.assets = 1_000;
        pool.debt = 800;
        pool.backup_borrowed = 100;
        assert_eq!(pool.check_reserve(0, WAD / 10), Ok(()));
        assert_eq!(
            pool.check_reserve(1, WAD / 10),
            Err(MarketError::InsufficientProtocolLiquidity)
        );
        pool.backup_borrowed = 101;
        assert_eq!(
            pool.check_reserve(0, WAD / 10),
            Err(MarketError::InsufficientProtocolLiquidity)
        );
        assert_eq!(pool.check_solvent(), Ok(()));
    }
}
