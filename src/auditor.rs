//! Collateral book and account liquidity
//!
//! Collateral is the account's backup-pool deposit of the market asset plus
//! balances of registered external assets. Values are in the oracle's
//! numeraire; adjusted collateral is value times the asset's adjust factor,
//! adjusted debt is debt value divided by the market asset's factor.

use std::collections::BTreeMap;

use fixed_model::{add, div_wad_down, div_wad_up, mul_div_up, mul_wad_down, sub, WAD};
use serde::Serialize;

use crate::error::{MarketError, Result};
use crate::types::{AccountId, Amount, AssetId, Fraction};

/// Health factor a liquidation aims to restore
pub const TARGET_HEALTH: Fraction = WAD * 125 / 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollateralBook {
    balances: BTreeMap<AccountId, BTreeMap<AssetId, Amount>>,
}

impl CollateralBook {
    pub fn balance_of(&self, account: &AccountId, asset: &AssetId) -> Amount {
        self.balances
            .get(account)
            .and_then(|assets| assets.get(asset))
            .copied()
            .unwrap_or(0)
    }

    pub fn balances_of(&self, account: &AccountId) -> impl Iterator<Item = (&AssetId, &Amount)> {
        self.balances.get(account).into_iter().flat_map(|assets| assets.iter())
    }

    pub fn deposit(&mut self, account: &AccountId, asset: &AssetId, amount: Amount) -> Result<()> {
        let balance = self
            .balances
            .entry(account.clone())
            .or_default()
            .entry(asset.clone())
            .or_default();
        *balance = add(*balance, amount)?;
        Ok(())
    }

    pub fn withdraw(&mut self, account: &AccountId, asset: &AssetId, amount: Amount) -> Result<()> {
        let balance = self.balance_of(account, asset);
        if balance < amount {
            return Err(MarketError::InsufficientBalance);
        }
        if let Some(assets) = self.balances.get_mut(account) {
            if balance == amount {
                assets.remove(asset);
            } else {
                assets.insert(asset.clone(), balance - amount);
            }
            if assets.is_empty() {
                self.balances.remove(account);
            }
        }
        Ok(())
    }

    /// Total held across all accounts for `asset`
    pub fn total_of(&self, asset: &AssetId) -> Amount {
        self.balances
            .values()
            .filter_map(|assets| assets.get(asset))
            .sum()
    }
}

/// Valued snapshot of one account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccountLiquidity {
    pub collateral: Amount,
    pub adjusted_collateral: Amount,
    pub debt: Amount,
    pub adjusted_debt: Amount,
}

impl AccountLiquidity {
    pub fn add_collateral(&mut self, value: Amount, adjust_factor: Fraction) -> Result<()> {
        self.collateral = add(self.collateral, value)?;
        self.adjusted_collateral = add(self.adjusted_collateral, mul_wad_down(value, adjust_factor)?)?;
        Ok(())
    }

    pub fn add_debt(&mut self, value: Amount, adjust_factor: Fraction) -> Result<()> {
        self.debt = add(self.debt, value)?;
        self.adjusted_debt = add(self.adjusted_debt, div_wad_up(value, adjust_factor)?)?;
        Ok(())
    }

    pub fn has_shortfall(&self) -> bool {
        self.adjusted_debt > self.adjusted_collateral
    }

    /// `adjusted_collateral / adjusted_debt`; `None` without debt
    pub fn health_factor(&self) -> Result<Option<Fraction>> {
        if self.adjusted_debt == 0 {
            return Ok(None);
        }
        Ok(Some(div_wad_down(self.adjusted_collateral, self.adjusted_debt)?))
    }

    /// Fraction of debt value a liquidation may repay:
    /// `(TARGET_HEALTH - hf) / (TARGET_HEALTH - af * (1 + incentive))`,
    /// where `af` is the blended adjust factor of the account
    pub fn close_factor(&self, total_incentive: Fraction) -> Result<Fraction> {
        let Some(health) = self.health_factor()? else {
            return Ok(0);
        };
        if health >= TARGET_HEALTH || self.collateral == 0 {
            return Ok(WAD);
        }
        let blended = mul_div_up(
            self.adjusted_collateral,
            self.debt,
            mul_wad_down(self.adjusted_debt, self.collateral)?.max(1),
        )?;
        let penalised = mul_wad_down(blended, add(WAD, total_incentive)?)?;
        if penalised >= TARGET_HEALTH {
            return Ok(WAD);
        }
        let factor = div_wad_up(sub(TARGET_HEALTH, health)?, TARGET_HEALTH - penalised)?;
        Ok(factor.min(WAD))
    }
}
