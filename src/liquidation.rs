//! Liquidation and bad-debt clearing

use fixed_model::{add, mul_div_down, mul_wad_down, mul_wad_up, sub, WAD};
use log::{info, warn};
use serde::Serialize;

use crate::custody::Transfer;
use crate::error::{MarketError, Result};
use crate::state::{Env, MarketState};
use crate::types::{AccountId, Amount, AssetId, Maturity, Side, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Liquidation {
    /// Debt repaid on the borrower's behalf, penalties included
    pub repaid: Amount,
    /// `(maturity, repaid)` in the order they were repaid
    pub fixed_repaid: Vec<(Maturity, Amount)>,
    pub floating_repaid: Amount,
    /// Paid by the liquidator on top of `repaid`, sent to the accumulator
    pub lenders_assets: Amount,
    pub seize_asset: AssetId,
    pub seized: Amount,
    pub bad_debt: Option<BadDebtClearing>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BadDebtClearing {
    /// Total absorbed by the accumulator
    pub spread: Amount,
    pub cleared_maturities: Vec<Maturity>,
    pub floating: Amount,
}

impl MarketState {
    /// Repay part of an unhealthy borrower's debt and seize collateral
    /// worth the repayment plus the liquidator incentive.
    ///
    /// # Arguments
    /// * `liquidator` - Pays the debt, receives the seized asset
    /// * `borrower` - Account with a shortfall
    /// * `max_assets` - Most the liquidator is willing to repay
    /// * `seize_asset` - Market asset (backup deposit) or a collateral asset
    pub fn liquidate(
        &mut self,
        env: &Env,
        liquidator: &AccountId,
        borrower: &AccountId,
        max_assets: Amount,
        seize_asset: &AssetId,
    ) -> Result<(Liquidation, Vec<Transfer>)> {
        if liquidator == borrower {
            return Err(MarketError::SelfLiquidation);
        }
        self.settle_shares(env)?;

        let liquidity = self.account_liquidity(borrower, env.now, env.oracle)?;
        if !liquidity.has_shortfall() {
            return Err(MarketError::InsufficientShortfall);
        }

        let mut report = Liquidation {
            repaid: 0,
            fixed_repaid: Vec::new(),
            floating_repaid: 0,
            lenders_assets: 0,
            seize_asset: seize_asset.clone(),
            seized: 0,
            bad_debt: None,
        };

        if liquidity.collateral == 0 {
            report.bad_debt = Some(self.clear_bad_debt(env.now, borrower)?);
            return Ok((report, Vec::new()));
        }

        let is_market_asset = *seize_asset == self.params.asset;
        let seize_balance = if is_market_asset {
            self.backup.assets_of(borrower)?
        } else {
            self.collateral.balance_of(borrower, seize_asset)
        };
        if seize_balance == 0 {
            return Err(MarketError::NothingToSeize(seize_asset.clone()));
        }

        let incentive = self.params.incentive;
        let market_price = env.oracle.price_of(&self.params.asset)?;
        let seize_price = env.oracle.price_of(seize_asset)?;

        let close_factor = liquidity.close_factor(add(incentive.liquidator, incentive.lenders)?)?;
        let debt = self.debt_of(borrower, env.now)?;
        let seize_cap = mul_div_down(
            mul_wad_down(seize_balance, seize_price)?,
            WAD,
            mul_wad_up(market_price, add(WAD, incentive.liquidator)?)?,
        )?;
        let debt_bound = max_assets.min(mul_wad_up(debt, close_factor)?);
        let collateral_bound = seize_cap <= debt_bound;
        let initial_budget = debt_bound.min(seize_cap);
        let mut budget = initial_budget;
        if budget == 0 {
            return Err(MarketError::ZeroRepay);
        }

        for maturity in self.positions.maturities(Side::Borrow, borrower) {
            if budget == 0 {
                break;
            }
            let repaid = self.liquidate_fixed(env.now, borrower, maturity, budget)?;
            if repaid > 0 {
                budget -= repaid;
                report.repaid = add(report.repaid, repaid)?;
                report.fixed_repaid.push((maturity, repaid));
            }
        }
        if budget > 0 && self.backup.borrow_shares_of(borrower) > 0 {
            let repaid = self.backup.repay_floating(borrower, budget)?;
            report.floating_repaid = repaid;
            report.repaid = add(report.repaid, repaid)?;
        }

        report.lenders_assets = mul_wad_down(report.repaid, incentive.lenders)?;
        let base = mul_wad_up(report.repaid, market_price)?;
        let with_bonus = add(base, mul_wad_down(base, incentive.liquidator)?)?;
        // a repay capped by the collateral takes all of it, rounding dust included
        report.seized = if collateral_bound && report.repaid == initial_budget {
            seize_balance
        } else {
            mul_div_down(with_bonus, WAD, seize_price)?.min(seize_balance)
        };

        if is_market_asset {
            let shares = self
                .backup
                .preview_withdraw(report.seized)?
                .min(self.backup.shares_of(borrower));
            self.backup.burn(borrower, shares)?;
            self.backup.assets = sub(self.backup.assets, report.seized)?;
            self.backup.check_solvent()?;
        } else {
            self.collateral.withdraw(borrower, seize_asset, report.seized)?;
        }
        self.accumulator.collect(report.lenders_assets)?;

        if !self.has_collateral(borrower) && self.debt_of(borrower, env.now)? > 0 {
            report.bad_debt = Some(self.clear_bad_debt(env.now, borrower)?);
        }

        info!(
            "liquidate: {} repaid {} for {}, seized {} {}",
            liquidator, report.repaid, borrower, report.seized, seize_asset
        );
        let transfers = vec![
            Transfer::In {
                asset: self.params.asset.clone(),
                from: liquidator.clone(),
                amount: add(report.repaid, report.lenders_assets)?,
            },
            Transfer::Out {
                asset: seize_asset.clone(),
                to: liquidator.clone(),
                amount: report.seized,
            },
        ];
        Ok((report, transfers))
    }

    /// Repay one fixed borrow without discount, penalty included when
    /// matured. Returns what was spent out of `budget`.
    fn liquidate_fixed(
        &mut self,
        now: Timestamp,
        borrower: &AccountId,
        maturity: Maturity,
        budget: Amount,
    ) -> Result<Amount> {
        self.accrue_pool(maturity, now)?;
        let position = self.positions.get(Side::Borrow, borrower, maturity);
        let total = position.total()?;

        let (debt_covered, penalty) = if now < maturity {
            (budget.min(total), 0)
        } else {
            let with_penalty = add(total, self.penalty(total, maturity, now)?)?;
            let covered = if with_penalty > budget {
                mul_div_down(budget, total, with_penalty)?
            } else {
                total
            };
            let penalty = self.penalty(covered, maturity, now)?.min(budget - covered);
            (covered, penalty)
        };
        if debt_covered == 0 {
            return Ok(0);
        }

        let principal_covered = position.scale_proportionally(debt_covered)?.principal;
        let mut pool = self.pool(maturity);
        let reduction = pool.repay(principal_covered)?;
        self.pools.insert(maturity, pool);
        self.reduce_backup_borrowed(reduction)?;
        self.sweep_if_unborrowed(maturity)?;
        self.accumulator.collect(penalty)?;

        let remaining = position.reduce_proportionally(debt_covered)?;
        self.positions.set(Side::Borrow, borrower, maturity, remaining);
        Ok(add(debt_covered, penalty)?)
    }

    /// Let the accumulator absorb what `borrower` can no longer pay.
    ///
    /// Fixed positions are cleared whole, nearest maturity first, skipping
    /// any the accumulator cannot fully cover. Floating debt takes what is
    /// left.
    pub fn clear_bad_debt(&mut self, now: Timestamp, borrower: &AccountId) -> Result<BadDebtClearing> {
        self.release_accumulator(now)?;
        let maturities = self.positions.maturities(Side::Borrow, borrower);
        for maturity in &maturities {
            self.accrue_pool(*maturity, now)?;
        }

        let mut budget = self.accumulator.amount;
        let mut clearing = BadDebtClearing::default();

        for maturity in maturities {
            let position = self.positions.get(Side::Borrow, borrower, maturity);
            let total = position.total()?;
            if total > budget {
                continue;
            }
            let mut pool = self.pool(maturity);
            let reduction = pool.repay(position.principal)?;
            self.pools.insert(maturity, pool);
            self.reduce_backup_borrowed(reduction)?;
            self.sweep_if_unborrowed(maturity)?;
            self.positions
                .set(Side::Borrow, borrower, maturity, Default::default());

            budget -= total;
            clearing.spread = add(clearing.spread, total)?;
            clearing.cleared_maturities.push(maturity);
        }

        if budget > 0 && self.backup.borrow_shares_of(borrower) > 0 {
            let covered = self.backup.repay_floating(borrower, budget)?;
            clearing.floating = covered;
            clearing.spread = add(clearing.spread, covered)?;
        }

        self.accumulator.spend(clearing.spread)?;
        if clearing.spread > 0 {
            warn!(
                "bad debt: accumulator absorbed {} for {} ({} maturities, {} floating)",
                clearing.spread,
                borrower,
                clearing.cleared_maturities.len(),
                clearing.floating
            );
        }
        Ok(clearing)
    }
}
