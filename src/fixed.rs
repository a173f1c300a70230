//! Fixed-rate transitions: deposit, borrow, repay and withdraw at maturity
//!
//! Each transition:
//! 1. validates the maturity state
//! 2. settles floating debt and the damped averages
//! 3. accrues the maturity's unassigned earnings
//! 4. applies its fee split and updates pool, backup pool and positions
//!
//! The returned transfers are executed by the engine after commit.

use fixed_model::{
    add, div_wad_down, mul_div_up, mul_wad_up, sub, Accrual, FixedPool, PoolState, WAD,
};
use log::{debug, info};
use serde::Serialize;

use crate::custody::Transfer;
use crate::error::{MarketError, Result};
use crate::state::{Env, MarketState};
use crate::types::{AccountId, Amount, Maturity, Side};

const OPEN: &[PoolState] = &[PoolState::Valid];
const OPEN_OR_MATURED: &[PoolState] = &[PoolState::Valid, PoolState::Matured];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DepositAtMaturity {
    pub maturity: Maturity,
    pub assets: Amount,
    /// Unassigned earnings credited to the depositor
    pub fee: Amount,
    /// Part of the earnings share kept for the accumulator
    pub backup_fee: Amount,
    /// What the position pays at maturity
    pub position_assets: Amount,
    pub accrual: Accrual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BorrowAtMaturity {
    pub maturity: Maturity,
    pub assets: Amount,
    pub fee: Amount,
    pub treasury_fee: Amount,
    pub to_unassigned: Amount,
    pub to_accumulator: Amount,
    /// Principal newly financed by the backup pool
    pub backup_addition: Amount,
    /// `assets + fee`, owed at maturity
    pub assets_owed: Amount,
    pub accrual: Accrual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepayAtMaturity {
    pub maturity: Maturity,
    pub debt_covered: Amount,
    pub principal_covered: Amount,
    /// Early-repay discount taken from unassigned earnings
    pub discount: Amount,
    pub backup_fee: Amount,
    /// Late-repay penalty, all of it to the accumulator
    pub penalty: Amount,
    pub actual_repay: Amount,
    pub accrual: Accrual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WithdrawAtMaturity {
    pub maturity: Maturity,
    pub position_assets: Amount,
    pub principal_removed: Amount,
    /// Paid out to the receiver
    pub assets_discounted: Amount,
    pub discount: Amount,
    pub treasury_fee: Amount,
    pub to_unassigned: Amount,
    pub to_accumulator: Amount,
    pub backup_addition: Amount,
    pub accrual: Accrual,
}

/// Pool and fee after a prospective borrow
pub(crate) struct BorrowQuote {
    pub pool: FixedPool,
    pub fee: Amount,
    pub backup_addition: Amount,
}

impl MarketState {
    /// Price a borrow against the already accrued pool. Checks capacity and
    /// reserve limits but mutates nothing.
    pub(crate) fn quote_borrow(
        &self,
        env: &Env,
        maturity: Maturity,
        assets: Amount,
    ) -> Result<BorrowQuote> {
        let mut pool = self.pool(maturity);
        let backup_addition = pool.borrow(assets)?;
        let backup_supplied = pool.backup_supplied();

        if backup_addition > 0 {
            let capacity = self.backup.fixed_borrow_capacity(maturity, env.now, &self.params)?;
            if backup_supplied > capacity {
                return Err(MarketError::InsufficientProtocolLiquidity);
            }
            self.backup
                .check_reserve(backup_addition, self.params.reserve_factor)?;
        }

        let utilization = self.utilization_state(backup_supplied)?;
        let rate = env
            .rates
            .fixed_rate(maturity, maturity - env.now, &utilization)?;
        let fee = mul_wad_up(assets, rate)?;
        Ok(BorrowQuote {
            pool,
            fee,
            backup_addition,
        })
    }

    /// Lend `assets` to `maturity` for `receiver`'s position
    pub fn deposit_at_maturity(
        &mut self,
        env: &Env,
        maturity: Maturity,
        assets: Amount,
        min_assets_required: Amount,
        depositor: &AccountId,
        receiver: &AccountId,
    ) -> Result<(DepositAtMaturity, Vec<Transfer>)> {
        if assets == 0 {
            return Err(MarketError::ZeroDeposit);
        }
        self.check_pool_state(maturity, env.now, OPEN)?;
        self.settle_floating(env)?;
        let accrual = self.accrue_pool(maturity, env.now)?;

        let mut pool = self.pool(maturity);
        let (fee, backup_fee) = pool.deposit_share(assets, self.params.backup_fee_rate)?;
        let position_assets = add(assets, fee)?;
        if position_assets < min_assets_required {
            return Err(MarketError::Disagreement {
                limit: min_assets_required,
                actual: position_assets,
            });
        }

        pool.unassigned_earnings = sub(pool.unassigned_earnings, add(fee, backup_fee)?)?;
        let reduction = pool.deposit(assets)?;
        self.pools.insert(maturity, pool);
        self.reduce_backup_borrowed(reduction)?;
        self.accumulator.collect(backup_fee)?;

        let position = self.positions.get(Side::Deposit, receiver, maturity).add(assets, fee)?;
        self.positions.set(Side::Deposit, receiver, maturity, position);

        info!(
            "deposit_at_maturity: {} deposited {} at {} (fee {}, backup fee {})",
            receiver, assets, maturity, fee, backup_fee
        );
        let transfers = vec![Transfer::In {
            asset: self.params.asset.clone(),
            from: depositor.clone(),
            amount: assets,
        }];
        Ok((
            DepositAtMaturity {
                maturity,
                assets,
                fee,
                backup_fee,
                position_assets,
                accrual,
            },
            transfers,
        ))
    }

    /// Borrow `assets` until `maturity` at a fee fixed now
    pub fn borrow_at_maturity(
        &mut self,
        env: &Env,
        maturity: Maturity,
        assets: Amount,
        max_assets: Amount,
        borrower: &AccountId,
        receiver: &AccountId,
    ) -> Result<(BorrowAtMaturity, Vec<Transfer>)> {
        if assets == 0 {
            return Err(MarketError::ZeroBorrow);
        }
        self.check_pool_state(maturity, env.now, OPEN)?;
        self.settle_floating(env)?;
        let accrual = self.accrue_pool(maturity, env.now)?;

        let BorrowQuote {
            mut pool,
            fee,
            backup_addition,
        } = self.quote_borrow(env, maturity, assets)?;
        let assets_owed = add(assets, fee)?;
        if assets_owed > max_assets {
            return Err(MarketError::Disagreement {
                limit: max_assets,
                actual: assets_owed,
            });
        }

        let net_fee = self.charge_treasury_fee(fee)?;
        let (to_unassigned, to_accumulator) = pool.distribute_earnings(net_fee, assets)?;
        pool.unassigned_earnings = add(pool.unassigned_earnings, to_unassigned)?;
        self.pools.insert(maturity, pool);
        self.increase_backup_borrowed(backup_addition)?;
        self.accumulator.collect(to_accumulator)?;

        let position = self.positions.get(Side::Borrow, borrower, maturity).add(assets, fee)?;
        self.positions.set(Side::Borrow, borrower, maturity, position);
        self.check_liquidity(borrower, env)?;

        debug!(
            "borrow_at_maturity split: unassigned {} accumulator {} treasury {}",
            to_unassigned,
            to_accumulator,
            fee - net_fee
        );
        info!(
            "borrow_at_maturity: {} borrowed {} at {} (fee {}, backup addition {})",
            borrower, assets, maturity, fee, backup_addition
        );
        let transfers = vec![Transfer::Out {
            asset: self.params.asset.clone(),
            to: receiver.clone(),
            amount: assets,
        }];
        Ok((
            BorrowAtMaturity {
                maturity,
                assets,
                fee,
                treasury_fee: fee - net_fee,
                to_unassigned,
                to_accumulator,
                backup_addition,
                assets_owed,
                accrual,
            },
            transfers,
        ))
    }

    /// Repay up to `position_assets` of `borrower`'s debt at `maturity`
    pub fn repay_at_maturity(
        &mut self,
        env: &Env,
        maturity: Maturity,
        position_assets: Amount,
        max_assets: Amount,
        payer: &AccountId,
        borrower: &AccountId,
    ) -> Result<(RepayAtMaturity, Vec<Transfer>)> {
        if position_assets == 0 {
            return Err(MarketError::ZeroRepay);
        }
        self.check_pool_state(maturity, env.now, OPEN_OR_MATURED)?;
        self.settle_floating(env)?;
        let accrual = self.accrue_pool(maturity, env.now)?;

        let position = self.positions.get(Side::Borrow, borrower, maturity);
        let debt_covered = position_assets.min(position.total()?);
        if debt_covered == 0 {
            return Err(MarketError::ZeroRepay);
        }
        let principal_covered = position.scale_proportionally(debt_covered)?.principal;

        let mut pool = self.pool(maturity);
        let (discount, backup_fee, penalty, actual_repay) = if env.now < maturity {
            let (discount, backup_fee) =
                pool.deposit_share(principal_covered, self.params.backup_fee_rate)?;
            pool.unassigned_earnings =
                sub(pool.unassigned_earnings, add(discount, backup_fee)?)?;
            (discount, backup_fee, 0, sub(debt_covered, discount)?)
        } else {
            let penalty = self.penalty(debt_covered, maturity, env.now)?;
            (0, 0, penalty, add(debt_covered, penalty)?)
        };
        if actual_repay > max_assets {
            return Err(MarketError::Disagreement {
                limit: max_assets,
                actual: actual_repay,
            });
        }

        let reduction = pool.repay(principal_covered)?;
        self.pools.insert(maturity, pool);
        self.reduce_backup_borrowed(reduction)?;
        self.accumulator.collect(add(backup_fee, penalty)?)?;

        let remaining = position.reduce_proportionally(debt_covered)?;
        self.positions.set(Side::Borrow, borrower, maturity, remaining);

        info!(
            "repay_at_maturity: {} repaid {} of {} at {} (discount {}, penalty {})",
            borrower, actual_repay, debt_covered, maturity, discount, penalty
        );
        let transfers = vec![Transfer::In {
            asset: self.params.asset.clone(),
            from: payer.clone(),
            amount: actual_repay,
        }];
        Ok((
            RepayAtMaturity {
                maturity,
                debt_covered,
                principal_covered,
                discount,
                backup_fee,
                penalty,
                actual_repay,
                accrual,
            },
            transfers,
        ))
    }

    /// Withdraw up to `position_assets` of `owner`'s deposit at `maturity`.
    ///
    /// Before maturity the part of the principal the backup pool has to
    /// refinance is charged at the current fixed rate.
    pub fn withdraw_at_maturity(
        &mut self,
        env: &Env,
        maturity: Maturity,
        position_assets: Amount,
        min_assets_required: Amount,
        receiver: &AccountId,
        owner: &AccountId,
    ) -> Result<(WithdrawAtMaturity, Vec<Transfer>)> {
        if position_assets == 0 {
            return Err(MarketError::ZeroWithdraw);
        }
        self.check_pool_state(maturity, env.now, OPEN_OR_MATURED)?;
        self.settle_floating(env)?;
        let accrual = self.accrue_pool(maturity, env.now)?;

        let position = self.positions.get(Side::Deposit, owner, maturity);
        let position_assets = position_assets.min(position.total()?);
        if position_assets == 0 {
            return Err(MarketError::ZeroWithdraw);
        }
        let principal_removed = position.scale_proportionally(position_assets)?.principal;

        let mut pool = self.pool(maturity);
        let backup_addition = pool.withdraw(principal_removed)?;

        let assets_discounted = if env.now < maturity && backup_addition > 0 {
            let utilization = self.utilization_state(pool.backup_supplied())?;
            let rate = env
                .rates
                .fixed_rate(maturity, maturity - env.now, &utilization)?;
            let fraction = mul_div_up(rate, backup_addition, principal_removed)?;
            div_wad_down(position_assets, add(WAD, fraction)?)?
        } else {
            position_assets
        };
        if assets_discounted < min_assets_required {
            return Err(MarketError::Disagreement {
                limit: min_assets_required,
                actual: assets_discounted,
            });
        }

        self.increase_backup_borrowed(backup_addition)?;
        self.backup.check_solvent()?;

        let discount = position_assets - assets_discounted;
        let net_fee = self.charge_treasury_fee(discount)?;
        let (to_unassigned, to_accumulator) = pool.distribute_earnings(net_fee, assets_discounted)?;
        pool.unassigned_earnings = add(pool.unassigned_earnings, to_unassigned)?;
        self.pools.insert(maturity, pool);
        self.accumulator.collect(to_accumulator)?;

        let remaining = position.reduce_proportionally(position_assets)?;
        self.positions.set(Side::Deposit, owner, maturity, remaining);

        info!(
            "withdraw_at_maturity: {} withdrew {} of {} at {} (backup addition {})",
            owner, assets_discounted, position_assets, maturity, backup_addition
        );
        let transfers = vec![Transfer::Out {
            asset: self.params.asset.clone(),
            to: receiver.clone(),
            amount: assets_discounted,
        }];
        Ok((
            WithdrawAtMaturity {
                maturity,
                position_assets,
                principal_removed,
                assets_discounted,
                discount,
                treasury_fee: discount - net_fee,
                to_unassigned,
                to_accumulator,
                backup_addition,
                accrual,
            },
            transfers,
        ))
    }

    /// Position value a deposit of `assets` would get at `maturity`
    pub(crate) fn preview_deposit_at_maturity(
        &mut self,
        env: &Env,
        maturity: Maturity,
        assets: Amount,
    ) -> Result<Amount> {
        self.check_pool_state(maturity, env.now, OPEN)?;
        self.settle_floating(env)?;
        self.accrue_pool(maturity, env.now)?;
        let (fee, _) = self
            .pool(maturity)
            .deposit_share(assets, self.params.backup_fee_rate)?;
        Ok(add(assets, fee)?)
    }

    /// Total owed at maturity for borrowing `assets`
    pub(crate) fn preview_borrow_at_maturity(
        &mut self,
        env: &Env,
        maturity: Maturity,
        assets: Amount,
    ) -> Result<Amount> {
        self.check_pool_state(maturity, env.now, OPEN)?;
        self.settle_floating(env)?;
        self.accrue_pool(maturity, env.now)?;
        let quote = self.quote_borrow(env, maturity, assets)?;
        Ok(add(assets, quote.fee)?)
    }
}
