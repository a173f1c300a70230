//! Floating-rate transitions and collateral movements

use fixed_model::{add, sub};
use log::info;
use serde::Serialize;

use crate::custody::Transfer;
use crate::error::{MarketError, Result};
use crate::state::{adjust_factor, Env, MarketState};
use crate::types::{AccountId, Amount, AssetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FloatingDeposit {
    pub assets: Amount,
    pub shares: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FloatingWithdraw {
    pub assets: Amount,
    pub shares: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FloatingBorrow {
    pub assets: Amount,
    pub borrow_shares: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FloatingRepay {
    /// Assets actually taken from the payer
    pub assets: Amount,
    pub remaining_debt: Amount,
}

impl MarketState {
    pub fn deposit(
        &mut self,
        env: &Env,
        assets: Amount,
        depositor: &AccountId,
        receiver: &AccountId,
    ) -> Result<(FloatingDeposit, Vec<Transfer>)> {
        if assets == 0 {
            return Err(MarketError::ZeroDeposit);
        }
        self.settle_shares(env)?;

        let shares = self.backup.preview_deposit(assets)?;
        if shares == 0 {
            return Err(MarketError::ZeroDeposit);
        }
        self.backup.mint(receiver, shares)?;
        self.backup.assets = add(self.backup.assets, assets)?;

        info!("deposit: {} deposited {} for {} shares", receiver, assets, shares);
        let transfers = vec![Transfer::In {
            asset: self.params.asset.clone(),
            from: depositor.clone(),
            amount: assets,
        }];
        Ok((FloatingDeposit { assets, shares }, transfers))
    }

    pub fn withdraw(
        &mut self,
        env: &Env,
        assets: Amount,
        receiver: &AccountId,
        owner: &AccountId,
    ) -> Result<(FloatingWithdraw, Vec<Transfer>)> {
        if assets == 0 {
            return Err(MarketError::ZeroWithdraw);
        }
        self.settle_shares(env)?;

        let shares = self.backup.preview_withdraw(assets)?;
        self.backup.burn(owner, shares)?;
        self.backup.assets = sub(self.backup.assets, assets)?;
        self.backup.check_solvent()?;
        self.check_liquidity(owner, env)?;

        info!("withdraw: {} withdrew {} burning {} shares", owner, assets, shares);
        let transfers = vec![Transfer::Out {
            asset: self.params.asset.clone(),
            to: receiver.clone(),
            amount: assets,
        }];
        Ok((FloatingWithdraw { assets, shares }, transfers))
    }

    pub fn borrow(
        &mut self,
        env: &Env,
        assets: Amount,
        borrower: &AccountId,
        receiver: &AccountId,
    ) -> Result<(FloatingBorrow, Vec<Transfer>)> {
        if assets == 0 {
            return Err(MarketError::ZeroBorrow);
        }
        self.settle_floating(env)?;

        self.backup.check_reserve(assets, self.params.reserve_factor)?;
        let borrow_shares = self.backup.preview_borrow(assets)?;
        self.backup.mint_borrow_shares(borrower, borrow_shares)?;
        self.backup.debt = add(self.backup.debt, assets)?;
        self.check_liquidity(borrower, env)?;

        info!("borrow: {} borrowed {} floating", borrower, assets);
        let transfers = vec![Transfer::Out {
            asset: self.params.asset.clone(),
            to: receiver.clone(),
            amount: assets,
        }];
        Ok((FloatingBorrow { assets, borrow_shares }, transfers))
    }

    pub fn repay(
        &mut self,
        env: &Env,
        assets: Amount,
        payer: &AccountId,
        borrower: &AccountId,
    ) -> Result<(FloatingRepay, Vec<Transfer>)> {
        if assets == 0 {
            return Err(MarketError::ZeroRepay);
        }
        self.settle_floating(env)?;
        if self.backup.borrow_shares_of(borrower) == 0 {
            return Err(MarketError::ZeroRepay);
        }

        let repaid = self.backup.repay_floating(borrower, assets)?;
        let remaining_debt = self.backup.debt_of(borrower)?;

        info!("repay: {} repaid {} floating ({} left)", borrower, repaid, remaining_debt);
        let transfers = vec![Transfer::In {
            asset: self.params.asset.clone(),
            from: payer.clone(),
            amount: repaid,
        }];
        Ok((
            FloatingRepay {
                assets: repaid,
                remaining_debt,
            },
            transfers,
        ))
    }

    /// Post an external asset as collateral
    pub fn deposit_collateral(
        &mut self,
        env: &Env,
        asset: &AssetId,
        amount: Amount,
        account: &AccountId,
    ) -> Result<Vec<Transfer>> {
        if amount == 0 {
            return Err(MarketError::ZeroDeposit);
        }
        if *asset == self.params.asset {
            return Err(MarketError::InvalidParameter {
                name: "asset",
                reason: format!("{asset} is the market asset; deposit it into the backup pool"),
            });
        }
        env.oracle.price_of(asset)?;
        adjust_factor(env.oracle, asset)?;
        self.collateral.deposit(account, asset, amount)?;

        info!("deposit_collateral: {} posted {} {}", account, amount, asset);
        Ok(vec![Transfer::In {
            asset: asset.clone(),
            from: account.clone(),
            amount,
        }])
    }

    pub fn withdraw_collateral(
        &mut self,
        env: &Env,
        asset: &AssetId,
        amount: Amount,
        account: &AccountId,
        receiver: &AccountId,
    ) -> Result<Vec<Transfer>> {
        if amount == 0 {
            return Err(MarketError::ZeroWithdraw);
        }
        self.settle_floating(env)?;
        self.collateral.withdraw(account, asset, amount)?;
        self.check_liquidity(account, env)?;

        info!("withdraw_collateral: {} took back {} {}", account, amount, asset);
        Ok(vec![Transfer::Out {
            asset: asset.clone(),
            to: receiver.clone(),
            amount,
        }])
    }
}
