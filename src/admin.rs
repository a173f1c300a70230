//! Parameter setters
//!
//! Each setter validates first, then settles whatever the old value still
//! governs, then swaps the value in.

use log::info;

use crate::config::{
    validate_backup_fee_rate, validate_damp_speed, validate_fixed_borrow_threshold,
    validate_incentive, validate_max_future_pools, validate_penalty_rate, validate_reserve_factor,
    validate_smooth_factor, validate_treasury_fee_rate, DampSpeed, LiquidationIncentive,
};
use crate::error::{MarketError, Result};
use crate::state::{Env, MarketState};
use crate::types::{AccountId, Fraction};

impl MarketState {
    pub fn set_backup_fee_rate(&mut self, rate: Fraction) -> Result<()> {
        validate_backup_fee_rate(rate)?;
        self.params.backup_fee_rate = rate;
        info!("backup_fee_rate set to {}", rate);
        Ok(())
    }

    /// Per-second late-repay penalty
    pub fn set_penalty_rate(&mut self, rate: Fraction) -> Result<()> {
        validate_penalty_rate(rate)?;
        self.params.penalty_rate = rate;
        info!("penalty_rate set to {}", rate);
        Ok(())
    }

    pub fn set_reserve_factor(&mut self, factor: Fraction) -> Result<()> {
        validate_reserve_factor(factor)?;
        self.params.reserve_factor = factor;
        info!("reserve_factor set to {}", factor);
        Ok(())
    }

    /// Releases the accumulator under the old factor before switching
    pub fn set_smooth_factor(&mut self, env: &Env, factor: Fraction) -> Result<()> {
        validate_smooth_factor(factor)?;
        self.release_accumulator(env.now)?;
        self.params.smooth_factor = factor;
        info!("smooth_factor set to {}", factor);
        Ok(())
    }

    /// The pool count sets the accumulator horizon, so release under the old
    /// count first
    pub fn set_max_future_pools(&mut self, env: &Env, pools: u8) -> Result<()> {
        validate_max_future_pools(pools)?;
        self.release_accumulator(env.now)?;
        self.params.max_future_pools = pools;
        info!("max_future_pools set to {}", pools);
        Ok(())
    }

    /// Brings both averages up to date under the old speeds before switching
    pub fn set_damp_speeds(&mut self, env: &Env, assets: DampSpeed, utilization: DampSpeed) -> Result<()> {
        validate_damp_speed("damp_speed", assets)?;
        validate_damp_speed("utilization_damp_speed", utilization)?;
        self.backup.update_averages(env.now, &self.params)?;
        self.params.assets_damp = assets;
        self.params.utilization_damp = utilization;
        info!("damp speeds set to {:?} / {:?}", assets, utilization);
        Ok(())
    }

    /// Pays pending floating interest fees to the old treasury first
    pub fn set_treasury(&mut self, env: &Env, treasury: Option<AccountId>, fee_rate: Fraction) -> Result<()> {
        validate_treasury_fee_rate(fee_rate)?;
        if fee_rate > 0 && treasury.is_none() {
            return Err(MarketError::InvalidParameter {
                name: "treasury",
                reason: "required when treasury_fee_rate is set".to_string(),
            });
        }
        self.settle_floating(env)?;
        info!("treasury set to {:?} at rate {}", treasury, fee_rate);
        self.params.treasury = treasury;
        self.params.treasury_fee_rate = fee_rate;
        Ok(())
    }

    pub fn set_fixed_borrow_threshold(&mut self, threshold: Fraction, min_factor: Fraction) -> Result<()> {
        validate_fixed_borrow_threshold(threshold, min_factor)?;
        self.params.fixed_borrow_threshold = threshold;
        self.params.min_threshold_factor = min_factor;
        info!("fixed borrow threshold set to {} (min {})", threshold, min_factor);
        Ok(())
    }

    pub fn set_liquidation_incentive(&mut self, incentive: LiquidationIncentive) -> Result<()> {
        validate_incentive(incentive)?;
        self.params.incentive = incentive;
        info!("liquidation incentive set to {:?}", incentive);
        Ok(())
    }
}
