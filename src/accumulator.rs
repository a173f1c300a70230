//! Earnings accumulator
//!
//! Collects backup fees, late-repay penalties, liquidation lender fees and
//! the accumulator part of fixed fees, then releases them into backup assets
//! slowly enough that a deposit right before a release captures little of it.

use fixed_model::{add, mul_div_down, mul_wad_down, sub, INTERVAL};
use serde::Serialize;

use crate::error::Result;
use crate::types::{Amount, Fraction, Timestamp};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EarningsAccumulator {
    pub amount: Amount,
    pub last_accrual: Timestamp,
}

impl EarningsAccumulator {
    pub fn new(now: Timestamp) -> Self {
        Self {
            amount: 0,
            last_accrual: now,
        }
    }

    /// `amount * elapsed / (elapsed + smooth_factor * max_future_pools * INTERVAL)`
    pub fn preview_release(
        &self,
        now: Timestamp,
        smooth_factor: Fraction,
        max_future_pools: u8,
    ) -> Result<Amount> {
        let elapsed = now.saturating_sub(self.last_accrual) as u128;
        if elapsed == 0 || self.amount == 0 {
            return Ok(0);
        }
        let horizon = mul_wad_down(
            smooth_factor,
            max_future_pools as u128 * INTERVAL as u128,
        )?;
        Ok(mul_div_down(self.amount, elapsed, add(elapsed, horizon)?)?)
    }

    /// Take the released part out of the accumulator; the caller adds it to
    /// backup assets
    pub fn release(
        &mut self,
        now: Timestamp,
        smooth_factor: Fraction,
        max_future_pools: u8,
    ) -> Result<Amount> {
        let released = self.preview_release(now, smooth_factor, max_future_pools)?;
        self.amount -= released;
        self.last_accrual = self.last_accrual.max(now);
        Ok(released)
    }

    pub fn collect(&mut self, amount: Amount) -> Result<()> {
        self.amount = add(self.amount, amount)?;
        Ok(())
    }

    pub fn spend(&mut self, amount: Amount) -> Result<()> {
        self.amount = sub(self.amount, amount)?;
        Ok(())
    }
}
