//! Interest rate curves
//!
//! The engine only consumes the `RateModel` trait. `CurveRateModel` is the
//! hyperbolic curve `a / (max_utilization - u) + b` used for both the fixed
//! and the floating side.

use fixed_model::{div_wad_down, mul_div_up, MathError, WAD, YEAR};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Amount, Fraction, Maturity};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateError {
    #[error("utilization {utilization} at or above curve maximum {max}")]
    UtilizationExceeded { utilization: Fraction, max: Fraction },

    #[error("curve yields a negative rate at utilization {0}")]
    NegativeRate(Fraction),

    #[error("rate arithmetic: {0}")]
    Math(MathError),
}

impl From<MathError> for RateError {
    fn from(err: MathError) -> Self {
        RateError::Math(err)
    }
}

/// Utilization snapshot handed to the rate model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UtilizationState {
    /// Backup supply of the maturity after the operation, relative to the
    /// per-pool share of the smoothed backup assets
    pub fixed_utilization: Fraction,
    /// Floating debt over backup assets
    pub floating_utilization: Fraction,
    /// `(debt + backup_borrowed) / assets`
    pub global_utilization: Fraction,
    /// Smoothed backup assets
    pub assets_average: Amount,
    pub max_future_pools: u8,
}

pub trait RateModel {
    /// Fee fraction owed for the remaining term of `maturity`
    ///
    /// # Arguments
    /// * `maturity` - Target maturity
    /// * `time_to_maturity` - Seconds until maturity
    /// * `state` - Utilization after the operation is applied
    fn fixed_rate(
        &self,
        maturity: Maturity,
        time_to_maturity: u64,
        state: &UtilizationState,
    ) -> Result<Fraction, RateError>;

    /// Yearly floating rate at `utilization`
    fn floating_rate(&self, utilization: Fraction) -> Result<Fraction, RateError>;
}

/// `rate(u) = a / (max_utilization - u) + b`, yearly, WAD-scaled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Curve {
    pub a: u128,
    pub b: i128,
    pub max_utilization: Fraction,
}

impl Curve {
    pub fn rate(&self, utilization: Fraction) -> Result<Fraction, RateError> {
        if utilization >= self.max_utilization {
            return Err(RateError::UtilizationExceeded {
                utilization,
                max: self.max_utilization,
            });
        }
        let base = div_wad_down(self.a, self.max_utilization - utilization)?;
        let base = i128::try_from(base).map_err(|_| MathError::Overflow)?;
        let rate = base.checked_add(self.b).ok_or(MathError::Overflow)?;
        if rate < 0 {
            return Err(RateError::NegativeRate(utilization));
        }
        Ok(rate as u128)
    }
}

/// Fixed and floating curves; the fixed rate is prorated by the term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveRateModel {
    pub fixed: Curve,
    pub floating: Curve,
}

impl RateModel for CurveRateModel {
    fn fixed_rate(
        &self,
        _maturity: Maturity,
        time_to_maturity: u64,
        state: &UtilizationState,
    ) -> Result<Fraction, RateError> {
        let yearly = self.fixed.rate(state.fixed_utilization)?;
        Ok(mul_div_up(yearly, time_to_maturity as u128, YEAR as u128)?)
    }

    fn floating_rate(&self, utilization: Fraction) -> Result<Fraction, RateError> {
        self.floating.rate(utilization)
    }
}

/// Same yearly rate regardless of utilization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRateModel {
    pub fixed_yearly: Fraction,
    pub floating_yearly: Fraction,
}

impl RateModel for FlatRateModel {
    fn fixed_rate(
        &self,
        _maturity: Maturity,
        time_to_maturity: u64,
        _state: &UtilizationState,
    ) -> Result<Fraction, RateError> {
        Ok(mul_div_up(self.fixed_yearly, time_to_maturity as u128, YEAR as u128)?)
    }

    fn floating_rate(&self, _utilization: Fraction) -> Result<Fraction, RateError> {
        Ok(self.floating_yearly)
    }
}

/// Fee fraction for the whole term, ignoring its length.
///
/// Useful when a scenario quotes "5% for this maturity".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRateModel {
    pub fixed_term: Fraction,
    pub floating_yearly: Fraction,
}

impl RateModel for TermRateModel {
    fn fixed_rate(
        &self,
        _maturity: Maturity,
        _time_to_maturity: u64,
        _state: &UtilizationState,
    ) -> Result<Fraction, RateError> {
        Ok(self.fixed_term)
    }

    fn floating_rate(&self, _utilization: Fraction) -> Result<Fraction, RateError> {
        Ok(self.floating_yearly)
    }
}

impl<T: RateModel + ?Sized> RateModel for &T {
    fn fixed_rate(
        &self,
        maturity: Maturity,
        time_to_maturity: u64,
        state: &UtilizationState,
    ) -> Result<Fraction, RateError> {
        (**self).fixed_rate(maturity, time_to_maturity, state)
    }

    fn floating_rate(&self, utilization: Fraction) -> Result<Fraction, RateError> {
        (**self).floating_rate(utilization)
    }
}

/// 1% expressed as a WAD fraction
pub const PERCENT: Fraction = WAD / 100;
