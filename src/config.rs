//! Market configuration
//!
//! `MarketConfig` is the human-facing TOML form with decimal fractions.
//! `MarketParams` is the validated WAD form the engine runs on.

use std::path::{Path, PathBuf};

use fixed_model::WAD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{MarketError, Result};
use crate::rate_model::{Curve, CurveRateModel};
use crate::types::{AccountId, AssetId, Fraction};

const DAY: u128 = 86_400;

/// Upper bounds enforced on every parameter change
pub const MAX_BACKUP_FEE_RATE: Fraction = WAD;
pub const MAX_PENALTY_RATE: Fraction = WAD / 10_000;
pub const MAX_RESERVE_FACTOR: Fraction = WAD * 9 / 10;
pub const MAX_TREASURY_FEE_RATE: Fraction = WAD / 10;
pub const MAX_SMOOTH_FACTOR: Fraction = 4 * WAD;
pub const MAX_FUTURE_POOLS: u8 = 224;
pub const MAX_DAMP_SPEED: Fraction = WAD;
pub const MAX_TOTAL_INCENTIVE: Fraction = WAD / 4;

/// Per-second speeds of the damped averages; `up` applies when the current
/// value is above the average
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DampSpeed {
    pub up: Fraction,
    pub down: Fraction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiquidationIncentive {
    /// Bonus collateral paid to the liquidator
    pub liquidator: Fraction,
    /// Extra repay routed to the earnings accumulator
    pub lenders: Fraction,
}

/// Validated market parameters, WAD-scaled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketParams {
    /// Asset lent and borrowed in this market
    pub asset: AssetId,
    pub max_future_pools: u8,
    pub smooth_factor: Fraction,
    /// Late-repay penalty per second
    pub penalty_rate: Fraction,
    pub backup_fee_rate: Fraction,
    pub reserve_factor: Fraction,
    pub treasury_fee_rate: Fraction,
    pub treasury: Option<AccountId>,
    pub assets_damp: DampSpeed,
    pub utilization_damp: DampSpeed,
    pub fixed_borrow_threshold: Fraction,
    pub min_threshold_factor: Fraction,
    pub incentive: LiquidationIncentive,
}

fn invalid(name: &'static str, reason: impl Into<String>) -> MarketError {
    MarketError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

fn at_most(name: &'static str, value: Fraction, max: Fraction) -> Result<()> {
    if value > max {
        return Err(invalid(name, format!("{value} exceeds maximum {max}")));
    }
    Ok(())
}

pub fn validate_backup_fee_rate(value: Fraction) -> Result<()> {
    at_most("backup_fee_rate", value, MAX_BACKUP_FEE_RATE)
}

pub fn validate_penalty_rate(value: Fraction) -> Result<()> {
    at_most("penalty_rate", value, MAX_PENALTY_RATE)
}

pub fn validate_reserve_factor(value: Fraction) -> Result<()> {
    at_most("reserve_factor", value, MAX_RESERVE_FACTOR)
}

pub fn validate_treasury_fee_rate(value: Fraction) -> Result<()> {
    at_most("treasury_fee_rate", value, MAX_TREASURY_FEE_RATE)
}

pub fn validate_smooth_factor(value: Fraction) -> Result<()> {
    at_most("smooth_factor", value, MAX_SMOOTH_FACTOR)
}

pub fn validate_max_future_pools(value: u8) -> Result<()> {
    if value == 0 || value > MAX_FUTURE_POOLS {
        return Err(invalid(
            "max_future_pools",
            format!("{value} outside 1..={MAX_FUTURE_POOLS}"),
        ));
    }
    Ok(())
}

pub fn validate_damp_speed(name: &'static str, speed: DampSpeed) -> Result<()> {
    at_most(name, speed.up, MAX_DAMP_SPEED)?;
    at_most(name, speed.down, MAX_DAMP_SPEED)
}

pub fn validate_fixed_borrow_threshold(threshold: Fraction, min_factor: Fraction) -> Result<()> {
    if min_factor == 0 {
        return Err(invalid("min_threshold_factor", "must be positive"));
    }
    if min_factor > threshold {
        return Err(invalid(
            "min_threshold_factor",
            format!("{min_factor} exceeds fixed_borrow_threshold {threshold}"),
        ));
    }
    at_most("fixed_borrow_threshold", threshold, WAD)
}

pub fn validate_incentive(incentive: LiquidationIncentive) -> Result<()> {
    let total = incentive
        .liquidator
        .checked_add(incentive.lenders)
        .ok_or_else(|| invalid("liquidation_incentive", "overflow"))?;
    at_most("liquidation_incentive", total, MAX_TOTAL_INCENTIVE)
}

pub fn validate_adjust_factor(value: Fraction) -> Result<()> {
    if value == 0 || value > WAD {
        return Err(invalid("adjust_factor", format!("{value} outside (0, 1]")));
    }
    Ok(())
}

impl MarketParams {
    /// Check every bound; the first violation is returned
    pub fn validate(&self) -> Result<()> {
        validate_max_future_pools(self.max_future_pools)?;
        validate_smooth_factor(self.smooth_factor)?;
        validate_penalty_rate(self.penalty_rate)?;
        validate_backup_fee_rate(self.backup_fee_rate)?;
        validate_reserve_factor(self.reserve_factor)?;
        validate_treasury_fee_rate(self.treasury_fee_rate)?;
        if self.treasury_fee_rate > 0 && self.treasury.is_none() {
            return Err(invalid("treasury", "required when treasury_fee_rate is set"));
        }
        validate_damp_speed("damp_speed", self.assets_damp)?;
        validate_damp_speed("utilization_damp_speed", self.utilization_damp)?;
        validate_fixed_borrow_threshold(self.fixed_borrow_threshold, self.min_threshold_factor)?;
        validate_incentive(self.incentive)
    }
}

// ============================================================================
// TOML form
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] MarketError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DampSpeedConfig {
    pub up: f64,
    pub down: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IncentiveConfig {
    pub liquidator: f64,
    pub lenders: f64,
}

/// `a / (max_utilization - u) + b`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveConfig {
    pub a: f64,
    pub b: f64,
    pub max_utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarketConfig {
    pub asset: String,
    pub max_future_pools: u8,
    pub earnings_accumulator_smooth_factor: f64,
    pub penalty_rate_per_day: f64,
    pub backup_fee_rate: f64,
    pub reserve_factor: f64,
    pub treasury_fee_rate: f64,
    pub treasury: Option<String>,
    pub damp_speed: DampSpeedConfig,
    pub utilization_damp_speed: DampSpeedConfig,
    pub fixed_borrow_threshold: f64,
    pub min_threshold_factor: f64,
    pub liquidation_incentive: IncentiveConfig,
    pub fixed_curve: CurveConfig,
    pub floating_curve: CurveConfig,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            asset: "USDC".to_string(),
            max_future_pools: 6,
            earnings_accumulator_smooth_factor: 2.0,
            penalty_rate_per_day: 0.02,
            backup_fee_rate: 0.1,
            reserve_factor: 0.1,
            treasury_fee_rate: 0.0,
            treasury: None,
            damp_speed: DampSpeedConfig { up: 0.0046, down: 0.42 },
            utilization_damp_speed: DampSpeedConfig { up: 0.0046, down: 0.42 },
            fixed_borrow_threshold: 0.6,
            min_threshold_factor: 0.25,
            liquidation_incentive: IncentiveConfig { liquidator: 0.09, lenders: 0.01 },
            fixed_curve: CurveConfig { a: 0.023, b: -0.0025, max_utilization: 1.02 },
            floating_curve: CurveConfig { a: 0.023, b: -0.0025, max_utilization: 1.02 },
        }
    }
}

/// Decimal to WAD, keeping nine decimal places
pub fn to_wad(name: &'static str, value: f64) -> Result<u128> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(name, format!("{value} is not a non-negative number")));
    }
    let nanos = (value * 1e9).round();
    if nanos >= (u128::MAX / 1_000_000_000) as f64 {
        return Err(invalid(name, format!("{value} is too large")));
    }
    Ok(nanos as u128 * 1_000_000_000)
}

fn to_signed_wad(name: &'static str, value: f64) -> Result<i128> {
    let magnitude = to_wad(name, value.abs())?;
    let magnitude = i128::try_from(magnitude).map_err(|_| invalid(name, "too large"))?;
    Ok(if value < 0.0 { -magnitude } else { magnitude })
}

impl CurveConfig {
    pub fn curve(&self, name: &'static str) -> Result<Curve> {
        let curve = Curve {
            a: to_wad(name, self.a)?,
            b: to_signed_wad(name, self.b)?,
            max_utilization: to_wad(name, self.max_utilization)?,
        };
        if curve.max_utilization <= WAD {
            return Err(invalid(name, "max_utilization must exceed 1"));
        }
        Ok(curve)
    }
}

impl MarketConfig {
    pub fn from_toml_str(source: &str) -> std::result::Result<Self, ConfigError> {
        let config: MarketConfig = toml::from_str(source)?;
        config.params()?;
        config.rate_model()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn params(&self) -> Result<MarketParams> {
        let penalty_per_day = to_wad("penalty_rate_per_day", self.penalty_rate_per_day)?;
        let params = MarketParams {
            asset: AssetId::new(self.asset.clone()),
            max_future_pools: self.max_future_pools,
            smooth_factor: to_wad(
                "earnings_accumulator_smooth_factor",
                self.earnings_accumulator_smooth_factor,
            )?,
            penalty_rate: penalty_per_day / DAY,
            backup_fee_rate: to_wad("backup_fee_rate", self.backup_fee_rate)?,
            reserve_factor: to_wad("reserve_factor", self.reserve_factor)?,
            treasury_fee_rate: to_wad("treasury_fee_rate", self.treasury_fee_rate)?,
            treasury: self.treasury.clone().map(AccountId::new),
            assets_damp: DampSpeed {
                up: to_wad("damp_speed", self.damp_speed.up)?,
                down: to_wad("damp_speed", self.damp_speed.down)?,
            },
            utilization_damp: DampSpeed {
                up: to_wad("utilization_damp_speed", self.utilization_damp_speed.up)?,
                down: to_wad("utilization_damp_speed", self.utilization_damp_speed.down)?,
            },
            fixed_borrow_threshold: to_wad("fixed_borrow_threshold", self.fixed_borrow_threshold)?,
            min_threshold_factor: to_wad("min_threshold_factor", self.min_threshold_factor)?,
            incentive: LiquidationIncentive {
                liquidator: to_wad("liquidation_incentive", self.liquidation_incentive.liquidator)?,
                lenders: to_wad("liquidation_incentive", self.liquidation_incentive.lenders)?,
            },
        };
        params.validate()?;
        Ok(params)
    }

    pub fn rate_model(&self) -> Result<CurveRateModel> {
        Ok(CurveRateModel {
            fixed: self.fixed_curve.curve("fixed_curve")?,
            floating: self.floating_curve.curve("floating_curve")?,
        })
    }
}
