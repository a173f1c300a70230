//! Engine error taxonomy

use fixed_model::{MathError, PoolState};
use thiserror::Error;

use crate::custody::CustodyError;
use crate::oracle::OracleError;
use crate::rate_model::RateError;
use crate::types::{Amount, AssetId, Timestamp};

/// Errors returned by market operations.
///
/// Every error is raised before the operation commits; a failed call leaves
/// the market exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    /// Caller's slippage bound was violated
    #[error("slippage bound {limit} violated by {actual}")]
    Disagreement { limit: Amount, actual: Amount },

    /// The backup pool cannot fund the operation
    #[error("insufficient protocol liquidity")]
    InsufficientProtocolLiquidity,

    /// The account would be left with a shortfall
    #[error("insufficient account liquidity")]
    InsufficientAccountLiquidity,

    /// Maturity is not in a state the operation accepts
    #[error("maturity {maturity} is {observed:?}, expected one of {accepted:?}")]
    UnmatchedPoolState {
        maturity: u64,
        observed: PoolState,
        accepted: Vec<PoolState>,
    },

    /// Configuration value out of bounds
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("deposit amount is zero")]
    ZeroDeposit,

    #[error("withdraw amount is zero")]
    ZeroWithdraw,

    #[error("borrow amount is zero")]
    ZeroBorrow,

    #[error("repay amount is zero")]
    ZeroRepay,

    /// Account does not hold enough shares or collateral
    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("account cannot liquidate itself")]
    SelfLiquidation,

    /// Borrower is healthy
    #[error("account has no shortfall")]
    InsufficientShortfall,

    /// Seize target holds nothing while other collateral remains
    #[error("borrower holds no {0} to seize")]
    NothingToSeize(AssetId),

    #[error("clock cannot move backwards from {current} to {requested}")]
    ClockRewind {
        current: Timestamp,
        requested: Timestamp,
    },

    #[error("arithmetic error: {0}")]
    Math(MathError),

    #[error(transparent)]
    Rate(#[from] RateError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Custody(#[from] CustodyError),
}

impl From<MathError> for MarketError {
    fn from(err: MathError) -> Self {
        MarketError::Math(err)
    }
}

pub type Result<T> = core::result::Result<T, MarketError>;
