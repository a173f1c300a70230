//! Tenor - fixed-maturity lending ledger
//!
//! Accounts lend and borrow at discrete maturities with a rate fixed when the
//! position is opened. A floating-rate backup pool supplies liquidity to any
//! maturity whose own deposits fall short and earns the fees of what it
//! finances, accrued linearly until maturity. An earnings accumulator
//! smooths protocol skims, penalties and liquidation fees back into the
//! backup pool and absorbs bad debt.
//!
//! The engine guarantees:
//! 1. Every fee is routed to exactly one of: unassigned earnings, backup
//!    assets, the accumulator, the treasury or a depositor's position
//! 2. Operations fully commit or leave no trace, custody transfers included
//! 3. `backup_borrowed` always equals the backup supply summed over maturities
//! 4. A maturity whose borrowed side is cleared by liquidation keeps no
//!    unassigned earnings for late depositors to claim

pub mod accumulator;
pub mod admin;
pub mod auditor;
pub mod backup;
pub mod config;
pub mod custody;
pub mod error;
pub mod fixed;
pub mod floating;
pub mod liquidation;
pub mod market;
pub mod oracle;
pub mod positions;
pub mod rate_model;
pub mod state;
pub mod types;

pub use accumulator::EarningsAccumulator;
pub use auditor::{AccountLiquidity, CollateralBook, TARGET_HEALTH};
pub use backup::{BackupPool, DebtAccrual};
pub use config::{
    ConfigError, CurveConfig, DampSpeed, LiquidationIncentive, MarketConfig, MarketParams,
};
pub use custody::{Custody, CustodyError, InMemoryCustody, Transfer};
pub use error::{MarketError, Result};
pub use fixed::{BorrowAtMaturity, DepositAtMaturity, RepayAtMaturity, WithdrawAtMaturity};
pub use floating::{FloatingBorrow, FloatingDeposit, FloatingRepay, FloatingWithdraw};
pub use liquidation::{BadDebtClearing, Liquidation};
pub use market::{Market, SharedMarket};
pub use oracle::{Oracle, OracleError, StaticOracle};
pub use positions::PositionLedger;
pub use rate_model::{
    Curve, CurveRateModel, FlatRateModel, RateError, RateModel, TermRateModel, UtilizationState,
    PERCENT,
};
pub use state::{Env, MarketState};
pub use types::{AccountId, Amount, AssetId, Fraction, Maturity, Side, Timestamp};

pub use fixed_model::{
    interval_start, open_maturities, pool_state, Accrual, FixedPool, MathError, PoolState,
    Position, INTERVAL, WAD, YEAR,
};
