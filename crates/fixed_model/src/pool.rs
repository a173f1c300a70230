//! Per-maturity pool aggregate and fixed positions
//!
//! A `FixedPool` tracks what was lent and borrowed at one maturity plus the
//! fee income not yet attributed to anyone. That income decays linearly into
//! the backup pool until maturity.

use crate::maturity::INTERVAL;
use crate::wad::{mul_div_down, mul_wad_down};
use crate::{add, sub, MathError};

/// Aggregate ledger for one maturity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FixedPool {
    /// Principal borrowed at this maturity
    pub borrowed: u128,
    /// Principal deposited at this maturity
    pub supplied: u128,
    /// Fee income not yet accrued to the backup pool
    pub unassigned_earnings: u128,
    /// Last time `unassigned_earnings` was accrued (never past maturity)
    pub last_accrual: u64,
}

/// Result of one accrual step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Accrual {
    /// Earnings released to backup-pool assets
    pub earnings: u128,
    /// Residual swept from a pool left untouched a full interval past maturity
    pub stale: u128,
}

impl FixedPool {
    /// Principal of this maturity financed by the backup pool
    #[inline]
    pub fn backup_supplied(&self) -> u128 {
        self.borrowed - self.borrowed.min(self.supplied)
    }

    /// Accrue unassigned earnings linearly from `last_accrual` to
    /// `min(now, maturity)`.
    ///
    /// At or past maturity the first accrual releases the full remainder. A
    /// pool still holding earnings one `INTERVAL` after maturity returns them
    /// as `stale` instead.
    pub fn accrue_earnings(&mut self, maturity: u64, now: u64) -> Result<Accrual, MathError> {
        if self.unassigned_earnings > 0 && now >= maturity.saturating_add(INTERVAL) {
            let stale = self.unassigned_earnings;
            self.unassigned_earnings = 0;
            self.last_accrual = maturity;
            return Ok(Accrual { earnings: 0, stale });
        }

        let until = now.min(maturity);
        let last = self.last_accrual;
        if until <= last {
            return Ok(Accrual::default());
        }

        let elapsed = (until - last) as u128;
        let span = (maturity - last) as u128;
        let earnings = mul_div_down(self.unassigned_earnings, elapsed, span)?;

        self.unassigned_earnings -= earnings;
        self.last_accrual = until;
        Ok(Accrual { earnings, stale: 0 })
    }

    /// Register a borrow; returns the principal newly drawn from the backup pool
    pub fn borrow(&mut self, amount: u128) -> Result<u128, MathError> {
        let new_borrowed = add(self.borrowed, amount)?;
        let covered = self.borrowed.max(self.supplied).min(new_borrowed);
        self.borrowed = new_borrowed;
        Ok(new_borrowed - covered)
    }

    /// Register a deposit; returns the backup principal it replaces
    pub fn deposit(&mut self, amount: u128) -> Result<u128, MathError> {
        let reduction = self.backup_supplied().min(amount);
        self.supplied = add(self.supplied, amount)?;
        Ok(reduction)
    }

    /// Register a repayment of `amount` principal; returns the backup
    /// principal it gives back
    pub fn repay(&mut self, amount: u128) -> Result<u128, MathError> {
        let reduction = self.backup_supplied().min(amount);
        self.borrowed = sub(self.borrowed, amount)?;
        Ok(reduction)
    }

    /// Register a withdrawal of `amount` principal; returns the principal the
    /// backup pool has to start financing
    pub fn withdraw(&mut self, amount: u128) -> Result<u128, MathError> {
        let new_supplied = sub(self.supplied, amount)?;
        let addition =
            self.supplied.min(self.borrowed) - new_supplied.min(self.borrowed);
        self.supplied = new_supplied;
        Ok(addition)
    }

    /// Share of unassigned earnings owed to `amount` of new supply, and the
    /// part of it kept as backup fee.
    ///
    /// `share = unassigned * amount / (amount + backup_supplied)`, zero when
    /// nothing is backup financed.
    pub fn deposit_share(
        &self,
        amount: u128,
        backup_fee_rate: u128,
    ) -> Result<(u128, u128), MathError> {
        let backup = self.backup_supplied();
        if backup == 0 || self.unassigned_earnings == 0 || amount == 0 {
            return Ok((0, 0));
        }
        let share = mul_div_down(self.unassigned_earnings, amount, add(amount, backup)?)?;
        let backup_fee = mul_wad_down(share, backup_fee_rate)?;
        Ok((share - backup_fee, backup_fee))
    }

    /// Split `earnings` charged on `amount` between this pool's unassigned
    /// earnings and the accumulator. Call on the pool after the borrow or
    /// withdraw was applied.
    ///
    /// Returns `(to_unassigned, to_accumulator)`.
    pub fn distribute_earnings(
        &self,
        earnings: u128,
        amount: u128,
    ) -> Result<(u128, u128), MathError> {
        if amount == 0 {
            return Ok((earnings, 0));
        }
        let backup = self.backup_supplied().min(amount);
        let to_accumulator = mul_div_down(earnings, amount - backup, amount)?;
        Ok((earnings - to_accumulator, to_accumulator))
    }
}

/// Fixed deposit or borrow held by one account at one maturity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    pub principal: u128,
    pub fee: u128,
}

impl Position {
    pub fn new(principal: u128, fee: u128) -> Self {
        Self { principal, fee }
    }

    #[inline]
    pub fn total(&self) -> Result<u128, MathError> {
        add(self.principal, self.fee)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.principal == 0 && self.fee == 0
    }

    /// The slice of this position worth `amount` in total assets
    pub fn scale_proportionally(&self, amount: u128) -> Result<Position, MathError> {
        let total = self.total()?;
        if total == 0 {
            return Ok(Position::default());
        }
        let principal = mul_div_down(amount, self.principal, total)?;
        Ok(Position {
            principal,
            fee: sub(amount, principal)?,
        })
    }

    /// Remove `amount` total assets, keeping the principal/fee ratio
    pub fn reduce_proportionally(&self, amount: u128) -> Result<Position, MathError> {
        let total = self.total()?;
        let remaining = sub(total, amount)?;
        if remaining == 0 {
            return Ok(Position::default());
        }
        let principal = mul_div_down(remaining, self.principal, total)?;
        Ok(Position {
            principal,
            fee: remaining - principal,
        })
    }

    pub fn add(&self, principal: u128, fee: u128) -> Result<Position, MathError> {
        Ok(Position {
            principal: add(self.principal, principal)?,
            fee: add(self.fee, fee)?,
        })
    }
}
