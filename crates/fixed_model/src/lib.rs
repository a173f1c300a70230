//! Fixed Model - pure maturity-pool math
//!
//! This crate contains the arithmetic the market engine builds on:
//! - WAD fixed-point helpers with 256-bit intermediates
//! - The per-maturity pool aggregate and its time-proportional accrual
//! - Position scaling for partial repay/withdraw
//! - Maturity alignment and pool-state classification
//!
//! No allocation, no panics: every fallible operation returns `MathError`.

#![no_std]

pub mod maturity;
pub mod pool;
pub mod wad;

pub use maturity::{
    interval_start, intervals_ahead, open_maturities, pool_state, PoolState, INTERVAL, YEAR,
};
pub use pool::{Accrual, FixedPool, Position};
pub use wad::*;

/// Arithmetic failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MathError {
    /// Result does not fit in 128 bits
    Overflow,
    /// Subtraction below zero
    Underflow,
    /// Denominator was zero
    DivisionByZero,
}

impl core::fmt::Display for MathError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MathError::Overflow => f.write_str("arithmetic overflow"),
            MathError::Underflow => f.write_str("arithmetic underflow"),
            MathError::DivisionByZero => f.write_str("division by zero"),
        }
    }
}

/// Checked subtraction mapped to `MathError::Underflow`
#[inline]
pub fn sub(a: u128, b: u128) -> Result<u128, MathError> {
    a.checked_sub(b).ok_or(MathError::Underflow)
}

/// Checked addition mapped to `MathError::Overflow`
#[inline]
pub fn add(a: u128, b: u128) -> Result<u128, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow)
}
