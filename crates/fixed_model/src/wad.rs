//! WAD fixed-point arithmetic
//!
//! Amounts and fractions carry 18 decimals. Products are formed in 256 bits
//! so `a * b / d` never overflows before the division.

use crate::MathError;

uint::construct_uint! {
    /// 256-bit intermediate for mul-div
    pub struct U256(4);
}

/// One unit (1e18)
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// ln(2) scaled by WAD
pub const LN2_WAD: u128 = 693_147_180_559_945_309;

/// Above this exponent `exp(-x)` is below one wei
const EXP_NEG_CUTOFF: u128 = 41 * WAD;

#[inline]
fn narrow(value: U256) -> Result<u128, MathError> {
    if value > U256::from(u128::MAX) {
        Err(MathError::Overflow)
    } else {
        Ok(value.as_u128())
    }
}

/// `floor(a * b / d)`
pub fn mul_div_down(a: u128, b: u128, d: u128) -> Result<u128, MathError> {
    if d == 0 {
        return Err(MathError::DivisionByZero);
    }
    narrow(U256::from(a) * U256::from(b) / U256::from(d))
}

/// `ceil(a * b / d)`
pub fn mul_div_up(a: u128, b: u128, d: u128) -> Result<u128, MathError> {
    if d == 0 {
        return Err(MathError::DivisionByZero);
    }
    let product = U256::from(a) * U256::from(b);
    let denominator = U256::from(d);
    let mut quotient = product / denominator;
    if !(product % denominator).is_zero() {
        quotient = quotient + U256::one();
    }
    narrow(quotient)
}

#[inline]
pub fn mul_wad_down(a: u128, b: u128) -> Result<u128, MathError> {
    mul_div_down(a, b, WAD)
}

#[inline]
pub fn mul_wad_up(a: u128, b: u128) -> Result<u128, MathError> {
    mul_div_up(a, b, WAD)
}

#[inline]
pub fn div_wad_down(a: u128, b: u128) -> Result<u128, MathError> {
    mul_div_down(a, WAD, b)
}

#[inline]
pub fn div_wad_up(a: u128, b: u128) -> Result<u128, MathError> {
    mul_div_up(a, WAD, b)
}

/// `exp(-x)` for a WAD-scaled `x`, WAD-scaled result.
///
/// Range reduction `x = k * ln2 + r` with `0 <= r < ln2`, then
/// `exp(-x) = 2^-k / exp(r)` with `exp(r)` from its Taylor series.
pub fn exp_neg_wad(x: u128) -> Result<u128, MathError> {
    if x == 0 {
        return Ok(WAD);
    }
    if x >= EXP_NEG_CUTOFF {
        return Ok(0);
    }

    let k = x / LN2_WAD;
    let r = x - k * LN2_WAD;

    let mut sum = WAD;
    let mut term = WAD;
    let mut i: u128 = 1;
    while term != 0 {
        term = mul_div_down(term, r, WAD * i)?;
        sum = sum.checked_add(term).ok_or(MathError::Overflow)?;
        i += 1;
    }

    let exp_neg_r = mul_div_down(WAD, WAD, sum)?;
    Ok(exp_neg_r >> (k as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(actual: u128, expected: u128, tolerance: u128) -> bool {
        actual.abs_diff(expected) <= tolerance
    }

    #[test]
    fn test_mul_div_rounding() {
        assert_eq!(mul_div_down(10, 1, 3), Ok(3));
        assert_eq!(mul_div_up(10, 1, 3), Ok(4));
        assert_eq!(mul_div_up(9, 1, 3), Ok(3));
        assert_eq!(mul_div_down(1, 1, 0), Err(MathError::DivisionByZero));
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // u128::MAX * 2 overflows 128 bits but the quotient fits
        assert_eq!(mul_div_down(u128::MAX, 2, 4), Ok(u128::MAX / 2));
        assert_eq!(mul_div_down(u128::MAX, 2, 1), Err(MathError::Overflow));
    }

    #[test]
    fn test_wad_helpers() {
        assert_eq!(mul_wad_down(3 * WAD, WAD / 2), Ok(3 * WAD / 2));
        assert_eq!(div_wad_down(WAD, 4 * WAD), Ok(WAD / 4));
        assert_eq!(div_wad_up(1, 3 * WAD), Ok(1));
        assert_eq!(mul_wad_down(1, 1), Ok(0));
        assert_eq!(mul_wad_up(1, 1), Ok(1));
    }

    #[test]
    fn test_exp_neg_known_values() {
        assert_eq!(exp_neg_wad(0), Ok(WAD));
        // e^-1 = 0.367879441171442321...
        assert!(close(exp_neg_wad(WAD).unwrap(), 367_879_441_171_442_321, 1_000));
        // e^-0.5 = 0.606530659712633423...
        assert!(close(exp_neg_wad(WAD / 2).unwrap(), 606_530_659_712_633_423, 1_000));
        // e^-ln2 = 0.5
        assert!(close(exp_neg_wad(LN2_WAD).unwrap(), WAD / 2, 1_000));
        // e^-10 = 0.0000453999297624848...
        assert!(close(exp_neg_wad(10 * WAD).unwrap(), 45_399_929_762_484, 1_000));
    }

    #[test]
    fn test_exp_neg_cutoff_and_monotonic() {
        assert_eq!(exp_neg_wad(41 * WAD), Ok(0));
        assert_eq!(exp_neg_wad(u128::MAX), Ok(0));

        let mut previous = WAD;
        for step in 1..200u128 {
            let value = exp_neg_wad(step * WAD / 10).unwrap();
            assert!(value <= previous);
            previous = value;
        }
    }
}
