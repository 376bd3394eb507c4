//! # Fixed-Point Helpers
//!
//! Share conversion multiplies two `u64` quantities before dividing, which
//! overflows `u64` long before real balances get interesting. Every such
//! product goes through [`mul_div`] with a `u128` intermediate. Results
//! round toward zero; the pool always keeps the dust.

use thiserror::Error;

use crate::config::PERCENT_DIVISOR;

/// Errors from checked arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MathError {
    /// The result does not fit the target width.
    #[error("arithmetic overflow")]
    Overflow,

    /// Denominator was zero.
    #[error("division by zero")]
    DivisionByZero,
}

/// Computes `value * numerator / denominator`, rounding down.
pub fn mul_div(value: u64, numerator: u64, denominator: u64) -> Result<u64, MathError> {
    let result = mul_div_u128(value as u128, numerator as u128, denominator as u128)?;
    u64::try_from(result).map_err(|_| MathError::Overflow)
}

/// Computes `value * numerator / denominator`, rounding up. Used where the
/// pool must not come out short, e.g. shares charged for a payout.
pub fn mul_div_ceil(value: u64, numerator: u64, denominator: u64) -> Result<u64, MathError> {
    if denominator == 0 {
        return Err(MathError::DivisionByZero);
    }
    let product = (value as u128)
        .checked_mul(numerator as u128)
        .ok_or(MathError::Overflow)?;
    let result = product.div_ceil(denominator as u128);
    u64::try_from(result).map_err(|_| MathError::Overflow)
}

/// [`mul_div`] over `u128` operands. Used for price-per-share, which is
/// scaled by 1e18 and does not fit `u64`.
pub fn mul_div_u128(value: u128, numerator: u128, denominator: u128) -> Result<u128, MathError> {
    if denominator == 0 {
        return Err(MathError::DivisionByZero);
    }
    let product = value.checked_mul(numerator).ok_or(MathError::Overflow)?;
    Ok(product / denominator)
}

/// Applies a basis-point rate: `amount * bps / 10_000`, rounding down.
pub fn bps_of(amount: u64, bps: u64) -> Result<u64, MathError> {
    mul_div(amount, bps, PERCENT_DIVISOR)
}

/// Checked subtraction that reports underflow as [`MathError::Overflow`].
pub fn checked_sub(a: u64, b: u64) -> Result<u64, MathError> {
    a.checked_sub(b).ok_or(MathError::Overflow)
}

/// Checked addition.
pub fn checked_add(a: u64, b: u64) -> Result<u64, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow)
}
