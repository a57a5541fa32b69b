//! Pure rate math.
//!
//! All products use `u128` intermediates and floor division. Floor is part of the contract:
//! an obligation is under-paid by at most one unit per call and results must be reproducible.

use crate::{Result, StrataError};

use crate::types::{Bps, BPS_U64};

pub const SECONDS_PER_DAY: u64 = 86_400;
pub const SECONDS_PER_YEAR: u64 = 365 * SECONDS_PER_DAY;

pub fn mul_div_floor_u64(a: u64, b: u64, denom: u64) -> Result<u64> {
    if denom == 0 {
        return Err(StrataError::InvalidInput("division by zero".into()));
    }
    let num = (a as u128)
        .checked_mul(b as u128)
        .ok_or_else(|| StrataError::BoundedValueExceeded("u128 overflow in mul".into()))?;
    let out = num / (denom as u128);
    u64::try_from(out).map_err(|_| StrataError::BoundedValueExceeded("u64 overflow in div".into()))
}

pub fn add_u64(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b)
        .ok_or_else(|| StrataError::BoundedValueExceeded("u64 overflow in add".into()))
}

pub fn sub_u64(a: u64, b: u64) -> Result<u64> {
    a.checked_sub(b)
        .ok_or_else(|| StrataError::InvalidInput("u64 underflow in sub".into()))
}

pub fn floor_bps(amount: u64, bps: Bps) -> Result<u64> {
    mul_div_floor_u64(amount, bps.as_u64(), BPS_U64)
}

/// Fixed-yield obligation for `principal` at `rate` over `elapsed_secs`.
///
/// `principal * rate * elapsed / (SECONDS_PER_YEAR * 10_000)`, floored. Zero if any factor is zero.
pub fn obligation(principal: u64, rate: Bps, elapsed_secs: u64) -> Result<u64> {
    if principal == 0 || rate == Bps::ZERO || elapsed_secs == 0 {
        return Ok(0);
    }
    let num = (principal as u128)
        .checked_mul(rate.as_u64() as u128)
        .and_then(|v| v.checked_mul(elapsed_secs as u128))
        .ok_or_else(|| StrataError::BoundedValueExceeded("u128 overflow in obligation".into()))?;
    let denom = (SECONDS_PER_YEAR as u128) * (BPS_U64 as u128);
    u64::try_from(num / denom)
        .map_err(|_| StrataError::BoundedValueExceeded("obligation exceeds u64".into()))
}

/// Leveraged share of total principal, in bps.
///
/// Returns 0 when both principals are 0. Callers that gate on risk must treat that case as
/// safe themselves; this function does not special-case it.
pub fn buffer_ratio(protected: u64, leveraged: u64) -> Result<Bps> {
    let total = (protected as u128) + (leveraged as u128);
    if total == 0 {
        return Ok(Bps::ZERO);
    }
    let ratio = (leveraged as u128) * (BPS_U64 as u128) / total;
    // leveraged <= total, so ratio <= 10_000.
    Ok(Bps::saturating_from_u64(ratio as u64))
}

/// Total principal per unit of leveraged principal, in bps (`20_000` = 2x).
///
/// Returns 0 as the "undefined" sentinel when leveraged is 0.
pub fn leverage(protected: u64, leveraged: u64) -> Result<u64> {
    if leveraged == 0 {
        return Ok(0);
    }
    let total = (protected as u128) + (leveraged as u128);
    let out = total * (BPS_U64 as u128) / (leveraged as u128);
    u64::try_from(out).map_err(|_| StrataError::BoundedValueExceeded("leverage exceeds u64".into()))
}

/// `floor(amount * part / whole)`; zero when `whole` is zero.
pub fn pro_rata(amount: u64, part: u64, whole: u64) -> Result<u64> {
    if whole == 0 {
        return Ok(0);
    }
    mul_div_floor_u64(amount, part, whole)
}
