use solana_program::program_error::ProgramError;

use crate::error::LendingMarketError;

/// Fixed-point scale for the borrow index (12 decimal places).
pub const SCALE: u64 = 1_000_000_000_000;

/// Basis-point denominator; 10000 bps = 100%.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Seconds in a (non-leap) year, used to annualize rate slices.
pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

/// Largest decimals value for which 10^decimals fits in a u64.
pub const MAX_DECIMALS: u8 = 18;

/// Computes `a * b / c` with a 128-bit intermediate.
///
/// Every multiply-then-divide in the ledger goes through here (or the
/// ceiling variant) so the product is never truncated at 64 bits before
/// the division.
pub fn mul_div(a: u64, b: u64, c: u64) -> Result<u64, ProgramError> {
    if c == 0 {
        return Err(LendingMarketError::DivideByZero.into());
    }
    let wide = (a as u128) * (b as u128) / (c as u128);
    if wide > u64::MAX as u128 {
        return Err(LendingMarketError::MathOverflow.into());
    }
    Ok(wide as u64)
}

/// Computes `a * b / c` rounded up, with a 128-bit intermediate.
pub fn mul_div_ceil(a: u64, b: u64, c: u64) -> Result<u64, ProgramError> {
    if c == 0 {
        return Err(LendingMarketError::DivideByZero.into());
    }
    let product = (a as u128) * (b as u128);
    let wide = product
        .checked_add(c as u128 - 1)
        .ok_or(LendingMarketError::MathOverflow)?
        / (c as u128);
    if wide > u64::MAX as u128 {
        return Err(LendingMarketError::MathOverflow.into());
    }
    Ok(wide as u64)
}

/// Takes `bps` basis points of `amount`, rounding down.
pub fn bps_of(amount: u64, bps: u64) -> Result<u64, ProgramError> {
    mul_div(amount, bps, BPS_DENOMINATOR)
}

/// `10^decimals`, rejecting decimals that overflow a u64.
pub fn pow10(decimals: u8) -> Result<u64, ProgramError> {
    if decimals > MAX_DECIMALS {
        return Err(LendingMarketError::InvalidDecimals.into());
    }
    10u64
        .checked_pow(decimals as u32)
        .ok_or_else(|| LendingMarketError::MathOverflow.into())
}

/// Checked addition mapped onto the program error space.
pub fn add(a: u64, b: u64) -> Result<u64, ProgramError> {
    a.checked_add(b)
        .ok_or_else(|| LendingMarketError::MathOverflow.into())
}

/// Checked subtraction that fails closed instead of wrapping.
pub fn sub(a: u64, b: u64) -> Result<u64, ProgramError> {
    a.checked_sub(b)
        .ok_or_else(|| LendingMarketError::MathOverflow.into())
}
