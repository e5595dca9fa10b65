//! Fixed-point arithmetic and mathematical utilities.
//!
//! All amounts are unsigned `u128` integers. USD values, prices and ratios
//! use an 18-decimal fixed-point base ([`WAD`]). Products of two `u128`
//! values are formed at 256-bit width before dividing, so `a * b / c` only
//! fails when the final quotient does not fit.

use crate::error::{Error, Result};
use crate::utils::constants::{
    FEE_DENOMINATOR, HEALTH_FACTOR_INFINITE, MAX_TOKEN_DECIMALS, WAD, WAD_DECIMALS,
};

// ═══════════════════════════════════════════════════════════════════════════════
// SAFE ARITHMETIC OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Safe addition with overflow check
pub fn safe_add(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b).ok_or(Error::Overflow {
        operation: format!("{} + {}", a, b),
    })
}

/// Safe subtraction with underflow check
pub fn safe_sub(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b).ok_or(Error::Underflow {
        operation: format!("{} - {}", a, b),
    })
}

/// Safe multiplication with overflow check
pub fn safe_mul(a: u128, b: u128) -> Result<u128> {
    a.checked_mul(b).ok_or(Error::Overflow {
        operation: format!("{} * {}", a, b),
    })
}

/// Full 256-bit product of two `u128` values as `(high, low)` words
fn full_mul(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = u64::MAX as u128;

    let (a1, a0) = (a >> 64, a & MASK);
    let (b1, b0) = (b >> 64, b & MASK);

    let p00 = a0 * b0;
    let p01 = a0 * b1;
    let p10 = a1 * b0;
    let p11 = a1 * b1;

    // Each term is below 2^64, so the sum cannot overflow.
    let mid = (p00 >> 64) + (p01 & MASK) + (p10 & MASK);
    let low = (p00 & MASK) | (mid << 64);
    let high = p11 + (p01 >> 64) + (p10 >> 64) + (mid >> 64);
    (high, low)
}

/// Computes `floor(a * b / c)` with a 256-bit intermediate
pub fn mul_div(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(Error::InvalidParameter {
            name: "divisor".into(),
            reason: "division by zero".into(),
        });
    }

    let (high, low) = full_mul(a, b);
    if high == 0 {
        return Ok(low / c);
    }
    if high >= c {
        return Err(Error::Overflow {
            operation: format!("({} * {}) / {}", a, b, c),
        });
    }

    // Restoring long division of the 256-bit product; `rem < c` holds
    // at the top of every iteration.
    let mut rem = high;
    let mut quotient = 0u128;
    for i in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((low >> i) & 1);
        quotient <<= 1;
        if carry == 1 || rem >= c {
            rem = rem.wrapping_sub(c);
            quotient |= 1;
        }
    }
    Ok(quotient)
}

/// Multiply two WAD values: `a * b / WAD`
pub fn wad_mul(a: u128, b: u128) -> Result<u128> {
    mul_div(a, b, WAD)
}

/// Integer square root via Newton's method. Returns `floor(sqrt(n))`.
pub fn isqrt(n: u128) -> u128 {
    if n == 0 {
        return 0;
    }
    let mut x = n;
    let mut y = x.div_ceil(2);
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

/// Integer square root of `a * b` without overflowing `u128`
pub fn isqrt_product(a: u128, b: u128) -> Result<u128> {
    match a.checked_mul(b) {
        Some(product) => Ok(isqrt(product)),
        None => {
            // sqrt(a*b) = sqrt(a) * sqrt(b) is only approximate, so fall back to
            // a bisection over the exact 256-bit product.
            let (high, low) = full_mul(a, b);
            let mut lo = 0u128;
            let mut hi = u128::MAX;
            while lo < hi {
                let mid = lo + (hi - lo).div_ceil(2);
                let (mh, ml) = full_mul(mid, mid);
                if (mh, ml) <= (high, low) {
                    lo = mid;
                } else {
                    hi = mid - 1;
                }
            }
            Ok(lo)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECIMAL NORMALIZATION & VALUATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Scale a raw token amount to the 18-decimal base
///
/// A 6-decimal amount is multiplied by 10^12, an 18-decimal amount is left
/// alone and a 24-decimal amount is divided by 10^6 (floor).
pub fn normalize_to_wad(amount: u128, decimals: u8) -> Result<u128> {
    if decimals > MAX_TOKEN_DECIMALS {
        return Err(Error::InvalidParameter {
            name: "decimals".into(),
            reason: format!("{} exceeds maximum {}", decimals, MAX_TOKEN_DECIMALS),
        });
    }

    if decimals <= WAD_DECIMALS {
        let factor = 10u128.pow(u32::from(WAD_DECIMALS - decimals));
        amount.checked_mul(factor).ok_or(Error::Overflow {
            operation: format!("normalize {} ({} decimals)", amount, decimals),
        })
    } else {
        let factor = 10u128.pow(u32::from(decimals - WAD_DECIMALS));
        Ok(amount / factor)
    }
}

/// USD value (WAD) of a raw token amount at a WAD price per whole unit
pub fn usd_value(amount: u128, decimals: u8, price_usd: u128) -> Result<u128> {
    let normalized = normalize_to_wad(amount, decimals)?;
    wad_mul(normalized, price_usd)
}

/// Health factor (WAD) of weighted collateral against debt
///
/// Returns [`HEALTH_FACTOR_INFINITE`] when there is no debt. A ratio too
/// large for `u128` saturates one below it, so a dust debt is never
/// reported as no debt.
pub fn health_factor(weighted_collateral_usd: u128, debt_usd: u128) -> Result<u128> {
    if debt_usd == 0 {
        return Ok(HEALTH_FACTOR_INFINITE);
    }
    match mul_div(weighted_collateral_usd, WAD, debt_usd) {
        Ok(hf) => Ok(hf),
        Err(Error::Overflow { .. }) => Ok(HEALTH_FACTOR_INFINITE - 1),
        Err(e) => Err(e),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANT-PRODUCT PRICING
// ═══════════════════════════════════════════════════════════════════════════════

/// Constant-product output for one hop with a per-mille fee
///
/// `out = in * (1000 - fee) * reserve_out / (reserve_in * 1000 + in * (1000 - fee))`
pub fn amount_out(
    amount_in: u128,
    reserve_in: u128,
    reserve_out: u128,
    fee_per_mille: u128,
) -> Result<u128> {
    if fee_per_mille >= FEE_DENOMINATOR {
        return Err(Error::InvalidParameter {
            name: "fee_per_mille".into(),
            reason: format!("{} must be below {}", fee_per_mille, FEE_DENOMINATOR),
        });
    }
    let amount_in_with_fee = safe_mul(amount_in, FEE_DENOMINATOR - fee_per_mille)?;
    let denominator = safe_add(safe_mul(reserve_in, FEE_DENOMINATOR)?, amount_in_with_fee)?;
    mul_div(amount_in_with_fee, reserve_out, denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_arithmetic() {
        assert!(safe_add(1, 2).is_ok());
        assert!(safe_add(u128::MAX, 1).is_err());

        assert!(safe_sub(5, 3).is_ok());
        assert!(matches!(safe_sub(3, 5), Err(Error::Underflow { .. })));

        assert!(safe_mul(100, 200).is_ok());
        assert!(safe_mul(u128::MAX, 2).is_err());
    }

    #[test]
    fn test_mul_div_small() {
        assert_eq!(mul_div(10, 20, 3).unwrap(), 66);
        assert!(mul_div(1, 1, 0).is_err());
    }

    #[test]
    fn test_mul_div_wide() {
        // 1e24 * 1e24 / 1e24 overflows u128 in the intermediate only
        let e24 = 1_000_000_000_000_000_000_000_000u128;
        assert_eq!(mul_div(e24, e24, e24).unwrap(), e24);
        assert_eq!(mul_div(u128::MAX, u128::MAX, u128::MAX).unwrap(), u128::MAX);
        assert_eq!(mul_div(u128::MAX, 2, 4).unwrap(), u128::MAX / 2);
        assert!(mul_div(u128::MAX, 2, 1).is_err());
    }

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(1_000_000_000_000), 1_000_000);
        assert_eq!(isqrt(u128::MAX), u64::MAX as u128);
    }

    #[test]
    fn test_isqrt_product_wide() {
        let e24 = 1_000_000_000_000_000_000_000_000u128;
        assert_eq!(isqrt_product(e24, e24).unwrap(), e24);
        assert_eq!(isqrt_product(1000, 1000).unwrap(), 1000);
        assert_eq!(isqrt_product(u128::MAX, u128::MAX).unwrap(), u128::MAX);
    }

    #[test]
    fn test_normalize_decimals() {
        assert_eq!(normalize_to_wad(1_000_000, 6).unwrap(), WAD);
        assert_eq!(normalize_to_wad(WAD, 18).unwrap(), WAD);
        assert_eq!(normalize_to_wad(WAD * 1_000_000, 24).unwrap(), WAD);
        assert!(normalize_to_wad(1, 37).is_err());
    }

    #[test]
    fn test_usd_value_is_decimals_invariant() {
        let price = 2 * WAD;
        let six = usd_value(1_000_000, 6, price).unwrap();
        let eighteen = usd_value(WAD, 18, price).unwrap();
        assert_eq!(six, eighteen);
        assert_eq!(six, 2 * WAD);
    }

    #[test]
    fn test_health_factor() {
        assert_eq!(health_factor(100, 0).unwrap(), HEALTH_FACTOR_INFINITE);
        assert_eq!(health_factor(150 * WAD, 100 * WAD).unwrap(), 1_500_000_000_000_000_000);
        assert_eq!(health_factor(99 * WAD, 100 * WAD).unwrap(), 990_000_000_000_000_000);
        // Dust debt against huge collateral saturates below the no-debt sentinel.
        assert_eq!(health_factor(u128::MAX, 1).unwrap(), HEALTH_FACTOR_INFINITE - 1);
    }

    #[test]
    fn test_amount_out_reference_quote() {
        // floor(100*997*1000 / (1000*1000 + 100*997)) = 90
        assert_eq!(amount_out(100, 1000, 1000, 3).unwrap(), 90);
    }

    #[test]
    fn test_amount_out_never_drains() {
        let out = amount_out(u64::MAX as u128, 1000, 1000, 3).unwrap();
        assert!(out < 1000);
    }

    #[test]
    fn test_amount_out_rejects_full_fee() {
        assert!(amount_out(100, 1000, 1000, 1000).is_err());
    }
}
