//! Input validation utilities for the swaplend protocol.
//!
//! This module provides validation functions to ensure inputs meet
//! protocol requirements before any state is touched.

use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::crypto::Address;

// ═══════════════════════════════════════════════════════════════════════════════
// AMOUNT VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate that an amount is non-zero
pub fn validate_non_zero(amount: u128) -> Result<()> {
    if amount == 0 {
        return Err(Error::ZeroAmount);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// AMM VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate that a pair consists of two distinct assets
pub fn validate_pair(asset_x: &Address, asset_y: &Address) -> Result<()> {
    if asset_x == asset_y {
        return Err(Error::InvalidPair(asset_x.short()));
    }
    Ok(())
}

/// Validate a multi-hop swap path
pub fn validate_path(path: &[Address]) -> Result<()> {
    if path.len() < MIN_PATH_LENGTH {
        return Err(Error::InvalidPath(format!(
            "need at least {} assets, got {}",
            MIN_PATH_LENGTH,
            path.len()
        )));
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(Error::InvalidPath(format!(
            "at most {} assets allowed, got {}",
            MAX_PATH_LENGTH,
            path.len()
        )));
    }
    if let Some(hop) = path.windows(2).find(|hop| hop[0] == hop[1]) {
        return Err(Error::InvalidPath(format!("hop {} -> {}", hop[0].short(), hop[1].short())));
    }
    Ok(())
}

/// Validate a swap fee in per mille
pub fn validate_fee(fee_per_mille: u128) -> Result<()> {
    if fee_per_mille >= FEE_DENOMINATOR {
        return Err(Error::InvalidParameter {
            name: "fee_per_mille".into(),
            reason: format!("{} must be below {}", fee_per_mille, FEE_DENOMINATOR),
        });
    }
    Ok(())
}

/// Validate a swap deadline against the current block timestamp
pub fn validate_deadline(deadline: u64, now: u64) -> Result<()> {
    if now > deadline {
        return Err(Error::Expired { deadline, now });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// LENDING VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate loan-to-value and liquidation threshold (both WAD fractions)
pub fn validate_risk_params(ltv: u128, liquidation_threshold: u128) -> Result<()> {
    if ltv > WAD {
        return Err(Error::InvalidParameter {
            name: "ltv".into(),
            reason: format!("{} exceeds 1.0", ltv),
        });
    }
    if liquidation_threshold > WAD {
        return Err(Error::InvalidParameter {
            name: "liquidation_threshold".into(),
            reason: format!("{} exceeds 1.0", liquidation_threshold),
        });
    }
    if ltv > liquidation_threshold {
        return Err(Error::InvalidParameter {
            name: "ltv".into(),
            reason: format!(
                "{} above liquidation threshold {}",
                ltv, liquidation_threshold
            ),
        });
    }
    Ok(())
}

/// Validate an administered USD price
pub fn validate_price(price_usd: u128) -> Result<()> {
    if price_usd == 0 {
        return Err(Error::InvalidParameter {
            name: "price_usd".into(),
            reason: "cannot be zero".into(),
        });
    }
    Ok(())
}

/// Validate a token's decimal count
pub fn validate_decimals(decimals: u8) -> Result<()> {
    if decimals > MAX_TOKEN_DECIMALS {
        return Err(Error::InvalidParameter {
            name: "decimals".into(),
            reason: format!("{} exceeds maximum {}", decimals, MAX_TOKEN_DECIMALS),
        });
    }
    Ok(())
}
