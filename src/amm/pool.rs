//! Constant-product pool records.
//!
//! A pool is keyed by an order-independent [`PoolId`] and stores its two
//! assets in canonical (ascending) order. Reserves are the amounts the
//! engine holds in custody on behalf of the pool.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::utils::constants::HASH_LENGTH;
use crate::utils::crypto::{impl_hex_serde, Address, Hash};
use crate::utils::math::{safe_add, safe_sub};

// ═══════════════════════════════════════════════════════════════════════════════
// POOL ID
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a pool: SHA-256 of both asset addresses, lower first
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolId([u8; HASH_LENGTH]);

impl_hex_serde!(PoolId, HASH_LENGTH);

impl PoolId {
    /// Derive the id of the pool holding `x` and `y` (in any order)
    pub fn from_assets(x: &Address, y: &Address) -> Self {
        let (a, b) = sort_assets(x, y);
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(a.as_bytes());
        data.extend_from_slice(b.as_bytes());
        Self(*Hash::sha256(&data).as_bytes())
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Order two assets canonically (ascending)
pub fn sort_assets(x: &Address, y: &Address) -> (Address, Address) {
    if x <= y {
        (*x, *y)
    } else {
        (*y, *x)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Two-asset constant-product pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    /// Pool identifier
    pub id: PoolId,
    /// Lower asset
    pub asset_a: Address,
    /// Higher asset
    pub asset_b: Address,
    /// Custodied amount of `asset_a`
    pub reserve_a: u128,
    /// Custodied amount of `asset_b`
    pub reserve_b: u128,
    /// Outstanding liquidity shares
    pub total_shares: u128,
}

impl Pool {
    /// Create an empty pool for two distinct assets
    pub fn new(x: &Address, y: &Address) -> Self {
        let (asset_a, asset_b) = sort_assets(x, y);
        Self {
            id: PoolId::from_assets(x, y),
            asset_a,
            asset_b,
            reserve_a: 0,
            reserve_b: 0,
            total_shares: 0,
        }
    }

    /// Whether the pool holds `asset`
    pub fn contains(&self, asset: &Address) -> bool {
        *asset == self.asset_a || *asset == self.asset_b
    }

    /// Reserve of one asset of the pool
    pub fn reserve_of(&self, asset: &Address) -> Option<u128> {
        if *asset == self.asset_a {
            Some(self.reserve_a)
        } else if *asset == self.asset_b {
            Some(self.reserve_b)
        } else {
            None
        }
    }

    /// Reserves oriented for a trade from `asset_in`
    pub fn reserves_for(&self, asset_in: &Address) -> (u128, u128) {
        if *asset_in == self.asset_a {
            (self.reserve_a, self.reserve_b)
        } else {
            (self.reserve_b, self.reserve_a)
        }
    }

    /// Both reserves are positive
    pub fn has_liquidity(&self) -> bool {
        self.reserve_a > 0 && self.reserve_b > 0
    }

    /// Either both reserves and shares are zero, or all are positive
    pub fn is_consistent(&self) -> bool {
        let empty = self.reserve_a == 0 && self.reserve_b == 0 && self.total_shares == 0;
        empty || (self.has_liquidity() && self.total_shares > 0)
    }

    /// Orient a pair of amounts given for `(x, _)` into `(a, b)` order
    pub fn orient(&self, x: &Address, amount_x: u128, amount_y: u128) -> (u128, u128) {
        if *x == self.asset_a {
            (amount_x, amount_y)
        } else {
            (amount_y, amount_x)
        }
    }

    /// Add a deposit (canonical order) and mint shares
    pub fn deposit(&mut self, amount_a: u128, amount_b: u128, shares: u128) -> Result<()> {
        self.reserve_a = safe_add(self.reserve_a, amount_a)?;
        self.reserve_b = safe_add(self.reserve_b, amount_b)?;
        self.total_shares = safe_add(self.total_shares, shares)?;
        Ok(())
    }

    /// Remove a withdrawal (canonical order) and burn shares
    pub fn withdraw(&mut self, amount_a: u128, amount_b: u128, shares: u128) -> Result<()> {
        self.reserve_a = safe_sub(self.reserve_a, amount_a)?;
        self.reserve_b = safe_sub(self.reserve_b, amount_b)?;
        self.total_shares = safe_sub(self.total_shares, shares)?;
        Ok(())
    }

    /// Apply one swap hop: `amount_in` of `asset_in` in, `amount_out` of the other out
    pub fn apply_swap(&mut self, asset_in: &Address, amount_in: u128, amount_out: u128) -> Result<()> {
        if !self.contains(asset_in) {
            return Err(Error::InvalidPath(format!(
                "{} is not in pool {}",
                asset_in.short(),
                self.id
            )));
        }
        if *asset_in == self.asset_a {
            self.reserve_a = safe_add(self.reserve_a, amount_in)?;
            self.reserve_b = safe_sub(self.reserve_b, amount_out)?;
        } else {
            self.reserve_b = safe_add(self.reserve_b, amount_in)?;
            self.reserve_a = safe_sub(self.reserve_a, amount_out)?;
        }
        Ok(())
    }
}

/// Result of a liquidity operation, amounts in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityReceipt {
    /// Pool identifier
    pub pool_id: PoolId,
    /// Amount of the lower asset moved
    pub amount_a: u128,
    /// Amount of the higher asset moved
    pub amount_b: u128,
    /// Shares minted or burned
    pub shares: u128,
}
