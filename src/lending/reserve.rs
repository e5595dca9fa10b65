//! Lending reserves: per-asset risk configuration and liquidity totals.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::constants::{DEFAULT_LIQUIDATION_THRESHOLD, DEFAULT_LTV, WAD};
use crate::utils::crypto::Address;
use crate::utils::math::{safe_add, safe_sub, usd_value};
use crate::utils::validation::{validate_decimals, validate_price, validate_risk_params};

/// Administrative parameters for initializing a reserve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveParams {
    /// Loan-to-value ratio (WAD fraction)
    pub ltv: u128,
    /// Liquidation threshold (WAD fraction, at least `ltv`)
    pub liquidation_threshold: u128,
    /// USD price per whole unit (WAD)
    pub price_usd: u128,
    /// Whether the reserve accepts supply and borrow immediately
    pub is_active: bool,
}

impl Default for ReserveParams {
    fn default() -> Self {
        Self {
            ltv: DEFAULT_LTV,
            liquidation_threshold: DEFAULT_LIQUIDATION_THRESHOLD,
            price_usd: WAD,
            is_active: true,
        }
    }
}

impl ReserveParams {
    /// Parameters at a given price with default risk settings
    pub fn at_price(price_usd: u128) -> Self {
        Self {
            price_usd,
            ..Default::default()
        }
    }

    /// Override LTV and liquidation threshold
    pub fn with_risk(mut self, ltv: u128, liquidation_threshold: u128) -> Self {
        self.ltv = ltv;
        self.liquidation_threshold = liquidation_threshold;
        self
    }

    /// Validate all parameters
    pub fn validate(&self) -> Result<()> {
        validate_risk_params(self.ltv, self.liquidation_threshold)?;
        validate_price(self.price_usd)
    }
}

/// Per-asset lending reserve
///
/// `available_liquidity == total_supplied - total_borrowed` holds after
/// every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserve {
    /// Reserve asset
    pub asset: Address,
    /// Loan-to-value ratio (WAD)
    pub ltv: u128,
    /// Liquidation threshold (WAD)
    pub liquidation_threshold: u128,
    /// USD price per whole unit (WAD)
    pub price_usd: u128,
    /// Decimals of the asset's base unit
    pub decimals: u8,
    /// Collateral supplied, in base units
    pub total_supplied: u128,
    /// Outstanding borrows, in base units
    pub total_borrowed: u128,
    /// Liquidity that can still be borrowed or withdrawn
    pub available_liquidity: u128,
    /// Accepts supply and borrow
    pub is_active: bool,
    /// Temporarily rejects supply and borrow
    pub is_frozen: bool,
}

impl Reserve {
    /// Create an empty reserve
    pub fn new(asset: Address, decimals: u8, params: ReserveParams) -> Result<Self> {
        validate_decimals(decimals)?;
        params.validate()?;
        Ok(Self {
            asset,
            ltv: params.ltv,
            liquidation_threshold: params.liquidation_threshold,
            price_usd: params.price_usd,
            decimals,
            total_supplied: 0,
            total_borrowed: 0,
            available_liquidity: 0,
            is_active: params.is_active,
            is_frozen: false,
        })
    }

    /// Reject supply and borrow on inactive or frozen reserves
    pub fn ensure_usable(&self) -> Result<()> {
        if !self.is_active {
            return Err(Error::AssetNotSupported(self.asset.short()));
        }
        if self.is_frozen {
            return Err(Error::AssetFrozen(self.asset.short()));
        }
        Ok(())
    }

    /// USD value (WAD) of a base-unit amount at the current price
    pub fn value_usd(&self, amount: u128) -> Result<u128> {
        usd_value(amount, self.decimals, self.price_usd)
    }

    /// Record supplied collateral
    pub fn supply(&mut self, amount: u128) -> Result<()> {
        self.total_supplied = safe_add(self.total_supplied, amount)?;
        self.available_liquidity = safe_add(self.available_liquidity, amount)?;
        Ok(())
    }

    /// Record withdrawn collateral
    pub fn withdraw(&mut self, amount: u128) -> Result<()> {
        self.take_liquidity(amount)?;
        self.total_supplied = safe_sub(self.total_supplied, amount)?;
        Ok(())
    }

    /// Record a borrow
    pub fn borrow(&mut self, amount: u128) -> Result<()> {
        self.take_liquidity(amount)?;
        self.total_borrowed = safe_add(self.total_borrowed, amount)?;
        Ok(())
    }

    /// Record a repayment
    pub fn repay(&mut self, amount: u128) -> Result<()> {
        self.total_borrowed = safe_sub(self.total_borrowed, amount)?;
        self.available_liquidity = safe_add(self.available_liquidity, amount)?;
        Ok(())
    }

    /// Whether the liquidity accounting identity holds
    pub fn is_consistent(&self) -> bool {
        self.total_borrowed <= self.total_supplied
            && self.total_supplied - self.total_borrowed == self.available_liquidity
    }

    fn take_liquidity(&mut self, amount: u128) -> Result<()> {
        if amount > self.available_liquidity {
            return Err(Error::InsufficientLiquidity {
                required: amount,
                available: self.available_liquidity,
            });
        }
        self.available_liquidity -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserve(decimals: u8) -> Reserve {
        Reserve::new(Address::from_label("USDC"), decimals, ReserveParams::default()).unwrap()
    }

    #[test]
    fn test_new_reserve_validates_params() {
        let asset = Address::from_label("USDC");
        assert!(Reserve::new(asset, 6, ReserveParams::default().with_risk(WAD + 1, WAD)).is_err());
        assert!(Reserve::new(asset, 6, ReserveParams::at_price(0)).is_err());
        assert!(Reserve::new(asset, 40, ReserveParams::default()).is_err());
    }

    #[test]
    fn test_liquidity_identity() {
        let mut r = reserve(18);
        r.supply(1_000).unwrap();
        r.borrow(400).unwrap();
        assert_eq!(r.available_liquidity, 600);
        assert!(r.is_consistent());

        assert!(matches!(
            r.withdraw(700),
            Err(Error::InsufficientLiquidity {
                required: 700,
                available: 600
            })
        ));
        r.repay(400).unwrap();
        r.withdraw(1_000).unwrap();
        assert_eq!(r.available_liquidity, 0);
        assert!(r.is_consistent());
    }

    #[test]
    fn test_value_usd_normalizes_decimals() {
        let six = reserve(6);
        let eighteen = reserve(18);
        assert_eq!(six.value_usd(1_000_000).unwrap(), WAD);
        assert_eq!(eighteen.value_usd(WAD).unwrap(), WAD);
    }

    #[test]
    fn test_ensure_usable() {
        let mut r = reserve(18);
        assert!(r.ensure_usable().is_ok());
        r.is_frozen = true;
        assert!(matches!(r.ensure_usable(), Err(Error::AssetFrozen(_))));
        r.is_active = false;
        assert!(matches!(r.ensure_usable(), Err(Error::AssetNotSupported(_))));
    }
}
