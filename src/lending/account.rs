//! User accounts and price-weighted account valuation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::lending::reserve::Reserve;
use crate::utils::constants::HEALTH_FACTOR_THRESHOLD;
use crate::utils::crypto::Address;
use crate::utils::math::{health_factor, safe_add, wad_mul};

// ═══════════════════════════════════════════════════════════════════════════════
// USER ACCOUNT
// ═══════════════════════════════════════════════════════════════════════════════

/// Collateral and debt of one user
///
/// The USD totals are refreshed from the per-asset maps at the prices in
/// effect whenever the account is mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Collateral per asset, in base units
    pub collateral: BTreeMap<Address, u128>,
    /// Debt per asset, in base units
    pub debt: BTreeMap<Address, u128>,
    /// Collateral value at last mutation (WAD USD)
    pub total_collateral_usd: u128,
    /// Debt value at last mutation (WAD USD)
    pub total_debt_usd: u128,
}

impl UserAccount {
    /// Collateral held in one asset
    pub fn collateral_of(&self, asset: &Address) -> u128 {
        self.collateral.get(asset).copied().unwrap_or(0)
    }

    /// Debt owed in one asset
    pub fn debt_of(&self, asset: &Address) -> u128 {
        self.debt.get(asset).copied().unwrap_or(0)
    }

    /// Whether any debt is outstanding
    pub fn has_debt(&self) -> bool {
        self.debt.values().any(|d| *d > 0)
    }

    /// Set collateral for an asset (zero removes the entry)
    pub fn set_collateral(&mut self, asset: Address, amount: u128) {
        set_or_remove(&mut self.collateral, asset, amount);
    }

    /// Set debt for an asset (zero removes the entry)
    pub fn set_debt(&mut self, asset: Address, amount: u128) {
        set_or_remove(&mut self.debt, asset, amount);
    }

    /// Recompute stored USD totals from the per-asset maps
    pub fn refresh_totals(&mut self, reserves: &BTreeMap<Address, Reserve>) -> Result<()> {
        let valuation = Valuation::of(self, reserves)?;
        self.total_collateral_usd = valuation.collateral_usd;
        self.total_debt_usd = valuation.debt_usd;
        Ok(())
    }
}

fn set_or_remove(map: &mut BTreeMap<Address, u128>, asset: Address, amount: u128) {
    if amount == 0 {
        map.remove(&asset);
    } else {
        map.insert(asset, amount);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALUATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Account value at current reserve prices (all WAD USD)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Valuation {
    /// Plain collateral value
    pub collateral_usd: u128,
    /// Collateral weighted by each reserve's LTV (borrowing power)
    pub borrow_capacity_usd: u128,
    /// Collateral weighted by each reserve's liquidation threshold
    pub liquidation_collateral_usd: u128,
    /// Debt value
    pub debt_usd: u128,
}

impl Valuation {
    /// Value an account against the reserve table
    pub fn of(account: &UserAccount, reserves: &BTreeMap<Address, Reserve>) -> Result<Self> {
        let mut valuation = Self::default();

        for (asset, amount) in &account.collateral {
            let reserve = reserve_for(reserves, asset)?;
            let value = reserve.value_usd(*amount)?;
            valuation.collateral_usd = safe_add(valuation.collateral_usd, value)?;
            valuation.borrow_capacity_usd =
                safe_add(valuation.borrow_capacity_usd, wad_mul(value, reserve.ltv)?)?;
            valuation.liquidation_collateral_usd = safe_add(
                valuation.liquidation_collateral_usd,
                wad_mul(value, reserve.liquidation_threshold)?,
            )?;
        }

        for (asset, amount) in &account.debt {
            let reserve = reserve_for(reserves, asset)?;
            valuation.debt_usd = safe_add(valuation.debt_usd, reserve.value_usd(*amount)?)?;
        }

        Ok(valuation)
    }

    /// Health factor (WAD); `u128::MAX` without debt
    pub fn health_factor(&self) -> Result<u128> {
        health_factor(self.liquidation_collateral_usd, self.debt_usd)
    }

    /// Remaining borrowing power, floored at zero
    pub fn available_borrows_usd(&self) -> u128 {
        self.borrow_capacity_usd.saturating_sub(self.debt_usd)
    }

    /// Public summary of this valuation
    pub fn account_data(&self) -> Result<AccountData> {
        Ok(AccountData {
            total_collateral_usd: self.collateral_usd,
            total_debt_usd: self.debt_usd,
            available_borrows_usd: self.available_borrows_usd(),
            health_factor: self.health_factor()?,
        })
    }
}

fn reserve_for<'a>(reserves: &'a BTreeMap<Address, Reserve>, asset: &Address) -> Result<&'a Reserve> {
    reserves
        .get(asset)
        .ok_or_else(|| Error::InvariantViolation(format!("no reserve for {}", asset.short())))
}

/// Aggregate position of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountData {
    /// Collateral value (WAD USD)
    pub total_collateral_usd: u128,
    /// Debt value (WAD USD)
    pub total_debt_usd: u128,
    /// Additional debt the LTV limits still allow (WAD USD)
    pub available_borrows_usd: u128,
    /// Health factor (WAD); `u128::MAX` without debt
    pub health_factor: u128,
}

impl AccountData {
    /// Health factor strictly below 1.0
    pub fn is_liquidatable(&self) -> bool {
        self.health_factor < HEALTH_FACTOR_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lending::reserve::ReserveParams;
    use crate::utils::constants::{HEALTH_FACTOR_INFINITE, WAD};

    fn reserves() -> (BTreeMap<Address, Reserve>, Address, Address) {
        let usdc = Address::from_label("USDC");
        let weth = Address::from_label("WETH");
        let mut map = BTreeMap::new();
        map.insert(usdc, Reserve::new(usdc, 6, ReserveParams::default()).unwrap());
        map.insert(
            weth,
            Reserve::new(weth, 18, ReserveParams::at_price(2_000 * WAD).with_risk(WAD / 2, WAD * 6 / 10))
                .unwrap(),
        );
        (map, usdc, weth)
    }

    #[test]
    fn test_empty_account() {
        let (map, _, _) = reserves();
        let data = Valuation::of(&UserAccount::default(), &map)
            .unwrap()
            .account_data()
            .unwrap();
        assert_eq!(data.total_collateral_usd, 0);
        assert_eq!(data.health_factor, HEALTH_FACTOR_INFINITE);
        assert!(!data.is_liquidatable());
    }

    #[test]
    fn test_per_reserve_weights() {
        let (map, usdc, weth) = reserves();
        let mut account = UserAccount::default();
        account.set_collateral(usdc, 1_000_000_000); // 1000 USDC
        account.set_collateral(weth, WAD); // 1 WETH
        account.set_debt(usdc, 500_000_000);

        let v = Valuation::of(&account, &map).unwrap();
        assert_eq!(v.collateral_usd, 3_000 * WAD);
        assert_eq!(v.borrow_capacity_usd, 750 * WAD + 1_000 * WAD);
        assert_eq!(v.liquidation_collateral_usd, 800 * WAD + 1_200 * WAD);
        assert_eq!(v.debt_usd, 500 * WAD);
        assert_eq!(v.available_borrows_usd(), 1_250 * WAD);
        assert_eq!(v.health_factor().unwrap(), 4 * WAD);
    }

    #[test]
    fn test_refresh_totals_and_zero_entries() {
        let (map, usdc, _) = reserves();
        let mut account = UserAccount::default();
        account.set_collateral(usdc, 2_000_000);
        account.refresh_totals(&map).unwrap();
        assert_eq!(account.total_collateral_usd, 2 * WAD);

        account.set_collateral(usdc, 0);
        assert!(account.collateral.is_empty());
        account.refresh_totals(&map).unwrap();
        assert_eq!(account.total_collateral_usd, 0);
    }

    #[test]
    fn test_unknown_reserve_is_invariant_violation() {
        let (map, _, _) = reserves();
        let mut account = UserAccount::default();
        account.set_debt(Address::from_label("DAI"), 1);
        assert!(matches!(
            Valuation::of(&account, &map),
            Err(Error::InvariantViolation(_))
        ));
    }
}
