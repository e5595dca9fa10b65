//! Token ledger interface and the in-memory reference ledger.
//!
//! The engines never own token balances directly: custody lives in the
//! engine's account on an external ledger reached through [`TokenLedger`].
//! This module provides:
//! - The [`TokenLedger`] capability trait
//! - [`InMemoryToken`], an allowance-based reference ledger
//! - [`TokenRegistry`], the address → ledger lookup shared by the engines

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::utils::crypto::{Address, Hash};
use crate::utils::validation::validate_decimals;

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN LEDGER TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Capability exposed by every tradable asset
///
/// `transfer` moves `amount` from `sender` (the calling account) to `to`.
/// `transfer_from` moves `amount` from `from` to `to` on behalf of `spender`,
/// consuming allowance. Both report failure either as `Ok(false)` or as an
/// error; callers treat the two identically.
///
/// Implementations may call back into arbitrary code, including the engine
/// that invoked them.
pub trait TokenLedger: Send + Sync {
    /// Address identifying this token
    fn address(&self) -> Address;

    /// Number of decimals of the base unit
    fn decimals(&self) -> u8;

    /// Balance of a holder in base units
    fn balance_of(&self, holder: &Address) -> u128;

    /// Transfer from the calling account
    fn transfer(&self, sender: &Address, to: &Address, amount: u128) -> Result<bool>;

    /// Transfer on behalf of `from`, spending `spender`'s allowance
    fn transfer_from(
        &self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<bool>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY TOKEN
// ═══════════════════════════════════════════════════════════════════════════════

/// Balances and allowances of an [`InMemoryToken`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenState {
    /// Total supply in base units
    pub total_supply: u128,
    /// Balances by holder
    pub balances: HashMap<Address, u128>,
    /// Allowances by (owner, spender)
    pub allowances: HashMap<(Address, Address), u128>,
}

/// Reference ERC-20 style ledger kept in memory
pub struct InMemoryToken {
    address: Address,
    symbol: String,
    decimals: u8,
    state: RwLock<TokenState>,
}

impl InMemoryToken {
    /// Create a token whose address is derived from its symbol
    pub fn new(symbol: &str, decimals: u8) -> Result<Self> {
        Self::with_address(Address::from_label(symbol), symbol, decimals)
    }

    /// Create a token at an explicit address
    pub fn with_address(address: Address, symbol: &str, decimals: u8) -> Result<Self> {
        validate_decimals(decimals)?;
        Ok(Self {
            address,
            symbol: symbol.to_string(),
            decimals,
            state: RwLock::new(TokenState::default()),
        })
    }

    /// Token symbol
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Total supply
    pub fn total_supply(&self) -> u128 {
        self.state.read().map(|s| s.total_supply).unwrap_or(0)
    }

    /// Mint new base units to an account
    pub fn mint(&self, to: &Address, amount: u128) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Error::Lock)?;
        let supply = state.total_supply.checked_add(amount).ok_or(Error::Overflow {
            operation: "mint total supply".into(),
        })?;
        let balance = state.balances.get(to).copied().unwrap_or(0);
        let new_balance = balance.checked_add(amount).ok_or(Error::Overflow {
            operation: "mint balance".into(),
        })?;
        state.balances.insert(*to, new_balance);
        state.total_supply = supply;
        Ok(())
    }

    /// Set the allowance `spender` may move out of `owner`
    pub fn approve(&self, owner: &Address, spender: &Address, amount: u128) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Error::Lock)?;
        state.allowances.insert((*owner, *spender), amount);
        Ok(())
    }

    /// Current allowance
    pub fn allowance(&self, owner: &Address, spender: &Address) -> u128 {
        self.state
            .read()
            .ok()
            .and_then(|s| s.allowances.get(&(*owner, *spender)).copied())
            .unwrap_or(0)
    }

    /// Verify supply invariant (total_supply == sum of all balances)
    pub fn verify_supply_invariant(&self) -> bool {
        match self.state.read() {
            Ok(state) => {
                let sum: u128 = state.balances.values().sum();
                sum == state.total_supply
            }
            Err(_) => false,
        }
    }

    /// Hash of supply and sorted balances
    pub fn state_hash(&self) -> Result<Hash> {
        let state = self.state.read().map_err(|_| Error::Lock)?;
        let mut data = Vec::new();
        data.extend_from_slice(&state.total_supply.to_be_bytes());

        let mut sorted: Vec<_> = state.balances.iter().collect();
        sorted.sort_by_key(|(k, _)| **k);
        for (holder, balance) in sorted {
            data.extend_from_slice(holder.as_bytes());
            data.extend_from_slice(&balance.to_be_bytes());
        }
        Ok(Hash::sha256(&data))
    }

    fn move_balance(state: &mut TokenState, from: &Address, to: &Address, amount: u128) -> bool {
        let from_balance = state.balances.get(from).copied().unwrap_or(0);
        if from_balance < amount {
            return false;
        }
        if from == to {
            return true;
        }
        state.balances.insert(*from, from_balance - amount);
        let to_balance = state.balances.get(to).copied().unwrap_or(0);
        match to_balance.checked_add(amount) {
            Some(b) => {
                state.balances.insert(*to, b);
                true
            }
            None => {
                state.balances.insert(*from, from_balance);
                false
            }
        }
    }
}

impl TokenLedger for InMemoryToken {
    fn address(&self) -> Address {
        self.address
    }

    fn decimals(&self) -> u8 {
        self.decimals
    }

    fn balance_of(&self, holder: &Address) -> u128 {
        self.state
            .read()
            .ok()
            .and_then(|s| s.balances.get(holder).copied())
            .unwrap_or(0)
    }

    fn transfer(&self, sender: &Address, to: &Address, amount: u128) -> Result<bool> {
        let mut state = self.state.write().map_err(|_| Error::Lock)?;
        Ok(Self::move_balance(&mut state, sender, to, amount))
    }

    fn transfer_from(
        &self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<bool> {
        let mut state = self.state.write().map_err(|_| Error::Lock)?;
        let key = (*from, *spender);
        let allowance = state.allowances.get(&key).copied().unwrap_or(0);
        if allowance < amount {
            return Ok(false);
        }
        if !Self::move_balance(&mut state, from, to, amount) {
            return Ok(false);
        }
        if allowance != u128::MAX {
            state.allowances.insert(key, allowance - amount);
        }
        Ok(true)
    }
}

impl fmt::Debug for InMemoryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryToken")
            .field("symbol", &self.symbol)
            .field("address", &self.address)
            .field("decimals", &self.decimals)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared lookup from token address to ledger
///
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct TokenRegistry {
    tokens: Arc<RwLock<HashMap<Address, Arc<dyn TokenLedger>>>>,
}

impl TokenRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ledger under its own address
    pub fn register(&self, token: Arc<dyn TokenLedger>) -> Result<Address> {
        let address = token.address();
        let mut tokens = self.tokens.write().map_err(|_| Error::Lock)?;
        if tokens.contains_key(&address) {
            return Err(Error::InvalidParameter {
                name: "token".into(),
                reason: format!("{} already registered", address.short()),
            });
        }
        tokens.insert(address, token);
        Ok(address)
    }

    /// Look up a ledger
    pub fn get(&self, address: &Address) -> Result<Arc<dyn TokenLedger>> {
        let tokens = self.tokens.read().map_err(|_| Error::Lock)?;
        tokens
            .get(address)
            .cloned()
            .ok_or_else(|| Error::AssetNotSupported(address.short()))
    }

    /// Whether a token is registered
    pub fn contains(&self, address: &Address) -> bool {
        self.tokens
            .read()
            .map(|t| t.contains_key(address))
            .unwrap_or(false)
    }

    /// All registered addresses in canonical order
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self
            .tokens
            .read()
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default();
        addresses.sort();
        addresses
    }

    /// Number of registered tokens
    pub fn len(&self) -> usize {
        self.tokens.read().map(|t| t.len()).unwrap_or(0)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRegistry").field("tokens", &self.len()).finish()
    }
}
