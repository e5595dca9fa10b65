//! Collateralized lending pool.
//!
//! This module contains:
//! - Reserves with per-asset LTV, liquidation threshold and price
//! - User accounts and their price-weighted valuation
//! - The lending engine (supply, withdraw, borrow, repay, administration)

pub mod account;
pub mod engine;
pub mod reserve;

pub use account::{AccountData, UserAccount, Valuation};
pub use engine::{LendingEngine, LendingState};
pub use reserve::{Reserve, ReserveParams};
