//! Protocol constants and magic numbers.
//!
//! All protocol-wide constants are defined here for easy auditing and modification.

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED-POINT CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Decimals of the fixed-point base used for USD values and ratios
pub const WAD_DECIMALS: u8 = 18;

/// Fixed-point one (1.0 = 10^18)
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Largest token decimal count the normalizer accepts
pub const MAX_TOKEN_DECIMALS: u8 = 36;

// ═══════════════════════════════════════════════════════════════════════════════
// AMM CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Fee denominator (fees are expressed per mille)
pub const FEE_DENOMINATOR: u128 = 1000;

/// Default swap fee - 0.3% (3 per mille)
pub const DEFAULT_FEE_PER_MILLE: u128 = 3;

/// Minimum number of assets in a swap path
pub const MIN_PATH_LENGTH: usize = 2;

/// Maximum number of assets in a swap path
pub const MAX_PATH_LENGTH: usize = 8;

// ═══════════════════════════════════════════════════════════════════════════════
// LENDING CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Health factor at which an account becomes liquidatable (1.0)
pub const HEALTH_FACTOR_THRESHOLD: u128 = WAD;

/// Health factor reported for accounts without debt
pub const HEALTH_FACTOR_INFINITE: u128 = u128::MAX;

/// Nominal annual borrow rate reported on borrow events - 5%
pub const NOMINAL_BORROW_RATE: u128 = 50_000_000_000_000_000;

/// Default loan-to-value ratio - 75%
pub const DEFAULT_LTV: u128 = 750_000_000_000_000_000;

/// Default liquidation threshold - 80%
pub const DEFAULT_LIQUIDATION_THRESHOLD: u128 = 800_000_000_000_000_000;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOG CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum events each engine keeps in memory
pub const DEFAULT_MAX_EVENTS: usize = 1000;

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIER CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Length of an account or token address in bytes
pub const ADDRESS_LENGTH: usize = 32;

/// Length of a hash in bytes (SHA256)
pub const HASH_LENGTH: usize = 32;
