//! Error types for the swaplend protocol.
//!
//! Every failure is a synchronous rejection with a distinguishable reason.
//! Errors are grouped into categories so callers can tell input mistakes
//! from economic rejections, external token failures and reentrancy.

use thiserror::Error;

/// Result type alias for swaplend operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Rejected before any computation, mutation or external call
    Precondition,
    /// Rejected after computation because an economic invariant would break
    InvariantProtection,
    /// A token ledger call returned failure or misbehaved
    ExternalDependency,
    /// Nested entry into a guarded operation, or a poisoned lock
    Concurrency,
    /// Arithmetic or internal consistency failure
    Internal,
}

/// Main error type for the swaplend protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════════════
    // Precondition Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Amount is zero
    #[error("Amount cannot be zero")]
    ZeroAmount,

    /// Both sides of a pair are the same asset
    #[error("Invalid pair: both assets are {0}")]
    InvalidPair(String),

    /// Swap path is malformed
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Pool already recorded for this pair
    #[error("Pool already exists: {0}")]
    PoolAlreadyExists(String),

    /// No pool recorded for this pair
    #[error("Pool not found: {0}")]
    PoolNotFound(String),

    /// Asset unknown to the engine, or its reserve is inactive
    #[error("Asset not supported: {0}")]
    AssetNotSupported(String),

    /// Asset reserve is frozen
    #[error("Asset frozen: {0}")]
    AssetFrozen(String),

    /// Reserve was already initialized
    #[error("Reserve already initialized: {0}")]
    ReserveAlreadyInitialized(String),

    /// Swap deadline has passed
    #[error("Transaction expired: deadline {deadline}, now {now}")]
    Expired {
        /// Caller supplied deadline
        deadline: u64,
        /// Current block timestamp
        now: u64,
    },

    /// Not authorized to perform this action
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Invalid input parameter
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Reason for invalidity
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Invariant Protection Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Not enough liquidity to serve the request
    #[error("Insufficient liquidity: required {required}, available {available}")]
    InsufficientLiquidity {
        /// Required amount
        required: u128,
        /// Available amount
        available: u128,
    },

    /// Provider holds fewer shares than requested
    #[error("Insufficient shares: required {required}, available {available}")]
    InsufficientShares {
        /// Requested shares
        required: u128,
        /// Shares held
        available: u128,
    },

    /// Pool has no liquidity at all
    #[error("No liquidity in pool {0}")]
    NoLiquidity(String),

    /// Insufficient collateral for the requested operation
    #[error("Insufficient collateral: required {required}, available {available}")]
    InsufficientCollateral {
        /// Required amount (base units or USD WAD, depending on the check)
        required: u128,
        /// Available amount
        available: u128,
    },

    /// Account has no collateral to borrow against
    #[error("No collateral supplied")]
    NoCollateral,

    /// Operation would drop the health factor below 1.0
    #[error("Health factor {health_factor} would fall below {minimum}")]
    WouldLiquidate {
        /// Resulting health factor (WAD)
        health_factor: u128,
        /// Minimum health factor (WAD)
        minimum: u128,
    },

    /// Repayment larger than the outstanding debt
    #[error("Repay amount {amount} exceeds debt {debt}")]
    ExceedsDebt {
        /// Requested repay amount
        amount: u128,
        /// Recorded debt
        debt: u128,
    },

    /// Swap output below the caller's minimum
    #[error("Slippage exceeded: output {amount_out} below minimum {amount_out_min}")]
    SlippageExceeded {
        /// Computed output
        amount_out: u128,
        /// Minimum accepted output
        amount_out_min: u128,
    },

    // ═══════════════════════════════════════════════════════════════════
    // External Dependency Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Token transfer returned false, failed, or moved the wrong amount
    #[error("Transfer failed for token {token}: {reason}")]
    TransferFailed {
        /// Token address
        token: String,
        /// Failure details
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Concurrency Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Nested entry into a guarded operation
    #[error("Reentrant call into {0}")]
    ReentrantCall(String),

    /// Lock acquisition failed
    #[error("Failed to acquire lock")]
    Lock,

    // ═══════════════════════════════════════════════════════════════════
    // Internal Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Overflow in calculation
    #[error("Arithmetic overflow in {operation}")]
    Overflow {
        /// Operation that overflowed
        operation: String,
    },

    /// Underflow in calculation
    #[error("Arithmetic underflow in {operation}")]
    Underflow {
        /// Operation that underflowed
        operation: String,
    },

    /// Invariant violation detected
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Classify the error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ZeroAmount
            | Error::InvalidPair(_)
            | Error::InvalidPath(_)
            | Error::PoolAlreadyExists(_)
            | Error::PoolNotFound(_)
            | Error::AssetNotSupported(_)
            | Error::AssetFrozen(_)
            | Error::ReserveAlreadyInitialized(_)
            | Error::Expired { .. }
            | Error::Unauthorized(_)
            | Error::InvalidParameter { .. } => ErrorCategory::Precondition,

            Error::InsufficientLiquidity { .. }
            | Error::InsufficientShares { .. }
            | Error::NoLiquidity(_)
            | Error::InsufficientCollateral { .. }
            | Error::NoCollateral
            | Error::WouldLiquidate { .. }
            | Error::ExceedsDebt { .. }
            | Error::SlippageExceeded { .. } => ErrorCategory::InvariantProtection,

            Error::TransferFailed { .. } => ErrorCategory::ExternalDependency,

            Error::ReentrantCall(_) | Error::Lock => ErrorCategory::Concurrency,

            Error::Overflow { .. }
            | Error::Underflow { .. }
            | Error::InvariantViolation(_)
            | Error::Serialization(_)
            | Error::Deserialization(_)
            | Error::Config(_) => ErrorCategory::Internal,
        }
    }

    /// Returns true if the caller can retry with corrected input
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Precondition | ErrorCategory::InvariantProtection
        )
    }

    /// Returns true if this is a critical error requiring immediate attention
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::InvariantViolation(_)
                | Error::Overflow { .. }
                | Error::Underflow { .. }
        )
    }

    /// Returns the error code for external systems
    pub fn code(&self) -> u32 {
        match self {
            // Precondition errors: 1xxx
            Error::ZeroAmount => 1001,
            Error::InvalidPair(_) => 1002,
            Error::InvalidPath(_) => 1003,
            Error::PoolAlreadyExists(_) => 1004,
            Error::PoolNotFound(_) => 1005,
            Error::AssetNotSupported(_) => 1006,
            Error::AssetFrozen(_) => 1007,
            Error::ReserveAlreadyInitialized(_) => 1008,
            Error::Expired { .. } => 1009,
            Error::Unauthorized(_) => 1010,
            Error::InvalidParameter { .. } => 1011,

            // Invariant protection errors: 2xxx
            Error::InsufficientLiquidity { .. } => 2001,
            Error::InsufficientShares { .. } => 2002,
            Error::NoLiquidity(_) => 2003,
            Error::InsufficientCollateral { .. } => 2004,
            Error::NoCollateral => 2005,
            Error::WouldLiquidate { .. } => 2006,
            Error::ExceedsDebt { .. } => 2007,
            Error::SlippageExceeded { .. } => 2008,

            // External dependency errors: 3xxx
            Error::TransferFailed { .. } => 3001,

            // Concurrency errors: 4xxx
            Error::ReentrantCall(_) => 4001,
            Error::Lock => 4002,

            // Internal errors: 9xxx
            Error::Overflow { .. } => 9001,
            Error::Underflow { .. } => 9002,
            Error::InvariantViolation(_) => 9003,
            Error::Serialization(_) => 9004,
            Error::Deserialization(_) => 9005,
            Error::Config(_) => 9006,
        }
    }
}
