//! Protocol operations - serializable calls into the engines.
//!
//! Operations represent discrete actions that are executed atomically by
//! [`Protocol::execute`](crate::protocol::Protocol::execute). They are plain
//! data so a list of them can be replayed from a JSON scenario file.

use serde::{Deserialize, Serialize};

use crate::amm::pool::{LiquidityReceipt, PoolId};
use crate::lending::reserve::{Reserve, ReserveParams};
use crate::utils::crypto::Address;

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// All protocol operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolOperation {
    // Token ledger operations (in-memory ledgers owned by the protocol)
    /// Create and register an in-memory token
    CreateToken {
        /// Token symbol; the address is derived from it
        symbol: String,
        /// Decimals of the base unit
        decimals: u8,
    },
    /// Mint in-memory tokens to an account
    Mint {
        /// Token address
        token: Address,
        /// Recipient
        to: Address,
        /// Amount in base units
        amount: u128,
    },
    /// Approve an engine (or any spender) on behalf of the caller
    Approve {
        /// Token address
        token: Address,
        /// Spender allowed to pull from the caller
        spender: Address,
        /// Allowance in base units
        amount: u128,
    },

    // AMM operations
    /// Create an empty pool
    CreatePool {
        /// First asset
        x: Address,
        /// Second asset
        y: Address,
    },
    /// Add liquidity (creates the pool if needed)
    AddLiquidity {
        /// First asset
        x: Address,
        /// Second asset
        y: Address,
        /// Amount of `x`
        amount_x: u128,
        /// Amount of `y`
        amount_y: u128,
    },
    /// Burn shares for the underlying assets
    RemoveLiquidity {
        /// First asset
        x: Address,
        /// Second asset
        y: Address,
        /// Shares to burn
        shares: u128,
    },
    /// Exact-input swap along a path
    Swap {
        /// Input amount
        amount_in: u128,
        /// Minimum acceptable output
        amount_out_min: u128,
        /// Assets traversed, input first
        path: Vec<Address>,
        /// Receiver of the output
        recipient: Address,
        /// Latest acceptable block timestamp
        deadline: u64,
    },

    // Lending administration
    /// Initialize a reserve
    InitReserve {
        /// Reserve asset
        asset: Address,
        /// Initial configuration
        params: ReserveParams,
    },
    /// Update a price
    UpdatePrice {
        /// Reserve asset
        asset: Address,
        /// USD per whole unit (WAD)
        price_usd: u128,
    },
    /// Freeze or unfreeze
    SetFrozen {
        /// Reserve asset
        asset: Address,
        /// New flag
        frozen: bool,
    },
    /// Activate or deactivate
    SetActive {
        /// Reserve asset
        asset: Address,
        /// New flag
        active: bool,
    },
    /// Change risk parameters
    UpdateRiskParams {
        /// Reserve asset
        asset: Address,
        /// Loan-to-value (WAD)
        ltv: u128,
        /// Liquidation threshold (WAD)
        liquidation_threshold: u128,
    },
    /// Hand over the administrative role
    TransferAdmin {
        /// New administrator
        new_admin: Address,
    },

    // Lending user operations
    /// Supply collateral
    SupplyCollateral {
        /// Asset supplied
        asset: Address,
        /// Amount in base units
        amount: u128,
    },
    /// Withdraw collateral
    WithdrawCollateral {
        /// Asset withdrawn
        asset: Address,
        /// Amount in base units
        amount: u128,
    },
    /// Borrow
    Borrow {
        /// Asset borrowed
        asset: Address,
        /// Amount in base units
        amount: u128,
    },
    /// Repay
    Repay {
        /// Asset repaid
        asset: Address,
        /// Amount in base units
        amount: u128,
    },
}

impl ProtocolOperation {
    /// Get the operation type name
    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::CreateToken { .. } => "CreateToken",
            Self::Mint { .. } => "Mint",
            Self::Approve { .. } => "Approve",
            Self::CreatePool { .. } => "CreatePool",
            Self::AddLiquidity { .. } => "AddLiquidity",
            Self::RemoveLiquidity { .. } => "RemoveLiquidity",
            Self::Swap { .. } => "Swap",
            Self::InitReserve { .. } => "InitReserve",
            Self::UpdatePrice { .. } => "UpdatePrice",
            Self::SetFrozen { .. } => "SetFrozen",
            Self::SetActive { .. } => "SetActive",
            Self::UpdateRiskParams { .. } => "UpdateRiskParams",
            Self::TransferAdmin { .. } => "TransferAdmin",
            Self::SupplyCollateral { .. } => "SupplyCollateral",
            Self::WithdrawCollateral { .. } => "WithdrawCollateral",
            Self::Borrow { .. } => "Borrow",
            Self::Repay { .. } => "Repay",
        }
    }

    /// Whether the operation is handled by the AMM engine
    pub fn is_amm(&self) -> bool {
        matches!(
            self,
            Self::CreatePool { .. }
                | Self::AddLiquidity { .. }
                | Self::RemoveLiquidity { .. }
                | Self::Swap { .. }
        )
    }

    /// Whether the operation is administrative
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Self::InitReserve { .. }
                | Self::UpdatePrice { .. }
                | Self::SetFrozen { .. }
                | Self::SetActive { .. }
                | Self::UpdateRiskParams { .. }
                | Self::TransferAdmin { .. }
        )
    }
}

/// An operation together with the account executing it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Calling account
    pub caller: Address,
    /// Operation to execute
    pub op: ProtocolOperation,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of any operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationResult {
    /// Operation without a return value
    Done,
    /// Token created
    TokenCreated {
        /// Address of the new token
        token: Address,
    },
    /// Pool created
    PoolCreated {
        /// Pool identifier
        pool_id: PoolId,
    },
    /// Liquidity added or removed
    Liquidity(LiquidityReceipt),
    /// Swap executed
    Swapped {
        /// Amount at every step of the path
        amounts: Vec<u128>,
    },
    /// Reserve state after an administrative change
    Reserve(Reserve),
    /// USD value supplied or borrowed (WAD)
    Valued {
        /// USD value (WAD)
        value_usd: u128,
    },
    /// Health factor after a withdrawal (WAD)
    Withdrawn {
        /// Health factor (WAD)
        health_factor: u128,
    },
    /// Debt remaining after a repayment
    Repaid {
        /// Remaining debt in base units
        remaining_debt: u128,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_json_round_trip() {
        let op = ProtocolOperation::Swap {
            amount_in: 100,
            amount_out_min: 90,
            path: vec![Address::from_label("A"), Address::from_label("B")],
            recipient: Address::from_label("bob"),
            deadline: 10,
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.starts_with("{\"Swap\":"));
        let back: ProtocolOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_operation_classification() {
        let pool = ProtocolOperation::CreatePool {
            x: Address::from_label("A"),
            y: Address::from_label("B"),
        };
        assert!(pool.is_amm());
        assert!(!pool.is_admin());
        assert_eq!(pool.operation_type(), "CreatePool");

        let price = ProtocolOperation::UpdatePrice {
            asset: Address::from_label("A"),
            price_usd: 1,
        };
        assert!(price.is_admin());
        assert!(!price.is_amm());
    }
}
