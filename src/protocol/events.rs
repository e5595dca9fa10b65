//! Protocol events for state change notifications.
//!
//! Events are emitted for every successful state change of either engine.
//! Observers rebuild volume, TVL and transaction statistics from this
//! stream; the engines themselves keep no aggregates.

use serde::{Deserialize, Serialize};

use crate::amm::pool::PoolId;
use crate::utils::crypto::{merkle_root, Address, Hash};

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// All protocol event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolEvent {
    // AMM Events
    /// Pool was created
    PoolCreated(PoolCreatedEvent),
    /// Liquidity was added to a pool
    LiquidityAdded(LiquidityAddedEvent),
    /// Liquidity was removed from a pool
    LiquidityRemoved(LiquidityRemovedEvent),
    /// Tokens were swapped along a path
    Swap(SwapEvent),

    // Lending Events
    /// Collateral was supplied
    CollateralSupplied(CollateralSuppliedEvent),
    /// Collateral was withdrawn
    CollateralWithdrawn(CollateralWithdrawnEvent),
    /// Tokens were borrowed
    TokenBorrowed(TokenBorrowedEvent),
    /// Debt was repaid
    TokenRepaid(TokenRepaidEvent),
    /// Reserve configuration changed
    ReserveUpdated(ReserveUpdatedEvent),
}

impl ProtocolEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PoolCreated(_) => "PoolCreated",
            Self::LiquidityAdded(_) => "LiquidityAdded",
            Self::LiquidityRemoved(_) => "LiquidityRemoved",
            Self::Swap(_) => "Swap",
            Self::CollateralSupplied(_) => "CollateralSupplied",
            Self::CollateralWithdrawn(_) => "CollateralWithdrawn",
            Self::TokenBorrowed(_) => "TokenBorrowed",
            Self::TokenRepaid(_) => "TokenRepaid",
            Self::ReserveUpdated(_) => "ReserveUpdated",
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::PoolCreated(e) => e.timestamp,
            Self::LiquidityAdded(e) => e.timestamp,
            Self::LiquidityRemoved(e) => e.timestamp,
            Self::Swap(e) => e.timestamp,
            Self::CollateralSupplied(e) => e.timestamp,
            Self::CollateralWithdrawn(e) => e.timestamp,
            Self::TokenBorrowed(e) => e.timestamp,
            Self::TokenRepaid(e) => e.timestamp,
            Self::ReserveUpdated(e) => e.timestamp,
        }
    }

    /// Get the block height of the event
    pub fn block_height(&self) -> u64 {
        match self {
            Self::PoolCreated(e) => e.block_height,
            Self::LiquidityAdded(e) => e.block_height,
            Self::LiquidityRemoved(e) => e.block_height,
            Self::Swap(e) => e.block_height,
            Self::CollateralSupplied(e) => e.block_height,
            Self::CollateralWithdrawn(e) => e.block_height,
            Self::TokenBorrowed(e) => e.block_height,
            Self::TokenRepaid(e) => e.block_height,
            Self::ReserveUpdated(e) => e.block_height,
        }
    }

    /// Account that triggered the event
    pub fn account(&self) -> &Address {
        match self {
            Self::PoolCreated(e) => &e.creator,
            Self::LiquidityAdded(e) => &e.provider,
            Self::LiquidityRemoved(e) => &e.provider,
            Self::Swap(e) => &e.sender,
            Self::CollateralSupplied(e) => &e.user,
            Self::CollateralWithdrawn(e) => &e.user,
            Self::TokenBorrowed(e) => &e.user,
            Self::TokenRepaid(e) => &e.user,
            Self::ReserveUpdated(e) => &e.admin,
        }
    }

    /// Compute event hash
    pub fn hash(&self) -> Hash {
        let data = bincode::serialize(self).unwrap_or_default();
        Hash::sha256(&data)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AMM EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Event emitted when a pool is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCreatedEvent {
    /// Pool identifier
    pub pool_id: PoolId,
    /// Lower asset of the pair
    pub asset_a: Address,
    /// Higher asset of the pair
    pub asset_b: Address,
    /// Account that created the pool
    pub creator: Address,
    /// Block height
    pub block_height: u64,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when liquidity is added
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityAddedEvent {
    /// Pool identifier
    pub pool_id: PoolId,
    /// Liquidity provider
    pub provider: Address,
    /// Lower asset of the pair
    pub asset_a: Address,
    /// Higher asset of the pair
    pub asset_b: Address,
    /// Amount of asset A deposited
    pub amount_a: u128,
    /// Amount of asset B deposited
    pub amount_b: u128,
    /// Shares minted to the provider
    pub shares: u128,
    /// Block height
    pub block_height: u64,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when liquidity is removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityRemovedEvent {
    /// Pool identifier
    pub pool_id: PoolId,
    /// Liquidity provider
    pub provider: Address,
    /// Lower asset of the pair
    pub asset_a: Address,
    /// Higher asset of the pair
    pub asset_b: Address,
    /// Amount of asset A returned
    pub amount_a: u128,
    /// Amount of asset B returned
    pub amount_b: u128,
    /// Shares burned
    pub shares: u128,
    /// Block height
    pub block_height: u64,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted for a (multi-hop) swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapEvent {
    /// Account paying the input
    pub sender: Address,
    /// Account receiving the output
    pub recipient: Address,
    /// Assets traversed, input first
    pub path: Vec<Address>,
    /// Amount at every step of the path (first = input, last = output)
    pub amounts: Vec<u128>,
    /// Block height
    pub block_height: u64,
    /// Timestamp
    pub timestamp: u64,
}

impl SwapEvent {
    /// Input amount
    pub fn amount_in(&self) -> u128 {
        self.amounts.first().copied().unwrap_or(0)
    }

    /// Output amount
    pub fn amount_out(&self) -> u128 {
        self.amounts.last().copied().unwrap_or(0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LENDING EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Event emitted when collateral is supplied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralSuppliedEvent {
    /// Supplier
    pub user: Address,
    /// Asset supplied
    pub asset: Address,
    /// Amount in base units
    pub amount: u128,
    /// USD value at the current price (WAD)
    pub value_usd: u128,
    /// Block height
    pub block_height: u64,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when collateral is withdrawn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralWithdrawnEvent {
    /// Owner who withdrew
    pub user: Address,
    /// Asset withdrawn
    pub asset: Address,
    /// Amount in base units
    pub amount: u128,
    /// USD value at the current price (WAD)
    pub value_usd: u128,
    /// Health factor after the withdrawal (WAD, `u128::MAX` without debt)
    pub health_factor: u128,
    /// Block height
    pub block_height: u64,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when tokens are borrowed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBorrowedEvent {
    /// Borrower
    pub user: Address,
    /// Asset borrowed
    pub asset: Address,
    /// Amount in base units
    pub amount: u128,
    /// USD value at the current price (WAD)
    pub value_usd: u128,
    /// Nominal annual rate, informational only (WAD)
    pub rate: u128,
    /// Block height
    pub block_height: u64,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when debt is repaid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRepaidEvent {
    /// Borrower whose debt was repaid
    pub user: Address,
    /// Asset repaid
    pub asset: Address,
    /// Amount in base units
    pub amount: u128,
    /// USD value at the current price (WAD)
    pub value_usd: u128,
    /// Remaining debt in this asset
    pub remaining_debt: u128,
    /// Block height
    pub block_height: u64,
    /// Timestamp
    pub timestamp: u64,
}

/// What an administrative reserve update changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReserveUpdateKind {
    /// Reserve initialized
    Initialized,
    /// Price changed
    Price,
    /// LTV or liquidation threshold changed
    RiskParams,
    /// Frozen flag toggled
    Frozen,
    /// Active flag toggled
    Active,
}

/// Event emitted when a reserve is initialized or reconfigured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveUpdatedEvent {
    /// Administrator that made the change
    pub admin: Address,
    /// Reserve asset
    pub asset: Address,
    /// What changed
    pub kind: ReserveUpdateKind,
    /// Loan-to-value after the change (WAD)
    pub ltv: u128,
    /// Liquidation threshold after the change (WAD)
    pub liquidation_threshold: u128,
    /// Price after the change (WAD)
    pub price_usd: u128,
    /// Active flag after the change
    pub is_active: bool,
    /// Frozen flag after the change
    pub is_frozen: bool,
    /// Block height
    pub block_height: u64,
    /// Timestamp
    pub timestamp: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounded in-memory event log
///
/// Once `max_events` is reached the oldest events are pruned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<ProtocolEvent>,
    max_events: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create a new empty event log with default retention
    pub fn new() -> Self {
        Self::with_capacity(crate::utils::constants::DEFAULT_MAX_EVENTS)
    }

    /// Create a log keeping at most `max_events`
    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: Vec::new(),
            max_events: max_events.max(1),
        }
    }

    /// Add an event to the log (with pruning)
    pub fn push(&mut self, event: ProtocolEvent) {
        self.events.push(event);
        if self.events.len() > self.max_events {
            self.events.drain(0..self.events.len() - self.max_events);
        }
    }

    /// Get all events
    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    /// Get events of a specific type
    pub fn filter_by_type(&self, event_type: &str) -> Vec<&ProtocolEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Get events triggered by an account
    pub fn events_for_account(&self, account: &Address) -> Vec<&ProtocolEvent> {
        self.events.iter().filter(|e| e.account() == account).collect()
    }

    /// Get the number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Remove and return all events
    pub fn drain(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.events)
    }

    /// Clear all events
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Compute merkle root of all events
    pub fn merkle_root(&self) -> Hash {
        let hashes: Vec<Hash> = self.events.iter().map(|e| e.hash()).collect();
        merkle_root(&hashes)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
