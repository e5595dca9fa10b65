//! Event Indexer - rebuilds protocol statistics from the event stream.
//!
//! The engines keep no aggregates. The indexer consumes their events and
//! derives per-asset swap volume, total value locked (pooled liquidity plus
//! lending liquidity) and per-type transaction counts.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::events::{EventLog, ProtocolEvent};
use crate::utils::crypto::Address;

// ═══════════════════════════════════════════════════════════════════════════════
// STORED EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// An event with its position in the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Sequential id (0-based)
    pub id: u64,
    /// The event
    pub event: ProtocolEvent,
}

// ═══════════════════════════════════════════════════════════════════════════════
// INDEXER STATISTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// Statistics about the event indexer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerStatistics {
    /// Total events indexed
    pub total_events: u64,
    /// Events by type
    pub events_by_type: BTreeMap<String, u64>,
    /// Latest block indexed
    pub latest_block: u64,
    /// Distinct accounts that triggered events
    pub unique_accounts: u64,
}

/// Value locked in one asset, in base units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedValue {
    /// Held by AMM pools
    pub pooled: u128,
    /// Available liquidity of the lending reserve
    pub lending: u128,
}

impl LockedValue {
    /// Pooled plus lending
    pub fn total(&self) -> u128 {
        self.pooled.saturating_add(self.lending)
    }
}

#[derive(Debug, Default)]
struct IndexState {
    events: Vec<StoredEvent>,
    type_counts: BTreeMap<String, u64>,
    accounts: BTreeSet<Address>,
    volume: BTreeMap<Address, u128>,
    locked: BTreeMap<Address, LockedValue>,
    latest_block: u64,
}

impl IndexState {
    fn locked_mut(&mut self, asset: Address) -> &mut LockedValue {
        self.locked.entry(asset).or_default()
    }

    fn apply(&mut self, event: &ProtocolEvent) {
        match event {
            ProtocolEvent::LiquidityAdded(e) => {
                add(&mut self.locked_mut(e.asset_a).pooled, e.amount_a);
                add(&mut self.locked_mut(e.asset_b).pooled, e.amount_b);
            }
            ProtocolEvent::LiquidityRemoved(e) => {
                sub(&mut self.locked_mut(e.asset_a).pooled, e.amount_a);
                sub(&mut self.locked_mut(e.asset_b).pooled, e.amount_b);
            }
            ProtocolEvent::Swap(e) => {
                for (asset, amount) in e.path.iter().zip(&e.amounts) {
                    add(self.volume.entry(*asset).or_insert(0), *amount);
                }
                // Intermediate hops cancel out; only the ends change pooled value.
                if let (Some(first), Some(last)) = (e.path.first(), e.path.last()) {
                    add(&mut self.locked_mut(*first).pooled, e.amount_in());
                    sub(&mut self.locked_mut(*last).pooled, e.amount_out());
                }
            }
            ProtocolEvent::CollateralSupplied(e) => add(&mut self.locked_mut(e.asset).lending, e.amount),
            ProtocolEvent::CollateralWithdrawn(e) => sub(&mut self.locked_mut(e.asset).lending, e.amount),
            ProtocolEvent::TokenBorrowed(e) => sub(&mut self.locked_mut(e.asset).lending, e.amount),
            ProtocolEvent::TokenRepaid(e) => add(&mut self.locked_mut(e.asset).lending, e.amount),
            ProtocolEvent::PoolCreated(_) | ProtocolEvent::ReserveUpdated(_) => {}
        }
    }
}

fn add(slot: &mut u128, amount: u128) {
    *slot = slot.saturating_add(amount);
}

fn sub(slot: &mut u128, amount: u128) {
    *slot = slot.saturating_sub(amount);
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT INDEXER
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory event index; clones share the same index
#[derive(Debug, Clone, Default)]
pub struct EventIndexer {
    state: Arc<RwLock<IndexState>>,
}

impl EventIndexer {
    /// Create an empty indexer
    pub fn new() -> Self {
        Self::default()
    }

    /// Index one event
    pub fn index(&self, event: ProtocolEvent) -> Result<StoredEvent> {
        let mut state = self.state.write().map_err(|_| Error::Lock)?;
        let stored = StoredEvent {
            id: state.events.len() as u64,
            event,
        };

        state.apply(&stored.event);
        *state
            .type_counts
            .entry(stored.event.event_type().to_string())
            .or_insert(0) += 1;
        state.accounts.insert(*stored.event.account());
        state.latest_block = state.latest_block.max(stored.event.block_height());
        state.events.push(stored.clone());

        debug!("Indexed event {} ({})", stored.id, stored.event.event_type());
        Ok(stored)
    }

    /// Index a batch of events in order
    pub fn index_all(&self, events: impl IntoIterator<Item = ProtocolEvent>) -> Result<usize> {
        let mut count = 0;
        for event in events {
            self.index(event)?;
            count += 1;
        }
        Ok(count)
    }

    /// Index every event of a log
    pub fn index_log(&self, log: &EventLog) -> Result<usize> {
        self.index_all(log.events().iter().cloned())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Get event by id
    pub fn get_event(&self, id: u64) -> Result<Option<StoredEvent>> {
        let state = self.state.read().map_err(|_| Error::Lock)?;
        Ok(usize::try_from(id).ok().and_then(|i| state.events.get(i)).cloned())
    }

    /// Events of a given type
    pub fn get_events_by_type(&self, event_type: &str) -> Result<Vec<StoredEvent>> {
        self.filtered(|e| e.event_type() == event_type)
    }

    /// Events triggered by an account
    pub fn get_account_events(&self, account: &Address) -> Result<Vec<StoredEvent>> {
        self.filtered(|e| e.account() == account)
    }

    /// Events within an inclusive block range
    pub fn get_block_range(&self, from_block: u64, to_block: u64) -> Result<Vec<StoredEvent>> {
        self.filtered(|e| (from_block..=to_block).contains(&e.block_height()))
    }

    /// Cumulative swap volume through an asset (every hop counted)
    pub fn volume(&self, asset: &Address) -> Result<u128> {
        let state = self.state.read().map_err(|_| Error::Lock)?;
        Ok(state.volume.get(asset).copied().unwrap_or(0))
    }

    /// Value locked in an asset
    pub fn locked_value(&self, asset: &Address) -> Result<LockedValue> {
        let state = self.state.read().map_err(|_| Error::Lock)?;
        Ok(state.locked.get(asset).copied().unwrap_or_default())
    }

    /// Value locked per asset
    pub fn tvl(&self) -> Result<BTreeMap<Address, LockedValue>> {
        let state = self.state.read().map_err(|_| Error::Lock)?;
        Ok(state.locked.clone())
    }

    /// Number of events of one type
    pub fn transaction_count(&self, event_type: &str) -> Result<u64> {
        let state = self.state.read().map_err(|_| Error::Lock)?;
        Ok(state.type_counts.get(event_type).copied().unwrap_or(0))
    }

    /// Get statistics
    pub fn statistics(&self) -> Result<IndexerStatistics> {
        let state = self.state.read().map_err(|_| Error::Lock)?;
        Ok(IndexerStatistics {
            total_events: state.events.len() as u64,
            events_by_type: state.type_counts.clone(),
            latest_block: state.latest_block,
            unique_accounts: state.accounts.len() as u64,
        })
    }

    /// Get total event count
    pub fn count(&self) -> Result<u64> {
        let state = self.state.read().map_err(|_| Error::Lock)?;
        Ok(state.events.len() as u64)
    }

    fn filtered<F>(&self, predicate: F) -> Result<Vec<StoredEvent>>
    where
        F: Fn(&ProtocolEvent) -> bool,
    {
        let state = self.state.read().map_err(|_| Error::Lock)?;
        Ok(state
            .events
            .iter()
            .filter(|s| predicate(&s.event))
            .cloned()
            .collect())
    }
}
