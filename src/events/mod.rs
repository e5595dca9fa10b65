//! Event indexing for the swaplend protocol.
//!
//! Observers reconstruct historical statistics from the event stream:
//! - Swap volume per asset
//! - Total value locked (pools and lending reserves)
//! - Transaction counts per event type
//!
//! ```rust,ignore
//! use swaplend::events::EventIndexer;
//!
//! let indexer = EventIndexer::new();
//! indexer.index_log(&protocol.end_block())?;
//! let locked = indexer.locked_value(&usdc)?;
//! ```

pub mod indexer;

pub use indexer::*;

pub use crate::protocol::events::{EventLog, ProtocolEvent};
