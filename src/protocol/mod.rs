//! Protocol module - orchestration, operations and events.
//!
//! This module provides the state machine that executes serialized
//! operations against both engines, and the event types they emit.

pub mod events;
pub mod operations;
pub mod state_machine;

pub use events::*;
pub use operations::*;
pub use state_machine::*;
