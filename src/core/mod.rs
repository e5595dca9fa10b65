//! Core modules shared by both engines.
//!
//! This module contains the fundamental building blocks:
//! - Configuration and engine parameters
//! - Call context (caller and block)
//! - Token ledger interface and registry
//! - Token settlement with compensation
//! - Reentrancy guard

pub mod config;
pub mod context;
pub mod guard;
pub mod settlement;
pub mod token;

pub use config::*;
pub use context::*;
pub use guard::*;
pub use settlement::*;
pub use token::*;
