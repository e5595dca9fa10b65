//! Utility modules for the swaplend protocol.
//!
//! This module contains shared utilities used by both engines:
//! - Hashing and addresses
//! - Fixed-point arithmetic and decimal normalization
//! - Validation helpers
//! - Constants

pub mod constants;
pub mod crypto;
pub mod math;
pub mod validation;

pub use constants::*;
pub use crypto::*;
pub use math::*;
pub use validation::*;
