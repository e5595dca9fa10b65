//! # swaplend
//!
//! A decentralized-finance protocol core made of two engines sharing one
//! fixed-point convention (USD values scaled to 1e18):
//!
//! - **AMM**: constant-product pools, liquidity shares and multi-hop swaps
//! - **Lending**: collateral and debt ledger gated by a price-weighted
//!   health factor
//!
//! Both engines move tokens through the [`core::token::TokenLedger`] trait
//! and keep custody in their own account. Every public mutating operation
//! is atomic and guarded against reentrant calls.
//!
//! ## Example
//!
//! ```rust,ignore
//! use swaplend::prelude::*;
//!
//! let mut protocol = Protocol::new(ProtocolConfig::default())?;
//! protocol.begin_block(1, 1_700_000_000)?;
//!
//! let usdc = protocol.create_token("USDC", 6)?.address();
//! let weth = protocol.create_token("WETH", 18)?.address();
//!
//! protocol.execute(alice, ProtocolOperation::AddLiquidity {
//!     x: usdc, y: weth, amount_x: 2_000_000_000, amount_y: WAD,
//! })?;
//! let out = protocol.amm().quote(&usdc, &weth, 1_000_000)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications
)]

pub mod amm;
pub mod core;
pub mod error;
pub mod events;
pub mod lending;
pub mod protocol;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::amm::{AmmEngine, LiquidityReceipt, Pool, PoolId};
    pub use crate::core::{
        config::{AmmParams, LendingParams, ProtocolConfig},
        context::CallContext,
        token::{InMemoryToken, TokenLedger, TokenRegistry},
    };
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::events::EventIndexer;
    pub use crate::lending::{AccountData, LendingEngine, Reserve, ReserveParams};
    pub use crate::protocol::{
        Call, EventLog, OperationResult, Protocol, ProtocolEvent, ProtocolOperation,
    };
    pub use crate::utils::{
        constants::WAD,
        crypto::{Address, Hash},
    };
}

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol name
pub const PROTOCOL_NAME: &str = "swaplend";
