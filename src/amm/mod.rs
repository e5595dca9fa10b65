//! Constant-product automated market maker.
//!
//! - Pools keyed by an order-independent id
//! - Liquidity shares (geometric-mean bootstrap, proportional afterwards)
//! - Exact-input swaps along multi-hop paths with a per-mille fee

pub mod engine;
pub mod pool;

pub use engine::{AmmEngine, AmmState};
pub use pool::{sort_assets, LiquidityReceipt, Pool, PoolId};
