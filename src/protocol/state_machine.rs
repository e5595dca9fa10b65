//! Protocol State Machine - orchestration of both engines.
//!
//! [`Protocol`] owns the token registry, the AMM and lending engines, a
//! logical clock and a combined event log. Operations are executed one at
//! a time through `&mut self`, which gives every call a total order. The
//! engines never call each other.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::amm::engine::AmmEngine;
use crate::core::config::ProtocolConfig;
use crate::core::context::CallContext;
use crate::core::token::{InMemoryToken, TokenLedger, TokenRegistry};
use crate::error::{Error, Result};
use crate::lending::engine::LendingEngine;
use crate::protocol::events::*;
use crate::protocol::operations::*;
use crate::utils::crypto::{Address, Hash};

/// Label of the AMM custody account
const AMM_ACCOUNT: &str = "swaplend/amm";

/// Label of the lending custody account
const LENDING_ACCOUNT: &str = "swaplend/lending";

// ═══════════════════════════════════════════════════════════════════════════════
// STATE MACHINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Protocol state machine - orchestrates all operations
pub struct Protocol {
    /// Protocol configuration
    config: ProtocolConfig,
    /// Token lookup shared with both engines
    registry: TokenRegistry,
    /// In-memory ledgers created through [`ProtocolOperation::CreateToken`]
    tokens: BTreeMap<Address, Arc<InMemoryToken>>,
    /// Constant-product market maker
    amm: AmmEngine,
    /// Lending pool
    lending: LendingEngine,
    /// Current block height
    block_height: u64,
    /// Current timestamp
    timestamp: u64,
    /// Events of the current block
    event_log: EventLog,
}

impl Protocol {
    /// Create a protocol with no tokens, pools or reserves
    pub fn new(config: ProtocolConfig) -> Result<Self> {
        config.validate()?;
        let registry = TokenRegistry::new();
        let amm = AmmEngine::new(
            Address::from_label(AMM_ACCOUNT),
            registry.clone(),
            config.amm.clone(),
        )?;
        let lending = LendingEngine::new(
            Address::from_label(LENDING_ACCOUNT),
            config.admin,
            registry.clone(),
            config.lending.clone(),
        );
        let capacity = config.amm.max_events.saturating_add(config.lending.max_events);

        info!(
            "Protocol initialized: fee={}‰ admin={}",
            config.amm.fee_per_mille,
            config.admin.short()
        );
        Ok(Self {
            config,
            registry,
            tokens: BTreeMap::new(),
            amm,
            lending,
            block_height: 0,
            timestamp: 0,
            event_log: EventLog::with_capacity(capacity),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BLOCK PROCESSING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Begin a new block
    pub fn begin_block(&mut self, height: u64, timestamp: u64) -> Result<()> {
        if height < self.block_height || timestamp < self.timestamp {
            return Err(Error::InvalidParameter {
                name: "block".into(),
                reason: format!(
                    "({}, {}) precedes current ({}, {})",
                    height, timestamp, self.block_height, self.timestamp
                ),
            });
        }
        self.block_height = height;
        self.timestamp = timestamp;
        debug!("Block {} begun at {}", height, timestamp);
        Ok(())
    }

    /// End the current block, returning its events
    pub fn end_block(&mut self) -> EventLog {
        let capacity = self
            .config
            .amm
            .max_events
            .saturating_add(self.config.lending.max_events);
        std::mem::replace(&mut self.event_log, EventLog::with_capacity(capacity))
    }

    /// Context for a call made by `caller` in the current block
    pub fn context(&self, caller: Address) -> CallContext {
        CallContext::new(caller, self.block_height, self.timestamp)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TOKENS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Register an external ledger
    pub fn register_token(&mut self, token: Arc<dyn TokenLedger>) -> Result<Address> {
        self.registry.register(token)
    }

    /// Create and register an in-memory token
    pub fn create_token(&mut self, symbol: &str, decimals: u8) -> Result<Arc<InMemoryToken>> {
        let token = Arc::new(InMemoryToken::new(symbol, decimals)?);
        let address = self.registry.register(token.clone())?;
        self.tokens.insert(address, token.clone());
        info!("Token {} created at {}", symbol, address.short());
        Ok(token)
    }

    /// In-memory token created by this protocol
    pub fn token(&self, address: &Address) -> Result<Arc<InMemoryToken>> {
        self.tokens
            .get(address)
            .cloned()
            .ok_or_else(|| Error::AssetNotSupported(address.short()))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // OPERATION EXECUTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Execute one call
    pub fn apply(&mut self, call: Call) -> Result<OperationResult> {
        self.execute(call.caller, call.op)
    }

    /// Execute a protocol operation on behalf of `caller`
    pub fn execute(&mut self, caller: Address, op: ProtocolOperation) -> Result<OperationResult> {
        let op_type = op.operation_type();
        let ctx = self.context(caller);

        let result = match op {
            ProtocolOperation::CreateToken { symbol, decimals } => self
                .create_token(&symbol, decimals)
                .map(|t| OperationResult::TokenCreated { token: t.address() }),
            ProtocolOperation::Mint { token, to, amount } => self
                .token(&token)
                .and_then(|t| t.mint(&to, amount))
                .map(|_| OperationResult::Done),
            ProtocolOperation::Approve {
                token,
                spender,
                amount,
            } => self
                .token(&token)
                .and_then(|t| t.approve(&caller, &spender, amount))
                .map(|_| OperationResult::Done),

            ProtocolOperation::CreatePool { x, y } => self
                .amm
                .create_pool(&ctx, &x, &y)
                .map(|pool_id| OperationResult::PoolCreated { pool_id }),
            ProtocolOperation::AddLiquidity {
                x,
                y,
                amount_x,
                amount_y,
            } => self
                .amm
                .add_liquidity(&ctx, &x, &y, amount_x, amount_y)
                .map(OperationResult::Liquidity),
            ProtocolOperation::RemoveLiquidity { x, y, shares } => self
                .amm
                .remove_liquidity(&ctx, &x, &y, shares)
                .map(OperationResult::Liquidity),
            ProtocolOperation::Swap {
                amount_in,
                amount_out_min,
                path,
                recipient,
                deadline,
            } => self
                .amm
                .swap_exact_tokens_for_tokens(&ctx, amount_in, amount_out_min, &path, &recipient, deadline)
                .map(|amounts| OperationResult::Swapped { amounts }),

            ProtocolOperation::InitReserve { asset, params } => self
                .lending
                .init_reserve(&ctx, &asset, params)
                .map(OperationResult::Reserve),
            ProtocolOperation::UpdatePrice { asset, price_usd } => self
                .lending
                .update_price(&ctx, &asset, price_usd)
                .map(OperationResult::Reserve),
            ProtocolOperation::SetFrozen { asset, frozen } => self
                .lending
                .set_frozen(&ctx, &asset, frozen)
                .map(OperationResult::Reserve),
            ProtocolOperation::SetActive { asset, active } => self
                .lending
                .set_active(&ctx, &asset, active)
                .map(OperationResult::Reserve),
            ProtocolOperation::UpdateRiskParams {
                asset,
                ltv,
                liquidation_threshold,
            } => self
                .lending
                .update_risk_params(&ctx, &asset, ltv, liquidation_threshold)
                .map(OperationResult::Reserve),
            ProtocolOperation::TransferAdmin { new_admin } => self
                .lending
                .transfer_admin(&ctx, &new_admin)
                .map(|_| OperationResult::Done),

            ProtocolOperation::SupplyCollateral { asset, amount } => self
                .lending
                .supply_collateral(&ctx, &asset, amount)
                .map(|value_usd| OperationResult::Valued { value_usd }),
            ProtocolOperation::WithdrawCollateral { asset, amount } => self
                .lending
                .withdraw_collateral(&ctx, &asset, amount)
                .map(|health_factor| OperationResult::Withdrawn { health_factor }),
            ProtocolOperation::Borrow { asset, amount } => self
                .lending
                .borrow(&ctx, &asset, amount)
                .map(|value_usd| OperationResult::Valued { value_usd }),
            ProtocolOperation::Repay { asset, amount } => self
                .lending
                .repay(&ctx, &asset, amount)
                .map(|remaining_debt| OperationResult::Repaid { remaining_debt }),
        };

        self.collect_events();
        match &result {
            Ok(_) => debug!("{} by {} succeeded", op_type, caller.short()),
            Err(e) => warn!("{} by {} failed: {} (code {})", op_type, caller.short(), e, e.code()),
        }
        result
    }

    fn collect_events(&mut self) {
        for event in self.amm.drain_events() {
            self.event_log.push(event);
        }
        for event in self.lending.drain_events() {
            self.event_log.push(event);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// AMM engine
    pub fn amm(&self) -> &AmmEngine {
        &self.amm
    }

    /// Lending engine
    pub fn lending(&self) -> &LendingEngine {
        &self.lending
    }

    /// Token registry
    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    /// Protocol configuration
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Events of the current block
    pub fn events(&self) -> &[ProtocolEvent] {
        self.event_log.events()
    }

    /// Get current block height
    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    /// Get current timestamp
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Commitment over both engines' state
    pub fn state_hash(&self) -> Result<Hash> {
        let mut data = Vec::new();
        data.extend_from_slice(self.amm.state_hash()?.as_bytes());
        data.extend_from_slice(self.lending.state_hash()?.as_bytes());
        Ok(Hash::sha256(&data))
    }

    /// Verify the invariants of both engines
    pub fn verify_invariants(&self) -> Result<()> {
        self.amm.verify_invariants()?;
        self.lending.verify_invariants()
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("block_height", &self.block_height)
            .field("timestamp", &self.timestamp)
            .field("amm", &self.amm)
            .field("lending", &self.lending)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
