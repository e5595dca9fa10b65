//! AMM Engine - constant-product pools, liquidity and multi-hop swaps.
//!
//! Every mutating operation follows the same sequence:
//! 1. enter the reentrancy guard
//! 2. validate and compute against a read snapshot of the state
//! 3. pull inbound tokens into engine custody
//! 4. commit the new records under a short write lock
//! 5. pay out, restoring the previous records if the payout fails and
//!    every completed transfer could be reversed
//!
//! No lock is held while a token ledger runs, so a ledger calling back
//! into read queries sees only committed state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info};

use crate::amm::pool::{LiquidityReceipt, Pool, PoolId};
use crate::core::config::AmmParams;
use crate::core::context::CallContext;
use crate::core::guard::ReentrancyGuard;
use crate::core::settlement::Settlement;
use crate::core::token::TokenRegistry;
use crate::error::{Error, Result};
use crate::protocol::events::*;
use crate::utils::crypto::{Address, Hash};
use crate::utils::math::{amount_out, isqrt_product, mul_div, safe_add};
use crate::utils::validation::*;

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Persistent records of the AMM engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmmState {
    /// Pools by id
    pub pools: BTreeMap<PoolId, Pool>,
    /// Liquidity positions: pool -> provider -> shares
    pub positions: BTreeMap<PoolId, BTreeMap<Address, u128>>,
}

impl AmmState {
    /// Shares held by a provider in a pool
    pub fn shares_of(&self, pool_id: &PoolId, provider: &Address) -> u128 {
        self.positions
            .get(pool_id)
            .and_then(|p| p.get(provider))
            .copied()
            .unwrap_or(0)
    }

    fn set_shares(&mut self, pool_id: PoolId, provider: Address, shares: u128) {
        self.positions.entry(pool_id).or_default().insert(provider, shares);
    }

    /// Check pool consistency and that positions sum to total shares
    pub fn verify_invariants(&self) -> Result<()> {
        for (id, pool) in &self.pools {
            if !pool.is_consistent() {
                return Err(Error::InvariantViolation(format!(
                    "pool {} has reserves ({}, {}) with {} shares",
                    id, pool.reserve_a, pool.reserve_b, pool.total_shares
                )));
            }
            let held = self
                .positions
                .get(id)
                .map(|p| p.values().try_fold(0u128, |acc, s| safe_add(acc, *s)))
                .transpose()?
                .unwrap_or(0);
            if held != pool.total_shares {
                return Err(Error::InvariantViolation(format!(
                    "pool {} positions sum to {} but total is {}",
                    id, held, pool.total_shares
                )));
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AMM ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Constant-product market maker
pub struct AmmEngine {
    /// Custody account of the engine on every token ledger
    address: Address,
    /// Token lookup
    registry: TokenRegistry,
    /// Engine parameters
    params: AmmParams,
    /// Pools and positions
    state: RwLock<AmmState>,
    /// Emitted events
    events: RwLock<EventLog>,
    /// Rejects nested mutating calls
    guard: ReentrancyGuard,
}

impl AmmEngine {
    /// Create an engine with no pools
    pub fn new(address: Address, registry: TokenRegistry, params: AmmParams) -> Result<Self> {
        validate_fee(params.fee_per_mille)?;
        Ok(Self {
            address,
            registry,
            events: RwLock::new(EventLog::with_capacity(params.max_events)),
            params,
            state: RwLock::new(AmmState::default()),
            guard: ReentrancyGuard::new("amm"),
        })
    }

    /// Restore an engine from a [`AmmEngine::to_bytes`] snapshot
    pub fn from_bytes(
        address: Address,
        registry: TokenRegistry,
        params: AmmParams,
        bytes: &[u8],
    ) -> Result<Self> {
        let state: AmmState =
            bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))?;
        state.verify_invariants()?;
        let engine = Self::new(address, registry, params)?;
        *engine.write_state()? = state;
        Ok(engine)
    }

    /// Serialize pools and positions
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let state = self.read_state()?;
        bincode::serialize(&*state).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Hash of the serialized state
    pub fn state_hash(&self) -> Result<Hash> {
        Ok(Hash::sha256(&self.to_bytes()?))
    }

    /// Engine custody address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Swap fee in per mille
    pub fn fee_per_mille(&self) -> u128 {
        self.params.fee_per_mille
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // POOL MANAGEMENT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Order-independent pool identifier
    pub fn pool_id(&self, x: &Address, y: &Address) -> PoolId {
        PoolId::from_assets(x, y)
    }

    /// Record a new empty pool for two distinct supported assets
    pub fn create_pool(&self, ctx: &CallContext, x: &Address, y: &Address) -> Result<PoolId> {
        let _entered = self.guard.enter()?;
        validate_pair(x, y)?;
        self.ensure_supported(x)?;
        self.ensure_supported(y)?;

        let pool = Pool::new(x, y);
        let id = pool.id;
        {
            let mut state = self.write_state()?;
            if state.pools.contains_key(&id) {
                return Err(Error::PoolAlreadyExists(id.to_string()));
            }
            state.pools.insert(id, pool.clone());
        }

        self.emit_pool_created(ctx, &pool);
        info!("Pool {} created by {}", id, ctx.caller.short());
        Ok(id)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDITY
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposit both assets and mint shares, creating the pool if needed
    pub fn add_liquidity(
        &self,
        ctx: &CallContext,
        x: &Address,
        y: &Address,
        amount_x: u128,
        amount_y: u128,
    ) -> Result<LiquidityReceipt> {
        let _entered = self.guard.enter()?;
        validate_pair(x, y)?;
        validate_non_zero(amount_x)?;
        validate_non_zero(amount_y)?;
        self.ensure_supported(x)?;
        self.ensure_supported(y)?;

        let id = PoolId::from_assets(x, y);
        let (existing, shares_before) = {
            let state = self.read_state()?;
            (state.pools.get(&id).cloned(), state.shares_of(&id, &ctx.caller))
        };
        let created = existing.is_none();
        let mut pool = existing.unwrap_or_else(|| Pool::new(x, y));
        let (amount_a, amount_b) = pool.orient(x, amount_x, amount_y);

        let shares = if pool.total_shares == 0 {
            isqrt_product(amount_a, amount_b)?
        } else {
            let by_a = mul_div(amount_a, pool.total_shares, pool.reserve_a)?;
            let by_b = mul_div(amount_b, pool.total_shares, pool.reserve_b)?;
            by_a.min(by_b)
        };
        if shares == 0 {
            return Err(Error::InsufficientLiquidity {
                required: 1,
                available: 0,
            });
        }
        pool.deposit(amount_a, amount_b, shares)?;
        let position = safe_add(shares_before, shares)?;

        let mut settlement = Settlement::new(self.address, &self.registry);
        if let Err(e) = settlement
            .pull(x, &ctx.caller, amount_x)
            .and_then(|_| settlement.pull(y, &ctx.caller, amount_y))
        {
            return Err(settlement.abort(e));
        }

        match self.write_state() {
            Ok(mut state) => {
                state.pools.insert(id, pool.clone());
                state.set_shares(id, ctx.caller, position);
            }
            Err(e) => return Err(settlement.abort(e)),
        }

        if created {
            self.emit_pool_created(ctx, &pool);
            info!("Pool {} created by {}", id, ctx.caller.short());
        }
        self.emit(ProtocolEvent::LiquidityAdded(LiquidityAddedEvent {
            pool_id: id,
            provider: ctx.caller,
            asset_a: pool.asset_a,
            asset_b: pool.asset_b,
            amount_a,
            amount_b,
            shares,
            block_height: ctx.block_height,
            timestamp: ctx.timestamp,
        }));
        info!(
            "Liquidity added to {} by {}: {} / {} for {} shares",
            id,
            ctx.caller.short(),
            amount_a,
            amount_b,
            shares
        );

        Ok(LiquidityReceipt {
            pool_id: id,
            amount_a,
            amount_b,
            shares,
        })
    }

    /// Burn shares and return the proportional amounts of both assets
    pub fn remove_liquidity(
        &self,
        ctx: &CallContext,
        x: &Address,
        y: &Address,
        shares: u128,
    ) -> Result<LiquidityReceipt> {
        let _entered = self.guard.enter()?;
        validate_non_zero(shares)?;
        validate_pair(x, y)?;

        let id = PoolId::from_assets(x, y);
        let (previous, held) = {
            let state = self.read_state()?;
            let pool = state
                .pools
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::PoolNotFound(id.to_string()))?;
            (pool, state.shares_of(&id, &ctx.caller))
        };
        if previous.total_shares == 0 {
            return Err(Error::NoLiquidity(id.to_string()));
        }
        if held < shares {
            return Err(Error::InsufficientShares {
                required: shares,
                available: held,
            });
        }

        let amount_a = mul_div(shares, previous.reserve_a, previous.total_shares)?;
        let amount_b = mul_div(shares, previous.reserve_b, previous.total_shares)?;
        let mut pool = previous.clone();
        pool.withdraw(amount_a, amount_b, shares)?;

        {
            let mut state = self.write_state()?;
            state.pools.insert(id, pool.clone());
            state.set_shares(id, ctx.caller, held - shares);
        }

        let mut settlement = Settlement::new(self.address, &self.registry);
        let paid = pay_nonzero(&mut settlement, &pool.asset_a, &ctx.caller, amount_a)
            .and_then(|_| pay_nonzero(&mut settlement, &pool.asset_b, &ctx.caller, amount_b));
        if let Err(e) = paid {
            return Err(match settlement.compensate(e) {
                Ok(cause) => {
                    self.restore(id, previous, ctx.caller, held)?;
                    cause
                }
                Err(stranded) => {
                    error!(
                        "Keeping burn of {} shares in {} after unreversed payout",
                        shares, id
                    );
                    stranded
                }
            });
        }

        self.emit(ProtocolEvent::LiquidityRemoved(LiquidityRemovedEvent {
            pool_id: id,
            provider: ctx.caller,
            asset_a: pool.asset_a,
            asset_b: pool.asset_b,
            amount_a,
            amount_b,
            shares,
            block_height: ctx.block_height,
            timestamp: ctx.timestamp,
        }));
        info!(
            "Liquidity removed from {} by {}: {} shares for {} / {}",
            id,
            ctx.caller.short(),
            shares,
            amount_a,
            amount_b
        );

        Ok(LiquidityReceipt {
            pool_id: id,
            amount_a,
            amount_b,
            shares,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SWAPS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Amounts at every step of `path` for an exact input
    ///
    /// The first element is `amount_in`, the last is the final output.
    pub fn get_amounts_out(&self, amount_in: u128, path: &[Address]) -> Result<Vec<u128>> {
        validate_path(path)?;
        let state = self.read_state()?;
        let (amounts, _) = self.simulate(&state, amount_in, path)?;
        debug!("Quoted {} hops: {:?}", path.len() - 1, amounts);
        Ok(amounts)
    }

    /// Single-hop quote
    pub fn quote(&self, asset_in: &Address, asset_out: &Address, amount_in: u128) -> Result<u128> {
        let amounts = self.get_amounts_out(amount_in, &[*asset_in, *asset_out])?;
        Ok(amounts.last().copied().unwrap_or(0))
    }

    /// Swap an exact input along `path`, paying the output to `recipient`
    pub fn swap_exact_tokens_for_tokens(
        &self,
        ctx: &CallContext,
        amount_in: u128,
        amount_out_min: u128,
        path: &[Address],
        recipient: &Address,
        deadline: u64,
    ) -> Result<Vec<u128>> {
        let _entered = self.guard.enter()?;
        validate_deadline(deadline, ctx.timestamp)?;
        validate_non_zero(amount_in)?;
        validate_path(path)?;

        let (amounts, touched, previous) = {
            let state = self.read_state()?;
            let (amounts, touched) = self.simulate(&state, amount_in, path)?;
            let previous: Vec<Pool> = touched
                .keys()
                .filter_map(|id| state.pools.get(id).cloned())
                .collect();
            (amounts, touched, previous)
        };
        let final_out = amounts.last().copied().unwrap_or(0);
        if final_out < amount_out_min {
            return Err(Error::SlippageExceeded {
                amount_out: final_out,
                amount_out_min,
            });
        }

        let asset_in = path[0];
        let asset_out = path[path.len() - 1];

        let mut settlement = Settlement::new(self.address, &self.registry);
        if let Err(e) = settlement.pull(&asset_in, &ctx.caller, amount_in) {
            return Err(settlement.abort(e));
        }

        match self.write_state() {
            Ok(mut state) => state.pools.extend(touched),
            Err(e) => return Err(settlement.abort(e)),
        }

        if let Err(e) = pay_nonzero(&mut settlement, &asset_out, recipient, final_out) {
            return Err(match settlement.compensate(e) {
                Ok(cause) => {
                    self.restore_pools(previous)?;
                    cause
                }
                Err(stranded) => {
                    error!("Keeping swap reserves after unreversed transfer: {}", stranded);
                    stranded
                }
            });
        }

        self.emit(ProtocolEvent::Swap(SwapEvent {
            sender: ctx.caller,
            recipient: *recipient,
            path: path.to_vec(),
            amounts: amounts.clone(),
            block_height: ctx.block_height,
            timestamp: ctx.timestamp,
        }));
        info!(
            "Swap by {}: {} {} -> {} {} ({} hops)",
            ctx.caller.short(),
            amount_in,
            asset_in.short(),
            final_out,
            asset_out.short(),
            path.len() - 1
        );

        Ok(amounts)
    }

    /// Walk `path` hop by hop over working copies of the pools
    ///
    /// A pool visited twice sees the reserves left by its earlier hop.
    fn simulate(
        &self,
        state: &AmmState,
        amount_in: u128,
        path: &[Address],
    ) -> Result<(Vec<u128>, BTreeMap<PoolId, Pool>)> {
        let mut amounts = Vec::with_capacity(path.len());
        amounts.push(amount_in);
        let mut touched: BTreeMap<PoolId, Pool> = BTreeMap::new();
        let mut current = amount_in;

        for hop in path.windows(2) {
            let id = PoolId::from_assets(&hop[0], &hop[1]);
            if !touched.contains_key(&id) {
                let pool = state
                    .pools
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| Error::NoLiquidity(id.to_string()))?;
                touched.insert(id, pool);
            }
            let pool = touched
                .get_mut(&id)
                .ok_or_else(|| Error::NoLiquidity(id.to_string()))?;
            let (reserve_in, reserve_out) = pool.reserves_for(&hop[0]);
            if reserve_in == 0 || reserve_out == 0 {
                return Err(Error::NoLiquidity(id.to_string()));
            }
            let out = amount_out(current, reserve_in, reserve_out, self.params.fee_per_mille)?;
            pool.apply_swap(&hop[0], current, out)?;
            amounts.push(out);
            current = out;
        }

        Ok((amounts, touched))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Pool holding `x` and `y`, if recorded
    pub fn pool(&self, x: &Address, y: &Address) -> Result<Option<Pool>> {
        let id = PoolId::from_assets(x, y);
        Ok(self.read_state()?.pools.get(&id).cloned())
    }

    /// Reserves of `(x, y)` in the order asked; zero for unknown pools
    pub fn reserves(&self, x: &Address, y: &Address) -> Result<(u128, u128)> {
        Ok(self
            .pool(x, y)?
            .map(|pool| pool.reserves_for(x))
            .unwrap_or((0, 0)))
    }

    /// Shares held by `provider` in the pool of `x` and `y`
    pub fn shares_of(&self, x: &Address, y: &Address, provider: &Address) -> Result<u128> {
        let id = PoolId::from_assets(x, y);
        Ok(self.read_state()?.shares_of(&id, provider))
    }

    /// All pools, ordered by id
    pub fn pools(&self) -> Result<Vec<Pool>> {
        Ok(self.read_state()?.pools.values().cloned().collect())
    }

    /// Sum of all pool reserves of one asset
    pub fn total_reserves_of(&self, asset: &Address) -> Result<u128> {
        let state = self.read_state()?;
        state
            .pools
            .values()
            .filter_map(|pool| pool.reserve_of(asset))
            .try_fold(0u128, safe_add)
    }

    /// Check record invariants and that custody covers every reserve
    pub fn verify_invariants(&self) -> Result<()> {
        let state = self.read_state()?;
        state.verify_invariants()?;

        let mut owed: BTreeMap<Address, u128> = BTreeMap::new();
        for pool in state.pools.values() {
            for (asset, reserve) in [(pool.asset_a, pool.reserve_a), (pool.asset_b, pool.reserve_b)] {
                let entry = owed.entry(asset).or_insert(0);
                *entry = safe_add(*entry, reserve)?;
            }
        }
        drop(state);

        for (asset, reserve) in owed {
            let held = self.registry.get(&asset)?.balance_of(&self.address);
            if held < reserve {
                return Err(Error::InvariantViolation(format!(
                    "custody of {} is {} but pools hold {}",
                    asset.short(),
                    held,
                    reserve
                )));
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVENTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Snapshot of the retained events
    pub fn events(&self) -> Vec<ProtocolEvent> {
        self.event_log().events().to_vec()
    }

    /// Take all retained events
    pub fn drain_events(&self) -> Vec<ProtocolEvent> {
        self.event_log_mut().drain()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    fn ensure_supported(&self, asset: &Address) -> Result<()> {
        if self.registry.contains(asset) {
            Ok(())
        } else {
            Err(Error::AssetNotSupported(asset.short()))
        }
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, AmmState>> {
        self.state.read().map_err(|_| Error::Lock)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, AmmState>> {
        self.state.write().map_err(|_| Error::Lock)
    }

    fn restore(&self, id: PoolId, pool: Pool, provider: Address, shares: u128) -> Result<()> {
        let mut state = self.write_state().inspect_err(|e| {
            error!("Could not restore pool {}: {}", id, e);
        })?;
        state.pools.insert(id, pool);
        state.set_shares(id, provider, shares);
        Ok(())
    }

    fn restore_pools(&self, pools: Vec<Pool>) -> Result<()> {
        let mut state = self.write_state().inspect_err(|e| {
            error!("Could not restore {} pool(s): {}", pools.len(), e);
        })?;
        state.pools.extend(pools.into_iter().map(|p| (p.id, p)));
        Ok(())
    }

    fn event_log(&self) -> RwLockReadGuard<'_, EventLog> {
        self.events.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn event_log_mut(&self) -> RwLockWriteGuard<'_, EventLog> {
        self.events.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: ProtocolEvent) {
        self.event_log_mut().push(event);
    }

    fn emit_pool_created(&self, ctx: &CallContext, pool: &Pool) {
        self.emit(ProtocolEvent::PoolCreated(PoolCreatedEvent {
            pool_id: pool.id,
            asset_a: pool.asset_a,
            asset_b: pool.asset_b,
            creator: ctx.caller,
            block_height: ctx.block_height,
            timestamp: ctx.timestamp,
        }));
    }
}

fn pay_nonzero(
    settlement: &mut Settlement<'_>,
    token: &Address,
    to: &Address,
    amount: u128,
) -> Result<()> {
    if amount == 0 {
        return Ok(());
    }
    settlement.pay(token, to, amount)
}

impl std::fmt::Debug for AmmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmmEngine")
            .field("address", &self.address)
            .field("fee_per_mille", &self.params.fee_per_mille)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::token::{InMemoryToken, TokenLedger};
    use std::sync::Arc;

    struct Fixture {
        engine: AmmEngine,
        a: Arc<InMemoryToken>,
        b: Arc<InMemoryToken>,
        c: Arc<InMemoryToken>,
        alice: Address,
        bob: Address,
    }

    fn fixture() -> Fixture {
        let registry = TokenRegistry::new();
        let engine_addr = Address::from_label("amm");
        let alice = Address::from_label("alice");
        let bob = Address::from_label("bob");

        let mut tokens = Vec::new();
        for symbol in ["AAA", "BBB", "CCC"] {
            let token = Arc::new(InMemoryToken::new(symbol, 18).unwrap());
            registry.register(token.clone()).unwrap();
            for user in [&alice, &bob] {
                token.mint(user, 1_000_000).unwrap();
                token.approve(user, &engine_addr, u128::MAX).unwrap();
            }
            tokens.push(token);
        }
        let c = tokens.pop().unwrap();
        let b = tokens.pop().unwrap();
        let a = tokens.pop().unwrap();

        let engine = AmmEngine::new(engine_addr, registry, AmmParams::default()).unwrap();
        Fixture {
            engine,
            a,
            b,
            c,
            alice,
            bob,
        }
    }

    fn ctx(caller: Address) -> CallContext {
        CallContext::new(caller, 1, 1_000)
    }

    #[test]
    fn test_create_pool() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        let id = f.engine.create_pool(&ctx(f.alice), &x, &y).unwrap();
        assert_eq!(id, f.engine.pool_id(&y, &x));

        assert!(matches!(
            f.engine.create_pool(&ctx(f.alice), &y, &x),
            Err(Error::PoolAlreadyExists(_))
        ));
        assert!(matches!(
            f.engine.create_pool(&ctx(f.alice), &x, &x),
            Err(Error::InvalidPair(_))
        ));
        assert!(matches!(
            f.engine.create_pool(&ctx(f.alice), &x, &Address::from_label("nope")),
            Err(Error::AssetNotSupported(_))
        ));
        assert_eq!(f.engine.reserves(&x, &y).unwrap(), (0, 0));
        assert_eq!(f.engine.events()[0].event_type(), "PoolCreated");
    }

    #[test]
    fn test_bootstrap_shares_are_geometric_mean() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        let receipt = f.engine.add_liquidity(&ctx(f.alice), &x, &y, 400, 900).unwrap();

        assert_eq!(receipt.shares, 600);
        assert_eq!(f.engine.shares_of(&x, &y, &f.alice).unwrap(), 600);
        assert_eq!(f.engine.reserves(&x, &y).unwrap(), (400, 900));
        assert_eq!(f.engine.reserves(&y, &x).unwrap(), (900, 400));
        assert_eq!(f.a.balance_of(&f.engine.address()), 400);

        let types: Vec<_> = f.engine.events().iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["PoolCreated", "LiquidityAdded"]);
    }

    #[test]
    fn test_proportional_shares_take_minimum() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        f.engine.add_liquidity(&ctx(f.alice), &x, &y, 1000, 1000).unwrap();

        let receipt = f.engine.add_liquidity(&ctx(f.bob), &x, &y, 500, 100).unwrap();
        assert_eq!(receipt.shares, 100);
        assert_eq!(f.engine.pool(&x, &y).unwrap().unwrap().total_shares, 1100);
        f.engine.verify_invariants().unwrap();
    }

    #[test]
    fn test_add_liquidity_zero_amount() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        assert!(matches!(
            f.engine.add_liquidity(&ctx(f.alice), &x, &y, 0, 10),
            Err(Error::ZeroAmount)
        ));
        assert!(f.engine.pool(&x, &y).unwrap().is_none());
    }

    #[test]
    fn test_add_liquidity_rounding_to_zero_shares() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        f.engine.add_liquidity(&ctx(f.alice), &x, &y, 1_000, 10).unwrap();
        let before = f.a.balance_of(&f.bob);

        let err = f.engine.add_liquidity(&ctx(f.bob), &x, &y, 5, 1).unwrap_err();
        assert!(matches!(err, Error::InsufficientLiquidity { .. }));
        assert_eq!(f.a.balance_of(&f.bob), before);
    }

    #[test]
    fn test_failed_second_pull_refunds_first() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        f.b.approve(&f.bob, &f.engine.address(), 0).unwrap();

        let err = f.engine.add_liquidity(&ctx(f.bob), &x, &y, 100, 100).unwrap_err();
        assert!(matches!(err, Error::TransferFailed { .. }));
        assert_eq!(f.a.balance_of(&f.bob), 1_000_000);
        assert!(f.engine.pool(&x, &y).unwrap().is_none());
        assert!(f.engine.events().is_empty());
    }

    #[test]
    fn test_remove_liquidity_round_trip() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        let receipt = f.engine.add_liquidity(&ctx(f.alice), &x, &y, 1000, 4000).unwrap();

        let out = f.engine.remove_liquidity(&ctx(f.alice), &x, &y, receipt.shares).unwrap();
        assert_eq!(out.shares, 2000);
        assert_eq!(out.amount_a + out.amount_b, 5000);
        assert_eq!(f.engine.reserves(&x, &y).unwrap(), (0, 0));
        assert_eq!(f.a.balance_of(&f.alice), 1_000_000);
        assert_eq!(f.b.balance_of(&f.alice), 1_000_000);
        f.engine.verify_invariants().unwrap();
    }

    #[test]
    fn test_remove_liquidity_errors() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        assert!(matches!(
            f.engine.remove_liquidity(&ctx(f.alice), &x, &y, 0),
            Err(Error::ZeroAmount)
        ));
        assert!(matches!(
            f.engine.remove_liquidity(&ctx(f.alice), &x, &y, 1),
            Err(Error::PoolNotFound(_))
        ));

        f.engine.create_pool(&ctx(f.alice), &x, &y).unwrap();
        assert!(matches!(
            f.engine.remove_liquidity(&ctx(f.alice), &x, &y, 1),
            Err(Error::NoLiquidity(_))
        ));

        f.engine.add_liquidity(&ctx(f.alice), &x, &y, 100, 100).unwrap();
        assert!(matches!(
            f.engine.remove_liquidity(&ctx(f.bob), &x, &y, 1),
            Err(Error::InsufficientShares {
                required: 1,
                available: 0
            })
        ));
    }

    #[test]
    fn test_quote_with_fee() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        f.engine.add_liquidity(&ctx(f.alice), &x, &y, 1000, 1000).unwrap();

        assert_eq!(f.engine.get_amounts_out(100, &[x, y]).unwrap(), vec![100, 90]);
        assert_eq!(f.engine.quote(&x, &y, 100).unwrap(), 90);
    }

    #[test]
    fn test_amounts_out_errors() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        assert!(matches!(f.engine.get_amounts_out(1, &[x]), Err(Error::InvalidPath(_))));
        assert!(matches!(f.engine.get_amounts_out(1, &[x, x]), Err(Error::InvalidPath(_))));
        assert!(matches!(f.engine.get_amounts_out(1, &[x, y]), Err(Error::NoLiquidity(_))));

        f.engine.create_pool(&ctx(f.alice), &x, &y).unwrap();
        assert!(matches!(f.engine.get_amounts_out(1, &[x, y]), Err(Error::NoLiquidity(_))));
    }

    #[test]
    fn test_swap_single_hop() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        f.engine.add_liquidity(&ctx(f.alice), &x, &y, 1000, 1000).unwrap();

        let amounts = f
            .engine
            .swap_exact_tokens_for_tokens(&ctx(f.bob), 100, 90, &[x, y], &f.bob, 1_000)
            .unwrap();
        assert_eq!(amounts, vec![100, 90]);
        assert_eq!(f.engine.reserves(&x, &y).unwrap(), (1100, 910));
        assert_eq!(f.b.balance_of(&f.bob), 1_000_090);
        assert_eq!(f.a.balance_of(&f.bob), 999_900);
        f.engine.verify_invariants().unwrap();
    }

    #[test]
    fn test_swap_multi_hop() {
        let f = fixture();
        let (x, y, z) = (f.a.address(), f.b.address(), f.c.address());
        f.engine.add_liquidity(&ctx(f.alice), &x, &y, 10_000, 10_000).unwrap();
        f.engine.add_liquidity(&ctx(f.alice), &y, &z, 10_000, 20_000).unwrap();

        let quoted = f.engine.get_amounts_out(1_000, &[x, y, z]).unwrap();
        let amounts = f
            .engine
            .swap_exact_tokens_for_tokens(&ctx(f.bob), 1_000, 0, &[x, y, z], &f.alice, 1_000)
            .unwrap();
        assert_eq!(amounts, quoted);
        assert_eq!(amounts.len(), 3);
        assert_eq!(f.c.balance_of(&f.alice), 1_000_000 - 20_000 + amounts[2]);
        assert_eq!(f.engine.reserves(&x, &y).unwrap(), (11_000, 10_000 - amounts[1]));
        assert_eq!(f.engine.reserves(&y, &z).unwrap(), (10_000 + amounts[1], 20_000 - amounts[2]));
    }

    #[test]
    fn test_swap_slippage_and_deadline() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        f.engine.add_liquidity(&ctx(f.alice), &x, &y, 1000, 1000).unwrap();

        assert!(matches!(
            f.engine
                .swap_exact_tokens_for_tokens(&ctx(f.bob), 100, 91, &[x, y], &f.bob, 1_000),
            Err(Error::SlippageExceeded {
                amount_out: 90,
                amount_out_min: 91
            })
        ));
        assert!(matches!(
            f.engine
                .swap_exact_tokens_for_tokens(&ctx(f.bob), 100, 0, &[x, y], &f.bob, 999),
            Err(Error::Expired { .. })
        ));
        assert!(matches!(
            f.engine
                .swap_exact_tokens_for_tokens(&ctx(f.bob), 0, 0, &[x, y], &f.bob, 1_000),
            Err(Error::ZeroAmount)
        ));
        assert_eq!(f.engine.reserves(&x, &y).unwrap(), (1000, 1000));
    }

    #[test]
    fn test_swap_without_allowance_leaves_no_trace() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        f.engine.add_liquidity(&ctx(f.alice), &x, &y, 1000, 1000).unwrap();
        f.a.approve(&f.bob, &f.engine.address(), 0).unwrap();
        let events = f.engine.events().len();

        assert!(matches!(
            f.engine
                .swap_exact_tokens_for_tokens(&ctx(f.bob), 100, 0, &[x, y], &f.bob, 1_000),
            Err(Error::TransferFailed { .. })
        ));
        assert_eq!(f.engine.reserves(&x, &y).unwrap(), (1000, 1000));
        assert_eq!(f.engine.events().len(), events);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        f.engine.add_liquidity(&ctx(f.alice), &x, &y, 1000, 2000).unwrap();

        let bytes = f.engine.to_bytes().unwrap();
        let restored = AmmEngine::from_bytes(
            f.engine.address(),
            f.engine.registry.clone(),
            AmmParams::default(),
            &bytes,
        )
        .unwrap();
        assert_eq!(restored.state_hash().unwrap(), f.engine.state_hash().unwrap());
        assert_eq!(restored.reserves(&x, &y).unwrap(), (1000, 2000));
    }

    #[test]
    fn test_total_reserves_and_pools() {
        let f = fixture();
        let (x, y, z) = (f.a.address(), f.b.address(), f.c.address());
        f.engine.add_liquidity(&ctx(f.alice), &x, &y, 100, 200).unwrap();
        f.engine.add_liquidity(&ctx(f.alice), &y, &z, 300, 400).unwrap();

        assert_eq!(f.engine.pools().unwrap().len(), 2);
        assert_eq!(f.engine.total_reserves_of(&y).unwrap(), 500);
        assert_eq!(f.engine.drain_events().len(), 4);
        assert!(f.engine.events().is_empty());
    }

    #[test]
    fn test_restore_reports_poisoned_state() {
        let f = fixture();
        let (x, y) = (f.a.address(), f.b.address());
        f.engine.add_liquidity(&ctx(f.alice), &x, &y, 400, 900).unwrap();
        let pool = f.engine.pool(&x, &y).unwrap().unwrap();

        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _state = f.engine.state.write().unwrap();
            panic!("poison");
        }));
        assert!(poisoned.is_err());

        assert!(matches!(
            f.engine.restore(pool.id, pool.clone(), f.alice, 600),
            Err(Error::Lock)
        ));
        assert!(matches!(f.engine.restore_pools(vec![pool]), Err(Error::Lock)));
    }
}
