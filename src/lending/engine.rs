//! Lending Engine - collateral and debt ledger with health-factor gating.
//!
//! Borrowing power is weighted by each reserve's LTV. The health factor
//! weights collateral by each reserve's liquidation threshold instead:
//! `hf = Σ value_i * threshold_i * 1e18 / debt_usd`. An account is safe at
//! `hf >= 1e18`.
//!
//! Mutating operations share the ordering of the AMM engine: guard, then
//! validate, then pull, then commit, then pay out with snapshot restore.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, warn};

use crate::core::config::LendingParams;
use crate::core::context::CallContext;
use crate::core::guard::ReentrancyGuard;
use crate::core::settlement::Settlement;
use crate::core::token::TokenRegistry;
use crate::error::{Error, Result};
use crate::lending::account::{AccountData, UserAccount, Valuation};
use crate::lending::reserve::{Reserve, ReserveParams};
use crate::protocol::events::*;
use crate::utils::constants::HEALTH_FACTOR_THRESHOLD;
use crate::utils::crypto::{Address, Hash};
use crate::utils::math::{safe_add, safe_sub};
use crate::utils::validation::{validate_non_zero, validate_price, validate_risk_params};

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Persistent records of the lending engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LendingState {
    /// Administrative authority
    pub admin: Address,
    /// Reserves by asset
    pub reserves: BTreeMap<Address, Reserve>,
    /// Accounts by user
    pub accounts: BTreeMap<Address, UserAccount>,
}

impl LendingState {
    fn new(admin: Address) -> Self {
        Self {
            admin,
            reserves: BTreeMap::new(),
            accounts: BTreeMap::new(),
        }
    }

    fn reserve(&self, asset: &Address) -> Result<&Reserve> {
        self.reserves
            .get(asset)
            .ok_or_else(|| Error::AssetNotSupported(asset.short()))
    }

    fn account(&self, user: &Address) -> UserAccount {
        self.accounts.get(user).cloned().unwrap_or_default()
    }

    /// Check every reserve identity and that accounts sum to reserve totals
    pub fn verify_invariants(&self) -> Result<()> {
        let mut supplied: BTreeMap<Address, u128> = BTreeMap::new();
        let mut borrowed: BTreeMap<Address, u128> = BTreeMap::new();
        for account in self.accounts.values() {
            for (asset, amount) in &account.collateral {
                let entry = supplied.entry(*asset).or_insert(0);
                *entry = safe_add(*entry, *amount)?;
            }
            for (asset, amount) in &account.debt {
                let entry = borrowed.entry(*asset).or_insert(0);
                *entry = safe_add(*entry, *amount)?;
            }
        }

        for (asset, reserve) in &self.reserves {
            if !reserve.is_consistent() {
                return Err(Error::InvariantViolation(format!(
                    "reserve {}: available {} != supplied {} - borrowed {}",
                    asset.short(),
                    reserve.available_liquidity,
                    reserve.total_supplied,
                    reserve.total_borrowed
                )));
            }
            let s = supplied.get(asset).copied().unwrap_or(0);
            let b = borrowed.get(asset).copied().unwrap_or(0);
            if s != reserve.total_supplied || b != reserve.total_borrowed {
                return Err(Error::InvariantViolation(format!(
                    "reserve {}: accounts hold {}/{} but totals are {}/{}",
                    asset.short(),
                    s,
                    b,
                    reserve.total_supplied,
                    reserve.total_borrowed
                )));
            }
        }
        Ok(())
    }
}

/// Records touched by one user operation, restored if the payout fails
struct Snapshot {
    user: Address,
    account: Option<UserAccount>,
    reserve: Reserve,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LENDING ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Collateralized lending pool
pub struct LendingEngine {
    address: Address,
    registry: TokenRegistry,
    params: LendingParams,
    state: RwLock<LendingState>,
    events: RwLock<EventLog>,
    guard: ReentrancyGuard,
}

impl LendingEngine {
    /// Create an engine with no reserves
    pub fn new(
        address: Address,
        admin: Address,
        registry: TokenRegistry,
        params: LendingParams,
    ) -> Self {
        Self {
            address,
            registry,
            events: RwLock::new(EventLog::with_capacity(params.max_events)),
            params,
            state: RwLock::new(LendingState::new(admin)),
            guard: ReentrancyGuard::new("lending"),
        }
    }

    /// Restore an engine from a [`LendingEngine::to_bytes`] snapshot
    pub fn from_bytes(
        address: Address,
        registry: TokenRegistry,
        params: LendingParams,
        bytes: &[u8],
    ) -> Result<Self> {
        let state: LendingState =
            bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))?;
        state.verify_invariants()?;
        let engine = Self::new(address, state.admin, registry, params);
        *engine.write_state()? = state;
        Ok(engine)
    }

    /// Serialize admin, reserves and accounts
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

    /// Current administrator
    pub fn admin(&self) -> Result<Address> {
        Ok(self.read_state()?.admin)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ADMINISTRATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Initialize a reserve; decimals are read from the token ledger
    pub fn init_reserve(
        &self,
        ctx: &CallContext,
        asset: &Address,
        params: ReserveParams,
    ) -> Result<Reserve> {
        let _entered = self.guard.enter()?;
        self.authorize(ctx)?;
        let decimals = self.registry.get(asset)?.decimals();
        let reserve = Reserve::new(*asset, decimals, params)?;

        {
            let mut state = self.write_state()?;
            if state.reserves.contains_key(asset) {
                return Err(Error::ReserveAlreadyInitialized(asset.short()));
            }
            state.reserves.insert(*asset, reserve.clone());
        }

        self.emit_reserve_updated(ctx, &reserve, ReserveUpdateKind::Initialized);
        info!(
            "Reserve {} initialized: ltv={} threshold={} price={} decimals={}",
            asset.short(),
            reserve.ltv,
            reserve.liquidation_threshold,
            reserve.price_usd,
            reserve.decimals
        );
        Ok(reserve)
    }

    /// Set the USD price of an asset
    pub fn update_price(&self, ctx: &CallContext, asset: &Address, price_usd: u128) -> Result<Reserve> {
        validate_price(price_usd)?;
        self.update_reserve(ctx, asset, ReserveUpdateKind::Price, |r| {
            r.price_usd = price_usd;
            Ok(())
        })
    }

    /// Freeze or unfreeze supply and borrow
    pub fn set_frozen(&self, ctx: &CallContext, asset: &Address, frozen: bool) -> Result<Reserve> {
        self.update_reserve(ctx, asset, ReserveUpdateKind::Frozen, |r| {
            r.is_frozen = frozen;
            Ok(())
        })
    }

    /// Activate or deactivate a reserve
    pub fn set_active(&self, ctx: &CallContext, asset: &Address, active: bool) -> Result<Reserve> {
        self.update_reserve(ctx, asset, ReserveUpdateKind::Active, |r| {
            r.is_active = active;
            Ok(())
        })
    }

    /// Change LTV and liquidation threshold
    pub fn update_risk_params(
        &self,
        ctx: &CallContext,
        asset: &Address,
        ltv: u128,
        liquidation_threshold: u128,
    ) -> Result<Reserve> {
        validate_risk_params(ltv, liquidation_threshold)?;
        self.update_reserve(ctx, asset, ReserveUpdateKind::RiskParams, |r| {
            r.ltv = ltv;
            r.liquidation_threshold = liquidation_threshold;
            Ok(())
        })
    }

    /// Hand the administrative role to another account
    pub fn transfer_admin(&self, ctx: &CallContext, new_admin: &Address) -> Result<()> {
        let _entered = self.guard.enter()?;
        let mut state = self.write_state()?;
        if state.admin != ctx.caller {
            return Err(Error::Unauthorized(ctx.caller.short()));
        }
        state.admin = *new_admin;
        info!("Admin transferred from {} to {}", ctx.caller.short(), new_admin.short());
        Ok(())
    }

    fn update_reserve<F>(
        &self,
        ctx: &CallContext,
        asset: &Address,
        kind: ReserveUpdateKind,
        apply: F,
    ) -> Result<Reserve>
    where
        F: FnOnce(&mut Reserve) -> Result<()>,
    {
        let _entered = self.guard.enter()?;
        self.authorize(ctx)?;

        let reserve = {
            let mut state = self.write_state()?;
            let mut reserve = state.reserve(asset)?.clone();
            apply(&mut reserve)?;
            state.reserves.insert(*asset, reserve.clone());
            reserve
        };

        self.emit_reserve_updated(ctx, &reserve, kind);
        info!("Reserve {} updated ({:?})", asset.short(), kind);
        Ok(reserve)
    }

    fn authorize(&self, ctx: &CallContext) -> Result<()> {
        if self.read_state()?.admin != ctx.caller {
            warn!("Rejected admin call from {}", ctx.caller.short());
            return Err(Error::Unauthorized(ctx.caller.short()));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // USER OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposit collateral; returns its USD value
    pub fn supply_collateral(&self, ctx: &CallContext, asset: &Address, amount: u128) -> Result<u128> {
        let _entered = self.guard.enter()?;

        let (reserve, account, value_usd) = {
            let state = self.read_state()?;
            let mut reserve = state.reserve(asset)?.clone();
            reserve.ensure_usable()?;
            validate_non_zero(amount)?;

            let value_usd = reserve.value_usd(amount)?;
            reserve.supply(amount)?;
            let mut account = state.account(&ctx.caller);
            let collateral = safe_add(account.collateral_of(asset), amount)?;
            account.set_collateral(*asset, collateral);
            account.refresh_totals(&state.reserves)?;
            (reserve, account, value_usd)
        };

        let mut settlement = Settlement::new(self.address, &self.registry);
        if let Err(e) = settlement.pull(asset, &ctx.caller, amount) {
            return Err(settlement.abort(e));
        }
        if let Err(e) = self.commit(&ctx.caller, reserve, account) {
            return Err(settlement.abort(e));
        }

        self.emit(ProtocolEvent::CollateralSupplied(CollateralSuppliedEvent {
            user: ctx.caller,
            asset: *asset,
            amount,
            value_usd,
            block_height: ctx.block_height,
            timestamp: ctx.timestamp,
        }));
        info!(
            "Collateral supplied by {}: {} {} (${})",
            ctx.caller.short(),
            amount,
            asset.short(),
            value_usd
        );
        Ok(value_usd)
    }

    /// Withdraw collateral; returns the health factor afterwards
    pub fn withdraw_collateral(
        &self,
        ctx: &CallContext,
        asset: &Address,
        amount: u128,
    ) -> Result<u128> {
        let _entered = self.guard.enter()?;
        validate_non_zero(amount)?;

        let (snapshot, reserve, account, value_usd, health_factor) = {
            let state = self.read_state()?;
            let previous = state.reserve(asset)?.clone();
            let before = state.accounts.get(&ctx.caller).cloned();
            let mut account = before.clone().unwrap_or_default();

            let balance = account.collateral_of(asset);
            if amount > balance {
                return Err(Error::InsufficientCollateral {
                    required: amount,
                    available: balance,
                });
            }
            let mut reserve = previous.clone();
            reserve.withdraw(amount)?;

            account.set_collateral(*asset, balance - amount);
            let after = Valuation::of(&account, &state.reserves)?;
            let health_factor = after.health_factor()?;
            if account.has_debt() && health_factor < HEALTH_FACTOR_THRESHOLD {
                return Err(Error::WouldLiquidate {
                    health_factor,
                    minimum: HEALTH_FACTOR_THRESHOLD,
                });
            }
            account.refresh_totals(&state.reserves)?;
            let value_usd = previous.value_usd(amount)?;

            let snapshot = Snapshot {
                user: ctx.caller,
                account: before,
                reserve: previous,
            };
            (snapshot, reserve, account, value_usd, health_factor)
        };

        self.commit(&ctx.caller, reserve, account)?;

        let mut settlement = Settlement::new(self.address, &self.registry);
        if let Err(e) = settlement.pay(asset, &ctx.caller, amount) {
            return Err(self.unwind(settlement, snapshot, e));
        }

        self.emit(ProtocolEvent::CollateralWithdrawn(CollateralWithdrawnEvent {
            user: ctx.caller,
            asset: *asset,
            amount,
            value_usd,
            health_factor,
            block_height: ctx.block_height,
            timestamp: ctx.timestamp,
        }));
        info!(
            "Collateral withdrawn by {}: {} {} (hf={})",
            ctx.caller.short(),
            amount,
            asset.short(),
            health_factor
        );
        Ok(health_factor)
    }

    /// Borrow against collateral; returns the USD value borrowed
    pub fn borrow(&self, ctx: &CallContext, asset: &Address, amount: u128) -> Result<u128> {
        let _entered = self.guard.enter()?;

        let (snapshot, reserve, account, value_usd) = {
            let state = self.read_state()?;
            let previous = state.reserve(asset)?.clone();
            previous.ensure_usable()?;
            validate_non_zero(amount)?;
            if amount > previous.available_liquidity {
                return Err(Error::InsufficientLiquidity {
                    required: amount,
                    available: previous.available_liquidity,
                });
            }

            let before = state.accounts.get(&ctx.caller).cloned();
            let mut account = before.clone().unwrap_or_default();
            let current = Valuation::of(&account, &state.reserves)?;
            if current.collateral_usd == 0 {
                return Err(Error::NoCollateral);
            }
            let value_usd = previous.value_usd(amount)?;
            let debt_after = safe_add(current.debt_usd, value_usd)?;
            if debt_after > current.borrow_capacity_usd {
                return Err(Error::InsufficientCollateral {
                    required: debt_after,
                    available: current.borrow_capacity_usd,
                });
            }

            let mut reserve = previous.clone();
            reserve.borrow(amount)?;
            let debt = safe_add(account.debt_of(asset), amount)?;
            account.set_debt(*asset, debt);
            account.refresh_totals(&state.reserves)?;

            let snapshot = Snapshot {
                user: ctx.caller,
                account: before,
                reserve: previous,
            };
            (snapshot, reserve, account, value_usd)
        };

        self.commit(&ctx.caller, reserve, account)?;

        let mut settlement = Settlement::new(self.address, &self.registry);
        if let Err(e) = settlement.pay(asset, &ctx.caller, amount) {
            return Err(self.unwind(settlement, snapshot, e));
        }

        self.emit(ProtocolEvent::TokenBorrowed(TokenBorrowedEvent {
            user: ctx.caller,
            asset: *asset,
            amount,
            value_usd,
            rate: self.params.nominal_borrow_rate,
            block_height: ctx.block_height,
            timestamp: ctx.timestamp,
        }));
        info!(
            "Borrow by {}: {} {} (${})",
            ctx.caller.short(),
            amount,
            asset.short(),
            value_usd
        );
        Ok(value_usd)
    }

    /// Repay debt; returns the remaining debt in this asset
    pub fn repay(&self, ctx: &CallContext, asset: &Address, amount: u128) -> Result<u128> {
        let _entered = self.guard.enter()?;
        validate_non_zero(amount)?;

        let (reserve, account, value_usd, remaining) = {
            let state = self.read_state()?;
            let mut reserve = state.reserve(asset)?.clone();
            let mut account = state.account(&ctx.caller);
            let debt = account.debt_of(asset);
            if amount > debt {
                return Err(Error::ExceedsDebt { amount, debt });
            }

            let value_usd = reserve.value_usd(amount)?;
            reserve.repay(amount)?;
            let remaining = safe_sub(debt, amount)?;
            account.set_debt(*asset, remaining);
            account.refresh_totals(&state.reserves)?;
            (reserve, account, value_usd, remaining)
        };

        let mut settlement = Settlement::new(self.address, &self.registry);
        if let Err(e) = settlement.pull(asset, &ctx.caller, amount) {
            return Err(settlement.abort(e));
        }
        if let Err(e) = self.commit(&ctx.caller, reserve, account) {
            return Err(settlement.abort(e));
        }

        self.emit(ProtocolEvent::TokenRepaid(TokenRepaidEvent {
            user: ctx.caller,
            asset: *asset,
            amount,
            value_usd,
            remaining_debt: remaining,
            block_height: ctx.block_height,
            timestamp: ctx.timestamp,
        }));
        info!(
            "Repay by {}: {} {} ({} remaining)",
            ctx.caller.short(),
            amount,
            asset.short(),
            remaining
        );
        Ok(remaining)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Aggregate position of a user at current prices
    pub fn get_user_account_data(&self, user: &Address) -> Result<AccountData> {
        let state = self.read_state()?;
        Valuation::of(&state.account(user), &state.reserves)?.account_data()
    }

    /// Health factor below 1.0
    pub fn is_liquidatable(&self, user: &Address) -> Result<bool> {
        Ok(self.get_user_account_data(user)?.is_liquidatable())
    }

    /// Reserve of an asset
    pub fn reserve_data(&self, asset: &Address) -> Result<Reserve> {
        Ok(self.read_state()?.reserve(asset)?.clone())
    }

    /// Stored account record
    pub fn account(&self, user: &Address) -> Result<UserAccount> {
        Ok(self.read_state()?.account(user))
    }

    /// Collateral of a user in one asset
    pub fn user_collateral(&self, user: &Address, asset: &Address) -> Result<u128> {
        Ok(self.read_state()?.account(user).collateral_of(asset))
    }

    /// Debt of a user in one asset
    pub fn user_debt(&self, user: &Address, asset: &Address) -> Result<u128> {
        Ok(self.read_state()?.account(user).debt_of(asset))
    }

    /// Assets with an initialized reserve, in canonical order
    pub fn supported_tokens(&self) -> Result<Vec<Address>> {
        Ok(self.read_state()?.reserves.keys().copied().collect())
    }

    /// Check record invariants and that custody covers available liquidity
    pub fn verify_invariants(&self) -> Result<()> {
        let reserves = {
            let state = self.read_state()?;
            state.verify_invariants()?;
            state.reserves.clone()
        };

        for (asset, reserve) in reserves {
            let held = self.registry.get(&asset)?.balance_of(&self.address);
            if held < reserve.available_liquidity {
                return Err(Error::InvariantViolation(format!(
                    "custody of {} is {} but available liquidity is {}",
                    asset.short(),
                    held,
                    reserve.available_liquidity
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

    fn read_state(&self) -> Result<RwLockReadGuard<'_, LendingState>> {
        self.state.read().map_err(|_| Error::Lock)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, LendingState>> {
        self.state.write().map_err(|_| Error::Lock)
    }

    fn commit(&self, user: &Address, reserve: Reserve, account: UserAccount) -> Result<()> {
        let mut state = self.write_state()?;
        state.reserves.insert(reserve.asset, reserve);
        state.accounts.insert(*user, account);
        Ok(())
    }

    fn restore(&self, snapshot: Snapshot) -> Result<()> {
        let mut state = self.write_state().inspect_err(|e| {
            error!("Could not restore lending records: {}", e);
        })?;
        state.reserves.insert(snapshot.reserve.asset, snapshot.reserve);
        match snapshot.account {
            Some(account) => state.accounts.insert(snapshot.user, account),
            None => state.accounts.remove(&snapshot.user),
        };
        Ok(())
    }

    /// Compensate a failed payout; records go back only if custody did
    fn unwind(&self, settlement: Settlement<'_>, snapshot: Snapshot, cause: Error) -> Error {
        match settlement.compensate(cause) {
            Ok(cause) => match self.restore(snapshot) {
                Ok(()) => cause,
                Err(e) => e,
            },
            Err(stranded) => {
                error!(
                    "Keeping committed records of {} after unreversed payout",
                    snapshot.user.short()
                );
                stranded
            }
        }
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

    fn emit_reserve_updated(&self, ctx: &CallContext, reserve: &Reserve, kind: ReserveUpdateKind) {
        self.emit(ProtocolEvent::ReserveUpdated(ReserveUpdatedEvent {
            admin: ctx.caller,
            asset: reserve.asset,
            kind,
            ltv: reserve.ltv,
            liquidation_threshold: reserve.liquidation_threshold,
            price_usd: reserve.price_usd,
            is_active: reserve.is_active,
            is_frozen: reserve.is_frozen,
            block_height: ctx.block_height,
            timestamp: ctx.timestamp,
        }));
    }
}

impl std::fmt::Debug for LendingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LendingEngine")
            .field("address", &self.address)
            .field("nominal_borrow_rate", &self.params.nominal_borrow_rate)
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
    use crate::utils::constants::{HEALTH_FACTOR_INFINITE, WAD};
    use std::sync::Arc;

    struct Fixture {
        engine: LendingEngine,
        usdc: Arc<InMemoryToken>,
        dai: Arc<InMemoryToken>,
        admin: Address,
        alice: Address,
        bob: Address,
    }

    fn fixture() -> Fixture {
        let registry = TokenRegistry::new();
        let engine_addr = Address::from_label("lending");
        let admin = Address::from_label("admin");
        let alice = Address::from_label("alice");
        let bob = Address::from_label("bob");

        let usdc = Arc::new(InMemoryToken::new("USDC", 6).unwrap());
        let dai = Arc::new(InMemoryToken::new("DAI", 18).unwrap());
        for token in [&usdc, &dai] {
            registry.register(token.clone()).unwrap();
            for user in [&alice, &bob] {
                let whole = 10u128.pow(u32::from(token.decimals()));
                token.mint(user, 1_000_000 * whole).unwrap();
                token.approve(user, &engine_addr, u128::MAX).unwrap();
            }
        }

        let engine = LendingEngine::new(engine_addr, admin, registry, LendingParams::default());
        let admin_ctx = CallContext::new(admin, 1, 1_000);
        engine
            .init_reserve(&admin_ctx, &usdc.address(), ReserveParams::default())
            .unwrap();
        engine
            .init_reserve(&admin_ctx, &dai.address(), ReserveParams::default())
            .unwrap();

        Fixture {
            engine,
            usdc,
            dai,
            admin,
            alice,
            bob,
        }
    }

    fn ctx(caller: Address) -> CallContext {
        CallContext::new(caller, 2, 2_000)
    }

    #[test]
    fn test_init_reserve_reads_decimals() {
        let f = fixture();
        assert_eq!(f.engine.reserve_data(&f.usdc.address()).unwrap().decimals, 6);
        assert_eq!(f.engine.supported_tokens().unwrap().len(), 2);

        assert!(matches!(
            f.engine
                .init_reserve(&ctx(f.admin), &f.usdc.address(), ReserveParams::default()),
            Err(Error::ReserveAlreadyInitialized(_))
        ));
        assert!(matches!(
            f.engine
                .init_reserve(&ctx(f.alice), &Address::from_label("X"), ReserveParams::default()),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            f.engine
                .init_reserve(&ctx(f.admin), &Address::from_label("X"), ReserveParams::default()),
            Err(Error::AssetNotSupported(_))
        ));
    }

    #[test]
    fn test_available_borrows_at_75_percent_ltv() {
        let f = fixture();
        f.engine
            .supply_collateral(&ctx(f.alice), &f.dai.address(), 1_000 * WAD)
            .unwrap();

        let data = f.engine.get_user_account_data(&f.alice).unwrap();
        assert_eq!(data.total_collateral_usd, 1_000 * WAD);
        assert_eq!(data.available_borrows_usd, 750 * WAD);
        assert_eq!(data.health_factor, HEALTH_FACTOR_INFINITE);

        f.engine.borrow(&ctx(f.alice), &f.dai.address(), 750 * WAD).unwrap();
        assert!(matches!(
            f.engine.borrow(&ctx(f.alice), &f.dai.address(), 1),
            Err(Error::InsufficientCollateral { .. })
        ));
        assert_eq!(f.engine.get_user_account_data(&f.alice).unwrap().available_borrows_usd, 0);
    }

    #[test]
    fn test_decimals_invariance() {
        let f = fixture();
        f.engine
            .supply_collateral(&ctx(f.alice), &f.usdc.address(), 1_000 * 1_000_000)
            .unwrap();
        f.engine
            .supply_collateral(&ctx(f.bob), &f.dai.address(), 1_000 * WAD)
            .unwrap();

        assert_eq!(
            f.engine.get_user_account_data(&f.alice).unwrap(),
            f.engine.get_user_account_data(&f.bob).unwrap()
        );
    }

    #[test]
    fn test_withdraw_health_factor_boundary() {
        let f = fixture();
        let dai = f.dai.address();
        let usdc = f.usdc.address();
        f.engine.supply_collateral(&ctx(f.bob), &usdc, 10_000 * 1_000_000).unwrap();
        f.engine.supply_collateral(&ctx(f.alice), &dai, 1_000 * WAD).unwrap();
        f.engine.borrow(&ctx(f.alice), &usdc, 600 * 1_000_000).unwrap();

        // 742.5 DAI left: 742.5 * 0.8 / 600 = 0.99
        assert!(matches!(
            f.engine.withdraw_collateral(&ctx(f.alice), &dai, 257_500_000_000_000_000_000),
            Err(Error::WouldLiquidate {
                health_factor: 990_000_000_000_000_000,
                ..
            })
        ));
        // 750 DAI left: 750 * 0.8 / 600 = 1.0
        let hf = f.engine.withdraw_collateral(&ctx(f.alice), &dai, 250 * WAD).unwrap();
        assert_eq!(hf, WAD);
        assert!(!f.engine.is_liquidatable(&f.alice).unwrap());
        f.engine.verify_invariants().unwrap();
    }

    #[test]
    fn test_price_drop_makes_account_liquidatable() {
        let f = fixture();
        let dai = f.dai.address();
        let usdc = f.usdc.address();
        f.engine.supply_collateral(&ctx(f.bob), &usdc, 10_000 * 1_000_000).unwrap();
        f.engine.supply_collateral(&ctx(f.alice), &dai, 1_000 * WAD).unwrap();
        f.engine.borrow(&ctx(f.alice), &usdc, 700 * 1_000_000).unwrap();

        f.engine.update_price(&ctx(f.admin), &dai, WAD / 2).unwrap();
        assert!(f.engine.is_liquidatable(&f.alice).unwrap());
        // Stored totals keep the valuation of the last mutation.
        assert_eq!(f.engine.account(&f.alice).unwrap().total_collateral_usd, 1_000 * WAD);
    }

    #[test]
    fn test_borrow_errors() {
        let f = fixture();
        let dai = f.dai.address();
        assert!(matches!(
            f.engine.borrow(&ctx(f.alice), &dai, 1),
            Err(Error::InsufficientLiquidity { .. })
        ));
        f.engine.supply_collateral(&ctx(f.bob), &dai, 100 * WAD).unwrap();
        assert!(matches!(
            f.engine.borrow(&ctx(f.alice), &dai, 1),
            Err(Error::NoCollateral)
        ));
        assert!(matches!(
            f.engine.borrow(&ctx(f.alice), &dai, 0),
            Err(Error::ZeroAmount)
        ));
        assert!(matches!(
            f.engine.borrow(&ctx(f.alice), &Address::from_label("X"), 1),
            Err(Error::AssetNotSupported(_))
        ));
    }

    #[test]
    fn test_frozen_and_inactive_reserves() {
        let f = fixture();
        let dai = f.dai.address();
        f.engine.supply_collateral(&ctx(f.alice), &dai, 10 * WAD).unwrap();

        f.engine.set_frozen(&ctx(f.admin), &dai, true).unwrap();
        assert!(matches!(
            f.engine.supply_collateral(&ctx(f.alice), &dai, WAD),
            Err(Error::AssetFrozen(_))
        ));
        assert!(matches!(
            f.engine.borrow(&ctx(f.alice), &dai, WAD),
            Err(Error::AssetFrozen(_))
        ));
        // Exits stay open while frozen.
        f.engine.withdraw_collateral(&ctx(f.alice), &dai, WAD).unwrap();

        f.engine.set_frozen(&ctx(f.admin), &dai, false).unwrap();
        f.engine.set_active(&ctx(f.admin), &dai, false).unwrap();
        assert!(matches!(
            f.engine.supply_collateral(&ctx(f.alice), &dai, WAD),
            Err(Error::AssetNotSupported(_))
        ));
    }

    #[test]
    fn test_repay() {
        let f = fixture();
        let dai = f.dai.address();
        f.engine.supply_collateral(&ctx(f.alice), &dai, 1_000 * WAD).unwrap();
        f.engine.borrow(&ctx(f.alice), &dai, 100 * WAD).unwrap();

        assert!(matches!(
            f.engine.repay(&ctx(f.alice), &dai, 101 * WAD),
            Err(Error::ExceedsDebt { .. })
        ));
        assert_eq!(f.engine.repay(&ctx(f.alice), &dai, 40 * WAD).unwrap(), 60 * WAD);
        assert_eq!(f.engine.user_debt(&f.alice, &dai).unwrap(), 60 * WAD);

        let reserve = f.engine.reserve_data(&dai).unwrap();
        assert_eq!(reserve.total_borrowed, 60 * WAD);
        assert_eq!(reserve.available_liquidity, 940 * WAD);
        f.engine.verify_invariants().unwrap();
    }

    #[test]
    fn test_withdraw_blocked_by_lent_out_liquidity() {
        let f = fixture();
        let dai = f.dai.address();
        let usdc = f.usdc.address();
        f.engine.supply_collateral(&ctx(f.alice), &dai, 100 * WAD).unwrap();
        f.engine.supply_collateral(&ctx(f.bob), &usdc, 1_000 * 1_000_000).unwrap();
        f.engine.borrow(&ctx(f.bob), &dai, 60 * WAD).unwrap();

        assert!(matches!(
            f.engine.withdraw_collateral(&ctx(f.alice), &dai, 50 * WAD),
            Err(Error::InsufficientLiquidity { .. })
        ));
        assert!(matches!(
            f.engine.withdraw_collateral(&ctx(f.alice), &dai, 200 * WAD),
            Err(Error::InsufficientCollateral { .. })
        ));
        assert_eq!(f.engine.user_collateral(&f.alice, &dai).unwrap(), 100 * WAD);
    }

    #[test]
    fn test_admin_operations() {
        let f = fixture();
        let dai = f.dai.address();
        assert!(matches!(
            f.engine.update_price(&ctx(f.alice), &dai, WAD),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            f.engine.update_price(&ctx(f.admin), &dai, 0),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(matches!(
            f.engine.update_risk_params(&ctx(f.admin), &dai, WAD, WAD / 2),
            Err(Error::InvalidParameter { .. })
        ));
        let reserve = f
            .engine
            .update_risk_params(&ctx(f.admin), &dai, WAD / 2, WAD * 6 / 10)
            .unwrap();
        assert_eq!(reserve.ltv, WAD / 2);

        f.engine.transfer_admin(&ctx(f.admin), &f.alice).unwrap();
        assert_eq!(f.engine.admin().unwrap(), f.alice);
        assert!(f.engine.set_frozen(&ctx(f.admin), &dai, true).is_err());
        f.engine.set_frozen(&ctx(f.alice), &dai, true).unwrap();

        let updates = f
            .engine
            .events()
            .iter()
            .filter(|e| e.event_type() == "ReserveUpdated")
            .count();
        assert_eq!(updates, 4);
    }

    #[test]
    fn test_failed_pull_leaves_no_trace() {
        let f = fixture();
        let dai = f.dai.address();
        f.dai.approve(&f.alice, &f.engine.address(), 0).unwrap();
        let before = f.engine.state_hash().unwrap();

        assert!(matches!(
            f.engine.supply_collateral(&ctx(f.alice), &dai, WAD),
            Err(Error::TransferFailed { .. })
        ));
        assert_eq!(f.engine.state_hash().unwrap(), before);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let f = fixture();
        f.engine
            .supply_collateral(&ctx(f.alice), &f.dai.address(), 5 * WAD)
            .unwrap();
        let bytes = f.engine.to_bytes().unwrap();
        let restored = LendingEngine::from_bytes(
            f.engine.address(),
            f.engine.registry.clone(),
            LendingParams::default(),
            &bytes,
        )
        .unwrap();
        assert_eq!(restored.state_hash().unwrap(), f.engine.state_hash().unwrap());
        assert_eq!(restored.admin().unwrap(), f.admin);
    }
}
