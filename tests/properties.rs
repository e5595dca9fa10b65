//! Property-based tests for engine invariants.
//!
//! 1. **Constant product** - `k` never decreases across a swap.
//! 2. **No free liquidity** - a swap never drains a reserve.
//! 3. **Round trip** - add then remove never returns more than deposited.
//! 4. **Conservation** - custody covers reserves, supply is preserved.
//! 5. **Lending solvency** - reserve accounting holds and no successful
//!    borrow or withdrawal leaves a position liquidatable.
//! 6. **Arithmetic** - wide multiply-divide and health factor behave.

use std::sync::Arc;

use proptest::prelude::*;

use swaplend::amm::AmmEngine;
use swaplend::core::config::{AmmParams, LendingParams};
use swaplend::core::context::CallContext;
use swaplend::core::token::{InMemoryToken, TokenLedger, TokenRegistry};
use swaplend::lending::{LendingEngine, ReserveParams};
use swaplend::utils::constants::WAD;
use swaplend::utils::crypto::Address;
use swaplend::utils::math::{health_factor, mul_div};

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

const SUPPLY: u128 = 1_000_000_000_000;

struct Market {
    amm: AmmEngine,
    x: Arc<InMemoryToken>,
    y: Arc<InMemoryToken>,
    users: [Address; 2],
}

impl Market {
    fn new() -> Self {
        let registry = TokenRegistry::new();
        let x = Arc::new(InMemoryToken::new("X", 18).unwrap());
        let y = Arc::new(InMemoryToken::new("Y", 6).unwrap());
        registry.register(x.clone()).unwrap();
        registry.register(y.clone()).unwrap();
        let amm = AmmEngine::new(
            Address::from_label("amm"),
            registry,
            AmmParams::default(),
        )
        .unwrap();

        let users = [Address::from_label("alice"), Address::from_label("bob")];
        for user in &users {
            for token in [&x, &y] {
                token.mint(user, SUPPLY).unwrap();
                token.approve(user, &amm.address(), u128::MAX).unwrap();
            }
        }
        Self { amm, x, y, users }
    }

    fn ctx(&self, user: usize) -> CallContext {
        CallContext::new(self.users[user], 1, 1_000)
    }

    fn seed(&self, ra: u128, rb: u128) {
        self.amm
            .add_liquidity(&self.ctx(0), &self.x.address(), &self.y.address(), ra, rb)
            .unwrap();
    }

    fn reserves(&self) -> (u128, u128) {
        self.amm.reserves(&self.x.address(), &self.y.address()).unwrap()
    }

    fn assert_conserved(&self) {
        self.amm.verify_invariants().unwrap();
        for token in [&self.x, &self.y] {
            let held: u128 = self
                .users
                .iter()
                .chain(std::iter::once(&self.amm.address()))
                .map(|a| token.balance_of(a))
                .sum();
            assert_eq!(held, 2 * SUPPLY);
            assert!(token.verify_supply_invariant());
        }
        let (ra, rb) = self.reserves();
        assert_eq!(self.x.balance_of(&self.amm.address()), ra);
        assert_eq!(self.y.balance_of(&self.amm.address()), rb);
    }
}

fn reserve_strategy() -> impl Strategy<Value = u128> {
    1_000u128..=1_000_000_000u128
}

// ---------------------------------------------------------------------------
// AMM properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_swap_preserves_constant_product(
        ra in reserve_strategy(),
        rb in reserve_strategy(),
        amount_in in 1u128..=1_000_000_000u128,
        forward in any::<bool>(),
    ) {
        let market = Market::new();
        market.seed(ra, rb);
        let (before_x, before_y) = market.reserves();

        let path = if forward {
            vec![market.x.address(), market.y.address()]
        } else {
            vec![market.y.address(), market.x.address()]
        };
        let bob = market.users[1];
        let Ok(amounts) = market
            .amm
            .swap_exact_tokens_for_tokens(&market.ctx(1), amount_in, 0, &path, &bob, 1_000)
        else {
            // A rejected swap leaves nothing to check.
            return Ok(());
        };

        let reserve_out = if forward { before_y } else { before_x };
        prop_assert!(amounts[1] < reserve_out);

        let (after_x, after_y) = market.reserves();
        prop_assert!(after_x * after_y >= before_x * before_y);
        market.assert_conserved();
    }

    #[test]
    fn prop_add_remove_never_profits(
        ra in reserve_strategy(),
        rb in reserve_strategy(),
        add_x in 1u128..=1_000_000_000u128,
        add_y in 1u128..=1_000_000_000u128,
    ) {
        let market = Market::new();
        market.seed(ra, rb);
        let (x, y) = (market.x.address(), market.y.address());

        let Ok(added) = market.amm.add_liquidity(&market.ctx(1), &x, &y, add_x, add_y) else {
            return Ok(());
        };
        let removed = market
            .amm
            .remove_liquidity(&market.ctx(1), &x, &y, added.shares)
            .unwrap();

        prop_assert!(removed.amount_a <= added.amount_a);
        prop_assert!(removed.amount_b <= added.amount_b);
        prop_assert_eq!(market.amm.shares_of(&x, &y, &market.users[1]).unwrap(), 0);
        market.assert_conserved();
    }

    #[test]
    fn prop_random_amm_sequence_conserves(
        ops in prop::collection::vec((0u8..3, 0usize..2, any::<bool>(), 1u128..10_000_000u128), 1..40),
    ) {
        let market = Market::new();
        market.seed(1_000_000, 2_000_000);
        let (x, y) = (market.x.address(), market.y.address());

        for (kind, user, flip, amount) in ops {
            let ctx = market.ctx(user);
            let _ = match kind {
                0 => market.amm.add_liquidity(&ctx, &x, &y, amount, amount / 2 + 1).map(|_| ()),
                1 => {
                    let path = if flip { [y, x] } else { [x, y] };
                    market
                        .amm
                        .swap_exact_tokens_for_tokens(&ctx, amount, 0, &path, &ctx.caller, 1_000)
                        .map(|_| ())
                }
                _ => {
                    let held = market.amm.shares_of(&x, &y, &ctx.caller).unwrap();
                    market.amm.remove_liquidity(&ctx, &x, &y, (amount % (held + 1)).max(1)).map(|_| ())
                }
            };
            market.assert_conserved();
        }
    }
}

// ---------------------------------------------------------------------------
// Lending properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_lending_sequence_stays_solvent(
        ops in prop::collection::vec((0u8..4, 0usize..2, any::<bool>(), 1u128..2_000u128), 1..40),
    ) {
        let registry = TokenRegistry::new();
        let weth = Arc::new(InMemoryToken::new("WETH", 18).unwrap());
        let usdc = Arc::new(InMemoryToken::new("USDC", 6).unwrap());
        registry.register(weth.clone()).unwrap();
        registry.register(usdc.clone()).unwrap();

        let admin = Address::from_label("admin");
        let lending = LendingEngine::new(
            Address::from_label("lending"),
            admin,
            registry,
            LendingParams::default(),
        );
        let admin_ctx = CallContext::new(admin, 1, 1_000);
        lending
            .init_reserve(&admin_ctx, &weth.address(), ReserveParams::at_price(2_000 * WAD))
            .unwrap();
        lending
            .init_reserve(&admin_ctx, &usdc.address(), ReserveParams::at_price(WAD))
            .unwrap();

        let users = [Address::from_label("alice"), Address::from_label("bob")];
        for user in &users {
            weth.mint(user, 1_000 * WAD).unwrap();
            usdc.mint(user, 10_000_000_000_000).unwrap();
            for token in [&weth, &usdc] {
                token.approve(user, &lending.address(), u128::MAX).unwrap();
            }
        }

        for (kind, user, use_weth, units) in ops {
            let ctx = CallContext::new(users[user], 1, 1_000);
            // One unit is 0.01 WETH or 10 USDC.
            let (asset, amount) = if use_weth {
                (weth.address(), units * WAD / 100)
            } else {
                (usdc.address(), units * 10_000_000)
            };
            let result = match kind {
                0 => lending.supply_collateral(&ctx, &asset, amount).map(|_| ()),
                1 => lending.withdraw_collateral(&ctx, &asset, amount).map(|_| ()),
                2 => lending.borrow(&ctx, &asset, amount).map(|_| ()),
                _ => lending.repay(&ctx, &asset, amount).map(|_| ()),
            };

            lending.verify_invariants().unwrap();
            for token in [&weth, &usdc] {
                let reserve = lending.reserve_data(&token.address()).unwrap();
                prop_assert_eq!(token.balance_of(&lending.address()), reserve.available_liquidity);
            }
            if result.is_ok() && (kind == 1 || kind == 2) {
                let data = lending.get_user_account_data(&ctx.caller).unwrap();
                prop_assert!(data.health_factor >= WAD);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Arithmetic properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_mul_div_matches_naive(
        a in 0u128..=u64::MAX as u128,
        b in 0u128..=u64::MAX as u128,
        c in 1u128..=u64::MAX as u128,
    ) {
        prop_assert_eq!(mul_div(a, b, c).unwrap(), a * b / c);
    }

    #[test]
    fn prop_mul_div_wide_intermediate(
        a in any::<u128>(),
        c in 1u128..,
    ) {
        // a * c / c never overflows even though a * c does.
        prop_assert_eq!(mul_div(a, c, c).unwrap(), a);
    }

    #[test]
    fn prop_health_factor_monotonic(
        collateral in 0u128..=1_000_000_000 * WAD,
        extra in 0u128..=1_000_000 * WAD,
        debt in 1u128..=1_000_000_000 * WAD,
    ) {
        let base = health_factor(collateral, debt).unwrap();
        prop_assert!(health_factor(collateral + extra, debt).unwrap() >= base);
        prop_assert!(health_factor(collateral, debt + extra).unwrap() <= base);
        prop_assert_eq!(health_factor(collateral, 0).unwrap(), u128::MAX);
    }
}
