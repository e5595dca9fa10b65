//! Token settlement with exact-amount checks and compensation.
//!
//! A [`Settlement`] performs the token movements of one engine operation
//! and remembers every leg that completed. If a later leg fails, the
//! operation calls [`Settlement::rollback`], which reverses completed legs
//! in reverse order so the caller ends up where it started.
//!
//! Every leg is verified against the engine's own balance: the engine must
//! gain (or lose) exactly the requested amount. Fee-on-transfer tokens and
//! ledgers that report success without moving funds are rejected.

use tracing::{error, warn};

use crate::core::token::{TokenLedger, TokenRegistry};
use crate::error::{Error, Result};
use crate::utils::crypto::Address;

/// Direction of a completed leg, relative to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    /// Tokens pulled from `counterparty` into custody
    Inbound,
    /// Tokens paid out of custody to `counterparty`
    Outbound,
}

#[derive(Debug, Clone)]
struct CompletedLeg {
    leg: Leg,
    token: Address,
    counterparty: Address,
    amount: u128,
}

/// Token movements of a single engine operation
#[derive(Debug)]
pub struct Settlement<'a> {
    engine: Address,
    registry: &'a TokenRegistry,
    completed: Vec<CompletedLeg>,
}

impl<'a> Settlement<'a> {
    /// Start a settlement for the engine account
    pub fn new(engine: Address, registry: &'a TokenRegistry) -> Self {
        Self {
            engine,
            registry,
            completed: Vec::new(),
        }
    }

    /// Pull `amount` of `token` from `from` into engine custody
    pub fn pull(&mut self, token: &Address, from: &Address, amount: u128) -> Result<()> {
        let ledger = self.registry.get(token)?;
        let before = ledger.balance_of(&self.engine);

        let ok = ledger
            .transfer_from(&self.engine, from, &self.engine, amount)
            .map_err(|e| transfer_failed(token, e.to_string()))?;
        if !ok {
            return Err(transfer_failed(token, "transfer_from returned false".into()));
        }

        let after = ledger.balance_of(&self.engine);
        let received = after.saturating_sub(before);
        if received != amount {
            if received > 0 {
                // Hand back whatever did arrive before reporting the mismatch.
                self.completed.push(CompletedLeg {
                    leg: Leg::Inbound,
                    token: *token,
                    counterparty: *from,
                    amount: received,
                });
            }
            return Err(transfer_failed(
                token,
                format!("received {} expected {}", received, amount),
            ));
        }

        self.completed.push(CompletedLeg {
            leg: Leg::Inbound,
            token: *token,
            counterparty: *from,
            amount,
        });
        Ok(())
    }

    /// Pay `amount` of `token` out of custody to `to`
    pub fn pay(&mut self, token: &Address, to: &Address, amount: u128) -> Result<()> {
        let ledger = self.registry.get(token)?;
        let before = ledger.balance_of(&self.engine);

        let ok = ledger
            .transfer(&self.engine, to, amount)
            .map_err(|e| transfer_failed(token, e.to_string()))?;
        if !ok {
            return Err(transfer_failed(token, "transfer returned false".into()));
        }

        let after = ledger.balance_of(&self.engine);
        let sent = before.saturating_sub(after);
        if sent > 0 {
            self.completed.push(CompletedLeg {
                leg: Leg::Outbound,
                token: *token,
                counterparty: *to,
                amount: sent,
            });
        }
        if sent != amount {
            return Err(transfer_failed(
                token,
                format!("sent {} expected {}", sent, amount),
            ));
        }
        Ok(())
    }

    /// Number of completed legs
    pub fn completed_legs(&self) -> usize {
        self.completed.len()
    }

    /// Reverse every completed leg, newest first
    ///
    /// Inbound legs are refunded from custody. Outbound legs are clawed back
    /// with `transfer_from`, which needs an allowance from the recipient.
    /// Returns [`Error::InvariantViolation`] if any leg could not be reversed.
    pub fn rollback(self) -> Result<()> {
        let mut failures = Vec::new();

        for leg in self.completed.iter().rev() {
            let reversed = self.registry.get(&leg.token).and_then(|ledger| {
                reverse_leg(ledger.as_ref(), &self.engine, leg)
            });
            match reversed {
                Ok(true) => {}
                Ok(false) => failures.push(leg.token.short()),
                Err(e) => {
                    warn!("Compensation error for {}: {}", leg.token.short(), e);
                    failures.push(leg.token.short());
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            error!("Settlement rollback incomplete for tokens {:?}", failures);
            Err(Error::InvariantViolation(format!(
                "could not reverse transfers of {}",
                failures.join(", ")
            )))
        }
    }

    /// Roll back and return the error the operation should report
    ///
    /// That is `cause` when compensation succeeded, otherwise the
    /// compensation failure.
    pub fn abort(self, cause: Error) -> Error {
        match self.compensate(cause) {
            Ok(cause) | Err(cause) => cause,
        }
    }

    /// Roll back, telling the caller whether custody is back where it started
    ///
    /// `Ok(cause)` means every completed leg was reversed and the engine may
    /// restore its previous records. `Err` carries the compensation failure:
    /// at least one leg is stranded and committed records must stay as they are.
    pub fn compensate(self, cause: Error) -> std::result::Result<Error, Error> {
        if self.completed.is_empty() {
            return Ok(cause);
        }
        warn!("Rolling back {} transfer(s): {}", self.completed.len(), cause);
        self.rollback().map(|()| cause)
    }
}

fn reverse_leg(ledger: &dyn TokenLedger, engine: &Address, leg: &CompletedLeg) -> Result<bool> {
    match leg.leg {
        Leg::Inbound => ledger.transfer(engine, &leg.counterparty, leg.amount),
        Leg::Outbound => ledger.transfer_from(engine, &leg.counterparty, engine, leg.amount),
    }
}

fn transfer_failed(token: &Address, reason: String) -> Error {
    Error::TransferFailed {
        token: token.short(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::token::InMemoryToken;
    use std::sync::Arc;

    fn setup() -> (TokenRegistry, Arc<InMemoryToken>, Address, Address) {
        let registry = TokenRegistry::new();
        let token = Arc::new(InMemoryToken::new("USDC", 6).unwrap());
        registry.register(token.clone()).unwrap();
        let engine = Address::from_label("engine");
        let user = Address::from_label("user");
        token.mint(&user, 1_000).unwrap();
        token.approve(&user, &engine, 1_000).unwrap();
        (registry, token, engine, user)
    }

    #[test]
    fn test_pull_and_pay() {
        let (registry, token, engine, user) = setup();
        let mut settlement = Settlement::new(engine, &registry);

        settlement.pull(&token.address(), &user, 400).unwrap();
        settlement.pay(&token.address(), &user, 100).unwrap();

        assert_eq!(settlement.completed_legs(), 2);
        assert_eq!(token.balance_of(&engine), 300);
        assert_eq!(token.balance_of(&user), 700);
    }

    #[test]
    fn test_pull_without_allowance_fails() {
        let (registry, token, engine, user) = setup();
        let mut settlement = Settlement::new(engine, &registry);

        let err = settlement.pull(&token.address(), &user, 2_000).unwrap_err();
        assert!(matches!(err, Error::TransferFailed { .. }));
        assert_eq!(settlement.completed_legs(), 0);
    }

    #[test]
    fn test_rollback_refunds_inbound() {
        let (registry, token, engine, user) = setup();
        let mut settlement = Settlement::new(engine, &registry);

        settlement.pull(&token.address(), &user, 400).unwrap();
        assert!(settlement.pay(&token.address(), &user, 10_000).is_err());
        settlement.rollback().unwrap();

        assert_eq!(token.balance_of(&engine), 0);
        assert_eq!(token.balance_of(&user), 1_000);
    }

    #[test]
    fn test_abort_returns_cause_after_refund() {
        let (registry, token, engine, user) = setup();
        let mut settlement = Settlement::new(engine, &registry);

        settlement.pull(&token.address(), &user, 250).unwrap();
        let err = settlement.abort(Error::ZeroAmount);
        assert!(matches!(err, Error::ZeroAmount));
        assert_eq!(token.balance_of(&user), 1_000);
    }

    #[test]
    fn test_abort_reports_failed_clawback() {
        let (registry, token, engine, user) = setup();
        token.mint(&engine, 100).unwrap();
        let mut settlement = Settlement::new(engine, &registry);

        // The recipient never approved the engine, so the payout cannot be reclaimed.
        let stranger = Address::from_label("stranger");
        settlement.pay(&token.address(), &stranger, 100).unwrap();
        let err = settlement.abort(Error::ZeroAmount);
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert_eq!(token.balance_of(&user), 1_000);
    }

    #[test]
    fn test_compensate_distinguishes_stranded_legs() {
        let (registry, token, engine, user) = setup();
        let mut settlement = Settlement::new(engine, &registry);
        settlement.pull(&token.address(), &user, 300).unwrap();
        let cause = settlement.compensate(Error::ZeroAmount).unwrap();
        assert!(matches!(cause, Error::ZeroAmount));

        token.mint(&engine, 50).unwrap();
        let mut settlement = Settlement::new(engine, &registry);
        settlement
            .pay(&token.address(), &Address::from_label("stranger"), 50)
            .unwrap();
        let failure = settlement.compensate(Error::ZeroAmount).unwrap_err();
        assert!(matches!(failure, Error::InvariantViolation(_)));
        assert_eq!(token.balance_of(&engine), 0);
    }

    #[test]
    fn test_unknown_token() {
        let (registry, _, engine, user) = setup();
        let mut settlement = Settlement::new(engine, &registry);
        let err = settlement
            .pull(&Address::from_label("nope"), &user, 1)
            .unwrap_err();
        assert!(matches!(err, Error::AssetNotSupported(_)));
    }
}
