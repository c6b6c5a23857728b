//! Price ladder and phased coin release.
//!
//! Every completed activation moves one rung up an integer price ladder:
//!
//! ```text
//! price(0) = STARTING_PRICE
//! price(n) = price(n-1) + ceil(price(n-1) * sqrt(5) / (2n))
//! ```
//!
//! The increment is rounded up, so the ladder is strictly increasing and the
//! protocol never under-charges through truncation. The ceiling is computed
//! exactly in integers: `ceil(p * sqrt(5))` is the smallest `s` with
//! `s^2 >= 5 p^2`, and since `2n * q` is an integer, `q = ceil(s / 2n)`.
//!
//! After each activation the reward-pool ledger is checked. While units
//! remain and the price exceeds the release target, `remaining / divisor`
//! units unlock, the divisor halves and the target is multiplied by the
//! golden ratio. Once fewer than [`TERMINAL_REMAINDER`] units remain after a
//! release, the remainder unlocks too and distribution ends.
//!
//! Everything here is a pure function of [`TokenomicsState`]; callers own
//! the state and decide when a transition is committed.

use serde::{Deserialize, Serialize};

use crate::constants::{STARTING_PRICE, TERMINAL_REMAINDER};
use crate::error::PricingError;
use crate::types::TokenomicsState;

/// One rung of the ladder: `price(n)` given `prev = price(n-1)`.
///
/// `n` must be at least 1.
pub fn price_step(prev: u64, n: u64) -> Result<u64, PricingError> {
    if n == 0 {
        return Err(PricingError::InvalidState("ladder index must be >= 1".into()));
    }
    let p = prev as u128;
    let five_p2 = p
        .checked_mul(p)
        .and_then(|sq| sq.checked_mul(5))
        .ok_or(PricingError::ArithmeticOverflow)?;

    // s = ceil(p * sqrt(5))
    let mut s = five_p2.isqrt();
    if s * s < five_p2 {
        s += 1;
    }

    let denom = 2 * n as u128;
    let increment = s.div_ceil(denom);

    let next = p
        .checked_add(increment)
        .ok_or(PricingError::ArithmeticOverflow)?;
    u64::try_from(next).map_err(|_| PricingError::ArithmeticOverflow)
}

/// `price(tokens_minted)`, walking the ladder from the starting price.
///
/// O(n); the state machine itself steps incrementally from `next_price`.
pub fn calculate_price(tokens_minted: u64) -> Result<u64, PricingError> {
    let mut price = STARTING_PRICE;
    for n in 1..=tokens_minted {
        price = price_step(price, n)?;
    }
    Ok(price)
}

/// Iterator over `price(0), price(1), ...`. Ends if a rung would overflow.
#[derive(Debug, Clone)]
pub struct PriceLadder {
    index: u64,
    current: Option<u64>,
}

impl Iterator for PriceLadder {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let price = self.current?;
        self.index += 1;
        self.current = price_step(price, self.index).ok();
        Some(price)
    }
}

/// The ladder from `price(0)`.
pub fn price_ladder() -> PriceLadder {
    PriceLadder {
        index: 0,
        current: Some(STARTING_PRICE),
    }
}

/// `floor(target * phi)` with `phi = (1 + sqrt(5)) / 2`, saturating at `u64::MAX`.
///
/// `target * sqrt(5)` is irrational for any non-zero target, so its floor is
/// `isqrt(5 * target^2)` and the halving floor commutes with it.
pub fn release_target_after(target: u64) -> u64 {
    let t = target as u128;
    let Some(five_t2) = t.checked_mul(t).and_then(|sq| sq.checked_mul(5)) else {
        return u64::MAX;
    };
    let next = (t + five_t2.isqrt()) / 2;
    u64::try_from(next).unwrap_or(u64::MAX)
}

/// A single phase of the reward pool unlocking.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CoinRelease {
    /// Units unlocked by this phase, including any terminal remainder.
    pub amount: u64,
    pub total_released: u64,
    pub remaining: u64,
    /// Price that crossed the target.
    pub trigger_price: u64,
    /// Whether this phase ended distribution.
    pub terminal: bool,
}

/// Everything needed to revert exactly one [`activate`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ActivationUndo {
    /// `tokens_minted` before the activation.
    pub tokens_minted: u64,
    /// `prev_price` before the activation.
    pub prev_price: u64,
    pub coin_divisor: u64,
    pub coins_released: u64,
    pub coins_remaining: u64,
    pub release_target: u64,
    pub next_release_amount: u64,
}

/// Result of a successful [`activate`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Activated {
    pub state: TokenomicsState,
    /// Price charged for this slot, `price(tokens_minted + 1)`.
    pub charged: u64,
    pub releases: Vec<CoinRelease>,
    pub undo: ActivationUndo,
}

impl Activated {
    /// Total units unlocked by this activation.
    pub fn released(&self) -> u64 {
        self.releases.iter().map(|r| r.amount).sum()
    }
}

/// Charge the next slot and advance the ladder.
///
/// Expects `state.next_price == price(state.tokens_minted)`, which holds for
/// every state reachable from [`TokenomicsState::genesis`].
pub fn activate(state: &TokenomicsState) -> Result<Activated, PricingError> {
    let n = state
        .tokens_minted
        .checked_add(1)
        .ok_or(PricingError::ArithmeticOverflow)?;
    let charged = price_step(state.next_price, n)?;

    let undo = ActivationUndo {
        tokens_minted: state.tokens_minted,
        prev_price: state.prev_price,
        coin_divisor: state.coin_divisor,
        coins_released: state.coins_released,
        coins_remaining: state.coins_remaining,
        release_target: state.release_target,
        next_release_amount: state.next_release_amount,
    };

    let mut next = state.clone();
    next.prev_price = state.next_price;
    next.next_price = charged;
    next.tokens_minted = n;
    next.proof_of_faith = state
        .proof_of_faith
        .checked_add(charged)
        .ok_or(PricingError::ArithmeticOverflow)?;

    let releases = run_releases(&mut next);

    Ok(Activated {
        state: next,
        charged,
        releases,
        undo,
    })
}

/// Revert the activation that produced `state`.
///
/// Restores `next_price` from `prev_price`, removes the charge from
/// `proof_of_faith`, and puts the coin ledger back from `undo`. Only a
/// single step is supported: `undo` must be the record returned by the
/// [`activate`] call that produced `state`.
pub fn deactivate(
    state: &TokenomicsState,
    undo: &ActivationUndo,
) -> Result<TokenomicsState, PricingError> {
    if state.tokens_minted == 0 {
        return Err(PricingError::InvalidState(
            "cannot deactivate at zero supply".into(),
        ));
    }
    if undo.tokens_minted.checked_add(1) != Some(state.tokens_minted) {
        return Err(PricingError::InvalidState(format!(
            "undo record for supply {} applied at supply {}",
            undo.tokens_minted, state.tokens_minted
        )));
    }
    let proof_of_faith = state
        .proof_of_faith
        .checked_sub(state.next_price)
        .ok_or_else(|| {
            PricingError::InvalidState(format!(
                "proof of faith {} below last charge {}",
                state.proof_of_faith, state.next_price
            ))
        })?;

    Ok(TokenomicsState {
        proof_of_faith,
        tokens_minted: undo.tokens_minted,
        next_price: state.prev_price,
        prev_price: undo.prev_price,
        coin_divisor: undo.coin_divisor,
        coins_released: undo.coins_released,
        coins_remaining: undo.coins_remaining,
        release_target: undo.release_target,
        next_release_amount: undo.next_release_amount,
    })
}

/// Fire every release the current price has earned.
fn run_releases(state: &mut TokenomicsState) -> Vec<CoinRelease> {
    let mut releases = Vec::new();

    while state.coins_remaining > 0 && state.next_price > state.release_target {
        let divisor = state.coin_divisor.max(1);
        let mut amount = state.coins_remaining / divisor;
        state.coins_released += amount;
        state.coins_remaining -= amount;

        let terminal = state.coins_remaining < TERMINAL_REMAINDER;
        if terminal {
            amount += state.coins_remaining;
            state.coins_released += state.coins_remaining;
            state.coins_remaining = 0;
        }

        state.coin_divisor = (divisor / 2).max(1);
        state.release_target = release_target_after(state.release_target);
        state.next_release_amount = state.coins_remaining / state.coin_divisor;

        releases.push(CoinRelease {
            amount,
            total_released: state.coins_released,
            remaining: state.coins_remaining,
            trigger_price: state.next_price,
            terminal,
        });
    }

    releases
}
