// src/auction.rs
//
// Stateless per-round clearing. Each call depends only on that round's
// bids; ties always break toward the lowest participant index so repeated
// runs with the same seed pick the same winner.

use crate::types::PricingRule;

/// Result of clearing one round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearingResult {
    /// Index of the winning bid within the input slice.
    pub winner: usize,
    /// Price charged to the winner under the pricing rule.
    pub price: f64,
    /// Highest competing bid (None with a single participant).
    pub runner_up: Option<f64>,
}

/// Index of the highest bid, lowest index on ties. None for empty input.
pub fn winner_of(bids: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &b) in bids.iter().enumerate() {
        match best {
            None => best = Some(i),
            Some(j) if b > bids[j] => best = Some(i),
            Some(_) => {}
        }
    }
    best
}

/// Clear a round under the given pricing rule.
///
/// SecondPrice charges the highest competing bid (0 with a single
/// participant); FirstPrice charges the winning bid itself.
pub fn clear(pricing: PricingRule, bids: &[f64]) -> Option<ClearingResult> {
    let winner = winner_of(bids)?;

    let mut runner_up: Option<f64> = None;
    for (i, &b) in bids.iter().enumerate() {
        if i == winner {
            continue;
        }
        runner_up = Some(runner_up.map_or(b, |r: f64| r.max(b)));
    }

    let price = match pricing {
        PricingRule::SecondPrice => runner_up.unwrap_or(0.0),
        PricingRule::FirstPrice => bids[winner],
    };

    Some(ClearingResult {
        winner,
        price,
        runner_up,
    })
}

/// Would the focal participant win the round if it had bid `bid` instead,
/// all other bids unchanged? Uses the same lowest-index tie-break as
/// `clear`, so counterfactual sweeps are consistent with real clearing.
pub fn wins_with_bid(bids: &[f64], focal: usize, bid: f64) -> bool {
    for (i, &b) in bids.iter().enumerate() {
        if i == focal {
            continue;
        }
        if b > bid || (b == bid && i < focal) {
            return false;
        }
    }
    true
}
