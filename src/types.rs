// src/types.rs
//
// Common shared types for the bidsim auction engine: pricing rules,
// outcome records emitted to sinks, and the delayed-feedback payload.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Auction pricing rule applied by the mechanism when clearing a round.
///
/// Variant names match the strings used by the configuration document
/// (`"SecondPrice"` / `"FirstPrice"`), so no serde renames are needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricingRule {
    SecondPrice,
    FirstPrice,
}

/// Round index within a run, counted across iterations
/// (`iteration * rounds_per_iter + round`).
pub type GlobalRound = usize;

/// A delayed outcome signal attributable to a past win.
///
/// Scheduled by the driver at the round of the win and delivered to the
/// winning bidder exactly `postback_delay` rounds later, exactly once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Postback {
    /// Round (global, within the run) in which the win occurred.
    pub origin_round: GlobalRound,
    /// Price the winner paid in the origin round.
    pub price: f64,
    /// Realized value of the won item (ground truth).
    pub value: f64,
}

/// Per-round, per-agent-copy outcome record (the output contract).
///
/// Note: `agent` uses `Arc<str>` for cheap cloning in the per-round hot path;
/// all records for one agent share the same allocation.
#[derive(Debug, Clone, Serialize)]
pub struct RoundRecord {
    pub run: usize,
    pub iteration: usize,
    /// Round index within the iteration.
    pub round: usize,
    pub agent: Arc<str>,
    pub copy: usize,
    /// Index of the item the copy's allocator selected, if it had supply.
    pub item: Option<usize>,
    /// Bid actually submitted (non-negative, budget-capped).
    pub bid: f64,
    /// Exploration offset applied to the pacing level this round
    /// (0.0 for non-exploring bidders).
    pub explore_offset: f64,
    pub won: bool,
    /// Price paid (0 if lost).
    pub price: f64,
    /// Ground-truth value of the selected item.
    pub true_value: f64,
    /// Value estimate derived from the noisy observation.
    pub estimated_value: f64,
    /// Whether the oracle's value-maximizing allocation would have awarded
    /// this copy (environment-side ground-truth signal).
    pub oracle_won: bool,
}

/// Per-step, per-budget-paced-bidder record (pacing telemetry).
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub run: usize,
    pub iteration: usize,
    /// Step index within the iteration (0-based).
    pub step: usize,
    pub agent: Arc<str>,
    pub copy: usize,
    /// Pacing level after this step's update.
    pub bid_level: f64,
    /// Realized spend per round over the just-completed step.
    pub spend_rate: f64,
    /// Realized win rate over the just-completed step.
    pub win_rate: f64,
    /// Realized postback value per round over the just-completed step
    /// (attributed to the step in which the postback arrived).
    pub value_rate: f64,
    /// Target spend for the step implied by remaining budget.
    pub target_step_spend: f64,
    /// Budget drawn for the current iteration.
    pub budget: f64,
    /// Budget still unspent after this step.
    pub budget_remaining: f64,
}

/// One evaluated counterfactual offset on the isotonic calibration grid.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CurvePoint {
    /// Offset applied to the focal bid.
    pub offset: f64,
    /// Whether the shifted bid would have won the round.
    pub won: bool,
    /// True when the shifted bid was clipped at a boundary (below zero or
    /// above the practical ceiling) rather than evaluated as-is.
    pub saturated: bool,
}

/// Per-round calibration sweep recorded by the isotonic-perturbation
/// allocator. Read-only with respect to the real allocation.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationRecord {
    pub run: usize,
    pub iteration: usize,
    pub round: usize,
    pub agent: Arc<str>,
    pub copy: usize,
    /// Bid actually submitted by the focal copy.
    pub bid: f64,
    pub points: Vec<CurvePoint>,
}

/// Delivery of a postback to a bidder (emitted when the driver hands the
/// signal over, `postback_delay` rounds after the origin round).
#[derive(Debug, Clone, Serialize)]
pub struct PostbackRecord {
    pub run: usize,
    pub agent: Arc<str>,
    pub copy: usize,
    pub origin_round: GlobalRound,
    pub delivery_round: GlobalRound,
    pub price: f64,
    pub value: f64,
}
