// src/bidder.rs
//
// Bidder variants:
//
// - TruthfulBidder: bids the ground-truth value. Stateless; represents the
//   environment/supply side, not a learning agent.
// - SpbBidder: budget-paced bidder. Maintains per-iteration budget state, a
//   pacing level adjusted every `rounds_per_step` rounds toward the spend
//   rate implied by the remaining budget, bounded history windows, a
//   spend->value model used to pick an optimal spend target, and bounded
//   per-round exploration around the current level.
//
// The pacing update interpolates the level from a (level, step spend)
// history restricted to a monotone bid->spend curve, then clamps the move
// to +/- bid_step per step.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::config::{BidderSpec, SpbBidderKwargs};
use crate::types::Postback;
use crate::window::BoundedWindow;

/// Spend below this is treated as "the step bought nothing": the level is
/// raised by `bid_step` directly since the spend curve carries no signal.
const SPEND_EPS: f64 = 1e-6;

/// Relative distance under which two pacing levels are merged into one
/// history sample.
const LEVEL_MERGE_REL: f64 = 1e-6;

/// A bid decision for one round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BidDecision {
    /// Non-negative, budget-capped bid amount.
    pub amount: f64,
    /// Exploration offset applied to the pacing level this round
    /// (0.0 for truthful bids and exhausted budgets).
    pub explore_offset: f64,
}

/// Aggregates returned from a pacing step update, for step records.
#[derive(Debug, Clone, Copy)]
pub struct StepSummary {
    pub bid_level: f64,
    pub spend_rate: f64,
    pub win_rate: f64,
    pub value_rate: f64,
    pub target_step_spend: f64,
    pub budget: f64,
    pub budget_remaining: f64,
}

/// Closed set of bidder variants, selected once at setup.
#[derive(Debug, Clone)]
pub enum Bidder {
    Truthful(TruthfulBidder),
    Spb(SpbBidder),
}

impl Bidder {
    pub fn from_spec(spec: &BidderSpec) -> Self {
        match spec {
            BidderSpec::Truthful => Bidder::Truthful(TruthfulBidder),
            BidderSpec::Spb(kwargs) => Bidder::Spb(SpbBidder::new(kwargs)),
        }
    }

    /// Iteration start: budget-paced bidders draw a fresh budget and reset
    /// iteration-scoped counters. Truthful bidders carry no state.
    pub fn begin_iteration(&mut self, rng: &mut ChaCha8Rng) {
        if let Bidder::Spb(spb) = self {
            spb.begin_iteration(rng);
        }
    }

    /// Produce the round's bid. Truthful bidders see ground truth; paced
    /// bidders see only the observation-derived estimate.
    pub fn bid(&mut self, true_value: f64, estimated_value: f64, rng: &mut ChaCha8Rng) -> BidDecision {
        match self {
            Bidder::Truthful(_) => BidDecision {
                amount: true_value,
                explore_offset: 0.0,
            },
            Bidder::Spb(spb) => spb.bid(estimated_value, rng),
        }
    }

    /// Charge the price paid for a won round.
    pub fn charge(&mut self, price: f64) {
        if let Bidder::Spb(spb) = self {
            spb.charge(price);
        }
    }

    /// Per-round outcome bookkeeping for participating bidders.
    pub fn record_round(&mut self, won: bool) {
        if let Bidder::Spb(spb) = self {
            spb.record_round(won);
        }
    }

    /// Deliver a delayed outcome signal. `count_in_step` controls whether
    /// the value feeds the open step's aggregate (attribution policy is
    /// the driver's call).
    pub fn on_postback(&mut self, postback: &Postback, count_in_step: bool) {
        if let Bidder::Spb(spb) = self {
            spb.on_postback(postback, count_in_step);
        }
    }

    /// Iteration end: fold the iteration's realized spend/value into the
    /// model histories and refit the spend->value model.
    pub fn end_iteration(&mut self) {
        if let Bidder::Spb(spb) = self {
            spb.end_iteration();
        }
    }

    pub fn as_spb(&self) -> Option<&SpbBidder> {
        match self {
            Bidder::Truthful(_) => None,
            Bidder::Spb(spb) => Some(spb),
        }
    }

    pub fn as_spb_mut(&mut self) -> Option<&mut SpbBidder> {
        match self {
            Bidder::Truthful(_) => None,
            Bidder::Spb(spb) => Some(spb),
        }
    }
}

/// Bids the true value, always. No budget, no exploration, no memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct TruthfulBidder;

/// Budget-paced bidder state (one instance per agent copy, exclusively
/// owned by that copy).
#[derive(Debug, Clone)]
pub struct SpbBidder {
    // Immutable kwargs.
    budget_range: [f64; 2],
    rounds_per_step: usize,
    bid_step: f64,
    explore_bid_max: f64,

    // Iteration-scoped state.
    budget: f64,
    spending: f64,
    step_spending: f64,
    step_wins: u32,
    step_rounds: u32,
    step_value: f64,
    iter_value: f64,

    // Pacing state, persistent across iterations within a run.
    bid_level: f64,
    /// (level, realized step spend) samples, newest evicts oldest.
    level_history: BoundedWindow<(f64, f64)>,
    /// Fine-grained postback samples, updated on arrival.
    postback_window: BoundedWindow<Postback>,
    /// Per-iteration realized spend / realized value, for the model fit.
    spend_history: BoundedWindow<f64>,
    value_history: BoundedWindow<f64>,
    /// Model-implied optimal iteration spend; None while the model is not
    /// ready (exploration mode).
    optimal_budget: Option<f64>,
}

impl SpbBidder {
    pub fn new(kwargs: &SpbBidderKwargs) -> Self {
        Self {
            budget_range: kwargs.budget_per_iter_range,
            rounds_per_step: kwargs.rounds_per_step,
            bid_step: kwargs.bid_step,
            explore_bid_max: kwargs.explore_bid_max,
            budget: 0.0,
            spending: 0.0,
            step_spending: 0.0,
            step_wins: 0,
            step_rounds: 0,
            step_value: 0.0,
            iter_value: 0.0,
            bid_level: 1.0,
            level_history: BoundedWindow::new(kwargs.memory),
            postback_window: BoundedWindow::new(kwargs.spb_memory),
            spend_history: BoundedWindow::new(kwargs.spb_memory),
            value_history: BoundedWindow::new(kwargs.spb_memory),
            optimal_budget: None,
        }
    }

    pub fn rounds_per_step(&self) -> usize {
        self.rounds_per_step
    }

    pub fn level(&self) -> f64 {
        self.bid_level
    }

    pub fn budget(&self) -> f64 {
        self.budget
    }

    pub fn spending(&self) -> f64 {
        self.spending
    }

    pub fn remaining_budget(&self) -> f64 {
        (self.budget - self.spending).max(0.0)
    }

    fn begin_iteration(&mut self, rng: &mut ChaCha8Rng) {
        let [lo, hi] = self.budget_range;
        self.budget = if lo < hi { rng.gen_range(lo..=hi) } else { lo };
        self.spending = 0.0;
        self.step_spending = 0.0;
        self.step_wins = 0;
        self.step_rounds = 0;
        self.step_value = 0.0;
        self.iter_value = 0.0;
    }

    fn bid(&mut self, estimated_value: f64, rng: &mut ChaCha8Rng) -> BidDecision {
        let explore_offset = if self.explore_bid_max > 0.0 {
            rng.gen_range(-self.explore_bid_max..=self.explore_bid_max)
        } else {
            0.0
        };

        let remaining = self.budget - self.spending;
        if remaining <= 0.0 {
            // Exhausted for the iteration: sit out. Normal operation, not
            // an error.
            return BidDecision {
                amount: 0.0,
                explore_offset: 0.0,
            };
        }

        let level = (self.bid_level + explore_offset).max(0.0);
        let amount = (estimated_value * level).min(remaining).max(0.0);
        BidDecision {
            amount,
            explore_offset,
        }
    }

    fn charge(&mut self, price: f64) {
        self.spending += price;
        self.step_spending += price;
    }

    fn record_round(&mut self, won: bool) {
        self.step_rounds += 1;
        if won {
            self.step_wins += 1;
        }
    }

    fn on_postback(&mut self, postback: &Postback, count_in_step: bool) {
        self.postback_window.push(*postback);
        if count_in_step {
            self.step_value += postback.value;
        }
        self.iter_value += postback.value;
    }

    /// Pacing step update, driven by the simulation every
    /// `rounds_per_step` rounds. `rounds_remaining` counts rounds left in
    /// the iteration after the closing step.
    pub fn step_update(&mut self, rounds_remaining: usize) -> StepSummary {
        let spend_rate = self.step_spending / self.rounds_per_step as f64;
        let win_rate = if self.step_rounds > 0 {
            self.step_wins as f64 / self.step_rounds as f64
        } else {
            0.0
        };
        let value_rate = self.step_value / self.rounds_per_step as f64;

        // Oldest sample is evicted before the new one lands (ring buffer).
        self.level_history.push((self.bid_level, self.step_spending));

        // Target step spend implied by the remaining allowance. A ready
        // model substitutes its optimal spend for the raw budget.
        let allowance = match self.optimal_budget {
            Some(ob) => ob.min(self.budget),
            None => self.budget,
        };
        let remaining_allowance = (allowance - self.spending).max(0.0);
        let target_step_spend = if rounds_remaining > 0 {
            remaining_allowance / rounds_remaining as f64 * self.rounds_per_step as f64
        } else {
            0.0
        };

        if rounds_remaining > 0 {
            let proposed = if self.step_spending < SPEND_EPS {
                self.bid_level + self.bid_step
            } else {
                let samples = self.level_history.to_vec();
                impc_level(&samples, target_step_spend)
                    .clamp(self.bid_level - self.bid_step, self.bid_level + self.bid_step)
            };
            let mut level = proposed.max(0.0);
            if self.optimal_budget.is_none() {
                // Exploration mode: cap the level until the model is ready.
                level = level.min(self.explore_bid_max);
            }
            self.bid_level = level;
        }

        let summary = StepSummary {
            bid_level: self.bid_level,
            spend_rate,
            win_rate,
            value_rate,
            target_step_spend,
            budget: self.budget,
            budget_remaining: self.remaining_budget(),
        };

        self.step_spending = 0.0;
        self.step_wins = 0;
        self.step_rounds = 0;
        self.step_value = 0.0;

        summary
    }

    fn end_iteration(&mut self) {
        self.spend_history.push(self.spending);
        self.value_history.push(self.iter_value);

        let spends = self.spend_history.to_vec();
        let values = self.value_history.to_vec();
        self.optimal_budget = if spends.len() >= 2 {
            fit_spend_value_model(&spends, &values)
                .map(|(a, b)| optimal_spend(a, b).min(self.budget))
        } else {
            None
        };
    }

    /// The per-iteration planned spend ceiling, once the model is ready.
    pub fn optimal_budget(&self) -> Option<f64> {
        self.optimal_budget
    }

    /// Recent postback samples, oldest first.
    pub fn recent_postbacks(&self) -> Vec<Postback> {
        self.postback_window.to_vec()
    }
}

// ---------------------------------------------------------------------------
// Pacing interpolation: level from a monotone bid->spend history.
// ---------------------------------------------------------------------------

/// Merge samples whose levels are within a relative hair of each other,
/// averaging both coordinates. Input must be sorted by level.
fn aggregate_near_samples(sorted: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut out = Vec::new();
    let mut group: Vec<(f64, f64)> = Vec::new();
    for &s in sorted {
        if group.is_empty() || s.0 < group[0].0 * (1.0 + LEVEL_MERGE_REL) {
            group.push(s);
        } else {
            out.push(mean_sample(&group));
            group.clear();
            group.push(s);
        }
    }
    if !group.is_empty() {
        out.push(mean_sample(&group));
    }
    out
}

fn mean_sample(group: &[(f64, f64)]) -> (f64, f64) {
    let n = group.len() as f64;
    let (sx, sy) = group
        .iter()
        .fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
    (sx / n, sy / n)
}

/// Longest non-decreasing subsequence in spend (patience algorithm), so
/// interpolation runs over a monotone curve even when the raw history is
/// noisy.
fn increasing_subsequence(samples: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut result: Vec<(f64, f64)> = Vec::new();
    for &s in samples {
        let mut l = 0;
        let mut r = result.len();
        while l < r {
            let mid = (l + r) / 2;
            if s.1 >= result[mid].1 {
                l = mid + 1;
            } else {
                r = mid;
            }
        }
        if l == result.len() {
            result.push(s);
        } else {
            result[l] = s;
        }
    }
    result
}

fn interpolate(x1: f64, y1: f64, x2: f64, y2: f64, x: f64) -> f64 {
    if (x1 - x2).abs() < 1e-6 {
        return (y1 + y2) / 2.0;
    }
    y1 + (y2 - y1) * (x - x1) / (x2 - x1)
}

/// Level whose interpolated spend meets `target`, from (level, spend)
/// history samples. Falls back to 1.0 with no usable samples, and
/// extrapolates from the origin when the target exceeds every observed
/// spend.
fn impc_level(history: &[(f64, f64)], target: f64) -> f64 {
    let mut samples = history.to_vec();
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let samples = aggregate_near_samples(&samples);
    let samples = increasing_subsequence(&samples);
    if samples.is_empty() {
        return 1.0;
    }

    let mut bid = 0.0;
    let mut spend = 0.0;
    let mut i = 0;
    while i < samples.len() && samples[i].1 < target {
        bid = samples[i].0;
        spend = samples[i].1;
        i += 1;
    }
    if i < samples.len() {
        // x = spend, y = level.
        interpolate(spend, bid, samples[i].1, samples[i].0, target)
    } else {
        let last = samples[samples.len() - 1];
        interpolate(0.0, 0.0, last.1, last.0, target)
    }
}

// ---------------------------------------------------------------------------
// Spend->value model: value(s) = (sqrt(b^2 + 2 a s) - b) / a, a > 0, b >= 0.
// Inverts to s = (a/2) v^2 + b v, linear in (a, b), so the fit is exact
// least squares on the inverted form.
// ---------------------------------------------------------------------------

/// Fit (a, b) from per-iteration (spend, value) pairs. None when the data
/// is degenerate or the fitted curve is not concave increasing.
fn fit_spend_value_model(spends: &[f64], values: &[f64]) -> Option<(f64, f64)> {
    if spends.len() < 2 || spends.len() != values.len() {
        return None;
    }

    let mut s11 = 0.0;
    let mut s12 = 0.0;
    let mut s22 = 0.0;
    let mut t1 = 0.0;
    let mut t2 = 0.0;
    for (&s, &v) in spends.iter().zip(values.iter()) {
        let x1 = v * v / 2.0;
        let x2 = v;
        s11 += x1 * x1;
        s12 += x1 * x2;
        s22 += x2 * x2;
        t1 += x1 * s;
        t2 += x2 * s;
    }

    let det = s11 * s22 - s12 * s12;
    if det.abs() > 1e-12 {
        let a = (t1 * s22 - t2 * s12) / det;
        let b = (t2 * s11 - t1 * s12) / det;
        if a > 0.0 && b >= 0.0 {
            return Some((a, b));
        }
        if a > 0.0 && b < 0.0 {
            // Re-fit on the boundary b = 0.
            if s11 > 0.0 {
                let a0 = t1 / s11;
                if a0 > 0.0 {
                    return Some((a0, 0.0));
                }
            }
        }
        return None;
    }

    // Collinear samples: try the pure-quadratic model.
    if s11 > 0.0 {
        let a0 = t1 / s11;
        if a0 > 0.0 {
            return Some((a0, 0.0));
        }
    }
    None
}

/// Spend maximizing value minus cost under the fitted model.
fn optimal_spend(a: f64, b: f64) -> f64 {
    (2.0 - 2.0 * b) / a
}
