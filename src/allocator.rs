// src/allocator.rs
//
// Allocator variants. Both have perfect information (they see true values,
// not observations):
//
// - OracleAllocator: exact value-maximizing allocation + implied price.
//   Used by the environment side to generate ground-truth signal.
// - IsotonicPerturbationOracleAllocator: same allocation behavior, plus a
//   read-only counterfactual sweep over bid offsets used to build a
//   monotone win-probability calibration curve. It never changes which bid
//   is charged or which item is truly awarded.

use crate::auction::{self, ClearingResult};
use crate::config::{AllocatorSpec, IsotonicAllocatorKwargs};
use crate::types::{CurvePoint, PricingRule};

/// Closed set of allocator variants, selected once at setup.
#[derive(Debug, Clone)]
pub enum Allocator {
    Oracle,
    IsotonicPerturbationOracle(IsotonicPerturbation),
}

impl Allocator {
    pub fn from_spec(spec: &AllocatorSpec) -> Self {
        match spec {
            AllocatorSpec::Oracle => Allocator::Oracle,
            AllocatorSpec::IsotonicPerturbationOracle(kwargs) => {
                Allocator::IsotonicPerturbationOracle(IsotonicPerturbation::new(kwargs))
            }
        }
    }

    /// Pick the value-maximizing item from the copy's supply (lowest index
    /// on ties). None when the copy has no supply this round.
    pub fn select_item(&self, true_values: &[f64]) -> Option<usize> {
        auction::winner_of(true_values)
    }

    /// Exact maximizing allocation over ground-truth values, with the price
    /// implied by the pricing rule. No approximation, no randomization.
    pub fn allocate(&self, pricing: PricingRule, true_values: &[f64]) -> Option<ClearingResult> {
        auction::clear(pricing, true_values)
    }

    /// The perturbation sweep, if this allocator performs one.
    pub fn perturbation(&self) -> Option<&IsotonicPerturbation> {
        match self {
            Allocator::Oracle => None,
            Allocator::IsotonicPerturbationOracle(p) => Some(p),
        }
    }
}

/// Counterfactual offset grid for the isotonic calibration curve.
#[derive(Debug, Clone)]
pub struct IsotonicPerturbation {
    offsets: Vec<f64>,
}

impl IsotonicPerturbation {
    /// Build the inclusive offset grid `min, min+step, ..., max`.
    /// Bounds and step are validated at config time (`min < max`,
    /// `step > 0`), so the grid always has at least two points.
    pub fn new(kwargs: &IsotonicAllocatorKwargs) -> Self {
        let mut offsets = Vec::new();
        let mut off = kwargs.diff_range_min;
        // Half-step tolerance so float accumulation cannot drop the
        // endpoint of an exactly divisible range.
        let limit = kwargs.diff_range_max + kwargs.diff_step * 0.5;
        while off <= limit {
            offsets.push(off.min(kwargs.diff_range_max));
            off += kwargs.diff_step;
        }
        Self { offsets }
    }

    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    /// Evaluate the counterfactual outcome at every grid offset: would the
    /// focal copy have won had its bid been shifted by the offset?
    ///
    /// Offsets pushing the bid below zero, or above `ceiling` when one
    /// applies (the bidder's remaining budget at bid time), are clipped to
    /// the boundary and flagged saturated rather than extrapolated. The
    /// sweep reads the submitted bids only; real allocation state is
    /// untouched.
    pub fn sweep(&self, bids: &[f64], focal: usize, ceiling: Option<f64>) -> Vec<CurvePoint> {
        let base = bids[focal];
        self.offsets
            .iter()
            .map(|&offset| {
                let mut shifted = base + offset;
                let mut saturated = false;
                if shifted < 0.0 {
                    shifted = 0.0;
                    saturated = true;
                }
                if let Some(cap) = ceiling {
                    if shifted > cap {
                        shifted = cap;
                        saturated = true;
                    }
                }
                CurvePoint {
                    offset,
                    won: auction::wins_with_bid(bids, focal, shifted),
                    saturated,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(min: f64, max: f64, step: f64) -> IsotonicPerturbation {
        IsotonicPerturbation::new(&IsotonicAllocatorKwargs {
            diff_range_min: min,
            diff_range_max: max,
            diff_step: step,
        })
    }

    #[test]
    fn grid_covers_range_inclusively() {
        let p = grid(-0.2, 0.2, 0.1);
        let offsets = p.offsets();
        assert_eq!(offsets.len(), 5);
        assert!((offsets[0] + 0.2).abs() < 1e-12);
        assert!((offsets[4] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn select_item_takes_max_value() {
        let a = Allocator::Oracle;
        assert_eq!(a.select_item(&[0.2, 0.9, 0.4]), Some(1));
        assert_eq!(a.select_item(&[]), None);
        // Ties go to the lowest index.
        assert_eq!(a.select_item(&[0.5, 0.5]), Some(0));
    }

    #[test]
    fn sweep_is_monotone_in_offset() {
        let p = grid(-0.5, 0.5, 0.05);
        let bids = [0.4, 0.45, 0.6];
        for focal in 0..bids.len() {
            let points = p.sweep(&bids, focal, None);
            let mut prev = false;
            for pt in &points {
                assert!(!prev || pt.won, "curve regressed for focal {focal}");
                prev = pt.won;
            }
        }
    }

    #[test]
    fn sweep_clips_below_zero_as_saturated() {
        let p = grid(-1.0, 0.0, 0.5);
        let bids = [0.3, 0.6];
        let points = p.sweep(&bids, 0, None);
        // Offsets -1.0 and -0.5 push the 0.3 bid below zero.
        assert!(points[0].saturated);
        assert!(points[1].saturated);
        assert!(!points[2].saturated);
    }

    #[test]
    fn sweep_clips_above_ceiling_as_saturated() {
        let p = grid(0.0, 1.0, 0.5);
        let bids = [0.3, 0.6];
        let points = p.sweep(&bids, 0, Some(0.5));
        // 0.3 + 1.0 exceeds the 0.5 ceiling; the clipped bid still loses.
        let last = points.last().unwrap();
        assert!(last.saturated);
        assert!(!last.won);
    }

    #[test]
    fn sweep_does_not_mutate_bids() {
        let p = grid(-0.5, 0.5, 0.25);
        let bids = [0.4, 0.45];
        let before = bids;
        let _ = p.sweep(&bids, 0, None);
        assert_eq!(bids, before);
    }
}
