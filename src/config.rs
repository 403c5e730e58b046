// src/config.rs
//
// Central configuration for the bidsim engine, mirroring the JSON
// configuration document consumed at simulation start:
//
// - global loop bounds (runs, iterations, rounds, participants per round)
// - embedding shape and variance
// - pricing rule and pairing policy
// - the agent roster: name, copies, supply, postback delay, and an
//   allocator/bidder pair selected from a closed set of tagged variants
//
// A configuration fully defines a reproducible simulation. All validation
// happens once, at setup; the engine never starts with an invalid config.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::PricingRule;

/// Policy for choosing which agent copies compete in a round when
/// `num_participants_per_round` is smaller than the full roster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingPolicy {
    /// Rotate a fixed-size window over the flattened copy roster.
    #[default]
    RoundRobin,
    /// Sample copies without replacement from the run RNG each round.
    Random,
}

/// Attribution policy for postbacks whose delay crosses a step boundary.
///
/// The faithful default attributes a late postback to the step in which it
/// arrives; the policy is kept swappable because the origination-step
/// reading is also defensible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostbackAttribution {
    #[default]
    ArrivalStep,
    OriginStep,
}

/// Keyword arguments for the isotonic-perturbation oracle allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsotonicAllocatorKwargs {
    pub diff_range_min: f64,
    pub diff_range_max: f64,
    pub diff_step: f64,
}

/// Allocator selection, resolved once at setup and never re-dispatched.
#[derive(Debug, Clone, Serialize)]
pub enum AllocatorSpec {
    Oracle,
    IsotonicPerturbationOracle(IsotonicAllocatorKwargs),
}

/// Keyword arguments for the budget-paced (SPB) bidder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpbBidderKwargs {
    /// `[min, max]` for the uniform per-iteration budget draw.
    pub budget_per_iter_range: [f64; 2],
    /// Must equal the global `rounds_per_iter` (validated, not re-derived).
    pub rounds_per_iter: usize,
    /// Rounds per pacing step.
    pub rounds_per_step: usize,
    /// Max per-step pacing level adjustment.
    pub bid_step: f64,
    /// Step-level (level, spend) history window size.
    pub memory: usize,
    /// Fine-grained postback/outcome history window size.
    pub spb_memory: usize,
    /// Exploration ceiling for the pacing level and per-round offsets.
    pub explore_bid_max: f64,
}

/// Bidder selection, resolved once at setup and never re-dispatched.
#[derive(Debug, Clone, Serialize)]
pub enum BidderSpec {
    Truthful,
    Spb(SpbBidderKwargs),
}

/// One named participant class in the market.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSpec {
    /// Unique agent name (e.g. "Environment", "SPB Bidder").
    pub name: String,
    /// Independent copies, each with its own bidder/allocator state.
    pub num_copies: usize,
    /// Item supply per copy per round.
    pub num_items: usize,
    /// Rounds between a win and its postback delivery (default 0).
    pub postback_delay: usize,
    pub allocator: AllocatorSpec,
    pub bidder: BidderSpec,
}

/// Complete simulation configuration (immutable after load).
#[derive(Debug, Clone, Serialize)]
pub struct SimConfig {
    /// Seeds all randomness. Run `i` uses `random_seed + i`.
    pub random_seed: u64,
    pub num_runs: usize,
    pub num_iter: usize,
    pub rounds_per_iter: usize,
    pub num_participants_per_round: usize,
    /// True item embedding dimensionality.
    pub embedding_size: usize,
    /// Per-coordinate variance of the embedding draw.
    pub embedding_var: f64,
    /// Dimensionality of the noisy observation exposed to bidders.
    pub obs_embedding_size: usize,
    /// Pricing rule applied by the auction mechanism.
    pub allocation: PricingRule,
    pub pairing: PairingPolicy,
    pub postback_attribution: PostbackAttribution,
    pub agents: Vec<AgentSpec>,
    /// Destination for result artifacts (consumed by the CLI harness).
    pub output_dir: String,
}

impl SimConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e.to_string(),
        })?;
        Self::from_json_str(&contents)
    }

    /// Parse and validate a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            source: e.to_string(),
        })?;
        let cfg = raw.resolve()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Total number of agent copies across the roster.
    pub fn total_copies(&self) -> usize {
        self.agents.iter().map(|a| a.num_copies).sum()
    }

    /// Validate the configuration. Errors carry the offending field path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn err(field: &str, message: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::Validation {
                field: field.to_string(),
                message: message.into(),
            })
        }

        if self.num_runs == 0 {
            return err("num_runs", "must be >= 1");
        }
        if self.num_iter == 0 {
            return err("num_iter", "must be >= 1");
        }
        if self.rounds_per_iter == 0 {
            return err("rounds_per_iter", "must be >= 1");
        }
        if self.embedding_size == 0 {
            return err("embedding_size", "must be >= 1");
        }
        if !self.embedding_var.is_finite() || self.embedding_var <= 0.0 {
            return err("embedding_var", "must be a positive finite number");
        }
        if self.obs_embedding_size == 0 {
            return err("obs_embedding_size", "must be >= 1");
        }
        if self.obs_embedding_size > self.embedding_size {
            return err(
                "obs_embedding_size",
                format!(
                    "must be <= embedding_size ({} > {})",
                    self.obs_embedding_size, self.embedding_size
                ),
            );
        }
        if self.agents.is_empty() {
            return err("agents", "at least one agent is required");
        }

        let total = self.total_copies();
        if self.num_participants_per_round == 0 {
            return err("num_participants_per_round", "must be >= 1");
        }
        if self.num_participants_per_round > total {
            return err(
                "num_participants_per_round",
                format!(
                    "exceeds the total number of agent copies ({} > {})",
                    self.num_participants_per_round, total
                ),
            );
        }

        for (i, agent) in self.agents.iter().enumerate() {
            let base = format!("agents[{i}]");
            if agent.name.is_empty() {
                return err(&format!("{base}.name"), "must not be empty");
            }
            if self.agents[..i].iter().any(|a| a.name == agent.name) {
                return err(
                    &format!("{base}.name"),
                    format!("duplicate agent name '{}'", agent.name),
                );
            }
            if agent.num_copies == 0 {
                return err(&format!("{base}.num_copies"), "must be >= 1");
            }

            if let AllocatorSpec::IsotonicPerturbationOracle(k) = &agent.allocator {
                let kbase = format!("{base}.allocator.kwargs");
                if !k.diff_range_min.is_finite() || !k.diff_range_max.is_finite() {
                    return err(&kbase, "diff_range bounds must be finite");
                }
                if k.diff_range_min >= k.diff_range_max {
                    return err(
                        &format!("{kbase}.diff_range_min"),
                        format!(
                            "must be < diff_range_max ({} >= {})",
                            k.diff_range_min, k.diff_range_max
                        ),
                    );
                }
                if !k.diff_step.is_finite() || k.diff_step <= 0.0 {
                    return err(&format!("{kbase}.diff_step"), "must be > 0");
                }
            }

            if let BidderSpec::Spb(k) = &agent.bidder {
                let kbase = format!("{base}.bidder.kwargs");
                let [lo, hi] = k.budget_per_iter_range;
                if !lo.is_finite() || !hi.is_finite() || lo < 0.0 {
                    return err(
                        &format!("{kbase}.budget_per_iter_range"),
                        "bounds must be finite and non-negative",
                    );
                }
                if lo > hi {
                    return err(
                        &format!("{kbase}.budget_per_iter_range"),
                        format!("min must be <= max ({lo} > {hi})"),
                    );
                }
                if k.rounds_per_iter != self.rounds_per_iter {
                    return err(
                        &format!("{kbase}.rounds_per_iter"),
                        format!(
                            "must equal the global rounds_per_iter ({} != {})",
                            k.rounds_per_iter, self.rounds_per_iter
                        ),
                    );
                }
                if k.rounds_per_step == 0 {
                    return err(&format!("{kbase}.rounds_per_step"), "must be >= 1");
                }
                if k.rounds_per_step > self.rounds_per_iter {
                    return err(
                        &format!("{kbase}.rounds_per_step"),
                        format!(
                            "must be <= rounds_per_iter ({} > {})",
                            k.rounds_per_step, self.rounds_per_iter
                        ),
                    );
                }
                if !k.bid_step.is_finite() || k.bid_step <= 0.0 {
                    return err(&format!("{kbase}.bid_step"), "must be > 0");
                }
                if k.memory == 0 {
                    return err(&format!("{kbase}.memory"), "must be >= 1");
                }
                if k.spb_memory == 0 {
                    return err(&format!("{kbase}.spb_memory"), "must be >= 1");
                }
                if !k.explore_bid_max.is_finite() || k.explore_bid_max < 0.0 {
                    return err(&format!("{kbase}.explore_bid_max"), "must be >= 0");
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Raw (untyped) form of the document. Allocator/bidder `kwargs` are resolved
// against the `type` tag here so that unknown types and malformed kwargs
// surface with a precise field path instead of a generic serde error.
// ---------------------------------------------------------------------------

fn default_output_dir() -> String {
    "runs/bidsim".to_string()
}

#[derive(Debug, Deserialize)]
struct RawComponent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    kwargs: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawAgent {
    name: String,
    num_copies: usize,
    num_items: usize,
    #[serde(default)]
    postback_delay: usize,
    allocator: RawComponent,
    bidder: RawComponent,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    random_seed: u64,
    num_runs: usize,
    num_iter: usize,
    rounds_per_iter: usize,
    num_participants_per_round: usize,
    embedding_size: usize,
    embedding_var: f64,
    obs_embedding_size: usize,
    allocation: PricingRule,
    #[serde(default)]
    pairing: PairingPolicy,
    #[serde(default)]
    postback_attribution: PostbackAttribution,
    agents: Vec<RawAgent>,
    #[serde(default = "default_output_dir")]
    output_dir: String,
}

impl RawConfig {
    fn resolve(self) -> Result<SimConfig, ConfigError> {
        let mut agents = Vec::with_capacity(self.agents.len());
        for (i, raw) in self.agents.into_iter().enumerate() {
            let allocator = resolve_allocator(&raw.allocator, i)?;
            let bidder = resolve_bidder(&raw.bidder, i)?;
            agents.push(AgentSpec {
                name: raw.name,
                num_copies: raw.num_copies,
                num_items: raw.num_items,
                postback_delay: raw.postback_delay,
                allocator,
                bidder,
            });
        }
        Ok(SimConfig {
            random_seed: self.random_seed,
            num_runs: self.num_runs,
            num_iter: self.num_iter,
            rounds_per_iter: self.rounds_per_iter,
            num_participants_per_round: self.num_participants_per_round,
            embedding_size: self.embedding_size,
            embedding_var: self.embedding_var,
            obs_embedding_size: self.obs_embedding_size,
            allocation: self.allocation,
            pairing: self.pairing,
            postback_attribution: self.postback_attribution,
            agents,
            output_dir: self.output_dir,
        })
    }
}

fn kwargs_err(field: String, e: serde_json::Error) -> ConfigError {
    ConfigError::Validation {
        field,
        message: e.to_string(),
    }
}

fn resolve_allocator(raw: &RawComponent, agent_idx: usize) -> Result<AllocatorSpec, ConfigError> {
    match raw.kind.as_str() {
        "OracleAllocator" => Ok(AllocatorSpec::Oracle),
        "IsotonicPerturbationOracleAllocator" => {
            let field = format!("agents[{agent_idx}].allocator.kwargs");
            let kwargs: IsotonicAllocatorKwargs =
                serde_json::from_value(raw.kwargs.clone()).map_err(|e| kwargs_err(field, e))?;
            Ok(AllocatorSpec::IsotonicPerturbationOracle(kwargs))
        }
        other => Err(ConfigError::Validation {
            field: format!("agents[{agent_idx}].allocator.type"),
            message: format!("unknown allocator type '{other}'"),
        }),
    }
}

fn resolve_bidder(raw: &RawComponent, agent_idx: usize) -> Result<BidderSpec, ConfigError> {
    match raw.kind.as_str() {
        "TruthfulBidder" => Ok(BidderSpec::Truthful),
        "SPBBidder" => {
            let field = format!("agents[{agent_idx}].bidder.kwargs");
            let kwargs: SpbBidderKwargs =
                serde_json::from_value(raw.kwargs.clone()).map_err(|e| kwargs_err(field, e))?;
            Ok(BidderSpec::Spb(kwargs))
        }
        other => Err(ConfigError::Validation {
            field: format!("agents[{agent_idx}].bidder.type"),
            message: format!("unknown bidder type '{other}'"),
        }),
    }
}

/// Errors surfaced once at startup; the simulation never starts on any of
/// these.
#[derive(Debug, Clone)]
pub enum ConfigError {
    Io { path: String, source: String },
    Parse { source: String },
    Validation { field: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Failed to read config file '{}': {}", path, source)
            }
            ConfigError::Parse { source } => {
                write!(f, "Failed to parse config JSON: {}", source)
            }
            ConfigError::Validation { field, message } => {
                write!(f, "Config validation error in '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "random_seed": 42,
            "num_runs": 2,
            "num_iter": 3,
            "rounds_per_iter": 100,
            "num_participants_per_round": 2,
            "embedding_size": 16,
            "embedding_var": 1.0,
            "obs_embedding_size": 8,
            "allocation": "SecondPrice",
            "output_dir": "runs/test",
            "agents": [
                {
                    "name": "Environment",
                    "num_copies": 1,
                    "num_items": 4,
                    "allocator": {"type": "OracleAllocator", "kwargs": {}},
                    "bidder": {"type": "TruthfulBidder", "kwargs": {}}
                },
                {
                    "name": "SPB Bidder",
                    "num_copies": 2,
                    "num_items": 4,
                    "postback_delay": 5,
                    "allocator": {
                        "type": "IsotonicPerturbationOracleAllocator",
                        "kwargs": {
                            "diff_range_min": -0.5,
                            "diff_range_max": 0.5,
                            "diff_step": 0.1
                        }
                    },
                    "bidder": {
                        "type": "SPBBidder",
                        "kwargs": {
                            "budget_per_iter_range": [50.0, 150.0],
                            "rounds_per_iter": 100,
                            "rounds_per_step": 10,
                            "bid_step": 0.05,
                            "memory": 8,
                            "spb_memory": 16,
                            "explore_bid_max": 2.0
                        }
                    }
                }
            ]
        }"#
    }

    #[test]
    fn parse_full_config() {
        let cfg = SimConfig::from_json_str(sample_json()).expect("should parse");
        assert_eq!(cfg.random_seed, 42);
        assert_eq!(cfg.num_runs, 2);
        assert_eq!(cfg.allocation, PricingRule::SecondPrice);
        assert_eq!(cfg.pairing, PairingPolicy::RoundRobin);
        assert_eq!(cfg.total_copies(), 3);
        assert_eq!(cfg.agents[0].name, "Environment");
        assert!(matches!(cfg.agents[0].allocator, AllocatorSpec::Oracle));
        assert!(matches!(cfg.agents[0].bidder, BidderSpec::Truthful));
        match &cfg.agents[1].bidder {
            BidderSpec::Spb(k) => {
                assert_eq!(k.budget_per_iter_range, [50.0, 150.0]);
                assert_eq!(k.rounds_per_step, 10);
            }
            other => panic!("expected SPB bidder, got {other:?}"),
        }
        assert_eq!(cfg.agents[1].postback_delay, 5);
    }

    fn with_replacement(from: &str, to: &str) -> Result<SimConfig, ConfigError> {
        SimConfig::from_json_str(&sample_json().replace(from, to))
    }

    #[test]
    fn unknown_bidder_type_has_field_path() {
        let err = with_replacement("SPBBidder", "MysteryBidder").unwrap_err();
        match err {
            ConfigError::Validation { field, message } => {
                assert_eq!(field, "agents[1].bidder.type");
                assert!(message.contains("MysteryBidder"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn missing_spb_kwargs_rejected() {
        let err = with_replacement(r#""bid_step": 0.05,"#, "").unwrap_err();
        match err {
            ConfigError::Validation { field, .. } => {
                assert_eq!(field, "agents[1].bidder.kwargs");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn inverted_diff_range_rejected() {
        let err = with_replacement(r#""diff_range_max": 0.5"#, r#""diff_range_max": -0.6"#)
            .unwrap_err();
        match err {
            ConfigError::Validation { field, .. } => {
                assert_eq!(field, "agents[1].allocator.kwargs.diff_range_min");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn non_positive_bid_step_rejected() {
        let err = with_replacement(r#""bid_step": 0.05"#, r#""bid_step": 0.0"#).unwrap_err();
        match err {
            ConfigError::Validation { field, .. } => {
                assert_eq!(field, "agents[1].bidder.kwargs.bid_step");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn rounds_per_iter_mismatch_rejected() {
        let err = with_replacement(r#""rounds_per_iter": 100,
                            "rounds_per_step""#, r#""rounds_per_iter": 99,
                            "rounds_per_step""#)
        .unwrap_err();
        match err {
            ConfigError::Validation { field, .. } => {
                assert_eq!(field, "agents[1].bidder.kwargs.rounds_per_iter");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn participants_exceeding_roster_rejected() {
        let err = with_replacement(
            r#""num_participants_per_round": 2"#,
            r#""num_participants_per_round": 9"#,
        )
        .unwrap_err();
        match err {
            ConfigError::Validation { field, .. } => {
                assert_eq!(field, "num_participants_per_round");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn obs_dim_above_embedding_dim_rejected() {
        let err = with_replacement(r#""obs_embedding_size": 8"#, r#""obs_embedding_size": 32"#)
            .unwrap_err();
        match err {
            ConfigError::Validation { field, .. } => {
                assert_eq!(field, "obs_embedding_size");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
