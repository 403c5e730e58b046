//! bidsim core library.
//!
//! This crate exposes a deterministic multi-agent auction simulator for
//! budget-paced bidding research. The binary (`src/main.rs`) is just a
//! thin harness around these components.
//!
//! # Architecture
//!
//! The codebase follows a clean separation between the simulation core and
//! I/O:
//!
//! - **Config** (`config`): The JSON configuration document, validated once
//!   at startup. A config fully defines a reproducible simulation.
//!
//! - **Embedding Generator** (`embedding`): Run-scoped latent item
//!   embeddings, fixed random projection to observation space, and the
//!   value signal derived from both.
//!
//! - **Allocators** (`allocator`): Perfect-information item selection and
//!   ground-truth allocation; the isotonic-perturbation variant adds a
//!   read-only counterfactual sweep for win-probability calibration.
//!
//! - **Bidders** (`bidder`): Truthful (environment-side) and budget-paced
//!   (SPB) bidding, including pacing, bounded history windows, exploration,
//!   and the spend->value model.
//!
//! - **Auction Mechanism** (`auction`): Stateless first/second-price
//!   clearing with a deterministic tie-break.
//!
//! - **Simulation Driver** (`engine`): The runs -> iterations -> rounds
//!   loop, per-run seeding, the postback queue, and step scheduling. Runs
//!   are the unit of parallelism; threaded execution is bit-identical to
//!   sequential.
//!
//! - **Record Sinks** (`logging`): The engine emits per-round, per-step,
//!   calibration, and postback records; writing and aggregating them is
//!   the sink's concern.

pub mod allocator;
pub mod auction;
pub mod bidder;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod types;
pub mod window;

// --- Re-exports for ergonomic external use ---------------------------------

pub use config::{
    AgentSpec, AllocatorSpec, BidderSpec, ConfigError, IsotonicAllocatorKwargs, PairingPolicy,
    PostbackAttribution, SimConfig, SpbBidderKwargs,
};

pub use engine::{run_all_collected, AgentRunStats, RunOutput, RunSummary, Simulation};

pub use allocator::{Allocator, IsotonicPerturbation};
pub use auction::{clear, winner_of, wins_with_bid, ClearingResult};
pub use bidder::{BidDecision, Bidder, SpbBidder, StepSummary, TruthfulBidder};
pub use embedding::EmbeddingGenerator;
pub use logging::{FileSink, MemorySink, NoopSink, RecordSink};
pub use metrics::OnlineStats;
pub use types::{
    CalibrationRecord, CurvePoint, Postback, PostbackRecord, PricingRule, RoundRecord, StepRecord,
};
pub use window::BoundedWindow;
