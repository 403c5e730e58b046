// src/main.rs
//
// CLI entrypoint for bidsim.
//
// - Loads and validates the JSON configuration (fatal on any config error,
//   with the offending field path).
// - Optional CLI overrides for seed / runs / output dir.
// - Deterministic multi-run execution; --threads N parallelises over runs
//   with output bit-identical to --threads 1.
// - Writes summary.json (and optionally records.jsonl) under output_dir.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Serialize;

use bidsim::config::SimConfig;
use bidsim::engine::{run_all_collected, RunSummary};
use bidsim::logging::FileSink;
use bidsim::metrics::{p05_p50_p95, OnlineStats};

#[derive(Debug, Parser)]
#[command(
    name = "bidsim",
    about = "Deterministic multi-agent auction simulator for budget-paced bidding research",
    version
)]
struct Args {
    /// Path to the JSON configuration document.
    #[arg(long)]
    config: PathBuf,

    /// Override the config's random_seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Override the config's num_runs.
    #[arg(long)]
    runs: Option<usize>,

    /// Override the config's output_dir.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Worker threads for parallel runs (output is identical to 1).
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Also write every per-round/per-step record to records.jsonl.
    #[arg(long)]
    records: bool,

    /// Suppress per-run lines; only print the final summary.
    #[arg(long)]
    quiet: bool,
}

/// Aggregate statistics for one agent across runs.
#[derive(Debug, Clone, Serialize)]
struct AgentAggregate {
    name: String,
    win_rate_mean: f64,
    spend_mean: f64,
    spend_std: f64,
    spend_p05: f64,
    spend_p50: f64,
    spend_p95: f64,
    value_mean: f64,
    value_std: f64,
    mean_bid: f64,
    final_bid_level_mean: Option<f64>,
}

/// Versioned summary artifact written to <output_dir>/summary.json.
#[derive(Debug, Clone, Serialize)]
struct Summary {
    schema_version: u32,
    bidsim_version: String,
    config: SimConfig,
    runs: Vec<RunSummary>,
    aggregate: Vec<AgentAggregate>,
}

/// Write a file atomically (temp file + rename).
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let temp_name = format!(
        ".tmp_{}_{}",
        std::process::id(),
        path.file_name()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default()
    );
    let temp_path = parent.join(&temp_name);

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn aggregate_agents(cfg: &SimConfig, runs: &[RunSummary]) -> Vec<AgentAggregate> {
    cfg.agents
        .iter()
        .enumerate()
        .map(|(ai, spec)| {
            let mut win_rate = OnlineStats::default();
            let mut spend = OnlineStats::default();
            let mut value = OnlineStats::default();
            let mut bid = OnlineStats::default();
            let mut level = OnlineStats::default();
            let mut spend_samples = Vec::with_capacity(runs.len());

            for run in runs {
                let a = &run.agents[ai];
                if a.rounds_participated > 0 {
                    win_rate.add(a.wins as f64 / a.rounds_participated as f64);
                }
                spend.add(a.total_spend);
                spend_samples.push(a.total_spend);
                value.add(a.total_value);
                bid.add(a.mean_bid);
                if let Some(l) = a.final_bid_level {
                    level.add(l);
                }
            }

            let (p05, p50, p95) = p05_p50_p95(spend_samples);
            AgentAggregate {
                name: spec.name.clone(),
                win_rate_mean: win_rate.mean(),
                spend_mean: spend.mean(),
                spend_std: spend.stddev_population(),
                spend_p05: p05,
                spend_p50: p50,
                spend_p95: p95,
                value_mean: value.mean(),
                value_std: value.stddev_population(),
                mean_bid: bid.mean(),
                final_bid_level_mean: if level.n() > 0 { Some(level.mean()) } else { None },
            }
        })
        .collect()
}

fn main() {
    let args = Args::parse();

    if args.threads == 0 {
        eprintln!("--threads must be >= 1");
        std::process::exit(2);
    }

    let mut cfg = match SimConfig::from_json_file(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    // CLI overrides, re-validated afterwards.
    if let Some(seed) = args.seed {
        cfg.random_seed = seed;
    }
    if let Some(runs) = args.runs {
        cfg.num_runs = runs;
    }
    if let Some(dir) = &args.output_dir {
        cfg.output_dir = dir.display().to_string();
    }
    if let Err(e) = cfg.validate() {
        eprintln!("{e}");
        std::process::exit(2);
    }

    let output_dir = PathBuf::from(&cfg.output_dir);
    if let Err(e) = fs::create_dir_all(&output_dir) {
        eprintln!("Failed to create output directory {:?}: {e}", output_dir);
        std::process::exit(2);
    }

    println!(
        "bidsim v{} | runs={} iters={} rounds={} seed={} allocation={:?} threads={} output_dir={}",
        env!("CARGO_PKG_VERSION"),
        cfg.num_runs,
        cfg.num_iter,
        cfg.rounds_per_iter,
        cfg.random_seed,
        cfg.allocation,
        args.threads,
        output_dir.display()
    );

    let outputs = run_all_collected(&cfg, args.threads);

    if !args.quiet {
        for out in &outputs {
            let line: Vec<String> = out
                .summary
                .agents
                .iter()
                .map(|a| {
                    format!(
                        "{}: wins={} spend={:.2} value={:.2}",
                        a.name, a.wins, a.total_spend, a.total_value
                    )
                })
                .collect();
            println!(
                "run {}/{} seed={} | {}",
                out.summary.run_index + 1,
                cfg.num_runs,
                out.summary.seed,
                line.join(" | ")
            );
        }
    }

    if args.records {
        let records_path = output_dir.join("records.jsonl");
        match FileSink::create(&records_path) {
            Ok(mut sink) => {
                for out in &outputs {
                    sink.write_memory(&out.records);
                }
                sink.flush();
            }
            Err(e) => {
                eprintln!("Failed to create {:?}: {e}", records_path);
                std::process::exit(2);
            }
        }
    }

    let runs: Vec<RunSummary> = outputs.into_iter().map(|o| o.summary).collect();
    let aggregate = aggregate_agents(&cfg, &runs);

    println!("==== SUMMARY ====");
    for a in &aggregate {
        println!(
            "{}: win_rate={:.3} spend={:.2}±{:.2} value={:.2} mean_bid={:.4}{}",
            a.name,
            a.win_rate_mean,
            a.spend_mean,
            a.spend_std,
            a.value_mean,
            a.mean_bid,
            a.final_bid_level_mean
                .map(|l| format!(" level={l:.4}"))
                .unwrap_or_default()
        );
    }

    let summary = Summary {
        schema_version: 1,
        bidsim_version: env!("CARGO_PKG_VERSION").to_string(),
        config: cfg,
        runs,
        aggregate,
    };

    let summary_path = output_dir.join("summary.json");
    match serde_json::to_vec_pretty(&summary) {
        Ok(bytes) => {
            if let Err(e) = atomic_write(&summary_path, &bytes) {
                eprintln!("Failed to write {:?}: {e}", summary_path);
                std::process::exit(2);
            }
        }
        Err(e) => {
            eprintln!("Failed to serialize summary: {e}");
            std::process::exit(2);
        }
    }

    println!("wrote {}", summary_path.display());
}
