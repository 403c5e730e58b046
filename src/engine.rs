// src/engine.rs
//
// bidsim simulation driver:
//
//  - owns the nested loop over runs -> iterations -> rounds,
//  - reseeds each run from `random_seed + run_index` so runs are
//    independent but individually reproducible,
//  - invokes the embedding generator, bidders, allocators, and the auction
//    mechanism in a strict per-round order,
//  - schedules and delivers delayed postbacks through a round-keyed queue,
//  - triggers each budget-paced bidder's step update on its own cadence.
//
// Per-round order (part of the determinism contract; reordering changes
// the random stream and therefore results):
//
//   1. select participants (pairing policy)
//   2. per participant, in roster order: draw item embeddings, select the
//      item, project its observation, bid
//   3. clear via the auction mechanism
//   4. charge the winner, schedule its postback
//   5. record outcomes + calibration sweeps
//   6. deliver postbacks due this round
//   7. step updates for bidders at a step boundary

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::allocator::Allocator;
use crate::auction;
use crate::bidder::Bidder;
use crate::config::{PairingPolicy, PostbackAttribution, SimConfig};
use crate::embedding::EmbeddingGenerator;
use crate::logging::{MemorySink, RecordSink};
use crate::metrics::OnlineStats;
use crate::types::{GlobalRound, Postback, PostbackRecord, RoundRecord, StepRecord};

/// One agent copy: exclusive owner of its bidder/allocator state.
struct AgentCopy {
    agent_index: usize,
    copy_index: usize,
    name: Arc<str>,
    num_items: usize,
    postback_delay: usize,
    allocator: Allocator,
    bidder: Bidder,
}

/// Per-agent aggregates for one run.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRunStats {
    pub name: Arc<str>,
    pub rounds_participated: u64,
    pub wins: u64,
    pub total_spend: f64,
    /// Ground-truth value of items won (realized at win time).
    pub total_value: f64,
    pub mean_bid: f64,
    /// Mean final pacing level across the agent's budget-paced copies.
    pub final_bid_level: Option<f64>,
}

/// Summary of one independent run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_index: usize,
    pub seed: u64,
    pub agents: Vec<AgentRunStats>,
}

/// One run's summary plus its buffered records (threaded execution).
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub summary: RunSummary,
    pub records: MemorySink,
}

/// The simulation driver. Stateless between calls; all mutable state is
/// run-scoped and constructed inside `run_one`.
pub struct Simulation<'a> {
    cfg: &'a SimConfig,
}

impl<'a> Simulation<'a> {
    pub fn new(cfg: &'a SimConfig) -> Self {
        Self { cfg }
    }

    /// Execute every run sequentially, streaming records into `sink`.
    pub fn run_all(&self, sink: &mut dyn RecordSink) -> Vec<RunSummary> {
        let mut summaries = Vec::with_capacity(self.cfg.num_runs);
        for run in 0..self.cfg.num_runs {
            summaries.push(self.run_one(run, &mut *sink));
        }
        summaries
    }

    /// Execute a single run. Bit-for-bit reproducible given the config and
    /// run index, independent of any other run.
    pub fn run_one(&self, run_index: usize, sink: &mut dyn RecordSink) -> RunSummary {
        let cfg = self.cfg;
        let seed = cfg.random_seed.wrapping_add(run_index as u64);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        // Run-scoped projection + value direction, then the roster.
        let gen = EmbeddingGenerator::new(cfg, &mut rng);
        let mut copies = build_roster(cfg);

        // Delayed postbacks, keyed by delivery round.
        let mut pending: BTreeMap<GlobalRound, Vec<(usize, Postback)>> = BTreeMap::new();
        let mut pairing_cursor = 0usize;

        let mut accum: Vec<AgentAccum> = cfg
            .agents
            .iter()
            .map(|_| AgentAccum::default())
            .collect();

        for iteration in 0..cfg.num_iter {
            // Fresh budgets for budget-paced bidders, in roster order.
            for copy in copies.iter_mut() {
                copy.bidder.begin_iteration(&mut rng);
            }

            for round in 0..cfg.rounds_per_iter {
                let global_round = iteration * cfg.rounds_per_iter + round;

                // 1) Participants, ascending roster order (the tie-break
                //    order of the auction mechanism).
                let participants = select_participants(
                    cfg.pairing,
                    copies.len(),
                    cfg.num_participants_per_round,
                    &mut pairing_cursor,
                    &mut rng,
                );

                // 2) Embeddings, observations, bids.
                let n = participants.len();
                let mut items: Vec<Option<usize>> = Vec::with_capacity(n);
                let mut true_values: Vec<f64> = Vec::with_capacity(n);
                let mut est_values: Vec<f64> = Vec::with_capacity(n);
                let mut bids: Vec<f64> = Vec::with_capacity(n);
                let mut offsets: Vec<f64> = Vec::with_capacity(n);
                let mut ceilings: Vec<Option<f64>> = Vec::with_capacity(n);

                for &ci in &participants {
                    let copy = &mut copies[ci];

                    let mut selected = None;
                    let mut true_value = 0.0;
                    let mut est_value = 0.0;
                    if copy.num_items > 0 {
                        let mut item_values = Vec::with_capacity(copy.num_items);
                        let mut embeddings = Vec::with_capacity(copy.num_items);
                        for _ in 0..copy.num_items {
                            let e = gen.draw_item_embedding(&mut rng);
                            item_values.push(gen.true_value(&e));
                            embeddings.push(e);
                        }
                        if let Some(sel) = copy.allocator.select_item(&item_values) {
                            let obs = gen.project_observation(&embeddings[sel], &mut rng);
                            est_value = gen.estimated_value(&obs);
                            true_value = item_values[sel];
                            selected = Some(sel);
                        }
                    }

                    ceilings.push(copy.bidder.as_spb().map(|s| s.remaining_budget()));
                    let decision = copy.bidder.bid(true_value, est_value, &mut rng);

                    items.push(selected);
                    true_values.push(true_value);
                    est_values.push(est_value);
                    bids.push(decision.amount);
                    offsets.push(decision.explore_offset);
                }

                // 3) Clear the round.
                let Some(clearing) = auction::clear(cfg.allocation, &bids) else {
                    continue;
                };

                // Ground-truth maximizing allocation over true values, via
                // the (perfect-information) allocator of the lowest-indexed
                // participant. Environment-side evaluation signal only.
                let oracle_winner = copies[participants[0]]
                    .allocator
                    .allocate(cfg.allocation, &true_values)
                    .map(|r| r.winner);

                // 4) Charge the winner and schedule its postback.
                let winner_ci = participants[clearing.winner];
                copies[winner_ci].bidder.charge(clearing.price);
                let delivery = global_round + copies[winner_ci].postback_delay;
                pending.entry(delivery).or_default().push((
                    winner_ci,
                    Postback {
                        origin_round: global_round,
                        price: clearing.price,
                        value: true_values[clearing.winner],
                    },
                ));

                // 5) Outcomes, records, calibration sweeps.
                for (k, &ci) in participants.iter().enumerate() {
                    let won = k == clearing.winner;
                    let price = if won { clearing.price } else { 0.0 };
                    let copy = &mut copies[ci];
                    copy.bidder.record_round(won);

                    let agg = &mut accum[copy.agent_index];
                    agg.rounds += 1;
                    agg.bids.add(bids[k]);
                    if won {
                        agg.wins += 1;
                        agg.spend += price;
                        agg.value += true_values[k];
                    }

                    sink.log_round(&RoundRecord {
                        run: run_index,
                        iteration,
                        round,
                        agent: Arc::clone(&copy.name),
                        copy: copy.copy_index,
                        item: items[k],
                        bid: bids[k],
                        explore_offset: offsets[k],
                        won,
                        price,
                        true_value: true_values[k],
                        estimated_value: est_values[k],
                        oracle_won: oracle_winner == Some(k),
                    });
                }

                for (k, &ci) in participants.iter().enumerate() {
                    let copy = &copies[ci];
                    if let Some(perturbation) = copy.allocator.perturbation() {
                        let points = perturbation.sweep(&bids, k, ceilings[k]);
                        sink.log_calibration(&crate::types::CalibrationRecord {
                            run: run_index,
                            iteration,
                            round,
                            agent: Arc::clone(&copy.name),
                            copy: copy.copy_index,
                            bid: bids[k],
                            points,
                        });
                    }
                }

                // 6) Deliver postbacks whose delay has elapsed.
                deliver_due_postbacks(
                    cfg,
                    run_index,
                    iteration,
                    round,
                    global_round,
                    &mut pending,
                    &mut copies,
                    sink,
                );

                // 7) Step updates at each bidder's own cadence.
                for copy in copies.iter_mut() {
                    let name = Arc::clone(&copy.name);
                    let copy_index = copy.copy_index;
                    if let Some(spb) = copy.bidder.as_spb_mut() {
                        let rps = spb.rounds_per_step();
                        if (round + 1) % rps == 0 {
                            let rounds_remaining = cfg.rounds_per_iter - (round + 1);
                            let summary = spb.step_update(rounds_remaining);
                            sink.log_step(&StepRecord {
                                run: run_index,
                                iteration,
                                step: (round + 1) / rps - 1,
                                agent: name,
                                copy: copy_index,
                                bid_level: summary.bid_level,
                                spend_rate: summary.spend_rate,
                                win_rate: summary.win_rate,
                                value_rate: summary.value_rate,
                                target_step_spend: summary.target_step_spend,
                                budget: summary.budget,
                                budget_remaining: summary.budget_remaining,
                            });
                        }
                    }
                }
            }

            for copy in copies.iter_mut() {
                copy.bidder.end_iteration();
            }
        }

        let agents = cfg
            .agents
            .iter()
            .enumerate()
            .map(|(ai, spec)| {
                let agg = &accum[ai];
                let levels: Vec<f64> = copies
                    .iter()
                    .filter(|c| c.agent_index == ai)
                    .filter_map(|c| c.bidder.as_spb().map(|s| s.level()))
                    .collect();
                let final_bid_level = if levels.is_empty() {
                    None
                } else {
                    Some(levels.iter().sum::<f64>() / levels.len() as f64)
                };
                AgentRunStats {
                    name: Arc::from(spec.name.as_str()),
                    rounds_participated: agg.rounds,
                    wins: agg.wins,
                    total_spend: agg.spend,
                    total_value: agg.value,
                    mean_bid: agg.bids.mean(),
                    final_bid_level,
                }
            })
            .collect();

        RunSummary {
            run_index,
            seed,
            agents,
        }
    }
}

#[derive(Default)]
struct AgentAccum {
    rounds: u64,
    wins: u64,
    spend: f64,
    value: f64,
    bids: OnlineStats,
}

fn build_roster(cfg: &SimConfig) -> Vec<AgentCopy> {
    let mut copies = Vec::with_capacity(cfg.total_copies());
    for (agent_index, spec) in cfg.agents.iter().enumerate() {
        let name: Arc<str> = Arc::from(spec.name.as_str());
        for copy_index in 0..spec.num_copies {
            copies.push(AgentCopy {
                agent_index,
                copy_index,
                name: Arc::clone(&name),
                num_items: spec.num_items,
                postback_delay: spec.postback_delay,
                allocator: Allocator::from_spec(&spec.allocator),
                bidder: Bidder::from_spec(&spec.bidder),
            });
        }
    }
    copies
}

/// Choose the round's participants as roster indices, ascending.
fn select_participants(
    pairing: PairingPolicy,
    total: usize,
    count: usize,
    cursor: &mut usize,
    rng: &mut ChaCha8Rng,
) -> Vec<usize> {
    let mut selected = match pairing {
        PairingPolicy::RoundRobin => {
            let v: Vec<usize> = (0..count).map(|k| (*cursor + k) % total).collect();
            *cursor = (*cursor + count) % total;
            v
        }
        PairingPolicy::Random => rand::seq::index::sample(rng, total, count).into_vec(),
    };
    selected.sort_unstable();
    selected
}

#[allow(clippy::too_many_arguments)]
fn deliver_due_postbacks(
    cfg: &SimConfig,
    run_index: usize,
    iteration: usize,
    round: usize,
    global_round: GlobalRound,
    pending: &mut BTreeMap<GlobalRound, Vec<(usize, Postback)>>,
    copies: &mut [AgentCopy],
    sink: &mut dyn RecordSink,
) {
    loop {
        let Some((&key, _)) = pending.iter().next() else {
            break;
        };
        if key > global_round {
            break;
        }
        let Some(entries) = pending.remove(&key) else {
            break;
        };
        for (ci, postback) in entries {
            let copy = &mut copies[ci];
            let count_in_step = match cfg.postback_attribution {
                PostbackAttribution::ArrivalStep => true,
                PostbackAttribution::OriginStep => {
                    // Count only when the origin round falls inside the
                    // still-open step; otherwise the signal skips step
                    // aggregation and lands in the iteration totals only.
                    let origin_iter = postback.origin_round / cfg.rounds_per_iter;
                    let origin_round_in_iter = postback.origin_round % cfg.rounds_per_iter;
                    match copy.bidder.as_spb() {
                        Some(spb) => {
                            let rps = spb.rounds_per_step();
                            origin_iter == iteration && origin_round_in_iter / rps == round / rps
                        }
                        None => true,
                    }
                }
            };
            copy.bidder.on_postback(&postback, count_in_step);
            sink.log_postback(&PostbackRecord {
                run: run_index,
                agent: Arc::clone(&copy.name),
                copy: copy.copy_index,
                origin_round: postback.origin_round,
                delivery_round: global_round,
                price: postback.price,
                value: postback.value,
            });
        }
    }
}

/// Execute all runs, optionally across worker threads. Runs are the unit
/// of parallelism: each worker owns disjoint run indices and a private
/// sink, and results are merged in run order, so the output is identical
/// to sequential execution for any thread count.
pub fn run_all_collected(cfg: &SimConfig, threads: usize) -> Vec<RunOutput> {
    let num_runs = cfg.num_runs;
    let threads = threads.max(1).min(num_runs.max(1));

    if threads <= 1 {
        return (0..num_runs)
            .map(|run| {
                let mut sink = MemorySink::new();
                let summary = Simulation::new(cfg).run_one(run, &mut sink);
                RunOutput {
                    summary,
                    records: sink,
                }
            })
            .collect();
    }

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                scope.spawn(move || {
                    let mut part = Vec::new();
                    let mut run = t;
                    while run < num_runs {
                        let mut sink = MemorySink::new();
                        let summary = Simulation::new(cfg).run_one(run, &mut sink);
                        part.push((
                            run,
                            RunOutput {
                                summary,
                                records: sink,
                            },
                        ));
                        run += threads;
                    }
                    part
                })
            })
            .collect();

        let mut slots: Vec<Option<RunOutput>> = (0..num_runs).map(|_| None).collect();
        for handle in handles {
            match handle.join() {
                Ok(part) => {
                    for (run, output) in part {
                        slots[run] = Some(output);
                    }
                }
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
        slots.into_iter().flatten().collect()
    })
}
