// tests/postback_tests.rs
//
// Postback delivery contract: a postback originating at round r is
// delivered at round r + postback_delay, exactly once, never earlier.
// Wins whose delivery round falls past the end of the run are never
// delivered (the queue dies with the run).

use std::collections::HashMap;

use bidsim::config::SimConfig;
use bidsim::engine::Simulation;
use bidsim::logging::MemorySink;

fn config_with_delay(delay: usize) -> SimConfig {
    let json = format!(
        r#"{{
            "random_seed": 21,
            "num_runs": 1,
            "num_iter": 2,
            "rounds_per_iter": 25,
            "num_participants_per_round": 2,
            "embedding_size": 8,
            "embedding_var": 1.0,
            "obs_embedding_size": 4,
            "allocation": "SecondPrice",
            "agents": [
                {{
                    "name": "Environment",
                    "num_copies": 1,
                    "num_items": 2,
                    "allocator": {{"type": "OracleAllocator", "kwargs": {{}}}},
                    "bidder": {{"type": "TruthfulBidder", "kwargs": {{}}}}
                }},
                {{
                    "name": "SPB Bidder",
                    "num_copies": 1,
                    "num_items": 2,
                    "postback_delay": {delay},
                    "allocator": {{"type": "OracleAllocator", "kwargs": {{}}}},
                    "bidder": {{
                        "type": "SPBBidder",
                        "kwargs": {{
                            "budget_per_iter_range": [50.0, 50.0],
                            "rounds_per_iter": 25,
                            "rounds_per_step": 5,
                            "bid_step": 0.05,
                            "memory": 6,
                            "spb_memory": 8,
                            "explore_bid_max": 3.0
                        }}
                    }}
                }}
            ]
        }}"#
    );
    SimConfig::from_json_str(&json).expect("postback config should parse")
}

/// Global round of a win, reconstructed from a round record.
fn global_round(iteration: usize, round: usize, rounds_per_iter: usize) -> usize {
    iteration * rounds_per_iter + round
}

#[test]
fn postbacks_arrive_exactly_delay_rounds_after_the_win() {
    let delay = 3;
    let cfg = config_with_delay(delay);
    let mut sink = MemorySink::new();
    Simulation::new(&cfg).run_one(0, &mut sink);

    let spb_postbacks: Vec<_> = sink
        .postbacks
        .iter()
        .filter(|p| &*p.agent == "SPB Bidder")
        .collect();
    assert!(!spb_postbacks.is_empty(), "expected some SPB wins");

    for p in &spb_postbacks {
        assert_eq!(
            p.delivery_round,
            p.origin_round + delay,
            "postback delivered off-schedule"
        );
    }
}

#[test]
fn each_win_triggers_exactly_one_postback() {
    let delay = 3;
    let cfg = config_with_delay(delay);
    let total_rounds = cfg.num_iter * cfg.rounds_per_iter;
    let mut sink = MemorySink::new();
    Simulation::new(&cfg).run_one(0, &mut sink);

    let won_rounds: Vec<usize> = sink
        .rounds
        .iter()
        .filter(|r| &*r.agent == "SPB Bidder" && r.won)
        .map(|r| global_round(r.iteration, r.round, cfg.rounds_per_iter))
        .collect();

    let mut delivered: HashMap<usize, usize> = HashMap::new();
    for p in sink.postbacks.iter().filter(|p| &*p.agent == "SPB Bidder") {
        *delivered.entry(p.origin_round).or_insert(0) += 1;
    }

    for &origin in &won_rounds {
        let expected = if origin + delay < total_rounds { 1 } else { 0 };
        assert_eq!(
            delivered.get(&origin).copied().unwrap_or(0),
            expected,
            "win at round {origin} delivered wrong number of postbacks"
        );
    }

    // No postback without a matching win.
    for origin in delivered.keys() {
        assert!(
            won_rounds.contains(origin),
            "postback for round {origin} without a win"
        );
    }
}

#[test]
fn zero_delay_delivers_in_the_origin_round() {
    let cfg = config_with_delay(0);
    let mut sink = MemorySink::new();
    Simulation::new(&cfg).run_one(0, &mut sink);

    let spb_postbacks: Vec<_> = sink
        .postbacks
        .iter()
        .filter(|p| &*p.agent == "SPB Bidder")
        .collect();
    assert!(!spb_postbacks.is_empty());
    for p in &spb_postbacks {
        assert_eq!(p.delivery_round, p.origin_round);
    }
}

#[test]
fn postback_value_matches_the_won_item() {
    let delay = 2;
    let cfg = config_with_delay(delay);
    let mut sink = MemorySink::new();
    Simulation::new(&cfg).run_one(0, &mut sink);

    let wins: HashMap<usize, (f64, f64)> = sink
        .rounds
        .iter()
        .filter(|r| &*r.agent == "SPB Bidder" && r.won)
        .map(|r| {
            (
                global_round(r.iteration, r.round, cfg.rounds_per_iter),
                (r.price, r.true_value),
            )
        })
        .collect();

    for p in sink.postbacks.iter().filter(|p| &*p.agent == "SPB Bidder") {
        let (price, value) = wins
            .get(&p.origin_round)
            .copied()
            .expect("postback without origin win");
        assert_eq!(p.price, price);
        assert_eq!(p.value, value);
    }
}
