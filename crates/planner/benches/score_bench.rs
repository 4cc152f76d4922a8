//! Benchmarks for allocation scoring.
//! Run with: cargo bench -p mmm-planner

use chrono::{Duration, NaiveDate};
use mmm_core::types::{ChannelRow, TrainingRow, TrainingSet};
use mmm_model::RidgeRegression;
use mmm_planner::{even_split, AllocationScorer};

const CHANNELS: usize = 24;
const WEEKS: usize = 156;

fn synthetic_training_set() -> TrainingSet {
    let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
    let channels = (0..CHANNELS)
        .map(|i| ChannelRow {
            channel_id: i as u32 + 1,
            channel_name: format!("channel-{:02}", i),
        })
        .collect();
    let rows = (0..WEEKS)
        .map(|w| {
            let spend: Vec<f64> = (0..CHANNELS)
                .map(|c| ((w * 31 + c * 17) % 97) as f64 * 10.0)
                .collect();
            let revenue = 5_000.0
                + spend
                    .iter()
                    .enumerate()
                    .map(|(c, s)| s * (1.0 + c as f64 * 0.1))
                    .sum::<f64>();
            TrainingRow {
                date_key: start + Duration::weeks(w as i64),
                spend,
                revenue,
            }
        })
        .collect();
    TrainingSet { channels, rows }
}

fn main() {
    let set = synthetic_training_set();

    let fit_start = std::time::Instant::now();
    let model = RidgeRegression::new(1.0)
        .and_then(|r| r.fit(&set))
        .expect("Failed to fit benchmark model");
    let fit_elapsed = fit_start.elapsed();

    let scorer = AllocationScorer::new(&model);
    let request = even_split(&model, 120_000.0);

    // Warmup
    for _ in 0..100 {
        scorer.score(&request).unwrap();
    }

    // Benchmark
    let iterations = 100_000;
    let start = std::time::Instant::now();

    for _ in 0..iterations {
        let _ = scorer.score(&request).unwrap();
    }

    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations;

    println!("=== Allocation Scoring Benchmark ===");
    println!("Fit time:    {:?} ({} weeks x {} channels)", fit_elapsed, WEEKS, CHANNELS);
    println!("Iterations:  {}", iterations);
    println!("Total time:  {:?}", elapsed);
    println!("Per call:    {:?}", per_iter);
    println!("Throughput:  {:.0} scores/sec", iterations as f64 / elapsed.as_secs_f64());
}
