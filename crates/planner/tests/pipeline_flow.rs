//! End-to-end flow: raw CSV files → star schema tables → training set →
//! cached model → allocation scoring.

use chrono::NaiveDate;
use mmm_core::config::AppConfig;
use mmm_core::error::MmmError;
use mmm_core::types::AllocationRequest;
use mmm_etl::{load_training_set, prepare, TableStore};
use mmm_model::{ModelRegistry, RidgeRegression};
use mmm_planner::{even_split, AllocationBreakdown, AllocationScorer, BudgetStatus};
use std::fs;
use std::path::Path;

const CAMPAIGNS: &str = "\
campaign_id,channel,start_date,budget,expected_uplift
e1,email,2024-01-01,100,
s1,search,2024-01-17,300,
t1,tv,2024-02-05,500,
e2,email,2024-02-12,,50
t2,tv,2024-02-19,70,
";

const TRANSACTIONS: &str = "\
campaign_id,timestamp,gross_revenue
e1,2024-01-02 09:00:00,1210
e1,2024-01-09 09:00:00,1190
s1,2024-01-16 09:00:00,2650
s1,2024-01-23 09:00:00,2700
s1,2024-01-30 09:00:00,2380
t1,2024-02-06 09:00:00,3900
,2024-02-07 12:30:00,150
t1,2024-02-13 09:00:00,4400
t2,2024-02-20 09:00:00,4800
";

fn setup(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.data.raw_dir = dir.join("raw");
    config.data.processed_dir = dir.join("processed");
    fs::create_dir_all(&config.data.raw_dir).unwrap();
    fs::write(config.data.campaigns_path(), CAMPAIGNS).unwrap();
    fs::write(config.data.transactions_path(), TRANSACTIONS).unwrap();
    config
}

fn registry_for(config: &AppConfig) -> ModelRegistry {
    let store = TableStore::new(&config.data.processed_dir);
    ModelRegistry::new(
        move || load_training_set(&store),
        RidgeRegression::from_config(&config.model).unwrap(),
    )
}

#[test]
fn test_raw_files_to_training_set() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());

    let summary = prepare(&config).unwrap();
    assert_eq!(summary.channels, vec!["email", "search", "tv"]);
    assert_eq!(summary.weeks, 8);
    assert_eq!(summary.unattributed_transactions, 1);

    let set = load_training_set(&TableStore::new(&config.data.processed_dir)).unwrap();
    assert_eq!(set.n_channels(), 3);
    assert_eq!(set.n_rows(), 8);

    // The last week collects the tail of t1, the clamped t2 window and e2.
    let last = set.rows.last().unwrap();
    assert_eq!(last.date_key, NaiveDate::from_ymd_opt(2024, 2, 19).unwrap());
    assert_eq!(last.spend, vec![50.0, 0.0, 570.0]);

    // Unattributed revenue still lands in its week.
    let feb5 = set
        .rows
        .iter()
        .find(|r| r.date_key == NaiveDate::from_ymd_opt(2024, 2, 5).unwrap())
        .unwrap();
    assert_eq!(feb5.revenue, 4050.0);
}

#[test]
fn test_cached_model_scores_allocations() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    prepare(&config).unwrap();

    let registry = registry_for(&config);
    assert!(!registry.is_ready());
    let model = registry.current().unwrap();
    assert!(registry.is_ready());
    assert!(!model.is_low_confidence());
    assert_eq!(model.training_rows(), 8);
    assert!(model.r_squared().is_finite() && model.r_squared() <= 1.0);

    let scorer = AllocationScorer::new(&model);

    let split = even_split(&model, 900.0);
    let response = scorer.score(&split).unwrap();
    assert_eq!(response.total_spend, 900.0);
    assert!(response.warnings.is_empty());
    let rebuilt = response.per_channel_contribution.values().sum::<f64>() + model.intercept();
    assert_eq!(rebuilt, response.predicted_revenue);

    let over = AllocationRequest {
        total_budget: 1000.0,
        allocations: [("email".to_string(), 600.0), ("tv".to_string(), 500.0)]
            .into_iter()
            .collect(),
    };
    assert!(matches!(
        scorer.score(&over),
        Err(MmmError::BudgetExceeded { overage }) if overage == 100.0
    ));
    assert_eq!(
        AllocationBreakdown::compute(&model, &over).unwrap().budget,
        BudgetStatus::Over(100.0)
    );
}

#[test]
fn test_retrain_picks_up_new_tables() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    prepare(&config).unwrap();

    let registry = registry_for(&config);
    let first = registry.warm_up().unwrap();

    let mut transactions = TRANSACTIONS.to_string();
    transactions.push_str("t2,2024-02-21 10:00:00,900\n");
    fs::write(config.data.transactions_path(), transactions).unwrap();
    prepare(&config).unwrap();

    // Reads keep serving the cached model until an explicit retrain.
    assert_eq!(registry.current().unwrap().run_id(), first.run_id());

    let second = registry.retrain().unwrap();
    assert_ne!(second.run_id(), first.run_id());
    assert_ne!(second.intercept(), first.intercept());
    assert_eq!(registry.generation(), 2);
}
