//! Marketing-mix ETL: raw campaigns and transactions to a weekly star
//! schema, and from the star schema to a regression-ready training set.

pub mod csv;
pub mod ingest;
pub mod matrix;
pub mod schema;
pub mod tables;

pub use matrix::FeatureMatrixAssembler;
pub use schema::{SchemaBuilder, SchemaSummary};
pub use tables::TableStore;

use mmm_core::config::AppConfig;
use mmm_core::error::MmmResult;
use mmm_core::types::TrainingSet;
use tracing::info;

/// One-shot batch transform: read the raw inputs, build the star schema and
/// persist it. Any failure leaves previously persisted tables untouched.
pub fn prepare(config: &AppConfig) -> MmmResult<SchemaSummary> {
    let builder = SchemaBuilder::from_config(&config.etl)?;

    info!(raw_dir = %config.data.raw_dir.display(), "Loading raw datasets");
    let campaigns = ingest::load_campaigns(&config.data.campaigns_path())?;
    let transactions = ingest::load_transactions(&config.data.transactions_path())?;

    let (schema, summary) = builder.build(&campaigns, &transactions)?;
    TableStore::new(&config.data.processed_dir).save(&schema)?;

    Ok(summary)
}

/// Load the persisted tables and assemble the training set.
pub fn load_training_set(store: &TableStore) -> MmmResult<TrainingSet> {
    let schema = store.load()?;
    FeatureMatrixAssembler::assemble(&schema)
}
