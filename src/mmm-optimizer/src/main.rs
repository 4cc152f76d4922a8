//! MMM Optimizer: marketing-mix model over weekly channel spend.
//!
//! Builds the star schema from raw campaign and transaction exports, fits the
//! ridge model and scores budget allocations from the command line or over
//! HTTP.

use clap::{Parser, Subcommand};
use mmm_api::ApiServer;
use mmm_core::config::AppConfig;
use mmm_core::error::MmmError;
use mmm_core::types::AllocationRequest;
use mmm_etl::{load_training_set, prepare, TableStore};
use mmm_model::{ModelRegistry, RidgeRegression};
use mmm_planner::{even_split, AllocationBreakdown, AllocationScorer};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Exit code for an allocation that exceeds its budget.
const EXIT_BUDGET_EXCEEDED: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "mmm-optimizer")]
#[command(about = "Marketing-mix modelling and budget allocation scoring")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "MMM_OPTIMIZER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the raw campaign and transaction CSVs (overrides config)
    #[arg(long, global = true)]
    raw_dir: Option<PathBuf>,

    /// Directory for the star schema tables (overrides config)
    #[arg(long, global = true)]
    processed_dir: Option<PathBuf>,

    /// Ridge penalty strength (overrides config)
    #[arg(long, global = true)]
    alpha: Option<f64>,

    /// Human-readable logs instead of JSON
    #[arg(long, global = true, default_value_t = false)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the star schema tables from the raw inputs
    Prepare,

    /// Fit the model on the persisted tables and print its diagnostics
    Train,

    /// Score an allocation against the fitted model
    Score(AllocationArgs),

    /// Per-channel ROI table for an allocation
    Breakdown(AllocationArgs),

    /// Serve the REST API
    Serve {
        /// HTTP port (overrides config)
        #[arg(long, env = "MMM_OPTIMIZER__API__HTTP_PORT")]
        http_port: Option<u16>,

        /// Train on the first request instead of at startup
        #[arg(long, default_value_t = false)]
        lazy: bool,
    },
}

#[derive(clap::Args, Debug)]
struct AllocationArgs {
    /// Total budget available
    #[arg(long)]
    budget: f64,

    /// Spend for one channel, as NAME=AMOUNT (repeatable)
    #[arg(long = "alloc", value_parser = parse_allocation)]
    allocations: Vec<(String, f64)>,

    /// Start from an even split of the budget across all channels;
    /// explicit --alloc values override individual channels
    #[arg(long, default_value_t = false)]
    even: bool,
}

fn parse_allocation(s: &str) -> Result<(String, f64), String> {
    let (name, amount) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=AMOUNT, got '{s}'"))?;
    let amount: f64 = amount
        .trim()
        .parse()
        .map_err(|e| format!("invalid amount in '{s}': {e}"))?;
    Ok((name.trim().to_string(), amount))
}

fn init_tracing(pretty: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "mmm_optimizer=info,mmm_etl=info,mmm_model=info,mmm_planner=info,mmm_api=info,tower_http=info"
            .into()
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if pretty {
        builder.init();
    } else {
        builder.json().init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(Some(path.as_path()))?,
        None => AppConfig::load(None).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }),
    };

    // Apply CLI overrides
    if let Some(dir) = &cli.raw_dir {
        config.data.raw_dir = dir.clone();
    }
    if let Some(dir) = &cli.processed_dir {
        config.data.processed_dir = dir.clone();
    }
    if let Some(alpha) = cli.alpha {
        config.model.ridge_alpha = alpha;
    }
    if let Commands::Serve {
        http_port: Some(port),
        ..
    } = &cli.command
    {
        config.api.http_port = *port;
    }
    config.validate()?;

    Ok(config)
}

fn registry(config: &AppConfig) -> anyhow::Result<Arc<ModelRegistry>> {
    let store = TableStore::new(&config.data.processed_dir);
    let ridge = RidgeRegression::from_config(&config.model)?;
    Ok(Arc::new(ModelRegistry::new(
        move || load_training_set(&store),
        ridge,
    )))
}

fn allocation_request(
    args: &AllocationArgs,
    registry: &ModelRegistry,
) -> anyhow::Result<AllocationRequest> {
    let mut request = if args.even {
        even_split(&*registry.current()?, args.budget)
    } else {
        AllocationRequest {
            total_budget: args.budget,
            allocations: Default::default(),
        }
    };
    request.allocations.extend(args.allocations.iter().cloned());
    Ok(request)
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.pretty);

    let config = load_config(&cli)?;

    info!(
        raw_dir = %config.data.raw_dir.display(),
        processed_dir = %config.data.processed_dir.display(),
        window_weeks = config.etl.campaign_attribution_window_weeks,
        ridge_alpha = config.model.ridge_alpha,
        "Configuration loaded"
    );

    match &cli.command {
        Commands::Prepare => {
            let summary = prepare(&config)?;
            print_json(&summary)?;
        }
        Commands::Train => {
            let model = registry(&config)?.warm_up()?;
            print_json(&model.diagnostics())?;
        }
        Commands::Score(args) => {
            let registry = registry(&config)?;
            let request = allocation_request(args, &registry)?;
            let model = registry.current()?;
            match AllocationScorer::new(&model).score(&request) {
                Ok(response) => print_json(&response)?,
                Err(MmmError::BudgetExceeded { overage }) => {
                    error!(overage = overage, "Allocation exceeds total budget");
                    eprintln!("{}", MmmError::BudgetExceeded { overage });
                    std::process::exit(EXIT_BUDGET_EXCEEDED);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Breakdown(args) => {
            let registry = registry(&config)?;
            let request = allocation_request(args, &registry)?;
            let model = registry.current()?;
            print_json(&AllocationBreakdown::compute(&model, &request)?)?;
        }
        Commands::Serve { lazy, .. } => {
            let registry = registry(&config)?;
            if !lazy {
                // A missing or empty table set is not fatal: /ready stays 503
                // until a retrain succeeds.
                let warm = registry.clone();
                match tokio::task::spawn_blocking(move || warm.warm_up()).await? {
                    Ok(model) => info!(run_id = %model.run_id(), "Model warmed up"),
                    Err(e) => error!(error = %e, "Warm-up failed, serving without a model"),
                }
            }

            let api_server = ApiServer::new(config.clone(), registry);

            if let Err(e) = api_server.start_metrics() {
                error!(error = %e, "Failed to start metrics exporter");
            }

            info!("MMM Optimizer is ready to serve traffic");

            // Start HTTP server (blocks until shutdown)
            api_server.start_http().await?;
        }
    }

    Ok(())
}
