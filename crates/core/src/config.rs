use crate::error::{MmmError, MmmResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Root application configuration. Loaded from an optional TOML file, then
/// environment variables with the prefix `MMM_OPTIMIZER__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub etl: EtlConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    #[serde(default = "default_campaigns_file")]
    pub campaigns_file: String,
    #[serde(default = "default_transactions_file")]
    pub transactions_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EtlConfig {
    /// Number of weeks, starting at a campaign's start week, that receive the
    /// campaign's full budget.
    #[serde(default = "default_attribution_window_weeks")]
    pub campaign_attribution_window_weeks: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// L2 penalty strength.
    #[serde(default = "default_ridge_alpha")]
    pub ridge_alpha: f64,
    /// Fail the fit instead of flagging low confidence when there are fewer
    /// training rows than channels.
    #[serde(default)]
    pub strict_rank_check: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_raw_dir() -> PathBuf {
    PathBuf::from("data_raw")
}
fn default_processed_dir() -> PathBuf {
    PathBuf::from("data_processed")
}
fn default_campaigns_file() -> String {
    "campaigns.csv".to_string()
}
fn default_transactions_file() -> String {
    "transactions.csv".to_string()
}
fn default_attribution_window_weeks() -> usize {
    4
}
fn default_ridge_alpha() -> f64 {
    1.0
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            raw_dir: default_raw_dir(),
            processed_dir: default_processed_dir(),
            campaigns_file: default_campaigns_file(),
            transactions_file: default_transactions_file(),
        }
    }
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            campaign_attribution_window_weeks: default_attribution_window_weeks(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            ridge_alpha: default_ridge_alpha(),
            strict_rank_check: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            etl: EtlConfig::default(),
            model: ModelConfig::default(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl DataConfig {
    pub fn campaigns_path(&self) -> PathBuf {
        self.raw_dir.join(&self.campaigns_file)
    }

    pub fn transactions_path(&self) -> PathBuf {
        self.raw_dir.join(&self.transactions_file)
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file and environment variables.
    /// Environment values win over file values.
    pub fn load(path: Option<&Path>) -> MmmResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let builder = builder.add_source(
            config::Environment::with_prefix("MMM_OPTIMIZER")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        debug!(
            raw_dir = %config.data.raw_dir.display(),
            processed_dir = %config.data.processed_dir.display(),
            window_weeks = config.etl.campaign_attribution_window_weeks,
            ridge_alpha = config.model.ridge_alpha,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Reject settings that would make the pipeline ill-defined.
    pub fn validate(&self) -> MmmResult<()> {
        if self.etl.campaign_attribution_window_weeks == 0 {
            return Err(MmmError::Config(
                "etl.campaign_attribution_window_weeks must be at least 1".to_string(),
            ));
        }
        if !self.model.ridge_alpha.is_finite() || self.model.ridge_alpha <= 0.0 {
            return Err(MmmError::Config(format!(
                "model.ridge_alpha must be a positive finite number, got {}",
                self.model.ridge_alpha
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.etl.campaign_attribution_window_weeks, 4);
        assert!((config.model.ridge_alpha - 1.0).abs() < f64::EPSILON);
        assert!(!config.model.strict_rank_check);
        assert_eq!(
            config.data.campaigns_path(),
            PathBuf::from("data_raw/campaigns.csv")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = AppConfig::default();
        config.etl.campaign_attribution_window_weeks = 0;
        assert!(matches!(config.validate(), Err(MmmError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_non_positive_alpha() {
        let mut config = AppConfig::default();
        config.model.ridge_alpha = 0.0;
        assert!(config.validate().is_err());
        config.model.ridge_alpha = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[etl]\ncampaign_attribution_window_weeks = 6\n\n[model]\nridge_alpha = 0.25"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.etl.campaign_attribution_window_weeks, 6);
        assert!((config.model.ridge_alpha - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.api.http_port, 8080);
    }
}
