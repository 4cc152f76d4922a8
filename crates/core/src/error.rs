use std::path::PathBuf;
use thiserror::Error;

pub type MmmResult<T> = Result<T, MmmError>;

#[derive(Error, Debug)]
pub enum MmmError {
    #[error("Missing input table '{table}' at {}", path.display())]
    MissingInput { table: String, path: PathBuf },

    #[error("Schema mismatch in '{table}': missing columns {missing:?}")]
    SchemaMismatch { table: String, missing: Vec<String> },

    #[error("Invalid record in '{table}' at line {line}: {reason}")]
    InvalidRecord {
        table: String,
        line: usize,
        reason: String,
    },

    #[error("Training set is empty: no week has both spend and revenue")]
    EmptyTrainingSet,

    #[error("Degenerate input: {rows} training rows for {channels} channels")]
    DegenerateInput { rows: usize, channels: usize },

    #[error("Allocation exceeds total budget by {overage}")]
    BudgetExceeded { overage: f64 },

    #[error("Shape mismatch: expected {expected} channels, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("Invalid allocation: {0}")]
    InvalidAllocation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl MmmError {
    /// Errors the caller can recover from by submitting a different allocation.
    /// Everything else aborts the pipeline run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MmmError::BudgetExceeded { .. } | MmmError::InvalidAllocation(_)
        )
    }

    pub fn invalid_record(table: &str, line: usize, reason: impl Into<String>) -> Self {
        MmmError::InvalidRecord {
            table: table.to_string(),
            line,
            reason: reason.into(),
        }
    }
}

impl From<config::ConfigError> for MmmError {
    fn from(e: config::ConfigError) -> Self {
        MmmError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(MmmError::BudgetExceeded { overage: 100.0 }.is_recoverable());
        assert!(MmmError::InvalidAllocation("negative".into()).is_recoverable());
        assert!(!MmmError::EmptyTrainingSet.is_recoverable());
        assert!(!MmmError::ShapeMismatch { expected: 2, got: 3 }.is_recoverable());
    }

    #[test]
    fn test_display_carries_overage() {
        let err = MmmError::BudgetExceeded { overage: 100.0 };
        assert_eq!(err.to_string(), "Allocation exceeds total budget by 100");
    }
}
