//! Ridge regression of weekly revenue on per-channel spend.
//!
//! The intercept is not penalised. Features and target are centred, then the
//! penalised normal equations
//!
//! ```text
//! (XcᵀXc + αI) β = Xcᵀyc
//! intercept      = ȳ − x̄·β
//! ```
//!
//! are solved by Cholesky decomposition. With α > 0 the system is positive
//! definite even when there are fewer weeks than channels.

use crate::evaluation::r_squared;
use chrono::{DateTime, Utc};
use mmm_core::config::ModelConfig;
use mmm_core::error::{MmmError, MmmResult};
use mmm_core::types::{ChannelId, ModelDiagnostics, TrainingSet};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

/// How much the coefficients can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitConfidence {
    Normal,
    /// Fewer training rows than channels; the penalty keeps the fit defined
    /// but the coefficients are weakly identified.
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelCoefficient {
    pub channel_name: String,
    /// Marginal revenue per unit of spend.
    pub coefficient: f64,
}

/// Ridge solver configuration.
#[derive(Debug, Clone)]
pub struct RidgeRegression {
    alpha: f64,
    strict_rank_check: bool,
}

impl RidgeRegression {
    pub fn new(alpha: f64) -> MmmResult<Self> {
        if !alpha.is_finite() || alpha <= 0.0 {
            return Err(MmmError::Config(format!(
                "ridge alpha must be a positive finite number, got {alpha}"
            )));
        }
        Ok(Self {
            alpha,
            strict_rank_check: false,
        })
    }

    pub fn from_config(config: &ModelConfig) -> MmmResult<Self> {
        Ok(Self::new(config.ridge_alpha)?.with_strict_rank_check(config.strict_rank_check))
    }

    /// Fail with `DegenerateInput` instead of returning a low-confidence model.
    pub fn with_strict_rank_check(mut self, strict: bool) -> Self {
        self.strict_rank_check = strict;
        self
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn fit(&self, set: &TrainingSet) -> MmmResult<FittedModel> {
        let (n_rows, n_channels) = (set.n_rows(), set.n_channels());
        if n_rows == 0 {
            return Err(MmmError::EmptyTrainingSet);
        }
        if set
            .channels
            .windows(2)
            .any(|w| w[0].channel_id >= w[1].channel_id)
        {
            return Err(anyhow::anyhow!("training columns must be in ascending channel id order").into());
        }
        if let Some(row) = set.rows.iter().find(|r| r.spend.len() != n_channels) {
            return Err(MmmError::ShapeMismatch {
                expected: n_channels,
                got: row.spend.len(),
            });
        }

        let confidence = if n_rows < n_channels {
            if self.strict_rank_check {
                return Err(MmmError::DegenerateInput {
                    rows: n_rows,
                    channels: n_channels,
                });
            }
            warn!(
                rows = n_rows,
                channels = n_channels,
                "Fewer training weeks than channels, coefficients are low confidence"
            );
            FitConfidence::Low
        } else {
            FitConfidence::Normal
        };

        let x = set.design_matrix();
        let y = set.targets();
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(anyhow::anyhow!("training set contains non-finite values").into());
        }

        let beta = self.solve(&x, &y).ok_or(MmmError::DegenerateInput {
            rows: n_rows,
            channels: n_channels,
        })?;
        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or(MmmError::EmptyTrainingSet)?;
        let y_mean = y.mean().ok_or(MmmError::EmptyTrainingSet)?;
        let intercept = y_mean - x_mean.dot(&beta);

        let coefficients = set
            .channels
            .iter()
            .zip(beta.iter())
            .map(|(channel, &coefficient)| {
                (
                    channel.channel_id,
                    ChannelCoefficient {
                        channel_name: channel.channel_name.clone(),
                        coefficient,
                    },
                )
            })
            .collect();

        let mut model = FittedModel {
            run_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            alpha: self.alpha,
            intercept,
            coefficients,
            r_squared: 0.0,
            training_rows: n_rows,
            confidence,
        };
        model.r_squared = model.score(set)?;

        info!(
            run_id = %model.run_id,
            rows = n_rows,
            channels = n_channels,
            alpha = self.alpha,
            r_squared = model.r_squared,
            "Ridge model fitted"
        );

        Ok(model)
    }

    /// Penalised least squares on centred data.
    fn solve(&self, x: &Array2<f64>, y: &Array1<f64>) -> Option<Array1<f64>> {
        let x_mean = x.mean_axis(Axis(0))?;
        let y_mean = y.mean()?;
        let xc = x - &x_mean;
        let yc = y - y_mean;

        let mut gram = xc.t().dot(&xc);
        for i in 0..gram.nrows() {
            gram[[i, i]] += self.alpha;
        }
        let rhs = xc.t().dot(&yc);

        cholesky_solve(&gram, &rhs)
    }
}

/// Solve `A x = b` for symmetric positive definite `A`.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    if a.dim() != (n, n) {
        return None;
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    // L z = b
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * z[k];
        }
        z[i] = sum / l[[i, i]];
    }

    // Lᵀ x = z
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }

    Some(x)
}

/// A fitted marketing-mix model. Immutable once fit; retraining produces a
/// new instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    run_id: Uuid,
    trained_at: DateTime<Utc>,
    alpha: f64,
    intercept: f64,
    /// Keyed by channel id; iteration order is the training column order.
    coefficients: BTreeMap<ChannelId, ChannelCoefficient>,
    r_squared: f64,
    training_rows: usize,
    confidence: FitConfidence,
}

impl FittedModel {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// In-sample coefficient of determination.
    pub fn r_squared(&self) -> f64 {
        self.r_squared
    }

    pub fn training_rows(&self) -> usize {
        self.training_rows
    }

    pub fn confidence(&self) -> FitConfidence {
        self.confidence
    }

    pub fn is_low_confidence(&self) -> bool {
        self.confidence == FitConfidence::Low
    }

    pub fn channel_count(&self) -> usize {
        self.coefficients.len()
    }

    pub fn coefficient(&self, channel_id: ChannelId) -> Option<f64> {
        self.coefficients.get(&channel_id).map(|c| c.coefficient)
    }

    /// `(channel_id, name, coefficient)` in ascending id order.
    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &str, f64)> + '_ {
        self.coefficients
            .iter()
            .map(|(&id, c)| (id, c.channel_name.as_str(), c.coefficient))
    }

    pub fn channel_id(&self, name: &str) -> Option<ChannelId> {
        self.coefficients
            .iter()
            .find(|(_, c)| c.channel_name == name)
            .map(|(&id, _)| id)
    }

    /// Intercept plus coefficient-weighted spend. `spend` is positional, in
    /// ascending channel id order. Not clamped: this is a linear
    /// extrapolation and may be negative.
    pub fn predict(&self, spend: &[f64]) -> MmmResult<f64> {
        Ok(self
            .contributions(spend)?
            .into_iter()
            .fold(self.intercept, |acc, c| acc + c))
    }

    /// Predict from a keyed spend vector. Missing channels spend zero;
    /// channel ids the model does not know are a shape violation.
    pub fn predict_keyed(&self, spend: &BTreeMap<ChannelId, f64>) -> MmmResult<f64> {
        if spend.keys().any(|id| !self.coefficients.contains_key(id)) {
            return Err(MmmError::ShapeMismatch {
                expected: self.channel_count(),
                got: spend.len(),
            });
        }
        let positional: Vec<f64> = self
            .coefficients
            .keys()
            .map(|id| spend.get(id).copied().unwrap_or(0.0))
            .collect();
        self.predict(&positional)
    }

    /// Per-channel `spend × coefficient`, positional like [`predict`]. The
    /// prediction is the intercept plus these values summed in order.
    ///
    /// [`predict`]: FittedModel::predict
    pub fn contributions(&self, spend: &[f64]) -> MmmResult<Vec<f64>> {
        if spend.len() != self.channel_count() {
            return Err(MmmError::ShapeMismatch {
                expected: self.channel_count(),
                got: spend.len(),
            });
        }
        Ok(self
            .coefficients
            .values()
            .zip(spend)
            .map(|(c, &x)| c.coefficient * x)
            .collect())
    }

    /// Coefficient of determination on `set`, whose channel columns must
    /// match the model's.
    pub fn score(&self, set: &TrainingSet) -> MmmResult<f64> {
        let ids = set.channel_ids();
        if !ids.iter().copied().eq(self.coefficients.keys().copied()) {
            return Err(MmmError::ShapeMismatch {
                expected: self.channel_count(),
                got: ids.len(),
            });
        }

        let predicted = set
            .rows
            .iter()
            .map(|row| self.predict(&row.spend))
            .collect::<MmmResult<Vec<f64>>>()?;
        let actual: Vec<f64> = set.rows.iter().map(|r| r.revenue).collect();

        Ok(r_squared(&actual, &predicted))
    }

    pub fn diagnostics(&self) -> ModelDiagnostics {
        ModelDiagnostics {
            channel_count: self.channel_count(),
            r_squared: self.r_squared,
            coefficients: self
                .coefficients
                .values()
                .map(|c| (c.channel_name.clone(), c.coefficient))
                .collect(),
            intercept: self.intercept,
            training_rows: self.training_rows,
            low_confidence: self.is_low_confidence(),
            run_id: self.run_id,
        }
    }
}
