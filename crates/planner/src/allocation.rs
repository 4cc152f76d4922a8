//! Allocation scoring: budget validation, predicted revenue and per-channel
//! contribution for a candidate spend plan.

use mmm_core::error::{MmmError, MmmResult};
use mmm_core::types::{AllocationRequest, AllocationResponse};
use mmm_model::FittedModel;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A request mapped onto the model's channel columns.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedAllocation {
    /// Spend per model channel, ascending channel id. Missing names are zero.
    pub spend: Vec<f64>,
    /// Sum of every submitted amount, known channels or not.
    pub total_spend: f64,
    /// Names the model has no coefficient for. Zero in `spend`, still counted
    /// in `total_spend`.
    pub unknown: Vec<String>,
}

/// Check every amount is a usable number and map names onto channel columns.
pub(crate) fn resolve(
    model: &FittedModel,
    request: &AllocationRequest,
) -> MmmResult<ResolvedAllocation> {
    if !request.total_budget.is_finite() || request.total_budget < 0.0 {
        return Err(MmmError::InvalidAllocation(format!(
            "totalBudget must be a non-negative number, got {}",
            request.total_budget
        )));
    }
    if let Some((name, amount)) = request
        .allocations
        .iter()
        .find(|(_, a)| !a.is_finite() || **a < 0.0)
    {
        return Err(MmmError::InvalidAllocation(format!(
            "allocation for '{name}' must be a non-negative number, got {amount}"
        )));
    }

    let spend: Vec<f64> = model
        .channels()
        .map(|(_, name, _)| request.allocations.get(name).copied().unwrap_or(0.0))
        .collect();
    let unknown: Vec<String> = request
        .allocations
        .keys()
        .filter(|name| model.channel_id(name).is_none())
        .cloned()
        .collect();
    let total_spend = request.allocations.values().sum();

    Ok(ResolvedAllocation {
        spend,
        total_spend,
        unknown,
    })
}

/// Scores candidate allocations against a fitted model. Holds no state of
/// its own, so one scorer can serve concurrent requests.
#[derive(Debug, Clone, Copy)]
pub struct AllocationScorer<'a> {
    model: &'a FittedModel,
}

impl<'a> AllocationScorer<'a> {
    pub fn new(model: &'a FittedModel) -> Self {
        Self { model }
    }

    /// Score one allocation.
    ///
    /// Spend above the budget fails with `BudgetExceeded` and produces no
    /// partial result. Spend below the budget is scored and the remainder is
    /// returned as `unallocated_amount` with an advisory warning. Amounts for
    /// unknown channels count toward the budget but predict nothing.
    pub fn score(&self, request: &AllocationRequest) -> MmmResult<AllocationResponse> {
        let resolved = resolve(self.model, request)?;

        if resolved.total_spend > request.total_budget {
            let overage = resolved.total_spend - request.total_budget;
            metrics::counter!("allocations.budget_rejected").increment(1);
            debug!(
                total_spend = resolved.total_spend,
                total_budget = request.total_budget,
                overage = overage,
                "Allocation rejected"
            );
            return Err(MmmError::BudgetExceeded { overage });
        }

        let per_channel_contribution: BTreeMap<String, f64> = self
            .model
            .channels()
            .zip(self.model.contributions(&resolved.spend)?)
            .map(|((_, name, _), contribution)| (name.to_string(), contribution))
            .collect();
        let predicted_revenue =
            per_channel_contribution.values().sum::<f64>() + self.model.intercept();

        let mut warnings = Vec::new();
        for name in &resolved.unknown {
            warn!(channel = %name, "Allocation names a channel the model does not know");
            warnings.push(format!("Unknown channel '{name}' contributes no revenue"));
        }
        let unallocated_amount = if resolved.total_spend < request.total_budget {
            let remainder = request.total_budget - resolved.total_spend;
            warnings.push(format!("Unallocated budget: {remainder}"));
            Some(remainder)
        } else {
            None
        };
        if self.model.is_low_confidence() {
            warnings.push(
                "Model was trained on fewer weeks than channels; predictions are low confidence"
                    .to_string(),
            );
        }

        metrics::counter!("allocations.scored").increment(1);

        Ok(AllocationResponse {
            predicted_revenue,
            total_spend: resolved.total_spend,
            net_profit: predicted_revenue - resolved.total_spend,
            per_channel_contribution,
            unallocated_amount,
            warnings,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use mmm_core::types::{ChannelRow, TrainingRow, TrainingSet};
    use mmm_model::RidgeRegression;

    pub(crate) fn ab_model() -> FittedModel {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows = [([100.0, 0.0], 500.0), ([0.0, 100.0], 300.0), ([50.0, 50.0], 400.0)];
        let set = TrainingSet {
            channels: vec![
                ChannelRow {
                    channel_id: 1,
                    channel_name: "A".into(),
                },
                ChannelRow {
                    channel_id: 2,
                    channel_name: "B".into(),
                },
            ],
            rows: rows
                .iter()
                .enumerate()
                .map(|(i, (spend, revenue))| TrainingRow {
                    date_key: start + Duration::weeks(i as i64),
                    spend: spend.to_vec(),
                    revenue: *revenue,
                })
                .collect(),
        };
        RidgeRegression::new(1.0).unwrap().fit(&set).unwrap()
    }

    pub(crate) fn request(budget: f64, allocations: &[(&str, f64)]) -> AllocationRequest {
        AllocationRequest {
            total_budget: budget,
            allocations: allocations
                .iter()
                .map(|(n, a)| (n.to_string(), *a))
                .collect(),
        }
    }

    #[test]
    fn test_over_budget_reports_overage() {
        let model = ab_model();
        let err = AllocationScorer::new(&model)
            .score(&request(1000.0, &[("A", 600.0), ("B", 500.0)]))
            .unwrap_err();
        assert!(err.is_recoverable());
        match err {
            MmmError::BudgetExceeded { overage } => assert_eq!(overage, 100.0),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_under_budget_returns_remainder() {
        let model = ab_model();
        let response = AllocationScorer::new(&model)
            .score(&request(1000.0, &[("A", 400.0), ("B", 400.0)]))
            .unwrap();

        assert_eq!(response.unallocated_amount, Some(200.0));
        assert_eq!(response.total_spend, 800.0);
        assert_eq!(response.warnings.len(), 1);
        assert!(response.warnings[0].contains("Unallocated"));
        assert!((response.predicted_revenue - model.predict(&[400.0, 400.0]).unwrap()).abs() < 1e-9);
    }

    #[test]
    fn test_exact_budget_has_no_advisory() {
        let model = ab_model();
        let response = AllocationScorer::new(&model)
            .score(&request(1000.0, &[("A", 500.0), ("B", 500.0)]))
            .unwrap();
        assert_eq!(response.unallocated_amount, None);
        assert!(response.warnings.is_empty());
    }

    #[test]
    fn test_decomposition_identity() {
        let model = ab_model();
        let scorer = AllocationScorer::new(&model);

        for i in 0..200u32 {
            let a = f64::from(i * 37 % 1000) + f64::from(i) / 7.0;
            let b = f64::from(i * 101 % 1000) / 3.0;
            let response = scorer.score(&request(2500.0, &[("A", a), ("B", b)])).unwrap();

            let total = response.per_channel_contribution.values().sum::<f64>() + model.intercept();
            assert_eq!(total, response.predicted_revenue, "A={a} B={b}");
            assert_eq!(
                response.net_profit,
                response.predicted_revenue - response.total_spend
            );
        }
    }

    #[test]
    fn test_missing_channels_spend_zero() {
        let model = ab_model();
        let response = AllocationScorer::new(&model)
            .score(&request(100.0, &[("A", 100.0)]))
            .unwrap();
        assert_eq!(response.per_channel_contribution["B"], 0.0);
        assert!((response.predicted_revenue - model.predict(&[100.0, 0.0]).unwrap()).abs() < 1e-9);
        assert!(response.predicted_revenue > 450.0);
    }

    #[test]
    fn test_empty_allocation_predicts_intercept() {
        let model = ab_model();
        let response = AllocationScorer::new(&model).score(&request(0.0, &[])).unwrap();
        assert_eq!(response.predicted_revenue, model.intercept());
        assert_eq!(response.unallocated_amount, None);
    }

    #[test]
    fn test_unknown_channel_counts_toward_budget() {
        let model = ab_model();
        let err = AllocationScorer::new(&model)
            .score(&request(100.0, &[("A", 100.0), ("radio", 900.0)]))
            .unwrap_err();
        match err {
            MmmError::BudgetExceeded { overage } => assert_eq!(overage, 900.0),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_channel_warned_and_predicts_nothing() {
        let model = ab_model();
        let scorer = AllocationScorer::new(&model);
        let with_unknown = scorer
            .score(&request(1000.0, &[("A", 100.0), ("radio", 900.0)]))
            .unwrap();
        let known_only = scorer.score(&request(1000.0, &[("A", 100.0)])).unwrap();

        assert_eq!(with_unknown.total_spend, 1000.0);
        assert_eq!(with_unknown.unallocated_amount, None);
        assert_eq!(with_unknown.predicted_revenue, known_only.predicted_revenue);
        assert_eq!(
            with_unknown.net_profit,
            with_unknown.predicted_revenue - 1000.0
        );
        assert!(!with_unknown.per_channel_contribution.contains_key("radio"));
        assert!(with_unknown.warnings.iter().any(|w| w.contains("radio")));
    }

    #[test]
    fn test_invalid_amounts_rejected() {
        let model = ab_model();
        let scorer = AllocationScorer::new(&model);
        for bad in [
            request(-1.0, &[]),
            request(f64::NAN, &[]),
            request(100.0, &[("A", -5.0)]),
            request(100.0, &[("B", f64::INFINITY)]),
        ] {
            assert!(matches!(
                scorer.score(&bad),
                Err(MmmError::InvalidAllocation(_))
            ));
        }
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let model = ab_model();
        let response = AllocationScorer::new(&model)
            .score(&request(1000.0, &[("A", 400.0), ("B", 400.0)]))
            .unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["unallocatedAmount"], 200.0);
        assert!(json["perChannelContribution"].get("A").is_some());
        assert!(json.get("netProfit").is_some());
    }
}
