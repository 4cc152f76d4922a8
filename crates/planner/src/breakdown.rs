//! Per-channel ROI view of an allocation and the default even split.

use crate::allocation::resolve;
use mmm_core::error::MmmResult;
use mmm_core::types::AllocationRequest;
use mmm_model::FittedModel;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How the allocated total compares to the budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "amount", rename_all = "snake_case")]
pub enum BudgetStatus {
    Matched,
    Over(f64),
    Under(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRoi {
    pub channel: String,
    pub allocated: f64,
    /// Marginal revenue per unit of spend.
    pub roi: f64,
    pub contribution: f64,
    pub positive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationBreakdown {
    pub total_budget: f64,
    pub total_spend: f64,
    pub budget: BudgetStatus,
    pub channels: Vec<ChannelRoi>,
}

impl AllocationBreakdown {
    /// Build the ROI table for an allocation. Unlike scoring this never
    /// rejects an over-budget plan; the overage is reported in `budget`.
    pub fn compute(model: &FittedModel, request: &AllocationRequest) -> MmmResult<Self> {
        let resolved = resolve(model, request)?;
        let contributions = model.contributions(&resolved.spend)?;

        let channels = model
            .channels()
            .zip(resolved.spend.iter().zip(contributions))
            .map(|((_, name, coefficient), (&allocated, contribution))| ChannelRoi {
                channel: name.to_string(),
                allocated,
                roi: coefficient,
                contribution,
                positive: coefficient > 0.0,
            })
            .collect();

        let budget = match resolved.total_spend.partial_cmp(&request.total_budget) {
            Some(Ordering::Greater) => {
                BudgetStatus::Over(resolved.total_spend - request.total_budget)
            }
            Some(Ordering::Less) => BudgetStatus::Under(request.total_budget - resolved.total_spend),
            _ => BudgetStatus::Matched,
        };

        Ok(Self {
            total_budget: request.total_budget,
            total_spend: resolved.total_spend,
            budget,
            channels,
        })
    }
}

/// Starting allocation: `floor(total_budget / channels)` to every channel.
pub fn even_split(model: &FittedModel, total_budget: f64) -> AllocationRequest {
    let count = model.channel_count();
    let share = if count == 0 || !total_budget.is_finite() || total_budget <= 0.0 {
        0.0
    } else {
        (total_budget / count as f64).floor()
    };

    AllocationRequest {
        total_budget,
        allocations: model
            .channels()
            .map(|(_, name, _)| (name.to_string(), share))
            .collect(),
    }
}
