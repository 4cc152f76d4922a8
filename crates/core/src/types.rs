use chrono::{NaiveDate, NaiveDateTime};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// 1-based channel identifier, assigned in first-seen order.
pub type ChannelId = u32;

// ─── Raw inputs ─────────────────────────────────────────────────────────

/// One row of the raw campaigns table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub campaign_id: String,
    pub channel: String,
    pub start_date: NaiveDate,
    pub budget: Option<f64>,
    /// Used as a spend proxy when `budget` is absent.
    pub expected_uplift: Option<f64>,
}

impl CampaignRecord {
    /// Spend attributed to each week of the campaign's window.
    pub fn attributable_spend(&self) -> f64 {
        self.budget.or(self.expected_uplift).unwrap_or(0.0)
    }
}

/// One row of the raw transactions table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub campaign_id: String,
    pub timestamp: NaiveDateTime,
    pub gross_revenue: f64,
}

// ─── Star schema ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRow {
    /// Monday of the ISO week.
    pub date_key: NaiveDate,
    pub year: i32,
    pub week: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRow {
    pub channel_id: ChannelId,
    pub channel_name: String,
}

/// Channel dimension. Ids are dense, 1-based and ascending in `rows`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDimension {
    rows: Vec<ChannelRow>,
}

impl ChannelDimension {
    /// Assign ids to distinct names in first-occurrence order.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut rows: Vec<ChannelRow> = Vec::new();
        for name in names {
            if rows.iter().any(|r| r.channel_name == name) {
                continue;
            }
            rows.push(ChannelRow {
                channel_id: rows.len() as ChannelId + 1,
                channel_name: name.to_string(),
            });
        }
        Self { rows }
    }

    /// Rebuild from persisted rows, sorting by id.
    pub fn from_rows(mut rows: Vec<ChannelRow>) -> Self {
        rows.sort_by_key(|r| r.channel_id);
        Self { rows }
    }

    pub fn id_of(&self, name: &str) -> Option<ChannelId> {
        self.rows
            .iter()
            .find(|r| r.channel_name == name)
            .map(|r| r.channel_id)
    }

    pub fn name_of(&self, id: ChannelId) -> Option<&str> {
        self.rows
            .iter()
            .find(|r| r.channel_id == id)
            .map(|r| r.channel_name.as_str())
    }

    pub fn rows(&self) -> &[ChannelRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Spend per `(date_key, channel_id)`. Absent keys mean zero spend.
pub type SpendFact = BTreeMap<(NaiveDate, ChannelId), f64>;

/// Attributed revenue per `date_key`.
pub type RevenueFact = BTreeMap<NaiveDate, f64>;

/// The four normalized tables handed from the schema builder to the
/// feature matrix assembler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StarSchema {
    pub dates: Vec<DateRow>,
    pub channels: ChannelDimension,
    pub spend: SpendFact,
    pub revenue: RevenueFact,
}

// ─── Training data ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub date_key: NaiveDate,
    /// One value per channel, aligned with `TrainingSet::channels`.
    pub spend: Vec<f64>,
    pub revenue: f64,
}

/// Supervised-learning dataset: per-week channel spend with weekly revenue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSet {
    /// Feature columns, ascending by channel id.
    pub channels: Vec<ChannelRow>,
    pub rows: Vec<TrainingRow>,
}

impl TrainingSet {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|c| c.channel_id).collect()
    }

    /// Rows × channels spend matrix.
    pub fn design_matrix(&self) -> Array2<f64> {
        let mut x = Array2::<f64>::zeros((self.n_rows(), self.n_channels()));
        for (i, row) in self.rows.iter().enumerate() {
            for (j, &spend) in row.spend.iter().enumerate() {
                x[[i, j]] = spend;
            }
        }
        x
    }

    /// Revenue label per row.
    pub fn targets(&self) -> Array1<f64> {
        self.rows.iter().map(|r| r.revenue).collect()
    }
}

// ─── Allocation request / response ──────────────────────────────────────

/// Candidate spend per channel name, checked against a total budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRequest {
    pub total_budget: f64,
    #[serde(default)]
    pub allocations: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResponse {
    pub predicted_revenue: f64,
    pub total_spend: f64,
    pub net_profit: f64,
    pub per_channel_contribution: BTreeMap<String, f64>,
    /// Present only when the allocation leaves part of the budget unspent.
    pub unallocated_amount: Option<f64>,
    pub warnings: Vec<String>,
}

/// Model summary for external reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDiagnostics {
    pub channel_count: usize,
    pub r_squared: f64,
    pub coefficients: BTreeMap<String, f64>,
    pub intercept: f64,
    pub training_rows: usize,
    pub low_confidence: bool,
    pub run_id: Uuid,
}
