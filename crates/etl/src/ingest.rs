//! Raw campaign and transaction ingestion with row-level validation.
//!
//! Malformed rows are rejected with the offending line number rather than
//! being carried forward as blanks into the regression.

use crate::csv::{field, CsvTable};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use mmm_core::error::{MmmError, MmmResult};
use mmm_core::types::{CampaignRecord, TransactionRecord};
use std::path::Path;
use tracing::info;

pub const CAMPAIGNS_TABLE: &str = "campaigns";
pub const TRANSACTIONS_TABLE: &str = "transactions";

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Load and validate the raw campaigns file.
pub fn load_campaigns(path: &Path) -> MmmResult<Vec<CampaignRecord>> {
    let table = CsvTable::read(CAMPAIGNS_TABLE, path)?;
    let campaigns = parse_campaigns(&table)?;
    info!(path = %path.display(), rows = campaigns.len(), "Campaigns loaded");
    Ok(campaigns)
}

/// Load and validate the raw transactions file.
pub fn load_transactions(path: &Path) -> MmmResult<Vec<TransactionRecord>> {
    let table = CsvTable::read(TRANSACTIONS_TABLE, path)?;
    let transactions = parse_transactions(&table)?;
    info!(path = %path.display(), rows = transactions.len(), "Transactions loaded");
    Ok(transactions)
}

pub fn parse_campaigns(table: &CsvTable) -> MmmResult<Vec<CampaignRecord>> {
    let cols = table.require(&["campaign_id", "channel", "start_date"])?;
    let (id_col, channel_col, start_col) = (cols[0], cols[1], cols[2]);

    let budget_col = table.column("budget");
    let uplift_col = table.column("expected_uplift");
    if budget_col.is_none() && uplift_col.is_none() {
        return Err(MmmError::SchemaMismatch {
            table: table.name.clone(),
            missing: vec!["budget|expected_uplift".to_string()],
        });
    }

    let mut campaigns = Vec::with_capacity(table.len());
    for (line, fields) in table.rows() {
        let reject = |reason: String| MmmError::invalid_record(&table.name, line, reason);

        let campaign_id = field(fields, id_col);
        if campaign_id.is_empty() {
            return Err(reject("campaign_id is empty".to_string()));
        }
        let channel = field(fields, channel_col);
        if channel.is_empty() {
            return Err(reject("channel is empty".to_string()));
        }

        let raw_start = field(fields, start_col);
        let start_date = parse_date(raw_start)
            .ok_or_else(|| reject(format!("unparseable start_date '{raw_start}'")))?;

        let budget = match budget_col {
            Some(idx) => parse_amount(field(fields, idx)).map_err(|e| reject(format!("budget {e}")))?,
            None => None,
        };
        let expected_uplift = match uplift_col {
            Some(idx) => parse_amount(field(fields, idx))
                .map_err(|e| reject(format!("expected_uplift {e}")))?,
            None => None,
        };
        if budget.is_none() && expected_uplift.is_none() {
            return Err(reject(
                "both budget and expected_uplift are blank".to_string(),
            ));
        }

        campaigns.push(CampaignRecord {
            campaign_id: campaign_id.to_string(),
            channel: channel.to_string(),
            start_date,
            budget,
            expected_uplift,
        });
    }

    Ok(campaigns)
}

pub fn parse_transactions(table: &CsvTable) -> MmmResult<Vec<TransactionRecord>> {
    let cols = table.require(&["campaign_id", "timestamp", "gross_revenue"])?;
    let (id_col, ts_col, revenue_col) = (cols[0], cols[1], cols[2]);

    let mut transactions = Vec::with_capacity(table.len());
    for (line, fields) in table.rows() {
        let reject = |reason: String| MmmError::invalid_record(&table.name, line, reason);

        let raw_ts = field(fields, ts_col);
        let timestamp = parse_timestamp(raw_ts)
            .ok_or_else(|| reject(format!("unparseable timestamp '{raw_ts}'")))?;

        let gross_revenue = parse_amount(field(fields, revenue_col))
            .map_err(|e| reject(format!("gross_revenue {e}")))?
            .ok_or_else(|| reject("gross_revenue is blank".to_string()))?;

        // A blank campaign id is kept: the revenue still counts, unattributed.
        transactions.push(TransactionRecord {
            campaign_id: field(fields, id_col).to_string(),
            timestamp,
            gross_revenue,
        });
    }

    Ok(transactions)
}

/// Parse a calendar date; a full timestamp is accepted and truncated.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .or_else(|| parse_timestamp(raw).map(|ts| ts.date()))
}

/// Parse a timestamp. Offsets are resolved to the recorded local time.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Blank is `None`; otherwise the value must be a finite, non-negative number.
fn parse_amount(raw: &str) -> Result<Option<f64>, String> {
    if raw.is_empty() {
        return Ok(None);
    }
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("is not a number: '{raw}'"))?;
    if !value.is_finite() {
        return Err(format!("is not finite: '{raw}'"));
    }
    if value < 0.0 {
        return Err(format!("is negative: {value}"));
    }
    Ok(Some(value))
}
