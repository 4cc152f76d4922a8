//! Schema builder: reshapes raw campaigns and transactions into a weekly
//! star schema.
//!
//! ```text
//! transactions ──week_start──► DateDimension ◄──window── campaigns
//!      │                             │                       │
//!      └──────► RevenueFact          └──► SpendFact ◄────────┘
//! ```
//!
//! Each campaign's full budget is assigned to every week of a fixed
//! attribution window: the first weeks whose Monday falls on or after the
//! campaign's start date. Weeks only exist if at least one transaction falls
//! into them, so the window never extends past the last known week. A
//! campaign that starts inside the last known week is clamped to that week.

use chrono::{Datelike, Duration, NaiveDate};
use mmm_core::config::EtlConfig;
use mmm_core::error::{MmmError, MmmResult};
use mmm_core::types::{
    CampaignRecord, ChannelDimension, DateRow, RevenueFact, SpendFact, StarSchema,
    TransactionRecord,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{info, warn};

/// Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Counts reported after a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaSummary {
    pub channels: Vec<String>,
    pub weeks: usize,
    pub spend_rows: usize,
    pub revenue_weeks: usize,
    /// Transactions whose campaign id matches no campaign.
    pub unattributed_transactions: usize,
    /// Campaigns that start after the last known week.
    pub campaigns_without_weeks: usize,
}

pub struct SchemaBuilder {
    window_weeks: usize,
}

impl SchemaBuilder {
    pub fn new(window_weeks: usize) -> MmmResult<Self> {
        if window_weeks == 0 {
            return Err(MmmError::Config(
                "campaign attribution window must cover at least one week".to_string(),
            ));
        }
        Ok(Self { window_weeks })
    }

    pub fn from_config(config: &EtlConfig) -> MmmResult<Self> {
        Self::new(config.campaign_attribution_window_weeks)
    }

    pub fn window_weeks(&self) -> usize {
        self.window_weeks
    }

    /// Build all four tables. Nothing is returned unless every table built.
    pub fn build(
        &self,
        campaigns: &[CampaignRecord],
        transactions: &[TransactionRecord],
    ) -> MmmResult<(StarSchema, SchemaSummary)> {
        let dates = Self::date_dimension(transactions);
        let channels = ChannelDimension::from_names(campaigns.iter().map(|c| c.channel.as_str()));
        let (spend, campaigns_without_weeks) = self.spend_fact(campaigns, &dates, &channels)?;
        let (revenue, unattributed_transactions) = Self::revenue_fact(campaigns, transactions);

        let summary = SchemaSummary {
            channels: channels
                .rows()
                .iter()
                .map(|c| c.channel_name.clone())
                .collect(),
            weeks: dates.len(),
            spend_rows: spend.len(),
            revenue_weeks: revenue.len(),
            unattributed_transactions,
            campaigns_without_weeks,
        };

        info!(
            channels = ?summary.channels,
            weeks = summary.weeks,
            spend_rows = summary.spend_rows,
            revenue_weeks = summary.revenue_weeks,
            unattributed = summary.unattributed_transactions,
            "Star schema built"
        );

        Ok((
            StarSchema {
                dates,
                channels,
                spend,
                revenue,
            },
            summary,
        ))
    }

    /// Distinct transaction weeks, ascending.
    fn date_dimension(transactions: &[TransactionRecord]) -> Vec<DateRow> {
        let weeks: BTreeSet<NaiveDate> = transactions
            .iter()
            .map(|t| week_start(t.timestamp.date()))
            .collect();

        weeks
            .into_iter()
            .map(|date_key| DateRow {
                date_key,
                year: date_key.year(),
                week: date_key.iso_week().week(),
            })
            .collect()
    }

    fn spend_fact(
        &self,
        campaigns: &[CampaignRecord],
        dates: &[DateRow],
        channels: &ChannelDimension,
    ) -> MmmResult<(SpendFact, usize)> {
        let mut spend = SpendFact::new();
        let mut without_weeks = 0;

        for campaign in campaigns {
            let channel_id = channels.id_of(&campaign.channel).ok_or_else(|| {
                anyhow::anyhow!("channel '{}' missing from dimension", campaign.channel)
            })?;
            let mut weeks: Vec<NaiveDate> = dates
                .iter()
                .map(|d| d.date_key)
                .filter(|&d| d >= campaign.start_date)
                .take(self.window_weeks)
                .collect();
            // A campaign starting inside the last known week keeps that week.
            if weeks.is_empty() {
                if let Some(last) = dates.last() {
                    if week_start(campaign.start_date) == last.date_key {
                        weeks.push(last.date_key);
                    }
                }
            }

            let assigned = weeks.len();
            for date_key in weeks {
                *spend.entry((date_key, channel_id)).or_insert(0.0) +=
                    campaign.attributable_spend();
            }

            if assigned == 0 {
                without_weeks += 1;
                warn!(
                    campaign_id = %campaign.campaign_id,
                    start_date = %campaign.start_date,
                    "Campaign starts after the last known week, no spend attributed"
                );
            }
        }

        Ok((spend, without_weeks))
    }

    /// Weekly revenue over all transactions. Transactions without a matching
    /// campaign still count; they are only tallied.
    fn revenue_fact(
        campaigns: &[CampaignRecord],
        transactions: &[TransactionRecord],
    ) -> (RevenueFact, usize) {
        let known: HashSet<&str> = campaigns.iter().map(|c| c.campaign_id.as_str()).collect();
        let mut revenue = RevenueFact::new();
        let mut unattributed = 0;

        for tx in transactions {
            if !known.contains(tx.campaign_id.as_str()) {
                unattributed += 1;
            }
            *revenue
                .entry(week_start(tx.timestamp.date()))
                .or_insert(0.0) += tx.gross_revenue;
        }

        (revenue, unattributed)
    }
}
