//! Persistence of the four star-schema tables as flat CSV files.
//!
//! File names and columns are the stable hand-off format between the
//! preparation run and model training.

use crate::csv::{field, write_table, CsvTable};
use crate::ingest::parse_date;
use mmm_core::error::{MmmError, MmmResult};
use mmm_core::types::{
    ChannelDimension, ChannelId, ChannelRow, DateRow, RevenueFact, SpendFact, StarSchema,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DIM_DATE: &str = "dim_date";
pub const DIM_CHANNEL: &str = "dim_channel";
pub const FACT_MARKETING: &str = "fact_marketing";
pub const FACT_REVENUE: &str = "fact_revenue";

const TABLES: [&str; 4] = [DIM_DATE, DIM_CHANNEL, FACT_MARKETING, FACT_REVENUE];

const DIM_DATE_COLUMNS: &[&str] = &["date_key", "year", "week"];
const DIM_CHANNEL_COLUMNS: &[&str] = &["channel_name", "channel_id"];
const FACT_MARKETING_COLUMNS: &[&str] = &["date_key", "channel_id", "spend"];
const FACT_REVENUE_COLUMNS: &[&str] = &["date_key", "revenue"];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Directory holding the processed tables.
#[derive(Debug, Clone)]
pub struct TableStore {
    dir: PathBuf,
}

impl TableStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.csv"))
    }

    /// Write all four tables. Each is staged to a `.tmp` sibling and the set
    /// is renamed into place only after every write succeeded. A failure while
    /// renaming puts the previous tables back.
    pub fn save(&self, schema: &StarSchema) -> MmmResult<()> {
        fs::create_dir_all(&self.dir)?;

        let staged = [
            (DIM_DATE, self.stage(DIM_DATE, DIM_DATE_COLUMNS, date_rows(schema))),
            (
                DIM_CHANNEL,
                self.stage(DIM_CHANNEL, DIM_CHANNEL_COLUMNS, channel_rows(schema)),
            ),
            (
                FACT_MARKETING,
                self.stage(FACT_MARKETING, FACT_MARKETING_COLUMNS, spend_rows(schema)),
            ),
            (
                FACT_REVENUE,
                self.stage(FACT_REVENUE, FACT_REVENUE_COLUMNS, revenue_rows(schema)),
            ),
        ];

        if let Some((table, Err(e))) = staged.iter().find(|(_, r)| r.is_err()) {
            warn!(table = %table, error = %e, "Table write failed, discarding staged tables");
            for (table, _) in &staged {
                let _ = fs::remove_file(self.staging_path(table));
            }
            return Err(MmmError::Io(std::io::Error::new(e.kind(), e.to_string())));
        }

        self.swap_in()?;

        info!(
            dir = %self.dir.display(),
            weeks = schema.dates.len(),
            channels = schema.channels.len(),
            spend_rows = schema.spend.len(),
            revenue_weeks = schema.revenue.len(),
            "Tables saved"
        );
        Ok(())
    }

    /// Read all four tables back, validating headers, rows, and that every
    /// spend row references a known channel.
    pub fn load(&self) -> MmmResult<StarSchema> {
        let dates = self.load_dates()?;
        let channels = self.load_channels()?;
        let spend = self.load_spend(&channels)?;
        let revenue = self.load_revenue()?;

        debug!(dir = %self.dir.display(), "Tables loaded");
        Ok(StarSchema {
            dates,
            channels,
            spend,
            revenue,
        })
    }

    fn staging_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.csv.tmp"))
    }

    fn backup_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.csv.bak"))
    }

    /// Replace the live tables with the staged set, all or nothing.
    fn swap_in(&self) -> MmmResult<()> {
        let mut backed_up = Vec::new();
        let mut installed = Vec::new();

        if let Err(e) = self.rename_staged(&mut backed_up, &mut installed) {
            warn!(error = %e, "Table swap failed, restoring previous tables");
            for table in &installed {
                let _ = fs::remove_file(self.path_of(table));
            }
            for table in &backed_up {
                let _ = fs::rename(self.backup_path(table), self.path_of(table));
            }
            for table in TABLES {
                let _ = fs::remove_file(self.staging_path(table));
            }
            return Err(MmmError::Io(e));
        }

        for table in &backed_up {
            let _ = fs::remove_file(self.backup_path(table));
        }
        Ok(())
    }

    fn rename_staged(
        &self,
        backed_up: &mut Vec<&'static str>,
        installed: &mut Vec<&'static str>,
    ) -> std::io::Result<()> {
        for table in TABLES {
            let live = self.path_of(table);
            if live.exists() {
                fs::rename(&live, self.backup_path(table))?;
                backed_up.push(table);
            }
            fs::rename(self.staging_path(table), &live)?;
            installed.push(table);
        }
        Ok(())
    }

    fn stage(
        &self,
        table: &str,
        header: &[&str],
        rows: Vec<Vec<String>>,
    ) -> std::io::Result<()> {
        write_table(&self.staging_path(table), header, rows)
    }

    fn read(&self, table: &str) -> MmmResult<CsvTable> {
        CsvTable::read(table, &self.path_of(table))
    }

    fn load_dates(&self) -> MmmResult<Vec<DateRow>> {
        let table = self.read(DIM_DATE)?;
        let cols = table.require(DIM_DATE_COLUMNS)?;
        let mut rows = Vec::with_capacity(table.len());
        for (line, fields) in table.rows() {
            rows.push(DateRow {
                date_key: parse_key(&table, line, field(fields, cols[0]))?,
                year: parse_number(&table, line, "year", field(fields, cols[1]))?,
                week: parse_number(&table, line, "week", field(fields, cols[2]))?,
            });
        }
        rows.sort_by_key(|r| r.date_key);
        Ok(rows)
    }

    fn load_channels(&self) -> MmmResult<ChannelDimension> {
        let table = self.read(DIM_CHANNEL)?;
        let cols = table.require(DIM_CHANNEL_COLUMNS)?;
        let mut rows: Vec<ChannelRow> = Vec::with_capacity(table.len());
        for (line, fields) in table.rows() {
            let channel_name = field(fields, cols[0]).to_string();
            let channel_id: ChannelId =
                parse_number(&table, line, "channel_id", field(fields, cols[1]))?;
            if channel_name.is_empty() || channel_id == 0 {
                return Err(MmmError::invalid_record(
                    &table.name,
                    line,
                    "channel rows need a name and a positive id",
                ));
            }
            if rows
                .iter()
                .any(|r| r.channel_id == channel_id || r.channel_name == channel_name)
            {
                return Err(MmmError::invalid_record(
                    &table.name,
                    line,
                    format!("duplicate channel '{channel_name}' ({channel_id})"),
                ));
            }
            rows.push(ChannelRow {
                channel_id,
                channel_name,
            });
        }
        Ok(ChannelDimension::from_rows(rows))
    }

    fn load_spend(&self, channels: &ChannelDimension) -> MmmResult<SpendFact> {
        let table = self.read(FACT_MARKETING)?;
        let cols = table.require(FACT_MARKETING_COLUMNS)?;
        let mut spend = SpendFact::new();
        for (line, fields) in table.rows() {
            let date_key = parse_key(&table, line, field(fields, cols[0]))?;
            let channel_id: ChannelId =
                parse_number(&table, line, "channel_id", field(fields, cols[1]))?;
            if channels.name_of(channel_id).is_none() {
                return Err(MmmError::invalid_record(
                    &table.name,
                    line,
                    format!("unknown channel_id {channel_id}"),
                ));
            }
            let value = parse_money(&table, line, "spend", field(fields, cols[2]))?;
            *spend.entry((date_key, channel_id)).or_insert(0.0) += value;
        }
        Ok(spend)
    }

    fn load_revenue(&self) -> MmmResult<RevenueFact> {
        let table = self.read(FACT_REVENUE)?;
        let cols = table.require(FACT_REVENUE_COLUMNS)?;
        let mut revenue = RevenueFact::new();
        for (line, fields) in table.rows() {
            let date_key = parse_key(&table, line, field(fields, cols[0]))?;
            let value = parse_money(&table, line, "revenue", field(fields, cols[1]))?;
            *revenue.entry(date_key).or_insert(0.0) += value;
        }
        Ok(revenue)
    }
}

fn date_rows(schema: &StarSchema) -> Vec<Vec<String>> {
    schema
        .dates
        .iter()
        .map(|d| {
            vec![
                d.date_key.format(DATE_FORMAT).to_string(),
                d.year.to_string(),
                d.week.to_string(),
            ]
        })
        .collect()
}

fn channel_rows(schema: &StarSchema) -> Vec<Vec<String>> {
    schema
        .channels
        .rows()
        .iter()
        .map(|c| vec![c.channel_name.clone(), c.channel_id.to_string()])
        .collect()
}

fn spend_rows(schema: &StarSchema) -> Vec<Vec<String>> {
    schema
        .spend
        .iter()
        .map(|((date_key, channel_id), spend)| {
            vec![
                date_key.format(DATE_FORMAT).to_string(),
                channel_id.to_string(),
                spend.to_string(),
            ]
        })
        .collect()
}

fn revenue_rows(schema: &StarSchema) -> Vec<Vec<String>> {
    schema
        .revenue
        .iter()
        .map(|(date_key, revenue)| {
            vec![
                date_key.format(DATE_FORMAT).to_string(),
                revenue.to_string(),
            ]
        })
        .collect()
}

fn parse_key(table: &CsvTable, line: usize, raw: &str) -> MmmResult<chrono::NaiveDate> {
    parse_date(raw).ok_or_else(|| {
        MmmError::invalid_record(&table.name, line, format!("unparseable date_key '{raw}'"))
    })
}

fn parse_number<T: std::str::FromStr>(
    table: &CsvTable,
    line: usize,
    column: &str,
    raw: &str,
) -> MmmResult<T> {
    raw.parse().map_err(|_| {
        MmmError::invalid_record(&table.name, line, format!("{column} is not valid: '{raw}'"))
    })
}

fn parse_money(table: &CsvTable, line: usize, column: &str, raw: &str) -> MmmResult<f64> {
    let value: f64 = parse_number(table, line, column, raw)?;
    if !value.is_finite() || value < 0.0 {
        return Err(MmmError::invalid_record(
            &table.name,
            line,
            format!("{column} must be a finite non-negative number, got {raw}"),
        ));
    }
    Ok(value)
}
