//! Feature matrix assembly: pivot the spend fact to one column per channel and
//! inner-join it with weekly revenue.

use mmm_core::error::{MmmError, MmmResult};
use mmm_core::types::{ChannelId, StarSchema, TrainingRow, TrainingSet};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

pub struct FeatureMatrixAssembler;

impl FeatureMatrixAssembler {
    /// Build the training set.
    ///
    /// Columns follow the channel dimension in ascending id order, so a
    /// channel without any spend still gets an all-zero column. A week appears
    /// only if it has at least one spend row and a revenue value.
    pub fn assemble(schema: &StarSchema) -> MmmResult<TrainingSet> {
        let channels = schema.channels.rows().to_vec();
        let column_of: HashMap<ChannelId, usize> = channels
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.channel_id, idx))
            .collect();

        let mut pivot: BTreeMap<_, Vec<f64>> = BTreeMap::new();
        for (&(date_key, channel_id), &spend) in &schema.spend {
            let col = *column_of.get(&channel_id).ok_or_else(|| {
                anyhow::anyhow!("spend fact references unknown channel id {channel_id}")
            })?;
            pivot
                .entry(date_key)
                .or_insert_with(|| vec![0.0; channels.len()])[col] += spend;
        }

        let spend_weeks = pivot.len();
        let rows: Vec<TrainingRow> = pivot
            .into_iter()
            .filter_map(|(date_key, spend)| {
                schema.revenue.get(&date_key).map(|&revenue| TrainingRow {
                    date_key,
                    spend,
                    revenue,
                })
            })
            .collect();

        debug!(
            spend_weeks = spend_weeks,
            revenue_weeks = schema.revenue.len(),
            joined = rows.len(),
            "Pivoted spend joined to revenue"
        );

        if rows.is_empty() {
            return Err(MmmError::EmptyTrainingSet);
        }

        info!(
            rows = rows.len(),
            channels = channels.len(),
            "Training matrix assembled"
        );

        Ok(TrainingSet { channels, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mmm_core::types::{ChannelDimension, RevenueFact, SpendFact};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn schema(spend: &[(NaiveDate, ChannelId, f64)], revenue: &[(NaiveDate, f64)]) -> StarSchema {
        StarSchema {
            dates: vec![],
            channels: ChannelDimension::from_names(["email", "search", "tv"]),
            spend: spend
                .iter()
                .map(|&(d, c, s)| ((d, c), s))
                .collect::<SpendFact>(),
            revenue: revenue.iter().copied().collect::<RevenueFact>(),
        }
    }

    #[test]
    fn test_pivot_fills_missing_with_zero() {
        let s = schema(
            &[
                (date(2024, 1, 1), 1, 100.0),
                (date(2024, 1, 1), 2, 50.0),
                (date(2024, 1, 8), 2, 25.0),
            ],
            &[(date(2024, 1, 1), 1000.0), (date(2024, 1, 8), 400.0)],
        );
        let set = FeatureMatrixAssembler::assemble(&s).unwrap();

        assert_eq!(set.channel_ids(), vec![1, 2, 3]);
        assert_eq!(set.rows.len(), 2);
        assert_eq!(set.rows[0].spend, vec![100.0, 50.0, 0.0]);
        assert_eq!(set.rows[1].spend, vec![0.0, 25.0, 0.0]);
        assert!((set.rows[1].revenue - 400.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_inner_join_drops_unmatched_weeks() {
        let s = schema(
            &[(date(2024, 1, 1), 1, 100.0), (date(2024, 1, 8), 1, 100.0)],
            &[(date(2024, 1, 8), 10.0), (date(2024, 1, 15), 99.0)],
        );
        let set = FeatureMatrixAssembler::assemble(&s).unwrap();
        assert_eq!(set.rows.len(), 1);
        assert_eq!(set.rows[0].date_key, date(2024, 1, 8));
    }

    #[test]
    fn test_rows_sorted_by_week() {
        let s = schema(
            &[(date(2024, 2, 5), 3, 1.0), (date(2024, 1, 1), 1, 1.0)],
            &[(date(2024, 1, 1), 1.0), (date(2024, 2, 5), 2.0)],
        );
        let set = FeatureMatrixAssembler::assemble(&s).unwrap();
        assert!(set.rows[0].date_key < set.rows[1].date_key);
    }

    #[test]
    fn test_no_overlap_is_empty_training_set() {
        let s = schema(
            &[(date(2024, 1, 1), 1, 100.0)],
            &[(date(2024, 3, 4), 10.0)],
        );
        assert!(matches!(
            FeatureMatrixAssembler::assemble(&s),
            Err(MmmError::EmptyTrainingSet)
        ));
    }

    #[test]
    fn test_unknown_channel_is_rejected() {
        let s = schema(&[(date(2024, 1, 1), 42, 1.0)], &[(date(2024, 1, 1), 1.0)]);
        assert!(matches!(
            FeatureMatrixAssembler::assemble(&s),
            Err(MmmError::Internal(_))
        ));
    }
}
