use std::ops::Range;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::features::{FeatureTable, check_same_keys};
use crate::rows::{GameId, StatLine};
use crate::scoring::Scored;

pub const KEY_COLUMN: &str = "game_id";

/// One modeled row without its join key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub entity: String,
    pub date: NaiveDate,
    pub features: Vec<Option<f64>>,
}

/// Feature rows in date order, with the `game_id` key held beside them so a
/// predictor never sees it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    keys: Vec<GameId>,
    samples: Vec<Sample>,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<String>, keys: Vec<GameId>, samples: Vec<Sample>) -> Result<Self> {
        if keys.len() != samples.len() {
            return Err(PipelineError::missing_column("feature matrix", KEY_COLUMN));
        }
        if let Some(pos) = samples.windows(2).position(|w| w[0].date > w[1].date) {
            return Err(PipelineError::NotTimeOrdered {
                stage: "feature matrix",
                order: "date",
                index: pos + 1,
            });
        }
        if let Some(pos) = samples.iter().position(|s| s.features.len() != columns.len()) {
            return Err(PipelineError::config(format!(
                "sample {pos} has {} features, matrix has {} columns",
                samples[pos].features.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, keys, samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn keys(&self) -> &[GameId] {
        &self.keys
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.samples.iter().map(|s| s.date)
    }

    /// Key-free view over a contiguous range of rows.
    pub fn view(&self, range: Range<usize>) -> FeatureView<'_> {
        FeatureView {
            columns: &self.columns,
            samples: &self.samples[range],
        }
    }

    pub fn full_view(&self) -> FeatureView<'_> {
        self.view(0..self.samples.len())
    }

    /// Splits at the first row dated on or after `from`.
    pub fn split_at_date(self, from: NaiveDate) -> (FeatureMatrix, FeatureMatrix) {
        let idx = self.samples.partition_point(|s| s.date < from);
        let FeatureMatrix {
            columns,
            mut keys,
            mut samples,
        } = self;
        let later_keys = keys.split_off(idx);
        let later_samples = samples.split_off(idx);
        (
            FeatureMatrix {
                columns: columns.clone(),
                keys,
                samples,
            },
            FeatureMatrix {
                columns,
                keys: later_keys,
                samples: later_samples,
            },
        )
    }
}

/// What a predictor is allowed to see.
#[derive(Debug, Clone, Copy)]
pub struct FeatureView<'m> {
    columns: &'m [String],
    samples: &'m [Sample],
}

impl<'m> FeatureView<'m> {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn columns(&self) -> &'m [String] {
        self.columns
    }

    pub fn samples(&self) -> &'m [Sample] {
        self.samples
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, index: usize) -> impl Iterator<Item = Option<f64>> + 'm {
        self.samples
            .iter()
            .map(move |s| s.features.get(index).copied().flatten())
    }
}

/// A feature matrix with its aligned target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub matrix: FeatureMatrix,
    pub target: Vec<f64>,
}

impl Dataset {
    /// Joins scored rows to their features. The feature table must carry
    /// exactly one row per scored row; rows without a score are then left out.
    pub fn assemble<S: StatLine>(scored: &[Scored<S>], features: &FeatureTable) -> Result<Self> {
        features.check_unique()?;
        check_same_keys(&features.name, scored.iter().map(|s| &s.row.game_id), features)?;
        let index = features.index();
        let width = features.columns.len();

        let mut picked: Vec<&Scored<S>> = scored.iter().filter(|s| s.fd_score.is_some()).collect();
        picked.sort_by(|a, b| {
            a.row
                .date
                .cmp(&b.row.date)
                .then_with(|| a.row.player_id.cmp(&b.row.player_id))
                .then_with(|| a.row.game_id.cmp(&b.row.game_id))
        });

        let mut keys = Vec::with_capacity(picked.len());
        let mut samples = Vec::with_capacity(picked.len());
        let mut target = Vec::with_capacity(picked.len());
        for s in picked {
            let Some(score) = s.fd_score else { continue };
            let Some(&idx) = index.get(&s.row.game_id) else { continue };
            let values = features.rows[idx].values.clone();
            keys.push(s.row.game_id.clone());
            samples.push(Sample {
                entity: s.row.player_id.clone(),
                date: s.row.date,
                features: values,
            });
            target.push(score);
        }
        let unscored = scored.len() - target.len();
        debug!(rows = target.len(), unscored, columns = width, "assembled dataset");

        Ok(Self {
            matrix: FeatureMatrix::new(features.columns.clone(), keys, samples)?,
            target,
        })
    }

    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    /// Rows before `from` stay for walk-forward; the rest is held out.
    pub fn split_holdout(self, from: NaiveDate) -> (Dataset, Dataset) {
        let (early, late) = self.matrix.split_at_date(from);
        let mut target = self.target;
        let late_target = target.split_off(early.len());
        (
            Dataset {
                matrix: early,
                target,
            },
            Dataset {
                matrix: late,
                target: late_target,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(entity: &str, day: u32) -> Sample {
        Sample {
            entity: entity.to_string(),
            date: NaiveDate::from_ymd_opt(2016, 4, day).unwrap(),
            features: vec![Some(day as f64)],
        }
    }

    #[test]
    fn matrix_rejects_out_of_order_dates() {
        let err = FeatureMatrix::new(
            vec!["x".into()],
            vec!["a".into(), "b".into()],
            vec![sample("p", 5), sample("p", 3)],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::NotTimeOrdered { index: 1, .. }));
    }

    #[test]
    fn holdout_split_keeps_target_aligned() {
        let matrix = FeatureMatrix::new(
            vec!["x".into()],
            vec!["a".into(), "b".into(), "c".into()],
            vec![sample("p", 1), sample("q", 2), sample("p", 3)],
        )
        .unwrap();
        let data = Dataset {
            matrix,
            target: vec![1.0, 2.0, 3.0],
        };
        let (early, late) = data.split_holdout(NaiveDate::from_ymd_opt(2016, 4, 2).unwrap());
        assert_eq!(early.target, vec![1.0]);
        assert_eq!(late.target, vec![2.0, 3.0]);
        assert_eq!(late.matrix.keys()[0].as_str(), "b");
    }
}
