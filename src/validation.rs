use std::ops::{ControlFlow, Range};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::{FeatureMatrix, FeatureView};
use crate::error::{PipelineError, Result};
use crate::rows::GameId;

/// Anything that can be fitted on one slice of a feature matrix and scored
/// on another. Refit from scratch on every call to `fit`.
pub trait Predictor {
    fn fit(&mut self, x: &FeatureView<'_>, y: &[f64]) -> Result<()>;
    fn predict(&self, x: &FeatureView<'_>) -> Vec<f64>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub column: String,
    pub score: f64,
}

/// Summarizes which features drive the target on a training slice.
pub trait FeatureExplainer {
    fn explain(&self, x: &FeatureView<'_>, y: &[f64]) -> Vec<FeatureImportance>;
}

/// Absolute Pearson correlation between each feature and the target, over
/// the rows where the feature is present.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationExplainer;

impl FeatureExplainer for CorrelationExplainer {
    fn explain(&self, x: &FeatureView<'_>, y: &[f64]) -> Vec<FeatureImportance> {
        let mut out: Vec<FeatureImportance> = x
            .columns()
            .iter()
            .enumerate()
            .filter_map(|(idx, name)| {
                let pairs: Vec<(f64, f64)> = x
                    .column(idx)
                    .zip(y.iter().copied())
                    .filter_map(|(v, t)| v.map(|v| (v, t)))
                    .collect();
                pearson(&pairs).map(|r| FeatureImportance {
                    column: name.clone(),
                    score: r.abs(),
                })
            })
            .collect();
        out.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.column.cmp(&b.column)));
        out
    }
}

fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

pub fn mean_absolute_error(predicted: &[f64], actual: &[f64]) -> f64 {
    let n = predicted.len().min(actual.len());
    if n == 0 {
        return 0.0;
    }
    predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a).abs())
        .sum::<f64>()
        / n as f64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldSplit {
    pub fold_index: usize,
    pub train: Range<usize>,
    pub test: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub fold_index: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
    pub train_mae: f64,
    pub test_mae: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub game_id: GameId,
    pub fold_index: usize,
    pub predicted: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub requested_folds: usize,
    pub folds: Vec<FoldMetrics>,
    pub predictions: Vec<PredictionResult>,
    pub mean_train_mae: f64,
    pub mean_test_mae: f64,
    /// Folds dropped because date snapping left them empty or repeated.
    pub skipped_folds: usize,
    pub stopped_early: bool,
    pub top_features: Vec<FeatureImportance>,
}

impl ValidationReport {
    /// Predictions from the last completed fold.
    pub fn final_predictions(&self) -> impl Iterator<Item = &PredictionResult> {
        let last = self.folds.last().map(|f| f.fold_index);
        self.predictions
            .iter()
            .filter(move |p| Some(p.fold_index) == last)
    }
}

/// Expanding-window, forward-chaining cross validation over a
/// date-ordered feature matrix.
pub struct WalkForwardValidator {
    folds: usize,
    explainer: Option<Box<dyn FeatureExplainer + Send + Sync>>,
    top_features: usize,
}

impl WalkForwardValidator {
    /// `0` asks for one fold per row boundary; anything below 2 becomes 2.
    pub fn new(folds: usize) -> Self {
        Self {
            folds,
            explainer: None,
            top_features: 10,
        }
    }

    pub fn with_explainer(mut self, explainer: impl FeatureExplainer + Send + Sync + 'static, top: usize) -> Self {
        self.explainer = Some(Box::new(explainer));
        self.top_features = top;
        self
    }

    pub fn effective_folds(&self, n: usize) -> usize {
        let k = if self.folds == 0 { n.saturating_sub(1) } else { self.folds };
        k.max(2)
    }

    /// Fold boundaries over `dates`, which must be non-decreasing. A boundary
    /// that lands inside a run of equal dates moves back to the run's start,
    /// so every training date is strictly earlier than every test date.
    pub fn split(&self, dates: &[NaiveDate]) -> Result<(Vec<FoldSplit>, usize)> {
        if let Some(pos) = dates.windows(2).position(|w| w[0] > w[1]) {
            return Err(PipelineError::NotTimeOrdered {
                stage: "walk-forward",
                order: "date",
                index: pos + 1,
            });
        }
        let n = dates.len();
        let k = self.effective_folds(n);
        if n < k + 1 {
            return Err(PipelineError::NotEnoughSamples { needed: k + 1, got: n });
        }
        let test_size = n / (k + 1);
        let snap = |mut b: usize| {
            while b > 0 && b < n && dates[b - 1] == dates[b] {
                b -= 1;
            }
            b
        };

        let mut splits = Vec::with_capacity(k);
        let mut skipped = 0;
        let mut last_start = None;
        for i in 0..k {
            let raw_start = n - (k - i) * test_size;
            let raw_end = if i + 1 == k { n } else { raw_start + test_size };
            let start = snap(raw_start);
            let end = snap(raw_end);
            if start == 0 || end <= start || last_start == Some(start) {
                debug!(fold = i, raw_start, start, end, "skipping degenerate fold");
                skipped += 1;
                continue;
            }
            last_start = Some(start);
            splits.push(FoldSplit {
                fold_index: splits.len(),
                train: 0..start,
                test: start..end,
            });
        }
        if skipped > 0 {
            warn!(skipped, requested = k, "folds collapsed by same-date boundaries");
        }
        Ok((splits, skipped))
    }

    pub fn run<P: Predictor>(&self, matrix: &FeatureMatrix, target: &[f64], predictor: &mut P) -> Result<ValidationReport> {
        self.run_with(matrix, target, predictor, |_| ControlFlow::Continue(()))
    }

    /// Like `run`, but `on_fold` sees each fold's metrics as they are
    /// computed and may stop the loop early.
    pub fn run_with<P, F>(
        &self,
        matrix: &FeatureMatrix,
        target: &[f64],
        predictor: &mut P,
        mut on_fold: F,
    ) -> Result<ValidationReport>
    where
        P: Predictor,
        F: FnMut(&FoldMetrics) -> ControlFlow<()>,
    {
        if target.len() != matrix.len() {
            return Err(PipelineError::MisalignedTarget {
                rows: matrix.len(),
                target: target.len(),
            });
        }
        let dates: Vec<NaiveDate> = matrix.dates().collect();
        let (splits, skipped) = self.split(&dates)?;

        let mut report = ValidationReport {
            requested_folds: self.effective_folds(dates.len()),
            skipped_folds: skipped,
            ..ValidationReport::default()
        };
        let mut last_train: Option<Range<usize>> = None;

        for split in &splits {
            let train_view = matrix.view(split.train.clone());
            let test_view = matrix.view(split.test.clone());
            let train_y = &target[split.train.clone()];
            let test_y = &target[split.test.clone()];

            predictor.fit(&train_view, train_y)?;
            let train_pred = predictor.predict(&train_view);
            let test_pred = predictor.predict(&test_view);

            let metrics = FoldMetrics {
                fold_index: split.fold_index,
                train_rows: split.train.len(),
                test_rows: split.test.len(),
                train_end: dates[split.train.end - 1],
                test_start: dates[split.test.start],
                test_end: dates[split.test.end - 1],
                train_mae: mean_absolute_error(&train_pred, train_y),
                test_mae: mean_absolute_error(&test_pred, test_y),
            };
            info!(
                fold = metrics.fold_index,
                train_rows = metrics.train_rows,
                test_rows = metrics.test_rows,
                train_mae = metrics.train_mae,
                test_mae = metrics.test_mae,
                "fold complete"
            );

            let keys = &matrix.keys()[split.test.clone()];
            report.predictions.extend(keys.iter().zip(test_pred.iter().zip(test_y)).map(
                |(key, (&predicted, &actual))| PredictionResult {
                    game_id: key.clone(),
                    fold_index: split.fold_index,
                    predicted,
                    actual,
                },
            ));
            last_train = Some(split.train.clone());
            let flow = on_fold(&metrics);
            report.folds.push(metrics);
            if flow.is_break() {
                report.stopped_early = report.folds.len() < splits.len();
                if report.stopped_early {
                    info!(completed = report.folds.len(), planned = splits.len(), "walk-forward stopped early");
                }
                break;
            }
        }

        if !report.folds.is_empty() {
            let n = report.folds.len() as f64;
            report.mean_train_mae = report.folds.iter().map(|f| f.train_mae).sum::<f64>() / n;
            report.mean_test_mae = report.folds.iter().map(|f| f.test_mae).sum::<f64>() / n;
        }
        if let (Some(explainer), Some(train)) = (&self.explainer, last_train) {
            let mut ranked = explainer.explain(&matrix.view(train.clone()), &target[train]);
            ranked.truncate(self.top_features);
            report.top_features = ranked;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn days(ds: &[u32]) -> Vec<NaiveDate> {
        ds.iter()
            .map(|d| NaiveDate::from_ymd_opt(2016, 4, *d).unwrap())
            .collect()
    }

    #[test]
    fn split_sizes_follow_expanding_window() {
        let dates = days(&(1..=10).collect::<Vec<_>>());
        let (splits, skipped) = WalkForwardValidator::new(4).split(&dates).unwrap();
        assert_eq!(skipped, 0);
        let tests: Vec<_> = splits.iter().map(|s| s.test.clone()).collect();
        assert_eq!(tests, vec![2..4, 4..6, 6..8, 8..10]);
        assert!(splits.iter().all(|s| s.train == (0..s.test.start)));
    }

    #[test]
    fn boundary_inside_same_date_moves_back() {
        let dates = days(&[1, 2, 2, 3, 4, 5]);
        let (splits, _) = WalkForwardValidator::new(2).split(&dates).unwrap();
        assert_eq!(splits[0].train, 0..1);
        assert_eq!(splits[0].test, 1..4);
        assert_eq!(splits[1].test, 4..6);
    }

    #[test]
    fn pearson_detects_perfect_inverse() {
        let r = pearson(&[(1.0, 3.0), (2.0, 2.0), (3.0, 1.0)]).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&[(1.0, 1.0), (1.0, 2.0)]), None);
    }
}
