use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::dataset::FeatureView;
use crate::error::{PipelineError, Result};
use crate::validation::Predictor;

/// Predicts a player's next score as the moving average of their last
/// `window` scores seen in training.
///
/// Lookups compare calendar dates only, so for two games an entity played
/// on the same day (doubleheaders) the entry used is whichever sits last in
/// the table for that date. Neither game can see the other, but the order
/// between them is not defined.
#[derive(Debug, Clone)]
pub struct MovingAveragePredictor {
    window: usize,
    table: HashMap<String, Vec<(NaiveDate, f64)>>,
    fallback: f64,
}

impl MovingAveragePredictor {
    pub fn new(window: usize) -> Result<Self> {
        if window == 0 {
            return Err(PipelineError::config("baseline window must be at least 1"));
        }
        Ok(Self {
            window,
            table: HashMap::new(),
            fallback: 0.0,
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Mean of the training target; returned when an entity has no earlier entry.
    pub fn fallback(&self) -> f64 {
        self.fallback
    }

    pub fn entities(&self) -> usize {
        self.table.len()
    }

    /// `None` when the entity has no entry dated before `date`.
    pub fn lookup(&self, entity: &str, date: NaiveDate) -> Option<f64> {
        let entries = self.table.get(entity)?;
        let idx = entries.partition_point(|(d, _)| *d < date);
        if idx == 0 {
            return None;
        }
        let value = entries[idx - 1].1;
        value.is_finite().then_some(value)
    }

    pub fn predict_one(&self, entity: &str, date: NaiveDate) -> f64 {
        self.lookup(entity, date).unwrap_or(self.fallback)
    }
}

impl Predictor for MovingAveragePredictor {
    fn fit(&mut self, x: &FeatureView<'_>, y: &[f64]) -> Result<()> {
        if x.len() != y.len() {
            return Err(PipelineError::MisalignedTarget {
                rows: x.len(),
                target: y.len(),
            });
        }
        if y.is_empty() {
            return Err(PipelineError::NotEnoughSamples { needed: 1, got: 0 });
        }

        let mut by_entity: HashMap<&str, Vec<(NaiveDate, f64)>> = HashMap::new();
        let mut skipped = 0usize;
        for (sample, &score) in x.samples().iter().zip(y) {
            if !score.is_finite() {
                skipped += 1;
                continue;
            }
            by_entity.entry(sample.entity.as_str()).or_default().push((sample.date, score));
        }

        if skipped > 0 {
            warn!(skipped, "non-finite targets left out of moving averages");
        }

        self.table.clear();
        for (entity, mut games) in by_entity {
            games.sort_by_key(|(d, _)| *d);
            let mut averaged = Vec::with_capacity(games.len());
            let mut sum = 0.0;
            for (idx, &(date, score)) in games.iter().enumerate() {
                sum += score;
                if idx >= self.window {
                    sum -= games[idx - self.window].1;
                }
                let count = (idx + 1).min(self.window);
                averaged.push((date, sum / count as f64));
            }
            self.table.insert(entity.to_string(), averaged);
        }
        let finite: Vec<f64> = y.iter().copied().filter(|v| v.is_finite()).collect();
        self.fallback = if finite.is_empty() {
            0.0
        } else {
            finite.iter().sum::<f64>() / finite.len() as f64
        };
        debug!(entities = self.table.len(), rows = y.len(), fallback = self.fallback, "fitted moving average");
        Ok(())
    }

    fn predict(&self, x: &FeatureView<'_>) -> Vec<f64> {
        let mut fallbacks = 0usize;
        let out = x
            .samples()
            .iter()
            .map(|s| match self.lookup(&s.entity, s.date) {
                Some(v) => v,
                None => {
                    fallbacks += 1;
                    self.fallback
                }
            })
            .collect();
        if fallbacks > 0 {
            debug!(fallbacks, rows = x.len(), "baseline fell back to training mean");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{FeatureMatrix, Sample};
    use crate::rows::GameId;

    fn matrix(rows: &[(&str, u32)]) -> FeatureMatrix {
        let samples = rows
            .iter()
            .map(|(e, d)| Sample {
                entity: e.to_string(),
                date: NaiveDate::from_ymd_opt(2016, 5, *d).unwrap(),
                features: vec![],
            })
            .collect();
        let keys = rows.iter().map(|(e, d)| GameId::from(format!("{d}_{e}").as_str())).collect();
        FeatureMatrix::new(vec![], keys, samples).unwrap()
    }

    #[test]
    fn uses_strictly_earlier_entries() {
        let m = matrix(&[("a", 1), ("a", 2), ("a", 3), ("b", 3)]);
        let mut p = MovingAveragePredictor::new(2).unwrap();
        p.fit(&m.full_view(), &[2.0, 4.0, 10.0, 6.0]).unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2016, 5, d).unwrap();
        assert_eq!(p.predict_one("a", day(1)), 5.5);
        assert_eq!(p.predict_one("a", day(2)), 2.0);
        assert_eq!(p.predict_one("a", day(3)), 3.0);
        assert_eq!(p.predict_one("a", day(9)), 7.0);
    }

    #[test]
    fn unseen_entity_gets_training_mean() {
        let m = matrix(&[("a", 1), ("a", 2)]);
        let mut p = MovingAveragePredictor::new(3).unwrap();
        p.fit(&m.full_view(), &[1.0, 3.0]).unwrap();
        let v = p.predict_one("zz", NaiveDate::from_ymd_opt(2016, 5, 4).unwrap());
        assert_eq!(v, 2.0);
        assert!(v.is_finite());
    }

    #[test]
    fn non_finite_targets_do_not_poison_the_window() {
        let m = matrix(&[("a", 1), ("a", 2), ("a", 3), ("b", 1)]);
        let mut p = MovingAveragePredictor::new(2).unwrap();
        p.fit(&m.full_view(), &[2.0, f64::NAN, 6.0, f64::INFINITY]).unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2016, 5, d).unwrap();
        assert_eq!(p.fallback(), 4.0);
        assert_eq!(p.lookup("a", day(3)), Some(2.0));
        assert_eq!(p.lookup("a", day(4)), Some(4.0));
        // only a non-finite game: nothing to look up
        assert_eq!(p.lookup("b", day(2)), None);
        assert_eq!(p.predict_one("b", day(2)), 4.0);
    }

    #[test]
    fn zero_window_is_rejected() {
        assert!(MovingAveragePredictor::new(0).is_err());
    }
}
