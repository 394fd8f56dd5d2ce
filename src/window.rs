use std::cmp::Ordering;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::rows::EntityRow;

const SORT_ORDER: &str = "(entity, date, game_id)";

/// How many non-missing prior values a window needs before it yields a mean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "min", rename_all = "snake_case")]
pub enum MinObservations {
    /// Every slot of the window must hold a value.
    #[default]
    FullWindow,
    AtLeast(usize),
}

impl MinObservations {
    pub fn required(self, window: usize) -> usize {
        match self {
            MinObservations::FullWindow => window,
            MinObservations::AtLeast(n) => n.clamp(1, window.max(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPolicy {
    pub rolling: MinObservations,
    /// Minimum prior observations for year-to-date and lifetime means.
    pub expanding_min: usize,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            rolling: MinObservations::FullWindow,
            expanding_min: 1,
        }
    }
}

fn compare_rows<R: EntityRow>(a: &R, b: &R) -> Ordering {
    a.entity()
        .cmp(b.entity())
        .then_with(|| a.date().cmp(&b.date()))
        .then_with(|| a.game_id().cmp(b.game_id()))
}

/// Rows ordered by (entity, date, game_id) with contiguous entity groups.
///
/// Every window computed from a series only looks at rows of the same
/// entity whose date is strictly earlier than the row being filled, so a
/// doubleheader's second game never sees the first.
#[derive(Debug)]
pub struct SortedSeries<'a, R> {
    rows: Vec<&'a R>,
    groups: Vec<Range<usize>>,
}

impl<'a, R: EntityRow> SortedSeries<'a, R> {
    /// Stable sort; input order survives among exact ties.
    pub fn new(rows: &'a [R]) -> Self {
        let mut sorted: Vec<&'a R> = rows.iter().collect();
        sorted.sort_by(|a, b| compare_rows(*a, *b));
        Self::grouped(sorted)
    }

    /// Accepts rows the caller already sorted and rejects them if they are not.
    pub fn from_presorted(rows: &'a [R]) -> Result<Self> {
        if let Some(pos) = rows
            .windows(2)
            .position(|pair| compare_rows(&pair[0], &pair[1]) == Ordering::Greater)
        {
            return Err(PipelineError::NotTimeOrdered {
                stage: "window",
                order: SORT_ORDER,
                index: pos + 1,
            });
        }
        Ok(Self::grouped(rows.iter().collect()))
    }

    fn grouped(rows: Vec<&'a R>) -> Self {
        let mut groups = Vec::new();
        let mut start = 0;
        for idx in 1..=rows.len() {
            if idx == rows.len() || rows[idx].entity() != rows[start].entity() {
                if idx > start {
                    groups.push(start..idx);
                }
                start = idx;
            }
        }
        Self { rows, groups }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[&'a R] {
        &self.rows
    }

    pub fn entity_count(&self) -> usize {
        self.groups.len()
    }

    pub fn groups(&self) -> impl ExactSizeIterator<Item = EntityGroup<'_, 'a, R>> + '_ {
        self.groups.iter().map(|range| EntityGroup {
            rows: &self.rows[range.clone()],
        })
    }
}

/// One entity's rows in date order.
#[derive(Debug)]
pub struct EntityGroup<'s, 'a, R> {
    rows: &'s [&'a R],
}

impl<'a, R: EntityRow> EntityGroup<'_, 'a, R> {
    pub fn rows(&self) -> &[&'a R] {
        self.rows
    }

    pub fn entity(&self) -> &str {
        self.rows.first().map(|r| r.entity()).unwrap_or("")
    }

    /// For each row, the number of rows in this group dated strictly before it.
    pub fn prior_cutoffs(&self) -> Vec<usize> {
        let mut cutoffs = Vec::with_capacity(self.rows.len());
        let mut date_start = 0;
        for (idx, row) in self.rows.iter().enumerate() {
            if idx > 0 && row.date() != self.rows[idx - 1].date() {
                date_start = idx;
            }
            cutoffs.push(date_start);
        }
        cutoffs
    }

    /// For each row, the index of the first row of the same calendar year.
    pub fn year_starts(&self) -> Vec<usize> {
        let mut starts = Vec::with_capacity(self.rows.len());
        let mut year_start = 0;
        for (idx, row) in self.rows.iter().enumerate() {
            if idx > 0 && row.year() != self.rows[idx - 1].year() {
                year_start = idx;
            }
            starts.push(year_start);
        }
        starts
    }

    pub fn column(&self, column: usize) -> ColumnPrefix {
        ColumnPrefix::new(self.rows.iter().map(|r| r.numeric_value(column)))
    }
}

/// Prefix sums and non-missing counts for one column of one entity.
#[derive(Debug, Clone)]
pub struct ColumnPrefix {
    sums: Vec<f64>,
    counts: Vec<usize>,
}

impl ColumnPrefix {
    pub fn new(values: impl Iterator<Item = Option<f64>>) -> Self {
        let (lower, _) = values.size_hint();
        let mut sums = Vec::with_capacity(lower + 1);
        let mut counts = Vec::with_capacity(lower + 1);
        sums.push(0.0);
        counts.push(0);
        let (mut sum, mut count) = (0.0, 0usize);
        for value in values {
            if let Some(v) = value
                && v.is_finite()
            {
                sum += v;
                count += 1;
            }
            sums.push(sum);
            counts.push(count);
        }
        Self { sums, counts }
    }

    /// Mean of the non-missing values in rows `range`, or `None` below `min_count`.
    pub fn mean(&self, range: Range<usize>, min_count: usize) -> Option<f64> {
        if range.start >= range.end {
            return None;
        }
        let count = self.counts[range.end] - self.counts[range.start];
        if count == 0 || count < min_count {
            return None;
        }
        Some((self.sums[range.end] - self.sums[range.start]) / count as f64)
    }

    /// Mean over the last `window` rows before `cutoff`.
    pub fn trailing(&self, cutoff: usize, window: usize, policy: MinObservations) -> Option<f64> {
        if window == 0 {
            return None;
        }
        if policy == MinObservations::FullWindow && cutoff < window {
            return None;
        }
        self.mean(cutoff.saturating_sub(window)..cutoff, policy.required(window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_full_window_needs_every_slot() {
        let col = ColumnPrefix::new([Some(1.0), None, Some(3.0), Some(5.0)].into_iter());
        assert_eq!(col.trailing(2, 2, MinObservations::FullWindow), None);
        assert_eq!(col.trailing(4, 2, MinObservations::FullWindow), Some(4.0));
        assert_eq!(col.trailing(1, 2, MinObservations::FullWindow), None);
        assert_eq!(col.trailing(2, 2, MinObservations::AtLeast(1)), Some(1.0));
        assert_eq!(col.trailing(0, 2, MinObservations::AtLeast(1)), None);
    }

    #[test]
    fn expanding_mean_ignores_missing() {
        let col = ColumnPrefix::new([Some(2.0), None, Some(4.0)].into_iter());
        assert_eq!(col.mean(0..3, 1), Some(3.0));
        assert_eq!(col.mean(1..2, 1), None);
        assert_eq!(col.mean(0..3, 3), None);
    }

    #[test]
    fn required_is_clamped_to_window() {
        assert_eq!(MinObservations::FullWindow.required(7), 7);
        assert_eq!(MinObservations::AtLeast(0).required(7), 1);
        assert_eq!(MinObservations::AtLeast(9).required(7), 7);
    }
}
