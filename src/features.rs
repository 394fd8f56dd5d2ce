use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::rows::{EntityRow, GameId};
use crate::window::{ColumnPrefix, EntityGroup, SortedSeries, WindowPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub game_id: GameId,
    pub values: Vec<Option<f64>>,
}

/// `game_id` plus one family of feature columns. `None` marks a value with
/// not enough prior history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row(&self, game_id: &GameId) -> Option<&FeatureRow> {
        self.rows.iter().find(|r| &r.game_id == game_id)
    }

    pub fn value(&self, game_id: &GameId, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.row(game_id)?.values.get(idx).copied().flatten()
    }

    /// Exactly one row per `game_id`, or the offending keys.
    pub fn check_unique(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.rows.len());
        let mut dupes: Vec<String> = Vec::new();
        for row in &self.rows {
            if !seen.insert(&row.game_id) {
                dupes.push(row.game_id.to_string());
            }
        }
        if dupes.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::CardinalityViolation {
                table: self.name.clone(),
                keys: dupes,
            })
        }
    }

    pub fn index(&self) -> HashMap<&GameId, usize> {
        self.rows
            .iter()
            .enumerate()
            .map(|(idx, row)| (&row.game_id, idx))
            .collect()
    }
}

/// Fails unless `keys` and `other` hold exactly the same `game_id` set,
/// naming every key that has no partner on the opposite side.
pub fn check_same_keys<'k>(table: &str, keys: impl IntoIterator<Item = &'k GameId>, other: &FeatureTable) -> Result<()> {
    let theirs: HashSet<&GameId> = other.rows.iter().map(|row| &row.game_id).collect();
    let ours: HashSet<&GameId> = keys.into_iter().collect();
    let mut unmatched: Vec<String> = ours
        .iter()
        .filter(|&&key| !theirs.contains(key))
        .map(|key| key.to_string())
        .collect();
    unmatched.extend(
        theirs
            .iter()
            .filter(|&&key| !ours.contains(key))
            .map(|key| key.to_string()),
    );
    if unmatched.is_empty() {
        return Ok(());
    }
    unmatched.sort();
    Err(PipelineError::CardinalityViolation {
        table: table.to_string(),
        keys: unmatched,
    })
}

/// Joins every table onto the first by `game_id`. Every table must hold
/// exactly one row per key of the first.
pub fn merge_tables(name: &str, tables: &[FeatureTable]) -> Result<FeatureTable> {
    let Some((base, rest)) = tables.split_first() else {
        return Ok(FeatureTable {
            name: name.to_string(),
            ..FeatureTable::default()
        });
    };
    base.check_unique()?;
    let mut columns = base.columns.clone();
    let mut seen_columns: HashSet<&str> = base.columns.iter().map(String::as_str).collect();
    for table in rest {
        table.check_unique()?;
        for col in &table.columns {
            if !seen_columns.insert(col) {
                return Err(PipelineError::config(format!(
                    "feature column `{col}` produced by more than one table"
                )));
            }
        }
        columns.extend(table.columns.iter().cloned());
    }

    for table in rest {
        check_same_keys(&table.name, base.rows.iter().map(|r| &r.game_id), table)?;
    }

    let indexes: Vec<HashMap<&GameId, usize>> = rest.iter().map(FeatureTable::index).collect();
    let mut rows = Vec::with_capacity(base.rows.len());
    for row in &base.rows {
        let mut values = row.values.clone();
        for (table, index) in rest.iter().zip(&indexes) {
            if let Some(&idx) = index.get(&row.game_id) {
                values.extend(table.rows[idx].values.iter().copied());
            }
        }
        rows.push(FeatureRow {
            game_id: row.game_id.clone(),
            values,
        });
    }
    Ok(FeatureTable {
        name: name.to_string(),
        columns,
        rows,
    })
}

/// Per-entity state shared by every feature family.
struct GroupWindows {
    columns: Vec<ColumnPrefix>,
    cutoffs: Vec<usize>,
    year_starts: Vec<usize>,
}

impl GroupWindows {
    fn new<R: EntityRow>(group: &EntityGroup<'_, '_, R>) -> Self {
        Self {
            columns: (0..R::NUMERIC_COLUMNS.len()).map(|c| group.column(c)).collect(),
            cutoffs: group.prior_cutoffs(),
            year_starts: group.year_starts(),
        }
    }
}

/// Leak-free rolling, year-to-date and lifetime means over an entity's
/// strictly earlier games. Each family is returned as its own table.
pub struct FeatureEngineer<'a, R> {
    series: SortedSeries<'a, R>,
    policy: WindowPolicy,
}

impl<'a, R: EntityRow> FeatureEngineer<'a, R> {
    pub fn new(rows: &'a [R]) -> Result<Self> {
        Self::with_policy(rows, WindowPolicy::default())
    }

    pub fn with_policy(rows: &'a [R], policy: WindowPolicy) -> Result<Self> {
        if let Some(idx) = rows.iter().position(|r| r.entity().trim().is_empty()) {
            warn!(row = idx, "row without player id reached feature stage");
            return Err(PipelineError::missing_column("features", "player_id"));
        }
        if policy.expanding_min == 0 {
            return Err(PipelineError::config("expanding_min must be at least 1"));
        }
        Ok(Self {
            series: SortedSeries::new(rows),
            policy,
        })
    }

    pub fn series(&self) -> &SortedSeries<'a, R> {
        &self.series
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    /// `{column}_rolling_{window}` for every window, column.
    pub fn calc_rolling_avg(&self, windows: &[usize]) -> Result<FeatureTable> {
        if windows.is_empty() {
            return Err(PipelineError::config("no rolling windows requested"));
        }
        if windows.contains(&0) {
            return Err(PipelineError::config("rolling window of 0 games"));
        }
        let columns = windows
            .iter()
            .flat_map(|w| R::NUMERIC_COLUMNS.iter().map(move |c| format!("{c}_rolling_{w}")))
            .collect();
        let policy = self.policy.rolling;
        Ok(self.per_group("rolling", columns, |ctx, i, values| {
            for &w in windows {
                values.extend(ctx.columns.iter().map(|col| col.trailing(ctx.cutoffs[i], w, policy)));
            }
        }))
    }

    /// `{column}_ytd_avg`, reset at each calendar year.
    pub fn calc_ytd_avgs(&self) -> FeatureTable {
        let columns = suffixed::<R>("ytd_avg");
        let min = self.policy.expanding_min;
        self.per_group("ytd", columns, |ctx, i, values| {
            let range = ctx.year_starts[i]..ctx.cutoffs[i];
            values.extend(ctx.columns.iter().map(|col| col.mean(range.clone(), min)));
        })
    }

    /// `{column}_lifetime_avg` across every earlier season.
    pub fn calc_lifetime_avg(&self) -> FeatureTable {
        let columns = suffixed::<R>("lifetime_avg");
        let min = self.policy.expanding_min;
        self.per_group("lifetime", columns, |ctx, i, values| {
            values.extend(ctx.columns.iter().map(|col| col.mean(0..ctx.cutoffs[i], min)));
        })
    }

    /// All three families joined on `game_id`.
    pub fn calc_all(&self, windows: &[usize]) -> Result<FeatureTable> {
        let tables = [
            self.calc_rolling_avg(windows)?,
            self.calc_ytd_avgs(),
            self.calc_lifetime_avg(),
        ];
        merge_tables("features", &tables)
    }

    fn per_group<F>(&self, family: &str, columns: Vec<String>, fill: F) -> FeatureTable
    where
        F: Fn(&GroupWindows, usize, &mut Vec<Option<f64>>) + Sync,
    {
        let width = columns.len();
        let groups: Vec<EntityGroup<'_, 'a, R>> = self.series.groups().collect();
        let chunks: Vec<Vec<FeatureRow>> = groups
            .par_iter()
            .map(|group| {
                let ctx = GroupWindows::new(group);
                group
                    .rows()
                    .iter()
                    .enumerate()
                    .map(|(i, row)| {
                        let mut values = Vec::with_capacity(width);
                        fill(&ctx, i, &mut values);
                        FeatureRow {
                            game_id: row.game_id().clone(),
                            values,
                        }
                    })
                    .collect()
            })
            .collect();
        let rows: Vec<FeatureRow> = chunks.into_iter().flatten().collect();
        debug!(
            family,
            entities = groups.len(),
            rows = rows.len(),
            columns = width,
            "computed feature family"
        );
        FeatureTable {
            name: family.to_string(),
            columns,
            rows,
        }
    }
}

fn suffixed<R: EntityRow>(suffix: &str) -> Vec<String> {
    R::NUMERIC_COLUMNS
        .iter()
        .map(|c| format!("{c}_{suffix}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, column: &str, keys: &[&str]) -> FeatureTable {
        FeatureTable {
            name: name.to_string(),
            columns: vec![column.to_string()],
            rows: keys
                .iter()
                .enumerate()
                .map(|(i, k)| FeatureRow {
                    game_id: GameId::from(*k),
                    values: vec![Some(i as f64)],
                })
                .collect(),
        }
    }

    #[test]
    fn merge_joins_on_game_id() {
        let merged = merge_tables("all", &[table("a", "x", &["g1", "g2"]), table("b", "y", &["g2", "g1"])]).unwrap();
        assert_eq!(merged.columns, vec!["x", "y"]);
        assert_eq!(merged.value(&GameId::from("g2"), "y"), Some(0.0));
        assert_eq!(merged.value(&GameId::from("g1"), "y"), Some(1.0));
        assert_eq!(merged.value(&GameId::from("g1"), "x"), Some(0.0));
    }

    #[test]
    fn merge_rejects_keys_missing_from_either_side() {
        let err = merge_tables("all", &[table("a", "x", &["g1", "g2"]), table("b", "y", &["g2"])]).unwrap_err();
        match err {
            PipelineError::CardinalityViolation { table, keys } => {
                assert_eq!(table, "b");
                assert_eq!(keys, vec!["g1".to_string()]);
            }
            other => panic!("unexpected error {other}"),
        }

        let err = merge_tables("all", &[table("a", "x", &["g2"]), table("b", "y", &["g2", "g3"])]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CardinalityViolation { ref keys, .. } if keys == &vec!["g3".to_string()]
        ));
    }

    #[test]
    fn merge_rejects_duplicate_keys() {
        let err = merge_tables("all", &[table("a", "x", &["g1"]), table("b", "y", &["g1", "g1"])]).unwrap_err();
        match err {
            PipelineError::CardinalityViolation { table, keys } => {
                assert_eq!(table, "b");
                assert_eq!(keys, vec!["g1".to_string()]);
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
