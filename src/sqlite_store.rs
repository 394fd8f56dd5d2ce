use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};

use crate::features::FeatureTable;
use crate::game_record::{GameRecord, GameRecordBatch};
use crate::scoring::PlateEvent;
use crate::store::RecordStore;
use crate::validation::{FoldMetrics, PredictionResult};

const DATE_FMT: &str = "%Y-%m-%d";

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS game_records (
            record_id INTEGER PRIMARY KEY AUTOINCREMENT,
            game_date TEXT NULL,
            home_team TEXT NOT NULL,
            record_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS plate_events (
            event_id INTEGER PRIMARY KEY AUTOINCREMENT,
            batter TEXT NOT NULL,
            game_date TEXT NOT NULL,
            events TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_plate_events_date ON plate_events(game_date);
        CREATE INDEX IF NOT EXISTS idx_plate_events_batter ON plate_events(batter, game_date);

        CREATE TABLE IF NOT EXISTS pipeline_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS feature_values (
            table_name TEXT NOT NULL,
            game_id TEXT NOT NULL,
            column_name TEXT NOT NULL,
            value REAL NULL,
            PRIMARY KEY (table_name, game_id, column_name)
        );

        CREATE TABLE IF NOT EXISTS fold_metrics (
            run_id INTEGER NOT NULL,
            grp TEXT NOT NULL,
            fold_index INTEGER NOT NULL,
            train_rows INTEGER NOT NULL,
            test_rows INTEGER NOT NULL,
            train_end TEXT NOT NULL,
            test_start TEXT NOT NULL,
            test_end TEXT NOT NULL,
            train_mae REAL NOT NULL,
            test_mae REAL NOT NULL,
            PRIMARY KEY (run_id, grp, fold_index)
        );

        CREATE TABLE IF NOT EXISTS predictions (
            run_id INTEGER NOT NULL,
            grp TEXT NOT NULL,
            game_id TEXT NOT NULL,
            fold_index INTEGER NOT NULL,
            predicted REAL NOT NULL,
            actual REAL NOT NULL,
            PRIMARY KEY (run_id, grp, game_id, fold_index)
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// SQLite-backed store. Each open starts a new run; fold metrics and
/// predictions are tagged with its id.
pub struct SqliteStore {
    conn: Connection,
    run_id: i64,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(open_db(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite")?;
        init_schema(&conn)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "INSERT INTO pipeline_runs(started_at) VALUES (?1)",
            params![Utc::now().to_rfc3339()],
        )
        .context("insert pipeline run")?;
        let run_id = conn.last_insert_rowid();
        Ok(Self { conn, run_id })
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Bulk-loads box scores into the upstream table.
    pub fn insert_games(&mut self, records: &[GameRecord]) -> Result<usize> {
        let tx = self.conn.transaction().context("begin game insert")?;
        for record in records {
            let json = serde_json::to_string(record).context("serialize game record")?;
            tx.execute(
                "INSERT INTO game_records(game_date, home_team, record_json) VALUES (?1, ?2, ?3)",
                params![record.game_date, record.home_team, json],
            )
            .context("insert game record")?;
        }
        tx.commit().context("commit game insert")?;
        Ok(records.len())
    }

    pub fn insert_plate_events(&mut self, events: &[PlateEvent]) -> Result<usize> {
        let tx = self.conn.transaction().context("begin plate event insert")?;
        for ev in events {
            tx.execute(
                "INSERT INTO plate_events(batter, game_date, events) VALUES (?1, ?2, ?3)",
                params![ev.batter, ev.game_date.format(DATE_FMT).to_string(), ev.events],
            )
            .context("insert plate event")?;
        }
        tx.commit().context("commit plate event insert")?;
        Ok(events.len())
    }

    pub fn load_fold_metrics(&self, run_id: i64, group: &str) -> Result<Vec<FoldMetrics>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT fold_index, train_rows, test_rows, train_end, test_start, test_end, train_mae, test_mae
                FROM fold_metrics
                WHERE run_id = ?1 AND grp = ?2
                ORDER BY fold_index ASC
                "#,
            )
            .context("prepare fold metrics query")?;
        let rows = stmt
            .query_map(params![run_id, group], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, f64>(7)?,
                ))
            })
            .context("query fold metrics")?;
        let mut out = Vec::new();
        for row in rows {
            let (fold_index, train_rows, test_rows, train_end, test_start, test_end, train_mae, test_mae) =
                row.context("decode fold metrics row")?;
            out.push(FoldMetrics {
                fold_index: fold_index as usize,
                train_rows: train_rows as usize,
                test_rows: test_rows as usize,
                train_end: parse_date(&train_end)?,
                test_start: parse_date(&test_start)?,
                test_end: parse_date(&test_end)?,
                train_mae,
                test_mae,
            });
        }
        Ok(out)
    }

    pub fn count_predictions(&self, run_id: i64, group: &str) -> Result<usize> {
        let n = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM predictions WHERE run_id = ?1 AND grp = ?2",
                params![run_id, group],
                |row| row.get::<_, i64>(0),
            )
            .context("count predictions")?;
        Ok(n as usize)
    }

    pub fn feature_value(&self, table: &str, game_id: &str, column: &str) -> Result<Option<f64>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM feature_values WHERE table_name = ?1 AND game_id = ?2 AND column_name = ?3",
                params![table, game_id, column],
                |row| row.get::<_, Option<f64>>(0),
            )
            .optional()
            .context("query feature value")?;
        Ok(value.flatten())
    }
}

impl RecordStore for SqliteStore {
    fn load_games(&self) -> Result<GameRecordBatch> {
        let mut stmt = self
            .conn
            .prepare("SELECT record_id, record_json FROM game_records ORDER BY record_id ASC")
            .context("prepare game records query")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .context("query game records")?;
        let mut batch = GameRecordBatch::default();
        for row in rows {
            let (record_id, json) = row.context("decode game record row")?;
            match serde_json::from_str::<GameRecord>(&json) {
                Ok(record) => batch.records.push(record),
                Err(err) => {
                    warn!(record_id, %err, "skipping malformed stored game record");
                    batch.rejected.push((record_id as usize, err.to_string()));
                }
            }
        }
        Ok(batch)
    }

    fn load_plate_events(&self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<Vec<PlateEvent>> {
        let from = from.map(|d| d.format(DATE_FMT).to_string());
        let to = to.map(|d| d.format(DATE_FMT).to_string());
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT batter, game_date, events
                FROM plate_events
                WHERE (?1 IS NULL OR game_date >= ?1)
                  AND (?2 IS NULL OR game_date <= ?2)
                ORDER BY game_date ASC, event_id ASC
                "#,
            )
            .context("prepare plate events query")?;
        let rows = stmt
            .query_map(params![from, to], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })
            .context("query plate events")?;
        let mut out = Vec::new();
        for row in rows {
            let (batter, game_date, events) = row.context("decode plate event row")?;
            out.push(PlateEvent {
                batter,
                game_date: parse_date(&game_date)?,
                events,
            });
        }
        Ok(out)
    }

    fn save_features(&mut self, table: &FeatureTable) -> Result<()> {
        let tx = self.conn.transaction().context("begin feature save")?;
        tx.execute("DELETE FROM feature_values WHERE table_name = ?1", params![table.name])
            .context("clear feature table")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO feature_values(table_name, game_id, column_name, value) VALUES (?1, ?2, ?3, ?4)",
                )
                .context("prepare feature insert")?;
            for row in &table.rows {
                for (column, value) in table.columns.iter().zip(&row.values) {
                    stmt.execute(params![table.name, row.game_id.as_str(), column, value])
                        .context("insert feature value")?;
                }
            }
        }
        tx.commit().context("commit feature save")?;
        info!(table = %table.name, rows = table.rows.len(), "saved feature table");
        Ok(())
    }

    fn save_fold_metrics(&mut self, group: &str, folds: &[FoldMetrics]) -> Result<()> {
        let tx = self.conn.transaction().context("begin fold metrics save")?;
        tx.execute(
            "DELETE FROM fold_metrics WHERE run_id = ?1 AND grp = ?2",
            params![self.run_id, group],
        )
        .context("clear fold metrics")?;
        for f in folds {
            tx.execute(
                r#"
                INSERT INTO fold_metrics(
                    run_id, grp, fold_index, train_rows, test_rows,
                    train_end, test_start, test_end, train_mae, test_mae
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    self.run_id,
                    group,
                    f.fold_index as i64,
                    f.train_rows as i64,
                    f.test_rows as i64,
                    f.train_end.format(DATE_FMT).to_string(),
                    f.test_start.format(DATE_FMT).to_string(),
                    f.test_end.format(DATE_FMT).to_string(),
                    f.train_mae,
                    f.test_mae
                ],
            )
            .context("insert fold metrics")?;
        }
        tx.commit().context("commit fold metrics save")?;
        Ok(())
    }

    fn save_predictions(&mut self, group: &str, predictions: &[PredictionResult]) -> Result<()> {
        let tx = self.conn.transaction().context("begin predictions save")?;
        tx.execute(
            "DELETE FROM predictions WHERE run_id = ?1 AND grp = ?2",
            params![self.run_id, group],
        )
        .context("clear predictions")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO predictions(run_id, grp, game_id, fold_index, predicted, actual) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .context("prepare prediction insert")?;
            for p in predictions {
                stmt.execute(params![
                    self.run_id,
                    group,
                    p.game_id.as_str(),
                    p.fold_index as i64,
                    p.predicted,
                    p.actual
                ])
                .context("insert prediction")?;
            }
        }
        tx.commit().context("commit predictions save")?;
        Ok(())
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FMT).with_context(|| format!("parse stored date {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plate_events_filter_by_date_range() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2017, 6, d).unwrap();
        let events: Vec<PlateEvent> = [(1, "single"), (2, "home_run"), (3, "double")]
            .into_iter()
            .map(|(d, e)| PlateEvent {
                batter: "troutmi01".to_string(),
                game_date: day(d),
                events: e.to_string(),
            })
            .collect();
        store.insert_plate_events(&events).unwrap();
        let loaded = store.load_plate_events(Some(day(2)), None).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].events, "home_run");
        assert_eq!(store.load_plate_events(None, None).unwrap().len(), 3);
    }

    #[test]
    fn open_db_reports_unusable_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"").unwrap();
        let err = open_db(&blocker.join("moneyball.sqlite")).unwrap_err();
        assert!(format!("{err:#}").contains("create dir"), "{err:#}");

        let nested = dir.path().join("a").join("b").join("moneyball.sqlite");
        open_db(&nested).unwrap();
        assert!(nested.exists());
    }
}
