use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::features::FeatureTable;
use crate::game_record::{GameRecordBatch, read_game_records};
use crate::scoring::PlateEvent;
use crate::validation::{FoldMetrics, PredictionResult};

/// Caller-owned persistence for pipeline inputs and outputs.
pub trait RecordStore {
    fn load_games(&self) -> Result<GameRecordBatch>;

    /// Plate events with `from <= game_date <= to`; open bounds when `None`.
    fn load_plate_events(&self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<Vec<PlateEvent>>;

    fn save_features(&mut self, table: &FeatureTable) -> Result<()>;
    /// `group` names the population the folds were run on, e.g. "pitching".
    fn save_fold_metrics(&mut self, group: &str, folds: &[FoldMetrics]) -> Result<()>;
    fn save_predictions(&mut self, group: &str, predictions: &[PredictionResult]) -> Result<()>;
}

pub const GAMES_FILE: &str = "games.jl";
pub const PLATE_EVENTS_FILE: &str = "plate_events.jl";

/// A directory of line-delimited JSON inputs and JSON outputs.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    dir: PathBuf,
}

impl JsonlStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn features_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("features_{name}.json"))
    }

    pub fn load_features(&self, name: &str) -> Result<FeatureTable> {
        let path = self.features_path(name);
        let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
    }

    pub fn folds_path(&self, group: &str) -> PathBuf {
        self.dir.join(format!("fold_metrics_{group}.json"))
    }

    pub fn predictions_path(&self, group: &str) -> PathBuf {
        self.dir.join(format!("predictions_{group}.jl"))
    }

    pub fn load_fold_metrics(&self, group: &str) -> Result<Vec<FoldMetrics>> {
        let path = self.folds_path(group);
        let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
    }

    pub fn load_predictions(&self, group: &str) -> Result<Vec<PredictionResult>> {
        read_jsonl(&self.predictions_path(group))
    }

    pub fn write_plate_events(&self, events: &[PlateEvent]) -> Result<()> {
        write_jsonl_atomic(&self.dir.join(PLATE_EVENTS_FILE), events)
    }
}

impl RecordStore for JsonlStore {
    fn load_games(&self) -> Result<GameRecordBatch> {
        read_game_records(&self.dir.join(GAMES_FILE))
    }

    fn load_plate_events(&self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<Vec<PlateEvent>> {
        let path = self.dir.join(PLATE_EVENTS_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "no plate events file, batting falls back");
            return Ok(Vec::new());
        }
        let events: Vec<PlateEvent> = read_jsonl(&path)?;
        Ok(events
            .into_iter()
            .filter(|ev| from.is_none_or(|f| ev.game_date >= f) && to.is_none_or(|t| ev.game_date <= t))
            .collect())
    }

    fn save_features(&mut self, table: &FeatureTable) -> Result<()> {
        write_json_atomic(&self.features_path(&table.name), table)
    }

    fn save_fold_metrics(&mut self, group: &str, folds: &[FoldMetrics]) -> Result<()> {
        write_json_atomic(&self.folds_path(group), folds)
    }

    fn save_predictions(&mut self, group: &str, predictions: &[PredictionResult]) -> Result<()> {
        write_jsonl_atomic(&self.predictions_path(group), predictions)
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    Ok(())
}

/// Writes next to `path` and renames over it.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}

pub fn write_jsonl_atomic<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let tmp = path.with_extension("jl.tmp");
    {
        let file = File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        let mut out = BufWriter::new(file);
        for row in rows {
            serde_json::to_writer(&mut out, row).context("serialize jsonl row")?;
            out.write_all(b"\n").context("write jsonl row")?;
        }
        out.flush().context("flush jsonl")?;
    }
    fs::rename(&tmp, path).with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}

/// Reads one JSON value per line, skipping lines that do not parse.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut out = Vec::new();
    let mut skipped = 0usize;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read {} line {}", path.display(), idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(v) => out.push(v),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(path = %path.display(), skipped, "skipped malformed jsonl lines");
    }
    Ok(out)
}
