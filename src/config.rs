use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PipelineError;
use crate::window::{MinObservations, WindowPolicy};

pub const ENV_PREFIX: &str = "MONEYBALL_";

const MAX_FOLDS: usize = 500;
const MAX_WINDOW: usize = 162;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pitcher_windows: Vec<usize>,
    pub batter_windows: Vec<usize>,
    /// Walk-forward folds; 0 means one per row boundary.
    pub folds: usize,
    pub baseline_window: usize,
    pub window_policy: WindowPolicy,
    /// Rows on or after this date are held out of walk-forward validation.
    pub holdout_from: Option<NaiveDate>,
    pub explain_top: usize,
    pub output_dir: PathBuf,
    pub sqlite_path: Option<PathBuf>,
    pub workbook_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pitcher_windows: vec![2, 3, 5, 10, 15],
            batter_windows: vec![7, 14, 21, 28, 42],
            folds: 5,
            baseline_window: 5,
            window_policy: WindowPolicy::default(),
            holdout_from: None,
            explain_top: 10,
            output_dir: PathBuf::from("out"),
            sqlite_path: None,
            workbook_path: None,
        }
    }
}

impl PipelineConfig {
    pub fn load_json(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("create config dir")?;
        }
        let data = serde_json::to_vec_pretty(self).context("serialize config")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).context("write temp config")?;
        fs::rename(&tmp, path).context("persist config")?;
        Ok(())
    }

    /// Overlays `MONEYBALL_*` variables from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    /// Overlay from any key lookup. Unparseable values are logged and ignored.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());

        if let Some(raw) = var("FOLDS") {
            match raw.trim().parse::<usize>() {
                Ok(v) => self.folds = v.min(MAX_FOLDS),
                Err(_) => warn!(value = %raw, "ignoring MONEYBALL_FOLDS"),
            }
        }
        if let Some(raw) = var("BASELINE_WINDOW") {
            match raw.trim().parse::<usize>() {
                Ok(v) => self.baseline_window = v.clamp(1, MAX_WINDOW),
                Err(_) => warn!(value = %raw, "ignoring MONEYBALL_BASELINE_WINDOW"),
            }
        }
        if let Some(raw) = var("PITCHER_WINDOWS") {
            match parse_window_list(&raw) {
                Some(ws) => self.pitcher_windows = ws,
                None => warn!(value = %raw, "ignoring MONEYBALL_PITCHER_WINDOWS"),
            }
        }
        if let Some(raw) = var("BATTER_WINDOWS") {
            match parse_window_list(&raw) {
                Some(ws) => self.batter_windows = ws,
                None => warn!(value = %raw, "ignoring MONEYBALL_BATTER_WINDOWS"),
            }
        }
        if let Some(raw) = var("ROLLING_MIN") {
            match parse_min_observations(&raw) {
                Some(policy) => self.window_policy.rolling = policy,
                None => warn!(value = %raw, "ignoring MONEYBALL_ROLLING_MIN"),
            }
        }
        if let Some(raw) = var("EXPANDING_MIN") {
            match raw.trim().parse::<usize>() {
                Ok(v) => self.window_policy.expanding_min = v.max(1),
                Err(_) => warn!(value = %raw, "ignoring MONEYBALL_EXPANDING_MIN"),
            }
        }
        if let Some(raw) = var("HOLDOUT_FROM") {
            match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                Ok(d) => self.holdout_from = Some(d),
                Err(_) => warn!(value = %raw, "ignoring MONEYBALL_HOLDOUT_FROM"),
            }
        }
        if let Some(raw) = var("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(raw.trim());
        }
        if let Some(raw) = var("SQLITE_PATH") {
            self.sqlite_path = Some(PathBuf::from(raw.trim()));
        }
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        for (label, windows) in [("pitcher", &self.pitcher_windows), ("batter", &self.batter_windows)] {
            if windows.is_empty() {
                return Err(PipelineError::config(format!("{label} window set is empty")));
            }
            if windows.contains(&0) {
                return Err(PipelineError::config(format!("{label} windows contain 0")));
            }
        }
        if self.baseline_window == 0 {
            return Err(PipelineError::config("baseline_window must be at least 1"));
        }
        if self.window_policy.expanding_min == 0 {
            return Err(PipelineError::config("expanding_min must be at least 1"));
        }
        if self.window_policy.rolling == MinObservations::AtLeast(0) {
            return Err(PipelineError::config("rolling minimum of 0 observations"));
        }
        Ok(())
    }
}

/// "2,3,5" -> [2, 3, 5]; duplicates dropped, order kept.
pub fn parse_window_list(raw: &str) -> Option<Vec<usize>> {
    let mut out: Vec<usize> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let w = part.parse::<usize>().ok()?;
        if !out.contains(&w) {
            out.push(w);
        }
    }
    (!out.is_empty()).then_some(out)
}

/// "full" or a positive count.
pub fn parse_min_observations(raw: &str) -> Option<MinObservations> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("full") {
        return Some(MinObservations::FullWindow);
    }
    raw.parse::<usize>().ok().filter(|n| *n > 0).map(MinObservations::AtLeast)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn env_overrides_and_clamps() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MONEYBALL_FOLDS", "9"),
            ("MONEYBALL_BASELINE_WINDOW", "900"),
            ("MONEYBALL_BATTER_WINDOWS", "7, 14,7"),
            ("MONEYBALL_ROLLING_MIN", "2"),
            ("MONEYBALL_HOLDOUT_FROM", "2017-09-01"),
            ("MONEYBALL_PITCHER_WINDOWS", "x"),
        ]);
        let mut cfg = PipelineConfig::default();
        cfg.apply_vars(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.folds, 9);
        assert_eq!(cfg.baseline_window, MAX_WINDOW);
        assert_eq!(cfg.batter_windows, vec![7, 14]);
        assert_eq!(cfg.pitcher_windows, vec![2, 3, 5, 10, 15]);
        assert_eq!(cfg.window_policy.rolling, MinObservations::AtLeast(2));
        assert_eq!(cfg.holdout_from, NaiveDate::from_ymd_opt(2017, 9, 1));
        cfg.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_windows() {
        let cfg = PipelineConfig {
            batter_windows: vec![7, 0],
            ..PipelineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn json_round_trip_fills_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(r#"{"folds": 3}"#).unwrap();
        assert_eq!(cfg.folds, 3);
        assert_eq!(cfg.baseline_window, 5);
    }
}
