use std::cmp::Ordering;
use std::ops::ControlFlow;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mlb_moneyball::baseline::MovingAveragePredictor;
use mlb_moneyball::config::{PipelineConfig, parse_window_list};
use mlb_moneyball::dataset::Dataset;
use mlb_moneyball::normalize::StadiumDirectory;
use mlb_moneyball::pipeline::{self, BATTING, PITCHING};
use mlb_moneyball::scoring::EventLedger;
use mlb_moneyball::store::{JsonlStore, RecordStore};
use mlb_moneyball::validation::WalkForwardValidator;

const DEFAULT_SWEEP_WINDOWS: [usize; 7] = [1, 2, 3, 5, 8, 13, 21];

/// Ranks moving-average baseline windows by mean walk-forward test MAE.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding games.jl and optionally plate_events.jl
    #[arg(long)]
    data_dir: PathBuf,
    #[arg(long)]
    stadiums: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Comma separated baseline windows
    #[arg(long)]
    windows: Option<String>,
    #[arg(long)]
    folds: Option<usize>,
    /// Keep evaluating configs that can no longer beat the best one
    #[arg(long, default_value_t = false)]
    no_prune: bool,
}

#[derive(Debug, Clone)]
struct SweepResult {
    group: &'static str,
    window: usize,
    folds: usize,
    planned: usize,
    mean_train_mae: f64,
    mean_test_mae: f64,
    pruned: bool,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => PipelineConfig::load_json(path)?,
        None => PipelineConfig::default(),
    };
    cfg.apply_env();
    if let Some(folds) = cli.folds {
        cfg.folds = folds;
    }
    cfg.validate()?;

    let windows = match &cli.windows {
        Some(raw) => parse_window_list(raw).with_context(|| format!("bad --windows {raw:?}"))?,
        None => DEFAULT_SWEEP_WINDOWS.to_vec(),
    };
    let stadiums = match &cli.stadiums {
        Some(path) => StadiumDirectory::load(path)?,
        None => StadiumDirectory::default(),
    };

    let store = JsonlStore::new(&cli.data_dir);
    let batch = store.load_games()?;
    if batch.records.is_empty() {
        return Err(anyhow!("no game records found in {}", cli.data_dir.display()));
    }
    let events = store.load_plate_events(None, None)?;
    let ledger = EventLedger::from_plate_events(&events);
    let stage = pipeline::build_features(&batch.records, &ledger, stadiums, &cfg)?;

    let groups = [
        (PITCHING, Dataset::assemble(&stage.pitching, &stage.pitching_features)?),
        (BATTING, Dataset::assemble(&stage.batting, &stage.batting_features)?),
    ];

    println!("Baseline window sweep");
    println!("Data: {}", cli.data_dir.display());
    println!("Windows: {windows:?}  folds: {}", cfg.folds);

    for (group, data) in groups {
        let train = match cfg.holdout_from {
            Some(from) => data.split_holdout(from).0,
            None => data,
        };
        let ranked = sweep_group(group, &train, &windows, cfg.folds, !cli.no_prune)?;
        print_ranked(group, train.len(), first_last(&train), &ranked);
    }
    Ok(())
}

fn sweep_group(
    group: &'static str,
    data: &Dataset,
    windows: &[usize],
    folds: usize,
    prune: bool,
) -> Result<Vec<SweepResult>> {
    let validator = WalkForwardValidator::new(folds);
    let dates: Vec<NaiveDate> = data.matrix.dates().collect();
    let (splits, _) = validator.split(&dates)?;
    let planned = splits.len();

    let mut best = f64::INFINITY;
    let mut results = Vec::with_capacity(windows.len());
    for &window in windows {
        let mut predictor = MovingAveragePredictor::new(window)?;
        let mut running = 0.0;
        // MAE is non-negative, so once the partial sum exceeds best * planned
        // the final mean cannot win.
        let budget = best * planned as f64;
        let report = validator.run_with(&data.matrix, &data.target, &mut predictor, |fold| {
            running += fold.test_mae;
            if prune && running > budget {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        if !report.stopped_early && report.mean_test_mae < best {
            best = report.mean_test_mae;
        }
        results.push(SweepResult {
            group,
            window,
            folds: report.folds.len(),
            planned,
            mean_train_mae: report.mean_train_mae,
            mean_test_mae: report.mean_test_mae,
            pruned: report.stopped_early,
        });
    }
    results.sort_by(compare_results);
    Ok(results)
}

fn compare_results(a: &SweepResult, b: &SweepResult) -> Ordering {
    a.pruned
        .cmp(&b.pruned)
        .then_with(|| a.mean_test_mae.partial_cmp(&b.mean_test_mae).unwrap_or(Ordering::Equal))
        .then_with(|| a.window.cmp(&b.window))
}

fn first_last(data: &Dataset) -> Option<(NaiveDate, NaiveDate)> {
    let mut dates = data.matrix.dates();
    let first = dates.next()?;
    let last = dates.last().unwrap_or(first);
    Some((first, last))
}

fn print_ranked(group: &str, rows: usize, range: Option<(NaiveDate, NaiveDate)>, ranked: &[SweepResult]) {
    println!();
    println!("{group}: rows={rows}");
    if let Some((first, last)) = range {
        println!("  Range: {first} -> {last}");
    }
    for r in ranked {
        println!(
            "  {:<8} window={:>3} folds={}/{} train_mae={:.4} test_mae={:.4}{}",
            r.group,
            r.window,
            r.folds,
            r.planned,
            r.mean_train_mae,
            r.mean_test_mae,
            if r.pruned { " (pruned)" } else { "" }
        );
    }
    if let Some(best) = ranked.first() {
        println!("  Best window: {} (test_mae={:.4})", best.window, best.mean_test_mae);
    }
}
