use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mlb_moneyball::config::{PipelineConfig, parse_min_observations, parse_window_list};
use mlb_moneyball::export;
use mlb_moneyball::game_record::{read_game_records, write_game_records};
use mlb_moneyball::normalize::StadiumDirectory;
use mlb_moneyball::pipeline::{self, GroupOutcome, PipelineOutcome};
use mlb_moneyball::scoring::{EventLedger, PlateEvent};
use mlb_moneyball::sqlite_store::SqliteStore;
use mlb_moneyball::store::{self, JsonlStore, RecordStore};
use mlb_moneyball::synthetic::{self, SyntheticConfig};

#[derive(Debug, Parser)]
#[command(author, version, about = "Box scores to leak-free features and walk-forward baselines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Normalize, score, build features and walk-forward the baseline
    Run(RunArgs),
    /// Normalize, score and build features only
    Features(FeaturesArgs),
    /// Write a seeded synthetic data directory
    Synthetic(SyntheticArgs),
    /// Load game records and plate events into a SQLite store
    Ingest(IngestArgs),
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    /// JSON config file applied before MONEYBALL_* environment variables
    #[arg(long)]
    config: Option<PathBuf>,
    /// team_name,stadium CSV
    #[arg(long)]
    stadiums: Option<PathBuf>,
    #[arg(long)]
    folds: Option<usize>,
    #[arg(long)]
    baseline_window: Option<usize>,
    /// Comma separated, e.g. 2,3,5
    #[arg(long)]
    pitcher_windows: Option<String>,
    #[arg(long)]
    batter_windows: Option<String>,
    /// "full" or a minimum count of prior values
    #[arg(long)]
    rolling_min: Option<String>,
    /// YYYY-MM-DD; rows on or after it are held out
    #[arg(long)]
    holdout_from: Option<NaiveDate>,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Directory holding games.jl (and optionally plate_events.jl); outputs land here too
    #[arg(long, conflicts_with = "sqlite")]
    data_dir: Option<PathBuf>,
    /// SQLite store to read inputs from and write outputs to
    #[arg(long)]
    sqlite: Option<PathBuf>,
    /// Also write an xlsx workbook
    #[arg(long)]
    workbook: Option<PathBuf>,
    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Debug, Clone, Args)]
struct FeaturesArgs {
    /// Line-delimited game records
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    plate_events: Option<PathBuf>,
    #[arg(long, default_value = "out")]
    output: PathBuf,
    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Debug, Clone, Args)]
struct SyntheticArgs {
    #[arg(long, default_value = "synthetic")]
    output: PathBuf,
    #[arg(long, default_value_t = 7)]
    seed: u64,
    #[arg(long, default_value_t = 6)]
    teams: usize,
    #[arg(long, default_value_t = 2)]
    seasons: usize,
    #[arg(long, default_value_t = 40)]
    days: usize,
}

#[derive(Debug, Clone, Args)]
struct IngestArgs {
    #[arg(long)]
    sqlite: PathBuf,
    #[arg(long)]
    games: PathBuf,
    #[arg(long)]
    plate_events: Option<PathBuf>,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.mode {
        Mode::Run(args) => run(&args),
        Mode::Features(args) => features(&args),
        Mode::Synthetic(args) => write_synthetic(&args),
        Mode::Ingest(args) => ingest(&args),
    }
}

fn resolve_config(args: &ConfigArgs) -> Result<PipelineConfig> {
    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::load_json(path)?,
        None => PipelineConfig::default(),
    };
    cfg.apply_env();
    if let Some(v) = args.folds {
        cfg.folds = v;
    }
    if let Some(v) = args.baseline_window {
        cfg.baseline_window = v;
    }
    if let Some(raw) = &args.pitcher_windows {
        cfg.pitcher_windows = parse_window_list(raw).with_context(|| format!("bad --pitcher-windows {raw:?}"))?;
    }
    if let Some(raw) = &args.batter_windows {
        cfg.batter_windows = parse_window_list(raw).with_context(|| format!("bad --batter-windows {raw:?}"))?;
    }
    if let Some(raw) = &args.rolling_min {
        cfg.window_policy.rolling = parse_min_observations(raw).with_context(|| format!("bad --rolling-min {raw:?}"))?;
    }
    if args.holdout_from.is_some() {
        cfg.holdout_from = args.holdout_from;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn load_stadiums(path: Option<&Path>) -> Result<StadiumDirectory> {
    match path {
        Some(path) => {
            let dir = StadiumDirectory::load(path)?;
            info!(teams = dir.len(), "stadium directory loaded");
            Ok(dir)
        }
        None => Ok(StadiumDirectory::default()),
    }
}

fn run(args: &RunArgs) -> Result<()> {
    let mut cfg = resolve_config(&args.config)?;
    if let Some(path) = &args.workbook {
        cfg.workbook_path = Some(path.clone());
    }
    let stadiums = load_stadiums(args.config.stadiums.as_deref())?;

    let sqlite = match &args.data_dir {
        Some(_) => None,
        None => args.sqlite.clone().or_else(|| cfg.sqlite_path.clone()),
    };
    let outcome = match (&sqlite, &args.data_dir) {
        (Some(path), _) => {
            let mut store = SqliteStore::open(path)?;
            let outcome = pipeline::run_with_store(&mut store, stadiums, &cfg)?;
            println!("SQLite run {} written to {}", store.run_id(), path.display());
            outcome
        }
        (None, data_dir) => {
            let dir = data_dir.clone().unwrap_or_else(|| cfg.output_dir.clone());
            let mut store = JsonlStore::new(&dir);
            let outcome = pipeline::run_with_store(&mut store, stadiums, &cfg)?;
            println!("Artifacts written to {}", dir.display());
            outcome
        }
    };

    print_outcome(&outcome);

    if let Some(path) = &cfg.workbook_path {
        let tables = [&outcome.features.pitching_features, &outcome.features.batting_features];
        let mut combined = outcome.pitching.validation.clone();
        combined.folds.extend(outcome.batting.validation.folds.iter().cloned());
        combined.predictions.extend(outcome.batting.validation.predictions.iter().cloned());
        let report = export::export_workbook_with_progress(path, &combined, &tables, |p| {
            info!(step = p.current, total = p.total, "{}", p.message);
        })?;
        println!(
            "Workbook {}: {} folds, {} predictions, {} feature rows",
            path.display(),
            report.folds,
            report.predictions,
            report.feature_rows
        );
    }
    Ok(())
}

fn features(args: &FeaturesArgs) -> Result<()> {
    let cfg = resolve_config(&args.config)?;
    let stadiums = load_stadiums(args.config.stadiums.as_deref())?;
    let batch = read_game_records(&args.input)?;
    let events: Vec<PlateEvent> = match &args.plate_events {
        Some(path) => store::read_jsonl(path)?,
        None => Vec::new(),
    };
    let ledger = EventLedger::from_plate_events(&events);
    let stage = pipeline::build_features(&batch.records, &ledger, stadiums, &cfg)?;

    let mut out = JsonlStore::new(&args.output);
    out.save_features(&stage.pitching_features)?;
    out.save_features(&stage.batting_features)?;

    let report = &stage.normalize;
    println!(
        "Games: {} | batting rows: {} | pitching rows: {} | dropped: {} | duplicate ids: {}",
        report.games,
        report.batting_rows,
        report.pitching_rows,
        report.dropped.len(),
        report.duplicate_game_ids.len()
    );
    println!(
        "Scored pitching: {} ({} quality starts) | scored batting: {} ({} without event breakdown)",
        stage.pitching_scoring.scored,
        stage.pitching_scoring.quality_starts,
        stage.batting_scoring.scored,
        stage.batting_scoring.fallback
    );
    println!(
        "Feature tables written to {} ({} + {} columns)",
        args.output.display(),
        stage.pitching_features.columns.len(),
        stage.batting_features.columns.len()
    );
    Ok(())
}

fn write_synthetic(args: &SyntheticArgs) -> Result<()> {
    let cfg = SyntheticConfig {
        seed: args.seed,
        teams: args.teams,
        seasons: args.seasons,
        game_days: args.days,
        ..SyntheticConfig::default()
    };
    let data = synthetic::generate(&cfg);
    fs::create_dir_all(&args.output).with_context(|| format!("create {}", args.output.display()))?;

    let games_path = args.output.join(store::GAMES_FILE);
    let file = File::create(&games_path).with_context(|| format!("create {}", games_path.display()))?;
    write_game_records(BufWriter::new(file), &data.records)?;
    JsonlStore::new(&args.output).write_plate_events(&data.plate_events)?;
    let stadiums_path = args.output.join("stadiums.csv");
    fs::write(&stadiums_path, &data.stadium_csv).with_context(|| format!("write {}", stadiums_path.display()))?;

    println!(
        "Wrote {} games and {} plate events to {}",
        data.records.len(),
        data.plate_events.len(),
        args.output.display()
    );
    Ok(())
}

fn ingest(args: &IngestArgs) -> Result<()> {
    let mut store = SqliteStore::open(&args.sqlite)?;
    let batch = read_game_records(&args.games)?;
    let games = store.insert_games(&batch.records)?;
    let events = match &args.plate_events {
        Some(path) => {
            let events: Vec<PlateEvent> = store::read_jsonl(path)?;
            store.insert_plate_events(&events)?
        }
        None => 0,
    };
    println!(
        "Ingested {games} games ({} rejected lines) and {events} plate events into {}",
        batch.rejected.len(),
        args.sqlite.display()
    );
    Ok(())
}

fn print_outcome(outcome: &PipelineOutcome) {
    let report = &outcome.features.normalize;
    println!(
        "Games: {} | batting rows: {} | pitching rows: {} | dropped: {} | duplicate ids: {}",
        report.games,
        report.batting_rows,
        report.pitching_rows,
        report.dropped.len(),
        report.duplicate_game_ids.len()
    );
    print_group(&outcome.pitching);
    print_group(&outcome.batting);
}

fn print_group(group: &GroupOutcome) {
    let v = &group.validation;
    println!(
        "\n{} ({} rows, {} folds{})",
        group.group,
        group.rows,
        v.folds.len(),
        if v.skipped_folds > 0 {
            format!(", {} skipped", v.skipped_folds)
        } else {
            String::new()
        }
    );
    for f in &v.folds {
        println!(
            "  fold {:>2}  train {:>6} ≤ {}  test {:>5} {}..{}  mae train {:.3} test {:.3}",
            f.fold_index, f.train_rows, f.train_end, f.test_rows, f.test_start, f.test_end, f.train_mae, f.test_mae
        );
    }
    println!("  mean     train {:.3} test {:.3}", v.mean_train_mae, v.mean_test_mae);
    if let Some(h) = &group.holdout {
        println!("  holdout  {} rows mae {:.3}", h.rows, h.mae);
    }
    if !v.top_features.is_empty() {
        println!("  top features:");
        for f in v.top_features.iter().take(5) {
            println!("    {:<40} {:.3}", f.column, f.score);
        }
    }
}
