use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::info;

use crate::baseline::MovingAveragePredictor;
use crate::config::PipelineConfig;
use crate::dataset::Dataset;
use crate::features::{FeatureEngineer, FeatureTable};
use crate::game_record::GameRecord;
use crate::normalize::{NormalizeReport, RawRecordNormalizer, StadiumDirectory, parse_game_date};
use crate::rows::{BattingStats, PitchingStats, StatLine};
use crate::scoring::{EventLedger, EventSource, Scored, ScoringReport, score_batting_rows, score_pitching_rows};
use crate::store::RecordStore;
use crate::validation::{CorrelationExplainer, Predictor, ValidationReport, WalkForwardValidator, mean_absolute_error};

pub const PITCHING: &str = "pitching";
pub const BATTING: &str = "batting";

/// Everything up to and including feature engineering.
#[derive(Debug, Clone, Default)]
pub struct FeatureStage {
    pub normalize: NormalizeReport,
    pub pitching: Vec<Scored<PitchingStats>>,
    pub batting: Vec<Scored<BattingStats>>,
    pub pitching_scoring: ScoringReport,
    pub batting_scoring: ScoringReport,
    pub pitching_features: FeatureTable,
    pub batting_features: FeatureTable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HoldoutReport {
    pub rows: usize,
    pub mae: f64,
}

#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub group: &'static str,
    pub rows: usize,
    pub validation: ValidationReport,
    pub holdout: Option<HoldoutReport>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub features: FeatureStage,
    pub pitching: GroupOutcome,
    pub batting: GroupOutcome,
}

pub fn build_features(
    records: &[GameRecord],
    events: &impl EventSource,
    stadiums: StadiumDirectory,
    cfg: &PipelineConfig,
) -> Result<FeatureStage> {
    cfg.validate()?;
    let normalized = RawRecordNormalizer::new(stadiums).normalize(records);

    let (pitching, pitching_scoring) = score_pitching_rows(normalized.pitching);
    let (batting, batting_scoring) = score_batting_rows(normalized.batting, events);

    let pitching_features = feature_table(PITCHING, &pitching, &cfg.pitcher_windows, cfg)?;
    let batting_features = feature_table(BATTING, &batting, &cfg.batter_windows, cfg)?;

    Ok(FeatureStage {
        normalize: normalized.report,
        pitching,
        batting,
        pitching_scoring,
        batting_scoring,
        pitching_features,
        batting_features,
    })
}

fn feature_table<S: StatLine + Sync>(
    group: &str,
    rows: &[Scored<S>],
    windows: &[usize],
    cfg: &PipelineConfig,
) -> Result<FeatureTable> {
    let engineer = FeatureEngineer::with_policy(rows, cfg.window_policy)
        .with_context(|| format!("prepare {group} features"))?;
    let mut table = engineer
        .calc_all(windows)
        .with_context(|| format!("compute {group} features"))?;
    table.name = group.to_string();
    info!(
        group,
        rows = table.len(),
        columns = table.columns.len(),
        entities = engineer.series().entity_count(),
        "feature table ready"
    );
    Ok(table)
}

/// Walk-forward the moving-average baseline over one group, then score the
/// holdout slice once if a cutoff is configured.
pub fn evaluate_group(group: &'static str, data: Dataset, cfg: &PipelineConfig) -> Result<GroupOutcome> {
    let rows = data.len();
    let (train, holdout) = match cfg.holdout_from {
        Some(from) => {
            let (early, late) = data.split_holdout(from);
            (early, Some(late))
        }
        None => (data, None),
    };

    let validator = WalkForwardValidator::new(cfg.folds).with_explainer(CorrelationExplainer, cfg.explain_top);
    let mut predictor = MovingAveragePredictor::new(cfg.baseline_window)?;
    let validation = validator
        .run(&train.matrix, &train.target, &mut predictor)
        .with_context(|| format!("walk-forward {group}"))?;
    info!(
        group,
        folds = validation.folds.len(),
        mean_train_mae = validation.mean_train_mae,
        mean_test_mae = validation.mean_test_mae,
        "walk-forward complete"
    );

    let holdout = match holdout {
        Some(late) if !late.is_empty() => {
            predictor
                .fit(&train.matrix.full_view(), &train.target)
                .with_context(|| format!("fit {group} holdout baseline"))?;
            let predicted = predictor.predict(&late.matrix.full_view());
            let report = HoldoutReport {
                rows: late.len(),
                mae: mean_absolute_error(&predicted, &late.target),
            };
            info!(group, rows = report.rows, mae = report.mae, "holdout evaluated");
            Some(report)
        }
        _ => None,
    };

    Ok(GroupOutcome {
        group,
        rows,
        validation,
        holdout,
    })
}

pub fn run_pipeline(
    records: &[GameRecord],
    events: &impl EventSource,
    stadiums: StadiumDirectory,
    cfg: &PipelineConfig,
) -> Result<PipelineOutcome> {
    let features = build_features(records, events, stadiums, cfg)?;
    let pitching_data = Dataset::assemble(&features.pitching, &features.pitching_features)?;
    let batting_data = Dataset::assemble(&features.batting, &features.batting_features)?;
    let pitching = evaluate_group(PITCHING, pitching_data, cfg)?;
    let batting = evaluate_group(BATTING, batting_data, cfg)?;
    Ok(PipelineOutcome {
        features,
        pitching,
        batting,
    })
}

/// Loads inputs from `store`, runs everything and writes the artifacts back.
pub fn run_with_store(
    store: &mut impl RecordStore,
    stadiums: StadiumDirectory,
    cfg: &PipelineConfig,
) -> Result<PipelineOutcome> {
    let batch = store.load_games().context("load game records")?;
    if !batch.rejected.is_empty() {
        info!(rejected = batch.rejected.len(), "some game records were unreadable");
    }
    let (first, last) = date_bounds(&batch.records);
    let events = store
        .load_plate_events(first, last)
        .context("load plate events")?;
    let ledger = EventLedger::from_plate_events(&events);
    info!(games = batch.records.len(), plate_events = events.len(), "inputs loaded");

    let outcome = run_pipeline(&batch.records, &ledger, stadiums, cfg)?;
    save_outcome(store, &outcome)?;
    Ok(outcome)
}

pub fn save_outcome(store: &mut impl RecordStore, outcome: &PipelineOutcome) -> Result<()> {
    store.save_features(&outcome.features.pitching_features)?;
    store.save_features(&outcome.features.batting_features)?;
    for group in [&outcome.pitching, &outcome.batting] {
        store
            .save_fold_metrics(group.group, &group.validation.folds)
            .with_context(|| format!("save {} fold metrics", group.group))?;
        store
            .save_predictions(group.group, &group.validation.predictions)
            .with_context(|| format!("save {} predictions", group.group))?;
    }
    Ok(())
}

/// Date range covered by the records, used to bound the plate-event load.
fn date_bounds(records: &[GameRecord]) -> (Option<NaiveDate>, Option<NaiveDate>) {
    records
        .iter()
        .filter_map(|r| r.game_date.as_deref())
        .filter_map(|raw| parse_game_date(raw).into_value())
        .map(|gd| gd.date)
        .fold((None, None), |(lo, hi): (Option<NaiveDate>, Option<NaiveDate>), d| {
            (Some(lo.map_or(d, |l| l.min(d))), Some(hi.map_or(d, |h| h.max(d))))
        })
}
