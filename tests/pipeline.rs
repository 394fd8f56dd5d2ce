use std::fs::File;
use std::io::BufWriter;

use chrono::NaiveDate;

use mlb_moneyball::PipelineError;
use mlb_moneyball::config::PipelineConfig;
use mlb_moneyball::dataset::Dataset;
use mlb_moneyball::export::export_workbook;
use mlb_moneyball::game_record::write_game_records;
use mlb_moneyball::normalize::StadiumDirectory;
use mlb_moneyball::pipeline::{self, BATTING, PITCHING};
use mlb_moneyball::scoring::EventLedger;
use mlb_moneyball::sqlite_store::SqliteStore;
use mlb_moneyball::store::{GAMES_FILE, JsonlStore, RecordStore};
use mlb_moneyball::synthetic::{self, SyntheticConfig, SyntheticData};

fn small_league() -> SyntheticData {
    synthetic::generate(&SyntheticConfig {
        teams: 4,
        seasons: 2,
        game_days: 12,
        ..SyntheticConfig::default()
    })
}

fn small_config() -> PipelineConfig {
    PipelineConfig {
        pitcher_windows: vec![2, 3],
        batter_windows: vec![3, 5],
        folds: 3,
        baseline_window: 3,
        ..PipelineConfig::default()
    }
}

fn stadiums(data: &SyntheticData) -> StadiumDirectory {
    StadiumDirectory::from_csv_reader(data.stadium_csv.as_bytes()).unwrap()
}

#[test]
fn synthetic_league_runs_end_to_end() {
    let data = small_league();
    let ledger = EventLedger::from_plate_events(&data.plate_events);
    let outcome = pipeline::run_pipeline(&data.records, &ledger, stadiums(&data), &small_config()).unwrap();

    let features = &outcome.features;
    assert_eq!(features.pitching_features.name, PITCHING);
    assert_eq!(features.batting_features.name, BATTING);
    assert_eq!(features.pitching_features.len(), features.pitching.len());
    assert_eq!(features.batting_features.len(), features.batting.len());
    assert_eq!(features.batting_scoring.fallback, 0);
    assert_eq!(features.normalize.unresolved_stadiums, 0);
    assert!(features.pitching_features.check_unique().is_ok());

    for group in [&outcome.pitching, &outcome.batting] {
        let v = &group.validation;
        assert_eq!(v.folds.len(), 3, "{} folds", group.group);
        assert!(v.mean_test_mae.is_finite());
        assert!(v.predictions.iter().all(|p| p.predicted.is_finite()));
        assert!(!v.top_features.is_empty());
        assert!(group.holdout.is_none());
    }
}

#[test]
fn dataset_refuses_scored_rows_without_features() {
    let data = small_league();
    let ledger = EventLedger::from_plate_events(&data.plate_events);
    let stage = pipeline::build_features(&data.records, &ledger, stadiums(&data), &small_config()).unwrap();
    assert!(Dataset::assemble(&stage.batting, &stage.batting_features).is_ok());

    let mut features = stage.batting_features.clone();
    let dropped = features.rows.remove(0).game_id;
    match Dataset::assemble(&stage.batting, &features).unwrap_err() {
        PipelineError::CardinalityViolation { table, keys } => {
            assert_eq!(table, BATTING);
            assert_eq!(keys, vec![dropped.to_string()]);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn holdout_is_scored_once_after_walk_forward() {
    let data = small_league();
    let ledger = EventLedger::from_plate_events(&data.plate_events);
    let cfg = PipelineConfig {
        holdout_from: NaiveDate::from_ymd_opt(2017, 1, 1),
        ..small_config()
    };
    let outcome = pipeline::run_pipeline(&data.records, &ledger, stadiums(&data), &cfg).unwrap();

    let holdout = outcome.pitching.holdout.as_ref().expect("second season held out");
    assert!(holdout.rows > 0);
    assert!(holdout.mae.is_finite());
    let last_test = outcome.pitching.validation.folds.last().unwrap().test_end;
    assert!(last_test < NaiveDate::from_ymd_opt(2017, 1, 1).unwrap());
}

#[test]
fn jsonl_store_round_trips_artifacts() {
    let data = small_league();
    let dir = tempfile::tempdir().unwrap();
    let file = File::create(dir.path().join(GAMES_FILE)).unwrap();
    write_game_records(BufWriter::new(file), &data.records).unwrap();

    let mut store = JsonlStore::new(dir.path());
    store.write_plate_events(&data.plate_events).unwrap();
    assert_eq!(store.load_games().unwrap().records.len(), data.records.len());

    let outcome = pipeline::run_with_store(&mut store, stadiums(&data), &small_config()).unwrap();

    let folds = store.load_fold_metrics(PITCHING).unwrap();
    let expected = &outcome.pitching.validation.folds;
    assert_eq!(folds.len(), expected.len());
    for (got, want) in folds.iter().zip(expected) {
        assert_eq!(got.fold_index, want.fold_index);
        assert_eq!(got.test_start, want.test_start);
        assert!((got.test_mae - want.test_mae).abs() < 1e-9);
    }
    let predictions = store.load_predictions(BATTING).unwrap();
    assert_eq!(predictions.len(), outcome.batting.validation.predictions.len());
    let table = store.load_features(PITCHING).unwrap();
    assert_eq!(table.columns, outcome.features.pitching_features.columns);
    assert_eq!(table.len(), outcome.features.pitching_features.len());
    assert!(dir.path().join("fold_metrics_batting.json").exists());
}

#[test]
fn sqlite_store_keeps_groups_apart() {
    let data = small_league();
    let mut store = SqliteStore::open_in_memory().unwrap();
    store.insert_games(&data.records).unwrap();
    store.insert_plate_events(&data.plate_events).unwrap();

    let outcome = pipeline::run_with_store(&mut store, stadiums(&data), &small_config()).unwrap();
    let run = store.run_id();

    let pitching = store.load_fold_metrics(run, PITCHING).unwrap();
    let batting = store.load_fold_metrics(run, BATTING).unwrap();
    assert_eq!(pitching.len(), outcome.pitching.validation.folds.len());
    assert_eq!(batting.len(), outcome.batting.validation.folds.len());
    assert_eq!(
        store.count_predictions(run, BATTING).unwrap(),
        outcome.batting.validation.predictions.len()
    );

    let table = &outcome.features.batting_features;
    let row = table
        .rows
        .iter()
        .find(|r| r.values.iter().any(Option::is_some))
        .expect("some batter has history");
    let (idx, expected) = row
        .values
        .iter()
        .enumerate()
        .find_map(|(i, v)| v.map(|v| (i, v)))
        .unwrap();
    let stored = store
        .feature_value(BATTING, row.game_id.as_str(), &table.columns[idx])
        .unwrap();
    assert_eq!(stored, Some(expected));
}

#[test]
fn workbook_export_writes_every_sheet() {
    let data = small_league();
    let ledger = EventLedger::from_plate_events(&data.plate_events);
    let outcome = pipeline::run_pipeline(&data.records, &ledger, stadiums(&data), &small_config()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("moneyball.xlsx");
    let report = export_workbook(
        &path,
        &outcome.pitching.validation,
        &[&outcome.features.pitching_features],
    )
    .unwrap();

    assert!(path.exists());
    assert_eq!(report.folds, 3);
    assert_eq!(report.predictions, outcome.pitching.validation.predictions.len());
    assert_eq!(report.feature_rows, outcome.features.pitching_features.len());
}
