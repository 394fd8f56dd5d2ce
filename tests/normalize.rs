use std::fs;
use std::path::PathBuf;

use chrono::{NaiveDate, Weekday};

use mlb_moneyball::field::{Field, Unresolved};
use mlb_moneyball::game_record::{GameRecord, RawStat, parse_game_records};
use mlb_moneyball::normalize::{DropReason, RawRecordNormalizer, StadiumDirectory, StatGroupKind};
use mlb_moneyball::rows::{GameId, Side};

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn fixture_records() -> Vec<GameRecord> {
    let batch = parse_game_records(read_fixture("box_scores.jl").as_bytes()).expect("fixture should parse");
    assert_eq!(batch.rejected.len(), 1);
    batch.records
}

fn fixture_stadiums() -> StadiumDirectory {
    StadiumDirectory::from_csv_reader(read_fixture("stadiums.csv").as_bytes()).expect("stadium csv should parse")
}

#[test]
fn fixture_counts_rows_drops_and_duplicates() {
    let records = fixture_records();
    let out = RawRecordNormalizer::new(fixture_stadiums()).normalize(&records);

    assert_eq!(out.report.games, 7);
    assert_eq!(out.batting.len(), 9);
    assert_eq!(out.pitching.len(), 11);
    assert_eq!(out.report.batting_rows, 9);
    assert_eq!(out.report.pitching_rows, 11);

    let bad_dates = out
        .report
        .dropped
        .iter()
        .filter(|d| matches!(d.reason, DropReason::BadDate(_)))
        .count();
    let missing_dates = out
        .report
        .dropped
        .iter()
        .filter(|d| d.reason == DropReason::MissingDate)
        .count();
    assert_eq!(bad_dates, 2);
    assert_eq!(missing_dates, 1);
    assert!(
        out.report
            .dropped
            .iter()
            .any(|d| d.group == StatGroupKind::Pitching && d.player_id == "volqued01")
    );
}

#[test]
fn doubleheader_collisions_keep_first_game() {
    let out = RawRecordNormalizer::new(fixture_stadiums()).normalize(&fixture_records());
    let dup: Vec<&str> = out.report.duplicate_game_ids.iter().map(GameId::as_str).collect();
    assert_eq!(
        dup,
        vec![
            "2016-04-09_Kauffman Stadium_altuvjo01",
            "2016-04-09_Kauffman Stadium_gordoal01",
        ]
    );

    let kept = out
        .batting
        .iter()
        .find(|r| r.game_id.as_str() == "2016-04-09_Kauffman Stadium_gordoal01")
        .expect("first game kept");
    assert_eq!(kept.start_time, Field::Parsed("1:10 p.m.".to_string()));
    assert_eq!(kept.stats.rbi.num(), Some(1.0));
}

#[test]
fn rows_carry_game_context() {
    let out = RawRecordNormalizer::new(fixture_stadiums()).normalize(&fixture_records());
    let row = out
        .batting
        .iter()
        .find(|r| r.game_id.as_str() == "2016-04-03_Kauffman Stadium_cespeyo01")
        .expect("away batter row");
    assert_eq!(row.side, Side::Away);
    assert_eq!(row.team, "New York Mets");
    assert_eq!(row.opponent, "Kansas City Royals");
    assert_eq!(row.date, NaiveDate::from_ymd_opt(2016, 4, 3).unwrap());
    assert_eq!(row.day_of_week, Weekday::Sun);
    assert_eq!(row.year, 2016);
    assert_eq!(row.attendance, Field::Parsed(40030.0));
    assert_eq!(row.stats.hits.num(), Some(0.0));
    assert_eq!(row.role.as_deref(), Some("LF"));

    let pitcher = out
        .pitching
        .iter()
        .find(|r| r.player_id == "volqued01")
        .expect("pitching row");
    assert_eq!(pitcher.role.as_deref(), Some("P"));
    assert_eq!(pitcher.stats.decision.as_deref(), Some("W (1-0)"));
}

#[test]
fn unknown_stadium_falls_back_to_location_then_home_team() {
    let mut record = GameRecord {
        away_team: "Boston Red Sox".to_string(),
        home_team: "Toronto Blue Jays".to_string(),
        game_date: Some("Friday, April 8, 2016".to_string()),
        location: Some("Rogers Centre".to_string()),
        ..GameRecord::default()
    };
    record.home_batter_stats.0.push(("donaljo02".to_string(), Default::default()));

    let normalizer = RawRecordNormalizer::new(StadiumDirectory::default());
    let out = normalizer.normalize(std::slice::from_ref(&record));
    assert_eq!(out.batting[0].game_id.as_str(), "2016-04-08_Rogers Centre_donaljo02");
    assert_eq!(out.report.unresolved_stadiums, 0);

    record.location = None;
    let out = normalizer.normalize(&[record]);
    assert_eq!(out.batting[0].game_id.as_str(), "2016-04-08_Toronto Blue Jays_donaljo02");
    assert_eq!(out.report.unresolved_stadiums, 1);
    assert!(matches!(
        out.batting[0].stadium,
        Field::Unresolved(Unresolved::UnknownStadium(_))
    ));
}

#[test]
fn garbage_numerics_are_unresolved_not_fatal() {
    let mut record = GameRecord {
        home_team: "Kansas City Royals".to_string(),
        game_date: Some("Sunday, April 3, 2016".to_string()),
        attendance: Some(RawStat::Text("sold out".to_string())),
        ..GameRecord::default()
    };
    let line = serde_json::from_str(r#"{"AB":"4","H":"n/a","RBI":"1"}"#).unwrap();
    record.home_batter_stats.0.push(("gordoal01".to_string(), line));

    let out = RawRecordNormalizer::new(fixture_stadiums()).normalize(&[record]);
    let row = &out.batting[0];
    assert_eq!(row.stats.at_bats.num(), Some(4.0));
    assert!(matches!(row.stats.hits, Field::Unresolved(Unresolved::NotNumeric(_))));
    assert!(!row.attendance.is_resolved());
    assert_eq!(out.report.unresolved.get("hits"), Some(&1));
    assert_eq!(out.report.unresolved.get("attendance"), Some(&1));
}
