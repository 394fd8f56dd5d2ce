use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, Weekday};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::field::{Field, Unresolved, parse_numeric};
use crate::game_record::{GameRecord, RawBattingLine, RawPitchingLine, RawStat, StatGroup};
use crate::rows::{BattingRow, BattingStats, GameId, PitchingRow, PitchingStats, PlayerGameRow, Side};
use crate::scoring::InningsPitched;

const DATE_FORMATS: [&str; 3] = ["%B %d, %Y", "%b %d, %Y", "%Y-%m-%d"];

/// Home team name -> stadium name.
#[derive(Debug, Clone, Default)]
pub struct StadiumDirectory {
    by_team: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StadiumCsvRow {
    team_name: String,
    stadium: String,
}

impl StadiumDirectory {
    pub fn insert(&mut self, team: impl Into<String>, stadium: impl Into<String>) {
        self.by_team.insert(team.into().trim().to_string(), stadium.into().trim().to_string());
    }

    pub fn lookup(&self, home_team: &str) -> Option<&str> {
        self.by_team.get(home_team.trim()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_team.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_team.is_empty()
    }

    /// Reads a `team_name,stadium` CSV.
    pub fn from_csv_reader(reader: impl Read) -> std::result::Result<Self, PipelineError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut out = StadiumDirectory::default();
        for row in rdr.deserialize::<StadiumCsvRow>() {
            let row = row?;
            if row.team_name.trim().is_empty() || row.stadium.trim().is_empty() {
                continue;
            }
            out.insert(row.team_name, row.stadium);
        }
        Ok(out)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open stadium csv {}", path.display()))?;
        Self::from_csv_reader(file).with_context(|| format!("parse stadium csv {}", path.display()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameDate {
    pub date: NaiveDate,
    pub day_of_week: Weekday,
}

/// Parses "Saturday, April 2, 2016". The weekday comes from the text when it
/// names one, otherwise from the calendar date.
pub fn parse_game_date(raw: &str) -> Field<GameDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Field::missing();
    }
    let (weekday_text, date_text) = match trimmed.split_once(',') {
        Some((head, tail)) if head.trim().parse::<Weekday>().is_ok() => (Some(head.trim()), tail.trim()),
        _ => (None, trimmed),
    };
    let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_text, fmt).ok())
    else {
        return Field::Unresolved(Unresolved::BadDate(trimmed.to_string()));
    };
    let day_of_week = weekday_text
        .and_then(|w| w.parse::<Weekday>().ok())
        .unwrap_or_else(|| date.weekday());
    Field::Parsed(GameDate { date, day_of_week })
}

/// "Start Time: 7:05 p.m. Local" -> "7:05 p.m.".
pub fn clean_start_time(raw: Option<&str>) -> Field<String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Field::missing();
    };
    let Some((_, rest)) = raw.split_once(": ") else {
        return Field::missing();
    };
    let cleaned = rest.split(" L").next().unwrap_or(rest).trim();
    if cleaned.is_empty() {
        Field::missing()
    } else {
        Field::Parsed(cleaned.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    MissingPlayerId,
    MissingDate,
    BadDate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatGroupKind {
    Batting,
    Pitching,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRow {
    pub group: StatGroupKind,
    pub player_id: String,
    pub home_team: String,
    pub raw_date: Option<String>,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeReport {
    pub games: usize,
    pub batting_rows: usize,
    pub pitching_rows: usize,
    pub dropped: Vec<DroppedRow>,
    /// game_ids seen more than once; the first row was kept.
    pub duplicate_game_ids: Vec<GameId>,
    /// Parse failures per column. Blank cells are not counted.
    pub unresolved: BTreeMap<&'static str, usize>,
    pub unresolved_stadiums: usize,
}

impl NormalizeReport {
    fn note(&mut self, column: &'static str, field: &Field<impl Sized>) {
        if let Some(reason) = field.reason()
            && *reason != Unresolved::Missing
        {
            *self.unresolved.entry(column).or_default() += 1;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedRows {
    pub batting: Vec<BattingRow>,
    pub pitching: Vec<PitchingRow>,
    pub report: NormalizeReport,
}

struct GameContext<'a> {
    record: &'a GameRecord,
    date: GameDate,
    start_time: Field<String>,
    stadium: Field<String>,
    attendance: Field<f64>,
}

impl GameContext<'_> {
    fn venue(&self) -> &str {
        self.stadium
            .value()
            .map(String::as_str)
            .unwrap_or(self.record.home_team.as_str())
    }

    fn row<S>(&self, player_id: &str, side: Side, role: Option<String>, stats: S) -> PlayerGameRow<S> {
        let (team, opponent) = match side {
            Side::Away => (&self.record.away_team, &self.record.home_team),
            Side::Home => (&self.record.home_team, &self.record.away_team),
        };
        PlayerGameRow {
            player_id: player_id.trim().to_string(),
            game_id: GameId::compose(self.date.date, self.venue(), player_id),
            side,
            team: team.clone(),
            opponent: opponent.clone(),
            role,
            date: self.date.date,
            year: self.date.date.year(),
            day_of_week: self.date.day_of_week,
            start_time: self.start_time.clone(),
            stadium: self.stadium.clone(),
            attendance: self.attendance.clone(),
            game_situation: self.record.game_situation.clone(),
            stats,
        }
    }
}

/// Flattens nested box scores into one batting and one pitching row per
/// player-game. No I/O; every degradation lands in the report.
#[derive(Debug, Clone, Default)]
pub struct RawRecordNormalizer {
    stadiums: StadiumDirectory,
}

impl RawRecordNormalizer {
    pub fn new(stadiums: StadiumDirectory) -> Self {
        Self { stadiums }
    }

    pub fn normalize(&self, records: &[GameRecord]) -> NormalizedRows {
        let mut out = NormalizedRows::default();
        let mut seen_batting: HashSet<GameId> = HashSet::new();
        let mut seen_pitching: HashSet<GameId> = HashSet::new();

        for record in records {
            out.report.games += 1;
            let Some(ctx) = self.context(record, &mut out.report) else {
                continue;
            };

            for (group, side) in [
                (&record.away_batter_stats, Side::Away),
                (&record.home_batter_stats, Side::Home),
            ] {
                for (player_id, line) in group.iter() {
                    if player_id.trim().is_empty() {
                        drop_row(&mut out.report, StatGroupKind::Batting, player_id, record, DropReason::MissingPlayerId);
                        continue;
                    }
                    let stats = batting_stats(line, &mut out.report);
                    let row = ctx.row(player_id, side, line.position.clone(), stats);
                    if seen_batting.insert(row.game_id.clone()) {
                        out.batting.push(row);
                    } else {
                        out.report.duplicate_game_ids.push(row.game_id);
                    }
                }
            }

            for (group, side) in [
                (&record.away_pitching_stats, Side::Away),
                (&record.home_pitching_stats, Side::Home),
            ] {
                for (player_id, line) in group.iter() {
                    if player_id.trim().is_empty() {
                        drop_row(&mut out.report, StatGroupKind::Pitching, player_id, record, DropReason::MissingPlayerId);
                        continue;
                    }
                    let stats = pitching_stats(line, &mut out.report);
                    let row = ctx.row(player_id, side, Some("P".to_string()), stats);
                    if seen_pitching.insert(row.game_id.clone()) {
                        out.pitching.push(row);
                    } else {
                        out.report.duplicate_game_ids.push(row.game_id);
                    }
                }
            }
        }

        out.report.batting_rows = out.batting.len();
        out.report.pitching_rows = out.pitching.len();
        if !out.report.dropped.is_empty() {
            warn!(dropped = out.report.dropped.len(), "dropped rows missing player id or date");
        }
        if let Some(first) = out.report.duplicate_game_ids.first() {
            warn!(
                duplicates = out.report.duplicate_game_ids.len(),
                first = %first,
                "game_id collisions, kept first occurrence"
            );
        }
        for (column, count) in &out.report.unresolved {
            warn!(column, count, "unparseable values marked unresolved");
        }
        info!(
            games = out.report.games,
            batting = out.report.batting_rows,
            pitching = out.report.pitching_rows,
            "normalized box scores"
        );
        out
    }

    fn context<'a>(&self, record: &'a GameRecord, report: &mut NormalizeReport) -> Option<GameContext<'a>> {
        let date = match record.game_date.as_deref().map(parse_game_date) {
            Some(Field::Parsed(date)) => date,
            Some(Field::Unresolved(Unresolved::Missing)) | None => {
                drop_game(report, record, DropReason::MissingDate);
                return None;
            }
            Some(Field::Unresolved(reason)) => {
                drop_game(report, record, DropReason::BadDate(reason.to_string()));
                return None;
            }
        };

        let start_time = clean_start_time(record.start_time.as_deref());
        let stadium = self.resolve_stadium(record);
        if !stadium.is_resolved() {
            report.unresolved_stadiums += 1;
        }
        let attendance = raw_numeric(record.attendance.as_ref());
        report.note("attendance", &attendance);

        Some(GameContext {
            record,
            date,
            start_time,
            stadium,
            attendance,
        })
    }

    fn resolve_stadium(&self, record: &GameRecord) -> Field<String> {
        if let Some(stadium) = self.stadiums.lookup(&record.home_team) {
            return Field::Parsed(stadium.to_string());
        }
        match record.location.as_deref().map(str::trim) {
            Some(location) if !location.is_empty() => Field::Parsed(location.to_string()),
            _ => Field::Unresolved(Unresolved::UnknownStadium(record.home_team.clone())),
        }
    }
}

fn drop_game(report: &mut NormalizeReport, record: &GameRecord, reason: DropReason) {
    let mut drop_group = |kind: StatGroupKind, ids: Vec<&str>| {
        for id in ids {
            drop_row(report, kind, id, record, reason.clone());
        }
    };
    drop_group(StatGroupKind::Batting, player_ids(&record.away_batter_stats, &record.home_batter_stats));
    drop_group(StatGroupKind::Pitching, player_ids(&record.away_pitching_stats, &record.home_pitching_stats));
}

fn player_ids<'a, T>(away: &'a StatGroup<T>, home: &'a StatGroup<T>) -> Vec<&'a str> {
    away.iter().chain(home.iter()).map(|(id, _)| id).collect()
}

fn drop_row(report: &mut NormalizeReport, group: StatGroupKind, player_id: &str, record: &GameRecord, reason: DropReason) {
    report.dropped.push(DroppedRow {
        group,
        player_id: player_id.to_string(),
        home_team: record.home_team.clone(),
        raw_date: record.game_date.clone(),
        reason,
    });
}

fn raw_numeric(raw: Option<&RawStat>) -> Field<f64> {
    match raw {
        None => Field::missing(),
        Some(RawStat::Number(n)) if n.is_finite() => Field::Parsed(*n),
        Some(other) => parse_numeric(&other.as_text()),
    }
}

fn batting_stats(line: &RawBattingLine, report: &mut NormalizeReport) -> BattingStats {
    let mut num = |column: &'static str, raw: &Option<RawStat>| {
        let field = raw_numeric(raw.as_ref());
        report.note(column, &field);
        field
    };
    BattingStats {
        at_bats: num("at_bats", &line.at_bats),
        runs: num("runs", &line.runs),
        hits: num("hits", &line.hits),
        rbi: num("rbi", &line.rbi),
        walks: num("walks", &line.walks),
        strikeouts: num("strikeouts", &line.strikeouts),
        plate_appearances: num("plate_appearances", &line.plate_appearances),
        batting_avg: num("batting_avg", &line.batting_avg),
        onbase_perc: num("onbase_perc", &line.onbase_perc),
        slugging_perc: num("slugging_perc", &line.slugging_perc),
        onbase_plus_slugging: num("onbase_plus_slugging", &line.onbase_plus_slugging),
        pitches: num("pitches", &line.pitches),
        strikes_total: num("strikes_total", &line.strikes_total),
        wpa_bat: num("wpa_bat", &line.wpa_bat),
        leverage_index_avg: num("leverage_index_avg", &line.leverage_index_avg),
        re24_bat: num("re24_bat", &line.re24_bat),
        putouts: num("putouts", &line.putouts),
        assists: num("assists", &line.assists),
        details: line.details.clone(),
    }
}

fn pitching_stats(line: &RawPitchingLine, report: &mut NormalizeReport) -> PitchingStats {
    let innings = match line.innings_pitched.as_ref() {
        None => Field::missing(),
        Some(raw) => InningsPitched::parse(&raw.as_text()),
    };
    report.note("innings_pitched", &innings);
    let mut num = |column: &'static str, raw: &Option<RawStat>| {
        let field = raw_numeric(raw.as_ref());
        report.note(column, &field);
        field
    };
    PitchingStats {
        innings,
        hits: num("hits", &line.hits),
        runs: num("runs", &line.runs),
        earned_runs: num("earned_runs", &line.earned_runs),
        walks: num("walks", &line.walks),
        strikeouts: num("strikeouts", &line.strikeouts),
        home_runs: num("home_runs", &line.home_runs),
        earned_run_avg: num("earned_run_avg", &line.earned_run_avg),
        batters_faced: num("batters_faced", &line.batters_faced),
        pitches: num("pitches", &line.pitches),
        strikes_total: num("strikes_total", &line.strikes_total),
        strikes_contact: num("strikes_contact", &line.strikes_contact),
        strikes_swinging: num("strikes_swinging", &line.strikes_swinging),
        strikes_looking: num("strikes_looking", &line.strikes_looking),
        inplay_gb_total: num("inplay_gb_total", &line.inplay_gb_total),
        inplay_fb_total: num("inplay_fb_total", &line.inplay_fb_total),
        inplay_ld: num("inplay_ld", &line.inplay_ld),
        inplay_unk: num("inplay_unk", &line.inplay_unk),
        game_score: num("game_score", &line.game_score),
        inherited_runners: num("inherited_runners", &line.inherited_runners),
        inherited_score: num("inherited_score", &line.inherited_score),
        wpa_def: num("wpa_def", &line.wpa_def),
        leverage_index_avg: num("leverage_index_avg", &line.leverage_index_avg),
        re24_def: num("re24_def", &line.re24_def),
        decision: line.position.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_date_splits_weekday() {
        let parsed = parse_game_date("Saturday, April 2, 2016");
        let Field::Parsed(gd) = parsed else {
            panic!("expected parsed date");
        };
        assert_eq!(gd.date, NaiveDate::from_ymd_opt(2016, 4, 2).unwrap());
        assert_eq!(gd.day_of_week, Weekday::Sat);
        assert!(matches!(
            parse_game_date("unknown_date"),
            Field::Unresolved(Unresolved::BadDate(_))
        ));
    }

    #[test]
    fn start_time_cleanup() {
        assert_eq!(
            clean_start_time(Some("Start Time: 7:05 p.m. Local")),
            Field::Parsed("7:05 p.m.".to_string())
        );
        assert_eq!(clean_start_time(Some("unknown_start_time")), Field::missing());
        assert_eq!(clean_start_time(None), Field::missing());
    }

    #[test]
    fn stadium_csv_skips_blank_rows() {
        let csv_data = "team_name,stadium\nKansas City Royals,Kauffman Stadium\n,\n";
        let dir = StadiumDirectory::from_csv_reader(csv_data.as_bytes()).unwrap();
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.lookup("Kansas City Royals"), Some("Kauffman Stadium"));
    }
}
