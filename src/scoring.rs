//! FanDuel-style fantasy scoring for single player-games.
//!
//! Every scoring rule is a pure function of one row so each branch can be
//! tested from literals. The only cross-row step is deciding which pitcher
//! started for each team, which [`starting_pitchers`] does up front.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::field::{Field, Unresolved};
use crate::rows::{
    BattingRow, BattingStats, EntityRow, GameId, PitchingRow, PitchingStats, PlayerGameRow,
    StatLine,
};

/// Earned-run totals above this are scrape artifacts and score as zero.
pub const MAX_EARNED_RUNS: f64 = 14.0;
/// Innings totals above a complete game are scrape artifacts and score as zero.
pub const MAX_INNINGS: f64 = 9.0;

const WIN_MARKER: char = 'W';

/// Innings in box-score notation `W.F`: `whole` complete innings plus `outs`
/// (0, 1 or 2) additional outs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InningsPitched {
    pub whole: u32,
    pub outs: u32,
}

impl InningsPitched {
    pub fn parse(raw: &str) -> Field<InningsPitched> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Field::missing();
        }
        let (whole_raw, outs_raw) = trimmed.split_once('.').unwrap_or((trimmed, "0"));
        let (Ok(whole), Ok(outs)) = (whole_raw.parse::<u32>(), outs_raw.parse::<u32>()) else {
            return Field::Unresolved(Unresolved::NotNumeric(trimmed.to_string()));
        };
        if outs > 2 {
            return Field::Unresolved(Unresolved::OutOfRange(trimmed.to_string()));
        }
        Field::Parsed(InningsPitched { whole, outs })
    }

    /// True innings, e.g. 6.2 -> 6.667.
    pub fn as_innings(&self) -> f64 {
        self.whole as f64 + self.outs as f64 / 3.0
    }

    /// The value as written in the box score, e.g. 6.2 -> 6.2.
    pub fn as_notation(&self) -> f64 {
        self.whole as f64 + self.outs as f64 / 10.0
    }
}

pub fn clamp_earned_runs(earned_runs: f64) -> f64 {
    if earned_runs > MAX_EARNED_RUNS {
        0.0
    } else {
        earned_runs
    }
}

pub fn clamp_innings(innings: InningsPitched) -> InningsPitched {
    if innings.as_notation() > MAX_INNINGS {
        InningsPitched::default()
    } else {
        innings
    }
}

pub fn has_win_marker(decision: Option<&str>) -> bool {
    decision.is_some_and(|text| text.contains(WIN_MARKER))
}

/// Starter with at most 3 earned runs over at least 6 innings. Inputs are
/// clamped first, so the flag always agrees with the values that get scored.
pub fn is_quality_start(first_pitcher: bool, innings: InningsPitched, earned_runs: f64) -> bool {
    let innings = clamp_innings(innings);
    let earned_runs = clamp_earned_runs(earned_runs);
    first_pitcher && earned_runs <= 3.0 && innings.whole >= 6
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchingScoreInput {
    pub innings: InningsPitched,
    pub strikeouts: f64,
    pub earned_runs: f64,
    pub win: bool,
    pub quality_start: bool,
}

/// `3*W + F + 3*SO - 3*ER + 6*win + 4*quality_start`, after clamping.
pub fn pitching_score(input: &PitchingScoreInput) -> f64 {
    let innings = clamp_innings(input.innings);
    let earned_runs = clamp_earned_runs(input.earned_runs);
    3.0 * innings.whole as f64 + innings.outs as f64 + 3.0 * input.strikeouts
        - 3.0 * earned_runs
        + 6.0 * flag(input.win)
        + 4.0 * flag(input.quality_start)
}

/// Per-game hit-type breakdown from the plate-appearance event source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattingEventCounts {
    pub singles: u32,
    pub doubles: u32,
    pub triples: u32,
    pub home_runs: u32,
    pub hit_by_pitch: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BattingScoreInput {
    pub rbi: f64,
    pub runs: f64,
    pub walks: f64,
    pub hits: f64,
    /// `None` when the event source could not resolve the batter for this date.
    pub events: Option<BattingEventCounts>,
}

pub fn batting_score(input: &BattingScoreInput) -> f64 {
    let base = 3.5 * input.rbi + 3.2 * input.runs + 3.0 * input.walks;
    match input.events {
        Some(ev) => {
            base + 3.0 * ev.singles as f64
                + 6.0 * ev.doubles as f64
                + 9.0 * ev.triples as f64
                + 12.0 * ev.home_runs as f64
                + 3.0 * ev.hit_by_pitch as f64
        }
        None => {
            if input.hits == 0.0 && input.rbi == 0.0 && input.walks == 0.0 {
                0.0
            } else {
                base
            }
        }
    }
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

/// One plate appearance from the upstream pitch-level store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateEvent {
    pub batter: String,
    pub game_date: NaiveDate,
    /// Outcome label, e.g. "single", "home_run", "field_out".
    pub events: String,
}

/// Looks up a batter's event breakdown for a calendar date.
pub trait EventSource {
    fn events_for(&self, player_id: &str, date: NaiveDate) -> Option<BattingEventCounts>;
}

#[derive(Debug, Clone, Default)]
pub struct EventLedger {
    by_key: HashMap<(String, NaiveDate), BattingEventCounts>,
}

impl EventLedger {
    pub fn from_plate_events(events: &[PlateEvent]) -> Self {
        let mut by_key: HashMap<(String, NaiveDate), BattingEventCounts> = HashMap::new();
        for ev in events {
            let counts = by_key.entry((ev.batter.clone(), ev.game_date)).or_default();
            match ev.events.trim() {
                "single" => counts.singles += 1,
                "double" => counts.doubles += 1,
                "triple" => counts.triples += 1,
                "home_run" => counts.home_runs += 1,
                "hit_by_pitch" => counts.hit_by_pitch += 1,
                _ => {}
            }
        }
        Self { by_key }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

impl EventSource for EventLedger {
    fn events_for(&self, player_id: &str, date: NaiveDate) -> Option<BattingEventCounts> {
        self.by_key.get(&(player_id.to_string(), date)).copied()
    }
}

/// A row with its target attached. `fd_score` is `None` when an input the
/// score needs was unresolved; such rows are kept but never modeled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scored<S> {
    pub row: PlayerGameRow<S>,
    pub fd_score: Option<f64>,
}

impl<S: StatLine + Sync> EntityRow for Scored<S> {
    const NUMERIC_COLUMNS: &'static [&'static str] = S::COLUMNS;

    fn entity(&self) -> &str {
        &self.row.player_id
    }

    fn date(&self) -> NaiveDate {
        self.row.date
    }

    fn game_id(&self) -> &GameId {
        &self.row.game_id
    }

    fn numeric_value(&self, column: usize) -> Option<f64> {
        self.row.stats.value(column)
    }

    fn year(&self) -> i32 {
        self.row.year
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoringReport {
    pub scored: usize,
    pub unscored: usize,
    /// Batting rows scored without an event breakdown.
    pub fallback: usize,
    pub quality_starts: usize,
}

/// Game ids of every team's first-listed pitcher, grouping by
/// (date, stadium, start time, team) in input order.
pub fn starting_pitchers(rows: &[PitchingRow]) -> HashSet<GameId> {
    let mut seen: HashSet<(NaiveDate, &str, &str, &str)> = HashSet::new();
    let mut starters = HashSet::new();
    for row in rows {
        let key = (
            row.date,
            row.stadium.value().map(String::as_str).unwrap_or(""),
            row.start_time.value().map(String::as_str).unwrap_or(""),
            row.team.as_str(),
        );
        if seen.insert(key) {
            starters.insert(row.game_id.clone());
        }
    }
    starters
}

pub fn pitching_input(stats: &PitchingStats, first_pitcher: bool) -> Option<PitchingScoreInput> {
    let innings = *stats.innings.value()?;
    let strikeouts = stats.strikeouts.num()?;
    let earned_runs = stats.earned_runs.num()?;
    Some(PitchingScoreInput {
        innings,
        strikeouts,
        earned_runs,
        win: has_win_marker(stats.decision.as_deref()),
        quality_start: is_quality_start(first_pitcher, innings, earned_runs),
    })
}

pub fn batting_input(
    row: &BattingRow,
    events: &impl EventSource,
) -> Option<BattingScoreInput> {
    let stats: &BattingStats = &row.stats;
    Some(BattingScoreInput {
        rbi: stats.rbi.num()?,
        runs: stats.runs.num()?,
        walks: stats.walks.num()?,
        hits: stats.hits.num()?,
        events: events.events_for(&row.player_id, row.date),
    })
}

pub fn score_pitching_rows(rows: Vec<PitchingRow>) -> (Vec<Scored<PitchingStats>>, ScoringReport) {
    let starters = starting_pitchers(&rows);
    let mut report = ScoringReport::default();
    let scored = rows
        .into_iter()
        .map(|row| {
            let input = pitching_input(&row.stats, starters.contains(&row.game_id));
            let fd_score = input.map(|inp| {
                if inp.quality_start {
                    report.quality_starts += 1;
                }
                pitching_score(&inp)
            });
            tally(&mut report, fd_score.is_some(), &row.game_id);
            Scored { row, fd_score }
        })
        .collect();
    info!(
        scored = report.scored,
        unscored = report.unscored,
        quality_starts = report.quality_starts,
        "scored pitching rows"
    );
    (scored, report)
}

pub fn score_batting_rows(
    rows: Vec<BattingRow>,
    events: &impl EventSource,
) -> (Vec<Scored<BattingStats>>, ScoringReport) {
    let mut report = ScoringReport::default();
    let scored = rows
        .into_iter()
        .map(|row| {
            let input = batting_input(&row, events);
            let fd_score = input.map(|inp| {
                if inp.events.is_none() {
                    report.fallback += 1;
                }
                batting_score(&inp)
            });
            tally(&mut report, fd_score.is_some(), &row.game_id);
            Scored { row, fd_score }
        })
        .collect();
    info!(
        scored = report.scored,
        unscored = report.unscored,
        fallback = report.fallback,
        "scored batting rows"
    );
    (scored, report)
}

fn tally(report: &mut ScoringReport, scored: bool, game_id: &GameId) {
    if scored {
        report.scored += 1;
    } else {
        report.unscored += 1;
        debug!(%game_id, "score inputs unresolved");
    }
}
