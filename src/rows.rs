use std::fmt;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::field::Field;
use crate::scoring::InningsPitched;

/// Identifier for one player's appearance in one game: date, venue, player.
///
/// Two games by the same player at the same venue on the same date
/// (doubleheaders) collide. The normalizer keeps the first and reports the
/// collision; nothing here tries to disambiguate them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    pub fn compose(date: NaiveDate, venue: &str, player_id: &str) -> Self {
        GameId(format!("{}_{}_{}", date.format("%Y-%m-%d"), venue.trim(), player_id.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameId {
    fn from(value: &str) -> Self {
        GameId(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub fn label(self) -> &'static str {
        match self {
            Side::Home => "home",
            Side::Away => "away",
        }
    }
}

/// A flat stat line whose numeric columns can be read by index.
pub trait StatLine {
    const COLUMNS: &'static [&'static str];

    fn value(&self, column: usize) -> Option<f64>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BattingStats {
    pub at_bats: Field<f64>,
    pub runs: Field<f64>,
    pub hits: Field<f64>,
    pub rbi: Field<f64>,
    pub walks: Field<f64>,
    pub strikeouts: Field<f64>,
    pub plate_appearances: Field<f64>,
    pub batting_avg: Field<f64>,
    pub onbase_perc: Field<f64>,
    pub slugging_perc: Field<f64>,
    pub onbase_plus_slugging: Field<f64>,
    pub pitches: Field<f64>,
    pub strikes_total: Field<f64>,
    pub wpa_bat: Field<f64>,
    pub leverage_index_avg: Field<f64>,
    pub re24_bat: Field<f64>,
    pub putouts: Field<f64>,
    pub assists: Field<f64>,
    /// Free-text event summary, e.g. "2B,HR".
    pub details: Option<String>,
}

impl StatLine for BattingStats {
    const COLUMNS: &'static [&'static str] = &[
        "at_bats",
        "runs",
        "hits",
        "rbi",
        "walks",
        "strikeouts",
        "plate_appearances",
        "batting_avg",
        "onbase_perc",
        "slugging_perc",
        "onbase_plus_slugging",
        "pitches",
        "strikes_total",
        "wpa_bat",
        "leverage_index_avg",
        "re24_bat",
        "putouts",
        "assists",
    ];

    fn value(&self, column: usize) -> Option<f64> {
        let field = match column {
            0 => &self.at_bats,
            1 => &self.runs,
            2 => &self.hits,
            3 => &self.rbi,
            4 => &self.walks,
            5 => &self.strikeouts,
            6 => &self.plate_appearances,
            7 => &self.batting_avg,
            8 => &self.onbase_perc,
            9 => &self.slugging_perc,
            10 => &self.onbase_plus_slugging,
            11 => &self.pitches,
            12 => &self.strikes_total,
            13 => &self.wpa_bat,
            14 => &self.leverage_index_avg,
            15 => &self.re24_bat,
            16 => &self.putouts,
            17 => &self.assists,
            _ => return None,
        };
        field.num()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PitchingStats {
    pub innings: Field<InningsPitched>,
    pub hits: Field<f64>,
    pub runs: Field<f64>,
    pub earned_runs: Field<f64>,
    pub walks: Field<f64>,
    pub strikeouts: Field<f64>,
    pub home_runs: Field<f64>,
    pub earned_run_avg: Field<f64>,
    pub batters_faced: Field<f64>,
    pub pitches: Field<f64>,
    pub strikes_total: Field<f64>,
    pub strikes_contact: Field<f64>,
    pub strikes_swinging: Field<f64>,
    pub strikes_looking: Field<f64>,
    pub inplay_gb_total: Field<f64>,
    pub inplay_fb_total: Field<f64>,
    pub inplay_ld: Field<f64>,
    pub inplay_unk: Field<f64>,
    pub game_score: Field<f64>,
    pub inherited_runners: Field<f64>,
    pub inherited_score: Field<f64>,
    pub wpa_def: Field<f64>,
    pub leverage_index_avg: Field<f64>,
    pub re24_def: Field<f64>,
    /// Decision text, e.g. "W (3-1)". A win marker here means the pitcher got the win.
    pub decision: Option<String>,
}

impl StatLine for PitchingStats {
    const COLUMNS: &'static [&'static str] = &[
        "innings_pitched",
        "hits",
        "runs",
        "earned_runs",
        "walks",
        "strikeouts",
        "home_runs",
        "earned_run_avg",
        "batters_faced",
        "pitches",
        "strikes_total",
        "strikes_contact",
        "strikes_swinging",
        "strikes_looking",
        "inplay_gb_total",
        "inplay_fb_total",
        "inplay_ld",
        "inplay_unk",
        "game_score",
        "inherited_runners",
        "inherited_score",
        "wpa_def",
        "leverage_index_avg",
        "re24_def",
    ];

    fn value(&self, column: usize) -> Option<f64> {
        let field = match column {
            0 => return self.innings.value().map(InningsPitched::as_innings),
            1 => &self.hits,
            2 => &self.runs,
            3 => &self.earned_runs,
            4 => &self.walks,
            5 => &self.strikeouts,
            6 => &self.home_runs,
            7 => &self.earned_run_avg,
            8 => &self.batters_faced,
            9 => &self.pitches,
            10 => &self.strikes_total,
            11 => &self.strikes_contact,
            12 => &self.strikes_swinging,
            13 => &self.strikes_looking,
            14 => &self.inplay_gb_total,
            15 => &self.inplay_fb_total,
            16 => &self.inplay_ld,
            17 => &self.inplay_unk,
            18 => &self.game_score,
            19 => &self.inherited_runners,
            20 => &self.inherited_score,
            21 => &self.wpa_def,
            22 => &self.leverage_index_avg,
            23 => &self.re24_def,
            _ => return None,
        };
        field.num()
    }
}

/// One player's line in one game plus the game context it was played in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerGameRow<S> {
    pub player_id: String,
    pub game_id: GameId,
    pub side: Side,
    pub team: String,
    pub opponent: String,
    pub role: Option<String>,
    pub date: NaiveDate,
    pub year: i32,
    pub day_of_week: Weekday,
    pub start_time: Field<String>,
    pub stadium: Field<String>,
    pub attendance: Field<f64>,
    pub game_situation: Option<String>,
    pub stats: S,
}

pub type BattingRow = PlayerGameRow<BattingStats>;
pub type PitchingRow = PlayerGameRow<PitchingStats>;

/// Row access needed for entity-grouped temporal windowing.
pub trait EntityRow: Sync {
    const NUMERIC_COLUMNS: &'static [&'static str];

    fn entity(&self) -> &str;
    fn date(&self) -> NaiveDate;
    fn game_id(&self) -> &GameId;
    fn numeric_value(&self, column: usize) -> Option<f64>;

    fn year(&self) -> i32 {
        self.date().year()
    }
}

impl<S: StatLine + Sync> EntityRow for PlayerGameRow<S> {
    const NUMERIC_COLUMNS: &'static [&'static str] = S::COLUMNS;

    fn entity(&self) -> &str {
        &self.player_id
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn game_id(&self) -> &GameId {
        &self.game_id
    }

    fn numeric_value(&self, column: usize) -> Option<f64> {
        self.stats.value(column)
    }

    fn year(&self) -> i32 {
        self.year
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_id_joins_date_venue_player() {
        let date = NaiveDate::from_ymd_opt(2016, 4, 3).unwrap();
        let id = GameId::compose(date, "Kauffman Stadium", "gordoal01");
        assert_eq!(id.as_str(), "2016-04-03_Kauffman Stadium_gordoal01");
    }

    #[test]
    fn innings_column_uses_true_innings() {
        let stats = PitchingStats {
            innings: Field::Parsed(InningsPitched { whole: 6, outs: 2 }),
            ..PitchingStats::default()
        };
        let v = stats.value(0).unwrap();
        assert!((v - (6.0 + 2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(stats.value(3), None);
        assert_eq!(PitchingStats::COLUMNS.len(), 24);
        assert_eq!(BattingStats::COLUMNS.len(), 18);
    }
}
