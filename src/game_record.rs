use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

/// A scraped stat cell. The scraper writes text, or the integer `0` when the
/// cell was empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawStat {
    Number(f64),
    Text(String),
}

impl RawStat {
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            RawStat::Number(n) => Cow::Owned(n.to_string()),
            RawStat::Text(s) => Cow::Borrowed(s.as_str()),
        }
    }
}

impl From<&str> for RawStat {
    fn from(value: &str) -> Self {
        RawStat::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBattingLine {
    #[serde(rename = "AB", default)]
    pub at_bats: Option<RawStat>,
    #[serde(rename = "R", default)]
    pub runs: Option<RawStat>,
    #[serde(rename = "H", default)]
    pub hits: Option<RawStat>,
    #[serde(rename = "RBI", default)]
    pub rbi: Option<RawStat>,
    #[serde(rename = "BB", default)]
    pub walks: Option<RawStat>,
    #[serde(rename = "SO", default)]
    pub strikeouts: Option<RawStat>,
    #[serde(rename = "PA", default)]
    pub plate_appearances: Option<RawStat>,
    #[serde(default)]
    pub batting_avg: Option<RawStat>,
    #[serde(default)]
    pub onbase_perc: Option<RawStat>,
    #[serde(default)]
    pub slugging_perc: Option<RawStat>,
    #[serde(default)]
    pub onbase_plus_slugging: Option<RawStat>,
    #[serde(default)]
    pub pitches: Option<RawStat>,
    #[serde(default)]
    pub strikes_total: Option<RawStat>,
    #[serde(default)]
    pub wpa_bat: Option<RawStat>,
    #[serde(default)]
    pub leverage_index_avg: Option<RawStat>,
    #[serde(default)]
    pub re24_bat: Option<RawStat>,
    #[serde(rename = "PO", default)]
    pub putouts: Option<RawStat>,
    #[serde(rename = "A", default)]
    pub assists: Option<RawStat>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPitchingLine {
    #[serde(rename = "IP", default)]
    pub innings_pitched: Option<RawStat>,
    #[serde(rename = "H", default)]
    pub hits: Option<RawStat>,
    #[serde(rename = "R", default)]
    pub runs: Option<RawStat>,
    #[serde(rename = "ER", default)]
    pub earned_runs: Option<RawStat>,
    #[serde(rename = "BB", default)]
    pub walks: Option<RawStat>,
    #[serde(rename = "SO", default)]
    pub strikeouts: Option<RawStat>,
    #[serde(rename = "HR", default)]
    pub home_runs: Option<RawStat>,
    #[serde(default)]
    pub earned_run_avg: Option<RawStat>,
    #[serde(default)]
    pub batters_faced: Option<RawStat>,
    #[serde(default)]
    pub pitches: Option<RawStat>,
    #[serde(default)]
    pub strikes_total: Option<RawStat>,
    #[serde(default)]
    pub strikes_contact: Option<RawStat>,
    #[serde(default)]
    pub strikes_swinging: Option<RawStat>,
    #[serde(default)]
    pub strikes_looking: Option<RawStat>,
    #[serde(default)]
    pub inplay_gb_total: Option<RawStat>,
    #[serde(default)]
    pub inplay_fb_total: Option<RawStat>,
    #[serde(default)]
    pub inplay_ld: Option<RawStat>,
    #[serde(default)]
    pub inplay_unk: Option<RawStat>,
    #[serde(default)]
    pub game_score: Option<RawStat>,
    #[serde(default)]
    pub inherited_runners: Option<RawStat>,
    #[serde(default)]
    pub inherited_score: Option<RawStat>,
    #[serde(default)]
    pub wpa_def: Option<RawStat>,
    #[serde(default)]
    pub leverage_index_avg: Option<RawStat>,
    #[serde(default)]
    pub re24_def: Option<RawStat>,
    /// Decision text for pitchers, e.g. "W (3-1)".
    #[serde(default)]
    pub position: Option<String>,
}

/// Player-keyed stat lines in source order. Order matters: the first pitcher
/// listed for a team is its starter.
#[derive(Debug, Clone, PartialEq)]
pub struct StatGroup<T>(pub Vec<(String, T)>);

impl<T> Default for StatGroup<T> {
    fn default() -> Self {
        StatGroup(Vec::new())
    }
}

impl<T> StatGroup<T> {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(id, line)| (id.as_str(), line))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Serialize> Serialize for StatGroup<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (player, line) in &self.0 {
            map.serialize_entry(player, line)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for StatGroup<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct GroupVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for GroupVisitor<T> {
            type Value = StatGroup<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of player id to stat line")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((player, line)) = access.next_entry::<String, T>()? {
                    out.push((player, line));
                }
                Ok(StatGroup(out))
            }

            fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(StatGroup(Vec::new()))
            }
        }

        deserializer.deserialize_any(GroupVisitor(PhantomData))
    }
}

/// One box score as produced by the scraping collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    #[serde(default)]
    pub away_team: String,
    #[serde(default)]
    pub home_team: String,
    /// "Weekday, Month Day, Year".
    #[serde(default)]
    pub game_date: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub attendance: Option<RawStat>,
    #[serde(default)]
    pub game_situation: Option<String>,
    #[serde(default)]
    pub away_batter_stats: StatGroup<RawBattingLine>,
    #[serde(default)]
    pub home_batter_stats: StatGroup<RawBattingLine>,
    #[serde(default)]
    pub away_pitching_stats: StatGroup<RawPitchingLine>,
    #[serde(default)]
    pub home_pitching_stats: StatGroup<RawPitchingLine>,
}

#[derive(Debug, Clone, Default)]
pub struct GameRecordBatch {
    pub records: Vec<GameRecord>,
    /// (1-based line number, parse error) for lines that were skipped.
    pub rejected: Vec<(usize, String)>,
}

pub fn parse_game_records(reader: impl BufRead) -> Result<GameRecordBatch> {
    let mut batch = GameRecordBatch::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read line {}", idx + 1))?;
        let trimmed = line.trim().trim_end_matches(',');
        if trimmed.is_empty() || trimmed == "[" || trimmed == "]" {
            continue;
        }
        match serde_json::from_str::<GameRecord>(trimmed) {
            Ok(record) => batch.records.push(record),
            Err(err) => {
                warn!(line = idx + 1, %err, "skipping malformed game record");
                batch.rejected.push((idx + 1, err.to_string()));
            }
        }
    }
    Ok(batch)
}

pub fn read_game_records(path: &Path) -> Result<GameRecordBatch> {
    let file = File::open(path).with_context(|| format!("open game records {}", path.display()))?;
    parse_game_records(BufReader::new(file))
}

pub fn write_game_records(mut writer: impl Write, records: &[GameRecord]) -> Result<()> {
    for record in records {
        let line = serde_json::to_string(record).context("serialize game record")?;
        writeln!(writer, "{line}").context("write game record")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_group_keeps_source_order() {
        let raw = r#"{"zeta01":{"IP":"6.0"},"alpha01":{"IP":"3.0"},"mid01":{"IP":"0.1"}}"#;
        let group: StatGroup<RawPitchingLine> = serde_json::from_str(raw).unwrap();
        let ids: Vec<&str> = group.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["zeta01", "alpha01", "mid01"]);
    }

    #[test]
    fn empty_cells_arrive_as_zero() {
        let raw = r#"{"H":0,"RBI":"2","details":"2B"}"#;
        let line: RawBattingLine = serde_json::from_str(raw).unwrap();
        assert_eq!(line.hits, Some(RawStat::Number(0.0)));
        assert_eq!(line.rbi.as_ref().map(|s| s.as_text().into_owned()), Some("2".to_string()));
        assert!(line.walks.is_none());
    }

    #[test]
    fn malformed_lines_are_reported_not_fatal() {
        let input = "{\"home_team\":\"A\"}\nnot json\n\n{\"home_team\":\"B\"}\n";
        let batch = parse_game_records(input.as_bytes()).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].0, 2);
    }
}
