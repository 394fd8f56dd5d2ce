use chrono::{Datelike, Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::game_record::{GameRecord, RawBattingLine, RawPitchingLine, RawStat, StatGroup};
use crate::scoring::PlateEvent;

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub teams: usize,
    pub first_season: i32,
    pub seasons: usize,
    pub game_days: usize,
    pub batters_per_team: usize,
    pub pitchers_per_team: usize,
    pub doubleheader_rate: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            teams: 6,
            first_season: 2016,
            seasons: 2,
            game_days: 40,
            batters_per_team: 11,
            pitchers_per_team: 8,
            doubleheader_rate: 0.03,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticData {
    pub records: Vec<GameRecord>,
    pub plate_events: Vec<PlateEvent>,
    /// `team_name,stadium` rows for a `StadiumDirectory`.
    pub stadium_csv: String,
}

pub fn team_name(idx: usize) -> String {
    format!("Team {}", (b'A' + (idx % 26) as u8) as char)
}

pub fn stadium_name(idx: usize) -> String {
    format!("Park {idx}")
}

/// Deterministic box scores for a small league. The same config always
/// yields the same records.
pub fn generate(cfg: &SyntheticConfig) -> SyntheticData {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let teams = cfg.teams.max(2);
    let mut out = SyntheticData {
        stadium_csv: stadium_csv(teams),
        ..SyntheticData::default()
    };

    for season in 0..cfg.seasons {
        let year = cfg.first_season + season as i32;
        let Some(opening) = NaiveDate::from_ymd_opt(year, 4, 1) else {
            continue;
        };
        for day in 0..cfg.game_days {
            let date = opening + Duration::days(day as i64);
            let mut order: Vec<usize> = (0..teams).collect();
            order.shuffle(&mut rng);
            for pair in order.chunks_exact(2) {
                let (home, away) = (pair[0], pair[1]);
                let games = if rng.gen_bool(cfg.doubleheader_rate.clamp(0.0, 1.0)) { 2 } else { 1 };
                for game in 0..games {
                    let record = game_record(&mut rng, cfg, date, home, away, game, &mut out.plate_events);
                    out.records.push(record);
                }
            }
        }
    }
    out
}

fn stadium_csv(teams: usize) -> String {
    let mut csv = String::from("team_name,stadium\n");
    for idx in 0..teams {
        csv.push_str(&format!("{},{}\n", team_name(idx), stadium_name(idx)));
    }
    csv
}

fn game_record(
    rng: &mut StdRng,
    cfg: &SyntheticConfig,
    date: NaiveDate,
    home: usize,
    away: usize,
    game: usize,
    events: &mut Vec<PlateEvent>,
) -> GameRecord {
    let hour = if game == 0 { 1 } else { 7 };
    let home_wins = rng.gen_bool(0.54);
    let (away_batter_stats, away_pitching_stats) = team_lines(rng, cfg, date, away, !home_wins, events);
    let (home_batter_stats, home_pitching_stats) = team_lines(rng, cfg, date, home, home_wins, events);
    let attendance: u32 = rng.gen_range(12_000..48_000);

    GameRecord {
        away_team: team_name(away),
        home_team: team_name(home),
        game_date: Some(date.format("%A, %B %-d, %Y").to_string()),
        start_time: Some(format!("Start Time: {hour}:{:02} p.m. Local", rng.gen_range(0..4) * 5)),
        location: rng.gen_bool(0.5).then(|| stadium_name(home)),
        attendance: Some(RawStat::Text(thousands(attendance))),
        game_situation: Some(if date.weekday().number_from_monday() >= 6 {
            "Day Game, on grass".to_string()
        } else {
            "Night Game, on grass".to_string()
        }),
        away_batter_stats,
        home_batter_stats,
        away_pitching_stats,
        home_pitching_stats,
    }
}

fn thousands(n: u32) -> String {
    if n >= 1000 {
        format!("{},{:03}", n / 1000, n % 1000)
    } else {
        n.to_string()
    }
}

fn text(value: impl ToString) -> Option<RawStat> {
    Some(RawStat::Text(value.to_string()))
}

/// Cell as the scraper writes it: the integer 0 when empty.
fn cell(value: u32) -> Option<RawStat> {
    if value == 0 {
        Some(RawStat::Number(0.0))
    } else {
        text(value)
    }
}

fn team_lines(
    rng: &mut StdRng,
    cfg: &SyntheticConfig,
    date: NaiveDate,
    team: usize,
    won: bool,
    events: &mut Vec<PlateEvent>,
) -> (StatGroup<RawBattingLine>, StatGroup<RawPitchingLine>) {
    let mut roster: Vec<usize> = (0..cfg.batters_per_team.max(1)).collect();
    roster.shuffle(rng);
    roster.truncate(9);

    let mut batting = Vec::with_capacity(roster.len());
    for slot in roster {
        let player = format!("bat{team:02}{slot:02}");
        let at_bats: u32 = rng.gen_range(2..=5);
        let mut outcomes = Vec::new();
        let mut details = Vec::new();
        let mut hits = 0;
        for _ in 0..at_bats {
            let roll: f64 = rng.r#gen();
            let outcome = match roll {
                r if r < 0.16 => "single",
                r if r < 0.21 => "double",
                r if r < 0.22 => "triple",
                r if r < 0.25 => "home_run",
                _ => "field_out",
            };
            match outcome {
                "double" => details.push("2B"),
                "triple" => details.push("3B"),
                "home_run" => details.push("HR"),
                _ => {}
            }
            if outcome != "field_out" {
                hits += 1;
            }
            outcomes.push(outcome);
        }
        let walks: u32 = rng.gen_range(0..=1);
        if rng.gen_bool(0.03) {
            outcomes.push("hit_by_pitch");
        }
        for outcome in outcomes {
            events.push(PlateEvent {
                batter: player.clone(),
                game_date: date,
                events: outcome.to_string(),
            });
        }
        let rbi = rng.gen_range(0..=hits + 1).min(4);
        let runs = rng.gen_range(0..=hits.max(walks));
        batting.push((
            player,
            RawBattingLine {
                at_bats: cell(at_bats),
                runs: cell(runs),
                hits: cell(hits),
                rbi: cell(rbi),
                walks: cell(walks),
                strikeouts: cell(rng.gen_range(0..=at_bats - hits.min(at_bats))),
                plate_appearances: cell(at_bats + walks),
                batting_avg: text(format!("{:.3}", rng.gen_range(0.180..0.330))),
                onbase_perc: text(format!("{:.3}", rng.gen_range(0.250..0.420))),
                slugging_perc: text(format!("{:.3}", rng.gen_range(0.300..0.600))),
                onbase_plus_slugging: text(format!("{:.3}", rng.gen_range(0.550..1.000))),
                pitches: cell(rng.gen_range(8..25)),
                strikes_total: cell(rng.gen_range(4..16)),
                wpa_bat: text(format!("{:.3}", rng.gen_range(-0.2..0.3))),
                leverage_index_avg: text(format!("{:.2}", rng.gen_range(0.4..1.8))),
                re24_bat: text(format!("{:.1}", rng.gen_range(-1.5..2.5))),
                putouts: cell(rng.gen_range(0..5)),
                assists: cell(rng.gen_range(0..3)),
                details: (!details.is_empty()).then(|| details.join(",")),
                position: Some(["C", "1B", "2B", "SS", "3B", "LF", "CF", "RF", "DH"][slot % 9].to_string()),
            },
        ));
    }

    let staff = cfg.pitchers_per_team.max(2);
    let rotation = staff.min(5);
    let starter = (date.ordinal() as usize) % rotation;
    let mut relievers: Vec<usize> = (rotation..staff).collect();
    relievers.shuffle(rng);
    relievers.truncate(rng.gen_range(1..=3));

    let mut pitching = Vec::with_capacity(1 + relievers.len());
    let starter_outs: u32 = rng.gen_range(9..=24);
    let record = (rng.gen_range(1..12), rng.gen_range(0..10));
    let decision = won.then(|| format!("W ({}-{})", record.0, record.1));
    pitching.push((format!("pit{team:02}{starter:02}"), pitching_line(rng, starter_outs, decision)));
    for reliever in relievers {
        let outs = rng.gen_range(1..=6);
        pitching.push((format!("pit{team:02}{reliever:02}"), pitching_line(rng, outs, None)));
    }

    (StatGroup(batting), StatGroup(pitching))
}

fn pitching_line(rng: &mut StdRng, outs: u32, decision: Option<String>) -> RawPitchingLine {
    let innings = format!("{}.{}", outs / 3, outs % 3);
    let batters = outs + rng.gen_range(1..8);
    RawPitchingLine {
        innings_pitched: text(innings),
        hits: cell(rng.gen_range(0..=outs / 3 + 2)),
        runs: cell(rng.gen_range(0..=3)),
        earned_runs: cell(rng.gen_range(0..=3)),
        walks: cell(rng.gen_range(0..=3)),
        strikeouts: cell(rng.gen_range(0..=outs / 2 + 1)),
        home_runs: cell(rng.gen_range(0..=1)),
        earned_run_avg: text(format!("{:.2}", rng.gen_range(1.5..6.5))),
        batters_faced: cell(batters),
        pitches: cell(batters * 4),
        strikes_total: cell(batters * 5 / 2),
        strikes_contact: cell(batters),
        strikes_swinging: cell(batters / 3),
        strikes_looking: cell(batters / 4),
        inplay_gb_total: cell(rng.gen_range(0..=outs / 2)),
        inplay_fb_total: cell(rng.gen_range(0..=outs / 2)),
        inplay_ld: cell(rng.gen_range(0..=3)),
        inplay_unk: cell(0),
        game_score: cell(rng.gen_range(30..80)),
        inherited_runners: cell(0),
        inherited_score: cell(0),
        wpa_def: text(format!("{:.3}", rng.gen_range(-0.3..0.4))),
        leverage_index_avg: text(format!("{:.2}", rng.gen_range(0.5..2.0))),
        re24_def: text(format!("{:.1}", rng.gen_range(-2.0..2.5))),
        position: decision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_records() {
        let cfg = SyntheticConfig {
            game_days: 5,
            seasons: 1,
            ..SyntheticConfig::default()
        };
        let a = generate(&cfg);
        let b = generate(&cfg);
        assert_eq!(a.records, b.records);
        assert_eq!(a.plate_events, b.plate_events);
        assert!(a.records.len() >= 15);
        assert!(a.stadium_csv.starts_with("team_name,stadium\nTeam A,Park 0"));
    }

    #[test]
    fn thousands_separator() {
        assert_eq!(thousands(37491), "37,491");
        assert_eq!(thousands(12005), "12,005");
    }
}
