use chrono::NaiveDate;

use mlb_moneyball::PipelineError;
use mlb_moneyball::features::{FeatureEngineer, FeatureTable};
use mlb_moneyball::rows::{EntityRow, GameId};
use mlb_moneyball::window::{MinObservations, WindowPolicy};

#[derive(Debug, Clone)]
struct Line {
    player: &'static str,
    date: NaiveDate,
    id: GameId,
    value: Option<f64>,
}

impl EntityRow for Line {
    const NUMERIC_COLUMNS: &'static [&'static str] = &["runs"];

    fn entity(&self) -> &str {
        self.player
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn game_id(&self) -> &GameId {
        &self.id
    }

    fn numeric_value(&self, _column: usize) -> Option<f64> {
        self.value
    }
}

fn line(player: &'static str, y: i32, m: u32, d: u32, value: Option<f64>) -> Line {
    let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
    Line {
        player,
        date,
        id: GameId::compose(date, "Park", player),
        value,
    }
}

fn get(table: &FeatureTable, row: &Line, column: &str) -> Option<f64> {
    table.value(&row.id, column)
}

fn season() -> Vec<Line> {
    vec![
        line("a", 2016, 4, 1, Some(1.0)),
        line("a", 2016, 4, 2, Some(2.0)),
        line("a", 2016, 4, 3, Some(3.0)),
        line("a", 2016, 4, 4, Some(4.0)),
        line("b", 2016, 4, 1, Some(10.0)),
        line("b", 2016, 4, 3, None),
        line("b", 2016, 4, 5, Some(30.0)),
    ]
}

#[test]
fn rolling_needs_a_full_window_of_prior_games() {
    let rows = season();
    let table = FeatureEngineer::new(&rows).unwrap().calc_rolling_avg(&[2]).unwrap();
    assert_eq!(table.columns, vec!["runs_rolling_2"]);

    assert_eq!(get(&table, &rows[0], "runs_rolling_2"), None);
    assert_eq!(get(&table, &rows[1], "runs_rolling_2"), None);
    assert_eq!(get(&table, &rows[2], "runs_rolling_2"), Some(1.5));
    assert_eq!(get(&table, &rows[3], "runs_rolling_2"), Some(2.5));
    // one of b's two prior games is missing
    assert_eq!(get(&table, &rows[6], "runs_rolling_2"), None);
}

#[test]
fn partial_windows_are_a_configured_policy() {
    let rows = season();
    let policy = WindowPolicy {
        rolling: MinObservations::AtLeast(1),
        expanding_min: 1,
    };
    let table = FeatureEngineer::with_policy(&rows, policy)
        .unwrap()
        .calc_rolling_avg(&[2])
        .unwrap();
    assert_eq!(get(&table, &rows[0], "runs_rolling_2"), None);
    assert_eq!(get(&table, &rows[1], "runs_rolling_2"), Some(1.0));
    assert_eq!(get(&table, &rows[6], "runs_rolling_2"), Some(10.0));
}

#[test]
fn features_never_see_same_day_or_later_values() {
    let rows = season();
    let engineer = FeatureEngineer::new(&rows).unwrap();
    let before = engineer.calc_all(&[2]).unwrap();

    let mut mutated = rows.clone();
    mutated[3].value = Some(1000.0);
    mutated[6].value = Some(-50.0);
    let after = FeatureEngineer::new(&mutated).unwrap().calc_all(&[2]).unwrap();

    for row in &rows {
        for column in &before.columns {
            assert_eq!(
                get(&before, row, column),
                get(&after, row, column),
                "{column} for {} changed after mutating its own or a later game",
                row.id
            );
        }
    }
}

#[test]
fn input_order_does_not_matter() {
    let rows = season();
    let mut shuffled = rows.clone();
    shuffled.reverse();
    shuffled.swap(1, 4);

    let a = FeatureEngineer::new(&rows).unwrap().calc_all(&[2, 3]).unwrap();
    let b = FeatureEngineer::new(&shuffled).unwrap().calc_all(&[2, 3]).unwrap();
    for row in &rows {
        for column in &a.columns {
            assert_eq!(get(&a, row, column), get(&b, row, column));
        }
    }
}

#[test]
fn ytd_resets_each_year_without_prior_year_fallback() {
    let rows = vec![
        line("a", 2016, 9, 1, Some(2.0)),
        line("a", 2016, 9, 2, Some(4.0)),
        line("a", 2017, 4, 3, Some(10.0)),
        line("a", 2017, 4, 4, Some(20.0)),
    ];
    let engineer = FeatureEngineer::new(&rows).unwrap();
    let ytd = engineer.calc_ytd_avgs();
    let lifetime = engineer.calc_lifetime_avg();

    assert_eq!(get(&ytd, &rows[1], "runs_ytd_avg"), Some(2.0));
    assert_eq!(get(&ytd, &rows[2], "runs_ytd_avg"), None);
    assert_eq!(get(&ytd, &rows[3], "runs_ytd_avg"), Some(10.0));

    assert_eq!(get(&lifetime, &rows[0], "runs_lifetime_avg"), None);
    assert_eq!(get(&lifetime, &rows[2], "runs_lifetime_avg"), Some(3.0));
    assert_eq!(get(&lifetime, &rows[3], "runs_lifetime_avg"), Some(16.0 / 3.0));
}

#[test]
fn same_date_games_do_not_see_each_other() {
    let d = NaiveDate::from_ymd_opt(2016, 4, 9).unwrap();
    let rows = vec![
        line("a", 2016, 4, 8, Some(4.0)),
        Line {
            player: "a",
            date: d,
            id: GameId::from("2016-04-09_Park_a_1"),
            value: Some(100.0),
        },
        Line {
            player: "a",
            date: d,
            id: GameId::from("2016-04-09_Park_a_2"),
            value: Some(0.0),
        },
    ];
    let table = FeatureEngineer::new(&rows).unwrap().calc_all(&[1]).unwrap();
    for row in &rows[1..] {
        assert_eq!(get(&table, row, "runs_rolling_1"), Some(4.0));
        assert_eq!(get(&table, row, "runs_lifetime_avg"), Some(4.0));
    }
}

#[test]
fn calc_all_merges_every_family() {
    let rows = season();
    let table = FeatureEngineer::new(&rows).unwrap().calc_all(&[2, 3]).unwrap();
    assert_eq!(table.name, "features");
    assert_eq!(
        table.columns,
        vec!["runs_rolling_2", "runs_rolling_3", "runs_ytd_avg", "runs_lifetime_avg"]
    );
    assert_eq!(table.len(), rows.len());
    assert!(table.check_unique().is_ok());
}

#[test]
fn bad_configuration_is_rejected_up_front() {
    let rows = season();
    let engineer = FeatureEngineer::new(&rows).unwrap();
    assert!(matches!(engineer.calc_rolling_avg(&[]), Err(PipelineError::InvalidConfig(_))));
    assert!(matches!(engineer.calc_rolling_avg(&[0, 2]), Err(PipelineError::InvalidConfig(_))));

    let policy = WindowPolicy {
        rolling: MinObservations::FullWindow,
        expanding_min: 0,
    };
    assert!(FeatureEngineer::with_policy(&rows, policy).is_err());

    let nameless = vec![line("", 2016, 4, 1, Some(1.0))];
    assert!(matches!(
        FeatureEngineer::new(&nameless),
        Err(PipelineError::MissingColumn { .. })
    ));
}
