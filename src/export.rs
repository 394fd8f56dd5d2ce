use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::features::FeatureTable;
use crate::validation::ValidationReport;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub folds: usize,
    pub predictions: usize,
    pub feature_rows: usize,
    pub feature_columns: usize,
}

pub struct ExportProgress {
    pub current: usize,
    pub total: usize,
    pub message: String,
}

pub fn export_workbook(path: &Path, report: &ValidationReport, features: &[&FeatureTable]) -> Result<ExportReport> {
    export_workbook_with_progress(path, report, features, |_| {})
}

/// Writes `Folds`, `Predictions` and one `Features` sheet covering every
/// table passed in.
pub fn export_workbook_with_progress(
    path: &Path,
    report: &ValidationReport,
    features: &[&FeatureTable],
    mut on_progress: impl FnMut(ExportProgress),
) -> Result<ExportReport> {
    let total = 3;

    let mut fold_rows = vec![
        [
            "Fold",
            "Train Rows",
            "Test Rows",
            "Train End",
            "Test Start",
            "Test End",
            "Train MAE",
            "Test MAE",
        ]
        .map(String::from)
        .to_vec(),
    ];
    for f in &report.folds {
        fold_rows.push(vec![
            f.fold_index.to_string(),
            f.train_rows.to_string(),
            f.test_rows.to_string(),
            f.train_end.to_string(),
            f.test_start.to_string(),
            f.test_end.to_string(),
            format!("{:.4}", f.train_mae),
            format!("{:.4}", f.test_mae),
        ]);
    }
    fold_rows.push(vec![
        "mean".to_string(),
        String::new(),
        String::new(),
        String::new(),
        String::new(),
        String::new(),
        format!("{:.4}", report.mean_train_mae),
        format!("{:.4}", report.mean_test_mae),
    ]);
    on_progress(ExportProgress {
        current: 1,
        total,
        message: format!("{} folds", report.folds.len()),
    });

    let mut prediction_rows = vec![
        ["Game ID", "Fold", "Predicted", "Actual"]
            .map(String::from)
            .to_vec(),
    ];
    for p in &report.predictions {
        prediction_rows.push(vec![
            p.game_id.to_string(),
            p.fold_index.to_string(),
            format!("{:.3}", p.predicted),
            format!("{:.3}", p.actual),
        ]);
    }
    on_progress(ExportProgress {
        current: 2,
        total,
        message: format!("{} predictions", report.predictions.len()),
    });

    let mut feature_rows: Vec<Vec<String>> = Vec::new();
    let mut header = vec!["Table".to_string(), "Game ID".to_string()];
    let width = features.iter().map(|t| t.columns.len()).max().unwrap_or(0);
    header.extend((1..=width).map(|i| format!("Col {i}")));
    feature_rows.push(header);
    let mut feature_columns = 0;
    for table in features {
        feature_columns += table.columns.len();
        let mut names = vec![table.name.clone(), "column".to_string()];
        names.extend(table.columns.iter().cloned());
        feature_rows.push(names);
        for row in &table.rows {
            let mut cells = vec![table.name.clone(), row.game_id.to_string()];
            cells.extend(row.values.iter().map(|v| opt_to_string(v.map(|x| format!("{x:.4}")))));
            feature_rows.push(cells);
        }
    }
    on_progress(ExportProgress {
        current: 3,
        total,
        message: format!("{} feature tables", features.len()),
    });

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Folds")?;
        write_rows(sheet, &fold_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Predictions")?;
        write_rows(sheet, &prediction_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Features")?;
        write_rows(sheet, &feature_rows)?;
    }

    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;

    Ok(ExportReport {
        folds: report.folds.len(),
        predictions: report.predictions.len(),
        feature_rows: features.iter().map(|t| t.rows.len()).sum(),
        feature_columns,
    })
}

fn opt_to_string<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<String>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            worksheet
                .write_string(row_idx as u32, col_idx as u16, value)
                .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}
