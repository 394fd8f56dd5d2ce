use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Fatal conditions. Anything recoverable at the field or row level is
/// carried as data (`Field::Unresolved`, dropped-row reports) instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("missing required column `{column}` in {stage}")]
    MissingColumn { stage: &'static str, column: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Raised before a merge by `game_id` when a side has more than one row per key.
    #[error("cardinality violation in {table}: {} duplicated game_id(s), first: {}", keys.len(), keys.first().map(String::as_str).unwrap_or("-"))]
    CardinalityViolation { table: String, keys: Vec<String> },

    #[error("{stage} requires rows sorted by {order}; first violation at row {index}")]
    NotTimeOrdered {
        stage: &'static str,
        order: &'static str,
        index: usize,
    },

    #[error("target has {target} values but feature matrix has {rows} rows")]
    MisalignedTarget { rows: usize, target: usize },

    #[error("need at least {needed} samples, got {got}")]
    NotEnoughSamples { needed: usize, got: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn missing_column(stage: &'static str, column: impl Into<String>) -> Self {
        Self::MissingColumn {
            stage,
            column: column.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cardinality_message_names_first_key() {
        let err = PipelineError::CardinalityViolation {
            table: "rolling".to_string(),
            keys: vec!["2016-04-02_Kauffman_gordoal01".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("rolling"));
        assert!(msg.contains("gordoal01"));
    }
}
