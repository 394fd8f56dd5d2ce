use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a field could not be resolved to a typed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "raw", rename_all = "snake_case")]
pub enum Unresolved {
    /// The source cell was absent or blank.
    Missing,
    NotNumeric(String),
    BadDate(String),
    OutOfRange(String),
    UnknownStadium(String),
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unresolved::Missing => write!(f, "missing"),
            Unresolved::NotNumeric(raw) => write!(f, "not numeric: {raw:?}"),
            Unresolved::BadDate(raw) => write!(f, "unparseable date: {raw:?}"),
            Unresolved::OutOfRange(raw) => write!(f, "out of range: {raw:?}"),
            Unresolved::UnknownStadium(raw) => write!(f, "unknown stadium for {raw:?}"),
        }
    }
}

/// A parsed value, or the reason it could not be parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field<T> {
    Parsed(T),
    Unresolved(Unresolved),
}

impl<T> Field<T> {
    pub fn missing() -> Self {
        Field::Unresolved(Unresolved::Missing)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Parsed(v) => Some(v),
            Field::Unresolved(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Field::Parsed(v) => Some(v),
            Field::Unresolved(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Field::Parsed(_))
    }

    pub fn reason(&self) -> Option<&Unresolved> {
        match self {
            Field::Parsed(_) => None,
            Field::Unresolved(r) => Some(r),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        match self {
            Field::Parsed(v) => Field::Parsed(f(v)),
            Field::Unresolved(r) => Field::Unresolved(r),
        }
    }
}

impl Field<f64> {
    /// Numeric view used by every downstream computation: unresolved is missing.
    pub fn num(&self) -> Option<f64> {
        self.value().copied()
    }
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::missing()
    }
}

/// Coerce free text into a number. Thousands separators are accepted so that
/// attendance figures like "37,491" resolve.
pub fn parse_numeric(raw: &str) -> Field<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Field::missing();
    }
    let cleaned: String = trimmed.chars().filter(|ch| *ch != ',').collect();
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => Field::Parsed(v),
        _ => Field::Unresolved(Unresolved::NotNumeric(trimmed.to_string())),
    }
}
