use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use thiserror::Error;

pub const UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One measurement interval as merged from the component requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub datetime: String,
    pub values: BTreeMap<String, JsonValue>,
}

/// Rows keyed by the upstream end timestamp. Rows may be partial when a
/// component did not report an interval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedStationRecord {
    rows: BTreeMap<String, RawRow>,
}

impl MergedStationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, end_timestamp: &str, component: &str, value: JsonValue) {
        self.rows
            .entry(end_timestamp.to_string())
            .or_insert_with(|| RawRow {
                datetime: end_timestamp.to_string(),
                values: BTreeMap::new(),
            })
            .values
            .insert(component.to_string(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, end_timestamp: &str) -> Option<&RawRow> {
        self.rows.get(end_timestamp)
    }

    pub fn into_rows(self) -> impl Iterator<Item = RawRow> {
        self.rows.into_values()
    }
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("row timestamp {datetime:?} is not an RFC 3339 timestamp: {source}")]
    InvalidTimestamp {
        datetime: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("value {value} of {component} at {datetime} is not numeric")]
    InvalidMeasurement {
        datetime: String,
        component: String,
        value: JsonValue,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRow {
    pub datetime: DateTime<FixedOffset>,
    pub datetime_utc: String,
    pub unix_time: i64,
    #[serde(flatten)]
    pub values: BTreeMap<String, Option<f64>>,
}

impl NormalizedRow {
    fn derive(datetime: DateTime<FixedOffset>, values: BTreeMap<String, Option<f64>>) -> Self {
        let utc = datetime.with_timezone(&Utc);
        Self {
            datetime,
            datetime_utc: utc.format(UTC_FORMAT).to_string(),
            unix_time: utc.timestamp(),
            values,
        }
    }

    #[cfg(test)]
    pub(crate) fn value(&self, component: &str) -> Option<f64> {
        self.values.get(component).copied().flatten()
    }
}

/// Chronologically sorted station rows ready for publishing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NormalizedTable {
    rows: Vec<NormalizedRow>,
}

impl NormalizedTable {
    fn from_parts(mut parts: Vec<(DateTime<FixedOffset>, BTreeMap<String, Option<f64>>)>) -> Self {
        parts.sort_by_key(|(datetime, _)| *datetime);
        Self {
            rows: parts
                .into_iter()
                .map(|(datetime, values)| NormalizedRow::derive(datetime, values))
                .collect(),
        }
    }

    /// Re-derives the UTC columns and ordering; a no-op on a normalized table.
    pub fn normalize(self) -> Self {
        Self::from_parts(
            self.rows
                .into_iter()
                .map(|row| (row.datetime, row.values))
                .collect(),
        )
    }

    #[cfg(test)]
    pub(crate) fn rows(&self) -> &[NormalizedRow] {
        &self.rows
    }

    pub fn first(&self) -> Option<&NormalizedRow> {
        self.rows.first()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub fn normalize(record: MergedStationRecord) -> Result<NormalizedTable, NormalizeError> {
    let mut parts = Vec::with_capacity(record.len());
    for row in record.into_rows() {
        let datetime = DateTime::parse_from_rfc3339(row.datetime.trim()).map_err(|source| {
            NormalizeError::InvalidTimestamp {
                datetime: row.datetime.clone(),
                source,
            }
        })?;
        let mut values = BTreeMap::new();
        for (component, raw) in row.values {
            let Some(value) = coerce_value(&raw) else {
                return Err(NormalizeError::InvalidMeasurement {
                    datetime: row.datetime,
                    component,
                    value: raw,
                });
            };
            values.insert(component, value);
        }
        parts.push((datetime, values));
    }
    Ok(NormalizedTable::from_parts(parts))
}

// `Some(None)` marks a reported-but-missing value.
fn coerce_value(raw: &JsonValue) -> Option<Option<f64>> {
    match raw {
        JsonValue::Null => Some(None),
        JsonValue::Number(number) => number.as_f64().map(Some),
        JsonValue::String(text) => text
            .trim()
            .parse::<f64>()
            .ok()
            .map(|value| value.is_finite().then_some(value)),
        JsonValue::Bool(_) | JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}
