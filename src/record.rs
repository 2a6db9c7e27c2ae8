//! Source records and normalized field values

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};
use std::collections::BTreeMap;

/// A record as returned by the source system, before normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    #[serde(rename = "createdTime", default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fields: Map<String, JsonValue>,
}

impl RawRecord {
    pub fn new(id: impl Into<String>, fields: Map<String, JsonValue>) -> Self {
        Self {
            id: id.into(),
            created_time: None,
            fields,
        }
    }

    pub fn with_created_time(mut self, created: DateTime<Utc>) -> Self {
        self.created_time = Some(created);
        self
    }
}

/// A normalized field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    List(Vec<String>),
    /// Value of an unclassified field, kept as the source sent it
    Json(JsonValue),
}

impl FieldValue {
    /// Storage form of the value, as written into target documents
    ///
    /// Fails for non-finite numbers, which have no JSON representation.
    pub fn to_json(&self) -> Result<JsonValue> {
        Ok(match self {
            FieldValue::Null => JsonValue::Null,
            FieldValue::Bool(b) => JsonValue::Bool(*b),
            FieldValue::Number(n) => Number::from_f64(*n)
                .map(JsonValue::Number)
                .ok_or_else(|| {
                    Error::Serialization(format!("number {} cannot be canonicalized", n))
                })?,
            FieldValue::Text(s) => JsonValue::String(s.clone()),
            FieldValue::Date(d) => JsonValue::String(format_date(d)),
            FieldValue::DateTime(dt) => JsonValue::String(format_datetime(dt)),
            FieldValue::List(items) => {
                JsonValue::Array(items.iter().cloned().map(JsonValue::String).collect())
            }
            FieldValue::Json(v) => v.clone(),
        })
    }

    /// Key form of the value; `None` for null and empty text
    pub fn key_string(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Text(s) if s.is_empty() => None,
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Json(JsonValue::Null) => None,
            FieldValue::Json(JsonValue::String(s)) if s.is_empty() => None,
            FieldValue::Json(JsonValue::String(s)) => Some(s.clone()),
            other => other.to_json().ok().map(|v| v.to_string()),
        }
    }

    /// Interpret the value as a point in time, if it is one
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::DateTime(dt) => Some(*dt),
            FieldValue::Date(d) => d.and_hms_opt(0, 0, 0).map(|n| n.and_utc()),
            FieldValue::Text(s) | FieldValue::Json(JsonValue::String(s)) => parse_datetime(s),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::DateTime(value)
    }
}

/// A normalized record: one source row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub fields: BTreeMap<String, FieldValue>,
    /// Creation time reported by the source; never written or checksummed
    pub created_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_created_at(mut self, created: DateTime<Utc>) -> Self {
        self.created_at = Some(created);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Key string of the primary key field
    pub fn key(&self, primary_key: &str) -> Option<String> {
        self.fields.get(primary_key).and_then(FieldValue::key_string)
    }

    /// Storage form of the whole record
    pub fn to_document_data(&self) -> Result<Map<String, JsonValue>> {
        let mut data = Map::new();
        for (name, value) in &self.fields {
            data.insert(name.clone(), value.to_json()?);
        }
        Ok(data)
    }
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Parse an ISO-8601 datetime; naive values are taken as UTC
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Parse an ISO-8601 date, accepting a full datetime and keeping its date part
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(value).map(|dt| dt.date_naive()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_datetime_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap();
        assert_eq!(parse_datetime("2024-03-01T10:30:00Z"), Some(expected));
        assert_eq!(parse_datetime("2024-03-01T12:30:00+02:00"), Some(expected));
        // Naive datetimes are UTC
        assert_eq!(parse_datetime("2024-03-01T10:30:00"), Some(expected));
        assert_eq!(parse_datetime("2024-03-01 10:30:00"), Some(expected));
        assert_eq!(parse_datetime("Alice"), None);
        assert_eq!(parse_datetime("2024-03-01"), None);
    }

    #[test]
    fn test_parse_date_accepts_datetime() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(parse_date("2024-03-01"), Some(expected));
        assert_eq!(parse_date("2024-03-01T23:00:00Z"), Some(expected));
        assert_eq!(parse_date("March"), None);
    }

    #[test]
    fn test_key_string() {
        assert_eq!(FieldValue::from("Alice").key_string(), Some("Alice".to_string()));
        assert_eq!(FieldValue::from("").key_string(), None);
        assert_eq!(FieldValue::Null.key_string(), None);
        assert_eq!(FieldValue::Number(42.0).key_string(), Some("42.0".to_string()));
    }

    #[test]
    fn test_non_finite_number_is_rejected() {
        let err = FieldValue::Number(f64::NAN).to_json().unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_raw_record_deserializes_airtable_shape() {
        let raw: RawRecord = serde_json::from_str(
            r#"{"id":"rec1","createdTime":"2024-01-02T03:04:05.000Z","fields":{"Name":"Alice"}}"#,
        )
        .unwrap();
        assert_eq!(raw.id, "rec1");
        assert_eq!(
            raw.created_time,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        );
        assert_eq!(raw.fields["Name"], "Alice");
    }
}
