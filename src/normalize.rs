//! Record normalization and duplicate resolution

use crate::classify::{FieldClassifier, FieldType};
use crate::record::{parse_date, parse_datetime, FieldValue, RawRecord, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Outcome of duplicate-key resolution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupeReport {
    /// Records discarded because a later-created record shares their key
    pub duplicates_discarded: usize,
    /// Records skipped because their primary key is null or empty
    pub missing_key_skipped: usize,
}

/// Converts raw source records into normalized records
#[derive(Debug, Clone, Default)]
pub struct RecordNormalizer {
    classifier: FieldClassifier,
}

impl RecordNormalizer {
    pub fn new(classifier: FieldClassifier) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &FieldClassifier {
        &self.classifier
    }

    /// Normalize one raw record
    pub fn normalize(&self, raw: &RawRecord) -> Record {
        let mut record = Record {
            created_at: raw.created_time,
            ..Record::default()
        };
        for (name, value) in &raw.fields {
            let field_type = self.classifier.classify(name);
            record.insert(name.clone(), convert_value(name, value, field_type));
        }
        record
    }

    /// Normalize a batch of raw records
    pub fn normalize_all(&self, raws: &[RawRecord]) -> Vec<Record> {
        let records: Vec<Record> = raws.iter().map(|raw| self.normalize(raw)).collect();
        info!("Normalized {} records", records.len());
        if let Some(first) = records.first() {
            debug!(
                "Sample record fields: {:?}",
                first.field_names().collect::<Vec<_>>()
            );
        }
        records
    }
}

fn convert_value(name: &str, value: &JsonValue, field_type: FieldType) -> FieldValue {
    if value.is_null() {
        return FieldValue::Null;
    }

    let converted = match field_type {
        FieldType::Text => Some(FieldValue::Text(match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        })),
        FieldType::Number => match value {
            JsonValue::Number(n) => n.as_f64().map(FieldValue::Number),
            JsonValue::String(s) => s.trim().parse::<f64>().ok().map(FieldValue::Number),
            JsonValue::Bool(b) => Some(FieldValue::Number(if *b { 1.0 } else { 0.0 })),
            _ => None,
        },
        FieldType::Boolean => Some(FieldValue::Bool(is_truthy(value))),
        FieldType::Date => match value {
            JsonValue::String(s) => parse_date(s).map(FieldValue::Date),
            _ => None,
        },
        FieldType::DateTime => match value {
            JsonValue::String(s) => parse_datetime(s).map(FieldValue::DateTime),
            _ => None,
        },
        FieldType::AttachmentList => match value {
            JsonValue::Array(items) => Some(FieldValue::List(
                items
                    .iter()
                    .filter_map(|item| item.get("url").and_then(JsonValue::as_str))
                    .map(str::to_string)
                    .collect(),
            )),
            _ => None,
        },
        FieldType::MultiSelect => match value {
            JsonValue::Array(items) => Some(FieldValue::List(
                items
                    .iter()
                    .map(|item| match item {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            )),
            JsonValue::String(s) => Some(FieldValue::List(vec![s.clone()])),
            _ => None,
        },
        FieldType::Other => Some(FieldValue::Json(value.clone())),
    };

    converted.unwrap_or_else(|| {
        warn!(
            field = name,
            field_type = %field_type,
            "Value does not match field type; keeping it as-is"
        );
        FieldValue::Json(value.clone())
    })
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

/// Keep one record per primary key: the one created last
///
/// Records without a usable key are dropped. When `created_field` is set, its
/// value is the creation timestamp; otherwise the source creation time is used.
/// A record with no timestamp loses to any record that has one, and on equal
/// timestamps the first record seen wins. Output keeps first-seen key order.
pub fn dedupe_by_primary_key(
    records: Vec<Record>,
    primary_key: &str,
    created_field: Option<&str>,
) -> (Vec<Record>, DedupeReport) {
    let mut report = DedupeReport::default();
    let mut kept: Vec<Record> = Vec::with_capacity(records.len());
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for record in records {
        let Some(key) = record.key(primary_key) else {
            report.missing_key_skipped += 1;
            continue;
        };

        match index_by_key.get(&key) {
            Some(&idx) => {
                report.duplicates_discarded += 1;
                let incoming = creation_time(&record, created_field);
                let existing = creation_time(&kept[idx], created_field);
                if incoming > existing {
                    warn!(
                        key = %key,
                        "Multiple records share primary key '{}'; using the most recently created",
                        primary_key
                    );
                    kept[idx] = record;
                } else {
                    warn!(
                        key = %key,
                        "Multiple records share primary key '{}'; keeping the earlier-seen record",
                        primary_key
                    );
                }
            }
            None => {
                index_by_key.insert(key, kept.len());
                kept.push(record);
            }
        }
    }

    if report.missing_key_skipped > 0 {
        warn!(
            "Skipped {} records with undefined {}",
            report.missing_key_skipped, primary_key
        );
    }
    if report.duplicates_discarded > 0 {
        warn!(
            "Discarded {} duplicate records by {}",
            report.duplicates_discarded, primary_key
        );
    }

    (kept, report)
}

fn creation_time(record: &Record, created_field: Option<&str>) -> Option<DateTime<Utc>> {
    match created_field {
        Some(field) => record.get(field).and_then(FieldValue::as_datetime),
        None => record.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    fn normalizer() -> RecordNormalizer {
        let tags: HashMap<String, String> = [
            ("Name", "singleLineText"),
            ("Age", "number"),
            ("Active", "checkbox"),
            ("Birthday", "date"),
            ("Seen", "dateTime"),
            ("Photos", "multipleAttachments"),
            ("Tags", "multipleSelects"),
            ("Lookup", "formula"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        RecordNormalizer::new(FieldClassifier::from_source_types(&tags))
    }

    fn raw(fields: JsonValue) -> RawRecord {
        let JsonValue::Object(map) = fields else {
            panic!("fields must be an object");
        };
        RawRecord::new("rec", map)
    }

    #[test]
    fn test_normalize_converts_by_field_type() {
        let record = normalizer().normalize(&raw(json!({
            "Name": "Alice",
            "Age": 31,
            "Active": 1,
            "Birthday": "1990-05-17",
            "Seen": "2024-01-01T12:00:00",
            "Photos": [{"url": "https://a/1.png", "id": "att1"}, {"url": "https://a/2.png"}],
            "Tags": ["red", "blue"],
            "Lookup": {"nested": true},
            "Unlisted": 7,
            "Empty": null
        })));

        assert_eq!(record.get("Name"), Some(&FieldValue::Text("Alice".into())));
        assert_eq!(record.get("Age"), Some(&FieldValue::Number(31.0)));
        assert_eq!(record.get("Active"), Some(&FieldValue::Bool(true)));
        assert_eq!(
            record.get("Birthday"),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(1990, 5, 17).unwrap()))
        );
        assert_eq!(
            record.get("Seen"),
            Some(&FieldValue::DateTime(
                Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
            ))
        );
        assert_eq!(
            record.get("Photos"),
            Some(&FieldValue::List(vec![
                "https://a/1.png".into(),
                "https://a/2.png".into()
            ]))
        );
        assert_eq!(
            record.get("Tags"),
            Some(&FieldValue::List(vec!["red".into(), "blue".into()]))
        );
        assert_eq!(
            record.get("Lookup"),
            Some(&FieldValue::Json(json!({"nested": true})))
        );
        // Fields absent from the schema are text
        assert_eq!(record.get("Unlisted"), Some(&FieldValue::Text("7".into())));
        assert_eq!(record.get("Empty"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_mismatched_value_is_kept_as_is() {
        let record = normalizer().normalize(&raw(json!({"Age": "not a number"})));
        assert_eq!(
            record.get("Age"),
            Some(&FieldValue::Json(json!("not a number")))
        );
    }

    #[test]
    fn test_dedupe_keeps_latest_created() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let records = vec![
            Record::new().with("Name", "Alice").with("City", "Oslo").with_created_at(t1),
            Record::new().with("Name", "Bob").with_created_at(t1),
            Record::new().with("Name", "Alice").with("City", "Rome").with_created_at(t2),
        ];

        let (kept, report) = dedupe_by_primary_key(records, "Name", None);

        assert_eq!(kept.len(), 2);
        assert_eq!(report.duplicates_discarded, 1);
        assert_eq!(kept[0].get("City"), Some(&FieldValue::Text("Rome".into())));
        assert_eq!(kept[1].key("Name"), Some("Bob".to_string()));
    }

    #[test]
    fn test_dedupe_earlier_duplicate_does_not_replace() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let records = vec![
            Record::new().with("Name", "Alice").with("City", "Rome").with_created_at(t2),
            Record::new().with("Name", "Alice").with("City", "Oslo").with_created_at(t1),
        ];

        let (kept, _) = dedupe_by_primary_key(records, "Name", None);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].get("City"), Some(&FieldValue::Text("Rome".into())));
    }

    #[test]
    fn test_dedupe_uses_created_field_when_configured() {
        let records = vec![
            Record::new()
                .with("Name", "Alice")
                .with("Created", "2024-03-01T00:00:00Z")
                .with("City", "Oslo"),
            Record::new()
                .with("Name", "Alice")
                .with("Created", "2024-01-01T00:00:00Z")
                .with("City", "Rome"),
        ];

        let (kept, report) = dedupe_by_primary_key(records, "Name", Some("Created"));
        assert_eq!(report.duplicates_discarded, 1);
        assert_eq!(kept[0].get("City"), Some(&FieldValue::Text("Oslo".into())));
    }

    #[test]
    fn test_dedupe_skips_missing_keys() {
        let records = vec![
            Record::new().with("Name", ""),
            Record::new().with("Other", "x"),
            Record::new().with("Name", FieldValue::Null),
            Record::new().with("Name", "Carol"),
        ];

        let (kept, report) = dedupe_by_primary_key(records, "Name", None);
        assert_eq!(kept.len(), 1);
        assert_eq!(report.missing_key_skipped, 3);
        assert_eq!(report.duplicates_discarded, 0);
    }
}
