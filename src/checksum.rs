//! Content fingerprints used for change detection
//!
//! Every change-detecting policy compares fingerprints, never raw values:
//! - [`fingerprint`] covers a subset of one record's fields
//! - [`table_fingerprint`] covers a whole table snapshot plus its identity
//!
//! Values are canonicalized before hashing so that a record read back from the
//! target store fingerprints the same as the record that was written.

use crate::error::{Error, Result};
use crate::record::{format_datetime, parse_datetime, Record};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use tracing::trace;

/// Snapshot of a table: primary key -> field map
pub type TableSnapshot = BTreeMap<String, Map<String, JsonValue>>;

/// Identity of the table (and view) a snapshot was taken from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableIdentity {
    pub name: String,
    pub view_name: Option<String>,
}

/// Anything whose fields can be fingerprinted
pub trait FieldSource {
    /// Canonical value of a field, `None` when the field is absent
    fn canonical_field(&self, name: &str) -> Option<Result<JsonValue>>;
}

impl FieldSource for Record {
    fn canonical_field(&self, name: &str) -> Option<Result<JsonValue>> {
        self.get(name).map(|value| value.to_json().map(canonicalize))
    }
}

impl FieldSource for Map<String, JsonValue> {
    fn canonical_field(&self, name: &str) -> Option<Result<JsonValue>> {
        self.get(name).map(|value| Ok(canonicalize(value.clone())))
    }
}

/// Normalize a stored value for comparison
///
/// Strings holding an ISO-8601 datetime become UTC RFC 3339 strings; naive
/// datetimes are taken as UTC. Dates are already ISO-8601 date strings in
/// storage form and pass through, as does everything else.
pub fn canonicalize(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => match parse_datetime(&s) {
            Some(dt) => JsonValue::String(format_datetime(&dt)),
            None => JsonValue::String(s),
        },
        other => other,
    }
}

/// Fingerprint the given fields of a record
///
/// Fields missing from the record are left out rather than treated as null,
/// and the result does not depend on the order fields are listed in.
pub fn fingerprint<R, I, S>(record: &R, fields: I) -> Result<String>
where
    R: FieldSource + ?Sized,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut selected: BTreeMap<String, JsonValue> = BTreeMap::new();
    for field in fields {
        let field = field.as_ref();
        if let Some(value) = record.canonical_field(field) {
            selected.insert(field.to_string(), value?);
        }
    }

    let pairs: Vec<(&String, &JsonValue)> = selected.iter().collect();
    let serialized = serde_json::to_vec(&pairs)
        .map_err(|e| Error::Serialization(format!("record fingerprint: {}", e)))?;
    trace!(
        "Fingerprint input: {}",
        String::from_utf8_lossy(&serialized)
    );
    Ok(hash_bytes(&serialized))
}

/// Fingerprint a record over its own field set
pub fn record_fingerprint(record: &Record) -> Result<String> {
    fingerprint(record, record.field_names())
}

/// Fingerprint a whole table snapshot together with its identity
pub fn table_fingerprint(snapshot: &TableSnapshot, identity: &TableIdentity) -> Result<String> {
    let data: BTreeMap<&String, BTreeMap<&String, JsonValue>> = snapshot
        .iter()
        .map(|(key, fields)| {
            let canonical = fields
                .iter()
                .map(|(name, value)| (name, canonicalize(value.clone())))
                .collect();
            (key, canonical)
        })
        .collect();

    #[derive(Serialize)]
    struct Envelope<'a> {
        metadata: &'a TableIdentity,
        data: BTreeMap<&'a String, BTreeMap<&'a String, JsonValue>>,
    }

    let serialized = serde_json::to_vec(&Envelope {
        metadata: identity,
        data,
    })
    .map_err(|e| Error::Serialization(format!("table fingerprint: {}", e)))?;
    Ok(hash_bytes(&serialized))
}

fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
