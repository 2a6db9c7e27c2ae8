//! Target document stores
//!
//! This module defines the document-store boundary used by reconciliation:
//! - The [`TargetStore`] trait (one collection per handle)
//! - Batched writes applied atomically
//! - Server-assigned write timestamps
//!
//! Two implementations ship with the crate: [`SqliteStore`] for persistent
//! collections and [`MemoryStore`] for dry runs and tests.

mod memory;
mod sqlite;

pub use memory::*;
pub use sqlite::*;

use crate::error::Result;
use crate::record::format_datetime;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::cmp::Reverse;

/// Field data of a stored document
pub type DocumentData = Map<String, JsonValue>;

/// Key whose value is always replaced by the store's write time
pub const WRITE_TIMESTAMP_FIELD: &str = "write_timestamp";

const SERVER_TIMESTAMP_MARKER: &str = "$serverTimestamp";

/// Placeholder asking the store to fill in its own write time
pub fn server_timestamp() -> JsonValue {
    json!({ SERVER_TIMESTAMP_MARKER: true })
}

pub fn is_server_timestamp(value: &JsonValue) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.len() == 1 && obj.get(SERVER_TIMESTAMP_MARKER) == Some(&json!(true)))
}

/// Current time in the format stores write timestamps in
pub fn now_timestamp() -> String {
    format_datetime(&Utc::now())
}

/// Replace `write_timestamp` and top-level timestamp placeholders with `now`
pub fn resolve_server_timestamps(data: &mut DocumentData, now: &str) {
    for (key, value) in data.iter_mut() {
        if key == WRITE_TIMESTAMP_FIELD || is_server_timestamp(value) {
            *value = JsonValue::String(now.to_string());
        }
    }
}

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: DocumentData,
}

impl Document {
    pub fn new(id: impl Into<String>, data: DocumentData) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.data.get(field)
    }

    /// Version identifier; absent or non-integer counts as 0
    pub fn version_id(&self) -> i64 {
        self.data
            .get("version_id")
            .and_then(JsonValue::as_i64)
            .unwrap_or(0)
    }

    pub fn is_latest(&self) -> bool {
        self.flag("latest")
    }

    pub fn is_deleted(&self) -> bool {
        self.flag("is_deleted")
    }

    fn flag(&self, field: &str) -> bool {
        self.data
            .get(field)
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
    }

    /// Key string of the primary key field, in the same form records use
    pub fn key(&self, primary_key: &str) -> Option<String> {
        match self.data.get(primary_key)? {
            JsonValue::Null => None,
            JsonValue::String(s) if s.is_empty() => None,
            JsonValue::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Order documents newest version first
///
/// Within one `version_id` the document flagged `latest` comes first; other
/// ties keep their existing order.
pub fn sort_by_version_desc(docs: &mut [Document]) {
    docs.sort_by_key(|doc| (Reverse(doc.version_id()), !doc.is_latest()));
}

/// Comparison operator for field queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Eq,
    /// Matches documents where the field differs or is absent
    NotEq,
}

/// True when `data` satisfies `field <op> value`
pub fn matches_field(data: &DocumentData, field: &str, op: FieldOp, value: &JsonValue) -> bool {
    let equal = data
        .get(field)
        .is_some_and(|existing| json_equal(existing, value));
    match op {
        FieldOp::Eq => equal,
        FieldOp::NotEq => !equal,
    }
}

/// Equality that treats `1` and `1.0` as the same number
fn json_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// One operation inside an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Create a document under a fresh id
    Create { data: DocumentData },
    /// Merge fields into an existing document; fails if it does not exist
    Update { id: String, data: DocumentData },
    Delete { id: String },
}

/// A single collection in a document store
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Name of the collection this handle writes to
    fn collection(&self) -> &str;

    /// Documents matching `field <op> value`, ordered by id
    async fn query_by_field(
        &self,
        field: &str,
        op: FieldOp,
        value: &JsonValue,
    ) -> Result<Vec<Document>>;

    /// Documents of one update type, highest `version_id` first
    async fn query_all_versions(&self, update_type: &str) -> Result<Vec<Document>> {
        let mut docs = self
            .query_by_field("update_type", FieldOp::Eq, &json!(update_type))
            .await?;
        sort_by_version_desc(&mut docs);
        Ok(docs)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Create a document under a fresh id and return the id
    async fn add_document(&self, data: DocumentData) -> Result<String>;

    /// Create or overwrite the document with the given id
    async fn add_document_with_id(&self, id: &str, data: DocumentData) -> Result<()>;

    /// Merge fields into a document, creating it if missing
    async fn update_document(&self, id: &str, data: DocumentData) -> Result<()>;

    /// Replace a document wholesale; no field of the previous version survives
    async fn set_document(&self, id: &str, data: DocumentData) -> Result<()>;

    async fn delete_document(&self, id: &str) -> Result<()>;

    /// Apply every operation or none of them; returns ids of created documents
    async fn batch_write(&self, ops: Vec<BatchOp>) -> Result<Vec<String>>;

    /// Delete every document in the collection; returns how many were removed
    async fn clear_collection(&self) -> Result<usize>;

    /// Every document in the collection, ordered by id
    async fn list_documents(&self) -> Result<Vec<Document>>;
}

/// Fresh document id
pub(crate) fn new_document_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
