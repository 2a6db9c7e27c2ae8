//! Table policies: the whole (view-filtered) table is one document

use super::{flag_update, stamp, Mutation, PassContext, Plan, ReconciliationStrategy};
use crate::checksum::{table_fingerprint, TableIdentity, TableSnapshot};
use crate::error::Result;
use crate::record::Record;
use crate::store::{BatchOp, DocumentData, TargetStore};
use async_trait::async_trait;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// A table snapshot ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTable {
    pub identity: TableIdentity,
    pub snapshot: TableSnapshot,
    pub checksum: String,
}

impl PreparedTable {
    fn describe(&self) -> String {
        match &self.identity.view_name {
            Some(view) => format!("table '{}' with view '{}'", self.identity.name, view),
            None => format!("table '{}'", self.identity.name),
        }
    }

    /// Document fields shared by both table policies
    fn document(&self, ctx: &PassContext<'_>) -> Result<DocumentData> {
        let mut data = DocumentData::new();
        stamp(&mut data, ctx);
        data.insert("version_id".into(), json!(ctx.version_id));
        data.insert("table_checksum".into(), json!(self.checksum));
        data.insert("table_data".into(), serde_json::to_value(&self.snapshot)?);
        data.insert("metadata".into(), serde_json::to_value(&self.identity)?);
        Ok(data)
    }
}

/// Read the pass's view from the source and build its snapshot
///
/// Only fields visible in the view are kept; rows without a primary key are
/// left out. Without a view the full table is used.
pub async fn prepare_table(ctx: &PassContext<'_>) -> Result<PreparedTable> {
    let view = ctx
        .source
        .fetch_view_metadata(ctx.table_name, ctx.view_name)
        .await?;
    info!("Fields visible in the view according to metadata: {:?}", view.fields);

    let raws = ctx
        .source
        .fetch_records(ctx.view_name, Some(&view.fields))
        .await?;

    let view_fields: HashSet<&str> = view.fields.iter().map(String::as_str).collect();
    if let Some(first) = raws.first() {
        let unexpected: Vec<&String> = first
            .fields
            .keys()
            .filter(|name| !view_fields.contains(name.as_str()))
            .collect();
        if !unexpected.is_empty() {
            warn!("Fetched fields not visible in the view: {:?}", unexpected);
        }
    }

    let records = ctx.normalizer.normalize_all(&raws);
    let snapshot = build_snapshot(&records, ctx.primary_key, &view_fields)?;
    debug!("Snapshot holds {} rows", snapshot.len());

    let identity = TableIdentity {
        name: ctx.table_name.to_string(),
        view_name: ctx.view_name.map(str::to_string),
    };
    let checksum = table_fingerprint(&snapshot, &identity)?;

    Ok(PreparedTable {
        identity,
        snapshot,
        checksum,
    })
}

/// Key each record by its primary key, keeping only `fields`
pub fn build_snapshot(
    records: &[Record],
    primary_key: &str,
    fields: &HashSet<&str>,
) -> Result<TableSnapshot> {
    let mut snapshot = TableSnapshot::new();
    for record in records {
        let Some(key) = record.key(primary_key) else {
            continue;
        };
        let mut row = Map::new();
        for (name, value) in &record.fields {
            if fields.contains(name.as_str()) {
                row.insert(name.clone(), value.to_json()?);
            }
        }
        if snapshot.insert(key.clone(), row).is_some() {
            warn!("Multiple rows share {} '{}'; keeping the last", primary_key, key);
        }
    }
    Ok(snapshot)
}

/// Append a new table version whenever the table checksum changes
#[derive(Debug, Default, Clone, Copy)]
pub struct VersionedTableChecksum;

#[async_trait]
impl ReconciliationStrategy for VersionedTableChecksum {
    fn name(&self) -> &'static str {
        "versioned_table_checksum"
    }

    async fn plan(
        &self,
        store: &dyn TargetStore,
        _records: &[Record],
        ctx: &PassContext<'_>,
    ) -> Result<Plan> {
        let table = prepare_table(ctx).await?;
        let existing = store.query_all_versions(ctx.update_type).await?;
        let mut plan = Plan::new();

        let previous_checksum = existing
            .first()
            .and_then(|doc| doc.get("table_checksum"))
            .and_then(JsonValue::as_str);
        if previous_checksum == Some(table.checksum.as_str()) {
            info!("No changes detected for {}. Skipping update.", table.describe());
            plan.unchanged = 1;
            return Ok(plan);
        }

        let mut data = table.document(ctx)?;
        data.insert("latest".into(), json!(true));

        let mut ops = vec![BatchOp::Create { data }];
        ops.extend(
            existing
                .iter()
                .filter(|doc| doc.is_latest())
                .map(|doc| BatchOp::Update {
                    id: doc.id.clone(),
                    data: flag_update("latest", false),
                }),
        );
        info!(
            "Creating new table version with version_id: {} for {}",
            ctx.version_id,
            table.describe()
        );
        plan.push(Mutation::Batch(ops));
        Ok(plan)
    }
}

/// Keep one document per table, replaced wholesale when the checksum changes
#[derive(Debug, Default, Clone, Copy)]
pub struct UpsertTableChecksum;

#[async_trait]
impl ReconciliationStrategy for UpsertTableChecksum {
    fn name(&self) -> &'static str {
        "upsert_table_checksum"
    }

    async fn plan(
        &self,
        store: &dyn TargetStore,
        _records: &[Record],
        ctx: &PassContext<'_>,
    ) -> Result<Plan> {
        let table = prepare_table(ctx).await?;
        let doc_id = table.identity.name.clone();
        let mut plan = Plan::new();

        match store.get_document(&doc_id).await? {
            Some(existing) => {
                let previous: BTreeSet<&str> = existing
                    .get("table_data")
                    .and_then(JsonValue::as_object)
                    .map(|rows| rows.keys().map(String::as_str).collect())
                    .unwrap_or_default();
                let current: BTreeSet<&str> = table.snapshot.keys().map(String::as_str).collect();

                let added: Vec<&str> = current.difference(&previous).copied().collect();
                let removed: Vec<&str> = previous.difference(&current).copied().collect();
                if !added.is_empty() {
                    info!("Rows added: {:?}", added);
                }
                if !removed.is_empty() {
                    info!("Rows removed: {:?}", removed);
                }

                if existing.get("table_checksum").and_then(JsonValue::as_str)
                    == Some(table.checksum.as_str())
                {
                    info!("No changes detected for {}. Skipping update.", table.describe());
                    plan.unchanged = 1;
                    return Ok(plan);
                }
                info!("Changes detected for {}. Updating document.", table.describe());
            }
            None => {
                info!(
                    "No existing document found for {}. Creating new document.",
                    table.describe()
                );
            }
        }

        plan.push(Mutation::Replace {
            id: doc_id,
            data: table.document(ctx)?,
        });
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::super::reconcile;
    use super::super::testing::ctx;
    use super::*;
    use crate::classify::FieldClassifier;
    use crate::normalize::RecordNormalizer;
    use crate::record::RawRecord;
    use crate::source::{StaticSource, TableSchema, ViewSchema};
    use crate::store::MemoryStore;

    fn raw(id: &str, fields: JsonValue) -> RawRecord {
        RawRecord::new(id, fields.as_object().cloned().unwrap())
    }

    fn schema() -> TableSchema {
        TableSchema::new("People")
            .with_field("Name", "singleLineText")
            .with_field("Age", "number")
            .with_field("Secret", "singleLineText")
            .with_view(ViewSchema::new("viw1", "Public").with_hidden_fields(&["fldSecret"]))
    }

    fn normalizer() -> RecordNormalizer {
        RecordNormalizer::new(FieldClassifier::from_source_types(&schema().field_types()))
    }

    fn source(bob_age: i64) -> StaticSource {
        StaticSource::new(
            schema(),
            vec![
                raw("rec1", json!({"Name": "Alice", "Age": 31, "Secret": "a"})),
                raw("rec2", json!({"Name": "Bob", "Age": bob_age, "Secret": "b"})),
            ],
        )
    }

    #[tokio::test]
    async fn test_prepare_table_uses_view_fields() {
        let source = source(40);
        let normalizer = normalizer();
        let mut ctx = ctx("upsert_table_checksum", 1, &source, &normalizer);
        ctx.view_name = Some("Public");

        let table = prepare_table(&ctx).await.unwrap();

        assert_eq!(table.snapshot.len(), 2);
        let alice = &table.snapshot["Alice"];
        assert_eq!(alice.get("Age"), Some(&json!(31.0)));
        assert!(alice.get("Secret").is_none());
        assert_eq!(table.identity.view_name.as_deref(), Some("Public"));

        // The whole table includes the hidden field and fingerprints differently
        ctx.view_name = None;
        let whole = prepare_table(&ctx).await.unwrap();
        assert!(whole.snapshot["Alice"].get("Secret").is_some());
        assert_ne!(whole.checksum, table.checksum);
    }

    #[tokio::test]
    async fn test_versioned_table_checksum() {
        let store = MemoryStore::new("tables");
        let normalizer = normalizer();

        let unchanged = source(40);
        let mut first = ctx("versioned_table_checksum", 1, &unchanged, &normalizer);
        first.view_name = Some("Public");
        reconcile(&VersionedTableChecksum, &store, &[], &first)
            .await
            .unwrap();

        store.reset_metrics().await;
        let mut second = ctx("versioned_table_checksum", 2, &unchanged, &normalizer);
        second.view_name = Some("Public");
        let outcome = reconcile(&VersionedTableChecksum, &store, &[], &second)
            .await
            .unwrap();
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(store.metrics().await.writes(), 0);
        assert_eq!(store.len().await, 1);

        let changed = source(41);
        let mut third = ctx("versioned_table_checksum", 3, &changed, &normalizer);
        third.view_name = Some("Public");
        let outcome = reconcile(&VersionedTableChecksum, &store, &[], &third)
            .await
            .unwrap();

        assert_eq!(outcome.applied.created, 1);
        assert_eq!(outcome.applied.updated, 1);
        let versions = store
            .query_all_versions("versioned_table_checksum")
            .await
            .unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version_id(), 3);
        assert!(versions[0].is_latest());
        assert!(!versions[1].is_latest());
        assert_eq!(
            versions[0].get("metadata"),
            Some(&json!({"name": "People", "view_name": "Public"}))
        );
        assert_eq!(versions[0].get("table_data").unwrap()["Bob"]["Age"], json!(41.0));
    }

    #[tokio::test]
    async fn test_versioned_table_checksum_reused_version_id() {
        let store = MemoryStore::new("tables");
        let normalizer = normalizer();

        let before = source(40);
        let after = source(41);
        for source in [&before, &after] {
            let ctx = ctx("versioned_table_checksum", 1, source, &normalizer);
            reconcile(&VersionedTableChecksum, &store, &[], &ctx)
                .await
                .unwrap();
        }
        assert_eq!(store.len().await, 2);

        // Both versions share version_id 1; the rerun compares against the latest one
        store.reset_metrics().await;
        let rerun = ctx("versioned_table_checksum", 1, &after, &normalizer);
        let outcome = reconcile(&VersionedTableChecksum, &store, &[], &rerun)
            .await
            .unwrap();
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(store.metrics().await.writes(), 0);
    }

    #[tokio::test]
    async fn test_upsert_table_checksum() {
        let store = MemoryStore::new("tables");
        let normalizer = normalizer();

        let unchanged = source(40);
        let first = ctx("upsert_table_checksum", 1, &unchanged, &normalizer);
        let outcome = reconcile(&UpsertTableChecksum, &store, &[], &first)
            .await
            .unwrap();
        assert_eq!(outcome.applied.replaced, 1);

        store.reset_metrics().await;
        let second = ctx("upsert_table_checksum", 2, &unchanged, &normalizer);
        let outcome = reconcile(&UpsertTableChecksum, &store, &[], &second)
            .await
            .unwrap();
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(store.metrics().await.writes(), 0);

        let changed = source(41);
        let third = ctx("upsert_table_checksum", 3, &changed, &normalizer);
        reconcile(&UpsertTableChecksum, &store, &[], &third)
            .await
            .unwrap();

        let metrics = store.metrics().await;
        assert_eq!(metrics.sets, 1);
        assert_eq!(metrics.writes(), 1);
        let doc = store.get_document("People").await.unwrap().unwrap();
        assert_eq!(doc.version_id(), 3);
        assert_eq!(doc.get("table_data").unwrap()["Bob"]["Age"], json!(41.0));
        assert!(doc.get("latest").is_none());
    }

    #[tokio::test]
    async fn test_missing_view_aborts() {
        let source = source(40);
        let normalizer = normalizer();
        let mut ctx = ctx("upsert_table_checksum", 1, &source, &normalizer);
        ctx.view_name = Some("Kanban");

        let store = MemoryStore::new("tables");
        let err = reconcile(&UpsertTableChecksum, &store, &[], &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::NotFound(_)));
        assert!(store.is_empty().await);
    }
}
