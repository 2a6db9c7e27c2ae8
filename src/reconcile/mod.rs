//! Reconciliation engine
//!
//! A pass reconciles freshly fetched records against one target collection:
//! 1. Cross-policy cleanup removes documents written under another policy
//! 2. The active [`ReconciliationStrategy`] reads target state and returns a [`Plan`]
//! 3. [`apply_plan`] performs the plan's mutations in order
//!
//! Strategies never write to the store themselves, so a plan can be
//! inspected or applied to a scratch copy of the collection.

mod registry;
mod table;
mod upsert;
mod versioned;

pub use registry::*;
pub use table::*;
pub use upsert::*;
pub use versioned::*;

use crate::error::Result;
use crate::normalize::RecordNormalizer;
use crate::progress::{advance_progress, finish_progress, start_progress};
use crate::record::Record;
use crate::source::SourceReader;
use crate::store::{
    server_timestamp, BatchOp, Document, DocumentData, FieldOp, TargetStore, WRITE_TIMESTAMP_FIELD,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Everything a strategy knows about the current pass
pub struct PassContext<'a> {
    /// Identifier stamped on every written document
    pub update_type: &'a str,
    pub primary_key: &'a str,
    /// Shared by every document written in this pass
    pub version_id: i64,
    pub table_name: &'a str,
    /// View the pass reads through; the whole table when `None`
    pub view_name: Option<&'a str>,
    pub source: &'a dyn SourceReader,
    pub normalizer: &'a RecordNormalizer,
}

/// One change to the target collection
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Remove every document in the collection
    ClearCollection,
    Create { data: DocumentData },
    /// Merge fields into an existing document
    Update { id: String, data: DocumentData },
    /// Write a document wholesale, creating it if missing
    Replace { id: String, data: DocumentData },
    Delete { id: String },
    /// Operations applied atomically
    Batch(Vec<BatchOp>),
}

/// Ordered mutations produced by a strategy for one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub mutations: Vec<Mutation>,
    /// Records that needed no write
    pub unchanged: usize,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }
}

/// Counts of what applying a plan did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub batches: usize,
}

impl ApplySummary {
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }
}

/// A reconciliation policy
#[async_trait]
pub trait ReconciliationStrategy: Send + Sync {
    /// Policy identifier
    fn name(&self) -> &'static str;

    /// Decide which mutations bring the collection in line with `records`
    async fn plan(
        &self,
        store: &dyn TargetStore,
        records: &[Record],
        ctx: &PassContext<'_>,
    ) -> Result<Plan>;
}

/// Outcome of running one strategy against a store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Documents of other policies removed before planning
    pub cleanup_deleted: usize,
    pub applied: ApplySummary,
    pub unchanged: usize,
}

/// Delete every document whose `update_type` differs from `update_type`
///
/// Documents without an `update_type` count as foreign.
pub async fn cleanup_foreign_policies(store: &dyn TargetStore, update_type: &str) -> Result<usize> {
    let foreign = store
        .query_by_field("update_type", FieldOp::NotEq, &json!(update_type))
        .await?;
    for doc in &foreign {
        store.delete_document(&doc.id).await?;
    }
    info!(
        collection = %store.collection(),
        "Deleted {} documents with different update_type",
        foreign.len()
    );
    Ok(foreign.len())
}

/// Apply a plan's mutations in order; the first failure aborts
pub async fn apply_plan(store: &dyn TargetStore, plan: &Plan) -> Result<ApplySummary> {
    let mut summary = ApplySummary::default();
    let progress = start_progress(plan.len(), "Applying changes");

    for mutation in &plan.mutations {
        match mutation {
            Mutation::ClearCollection => {
                summary.deleted += store.clear_collection().await?;
            }
            Mutation::Create { data } => {
                let id = store.add_document(data.clone()).await?;
                debug!("Created document {}", id);
                summary.created += 1;
            }
            Mutation::Update { id, data } => {
                store.update_document(id, data.clone()).await?;
                summary.updated += 1;
            }
            Mutation::Replace { id, data } => {
                store.set_document(id, data.clone()).await?;
                summary.replaced += 1;
            }
            Mutation::Delete { id } => {
                store.delete_document(id).await?;
                summary.deleted += 1;
            }
            Mutation::Batch(ops) => {
                for op in ops {
                    match op {
                        BatchOp::Create { .. } => summary.created += 1,
                        BatchOp::Update { .. } => summary.updated += 1,
                        BatchOp::Delete { .. } => summary.deleted += 1,
                    }
                }
                store.batch_write(ops.clone()).await?;
                summary.batches += 1;
            }
        }
        advance_progress(&progress);
    }

    finish_progress(progress, "Changes applied");
    Ok(summary)
}

/// Cleanup, plan, and apply one strategy
pub async fn reconcile(
    strategy: &dyn ReconciliationStrategy,
    store: &dyn TargetStore,
    records: &[Record],
    ctx: &PassContext<'_>,
) -> Result<ReconcileOutcome> {
    info!(policy = %ctx.update_type, "Starting {} update", strategy.name());

    let cleanup_deleted = cleanup_foreign_policies(store, ctx.update_type).await?;
    let plan = strategy.plan(store, records, ctx).await?;
    debug!(
        "Planned {} mutations, {} records unchanged",
        plan.len(),
        plan.unchanged
    );
    let applied = apply_plan(store, &plan).await?;

    info!(
        policy = %ctx.update_type,
        created = applied.created,
        updated = applied.updated,
        replaced = applied.replaced,
        deleted = applied.deleted,
        unchanged = plan.unchanged,
        "Completed {} update of {} records",
        strategy.name(),
        records.len()
    );

    Ok(ReconcileOutcome {
        cleanup_deleted,
        applied,
        unchanged: plan.unchanged,
    })
}

/// Storage form of a record stamped with the pass's policy and a write timestamp
pub(crate) fn stamped_document(record: &Record, ctx: &PassContext<'_>) -> Result<DocumentData> {
    let mut data = record.to_document_data()?;
    stamp(&mut data, ctx);
    Ok(data)
}

pub(crate) fn stamp(data: &mut DocumentData, ctx: &PassContext<'_>) {
    data.insert("update_type".into(), json!(ctx.update_type));
    data.insert(WRITE_TIMESTAMP_FIELD.into(), server_timestamp());
}

/// Partial document setting one flag
pub(crate) fn flag_update(field: &str, value: bool) -> DocumentData {
    let mut data = DocumentData::new();
    data.insert(field.to_string(), JsonValue::Bool(value));
    data
}

/// Documents of this pass's policy grouped by primary key, newest version first
///
/// Documents lacking the key field are returned separately.
pub(crate) async fn existing_by_key(
    store: &dyn TargetStore,
    ctx: &PassContext<'_>,
) -> Result<(BTreeMap<String, Vec<Document>>, Vec<Document>)> {
    let mut by_key: BTreeMap<String, Vec<Document>> = BTreeMap::new();
    let mut keyless = Vec::new();
    for doc in store.query_all_versions(ctx.update_type).await? {
        match doc.key(ctx.primary_key) {
            Some(key) => by_key.entry(key).or_default().push(doc),
            None => keyless.push(doc),
        }
    }
    Ok((by_key, keyless))
}
