//! History-keeping policies: every change adds documents, `latest` marks the current ones

use super::{
    existing_by_key, flag_update, stamped_document, Mutation, PassContext, Plan,
    ReconciliationStrategy,
};
use crate::checksum::fingerprint;
use crate::error::Result;
use crate::record::Record;
use crate::store::{server_timestamp, BatchOp, Document, FieldOp, TargetStore};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Retire every current document and append the whole pass as a new version
#[derive(Debug, Default, Clone, Copy)]
pub struct Versioned;

#[async_trait]
impl ReconciliationStrategy for Versioned {
    fn name(&self) -> &'static str {
        "versioned"
    }

    async fn plan(
        &self,
        store: &dyn TargetStore,
        records: &[Record],
        ctx: &PassContext<'_>,
    ) -> Result<Plan> {
        let existing = store
            .query_by_field("update_type", FieldOp::Eq, &json!(ctx.update_type))
            .await?;
        let mut plan = Plan::new();

        for doc in &existing {
            plan.push(Mutation::Update {
                id: doc.id.clone(),
                data: flag_update("latest", false),
            });
        }

        for record in records {
            let mut data = stamped_document(record, ctx)?;
            data.insert("version".into(), json!(ctx.version_id));
            data.insert("start_date".into(), server_timestamp());
            data.insert("end_date".into(), JsonValue::Null);
            data.insert("latest".into(), json!(true));
            plan.push(Mutation::Create { data });
        }
        Ok(plan)
    }
}

/// Append a new version for each key whose content changed
#[derive(Debug, Default, Clone, Copy)]
pub struct VersionedChecksum;

#[async_trait]
impl ReconciliationStrategy for VersionedChecksum {
    fn name(&self) -> &'static str {
        "versioned_checksum"
    }

    async fn plan(
        &self,
        store: &dyn TargetStore,
        records: &[Record],
        ctx: &PassContext<'_>,
    ) -> Result<Plan> {
        let (existing, _) = existing_by_key(store, ctx).await?;
        let mut plan = Plan::new();

        for record in records {
            let Some(key) = record.key(ctx.primary_key) else {
                continue;
            };
            let versions = existing.get(&key).map(Vec::as_slice).unwrap_or_default();

            if let Some(latest) = versions.first() {
                let fields: Vec<&str> = record.field_names().collect();
                if fingerprint(record, &fields)? == fingerprint(&latest.data, &fields)? {
                    debug!(
                        "No changes detected for document with {}: {}. Skipping update.",
                        ctx.primary_key, key
                    );
                    plan.unchanged += 1;
                    continue;
                }
            }

            let mut data = stamped_document(record, ctx)?;
            data.insert("version_id".into(), json!(ctx.version_id));
            data.insert("latest".into(), json!(true));

            let mut ops = vec![BatchOp::Create { data }];
            ops.extend(retire_latest(versions));
            debug!(
                "New version of document with {}: {} ({} previous versions retired)",
                ctx.primary_key,
                key,
                ops.len() - 1
            );
            plan.push(Mutation::Batch(ops));
        }
        Ok(plan)
    }
}

/// Append a whole new generation when anything in the set changed
#[derive(Debug, Default, Clone, Copy)]
pub struct VersionedSet;

#[async_trait]
impl ReconciliationStrategy for VersionedSet {
    fn name(&self) -> &'static str {
        "versioned_set"
    }

    async fn plan(
        &self,
        store: &dyn TargetStore,
        records: &[Record],
        ctx: &PassContext<'_>,
    ) -> Result<Plan> {
        let current: Vec<Document> = store
            .query_by_field("latest", FieldOp::Eq, &json!(true))
            .await?
            .into_iter()
            .filter(|doc| doc.get("update_type") == Some(&json!(ctx.update_type)))
            .collect();

        let mut plan = Plan::new();
        if !set_changed(records, &current, ctx.primary_key)? {
            info!("No changes detected. Skipping update. Existing version remains current.");
            plan.unchanged = records.len();
            return Ok(plan);
        }

        let mut ops = retire_latest(&current);
        let retired = ops.len();
        for record in records {
            let mut data = stamped_document(record, ctx)?;
            data.insert("version_id".into(), json!(ctx.version_id));
            data.insert("latest".into(), json!(true));
            ops.push(BatchOp::Create { data });
        }
        info!(
            "Created new versioned set with version_id: {} ({} records, {} retired)",
            ctx.version_id,
            records.len(),
            retired
        );
        plan.push(Mutation::Batch(ops));
        Ok(plan)
    }
}

/// Batch updates clearing `latest` on the documents that have it
fn retire_latest(docs: &[Document]) -> Vec<BatchOp> {
    docs.iter()
        .filter(|doc| doc.is_latest())
        .map(|doc| BatchOp::Update {
            id: doc.id.clone(),
            data: flag_update("latest", false),
        })
        .collect()
}

/// True on the first new key, missing key, or differing checksum
fn set_changed(records: &[Record], current: &[Document], primary_key: &str) -> Result<bool> {
    let mut by_key: BTreeMap<String, &Document> = BTreeMap::new();
    for doc in current {
        match doc.key(primary_key) {
            Some(key) => {
                by_key.insert(key, doc);
            }
            None => {
                debug!("Current document {} has no {}", doc.id, primary_key);
                return Ok(true);
            }
        }
    }

    let mut seen = HashSet::new();
    for record in records {
        let Some(key) = record.key(primary_key) else {
            continue;
        };
        let Some(doc) = by_key.get(&key) else {
            debug!("New record detected with {}: {}", primary_key, key);
            return Ok(true);
        };
        let fields: Vec<&str> = record.field_names().collect();
        if fingerprint(record, &fields)? != fingerprint(&doc.data, &fields)? {
            debug!("Change detected for record with {}: {}", primary_key, key);
            return Ok(true);
        }
        seen.insert(key);
    }

    if let Some(missing) = by_key.keys().find(|key| !seen.contains(*key)) {
        debug!("Deleted record detected with {}: {}", primary_key, missing);
        return Ok(true);
    }
    Ok(false)
}
