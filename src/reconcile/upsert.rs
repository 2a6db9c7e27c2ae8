//! Flat policies: one current document per primary key

use super::{
    existing_by_key, flag_update, stamp, stamped_document, Mutation, PassContext, Plan,
    ReconciliationStrategy,
};
use crate::checksum::fingerprint;
use crate::error::Result;
use crate::record::Record;
use crate::store::{server_timestamp, Document, TargetStore, WRITE_TIMESTAMP_FIELD};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Clear the collection and write every record afresh
#[derive(Debug, Default, Clone, Copy)]
pub struct FullRefresh;

#[async_trait]
impl ReconciliationStrategy for FullRefresh {
    fn name(&self) -> &'static str {
        "full_refresh"
    }

    async fn plan(
        &self,
        _store: &dyn TargetStore,
        records: &[Record],
        ctx: &PassContext<'_>,
    ) -> Result<Plan> {
        let mut plan = Plan::new();
        plan.push(Mutation::ClearCollection);
        for record in records {
            plan.push(Mutation::Create {
                data: stamped_document(record, ctx)?,
            });
        }
        Ok(plan)
    }
}

/// Delete the documents sharing each record's key, then insert the record
#[derive(Debug, Default, Clone, Copy)]
pub struct Replace;

#[async_trait]
impl ReconciliationStrategy for Replace {
    fn name(&self) -> &'static str {
        "replace"
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
            if let Some(docs) = record.key(ctx.primary_key).and_then(|key| existing.get(&key)) {
                for doc in docs {
                    plan.push(Mutation::Delete { id: doc.id.clone() });
                }
            }
            plan.push(Mutation::Create {
                data: stamped_document(record, ctx)?,
            });
        }
        Ok(plan)
    }
}

/// Insert new keys, update changed ones, leave the rest alone
#[derive(Debug, Default, Clone, Copy)]
pub struct UpsertChecksum;

#[async_trait]
impl ReconciliationStrategy for UpsertChecksum {
    fn name(&self) -> &'static str {
        "upsert_checksum"
    }

    async fn plan(
        &self,
        store: &dyn TargetStore,
        records: &[Record],
        ctx: &PassContext<'_>,
    ) -> Result<Plan> {
        let (existing, _) = existing_by_key(store, ctx).await?;
        let (plan, _) = plan_upsert(records, &existing, ctx, UpsertMode::Versioned)?;
        Ok(plan)
    }
}

/// Upsert by checksum, then delete documents whose key was not seen
#[derive(Debug, Default, Clone, Copy)]
pub struct UpsertChecksumWithDelete;

#[async_trait]
impl ReconciliationStrategy for UpsertChecksumWithDelete {
    fn name(&self) -> &'static str {
        "upsert_checksum_with_delete"
    }

    async fn plan(
        &self,
        store: &dyn TargetStore,
        records: &[Record],
        ctx: &PassContext<'_>,
    ) -> Result<Plan> {
        let (existing, keyless) = existing_by_key(store, ctx).await?;
        let (mut plan, seen) = plan_upsert(records, &existing, ctx, UpsertMode::Versioned)?;

        let stale = unseen(&existing, &keyless, &seen);
        for doc in &stale {
            plan.push(Mutation::Delete { id: doc.id.clone() });
        }
        if !stale.is_empty() {
            info!("Deleting {} documents no longer in the source", stale.len());
        }
        Ok(plan)
    }
}

/// Upsert by checksum; absent keys are flagged `is_deleted` instead of removed
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftDelete;

#[async_trait]
impl ReconciliationStrategy for SoftDelete {
    fn name(&self) -> &'static str {
        "soft_delete"
    }

    async fn plan(
        &self,
        store: &dyn TargetStore,
        records: &[Record],
        ctx: &PassContext<'_>,
    ) -> Result<Plan> {
        let (existing, keyless) = existing_by_key(store, ctx).await?;
        let (mut plan, seen) = plan_upsert(records, &existing, ctx, UpsertMode::SoftDelete)?;

        let mut marked = 0;
        for doc in unseen(&existing, &keyless, &seen) {
            if doc.is_deleted() {
                continue;
            }
            let mut data = flag_update("is_deleted", true);
            data.insert(WRITE_TIMESTAMP_FIELD.into(), server_timestamp());
            plan.push(Mutation::Update {
                id: doc.id.clone(),
                data,
            });
            marked += 1;
        }
        if marked > 0 {
            info!("Marking {} documents as deleted", marked);
        }
        Ok(plan)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpsertMode {
    /// Written documents carry the pass `version_id`
    Versioned,
    /// Written documents carry `is_deleted = false`; a deleted document counts as changed
    SoftDelete,
}

/// Checksum upsert shared by the flat policies; returns the plan and the keys seen
fn plan_upsert(
    records: &[Record],
    existing: &BTreeMap<String, Vec<Document>>,
    ctx: &PassContext<'_>,
    mode: UpsertMode,
) -> Result<(Plan, HashSet<String>)> {
    let mut plan = Plan::new();
    let mut seen = HashSet::new();

    for record in records {
        let Some(key) = record.key(ctx.primary_key) else {
            debug!("Record without {} skipped", ctx.primary_key);
            continue;
        };

        let mut data = record.to_document_data()?;
        stamp(&mut data, ctx);
        match mode {
            UpsertMode::Versioned => {
                data.insert("version_id".into(), json!(ctx.version_id));
            }
            UpsertMode::SoftDelete => {
                data.insert("is_deleted".into(), json!(false));
            }
        }

        match existing.get(&key).and_then(|docs| docs.first()) {
            Some(doc) => {
                let fields: Vec<&str> = record.field_names().collect();
                let changed = fingerprint(record, &fields)? != fingerprint(&doc.data, &fields)?
                    || (mode == UpsertMode::SoftDelete && doc.is_deleted());
                if changed {
                    debug!("Updating document with {}: {}", ctx.primary_key, key);
                    plan.push(Mutation::Update {
                        id: doc.id.clone(),
                        data,
                    });
                } else {
                    debug!(
                        "No changes detected for document with {}: {}. Skipping update.",
                        ctx.primary_key, key
                    );
                    plan.unchanged += 1;
                }
            }
            None => {
                debug!("Inserting new document with {}: {}", ctx.primary_key, key);
                plan.push(Mutation::Create { data });
            }
        }
        seen.insert(key);
    }

    Ok((plan, seen))
}

/// Existing documents whose key is missing or was not seen this pass
fn unseen<'a>(
    existing: &'a BTreeMap<String, Vec<Document>>,
    keyless: &'a [Document],
    seen: &HashSet<String>,
) -> Vec<&'a Document> {
    existing
        .iter()
        .filter(|(key, _)| !seen.contains(*key))
        .flat_map(|(_, docs)| docs)
        .chain(keyless)
        .collect()
}
