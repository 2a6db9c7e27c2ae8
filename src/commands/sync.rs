//! Sync command implementation

use crate::config::Config;
use crate::error::Result;
use crate::pipeline::{PassReport, Pipeline, PipelineSettings};
use crate::reconcile::StrategyRegistry;
use crate::secrets::SecretProvider;
use crate::source::{AirtableReader, SourceReader};
use crate::store::{MemoryStore, RunCounts, RunStatus, SqliteStore, TargetStore};
use chrono::Utc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Policy to run instead of the configured one
    pub policy: Option<String>,
    /// Version id for the pass; the current Unix time when unset
    pub version_id: Option<i64>,
    /// Reconcile against an in-memory copy of the collection
    pub dry_run: bool,
}

/// Run one pass from the configured source into the configured collection
pub async fn cmd_sync(config: &Config, store: &SqliteStore, options: SyncOptions) -> Result<PassReport> {
    let registry = StrategyRegistry::with_builtin();
    let mut settings = PipelineSettings::from_config(config);
    if let Some(policy) = &options.policy {
        settings.update_type = policy.clone();
    }
    // Fail on an unknown policy before asking for credentials
    registry.resolve(&settings.update_type)?;

    let api_key = SecretProvider::from_config(config)
        .get_api_key(&config.source.api_key_secret)
        .await?;
    let reader = AirtableReader::new(&config.source, api_key)?;

    run_sync(&reader, store, &registry, settings, &options).await
}

/// Run one pass from any source, recording it in the run history unless dry
pub async fn run_sync(
    source: &dyn SourceReader,
    store: &SqliteStore,
    registry: &StrategyRegistry,
    settings: PipelineSettings,
    options: &SyncOptions,
) -> Result<PassReport> {
    let version_id = options
        .version_id
        .unwrap_or_else(|| Utc::now().timestamp());

    if options.dry_run {
        let docs = store.list_documents().await?;
        info!(
            "Dry run: reconciling against a copy of {} documents",
            docs.len()
        );
        let scratch = MemoryStore::with_documents(store.collection(), docs);
        let pipeline = Pipeline::new(source, &scratch, registry, settings);
        let mut report = pipeline.run_with_version(version_id).await?;
        report.dry_run = true;
        return Ok(report);
    }

    let run = store.start_run(&settings.update_type, version_id).await?;
    let pipeline = Pipeline::new(source, store, registry, settings);

    match pipeline.run_with_version(version_id).await {
        Ok(report) => {
            store
                .complete_run(&run.id, RunStatus::Completed, &report.run_counts(), None)
                .await?;
            Ok(report)
        }
        Err(e) => {
            let message = e.to_string();
            if let Err(record_err) = store
                .complete_run(&run.id, RunStatus::Failed, &RunCounts::default(), Some(&message))
                .await
            {
                warn!("Failed to record failed run {}: {}", run.id, record_err);
            }
            Err(e)
        }
    }
}

/// Print a pass report to console
pub fn print_pass_report(report: &PassReport) {
    if report.dry_run {
        println!("\n✓ Dry run complete (no changes written)");
    } else {
        println!("\n✓ Sync complete");
    }
    println!("  Policy: {}", report.policy);
    println!("  Collection: {}", report.collection);
    println!("  Version: {}", report.version_id);
    println!("  Records fetched: {}", report.records_fetched);
    println!("  Records reconciled: {}", report.records_after_dedupe);
    if report.duplicates_discarded > 0 {
        println!("  Duplicates discarded: {}", report.duplicates_discarded);
    }
    if report.missing_key_skipped > 0 {
        println!("  Skipped without key: {}", report.missing_key_skipped);
    }
    if report.cleanup_deleted > 0 {
        println!("  Other-policy documents removed: {}", report.cleanup_deleted);
    }
    println!("  Documents created: {}", report.created);
    println!("  Documents updated: {}", report.updated);
    println!("  Documents replaced: {}", report.replaced);
    println!("  Documents deleted: {}", report.deleted);
    println!("  Batched writes: {}", report.batches);
    println!("  Unchanged: {}", report.unchanged);
    println!("  Elapsed: {} ms", report.elapsed_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::record::RawRecord;
    use crate::source::{StaticSource, TableSchema};
    use serde_json::json;
    use tempfile::TempDir;

    fn source(age: i64) -> StaticSource {
        let table = TableSchema::new("People")
            .with_field("Name", "singleLineText")
            .with_field("Age", "number");
        let fields = json!({"Name": "Alice", "Age": age});
        StaticSource::new(table, vec![RawRecord::new("rec1", fields.as_object().cloned().unwrap())])
    }

    fn settings(update_type: &str) -> PipelineSettings {
        PipelineSettings {
            table_name: "People".into(),
            view_name: None,
            primary_key: "Name".into(),
            update_type: update_type.into(),
            created_field: None,
        }
    }

    async fn store(tmp: &TempDir) -> SqliteStore {
        SqliteStore::open(&tmp.path().join("sync.db"), "people")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sync_records_completed_run() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let registry = StrategyRegistry::with_builtin();
        let options = SyncOptions {
            version_id: Some(7),
            ..Default::default()
        };

        let report = run_sync(&source(30), &store, &registry, settings("upsert_checksum"), &options)
            .await
            .unwrap();

        assert_eq!(report.created, 1);
        let runs = store.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[0].version_id, 7);
        assert_eq!(runs[0].docs_created, 1);
        assert_eq!(runs[0].records_fetched, 1);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_store_untouched() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let registry = StrategyRegistry::with_builtin();

        run_sync(&source(30), &store, &registry, settings("upsert_checksum"), &SyncOptions::default())
            .await
            .unwrap();

        let options = SyncOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = run_sync(&source(31), &store, &registry, settings("upsert_checksum"), &options)
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.updated, 1);
        let docs = store.list_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get("Age"), Some(&json!(30.0)));
        assert_eq!(store.list_runs(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_pass_is_recorded() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let registry = StrategyRegistry::with_builtin();
        let mut settings = settings("upsert_table_checksum");
        settings.view_name = Some("Kanban".into());

        let err = run_sync(&source(30), &store, &registry, settings, &SyncOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let runs = store.list_runs(10).await.unwrap();
        assert_eq!(runs[0].status, "failed");
        assert!(runs[0].error.as_deref().unwrap_or_default().contains("Kanban"));
    }
}
