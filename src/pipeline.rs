//! Pass orchestration: fetch, normalize, deduplicate, reconcile

use crate::classify::FieldClassifier;
use crate::config::Config;
use crate::error::Result;
use crate::normalize::{dedupe_by_primary_key, RecordNormalizer};
use crate::reconcile::{reconcile, PassContext, StrategyRegistry};
use crate::source::SourceReader;
use crate::store::{RunCounts, TargetStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// What one pass reads and how it reconciles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub table_name: String,
    pub view_name: Option<String>,
    pub primary_key: String,
    pub update_type: String,
    pub created_field: Option<String>,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            table_name: config.source.table_name.clone(),
            view_name: config.source.view_name.clone(),
            primary_key: config.pipeline.primary_key.clone(),
            update_type: config.pipeline.update_type.clone(),
            created_field: config.pipeline.created_field.clone(),
        }
    }
}

/// Summary of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub policy: String,
    pub collection: String,
    pub version_id: i64,
    pub dry_run: bool,
    pub records_fetched: usize,
    pub records_after_dedupe: usize,
    pub duplicates_discarded: usize,
    pub missing_key_skipped: usize,
    pub cleanup_deleted: usize,
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub batches: usize,
    pub unchanged: usize,
    pub elapsed_ms: u64,
}

impl PassReport {
    /// Counts recorded in the run history
    pub fn run_counts(&self) -> RunCounts {
        RunCounts {
            records_fetched: self.records_fetched,
            created: self.created,
            updated: self.updated,
            replaced: self.replaced,
            deleted: self.deleted + self.cleanup_deleted,
            unchanged: self.unchanged,
        }
    }
}

/// Runs passes from one source table into one collection
pub struct Pipeline<'a> {
    source: &'a dyn SourceReader,
    store: &'a dyn TargetStore,
    registry: &'a StrategyRegistry,
    settings: PipelineSettings,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        source: &'a dyn SourceReader,
        store: &'a dyn TargetStore,
        registry: &'a StrategyRegistry,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            store,
            registry,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one pass, versioned by the current Unix time
    pub async fn run(&self) -> Result<PassReport> {
        self.run_with_version(Utc::now().timestamp()).await
    }

    /// Run one pass with an explicit version id
    pub async fn run_with_version(&self, version_id: i64) -> Result<PassReport> {
        let started = Instant::now();
        let settings = &self.settings;
        let strategy = self.registry.resolve(&settings.update_type)?;

        info!(
            policy = %settings.update_type,
            collection = %self.store.collection(),
            version_id,
            "Starting pass over table '{}'",
            settings.table_name
        );

        let fetch_started = Instant::now();
        let field_types = self.source.fetch_field_types().await?;
        let normalizer = RecordNormalizer::new(FieldClassifier::from_source_types(&field_types));
        let raws = self
            .source
            .fetch_records(settings.view_name.as_deref(), None)
            .await?;
        info!(
            "Fetched {} records in {:.2} seconds",
            raws.len(),
            fetch_started.elapsed().as_secs_f64()
        );

        let process_started = Instant::now();
        let records = normalizer.normalize_all(&raws);
        let (records, dedupe) = dedupe_by_primary_key(
            records,
            &settings.primary_key,
            settings.created_field.as_deref(),
        );
        info!(
            "Processed {} records in {:.2} seconds",
            records.len(),
            process_started.elapsed().as_secs_f64()
        );

        let ctx = PassContext {
            update_type: &settings.update_type,
            primary_key: &settings.primary_key,
            version_id,
            table_name: &settings.table_name,
            view_name: settings.view_name.as_deref(),
            source: self.source,
            normalizer: &normalizer,
        };

        let update_started = Instant::now();
        let outcome = reconcile(strategy.as_ref(), self.store, &records, &ctx).await?;
        info!(
            "Updated collection '{}' in {:.2} seconds",
            self.store.collection(),
            update_started.elapsed().as_secs_f64()
        );

        let report = PassReport {
            policy: settings.update_type.clone(),
            collection: self.store.collection().to_string(),
            version_id,
            dry_run: false,
            records_fetched: raws.len(),
            records_after_dedupe: records.len(),
            duplicates_discarded: dedupe.duplicates_discarded,
            missing_key_skipped: dedupe.missing_key_skipped,
            cleanup_deleted: outcome.cleanup_deleted,
            created: outcome.applied.created,
            updated: outcome.applied.updated,
            replaced: outcome.applied.replaced,
            deleted: outcome.applied.deleted,
            batches: outcome.applied.batches,
            unchanged: outcome.unchanged,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        debug!("Pass report: {:?}", report);
        info!(
            policy = %report.policy,
            elapsed_ms = report.elapsed_ms,
            "Pass completed"
        );
        Ok(report)
    }
}
