//! Status command implementation

use crate::config::Config;
use crate::error::Result;
use crate::store::{SqliteStore, SyncRun, UpdateTypeCount};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub database_path: String,
    pub collection: String,
    pub configured_policy: String,
    pub documents: Vec<UpdateTypeCount>,
    pub recent_runs: Vec<SyncRun>,
}

/// Document counts and recent pass history of the configured collection
pub async fn cmd_status(config: &Config, store: &SqliteStore, runs: usize) -> Result<StatusInfo> {
    info!("Getting status");

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        database_path: config.database_path().display().to_string(),
        collection: config.target.collection.clone(),
        configured_policy: config.pipeline.update_type.clone(),
        documents: store.count_by_update_type().await?,
        recent_runs: store.list_runs(runs).await?,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 tablesync Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.database_path);
    println!("Collection: {}", status.collection);
    println!("Configured policy: {}", status.configured_policy);

    println!("\nDocuments:");
    if status.documents.is_empty() {
        println!("  (none)");
    }
    for count in &status.documents {
        let label = if count.update_type.is_empty() {
            "(no update_type)"
        } else {
            count.update_type.as_str()
        };
        println!("  {:<30} {}", label, count.documents);
    }

    println!("\nRecent runs:");
    if status.recent_runs.is_empty() {
        println!("  No runs recorded. Use 'tablesync sync' to run a pass.");
    }
    for run in &status.recent_runs {
        println!(
            "  {} {} [{}] version {}: +{} ~{} ={} -{} unchanged {}",
            run.started_at,
            run.update_type,
            run.status,
            run.version_id,
            run.docs_created,
            run.docs_updated,
            run.docs_replaced,
            run.docs_deleted,
            run.docs_unchanged
        );
        if let Some(error) = &run.error {
            println!("    error: {}", error);
        }
    }
}
