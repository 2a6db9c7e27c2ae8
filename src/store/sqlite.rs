//! SQLite-backed document store
//!
//! Documents of every collection live in one `documents` table as JSON text,
//! keyed by `(collection, id)`. The same database records the history of sync
//! passes in `sync_runs`.

use super::{
    matches_field, new_document_id, now_timestamp, resolve_server_timestamps, BatchOp, Document,
    DocumentData, FieldOp, TargetStore,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// SQL schema for the store database
pub const SCHEMA_SQL: &str = r#"
-- Documents: one row per document, grouped by collection
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);

-- Sync runs: pass history
CREATE TABLE IF NOT EXISTS sync_runs (
    id TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    update_type TEXT NOT NULL,
    version_id INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    records_fetched INTEGER NOT NULL DEFAULT 0,
    docs_created INTEGER NOT NULL DEFAULT 0,
    docs_updated INTEGER NOT NULL DEFAULT 0,
    docs_replaced INTEGER NOT NULL DEFAULT 0,
    docs_deleted INTEGER NOT NULL DEFAULT 0,
    docs_unchanged INTEGER NOT NULL DEFAULT 0,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_collection ON sync_runs(collection, started_at);
"#;

/// Sync run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(Error::Store(format!("Unknown run status: {}", s))),
        }
    }
}

/// One row of pass history
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub collection: String,
    pub update_type: String,
    pub version_id: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub records_fetched: i64,
    pub docs_created: i64,
    pub docs_updated: i64,
    pub docs_replaced: i64,
    pub docs_deleted: i64,
    pub docs_unchanged: i64,
    pub error: Option<String>,
}

/// Counts recorded when a run completes
#[derive(Debug, Clone, Default)]
pub struct RunCounts {
    pub records_fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// Number of documents carrying one `update_type`
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UpdateTypeCount {
    pub update_type: String,
    pub documents: i64,
}

/// Handle to one collection of a SQLite store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn open(db_path: &Path, collection: &str) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            collection: collection.to_string(),
        };
        if !store.is_initialized().await? {
            store.init_schema().await?;
        }
        Ok(store)
    }

    /// Another collection in the same database
    pub fn for_collection(&self, collection: &str) -> Self {
        Self {
            pool: self.pool.clone(),
            collection: collection.to_string(),
        }
    }

    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='documents'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    // ===== Sync Run Operations =====

    /// Record the start of a pass
    pub async fn start_run(&self, update_type: &str, version_id: i64) -> Result<SyncRun> {
        let run = SyncRun {
            id: Uuid::new_v4().to_string(),
            collection: self.collection.clone(),
            update_type: update_type.to_string(),
            version_id,
            started_at: now_timestamp(),
            completed_at: None,
            status: RunStatus::Running.to_string(),
            records_fetched: 0,
            docs_created: 0,
            docs_updated: 0,
            docs_replaced: 0,
            docs_deleted: 0,
            docs_unchanged: 0,
            error: None,
        };
        sqlx::query(
            r#"
            INSERT INTO sync_runs (id, collection, update_type, version_id, started_at, status)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.collection)
        .bind(&run.update_type)
        .bind(run.version_id)
        .bind(&run.started_at)
        .bind(&run.status)
        .execute(&self.pool)
        .await?;
        Ok(run)
    }

    /// Record the end of a pass
    pub async fn complete_run(
        &self,
        id: &str,
        status: RunStatus,
        counts: &RunCounts,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_runs SET
                completed_at = ?,
                status = ?,
                records_fetched = ?,
                docs_created = ?,
                docs_updated = ?,
                docs_replaced = ?,
                docs_deleted = ?,
                docs_unchanged = ?,
                error = ?
            WHERE id = ?
            "#,
        )
        .bind(now_timestamp())
        .bind(status.to_string())
        .bind(counts.records_fetched as i64)
        .bind(counts.created as i64)
        .bind(counts.updated as i64)
        .bind(counts.replaced as i64)
        .bind(counts.deleted as i64)
        .bind(counts.unchanged as i64)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent runs for this collection, newest first
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let runs = sqlx::query_as::<_, SyncRun>(
            "SELECT * FROM sync_runs WHERE collection = ? ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(&self.collection)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    // ===== Statistics =====

    /// Document counts per `update_type`; documents without one count under ""
    pub async fn count_by_update_type(&self) -> Result<Vec<UpdateTypeCount>> {
        let counts = sqlx::query_as::<_, UpdateTypeCount>(
            r#"
            SELECT COALESCE(CAST(json_extract(data_json, '$.update_type') AS TEXT), '') AS update_type,
                   COUNT(*) AS documents
            FROM documents
            WHERE collection = ?
            GROUP BY 1
            ORDER BY 1
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }
}

fn parse_data(id: &str, data_json: &str) -> Result<DocumentData> {
    serde_json::from_str(data_json)
        .map_err(|e| Error::Store(format!("Corrupt document {}: {}", id, e)))
}

fn encode_data(data: &DocumentData) -> Result<String> {
    serde_json::to_string(data).map_err(|e| Error::Serialization(e.to_string()))
}

async fn fetch_data(
    conn: &mut SqliteConnection,
    collection: &str,
    id: &str,
) -> Result<Option<DocumentData>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT data_json FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    row.map(|(json,)| parse_data(id, &json)).transpose()
}

async fn write_data(
    conn: &mut SqliteConnection,
    collection: &str,
    id: &str,
    data: &DocumentData,
    now: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO documents (collection, id, data_json, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(collection, id) DO UPDATE SET
            data_json = excluded.data_json,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(collection)
    .bind(id)
    .bind(encode_data(data)?)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn remove_data(conn: &mut SqliteConnection, collection: &str, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
        .bind(collection)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn rows_to_documents(rows: Vec<(String, String)>) -> Result<Vec<Document>> {
    rows.into_iter()
        .map(|(id, json)| {
            let data = parse_data(&id, &json)?;
            Ok(Document::new(id, data))
        })
        .collect()
}

#[async_trait]
impl TargetStore for SqliteStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn query_by_field(
        &self,
        field: &str,
        op: FieldOp,
        value: &JsonValue,
    ) -> Result<Vec<Document>> {
        let docs = self.list_documents().await?;
        Ok(docs
            .into_iter()
            .filter(|doc| matches_field(&doc.data, field, op, value))
            .collect())
    }

    async fn query_all_versions(&self, update_type: &str) -> Result<Vec<Document>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT id, data_json FROM documents
            WHERE collection = ? AND json_extract(data_json, '$.update_type') = ?
            ORDER BY
                CASE WHEN json_type(data_json, '$.version_id') = 'integer'
                     THEN json_extract(data_json, '$.version_id') ELSE 0 END DESC,
                CASE WHEN json_type(data_json, '$.latest') = 'true' THEN 0 ELSE 1 END,
                id
            "#,
        )
        .bind(&self.collection)
        .bind(update_type)
        .fetch_all(&self.pool)
        .await?;
        rows_to_documents(rows)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let mut conn = self.pool.acquire().await?;
        let data = fetch_data(&mut conn, &self.collection, id).await?;
        Ok(data.map(|data| Document::new(id, data)))
    }

    async fn add_document(&self, data: DocumentData) -> Result<String> {
        let id = new_document_id();
        self.add_document_with_id(&id, data).await?;
        debug!(collection = %self.collection, "Added document {}", id);
        Ok(id)
    }

    async fn add_document_with_id(&self, id: &str, mut data: DocumentData) -> Result<()> {
        let now = now_timestamp();
        resolve_server_timestamps(&mut data, &now);
        let mut conn = self.pool.acquire().await?;
        write_data(&mut conn, &self.collection, id, &data, &now).await
    }

    async fn update_document(&self, id: &str, mut data: DocumentData) -> Result<()> {
        let now = now_timestamp();
        resolve_server_timestamps(&mut data, &now);

        let mut tx = self.pool.begin().await?;
        let mut merged = fetch_data(&mut tx, &self.collection, id)
            .await?
            .unwrap_or_default();
        merged.extend(data);
        write_data(&mut tx, &self.collection, id, &merged, &now).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_document(&self, id: &str, mut data: DocumentData) -> Result<()> {
        let now = now_timestamp();
        resolve_server_timestamps(&mut data, &now);

        let mut tx = self.pool.begin().await?;
        remove_data(&mut tx, &self.collection, id).await?;
        write_data(&mut tx, &self.collection, id, &data, &now).await?;
        tx.commit().await?;
        debug!(collection = %self.collection, "Replaced document {}", id);
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        remove_data(&mut conn, &self.collection, id).await
    }

    async fn batch_write(&self, ops: Vec<BatchOp>) -> Result<Vec<String>> {
        let now = now_timestamp();
        let op_count = ops.len();
        let mut created = Vec::new();

        // Dropping the transaction on an early return rolls it back
        let mut tx = self.pool.begin().await?;
        for op in ops {
            match op {
                BatchOp::Create { mut data } => {
                    resolve_server_timestamps(&mut data, &now);
                    let id = new_document_id();
                    write_data(&mut tx, &self.collection, &id, &data, &now).await?;
                    created.push(id);
                }
                BatchOp::Update { id, mut data } => {
                    resolve_server_timestamps(&mut data, &now);
                    let mut existing = fetch_data(&mut tx, &self.collection, &id)
                        .await?
                        .ok_or_else(|| {
                            Error::Store(format!("batch update of missing document {}", id))
                        })?;
                    existing.extend(data);
                    write_data(&mut tx, &self.collection, &id, &existing, &now).await?;
                }
                BatchOp::Delete { id } => {
                    remove_data(&mut tx, &self.collection, &id).await?;
                }
            }
        }
        tx.commit().await?;

        debug!(collection = %self.collection, "Committed batch of {} operations", op_count);
        Ok(created)
    }

    async fn clear_collection(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ?")
            .bind(&self.collection)
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected() as usize;
        info!(collection = %self.collection, "Cleared {} documents", removed);
        Ok(removed)
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, data_json FROM documents WHERE collection = ? ORDER BY id",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;
        rows_to_documents(rows)
    }
}
