//! In-process document store

use super::{
    matches_field, new_document_id, now_timestamp, resolve_server_timestamps, BatchOp, Document,
    DocumentData, FieldOp, TargetStore,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Write counters, one per store operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreMetrics {
    pub adds: usize,
    pub updates: usize,
    pub sets: usize,
    pub deletes: usize,
    pub batches: usize,
    pub batch_ops: usize,
    pub clears: usize,
}

impl StoreMetrics {
    /// Total number of store calls that wrote anything
    pub fn writes(&self) -> usize {
        self.adds + self.updates + self.sets + self.deletes + self.batches + self.clears
    }
}

#[derive(Default)]
struct State {
    docs: BTreeMap<String, DocumentData>,
    metrics: StoreMetrics,
}

/// Collection held in memory, used for dry runs and tests
pub struct MemoryStore {
    collection: String,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Build a store holding copies of the given documents; metrics start at zero
    pub fn with_documents(collection: impl Into<String>, docs: Vec<Document>) -> Self {
        let state = State {
            docs: docs.into_iter().map(|doc| (doc.id, doc.data)).collect(),
            metrics: StoreMetrics::default(),
        };
        Self {
            collection: collection.into(),
            state: Mutex::new(state),
        }
    }

    pub async fn metrics(&self) -> StoreMetrics {
        self.state.lock().await.metrics.clone()
    }

    pub async fn reset_metrics(&self) {
        self.state.lock().await.metrics = StoreMetrics::default();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.docs.is_empty()
    }
}

fn merge_into(target: &mut DocumentData, partial: DocumentData) {
    for (key, value) in partial {
        target.insert(key, value);
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn query_by_field(
        &self,
        field: &str,
        op: FieldOp,
        value: &JsonValue,
    ) -> Result<Vec<Document>> {
        let state = self.state.lock().await;
        Ok(state
            .docs
            .iter()
            .filter(|(_, data)| matches_field(data, field, op, value))
            .map(|(id, data)| Document::new(id.clone(), data.clone()))
            .collect())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let state = self.state.lock().await;
        Ok(state
            .docs
            .get(id)
            .map(|data| Document::new(id, data.clone())))
    }

    async fn add_document(&self, mut data: DocumentData) -> Result<String> {
        resolve_server_timestamps(&mut data, &now_timestamp());
        let id = new_document_id();
        let mut state = self.state.lock().await;
        state.docs.insert(id.clone(), data);
        state.metrics.adds += 1;
        debug!(collection = %self.collection, "Added document {}", id);
        Ok(id)
    }

    async fn add_document_with_id(&self, id: &str, mut data: DocumentData) -> Result<()> {
        resolve_server_timestamps(&mut data, &now_timestamp());
        let mut state = self.state.lock().await;
        state.docs.insert(id.to_string(), data);
        state.metrics.adds += 1;
        Ok(())
    }

    async fn update_document(&self, id: &str, mut data: DocumentData) -> Result<()> {
        resolve_server_timestamps(&mut data, &now_timestamp());
        let mut state = self.state.lock().await;
        merge_into(state.docs.entry(id.to_string()).or_default(), data);
        state.metrics.updates += 1;
        Ok(())
    }

    async fn set_document(&self, id: &str, mut data: DocumentData) -> Result<()> {
        resolve_server_timestamps(&mut data, &now_timestamp());
        let mut state = self.state.lock().await;
        state.docs.insert(id.to_string(), data);
        state.metrics.sets += 1;
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.docs.remove(id);
        state.metrics.deletes += 1;
        Ok(())
    }

    async fn batch_write(&self, ops: Vec<BatchOp>) -> Result<Vec<String>> {
        let now = now_timestamp();
        let mut state = self.state.lock().await;

        // Stage on a copy so a failing op leaves the collection untouched
        let mut staged = state.docs.clone();
        let mut created = Vec::new();
        let op_count = ops.len();
        for op in ops {
            match op {
                BatchOp::Create { mut data } => {
                    resolve_server_timestamps(&mut data, &now);
                    let id = new_document_id();
                    staged.insert(id.clone(), data);
                    created.push(id);
                }
                BatchOp::Update { id, mut data } => {
                    resolve_server_timestamps(&mut data, &now);
                    let existing = staged.get_mut(&id).ok_or_else(|| {
                        Error::Store(format!("batch update of missing document {}", id))
                    })?;
                    merge_into(existing, data);
                }
                BatchOp::Delete { id } => {
                    staged.remove(&id);
                }
            }
        }

        state.docs = staged;
        state.metrics.batches += 1;
        state.metrics.batch_ops += op_count;
        debug!(collection = %self.collection, "Committed batch of {} operations", op_count);
        Ok(created)
    }

    async fn clear_collection(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let removed = state.docs.len();
        state.docs.clear();
        state.metrics.clears += 1;
        Ok(removed)
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let state = self.state.lock().await;
        Ok(state
            .docs
            .iter()
            .map(|(id, data)| Document::new(id.clone(), data.clone()))
            .collect())
    }
}
