//! tablesync - reconcile a source table into a document store
//!
//! This crate provides:
//! - A reconciliation engine with selectable update policies (upsert by
//!   checksum, soft delete, versioned history, whole-table snapshots, ...)
//! - An Airtable REST reader and a SQLite-backed document store
//! - A CLI that runs passes and keeps a history of them

pub mod checksum;
pub mod classify;
pub mod commands;
pub mod config;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod record;
pub mod secrets;
pub mod source;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{PassReport, Pipeline, PipelineSettings};
pub use reconcile::{ReconciliationStrategy, StrategyRegistry, UpdateType};
