//! Init command implementation

use crate::config::{Config, PathsConfig};
use crate::error::{Error, Result};
use crate::store::SqliteStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub force: bool,
}

/// Where init put things
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitInfo {
    pub config_path: String,
    pub database_path: String,
}

/// Write a default config and create the database
pub async fn cmd_init(options: InitOptions) -> Result<InitInfo> {
    let InitOptions {
        base_dir,
        config_path,
        force,
    } = options;

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    let mut config = Config::default();
    config.paths = PathsConfig {
        base_dir,
        config_file: config_path,
    };
    config.save()?;

    let database_path = config.database_path();
    info!("Creating database at {:?}", database_path);
    SqliteStore::open(&database_path, &config.target.collection).await?;

    Ok(InitInfo {
        config_path: config.paths.config_file.display().to_string(),
        database_path: database_path.display().to_string(),
    })
}

pub fn print_init(info: &InitInfo) {
    println!("✓ tablesync initialized successfully");
    println!("  Config: {}", info.config_path);
    println!("  Database: {}", info.database_path);
    println!("\nNext steps:");
    println!("  1. Set source.base_id, source.table_name, target.collection and pipeline.primary_key");
    println!("  2. Provide the API key via the secrets directory or the AIRTABLE_API_KEY variable");
    println!("  3. Run a pass: tablesync sync");
}
