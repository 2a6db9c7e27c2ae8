//! Default values for configuration

use std::path::PathBuf;

/// Default source API root; `AIRTABLE_API_URL` overrides it
pub fn default_api_url() -> String {
    std::env::var("AIRTABLE_API_URL").unwrap_or_else(|_| "https://api.airtable.com".to_string())
}

/// Default name of the secret holding the source API key
pub fn default_api_key_secret() -> String {
    "AIRTABLE_API_KEY".to_string()
}

/// Airtable allows 5 requests per second per base
pub fn default_requests_per_second() -> u32 {
    5
}

/// Default HTTP request timeout in seconds
pub fn default_timeout_secs() -> u64 {
    30
}

/// Default SQLite database file, relative to the config directory
pub fn default_database() -> PathBuf {
    PathBuf::from("tablesync.db")
}

/// Default update policy
pub fn default_update_type() -> String {
    "upsert_checksum".to_string()
}
