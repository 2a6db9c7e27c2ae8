//! API key lookup
//!
//! Keys come from a managed secret store when one is configured, then from
//! the process environment.

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, warn};

/// A managed secret store
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Value of the secret, `None` when the store does not hold it
    async fn get_secret(&self, name: &str) -> Result<Option<String>>;

    fn provider_type(&self) -> &'static str;
}

/// Secret store reading one file per secret from a directory
///
/// This is the layout used by mounted secret volumes: the file name is the
/// secret name and the trimmed contents are the value.
#[derive(Debug, Clone)]
pub struct DirSecretStore {
    dir: PathBuf,
}

impl DirSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SecretStore for DirSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::Credential(format!("Invalid secret name: {:?}", name)));
        }

        let path = self.dir.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let value = contents.trim();
                if value.is_empty() {
                    debug!(secret_name = name, path = %path.display(), "Secret file is empty");
                    Ok(None)
                } else {
                    debug!(secret_name = name, path = %path.display(), "Secret loaded from file");
                    Ok(Some(value.to_string()))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Credential(format!(
                "Cannot read secret file '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    fn provider_type(&self) -> &'static str {
        "dir"
    }
}

/// Resolves API keys: managed store first, then environment
#[derive(Default)]
pub struct SecretProvider {
    managed: Option<Box<dyn SecretStore>>,
}

impl SecretProvider {
    pub fn new(managed: Option<Box<dyn SecretStore>>) -> Self {
        Self { managed }
    }

    /// Provider backed by the configured secret directory, if any
    pub fn from_config(config: &Config) -> Self {
        let managed = config
            .secrets_dir()
            .map(|dir| Box::new(DirSecretStore::new(dir)) as Box<dyn SecretStore>);
        Self::new(managed)
    }

    /// Look up an API key by name
    ///
    /// Managed-store failures are logged and treated as misses. Empty values
    /// count as missing.
    pub async fn get_api_key(&self, name: &str) -> Result<String> {
        if let Some(store) = &self.managed {
            match store.get_secret(name).await {
                Ok(Some(value)) => {
                    debug!(provider = store.provider_type(), "API key retrieved from secret store");
                    return Ok(value);
                }
                Ok(None) => {
                    debug!(provider = store.provider_type(), "{} not in secret store", name);
                }
                Err(e) => {
                    warn!(
                        provider = store.provider_type(),
                        "Failed to retrieve {} from secret store: {}", name, e
                    );
                }
            }
        }

        match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => {
                debug!("API key retrieved from environment variables");
                Ok(value.trim().to_string())
            }
            _ => Err(Error::Credential(format!(
                "{} not found in the secret store or environment variables",
                name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_dir_store_reads_trimmed_value() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("TABLESYNC_TEST_KEY_A"), "secret-a\n").unwrap();
        std::fs::write(tmp.path().join("EMPTY"), "  \n").unwrap();

        let store = DirSecretStore::new(tmp.path());
        assert_eq!(
            store.get_secret("TABLESYNC_TEST_KEY_A").await.unwrap(),
            Some("secret-a".to_string())
        );
        assert_eq!(store.get_secret("EMPTY").await.unwrap(), None);
        assert_eq!(store.get_secret("MISSING").await.unwrap(), None);
        assert!(store.get_secret("../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_managed_store_wins_over_environment() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("TABLESYNC_TEST_KEY_B"), "from-store").unwrap();
        std::env::set_var("TABLESYNC_TEST_KEY_B", "from-env");

        let provider = SecretProvider::new(Some(Box::new(DirSecretStore::new(tmp.path()))));
        assert_eq!(
            provider.get_api_key("TABLESYNC_TEST_KEY_B").await.unwrap(),
            "from-store"
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_environment() {
        let tmp = TempDir::new().unwrap();
        std::env::set_var("TABLESYNC_TEST_KEY_C", "from-env");

        let provider = SecretProvider::new(Some(Box::new(DirSecretStore::new(tmp.path()))));
        assert_eq!(
            provider.get_api_key("TABLESYNC_TEST_KEY_C").await.unwrap(),
            "from-env"
        );
    }

    #[tokio::test]
    async fn test_missing_everywhere_is_credential_error() {
        std::env::set_var("TABLESYNC_TEST_KEY_D", "");
        let provider = SecretProvider::default();
        let err = provider
            .get_api_key("TABLESYNC_TEST_KEY_D")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Credential(_)));
    }
}
