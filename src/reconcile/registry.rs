//! Policy identifiers and the strategy registry

use super::{
    FullRefresh, ReconciliationStrategy, Replace, SoftDelete, UpsertChecksum,
    UpsertChecksumWithDelete, UpsertTableChecksum, Versioned, VersionedChecksum, VersionedSet,
    VersionedTableChecksum,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Built-in policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    FullRefresh,
    Replace,
    Versioned,
    SoftDelete,
    UpsertChecksum,
    UpsertChecksumWithDelete,
    VersionedSet,
    VersionedChecksum,
    VersionedTableChecksum,
    UpsertTableChecksum,
}

impl UpdateType {
    pub const ALL: [UpdateType; 10] = [
        UpdateType::FullRefresh,
        UpdateType::Replace,
        UpdateType::Versioned,
        UpdateType::SoftDelete,
        UpdateType::UpsertChecksum,
        UpdateType::UpsertChecksumWithDelete,
        UpdateType::VersionedSet,
        UpdateType::VersionedChecksum,
        UpdateType::VersionedTableChecksum,
        UpdateType::UpsertTableChecksum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::FullRefresh => "full_refresh",
            UpdateType::Replace => "replace",
            UpdateType::Versioned => "versioned",
            UpdateType::SoftDelete => "soft_delete",
            UpdateType::UpsertChecksum => "upsert_checksum",
            UpdateType::UpsertChecksumWithDelete => "upsert_checksum_with_delete",
            UpdateType::VersionedSet => "versioned_set",
            UpdateType::VersionedChecksum => "versioned_checksum",
            UpdateType::VersionedTableChecksum => "versioned_table_checksum",
            UpdateType::UpsertTableChecksum => "upsert_table_checksum",
        }
    }

    /// Policies that snapshot the whole table rather than write per record
    pub fn is_table_policy(&self) -> bool {
        matches!(
            self,
            UpdateType::VersionedTableChecksum | UpdateType::UpsertTableChecksum
        )
    }

    fn strategy(&self) -> Box<dyn ReconciliationStrategy> {
        match self {
            UpdateType::FullRefresh => Box::new(FullRefresh),
            UpdateType::Replace => Box::new(Replace),
            UpdateType::Versioned => Box::new(Versioned),
            UpdateType::SoftDelete => Box::new(SoftDelete),
            UpdateType::UpsertChecksum => Box::new(UpsertChecksum),
            UpdateType::UpsertChecksumWithDelete => Box::new(UpsertChecksumWithDelete),
            UpdateType::VersionedSet => Box::new(VersionedSet),
            UpdateType::VersionedChecksum => Box::new(VersionedChecksum),
            UpdateType::VersionedTableChecksum => Box::new(VersionedTableChecksum),
            UpdateType::UpsertTableChecksum => Box::new(UpsertTableChecksum),
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        UpdateType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnsupportedPolicy(s.to_string()))
    }
}

type StrategyFactory = Arc<dyn Fn() -> Box<dyn ReconciliationStrategy> + Send + Sync>;

/// Policy identifier -> strategy constructor
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in policy
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for update_type in UpdateType::ALL {
            registry.register(update_type.as_str(), move || update_type.strategy());
        }
        registry
    }

    /// Register (or override) the strategy behind a policy identifier
    pub fn register<F>(&mut self, policy: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn ReconciliationStrategy> + Send + Sync + 'static,
    {
        self.factories.insert(policy.into(), Arc::new(factory));
    }

    /// Construct the strategy for a policy identifier
    pub fn resolve(&self, policy: &str) -> Result<Box<dyn ReconciliationStrategy>> {
        self.factories
            .get(policy)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnsupportedPolicy(policy.to_string()))
    }

    pub fn contains(&self, policy: &str) -> bool {
        self.factories.contains_key(policy)
    }

    /// Registered identifiers in sorted order
    pub fn policies(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{PassContext, Plan};
    use crate::record::Record;
    use crate::store::TargetStore;
    use async_trait::async_trait;

    #[test]
    fn test_builtin_policies_resolve_to_their_names() {
        let registry = StrategyRegistry::with_builtin();
        assert_eq!(registry.policies().len(), 10);
        for update_type in UpdateType::ALL {
            let strategy = registry.resolve(update_type.as_str()).unwrap();
            assert_eq!(strategy.name(), update_type.as_str());
            assert_eq!(update_type.as_str().parse::<UpdateType>().unwrap(), update_type);
        }
    }

    #[test]
    fn test_unknown_policy_is_unsupported() {
        let registry = StrategyRegistry::with_builtin();
        assert!(matches!(
            registry.resolve("merge_magic"),
            Err(Error::UnsupportedPolicy(_))
        ));
        assert!("merge_magic".parse::<UpdateType>().is_err());
    }

    struct Noop;

    #[async_trait]
    impl ReconciliationStrategy for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }

        async fn plan(
            &self,
            _store: &dyn TargetStore,
            records: &[Record],
            _ctx: &PassContext<'_>,
        ) -> Result<Plan> {
            Ok(Plan {
                mutations: Vec::new(),
                unchanged: records.len(),
            })
        }
    }

    #[test]
    fn test_runtime_registration() {
        let mut registry = StrategyRegistry::with_builtin();
        assert!(!registry.contains("noop"));

        registry.register("noop", || Box::new(Noop));

        assert!(registry.contains("noop"));
        assert_eq!(registry.resolve("noop").unwrap().name(), "noop");
        assert_eq!(registry.policies().len(), 11);
    }

    #[test]
    fn test_update_type_serde() {
        let json = serde_json::to_string(&UpdateType::UpsertChecksumWithDelete).unwrap();
        assert_eq!(json, "\"upsert_checksum_with_delete\"");
    }
}
