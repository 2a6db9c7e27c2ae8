//! Policies command implementation

use crate::reconcile::{StrategyRegistry, UpdateType};
use serde::{Deserialize, Serialize};

/// One registered policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyInfo {
    pub id: String,
    /// True for policies that snapshot the whole table
    pub table_level: bool,
    /// True for the policy set in the config
    pub configured: bool,
}

/// List registered policies
pub fn cmd_policies(registry: &StrategyRegistry, configured: Option<&str>) -> Vec<PolicyInfo> {
    registry
        .policies()
        .into_iter()
        .map(|id| PolicyInfo {
            id: id.to_string(),
            table_level: id
                .parse::<UpdateType>()
                .map(|t| t.is_table_policy())
                .unwrap_or(false),
            configured: configured == Some(id),
        })
        .collect()
}

pub fn print_policies(policies: &[PolicyInfo]) {
    println!("\nRegistered update policies\n");
    for policy in policies {
        let marker = if policy.configured { "*" } else { " " };
        let scope = if policy.table_level { "table" } else { "record" };
        println!("{} {:<30} {}", marker, policy.id, scope);
    }
    println!("\n* = configured policy");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_builtin_policies() {
        let policies = cmd_policies(&StrategyRegistry::with_builtin(), Some("versioned_set"));

        assert_eq!(policies.len(), 10);
        let configured: Vec<_> = policies.iter().filter(|p| p.configured).collect();
        assert_eq!(configured.len(), 1);
        assert_eq!(configured[0].id, "versioned_set");
        assert_eq!(policies.iter().filter(|p| p.table_level).count(), 2);
    }
}
