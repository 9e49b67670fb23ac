//! Just-in-time provisioning role delta.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::config::ProvisioningConfig;
use crate::pipeline::ValidationOutcome;

/// Whether the plan creates the account or updates an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Create,
    Update,
}

/// Role changes to apply to a local account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningPlan {
    pub kind: PlanKind,
    pub roles_to_add: BTreeSet<String>,
    pub roles_to_delete: BTreeSet<String>,
}

/// Compute the role delta for `outcome`.
///
/// `existing_roles` is `None` when the user does not exist yet. Only roles
/// known to the user store are added. The everyone role is never deleted,
/// nor is the admin role of the primary super admin unless
/// `super_admin_role_required` is set.
pub fn plan_provisioning(
    outcome: &ValidationOutcome,
    existing_roles: Option<&BTreeSet<String>>,
    known_roles: &BTreeSet<String>,
    is_super_admin: bool,
    config: &ProvisioningConfig,
) -> ProvisioningPlan {
    let new_roles: BTreeSet<String> = match (&config.default_role, outcome.roles.is_empty()) {
        (Some(default_role), true) => BTreeSet::from([default_role.clone()]),
        _ => outcome.roles.clone(),
    };

    debug!(
        user = %outcome.username,
        roles = ?new_roles,
        "Roles as per assertion and default role"
    );

    let mut roles_to_add: BTreeSet<String> = new_roles.intersection(known_roles).cloned().collect();

    let Some(current) = existing_roles else {
        return ProvisioningPlan {
            kind: PlanKind::Create,
            roles_to_add,
            roles_to_delete: BTreeSet::new(),
        };
    };

    roles_to_add.retain(|r| !current.contains(r));

    let mut roles_to_delete: BTreeSet<String> = current.difference(&new_roles).cloned().collect();
    roles_to_delete.remove(&config.everyone_role);

    if is_super_admin
        && !config.super_admin_role_required
        && roles_to_delete.remove(&config.admin_role)
    {
        warn!(
            user = %outcome.username,
            "Allowing super admin login although the assertion omits the admin role"
        );
    }

    debug!(
        user = %outcome.username,
        adding = ?roles_to_add,
        deleting = ?roles_to_delete,
        "Provisioning plan"
    );

    ProvisioningPlan {
        kind: PlanKind::Update,
        roles_to_add,
        roles_to_delete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(roles: &[&str]) -> BTreeSet<String> {
        roles.iter().map(|r| r.to_string()).collect()
    }

    fn outcome(roles: &[&str]) -> ValidationOutcome {
        ValidationOutcome {
            username: "alice".to_string(),
            tenant_domain: "carbon.super".to_string(),
            roles: set(roles),
            authorized: true,
        }
    }

    #[test]
    fn test_existing_user_delta() {
        let plan = plan_provisioning(
            &outcome(&["B", "C"]),
            Some(&set(&["A", "B"])),
            &set(&["A", "B", "C"]),
            false,
            &ProvisioningConfig::default(),
        );

        assert_eq!(plan.kind, PlanKind::Update);
        assert_eq!(plan.roles_to_add, set(&["C"]));
        assert_eq!(plan.roles_to_delete, set(&["A"]));
    }

    #[test]
    fn test_new_user_adds_known_roles_only() {
        let plan = plan_provisioning(
            &outcome(&["B", "unknown"]),
            None,
            &set(&["A", "B"]),
            false,
            &ProvisioningConfig::default(),
        );

        assert_eq!(plan.kind, PlanKind::Create);
        assert_eq!(plan.roles_to_add, set(&["B"]));
        assert!(plan.roles_to_delete.is_empty());
    }

    #[test]
    fn test_default_role_when_assertion_has_none() {
        let config = ProvisioningConfig {
            default_role: Some("Internal/subscriber".to_string()),
            ..Default::default()
        };

        let plan = plan_provisioning(
            &outcome(&[]),
            Some(&set(&["A"])),
            &set(&["A", "Internal/subscriber"]),
            false,
            &config,
        );

        assert_eq!(plan.roles_to_add, set(&["Internal/subscriber"]));
        assert_eq!(plan.roles_to_delete, set(&["A"]));
    }

    #[test]
    fn test_everyone_role_kept() {
        let plan = plan_provisioning(
            &outcome(&["B"]),
            Some(&set(&["Internal/everyone", "B"])),
            &set(&["B"]),
            false,
            &ProvisioningConfig::default(),
        );
        assert!(plan.roles_to_delete.is_empty());
    }

    #[test]
    fn test_super_admin_keeps_admin_role() {
        let existing = set(&["admin", "B"]);
        let known = set(&["admin", "B"]);
        let config = ProvisioningConfig::default();

        let plan = plan_provisioning(&outcome(&["B"]), Some(&existing), &known, true, &config);
        assert!(plan.roles_to_delete.is_empty());

        // Not the super admin: admin role is revoked.
        let plan = plan_provisioning(&outcome(&["B"]), Some(&existing), &known, false, &config);
        assert_eq!(plan.roles_to_delete, set(&["admin"]));

        let strict = ProvisioningConfig {
            super_admin_role_required: true,
            ..Default::default()
        };
        let plan = plan_provisioning(&outcome(&["B"]), Some(&existing), &known, true, &strict);
        assert_eq!(plan.roles_to_delete, set(&["admin"]));
    }

    proptest! {
        #[test]
        fn test_everyone_role_never_deleted(
            new in prop::collection::btree_set("[A-E]|Internal/everyone", 0..4),
            current in prop::collection::btree_set("[A-E]|Internal/everyone", 0..4),
            known in prop::collection::btree_set("[A-E]|Internal/everyone", 0..4),
            is_super_admin in any::<bool>(),
        ) {
            let mut validated = outcome(&[]);
            validated.roles = new;

            let plan = plan_provisioning(
                &validated,
                Some(&current),
                &known,
                is_super_admin,
                &ProvisioningConfig::default(),
            );

            prop_assert!(!plan.roles_to_delete.contains("Internal/everyone"));
            prop_assert!(plan.roles_to_add.is_subset(&known));
            prop_assert!(plan.roles_to_add.is_disjoint(&current));
            prop_assert!(plan.roles_to_delete.is_subset(&current));
        }
    }
}
