//! Role-based authorization for submitting and approving actions.
//!
//! The orchestrator only consumes the [`Authorizer`] trait; identity
//! management lives elsewhere. [`RoleMatrix`] is the configurable default,
//! read from the `roles` section of `.careguard/config.yaml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Authorization oracle consulted by the router.
pub trait Authorizer: Send + Sync {
    /// May `role` submit an action of `action_type`?
    fn authorize(&self, role: &str, action_type: &str) -> bool;
    /// May `role` vote on a ticket for `action_type`?
    fn can_approve(&self, role: &str, action_type: &str) -> bool;
}

// ---------------------------------------------------------------------------
// RoleGrant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleGrant {
    /// Action types this role may touch. `*` matches every type.
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default = "default_submit")]
    pub submit: bool,
    #[serde(default)]
    pub approve: bool,
}

fn default_submit() -> bool {
    true
}

impl RoleGrant {
    fn new(actions: &[&str], submit: bool, approve: bool) -> Self {
        Self {
            actions: actions.iter().map(|a| (*a).to_string()).collect(),
            submit,
            approve,
        }
    }

    pub fn covers(&self, action_type: &str) -> bool {
        self.actions.iter().any(|a| a == "*" || a == action_type)
    }
}

// ---------------------------------------------------------------------------
// RoleMatrix
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleMatrix {
    pub roles: BTreeMap<String, RoleGrant>,
}

impl Default for RoleMatrix {
    fn default() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert("system_admin".into(), RoleGrant::new(&["*"], true, true));
        roles.insert(
            "clinical_director".into(),
            RoleGrant::new(&["*"], true, true),
        );
        roles.insert(
            "nurse_manager".into(),
            RoleGrant::new(
                &[
                    "care_plan_update",
                    "documentation_update",
                    "assessment_completion",
                    "schedule_appointment",
                    "family_update",
                ],
                true,
                false,
            ),
        );
        roles.insert(
            "care_coordinator".into(),
            RoleGrant::new(
                &[
                    "view_schedule",
                    "schedule_appointment",
                    "send_reminder",
                    "appointment_reminder",
                    "family_update",
                ],
                true,
                false,
            ),
        );
        roles.insert(
            "billing_staff".into(),
            RoleGrant::new(&["order_entry", "documentation_update"], true, false),
        );
        roles.insert(
            "family_portal".into(),
            RoleGrant::new(&["view_schedule"], false, false),
        );
        roles.insert("domain_agent".into(), RoleGrant::new(&["*"], true, false));
        Self { roles }
    }
}

impl RoleMatrix {
    pub fn grant(&self, role: &str) -> Option<&RoleGrant> {
        self.roles
            .get(role)
            .or_else(|| self.roles.get(&role.to_ascii_lowercase()))
    }

    pub fn approver_roles(&self) -> impl Iterator<Item = &str> {
        self.roles
            .iter()
            .filter(|(_, g)| g.approve)
            .map(|(name, _)| name.as_str())
    }
}

impl Authorizer for RoleMatrix {
    fn authorize(&self, role: &str, action_type: &str) -> bool {
        self.grant(role)
            .is_some_and(|g| g.submit && g.covers(action_type))
    }

    fn can_approve(&self, role: &str, action_type: &str) -> bool {
        self.grant(role)
            .is_some_and(|g| g.approve && g.covers(action_type))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
