use crate::error::Result;
use crate::policy::{Policy, PolicyStore};
use crate::types::RiskTier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Assessment
// ---------------------------------------------------------------------------

/// Tier and policy for one action type, read from a single policy snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub action_type: String,
    pub tier: RiskTier,
    pub policy: Policy,
    /// `false` when the type was not in the catalogue and took the fallback.
    pub mapped: bool,
}

// ---------------------------------------------------------------------------
// RiskClassifier
// ---------------------------------------------------------------------------

/// Maps action types to risk tiers. Pure apart from reading the store.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    store: Arc<PolicyStore>,
}

impl RiskClassifier {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn classify(&self, action_type: &str) -> Result<RiskTier> {
        Ok(self.assess(action_type)?.tier)
    }

    pub fn assess(&self, action_type: &str) -> Result<Assessment> {
        let doc = self.store.snapshot()?;
        let policy = doc.policy_for(action_type).clone();
        let mapped = doc.is_mapped(action_type);
        if !mapped {
            tracing::debug!(action_type, tier = %policy.risk_tier, "unmapped action type, using fallback");
        }
        Ok(Assessment {
            action_type: action_type.to_string(),
            tier: policy.risk_tier,
            policy,
            mapped,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyDocument;

    fn classifier() -> RiskClassifier {
        RiskClassifier::new(Arc::new(
            PolicyStore::new(PolicyDocument::default()).unwrap(),
        ))
    }

    #[test]
    fn classifies_catalogue() {
        let c = classifier();
        assert_eq!(c.classify("appointment_reminder").unwrap(), RiskTier::Low);
        assert_eq!(c.classify("care_plan_update").unwrap(), RiskTier::Medium);
        assert_eq!(c.classify("medication_change").unwrap(), RiskTier::High);
        assert_eq!(c.classify("code_blue_activation").unwrap(), RiskTier::Critical);
    }

    #[test]
    fn classification_is_deterministic() {
        let c = classifier();
        let first = c.classify("discharge_decision").unwrap();
        for _ in 0..10 {
            assert_eq!(c.classify("discharge_decision").unwrap(), first);
        }
    }

    #[test]
    fn unknown_type_is_high_by_default() {
        let a = classifier().assess("rewrite_chart").unwrap();
        assert_eq!(a.tier, RiskTier::High);
        assert!(!a.mapped);
        assert_eq!(a.policy.approvals_required, 1);
    }

    #[test]
    fn assessment_follows_reload() {
        let c = classifier();
        let mut doc = PolicyDocument::default();
        doc.fallback = Policy::for_tier(RiskTier::Critical);
        c.store().replace(doc).unwrap();
        let a = c.assess("rewrite_chart").unwrap();
        assert_eq!(a.tier, RiskTier::Critical);
        assert_eq!(a.policy.risk_tier, a.tier);
    }
}
