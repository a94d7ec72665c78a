//! Governance policy: the mapping from action type to risk tier, confidence
//! threshold, approval quota and timeouts.
//!
//! Layout:
//!   .careguard/policies.yaml   — a [`PolicyDocument`]
//!
//! The live document sits behind [`PolicyStore`], which hot-swaps whole
//! documents. Readers take an `Arc` snapshot, so a reload never tears a read
//! and tickets keep the policy they were opened under.

use crate::config::{ConfigWarning, WarnLevel};
use crate::error::{GuardError, Result};
use crate::io;
use crate::types::RiskTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub risk_tier: RiskTier,
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_auto_execute")]
    pub auto_execute: bool,
    #[serde(default)]
    pub approvals_required: u32,
    /// Lifetime of an approval ticket before it times out.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Retries for downstream service calls made while executing.
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Per-attempt bound on a downstream service call.
    #[serde(default = "default_service_timeout")]
    pub service_timeout_seconds: u64,
}

fn default_threshold() -> f64 {
    0.85
}

fn default_auto_execute() -> bool {
    true
}

fn default_timeout() -> u64 {
    300
}

fn default_retries() -> u32 {
    3
}

fn default_service_timeout() -> u64 {
    30
}

/// Longest ticket lifetime a policy may ask for: thirty days.
pub const MAX_TIMEOUT_SECONDS: u64 = 30 * 24 * 60 * 60;

impl Policy {
    /// Default policy for a tier: the tier's approval floor and stock timeouts.
    pub fn for_tier(risk_tier: RiskTier) -> Self {
        Self {
            risk_tier,
            confidence_threshold: default_threshold(),
            auto_execute: default_auto_execute(),
            approvals_required: risk_tier.min_approvals(),
            timeout_seconds: default_timeout(),
            max_retries: default_retries(),
            service_timeout_seconds: default_service_timeout(),
        }
    }

    /// `None` when `timeout_seconds` does not fit a chrono duration.
    pub fn escalation_timeout(&self) -> Option<chrono::Duration> {
        i64::try_from(self.timeout_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_seconds)
    }

    /// `true` when `confidence` clears the threshold. NaN never does.
    pub fn is_confident(&self, confidence: f64) -> bool {
        confidence >= self.confidence_threshold
    }

    fn check(&self, label: &str, out: &mut Vec<ConfigWarning>) {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            out.push(error(format!(
                "{label}: confidence_threshold {} is outside [0.0, 1.0]",
                self.confidence_threshold
            )));
        }
        if self.approvals_required < self.risk_tier.min_approvals() {
            out.push(error(format!(
                "{label}: {} risk requires at least {} approval(s), got {}",
                self.risk_tier,
                self.risk_tier.min_approvals(),
                self.approvals_required
            )));
        }
        if !self.risk_tier.is_elevated() && self.approvals_required > 0 {
            out.push(warning(format!(
                "{label}: approvals_required={} is ignored for {} risk unless review is forced",
                self.approvals_required, self.risk_tier
            )));
        }
        if self.timeout_seconds == 0 {
            out.push(error(format!("{label}: timeout_seconds must be greater than 0")));
        } else if self.timeout_seconds > MAX_TIMEOUT_SECONDS {
            out.push(error(format!(
                "{label}: timeout_seconds {} exceeds the maximum of {MAX_TIMEOUT_SECONDS}",
                self.timeout_seconds
            )));
        }
        if self.service_timeout_seconds == 0 {
            out.push(error(format!(
                "{label}: service_timeout_seconds must be greater than 0"
            )));
        }
        if self.max_retries > 10 {
            out.push(warning(format!(
                "{label}: max_retries={} (>10 is unusual)",
                self.max_retries
            )));
        }
    }
}

fn error(message: String) -> ConfigWarning {
    ConfigWarning {
        level: WarnLevel::Error,
        message,
    }
}

fn warning(message: String) -> ConfigWarning {
    ConfigWarning {
        level: WarnLevel::Warning,
        message,
    }
}

// ---------------------------------------------------------------------------
// PolicyDocument
// ---------------------------------------------------------------------------

/// Policies keyed by action type, plus the fallback for unmapped types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default = "default_fallback")]
    pub fallback: Policy,
    #[serde(default)]
    pub actions: BTreeMap<String, Policy>,
}

fn default_fallback() -> Policy {
    Policy::for_tier(RiskTier::High)
}

const CRITICAL_ACTIONS: &[&str] = &[
    "biomarker_alert",
    "critical_biomarker_alert",
    "emergency_escalation",
    "life_threatening_condition",
    "code_blue_activation",
];

const HIGH_ACTIONS: &[&str] = &[
    "medication_change",
    "treatment_modification",
    "discharge_decision",
    "emergency_intervention",
    "adverse_event_report",
];

const MEDIUM_ACTIONS: &[&str] = &[
    "care_plan_update",
    "documentation_update",
    "assessment_completion",
    "referral_creation",
    "order_entry",
];

const LOW_ACTIONS: &[&str] = &[
    "appointment_reminder",
    "schedule_appointment",
    "send_reminder",
    "view_schedule",
    "intake_summary",
    "family_update",
];

impl Default for PolicyDocument {
    fn default() -> Self {
        let mut actions = BTreeMap::new();
        for (tier, names) in [
            (RiskTier::Critical, CRITICAL_ACTIONS),
            (RiskTier::High, HIGH_ACTIONS),
            (RiskTier::Medium, MEDIUM_ACTIONS),
            (RiskTier::Low, LOW_ACTIONS),
        ] {
            for name in names {
                actions.insert((*name).to_string(), Policy::for_tier(tier));
            }
        }
        Self {
            fallback: default_fallback(),
            actions,
        }
    }
}

impl PolicyDocument {
    /// Policy for `action_type`; unmapped types get the fallback.
    pub fn policy_for(&self, action_type: &str) -> &Policy {
        self.actions.get(action_type).unwrap_or(&self.fallback)
    }

    pub fn is_mapped(&self, action_type: &str) -> bool {
        self.actions.contains_key(action_type)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GuardError::Configuration(format!(
                "policy file not found: {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        io::replace_file(path, data.as_bytes())
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut out = Vec::new();
        self.fallback.check("fallback", &mut out);
        for (name, policy) in &self.actions {
            if name.trim().is_empty() {
                out.push(error("policy with an empty action type".to_string()));
                continue;
            }
            policy.check(name, &mut out);
        }
        out
    }

    /// Validate and turn errors into a single `Configuration` failure.
    /// Warnings are returned for the caller to surface.
    pub fn ensure_valid(&self) -> Result<Vec<ConfigWarning>> {
        let (errors, warnings): (Vec<_>, Vec<_>) = self
            .validate()
            .into_iter()
            .partition(|w| w.level == WarnLevel::Error);
        if !errors.is_empty() {
            let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            return Err(GuardError::Configuration(messages.join("; ")));
        }
        Ok(warnings)
    }
}

// ---------------------------------------------------------------------------
// PolicyStore
// ---------------------------------------------------------------------------

/// Holds the active policy document and swaps it atomically on reload.
#[derive(Debug)]
pub struct PolicyStore {
    current: RwLock<Arc<PolicyDocument>>,
}

impl PolicyStore {
    /// Build a store from a document. Fails if the document has errors.
    pub fn new(doc: PolicyDocument) -> Result<Self> {
        for w in doc.ensure_valid()? {
            tracing::warn!(message = %w.message, "policy warning");
        }
        Ok(Self {
            current: RwLock::new(Arc::new(doc)),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::new(PolicyDocument::load(path)?)
    }

    pub fn snapshot(&self) -> Result<Arc<PolicyDocument>> {
        self.current
            .read()
            .map(|doc| Arc::clone(&doc))
            .map_err(|_| unavailable())
    }

    pub fn lookup(&self, action_type: &str) -> Result<Policy> {
        Ok(self.snapshot()?.policy_for(action_type).clone())
    }

    /// Swap in `doc` after validating it. On failure the previous document
    /// stays active.
    pub fn replace(&self, doc: PolicyDocument) -> Result<Vec<ConfigWarning>> {
        let warnings = doc.ensure_valid()?;
        let mut guard = self.current.write().map_err(|_| unavailable())?;
        *guard = Arc::new(doc);
        tracing::info!(
            actions = guard.actions.len(),
            fallback_tier = %guard.fallback.risk_tier,
            "policy document replaced"
        );
        Ok(warnings)
    }

    pub fn reload(&self, path: &Path) -> Result<Vec<ConfigWarning>> {
        let doc = PolicyDocument::load(path).inspect_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "policy reload failed");
        })?;
        self.replace(doc)
    }
}

fn unavailable() -> GuardError {
    GuardError::Configuration("policy store unavailable".into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_catalogue_is_valid() {
        let doc = PolicyDocument::default();
        assert!(doc.validate().is_empty(), "{:?}", doc.validate());
        assert_eq!(doc.policy_for("biomarker_alert").risk_tier, RiskTier::Critical);
        assert_eq!(doc.policy_for("biomarker_alert").approvals_required, 2);
        assert_eq!(doc.policy_for("medication_change").risk_tier, RiskTier::High);
        assert_eq!(doc.policy_for("care_plan_update").risk_tier, RiskTier::Medium);
        assert_eq!(doc.policy_for("appointment_reminder").risk_tier, RiskTier::Low);
    }

    #[test]
    fn unmapped_type_takes_fallback() {
        let doc = PolicyDocument::default();
        assert!(!doc.is_mapped("teleport_patient"));
        assert_eq!(doc.policy_for("teleport_patient").risk_tier, RiskTier::High);
    }

    #[test]
    fn yaml_defaults_fill_missing_fields() {
        let doc: PolicyDocument = serde_yaml::from_str(
            "actions:\n  order_entry:\n    risk_tier: medium\n",
        )
        .unwrap();
        let p = doc.policy_for("order_entry");
        assert_eq!(p.confidence_threshold, 0.85);
        assert!(p.auto_execute);
        assert_eq!(p.timeout_seconds, 300);
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.service_timeout_seconds, 30);
        assert_eq!(doc.fallback.risk_tier, RiskTier::High);
    }

    #[test]
    fn validate_flags_errors_and_warnings() {
        let mut doc = PolicyDocument::default();
        let mut bad = Policy::for_tier(RiskTier::Critical);
        bad.approvals_required = 1;
        bad.confidence_threshold = 1.5;
        doc.actions.insert("code_red".into(), bad);
        let mut noisy = Policy::for_tier(RiskTier::Low);
        noisy.max_retries = 20;
        doc.actions.insert("ping".into(), noisy);

        let warnings = doc.validate();
        let errors: Vec<_> = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("max_retries=20")));
    }

    #[test]
    fn store_rejects_invalid_document() {
        let mut doc = PolicyDocument::default();
        doc.fallback.timeout_seconds = 0;
        let err = PolicyStore::new(doc).unwrap_err();
        assert!(matches!(err, GuardError::Configuration(_)));
    }

    #[test]
    fn oversized_timeout_is_rejected() {
        let mut doc = PolicyDocument::default();
        doc.actions
            .get_mut("medication_change")
            .unwrap()
            .timeout_seconds = 10_000_000_000_000;
        let warnings = doc.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("exceeds the maximum")));
        assert!(matches!(
            doc.ensure_valid(),
            Err(GuardError::Configuration(_))
        ));

        doc.actions
            .get_mut("medication_change")
            .unwrap()
            .timeout_seconds = MAX_TIMEOUT_SECONDS;
        assert!(doc.validate().is_empty());
    }

    #[test]
    fn failed_replace_keeps_previous_document() {
        let store = PolicyStore::new(PolicyDocument::default()).unwrap();
        let mut bad = PolicyDocument::default();
        bad.actions
            .get_mut("medication_change")
            .unwrap()
            .approvals_required = 0;
        assert!(store.replace(bad).is_err());
        assert_eq!(
            store.lookup("medication_change").unwrap().approvals_required,
            1
        );
    }

    #[test]
    fn snapshot_survives_replace() {
        let store = PolicyStore::new(PolicyDocument::default()).unwrap();
        let before = store.snapshot().unwrap();
        let mut doc = PolicyDocument::default();
        doc.actions
            .insert("send_reminder".into(), Policy::for_tier(RiskTier::High));
        store.replace(doc).unwrap();
        assert_eq!(before.policy_for("send_reminder").risk_tier, RiskTier::Low);
        assert_eq!(
            store.lookup("send_reminder").unwrap().risk_tier,
            RiskTier::High
        );
    }

    #[test]
    fn reload_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policies.yaml");
        PolicyDocument::default().save(&path).unwrap();
        let store = PolicyStore::load(&path).unwrap();

        std::fs::write(
            &path,
            "fallback:\n  risk_tier: critical\n  approvals_required: 3\n",
        )
        .unwrap();
        store.reload(&path).unwrap();
        let p = store.lookup("anything_new").unwrap();
        assert_eq!(p.risk_tier, RiskTier::Critical);
        assert_eq!(p.approvals_required, 3);
        assert!(!store.snapshot().unwrap().is_mapped("medication_change"));
    }

    #[test]
    fn reload_missing_file_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let store = PolicyStore::new(PolicyDocument::default()).unwrap();
        let err = store.reload(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, GuardError::Configuration(_)));
        assert!(store.snapshot().unwrap().is_mapped("medication_change"));
    }
}
