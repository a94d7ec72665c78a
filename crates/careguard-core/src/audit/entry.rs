use super::sealer::{SealedSubject, SubjectSealer};
use crate::action::Action;
use crate::types::{DecisionRule, Disposition, RiskTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Position of an entry in the log. Strictly increasing.
pub type LogId = u64;

// ---------------------------------------------------------------------------
// ExternalCall
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    Timeout,
    Failure,
}

/// One attempt at a downstream service call made while executing an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalCall {
    pub service: String,
    pub endpoint: String,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: CallOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// AuditEntry
// ---------------------------------------------------------------------------

/// One recorded state transition. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Assigned by the recorder on append.
    #[serde(default)]
    pub log_id: LogId,
    /// Assigned by the recorder on append.
    pub timestamp: DateTime<Utc>,
    pub action_id: Uuid,
    pub agent_id: String,
    pub action_type: String,
    pub subject: SealedSubject,
    pub parameters: Value,
    pub rationale: String,
    pub rule: DecisionRule,
    pub confidence: f64,
    pub risk_tier: RiskTier,
    pub disposition: Disposition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_calls: Vec<ExternalCall>,
    #[serde(default)]
    pub human_override: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decided_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifications: Vec<String>,
}

impl AuditEntry {
    /// Start an entry for `action`. The subject is sealed and the parameters
    /// sanitized here, so nothing downstream sees them in the clear.
    pub fn for_action(
        action: &Action,
        sealer: &SubjectSealer,
        risk_tier: RiskTier,
        rule: DecisionRule,
        disposition: Disposition,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            log_id: 0,
            timestamp: Utc::now(),
            action_id: action.id,
            agent_id: action.agent_id.clone(),
            action_type: action.action_type.clone(),
            subject: sealer.seal(&action.subject_id),
            parameters: sanitize_parameters(&action.parameters),
            rationale: rationale.into(),
            rule,
            confidence: action.confidence,
            risk_tier,
            disposition,
            ticket_id: None,
            external_calls: Vec::new(),
            human_override: false,
            decided_by: Vec::new(),
            modifications: Vec::new(),
        }
    }

    pub fn with_ticket(mut self, ticket_id: Uuid) -> Self {
        self.ticket_id = Some(ticket_id);
        self
    }

    pub fn with_calls(mut self, calls: Vec<ExternalCall>) -> Self {
        self.external_calls = calls;
        self
    }

    /// Record who decided. A human override is a veto or any change to the
    /// proposed action.
    pub fn with_decision(
        mut self,
        decided_by: Vec<String>,
        vetoed: bool,
        modifications: Vec<String>,
    ) -> Self {
        self.human_override = vetoed || !modifications.is_empty();
        self.decided_by = decided_by;
        self.modifications = modifications;
        self
    }
}

// ---------------------------------------------------------------------------
// Sanitization
// ---------------------------------------------------------------------------

const SENSITIVE_KEYS: &[&str] = &[
    "api_key",
    "password",
    "token",
    "secret",
    "audio_data",
    "authorization",
];

const REDACTED: &str = "[REDACTED]";

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

/// Copy of `value` with credential-like keys redacted at any depth.
pub fn sanitize_parameters(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_sensitive(k) {
                        Value::String(REDACTED.into())
                    } else {
                        sanitize_parameters(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_parameters).collect()),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
