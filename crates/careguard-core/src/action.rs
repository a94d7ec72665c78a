use crate::error::{GuardError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SubjectId
// ---------------------------------------------------------------------------

/// Patient identifier carried by an action.
///
/// `Debug` and `Display` never print the value. The audit trail only ever
/// sees the sealed form produced by [`crate::audit::SubjectSealer`].
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The clear-text identifier. Only the sealer and executors should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubjectId(<redacted>)")
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// A unit of work proposed by a domain worker. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub action_type: String,
    pub agent_id: String,
    pub role_id: String,
    pub subject_id: SubjectId,
    #[serde(default = "empty_parameters")]
    pub parameters: serde_json::Value,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

fn empty_parameters() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Action {
    pub fn new(
        action_type: impl Into<String>,
        agent_id: impl Into<String>,
        role_id: impl Into<String>,
        subject_id: impl Into<String>,
        confidence: f64,
    ) -> Result<Self> {
        let action = Self {
            id: Uuid::new_v4(),
            action_type: action_type.into(),
            agent_id: agent_id.into(),
            role_id: role_id.into(),
            subject_id: SubjectId::new(subject_id),
            parameters: empty_parameters(),
            confidence,
            rationale: None,
        };
        action.validate()?;
        Ok(action)
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    /// Reject actions that cannot be governed: empty identifiers, or a
    /// confidence outside `[0.0, 1.0]` (NaN included).
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(GuardError::InvalidAction(format!(
                "confidence {} is outside [0.0, 1.0]",
                self.confidence
            )));
        }
        if self.action_type.trim().is_empty() {
            return Err(GuardError::InvalidAction("action_type is empty".into()));
        }
        if self.agent_id.trim().is_empty() {
            return Err(GuardError::InvalidAction("agent_id is empty".into()));
        }
        if self.role_id.trim().is_empty() {
            return Err(GuardError::InvalidAction("role_id is empty".into()));
        }
        if self.subject_id.is_empty() {
            return Err(GuardError::InvalidAction("subject_id is empty".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
