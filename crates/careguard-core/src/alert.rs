use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Alert
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Informational notice to a supervisor; nothing blocks on it.
    Supervisor,
    /// Page every approver eligible for the ticket.
    MultiPerson,
    /// Raised when the normal path failed (timeouts, dependency failures).
    Fallback,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Supervisor => "supervisor",
            AlertLevel::MultiPerson => "multi_person",
            AlertLevel::Fallback => "fallback",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub action_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<Uuid>,
    pub level: AlertLevel,
    pub reason: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(action_id: Uuid, level: AlertLevel, reason: impl Into<String>) -> Self {
        Self {
            action_id,
            ticket_id: None,
            level,
            reason: reason.into(),
            raised_at: Utc::now(),
        }
    }

    pub fn for_ticket(mut self, ticket_id: Uuid) -> Self {
        self.ticket_id = Some(ticket_id);
        self
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Destination for alerts. Delivery must not block the caller.
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: &Alert);
}

/// Default sink: a structured `warn!` event per alert.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: &Alert) {
        tracing::warn!(
            action_id = %alert.action_id,
            ticket_id = ?alert.ticket_id,
            level = %alert.level,
            reason = %alert.reason,
            "governance alert"
        );
    }
}

/// Keeps every alert in memory.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl AlertSink for MemoryAlertSink {
    fn raise(&self, alert: &Alert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert.clone());
        }
    }
}
