use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("not initialized: run 'careguard init'")]
    NotInitialized,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unauthorized: role '{role}' may not {operation} '{action_type}'")]
    Unauthorized {
        role: String,
        action_type: String,
        operation: String,
    },

    #[error("approver '{approver}' already approved ticket {ticket}")]
    DuplicateApprover { ticket: String, approver: String },

    #[error("service unavailable: {service} failed after {attempts} attempt(s): {reason}")]
    ServiceUnavailable {
        service: String,
        attempts: u32,
        reason: String,
    },

    #[error("ticket {0} expired before it was resolved")]
    TimeoutExpired(String),

    #[error("audit write failed: {0}")]
    AuditWriteFailure(String),

    #[error("ticket not found: {0}")]
    TicketNotFound(String),

    #[error("ticket {ticket} is already {status}")]
    TicketClosed { ticket: String, status: String },

    #[error("action not found: {0}")]
    ActionNotFound(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("invalid risk tier '{0}': must be low, medium, high, or critical")]
    InvalidRiskTier(String),

    #[error("invalid decision '{0}': must be approve or deny")]
    InvalidDecision(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GuardError>;
