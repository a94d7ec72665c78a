use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use careguard_core::GuardError;

// ---------------------------------------------------------------------------
// Internal sentinel for explicit 400 errors
// ---------------------------------------------------------------------------

/// Carries an explicit HTTP 400 for request problems that are not
/// `GuardError`s, such as a malformed query parameter.
#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

// ---------------------------------------------------------------------------
// AppError — unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }

    pub fn join(e: tokio::task::JoinError) -> Self {
        Self(anyhow::anyhow!("task join error: {e}"))
    }
}

fn status_for(e: &GuardError) -> StatusCode {
    match e {
        GuardError::TicketNotFound(_) | GuardError::ActionNotFound(_) => StatusCode::NOT_FOUND,
        GuardError::DuplicateApprover { .. } | GuardError::TicketClosed { .. } => {
            StatusCode::CONFLICT
        }
        GuardError::InvalidAction(_)
        | GuardError::InvalidRiskTier(_)
        | GuardError::InvalidDecision(_) => StatusCode::BAD_REQUEST,
        GuardError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        GuardError::TimeoutExpired(_) => StatusCode::GONE,
        GuardError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
        GuardError::ServiceUnavailable { .. }
        | GuardError::AuditWriteFailure(_)
        | GuardError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
        GuardError::Storage(_)
        | GuardError::Io(_)
        | GuardError::Yaml(_)
        | GuardError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(b) = self.0.downcast_ref::<BadRequestError>() {
            let body = serde_json::json!({ "error": b.0.clone() });
            return (StatusCode::BAD_REQUEST, axum::Json(body)).into_response();
        }

        let status = match self.0.downcast_ref::<GuardError>() {
            Some(e) => status_for(e),
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
