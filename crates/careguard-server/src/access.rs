//! Who is asking, and the access record their request leaves behind.
//!
//! Callers identify themselves with `x-careguard-user` and
//! `x-careguard-role`. A request without them is recorded as `unknown`.

use axum::http::HeaderMap;
use careguard_core::audit::{AccessKind, AccessRecord};
use careguard_core::router::Orchestrator;

pub const USER_HEADER: &str = "x-careguard-user";
pub const ROLE_HEADER: &str = "x-careguard-role";

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct Requester {
    pub user_id: String,
    pub role: String,
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

impl Requester {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            user_id: header(headers, USER_HEADER),
            role: header(headers, ROLE_HEADER),
        }
    }

    pub fn reading(&self, resource: &str) -> AccessRecord {
        AccessRecord::new(&self.user_id, &self.role, resource, AccessKind::Read)
    }

    pub fn writing(&self, resource: &str) -> AccessRecord {
        AccessRecord::new(&self.user_id, &self.role, resource, AccessKind::Write)
    }
}

/// Record `record` with the outcome of `result`. The result is handed back
/// only once the record is stored.
pub fn recorded<T>(
    orchestrator: &Orchestrator,
    record: AccessRecord,
    result: careguard_core::Result<T>,
) -> careguard_core::Result<T> {
    let record = match &result {
        Ok(_) => record,
        Err(e) => record.failed(e.to_string()),
    };
    orchestrator.record_access(record)?;
    result
}
