use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use careguard_core::queue::ApprovalTicket;
use careguard_core::router::{Resolution, ResolveRequest};
use serde::Deserialize;
use uuid::Uuid;

use crate::access::{recorded, Requester};
use crate::error::AppError;
use crate::routes::on_blocking_pool;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ListQuery {
    pub role: Option<String>,
}

/// GET /api/tickets — open tickets, oldest first. With `?role=` only those
/// the role may vote on. Tickets carry patient ids, so the read is recorded.
pub async fn list_tickets(
    State(app): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<ApprovalTicket>>, AppError> {
    let who = Requester::from_headers(&headers);
    let orchestrator = app.orchestrator.clone();
    let tickets = tokio::task::spawn_blocking(move || {
        let result = match q.role.as_deref() {
            Some(role) => orchestrator.list_pending(role),
            None => orchestrator.open_tickets(),
        };
        recorded(&orchestrator, who.reading("approval_queue"), result)
    })
    .await
    .map_err(AppError::join)??;
    Ok(Json(tickets))
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

/// GET /api/tickets/{id} — one ticket, open or closed. The read is recorded
/// against the ticket's patient.
pub async fn get_ticket(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ApprovalTicket>, AppError> {
    let who = Requester::from_headers(&headers);
    let orchestrator = app.orchestrator.clone();
    let ticket = tokio::task::spawn_blocking(move || {
        let result = orchestrator.ticket(id);
        let mut record = who.reading("approval_ticket");
        if let Ok(t) = &result {
            record = record.for_subject(orchestrator.sealer().seal(&t.action.subject_id));
        }
        recorded(&orchestrator, record, result)
    })
    .await
    .map_err(AppError::join)??;
    Ok(Json(ticket))
}

// ---------------------------------------------------------------------------
// Resolve
// ---------------------------------------------------------------------------

/// POST /api/tickets/{id}/resolve — record an approve or deny vote. The vote
/// is recorded as a write by the approver, refused votes included.
pub async fn resolve_ticket(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<Resolution>, AppError> {
    if body.approver_id.trim().is_empty() {
        return Err(AppError::bad_request("approver_id must not be empty"));
    }
    let voter = Requester {
        user_id: body.approver_id.trim().to_string(),
        role: body.role.clone(),
    };
    let orchestrator = app.orchestrator.clone();
    let resolution = on_blocking_pool(move || async move {
        let result = orchestrator.resolve(id, body).await;
        let mut record = voter.writing("approval_ticket");
        if let Ok(r) = &result {
            record = record.for_subject(orchestrator.sealer().seal(&r.ticket.action.subject_id));
        }
        recorded(&orchestrator, record, result)
    })
    .await?;
    Ok(Json(resolution))
}
