use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use careguard_core::action::Action;
use careguard_core::audit::{AuditEntry, AuditFilter};
use careguard_core::router::{ActionStatus, Submission};
use uuid::Uuid;

use crate::access::{recorded, Requester};
use crate::error::AppError;
use crate::routes::on_blocking_pool;
use crate::state::AppState;

/// POST /api/actions — submit a proposed action for governance.
///
/// Resubmitting an id returns the recorded disposition with
/// `duplicate: true`.
pub async fn submit_action(
    State(app): State<AppState>,
    Json(action): Json<Action>,
) -> Result<Json<Submission>, AppError> {
    let orchestrator = app.orchestrator.clone();
    let submission =
        on_blocking_pool(move || async move { orchestrator.submit(action).await }).await?;
    Ok(Json(submission))
}

/// GET /api/actions/{id} — current disposition of an action.
pub async fn get_action(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ActionStatus>, AppError> {
    Ok(Json(app.orchestrator.status(id)?))
}

/// GET /api/actions/{id}/audit — every audit entry for an action, oldest
/// first. The read is recorded against the action's patient.
pub async fn get_action_audit(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let who = Requester::from_headers(&headers);
    let orchestrator = app.orchestrator.clone();
    let entries = tokio::task::spawn_blocking(move || {
        let result = orchestrator.status(id).and_then(|_| {
            orchestrator
                .audit()
                .query(AuditFilter::for_action(id))
                .collect::<careguard_core::Result<Vec<_>>>()
        });
        let mut record = who.reading("action_history");
        if let Some(first) = result.as_ref().ok().and_then(|e| e.first()) {
            record = record.for_subject(first.subject.clone());
        }
        recorded(&orchestrator, record, result)
    })
    .await
    .map_err(AppError::join)??;
    Ok(Json(entries))
}
