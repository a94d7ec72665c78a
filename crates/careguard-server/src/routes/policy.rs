use axum::extract::{Path, State};
use axum::Json;
use careguard_core::classifier::Assessment;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/policy — the policy document currently in force.
pub async fn get_policy(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let doc = app.orchestrator.policies().snapshot()?;
    Ok(Json(serde_json::to_value(&*doc)?))
}

/// POST /api/policy/reload — re-read `.careguard/policies.yaml`.
///
/// An invalid file leaves the current policies in force and returns 422.
pub async fn reload_policy(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let orchestrator = app.orchestrator.clone();
    let warnings = tokio::task::spawn_blocking(move || orchestrator.reload_policies())
        .await
        .map_err(AppError::join)??;
    Ok(Json(serde_json::json!({
        "reloaded": true,
        "warnings": warnings,
    })))
}

/// GET /api/policy/classify/{action_type} — tier and policy for a type.
pub async fn classify(
    State(app): State<AppState>,
    Path(action_type): Path<String>,
) -> Result<Json<Assessment>, AppError> {
    Ok(Json(app.orchestrator.classifier().assess(&action_type)?))
}
