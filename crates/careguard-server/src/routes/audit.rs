use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use careguard_core::audit::{AccessFilter, AccessRecord, AuditFilter, AuditStatistics};
use careguard_core::types::RiskTier;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::access::{recorded, Requester};
use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;

#[derive(Deserialize, Default)]
pub struct AuditParams {
    pub agent_id: Option<String>,
    pub patient_id: Option<String>,
    pub risk_tier: Option<String>,
    pub action_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditParams {
    fn filter(&self) -> careguard_core::Result<AuditFilter> {
        Ok(AuditFilter {
            agent_id: self.agent_id.clone(),
            patient_id: self.patient_id.clone(),
            risk_tier: self
                .risk_tier
                .as_deref()
                .map(str::parse::<RiskTier>)
                .transpose()?,
            action_id: self.action_id,
            since: self.since,
            until: self.until,
        })
    }
}

/// GET /api/audit — entries matching every given filter, oldest first.
/// Every query is recorded as an access, against the patient when filtered
/// by one.
pub async fn query_audit(
    State(app): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<AuditParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let filter = params.filter()?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let who = Requester::from_headers(&headers);
    let orchestrator = app.orchestrator.clone();
    let entries = tokio::task::spawn_blocking(move || {
        let mut record = who.reading("audit_trail");
        if let Some(patient) = filter.patient_id.as_deref() {
            record = record.for_patient(orchestrator.sealer(), patient);
        }
        let result = orchestrator
            .audit()
            .query(filter)
            .take(limit)
            .collect::<careguard_core::Result<Vec<_>>>();
        recorded(&orchestrator, record, result)
    })
    .await
    .map_err(AppError::join)??;
    Ok(Json(serde_json::json!({
        "count": entries.len(),
        "entries": entries,
    })))
}

/// GET /api/audit/stats — aggregate counts over matching entries.
pub async fn audit_stats(
    State(app): State<AppState>,
    Query(params): Query<AuditParams>,
) -> Result<Json<AuditStatistics>, AppError> {
    let filter = params.filter()?;
    let orchestrator = app.orchestrator.clone();
    let stats = tokio::task::spawn_blocking(move || orchestrator.audit().statistics(filter))
        .await
        .map_err(AppError::join)??;
    Ok(Json(stats))
}

#[derive(Deserialize, Default)]
pub struct AccessParams {
    pub user_id: Option<String>,
    pub patient_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

/// GET /api/audit/access — who read patient data, oldest first.
pub async fn access_log(
    State(app): State<AppState>,
    Query(params): Query<AccessParams>,
) -> Result<Json<Vec<AccessRecord>>, AppError> {
    let filter = AccessFilter {
        user_id: params.user_id,
        patient_id: params.patient_id,
        since: params.since,
    };
    let orchestrator = app.orchestrator.clone();
    let records = tokio::task::spawn_blocking(move || orchestrator.audit().access_log(filter))
        .await
        .map_err(AppError::join)??;
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use careguard_core::GuardError;

    #[test]
    fn unknown_tier_is_rejected() {
        let params = AuditParams {
            risk_tier: Some("severe".into()),
            ..AuditParams::default()
        };
        assert!(matches!(
            params.filter(),
            Err(GuardError::InvalidRiskTier(_))
        ));
    }

    #[test]
    fn tier_is_case_insensitive() {
        let params = AuditParams {
            risk_tier: Some("Critical".into()),
            ..AuditParams::default()
        };
        assert_eq!(params.filter().unwrap().risk_tier, Some(RiskTier::Critical));
    }
}
