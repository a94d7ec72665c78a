use axum::http::StatusCode;
use careguard_core::audit::SubjectSealer;
use careguard_core::policy::PolicyDocument;
use careguard_core::{config::Config, paths};
use careguard_server::access::{ROLE_HEADER, USER_HEADER};
use careguard_server::state::AppState;
use http_body_util::BodyExt;
use serde_json::json;
use tempfile::TempDir;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Bootstrap a minimal careguard project inside the given temp directory.
fn init_project(dir: &TempDir) {
    let root = dir.path();
    std::fs::create_dir_all(paths::careguard_dir(root)).unwrap();
    Config::new("test-site").save(root).unwrap();
    PolicyDocument::default()
        .save(&paths::policy_path(root))
        .unwrap();
    SubjectSealer::create_key(root).unwrap();
}

fn app(dir: &TempDir) -> axum::Router {
    init_project(dir);
    let state = AppState::open(dir.path().to_path_buf()).unwrap();
    careguard_server::build_router(state)
}

/// Send a GET request via `oneshot` and return (status, parsed JSON body).
async fn get(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// GET as an identified caller.
async fn get_as(
    app: &axum::Router,
    uri: &str,
    user: &str,
    role: &str,
) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .uri(uri)
        .header(USER_HEADER, user)
        .header(ROLE_HEADER, role)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Send a POST request with a JSON body via `oneshot` and return (status, parsed JSON body).
async fn post_json(
    app: &axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn action(action_type: &str, confidence: f64) -> serde_json::Value {
    json!({
        "action_type": action_type,
        "agent_id": "care-agent",
        "role_id": "domain_agent",
        "subject_id": "MRN-77120",
        "confidence": confidence,
        "parameters": { "dose_mg": 20, "api_key": "sk-live-123" },
    })
}

fn vote(approver: &str, role: &str, decision: &str) -> serde_json::Value {
    json!({ "approver_id": approver, "role": role, "decision": decision })
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn low_risk_action_auto_executes() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let (status, body) = post_json(&app, "/api/actions", action("appointment_reminder", 0.9)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disposition"], "auto_executed");
    assert_eq!(body["risk_tier"], "low");
    assert_eq!(body["duplicate"], false);

    let id = body["action_id"].as_str().unwrap();
    let (status, body) = get(&app, &format!("/api/actions/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disposition"], "auto_executed");
}

#[tokio::test]
async fn resubmission_reports_duplicate() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let mut body = action("care_plan_update", 0.95);
    body["id"] = json!("6d1f6a0e-2a5b-4d39-9a55-0c7c1f2e8b11");
    let (_, first) = post_json(&app, "/api/actions", body.clone()).await;
    let (status, second) = post_json(&app, "/api/actions", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["disposition"], second["disposition"]);
    assert_eq!(second["duplicate"], true);
}

#[tokio::test]
async fn invalid_confidence_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let (status, body) = post_json(&app, "/api/actions", action("send_reminder", 1.5)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("confidence"));
}

#[tokio::test]
async fn unknown_action_is_404() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let (status, body) = get(&app, "/api/actions/0b7c3f0e-9f3e-4d7c-8e1a-5a9d2b6c4e10").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn action_audit_redacts_secrets_and_subject() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let (_, body) = post_json(&app, "/api/actions", action("care_plan_update", 0.5)).await;
    let id = body["action_id"].as_str().unwrap();

    let (status, entries) = get(&app, &format!("/api/actions/{id}/audit")).await;
    assert_eq!(status, StatusCode::OK);
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["parameters"]["api_key"], "[REDACTED]");
    assert_eq!(entries[0]["parameters"]["dose_mg"], 20);
    assert!(!entries[0].to_string().contains("MRN-77120"));
}

// ---------------------------------------------------------------------------
// Tickets
// ---------------------------------------------------------------------------

#[tokio::test]
async fn high_risk_action_waits_for_approval() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let (_, body) = post_json(&app, "/api/actions", action("medication_change", 0.9)).await;
    assert_eq!(body["disposition"], "queued_for_approval");
    let ticket = body["ticket_id"].as_str().unwrap().to_string();

    let (status, list) = get(&app, "/api/tickets?role=clinical_director").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
    let (_, list) = get(&app, "/api/tickets?role=care_coordinator").await;
    assert!(list.as_array().unwrap().is_empty());

    let uri = format!("/api/tickets/{ticket}/resolve");
    let (status, res) = post_json(&app, &uri, vote("dr-lee", "clinical_director", "approve")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(res["disposition"], "logged_and_executed");
    assert_eq!(res["ticket"]["status"], "resolved_approved");

    let (status, _) = post_json(&app, &uri, vote("dr-kim", "clinical_director", "approve")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, t) = get(&app, &format!("/api/tickets/{ticket}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t["status"], "resolved_approved");
}

#[tokio::test]
async fn critical_action_needs_distinct_approvers() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let (_, body) = post_json(&app, "/api/actions", action("biomarker_alert", 0.95)).await;
    assert_eq!(body["disposition"], "escalated_alert");
    let uri = format!("/api/tickets/{}/resolve", body["ticket_id"].as_str().unwrap());

    let (status, res) = post_json(&app, &uri, vote("dr-a", "clinical_director", "approve")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(res["disposition"], "escalated_alert");
    let (status, _) = post_json(&app, &uri, vote("dr-a", "clinical_director", "approve")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, res) = post_json(&app, &uri, vote("dr-b", "system_admin", "approve")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(res["disposition"], "logged_and_executed");
}

#[tokio::test]
async fn reviewer_without_approval_right_is_forbidden() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let (_, body) = post_json(&app, "/api/actions", action("medication_change", 0.9)).await;
    let uri = format!("/api/tickets/{}/resolve", body["ticket_id"].as_str().unwrap());
    let (status, _) = post_json(&app, &uri, vote("nurse-1", "nurse_manager", "approve")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn empty_approver_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let (_, body) = post_json(&app, "/api/actions", action("medication_change", 0.9)).await;
    let uri = format!("/api/tickets/{}/resolve", body["ticket_id"].as_str().unwrap());
    let (status, _) = post_json(&app, &uri, vote("  ", "clinical_director", "deny")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_ticket_is_404() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let (status, _) = get(&app, "/api/tickets/0b7c3f0e-9f3e-4d7c-8e1a-5a9d2b6c4e10").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn audit_query_filters_by_tier_and_patient() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    post_json(&app, "/api/actions", action("appointment_reminder", 0.9)).await;
    post_json(&app, "/api/actions", action("medication_change", 0.9)).await;

    let (status, body) = get(&app, "/api/audit?risk_tier=high").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["entries"][0]["action_type"], "medication_change");

    let (_, body) = get(&app, "/api/audit?patient_id=MRN-77120").await;
    assert_eq!(body["count"], 2);
    let (_, body) = get(&app, "/api/audit?patient_id=MRN-00000").await;
    assert_eq!(body["count"], 0);
    let (_, body) = get(&app, "/api/audit?limit=1").await;
    assert_eq!(body["count"], 1);

    let (status, _) = get(&app, "/api/audit?risk_tier=severe").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn audit_stats_count_dispositions() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    post_json(&app, "/api/actions", action("appointment_reminder", 0.9)).await;
    post_json(&app, "/api/actions", action("send_reminder", 0.95)).await;
    post_json(&app, "/api/actions", action("biomarker_alert", 0.99)).await;

    let (status, stats) = get(&app, "/api/audit/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_entries"], 3);
    assert_eq!(stats["by_disposition"]["auto_executed"], 2);
    assert_eq!(stats["by_risk_tier"]["critical"], 1);
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn classify_reports_tier_and_fallback() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let (status, body) = get(&app, "/api/policy/classify/biomarker_alert").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "critical");
    assert_eq!(body["mapped"], true);

    let (_, body) = get(&app, "/api/policy/classify/teleport_patient").await;
    assert_eq!(body["tier"], "high");
    assert_eq!(body["mapped"], false);
}

#[tokio::test]
async fn reload_applies_edited_policies() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let path = paths::policy_path(dir.path());
    let mut doc = PolicyDocument::load(&path).unwrap();
    doc.actions
        .get_mut("send_reminder")
        .unwrap()
        .confidence_threshold = 0.99;
    doc.save(&path).unwrap();

    let (status, body) = post_json(&app, "/api/policy/reload", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reloaded"], true);

    let (_, body) = get(&app, "/api/policy").await;
    assert_eq!(body["actions"]["send_reminder"]["confidence_threshold"], 0.99);
    let (_, body) = post_json(&app, "/api/actions", action("send_reminder", 0.95)).await;
    assert_eq!(body["disposition"], "queued_for_approval");
}

#[tokio::test]
async fn invalid_policy_reload_keeps_current_policies() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let path = paths::policy_path(dir.path());
    std::fs::write(
        &path,
        "actions:\n  biomarker_alert:\n    risk_tier: critical\n    approvals_required: 1\n",
    )
    .unwrap();

    let (status, body) = post_json(&app, "/api/policy/reload", json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("biomarker_alert"));

    let (_, body) = get(&app, "/api/policy/classify/biomarker_alert").await;
    assert_eq!(body["policy"]["approvals_required"], 2);
}

// ---------------------------------------------------------------------------
// Access records
// ---------------------------------------------------------------------------

#[tokio::test]
async fn audit_reads_are_recorded_against_the_patient() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    post_json(&app, "/api/actions", action("care_plan_update", 0.5)).await;

    let uri = "/api/audit?patient_id=MRN-77120";
    let (status, _) = get_as(&app, uri, "dr-lee", "clinical_director").await;
    assert_eq!(status, StatusCode::OK);

    let (status, records) = get(&app, "/api/audit/access?patient_id=MRN-77120").await;
    assert_eq!(status, StatusCode::OK);
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["user_id"], "dr-lee");
    assert_eq!(records[0]["user_role"], "clinical_director");
    assert_eq!(records[0]["resource"], "audit_trail");
    assert_eq!(records[0]["kind"], "read");
    assert_eq!(records[0]["success"], true);
    assert!(!records[0].to_string().contains("MRN-77120"));

    let (_, other) = get(&app, "/api/audit/access?patient_id=MRN-00000").await;
    assert!(other.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn ticket_reads_votes_and_failures_are_recorded() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let (_, body) = post_json(&app, "/api/actions", action("medication_change", 0.9)).await;
    let ticket = body["ticket_id"].as_str().unwrap().to_string();

    let show = format!("/api/tickets/{ticket}");
    let (status, _) = get_as(&app, &show, "nurse-kim", "nurse_manager").await;
    assert_eq!(status, StatusCode::OK);
    let missing = "/api/tickets/0b7c3f0e-9f3e-4d7c-8e1a-5a9d2b6c4e10";
    let (status, _) = get_as(&app, missing, "nurse-kim", "nurse_manager").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, records) = get(&app, "/api/audit/access?user_id=nurse-kim").await;
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["resource"], "approval_ticket");
    assert_eq!(records[0]["success"], true);
    assert!(records[0]["subject"].is_string());
    assert_eq!(records[1]["success"], false);
    assert!(records[1]["reason"].as_str().is_some());

    let uri = format!("/api/tickets/{ticket}/resolve");
    let (status, _) = post_json(&app, &uri, vote("dr-lee", "clinical_director", "approve")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post_json(&app, &uri, vote("dr-kim", "clinical_director", "approve")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, records) = get(&app, "/api/audit/access?patient_id=MRN-77120").await;
    let writes: Vec<_> = records
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["kind"] == "write")
        .collect();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0]["user_id"], "dr-lee");

    let (_, refused) = get(&app, "/api/audit/access?user_id=dr-kim").await;
    let refused = refused.as_array().unwrap();
    assert_eq!(refused.len(), 1);
    assert_eq!(refused[0]["kind"], "write");
    assert_eq!(refused[0]["success"], false);
}

#[tokio::test]
async fn anonymous_reads_are_recorded_as_unknown() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let (status, _) = get(&app, "/api/tickets").await;
    assert_eq!(status, StatusCode::OK);
    let (_, records) = get(&app, "/api/audit/access?user_id=unknown").await;
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["resource"], "approval_queue");
    assert_eq!(records[0]["user_role"], "unknown");
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_resubmissions_settle_once() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let mut body = action("care_plan_update", 0.5);
    body["id"] = json!("6f1c2a7e-3b4d-4e5f-8a9b-0c1d2e3f4a5b");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let app = app.clone();
        let body = body.clone();
        tasks.push(tokio::spawn(async move { post_json(&app, "/api/actions", body).await }));
    }
    let mut fresh = 0;
    for t in tasks {
        let (status, res) = t.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(res["disposition"], "logged_and_executed");
        if res["duplicate"] == false {
            fresh += 1;
        }
    }
    assert_eq!(fresh, 1);

    let uri = "/api/actions/6f1c2a7e-3b4d-4e5f-8a9b-0c1d2e3f4a5b/audit";
    let (_, entries) = get(&app, uri).await;
    assert_eq!(entries.as_array().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_votes_close_a_ticket_once() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);
    let (_, body) = post_json(&app, "/api/actions", action("medication_change", 0.9)).await;
    let uri = format!("/api/tickets/{}/resolve", body["ticket_id"].as_str().unwrap());

    let mut tasks = Vec::new();
    for i in 0..4 {
        let app = app.clone();
        let uri = uri.clone();
        let approver = format!("dr-{i}");
        tasks.push(tokio::spawn(async move {
            post_json(&app, &uri, vote(&approver, "clinical_director", "approve")).await
        }));
    }
    let mut ok = 0;
    for t in tasks {
        let (status, _) = t.await.unwrap();
        if status == StatusCode::OK {
            ok += 1;
        } else {
            assert_eq!(status, StatusCode::CONFLICT);
        }
    }
    assert_eq!(ok, 1);
}
