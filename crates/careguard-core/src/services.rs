//! Execution of approved actions and the retry contract for the external
//! services they call.
//!
//! Domain workers register an [`ActionExecutor`] per agent id. Executors make
//! downstream calls through [`ExecutionContext::call`], which bounds each
//! attempt with a timeout, retries with linear backoff, and records every
//! attempt for the audit trail. Exhausted retries surface as
//! `ServiceUnavailable`, which the router turns into a forced escalation.

use crate::action::Action;
use crate::audit::{CallOutcome, ExternalCall};
use crate::error::{GuardError, Result};
use crate::policy::Policy;
use chrono::Utc;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// CallPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    /// Bound on a single attempt.
    pub timeout: Duration,
    /// Attempts after the first.
    pub max_retries: u32,
    /// Base delay between attempts; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl CallPolicy {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            timeout: policy.service_timeout(),
            max_retries: policy.max_retries,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Per-execution handle given to executors.
#[derive(Debug)]
pub struct ExecutionContext {
    policy: CallPolicy,
    calls: Mutex<Vec<ExternalCall>>,
}

impl ExecutionContext {
    pub fn new(policy: CallPolicy) -> Self {
        Self {
            policy,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> CallPolicy {
        self.policy
    }

    fn record(&self, call: ExternalCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    /// Attempts made so far, in order.
    pub fn calls(&self) -> Vec<ExternalCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Call `op` until it succeeds or the retry budget is spent.
    pub async fn call<T, E, F, Fut>(&self, service: &str, endpoint: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let attempts = self.policy.attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let started_at = Utc::now();
            let clock = Instant::now();
            let result = tokio::time::timeout(self.policy.timeout, op()).await;
            let duration_ms = clock.elapsed().as_millis().min(u128::from(u64::MAX)) as u64;

            let (outcome, error) = match result {
                Ok(Ok(value)) => {
                    self.record(ExternalCall {
                        service: service.to_string(),
                        endpoint: endpoint.to_string(),
                        attempt,
                        started_at,
                        duration_ms,
                        outcome: CallOutcome::Success,
                        error: None,
                    });
                    return Ok(value);
                }
                Ok(Err(e)) => (CallOutcome::Failure, e.to_string()),
                Err(_) => (
                    CallOutcome::Timeout,
                    format!("timed out after {}ms", self.policy.timeout.as_millis()),
                ),
            };
            tracing::warn!(service, endpoint, attempt, attempts, error = %error, "external call failed");
            self.record(ExternalCall {
                service: service.to_string(),
                endpoint: endpoint.to_string(),
                attempt,
                started_at,
                duration_ms,
                outcome,
                error: Some(error.clone()),
            });
            last_error = error;

            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff * attempt).await;
            }
        }

        Err(GuardError::ServiceUnavailable {
            service: service.to_string(),
            attempts,
            reason: last_error,
        })
    }
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

/// Carries out the effect of an approved or auto-executed action.
pub trait ActionExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        action: &'a Action,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>>;
}

/// Executors keyed by the agent id that proposed the action. An agent with no
/// executor performs the effect itself once told the disposition.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent_id: impl Into<String>, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(agent_id.into(), executor);
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(agent_id).cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ctx(timeout_ms: u64, retries: u32) -> ExecutionContext {
        ExecutionContext::new(CallPolicy {
            timeout: Duration::from_millis(timeout_ms),
            max_retries: retries,
            backoff: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn success_records_one_call() {
        let ctx = ctx(1_000, 3);
        let v: u32 = ctx
            .call("ehr", "/patients", || async { Ok::<_, String>(7) })
            .await
            .unwrap();
        assert_eq!(v, 7);
        let calls = ctx.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].outcome, CallOutcome::Success);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let ctx = ctx(1_000, 3);
        let tries = AtomicU32::new(0);
        let v = ctx
            .call("pharmacy", "/orders", || {
                let n = tries.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("503 service unavailable")
                    } else {
                        Ok("accepted")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(v, "accepted");
        let outcomes: Vec<_> = ctx.calls().iter().map(|c| c.outcome).collect();
        assert_eq!(
            outcomes,
            vec![CallOutcome::Failure, CallOutcome::Failure, CallOutcome::Success]
        );
    }

    #[tokio::test]
    async fn exhausted_retries_are_service_unavailable() {
        let ctx = ctx(1_000, 2);
        let err = ctx
            .call("sms", "/send", || async { Err::<(), _>("connection refused") })
            .await
            .unwrap_err();
        match err {
            GuardError::ServiceUnavailable {
                service,
                attempts,
                reason,
            } => {
                assert_eq!(service, "sms");
                assert_eq!(attempts, 3);
                assert!(reason.contains("connection refused"));
            }
            other => panic!("expected ServiceUnavailable, got {other:?}"),
        }
        assert_eq!(ctx.calls().len(), 3);
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let ctx = ctx(10, 0);
        let err = ctx
            .call("nlp", "/extract", || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, String>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::ServiceUnavailable { attempts: 1, .. }));
        assert_eq!(ctx.calls()[0].outcome, CallOutcome::Timeout);
    }

    #[test]
    fn call_policy_follows_policy() {
        let p = Policy::for_tier(crate::types::RiskTier::High);
        let cp = CallPolicy::from_policy(&p);
        assert_eq!(cp.timeout, Duration::from_secs(30));
        assert_eq!(cp.attempts(), 4);
    }
}
