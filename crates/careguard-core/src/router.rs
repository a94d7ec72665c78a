//! The orchestrator: single entry point for domain workers and reviewers.
//!
//! Every proposed action flows through `submit`:
//!
//! ```text
//! dedupe ─▶ authorize ─▶ assess ─▶ evaluate ─▶ audit ─▶ ticket + alert
//!                                                  └──▶ notify ─▶ execute
//! ```
//!
//! The audit entry for a transition is always written before the transition
//! takes effect. If the write fails, nothing happens and the caller gets
//! `AuditWriteFailure`. Execution failures are escalated to a fresh ticket,
//! never swallowed.

use crate::action::Action;
use crate::alert::{AlertSink, TracingAlertSink};
use crate::audit::{
    AccessRecord, AuditReader, AuditRecorder, AuditStore, ExternalCall, MemoryAuditStore,
    RedbAuditStore, SubjectSealer,
};
use crate::classifier::RiskClassifier;
use crate::config::{Config, ConfigWarning};
use crate::engine::{EscalationEngine, Evaluation, Settlement};
use crate::error::{GuardError, Result};
use crate::paths;
use crate::policy::{Policy, PolicyStore};
use crate::queue::{ApprovalQueue, ApprovalTicket, TicketDb, Vote};
use crate::rbac::{Authorizer, RoleMatrix};
use crate::services::{ActionExecutor, CallPolicy, ExecutionContext, ExecutorRegistry};
use crate::types::{Decision, Disposition, RiskTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

const DEFAULT_EVENT_BUFFER: usize = 256;

// ---------------------------------------------------------------------------
// Public records
// ---------------------------------------------------------------------------

/// Current governance state of one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStatus {
    pub action_id: Uuid,
    pub action_type: String,
    pub agent_id: String,
    pub risk_tier: RiskTier,
    pub disposition: Disposition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<Uuid>,
    pub rationale: String,
    /// `true` once a registered executor carried out the effect.
    #[serde(default)]
    pub executed: bool,
    pub updated_at: DateTime<Utc>,
}

/// Answer to a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub action_id: Uuid,
    pub disposition: Disposition,
    pub risk_tier: RiskTier,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<Uuid>,
    /// `true` when the action id had already been submitted.
    #[serde(default)]
    pub duplicate: bool,
    #[serde(default)]
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_calls: Vec<ExternalCall>,
}

impl Submission {
    fn from_status(status: &ActionStatus, duplicate: bool) -> Self {
        Self {
            action_id: status.action_id,
            disposition: status.disposition,
            risk_tier: status.risk_tier,
            rationale: status.rationale.clone(),
            ticket_id: status.ticket_id,
            duplicate,
            executed: status.executed,
            output: None,
            external_calls: Vec::new(),
        }
    }
}

/// A reviewer's request to vote on a ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub approver_id: String,
    pub role: String,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifications: Vec<String>,
}

/// Outcome of a vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub ticket: ApprovalTicket,
    /// The action's disposition after the vote. Still pending when the vote
    /// did not reach a decision.
    pub disposition: Disposition,
    #[serde(default)]
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Ticket opened because execution failed after approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_ticket: Option<Uuid>,
}

/// Broadcast whenever a ticket closes or an executed action is escalated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionEvent {
    pub action_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<Uuid>,
    pub disposition: Disposition,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decided_by: Vec<String>,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Idempotency ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LedgerSlot {
    /// Serializes submissions of the same action id.
    gate: tokio::sync::Mutex<()>,
    status: Mutex<Option<ActionStatus>>,
}

impl LedgerSlot {
    fn get(&self) -> Option<ActionStatus> {
        self.status.lock().ok().and_then(|s| s.clone())
    }

    fn set(&self, status: ActionStatus) {
        if let Ok(mut s) = self.status.lock() {
            *s = Some(status);
        }
    }
}

/// Effect of running the action after an executable disposition.
enum Effect {
    Performed {
        output: serde_json::Value,
        calls: Vec<ExternalCall>,
    },
    Delegated,
    Failed {
        reason: String,
        calls: Vec<ExternalCall>,
    },
}

enum VoteOutcome {
    Recorded(ApprovalTicket),
    Settled(Settlement, ApprovalTicket),
    Expired(Settlement),
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct OrchestratorBuilder {
    policies: Arc<PolicyStore>,
    sealer: Arc<SubjectSealer>,
    audit_store: Option<Arc<dyn AuditStore>>,
    audit_page_size: Option<usize>,
    queue: Option<ApprovalQueue>,
    authorizer: Arc<dyn Authorizer>,
    alerts: Arc<dyn AlertSink>,
    executors: ExecutorRegistry,
    event_buffer: usize,
    policy_path: Option<PathBuf>,
}

impl OrchestratorBuilder {
    pub fn audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(store);
        self
    }

    pub fn audit_page_size(mut self, page_size: usize) -> Self {
        self.audit_page_size = Some(page_size);
        self
    }

    pub fn queue(mut self, queue: ApprovalQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn executor(mut self, agent_id: impl Into<String>, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executors.register(agent_id, executor);
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// File that `reload_policies` re-reads.
    pub fn policy_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.policy_path = Some(path.into());
        self
    }

    /// Open the recorder and rebuild the idempotency ledger from the log.
    pub fn build(self) -> Result<Orchestrator> {
        let store = self
            .audit_store
            .unwrap_or_else(|| Arc::new(MemoryAuditStore::new()));
        let mut recorder = AuditRecorder::open(store, Arc::clone(&self.sealer))?;
        if let Some(page_size) = self.audit_page_size {
            recorder = recorder.with_page_size(page_size);
        }
        let (events, _) = broadcast::channel(self.event_buffer);
        let (shutdown, _) = watch::channel(false);
        let orchestrator = Orchestrator {
            classifier: RiskClassifier::new(self.policies),
            engine: EscalationEngine::new(self.sealer),
            queue: self.queue.unwrap_or_default(),
            recorder,
            authorizer: self.authorizer,
            alerts: self.alerts,
            executors: self.executors,
            ledger: Mutex::new(HashMap::new()),
            events,
            shutdown,
            policy_path: self.policy_path,
        };
        orchestrator.recover()?;
        Ok(orchestrator)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    classifier: RiskClassifier,
    engine: EscalationEngine,
    queue: ApprovalQueue,
    recorder: AuditRecorder,
    authorizer: Arc<dyn Authorizer>,
    alerts: Arc<dyn AlertSink>,
    executors: ExecutorRegistry,
    ledger: Mutex<HashMap<Uuid, Arc<LedgerSlot>>>,
    events: broadcast::Sender<ResolutionEvent>,
    shutdown: watch::Sender<bool>,
    policy_path: Option<PathBuf>,
}

impl Orchestrator {
    pub fn builder(policies: Arc<PolicyStore>, sealer: Arc<SubjectSealer>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            policies,
            sealer,
            audit_store: None,
            audit_page_size: None,
            queue: None,
            authorizer: Arc::new(RoleMatrix::default()),
            alerts: Arc::new(TracingAlertSink),
            executors: ExecutorRegistry::new(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            policy_path: None,
        }
    }

    /// Builder wired to the project under `root`: policies, subject key,
    /// redb audit log and ticket store from `.careguard/`, roles from config.
    pub fn builder_at(root: &Path) -> Result<OrchestratorBuilder> {
        let config = Config::load(root)?;
        let policy_path = paths::policy_path(root);
        let policies = Arc::new(PolicyStore::load(&policy_path)?);
        let sealer = Arc::new(SubjectSealer::load(root)?);
        let audit: Arc<dyn AuditStore> =
            Arc::new(RedbAuditStore::open(&paths::audit_db_path(root))?);
        let queue = ApprovalQueue::with_db(TicketDb::open(&paths::tickets_db_path(root))?)?;
        Ok(Self::builder(policies, sealer)
            .audit_store(audit)
            .audit_page_size(config.governance.audit_page_size)
            .queue(queue)
            .authorizer(Arc::new(config.roles))
            .event_buffer(config.governance.event_buffer)
            .policy_path(policy_path))
    }

    pub fn open(root: &Path) -> Result<Self> {
        Self::builder_at(root)?.build()
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn policies(&self) -> &Arc<PolicyStore> {
        self.classifier.store()
    }

    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    pub fn audit(&self) -> &dyn AuditReader {
        &self.recorder
    }

    pub fn sealer(&self) -> &Arc<SubjectSealer> {
        self.recorder.sealer()
    }

    /// Record who touched patient data. Callers must not release the data
    /// when this fails.
    pub fn record_access(&self, record: AccessRecord) -> Result<()> {
        self.recorder.record_access(record)
    }

    pub fn ticket(&self, ticket_id: Uuid) -> Result<ApprovalTicket> {
        self.queue.get(ticket_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResolutionEvent> {
        self.events.subscribe()
    }

    pub fn reload_policies(&self) -> Result<Vec<ConfigWarning>> {
        match &self.policy_path {
            Some(path) => self.policies().reload(path),
            None => Err(GuardError::Configuration(
                "no policy file configured for reload".into(),
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Ledger
    // -----------------------------------------------------------------------

    fn slot(&self, action_id: Uuid) -> Result<Arc<LedgerSlot>> {
        let mut ledger = self
            .ledger
            .lock()
            .map_err(|_| GuardError::Storage("action ledger poisoned".into()))?;
        let slot = Arc::clone(ledger.entry(action_id).or_default());
        Ok(slot)
    }

    fn existing_slot(&self, action_id: Uuid) -> Option<Arc<LedgerSlot>> {
        self.ledger
            .lock()
            .ok()
            .and_then(|l| l.get(&action_id).cloned())
    }

    fn update_status(&self, action_id: Uuid, f: impl FnOnce(&mut ActionStatus)) {
        if let Some(slot) = self.existing_slot(action_id) {
            if let Ok(mut guard) = slot.status.lock() {
                if let Some(status) = guard.as_mut() {
                    f(status);
                    status.updated_at = Utc::now();
                }
            }
        }
    }

    pub fn status(&self, action_id: Uuid) -> Result<ActionStatus> {
        self.existing_slot(action_id)
            .and_then(|slot| slot.get())
            .ok_or_else(|| GuardError::ActionNotFound(action_id.to_string()))
    }

    /// Rebuild action statuses from the audit log. Returns the number of
    /// actions seen.
    pub fn recover(&self) -> Result<usize> {
        let mut latest: HashMap<Uuid, ActionStatus> = HashMap::new();
        for entry in self.recorder.query(Default::default()) {
            let entry = entry?;
            let ticket_id = entry.ticket_id.or_else(|| {
                latest
                    .get(&entry.action_id)
                    .and_then(|s| s.ticket_id)
            });
            latest.insert(
                entry.action_id,
                ActionStatus {
                    action_id: entry.action_id,
                    action_type: entry.action_type,
                    agent_id: entry.agent_id,
                    risk_tier: entry.risk_tier,
                    disposition: entry.disposition,
                    ticket_id,
                    rationale: entry.rationale,
                    executed: false,
                    updated_at: entry.timestamp,
                },
            );
        }
        let count = latest.len();
        let mut ledger = self
            .ledger
            .lock()
            .map_err(|_| GuardError::Storage("action ledger poisoned".into()))?;
        for (id, status) in latest {
            let slot = ledger.entry(id).or_default();
            slot.set(status);
        }
        if count > 0 {
            tracing::info!(actions = count, "action ledger recovered from audit log");
        }
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Govern a proposed action. Resubmitting an id returns the action's
    /// current disposition with `duplicate = true` and has no other effect.
    pub async fn submit(&self, action: Action) -> Result<Submission> {
        action.validate()?;
        let slot = self.slot(action.id)?;
        let _gate = slot.gate.lock().await;
        if let Some(status) = slot.get() {
            tracing::info!(action_id = %action.id, disposition = %status.disposition, "duplicate submission");
            return Ok(Submission::from_status(&status, true));
        }

        if !self.authorizer.authorize(&action.role_id, &action.action_type) {
            return self.refuse(&slot, &action);
        }

        let assessment = self.classifier.assess(&action.action_type)?;
        let policy = assessment.policy;
        let eval = self.engine.evaluate(&action, &policy);
        tracing::info!(
            action_id = %action.id,
            action_type = %action.action_type,
            agent_id = %action.agent_id,
            tier = %policy.risk_tier,
            confidence = action.confidence,
            disposition = %eval.disposition,
            rule = %eval.rule,
            "action evaluated"
        );

        if eval.ticket.is_some() {
            let (_, status) = self.open_ticket(&slot, &action, &policy, eval)?;
            return Ok(Submission::from_status(&status, false));
        }

        let disposition = eval.disposition;
        let rationale = eval.entry.rationale.clone();
        self.recorder.append(eval.entry)?;
        let mut status = ActionStatus {
            action_id: action.id,
            action_type: action.action_type.clone(),
            agent_id: action.agent_id.clone(),
            risk_tier: policy.risk_tier,
            disposition,
            ticket_id: None,
            rationale,
            executed: false,
            updated_at: Utc::now(),
        };
        slot.set(status.clone());
        if let Some(alert) = eval.alert {
            self.alerts.raise(&alert);
        }

        match self.perform(&action, &policy).await {
            Effect::Performed { output, calls } => {
                status.executed = true;
                slot.set(status.clone());
                let mut submission = Submission::from_status(&status, false);
                submission.output = Some(output);
                submission.external_calls = calls;
                Ok(submission)
            }
            Effect::Delegated => Ok(Submission::from_status(&status, false)),
            Effect::Failed { reason, calls } => {
                let (_, status) =
                    self.escalate_failure(&slot, &action, &policy, &reason, calls.clone())?;
                let mut submission = Submission::from_status(&status, false);
                submission.external_calls = calls;
                Ok(submission)
            }
        }
    }

    fn refuse(&self, slot: &LedgerSlot, action: &Action) -> Result<Submission> {
        let policy = self.classifier.store().lookup(&action.action_type)?;
        let reason = format!(
            "role '{}' may not submit '{}'",
            action.role_id, action.action_type
        );
        let entry = self.engine.unauthorized(action, &policy, &reason);
        self.recorder.append(entry)?;
        tracing::warn!(
            action_id = %action.id,
            role = %action.role_id,
            action_type = %action.action_type,
            "submission refused"
        );
        let status = ActionStatus {
            action_id: action.id,
            action_type: action.action_type.clone(),
            agent_id: action.agent_id.clone(),
            risk_tier: policy.risk_tier,
            disposition: Disposition::Unauthorized,
            ticket_id: None,
            rationale: reason,
            executed: false,
            updated_at: Utc::now(),
        };
        slot.set(status.clone());
        Ok(Submission::from_status(&status, false))
    }

    fn status_for(&self, action: &Action, policy: &Policy, ticket: &ApprovalTicket) -> ActionStatus {
        ActionStatus {
            action_id: action.id,
            action_type: action.action_type.clone(),
            agent_id: action.agent_id.clone(),
            risk_tier: policy.risk_tier,
            disposition: ticket.opened_as,
            ticket_id: Some(ticket.id),
            rationale: ticket.rationale.clone(),
            executed: false,
            updated_at: Utc::now(),
        }
    }

    /// Record a pending evaluation, then open its ticket and raise its alert.
    /// The action's pending status lands in `slot` before the ticket becomes
    /// votable, so a fast reviewer's settlement is never overwritten.
    fn open_ticket(
        &self,
        slot: &LedgerSlot,
        action: &Action,
        policy: &Policy,
        eval: Evaluation,
    ) -> Result<(ApprovalTicket, ActionStatus)> {
        let Some(spec) = eval.ticket else {
            return Err(GuardError::InvalidAction(format!(
                "{} is not a pending disposition",
                eval.disposition
            )));
        };
        let ticket = ApprovalTicket::open(
            action.clone(),
            policy.clone(),
            spec.required_approvals,
            spec.opened_as,
            spec.rationale,
            Utc::now(),
        )?;
        self.recorder.append(eval.entry.with_ticket(ticket.id))?;
        let status = self.status_for(action, policy, &ticket);
        slot.set(status.clone());
        self.queue.admit(ticket.clone())?;
        if let Some(alert) = eval.alert {
            self.alerts.raise(&alert.for_ticket(ticket.id));
        }
        Ok((ticket, status))
    }

    fn escalate_failure(
        &self,
        slot: &LedgerSlot,
        action: &Action,
        policy: &Policy,
        reason: &str,
        calls: Vec<ExternalCall>,
    ) -> Result<(ApprovalTicket, ActionStatus)> {
        tracing::warn!(action_id = %action.id, reason, "execution failed, escalating");
        let eval = self.engine.forced_escalation(action, policy, reason, calls);
        let (ticket, status) = self.open_ticket(slot, action, policy, eval)?;
        self.publish(ResolutionEvent {
            action_id: action.id,
            ticket_id: Some(ticket.id),
            disposition: ticket.opened_as,
            decided_by: Vec::new(),
            at: Utc::now(),
        });
        Ok((ticket, status))
    }

    async fn perform(&self, action: &Action, policy: &Policy) -> Effect {
        let Some(executor) = self.executors.get(&action.agent_id) else {
            return Effect::Delegated;
        };
        let ctx = ExecutionContext::new(CallPolicy::from_policy(policy));
        match executor.execute(action, &ctx).await {
            Ok(output) => {
                tracing::info!(action_id = %action.id, calls = ctx.calls().len(), "action executed");
                Effect::Performed {
                    output,
                    calls: ctx.calls(),
                }
            }
            Err(e) => Effect::Failed {
                reason: e.to_string(),
                calls: ctx.calls(),
            },
        }
    }

    fn publish(&self, event: ResolutionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    // -----------------------------------------------------------------------
    // Review
    // -----------------------------------------------------------------------

    /// Every open ticket, oldest first.
    pub fn open_tickets(&self) -> Result<Vec<ApprovalTicket>> {
        self.queue.list_open()
    }

    /// Open tickets that `role` may vote on, oldest first.
    pub fn list_pending(&self, role: &str) -> Result<Vec<ApprovalTicket>> {
        Ok(self
            .queue
            .list_open()?
            .into_iter()
            .filter(|t| self.authorizer.can_approve(role, &t.action.action_type))
            .collect())
    }

    /// Apply a reviewer's vote. The vote, the settlement and its audit entry
    /// happen under the ticket's lock; an approved action executes after.
    pub async fn resolve(&self, ticket_id: Uuid, request: ResolveRequest) -> Result<Resolution> {
        let ticket = self.queue.get(ticket_id)?;
        if !self
            .authorizer
            .can_approve(&request.role, &ticket.action.action_type)
        {
            tracing::warn!(
                ticket_id = %ticket_id,
                approver = %request.approver_id,
                role = %request.role,
                "vote refused"
            );
            return Err(GuardError::Unauthorized {
                role: request.role,
                action_type: ticket.action.action_type,
                operation: "approve".into(),
            });
        }

        let now = Utc::now();
        let vote = Vote {
            approver_id: request.approver_id.clone(),
            role: request.role,
            decision: request.decision,
            reason: request.reason,
            modifications: request.modifications,
        };
        let outcome = self.queue.transact(ticket_id, |t| {
            if t.is_open() && t.is_expired(now) {
                t.close(crate::queue::TicketStatus::Expired, now);
                let settlement = self.engine.expire(t);
                self.recorder.append(settlement.entry.clone())?;
                return Ok(VoteOutcome::Expired(settlement));
            }
            t.record_vote(vote, now)?;
            match self.engine.settle(t) {
                Some(settlement) => {
                    self.recorder.append(settlement.entry.clone())?;
                    t.close(settlement.status, now);
                    Ok(VoteOutcome::Settled(settlement, t.clone()))
                }
                None => Ok(VoteOutcome::Recorded(t.clone())),
            }
        })?;

        match outcome {
            VoteOutcome::Expired(settlement) => {
                self.after_expiry(&settlement);
                Err(GuardError::TimeoutExpired(ticket_id.to_string()))
            }
            VoteOutcome::Recorded(ticket) => {
                tracing::info!(
                    ticket_id = %ticket_id,
                    approver = %request.approver_id,
                    approvals = ticket.approvals.len(),
                    required = ticket.required_approvals,
                    "vote recorded"
                );
                Ok(Resolution {
                    disposition: ticket.opened_as,
                    ticket,
                    executed: false,
                    output: None,
                    escalation_ticket: None,
                })
            }
            VoteOutcome::Settled(settlement, ticket) => {
                tracing::info!(
                    ticket_id = %ticket_id,
                    action_id = %ticket.action.id,
                    disposition = %settlement.disposition,
                    "ticket settled"
                );
                self.update_status(ticket.action.id, |s| {
                    s.disposition = settlement.disposition;
                    s.rationale = settlement.entry.rationale.clone();
                });
                self.publish(ResolutionEvent {
                    action_id: ticket.action.id,
                    ticket_id: Some(ticket.id),
                    disposition: settlement.disposition,
                    decided_by: settlement.entry.decided_by.clone(),
                    at: now,
                });

                let mut resolution = Resolution {
                    disposition: settlement.disposition,
                    ticket,
                    executed: false,
                    output: None,
                    escalation_ticket: None,
                };
                if settlement.disposition.executes() {
                    let action = &resolution.ticket.action;
                    let policy = &resolution.ticket.policy;
                    match self.perform(action, policy).await {
                        Effect::Performed { output, .. } => {
                            resolution.executed = true;
                            resolution.output = Some(output);
                            self.update_status(action.id, |s| s.executed = true);
                        }
                        Effect::Delegated => {}
                        Effect::Failed { reason, calls } => {
                            let slot = self.slot(action.id)?;
                            let (escalation, _) =
                                self.escalate_failure(&slot, action, policy, &reason, calls)?;
                            resolution.disposition = escalation.opened_as;
                            resolution.escalation_ticket = Some(escalation.id);
                        }
                    }
                }
                Ok(resolution)
            }
        }
    }

    fn after_expiry(&self, settlement: &Settlement) {
        let action_id = settlement.entry.action_id;
        if let Some(alert) = &settlement.alert {
            self.alerts.raise(alert);
        }
        self.update_status(action_id, |s| {
            s.disposition = settlement.disposition;
            s.rationale = settlement.entry.rationale.clone();
        });
        self.publish(ResolutionEvent {
            action_id,
            ticket_id: settlement.entry.ticket_id,
            disposition: settlement.disposition,
            decided_by: Vec::new(),
            at: Utc::now(),
        });
    }

    // -----------------------------------------------------------------------
    // Expiry
    // -----------------------------------------------------------------------

    /// Time out every open ticket past its deadline at `now`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<ApprovalTicket> {
        let unsynced = self.queue.sync();
        if unsynced > 0 {
            tracing::warn!(tickets = unsynced, "ticket store still behind");
        }
        let mut settlements: HashMap<Uuid, Settlement> = HashMap::new();
        let expired = self.queue.expire_older_than(now, |t| {
            let settlement = self.engine.expire(t);
            self.recorder.append(settlement.entry.clone())?;
            settlements.insert(t.id, settlement);
            Ok(())
        });
        for ticket in &expired {
            if let Some(settlement) = settlements.get(&ticket.id) {
                self.after_expiry(settlement);
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired stale approval tickets");
        }
        expired
    }

    /// Run `sweep_expired` every `interval` until `shutdown` is called.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        let mut stop = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            while !*stop.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sweeper = Arc::clone(&this);
                        let swept = tokio::task::spawn_blocking(move || {
                            sweeper.sweep_expired(Utc::now()).len()
                        })
                        .await;
                        if let Err(e) = swept {
                            tracing::error!(error = %e, "expiry sweep panicked");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("expiry sweeper stopped");
        })
    }

    /// Stop the sweeper and close the audit recorder. Later submissions fail
    /// with `AuditWriteFailure`.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.recorder.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
