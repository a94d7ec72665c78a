//! Escalation engine: the pure decision function behind every disposition.
//!
//! Given an action and the policy it was classified under, the engine picks a
//! disposition, the audit entry that records it, the ticket to open (if any)
//! and the alert to raise (if any). It holds no mutable state; the router
//! applies what it returns.
//!
//! Decision order for a new action:
//!   1. confidence below threshold: review, regardless of tier
//!   2. `auto_execute: false` on a low/medium type: supervisor review
//!   3. by tier: low auto-executes, medium executes with a supervisor notice,
//!      high waits for approval, critical waits for two or more approvals

use crate::action::Action;
use crate::alert::{Alert, AlertLevel};
use crate::audit::{AuditEntry, ExternalCall, SubjectSealer};
use crate::policy::Policy;
use crate::queue::{ApprovalTicket, TicketStatus};
use crate::types::{DecisionRule, Disposition, RiskTier};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// What the router must open when a disposition is pending.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketSpec {
    pub required_approvals: u32,
    pub opened_as: Disposition,
    pub rationale: String,
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub disposition: Disposition,
    pub rule: DecisionRule,
    pub entry: AuditEntry,
    pub ticket: Option<TicketSpec>,
    pub alert: Option<Alert>,
}

/// The closing transition of a ticket.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub disposition: Disposition,
    pub status: TicketStatus,
    pub entry: AuditEntry,
    pub alert: Option<Alert>,
}

// ---------------------------------------------------------------------------
// EscalationEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EscalationEngine {
    sealer: Arc<SubjectSealer>,
}

impl EscalationEngine {
    pub fn new(sealer: Arc<SubjectSealer>) -> Self {
        Self { sealer }
    }

    fn entry(
        &self,
        action: &Action,
        tier: RiskTier,
        rule: DecisionRule,
        disposition: Disposition,
        rationale: String,
    ) -> AuditEntry {
        let rationale = match action.rationale.as_deref() {
            Some(worker) if !worker.trim().is_empty() => format!("{rationale} (agent: {worker})"),
            _ => rationale,
        };
        AuditEntry::for_action(action, &self.sealer, tier, rule, disposition, rationale)
    }

    #[allow(clippy::too_many_arguments)]
    fn pending(
        &self,
        action: &Action,
        tier: RiskTier,
        rule: DecisionRule,
        disposition: Disposition,
        required_approvals: u32,
        rationale: String,
        alert_level: Option<AlertLevel>,
    ) -> Evaluation {
        let alert = alert_level.map(|level| Alert::new(action.id, level, rationale.clone()));
        Evaluation {
            disposition,
            rule,
            entry: self.entry(action, tier, rule, disposition, rationale.clone()),
            ticket: Some(TicketSpec {
                required_approvals,
                opened_as: disposition,
                rationale,
            }),
            alert,
        }
    }

    /// Decide the disposition of a freshly submitted action.
    pub fn evaluate(&self, action: &Action, policy: &Policy) -> Evaluation {
        let tier = policy.risk_tier;
        let threshold = policy.confidence_threshold;

        if !policy.is_confident(action.confidence) {
            let rationale = format!(
                "confidence {:.2} below threshold {:.2} for {} risk",
                action.confidence, threshold, tier
            );
            return if tier.is_elevated() {
                let required = policy.approvals_required.max(tier.min_approvals()).max(1);
                let level = if required >= 2 {
                    AlertLevel::MultiPerson
                } else {
                    AlertLevel::Supervisor
                };
                self.pending(
                    action,
                    tier,
                    DecisionRule::LowConfidence,
                    Disposition::EscalatedAlert,
                    required,
                    rationale,
                    Some(level),
                )
            } else {
                self.pending(
                    action,
                    tier,
                    DecisionRule::LowConfidence,
                    Disposition::QueuedForApproval,
                    1,
                    rationale,
                    Some(AlertLevel::Supervisor),
                )
            };
        }

        match tier {
            RiskTier::Low | RiskTier::Medium if !policy.auto_execute => self.pending(
                action,
                tier,
                DecisionRule::AutoExecuteDisabled,
                Disposition::QueuedForApproval,
                1,
                format!("auto-execution disabled for '{}'", action.action_type),
                Some(AlertLevel::Supervisor),
            ),
            RiskTier::Low => Evaluation {
                disposition: Disposition::AutoExecuted,
                rule: DecisionRule::LowRiskAutoExecute,
                entry: self.entry(
                    action,
                    tier,
                    DecisionRule::LowRiskAutoExecute,
                    Disposition::AutoExecuted,
                    format!(
                        "low risk, confidence {:.2} meets threshold {:.2}",
                        action.confidence, threshold
                    ),
                ),
                ticket: None,
                alert: None,
            },
            RiskTier::Medium => {
                let rationale = format!(
                    "medium risk, confidence {:.2} meets threshold {:.2}; supervisor notified",
                    action.confidence, threshold
                );
                Evaluation {
                    disposition: Disposition::LoggedAndExecuted,
                    rule: DecisionRule::MediumRiskNotify,
                    entry: self.entry(
                        action,
                        tier,
                        DecisionRule::MediumRiskNotify,
                        Disposition::LoggedAndExecuted,
                        rationale.clone(),
                    ),
                    ticket: None,
                    alert: Some(Alert::new(action.id, AlertLevel::Supervisor, rationale)),
                }
            }
            RiskTier::High => {
                let required = policy.approvals_required.max(1);
                self.pending(
                    action,
                    tier,
                    DecisionRule::HighRiskApproval,
                    Disposition::QueuedForApproval,
                    required,
                    format!("high risk action requires {required} approval(s)"),
                    None,
                )
            }
            RiskTier::Critical => {
                let required = policy.approvals_required.max(2);
                self.pending(
                    action,
                    tier,
                    DecisionRule::CriticalMultiApproval,
                    Disposition::EscalatedAlert,
                    required,
                    format!("critical action requires {required} distinct approvals"),
                    Some(AlertLevel::MultiPerson),
                )
            }
        }
    }

    /// A dependency failed while executing: escalate instead of dropping it.
    pub fn forced_escalation(
        &self,
        action: &Action,
        policy: &Policy,
        reason: &str,
        calls: Vec<ExternalCall>,
    ) -> Evaluation {
        let tier = policy.risk_tier;
        let required = policy.approvals_required.max(tier.min_approvals()).max(1);
        let rationale = format!("execution failed, escalated for review: {reason}");
        let mut eval = self.pending(
            action,
            tier,
            DecisionRule::DependencyFailure,
            Disposition::EscalatedAlert,
            required,
            rationale,
            Some(AlertLevel::Fallback),
        );
        eval.entry = eval.entry.with_calls(calls);
        eval
    }

    /// Entry for a submission refused by the authorizer.
    pub fn unauthorized(&self, action: &Action, policy: &Policy, reason: &str) -> AuditEntry {
        self.entry(
            action,
            policy.risk_tier,
            DecisionRule::RbacDenied,
            Disposition::Unauthorized,
            reason.to_string(),
        )
    }

    /// Close a ticket after a vote, if the vote decided it. A veto wins over
    /// any number of approvals.
    pub fn settle(&self, ticket: &ApprovalTicket) -> Option<Settlement> {
        if let Some(denial) = &ticket.denial {
            let rationale = match &denial.reason {
                Some(reason) => format!("denied by {}: {reason}", denial.approver_id),
                None => format!("denied by {}", denial.approver_id),
            };
            let entry = self
                .entry(
                    &ticket.action,
                    ticket.risk_tier,
                    DecisionRule::ReviewerVeto,
                    Disposition::Rejected,
                    rationale,
                )
                .with_ticket(ticket.id)
                .with_decision(
                    vec![denial.approver_id.clone()],
                    true,
                    ticket.modifications.clone(),
                );
            return Some(Settlement {
                disposition: Disposition::Rejected,
                status: TicketStatus::ResolvedDenied,
                entry,
                alert: None,
            });
        }

        if ticket.quorum_reached() {
            let approvers = ticket.approvers();
            let entry = self
                .entry(
                    &ticket.action,
                    ticket.risk_tier,
                    DecisionRule::ApprovalQuorum,
                    Disposition::LoggedAndExecuted,
                    format!(
                        "approved by {} of {} required: {}",
                        approvers.len(),
                        ticket.required_approvals,
                        approvers.join(", ")
                    ),
                )
                .with_ticket(ticket.id)
                .with_decision(approvers, false, ticket.modifications.clone());
            return Some(Settlement {
                disposition: Disposition::LoggedAndExecuted,
                status: TicketStatus::ResolvedApproved,
                entry,
                alert: None,
            });
        }
        None
    }

    /// Time out an open ticket.
    pub fn expire(&self, ticket: &ApprovalTicket) -> Settlement {
        let rationale = format!(
            "no decision within {}s ({} of {} approvals)",
            ticket.policy.timeout_seconds,
            ticket.approvals.len(),
            ticket.required_approvals
        );
        let entry = self
            .entry(
                &ticket.action,
                ticket.risk_tier,
                DecisionRule::ApprovalExpired,
                Disposition::TimedOut,
                rationale.clone(),
            )
            .with_ticket(ticket.id);
        Settlement {
            disposition: Disposition::TimedOut,
            status: TicketStatus::Expired,
            entry,
            alert: Some(
                Alert::new(ticket.action.id, AlertLevel::Fallback, rationale).for_ticket(ticket.id),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
