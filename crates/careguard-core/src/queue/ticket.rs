use crate::action::Action;
use crate::error::{GuardError, Result};
use crate::policy::Policy;
use crate::types::{Decision, Disposition, RiskTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TicketStatus
// ---------------------------------------------------------------------------

/// Transitions: `Open → ResolvedApproved | ResolvedDenied | Expired`.
/// Every non-open status is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    ResolvedApproved,
    ResolvedDenied,
    Expired,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::ResolvedApproved => "resolved_approved",
            TicketStatus::ResolvedDenied => "resolved_denied",
            TicketStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != TicketStatus::Open
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub approver_id: String,
    pub role: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Denial {
    pub approver_id: String,
    pub role: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A vote as submitted by a reviewer.
#[derive(Debug, Clone)]
pub struct Vote {
    pub approver_id: String,
    pub role: String,
    pub decision: Decision,
    pub reason: Option<String>,
    pub modifications: Vec<String>,
}

// ---------------------------------------------------------------------------
// ApprovalTicket
// ---------------------------------------------------------------------------

/// A pending action waiting on human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalTicket {
    pub id: Uuid,
    pub action: Action,
    /// Policy in force when the ticket was opened.
    pub policy: Policy,
    pub risk_tier: RiskTier,
    pub required_approvals: u32,
    #[serde(default)]
    pub approvals: Vec<Approval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<Denial>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifications: Vec<String>,
    /// The disposition that opened the ticket.
    pub opened_as: Disposition,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: TicketStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl ApprovalTicket {
    /// Fails with `Configuration` when the policy timeout pushes the deadline
    /// past the representable date range.
    pub fn open(
        action: Action,
        policy: Policy,
        required_approvals: u32,
        opened_as: Disposition,
        rationale: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let expires_at = policy
            .escalation_timeout()
            .and_then(|timeout| now.checked_add_signed(timeout))
            .ok_or_else(|| {
                GuardError::Configuration(format!(
                    "timeout_seconds {} overflows the ticket deadline",
                    policy.timeout_seconds
                ))
            })?;
        Ok(Self {
            id: Uuid::new_v4(),
            risk_tier: policy.risk_tier,
            action,
            policy,
            required_approvals,
            approvals: Vec::new(),
            denial: None,
            modifications: Vec::new(),
            opened_as,
            rationale: rationale.into(),
            created_at: now,
            expires_at,
            status: TicketStatus::Open,
            closed_at: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.status == TicketStatus::Open
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn has_approved(&self, approver_id: &str) -> bool {
        self.approvals.iter().any(|a| a.approver_id == approver_id)
    }

    pub fn approvers(&self) -> Vec<String> {
        self.approvals.iter().map(|a| a.approver_id.clone()).collect()
    }

    pub fn quorum_reached(&self) -> bool {
        self.approvals.len() as u64 >= u64::from(self.required_approvals)
    }

    /// Apply a vote to this ticket. Does not settle it.
    ///
    /// A denial is always accepted while the ticket is open, including from a
    /// reviewer who approved earlier.
    pub fn record_vote(&mut self, vote: Vote, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(GuardError::TicketClosed {
                ticket: self.id.to_string(),
                status: self.status.to_string(),
            });
        }
        if self.is_expired(now) {
            return Err(GuardError::TimeoutExpired(self.id.to_string()));
        }
        match vote.decision {
            Decision::Approve => {
                if self.has_approved(&vote.approver_id) {
                    return Err(GuardError::DuplicateApprover {
                        ticket: self.id.to_string(),
                        approver: vote.approver_id,
                    });
                }
                self.approvals.push(Approval {
                    approver_id: vote.approver_id,
                    role: vote.role,
                    at: now,
                });
            }
            Decision::Deny => {
                self.denial = Some(Denial {
                    approver_id: vote.approver_id,
                    role: vote.role,
                    at: now,
                    reason: vote.reason,
                });
            }
        }
        self.modifications.extend(vote.modifications);
        Ok(())
    }

    pub fn close(&mut self, status: TicketStatus, now: DateTime<Utc>) {
        self.status = status;
        self.closed_at = Some(now);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
