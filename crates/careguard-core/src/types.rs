use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// RiskTier
// ---------------------------------------------------------------------------

/// Severity of an action type. Ordering follows severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }

    /// Floor on distinct human approvals for this tier.
    pub fn min_approvals(self) -> u32 {
        match self {
            RiskTier::Low | RiskTier::Medium => 0,
            RiskTier::High => 1,
            RiskTier::Critical => 2,
        }
    }

    pub fn is_elevated(self) -> bool {
        matches!(self, RiskTier::High | RiskTier::Critical)
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskTier {
    type Err = crate::error::GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(RiskTier::Low),
            "medium" => Ok(RiskTier::Medium),
            "high" => Ok(RiskTier::High),
            "critical" => Ok(RiskTier::Critical),
            _ => Err(crate::error::GuardError::InvalidRiskTier(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Disposition
// ---------------------------------------------------------------------------

/// The decided outcome of evaluating a proposed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    AutoExecuted,
    LoggedAndExecuted,
    QueuedForApproval,
    EscalatedAlert,
    Rejected,
    TimedOut,
    Unauthorized,
}

impl Disposition {
    pub fn all() -> &'static [Disposition] {
        &[
            Disposition::AutoExecuted,
            Disposition::LoggedAndExecuted,
            Disposition::QueuedForApproval,
            Disposition::EscalatedAlert,
            Disposition::Rejected,
            Disposition::TimedOut,
            Disposition::Unauthorized,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::AutoExecuted => "auto_executed",
            Disposition::LoggedAndExecuted => "logged_and_executed",
            Disposition::QueuedForApproval => "queued_for_approval",
            Disposition::EscalatedAlert => "escalated_alert",
            Disposition::Rejected => "rejected",
            Disposition::TimedOut => "timed_out",
            Disposition::Unauthorized => "unauthorized",
        }
    }

    /// Pending dispositions wait on an approval ticket.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            Disposition::QueuedForApproval | Disposition::EscalatedAlert
        )
    }

    pub fn is_terminal(self) -> bool {
        !self.is_pending()
    }

    /// Dispositions under which the action's effect is carried out.
    pub fn executes(self) -> bool {
        matches!(
            self,
            Disposition::AutoExecuted | Disposition::LoggedAndExecuted
        )
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// A reviewer's vote on an approval ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Deny => "deny",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Decision {
    type Err = crate::error::GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" | "approved" => Ok(Decision::Approve),
            "deny" | "denied" | "reject" => Ok(Decision::Deny),
            _ => Err(crate::error::GuardError::InvalidDecision(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// DecisionRule
// ---------------------------------------------------------------------------

/// Which rule of the governance pipeline produced a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    LowConfidence,
    LowRiskAutoExecute,
    MediumRiskNotify,
    AutoExecuteDisabled,
    HighRiskApproval,
    CriticalMultiApproval,
    RbacDenied,
    DependencyFailure,
    ApprovalQuorum,
    ReviewerVeto,
    ApprovalExpired,
}

impl DecisionRule {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionRule::LowConfidence => "low_confidence",
            DecisionRule::LowRiskAutoExecute => "low_risk_auto_execute",
            DecisionRule::MediumRiskNotify => "medium_risk_notify",
            DecisionRule::AutoExecuteDisabled => "auto_execute_disabled",
            DecisionRule::HighRiskApproval => "high_risk_approval",
            DecisionRule::CriticalMultiApproval => "critical_multi_approval",
            DecisionRule::RbacDenied => "rbac_denied",
            DecisionRule::DependencyFailure => "dependency_failure",
            DecisionRule::ApprovalQuorum => "approval_quorum",
            DecisionRule::ReviewerVeto => "reviewer_veto",
            DecisionRule::ApprovalExpired => "approval_expired",
        }
    }
}

impl fmt::Display for DecisionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
