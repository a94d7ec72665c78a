//! Records of who read or wrote protected health information.
//!
//! Access records live beside the decision log in the same store but in their
//! own keyspace, so they never disturb log ids or ledger recovery.

use super::sealer::{SealedSubject, SubjectSealer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One access to patient data through the governance surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub access_id: Uuid,
    /// Assigned by the recorder on append.
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub user_role: String,
    /// Absent for reads that span many patients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<SealedSubject>,
    /// What was touched, e.g. `audit_trail` or `approval_ticket`.
    pub resource: String,
    pub kind: AccessKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AccessRecord {
    pub fn new(
        user_id: impl Into<String>,
        user_role: impl Into<String>,
        resource: impl Into<String>,
        kind: AccessKind,
    ) -> Self {
        Self {
            access_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: user_id.into(),
            user_role: user_role.into(),
            subject: None,
            resource: resource.into(),
            kind,
            success: true,
            reason: None,
        }
    }

    pub fn for_subject(mut self, subject: SealedSubject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Seal a clear patient id and attach it.
    pub fn for_patient(self, sealer: &SubjectSealer, patient_id: &str) -> Self {
        self.for_subject(sealer.seal_str(patient_id))
    }

    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.success = false;
        self.reason = Some(reason.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Criteria for reading access records. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessFilter {
    pub user_id: Option<String>,
    /// Clear patient id; sealed before matching.
    pub patient_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl AccessFilter {
    pub(crate) fn matcher(&self, sealer: &SubjectSealer) -> impl Fn(&AccessRecord) -> bool {
        let user_id = self.user_id.clone();
        let subject = self.patient_id.as_deref().map(|p| sealer.seal_str(p));
        let since = self.since;
        move |r| {
            user_id.as_deref().map_or(true, |u| r.user_id == u)
                && subject.as_ref().map_or(true, |s| r.subject.as_ref() == Some(s))
                && since.map_or(true, |t| r.timestamp >= t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealer() -> SubjectSealer {
        SubjectSealer::new(&[4u8; 32]).unwrap()
    }

    #[test]
    fn patient_is_sealed_never_clear() {
        let record =
            AccessRecord::new("dr-lee", "clinical_director", "audit_trail", AccessKind::Read)
                .for_patient(&sealer(), "MRN-5521");
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("MRN-5521"));
        assert_eq!(record.subject, Some(sealer().seal_str("MRN-5521")));
    }

    #[test]
    fn filter_matches_on_sealed_patient() {
        let s = sealer();
        let hit = AccessRecord::new("dr-lee", "clinical_director", "audit_trail", AccessKind::Read)
            .for_patient(&s, "MRN-1");
        let miss = AccessRecord::new("dr-lee", "clinical_director", "audit_trail", AccessKind::Read)
            .for_patient(&s, "MRN-2");
        let filter = AccessFilter {
            patient_id: Some("MRN-1".into()),
            ..AccessFilter::default()
        };
        let matches = filter.matcher(&s);
        assert!(matches(&hit));
        assert!(!matches(&miss));
    }

    #[test]
    fn failed_access_keeps_reason() {
        let r = AccessRecord::new("nurse-kim", "nurse_manager", "approval_ticket", AccessKind::Read)
            .failed("ticket not found");
        assert!(!r.success);
        assert_eq!(r.reason.as_deref(), Some("ticket not found"));
    }
}
