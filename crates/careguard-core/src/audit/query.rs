use super::entry::AuditEntry;
use super::sealer::{SealedSubject, SubjectSealer};
use super::store::{audit_key, AuditKey, AuditStore};
use crate::error::Result;
use crate::types::RiskTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// AuditFilter
// ---------------------------------------------------------------------------

/// Conjunctive filter over audit entries. Every unset field matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Clear-text patient id. Sealed before comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_tier: Option<RiskTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn for_action(action_id: Uuid) -> Self {
        Self {
            action_id: Some(action_id),
            ..Self::default()
        }
    }
}

/// Filter with the patient id already sealed.
#[derive(Debug, Clone)]
struct Matcher {
    agent_id: Option<String>,
    subject: Option<SealedSubject>,
    risk_tier: Option<RiskTier>,
    action_id: Option<Uuid>,
    since: Option<DateTime<Utc>>,
}

impl Matcher {
    fn matches(&self, e: &AuditEntry) -> bool {
        self.agent_id.as_deref().map_or(true, |a| e.agent_id == a)
            && self.subject.as_ref().map_or(true, |s| &e.subject == s)
            && self.risk_tier.map_or(true, |t| e.risk_tier == t)
            && self.action_id.map_or(true, |id| e.action_id == id)
            && self.since.map_or(true, |t| e.timestamp >= t)
    }
}

// ---------------------------------------------------------------------------
// AuditQuery
// ---------------------------------------------------------------------------

/// Lazy, restartable reader over matching entries in timestamp order.
///
/// Entries are fetched from the store one page at a time. A store error is
/// yielded once and ends the iteration; `restart()` rewinds to the first
/// matching entry.
pub struct AuditQuery {
    store: Arc<dyn AuditStore>,
    matcher: Matcher,
    until: Option<DateTime<Utc>>,
    page_size: usize,
    start: Option<AuditKey>,
    cursor: Option<AuditKey>,
    buffer: VecDeque<AuditEntry>,
    exhausted: bool,
    done: bool,
}

impl AuditQuery {
    pub(crate) fn new(
        store: Arc<dyn AuditStore>,
        sealer: &SubjectSealer,
        filter: AuditFilter,
        page_size: usize,
    ) -> Self {
        // Start just before the first key that could hold `since`.
        let start = filter
            .since
            .map(|t| t.timestamp_millis().max(0) as u64)
            .filter(|ms| *ms > 0)
            .map(|ms| audit_key(ms - 1, u64::MAX));
        let matcher = Matcher {
            agent_id: filter.agent_id,
            subject: filter.patient_id.as_deref().map(|p| sealer.seal_str(p)),
            risk_tier: filter.risk_tier,
            action_id: filter.action_id,
            since: filter.since,
        };
        Self {
            store,
            matcher,
            until: filter.until,
            page_size: page_size.max(1),
            start,
            cursor: start,
            buffer: VecDeque::new(),
            exhausted: false,
            done: false,
        }
    }

    pub fn restart(&mut self) {
        self.cursor = self.start;
        self.buffer.clear();
        self.exhausted = false;
        self.done = false;
    }

    fn fill(&mut self) -> Result<()> {
        let page = self.store.scan(self.cursor, self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some((last, _)) = page.last() {
            self.cursor = Some(*last);
        }
        self.buffer.extend(page.into_iter().map(|(_, e)| e));
        Ok(())
    }
}

impl Iterator for AuditQuery {
    type Item = Result<AuditEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(entry) = self.buffer.pop_front() {
                if self.until.is_some_and(|u| entry.timestamp > u) {
                    self.done = true;
                    return None;
                }
                if self.matcher.matches(&entry) {
                    return Some(Ok(entry));
                }
                continue;
            }
            if self.exhausted {
                self.done = true;
                return None;
            }
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}
