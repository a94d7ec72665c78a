use super::entry::AuditEntry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Aggregate counts over a set of audit entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub total_entries: u64,
    pub distinct_actions: u64,
    pub by_risk_tier: BTreeMap<String, u64>,
    pub by_disposition: BTreeMap<String, u64>,
    pub by_agent: BTreeMap<String, u64>,
    pub human_overrides: u64,
    #[serde(skip)]
    seen: BTreeSet<Uuid>,
}

impl AuditStatistics {
    pub fn record(&mut self, entry: &AuditEntry) {
        self.total_entries += 1;
        if self.seen.insert(entry.action_id) {
            self.distinct_actions += 1;
        }
        *self
            .by_risk_tier
            .entry(entry.risk_tier.as_str().to_string())
            .or_default() += 1;
        *self
            .by_disposition
            .entry(entry.disposition.as_str().to_string())
            .or_default() += 1;
        *self.by_agent.entry(entry.agent_id.clone()).or_default() += 1;
        if entry.human_override {
            self.human_overrides += 1;
        }
    }
}

impl<'a> FromIterator<&'a AuditEntry> for AuditStatistics {
    fn from_iter<I: IntoIterator<Item = &'a AuditEntry>>(iter: I) -> Self {
        let mut stats = Self::default();
        for entry in iter {
            stats.record(entry);
        }
        stats
    }
}
