use super::access::{AccessFilter, AccessRecord};
use super::entry::{AuditEntry, LogId};
use super::query::{AuditFilter, AuditQuery};
use super::sealer::SubjectSealer;
use super::stats::AuditStatistics;
use super::store::{access_key, audit_key, split_key, AuditStore};
use crate::error::{GuardError, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: usize = 256;

/// Read-only view of the audit trail, for consumers such as bias monitors.
pub trait AuditReader: Send + Sync {
    fn query(&self, filter: AuditFilter) -> AuditQuery;
    fn statistics(&self, filter: AuditFilter) -> Result<AuditStatistics>;
    /// Access records matching `filter`, oldest first.
    fn access_log(&self, filter: AccessFilter) -> Result<Vec<AccessRecord>>;
}

struct Clock {
    last_ms: u64,
    next_seq: u64,
    closed: bool,
}

/// Serializes appends to an [`AuditStore`].
///
/// Each append is stamped under one lock with a timestamp that never runs
/// backwards and a strictly increasing sequence, so the store's key order is
/// the causal order of the calls.
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    sealer: Arc<SubjectSealer>,
    clock: Mutex<Clock>,
    page_size: usize,
}

impl AuditRecorder {
    /// Open a recorder over `store`, resuming after its last entry.
    pub fn open(store: Arc<dyn AuditStore>, sealer: Arc<SubjectSealer>) -> Result<Self> {
        let (last_ms, next_seq) = match store.last_key()? {
            Some(key) => {
                let (ms, seq) = split_key(&key);
                (ms, seq + 1)
            }
            None => (0, 1),
        };
        tracing::info!(next_log_id = next_seq, "audit recorder opened");
        Ok(Self {
            store,
            sealer,
            clock: Mutex::new(Clock {
                last_ms,
                next_seq,
                closed: false,
            }),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn sealer(&self) -> &Arc<SubjectSealer> {
        &self.sealer
    }

    /// Stamp and persist `entry`. Any failure is an `AuditWriteFailure`; the
    /// caller must not carry out the transition it describes.
    pub fn append(&self, mut entry: AuditEntry) -> Result<LogId> {
        let mut clock = self
            .clock
            .lock()
            .map_err(|_| GuardError::AuditWriteFailure("recorder lock poisoned".into()))?;
        if clock.closed {
            return Err(GuardError::AuditWriteFailure("recorder is closed".into()));
        }

        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        let ms = now_ms.max(clock.last_ms);
        let seq = clock.next_seq;
        entry.log_id = seq;
        entry.timestamp = millis_to_datetime(ms);

        if let Err(e) = self.store.append(audit_key(ms, seq), &entry) {
            tracing::error!(
                action_id = %entry.action_id,
                disposition = %entry.disposition,
                error = %e,
                "audit append failed"
            );
            return Err(GuardError::AuditWriteFailure(e.to_string()));
        }
        clock.last_ms = ms;
        clock.next_seq = seq + 1;
        tracing::debug!(
            log_id = seq,
            action_id = %entry.action_id,
            rule = %entry.rule,
            disposition = %entry.disposition,
            "audit entry recorded"
        );
        Ok(seq)
    }

    /// Persist a record of who touched patient data. Fails like `append`:
    /// the caller must not release the data if this does.
    pub fn record_access(&self, mut record: AccessRecord) -> Result<()> {
        let closed = self
            .clock
            .lock()
            .map(|c| c.closed)
            .map_err(|_| GuardError::AuditWriteFailure("recorder lock poisoned".into()))?;
        if closed {
            return Err(GuardError::AuditWriteFailure("recorder is closed".into()));
        }
        let ms = Utc::now().timestamp_millis().max(0) as u64;
        record.timestamp = millis_to_datetime(ms);
        if let Err(e) = self
            .store
            .append_access(access_key(ms, record.access_id), &record)
        {
            tracing::error!(
                user_id = %record.user_id,
                resource = %record.resource,
                error = %e,
                "access record append failed"
            );
            return Err(GuardError::AuditWriteFailure(e.to_string()));
        }
        tracing::info!(
            user_id = %record.user_id,
            role = %record.user_role,
            resource = %record.resource,
            kind = %record.kind,
            success = record.success,
            "phi access recorded"
        );
        Ok(())
    }

    pub fn access_log(&self, filter: AccessFilter) -> Result<Vec<AccessRecord>> {
        let matches = filter.matcher(&self.sealer);
        let mut out = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.store.scan_access(cursor, self.page_size)?;
            let Some((last, _)) = page.last() else {
                break;
            };
            cursor = Some(*last);
            let full = page.len() == self.page_size;
            out.extend(page.into_iter().map(|(_, r)| r).filter(|r| matches(r)));
            if !full {
                break;
            }
        }
        Ok(out)
    }

    /// Refuse further appends. Reads keep working.
    pub fn close(&self) {
        if let Ok(mut clock) = self.clock.lock() {
            if !clock.closed {
                clock.closed = true;
                tracing::info!(last_log_id = clock.next_seq - 1, "audit recorder closed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.clock.lock().map(|c| c.closed).unwrap_or(true)
    }

    pub fn query(&self, filter: AuditFilter) -> AuditQuery {
        AuditQuery::new(Arc::clone(&self.store), &self.sealer, filter, self.page_size)
    }

    /// All entries for one action, oldest first.
    pub fn history(&self, action_id: Uuid) -> Result<Vec<AuditEntry>> {
        self.query(AuditFilter::for_action(action_id)).collect()
    }

    pub fn statistics(&self, filter: AuditFilter) -> Result<AuditStatistics> {
        let mut stats = AuditStatistics::default();
        for entry in self.query(filter) {
            stats.record(&entry?);
        }
        Ok(stats)
    }
}

impl AuditReader for AuditRecorder {
    fn query(&self, filter: AuditFilter) -> AuditQuery {
        AuditRecorder::query(self, filter)
    }

    fn statistics(&self, filter: AuditFilter) -> Result<AuditStatistics> {
        AuditRecorder::statistics(self, filter)
    }

    fn access_log(&self, filter: AccessFilter) -> Result<Vec<AccessRecord>> {
        AuditRecorder::access_log(self, filter)
    }
}

fn millis_to_datetime(ms: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms.min(i64::MAX as u64) as i64)
        .single()
        .unwrap_or_else(Utc::now)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::audit::access::AccessKind;
    use crate::audit::store::{AuditKey, MemoryAuditStore, RedbAuditStore};
    use crate::types::{DecisionRule, Disposition, RiskTier};
    use tempfile::TempDir;

    fn sealer() -> Arc<SubjectSealer> {
        Arc::new(SubjectSealer::new(&[3u8; 32]).unwrap())
    }

    fn recorder() -> AuditRecorder {
        AuditRecorder::open(Arc::new(MemoryAuditStore::new()), sealer()).unwrap()
    }

    fn entry_for(rec: &AuditRecorder, action: &Action, tier: RiskTier) -> AuditEntry {
        AuditEntry::for_action(
            action,
            rec.sealer(),
            tier,
            DecisionRule::LowRiskAutoExecute,
            Disposition::AutoExecuted,
            "test",
        )
    }

    fn action(agent: &str, patient: &str) -> Action {
        Action::new("send_reminder", agent, "domain_agent", patient, 0.9).unwrap()
    }

    struct FailingStore;

    impl AuditStore for FailingStore {
        fn append(&self, _: AuditKey, _: &AuditEntry) -> Result<()> {
            Err(GuardError::Storage("disk full".into()))
        }
        fn scan(&self, _: Option<AuditKey>, _: usize) -> Result<Vec<(AuditKey, AuditEntry)>> {
            Err(GuardError::Storage("disk gone".into()))
        }
        fn last_key(&self) -> Result<Option<AuditKey>> {
            Ok(None)
        }
        fn append_access(&self, _: AuditKey, _: &AccessRecord) -> Result<()> {
            Err(GuardError::Storage("disk full".into()))
        }
        fn scan_access(
            &self,
            _: Option<AuditKey>,
            _: usize,
        ) -> Result<Vec<(AuditKey, AccessRecord)>> {
            Err(GuardError::Storage("disk gone".into()))
        }
    }

    #[test]
    fn log_ids_and_timestamps_are_monotonic() {
        let rec = recorder();
        let a = action("scheduling", "p-1");
        let mut last = None;
        for _ in 0..20 {
            let id = rec.append(entry_for(&rec, &a, RiskTier::Low)).unwrap();
            if let Some(prev) = last {
                assert_eq!(id, prev + 1);
            }
            last = Some(id);
        }
        let history = rec.history(a.id).unwrap();
        assert_eq!(history.len(), 20);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(history.windows(2).all(|w| w[0].log_id < w[1].log_id));
    }

    #[test]
    fn filters_combine() {
        let rec = recorder();
        let a = action("scheduling", "p-1");
        let b = action("scheduling", "p-2");
        let c = action("medication", "p-1");
        rec.append(entry_for(&rec, &a, RiskTier::Low)).unwrap();
        rec.append(entry_for(&rec, &b, RiskTier::Low)).unwrap();
        rec.append(entry_for(&rec, &c, RiskTier::High)).unwrap();

        let by_patient: Vec<_> = rec
            .query(AuditFilter {
                patient_id: Some("p-1".into()),
                ..AuditFilter::default()
            })
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(by_patient.len(), 2);

        let narrowed: Vec<_> = rec
            .query(AuditFilter {
                patient_id: Some("p-1".into()),
                agent_id: Some("medication".into()),
                risk_tier: Some(RiskTier::High),
                ..AuditFilter::default()
            })
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].action_id, c.id);
    }

    #[test]
    fn query_pages_lazily_and_restarts() {
        let rec = recorder().with_page_size(2);
        let a = action("scheduling", "p-1");
        for _ in 0..5 {
            rec.append(entry_for(&rec, &a, RiskTier::Low)).unwrap();
        }
        let mut q = rec.query(AuditFilter::default());
        let first: Vec<_> = q.by_ref().take(3).map(|r| r.unwrap().log_id).collect();
        assert_eq!(first, vec![1, 2, 3]);
        let rest: Vec<_> = q.by_ref().map(|r| r.unwrap().log_id).collect();
        assert_eq!(rest, vec![4, 5]);
        q.restart();
        assert_eq!(q.count(), 5);
    }

    #[test]
    fn time_window_filters() {
        let rec = recorder();
        let a = action("scheduling", "p-1");
        rec.append(entry_for(&rec, &a, RiskTier::Low)).unwrap();
        let entries = rec.history(a.id).unwrap();
        let ts = entries[0].timestamp;

        let after = rec
            .query(AuditFilter {
                since: Some(ts + chrono::Duration::seconds(1)),
                ..AuditFilter::default()
            })
            .count();
        assert_eq!(after, 0);

        let before = rec
            .query(AuditFilter {
                until: Some(ts - chrono::Duration::seconds(1)),
                ..AuditFilter::default()
            })
            .count();
        assert_eq!(before, 0);

        let within = rec
            .query(AuditFilter {
                since: Some(ts),
                until: Some(ts),
                ..AuditFilter::default()
            })
            .count();
        assert_eq!(within, 1);
    }

    #[test]
    fn store_failure_is_audit_write_failure() {
        let rec = AuditRecorder::open(Arc::new(FailingStore), sealer()).unwrap();
        let a = action("scheduling", "p-1");
        let err = rec.append(entry_for(&rec, &a, RiskTier::Low)).unwrap_err();
        assert!(matches!(err, GuardError::AuditWriteFailure(_)));
    }

    #[test]
    fn scan_failure_surfaces_once() {
        let rec = AuditRecorder::open(Arc::new(FailingStore), sealer()).unwrap();
        let results: Vec<_> = rec.query(AuditFilter::default()).collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn append_after_close_fails() {
        let rec = recorder();
        rec.close();
        assert!(rec.is_closed());
        let a = action("scheduling", "p-1");
        assert!(matches!(
            rec.append(entry_for(&rec, &a, RiskTier::Low)),
            Err(GuardError::AuditWriteFailure(_))
        ));
    }

    #[test]
    fn access_records_are_kept_apart_and_filterable() {
        let rec = recorder().with_page_size(2);
        let a = action("scheduling", "p-1");
        rec.append(entry_for(&rec, &a, RiskTier::Low)).unwrap();
        for (user, patient) in [("dr-lee", "p-1"), ("dr-kim", "p-2"), ("dr-lee", "p-2")] {
            let record = AccessRecord::new(user, "clinical_director", "audit_trail", AccessKind::Read)
                .for_patient(rec.sealer(), patient);
            rec.record_access(record).unwrap();
        }

        assert_eq!(rec.access_log(AccessFilter::default()).unwrap().len(), 3);
        let p2 = rec
            .access_log(AccessFilter {
                patient_id: Some("p-2".into()),
                ..AccessFilter::default()
            })
            .unwrap();
        assert_eq!(p2.len(), 2);
        let lee_p2 = rec
            .access_log(AccessFilter {
                user_id: Some("dr-lee".into()),
                patient_id: Some("p-2".into()),
                ..AccessFilter::default()
            })
            .unwrap();
        assert_eq!(lee_p2.len(), 1);

        // The decision log is untouched.
        assert_eq!(rec.query(AuditFilter::default()).count(), 1);
        assert_eq!(rec.append(entry_for(&rec, &a, RiskTier::Low)).unwrap(), 2);
    }

    #[test]
    fn access_record_failure_is_audit_write_failure() {
        let record =
            AccessRecord::new("dr-lee", "clinical_director", "audit_trail", AccessKind::Read);
        let failing = AuditRecorder::open(Arc::new(FailingStore), sealer()).unwrap();
        assert!(matches!(
            failing.record_access(record.clone()),
            Err(GuardError::AuditWriteFailure(_))
        ));
        let closed = recorder();
        closed.close();
        assert!(matches!(
            closed.record_access(record),
            Err(GuardError::AuditWriteFailure(_))
        ));
    }

    #[test]
    fn reopen_resumes_sequence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.redb");
        let a = action("scheduling", "p-1");
        {
            let rec =
                AuditRecorder::open(Arc::new(RedbAuditStore::open(&path).unwrap()), sealer())
                    .unwrap();
            rec.append(entry_for(&rec, &a, RiskTier::Low)).unwrap();
            rec.append(entry_for(&rec, &a, RiskTier::Low)).unwrap();
            rec.close();
        }
        let rec =
            AuditRecorder::open(Arc::new(RedbAuditStore::open(&path).unwrap()), sealer()).unwrap();
        assert_eq!(rec.append(entry_for(&rec, &a, RiskTier::Low)).unwrap(), 3);
        assert_eq!(rec.history(a.id).unwrap().len(), 3);
    }

    #[test]
    fn statistics_count_by_dimension() {
        let rec = recorder();
        let a = action("scheduling", "p-1");
        let b = action("medication", "p-2");
        rec.append(entry_for(&rec, &a, RiskTier::Low)).unwrap();
        rec.append(
            entry_for(&rec, &b, RiskTier::High).with_decision(vec!["dr".into()], true, vec![]),
        )
        .unwrap();
        rec.append(entry_for(&rec, &b, RiskTier::High)).unwrap();

        let stats = rec.statistics(AuditFilter::default()).unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.distinct_actions, 2);
        assert_eq!(stats.by_risk_tier["high"], 2);
        assert_eq!(stats.by_agent["scheduling"], 1);
        assert_eq!(stats.by_disposition["auto_executed"], 3);
        assert_eq!(stats.human_overrides, 1);
    }
}
