//! Append-only audit trail for every governance decision.
//!
//! Provides `AuditEntry`, the `AuditStore` backends (redb and in-memory), the
//! `AuditRecorder` that stamps and serializes appends, the `SubjectSealer`
//! that pseudonymizes patient identifiers, the lazy `AuditQuery` reader, and
//! `AccessRecord`s of who touched patient data.

pub mod access;
pub mod entry;
pub mod query;
pub mod recorder;
pub mod sealer;
pub mod stats;
pub mod store;

pub use access::{AccessFilter, AccessKind, AccessRecord};
pub use entry::{sanitize_parameters, AuditEntry, CallOutcome, ExternalCall, LogId};
pub use query::{AuditFilter, AuditQuery};
pub use recorder::{AuditReader, AuditRecorder};
pub use sealer::{SealedSubject, SubjectSealer};
pub use stats::AuditStatistics;
pub use store::{AuditKey, AuditStore, MemoryAuditStore, RedbAuditStore};
