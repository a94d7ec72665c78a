//! Persistent storage for approval tickets using redb.
//!
//! A single `TICKETS` table keyed by the 16 raw bytes of the ticket id, with
//! the JSON-encoded ticket as value. Every committed change overwrites the
//! row, so the table always holds the latest state of each ticket.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use super::ticket::ApprovalTicket;
use crate::error::{GuardError, Result};

const TICKETS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tickets");

fn db_err(e: impl std::fmt::Display) -> GuardError {
    GuardError::Storage(e.to_string())
}

/// Durable home of approval tickets. `put` overwrites by ticket id.
pub trait TicketStore: Send + Sync {
    fn put(&self, ticket: &ApprovalTicket) -> Result<()>;
    /// Every stored ticket, oldest first.
    fn list_all(&self) -> Result<Vec<ApprovalTicket>>;
}

pub struct TicketDb {
    db: Database,
}

impl TicketDb {
    /// Open or create the redb database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(TICKETS).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    pub fn put(&self, ticket: &ApprovalTicket) -> Result<()> {
        let value = serde_json::to_vec(ticket)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(TICKETS).map_err(db_err)?;
            table
                .insert(ticket.id.as_bytes().as_slice(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<ApprovalTicket>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(TICKETS).map_err(db_err)?;
        match table.get(id.as_bytes().as_slice()).map_err(db_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Every stored ticket, oldest first.
    pub fn list_all(&self) -> Result<Vec<ApprovalTicket>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(TICKETS).map_err(db_err)?;

        let mut out = Vec::new();
        for row in table.iter().map_err(db_err)? {
            let (_, v) = row.map_err(db_err)?;
            let ticket: ApprovalTicket = serde_json::from_slice(v.value())?;
            out.push(ticket);
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }
}

impl TicketStore for TicketDb {
    fn put(&self, ticket: &ApprovalTicket) -> Result<()> {
        TicketDb::put(self, ticket)
    }

    fn list_all(&self) -> Result<Vec<ApprovalTicket>> {
        TicketDb::list_all(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::policy::Policy;
    use crate::queue::TicketStatus;
    use crate::types::{Disposition, RiskTier};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn ticket(offset_secs: i64) -> ApprovalTicket {
        let action =
            Action::new("medication_change", "medication", "domain_agent", "p-1", 0.9).unwrap();
        ApprovalTicket::open(
            action,
            Policy::for_tier(RiskTier::High),
            1,
            Disposition::QueuedForApproval,
            "high risk",
            Utc::now() + Duration::seconds(offset_secs),
        )
        .unwrap()
    }

    #[test]
    fn put_overwrites_and_lists_in_creation_order() {
        let dir = TempDir::new().unwrap();
        let db = TicketDb::open(&dir.path().join("tickets.redb")).unwrap();
        let later = ticket(10);
        let mut earlier = ticket(0);
        db.put(&later).unwrap();
        db.put(&earlier).unwrap();

        earlier.close(TicketStatus::ResolvedApproved, Utc::now());
        db.put(&earlier).unwrap();

        let all = db.list_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, earlier.id);
        assert_eq!(all[0].status, TicketStatus::ResolvedApproved);
        assert_eq!(db.get(later.id).unwrap().unwrap().status, TicketStatus::Open);
        assert!(db.get(Uuid::new_v4()).unwrap().is_none());
    }
}
