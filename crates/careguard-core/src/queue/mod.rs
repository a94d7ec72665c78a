//! Approval queue: live tickets awaiting human review.
//!
//! Each live ticket sits behind its own mutex. Every mutation goes through
//! [`ApprovalQueue::transact`], which runs the change on a working copy and
//! commits it only if it succeeds, so a vote and the sweeper can never both
//! close the same ticket. Closed tickets move to an archive that stays
//! readable by id.
//!
//! The in-memory state is authoritative. A failed store write never undoes a
//! committed change; the ticket is marked unsynced and rewritten by
//! [`ApprovalQueue::sync`].

pub mod db;
pub mod ticket;

pub use db::{TicketDb, TicketStore};
pub use ticket::{Approval, ApprovalTicket, Denial, TicketStatus, Vote};

use crate::action::Action;
use crate::error::{GuardError, Result};
use crate::policy::Policy;
use crate::types::Disposition;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

type Slot = Arc<Mutex<ApprovalTicket>>;

pub struct ApprovalQueue {
    live: Mutex<HashMap<Uuid, Slot>>,
    archive: Mutex<HashMap<Uuid, ApprovalTicket>>,
    store: Option<Arc<dyn TicketStore>>,
    /// Tickets whose latest state has not reached the store.
    unsynced: Mutex<HashSet<Uuid>>,
}

fn poisoned() -> GuardError {
    GuardError::Storage("approval queue lock poisoned".into())
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|_| poisoned())
}

impl Default for ApprovalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalQueue {
    /// An in-memory queue.
    pub fn new() -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            archive: Mutex::new(HashMap::new()),
            store: None,
            unsynced: Mutex::new(HashSet::new()),
        }
    }

    /// A queue persisted to the redb file behind `db`.
    pub fn with_db(db: TicketDb) -> Result<Self> {
        Self::with_store(Arc::new(db))
    }

    /// A queue persisted to `store`. Stored tickets are restored: open ones
    /// to the live set, closed ones to the archive.
    pub fn with_store(store: Arc<dyn TicketStore>) -> Result<Self> {
        let mut live = HashMap::new();
        let mut archive = HashMap::new();
        for ticket in store.list_all()? {
            if ticket.is_open() {
                live.insert(ticket.id, Arc::new(Mutex::new(ticket)));
            } else {
                archive.insert(ticket.id, ticket);
            }
        }
        tracing::info!(
            open = live.len(),
            archived = archive.len(),
            "approval queue restored"
        );
        Ok(Self {
            live: Mutex::new(live),
            archive: Mutex::new(archive),
            store: Some(store),
            unsynced: Mutex::new(HashSet::new()),
        })
    }

    /// Write `ticket` to the store. A failure is logged and leaves the
    /// ticket marked for [`sync`](Self::sync).
    fn persist(&self, ticket: &ApprovalTicket) {
        let Some(store) = &self.store else {
            return;
        };
        let result = store.put(ticket);
        let Ok(mut unsynced) = self.unsynced.lock() else {
            tracing::error!(ticket_id = %ticket.id, "unsynced ticket set poisoned");
            return;
        };
        match result {
            Ok(()) => {
                unsynced.remove(&ticket.id);
            }
            Err(e) => {
                tracing::error!(ticket_id = %ticket.id, error = %e, "ticket write failed, will retry");
                unsynced.insert(ticket.id);
            }
        }
    }

    /// Rewrite every unsynced ticket. Returns how many are still unsynced.
    pub fn sync(&self) -> usize {
        let pending: Vec<Uuid> = match self.unsynced.lock() {
            Ok(u) => u.iter().copied().collect(),
            Err(_) => return 0,
        };
        for id in pending {
            let live = self.live.lock().ok().and_then(|l| l.get(&id).cloned());
            match live {
                // Hold the ticket lock so a concurrent commit cannot be
                // overwritten by this older copy.
                Some(slot) => {
                    if let Ok(guard) = slot.lock() {
                        self.persist(&guard);
                    }
                }
                None => {
                    let archived = self.archive.lock().ok().and_then(|a| a.get(&id).cloned());
                    if let Some(ticket) = archived {
                        self.persist(&ticket);
                    }
                }
            }
        }
        self.unsynced.lock().map(|u| u.len()).unwrap_or(0)
    }

    pub fn enqueue(
        &self,
        action: Action,
        policy: Policy,
        required_approvals: u32,
        opened_as: Disposition,
        rationale: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalTicket> {
        let ticket =
            ApprovalTicket::open(action, policy, required_approvals, opened_as, rationale, now)?;
        self.admit(ticket.clone())?;
        Ok(ticket)
    }

    /// Add a ticket built by the caller. Callers that must record the ticket
    /// id elsewhere before it becomes votable open it with
    /// [`ApprovalTicket::open`] and admit it afterwards.
    pub fn admit(&self, ticket: ApprovalTicket) -> Result<()> {
        if !ticket.is_open() {
            return Err(GuardError::TicketClosed {
                ticket: ticket.id.to_string(),
                status: ticket.status.to_string(),
            });
        }
        self.persist(&ticket);
        tracing::info!(
            ticket_id = %ticket.id,
            action_id = %ticket.action.id,
            required = ticket.required_approvals,
            expires_at = %ticket.expires_at,
            "approval ticket opened"
        );
        lock(&self.live)?.insert(ticket.id, Arc::new(Mutex::new(ticket)));
        Ok(())
    }

    fn slot(&self, id: Uuid) -> Result<Slot> {
        if let Some(slot) = lock(&self.live)?.get(&id) {
            return Ok(Arc::clone(slot));
        }
        match lock(&self.archive)?.get(&id) {
            Some(t) => Err(GuardError::TicketClosed {
                ticket: id.to_string(),
                status: t.status.to_string(),
            }),
            None => Err(GuardError::TicketNotFound(id.to_string())),
        }
    }

    pub fn get(&self, id: Uuid) -> Result<ApprovalTicket> {
        match self.slot(id) {
            Ok(slot) => {
                let ticket = lock(&slot)?.clone();
                Ok(ticket)
            }
            Err(GuardError::TicketClosed { .. }) => lock(&self.archive)?
                .get(&id)
                .cloned()
                .ok_or_else(|| GuardError::TicketNotFound(id.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Open tickets, oldest first.
    pub fn list_open(&self) -> Result<Vec<ApprovalTicket>> {
        let slots: Vec<Slot> = lock(&self.live)?.values().cloned().collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            let ticket = lock(&slot)?;
            if ticket.is_open() {
                out.push(ticket.clone());
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    /// Run `f` on a working copy of ticket `id` while holding that ticket's
    /// lock. The copy replaces the ticket, and is persisted, only if `f`
    /// returns `Ok`. A ticket that ends up closed is moved to the archive.
    /// Once `f` succeeds the change is committed even if the store write
    /// fails.
    pub fn transact<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut ApprovalTicket) -> Result<R>,
    ) -> Result<R> {
        let slot = self.slot(id)?;
        let mut guard = lock(&slot)?;
        let mut work = guard.clone();
        let out = f(&mut work)?;
        self.persist(&work);
        let closed = !work.is_open();
        *guard = work;
        if closed {
            lock(&self.live)?.remove(&id);
            lock(&self.archive)?.insert(id, guard.clone());
            tracing::info!(ticket_id = %id, status = %guard.status, "approval ticket closed");
        }
        Ok(out)
    }

    /// Expire every open ticket past its deadline at `now`. `on_expire` runs
    /// inside the ticket's transaction after the status change; if it fails
    /// the ticket stays open and is retried on the next sweep.
    pub fn expire_older_than(
        &self,
        now: DateTime<Utc>,
        mut on_expire: impl FnMut(&ApprovalTicket) -> Result<()>,
    ) -> Vec<ApprovalTicket> {
        let due: Vec<Uuid> = match self.list_open() {
            Ok(open) => open
                .into_iter()
                .filter(|t| t.is_expired(now))
                .map(|t| t.id)
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "expiry sweep could not list tickets");
                return Vec::new();
            }
        };

        let mut expired = Vec::new();
        for id in due {
            let result = self.transact(id, |t| {
                if !t.is_open() || !t.is_expired(now) {
                    return Ok(None);
                }
                t.close(TicketStatus::Expired, now);
                on_expire(t)?;
                Ok(Some(t.clone()))
            });
            match result {
                Ok(Some(t)) => expired.push(t),
                Ok(None) | Err(GuardError::TicketClosed { .. }) => {}
                Err(e) => tracing::error!(ticket_id = %id, error = %e, "ticket expiry failed"),
            }
        }
        expired
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
