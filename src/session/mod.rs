//! In-memory session table
//!
//! Holds every live browser session, anonymous or logged in, in a
//! fixed-capacity slab. Each slot carries its own lock so two requests on
//! different sessions never contend; freed slot indices are recycled
//! through a free list. Slot 0 is reserved and never handed out, so a
//! zero handle can only mean "no session".

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

/// Opaque handle to a slot in the session table.
///
/// Handles are only meaningful for the lifetime of the session that
/// produced them; after `close` the same index may be reused for an
/// unrelated visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(usize);

impl SessionHandle {
    /// Raw slot index, for logging
    pub fn index(&self) -> usize {
        self.0
    }
}

/// One live session, anonymous or authenticated
#[derive(Debug, Clone)]
pub struct SessionSlot {
    /// Random session id stored in the visitor's cookie
    pub sesid: String,
    /// User agent the session was started with
    pub uagent: String,
    /// Client IP the session was started from
    pub ip: String,
    /// True once the visitor has authenticated
    pub logged: bool,
    /// Account id, 0 while anonymous
    pub user_id: i64,
    pub login: String,
    pub email: String,
    pub name: String,
    pub about: String,
    /// Pending profile edits, held until the form round-trip completes
    pub login_tmp: String,
    pub email_tmp: String,
    pub name_tmp: String,
    pub about_tmp: String,
    /// Last request time, drives the idle sweep
    pub last_activity: DateTime<Utc>,
}

impl SessionSlot {
    /// Fresh anonymous session
    pub fn anonymous(sesid: String, uagent: String, ip: String, now: DateTime<Utc>) -> Self {
        Self {
            sesid,
            uagent,
            ip,
            logged: false,
            user_id: 0,
            login: String::new(),
            email: String::new(),
            name: String::new(),
            about: String::new(),
            login_tmp: String::new(),
            email_tmp: String::new(),
            name_tmp: String::new(),
            about_tmp: String::new(),
            last_activity: now,
        }
    }
}

/// Fixed-capacity table of live sessions
pub struct SessionTable {
    /// slots[0] is reserved; usable slots are 1..=capacity
    slots: Vec<Mutex<Option<SessionSlot>>>,
    /// Indices of currently empty slots
    free: Mutex<Vec<usize>>,
    capacity: usize,
}

impl SessionTable {
    /// Create a table that can hold `capacity` concurrent sessions
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity + 1);
        for _ in 0..=capacity {
            slots.push(Mutex::new(None));
        }
        // pop() hands out low indices first
        let free = (1..=capacity).rev().collect();
        Self {
            slots,
            free: Mutex::new(free),
            capacity,
        }
    }

    /// Number of sessions the table can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of occupied slots
    pub async fn len(&self) -> usize {
        let free = self.free.lock().await;
        self.capacity - free.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Claim a free slot for a new session.
    ///
    /// Returns `None` when the table is full; callers surface that as a
    /// temporary service condition rather than evicting someone.
    pub async fn acquire(&self, slot: SessionSlot) -> Option<SessionHandle> {
        let index = {
            let mut free = self.free.lock().await;
            free.pop()?
        };
        let mut guard = self.slots[index].lock().await;
        *guard = Some(slot);
        Some(SessionHandle(index))
    }

    /// Linear scan for a session matching the cookie and user agent.
    ///
    /// When `logged_only` is set, anonymous sessions are skipped even if
    /// their sesid matches; a logged cookie must never resolve to an
    /// anonymous slot.
    pub async fn find(
        &self,
        sesid: &str,
        uagent: &str,
        logged_only: bool,
    ) -> Option<SessionHandle> {
        for index in 1..=self.capacity {
            let guard = self.slots[index].lock().await;
            if let Some(slot) = guard.as_ref() {
                if slot.sesid == sesid
                    && slot.uagent == uagent
                    && (slot.logged || !logged_only)
                {
                    return Some(SessionHandle(index));
                }
            }
        }
        None
    }

    /// Read a copy of the slot behind a handle
    pub async fn get(&self, handle: SessionHandle) -> Option<SessionSlot> {
        let guard = self.slots[handle.0].lock().await;
        guard.clone()
    }

    /// Apply a mutation to the slot behind a handle.
    ///
    /// Returns false if the slot was already freed.
    pub async fn with_slot<F>(&self, handle: SessionHandle, f: F) -> bool
    where
        F: FnOnce(&mut SessionSlot),
    {
        let mut guard = self.slots[handle.0].lock().await;
        match guard.as_mut() {
            Some(slot) => {
                f(slot);
                true
            }
            None => false,
        }
    }

    /// Promote an anonymous slot to a logged-in one, keeping its sesid
    pub async fn upgrade(
        &self,
        handle: SessionHandle,
        user_id: i64,
        login: &str,
        email: &str,
        name: &str,
        about: &str,
        now: DateTime<Utc>,
    ) -> bool {
        self.with_slot(handle, |slot| {
            slot.logged = true;
            slot.user_id = user_id;
            slot.login = login.to_string();
            slot.email = email.to_string();
            slot.name = name.to_string();
            slot.about = about.to_string();
            slot.login_tmp.clear();
            slot.email_tmp.clear();
            slot.name_tmp.clear();
            slot.about_tmp.clear();
            slot.last_activity = now;
        })
        .await
    }

    /// Demote a logged-in slot back to anonymous.
    ///
    /// The sesid and client identity survive, so the visitor keeps their
    /// anonymous session after logging out.
    pub async fn downgrade(&self, handle: SessionHandle, now: DateTime<Utc>) -> Option<String> {
        let mut guard = self.slots[handle.0].lock().await;
        let slot = guard.as_mut()?;
        let sesid = slot.sesid.clone();
        slot.logged = false;
        slot.user_id = 0;
        slot.login.clear();
        slot.email.clear();
        slot.name.clear();
        slot.about.clear();
        slot.login_tmp.clear();
        slot.email_tmp.clear();
        slot.name_tmp.clear();
        slot.about_tmp.clear();
        slot.last_activity = now;
        Some(sesid)
    }

    /// Refresh the activity stamp
    pub async fn touch(&self, handle: SessionHandle, now: DateTime<Utc>) -> bool {
        self.with_slot(handle, |slot| slot.last_activity = now).await
    }

    /// Free a slot and return its index to the free list
    pub async fn close(&self, handle: SessionHandle) -> Option<SessionSlot> {
        let closed = {
            let mut guard = self.slots[handle.0].lock().await;
            guard.take()
        };
        if closed.is_some() {
            let mut free = self.free.lock().await;
            free.push(handle.0);
        }
        closed
    }

    /// Close every session idle longer than `idle_ttl`.
    ///
    /// Each slot is checked under its own lock, so live traffic on other
    /// sessions is not blocked while the sweep runs. Returns the closed
    /// sessions so the caller can drop their persistent records.
    pub async fn sweep_idle(
        &self,
        now: DateTime<Utc>,
        idle_ttl: Duration,
    ) -> Vec<(SessionHandle, SessionSlot)> {
        let mut closed = Vec::new();
        for index in 1..=self.capacity {
            let expired = {
                let mut guard = self.slots[index].lock().await;
                match guard.as_ref() {
                    Some(slot) if now - slot.last_activity > idle_ttl => guard.take(),
                    _ => None,
                }
            };
            if let Some(slot) = expired {
                let mut free = self.free.lock().await;
                free.push(index);
                closed.push((SessionHandle(index), slot));
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn slot(sesid: &str, uagent: &str) -> SessionSlot {
        SessionSlot::anonymous(
            sesid.to_string(),
            uagent.to_string(),
            "10.0.0.1".to_string(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_acquire_until_full() {
        let table = SessionTable::new(2);
        assert!(table.acquire(slot("a", "ua")).await.is_some());
        assert!(table.acquire(slot("b", "ua")).await.is_some());
        assert!(table.acquire(slot("c", "ua")).await.is_none());
        assert_eq!(table.len().await, 2);
    }

    #[tokio::test]
    async fn test_slot_zero_is_never_handed_out() {
        let table = SessionTable::new(3);
        for sesid in ["a", "b", "c"] {
            let handle = table.acquire(slot(sesid, "ua")).await.unwrap();
            assert!(handle.index() >= 1);
        }
    }

    #[tokio::test]
    async fn test_close_recycles_slot() {
        let table = SessionTable::new(1);
        let handle = table.acquire(slot("a", "ua")).await.unwrap();
        assert!(table.acquire(slot("b", "ua")).await.is_none());

        table.close(handle).await;
        assert!(table.acquire(slot("b", "ua")).await.is_some());
    }

    #[tokio::test]
    async fn test_find_matches_sesid_and_uagent() {
        let table = SessionTable::new(4);
        table.acquire(slot("abc", "firefox")).await.unwrap();

        assert!(table.find("abc", "firefox", false).await.is_some());
        // same sesid, different client
        assert!(table.find("abc", "chrome", false).await.is_none());
        assert!(table.find("xyz", "firefox", false).await.is_none());
    }

    #[tokio::test]
    async fn test_logged_only_skips_anonymous_slots() {
        let table = SessionTable::new(4);
        let handle = table.acquire(slot("abc", "ua")).await.unwrap();

        assert!(table.find("abc", "ua", true).await.is_none());

        table
            .upgrade(handle, 7, "alice", "a@example.com", "Alice", "", Utc::now())
            .await;
        assert!(table.find("abc", "ua", true).await.is_some());
    }

    #[tokio::test]
    async fn test_downgrade_keeps_sesid_and_slot() {
        let table = SessionTable::new(2);
        let handle = table.acquire(slot("keepme", "ua")).await.unwrap();
        table
            .upgrade(handle, 7, "alice", "a@example.com", "Alice", "", Utc::now())
            .await;

        let sesid = table.downgrade(handle, Utc::now()).await.unwrap();
        assert_eq!(sesid, "keepme");

        let after = table.get(handle).await.unwrap();
        assert!(!after.logged);
        assert_eq!(after.user_id, 0);
        assert_eq!(after.sesid, "keepme");
        // slot is still occupied, not freed
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_closes_only_idle_sessions() {
        let table = SessionTable::new(4);
        let now = Utc::now();

        let mut stale = slot("stale", "ua");
        stale.last_activity = now - Duration::seconds(700);
        let stale_handle = table.acquire(stale).await.unwrap();

        let fresh_handle = table.acquire(slot("fresh", "ua")).await.unwrap();

        let closed = table.sweep_idle(now, Duration::seconds(600)).await;
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].0, stale_handle);
        assert_eq!(closed[0].1.sesid, "stale");

        assert!(table.get(stale_handle).await.is_none());
        assert!(table.get(fresh_handle).await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_yields_unique_handles() {
        let table = Arc::new(SessionTable::new(64));
        let mut tasks = Vec::new();
        for i in 0..64 {
            let table = table.clone();
            tasks.push(tokio::spawn(async move {
                table.acquire(slot(&format!("s{i}"), "ua")).await
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            if let Some(handle) = task.await.unwrap() {
                handles.push(handle.index());
            }
        }
        handles.sort_unstable();
        let before = handles.len();
        handles.dedup();
        assert_eq!(before, 64);
        assert_eq!(handles.len(), 64);
    }
}
