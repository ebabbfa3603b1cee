//! In-flight query registry: deduplication and synchronous result delivery.
//!
//! Submissions are keyed by [`QuerySignature`]. The first submission of a
//! signature registers an entry and gets enqueued; an identical submission
//! arriving while the first is still in flight joins the existing entry and
//! never reaches a queue. When the worker completes the query, the result
//! fans out to every waiter. Deduplication is strictly of *concurrent*
//! requests — completion removes the entry, so a later identical submission
//! executes again.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use hydrogen_core::error::{DbError, Result};
use hydrogen_core::signature::QuerySignature;
use hydrogen_core::types::QueryResult;

use crate::lock;

type EntryMap = Arc<Mutex<FxHashMap<u64, Arc<PendingEntry>>>>;

#[derive(Debug)]
struct PendingEntry {
    signature: QuerySignature,
    deadline: Instant,
    timeout: Duration,
    state: Mutex<EntryState>,
    ready: Condvar,
}

#[derive(Debug, Default)]
struct EntryState {
    result: Option<QueryResult>,
    timed_out: bool,
}

/// Outcome of registering a submission.
#[derive(Debug)]
pub enum Registration {
    /// First submission of this signature — the caller must enqueue it.
    Registered(PendingTicket),
    /// An identical query is already in flight — just wait.
    Joined(PendingTicket),
}

/// A waiter's handle on an in-flight query.
#[derive(Debug)]
pub struct PendingTicket {
    entry: Arc<PendingEntry>,
    entries: EntryMap,
}

impl PendingTicket {
    pub fn signature(&self) -> QuerySignature {
        self.entry.signature
    }

    /// Block until the result arrives or the entry's deadline passes.
    pub fn wait(self) -> Result<QueryResult> {
        let mut state = lock(&self.entry.state);
        loop {
            if let Some(result) = state.result.clone() {
                return Ok(result);
            }
            if state.timed_out {
                return Err(DbError::Timeout { seconds: self.entry.timeout.as_secs() });
            }
            let now = Instant::now();
            if now >= self.entry.deadline {
                state.timed_out = true;
                self.entry.ready.notify_all();
                drop(state);
                self.remove_entry();
                return Err(DbError::Timeout { seconds: self.entry.timeout.as_secs() });
            }
            let (guard, _) = self
                .entry
                .ready
                .wait_timeout(state, self.entry.deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Non-blocking peek at the result.
    pub fn try_result(&self) -> Option<QueryResult> {
        lock(&self.entry.state).result.clone()
    }

    /// Drop this entry from the registry if it is still the live one for
    /// its signature.
    fn remove_entry(&self) {
        let mut map = lock(&self.entries);
        let key = self.entry.signature.as_u64();
        if map.get(&key).is_some_and(|current| Arc::ptr_eq(current, &self.entry)) {
            map.remove(&key);
        }
    }
}

/// Registry of in-flight queries for one database.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: EntryMap,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a submission. Identical concurrent submissions join the
    /// existing entry instead of creating a new one.
    pub fn register(&self, signature: QuerySignature, timeout: Duration) -> Registration {
        let mut map = lock(&self.entries);
        let key = signature.as_u64();
        if let Some(entry) = map.get(&key) {
            return Registration::Joined(PendingTicket {
                entry: Arc::clone(entry),
                entries: Arc::clone(&self.entries),
            });
        }
        let entry = Arc::new(PendingEntry {
            signature,
            deadline: Instant::now() + timeout,
            timeout,
            state: Mutex::new(EntryState::default()),
            ready: Condvar::new(),
        });
        map.insert(key, Arc::clone(&entry));
        Registration::Registered(PendingTicket { entry, entries: Arc::clone(&self.entries) })
    }

    /// Publish a result and wake every waiter. Returns false when no entry
    /// holds this signature (already timed out and swept, or never
    /// registered).
    pub fn complete(&self, signature: QuerySignature, result: QueryResult) -> bool {
        let entry = lock(&self.entries).remove(&signature.as_u64());
        match entry {
            Some(entry) => {
                let mut state = lock(&entry.state);
                state.result = Some(result);
                entry.ready.notify_all();
                true
            }
            None => false,
        }
    }

    /// Drop entries past their deadline that nobody completed, waking their
    /// waiters with a timeout. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Arc<PendingEntry>> = {
            let mut map = lock(&self.entries);
            let keys: Vec<u64> = map
                .iter()
                .filter(|(_, entry)| now >= entry.deadline)
                .map(|(key, _)| *key)
                .collect();
            keys.iter().filter_map(|key| map.remove(key)).collect()
        };
        for entry in &expired {
            let mut state = lock(&entry.state);
            if state.result.is_none() {
                state.timed_out = true;
            }
            entry.ready.notify_all();
        }
        expired.len()
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.entries).len()
    }
}
