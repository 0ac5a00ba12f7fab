// src/auth/store.rs

//! Pending security contexts, keyed by connection id.
//!
//! Each key owns a mutex-protected slot. Work on one key (a negotiation round,
//! a lookup, an expiry check) holds that slot's lock, so rounds for the same
//! connection are serialized while different connections never wait on each
//! other. The outer map only guards slot creation and removal.
//!
//! Entries idle for longer than the TTL are released lazily on the next access
//! to their key and eagerly by [`ContextStore::sweep`], which the background
//! sweeper runs periodically. A sweep skips slots that are locked.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::sspi::{RawHandle, SecurityContext};

type Cell = Arc<Mutex<Option<Entry>>>;

struct Entry {
    context: SecurityContext,
    touched: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.touched) >= ttl
    }
}

struct Shared {
    slots: DashMap<String, Cell>,
    ttl: Duration,
}

/// A concurrent, expiring map from connection id to the pending context.
pub struct ContextStore {
    shared: Arc<Shared>,
}

impl ContextStore {
    pub fn new(ttl: Duration) -> ContextStore {
        ContextStore {
            shared: Arc::new(Shared {
                slots: DashMap::new(),
                ttl,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.shared.ttl
    }

    /// The pending context for `connection_id`, without taking it.
    ///
    /// Counts as an access and refreshes the entry's TTL. The returned handle
    /// stays owned by the store.
    pub fn get(&self, connection_id: &str) -> Option<RawHandle> {
        let cell = self.existing(connection_id)?;
        let mut slot = Slot::new(self, connection_id, cell);
        slot.peek()
    }

    /// Whether a live context is pending for `connection_id`. Unlike
    /// [`get`](ContextStore::get), this does not refresh the entry's TTL.
    pub fn contains(&self, connection_id: &str) -> bool {
        match self.existing(connection_id) {
            Some(cell) => Slot::new(self, connection_id, cell).is_live(),
            None => false,
        }
    }

    /// Store `context` for `connection_id`, releasing any context it replaces.
    pub fn put(&self, connection_id: &str, context: SecurityContext) {
        self.lock(connection_id).put(context);
    }

    /// Take the pending context out of the store. The caller now owns it.
    pub fn remove(&self, connection_id: &str) -> Option<SecurityContext> {
        let cell = self.existing(connection_id)?;
        let mut slot = Slot::new(self, connection_id, cell);
        slot.take()
    }

    /// Number of resident entries, including expired ones not yet swept.
    ///
    /// A slot locked by an in-flight round counts as occupied, even when that
    /// round is the connection's first and nothing is parked yet.
    pub fn len(&self) -> usize {
        self.shared
            .slots
            .iter()
            .filter(|cell| cell.value().try_lock().map_or(true, |entry| entry.is_some()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every expired entry whose slot is not in use. Returns how many
    /// contexts were released.
    pub fn sweep(&self) -> usize {
        sweep(&self.shared)
    }

    /// Run [`sweep`](ContextStore::sweep) every `period` on the current Tokio
    /// runtime, until the store is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let shared = match shared.upgrade() {
                    Some(shared) => shared,
                    None => break,
                };
                let released = sweep(&shared);
                if released > 0 {
                    log::debug!("released {} expired negotiate contexts", released);
                }
            }
        })
    }

    /// Lock the slot for `connection_id`, creating it if needed.
    pub(crate) fn lock<'a>(&'a self, connection_id: &'a str) -> Slot<'a> {
        let cell = match self.existing(connection_id) {
            Some(cell) => cell,
            None => Arc::clone(
                self.shared
                    .slots
                    .entry(connection_id.to_owned())
                    .or_default()
                    .value(),
            ),
        };
        Slot::new(self, connection_id, cell)
    }

    fn existing(&self, connection_id: &str) -> Option<Cell> {
        self.shared
            .slots
            .get(connection_id)
            .map(|cell| Arc::clone(cell.value()))
    }

    fn evict_vacant(&self, connection_id: &str) {
        self.shared.slots.remove_if(connection_id, |_, cell| is_vacant(cell));
    }
}

impl fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("ttl", &self.shared.ttl)
            .field("len", &self.len())
            .finish()
    }
}

// Only called while the map holds the key's shard lock, so nobody can clone
// the cell concurrently.
fn is_vacant(cell: &Cell) -> bool {
    Arc::strong_count(cell) == 1 && cell.try_lock().map_or(false, |entry| entry.is_none())
}

fn sweep(shared: &Shared) -> usize {
    let now = Instant::now();
    let mut expired = Vec::new();

    for cell in shared.slots.iter() {
        if let Some(mut entry) = cell.value().try_lock() {
            if entry.as_ref().map_or(false, |e| e.is_expired(now, shared.ttl)) {
                log::trace!("negotiate context for {:?} expired", cell.key());
                expired.extend(entry.take());
            }
        }
    }

    shared.slots.retain(|_, cell| !is_vacant(cell));

    // release outside the map's shard locks
    let released = expired.len();
    drop(expired);
    released
}

/// Exclusive access to one connection's entry.
///
/// Dropping a slot that ended up empty removes the key from the map, unless
/// another caller is already waiting on it.
pub(crate) struct Slot<'a> {
    store: &'a ContextStore,
    connection_id: &'a str,
    guard: Option<ArcMutexGuard<RawMutex, Option<Entry>>>,
}

impl<'a> Slot<'a> {
    fn new(store: &'a ContextStore, connection_id: &'a str, cell: Cell) -> Slot<'a> {
        Slot {
            store,
            connection_id,
            guard: Some(cell.lock_arc()),
        }
    }

    fn entry(&mut self) -> &mut Option<Entry> {
        match self.guard {
            Some(ref mut guard) => &mut **guard,
            None => unreachable!("slot guard is only taken on drop"),
        }
    }

    fn expire(&mut self) {
        let ttl = self.store.shared.ttl;
        let expired = self
            .entry()
            .as_ref()
            .map_or(false, |e| e.is_expired(Instant::now(), ttl));
        if expired {
            log::trace!("negotiate context for {:?} expired", self.connection_id);
            *self.entry() = None;
        }
    }

    /// Non-owning view of the live context, refreshing its TTL.
    pub(crate) fn peek(&mut self) -> Option<RawHandle> {
        self.expire();
        let entry = self.entry().as_mut()?;
        entry.touched = Instant::now();
        Some(entry.context.raw())
    }

    /// Whether the slot holds a live context. Does not refresh its TTL.
    pub(crate) fn is_live(&mut self) -> bool {
        self.expire();
        self.entry().is_some()
    }

    /// Take the live context out of the slot.
    pub(crate) fn take(&mut self) -> Option<SecurityContext> {
        self.expire();
        self.entry().take().map(|entry| entry.context)
    }

    /// Store `context`, releasing whatever it replaces.
    pub(crate) fn put(&mut self, context: SecurityContext) {
        let raw = context.raw();
        let replaced = self.entry().replace(Entry {
            context,
            touched: Instant::now(),
        });

        if let Some(old) = replaced {
            if old.context.raw() == raw {
                // same native handle, already owned by the new entry
                old.context.into_raw();
            }
        }
        log::trace!("stored negotiate context for {:?}", self.connection_id);
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        let vacant = self.guard.as_ref().map_or(false, |entry| entry.is_none());
        drop(self.guard.take());
        if vacant {
            self.store.evict_vacant(self.connection_id);
        }
    }
}
