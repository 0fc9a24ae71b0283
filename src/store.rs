//! Local cache of portal data with per-key fetch status.
//!
//! Every entity a UI shows lives in a [`FetchableEntry`]: its last good value
//! plus where its fetch stands. Fetches follow a ticket protocol:
//! [`FetchableStore::begin_fetch`] hands out a ticket only when nothing is in
//! flight for the key, and [`FetchableStore::complete_fetch`] only accepts the
//! ticket that currently owns the key. A failed fetch keeps the old data.

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::StoreError;

const CHANGE_BUFFER: usize = 64;

/// Entities that know their own key inside a [`FetchableMap`].
pub trait Keyed {
    fn key(&self) -> String;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum FetchStatus {
    #[default]
    Idle,
    Pending,
    Fulfilled,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchableEntry<T> {
    pub data: Option<T>,
    pub status: FetchStatus,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl<T> Default for FetchableEntry<T> {
    fn default() -> Self {
        Self {
            data: None,
            status: FetchStatus::Idle,
            last_fetched_at: None,
        }
    }
}

impl<T> FetchableEntry<T> {
    pub fn is_pending(&self) -> bool {
        self.status == FetchStatus::Pending
    }
}

/// Proof of ownership of the one in-flight fetch for a key.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "a fetch that is never completed leaves its key pending"]
pub struct Ticket {
    key: String,
    serial: u64,
}

impl Ticket {
    pub fn key(&self) -> &str {
        &self.key
    }
}

struct Slot<T> {
    entry: FetchableEntry<T>,
    owner: Option<u64>,
    // Status to fall back to when the pending fetch is abandoned.
    resume: FetchStatus,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            entry: FetchableEntry::default(),
            owner: None,
            resume: FetchStatus::Idle,
        }
    }
}

/// Entries of one entity kind, keyed by entity id.
///
/// Each key has its own lock, so transitions on different keys never wait on
/// each other.
pub struct FetchableStore<T> {
    slots: RwLock<HashMap<String, Arc<Mutex<Slot<T>>>>>,
    serial: AtomicU64,
    changes: broadcast::Sender<String>,
}

impl<T> Default for FetchableStore<T> {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            slots: RwLock::new(HashMap::new()),
            serial: AtomicU64::new(0),
            changes,
        }
    }
}

impl<T: Clone> FetchableStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<Mutex<Slot<T>>> {
        if let Some(slot) = self.slots.read().get(key) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    fn notify(&self, key: &str) {
        // Nobody listening is fine.
        let _ = self.changes.send(key.to_string());
    }

    pub fn get(&self, key: &str) -> FetchableEntry<T> {
        self.slot(key).lock().entry.clone()
    }

    pub fn data(&self, key: &str) -> Option<T> {
        self.slot(key).lock().entry.data.clone()
    }

    pub fn status(&self, key: &str) -> FetchStatus {
        self.slot(key).lock().entry.status.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    /// Receives the key of every entry that changes.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }

    pub fn begin_fetch(&self, key: &str) -> Result<Ticket, StoreError> {
        let slot = self.slot(key);
        let mut slot = slot.lock();
        if slot.entry.is_pending() {
            return Err(StoreError::AlreadyPending(key.to_string()));
        }
        let serial = self.serial.fetch_add(1, Ordering::Relaxed) + 1;
        slot.owner = Some(serial);
        slot.resume = std::mem::replace(&mut slot.entry.status, FetchStatus::Pending);
        drop(slot);

        self.notify(key);
        Ok(Ticket {
            key: key.to_string(),
            serial,
        })
    }

    /// Records the outcome of the fetch `ticket` owns. An error keeps the
    /// previous data.
    pub fn complete_fetch<E: Display>(
        &self,
        ticket: Ticket,
        result: Result<T, E>,
    ) -> Result<(), StoreError> {
        let slot = self.slot(&ticket.key);
        let mut slot = slot.lock();
        if slot.owner != Some(ticket.serial) {
            debug!("dropping stale result for {}", ticket.key);
            return Err(StoreError::StaleTicket(ticket.key));
        }
        slot.owner = None;
        match result {
            Ok(data) => {
                slot.entry.data = Some(data);
                slot.entry.status = FetchStatus::Fulfilled;
                slot.entry.last_fetched_at = Some(Utc::now());
            }
            Err(err) => slot.entry.status = FetchStatus::Error(err.to_string()),
        }
        drop(slot);

        self.notify(&ticket.key);
        Ok(())
    }

    /// Gives up on the pending fetch for `key`: its ticket goes stale and the
    /// entry returns to its previous status. Returns whether anything was
    /// pending.
    pub fn abandon_fetch(&self, key: &str) -> bool {
        let slot = self.slot(key);
        let mut slot = slot.lock();
        if slot.owner.take().is_none() {
            return false;
        }
        slot.entry.status = std::mem::take(&mut slot.resume);
        drop(slot);

        self.notify(key);
        true
    }

    /// Writes fetched data directly, superseding any in-flight ticket.
    fn fulfill(&self, key: &str, data: T, at: DateTime<Utc>) {
        let slot = self.slot(key);
        let mut slot = slot.lock();
        slot.owner = None;
        slot.entry = FetchableEntry {
            data: Some(data),
            status: FetchStatus::Fulfilled,
            last_fetched_at: Some(at),
        };
        drop(slot);
        self.notify(key);
    }

    fn remove(&self, key: &str) {
        if self.slots.write().remove(key).is_some() {
            self.notify(key);
        }
    }
}

/// Proof of ownership of the in-flight "fetch all" of a [`FetchableMap`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a fetch that is never completed leaves the map pending"]
pub struct MapTicket {
    serial: u64,
}

#[derive(Default)]
struct MapState {
    status: FetchStatus,
    owner: Option<u64>,
    resume: FetchStatus,
    last_fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapSnapshot<T> {
    pub status: FetchStatus,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub items: Vec<(String, FetchableEntry<T>)>,
}

/// An ordered collection of entries, e.g. all lecture weeks of a course, with
/// its own status for fetching the whole collection at once.
pub struct FetchableMap<T> {
    entries: FetchableStore<T>,
    order: RwLock<Vec<String>>,
    state: Mutex<MapState>,
    serial: AtomicU64,
}

impl<T> Default for FetchableMap<T> {
    fn default() -> Self {
        Self {
            entries: FetchableStore::default(),
            order: RwLock::new(Vec::new()),
            state: Mutex::new(MapState::default()),
            serial: AtomicU64::new(0),
        }
    }
}

impl<T: Clone + Keyed> FetchableMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> FetchStatus {
        self.state.lock().status.clone()
    }

    pub fn last_fetched_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_fetched_at
    }

    pub fn ids(&self) -> Vec<String> {
        self.order.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<FetchableEntry<T>> {
        self.contains(id).then(|| self.entries.get(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.order.read().iter().any(|known| known == id)
    }

    pub fn entries(&self) -> Vec<(String, FetchableEntry<T>)> {
        self.ids()
            .into_iter()
            .map(|id| {
                let entry = self.entries.get(&id);
                (id, entry)
            })
            .collect()
    }

    /// Data of every entry that has some, in order.
    pub fn values(&self) -> Vec<T> {
        self.ids()
            .iter()
            .filter_map(|id| self.entries.data(id))
            .collect()
    }

    pub fn snapshot(&self) -> MapSnapshot<T> {
        let state = self.state.lock();
        MapSnapshot {
            status: state.status.clone(),
            last_fetched_at: state.last_fetched_at,
            items: self.entries(),
        }
    }

    /// Receives the id of every entry that changes.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.entries.subscribe()
    }

    pub fn begin_fetch_all(&self) -> Result<MapTicket, StoreError> {
        let mut state = self.state.lock();
        if state.status == FetchStatus::Pending {
            return Err(StoreError::AlreadyPending("*".to_string()));
        }
        let serial = self.serial.fetch_add(1, Ordering::Relaxed) + 1;
        state.owner = Some(serial);
        state.resume = std::mem::replace(&mut state.status, FetchStatus::Pending);
        Ok(MapTicket { serial })
    }

    /// Merges a fetched collection: the fetched order wins, fetched entries are
    /// fulfilled, entries the portal no longer lists are dropped. An error
    /// only marks the map and keeps every entry.
    pub fn complete_fetch_all<E: Display>(
        &self,
        ticket: MapTicket,
        result: Result<Vec<T>, E>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.owner != Some(ticket.serial) {
            return Err(StoreError::StaleTicket("*".to_string()));
        }
        state.owner = None;

        let items = match result {
            Ok(items) => items,
            Err(err) => {
                state.status = FetchStatus::Error(err.to_string());
                return Ok(());
            }
        };

        let now = Utc::now();
        let mut seen = HashSet::new();
        let mut order = Vec::with_capacity(items.len());
        for item in items {
            let key = item.key();
            if seen.insert(key.clone()) {
                order.push(key.clone());
            }
            self.entries.fulfill(&key, item, now);
        }
        let previous = std::mem::replace(&mut *self.order.write(), order);
        for stale in previous.iter().filter(|id| !seen.contains(*id)) {
            self.entries.remove(stale);
        }

        state.status = FetchStatus::Fulfilled;
        state.last_fetched_at = Some(now);
        Ok(())
    }

    pub fn abandon_fetch_all(&self) -> bool {
        let mut state = self.state.lock();
        if state.owner.take().is_none() {
            return false;
        }
        state.status = std::mem::take(&mut state.resume);
        true
    }

    /// Starts refreshing a single entry.
    pub fn begin_fetch(&self, id: &str) -> Result<Ticket, StoreError> {
        self.entries.begin_fetch(id)
    }

    /// Completes a single-entry refresh. A new id is appended to the order
    /// whatever the outcome, so a failure on it stays visible.
    pub fn complete_fetch<E: Display>(
        &self,
        ticket: Ticket,
        result: Result<T, E>,
    ) -> Result<(), StoreError> {
        let id = ticket.key().to_string();
        self.entries.complete_fetch(ticket, result)?;
        if !self.contains(&id) {
            self.order.write().push(id);
        }
        Ok(())
    }

    pub fn abandon_fetch(&self, id: &str) -> bool {
        self.entries.abandon_fetch(id)
    }
}

/// One [`FetchableMap`] per course.
pub struct PerCourse<T> {
    maps: RwLock<HashMap<String, Arc<FetchableMap<T>>>>,
}

impl<T> Default for PerCourse<T> {
    fn default() -> Self {
        Self {
            maps: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone + Keyed> PerCourse<T> {
    pub fn course(&self, course_id: &str) -> Arc<FetchableMap<T>> {
        if let Some(map) = self.maps.read().get(course_id) {
            return Arc::clone(map);
        }
        let mut maps = self.maps.write();
        Arc::clone(maps.entry(course_id.to_string()).or_default())
    }
}
