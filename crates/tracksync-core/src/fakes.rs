//! In-memory fakes for the remote and event-sink contracts.
//!
//! `MemoryRemoteClient`, `RecordingEventSink` and `FailingEventSink` satisfy
//! the trait contracts without any external service, and expose knobs for
//! latency and failure injection.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{EventError, Record, RecordPatch, RemoteError, SyncFilters};
use crate::remote::{RemoteClient, RemoteResult};
use crate::sync::events::{EventSink, SyncEvent};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MemoryRemoteClient
// ---------------------------------------------------------------------------

/// Operation selector for scripted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Fetch,
    Create,
    Update,
    Delete,
}

/// One tracker held in memory, in insertion (= fetch) order.
///
/// Deletes are soft: the record stays and is reported as a tombstone.
/// Metadata-only patches (links) leave `updated_at` untouched.
#[derive(Debug)]
pub struct MemoryRemoteClient {
    system: String,
    records: Mutex<Vec<Record>>,
    next_id: AtomicU64,
    latency_ms: AtomicU64,
    unavailable: Mutex<bool>,
    scripted: Mutex<VecDeque<(RemoteOp, RemoteError)>>,
    rejected: Mutex<HashSet<String>>,
    fetches: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryRemoteClient {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            records: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            latency_ms: AtomicU64::new(0),
            unavailable: Mutex::new(false),
            scripted: Mutex::new(VecDeque::new()),
            rejected: Mutex::new(HashSet::new()),
            fetches: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn with_records(system: impl Into<String>, records: Vec<Record>) -> Self {
        let client = Self::new(system);
        for record in records {
            client.insert(record);
        }
        client
    }

    /// Store a record as-is, assigning an id when it has none.
    pub fn insert(&self, mut record: Record) -> Record {
        record.origin.system = self.system.clone();
        if record.origin.id.is_empty() {
            record.origin.id = self.allocate_id();
        }
        lock(&self.records).push(record.clone());
        record
    }

    /// Mutate a stored record in place, simulating an upstream edit.
    pub fn modify(&self, id: &str, edit: impl FnOnce(&mut Record)) -> Option<Record> {
        let mut records = lock(&self.records);
        let record = records.iter_mut().find(|r| r.origin.id == id)?;
        edit(record);
        Some(record.clone())
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        lock(&self.records).iter().find(|r| r.origin.id == id).cloned()
    }

    pub fn records(&self) -> Vec<Record> {
        lock(&self.records).clone()
    }

    pub fn live_records(&self) -> Vec<Record> {
        lock(&self.records)
            .iter()
            .filter(|r| !r.deleted)
            .cloned()
            .collect()
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Every call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        *lock(&self.unavailable) = unavailable;
    }

    /// Fail the next call of `op` with `error`. Scripts queue up in order.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        lock(&self.scripted).push_back((op, error));
    }

    /// Permanently reject writes touching `key`: creates whose title equals
    /// it, and updates or deletes of the record with that id.
    pub fn reject_writes_for(&self, key: impl Into<String>) {
        lock(&self.rejected).insert(key.into());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Successful creates, updates and deletes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Next `<SYSTEM>-<n>` id not already taken by an inserted record.
    fn allocate_id(&self) -> String {
        let records = lock(&self.records);
        loop {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let id = format!("{}-{}", self.system.to_uppercase(), n);
            if !records.iter().any(|r| r.origin.id == id) {
                return id;
            }
        }
    }

    async fn enter(&self, op: RemoteOp, key: Option<&str>) -> RemoteResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if *lock(&self.unavailable) {
            return Err(RemoteError::Unavailable {
                system: self.system.clone(),
                reason: "connection refused".to_string(),
            });
        }
        {
            let mut scripted = lock(&self.scripted);
            if let Some(pos) = scripted.iter().position(|(o, _)| *o == op) {
                if let Some((_, error)) = scripted.remove(pos) {
                    return Err(error);
                }
            }
        }
        if let Some(key) = key {
            if lock(&self.rejected).contains(key) {
                return Err(RemoteError::Rejected {
                    system: self.system.clone(),
                    reason: format!("write to '{key}' refused"),
                });
            }
        }
        Ok(())
    }

    fn not_found(&self, id: &str) -> RemoteError {
        RemoteError::NotFound {
            system: self.system.clone(),
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl RemoteClient for MemoryRemoteClient {
    fn system(&self) -> &str {
        &self.system
    }

    async fn fetch_records(
        &self,
        filters: &SyncFilters,
        since: Option<DateTime<Utc>>,
    ) -> RemoteResult<Vec<Record>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.enter(RemoteOp::Fetch, None).await?;
        Ok(lock(&self.records)
            .iter()
            .filter(|r| filters.matches(r))
            .filter(|r| since.map_or(true, |s| r.updated_at >= s))
            .cloned()
            .collect())
    }

    async fn create_record(&self, record: &Record) -> RemoteResult<Record> {
        self.enter(RemoteOp::Create, Some(&record.title)).await?;
        let mut stored = record.clone();
        stored.origin.id = String::new();
        stored.deleted = false;
        stored.updated_at = Utc::now();
        let stored = self.insert(stored);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn update_record(&self, id: &str, patch: &RecordPatch) -> RemoteResult<Record> {
        self.enter(RemoteOp::Update, Some(id)).await?;
        let updated = self
            .modify(id, |record| {
                record.apply_patch(patch);
                if patch.has_content_changes() {
                    record.updated_at = Utc::now();
                }
            })
            .ok_or_else(|| self.not_found(id))?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn delete_record(&self, id: &str) -> RemoteResult<()> {
        self.enter(RemoteOp::Delete, Some(id)).await?;
        self.modify(id, |record| {
            record.deleted = true;
            record.updated_at = Utc::now();
        })
        .ok_or_else(|| self.not_found(id))?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Event sinks
// ---------------------------------------------------------------------------

/// Keeps every delivered event in order.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        lock(&self.events).clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(SyncEvent::name).collect()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn emit(&self, event: &SyncEvent) -> Result<(), EventError> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

/// Rejects selected events, or panics on them.
#[derive(Debug, Default)]
pub struct FailingEventSink {
    only: Option<&'static str>,
    panic: bool,
}

impl FailingEventSink {
    /// Reject every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject only events named `name` (e.g. `"sync.completed"`).
    pub fn only(name: &'static str) -> Self {
        Self {
            only: Some(name),
            panic: false,
        }
    }

    /// Panic instead of returning an error.
    pub fn panicking() -> Self {
        Self {
            only: None,
            panic: true,
        }
    }
}

#[async_trait]
impl EventSink for FailingEventSink {
    async fn emit(&self, event: &SyncEvent) -> Result<(), EventError> {
        if self.only.is_some_and(|name| name != event.name()) {
            return Ok(());
        }
        if self.panic {
            panic!("event sink exploded on {}", event.name());
        }
        Err(EventError {
            event: event.name().to_string(),
            reason: "sink offline".to_string(),
        })
    }
}
