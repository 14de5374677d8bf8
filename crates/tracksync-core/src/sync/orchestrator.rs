//! The sync pass driver.
//!
//! `fetch -> match -> detect -> resolve -> apply -> aggregate`, one pass at a
//! time per orchestrator. Every outcome, including panics inside the pass,
//! ends up in the returned [`SyncResult`].

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use tracksync_cache::CacheManager;
use uuid::Uuid;

use crate::batch::{BatchFailure, BatchItemError, BatchProcessor, CancellationFlag};
use crate::config::EngineConfig;
use crate::conflict::{ConflictDetector, ConflictResolver, DependencyIndex};
use crate::domain::{
    ConfigError, EventError, IssueKind, Record, RecordPatch, RemoteError, Side, SyncDirection,
    SyncError, SyncFilters, SyncIssue, SyncOptions, SyncResult, ValidatedOptions,
};
use crate::obs;
use crate::remote::{with_timeout, CachedRemoteClient, RemoteClient};
use crate::sync::events::{EventSink, NoopEventSink, SyncEvent};
use crate::sync::matcher::{match_records, MatchOutcome};
use crate::sync::plan::{CounterpartIndex, OpKind, Planner, SyncOp};

/// The pass currently in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassDescriptor {
    pub pass_id: Uuid,
    pub direction: SyncDirection,
    pub dry_run: bool,
    pub force: bool,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_running: bool,
    pub current_pass: Option<PassDescriptor>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Clears the single-flight flag and pass descriptor, even on unwind.
struct PassGuard<'a> {
    running: &'a AtomicBool,
    current: &'a Mutex<Option<PassDescriptor>>,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        *lock(self.current) = None;
        self.running.store(false, Ordering::SeqCst);
    }
}

/// What a successful write did, plus the id it produced when it created one.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Applied {
    kind: OpKind,
    side: Side,
    created: Option<String>,
}

/// A planned create, kept so dependencies left untranslated at planning
/// time can be written once the new ids are known.
struct PlannedCreate {
    op_index: usize,
    origin_side: Side,
    origin: Record,
    planned_dependencies: usize,
}

impl PlannedCreate {
    fn has_untranslated_dependencies(&self) -> bool {
        self.origin.depends_on().len() > self.planned_dependencies
    }
}

pub struct SyncOrchestrator {
    side_a: Arc<dyn RemoteClient>,
    side_b: Arc<dyn RemoteClient>,
    config: Arc<EngineConfig>,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    batch: BatchProcessor,
    events: Arc<dyn EventSink>,
    running: AtomicBool,
    cancel: CancellationFlag,
    current: Mutex<Option<PassDescriptor>>,
    cache: Option<Arc<CacheManager>>,
    sweeper: Option<JoinHandle<()>>,
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl SyncOrchestrator {
    /// `config` is expected to be validated already.
    pub fn new(
        side_a: Arc<dyn RemoteClient>,
        side_b: Arc<dyn RemoteClient>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            side_a,
            side_b,
            detector: ConflictDetector::new(),
            resolver: ConflictResolver::new(config.conflict.clone()),
            batch: BatchProcessor::new(config.batch.clone()),
            config,
            events: Arc::new(NoopEventSink),
            running: AtomicBool::new(false),
            cancel: CancellationFlag::new(),
            current: Mutex::new(None),
            cache: None,
            sweeper: None,
        }
    }

    /// Like [`new`](Self::new), with both sides' fetches cached in `cache`.
    pub fn with_cache(
        side_a: Arc<dyn RemoteClient>,
        side_b: Arc<dyn RemoteClient>,
        config: Arc<EngineConfig>,
        cache: Arc<CacheManager>,
    ) -> Self {
        let side_a: Arc<dyn RemoteClient> =
            Arc::new(CachedRemoteClient::new(side_a, Arc::clone(&cache)));
        let side_b: Arc<dyn RemoteClient> =
            Arc::new(CachedRemoteClient::new(side_b, Arc::clone(&cache)));
        let mut orchestrator = Self::new(side_a, side_b, config);
        orchestrator.cache = Some(cache);
        orchestrator
    }

    /// Build the cache described by `config.cache`, put both sides behind
    /// it, and sweep expired entries every `sweep_interval`. The sweeper
    /// stops when the orchestrator is dropped.
    ///
    /// Must be called inside a tokio runtime.
    pub fn from_config(
        side_a: Arc<dyn RemoteClient>,
        side_b: Arc<dyn RemoteClient>,
        config: Arc<EngineConfig>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache = Arc::new(CacheManager::from_config(&config.cache)?);
        let sweep_interval = config.cache.sweep_interval();
        let mut orchestrator = Self::with_cache(side_a, side_b, config, Arc::clone(&cache));
        orchestrator.sweeper = Some(cache.spawn_sweeper(sweep_interval));
        info!(
            event = "sync.cache_ready",
            backend = %orchestrator.config.cache.backend,
            sweep_interval_ms = sweep_interval.as_millis() as u64,
        );
        Ok(orchestrator)
    }

    /// The fetch cache, when the orchestrator was built with one.
    pub fn cache(&self) -> Option<&Arc<CacheManager>> {
        self.cache.as_ref()
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            is_running: self.running.load(Ordering::SeqCst),
            current_pass: lock(&self.current).clone(),
        }
    }

    /// Ask the running pass to stop. Writes already in flight complete;
    /// nothing is rolled back. Returns `false` when no pass is running.
    pub fn stop(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        info!(event = "sync.stop_requested");
        true
    }

    /// Run one pass. Never fails and never unwinds: every problem is
    /// reported through the result's `errors`.
    pub async fn execute_sync(&self, options: SyncOptions) -> SyncResult {
        let Some(_guard) = self.try_begin() else {
            warn!(event = "sync.rejected", "sync already in progress");
            return SyncResult::failed(SyncIssue::new(
                IssueKind::InProgress,
                SyncError::InProgress.to_string(),
            ));
        };

        let pass_id = Uuid::new_v4();
        let started_at = Utc::now();
        let dry_run = options.dry_run;
        let span = obs::pass_span(pass_id);

        let outcome = AssertUnwindSafe(
            self.run_pass(pass_id, started_at, options)
                .instrument(span.clone()),
        )
        .catch_unwind()
        .await;

        match outcome {
            Ok(result) => result,
            Err(panic) => {
                let mut result = SyncResult::empty(pass_id, started_at, dry_run);
                let error =
                    SyncError::Internal(format!("sync pass panicked: {}", panic_message(&*panic)));
                result.errors.push(SyncIssue::new(IssueKind::Internal, error.to_string()));
                self.conclude(result).instrument(span).await
            }
        }
    }

    fn try_begin(&self) -> Option<PassGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.cancel.reset();
        Some(PassGuard {
            running: &self.running,
            current: &self.current,
        })
    }

    fn client(&self, side: Side) -> &Arc<dyn RemoteClient> {
        match side {
            Side::A => &self.side_a,
            Side::B => &self.side_b,
        }
    }

    async fn run_pass(
        &self,
        pass_id: Uuid,
        started_at: DateTime<Utc>,
        options: SyncOptions,
    ) -> SyncResult {
        let mut result = SyncResult::empty(pass_id, started_at, options.dry_run);

        let options = match options.validate() {
            Ok(options) => options,
            Err(e) => {
                warn!(event = "sync.invalid_options", error = %e);
                result
                    .errors
                    .push(SyncIssue::new(IssueKind::Validation, SyncError::from(e).to_string()));
                return self.conclude(result).await;
            }
        };

        *lock(&self.current) = Some(PassDescriptor {
            pass_id,
            direction: options.direction,
            dry_run: options.dry_run,
            force: options.force,
            started_at,
        });
        obs::emit_pass_started(pass_id, &options);
        self.deliver(
            SyncEvent::Started {
                pass_id,
                options: options.clone(),
                timestamp: Utc::now(),
            },
            &mut result,
        )
        .await;

        if let Err(e) = self.reconcile(&options, &mut result).await {
            let kind = match e {
                SyncError::Cancelled => IssueKind::Cancelled,
                SyncError::Remote(_) => IssueKind::Remote,
                _ => IssueKind::Internal,
            };
            result.errors.push(SyncIssue::new(kind, e.to_string()));
        }
        self.conclude(result).await
    }

    async fn reconcile(
        &self,
        options: &ValidatedOptions,
        result: &mut SyncResult,
    ) -> crate::Result<()> {
        let timeout = self.config.sync.remote_timeout();

        let fetched = self
            .batch
            .process_with_cancel(
                vec![Side::A, Side::B],
                |side| self.fetch(side, &options.filters, options.since, timeout),
                &self.cancel,
            )
            .await;
        if let Some(failure) = fetched.failures.into_iter().next() {
            return Err(self.fetch_error(failure));
        }
        let (mut records_a, mut records_b) = (Vec::new(), Vec::new());
        for success in fetched.successes {
            match success.index {
                0 => records_a = success.output,
                _ => records_b = success.output,
            }
        }
        result.items_a = records_a.len();
        result.items_b = records_b.len();
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        // A narrowed fetch may leave out dependencies that do exist.
        let narrowed = options.since.is_some() || !options.filters.is_empty();
        let index = |records: &[Record]| {
            if narrowed {
                DependencyIndex::partial(records)
            } else {
                DependencyIndex::from_records(records)
            }
        };
        let deps_a = index(&records_a);
        let deps_b = index(&records_b);
        let mut matched = match_records(records_a, records_b, &self.config.matching);
        if options.since.is_some() {
            self.fetch_counterparts(&mut matched, options, timeout).await?;
        }
        let planner = Planner::new(options.direction, options.since, &self.detector);
        let mut plan = planner.plan(matched, &deps_a, &deps_b);
        result.skipped = plan.skipped;
        result.low_confidence_matches = std::mem::take(&mut plan.low_confidence);

        for conflict in &plan.conflicts {
            obs::emit_conflict_detected(result.pass_id, conflict);
            self.deliver(
                SyncEvent::ConflictDetected {
                    pass_id: result.pass_id,
                    conflict: Box::new(conflict.clone()),
                    timestamp: Utc::now(),
                },
                result,
            )
            .await;
        }

        let mut ops = std::mem::take(&mut plan.ops);
        for conflict in plan.conflicts.iter_mut() {
            // Whatever is left once cancelled stays unresolved in the result.
            if self.cancel.is_cancelled() {
                break;
            }
            if self.resolver.resolve(conflict, options.force) {
                ops.extend(planner.resolution_ops(conflict, &plan.counterparts));
            }
        }
        result.conflicts = plan.conflicts;
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        if options.dry_run {
            for op in &ops {
                Self::tally(result, op.kind(), op.target(), false);
            }
            return Ok(());
        }

        let creates = planned_creates(&ops);
        let applied = self
            .batch
            .with_batch_size(options.batch_size)
            .process_with_cancel(ops, |op| self.apply_op(op, timeout), &self.cancel)
            .await;
        let mut created = HashMap::new();
        for success in applied.successes {
            let Applied {
                kind,
                side,
                created: created_id,
            } = success.output;
            if let Some(id) = created_id {
                created.insert(success.index, id);
            }
            Self::tally(result, kind, side, true);
        }
        self.link_created_dependencies(creates, &created, plan.counterparts, timeout)
            .await;
        for failure in applied.failures {
            let kind = match failure.error {
                BatchItemError::Cancelled => IssueKind::Cancelled,
                _ => IssueKind::Apply,
            };
            let message = format!(
                "{} on side {} failed after {} attempt(s): {}",
                failure.item.kind().as_str(),
                failure.item.target(),
                failure.attempts,
                failure.error
            );
            result.errors.push(SyncIssue::for_record(
                kind,
                message,
                failure.item.record().clone(),
            ));
        }
        Ok(())
    }

    async fn fetch(
        &self,
        side: Side,
        filters: &SyncFilters,
        since: Option<DateTime<Utc>>,
        timeout: Duration,
    ) -> Result<Vec<Record>, RemoteError> {
        let client = self.client(side);
        with_timeout(
            client.system(),
            "fetch_records",
            timeout,
            client.fetch_records(filters, since),
        )
        .await
    }

    fn fetch_error(&self, failure: BatchFailure<Side, RemoteError>) -> SyncError {
        match failure.error {
            BatchItemError::Failed(e) => SyncError::Remote(e),
            BatchItemError::TimedOut { timeout_ms } => SyncError::Remote(RemoteError::Timeout {
                system: self.client(failure.item).system().to_string(),
                operation: "fetch_records".to_string(),
                timeout_ms,
            }),
            BatchItemError::Cancelled => SyncError::Cancelled,
        }
    }

    /// An incremental fetch can return a record whose linked counterpart
    /// was not touched since the cursor. Fetch those sides again without
    /// the cursor so one-sided edits still reach the other system.
    async fn fetch_counterparts(
        &self,
        matched: &mut MatchOutcome,
        options: &ValidatedOptions,
        timeout: Duration,
    ) -> crate::Result<()> {
        let sides: Vec<Side> = [Side::A, Side::B]
            .into_iter()
            .filter(|side| !matched.linked_elsewhere(side.other()).is_empty())
            .collect();
        if sides.is_empty() {
            return Ok(());
        }

        let fetched = self
            .batch
            .process_with_cancel(
                sides,
                |side| async move {
                    self.fetch(side, &options.filters, None, timeout)
                        .await
                        .map(|records| (side, records))
                },
                &self.cancel,
            )
            .await;
        if let Some(failure) = fetched.failures.into_iter().next() {
            return Err(self.fetch_error(failure));
        }
        for success in fetched.successes {
            let (side, records) = success.output;
            let waiting = side.other();
            let attached = matched.attach_counterparts(waiting, records);
            debug!(
                event = "sync.counterparts_fetched",
                side = %side,
                attached,
                still_unmatched = matched.linked_elsewhere(waiting).len(),
            );
        }
        Ok(())
    }

    /// Write dependency lists onto records created this pass once their
    /// dependencies' counterparts are known. Failures are logged only.
    async fn link_created_dependencies(
        &self,
        creates: Vec<PlannedCreate>,
        created: &HashMap<usize, String>,
        mut counterparts: CounterpartIndex,
        timeout: Duration,
    ) {
        if !creates.iter().any(PlannedCreate::has_untranslated_dependencies) {
            return;
        }
        for entry in &creates {
            if let Some(id) = created.get(&entry.op_index) {
                counterparts.record_created(entry.origin_side, entry.origin.id(), id);
            }
        }
        for entry in creates.iter().filter(|c| c.has_untranslated_dependencies()) {
            let Some(created_id) = created.get(&entry.op_index) else {
                continue;
            };
            let depends_on = counterparts.translate_dependencies(entry.origin_side, &entry.origin);
            if depends_on.len() <= entry.planned_dependencies {
                continue;
            }
            let client = self.client(entry.origin_side.other());
            let patch = RecordPatch::dependencies(&depends_on);
            if let Err(e) = with_timeout(
                client.system(),
                "update_record",
                timeout,
                client.update_record(created_id, &patch),
            )
            .await
            {
                warn!(record = %created_id, error = %e, "dependency link failed");
            }
        }
    }

    async fn apply_op(&self, op: SyncOp, timeout: Duration) -> Result<Applied, RemoteError> {
        let target = op.target();
        let client = self.client(target);
        let system = client.system();
        let mut created_id = None;

        match &op {
            SyncOp::Create {
                origin,
                content,
                depends_on,
                ..
            } => {
                let draft = origin.counterpart_draft(system, content, depends_on);
                let created =
                    with_timeout(system, "create_record", timeout, client.create_record(&draft))
                        .await?;

                let origin_client = self.client(target.other());
                let link = RecordPatch::link(created.id());
                if let Err(e) = with_timeout(
                    origin_client.system(),
                    "update_record",
                    timeout,
                    origin_client.update_record(origin.id(), &link),
                )
                .await
                {
                    // The new record already references its origin, so the
                    // next pass still pairs them.
                    warn!(origin = %origin.origin, created = %created.origin, error = %e, "link-back failed");
                }
                created_id = Some(created.id().to_string());
            }
            SyncOp::Update { record, patch, .. } => {
                with_timeout(system, "update_record", timeout, client.update_record(&record.id, patch))
                    .await?;
            }
            SyncOp::Delete { record, .. } => {
                with_timeout(system, "delete_record", timeout, client.delete_record(&record.id))
                    .await?;
            }
            SyncOp::Link {
                record,
                counterpart_id,
                ..
            } => {
                let link = RecordPatch::link(counterpart_id.as_str());
                with_timeout(system, "update_record", timeout, client.update_record(&record.id, &link))
                    .await?;
            }
        }
        Ok(Applied {
            kind: op.kind(),
            side: target,
            created: created_id,
        })
    }

    fn tally(result: &mut SyncResult, kind: OpKind, side: Side, applied: bool) {
        match kind {
            OpKind::Create => result.created += 1,
            OpKind::Update => result.updated += 1,
            OpKind::Delete => result.deleted += 1,
            OpKind::Link => result.linked += 1,
        }
        if kind.is_change() {
            result.changes += 1;
            if applied {
                match side {
                    Side::A => result.synced_a += 1,
                    Side::B => result.synced_b += 1,
                }
            }
        }
    }

    /// Settle success and message, emit the terminal event, log the summary.
    async fn conclude(&self, mut result: SyncResult) -> SyncResult {
        // Event delivery problems are reported but never fail a pass.
        result.success = result.errors.iter().all(|e| e.kind == IssueKind::Event);
        result.message = summary(&result);
        result.finish();

        let event = if result.success {
            SyncEvent::Completed {
                pass_id: result.pass_id,
                result: Box::new(result.clone()),
                timestamp: Utc::now(),
            }
        } else {
            SyncEvent::Failed {
                pass_id: result.pass_id,
                error: result.message.clone(),
                timestamp: Utc::now(),
            }
        };
        self.deliver(event, &mut result).await;

        obs::emit_pass_finished(&result);
        result
    }

    async fn deliver(&self, event: SyncEvent, result: &mut SyncResult) {
        let name = event.name();
        let error = match AssertUnwindSafe(self.events.emit(&event))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(panic) => EventError {
                event: name.to_string(),
                reason: format!("sink panicked: {}", panic_message(&*panic)),
            },
        };
        obs::emit_event_delivery_failed(result.pass_id, name, &error);
        result
            .errors
            .push(SyncIssue::new(IssueKind::Event, SyncError::from(error).to_string()));
    }
}

fn planned_creates(ops: &[SyncOp]) -> Vec<PlannedCreate> {
    ops.iter()
        .enumerate()
        .filter_map(|(op_index, op)| match op {
            SyncOp::Create {
                target,
                origin,
                depends_on,
                ..
            } => Some(PlannedCreate {
                op_index,
                origin_side: target.other(),
                origin: origin.clone(),
                planned_dependencies: depends_on.len(),
            }),
            _ => None,
        })
        .collect()
}

fn summary(result: &SyncResult) -> String {
    let unresolved = result.unresolved_conflicts().count();
    let conflicts = format!(
        "{} conflict(s), {} unresolved",
        result.conflicts.len(),
        unresolved
    );
    if !result.success {
        let first = result
            .errors
            .iter()
            .find(|e| e.kind != IssueKind::Event)
            .map(ToString::to_string)
            .unwrap_or_default();
        return format!(
            "sync failed with {} error(s): {}",
            result.errors.len(),
            first
        );
    }
    if result.dry_run {
        format!("dry run: {} change(s) planned; {}", result.changes, conflicts)
    } else {
        format!("synced {} change(s); {}", result.changes, conflicts)
    }
}
