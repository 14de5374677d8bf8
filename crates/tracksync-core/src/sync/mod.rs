//! Sync pass orchestration: matching, planning, events and the driver.

pub mod events;
pub mod matcher;
pub mod orchestrator;
pub mod plan;

pub use events::{EventSink, NoopEventSink, SyncEvent, TracingEventSink};
pub use matcher::{match_records, MatchOutcome, MatchedPair, TitleMatchPolicy};
pub use orchestrator::{PassDescriptor, SyncOrchestrator, SyncStatus};
pub use plan::{CounterpartIndex, DirectionStrategy, OpKind, Plan, Planner, SyncOp};
