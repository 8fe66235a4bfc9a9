//! Sync engine for calmirror.
//!
//! Mirrors a remote calendar and a community scheduling service in both
//! directions:
//! - `reconcile` pulls the remote calendar on a timer and writes scheduled entities
//! - `push` turns scheduling service notifications into remote calendar writes
//!
//! Both run against one explicit `SyncContext` holding the identity mapping,
//! the loop guard and the two rate limited dispatch queues. The external
//! systems are reached through the `RemoteCalendar`, `SchedulingService` and
//! `MappingStorage` traits.

pub mod config;
pub mod context;
pub mod date_range;
pub mod error;
pub mod event;
pub mod guard;
pub mod mapping;
pub mod push;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod scheduling;
pub mod translate;

pub use config::SyncConfig;
pub use context::{Collaborators, SyncContext};
pub use date_range::DateRange;
pub use error::{SyncError, SyncResult};
pub use event::*;
pub use mapping::{JsonFileStorage, MappingCounts, MappingSnapshot, MappingStorage, MappingStore};
pub use push::{IgnoreReason, PushHandlers, PushOutcome};
pub use reconcile::{PassReport, ReconciliationEngine};
pub use remote::RemoteCalendar;
pub use retry::RetryPolicy;
pub use scheduling::{Notification, SchedulingService};
