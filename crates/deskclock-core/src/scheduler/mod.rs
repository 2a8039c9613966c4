//! Deferred state transitions.
//!
//! The state manager only ever calls [`TransitionScheduler::schedule`] and
//! [`TransitionScheduler::cancel`]; whoever drives the clock (the
//! [`AlarmService`](crate::service::AlarmService) loop or the CLI `tick`
//! command) drains due entries with [`TransitionScheduler::take_due`] and
//! hands them back to the manager.

mod memory;
mod sqlite;

pub use memory::MemoryScheduler;
pub use sqlite::SqliteScheduler;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::alarm::{InstanceId, InstanceState};
use crate::error::StoreError;

/// A pending wake-up: move `instance_id` into `target` at or after `at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTransition {
    pub instance_id: InstanceId,
    pub target: InstanceState,
    pub at: NaiveDateTime,
    /// Scheduling epoch at the time this was programmed.
    pub epoch: u64,
}

/// At most one pending wake-up per instance; scheduling again supersedes.
pub trait TransitionScheduler: Send + Sync {
    fn schedule(&self, transition: ScheduledTransition) -> Result<(), StoreError>;

    /// Returns whether something was pending. Safe to call at any time.
    fn cancel(&self, instance_id: InstanceId) -> Result<bool, StoreError>;

    fn pending(&self, instance_id: InstanceId) -> Result<Option<ScheduledTransition>, StoreError>;

    /// Remove and return every transition due at `now`, earliest first.
    fn take_due(&self, now: NaiveDateTime) -> Result<Vec<ScheduledTransition>, StoreError>;

    fn next_deadline(&self) -> Result<Option<NaiveDateTime>, StoreError>;
}
