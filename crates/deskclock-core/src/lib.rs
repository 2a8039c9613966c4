//! # Deskclock Core Library
//!
//! Alarm lifecycle management for a desk clock: user-configured alarms spawn
//! concrete occurrences ("instances") that move through a persisted state
//! machine driven by wall-clock time, user actions and clock changes.
//!
//! ## Architecture
//!
//! - **Alarm State Manager**: the only writer of instance state. Re-derives
//!   the correct state from the current time, schedules the next wake-up and
//!   updates the parent alarm when an occurrence is consumed
//! - **Storage**: SQLite-backed alarm and instance records plus TOML
//!   configuration; an in-memory store for embedding and tests
//! - **Scheduler**: at-most-once deferred transitions, fenced by an epoch that
//!   every time-change sweep bumps
//! - **Service**: a tokio loop that drives the scheduler and accepts commands
//!
//! ## Key Components
//!
//! - [`AlarmStateManager`]: instance state machine
//! - [`Database`]: alarm, instance and wake-up persistence
//! - [`Config`]: application configuration management
//! - [`NotificationGateway`]: presentation side effects

pub mod alarm;
pub mod clock;
pub mod command;
pub mod error;
pub mod events;
pub mod gateway;
pub mod scheduler;
pub mod service;
pub mod storage;

pub use alarm::{
    Alarm, AlarmId, AlarmInstance, AlarmStateManager, IgnoreReason, InstanceId, InstanceState,
    LibraryResolver, Outcome, Ringtone, RingtoneResolver, SweepSummary, Timing, Weekdays,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, CommandOutput};
pub use error::{ConfigError, CoreError, StoreError, ValidationError};
pub use events::{DeleteReason, Event};
pub use gateway::{Feedback, NotificationGateway, RecordingGateway, TracingGateway};
pub use scheduler::{MemoryScheduler, ScheduledTransition, SqliteScheduler, TransitionScheduler};
pub use service::{AlarmService, ServiceHandle};
pub use storage::{AlarmStore, Config, Database, InstanceFilter, MemoryStore};
