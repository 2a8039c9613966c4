mod config;
pub mod database;
pub mod memory;
pub mod migrations;

pub use config::Config;
pub use database::Database;
pub use memory::MemoryStore;

use std::path::PathBuf;

use crate::alarm::{Alarm, AlarmId, AlarmInstance, InstanceId, InstanceState};
use crate::error::StoreError;

/// Selection used by [`AlarmStore::instances`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceFilter {
    All,
    /// Every instance whose state is strictly below the given one.
    StateBelow(InstanceState),
    State(InstanceState),
    Alarm(AlarmId),
}

impl InstanceFilter {
    /// Upcoming instances: everything that has not fired yet.
    pub const UPCOMING: InstanceFilter = InstanceFilter::StateBelow(InstanceState::Fired);

    pub fn matches(&self, instance: &AlarmInstance) -> bool {
        match *self {
            InstanceFilter::All => true,
            InstanceFilter::StateBelow(state) => instance.state < state,
            InstanceFilter::State(state) => instance.state == state,
            InstanceFilter::Alarm(alarm_id) => instance.alarm_id == Some(alarm_id),
        }
    }
}

/// Passive record keeper for alarms and their instances.
///
/// Implementations do not enforce any lifecycle rule; the state manager is
/// the only component that decides what gets written.
pub trait AlarmStore: Send + Sync {
    fn get_alarm(&self, id: AlarmId) -> Result<Option<Alarm>, StoreError>;
    fn alarms(&self) -> Result<Vec<Alarm>, StoreError>;
    /// Insert and return the assigned id.
    fn add_alarm(&self, alarm: &Alarm) -> Result<AlarmId, StoreError>;
    /// Returns false if no such alarm exists.
    fn update_alarm(&self, alarm: &Alarm) -> Result<bool, StoreError>;
    fn delete_alarm(&self, id: AlarmId) -> Result<bool, StoreError>;

    fn get_instance(&self, id: InstanceId) -> Result<Option<AlarmInstance>, StoreError>;
    fn instances(&self, filter: InstanceFilter) -> Result<Vec<AlarmInstance>, StoreError>;
    /// Insert and return the assigned id.
    fn add_instance(&self, instance: &AlarmInstance) -> Result<InstanceId, StoreError>;
    /// Returns false if no such instance exists.
    fn update_instance(&self, instance: &AlarmInstance) -> Result<bool, StoreError>;
    fn delete_instance(&self, id: InstanceId) -> Result<bool, StoreError>;
    /// Delete every instance of `alarm_id` except `keep`; returns the count.
    fn delete_other_instances(
        &self,
        alarm_id: AlarmId,
        keep: InstanceId,
    ) -> Result<usize, StoreError>;

    /// Fencing epoch for scheduled transitions.
    fn epoch(&self) -> Result<u64, StoreError>;
    fn set_epoch(&self, epoch: u64) -> Result<(), StoreError>;

    fn instances_for_alarm(&self, alarm_id: AlarmId) -> Result<Vec<AlarmInstance>, StoreError> {
        self.instances(InstanceFilter::Alarm(alarm_id))
    }
}

/// Returns `~/.config/deskclock[-dev]/` based on DESKCLOCK_ENV.
///
/// `DESKCLOCK_DATA_DIR` overrides the location entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let dir = match std::env::var_os("DESKCLOCK_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("DESKCLOCK_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("deskclock-dev")
            } else {
                base_dir.join("deskclock")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
