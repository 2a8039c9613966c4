mod instance;
mod manager;
mod model;
mod ringtone;
mod weekdays;

pub use instance::{AlarmInstance, InstanceId, InstanceState, Timing};
pub use manager::{AlarmStateManager, IgnoreReason, Outcome, SweepSummary};
pub use model::{Alarm, AlarmId};
pub use ringtone::{LibraryResolver, Ringtone, RingtoneResolver};
pub use weekdays::Weekdays;
