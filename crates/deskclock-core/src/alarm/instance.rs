use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use super::model::{Alarm, AlarmId};
use super::ringtone::Ringtone;
use crate::error::ValidationError;

pub type InstanceId = i64;

/// Lifecycle state of an [`AlarmInstance`].
///
/// Variants are declared in severity order; `Ord` is used for comparisons
/// such as "every state below `Fired`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Silent,
    Notification,
    Snooze,
    Fired,
    Missed,
    Predismissed,
    /// Never persisted: an instance entering this state is deleted.
    Dismissed,
}

impl InstanceState {
    pub const ALL: [InstanceState; 7] = [
        InstanceState::Silent,
        InstanceState::Notification,
        InstanceState::Snooze,
        InstanceState::Fired,
        InstanceState::Missed,
        InstanceState::Predismissed,
        InstanceState::Dismissed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceState::Silent => "silent",
            InstanceState::Notification => "notification",
            InstanceState::Snooze => "snooze",
            InstanceState::Fired => "fired",
            InstanceState::Missed => "missed",
            InstanceState::Predismissed => "predismissed",
            InstanceState::Dismissed => "dismissed",
        }
    }

    /// Still waiting to fire.
    pub fn is_upcoming(self) -> bool {
        self < InstanceState::Fired
    }

    /// The parent alarm has already been advanced past this instance.
    pub fn parent_advanced(self) -> bool {
        matches!(self, InstanceState::Missed | InstanceState::Predismissed)
    }

    /// Whether a requested transition into `target` still makes sense for an
    /// instance currently in `self`. Anything else is a stale trigger.
    pub fn accepts(self, target: InstanceState) -> bool {
        use InstanceState::*;
        match target {
            Silent | Notification => matches!(self, Silent | Notification),
            Fired => matches!(self, Silent | Notification | Snooze | Fired),
            Snooze | Missed => self == Fired,
            Predismissed => matches!(self, Silent | Notification | Snooze | Fired),
            Dismissed => self != Dismissed,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == lowered)
            .ok_or_else(|| ValidationError::UnknownState(s.to_string()))
    }
}

/// Time boundaries shared by every instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Grace window after the fire time in which a re-registration still
    /// fires instead of marking the instance missed.
    pub fire_buffer: Duration,
    /// How long before the fire time the upcoming notification appears.
    pub notification_lead: Duration,
    /// How long a missed instance is kept before it is dismissed.
    pub missed_ttl: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            fire_buffer: Duration::seconds(15),
            notification_lead: Duration::hours(2),
            missed_ttl: Duration::hours(12),
        }
    }
}

/// One scheduled occurrence of an alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmInstance {
    /// Assigned by the store; 0 until persisted.
    pub id: InstanceId,
    /// `None` once the parent is gone; orphans are never re-armed.
    pub alarm_id: Option<AlarmId>,
    fire_time: NaiveDateTime,
    pub state: InstanceState,
    pub ringtone: Ringtone,
    pub vibrate: bool,
    pub label: String,
    pub volume: Option<u8>,
    pub crescendo_secs: u32,
    pub snooze_minutes: Option<u32>,
    pub auto_silence_minutes: Option<u32>,
    /// Times this instance was snoozed instead of missed on timeout.
    pub timeout_snoozes: u32,
}

impl AlarmInstance {
    pub fn new(alarm_id: Option<AlarmId>, fire_time: NaiveDateTime) -> Self {
        Self {
            id: 0,
            alarm_id,
            fire_time: truncate_to_minute(fire_time),
            state: InstanceState::Silent,
            ringtone: Ringtone::Default,
            vibrate: true,
            label: String::new(),
            volume: None,
            crescendo_secs: 0,
            snooze_minutes: Some(10),
            auto_silence_minutes: Some(10),
            timeout_snoozes: 0,
        }
    }

    /// Capture the per-occurrence settings of `alarm`.
    pub fn from_alarm(alarm: &Alarm, fire_time: NaiveDateTime) -> Self {
        let mut instance = Self::new(Some(alarm.id), fire_time);
        instance.auto_silence_minutes = alarm.auto_silence_minutes;
        instance.copy_minor_fields(alarm);
        instance
    }

    /// Copy the fields an alarm edit may change without re-scheduling.
    /// The ringtone is only copied while the occurrence has not fired; once
    /// it rings, the resolved ringtone stays.
    pub fn copy_minor_fields(&mut self, alarm: &Alarm) {
        if self.state < InstanceState::Fired {
            self.ringtone = alarm.ringtone.clone();
        }
        self.vibrate = alarm.vibrate;
        self.label = alarm.label.clone();
        self.volume = alarm.volume;
        self.crescendo_secs = alarm.crescendo_secs;
        self.snooze_minutes = alarm.snooze_minutes;
    }

    pub fn fire_time(&self) -> NaiveDateTime {
        self.fire_time
    }

    /// Instances fire on minute boundaries; seconds are dropped.
    pub fn set_fire_time(&mut self, fire_time: NaiveDateTime) {
        self.fire_time = truncate_to_minute(fire_time);
    }

    pub fn notification_time(&self, timing: &Timing) -> NaiveDateTime {
        self.fire_time - timing.notification_lead
    }

    pub fn fire_deadline(&self, timing: &Timing) -> NaiveDateTime {
        self.fire_time + timing.fire_buffer
    }

    /// When a firing instance is auto-silenced, if ever.
    pub fn timeout(&self) -> Option<NaiveDateTime> {
        self.auto_silence_minutes
            .map(|minutes| self.fire_time + Duration::minutes(minutes.into()))
    }

    pub fn missed_ttl(&self, timing: &Timing) -> NaiveDateTime {
        self.fire_time + timing.missed_ttl
    }
}

fn truncate_to_minute(time: NaiveDateTime) -> NaiveDateTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}
