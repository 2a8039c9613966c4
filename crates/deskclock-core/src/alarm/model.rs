use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::instance::AlarmInstance;
use super::ringtone::Ringtone;
use super::weekdays::Weekdays;
use crate::error::ValidationError;

pub type AlarmId = i64;

/// A user-configured alarm that spawns [`AlarmInstance`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    /// Assigned by the store; 0 until persisted.
    pub id: AlarmId,
    pub hour: u32,
    pub minute: u32,
    pub enabled: bool,
    pub repeat: Weekdays,
    pub ringtone: Ringtone,
    pub vibrate: bool,
    /// `None` disables snoozing; a snooze request then dismisses.
    pub snooze_minutes: Option<u32>,
    /// `None` means the alarm rings until acted upon.
    pub auto_silence_minutes: Option<u32>,
    /// How many times a timed-out alarm is auto-snoozed before it is missed.
    pub missed_repeat_limit: u32,
    pub crescendo_secs: u32,
    pub volume: Option<u8>,
    pub label: String,
    /// Only honored for non-repeating alarms.
    pub delete_after_use: bool,
}

impl Alarm {
    /// A non-repeating, enabled alarm with default settings.
    pub fn new(hour: u32, minute: u32) -> Result<Self, ValidationError> {
        validate_time_of_day(hour, minute)?;
        Ok(Self {
            id: 0,
            hour,
            minute,
            enabled: true,
            repeat: Weekdays::NONE,
            ringtone: Ringtone::Default,
            vibrate: true,
            snooze_minutes: Some(10),
            auto_silence_minutes: Some(10),
            missed_repeat_limit: 0,
            crescendo_secs: 0,
            volume: None,
            label: String::new(),
            delete_after_use: false,
        })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_time_of_day(self.hour, self.minute)?;
        Weekdays::from_bits(self.repeat.bits())?;
        if let Ringtone::Uri(uri) = &self.ringtone {
            if !Ringtone::is_storable_uri(uri) {
                return Err(ValidationError::InvalidValue {
                    field: "ringtone".into(),
                    message: format!("'{uri}' is reserved and cannot be used as a ringtone URI"),
                });
            }
        }
        if let Some(volume) = self.volume {
            if volume > 100 {
                return Err(ValidationError::InvalidValue {
                    field: "volume".into(),
                    message: format!("{volume} is above 100"),
                });
            }
        }
        Ok(())
    }

    pub fn time_of_day(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0)
    }

    pub fn is_repeating(&self) -> bool {
        self.repeat.is_repeating()
    }

    /// True when consuming a one-shot occurrence should delete this alarm.
    pub fn deletes_after_use(&self) -> bool {
        self.delete_after_use && !self.is_repeating()
    }

    /// First occurrence strictly after `after`.
    ///
    /// Returns `None` only if the calendar arithmetic overflows.
    pub fn next_alarm_time(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let time = self.time_of_day()?;
        let mut next = after.date().and_time(time);
        if next <= after {
            next = next.checked_add_signed(Duration::days(1))?;
        }
        if let Some(days) = self.repeat.days_until_next(next.weekday()) {
            next = next.checked_add_signed(Duration::days(days.into()))?;
        }
        Some(next)
    }

    /// Most recent occurrence strictly before the date of `reference`, for
    /// repeating alarms only.
    pub fn previous_alarm_time(&self, reference: NaiveDateTime) -> Option<NaiveDateTime> {
        let time = self.time_of_day()?;
        let days = self.repeat.days_since_previous(reference.weekday())?;
        reference
            .date()
            .and_time(time)
            .checked_sub_signed(Duration::days(days.into()))
    }

    /// Build (but do not persist) the first instance after `after`.
    pub fn create_instance_after(&self, after: NaiveDateTime) -> Option<AlarmInstance> {
        self.next_alarm_time(after)
            .map(|time| AlarmInstance::from_alarm(self, time))
    }

    /// Whether switching from `self` to `other` only touches fields that
    /// live instances can absorb in place.
    pub fn is_minor_change(&self, other: &Alarm) -> bool {
        self.id == other.id
            && self.hour == other.hour
            && self.minute == other.minute
            && self.enabled == other.enabled
            && self.repeat == other.repeat
            && self.auto_silence_minutes == other.auto_silence_minutes
            && self.delete_after_use == other.delete_after_use
    }
}

fn validate_time_of_day(hour: u32, minute: u32) -> Result<(), ValidationError> {
    if hour > 23 || minute > 59 {
        return Err(ValidationError::InvalidTimeOfDay { hour, minute });
    }
    Ok(())
}
