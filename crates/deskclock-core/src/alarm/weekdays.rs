use std::fmt;
use std::str::FromStr;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const ORDER: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Repeat schedule of an alarm: a 7-bit set, bit 0 = Monday .. bit 6 = Sunday.
///
/// The bit layout is fixed and independent of any locale's first day of week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Weekdays(u8);

impl Weekdays {
    pub const NONE: Weekdays = Weekdays(0);
    pub const ALL: Weekdays = Weekdays(0b111_1111);
    pub const WEEKDAYS: Weekdays = Weekdays(0b001_1111);
    pub const WEEKENDS: Weekdays = Weekdays(0b110_0000);

    /// Build from raw bits, rejecting anything above Sunday.
    pub fn from_bits(bits: u8) -> Result<Self, ValidationError> {
        if bits & !Self::ALL.0 != 0 {
            return Err(ValidationError::InvalidWeekdays(bits));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_days(days: &[Weekday]) -> Self {
        days.iter().fold(Self::NONE, |acc, day| acc.with(*day, true))
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & bit(day) != 0
    }

    pub fn with(self, day: Weekday, on: bool) -> Self {
        if on {
            Self(self.0 | bit(day))
        } else {
            Self(self.0 & !bit(day))
        }
    }

    pub fn is_repeating(self) -> bool {
        self.0 != 0
    }

    pub fn days(self) -> impl Iterator<Item = Weekday> {
        ORDER.into_iter().filter(move |d| self.contains(*d))
    }

    /// Days to add to `from` to land on an enabled day; `from` itself counts
    /// as distance 0. `None` when no day is enabled.
    pub fn days_until_next(self, from: Weekday) -> Option<u32> {
        let mut day = from;
        for distance in 0..7 {
            if self.contains(day) {
                return Some(distance);
            }
            day = day.succ();
        }
        None
    }

    /// Days to subtract from `from` to reach the closest enabled day strictly
    /// before it (1..=7). `None` when no day is enabled.
    pub fn days_since_previous(self, from: Weekday) -> Option<u32> {
        let mut day = from;
        for distance in 1..=7 {
            day = day.pred();
            if self.contains(day) {
                return Some(distance);
            }
        }
        None
    }
}

fn bit(day: Weekday) -> u8 {
    1 << day.num_days_from_monday()
}

impl TryFrom<u8> for Weekdays {
    type Error = ValidationError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        Self::from_bits(bits)
    }
}

impl From<Weekdays> for u8 {
    fn from(days: Weekdays) -> Self {
        days.0
    }
}

impl fmt::Display for Weekdays {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_repeating() {
            return f.write_str("never");
        }
        let names: Vec<String> = self.days().map(|d| d.to_string()).collect();
        f.write_str(&names.join(","))
    }
}

impl FromStr for Weekdays {
    type Err = ValidationError;

    /// Accepts `daily`, `weekdays`, `weekends`, `never`, or a comma separated
    /// list of day names (`mon,wed,fri`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "never" | "once" => return Ok(Self::NONE),
            "daily" | "everyday" => return Ok(Self::ALL),
            "weekdays" => return Ok(Self::WEEKDAYS),
            "weekends" => return Ok(Self::WEEKENDS),
            _ => {}
        }
        let mut days = Self::NONE;
        for part in s.split(',') {
            let day = part
                .trim()
                .parse::<Weekday>()
                .map_err(|_| ValidationError::InvalidValue {
                    field: "repeat".into(),
                    message: format!("unknown day '{}'", part.trim()),
                })?;
            days = days.with(day, true);
        }
        Ok(days)
    }
}
