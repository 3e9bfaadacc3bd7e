use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::codec::{self, CodecError, SECONDS_PER_DAY};

/// Identifier assigned by the authority.
pub type TimerId = i64;

/// Longest accepted timer duration (a full day).
pub const MAX_DURATION_SECS: u32 = SECONDS_PER_DAY;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("start time of {0} seconds is outside the day")]
    StartOutOfRange(i64),
    #[error("duration must be between 1 and 86400 seconds, got {0}")]
    DurationOutOfRange(i64),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

// ---------------------------------------------------------------------------
// DayTime
// ---------------------------------------------------------------------------

/// Seconds since local midnight, always in `[0, 86400)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DayTime(u32);

impl DayTime {
    pub const MIDNIGHT: DayTime = DayTime(0);

    pub fn new(seconds: i64) -> Result<Self, ValidationError> {
        if (0..i64::from(SECONDS_PER_DAY)).contains(&seconds) {
            Ok(Self(seconds as u32))
        } else {
            Err(ValidationError::StartOutOfRange(seconds))
        }
    }

    /// Wraps any second count onto the clock, so `86400` becomes midnight.
    pub fn wrapping(seconds: u32) -> Self {
        Self(seconds % SECONDS_PER_DAY)
    }

    pub fn from_hms(hour: u32, minute: u32, second: u32) -> Result<Self, ValidationError> {
        Self::new(i64::from(hour) * 3600 + i64::from(minute) * 60 + i64::from(second))
    }

    pub fn as_secs(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DayTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = codec::encode_day_time(i64::from(self.0)).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl FromStr for DayTime {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(codec::decode_day_time(s)?)
    }
}

impl TryFrom<String> for DayTime {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DayTime> for String {
    fn from(value: DayTime) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// A daily watering entry. `id` is `None` until the authority persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    #[serde(default)]
    pub id: Option<TimerId>,
    pub name: String,
    #[serde(alias = "start_time")]
    pub start_time: DayTime,
    /// Seconds.
    pub duration: u32,
}

impl Timer {
    pub fn new(name: impl Into<String>, start_time: DayTime, duration: u32) -> Self {
        Self {
            id: None,
            name: name.into(),
            start_time,
            duration,
        }
    }

    pub fn with_id(mut self, id: TimerId) -> Self {
        self.id = Some(id);
        self
    }

    /// Field checks shared by input handling and the authority.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if !(1..=MAX_DURATION_SECS).contains(&self.duration) {
            return Err(ValidationError::DurationOutOfRange(i64::from(self.duration)));
        }
        Ok(())
    }
}

/// Raw text as typed by a user, before it is allowed near the store.
#[derive(Debug, Clone, Default)]
pub struct TimerInput {
    pub id: Option<TimerId>,
    pub name: String,
    /// `HH:MM` or `HH:MM:SS`.
    pub start_time: String,
    /// `MM:SS` or `HH:MM:SS`.
    pub duration: String,
}

impl TimerInput {
    pub fn validate(&self) -> Result<Timer, ValidationError> {
        let start_time: DayTime = self.start_time.trim().parse()?;
        let duration = codec::decode_duration(self.duration.trim())?;
        if !(1..=i64::from(MAX_DURATION_SECS)).contains(&duration) {
            return Err(ValidationError::DurationOutOfRange(duration));
        }
        let timer = Timer {
            id: self.id,
            name: self.name.trim().to_string(),
            start_time,
            duration: duration as u32,
        };
        timer.validate()?;
        Ok(timer)
    }
}

// ---------------------------------------------------------------------------
// Interval
// ---------------------------------------------------------------------------

/// A merged period during which water flows.
///
/// `end_time` earlier than `start_time` means the interval runs through
/// midnight; equal bounds mean water flows all day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    pub start_time: DayTime,
    pub end_time: DayTime,
}

impl Interval {
    pub fn spans_midnight(&self) -> bool {
        self.end_time <= self.start_time
    }

    pub fn is_full_day(&self) -> bool {
        self.end_time == self.start_time
    }

    pub fn duration_secs(&self) -> u32 {
        let (start, end) = (self.start_time.as_secs(), self.end_time.as_secs());
        if self.spans_midnight() {
            SECONDS_PER_DAY - start + end
        } else {
            end - start
        }
    }

    /// Whether water flows during the second starting at `t`.
    pub fn covers(&self, t: DayTime) -> bool {
        if self.is_full_day() {
            true
        } else if self.spans_midnight() {
            t >= self.start_time || t < self.end_time
        } else {
            t >= self.start_time && t < self.end_time
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start_time, self.end_time)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
