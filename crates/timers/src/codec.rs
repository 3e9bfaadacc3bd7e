//! Text encodings for the two kinds of time value a timer carries.
//!
//! A wall-clock start time is written `HH:MM:SS` (or `HH:MM` from a time
//! picker), while a duration is written `MM:SS` (or `HH:MM:SS` once it reaches
//! an hour). Both decode to a plain count of seconds, but the two-component
//! forms mean different things: `"10:00"` is ten o'clock as a day time and ten
//! minutes as a duration. Always use the pair that matches the field.

use thiserror::Error;

/// Seconds in one day.
pub const SECONDS_PER_DAY: u32 = 86_400;

/// Durations must fit a two-digit hour field.
const MAX_ENCODABLE_DURATION: i64 = 3600 * 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("{0} seconds cannot be encoded as a time")]
    Range(i64),
    #[error("invalid time '{text}': {reason}")]
    Format { text: String, reason: &'static str },
}

// ---------------------------------------------------------------------------
// Day time ("HH:MM:SS")
// ---------------------------------------------------------------------------

/// Format seconds since midnight as zero-padded `HH:MM:SS`.
pub fn encode_day_time(seconds: i64) -> Result<String, CodecError> {
    if seconds < 0 {
        return Err(CodecError::Range(seconds));
    }
    let (h, m, s) = split_hms(seconds);
    Ok(format!("{h:02}:{m:02}:{s:02}"))
}

/// Parse `HH:MM:SS` or `HH:MM` into seconds since midnight.
///
/// A missing seconds field is zero. Upper bounds are not checked here.
pub fn decode_day_time(text: &str) -> Result<i64, CodecError> {
    let parts = components(text)?;
    match parts.as_slice() {
        [h, m] => Ok(h * 3600 + m * 60),
        [h, m, s] => Ok(h * 3600 + m * 60 + s),
        _ => Err(format_error(text, "expected HH:MM or HH:MM:SS")),
    }
}

// ---------------------------------------------------------------------------
// Duration ("MM:SS")
// ---------------------------------------------------------------------------

/// Format a duration as `MM:SS`, or `HH:MM:SS` when it is an hour or longer.
pub fn encode_duration(seconds: i64) -> Result<String, CodecError> {
    if !(0..MAX_ENCODABLE_DURATION).contains(&seconds) {
        return Err(CodecError::Range(seconds));
    }
    let (h, m, s) = split_hms(seconds);
    if h == 0 {
        Ok(format!("{m:02}:{s:02}"))
    } else {
        Ok(format!("{h:02}:{m:02}:{s:02}"))
    }
}

/// Parse `MM:SS` or `HH:MM:SS` into seconds. Missing leading fields are zero.
pub fn decode_duration(text: &str) -> Result<i64, CodecError> {
    let parts = components(text)?;
    match parts.as_slice() {
        [m, s] => Ok(m * 60 + s),
        [h, m, s] => Ok(h * 3600 + m * 60 + s),
        _ => Err(format_error(text, "expected MM:SS or HH:MM:SS")),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn split_hms(seconds: i64) -> (i64, i64, i64) {
    (seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

fn components(text: &str) -> Result<Vec<i64>, CodecError> {
    text.split(':')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format_error(text, "components must be numeric"));
            }
            part.parse::<u32>()
                .map(i64::from)
                .map_err(|_| format_error(text, "component too large"))
        })
        .collect()
}

fn format_error(text: &str, reason: &'static str) -> CodecError {
    CodecError::Format {
        text: text.to_string(),
        reason,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
