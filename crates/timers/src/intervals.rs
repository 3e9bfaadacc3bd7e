//! Timer → interval derivation.
//!
//! Every timer contributes a window `[start, start + duration)` on a linear
//! day. Windows that run past midnight are split in two, then all windows are
//! sorted and swept into maximal merges. Finally a merge ending at midnight
//! and a merge starting at midnight are the same watering period and are
//! rejoined into one interval that spans midnight.
//!
//! A duration of a whole day (or more) covers every second; the result is the
//! full-day interval `00:00:00 - 00:00:00`.

use crate::codec::SECONDS_PER_DAY;
use crate::model::{DayTime, Interval, Timer};

/// Half-open `[start, end)` on the linear day, `end <= 86400`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Window {
    start: u32,
    end: u32,
}

/// Derive the minimal, start-ordered set of intervals covering every second
/// any of `timers` is watering.
pub fn derive_intervals<'a, I>(timers: I) -> Vec<Interval>
where
    I: IntoIterator<Item = &'a Timer>,
{
    let mut windows = Vec::new();
    for timer in timers {
        push_windows(timer.start_time.as_secs(), timer.duration, &mut windows);
    }
    emit(merge(windows))
}

fn push_windows(start: u32, duration: u32, out: &mut Vec<Window>) {
    if duration == 0 {
        return;
    }
    if duration >= SECONDS_PER_DAY {
        out.push(Window {
            start: 0,
            end: SECONDS_PER_DAY,
        });
        return;
    }

    let end = start + duration;
    if end > SECONDS_PER_DAY {
        out.push(Window {
            start,
            end: SECONDS_PER_DAY,
        });
        out.push(Window {
            start: 0,
            end: end - SECONDS_PER_DAY,
        });
    } else {
        out.push(Window { start, end });
    }
}

/// Sort by start (ties by end) and sweep touching or overlapping windows
/// together.
fn merge(mut windows: Vec<Window>) -> Vec<Window> {
    windows.sort_unstable();

    let mut merged: Vec<Window> = Vec::with_capacity(windows.len());
    for w in windows {
        match merged.last_mut() {
            Some(current) if w.start <= current.end => {
                current.end = current.end.max(w.end);
            }
            _ => merged.push(w),
        }
    }
    merged
}

fn emit(merged: Vec<Window>) -> Vec<Interval> {
    let to_interval = |start: u32, end: u32| Interval {
        start_time: DayTime::wrapping(start),
        end_time: DayTime::wrapping(end),
    };

    let wraps = merged.len() >= 2
        && merged.first().is_some_and(|w| w.start == 0)
        && merged.last().is_some_and(|w| w.end == SECONDS_PER_DAY);

    if !wraps {
        return merged.iter().map(|w| to_interval(w.start, w.end)).collect();
    }

    // The period straddling midnight starts latest, so it goes last.
    let first = merged[0];
    let last = merged[merged.len() - 1];
    let mut out: Vec<Interval> = merged[1..merged.len() - 1]
        .iter()
        .map(|w| to_interval(w.start, w.end))
        .collect();
    out.push(to_interval(last.start, first.end));
    out
}

// ===========================================================================
// Tests
// ===========================================================================
