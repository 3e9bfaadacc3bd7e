//! Valve runner: keeps the relay open exactly while the current time of day
//! falls inside one of the derived intervals.
//!
//! Each pass computes a [`Plan`] from the intervals and the local clock,
//! drives the relay to the planned state, and sleeps until the next interval
//! boundary. A change to the stored timers wakes it early through a
//! [`Notify`], so an edit takes effect immediately.
//!
//! ```text
//! Closed ──[start_time reached]──▶ Open
//!   ▲                               │
//!   └──────[end_time reached]───────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use irrigation_timers::{DayTime, Interval, SECONDS_PER_DAY};
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::state::SharedState;
use crate::valve::ValveBoard;

/// Longest the runner sleeps before re-reading the clock, so a wall-clock
/// jump is picked up within a minute.
const MAX_SLEEP_SEC: u32 = 60;

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    /// Whether the valve should be open right now.
    pub on: bool,
    /// Seconds until the desired state next changes. `None` when it never
    /// does (no intervals, or water all day).
    pub next_change_in: Option<u32>,
}

/// Decide the valve state at `now` and when to look again.
pub fn plan(intervals: &[Interval], now: DayTime) -> Plan {
    let on = intervals.iter().any(|iv| iv.covers(now));
    if intervals.iter().any(Interval::is_full_day) {
        return Plan {
            on,
            next_change_in: None,
        };
    }

    // Intervals never touch, so every bound is a real transition.
    let now_secs = now.as_secs();
    let next_change_in = intervals
        .iter()
        .flat_map(|iv| [iv.start_time, iv.end_time])
        .map(|bound| {
            let ahead = (bound.as_secs() + SECONDS_PER_DAY - now_secs) % SECONDS_PER_DAY;
            if ahead == 0 {
                SECONDS_PER_DAY
            } else {
                ahead
            }
        })
        .min();

    Plan { on, next_change_in }
}

/// Time of day for `now` in the timezone `offset`.
pub fn day_time_at(now: OffsetDateTime, offset: UtcOffset) -> DayTime {
    let local = now.to_offset(offset);
    DayTime::wrapping(
        u32::from(local.hour()) * 3600 + u32::from(local.minute()) * 60 + u32::from(local.second()),
    )
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run the valve loop forever. `offset` is the local timezone, resolved
/// before the runtime started.
pub async fn run(shared: SharedState, mut valve: ValveBoard, wake: Arc<Notify>, offset: UtcOffset) {
    info!(%offset, max_sleep_sec = MAX_SLEEP_SEC, "valve runner started");
    {
        let mut st = shared.write().await;
        st.record_system(format!("valve runner started (utc offset {offset})"));
    }

    loop {
        let now = day_time_at(OffsetDateTime::now_utc(), offset);
        let intervals = shared.read().await.intervals.clone();
        let next = plan(&intervals, now);

        if next.on != valve.is_on() {
            valve.set(next.on);
            info!(
                at = %now,
                on = next.on,
                intervals = intervals.len(),
                "valve switched"
            );
            shared.write().await.record_valve(next.on);
        }

        let wait = next
            .next_change_in
            .map_or(MAX_SLEEP_SEC, |s| s.min(MAX_SLEEP_SEC));
        debug!(at = %now, on = next.on, wait_sec = wait, "runner sleeping");

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(u64::from(wait))) => {}
            _ = wake.notified() => {
                debug!("timers changed, replanning");
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
