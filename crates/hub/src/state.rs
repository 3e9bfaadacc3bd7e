use irrigation_timers::{derive_intervals, DayTime, Interval, Timer};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<HubState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct HubState {
    pub started_at: Instant,
    pub valve: ValveState,
    /// Derived from the stored timers; replaced whenever they change.
    pub intervals: Vec<Interval>,
    pub events: VecDeque<HubEvent>,
}

#[derive(Clone, Serialize)]
pub struct ValveState {
    pub on: bool,
    pub gpio_pin: u8,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_changed: Option<OffsetDateTime>,
}

#[derive(Clone, Serialize)]
pub struct HubEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Timer,
    Valve,
    Error,
    System,
}

impl EventKind {
    fn label(self) -> &'static str {
        match self {
            EventKind::Timer => "timer",
            EventKind::Valve => "valve",
            EventKind::Error => "error",
            EventKind::System => "system",
        }
    }
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub valve: ValveState,
    pub intervals: Vec<Interval>,
    /// Interval covering the given time of day, if any.
    pub current: Option<Interval>,
    /// First interval to start after the given time of day.
    pub next: Option<Interval>,
    pub events: Vec<HubEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl HubState {
    pub fn new(gpio_pin: u8) -> Self {
        Self {
            started_at: Instant::now(),
            valve: ValveState {
                on: false,
                gpio_pin,
                last_changed: None,
            },
            intervals: Vec::new(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Re-derive the intervals from the full stored collection.
    pub fn set_timers(&mut self, timers: &[Timer]) {
        self.intervals = derive_intervals(timers);
    }

    /// Record a change to the stored timers.
    pub fn record_timer(&mut self, detail: String) {
        self.push_event(EventKind::Timer, detail);
    }

    /// Record a valve state change.
    pub fn record_valve(&mut self, on: bool) {
        self.valve.on = on;
        self.valve.last_changed = Some(OffsetDateTime::now_utc());

        let state_str = if on { "ON" } else { "OFF" };
        self.push_event(
            EventKind::Valve,
            format!("valve gpio {} set {state_str}", self.valve.gpio_pin),
        );
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// The event log as plain text, oldest first.
    pub fn render_log(&self) -> String {
        let mut out = String::new();
        for e in &self.events {
            let ts = e
                .ts
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| e.ts.unix_timestamp().to_string());
            let _ = writeln!(out, "{ts} [{}] {}", e.kind.label(), e.detail);
        }
        out
    }

    /// Build the JSON-serialisable status snapshot for time of day `now`.
    pub fn to_status(&self, now: DayTime) -> StatusResponse {
        let current = self.intervals.iter().copied().find(|iv| iv.covers(now));
        let next = self
            .intervals
            .iter()
            .copied()
            .find(|iv| iv.start_time > now)
            .or_else(|| self.intervals.first().copied())
            .filter(|iv| Some(*iv) != current);

        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            valve: self.valve.clone(),
            intervals: self.intervals.clone(),
            current,
            next,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(HubEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
