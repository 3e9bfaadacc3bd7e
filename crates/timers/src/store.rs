//! Client-side mirror of the authority's timers.
//!
//! The visible collection only ever changes when the authority acknowledges
//! a request, so it always shows the last known good authority state. Each
//! persisted timer carries a [`RowState`]; creates in flight live outside the
//! collection as [`PendingCreate`]s.
//!
//! ```text
//!            submit(id)                    ack / fail
//!   Idle ───────────────▶ Updating ───────────────────▶ Idle
//!    │
//!    │ request_removal        begin_removal              ack
//!    └──────▶ ConfirmingRemoval ─────────▶ Removing ─────────▶ (gone)
//!                 │  ▲                       │  ▲
//!   cancel_removal│  │                  fail │  │ begin_removal (retry)
//!                 ▼  │                       ▼  │
//!                Idle ◀──cancel_removal── RemovalFailed
//! ```

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::gateway::SyncFailure;
use crate::intervals::derive_intervals;
use crate::model::{Interval, Timer, TimerId};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowState {
    Idle,
    /// Edit sent; the row keeps showing its pre-edit values until the ack.
    Updating { pending: Timer },
    ConfirmingRemoval,
    Removing,
    RemovalFailed { reason: String },
}

impl RowState {
    pub fn name(&self) -> &'static str {
        match self {
            RowState::Idle => "idle",
            RowState::Updating { .. } => "updating",
            RowState::ConfirmingRemoval => "confirming removal",
            RowState::Removing => "removing",
            RowState::RemovalFailed { .. } => "removal failed",
        }
    }

    /// A request for this row is waiting on the authority.
    pub fn in_flight(&self) -> bool {
        matches!(self, RowState::Updating { .. } | RowState::Removing)
    }
}

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle for one create awaiting the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CreateTicket(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCreate {
    pub ticket: CreateTicket,
    pub timer: Timer,
}

/// Where a submitted timer was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Create(CreateTicket),
    Update(TimerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Load,
    Create,
    Update,
    Remove,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Load => "loading timers",
            Action::Create => "adding timer",
            Action::Update => "updating timer",
            Action::Remove => "removing timer",
        })
    }
}

/// A failure the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub action: Action,
    pub timer: Option<TimerId>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no timer with id {0}")]
    UnknownTimer(TimerId),
    #[error("no pending create for {0:?}")]
    UnknownTicket(CreateTicket),
    #[error("timer {id} is {state}")]
    InvalidTransition { id: TimerId, state: &'static str },
}

#[derive(Debug, Clone)]
struct Entry {
    timer: Timer,
    state: RowState,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct TimerStore {
    entries: BTreeMap<TimerId, Entry>,
    creating: Vec<PendingCreate>,
    intervals: Vec<Interval>,
    notices: Vec<Notice>,
    next_ticket: u64,
}

impl TimerStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- views --------------------------------------------------------------

    /// Persisted timers in id order.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> {
        self.entries.values().map(|e| &e.timer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: TimerId) -> Option<&Timer> {
        self.entries.get(&id).map(|e| &e.timer)
    }

    pub fn state(&self, id: TimerId) -> Option<&RowState> {
        self.entries.get(&id).map(|e| &e.state)
    }

    pub fn pending_creates(&self) -> &[PendingCreate] {
        &self.creating
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Drain the failure notices recorded since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // -- loading ------------------------------------------------------------

    /// Adopt the authority's full collection. Every row returns to idle.
    pub fn replace_all(&mut self, timers: Vec<Timer>) {
        self.entries.clear();
        for timer in timers {
            let Some(id) = timer.id else {
                warn!(name = %timer.name, "authority listed a timer without an id");
                continue;
            };
            self.entries.insert(
                id,
                Entry {
                    timer,
                    state: RowState::Idle,
                },
            );
        }
        info!(timers = self.entries.len(), "timers loaded");
        self.recompute();
    }

    pub fn load_failed(&mut self, failure: SyncFailure) {
        self.notify(Action::Load, None, failure.reason);
    }

    // -- create / update ----------------------------------------------------

    /// Route by identity: a timer with an id is an update, one without is a
    /// create.
    pub fn submit(&mut self, timer: Timer) -> Result<Submission, StoreError> {
        match timer.id {
            Some(id) => self.begin_update(id, timer).map(|()| Submission::Update(id)),
            None => Ok(Submission::Create(self.begin_create(timer))),
        }
    }

    pub fn begin_create(&mut self, mut timer: Timer) -> CreateTicket {
        timer.id = None;
        let ticket = CreateTicket(self.next_ticket);
        self.next_ticket += 1;
        debug!(?ticket, name = %timer.name, "create sent");
        self.creating.push(PendingCreate { ticket, timer });
        ticket
    }

    /// Returns the new id when the authority accepted the timer.
    pub fn complete_create(
        &mut self,
        ticket: CreateTicket,
        result: Result<Timer, SyncFailure>,
    ) -> Result<Option<TimerId>, StoreError> {
        let pos = self
            .creating
            .iter()
            .position(|p| p.ticket == ticket)
            .ok_or(StoreError::UnknownTicket(ticket))?;
        self.creating.remove(pos);

        let timer = match result {
            Ok(timer) => timer,
            Err(failure) => {
                self.notify(Action::Create, None, failure.reason);
                return Ok(None);
            }
        };
        let Some(id) = timer.id else {
            self.notify(
                Action::Create,
                None,
                "authority returned a timer without an id".to_string(),
            );
            return Ok(None);
        };

        if self.entries.contains_key(&id) {
            warn!(id, "created timer already present, replacing");
        }
        info!(id, name = %timer.name, "timer created");
        self.entries.insert(
            id,
            Entry {
                timer,
                state: RowState::Idle,
            },
        );
        self.recompute();
        Ok(Some(id))
    }

    pub fn begin_update(&mut self, id: TimerId, mut timer: Timer) -> Result<(), StoreError> {
        let entry = self.entry_mut(id)?;
        if entry.state != RowState::Idle {
            return Err(invalid(id, &entry.state));
        }
        timer.id = Some(id);
        entry.state = RowState::Updating { pending: timer };
        debug!(id, "update sent");
        Ok(())
    }

    /// Returns whether the edit was applied.
    pub fn complete_update(
        &mut self,
        id: TimerId,
        result: Result<Timer, SyncFailure>,
    ) -> Result<bool, StoreError> {
        let entry = self.entry_mut(id)?;
        if !matches!(entry.state, RowState::Updating { .. }) {
            return Err(invalid(id, &entry.state));
        }
        entry.state = RowState::Idle;

        match result {
            Ok(mut timer) if timer.id.is_none() || timer.id == Some(id) => {
                timer.id = Some(id);
                entry.timer = timer;
                info!(id, "timer updated");
                self.recompute();
                Ok(true)
            }
            Ok(other) => {
                self.notify(
                    Action::Update,
                    Some(id),
                    format!("authority answered with timer {:?}", other.id),
                );
                Ok(false)
            }
            Err(failure) => {
                self.notify(Action::Update, Some(id), failure.reason);
                Ok(false)
            }
        }
    }

    // -- removal ------------------------------------------------------------

    /// First step of a delete. Nothing is sent yet.
    pub fn request_removal(&mut self, id: TimerId) -> Result<(), StoreError> {
        let entry = self.entry_mut(id)?;
        if entry.state != RowState::Idle {
            return Err(invalid(id, &entry.state));
        }
        entry.state = RowState::ConfirmingRemoval;
        Ok(())
    }

    /// Back out of a delete that is awaiting confirmation or has failed.
    pub fn cancel_removal(&mut self, id: TimerId) -> Result<(), StoreError> {
        let entry = self.entry_mut(id)?;
        if !awaiting_removal(&entry.state) {
            return Err(invalid(id, &entry.state));
        }
        entry.state = RowState::Idle;
        Ok(())
    }

    /// Confirm a delete, or retry one that failed.
    pub fn begin_removal(&mut self, id: TimerId) -> Result<(), StoreError> {
        let entry = self.entry_mut(id)?;
        if !awaiting_removal(&entry.state) {
            return Err(invalid(id, &entry.state));
        }
        entry.state = RowState::Removing;
        debug!(id, "delete sent");
        Ok(())
    }

    /// Returns whether the timer is gone.
    pub fn complete_removal(
        &mut self,
        id: TimerId,
        result: Result<(), SyncFailure>,
    ) -> Result<bool, StoreError> {
        let entry = self.entry_mut(id)?;
        if entry.state != RowState::Removing {
            return Err(invalid(id, &entry.state));
        }

        match result {
            Ok(()) => {
                self.entries.remove(&id);
                info!(id, "timer removed");
                self.recompute();
                Ok(true)
            }
            Err(failure) => {
                entry.state = RowState::RemovalFailed {
                    reason: failure.reason.clone(),
                };
                self.notify(Action::Remove, Some(id), failure.reason);
                Ok(false)
            }
        }
    }

    // -- internals ----------------------------------------------------------

    fn entry_mut(&mut self, id: TimerId) -> Result<&mut Entry, StoreError> {
        self.entries.get_mut(&id).ok_or(StoreError::UnknownTimer(id))
    }

    fn recompute(&mut self) {
        self.intervals = derive_intervals(self.entries.values().map(|e| &e.timer));
    }

    fn notify(&mut self, action: Action, timer: Option<TimerId>, reason: String) {
        warn!(%action, ?timer, %reason, "authority request failed");
        self.notices.push(Notice {
            action,
            timer,
            reason,
        });
    }
}

fn awaiting_removal(state: &RowState) -> bool {
    matches!(
        state,
        RowState::ConfirmingRemoval | RowState::RemovalFailed { .. }
    )
}

fn invalid(id: TimerId, state: &RowState) -> StoreError {
    StoreError::InvalidTransition {
        id,
        state: state.name(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
