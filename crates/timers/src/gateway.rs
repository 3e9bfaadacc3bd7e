//! The boundary to the authority that durably stores timers.

use std::collections::BTreeMap;
use std::future::Future;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::intervals::derive_intervals;
use crate::model::{Interval, Timer, TimerId};

/// The authority rejected a request or could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct SyncFailure {
    pub reason: String,
}

impl SyncFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Remote system of record for timers.
///
/// Every call resolves to success or a [`SyncFailure`] with a readable reason;
/// nothing finer grained crosses this boundary.
pub trait SyncGateway: Send + Sync {
    fn list(&self) -> impl Future<Output = Result<Vec<Timer>, SyncFailure>> + Send;

    /// `timer.id` is `None`; the returned timer carries the assigned id.
    fn create(&self, timer: Timer) -> impl Future<Output = Result<Timer, SyncFailure>> + Send;

    /// Full replace of the timer with `id`.
    fn update(
        &self,
        id: TimerId,
        timer: Timer,
    ) -> impl Future<Output = Result<Timer, SyncFailure>> + Send;

    fn delete(&self, id: TimerId) -> impl Future<Output = Result<(), SyncFailure>> + Send;

    /// Intervals as derived by the authority itself.
    fn list_intervals(&self) -> impl Future<Output = Result<Vec<Interval>, SyncFailure>> + Send;
}

// ---------------------------------------------------------------------------
// In-process authority
// ---------------------------------------------------------------------------

/// An authority living in memory. Ids are the lowest free positive integer.
#[derive(Default)]
pub struct MemoryGateway {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    timers: BTreeMap<TimerId, Timer>,
    offline: bool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timers(timers: impl IntoIterator<Item = Timer>) -> Self {
        let mut inner = MemoryInner::default();
        for timer in timers {
            let id = timer.id.unwrap_or_else(|| inner.next_id());
            inner.timers.insert(id, timer.with_id(id));
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// While offline every request fails as unreachable.
    pub async fn set_offline(&self, offline: bool) {
        self.inner.lock().await.offline = offline;
    }

    pub async fn snapshot(&self) -> Vec<Timer> {
        self.inner.lock().await.timers.values().cloned().collect()
    }
}

impl MemoryInner {
    fn next_id(&self) -> TimerId {
        let mut candidate = 1;
        for &id in self.timers.keys() {
            if id != candidate {
                break;
            }
            candidate += 1;
        }
        candidate
    }

    fn reachable(&self) -> Result<(), SyncFailure> {
        if self.offline {
            Err(SyncFailure::new("authority unreachable"))
        } else {
            Ok(())
        }
    }
}

impl SyncGateway for MemoryGateway {
    async fn list(&self) -> Result<Vec<Timer>, SyncFailure> {
        let inner = self.inner.lock().await;
        inner.reachable()?;
        Ok(inner.timers.values().cloned().collect())
    }

    async fn create(&self, timer: Timer) -> Result<Timer, SyncFailure> {
        let mut inner = self.inner.lock().await;
        inner.reachable()?;
        if timer.id.is_some() {
            return Err(SyncFailure::new("timer cannot be created with an id"));
        }
        timer
            .validate()
            .map_err(|e| SyncFailure::new(format!("invalid timer: {e}")))?;

        let id = inner.next_id();
        let stored = timer.with_id(id);
        inner.timers.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update(&self, id: TimerId, timer: Timer) -> Result<Timer, SyncFailure> {
        let mut inner = self.inner.lock().await;
        inner.reachable()?;
        timer
            .validate()
            .map_err(|e| SyncFailure::new(format!("invalid timer: {e}")))?;
        match inner.timers.get_mut(&id) {
            Some(slot) => {
                *slot = timer.with_id(id);
                Ok(slot.clone())
            }
            None => Err(SyncFailure::new(format!("timer {id} not found"))),
        }
    }

    async fn delete(&self, id: TimerId) -> Result<(), SyncFailure> {
        let mut inner = self.inner.lock().await;
        inner.reachable()?;
        inner
            .timers
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| SyncFailure::new(format!("timer {id} not found")))
    }

    async fn list_intervals(&self) -> Result<Vec<Interval>, SyncFailure> {
        let inner = self.inner.lock().await;
        inner.reachable()?;
        Ok(derive_intervals(inner.timers.values()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
