//! Async driver that pairs a [`TimerStore`] with a [`SyncGateway`].
//!
//! The store lock is only held for the synchronous begin/complete steps and
//! never across a request, so operations on different timers overlap and
//! may finish in any order.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::gateway::{SyncFailure, SyncGateway};
use crate::model::{Interval, Timer, TimerId};
use crate::store::{Submission, StoreError, TimerStore};

pub type SharedStore = Arc<Mutex<TimerStore>>;

pub struct SyncedTimers<G> {
    gateway: G,
    store: SharedStore,
}

impl<G: SyncGateway> SyncedTimers<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            gateway,
            store: Arc::new(Mutex::new(TimerStore::new())),
        }
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Fetch the full collection from the authority.
    pub async fn refresh(&self) -> Result<(), SyncFailure> {
        match self.gateway.list().await {
            Ok(timers) => {
                self.store.lock().await.replace_all(timers);
                Ok(())
            }
            Err(failure) => {
                self.store.lock().await.load_failed(failure.clone());
                Err(failure)
            }
        }
    }

    /// Create or update depending on whether `timer` has an id. Resolves to
    /// whether the authority accepted it.
    pub async fn submit(&self, timer: Timer) -> Result<bool, StoreError> {
        let submission = self.store.lock().await.submit(timer.clone())?;
        match submission {
            Submission::Create(ticket) => {
                let result = self.gateway.create(timer).await;
                let id = self.store.lock().await.complete_create(ticket, result)?;
                Ok(id.is_some())
            }
            Submission::Update(id) => {
                let result = self.gateway.update(id, timer).await;
                self.store.lock().await.complete_update(id, result)
            }
        }
    }

    pub async fn request_removal(&self, id: TimerId) -> Result<(), StoreError> {
        self.store.lock().await.request_removal(id)
    }

    pub async fn cancel_removal(&self, id: TimerId) -> Result<(), StoreError> {
        self.store.lock().await.cancel_removal(id)
    }

    /// Send the delete for a timer awaiting confirmation, or retry a failed
    /// one. Resolves to whether the timer is gone.
    pub async fn confirm_removal(&self, id: TimerId) -> Result<bool, StoreError> {
        self.store.lock().await.begin_removal(id)?;
        let result = self.gateway.delete(id).await;
        self.store.lock().await.complete_removal(id, result)
    }

    pub async fn timers(&self) -> Vec<Timer> {
        self.store.lock().await.timers().cloned().collect()
    }

    pub async fn intervals(&self) -> Vec<Interval> {
        self.store.lock().await.intervals().to_vec()
    }

    /// Intervals as the authority derives them, for comparison.
    pub async fn authority_intervals(&self) -> Result<Vec<Interval>, SyncFailure> {
        self.gateway.list_intervals().await
    }
}

// ===========================================================================
// Tests
// ===========================================================================
