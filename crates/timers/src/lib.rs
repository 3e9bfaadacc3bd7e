//! Watering timers, the intervals they produce, and the client-side store
//! that mirrors them from the hub.

pub mod codec;
pub mod gateway;
pub mod intervals;
pub mod model;
pub mod store;
pub mod sync;

pub use codec::{CodecError, SECONDS_PER_DAY};
pub use gateway::{MemoryGateway, SyncFailure, SyncGateway};
pub use intervals::derive_intervals;
pub use model::{DayTime, Interval, Timer, TimerId, TimerInput, ValidationError};
pub use store::{Action, Notice, RowState, StoreError, Submission, TimerStore};
pub use sync::SyncedTimers;
