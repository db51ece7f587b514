//! Most recent reading plus failure bookkeeping.
//!
//! The store is single-writer, multi-reader. [`SampleStore::new`] hands out
//! exactly one [`StoreWriter`] (not `Clone`, mutating methods take
//! `&mut self`) and any number of [`SampleStore`] read handles. Each update
//! builds a complete new [`BridgeState`] and swaps it in under a briefly held
//! lock, so a snapshot is always a state that existed after one specific
//! operation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use aranet_common::Reading;

use crate::clock::{Clock, SystemClock};
use crate::error::ErrorKind;

/// Point-in-time view of the bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BridgeState {
    /// Last successfully read sample and the identity it came with.
    pub last_reading: Option<Reading>,
    /// Classification of the most recent failure since the last success.
    pub last_error: Option<ErrorKind>,
    /// When the last attempt (successful or not) finished.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the last successful attempt finished.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Failed attempts since the last success.
    pub consecutive_failures: u64,
    /// Wall time the last attempt took.
    pub last_read_duration: Option<Duration>,
    /// Total attempts recorded.
    pub attempts: u64,
}

impl BridgeState {
    pub fn has_reading(&self) -> bool {
        self.last_reading.is_some()
    }

    /// True while the exposed reading is not from the latest attempt.
    pub fn is_stale(&self) -> bool {
        self.consecutive_failures > 0
    }

    /// Time since the last successful read.
    pub fn reading_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_success_at
            .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
    }
}

struct Shared {
    state: RwLock<Arc<BridgeState>>,
    clock: Arc<dyn Clock>,
}

/// Read handle to the bridge state.
#[derive(Clone)]
pub struct SampleStore {
    shared: Arc<Shared>,
}

/// The only handle allowed to change the bridge state.
pub struct StoreWriter {
    shared: Arc<Shared>,
}

impl SampleStore {
    /// Create an empty store timestamped by the system clock.
    pub fn new() -> (StoreWriter, SampleStore) {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store timestamped by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> (StoreWriter, SampleStore) {
        let shared = Arc::new(Shared {
            state: RwLock::new(Arc::new(BridgeState::default())),
            clock,
        });
        (
            StoreWriter {
                shared: shared.clone(),
            },
            SampleStore { shared },
        )
    }

    /// Consistent copy of the current state.
    pub fn snapshot(&self) -> Arc<BridgeState> {
        self.shared.state.read().clone()
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.shared.clock.now()
    }
}

impl StoreWriter {
    /// Replace the reading and reset the failure streak.
    pub fn commit(&mut self, reading: Reading, elapsed: Duration) {
        let now = self.shared.clock.now();
        let attempts = self.current().attempts + 1;

        self.swap(BridgeState {
            last_reading: Some(reading),
            last_error: None,
            last_attempt_at: Some(now),
            last_success_at: Some(now),
            consecutive_failures: 0,
            last_read_duration: Some(elapsed),
            attempts,
        });
    }

    /// Record a failed attempt, keeping the last reading untouched.
    ///
    /// Returns the new consecutive failure count.
    pub fn record_failure(&mut self, kind: ErrorKind, elapsed: Duration) -> u64 {
        let now = self.shared.clock.now();
        let current = self.current();
        let failures = current.consecutive_failures + 1;

        self.swap(BridgeState {
            last_error: Some(kind),
            last_attempt_at: Some(now),
            consecutive_failures: failures,
            last_read_duration: Some(elapsed),
            attempts: current.attempts + 1,
            ..(*current).clone()
        });

        failures
    }

    /// A read handle onto the same state.
    pub fn reader(&self) -> SampleStore {
        SampleStore {
            shared: self.shared.clone(),
        }
    }

    fn current(&self) -> Arc<BridgeState> {
        self.shared.state.read().clone()
    }

    fn swap(&mut self, next: BridgeState) {
        *self.shared.state.write() = Arc::new(next);
    }
}
