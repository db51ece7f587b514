//! Live reads performed from inside a scrape.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use aranet_common::Reading;

use crate::error::Result;
use crate::gateway::Gateway;

/// Outcome of one live read together with how long it took.
#[derive(Debug)]
pub struct Attempt {
    pub result: Result<Reading>,
    pub elapsed: Duration,
}

/// Reads the device on request, one transaction at a time.
///
/// A second caller arriving while a transaction (or its close) is in flight
/// is turned away with [`DeviceError::Busy`](crate::DeviceError::Busy)
/// instead of queueing behind it.
pub struct OnDemandReader {
    gateway: Arc<Gateway>,
}

impl OnDemandReader {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Read the device, returning no later than `timeout`.
    ///
    /// Dropping the returned future mid-read still closes the session.
    pub async fn read_now(&self, timeout: Duration) -> Result<Reading> {
        self.attempt(timeout).await.result
    }

    /// Like [`read_now`](Self::read_now), also reporting the elapsed time.
    pub async fn attempt(&self, timeout: Duration) -> Attempt {
        let started = Instant::now();
        let result = self.gateway.try_read_within(timeout, |_| {}).await;
        Attempt {
            result,
            elapsed: started.elapsed(),
        }
    }
}
