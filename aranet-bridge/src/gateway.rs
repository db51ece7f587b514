//! Scoped, time-bounded device transactions.
//!
//! One call to [`Gateway::read`] opens a session, identifies the device,
//! reads one sample and closes the session again on every exit path. The
//! whole transaction runs under a single wall-clock budget that does not rely
//! on the transport's own timeouts.
//!
//! The radio link is exclusive. A transaction holds the gateway's link permit
//! from open until its session is closed. When the budget runs out, or the
//! caller stops polling the transaction, the close continues in a background
//! task that keeps the permit until the session is released.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, warn};

use aranet_common::{DeviceAddress, DeviceIdentity, Reading};

use crate::device::{Device, Session};
use crate::error::{DeviceError, Result};

/// Step of a transaction, reported to progress observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Reading,
}

/// Gateway tuning.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Budget for the whole transaction, as seen by the caller.
    pub timeout: Duration,
    /// Budget for closing the session after the transaction.
    pub close_timeout: Duration,
    /// Fail the transaction when the identity exchange fails.
    pub identify_required: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(2),
            identify_required: false,
        }
    }
}

/// Performs read transactions against a single device.
pub struct Gateway {
    device: Arc<dyn Device>,
    address: DeviceAddress,
    options: GatewayOptions,
    /// Held from open until close; at most one session exists at a time.
    link: Arc<AsyncMutex<()>>,
    /// Last identity the device reported, reused when identify fails.
    identity: Mutex<Option<DeviceIdentity>>,
}

impl Gateway {
    pub fn new(device: Arc<dyn Device>, address: DeviceAddress, options: GatewayOptions) -> Self {
        Self {
            device,
            address,
            options,
            link: Arc::new(AsyncMutex::new(())),
            identity: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// The default transaction budget.
    pub fn timeout(&self) -> Duration {
        self.options.timeout
    }

    /// Identity from the most recent successful identify, if any.
    pub fn cached_identity(&self) -> Option<DeviceIdentity> {
        self.identity.lock().clone()
    }

    /// Perform one transaction with the default budget.
    pub async fn read(&self) -> Result<Reading> {
        self.read_within(self.options.timeout, |_| {}).await
    }

    /// Perform one transaction that returns within `budget`.
    ///
    /// Waits for the link if another transaction still holds it; the wait
    /// counts against `budget`. The bound covers the close as well: a close
    /// that has not finished by the deadline is left to a background task.
    /// `progress` is called when the transaction enters each [`Phase`].
    pub async fn read_within<F>(&self, budget: Duration, progress: F) -> Result<Reading>
    where
        F: FnMut(Phase) + Send,
    {
        let started = Instant::now();
        let deadline = started + budget;

        let link = match timeout_at(deadline, self.link.clone().lock_owned()).await {
            Ok(link) => link,
            Err(_) => {
                debug!(device = %self.address, ?budget, "Link still held, timed out waiting");
                return Err(DeviceError::Timeout { budget });
            }
        };
        self.transaction(link, started, budget, progress).await
    }

    /// Like [`read_within`](Self::read_within), but fails with
    /// [`DeviceError::Busy`] instead of waiting for the link.
    pub async fn try_read_within<F>(&self, budget: Duration, progress: F) -> Result<Reading>
    where
        F: FnMut(Phase) + Send,
    {
        let started = Instant::now();
        let Ok(link) = self.link.clone().try_lock_owned() else {
            debug!(device = %self.address, "Read rejected, device busy");
            return Err(DeviceError::Busy);
        };
        self.transaction(link, started, budget, progress).await
    }

    async fn transaction<F>(
        &self,
        link: OwnedMutexGuard<()>,
        started: Instant,
        budget: Duration,
        mut progress: F,
    ) -> Result<Reading>
    where
        F: FnMut(Phase) + Send,
    {
        let deadline = started + budget;

        progress(Phase::Connecting);
        let session = match timeout_at(deadline, self.device.open(&self.address)).await {
            Ok(result) => result?,
            Err(_) => {
                debug!(device = %self.address, ?budget, "Open timed out");
                return Err(DeviceError::Timeout { budget });
            }
        };
        let mut open = OpenSession {
            session: Some(session),
            link: Some(link),
            address: self.address,
            close_timeout: self.options.close_timeout,
        };

        progress(Phase::Reading);
        let outcome = timeout_at(deadline, self.transact(open.session()?)).await;

        let closed = match open.close_in_background() {
            Some(close) => timeout_at(deadline, close).await.is_ok(),
            None => true,
        };
        if !closed {
            debug!(device = %self.address, "Budget spent, session closes in the background");
        }

        debug!(
            device = %self.address,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = matches!(outcome, Ok(Ok(_))),
            "Transaction finished"
        );

        match outcome {
            Ok(result) => result,
            Err(_) => Err(DeviceError::Timeout { budget }),
        }
    }

    async fn transact(&self, session: &mut dyn Session) -> Result<Reading> {
        let identity = match session.identify().await {
            Ok(identity) => {
                *self.identity.lock() = Some(identity.clone());
                identity
            }
            Err(e) if self.options.identify_required => {
                return Err(match e {
                    DeviceError::Protocol(_) => e,
                    other => DeviceError::protocol(other.to_string()),
                });
            }
            Err(e) => {
                let fallback = self.cached_identity().unwrap_or_else(DeviceIdentity::unknown);
                warn!(
                    device = %self.address,
                    error = %e,
                    name = %fallback.name,
                    "Identify failed, continuing with last known identity"
                );
                fallback
            }
        };

        let sample = session.read_sample().await?;
        sample
            .validate()
            .map_err(|reason| DeviceError::read(format!("implausible sample: {}", reason)))?;

        Ok(Reading::new(identity, sample))
    }
}

/// An open session together with the link permit it holds.
///
/// Dropping it with the session still open (the caller abandoned the
/// transaction) closes the session in a background task.
struct OpenSession {
    session: Option<Box<dyn Session>>,
    link: Option<OwnedMutexGuard<()>>,
    address: DeviceAddress,
    close_timeout: Duration,
}

impl OpenSession {
    fn session(&mut self) -> Result<&mut dyn Session> {
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(DeviceError::read("session already closed")),
        }
    }

    /// Move the session into a task that closes it and then frees the link.
    fn close_in_background(&mut self) -> Option<JoinHandle<()>> {
        let session = self.session.take()?;
        let link = self.link.take();
        Some(tokio::spawn(close_session(
            session,
            link,
            self.address,
            self.close_timeout,
        )))
    }
}

impl Drop for OpenSession {
    fn drop(&mut self) {
        if self.session.is_none() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            debug!(device = %self.address, "Transaction abandoned, closing session");
            self.close_in_background();
        } else {
            warn!(device = %self.address, "No runtime left to close the session");
        }
    }
}

async fn close_session(
    mut session: Box<dyn Session>,
    link: Option<OwnedMutexGuard<()>>,
    address: DeviceAddress,
    close_timeout: Duration,
) {
    if timeout(close_timeout, session.close()).await.is_err() {
        warn!(
            device = %address,
            ?close_timeout,
            "Session close did not complete in time"
        );
    }
    drop(link);
}
