//! Background polling for the cached-push mode.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::gateway::{Gateway, Phase};
use crate::retry::RetryPolicy;
use crate::store::{SampleStore, StoreWriter};

/// Where the poller currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    Idle,
    Connecting,
    Reading,
    Committing,
    Backoff,
}

impl From<Phase> for PollerState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Connecting => PollerState::Connecting,
            Phase::Reading => PollerState::Reading,
        }
    }
}

/// Reads the device on a timer and commits results to the store.
///
/// The poller owns the store's only writer.
pub struct Poller {
    gateway: Arc<Gateway>,
    writer: StoreWriter,
    interval: Duration,
    retry: Box<dyn RetryPolicy>,
    state: watch::Sender<PollerState>,
}

impl Poller {
    pub fn new(
        gateway: Arc<Gateway>,
        writer: StoreWriter,
        interval: Duration,
        retry: Box<dyn RetryPolicy>,
    ) -> Self {
        let (state, _) = watch::channel(PollerState::Idle);
        Self {
            gateway,
            writer,
            interval,
            retry,
            state,
        }
    }

    /// Read handle onto the store this poller writes.
    pub fn store(&self) -> SampleStore {
        self.writer.reader()
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    /// Perform one attempt and return the delay before the next one.
    pub async fn poll_once(&mut self) -> Duration {
        let started = Instant::now();
        let state = &self.state;

        let result = self
            .gateway
            .read_within(self.gateway.timeout(), |phase| {
                state.send_replace(phase.into());
            })
            .await;
        let elapsed = started.elapsed();

        match result {
            Ok(reading) => {
                self.state.send_replace(PollerState::Committing);
                debug!(
                    device = %self.gateway.address(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "{}",
                    reading
                );
                self.writer.commit(reading, elapsed);
                self.state.send_replace(PollerState::Idle);
                self.retry.next_delay(self.interval, 0)
            }
            Err(e) => {
                let failures = self.writer.record_failure(e.kind(), elapsed);
                let delay = self.retry.next_delay(self.interval, failures);
                warn!(
                    device = %self.gateway.address(),
                    kind = %e.kind(),
                    attempt = failures,
                    elapsed_ms = elapsed.as_millis() as u64,
                    retry_in_secs = delay.as_secs(),
                    error = %e,
                    "Poll failed"
                );
                self.state.send_replace(PollerState::Backoff);
                delay
            }
        }
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    ///
    /// The first attempt happens immediately. An in-flight transaction is
    /// always allowed to finish so its session gets closed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            device = %self.gateway.address(),
            interval_secs = self.interval.as_secs(),
            retry = self.retry.name(),
            "Starting poller"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = self.poll_once().await;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.state.send_replace(PollerState::Idle);
        info!(device = %self.gateway.address(), "Poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fake::{ScriptedDevice, ScriptedPoll};
    use crate::gateway::GatewayOptions;
    use crate::retry::{ExponentialBackoff, FixedInterval};
    use aranet_common::{DeviceAddress, Sample};

    const MINUTE: Duration = Duration::from_secs(60);

    fn sample(co2: u32) -> Sample {
        Sample::new(co2, 21.5, 40.0, 1013.0, 85, MINUTE)
    }

    fn poller(device: Arc<ScriptedDevice>, retry: Box<dyn RetryPolicy>) -> Poller {
        let address: DeviceAddress = "D4:6B:3C:00:11:22".parse().unwrap();
        let gateway = Arc::new(Gateway::new(device, address, GatewayOptions::default()));
        let (writer, _) = SampleStore::new();
        Poller::new(gateway, writer, MINUTE, retry)
    }

    #[tokio::test]
    async fn test_connect_error_then_success() {
        let device = Arc::new(ScriptedDevice::new(vec![
            ScriptedPoll::connect_error("out of range"),
            ScriptedPoll::ok(sample(650)),
        ]));
        let mut poller = poller(device.clone(), Box::new(FixedInterval));
        let store = poller.store();

        poller.poll_once().await;
        let state = store.snapshot();
        assert!(state.last_reading.is_none());
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.last_error, Some(ErrorKind::Connect));
        assert_eq!(poller.state(), PollerState::Backoff);

        poller.poll_once().await;
        let state = store.snapshot();
        assert_eq!(state.last_reading.as_ref().unwrap().sample.co2, 650);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(poller.state(), PollerState::Idle);
        assert_eq!(device.stats().closed(), device.stats().opened());
    }

    #[tokio::test]
    async fn test_failure_keeps_last_reading() {
        let device = Arc::new(ScriptedDevice::new(vec![
            ScriptedPoll::ok(sample(650)),
            ScriptedPoll::read_error("crc mismatch"),
        ]));
        let mut poller = poller(device, Box::new(FixedInterval));
        let store = poller.store();

        poller.poll_once().await;
        poller.poll_once().await;
        poller.poll_once().await;

        let state = store.snapshot();
        assert_eq!(state.last_reading.as_ref().unwrap().sample.co2, 650);
        assert_eq!(state.consecutive_failures, 2);
        assert_eq!(state.last_error, Some(ErrorKind::Read));
    }

    #[tokio::test]
    async fn test_delay_follows_retry_policy() {
        let device = Arc::new(ScriptedDevice::new(vec![
            ScriptedPoll::connect_error("asleep"),
        ]));
        let retry = ExponentialBackoff::new(Duration::from_secs(600));
        let mut poller = poller(device, Box::new(retry));

        assert_eq!(poller.poll_once().await, MINUTE);
        assert_eq!(poller.poll_once().await, Duration::from_secs(120));
        assert_eq!(poller.poll_once().await, Duration::from_secs(240));
    }

    #[tokio::test]
    async fn test_success_waits_full_interval() {
        let device = Arc::new(ScriptedDevice::new(vec![ScriptedPoll::ok(sample(650))]));
        let mut poller = poller(device, Box::new(ExponentialBackoff::new(MINUTE * 10)));

        assert_eq!(poller.poll_once().await, MINUTE);
    }

    #[tokio::test]
    async fn test_state_passes_through_phases() {
        let device = Arc::new(ScriptedDevice::new(vec![ScriptedPoll::ok(sample(650))]));
        let mut poller = poller(device, Box::new(FixedInterval));
        let mut states = poller.subscribe_state();

        poller.poll_once().await;

        // Receiver only keeps the latest value; the cycle ends idle
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), PollerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_on_interval_until_shutdown() {
        let device = Arc::new(ScriptedDevice::new(vec![ScriptedPoll::ok(sample(650))]));
        let poller = poller(device.clone(), Box::new(FixedInterval));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(poller.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(device.stats().opened(), 1);

        tokio::time::sleep(MINUTE).await;
        assert_eq!(device.stats().opened(), 2);

        tokio::time::sleep(MINUTE).await;
        assert_eq!(device.stats().opened(), 3);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(device.stats().closed(), 3);
        assert_eq!(device.stats().max_active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_hanging_device() {
        let device = Arc::new(ScriptedDevice::new(vec![ScriptedPoll::hang()]));
        let poller = poller(device.clone(), Box::new(FixedInterval));
        let store = poller.store();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(poller.run(shutdown_rx));

        // Default budget is 10s; after two cycles both sessions are closed
        tokio::time::sleep(MINUTE * 2).await;
        let state = store.snapshot();
        assert_eq!(state.consecutive_failures, 2);
        assert_eq!(state.last_error, Some(ErrorKind::Timeout));
        assert_eq!(device.stats().active(), 0);

        drop(shutdown_tx);
        handle.await.unwrap();
    }
}
