//! Scripted device used in tests to drive the gateway poll by poll.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use aranet_common::{DeviceAddress, DeviceIdentity, Sample};

use crate::device::{Device, Session};
use crate::error::{DeviceError, Result};

/// Session bookkeeping shared between a [`ScriptedDevice`] and its sessions.
#[derive(Debug, Default)]
pub struct SessionStats {
    opened: AtomicUsize,
    closed: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl SessionStats {
    /// Sessions successfully opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sessions closed (repeated closes of one session count once).
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sessions currently open.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of sessions that were open at the same time.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Wait until every opened session has been closed, up to `limit`.
    ///
    /// Closes after a timeout or an abandoned transaction run in a
    /// background task, so tests wait for them here.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, async {
            while self.active() > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .is_ok()
    }

    fn record_open(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn record_close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
enum ReadStep {
    Sample(Sample),
    Error(String),
    Hang,
}

/// What the device does during one poll.
#[derive(Debug, Clone)]
pub struct ScriptedPoll {
    open: std::result::Result<(), String>,
    open_delay: Option<Duration>,
    identify: std::result::Result<DeviceIdentity, String>,
    read: ReadStep,
    read_delay: Option<Duration>,
    close_hangs: bool,
}

impl ScriptedPoll {
    fn with_read(read: ReadStep) -> Self {
        Self {
            open: Ok(()),
            open_delay: None,
            identify: Ok(DeviceIdentity::new("Aranet4 1A2B3", "v1.4.19")),
            read,
            read_delay: None,
            close_hangs: false,
        }
    }

    /// Poll that returns `sample`.
    pub fn ok(sample: Sample) -> Self {
        Self::with_read(ReadStep::Sample(sample))
    }

    /// Poll whose session cannot be opened.
    pub fn connect_error(message: impl Into<String>) -> Self {
        let mut poll = Self::with_read(ReadStep::Error("never read".to_string()));
        poll.open = Err(message.into());
        poll
    }

    /// Poll whose sample read fails.
    pub fn read_error(message: impl Into<String>) -> Self {
        Self::with_read(ReadStep::Error(message.into()))
    }

    /// Poll whose sample read never returns.
    pub fn hang() -> Self {
        Self::with_read(ReadStep::Hang)
    }

    /// Make the identity exchange fail.
    pub fn identify_error(mut self, message: impl Into<String>) -> Self {
        self.identify = Err(message.into());
        self
    }

    /// Report a different identity.
    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identify = Ok(identity);
        self
    }

    /// Delay before the session is handed out.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Delay before the sample read completes.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Make closing the session never complete.
    pub fn with_hanging_close(mut self) -> Self {
        self.close_hangs = true;
        self
    }
}

/// Device that plays back a script of polls.
///
/// Entries are consumed in order; the last entry repeats forever.
pub struct ScriptedDevice {
    script: Mutex<VecDeque<ScriptedPoll>>,
    stats: Arc<SessionStats>,
}

impl ScriptedDevice {
    pub fn new(script: Vec<ScriptedPoll>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            stats: Arc::new(SessionStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.stats.clone()
    }

    fn next_poll(&self) -> Option<ScriptedPoll> {
        let mut script = self.script.lock();
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

#[async_trait]
impl Device for ScriptedDevice {
    async fn open(&self, address: &DeviceAddress) -> Result<Box<dyn Session>> {
        let Some(poll) = self.next_poll() else {
            return Err(DeviceError::connect(address, "script exhausted"));
        };

        if let Some(delay) = poll.open_delay {
            tokio::time::sleep(delay).await;
        }
        if let Err(message) = &poll.open {
            return Err(DeviceError::connect(address, message.clone()));
        }

        self.stats.record_open();
        Ok(Box::new(ScriptedSession {
            poll,
            stats: self.stats.clone(),
            closed: false,
        }))
    }
}

struct ScriptedSession {
    poll: ScriptedPoll,
    stats: Arc<SessionStats>,
    closed: bool,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn identify(&mut self) -> Result<DeviceIdentity> {
        self.poll
            .identify
            .clone()
            .map_err(DeviceError::protocol)
    }

    async fn read_sample(&mut self) -> Result<Sample> {
        if let Some(delay) = self.poll.read_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.poll.read {
            ReadStep::Sample(sample) => Ok(sample.clone()),
            ReadStep::Error(message) => Err(DeviceError::read(message.clone())),
            ReadStep::Hang => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        if self.poll.close_hangs {
            std::future::pending::<()>().await;
        }
        if !self.closed {
            self.closed = true;
            self.stats.record_close();
        }
    }
}
