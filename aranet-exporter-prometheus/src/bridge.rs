//! Assembly of the bridge for one device.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use aranet_bridge::{
    BridgeState, Clock, Device, Gateway, OnDemandReader, Poller, PollerState, SampleStore,
    SystemClock,
};
use aranet_common::DeviceAddress;

use crate::collector::{CachedCollector, MetricsAdapter, OnDemandCollector};
use crate::config::{BridgeMode, ExporterConfig};
use crate::registry::Registry;

/// JSON body of the `/status` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub mode: BridgeMode,
    pub device: String,
    /// Poller state; absent in pull mode.
    pub poller: Option<PollerState>,
    /// Latest bridge state; absent in pull mode.
    pub state: Option<BridgeState>,
}

/// One device wired to a registry.
///
/// In push mode the caller receives the [`Poller`] from [`Bridge::new`] and
/// is responsible for running it.
pub struct Bridge {
    mode: BridgeMode,
    gateway: Arc<Gateway>,
    store: Option<SampleStore>,
    poller_state: Option<watch::Receiver<PollerState>>,
}

impl Bridge {
    /// Build the bridge and register its collector with `registry`.
    pub fn new(
        device: Arc<dyn Device>,
        address: DeviceAddress,
        config: &ExporterConfig,
        registry: &Registry,
    ) -> (Self, Option<Poller>) {
        Self::with_clock(device, address, config, registry, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new), timestamping state with `clock`.
    pub fn with_clock(
        device: Arc<dyn Device>,
        address: DeviceAddress,
        config: &ExporterConfig,
        registry: &Registry,
        clock: Arc<dyn Clock>,
    ) -> (Self, Option<Poller>) {
        let settings = &config.bridge;
        let gateway = Arc::new(Gateway::new(device, address, settings.gateway_options()));
        let adapter = MetricsAdapter::new(&config.prometheus.prefix);

        info!(device = %address, mode = %settings.mode, "Bridge configured");

        match settings.mode {
            BridgeMode::Push => {
                let (writer, store) = SampleStore::with_clock(clock);
                let poller = Poller::new(
                    gateway.clone(),
                    writer,
                    settings.poll_interval(),
                    settings.retry.build(),
                );
                registry.register(Arc::new(CachedCollector::new(store.clone(), adapter)));

                let bridge = Self {
                    mode: BridgeMode::Push,
                    gateway,
                    store: Some(store),
                    poller_state: Some(poller.subscribe_state()),
                };
                (bridge, Some(poller))
            }
            BridgeMode::Pull => {
                let reader = Arc::new(OnDemandReader::new(gateway.clone()));
                registry.register(Arc::new(OnDemandCollector::new(
                    reader,
                    settings.read_timeout(),
                    adapter,
                )));

                let bridge = Self {
                    mode: BridgeMode::Pull,
                    gateway,
                    store: None,
                    poller_state: None,
                };
                (bridge, None)
            }
        }
    }

    pub fn mode(&self) -> BridgeMode {
        self.mode
    }

    pub fn address(&self) -> &DeviceAddress {
        self.gateway.address()
    }

    /// Latest state in push mode.
    pub fn snapshot(&self) -> Option<Arc<BridgeState>> {
        self.store.as_ref().map(SampleStore::snapshot)
    }

    /// Push mode is ready once a reading exists; pull mode always is.
    pub fn is_ready(&self) -> bool {
        match &self.store {
            Some(store) => store.snapshot().has_reading(),
            None => true,
        }
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            mode: self.mode,
            device: self.address().to_string(),
            poller: self.poller_state.as_ref().map(|rx| *rx.borrow()),
            state: self.snapshot().map(|state| (*state).clone()),
        }
    }
}
