//! Translation of bridge state into metrics.
//!
//! [`CachedCollector`] serves the poller's latest snapshot and never touches
//! the device. [`OnDemandCollector`] performs a live read inside `collect`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use aranet_bridge::{BridgeState, OnDemandReader, SampleStore};
use aranet_common::Reading;

use crate::mapping::{build_metric_name, format_interval};
use crate::registry::{Collector, Metric};

/// Builds metric families under one name prefix.
#[derive(Debug, Clone)]
pub struct MetricsAdapter {
    prefix: String,
}

impl MetricsAdapter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn name(&self, dimension: &str) -> String {
        build_metric_name(&self.prefix, dimension)
    }

    /// One gauge per measurement, labeled with the device identity.
    pub fn reading_metrics(&self, reading: &Reading) -> Vec<Metric> {
        let sample = &reading.sample;
        let labels = [
            ("name".to_string(), reading.identity.name.clone()),
            ("version".to_string(), reading.identity.firmware.clone()),
            ("interval".to_string(), format_interval(sample.interval)),
        ];

        [
            ("humidity", "Aranet4 - humidity (percentage)", sample.humidity),
            ("pressure", "Aranet4 - pressure (hPa)", sample.pressure),
            ("temperature", "Aranet4 - temperature (celsius)", sample.temperature),
            ("co2", "Aranet4 - CO2 (ppm)", sample.co2 as f64),
            ("battery", "Aranet4 - battery (percentage)", sample.battery as f64),
        ]
        .into_iter()
        .map(|(dimension, help, value)| {
            Metric::gauge(self.name(dimension), help, value).with_labels(&labels)
        })
        .collect()
    }

    pub fn up(&self, up: bool) -> Metric {
        Metric::gauge(
            self.name("up"),
            "Whether a reading is currently exposed (1) or not (0)",
            if up { 1.0 } else { 0.0 },
        )
    }

    pub fn read_duration(&self, elapsed: Duration) -> Metric {
        Metric::gauge(
            self.name("read_duration_seconds"),
            "Wall time of the last device transaction",
            elapsed.as_secs_f64(),
        )
    }

    /// Everything a push-mode scrape exposes for `state`.
    pub fn snapshot_metrics(
        &self,
        state: &BridgeState,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Vec<Metric> {
        let mut metrics = Vec::with_capacity(13);

        if let Some(reading) = &state.last_reading {
            metrics.extend(self.reading_metrics(reading));
        }
        metrics.push(self.up(state.last_reading.is_some()));

        metrics.push(Metric::counter(
            self.name("read_attempts_total"),
            "Device read attempts since the bridge started",
            state.attempts as f64,
        ));

        metrics.push(Metric::gauge(
            self.name("consecutive_failures"),
            "Failed device reads since the last success",
            state.consecutive_failures as f64,
        ));

        if let Some(at) = state.last_attempt_at {
            metrics.push(Metric::gauge(
                self.name("last_attempt_timestamp_seconds"),
                "Unix time of the last device read attempt",
                timestamp_seconds(at),
            ));
        }

        if let Some(at) = state.last_success_at {
            metrics.push(Metric::gauge(
                self.name("last_success_timestamp_seconds"),
                "Unix time of the last successful device read",
                timestamp_seconds(at),
            ));
        }

        if let Some(age) = state.reading_age(now) {
            metrics.push(Metric::gauge(
                self.name("sample_age_seconds"),
                "Seconds since the exposed reading was taken",
                age.as_secs_f64(),
            ));
        }

        if let Some(elapsed) = state.last_read_duration {
            metrics.push(self.read_duration(elapsed));
        }

        if let Some(kind) = state.last_error {
            metrics.push(
                Metric::gauge(
                    self.name("last_error"),
                    "Kind of the most recent failure since the last success",
                    1.0,
                )
                .with_label("kind", kind.as_str()),
            );
        }

        metrics
    }
}

fn timestamp_seconds(at: chrono::DateTime<chrono::Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

/// Push-mode collector: renders the latest snapshot.
pub struct CachedCollector {
    store: SampleStore,
    adapter: MetricsAdapter,
}

impl CachedCollector {
    pub fn new(store: SampleStore, adapter: MetricsAdapter) -> Self {
        Self { store, adapter }
    }
}

#[async_trait]
impl Collector for CachedCollector {
    async fn collect(&self) -> Vec<Metric> {
        let state = self.store.snapshot();
        self.adapter.snapshot_metrics(&state, self.store.now())
    }
}

/// Pull-mode collector: reads the device during the scrape.
pub struct OnDemandCollector {
    reader: Arc<OnDemandReader>,
    timeout: Duration,
    adapter: MetricsAdapter,
}

impl OnDemandCollector {
    pub fn new(reader: Arc<OnDemandReader>, timeout: Duration, adapter: MetricsAdapter) -> Self {
        Self {
            reader,
            timeout,
            adapter,
        }
    }
}

#[async_trait]
impl Collector for OnDemandCollector {
    async fn collect(&self) -> Vec<Metric> {
        let attempt = self.reader.attempt(self.timeout).await;

        let mut metrics = match &attempt.result {
            Ok(reading) => {
                let mut metrics = self.adapter.reading_metrics(reading);
                metrics.push(self.adapter.up(true));
                metrics
            }
            Err(e) => {
                warn!(
                    device = %self.reader.gateway().address(),
                    kind = %e.kind(),
                    elapsed_ms = attempt.elapsed.as_millis() as u64,
                    error = %e,
                    "Live read failed"
                );
                vec![self.adapter.up(false)]
            }
        };

        metrics.push(self.adapter.read_duration(attempt.elapsed));
        metrics
    }
}
