//! Simulated Aranet4 for running the bridge without hardware.
//!
//! Values drift along slow sine waves with a little noise, the battery drains
//! over time, and a configurable share of connection attempts fail the way an
//! out-of-range sensor would.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use aranet_common::{DeviceAddress, DeviceIdentity, Sample};

use crate::device::{Device, Session};
use crate::error::{DeviceError, Result};

/// Simulated device settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Name reported by identify.
    #[serde(default = "default_name")]
    pub name: String,

    /// Firmware version reported by identify.
    #[serde(default = "default_firmware")]
    pub firmware: String,

    /// Total time one transaction takes, split between connect and read.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,

    /// Probability (0.0 - 1.0) that a connection attempt fails.
    #[serde(default)]
    pub failure_rate: f64,

    /// Sampling interval the device reports.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Fixed RNG seed for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_name() -> String {
    "Aranet4 Simulated".to_string()
}

fn default_firmware() -> String {
    "v1.4.19".to_string()
}

fn default_latency_ms() -> u64 {
    1500
}

fn default_interval_secs() -> u64 {
    60
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            firmware: default_firmware(),
            latency_ms: default_latency_ms(),
            failure_rate: 0.0,
            interval_secs: default_interval_secs(),
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(format!(
                "failure_rate must be between 0.0 and 1.0, got {}",
                self.failure_rate
            ));
        }
        if self.interval_secs == 0 {
            return Err("interval_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

struct SimState {
    rng: SmallRng,
    tick: u64,
    battery: f64,
}

/// A [`Device`] that fabricates plausible readings.
pub struct SimulatedDevice {
    config: SimulationConfig,
    failure_rate: f64,
    state: Mutex<SimState>,
}

impl SimulatedDevice {
    pub fn new(config: SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        let failure_rate = if (0.0..=1.0).contains(&config.failure_rate) {
            config.failure_rate
        } else {
            0.0
        };

        Self {
            config,
            failure_rate,
            state: Mutex::new(SimState {
                rng,
                tick: 0,
                battery: 100.0,
            }),
        }
    }

    fn half_latency(&self) -> Duration {
        Duration::from_millis(self.config.latency_ms / 2)
    }

    /// Roll for a failed connect, otherwise produce the next sample.
    fn next_sample(&self) -> Option<Sample> {
        let mut state = self.state.lock();
        if state.rng.random_bool(self.failure_rate) {
            return None;
        }

        state.tick += 1;
        state.battery = (state.battery - 0.05).max(1.0);

        let t = state.tick as f64;
        let co2 = 650.0 + 300.0 * (t * 0.15).sin() + state.rng.random_range(-25.0..25.0);
        let temperature = 21.5 + 1.5 * (t * 0.05).sin() + state.rng.random_range(-0.2..0.2);
        let humidity = 40.0 + 6.0 * (t * 0.07).cos() + state.rng.random_range(-1.0..1.0);
        let pressure = 1013.0 + 4.0 * (t * 0.01).sin() + state.rng.random_range(-0.3..0.3);

        Some(Sample::new(
            co2.max(400.0).round() as u32,
            (temperature * 100.0).round() / 100.0,
            humidity.clamp(0.0, 100.0).round(),
            (pressure * 10.0).round() / 10.0,
            state.battery.round() as u8,
            Duration::from_secs(self.config.interval_secs),
        ))
    }
}

#[async_trait]
impl Device for SimulatedDevice {
    async fn open(&self, address: &DeviceAddress) -> Result<Box<dyn Session>> {
        tokio::time::sleep(self.half_latency()).await;

        let Some(sample) = self.next_sample() else {
            return Err(DeviceError::connect(address, "no response to connection request"));
        };

        Ok(Box::new(SimulatedSession {
            identity: DeviceIdentity::new(&self.config.name, &self.config.firmware),
            sample,
            read_latency: self.half_latency(),
        }))
    }
}

struct SimulatedSession {
    identity: DeviceIdentity,
    sample: Sample,
    read_latency: Duration,
}

#[async_trait]
impl Session for SimulatedSession {
    async fn identify(&mut self) -> Result<DeviceIdentity> {
        Ok(self.identity.clone())
    }

    async fn read_sample(&mut self) -> Result<Sample> {
        tokio::time::sleep(self.read_latency).await;
        Ok(self.sample.clone())
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> DeviceAddress {
        "D4:6B:3C:00:11:22".parse().unwrap()
    }

    fn config() -> SimulationConfig {
        SimulationConfig {
            latency_ms: 0,
            seed: Some(7),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_produces_valid_samples() {
        let device = SimulatedDevice::new(config());

        for _ in 0..200 {
            let mut session = device.open(&address()).await.unwrap();
            let sample = session.read_sample().await.unwrap();
            assert!(sample.validate().is_ok(), "{:?}", sample);
            assert_eq!(sample.interval, Duration::from_secs(60));
            session.close().await;
        }
    }

    #[tokio::test]
    async fn test_reports_configured_identity() {
        let device = SimulatedDevice::new(SimulationConfig {
            name: "Aranet4 Lab".to_string(),
            firmware: "v1.2.0".to_string(),
            ..config()
        });

        let mut session = device.open(&address()).await.unwrap();
        let identity = session.identify().await.unwrap();

        assert_eq!(identity, DeviceIdentity::new("Aranet4 Lab", "v1.2.0"));
    }

    #[tokio::test]
    async fn test_always_failing_device() {
        let device = SimulatedDevice::new(SimulationConfig {
            failure_rate: 1.0,
            ..config()
        });

        let err = device.open(&address()).await.err().unwrap();
        assert!(matches!(err, DeviceError::Connect { .. }));
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config: SimulationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.latency_ms, 1500);
        assert_eq!(config.interval_secs, 60);
        assert!(config.validate().is_ok());

        let bad = SimulationConfig {
            failure_rate: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
