use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// CO2 level (ppm) at which air quality stops being rated good.
pub const CO2_MODERATE_PPM: u32 = 1000;

/// CO2 level (ppm) at which air quality is rated poor.
pub const CO2_POOR_PPM: u32 = 1400;

/// A single completed sensor reading.
///
/// Samples are immutable once built: the gateway constructs one per
/// successful read transaction and nothing downstream edits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Relative humidity in percent (0-100).
    pub humidity: f64,

    /// Atmospheric pressure in hPa.
    pub pressure: f64,

    /// Temperature in degrees Celsius.
    pub temperature: f64,

    /// CO2 concentration in parts per million.
    pub co2: u32,

    /// Battery level in percent (0-100).
    pub battery: u8,

    /// Air quality rating derived by the device.
    pub air_quality: AirQuality,

    /// Measurement interval configured on the device.
    pub interval: Duration,

    /// When the sample was captured.
    pub captured_at: DateTime<Utc>,
}

impl Sample {
    /// Create a new sample captured now, rating air quality from the CO2 level.
    pub fn new(
        co2: u32,
        temperature: f64,
        humidity: f64,
        pressure: f64,
        battery: u8,
        interval: Duration,
    ) -> Self {
        Self {
            humidity,
            pressure,
            temperature,
            co2,
            battery,
            air_quality: AirQuality::from_co2(co2),
            interval,
            captured_at: Utc::now(),
        }
    }

    /// Override the capture timestamp.
    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Check that every field holds a physically plausible value.
    pub fn validate(&self) -> Result<(), String> {
        if !self.temperature.is_finite() {
            return Err(format!("temperature is not finite: {}", self.temperature));
        }
        if !self.humidity.is_finite() || !(0.0..=100.0).contains(&self.humidity) {
            return Err(format!("humidity out of range: {}", self.humidity));
        }
        if !self.pressure.is_finite() || self.pressure <= 0.0 {
            return Err(format!("pressure out of range: {}", self.pressure));
        }
        if self.battery > 100 {
            return Err(format!("battery out of range: {}", self.battery));
        }
        Ok(())
    }
}

/// Air quality rating, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AirQuality {
    Good,
    Moderate,
    Poor,
}

impl AirQuality {
    /// Rate air quality from a CO2 concentration.
    pub fn from_co2(co2: u32) -> Self {
        if co2 < CO2_MODERATE_PPM {
            AirQuality::Good
        } else if co2 < CO2_POOR_PPM {
            AirQuality::Moderate
        } else {
            AirQuality::Poor
        }
    }

    /// Ordinal value (1 = good, 3 = poor).
    pub fn ordinal(&self) -> u8 {
        match self {
            AirQuality::Good => 1,
            AirQuality::Moderate => 2,
            AirQuality::Poor => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AirQuality::Good => "good",
            AirQuality::Moderate => "moderate",
            AirQuality::Poor => "poor",
        }
    }
}

impl std::fmt::Display for AirQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Name and firmware version reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: String,
    pub firmware: String,
}

impl DeviceIdentity {
    pub fn new(name: impl Into<String>, firmware: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            firmware: firmware.into(),
        }
    }

    /// Placeholder used when the device never answered an identity request.
    pub fn unknown() -> Self {
        Self::new("unknown", "unknown")
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }
}

/// A sample together with the identity of the device that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub identity: DeviceIdentity,
    pub sample: Sample,
}

impl Reading {
    pub fn new(identity: DeviceIdentity, sample: Sample) -> Self {
        Self { identity, sample }
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = &self.sample;
        write!(
            f,
            "{} ({}): CO2={}ppm T={}°C H={}% P={}hPa battery={}% quality={} interval={}s",
            self.identity.name,
            self.identity.firmware,
            s.co2,
            s.temperature,
            s.humidity,
            s.pressure,
            s.battery,
            s.air_quality,
            s.interval.as_secs()
        )
    }
}
