//! The device capability consumed by the gateway.
//!
//! A [`Device`] is the transport-specific driver (BLE for a real Aranet4).
//! Each call to [`Device::open`] yields a fresh [`Session`] that holds the
//! exclusive radio link until [`Session::close`] is called.

use async_trait::async_trait;

use aranet_common::{DeviceAddress, DeviceIdentity, Sample};

use crate::error::Result;

/// A sensor that can be opened by address.
#[async_trait]
pub trait Device: Send + Sync {
    /// Establish a session with the device.
    ///
    /// Fails with [`DeviceError::Connect`](crate::DeviceError::Connect) when
    /// the device is out of range, asleep or held by another client.
    async fn open(&self, address: &DeviceAddress) -> Result<Box<dyn Session>>;
}

/// An open, exclusive connection to the device.
#[async_trait]
pub trait Session: Send {
    /// Fetch the device name and firmware version.
    async fn identify(&mut self) -> Result<DeviceIdentity>;

    /// Read the current measurements.
    async fn read_sample(&mut self) -> Result<Sample>;

    /// Release the session. Must be idempotent and must not fail.
    async fn close(&mut self);
}
