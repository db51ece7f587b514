//! Aranet4 bridge core.
//!
//! Everything between the sensor driver and the metrics endpoint:
//!
//! - [`device`] - `Device` / `Session` traits implemented by sensor drivers
//! - [`gateway`] - Scoped, time-bounded read transactions
//! - [`store`] - Single-writer store for the latest reading
//! - [`poller`] - Background polling (cached-push mode)
//! - [`reader`] - Live reads with a busy gate (on-demand-pull mode)
//! - [`retry`] - Delay policies between attempts
//! - [`clock`] - Wall-clock source for state timestamps
//! - [`sim`] - Simulated sensor for running without hardware
//! - [`fake`] - Scripted sensor for tests

pub mod clock;
pub mod device;
pub mod error;
pub mod fake;
pub mod gateway;
pub mod poller;
pub mod reader;
pub mod retry;
pub mod sim;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use device::{Device, Session};
pub use error::{DeviceError, ErrorKind, Result};
pub use gateway::{Gateway, GatewayOptions, Phase};
pub use poller::{Poller, PollerState};
pub use reader::{Attempt, OnDemandReader};
pub use retry::{ExponentialBackoff, FixedInterval, RetryPolicy};
pub use sim::{SimulatedDevice, SimulationConfig};
pub use store::{BridgeState, SampleStore, StoreWriter};
