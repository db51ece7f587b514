//! Prometheus exporter for an Aranet4 sensor.
//!
//! Bridges a single battery-powered CO2 sensor to a Prometheus scrape
//! endpoint, either from a background-polled cache (push mode) or with a live
//! read per scrape (pull mode).
//!
//! # Architecture
//!
//! ```text
//!  push:  Poller ──> Gateway ──> SampleStore ──> CachedCollector ──┐
//!                                                                  ├──> Registry ──> /metrics
//!  pull:  scrape ──> OnDemandReader ──> Gateway ──> OnDemandCollector
//! ```
//!
//! # Usage
//!
//! ```bash
//! aranet-exporter-prometheus --config config.json5
//! aranet-exporter-prometheus --address D4:6B:3C:00:11:22 --mode pull
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod bridge;
pub mod collector;
pub mod config;
pub mod http;
pub mod mapping;
pub mod registry;

pub use bridge::{Bridge, BridgeStatus};
pub use collector::{CachedCollector, MetricsAdapter, OnDemandCollector};
pub use config::{BridgeMode, ExporterConfig};
pub use http::HttpServer;
pub use registry::{Collector, Metric, Registry, SharedRegistry};
