//! Collects environmental telemetry from a Pimoroni Enviro+ board and
//! publishes rolling averages to an MQTT broker, with Home Assistant
//! discovery metadata.
//!
//! The [`Collector`](collector::Collector) reads every [`SensorPort`] once per
//! cycle, merges in the latest particulate snapshot from a background
//! [`ParticulateAcquirer`](particulate::ParticulateAcquirer), and publishes the
//! average of each metric over the last few cycles.
pub mod buffer;
pub mod collector;
pub mod config;
pub mod cpu;
pub mod discovery;
pub mod error;
pub mod logger;
mod metric;
pub mod particulate;
pub mod publish;
mod reading;
pub mod retry;
pub mod sensor;
mod shutdown;
pub mod units;

pub use self::{
    buffer::SampleBuffer,
    collector::Collector,
    config::Config,
    metric::Metric,
    reading::Reading,
    sensor::SensorPort,
    shutdown::Shutdown,
};
