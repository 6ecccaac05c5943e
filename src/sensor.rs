use crate::{error::SensorReadError, units, Metric, Reading};
use std::fmt;

pub mod iio;
#[cfg(feature = "sensor-pms5003")]
pub mod pms5003;

/// A physical sensor the collector reads directly on every cycle.
pub trait SensorPort {
    fn name(&self) -> &'static str;

    /// Reads every metric this sensor provides into `sample`.
    ///
    /// Implementations must attempt each metric independently, so that one
    /// failed read does not prevent the others.
    fn sample(&mut self, sample: &mut Sample<'_>);
}

/// Whether a sensor is producing readings.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Status {
    /// Never read successfully. Usually the device isn't attached or its
    /// driver isn't loaded.
    #[default]
    Missing,
    /// Read at least one metric on the last cycle.
    Up,
    /// Worked before, but every metric failed on the last cycle.
    Down,
}

/// Collects one sensor's contribution to a cycle's [`Reading`].
#[derive(Debug)]
pub struct Sample<'cycle> {
    sensor: &'static str,
    reading: &'cycle mut Reading,
    errors: &'cycle mut Vec<SensorReadError>,
    recorded: usize,
    failed: usize,
}

impl<'cycle> Sample<'cycle> {
    pub fn new(
        sensor: &'static str,
        reading: &'cycle mut Reading,
        errors: &'cycle mut Vec<SensorReadError>,
    ) -> Self {
        Self {
            sensor,
            reading,
            errors,
            recorded: 0,
            failed: 0,
        }
    }

    /// Records the outcome of reading `metric`, converting a successful raw
    /// value into its reported unit.
    pub fn record(&mut self, metric: Metric, raw: anyhow::Result<f64>) {
        let raw = raw.and_then(|raw| {
            anyhow::ensure!(raw.is_finite(), "sensor returned {raw}");
            Ok(raw)
        });

        match raw {
            Ok(raw) => {
                let value = units::normalize(metric, raw);
                log::debug!(target: self.sensor, "{metric}: {value}");
                self.reading.insert(metric, value);
                self.recorded += 1;
            }
            Err(error) => {
                log::warn!(target: self.sensor, "error reading {metric}: {error:#}");
                self.errors.push(SensorReadError {
                    sensor: self.sensor,
                    metric,
                    source: error.into(),
                });
                self.failed += 1;
            }
        }
    }

    /// The health of the sensor as of this sample, given its previous status.
    #[must_use]
    pub fn status(&self, prev: Status) -> Status {
        match (self.recorded, self.failed, prev) {
            (0, 0, prev) => prev,
            (0, _, Status::Missing) => Status::Missing,
            (0, _, _) => Status::Down,
            (_, _, _) => Status::Up,
        }
    }
}

// === impl Status ===

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::Missing => "missing",
            Self::Up => "up",
            Self::Down => "down",
        };
        f.pad(status)
    }
}
