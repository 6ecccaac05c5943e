use crate::{
    buffer::SampleBuffer,
    config::Config,
    cpu,
    error::{ConfigError, ConnectionError, PublishError, SensorReadError},
    particulate::SnapshotCell,
    publish::{Publisher, Transport},
    sensor::{Sample, SensorPort, Status},
    Metric, Reading, Shutdown,
};
use std::{
    fmt,
    time::{Duration, Instant},
};

const TARGET: &str = "envlogger::collector";

/// Samples every sensor once per cycle and publishes smoothed values.
pub struct Collector<T> {
    sensors: Vec<Port>,
    particulates: Option<SnapshotCell>,
    buffer: SampleBuffer,
    publisher: Publisher<T>,
    room: String,
    retain: bool,
    cycles: u64,
}

struct Port {
    sensor: Box<dyn SensorPort>,
    status: Status,
}

/// What happened during one collector cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub cycle: u64,
    /// The reading appended to the buffer this cycle.
    pub reading: Reading,
    pub sensor_errors: Vec<SensorReadError>,
    /// One entry per metric in `reading`, or empty if this cycle didn't
    /// publish.
    pub published: Vec<(Metric, MetricOutcome)>,
    pub connected: bool,
    pub connection_error: Option<ConnectionError>,
}

#[derive(Debug)]
pub enum MetricOutcome {
    Published(f64),
    /// The buffer holds no value for the metric.
    NoValue,
    Failed(PublishError),
}

// === impl Collector ===

impl<T: Transport> Collector<T> {
    pub fn new(config: &Config, publisher: Publisher<T>) -> Result<Self, ConfigError> {
        let capacity = config
            .buffer_capacity()
            .ok_or(ConfigError::Invalid("num_samples must be at least 1"))?;
        Ok(Self {
            sensors: Vec::new(),
            particulates: None,
            buffer: SampleBuffer::new(capacity),
            publisher,
            room: config.room.clone(),
            retain: config.retain,
            cycles: 0,
        })
    }

    pub fn with_sensor(mut self, sensor: impl SensorPort + 'static) -> Self {
        self.sensors.push(Port {
            sensor: Box::new(sensor),
            status: Status::Missing,
        });
        self
    }

    /// Merges the latest particulate snapshot from `cell` into every reading.
    pub fn with_particulates(self, cell: SnapshotCell) -> Self {
        Self {
            particulates: Some(cell),
            ..self
        }
    }

    /// Reads every sensor once, and merges in the latest particulate snapshot.
    ///
    /// A sensor that fails to read a metric leaves it out of the reading; the
    /// remaining metrics and sensors are still read.
    pub fn take_readings(&mut self) -> (Reading, Vec<SensorReadError>) {
        let mut reading = Reading::new();
        let mut errors = Vec::new();

        for port in &mut self.sensors {
            let name = port.sensor.name();
            let mut sample = Sample::new(name, &mut reading, &mut errors);
            port.sensor.sample(&mut sample);
            let status = sample.status(port.status);
            let prev = std::mem::replace(&mut port.status, status);
            if prev != status {
                match status {
                    Status::Up => log::info!(target: TARGET, "{name} is {status} (was {prev})"),
                    _ => log::warn!(target: TARGET, "{name} is {status} (was {prev})"),
                }
            }
        }

        if let Some(snapshot) = self.particulates.as_ref().and_then(SnapshotCell::load) {
            reading.merge(&snapshot.to_reading());
        }

        (reading, errors)
    }

    /// Runs one cycle: takes a reading, appends it to the buffer, and, if
    /// `publish_readings` is set, publishes the averages.
    pub fn update(&mut self, publish_readings: bool) -> CycleReport {
        self.cycles += 1;
        let (reading, sensor_errors) = self.take_readings();
        self.buffer.append(reading);
        let published = if publish_readings {
            self.publish_averages()
        } else {
            Vec::new()
        };
        let connection = self.publisher.connection_state().status();
        CycleReport {
            cycle: self.cycles,
            reading,
            sensor_errors,
            published,
            connected: connection.connected,
            connection_error: connection.last_error,
        }
    }

    /// Publishes the average of every metric in the latest reading to its
    /// state topic. A metric that can't be averaged or published is skipped.
    pub fn publish_averages(&mut self) -> Vec<(Metric, MetricOutcome)> {
        let metrics: Vec<Metric> = self.buffer.metrics_present().collect();
        metrics
            .into_iter()
            .map(|metric| {
                let Some(value) = self.buffer.average(metric) else {
                    log::warn!(target: TARGET, "no value to publish for {metric}");
                    return (metric, MetricOutcome::NoValue);
                };
                let topic = metric.state_topic(&self.room);
                let outcome = match self.publisher.publish_value(&topic, value, self.retain) {
                    Ok(()) => MetricOutcome::Published(value),
                    Err(error) => {
                        log::warn!(target: TARGET, "error publishing {metric}: {}", DisplayChain(&error));
                        MetricOutcome::Failed(error)
                    }
                };
                (metric, outcome)
            })
            .collect()
    }

    /// Runs a cycle every `interval` until `shutdown` is triggered.
    ///
    /// Readings are only published once `delay` has elapsed; before that,
    /// cycles just fill the buffer.
    pub fn run(&mut self, interval: Duration, delay: Duration, shutdown: &Shutdown) {
        let started = Instant::now();
        log::info!(
            target: TARGET,
            "sampling {} sensors every {interval:?}, publishing after {delay:?}",
            self.sensors.len()
        );
        while shutdown.is_running() {
            let cycle_start = Instant::now();
            let report = self.update(started.elapsed() >= delay);
            report.log();
            if log::log_enabled!(target: TARGET, log::Level::Debug) {
                match cpu::temperature() {
                    Ok(temp) => log::debug!(target: TARGET, "CPU temperature: {temp:.1}°C"),
                    Err(error) => log::trace!(target: TARGET, "no CPU temperature: {error:#}"),
                }
            }
            if !shutdown.sleep(interval.saturating_sub(cycle_start.elapsed())) {
                break;
            }
        }
        log::info!(target: TARGET, "stopped after {} cycles", self.cycles);
    }

    #[must_use]
    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn sensor_statuses(&self) -> impl Iterator<Item = (&'static str, Status)> + '_ {
        self.sensors
            .iter()
            .map(|port| (port.sensor.name(), port.status))
    }

    #[must_use]
    pub fn into_publisher(self) -> Publisher<T> {
        self.publisher
    }
}

// === impl CycleReport ===

impl CycleReport {
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.published
            .iter()
            .filter(|(_, outcome)| matches!(outcome, MetricOutcome::Published(_)))
            .count()
    }

    #[must_use]
    pub fn outcome(&self, metric: Metric) -> Option<&MetricOutcome> {
        self.published
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, outcome)| outcome)
    }

    pub fn log(&self) {
        log::debug!(target: TARGET, "cycle {}: {}", self.cycle, self.reading);
        if self.published.is_empty() {
            return;
        }
        let published = self.published_count();
        if published == self.published.len() {
            log::debug!(target: TARGET, "cycle {}: published {published} metrics", self.cycle);
        } else {
            log::info!(
                target: TARGET,
                "cycle {}: published {published} of {} metrics{}",
                self.cycle,
                self.published.len(),
                if self.connected { "" } else { " (disconnected)" }
            );
        }
    }
}

/// Formats an error followed by its chain of sources.
struct DisplayChain<'a>(&'a dyn std::error::Error);

impl fmt::Display for DisplayChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}
