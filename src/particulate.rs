//! Continuous background acquisition for the particulate matter sensor.
//!
//! The PMS5003 streams a frame roughly every second and buffers frames that
//! nobody reads, so reading it only once per collector cycle would report
//! increasingly stale values. Instead, a dedicated thread drains it
//! continuously and keeps only the latest reading in a [`SnapshotCell`] for the
//! collector to pick up.
use crate::{error::ParticulateError, retry::ExpBackoff, Metric, Reading, Shutdown};
use serde::Serialize;
use std::{
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::Duration,
};

/// A particulate matter sensor driver.
pub trait ParticulateSensor: Send {
    const NAME: &'static str;

    fn read(&mut self) -> anyhow::Result<ParticulateSnapshot>;

    /// Issues a hardware reset.
    fn reset(&mut self) -> anyhow::Result<()>;
}

/// Particulate concentrations from a single sensor frame, in µg/m³.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct ParticulateSnapshot {
    /// PM1.0
    pub pm10: f64,
    /// PM2.5
    pub pm25: f64,
    /// PM10
    pub pm100: f64,
}

/// Holds the most recent [`ParticulateSnapshot`]. Every store replaces the
/// whole snapshot, so a reader never sees values from two different frames.
#[derive(Clone, Debug, Default)]
pub struct SnapshotCell(Arc<Mutex<Option<ParticulateSnapshot>>>);

#[derive(Debug, Default)]
pub struct AcquisitionStats {
    reads: AtomicU64,
    failures: AtomicU64,
    reset_failures: AtomicU64,
}

pub struct ParticulateAcquirer<S> {
    sensor: S,
    latest: SnapshotCell,
    backoff: ExpBackoff,
    stats: Arc<AcquisitionStats>,
    consecutive_failures: u64,
}

// === impl ParticulateSnapshot ===

impl ParticulateSnapshot {
    #[must_use]
    pub fn to_reading(&self) -> Reading {
        [
            (Metric::Pm10, self.pm10),
            (Metric::Pm25, self.pm25),
            (Metric::Pm100, self.pm100),
        ]
        .into_iter()
        .collect()
    }
}

// === impl SnapshotCell ===

impl SnapshotCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, snapshot: ParticulateSnapshot) {
        // the value is always replaced wholesale, so a poisoned lock can't
        // hold a half-written snapshot.
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    /// Returns the latest snapshot, or `None` if the sensor has never been
    /// read successfully.
    #[must_use]
    pub fn load(&self) -> Option<ParticulateSnapshot> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// === impl AcquisitionStats ===

impl AcquisitionStats {
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn reset_failures(&self) -> u64 {
        self.reset_failures.load(Ordering::Acquire)
    }
}

// === impl ParticulateAcquirer ===

impl<S: ParticulateSensor> ParticulateAcquirer<S> {
    const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
    const MAX_BACKOFF: Duration = Duration::from_secs(30);

    pub fn new(sensor: S, latest: SnapshotCell) -> Self {
        Self {
            sensor,
            latest,
            backoff: ExpBackoff::new(Self::INITIAL_BACKOFF)
                .with_max(Self::MAX_BACKOFF)
                .with_target(S::NAME),
            stats: Arc::new(AcquisitionStats::default()),
            consecutive_failures: 0,
        }
    }

    pub fn with_backoff(self, backoff: ExpBackoff) -> Self {
        Self { backoff, ..self }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<AcquisitionStats> {
        self.stats.clone()
    }

    /// Reads from the sensor until `shutdown` is triggered.
    pub fn run(mut self, shutdown: &Shutdown) {
        log::info!(target: S::NAME, "starting continuous acquisition");
        while shutdown.is_running() {
            if self.poll().is_err() && !self.wait(shutdown) {
                break;
            }
        }
        log::info!(
            target: S::NAME,
            "stopped after {} reads ({} failed)",
            self.stats.reads(),
            self.stats.failures()
        );
    }

    /// Performs one acquisition attempt. On failure, the sensor has already
    /// been reset by the time this returns.
    pub fn poll(&mut self) -> Result<ParticulateSnapshot, ParticulateError> {
        match self.sensor.read() {
            Ok(snapshot) => {
                log::trace!(target: S::NAME, "{snapshot:?}");
                self.latest.store(snapshot);
                self.stats.reads.fetch_add(1, Ordering::Release);
                self.consecutive_failures = 0;
                self.backoff.reset();
                Ok(snapshot)
            }
            Err(error) => {
                log::warn!(target: S::NAME, "failed to read from {}: {error:#}; resetting sensor", S::NAME);
                self.stats.failures.fetch_add(1, Ordering::Release);
                self.consecutive_failures += 1;
                if let Err(reset_error) = self.sensor.reset() {
                    log::warn!(target: S::NAME, "failed to reset {}: {reset_error:#}", S::NAME);
                    self.stats.reset_failures.fetch_add(1, Ordering::Release);
                    return Err(ParticulateError::Reset(reset_error.into()));
                }
                Err(ParticulateError::Read(error.into()))
            }
        }
    }

    /// After a failed poll, decides how long to wait before the next one.
    ///
    /// The first failure after a successful read retries immediately, so that
    /// the sensor's buffer keeps being drained. Repeated failures back off, so
    /// a dead sensor doesn't spin the CPU.
    fn wait(&mut self, shutdown: &Shutdown) -> bool {
        if self.consecutive_failures <= 1 {
            return shutdown.is_running();
        }
        self.backoff.wait(shutdown)
    }
}

impl<S: ParticulateSensor + 'static> ParticulateAcquirer<S> {
    /// Runs the acquirer on its own thread until `shutdown` is triggered.
    pub fn spawn(self, shutdown: Shutdown) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name(S::NAME.to_lowercase())
            .spawn(move || self.run(&shutdown))
    }

    /// Brings up the sensor and then runs the acquirer, all on its own thread.
    ///
    /// Bring-up is retried with `backoff` until it succeeds or `shutdown` is
    /// triggered, so a sensor that is missing at startup never takes the rest
    /// of the process down with it.
    pub fn spawn_with_bringup(
        bringup: impl FnMut() -> anyhow::Result<S> + Send + 'static,
        backoff: ExpBackoff,
        latest: SnapshotCell,
        shutdown: Shutdown,
    ) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name(S::NAME.to_lowercase())
            .spawn(move || {
                if let Some(sensor) = bringup_until_shutdown(bringup, backoff, &shutdown) {
                    Self::new(sensor, latest).run(&shutdown);
                }
            })
    }
}

/// Calls `bringup` until it succeeds, backing off between attempts.
///
/// Returns `None` if `shutdown` is triggered first.
pub fn bringup_until_shutdown<S: ParticulateSensor>(
    mut bringup: impl FnMut() -> anyhow::Result<S>,
    backoff: ExpBackoff,
    shutdown: &Shutdown,
) -> Option<S> {
    let mut backoff = backoff.with_target(S::NAME);
    while shutdown.is_running() {
        match bringup() {
            Ok(sensor) => {
                log::info!(target: S::NAME, "successfully brought up {}!", S::NAME);
                return Some(sensor);
            }
            Err(error) => {
                log::warn!(
                    target: S::NAME,
                    "failed to bring up {}: {error:#}; retrying in {:?}...",
                    S::NAME,
                    backoff.current()
                );
                if !backoff.wait(shutdown) {
                    break;
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn snapshot(value: f64) -> ParticulateSnapshot {
        ParticulateSnapshot {
            pm10: value,
            pm25: value,
            pm100: value,
        }
    }

    #[derive(Default)]
    struct FakePms {
        script: VecDeque<anyhow::Result<ParticulateSnapshot>>,
        resets: usize,
    }

    impl ParticulateSensor for FakePms {
        const NAME: &'static str = "FAKEPMS";

        fn read(&mut self) -> anyhow::Result<ParticulateSnapshot> {
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
        }

        fn reset(&mut self) -> anyhow::Result<()> {
            self.resets += 1;
            Ok(())
        }
    }

    #[test]
    fn snapshot_maps_to_pm_metrics() {
        let reading = ParticulateSnapshot {
            pm10: 1.0,
            pm25: 2.0,
            pm100: 3.0,
        }
        .to_reading();
        assert_eq!(reading.get(Metric::Pm10), Some(1.0));
        assert_eq!(reading.get(Metric::Pm25), Some(2.0));
        assert_eq!(reading.get(Metric::Pm100), Some(3.0));
        assert_eq!(reading.len(), 3);
    }

    #[test]
    fn failure_resets_and_keeps_last_snapshot() {
        let cell = SnapshotCell::new();
        let sensor = FakePms {
            script: VecDeque::from([
                Ok(snapshot(5.0)),
                Err(anyhow::anyhow!("checksum mismatch")),
                Ok(snapshot(6.0)),
            ]),
            resets: 0,
        };
        let mut acquirer = ParticulateAcquirer::new(sensor, cell.clone());
        assert_eq!(cell.load(), None);

        acquirer.poll().unwrap();
        assert_eq!(cell.load(), Some(snapshot(5.0)));

        assert!(matches!(acquirer.poll(), Err(ParticulateError::Read(_))));
        assert_eq!(acquirer.sensor.resets, 1);
        assert_eq!(cell.load(), Some(snapshot(5.0)));

        acquirer.poll().unwrap();
        assert_eq!(cell.load(), Some(snapshot(6.0)));

        let stats = acquirer.stats();
        assert_eq!(stats.reads(), 2);
        assert_eq!(stats.failures(), 1);
    }

    #[test]
    fn stops_on_shutdown_with_dead_sensor() {
        let shutdown = Shutdown::new();
        let acquirer = ParticulateAcquirer::new(FakePms::default(), SnapshotCell::new())
            .with_backoff(ExpBackoff::new(Duration::from_millis(1)).with_max(Duration::from_millis(5)));
        let stats = acquirer.stats();
        let handle = acquirer.spawn(shutdown.clone()).unwrap();

        thread::sleep(Duration::from_millis(50));
        shutdown.trigger();
        handle.join().unwrap();

        assert_eq!(stats.reads(), 0);
        assert!(stats.failures() > 1);
    }

    #[test]
    fn first_failure_retries_immediately_then_backs_off() {
        let initial = Duration::from_millis(1);
        let shutdown = Shutdown::new();
        let sensor = FakePms {
            script: VecDeque::from([
                Ok(snapshot(1.0)),
                Err(anyhow::anyhow!("timed out")),
                Err(anyhow::anyhow!("timed out")),
                Err(anyhow::anyhow!("timed out")),
                Ok(snapshot(2.0)),
                Err(anyhow::anyhow!("timed out")),
            ]),
            resets: 0,
        };
        let mut acquirer = ParticulateAcquirer::new(sensor, SnapshotCell::new())
            .with_backoff(ExpBackoff::new(initial).with_max(Duration::from_secs(1)));

        acquirer.poll().unwrap();

        // the first failure after a success doesn't touch the backoff.
        assert!(acquirer.poll().is_err());
        assert!(acquirer.wait(&shutdown));
        assert_eq!(acquirer.backoff.current(), initial);

        // consecutive failures double it.
        assert!(acquirer.poll().is_err());
        assert!(acquirer.wait(&shutdown));
        assert_eq!(acquirer.backoff.current(), initial * 2);
        assert!(acquirer.poll().is_err());
        assert!(acquirer.wait(&shutdown));
        assert_eq!(acquirer.backoff.current(), initial * 4);

        // a success resets it, and the next failure is retried immediately.
        acquirer.poll().unwrap();
        assert_eq!(acquirer.backoff.current(), initial);
        assert!(acquirer.poll().is_err());
        assert!(acquirer.wait(&shutdown));
        assert_eq!(acquirer.backoff.current(), initial);
        assert_eq!(acquirer.sensor.resets, 4);
    }

    #[test]
    fn bringup_is_retried_until_it_succeeds() {
        let mut attempts = 0;
        let sensor = bringup_until_shutdown(
            || {
                attempts += 1;
                if attempts < 3 {
                    anyhow::bail!("No such file or directory");
                }
                Ok(FakePms::default())
            },
            ExpBackoff::new(Duration::from_millis(1)),
            &Shutdown::new(),
        );
        assert!(sensor.is_some());
        assert_eq!(attempts, 3);
    }

    #[test]
    fn failed_bringup_stops_on_shutdown() {
        let shutdown = Shutdown::new();
        let cell = SnapshotCell::new();
        let handle = ParticulateAcquirer::<FakePms>::spawn_with_bringup(
            || anyhow::bail!("No such file or directory"),
            ExpBackoff::new(Duration::from_millis(1)).with_max(Duration::from_millis(5)),
            cell.clone(),
            shutdown.clone(),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        shutdown.trigger();
        handle.join().unwrap();
        assert_eq!(cell.load(), None);
    }

    #[test]
    fn readers_never_see_torn_snapshots() {
        let cell = SnapshotCell::new();
        let writer = {
            let cell = cell.clone();
            thread::spawn(move || {
                for i in 0..10_000 {
                    cell.store(snapshot(i as f64));
                }
            })
        };

        for _ in 0..10_000 {
            if let Some(ParticulateSnapshot { pm10, pm25, pm100 }) = cell.load() {
                assert_eq!(pm10, pm25);
                assert_eq!(pm25, pm100);
            }
        }
        writer.join().unwrap();
        assert_eq!(cell.load(), Some(snapshot(9999.0)));
    }
}
