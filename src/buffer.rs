use crate::{units, Metric, Reading};
use std::{collections::VecDeque, num::NonZeroUsize};

/// A rolling window of the most recent [`Reading`]s, used to smooth values
/// before they are published.
#[derive(Clone, Debug)]
pub struct SampleBuffer {
    samples: VecDeque<Reading>,
    capacity: NonZeroUsize,
}

impl SampleBuffer {
    pub const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(5) {
        Some(capacity) => capacity,
        None => unreachable!(),
    };

    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.get()),
            capacity,
        }
    }

    /// Appends a reading, evicting and returning the oldest one if the buffer
    /// is already full.
    pub fn append(&mut self, reading: Reading) -> Option<Reading> {
        let evicted = if self.samples.len() == self.capacity.get() {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(reading);
        evicted
    }

    /// Returns the mean of `metric` over every buffered reading that contains
    /// it, rounded to one decimal place.
    ///
    /// Readings without `metric` are skipped rather than counted as zero. If no
    /// buffered reading contains `metric`, returns `None`.
    #[must_use]
    pub fn average(&self, metric: Metric) -> Option<f64> {
        let (sum, count) = self
            .samples
            .iter()
            .filter_map(|reading| reading.get(metric))
            .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
        if count == 0 {
            return None;
        }
        Some(units::round_tenths(sum / count as f64))
    }

    /// Metrics to publish: the keys of the most recent reading.
    ///
    /// Using only the latest reading means a sensor that starts failing stops
    /// being published immediately, instead of republishing a stale average
    /// until it ages out of the window.
    pub fn metrics_present(&self) -> impl Iterator<Item = Metric> + '_ {
        self.latest().into_iter().flat_map(Reading::metrics)
    }

    #[must_use]
    pub fn latest(&self) -> Option<&Reading> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> + '_ {
        self.samples.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(capacity: usize) -> SampleBuffer {
        SampleBuffer::new(NonZeroUsize::new(capacity).unwrap())
    }

    fn temp(value: f64) -> Reading {
        [(Metric::Temperature, value)].into_iter().collect()
    }

    #[test]
    fn len_tracks_appends_up_to_capacity() {
        let mut samples = buffer(3);
        for n in 1..=3 {
            assert_eq!(samples.append(temp(n as f64)), None);
            assert_eq!(samples.len(), n);
        }
        for n in 4..=10 {
            samples.append(temp(n as f64));
            assert_eq!(samples.len(), 3);
        }
    }

    #[test]
    fn evicts_oldest_first() {
        let mut samples = buffer(2);
        samples.append(temp(1.0));
        samples.append(temp(2.0));
        let evicted = samples.append(temp(3.0));
        assert_eq!(evicted, Some(temp(1.0)));
        let remaining: Vec<_> = samples
            .iter()
            .map(|r| r.get(Metric::Temperature).unwrap())
            .collect();
        assert_eq!(remaining, vec![2.0, 3.0]);
    }

    #[test]
    fn average_skips_readings_without_metric() {
        let mut samples = buffer(5);
        samples.append(temp(10.0));
        samples.append(temp(20.0));
        samples.append(Reading::new());
        assert_eq!(samples.average(Metric::Temperature), Some(15.0));
    }

    #[test]
    fn missing_metric_is_not_zero() {
        let mut samples = buffer(5);
        samples.append(temp(30.0));
        samples.append([(Metric::Lux, 5.0)].into_iter().collect());
        samples.append([(Metric::Lux, 7.0)].into_iter().collect());
        assert_eq!(samples.average(Metric::Temperature), Some(30.0));
        assert_eq!(samples.average(Metric::Lux), Some(6.0));
    }

    #[test]
    fn average_of_absent_metric_is_none() {
        let mut samples = buffer(5);
        assert_eq!(samples.average(Metric::Temperature), None);
        samples.append(temp(1.0));
        assert_eq!(samples.average(Metric::Humidity), None);
    }

    #[test]
    fn average_rounds_to_tenths() {
        let mut samples = buffer(3);
        samples.append(temp(1.0));
        samples.append(temp(1.0));
        samples.append(temp(2.0));
        assert_eq!(samples.average(Metric::Temperature), Some(1.3));
    }

    #[test]
    fn metrics_present_follows_latest_reading() {
        let mut samples = buffer(3);
        assert_eq!(samples.metrics_present().count(), 0);

        samples.append([(Metric::Lux, 1.0), (Metric::Nh3, 2.0)].into_iter().collect());
        samples.append([(Metric::Lux, 1.0)].into_iter().collect());
        let present: Vec<_> = samples.metrics_present().collect();
        assert_eq!(present, vec![Metric::Lux]);
    }
}
