use crate::Metric;
use serde::{ser::SerializeMap, Serialize, Serializer};
use std::fmt;

/// One sampling cycle's values, keyed by metric.
///
/// A metric whose read failed during the cycle is absent, rather than being
/// recorded as zero.
#[derive(Copy, Clone, Default, PartialEq)]
pub struct Reading {
    values: [Option<f64>; Metric::COUNT],
}

impl Reading {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: [None; Metric::COUNT],
        }
    }

    /// Sets the value of `metric`, returning the previous value if there was
    /// one.
    pub fn insert(&mut self, metric: Metric, value: f64) -> Option<f64> {
        self.values[metric.index()].replace(value)
    }

    pub fn remove(&mut self, metric: Metric) -> Option<f64> {
        self.values[metric.index()].take()
    }

    #[must_use]
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values[metric.index()]
    }

    #[must_use]
    pub fn contains(&self, metric: Metric) -> bool {
        self.get(metric).is_some()
    }

    /// Overwrites every metric present in `other`, leaving the rest alone.
    pub fn merge(&mut self, other: &Reading) {
        for (metric, value) in other.iter() {
            self.insert(metric, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        Metric::ALL
            .iter()
            .zip(self.values.iter())
            .filter_map(|(&metric, value)| Some((metric, (*value)?)))
    }

    pub fn metrics(&self) -> impl Iterator<Item = Metric> + '_ {
        self.iter().map(|(metric, _)| metric)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.iter().filter(|value| value.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

impl FromIterator<(Metric, f64)> for Reading {
    fn from_iter<I: IntoIterator<Item = (Metric, f64)>>(iter: I) -> Self {
        let mut reading = Reading::new();
        for (metric, value) in iter {
            reading.insert(metric, value);
        }
        reading
    }
}

impl fmt::Debug for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut metrics = self.iter();
        if let Some((metric, value)) = metrics.next() {
            write!(f, "{metric}={value}")?;
        }
        for (metric, value) in metrics {
            write!(f, " {metric}={value}")?;
        }
        Ok(())
    }
}

impl Serialize for Reading {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (metric, value) in self.iter() {
            map.serialize_entry(&metric, &value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_metrics_are_not_zero() {
        let reading: Reading = [(Metric::Lux, 12.0)].into_iter().collect();
        assert_eq!(reading.get(Metric::Lux), Some(12.0));
        assert_eq!(reading.get(Metric::Proximity), None);
        assert!(!reading.contains(Metric::Proximity));
        assert_eq!(reading.len(), 1);
    }

    #[test]
    fn merge_overwrites_only_present_keys() {
        let mut reading: Reading = [(Metric::Temperature, 21.5), (Metric::Pm10, 1.0)]
            .into_iter()
            .collect();
        let pm: Reading = [(Metric::Pm10, 4.0), (Metric::Pm25, 6.0), (Metric::Pm100, 8.0)]
            .into_iter()
            .collect();
        reading.merge(&pm);

        assert_eq!(reading.get(Metric::Temperature), Some(21.5));
        assert_eq!(reading.get(Metric::Pm10), Some(4.0));
        assert_eq!(reading.get(Metric::Pm25), Some(6.0));
        assert_eq!(reading.get(Metric::Pm100), Some(8.0));
        assert_eq!(reading.len(), 4);
    }

    #[test]
    fn iterates_in_metric_order() {
        let reading: Reading = [(Metric::Nh3, 3.0), (Metric::Proximity, 1.0)]
            .into_iter()
            .collect();
        let metrics: Vec<_> = reading.metrics().collect();
        assert_eq!(metrics, vec![Metric::Proximity, Metric::Nh3]);
    }

    #[test]
    fn serializes_as_map() {
        let reading: Reading = [(Metric::Humidity, 58.5), (Metric::Pressure, 101320.0)]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&reading).unwrap();
        assert_eq!(json, r#"{"pressure":101320.0,"humidity":58.5}"#);
    }
}
