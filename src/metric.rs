use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed set of metrics an Enviro+ board can report.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Proximity,
    Lux,
    Temperature,
    Pressure,
    Humidity,
    Oxidising,
    Reducing,
    Nh3,
    Pm10,
    Pm25,
    Pm100,
}

impl Metric {
    pub const COUNT: usize = 11;

    pub const ALL: [Metric; Self::COUNT] = [
        Metric::Proximity,
        Metric::Lux,
        Metric::Temperature,
        Metric::Pressure,
        Metric::Humidity,
        Metric::Oxidising,
        Metric::Reducing,
        Metric::Nh3,
        Metric::Pm10,
        Metric::Pm25,
        Metric::Pm100,
    ];

    /// Metrics read directly by the collector on every cycle.
    pub const DIRECT: [Metric; 8] = [
        Metric::Proximity,
        Metric::Lux,
        Metric::Temperature,
        Metric::Pressure,
        Metric::Humidity,
        Metric::Oxidising,
        Metric::Reducing,
        Metric::Nh3,
    ];

    /// Metrics provided by the particulate sensor's background acquisition.
    pub const PARTICULATE: [Metric; 3] = [Metric::Pm10, Metric::Pm25, Metric::Pm100];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Metric::Proximity => "proximity",
            Metric::Lux => "lux",
            Metric::Temperature => "temperature",
            Metric::Pressure => "pressure",
            Metric::Humidity => "humidity",
            Metric::Oxidising => "oxidising",
            Metric::Reducing => "reducing",
            Metric::Nh3 => "nh3",
            Metric::Pm10 => "pm10",
            Metric::Pm25 => "pm25",
            Metric::Pm100 => "pm100",
        }
    }

    #[must_use]
    pub const fn is_particulate(self) -> bool {
        matches!(self, Metric::Pm10 | Metric::Pm25 | Metric::Pm100)
    }

    /// Position of this metric in [`Metric::ALL`].
    #[must_use]
    pub(crate) const fn index(self) -> usize {
        self as usize
    }

    /// Topic (relative to the configured prefix) that smoothed values for this
    /// metric are published to.
    #[must_use]
    pub fn state_topic(self, room: &str) -> String {
        format!("sensor/{room}/{self}/state")
    }

    /// Topic (relative to the configured prefix) that discovery metadata for
    /// this metric is published to.
    #[must_use]
    pub fn config_topic(self, room: &str) -> String {
        format!("sensor/{room}/{self}/config")
    }

    /// The metric name with its first letter capitalized, for display names.
    #[must_use]
    pub fn title(self) -> String {
        let name = self.name();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_in_index_order() {
        for (i, metric) in Metric::ALL.iter().enumerate() {
            assert_eq!(metric.index(), i, "{metric} is out of order");
        }
    }

    #[test]
    fn topics() {
        assert_eq!(
            Metric::Temperature.state_topic("livingroom"),
            "sensor/livingroom/temperature/state"
        );
        assert_eq!(Metric::Nh3.config_topic("attic"), "sensor/attic/nh3/config");
    }

    #[test]
    fn titles() {
        assert_eq!(Metric::Pm25.title(), "Pm25");
        assert_eq!(Metric::Lux.title(), "Lux");
    }

    #[test]
    fn serde_names_match_display() {
        let json = serde_json::to_string(&Metric::Oxidising).unwrap();
        assert_eq!(json, "\"oxidising\"");
        let metric: Metric = serde_json::from_str("\"pm100\"").unwrap();
        assert_eq!(metric, Metric::Pm100);
    }
}
