//! Home Assistant MQTT discovery.
//!
//! Each metric gets a retained JSON document on its `config` topic describing
//! how Home Assistant should present the values published to its `state`
//! topic. Publishing an empty retained payload to the same topic removes the
//! entity again.
use crate::{
    error::PublishError,
    publish::{Payload, Publisher, Transport},
    Metric,
};
use serde::Serialize;

/// Registers and unregisters discovery metadata for one room.
#[derive(Clone, Debug)]
pub struct Discovery {
    room: String,
    client_id: String,
    metrics: Vec<Metric>,
}

/// A Home Assistant sensor entity description.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SensorConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    pub unit_of_measurement: &'static str,
    pub value_template: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'static str>,
    pub state_topic: String,
    pub unique_id: String,
}

struct Presentation {
    device_class: Option<&'static str>,
    unit: &'static str,
    icon: Option<&'static str>,
}

const VALUE_TEMPLATE: &str = "{{ value_json }}";

fn presentation(metric: Metric) -> Presentation {
    let (device_class, unit, icon) = match metric {
        Metric::Proximity => (None, "cm", None),
        Metric::Lux => (Some("illuminance"), "lx", Some("mdi:weather-sunny")),
        Metric::Temperature => (Some("temperature"), "°C", Some("mdi:thermometer")),
        Metric::Pressure => (Some("pressure"), "hPa", Some("mdi:arrow-down-bold")),
        Metric::Humidity => (Some("humidity"), "%H", Some("mdi:water-percent")),
        Metric::Oxidising => (None, "no2", Some("mdi:thought-bubble")),
        Metric::Reducing => (None, "CO", Some("mdi:thought-bubble")),
        Metric::Nh3 => (None, "nh3", Some("mdi:thought-bubble")),
        Metric::Pm10 | Metric::Pm25 | Metric::Pm100 => {
            (None, "ug/m3", Some("mdi:thought-bubble-outline"))
        }
    };
    Presentation {
        device_class,
        unit,
        icon,
    }
}

impl Discovery {
    /// Describes the metrics read directly from the board, plus the
    /// particulate metrics if `particulates` is set.
    pub fn new(room: impl Into<String>, client_id: impl Into<String>, particulates: bool) -> Self {
        let mut metrics = Metric::DIRECT.to_vec();
        if particulates {
            metrics.extend_from_slice(&Metric::PARTICULATE);
        }
        Self {
            room: room.into(),
            client_id: client_id.into(),
            metrics,
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Builds the discovery document for `metric`. `prefix` is the publisher's
    /// topic prefix, since Home Assistant needs the absolute state topic.
    #[must_use]
    pub fn config(&self, metric: Metric, prefix: &str) -> SensorConfig {
        let Presentation {
            device_class,
            unit,
            icon,
        } = presentation(metric);
        let state_topic = metric.state_topic(&self.room);
        SensorConfig {
            name: format!("{} {}", self.room, metric.title()),
            device_class,
            unit_of_measurement: unit,
            value_template: VALUE_TEMPLATE,
            icon,
            state_topic: if prefix.is_empty() {
                state_topic
            } else {
                format!("{prefix}/{state_topic}")
            },
            unique_id: format!("{metric}-{}", self.client_id),
        }
    }

    /// Clears the retained config of every metric, including ones this
    /// instance doesn't publish, so that entities left over from an earlier
    /// configuration disappear.
    ///
    /// Returns the messages that could not be published.
    pub fn remove_sensor_config<T: Transport>(&self, publisher: &mut Publisher<T>) -> Vec<PublishError> {
        let errors: Vec<_> = Metric::ALL
            .iter()
            .filter_map(|metric| {
                publisher
                    .publish(&metric.config_topic(&self.room), Payload::Empty, true)
                    .err()
            })
            .inspect(log_failure)
            .collect();
        if errors.is_empty() {
            log::info!(target: "envlogger::discovery", "removed sensor configs for {}", self.room);
        } else {
            log::warn!(
                target: "envlogger::discovery",
                "failed to remove {} of {} sensor configs",
                errors.len(),
                Metric::COUNT
            );
        }
        errors
    }

    /// Publishes the retained config of every enabled metric.
    ///
    /// Returns the messages that could not be published.
    pub fn sensor_config<T: Transport>(&self, publisher: &mut Publisher<T>) -> Vec<PublishError> {
        let prefix = publisher.prefix().to_owned();
        let errors: Vec<_> = self
            .metrics
            .iter()
            .filter_map(|&metric| {
                let config = self.config(metric, &prefix);
                publisher
                    .publish_json(&metric.config_topic(&self.room), &config, true)
                    .err()
            })
            .inspect(log_failure)
            .collect();
        if errors.is_empty() {
            log::info!(
                target: "envlogger::discovery",
                "added {} sensor configs for {}",
                self.metrics.len(),
                self.room
            );
        } else {
            log::warn!(
                target: "envlogger::discovery",
                "failed to add {} of {} sensor configs",
                errors.len(),
                self.metrics.len()
            );
        }
        errors
    }
}

fn log_failure(error: &PublishError) {
    match std::error::Error::source(error) {
        Some(source) => log::warn!(target: "envlogger::discovery", "{error}: {source}"),
        None => log::warn!(target: "envlogger::discovery", "{error}"),
    }
}
