use crate::error::ConfigError;
use serde::Deserialize;
use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

/// Everything needed to construct the collector and its MQTT connection.
///
/// Can be loaded from a JSON file; every field is optional there and falls
/// back to its default. Durations are given in seconds.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Prepended to every topic.
    pub prefix: String,
    pub room: String,
    pub use_pms5003: bool,
    /// Size of the rolling window that published values are averaged over.
    pub num_samples: usize,
    /// Whether published state values are retained by the broker.
    pub retain: bool,
    pub qos: u8,
    #[serde(with = "secs")]
    pub interval: Duration,
    /// Sampling starts immediately, but nothing is published until this has
    /// elapsed, so the gas sensor heater has time to warm up.
    #[serde(with = "secs")]
    pub delay: Duration,
    #[serde(with = "secs")]
    pub keep_alive: Duration,
    pub iio_root: PathBuf,
    pub pms_port: String,
    pub pms_reset_gpio: Option<PathBuf>,
}

impl Config {
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        log::debug!(target: "envlogger::config", "loaded {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_samples == 0 {
            return Err(ConfigError::Invalid("num_samples must be at least 1"));
        }
        if self.qos > 2 {
            return Err(ConfigError::Invalid("qos must be 0, 1, or 2"));
        }
        if self.room.trim().is_empty() {
            return Err(ConfigError::Invalid("room must not be empty"));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("client_id must not be empty"));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid("interval must be greater than zero"));
        }
        // the MQTT client counts keep-alive in whole seconds, zero disables it.
        if !self.keep_alive.is_zero() && self.keep_alive < Duration::from_secs(1) {
            return Err(ConfigError::Invalid("keep_alive must be zero or at least 1 second"));
        }
        Ok(())
    }

    /// The sample buffer capacity, or `None` if `num_samples` is zero.
    #[must_use]
    pub fn buffer_capacity(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.num_samples)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: "envlogger".to_owned(),
            host: "localhost".to_owned(),
            port: 1883,
            username: None,
            password: None,
            prefix: "homeassistant".to_owned(),
            room: "room".to_owned(),
            use_pms5003: false,
            num_samples: 5,
            retain: false,
            qos: 0,
            interval: Duration::from_secs(5),
            delay: Duration::from_secs(15),
            keep_alive: Duration::from_secs(60),
            iio_root: PathBuf::from(crate::sensor::iio::DEFAULT_ROOT),
            pms_port: "/dev/ttyAMA0".to_owned(),
            pms_reset_gpio: None,
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.buffer_capacity().unwrap().get(), 5);
        assert_eq!(config.prefix, "homeassistant");
    }

    #[test]
    fn file_fields_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "room": "livingroom", "use_pms5003": true, "interval": 2.5, "num_samples": 10 }}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.room, "livingroom");
        assert!(config.use_pms5003);
        assert_eq!(config.interval, Duration::from_millis(2500));
        assert_eq!(config.num_samples, 10);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.delay, Duration::from_secs(15));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "rooom": "typo" }}"#).unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::from_file(dir.path().join("nope.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn validation() {
        let invalid = [
            Config {
                num_samples: 0,
                ..Config::default()
            },
            Config {
                qos: 3,
                ..Config::default()
            },
            Config {
                room: " ".to_owned(),
                ..Config::default()
            },
            Config {
                client_id: String::new(),
                ..Config::default()
            },
            Config {
                interval: Duration::ZERO,
                ..Config::default()
            },
            Config {
                keep_alive: Duration::from_millis(500),
                ..Config::default()
            },
        ];
        for config in invalid {
            assert!(config.validate().is_err(), "{config:?} should be invalid");
        }

        let keep_alive_off = Config {
            keep_alive: Duration::ZERO,
            ..Config::default()
        };
        assert!(keep_alive_off.validate().is_ok());
    }
}
