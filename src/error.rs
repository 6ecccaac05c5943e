use crate::Metric;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A single metric could not be read from a sensor this cycle. The metric is
/// left out of the cycle's reading.
#[derive(Debug, thiserror::Error)]
#[error("{sensor}: failed to read {metric}")]
pub struct SensorReadError {
    pub sensor: &'static str,
    pub metric: Metric,
    #[source]
    pub source: BoxError,
}

/// The particulate sensor failed to produce a reading. Handled inside the
/// acquisition loop by resetting the sensor; never surfaced to the collector.
#[derive(Debug, thiserror::Error)]
pub enum ParticulateError {
    #[error("failed to read from particulate sensor")]
    Read(#[source] BoxError),
    #[error("failed to reset particulate sensor")]
    Reset(#[source] BoxError),
}

/// A connection-level failure reported by the MQTT transport.
///
/// These are recorded in the [`ConnectionState`](crate::publish::ConnectionState)
/// and never block publishing.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    #[error("incorrect MQTT protocol version")]
    ProtocolVersion,
    #[error("invalid MQTT client identifier")]
    InvalidClientId,
    #[error("server unavailable")]
    ServerUnavailable,
    #[error("bad username or password")]
    BadCredentials,
    #[error("connection refused")]
    Refused,
    #[error("unknown error (CONNACK code {0})")]
    Unknown(u8),
    #[error("connection lost: {0}")]
    Network(String),
}

/// Publishing one message failed. The caller skips that message and carries
/// on with the rest.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to encode payload for {topic}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to publish to {topic}")]
    Transport {
        topic: String,
        #[source]
        source: BoxError,
    },
}

/// The configuration is unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

// === impl ConnectionError ===

impl ConnectionError {
    /// Maps an MQTT 3.1.1 CONNACK return code to an error, or `None` if the
    /// connection was accepted.
    #[must_use]
    pub fn from_return_code(code: u8) -> Option<Self> {
        match code {
            0 => None,
            1 => Some(Self::ProtocolVersion),
            2 => Some(Self::InvalidClientId),
            3 => Some(Self::ServerUnavailable),
            4 => Some(Self::BadCredentials),
            5 => Some(Self::Refused),
            code => Some(Self::Unknown(code)),
        }
    }
}

// === impl PublishError ===

impl PublishError {
    #[must_use]
    pub fn topic(&self) -> &str {
        match self {
            Self::Encode { topic, .. } | Self::Transport { topic, .. } => topic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connack_codes() {
        assert_eq!(ConnectionError::from_return_code(0), None);
        assert_eq!(
            ConnectionError::from_return_code(4),
            Some(ConnectionError::BadCredentials)
        );
        assert_eq!(
            ConnectionError::from_return_code(5).unwrap().to_string(),
            "connection refused"
        );
        assert_eq!(
            ConnectionError::from_return_code(42),
            Some(ConnectionError::Unknown(42))
        );
    }

    #[test]
    fn sensor_errors_keep_their_cause() {
        use std::error::Error;
        let error = SensorReadError {
            sensor: "BME280",
            metric: Metric::Pressure,
            source: "i2c bus hung".into(),
        };
        assert_eq!(error.to_string(), "BME280: failed to read pressure");
        assert_eq!(error.source().unwrap().to_string(), "i2c bus hung");
    }
}
