use crate::error::{ConnectionError, PublishError};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

pub mod mqtt;

/// A pub/sub client that can deliver a payload to a topic.
pub trait Transport {
    /// Hands a message to the client for delivery.
    ///
    /// This must not wait on the network. Delivery to a broker that is
    /// currently unreachable is the client's business.
    fn publish(&mut self, topic: &str, payload: Vec<u8>, retain: bool) -> anyhow::Result<()>;

    fn disconnect(&mut self) -> anyhow::Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn publish(&mut self, topic: &str, payload: Vec<u8>, retain: bool) -> anyhow::Result<()> {
        (**self).publish(topic, payload, retain)
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        (**self).disconnect()
    }
}

/// Notified by a transport's connection management as the broker connection
/// comes and goes.
pub trait ConnectionObserver: Send + Sync {
    fn on_connected(&self);

    fn on_connection_error(&self, error: ConnectionError);
}

/// The last observed state of the broker connection.
#[derive(Clone, Debug, Default)]
pub struct ConnectionState(Arc<Mutex<ConnectionStatus>>);

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// The most recent connection error, kept after reconnecting for
    /// diagnostics.
    pub last_error: Option<ConnectionError>,
}

/// What a message carries.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// A smoothed sensor value, sent as decimal text with one decimal place.
    Value(f64),
    /// A structured payload, sent as JSON.
    Json(String),
    /// An empty payload; retained, this clears the topic.
    Empty,
}

/// Publishes to topics under a fixed prefix.
#[derive(Debug)]
pub struct Publisher<T> {
    transport: T,
    prefix: String,
    state: ConnectionState,
}

// === impl ConnectionState ===

impl ConnectionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status().connected
    }

    #[must_use]
    pub fn last_error(&self) -> Option<ConnectionError> {
        self.status().last_error
    }
}

impl ConnectionObserver for ConnectionState {
    fn on_connected(&self) {
        let mut status = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if !status.connected {
            log::info!(target: "envlogger::mqtt", "connected to broker");
        }
        status.connected = true;
    }

    fn on_connection_error(&self, error: ConnectionError) {
        let mut status = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if status.connected || status.last_error.as_ref() != Some(&error) {
            log::warn!(target: "envlogger::mqtt", "broker connection failed: {error}");
        }
        status.connected = false;
        status.last_error = Some(error);
    }
}

// === impl Payload ===

impl Payload {
    pub fn json<S: Serialize>(value: &S) -> Result<Self, serde_json::Error> {
        serde_json::to_string(value).map(Payload::Json)
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Value(value) => format!("{value:.1}").into_bytes(),
            Payload::Json(json) => json.into_bytes(),
            Payload::Empty => Vec::new(),
        }
    }
}

// === impl Publisher ===

impl<T: Transport> Publisher<T> {
    pub fn new(transport: T, prefix: &str, state: ConnectionState) -> Self {
        Self {
            transport,
            prefix: prefix.trim_matches('/').to_owned(),
            state,
        }
    }

    /// The full topic for a prefix-relative `suffix`.
    #[must_use]
    pub fn topic(&self, suffix: &str) -> String {
        let suffix = suffix.trim_start_matches('/');
        if self.prefix.is_empty() {
            suffix.to_owned()
        } else {
            format!("{}/{suffix}", self.prefix)
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn publish(&mut self, suffix: &str, payload: Payload, retain: bool) -> Result<(), PublishError> {
        let topic = self.topic(suffix);
        log::trace!(target: "envlogger::mqtt", "publish {topic} = {payload:?} (retain={retain})");
        match self.transport.publish(&topic, payload.into_bytes(), retain) {
            Ok(()) => Ok(()),
            Err(error) => {
                if !self.state.is_connected() {
                    log::debug!(target: "envlogger::mqtt", "publishing to {topic} while disconnected");
                }
                Err(PublishError::Transport {
                    topic,
                    source: error.into(),
                })
            }
        }
    }

    pub fn publish_value(&mut self, suffix: &str, value: f64, retain: bool) -> Result<(), PublishError> {
        self.publish(suffix, Payload::Value(value), retain)
    }

    pub fn publish_json<S: Serialize>(
        &mut self,
        suffix: &str,
        value: &S,
        retain: bool,
    ) -> Result<(), PublishError> {
        let payload = Payload::json(value).map_err(|source| PublishError::Encode {
            topic: self.topic(suffix),
            source,
        })?;
        self.publish(suffix, payload, retain)
    }

    #[must_use]
    pub fn connection_state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn disconnect(mut self) -> anyhow::Result<()> {
        log::info!(target: "envlogger::mqtt", "disconnecting from broker");
        self.transport.disconnect()
    }
}
