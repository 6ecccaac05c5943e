use super::{ConnectionObserver, Transport};
use crate::{error::ConnectionError, Shutdown};
use anyhow::Context;
use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, MqttOptions, Outgoing, Packet, QoS,
};
use std::{thread, time::Duration};

/// Broker connection settings.
#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub qos: u8,
}

/// An MQTT client with its event loop running on a background thread.
///
/// The event loop owns the connection: it connects, reconnects after the
/// broker goes away, and reports what happens to a [`ConnectionObserver`].
/// Publishing only enqueues the message, so it never blocks on the network.
pub struct MqttTransport {
    client: Client,
    qos: QoS,
    events: Option<thread::JoinHandle<()>>,
}

const TARGET: &str = "envlogger::mqtt";

// rumqttc retries the connection each time the event loop is polled after an
// error, so this sets the reconnect interval.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const REQUEST_QUEUE: usize = 64;

impl MqttTransport {
    pub fn connect(
        settings: &MqttSettings,
        observer: impl ConnectionObserver + 'static,
        shutdown: Shutdown,
    ) -> anyhow::Result<Self> {
        let qos = qos(settings.qos)?;
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        anyhow::ensure!(
            settings.keep_alive.is_zero() || settings.keep_alive >= Duration::from_secs(1),
            "keep-alive must be zero or at least one second, not {:?}",
            settings.keep_alive,
        );
        options.set_keep_alive(settings.keep_alive);
        if let Some(username) = &settings.username {
            let password = settings.password.clone().unwrap_or_default();
            options.set_credentials(username, password);
        }

        log::info!(
            target: TARGET,
            "connecting to mqtt://{}:{} as {}...",
            settings.host,
            settings.port,
            settings.client_id
        );
        let (client, connection) = Client::new(options, REQUEST_QUEUE);
        let events = thread::Builder::new()
            .name("mqtt".into())
            .spawn(move || drive(connection, &observer, &shutdown))
            .context("failed to spawn MQTT event loop")?;

        Ok(Self {
            client,
            qos,
            events: Some(events),
        })
    }
}

impl Transport for MqttTransport {
    fn publish(&mut self, topic: &str, payload: Vec<u8>, retain: bool) -> anyhow::Result<()> {
        self.client
            .try_publish(topic, self.qos, retain, payload)
            .with_context(|| format!("failed to enqueue message for {topic}"))
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        let res = self
            .client
            .disconnect()
            .context("failed to send MQTT disconnect");
        if let Some(events) = self.events.take() {
            if events.join().is_err() {
                log::error!(target: TARGET, "MQTT event loop panicked");
            }
        }
        res
    }
}

fn qos(level: u8) -> anyhow::Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        level => anyhow::bail!("invalid MQTT QoS level {level}"),
    }
}

fn refused(code: ConnectReturnCode) -> Option<ConnectionError> {
    let code = match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    };
    ConnectionError::from_return_code(code)
}

fn drive(mut connection: Connection, observer: &impl ConnectionObserver, shutdown: &Shutdown) {
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => match refused(ack.code) {
                None => observer.on_connected(),
                Some(error) => observer.on_connection_error(error),
            },
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                log::debug!(target: TARGET, "disconnect sent");
                break;
            }
            Ok(event) => log::trace!(target: TARGET, "{event:?}"),
            Err(rumqttc::ConnectionError::RequestsDone) => break,
            Err(error) => {
                let error = match error {
                    rumqttc::ConnectionError::ConnectionRefused(code) => {
                        refused(code).unwrap_or(ConnectionError::Refused)
                    }
                    error => ConnectionError::Network(error.to_string()),
                };
                observer.on_connection_error(error);
                if !shutdown.sleep(RECONNECT_DELAY) {
                    break;
                }
            }
        }
    }
    log::debug!(target: TARGET, "event loop finished");
}
