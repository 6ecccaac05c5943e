use anyhow::Context;
use clap::Parser;
use envlogger::{
    cpu,
    discovery::Discovery,
    logger,
    particulate::SnapshotCell,
    publish::{
        mqtt::{MqttSettings, MqttTransport},
        ConnectionState, Publisher, Transport,
    },
    sensor::iio::{Bme280, Ltr559, Mics6814},
    Collector, Config, Shutdown,
};
use std::{path::PathBuf, thread, time::Duration};

/// Publishes Enviro+ sensor readings to MQTT.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// JSON config file. Command-line flags override its values.
    #[arg(long, short = 'c', env = "ENVLOGGER_CONFIG")]
    config: Option<PathBuf>,

    /// MQTT broker host.
    #[arg(long, short = 'H')]
    host: Option<String>,

    /// MQTT broker port.
    #[arg(long, short = 'p')]
    port: Option<u16>,

    #[arg(long, env = "MQTT_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long)]
    client_id: Option<String>,

    /// Topic prefix.
    #[arg(long)]
    prefix: Option<String>,

    /// Room name, used in topics and entity names.
    #[arg(long, short = 'r')]
    room: Option<String>,

    /// Read the PMS5003 particulate matter sensor.
    #[arg(long)]
    use_pms5003: bool,

    /// Number of samples each published value is averaged over.
    #[arg(long, short = 'n')]
    num_samples: Option<usize>,

    /// Publish state values with the retain flag.
    #[arg(long)]
    retain: bool,

    #[arg(long)]
    qos: Option<u8>,

    /// Seconds between samples.
    #[arg(long, short = 'i')]
    interval: Option<f64>,

    /// Seconds to sample before publishing anything.
    #[arg(long, short = 'd')]
    delay: Option<f64>,

    #[arg(long)]
    iio_root: Option<PathBuf>,

    /// Serial port the PMS5003 is attached to.
    #[arg(long)]
    pms_port: Option<String>,

    /// Sysfs GPIO value file wired to the PMS5003's RESET pin.
    #[arg(long)]
    pms_reset_gpio: Option<PathBuf>,

    /// Don't publish Home Assistant discovery configs.
    #[arg(long)]
    no_discovery: bool,

    /// Log more. May be repeated.
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log less. May be repeated.
    #[arg(long, short = 'q', action = clap::ArgAction::Count)]
    quiet: u8,
}

impl Args {
    fn apply(self, config: &mut Config) -> anyhow::Result<()> {
        fn secs(secs: f64) -> anyhow::Result<Duration> {
            Duration::try_from_secs_f64(secs).with_context(|| format!("invalid duration {secs}"))
        }

        fn set<T>(field: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *field = value;
            }
        }

        set(&mut config.host, self.host);
        set(&mut config.port, self.port);
        set(&mut config.client_id, self.client_id);
        set(&mut config.prefix, self.prefix);
        set(&mut config.room, self.room);
        set(&mut config.num_samples, self.num_samples);
        set(&mut config.qos, self.qos);
        set(&mut config.iio_root, self.iio_root);
        set(&mut config.pms_port, self.pms_port);
        if self.username.is_some() {
            config.username = self.username;
        }
        if self.password.is_some() {
            config.password = self.password;
        }
        if self.pms_reset_gpio.is_some() {
            config.pms_reset_gpio = self.pms_reset_gpio;
        }
        config.use_pms5003 |= self.use_pms5003;
        config.retain |= self.retain;
        if let Some(interval) = self.interval {
            config.interval = secs(interval)?;
        }
        if let Some(delay) = self.delay {
            config.delay = secs(delay)?;
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let mut args = Args::parse();
    logger::init(logger::level_for(args.verbose, args.quiet))?;

    let mut config = match args.config.take() {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let discovery = !args.no_discovery;
    args.apply(&mut config)?;
    config.validate()?;
    if config.use_pms5003 && !cfg!(feature = "sensor-pms5003") {
        log::error!("PMS5003 support was not compiled in (enable the `sensor-pms5003` feature); not reading particulates");
        config.use_pms5003 = false;
    }

    log::info!("envlogger is go!");
    match cpu::temperature() {
        Ok(temp) => log::info!("CPU temperature: {temp:.1}°C"),
        Err(error) => log::debug!("no CPU temperature: {error:#}"),
    }

    let shutdown = Shutdown::new();
    ctrlc::set_handler({
        let shutdown = shutdown.clone();
        move || {
            log::info!("shutting down...");
            shutdown.trigger();
        }
    })
    .context("failed to install signal handler")?;

    let state = ConnectionState::new();
    let transport = MqttTransport::connect(
        &MqttSettings {
            client_id: config.client_id.clone(),
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            keep_alive: config.keep_alive,
            qos: config.qos,
        },
        state.clone(),
        shutdown.clone(),
    )
    .context("failed to start MQTT client")?;
    let mut publisher = Publisher::new(transport, &config.prefix, state);

    if discovery {
        let discovery = Discovery::new(&config.room, &config.client_id, config.use_pms5003);
        let failed = discovery.remove_sensor_config(&mut publisher).len()
            + discovery.sensor_config(&mut publisher).len();
        if failed > 0 {
            log::warn!("{failed} discovery messages could not be published");
        }
    }

    let mut collector = Collector::new(&config, publisher)?
        .with_sensor(Ltr559::new(&config.iio_root))
        .with_sensor(Bme280::new(&config.iio_root))
        .with_sensor(Mics6814::new(&config.iio_root));

    let pms_thread = if config.use_pms5003 {
        let cell = SnapshotCell::new();
        collector = collector.with_particulates(cell.clone());
        match spawn_pms5003(&config, cell, shutdown.clone()) {
            Ok(thread) => Some(thread),
            Err(error) => {
                log::error!("failed to spawn PMS5003 acquisition thread: {error}");
                None
            }
        }
    } else {
        None
    };

    collector.run(config.interval, config.delay, &shutdown);

    shutdown.trigger();
    if let Some(thread) = pms_thread {
        if thread.join().is_err() {
            log::error!("PMS5003 acquisition thread panicked");
        }
    }
    disconnect(collector.into_publisher(), &shutdown)
}

/// Disconnects from the broker. Once shutdown has begun, the MQTT event loop
/// may already have stopped, so a failed disconnect is only logged.
fn disconnect<T: Transport>(publisher: Publisher<T>, shutdown: &Shutdown) -> anyhow::Result<()> {
    match publisher.disconnect() {
        Err(error) if !shutdown.is_running() => {
            log::warn!("MQTT disconnect failed during shutdown: {error:#}");
            Ok(())
        }
        res => res,
    }
}

#[cfg(feature = "sensor-pms5003")]
fn spawn_pms5003(
    config: &Config,
    cell: SnapshotCell,
    shutdown: Shutdown,
) -> std::io::Result<thread::JoinHandle<()>> {
    use envlogger::{particulate::ParticulateAcquirer, retry::ExpBackoff, sensor::pms5003::Pms5003};

    let port = config.pms_port.clone();
    let reset_gpio = config.pms_reset_gpio.clone();
    ParticulateAcquirer::spawn_with_bringup(
        move || Pms5003::bringup(&port, reset_gpio.clone()),
        ExpBackoff::new(Duration::from_secs(1)).with_max(Duration::from_secs(60)),
        cell,
        shutdown,
    )
}

#[cfg(not(feature = "sensor-pms5003"))]
fn spawn_pms5003(_: &Config, _: SnapshotCell, _: Shutdown) -> std::io::Result<thread::JoinHandle<()>> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "built without the `sensor-pms5003` feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_file() {
        let mut config = Config {
            room: "attic".to_owned(),
            port: 8883,
            ..Config::default()
        };
        let args = Args::try_parse_from([
            "envlogger",
            "--room",
            "livingroom",
            "--use-pms5003",
            "-i",
            "2.5",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        args.apply(&mut config).unwrap();

        assert_eq!(config.room, "livingroom");
        assert_eq!(config.port, 8883);
        assert!(config.use_pms5003);
        assert_eq!(config.interval, Duration::from_millis(2500));
    }

    #[test]
    fn rejects_negative_durations() {
        let args = Args::try_parse_from(["envlogger", "--delay=-1"]).unwrap();
        assert!(args.apply(&mut Config::default()).is_err());
    }

    struct Unreachable;

    impl Transport for Unreachable {
        fn publish(&mut self, _: &str, _: Vec<u8>, _: bool) -> anyhow::Result<()> {
            anyhow::bail!("client request queue closed")
        }

        fn disconnect(&mut self) -> anyhow::Result<()> {
            anyhow::bail!("client request queue closed")
        }
    }

    #[test]
    fn disconnect_failure_after_shutdown_is_not_fatal() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let publisher = Publisher::new(Unreachable, "homeassistant", ConnectionState::new());
        assert!(disconnect(publisher, &shutdown).is_ok());
    }

    #[test]
    fn disconnect_failure_while_running_is_an_error() {
        let shutdown = Shutdown::new();
        let publisher = Publisher::new(Unreachable, "homeassistant", ConnectionState::new());
        assert!(disconnect(publisher, &shutdown).is_err());
    }
}
