//! Sensors on the Enviro+ board, read through their Linux Industrial I/O
//! (IIO) kernel drivers.
//!
//! Each driver exposes its channels under `/sys/bus/iio/devices/iio:deviceN/`,
//! either as a processed `in_<channel>_input` value, or as `in_<channel>_raw`
//! plus optional `_offset` and `_scale` attributes. Devices are located by
//! their `name` attribute on first use, and located again if they disappear,
//! so a sensor whose driver is loaded after startup is picked up without a
//! restart.
use super::{Sample, SensorPort};
use crate::Metric;
use anyhow::Context;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

pub const DEFAULT_ROOT: &str = "/sys/bus/iio/devices";

#[derive(Debug)]
pub struct IioDevice {
    root: PathBuf,
    names: &'static [&'static str],
    path: Option<PathBuf>,
}

/// LTR559 proximity and ambient light sensor (`ltr501` driver).
#[derive(Debug)]
pub struct Ltr559 {
    device: IioDevice,
}

/// BME280 temperature, pressure and humidity sensor (`bmp280` driver).
#[derive(Debug)]
pub struct Bme280 {
    device: IioDevice,
}

/// MICS6814 gas sensor, wired to the three single-ended inputs of an
/// ADS1015 ADC (`ti-ads1015` driver).
#[derive(Debug)]
pub struct Mics6814 {
    device: IioDevice,
}

// === impl IioDevice ===

impl IioDevice {
    pub fn new(root: impl Into<PathBuf>, names: &'static [&'static str]) -> Self {
        Self {
            root: root.into(),
            names,
            path: None,
        }
    }

    /// Reads a channel, converted to the units documented by the IIO ABI.
    pub fn read_channel(&mut self, channel: &str) -> anyhow::Result<f64> {
        let result = self.read_channel_inner(channel);
        if let Err(error) = &result {
            // if the device went away, look for it again next time.
            if is_not_found(error) {
                self.path = None;
            }
        }
        result
    }

    fn read_channel_inner(&mut self, channel: &str) -> anyhow::Result<f64> {
        let dir = self.locate()?;

        let input = dir.join(format!("in_{channel}_input"));
        if input.exists() {
            return read_value(&input);
        }

        let raw = read_value(&dir.join(format!("in_{channel}_raw")))?;
        let offset = read_optional(&dir.join(format!("in_{channel}_offset")))?.unwrap_or(0.0);
        let scale = read_optional(&dir.join(format!("in_{channel}_scale")))?.unwrap_or(1.0);
        Ok((raw + offset) * scale)
    }

    fn locate(&mut self) -> anyhow::Result<&Path> {
        if self.path.is_none() {
            let path = self.find()?;
            log::info!(target: "envlogger::iio", "found {} at {}", self.names.join("/"), path.display());
            self.path = Some(path);
        }

        self.path
            .as_deref()
            .context("IIO device path should have just been set")
    }

    fn find(&self) -> anyhow::Result<PathBuf> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("failed to list IIO devices in {}", self.root.display()))?;

        let mut dirs = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect::<Vec<_>>();
        dirs.sort();

        for dir in dirs {
            let Ok(name) = fs::read_to_string(dir.join("name")) else {
                continue;
            };
            if self.names.contains(&name.trim()) {
                return Ok(dir);
            }
        }

        Err(io::Error::from(io::ErrorKind::NotFound)).with_context(|| {
            format!(
                "no IIO device named {} in {}",
                self.names.join(" or "),
                self.root.display()
            )
        })
    }
}

fn read_value(path: &Path) -> anyhow::Result<f64> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    text.trim()
        .parse()
        .with_context(|| format!("invalid value {:?} in {}", text.trim(), path.display()))
}

fn read_optional(path: &Path) -> anyhow::Result<Option<f64>> {
    if path.exists() {
        read_value(path).map(Some)
    } else {
        Ok(None)
    }
}

fn is_not_found(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<io::Error>())
        .any(|error| error.kind() == io::ErrorKind::NotFound)
}

// === impl Ltr559 ===

impl Ltr559 {
    const NAMES: &'static [&'static str] = &["ltr559"];

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            device: IioDevice::new(root, Self::NAMES),
        }
    }
}

impl SensorPort for Ltr559 {
    fn name(&self) -> &'static str {
        "LTR559"
    }

    fn sample(&mut self, sample: &mut Sample<'_>) {
        sample.record(Metric::Proximity, self.device.read_channel("proximity"));
        sample.record(Metric::Lux, self.device.read_channel("illuminance"));
    }
}

// === impl Bme280 ===

impl Bme280 {
    const NAMES: &'static [&'static str] = &["bme280"];

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            device: IioDevice::new(root, Self::NAMES),
        }
    }
}

impl SensorPort for Bme280 {
    fn name(&self) -> &'static str {
        "BME280"
    }

    fn sample(&mut self, sample: &mut Sample<'_>) {
        // IIO reports millidegrees Celsius, kilopascals, and milli-percent RH.
        let temperature = self.device.read_channel("temp").map(|mc| mc / 1000.0);
        sample.record(Metric::Temperature, temperature);

        let pressure = self.device.read_channel("pressure").map(|kpa| kpa * 10.0);
        sample.record(Metric::Pressure, pressure);

        let humidity = self
            .device
            .read_channel("humidityrelative")
            .map(|milli| milli / 1000.0);
        sample.record(Metric::Humidity, humidity);
    }
}

// === impl Mics6814 ===

impl Mics6814 {
    const NAMES: &'static [&'static str] = &["ads1015", "ads1115"];

    /// Supply voltage across each sensing element's divider.
    const SUPPLY_VOLTS: f64 = 3.3;
    /// The fixed resistor in each element's voltage divider.
    const LOAD_OHMS: f64 = 56_000.0;

    const CHANNELS: [(Metric, &'static str); 3] = [
        (Metric::Oxidising, "voltage0"),
        (Metric::Reducing, "voltage1"),
        (Metric::Nh3, "voltage2"),
    ];

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            device: IioDevice::new(root, Self::NAMES),
        }
    }

    /// Converts the ADC voltage across a sensing element into the element's
    /// resistance, in Ohms.
    pub fn resistance(volts: f64) -> anyhow::Result<f64> {
        anyhow::ensure!(
            (0.0..Self::SUPPLY_VOLTS).contains(&volts),
            "{volts:.3} V is outside the divider range"
        );
        Ok(volts * Self::LOAD_OHMS / (Self::SUPPLY_VOLTS - volts))
    }
}

impl SensorPort for Mics6814 {
    fn name(&self) -> &'static str {
        "MICS6814"
    }

    fn sample(&mut self, sample: &mut Sample<'_>) {
        for (metric, channel) in Self::CHANNELS {
            // ADC channels are scaled to millivolts.
            let ohms = self
                .device
                .read_channel(channel)
                .and_then(|mv| Self::resistance(mv / 1000.0));
            sample.record(metric, ohms);
        }
    }
}
