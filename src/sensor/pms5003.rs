use crate::{
    particulate::{ParticulateSensor, ParticulateSnapshot},
    retry::{ExpBackoff, Retry},
};
use anyhow::Context;
use serialport::{ClearBuffer, SerialPort};
use std::{
    fs,
    path::PathBuf,
    thread,
    time::Duration,
};

pub struct Pms5003 {
    sensor: pms5003::Pms5003<Box<dyn SerialPort>>,
    reset_gpio: Option<PathBuf>,
}

const NAME: &str = "PMS5003";

impl Pms5003 {
    const BAUD: u32 = 9600;
    // the sensor sends a frame every 200-800 ms in active mode; if nothing
    // arrives for this long it has probably locked up.
    const READ_TIMEOUT: Duration = Duration::from_secs(5);
    const RESET_PULSE: Duration = Duration::from_millis(100);

    /// Opens the sensor's serial port.
    ///
    /// `reset_gpio` is the sysfs `value` file of the GPIO wired to the
    /// sensor's active-low RESET pin, if there is one.
    pub fn bringup(port: &str, reset_gpio: Option<PathBuf>) -> anyhow::Result<Self> {
        log::info!(target: NAME, "connecting to {NAME} on {port}...");
        let serial = Retry::new(5)
            .with_target("envlogger::pms5003")
            .with_backoff(ExpBackoff::new(Duration::from_millis(250)).with_max(Duration::from_secs(2)))
            .with_predicate(|error: &serialport::Error| {
                // if the port doesn't exist, retrying won't make it exist.
                !matches!(error.kind(), serialport::ErrorKind::NoDevice)
            })
            .run(|| {
                serialport::new(port, Self::BAUD)
                    .timeout(Self::READ_TIMEOUT)
                    .open()
            })
            .with_context(|| format!("failed to open {NAME} serial port {port}"))?;
        log::info!(target: NAME, "connected to {NAME}");

        Ok(Self {
            sensor: pms5003::Pms5003::new(serial),
            reset_gpio,
        })
    }

    fn pulse_reset(&self) -> anyhow::Result<()> {
        let Some(gpio) = &self.reset_gpio else {
            return Ok(());
        };
        fs::write(gpio, "0").with_context(|| format!("failed to drive {} low", gpio.display()))?;
        thread::sleep(Self::RESET_PULSE);
        fs::write(gpio, "1").with_context(|| format!("failed to drive {} high", gpio.display()))?;
        Ok(())
    }
}

impl ParticulateSensor for Pms5003 {
    const NAME: &'static str = NAME;

    fn read(&mut self) -> anyhow::Result<ParticulateSnapshot> {
        let reading = self
            .sensor
            .read()
            .with_context(|| format!("error reading from {NAME}"))?;
        log::debug!(target: NAME, "{reading}");
        Ok(reading.into())
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.pulse_reset()?;
        // whatever was buffered before the reset is stale, or a partial frame.
        self.sensor
            .port_mut()
            .clear(ClearBuffer::Input)
            .with_context(|| format!("failed to clear {NAME} input buffer"))?;
        Ok(())
    }
}

impl From<pms5003::Reading> for ParticulateSnapshot {
    fn from(reading: pms5003::Reading) -> Self {
        Self {
            pm10: reading.pm1_0_standard.into(),
            pm25: reading.pm2_5_standard.into(),
            pm100: reading.pm10_0_standard.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_standard_particle_concentrations() {
        let reading = pms5003::Reading {
            pm1_0_standard: 3,
            pm2_5_standard: 5,
            pm10_0_standard: 8,
            pm1_0: 30,
            pm2_5: 50,
            pm10_0: 80,
            ..Default::default()
        };
        let snapshot = ParticulateSnapshot::from(reading);
        assert_eq!(
            snapshot,
            ParticulateSnapshot {
                pm10: 3.0,
                pm25: 5.0,
                pm100: 8.0
            }
        );
    }
}
