//! Unit conversions applied to raw driver values before they are recorded.
//!
//! Downstream consumers expect these exact units and precisions, so they are
//! applied once, at read time, rather than at publish time.
use crate::Metric;

/// Fixed correction applied to the BME280's relative humidity, which reads low
/// when the sensor sits next to the Pi's CPU.
pub const HUMIDITY_COMPENSATION: f64 = 1.3;

/// Converts a raw driver value for `metric` into the unit it is reported in.
#[must_use]
pub fn normalize(metric: Metric, raw: f64) -> f64 {
    match metric {
        Metric::Pressure => pressure_pa(raw),
        Metric::Humidity => compensate_humidity(raw),
        Metric::Oxidising | Metric::Reducing | Metric::Nh3 => gas_kohms(raw),
        _ => raw,
    }
}

/// Converts a pressure in hectopascals to whole pascals, rounded to the
/// nearest 10 Pa (ties to even).
#[must_use]
pub fn pressure_pa(hpa: f64) -> f64 {
    let pa = (hpa * 100.0).trunc();
    (pa / 10.0).round_ties_even() * 10.0
}

/// Applies [`HUMIDITY_COMPENSATION`] to a relative humidity percentage,
/// keeping one decimal place.
#[must_use]
pub fn compensate_humidity(rel_humidity_percent: f64) -> f64 {
    round_tenths(rel_humidity_percent * HUMIDITY_COMPENSATION)
}

/// Converts a gas sensor resistance in Ohms to whole kilo-Ohms, truncating.
#[must_use]
pub fn gas_kohms(ohms: f64) -> f64 {
    (ohms / 1000.0).trunc()
}

/// Rounds to one decimal place.
#[must_use]
pub fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
