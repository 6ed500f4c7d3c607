//! Raw transducer samples → calibrated physical values.
//!
//! The driver side is the [`RawSource`] trait: a 12-bit (by default) analog
//! sample per channel plus the digital temperature probe. Calibration is a
//! set of pure functions so each transform can be checked in isolation.
//!
//! Water level and light are normalised against the *configured* threshold
//! `max`, so changing a threshold changes what those sensors report.

use serde::Serialize;

use crate::config::{Calibration, SensorChannels};
use crate::quantity::Quantity;
use crate::thresholds::ThresholdStore;

// ---------------------------------------------------------------------------
// Driver boundary
// ---------------------------------------------------------------------------

pub trait RawSource: Send + Sync {
    /// One analog sample, `0..=full_scale_code`.
    fn read_raw(&mut self, channel: u8) -> u16;

    /// Degrees Celsius from the digital probe; NaN when the read fails.
    fn read_temperature(&mut self) -> f32;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReading {
    pub quantity: Quantity,
    pub value: f32,
}

// ---------------------------------------------------------------------------
// Calibration transforms
// ---------------------------------------------------------------------------

fn to_voltage(raw: u16, cal: &Calibration) -> f32 {
    raw as f32 * cal.supply_voltage / cal.full_scale_code as f32
}

/// Returns the scaled value and whether the probe voltage looked plausible.
pub fn co2_from_raw(raw: u16, cal: &Calibration) -> (f32, bool) {
    let v = to_voltage(raw, cal);
    let present = v >= cal.co2_min_voltage && v <= cal.co2_max_voltage;
    (v * cal.co2_scale, present)
}

pub fn water_level_from_raw(raw: u16, threshold_max: i32) -> f32 {
    raw as f32 / threshold_max as f32 * 100.0
}

pub fn light_from_raw(raw: u16, threshold_max: i32, cal: &Calibration) -> f32 {
    let v = to_voltage(raw, cal);
    let resistance = (cal.supply_voltage - v) * cal.light_series_ohms / v;
    (resistance / cal.light_series_ohms * threshold_max as f32).abs()
}

pub fn soil_humidity_from_raw(raw: u16, cal: &Calibration) -> f32 {
    let full = cal.full_scale_code as f32;
    (full - raw as f32) / full * 100.0
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

pub struct SensorReader {
    source: Box<dyn RawSource>,
    channels: SensorChannels,
    calibration: Calibration,
}

impl SensorReader {
    pub fn new(
        source: Box<dyn RawSource>,
        channels: SensorChannels,
        calibration: Calibration,
    ) -> Self {
        Self {
            source,
            channels,
            calibration,
        }
    }

    /// Calibrated value for `quantity`. Never fails and never returns a
    /// non-finite number; faults read as `0`.
    pub fn read(&mut self, quantity: Quantity, thresholds: &ThresholdStore) -> f32 {
        let cal = &self.calibration;
        let value = match quantity {
            Quantity::Co2 => {
                let raw = self.source.read_raw(self.channels.co2);
                let (value, present) = co2_from_raw(raw, cal);
                if !present {
                    tracing::warn!(
                        raw,
                        voltage = to_voltage(raw, cal),
                        "co2 probe absent or voltage out of band"
                    );
                }
                value
            }
            Quantity::WaterLevel => {
                let raw = self.source.read_raw(self.channels.water_level);
                water_level_from_raw(raw, thresholds.get(Quantity::WaterLevel).max)
            }
            Quantity::Light => {
                let raw = self.source.read_raw(self.channels.light);
                light_from_raw(raw, thresholds.get(Quantity::Light).max, cal)
            }
            Quantity::SoilHumidity => {
                let raw = self.source.read_raw(self.channels.soil_humidity);
                soil_humidity_from_raw(raw, cal)
            }
            Quantity::Temperature => {
                let t = self.source.read_temperature();
                if t.is_nan() {
                    tracing::warn!("temperature read failed, reporting 0");
                }
                t
            }
        };

        let value = finite_or_zero(value);
        tracing::trace!(%quantity, value, "sensor read");
        value
    }

    /// Every quantity, in enumeration order.
    pub fn snapshot(&mut self, thresholds: &ThresholdStore) -> Vec<SensorReading> {
        Quantity::ALL
            .iter()
            .map(|q| SensorReading {
                quantity: *q,
                value: self.read(*q, thresholds),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Fixed source (tests)
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================
