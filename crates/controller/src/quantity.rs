//! Closed identifier sets: the monitored quantities and the controllable
//! devices. External strings are decoded here, once, at the boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Lookup errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("unknown quantity '{0}'")]
    UnknownQuantity(String),
    #[error("unknown device '{0}'")]
    UnknownDevice(String),
}

// ---------------------------------------------------------------------------
// Quantity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Temperature,
    SoilHumidity,
    Co2,
    Light,
    WaterLevel,
}

impl Quantity {
    /// Enumeration order. Snapshots, telemetry and threshold listings follow it.
    pub const ALL: [Quantity; 5] = [
        Quantity::Temperature,
        Quantity::SoilHumidity,
        Quantity::Co2,
        Quantity::Light,
        Quantity::WaterLevel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::SoilHumidity => "soil_humidity",
            Self::Co2 => "co2",
            Self::Light => "light",
            Self::WaterLevel => "water_level",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Temperature => 0,
            Self::SoilHumidity => 1,
            Self::Co2 => 2,
            Self::Light => 3,
            Self::WaterLevel => 4,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact match only. The short names used by the first firmware's web page
/// (`temp`, `soil`, `humidity`, `water`, `tank`) are still accepted.
impl FromStr for Quantity {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" | "temp" => Ok(Self::Temperature),
            "soil_humidity" | "soil" | "humidity" => Ok(Self::SoilHumidity),
            "co2" => Ok(Self::Co2),
            "light" => Ok(Self::Light),
            "water_level" | "water" | "tank" => Ok(Self::WaterLevel),
            _ => Err(LookupError::UnknownQuantity(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Fan,
    Pump,
    Light,
}

impl Device {
    pub const ALL: [Device; 3] = [Device::Fan, Device::Pump, Device::Light];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fan => "fan",
            Self::Pump => "pump",
            Self::Light => "light",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Fan => 0,
            Self::Pump => 1,
            Self::Light => 2,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fan" => Ok(Self::Fan),
            "pump" => Ok(Self::Pump),
            "light" => Ok(Self::Light),
            _ => Err(LookupError::UnknownDevice(s.to_string())),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_parses_canonical_names() {
        for q in Quantity::ALL {
            assert_eq!(q.as_str().parse::<Quantity>(), Ok(q));
        }
    }

    #[test]
    fn quantity_parses_legacy_names() {
        assert_eq!("temp".parse::<Quantity>(), Ok(Quantity::Temperature));
        assert_eq!("soil".parse::<Quantity>(), Ok(Quantity::SoilHumidity));
        assert_eq!("tank".parse::<Quantity>(), Ok(Quantity::WaterLevel));
    }

    #[test]
    fn quantity_rejects_case_variants_and_prefixes() {
        assert!("CO2".parse::<Quantity>().is_err());
        assert!("temperatur".parse::<Quantity>().is_err());
        assert!(" light".parse::<Quantity>().is_err());
        assert_eq!(
            "pressure".parse::<Quantity>(),
            Err(LookupError::UnknownQuantity("pressure".into()))
        );
    }

    #[test]
    fn quantity_indices_are_distinct_and_dense() {
        let mut seen = [false; 5];
        for q in Quantity::ALL {
            assert!(!seen[q.index()]);
            seen[q.index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn device_parse_round_trips_and_rejects_unknown() {
        for d in Device::ALL {
            assert_eq!(d.as_str().parse::<Device>(), Ok(d));
        }
        assert_eq!(
            "heater".parse::<Device>(),
            Err(LookupError::UnknownDevice("heater".into()))
        );
        assert!("Fan".parse::<Device>().is_err());
    }

    #[test]
    fn quantity_serializes_snake_case() {
        let json = serde_json::to_string(&Quantity::SoilHumidity).unwrap();
        assert_eq!(json, "\"soil_humidity\"");
    }
}
