//! Min/max bounds per monitored quantity.
//!
//! The store is plain data. It does not check `min <= max`; the HTTP update
//! handler applies that policy before calling [`ThresholdStore::set`].

use serde::{Deserialize, Serialize};

use crate::quantity::{LookupError, Quantity};

/// Compiled-in defaults, applied at every start.
const DEFAULTS: [(Quantity, i32, i32); 5] = [
    (Quantity::Temperature, 10, 35),
    (Quantity::SoilHumidity, 30, 80),
    (Quantity::Co2, 400, 1000),
    (Quantity::Light, 1000, 20000),
    (Quantity::WaterLevel, 1000, 9000),
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold {
    pub quantity: Quantity,
    pub min: i32,
    pub max: i32,
}

/// Wire shape of one threshold: `{"min": .., "max": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: i32,
    pub max: i32,
}

impl From<Threshold> for Bounds {
    fn from(t: Threshold) -> Self {
        Self {
            min: t.min,
            max: t.max,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdStore {
    entries: [Threshold; 5],
}

// ---------------------------------------------------------------------------
// Accessors
// ---------------------------------------------------------------------------

impl ThresholdStore {
    pub fn with_defaults() -> Self {
        let mut entries = [Threshold {
            quantity: Quantity::Temperature,
            min: 0,
            max: 0,
        }; 5];
        for (quantity, min, max) in DEFAULTS {
            entries[quantity.index()] = Threshold { quantity, min, max };
        }
        Self { entries }
    }

    pub fn get(&self, quantity: Quantity) -> Threshold {
        self.entries[quantity.index()]
    }

    pub fn get_by_name(&self, name: &str) -> Result<Threshold, LookupError> {
        let quantity: Quantity = name.parse()?;
        Ok(self.get(quantity))
    }

    pub fn set(&mut self, quantity: Quantity, min: i32, max: i32) {
        let entry = &mut self.entries[quantity.index()];
        entry.min = min;
        entry.max = max;
        tracing::debug!(%quantity, min, max, "threshold updated");
    }

    pub fn set_by_name(&mut self, name: &str, min: i32, max: i32) -> Result<(), LookupError> {
        let quantity: Quantity = name.parse()?;
        self.set(quantity, min, max);
        Ok(())
    }

    /// All thresholds in enumeration order.
    pub fn list(&self) -> Vec<(Quantity, Threshold)> {
        Quantity::ALL.iter().map(|q| (*q, self.get(*q))).collect()
    }
}

impl Default for ThresholdStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
