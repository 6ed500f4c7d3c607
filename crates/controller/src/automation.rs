//! Threshold rules: calibrated reading + bounds → actuator transitions.
//!
//! Rules are evaluated in a fixed order against one snapshot. The fan is
//! shared by the co2 and temperature rules; decisions are applied in rule
//! order, so temperature wins when both fire in the same phase.
//!
//! There is no hysteresis: a reading exactly on a bound, or strictly inside
//! `[min, max]`, leaves the device where it is.

use serde::Serialize;

use crate::actuators::ActuatorController;
use crate::quantity::{Device, Quantity};
use crate::sensors::SensorReading;
use crate::thresholds::{Threshold, ThresholdStore};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// What a rule does when the reading leaves its band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    /// Above max → device on; below min → device off (ventilation).
    HighTurnsOn,
    /// Below min → device on; above max → device off (irrigation, lighting).
    LowTurnsOn,
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub quantity: Quantity,
    pub device: Device,
    polarity: Polarity,
}

/// Evaluation order.
pub const RULES: [Rule; 4] = [
    Rule {
        quantity: Quantity::Co2,
        device: Device::Fan,
        polarity: Polarity::HighTurnsOn,
    },
    Rule {
        quantity: Quantity::Temperature,
        device: Device::Fan,
        polarity: Polarity::HighTurnsOn,
    },
    Rule {
        quantity: Quantity::SoilHumidity,
        device: Device::Pump,
        polarity: Polarity::LowTurnsOn,
    },
    Rule {
        quantity: Quantity::Light,
        device: Device::Light,
        polarity: Polarity::LowTurnsOn,
    },
];

fn rule_for(quantity: Quantity) -> Option<&'static Rule> {
    RULES.iter().find(|r| r.quantity == quantity)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Decision {
    pub quantity: Quantity,
    pub device: Device,
    pub on: bool,
    pub value: f32,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Desired device state for one reading, or `None` when the reading is
/// within bounds or the quantity drives nothing (water level).
pub fn evaluate(quantity: Quantity, value: f32, threshold: Threshold) -> Option<(Device, bool)> {
    let rule = rule_for(quantity)?;
    let above = value > threshold.max as f32;
    let below = value < threshold.min as f32;

    let on = match (rule.polarity, above, below) {
        (Polarity::HighTurnsOn, true, _) => true,
        (Polarity::HighTurnsOn, _, true) => false,
        (Polarity::LowTurnsOn, _, true) => true,
        (Polarity::LowTurnsOn, true, _) => false,
        _ => return None,
    };
    Some((rule.device, on))
}

/// Decisions for one snapshot, in rule order. Pure.
pub fn decide(snapshot: &[SensorReading], thresholds: &ThresholdStore) -> Vec<Decision> {
    RULES
        .iter()
        .filter_map(|rule| {
            let reading = snapshot.iter().find(|r| r.quantity == rule.quantity)?;
            let (device, on) =
                evaluate(rule.quantity, reading.value, thresholds.get(rule.quantity))?;
            Some(Decision {
                quantity: rule.quantity,
                device,
                on,
                value: reading.value,
            })
        })
        .collect()
}

/// Applies decisions in order; returns the ones that changed a device.
pub fn apply(decisions: &[Decision], actuators: &mut ActuatorController) -> Vec<Decision> {
    decisions
        .iter()
        .filter(|d| actuators.set(d.device, d.on))
        .copied()
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn t(quantity: Quantity, min: i32, max: i32) -> Threshold {
        Threshold { quantity, min, max }
    }

    fn snapshot(values: &[(Quantity, f32)]) -> Vec<SensorReading> {
        values
            .iter()
            .map(|(quantity, value)| SensorReading {
                quantity: *quantity,
                value: *value,
            })
            .collect()
    }

    fn controller() -> ActuatorController {
        ActuatorController::new(&[(Device::Fan, 25), (Device::Pump, 26), (Device::Light, 27)], false)
            .unwrap()
    }

    // -- evaluate -----------------------------------------------------------

    #[test]
    fn co2_above_max_turns_fan_on() {
        let th = t(Quantity::Co2, 400, 1000);
        assert_eq!(evaluate(Quantity::Co2, 1001.0, th), Some((Device::Fan, true)));
        assert_eq!(evaluate(Quantity::Co2, 399.0, th), Some((Device::Fan, false)));
    }

    #[test]
    fn soil_below_min_turns_pump_on() {
        let th = t(Quantity::SoilHumidity, 30, 80);
        assert_eq!(evaluate(Quantity::SoilHumidity, 10.0, th), Some((Device::Pump, true)));
        assert_eq!(evaluate(Quantity::SoilHumidity, 90.0, th), Some((Device::Pump, false)));
    }

    #[test]
    fn light_below_min_turns_light_on() {
        let th = t(Quantity::Light, 1000, 20000);
        assert_eq!(evaluate(Quantity::Light, 500.0, th), Some((Device::Light, true)));
        assert_eq!(evaluate(Quantity::Light, 25000.0, th), Some((Device::Light, false)));
    }

    #[test]
    fn bounds_are_exclusive() {
        let th = t(Quantity::Temperature, 10, 35);
        assert_eq!(evaluate(Quantity::Temperature, 35.0, th), None);
        assert_eq!(evaluate(Quantity::Temperature, 10.0, th), None);
        assert_eq!(evaluate(Quantity::Temperature, 20.0, th), None);
        assert_eq!(evaluate(Quantity::Temperature, 35.01, th), Some((Device::Fan, true)));
    }

    #[test]
    fn water_level_drives_nothing() {
        let th = t(Quantity::WaterLevel, 1000, 9000);
        assert_eq!(evaluate(Quantity::WaterLevel, 0.0, th), None);
        assert_eq!(evaluate(Quantity::WaterLevel, 1e6, th), None);
    }

    #[test]
    fn inverted_threshold_fires_high_branch_first() {
        // min > max: the value is both "above" and "below". The store accepts
        // this, so the outcome must still be deterministic.
        let th = t(Quantity::Co2, 1000, 400);
        assert_eq!(evaluate(Quantity::Co2, 700.0, th), Some((Device::Fan, true)));
        let th = t(Quantity::SoilHumidity, 80, 30);
        assert_eq!(evaluate(Quantity::SoilHumidity, 50.0, th), Some((Device::Pump, true)));
    }

    // -- decide -------------------------------------------------------------

    #[test]
    fn decide_follows_rule_order() {
        let store = ThresholdStore::with_defaults();
        let snap = snapshot(&[
            (Quantity::Temperature, 40.0),
            (Quantity::SoilHumidity, 10.0),
            (Quantity::Co2, 1500.0),
            (Quantity::Light, 100.0),
            (Quantity::WaterLevel, 50.0),
        ]);
        let order: Vec<Quantity> = decide(&snap, &store).iter().map(|d| d.quantity).collect();
        assert_eq!(
            order,
            vec![
                Quantity::Co2,
                Quantity::Temperature,
                Quantity::SoilHumidity,
                Quantity::Light
            ]
        );
    }

    #[test]
    fn decide_all_in_band_is_empty() {
        let store = ThresholdStore::with_defaults();
        let snap = snapshot(&[
            (Quantity::Temperature, 20.0),
            (Quantity::SoilHumidity, 50.0),
            (Quantity::Co2, 600.0),
            (Quantity::Light, 5000.0),
            (Quantity::WaterLevel, 50.0),
        ]);
        assert!(decide(&snap, &store).is_empty());
    }

    #[test]
    fn decide_skips_missing_readings() {
        let store = ThresholdStore::with_defaults();
        let snap = snapshot(&[(Quantity::Light, 100.0)]);
        let decisions = decide(&snap, &store);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].device, Device::Light);
    }

    // -- apply --------------------------------------------------------------

    #[test]
    fn temperature_wins_fan_conflict() {
        // co2 high wants the fan on, temperature low wants it off.
        let store = ThresholdStore::with_defaults();
        let snap = snapshot(&[(Quantity::Co2, 1500.0), (Quantity::Temperature, 5.0)]);
        let mut act = controller();
        apply(&decide(&snap, &store), &mut act);
        assert!(!act.get(Device::Fan));

        // And the other way round.
        let snap = snapshot(&[(Quantity::Co2, 100.0), (Quantity::Temperature, 40.0)]);
        apply(&decide(&snap, &store), &mut act);
        assert!(act.get(Device::Fan));
    }

    #[test]
    fn apply_reports_only_changes() {
        let store = ThresholdStore::with_defaults();
        let snap = snapshot(&[(Quantity::SoilHumidity, 10.0), (Quantity::Light, 100.0)]);
        let mut act = controller();

        let decisions = decide(&snap, &store);
        assert_eq!(apply(&decisions, &mut act).len(), 2);
        assert!(apply(&decisions, &mut act).is_empty());
        assert!(act.get(Device::Pump));
        assert!(act.get(Device::Light));
    }

    #[test]
    fn fan_follows_co2_then_holds_in_band() {
        let mut store = ThresholdStore::with_defaults();
        store.set(Quantity::Co2, 400, 1000);
        let mut act = controller();

        let steps = [(1200.0, true, 1), (300.0, false, 1), (700.0, false, 0)];
        for (ppm, fan, changes) in steps {
            let snap = snapshot(&[(Quantity::Co2, ppm)]);
            let applied = apply(&decide(&snap, &store), &mut act);
            assert_eq!(act.get(Device::Fan), fan, "co2 = {ppm}");
            assert_eq!(applied.len(), changes, "co2 = {ppm}");
        }
    }

    #[test]
    fn in_band_temperature_leaves_fan_alone() {
        let mut store = ThresholdStore::with_defaults();
        store.set(Quantity::Temperature, 10, 35);
        let snap = snapshot(&[(Quantity::Temperature, 20.0)]);

        for fan in [true, false] {
            let mut act = controller();
            act.set(Device::Fan, fan);
            assert!(apply(&decide(&snap, &store), &mut act).is_empty());
            assert_eq!(act.get(Device::Fan), fan);
        }
    }

    #[test]
    fn in_band_reading_keeps_device_state() {
        let store = ThresholdStore::with_defaults();
        let mut act = controller();
        act.set(Device::Pump, true);
        let snap = snapshot(&[(Quantity::SoilHumidity, 50.0)]);
        apply(&decide(&snap, &store), &mut act);
        assert!(act.get(Device::Pump));
    }
}
