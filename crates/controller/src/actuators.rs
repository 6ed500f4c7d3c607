//! Fan, pump and grow-light outputs. The `gpio` feature gates the real rppal
//! driver; without it, a mock board records levels and logs transitions.

use anyhow::Result;
use std::collections::HashMap;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

use crate::quantity::{Device, LookupError};

// ---------------------------------------------------------------------------
// Real GPIO output board (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct OutputBoard {
    pins: HashMap<Device, OutputPin>,
    active_low: bool, // many relay boards are active-low
}

#[cfg(feature = "gpio")]
impl OutputBoard {
    pub(crate) fn new(mapping: &[(Device, u8)], active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = HashMap::new();

        for (device, pin_num) in mapping {
            let pin = gpio.get(*pin_num)?.into_output();
            pins.insert(*device, pin);
        }

        let mut board = Self { pins, active_low };
        for device in Device::ALL {
            board.drive(device, false);
        }
        Ok(board)
    }

    pub(crate) fn drive(&mut self, device: Device, on: bool) {
        let Some(pin) = self.pins.get_mut(&device) else {
            tracing::warn!(%device, "no output pin mapped");
            return;
        };
        // active-low: LOW = ON. active-high: HIGH = ON.
        if on != self.active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
    }
}

// ---------------------------------------------------------------------------
// Mock output board (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct OutputBoard {
    pub(super) levels: HashMap<Device, bool>,
}

#[cfg(not(feature = "gpio"))]
impl OutputBoard {
    pub(crate) fn new(mapping: &[(Device, u8)], _active_low: bool) -> Result<Self> {
        let mut levels = HashMap::new();
        for (device, pin_num) in mapping {
            tracing::info!(%device, gpio = pin_num, "mock output registered (not wired)");
            levels.insert(*device, false);
        }
        Ok(Self { levels })
    }

    pub(crate) fn drive(&mut self, device: Device, on: bool) {
        match self.levels.get_mut(&device) {
            Some(level) => {
                if *level != on {
                    tracing::debug!(%device, on, "mock output transition");
                }
                *level = on;
            }
            None => tracing::warn!(%device, "no output pin mapped"),
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Sole owner of the recorded on/off state of every device. Every `set`
/// drives the output, even when the recorded state does not change.
pub struct ActuatorController {
    board: OutputBoard,
    states: [bool; 3],
}

impl ActuatorController {
    /// All devices start off.
    pub fn new(mapping: &[(Device, u8)], active_low: bool) -> Result<Self> {
        let board = OutputBoard::new(mapping, active_low)?;
        Ok(Self {
            board,
            states: [false; 3],
        })
    }

    /// Returns `true` if the recorded state changed.
    pub fn set(&mut self, device: Device, on: bool) -> bool {
        self.board.drive(device, on);
        let slot = &mut self.states[device.index()];
        let changed = *slot != on;
        *slot = on;
        if changed {
            tracing::info!(%device, on, "actuator switched");
        }
        changed
    }

    pub fn set_by_name(&mut self, name: &str, on: bool) -> Result<bool, LookupError> {
        let device: Device = name.parse()?;
        Ok(self.set(device, on))
    }

    pub fn get(&self, device: Device) -> bool {
        self.states[device.index()]
    }

    /// Unknown names read as off.
    pub fn get_by_name(&self, name: &str) -> bool {
        name.parse::<Device>().map(|d| self.get(d)).unwrap_or(false)
    }

    pub fn all_off(&mut self) {
        for device in Device::ALL {
            self.set(device, false);
        }
    }

    /// `(device, on)` in enumeration order.
    pub fn list(&self) -> Vec<(Device, bool)> {
        Device::ALL.iter().map(|d| (*d, self.get(*d))).collect()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    fn mapping() -> Vec<(Device, u8)> {
        vec![(Device::Fan, 25), (Device::Pump, 26), (Device::Light, 27)]
    }

    fn controller() -> ActuatorController {
        ActuatorController::new(&mapping(), false).unwrap()
    }

    // -- OutputBoard (mock) -------------------------------------------------

    #[test]
    fn board_new_registers_every_device_low() {
        let board = OutputBoard::new(&mapping(), true).unwrap();
        assert_eq!(board.levels.len(), 3);
        assert!(board.levels.values().all(|on| !on));
    }

    #[test]
    fn board_drive_unmapped_device_does_not_panic() {
        let mut board = OutputBoard::new(&[(Device::Fan, 25)], false).unwrap();
        board.drive(Device::Pump, true);
        assert_eq!(board.levels.len(), 1);
    }

    // -- ActuatorController -------------------------------------------------

    #[test]
    fn starts_all_off() {
        let c = controller();
        for d in Device::ALL {
            assert!(!c.get(d));
        }
    }

    #[test]
    fn set_reports_change_once() {
        let mut c = controller();
        assert!(c.set(Device::Pump, true));
        assert!(!c.set(Device::Pump, true));
        assert!(c.get(Device::Pump));
        assert!(c.set(Device::Pump, false));
        assert!(!c.get(Device::Pump));
    }

    #[test]
    fn set_drives_output_even_without_change() {
        let mut c = controller();
        c.set(Device::Fan, true);
        // Someone flips the pin behind the controller's back.
        c.board.levels.insert(Device::Fan, false);
        assert!(!c.set(Device::Fan, true));
        assert!(c.board.levels[&Device::Fan]);
    }

    #[test]
    fn set_by_name_unknown_device_leaves_state_untouched() {
        let mut c = controller();
        let before = c.list();
        assert_eq!(
            c.set_by_name("heater", true),
            Err(LookupError::UnknownDevice("heater".into()))
        );
        assert_eq!(c.list(), before);
    }

    #[test]
    fn set_by_name_known_device() {
        let mut c = controller();
        assert_eq!(c.set_by_name("light", true), Ok(true));
        assert!(c.get(Device::Light));
        assert!(c.get_by_name("light"));
    }

    #[test]
    fn get_by_name_unknown_is_false() {
        let mut c = controller();
        c.set(Device::Fan, true);
        assert!(!c.get_by_name("heater"));
        assert!(!c.get_by_name("Fan"));
    }

    #[test]
    fn all_off_resets_everything() {
        let mut c = controller();
        for d in Device::ALL {
            c.set(d, true);
        }
        c.all_off();
        assert!(c.list().iter().all(|(_, on)| !on));
        assert!(c.board.levels.values().all(|on| !on));
    }
}
