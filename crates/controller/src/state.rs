use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::actuators::ActuatorController;
use crate::automation::Decision;
use crate::connectivity::ConnectionState;
use crate::quantity::{Device, Quantity};
use crate::sensors::{SensorReader, SensorReading};
use crate::thresholds::{Bounds, ThresholdStore};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Everything the scheduler and the web handlers share. One instance per
/// process (and per test).
pub struct SystemState {
    pub started_at: Instant,
    pub thresholds: ThresholdStore,
    pub actuators: ActuatorController,
    pub sensors: SensorReader,
    pub automatic: bool,
    pub link: ConnectionState,
    pub broker: ConnectionState,
    pub last_snapshot: Vec<SensorReading>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Actuator,
    Threshold,
    Automation,
    Connectivity,
    Telemetry,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub automatic: bool,
    pub link: ConnectionState,
    pub broker: ConnectionState,
    pub actuators: BTreeMap<&'static str, bool>,
    pub thresholds: BTreeMap<&'static str, Bounds>,
    pub readings: BTreeMap<&'static str, f32>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(sensors: SensorReader, actuators: ActuatorController, automatic: bool) -> Self {
        Self {
            started_at: Instant::now(),
            thresholds: ThresholdStore::with_defaults(),
            actuators,
            sensors,
            automatic,
            link: ConnectionState::Disconnected,
            broker: ConnectionState::Disconnected,
            last_snapshot: Vec::new(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    /// Read one quantity against the live thresholds.
    pub fn read(&mut self, quantity: Quantity) -> f32 {
        self.sensors.read(quantity, &self.thresholds)
    }

    /// Acquire phase of a tick: every quantity, remembered for the status page.
    pub fn snapshot(&mut self) -> Vec<SensorReading> {
        let snapshot = self.sensors.snapshot(&self.thresholds);
        self.last_snapshot = snapshot.clone();
        snapshot
    }

    /// Manual switch from the web interface.
    pub fn record_manual(&mut self, device: Device, on: bool) -> bool {
        let changed = self.actuators.set(device, on);
        self.push_event(
            EventKind::Actuator,
            format!("{device} set {} (manual)", on_off(on)),
        );
        changed
    }

    pub fn record_automation(&mut self, applied: &[Decision]) {
        for d in applied {
            self.push_event(
                EventKind::Automation,
                format!(
                    "{} {} ({} = {:.2})",
                    d.device,
                    on_off(d.on),
                    d.quantity,
                    d.value
                ),
            );
        }
    }

    pub fn record_threshold(&mut self, quantity: Quantity, bounds: Bounds) {
        self.thresholds.set(quantity, bounds.min, bounds.max);
        self.push_event(
            EventKind::Threshold,
            format!("{quantity} set to {}..{}", bounds.min, bounds.max),
        );
    }

    pub fn record_automatic(&mut self, enabled: bool) {
        self.automatic = enabled;
        self.push_event(
            EventKind::System,
            format!("automatic mode {}", if enabled { "enabled" } else { "disabled" }),
        );
    }

    /// Mirror supervisor states; logs an event only on change.
    pub fn record_connectivity(&mut self, link: ConnectionState, broker: ConnectionState) {
        if link != self.link {
            self.push_event(EventKind::Connectivity, format!("network {link:?}").to_lowercase());
            self.link = link;
        }
        if broker != self.broker {
            self.push_event(EventKind::Connectivity, format!("broker {broker:?}").to_lowercase());
            self.broker = broker;
        }
    }

    pub fn record_telemetry(&mut self, detail: String) {
        self.push_event(EventKind::Telemetry, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            automatic: self.automatic,
            link: self.link,
            broker: self.broker,
            actuators: self
                .actuators
                .list()
                .into_iter()
                .map(|(d, on)| (d.as_str(), on))
                .collect(),
            thresholds: self
                .thresholds
                .list()
                .into_iter()
                .map(|(q, t)| (q.as_str(), t.into()))
                .collect(),
            readings: self
                .last_snapshot
                .iter()
                .map(|r| (r.quantity.as_str(), r.value))
                .collect(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

// ---------------------------------------------------------------------------
// Test fixture
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================
