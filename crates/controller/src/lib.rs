//! AgriFlow greenhouse controller.
//!
//! Reads environmental sensors, drives the fan, pump and grow light from
//! min/max thresholds, serves a local web interface and publishes encrypted
//! telemetry to an MQTT broker. Everything runs on one cooperative loop
//! ([`scheduler::Scheduler`]) sharing a single [`state::SystemState`] with the
//! HTTP handlers.

#![deny(unused_must_use)]

pub mod actuators;
pub mod automation;
pub mod config;
pub mod connectivity;
pub mod mqtt;
pub mod quantity;
pub mod scheduler;
pub mod sensors;
pub mod sim;
pub mod state;
pub mod telemetry;
pub mod thresholds;
pub mod web;
