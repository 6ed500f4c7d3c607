//! Broker session on top of rumqttc.
//!
//! The rumqttc event loop runs in its own task ([`BrokerDriver::run`]) and
//! mirrors the session into an atomic flag. After a connection error the
//! driver parks until the connectivity supervisor hands it a reconnect
//! permit, so retry pacing is owned by the supervisor and not by rumqttc.

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::config::MqttConfig;
use crate::connectivity::Transport;
use crate::telemetry::TelemetrySink;

pub const LWT_TOPIC: &str = "lwt";
pub const LWT_MESSAGE: &str = "I am going offline";

/// Outgoing request queue depth between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 20;

pub fn options(cfg: &MqttConfig) -> MqttOptions {
    let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs));
    opts.set_last_will(LastWill::new(
        LWT_TOPIC,
        LWT_MESSAGE,
        QoS::AtMostOnce,
        false,
    ));
    opts
}

// ---------------------------------------------------------------------------
// Session handle (owned by the scheduler)
// ---------------------------------------------------------------------------

pub struct BrokerSession {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    parked: Arc<AtomicBool>,
    reconnect: Arc<Notify>,
}

/// Event loop half; spawn [`BrokerDriver::run`].
pub struct BrokerDriver {
    eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    /// Set while the driver waits for a permit.
    parked: Arc<AtomicBool>,
    reconnect: Arc<Notify>,
}

impl BrokerSession {
    pub fn new(cfg: &MqttConfig) -> (Self, BrokerDriver) {
        Self::with_capacity(options(cfg), REQUEST_CAPACITY)
    }

    fn with_capacity(opts: MqttOptions, capacity: usize) -> (Self, BrokerDriver) {
        let (client, eventloop) = AsyncClient::new(opts, capacity);
        let connected = Arc::new(AtomicBool::new(false));
        let parked = Arc::new(AtomicBool::new(false));
        let reconnect = Arc::new(Notify::new());
        let session = Self {
            client,
            connected: Arc::clone(&connected),
            parked: Arc::clone(&parked),
            reconnect: Arc::clone(&reconnect),
        };
        let driver = BrokerDriver {
            eventloop,
            connected,
            parked,
            reconnect,
        };
        (session, driver)
    }
}

impl Transport for BrokerSession {
    fn name(&self) -> &'static str {
        "broker"
    }

    fn probe(&mut self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Releases a parked driver. A driver that is still mid-attempt is left
    /// alone so no permit outlives the supervisor's retry spacing.
    fn begin_connect(&mut self) {
        if self.parked.swap(false, Ordering::AcqRel) {
            self.reconnect.notify_one();
        }
    }
}

impl TelemetrySink for BrokerSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn publish(&mut self, topic: &str, payload: String) -> bool {
        match self.client.try_publish(topic, QoS::AtMostOnce, false, payload) {
            Ok(()) => true,
            Err(e) => {
                warn!(topic, error = %e, "mqtt publish not queued");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop driver
// ---------------------------------------------------------------------------

impl BrokerDriver {
    pub async fn run(mut self) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt connected");
                    self.connected.store(true, Ordering::Release);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("mqtt disconnected by broker");
                    self.connected.store(false, Ordering::Release);
                }
                Ok(_) => {}
                Err(e) => {
                    let was_connected = self.connected.swap(false, Ordering::AcqRel);
                    warn!(error = %e, was_connected, "mqtt connection error, awaiting reconnect");
                    self.parked.store(true, Ordering::Release);
                    self.reconnect.notified().await;
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(port: u16) -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".into(),
            port,
            client_id: "ESP32Client".into(),
            keep_alive_secs: 15,
        }
    }

    #[test]
    fn options_carry_identity_and_last_will() {
        let opts = options(&cfg(1883));
        assert_eq!(opts.client_id(), "ESP32Client");
        assert_eq!(opts.keep_alive(), Duration::from_secs(15));
        let will = opts.last_will().unwrap();
        assert_eq!(will.topic, LWT_TOPIC);
        assert_eq!(&will.message[..], LWT_MESSAGE.as_bytes());
    }

    #[tokio::test]
    async fn new_session_is_disconnected() {
        let (mut session, _driver) = BrokerSession::new(&cfg(1883));
        assert!(!session.probe());
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn publish_reports_full_queue() {
        let (mut session, _driver) = BrokerSession::with_capacity(options(&cfg(1883)), 1);
        assert!(session.publish("topic/co2", "aa".into()));
        // Nothing drains the queue without a running driver.
        assert!(!session.publish("topic/co2", "bb".into()));
    }

    #[tokio::test]
    async fn reconnect_permit_only_released_to_a_parked_driver() {
        let (mut session, _driver) = BrokerSession::new(&cfg(1883));
        let wait = Duration::from_millis(20);

        // Driver busy: nothing is stored for its next error.
        session.begin_connect();
        assert!(tokio::time::timeout(wait, session.reconnect.notified())
            .await
            .is_err());

        session.parked.store(true, Ordering::Release);
        session.begin_connect();
        assert!(!session.parked.load(Ordering::Acquire));
        assert!(tokio::time::timeout(wait, session.reconnect.notified())
            .await
            .is_ok());

        // A second call before the driver runs again adds nothing.
        session.begin_connect();
        assert!(tokio::time::timeout(wait, session.reconnect.notified())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn driver_parks_after_refused_connection() {
        // Port 1 on loopback refuses immediately.
        let (mut session, driver) = BrokerSession::new(&cfg(1));
        let connected = Arc::clone(&session.connected);
        let handle = tokio::spawn(driver.run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!connected.load(Ordering::Acquire));
        assert!(!handle.is_finished());

        session.begin_connect();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!connected.load(Ordering::Acquire));
        handle.abort();
    }
}
