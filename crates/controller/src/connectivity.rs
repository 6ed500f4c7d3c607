//! Link and broker liveness with bounded, non-blocking reconnection.
//!
//! A [`Supervisor`] is polled once per scheduler tick. It never sleeps:
//! retries are spaced by comparing the tick's `now` against the last
//! attempt, and a reconnection sequence that outlives its window escalates
//! exactly once. The caller is expected to restart the process.
//!
//! ```text
//! Disconnected ──[not up]──▶ Connecting ──[up]──▶ Connected
//!                              │  ▲                   │
//!                 [retry_delay]└──┘                   │
//!                              │                      │
//!                     [window elapsed]          [liveness fails]
//!                              ▼                      │
//!                          Escalate     Connecting ◀──┘ (fresh window)
//! ```

use serde::Serialize;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retry_delay: Duration,
    /// Longest a single reconnection sequence may run before escalating.
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Connected,
    Pending,
    /// Reconnection window exhausted. Reported once per supervisor.
    Escalate,
}

/// Something the supervisor can probe and (re)start.
pub trait Transport {
    fn name(&self) -> &'static str;

    /// Cheap liveness check; called every poll.
    fn probe(&mut self) -> bool;

    /// Kick off a connection attempt. Must not block.
    fn begin_connect(&mut self);

    fn on_connected(&mut self) {}
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct Supervisor {
    policy: RetryPolicy,
    state: ConnectionState,
    window_start: Option<Instant>,
    last_attempt: Option<Instant>,
    attempts: u32,
    escalated: bool,
}

impl Supervisor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            window_start: None,
            last_attempt: None,
            attempts: 0,
            escalated: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated
    }

    /// Back to `Disconnected` with no window running. For a transport that
    /// depends on another one that is currently down: the next poll starts
    /// a fresh sequence.
    pub fn suspend(&mut self) {
        if self.state == ConnectionState::Connecting {
            info!(attempts = self.attempts, "reconnection suspended");
        }
        self.state = ConnectionState::Disconnected;
        self.window_start = None;
        self.last_attempt = None;
        self.attempts = 0;
    }

    pub fn poll<T: Transport + ?Sized>(&mut self, transport: &mut T, now: Instant) -> Verdict {
        if self.escalated {
            return Verdict::Pending;
        }

        if transport.probe() {
            if self.state != ConnectionState::Connected {
                info!(
                    transport = transport.name(),
                    attempts = self.attempts,
                    "connected"
                );
                self.state = ConnectionState::Connected;
                self.window_start = None;
                self.last_attempt = None;
                self.attempts = 0;
                transport.on_connected();
            }
            return Verdict::Connected;
        }

        match self.state {
            ConnectionState::Connected | ConnectionState::Disconnected => {
                if self.state == ConnectionState::Connected {
                    warn!(transport = transport.name(), "connection lost");
                }
                self.state = ConnectionState::Connecting;
                self.window_start = Some(now);
                self.attempt(transport, now);
                Verdict::Pending
            }
            ConnectionState::Connecting => {
                let started = *self.window_start.get_or_insert(now);
                if now.duration_since(started) >= self.policy.window {
                    error!(
                        transport = transport.name(),
                        attempts = self.attempts,
                        window_ms = self.policy.window.as_millis() as u64,
                        "reconnection window exhausted, escalating"
                    );
                    self.escalated = true;
                    return Verdict::Escalate;
                }

                let due = self
                    .last_attempt
                    .map_or(true, |at| now.duration_since(at) >= self.policy.retry_delay);
                if due {
                    self.attempt(transport, now);
                }
                Verdict::Pending
            }
        }
    }

    fn attempt<T: Transport + ?Sized>(&mut self, transport: &mut T, now: Instant) {
        self.attempts += 1;
        self.last_attempt = Some(now);
        info!(
            transport = transport.name(),
            attempt = self.attempts,
            "connecting"
        );
        transport.begin_connect();
    }
}

// ---------------------------------------------------------------------------
// Network link
// ---------------------------------------------------------------------------

/// Host-level reachability of the broker: a route exists when an unbound
/// UDP socket can be connected toward it. No packets are sent.
///
/// Hostnames are resolved by a spawned `lookup_host` task; `probe` only reads
/// the last result, so a slow resolver never stalls a tick.
pub struct NetworkLink {
    host: String,
    port: u16,
    target: Arc<watch::Sender<Option<SocketAddr>>>,
    lookup: Option<JoinHandle<()>>,
}

impl NetworkLink {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let (target, _) = watch::channel(None);
        Self {
            host: host.into(),
            port,
            target: Arc::new(target),
            lookup: None,
        }
    }

    fn start_lookup(&mut self) {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            self.target.send_replace(Some(SocketAddr::new(ip, self.port)));
            return;
        }
        if self.lookup.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let host = self.host.clone();
        let port = self.port;
        let target = Arc::clone(&self.target);
        self.lookup = Some(tokio::spawn(async move {
            target.send_replace(resolve(&host, port).await);
        }));
    }
}

/// First IPv4 address for `host`, else the first address of any family.
async fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    match lookup_host((host, port)).await {
        Ok(addrs) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            addrs.iter().find(|a| a.is_ipv4()).or(addrs.first()).copied()
        }
        Err(e) => {
            warn!(%host, error = %e, "broker host did not resolve");
            None
        }
    }
}

pub(crate) fn route_available(target: SocketAddr) -> bool {
    let bind: SocketAddr = if target.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    UdpSocket::bind(bind)
        .and_then(|socket| socket.connect(target))
        .is_ok()
}

impl Transport for NetworkLink {
    fn name(&self) -> &'static str {
        "network"
    }

    fn probe(&mut self) -> bool {
        let target = *self.target.borrow();
        target.is_some_and(route_available)
    }

    fn begin_connect(&mut self) {
        self.start_lookup();
    }

    fn on_connected(&mut self) {
        let networks = sysinfo::Networks::new_with_refreshed_list();
        for (name, data) in &networks {
            info!(interface = %name, mac = %data.mac_address(), "network interface");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
