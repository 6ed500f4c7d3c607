//! Cooperative control loop.
//!
//! One tick does, in order:
//!
//! 1. link and broker supervision (every tick, non-blocking)
//! 2. the automation phase, every `automation_interval`: acquire a snapshot,
//!    then evaluate the rules against it and apply the transitions
//! 3. telemetry, every `publish_interval`, only while the broker is up
//!
//! The web server runs on the same current-thread runtime and is serviced
//! while the loop waits for the next tick. Nothing inside a tick sleeps.
//! Periods are compared on the monotonic clock, and each activity runs on
//! its first eligible tick.

use anyhow::{bail, Result};
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::automation::{self, Decision};
use crate::config::{ConnectivityConfig, ScheduleConfig};
use crate::connectivity::{RetryPolicy, Supervisor, Transport, Verdict};
use crate::state::SharedState;
use crate::telemetry::{PublishReport, TelemetryPublisher, TelemetrySink};

// ---------------------------------------------------------------------------
// Tick outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct TickReport {
    /// `Some` when the automation phase ran; holds the transitions it caused.
    pub automation: Option<Vec<Decision>>,
    pub telemetry: Option<PublishReport>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler<L, B> {
    shared: SharedState,
    link: L,
    link_sup: Supervisor,
    broker: B,
    broker_sup: Supervisor,
    publisher: TelemetryPublisher,
    tick_period: Duration,
    automation_period: Duration,
    publish_period: Duration,
    last_automation: Option<Instant>,
    last_publish: Option<Instant>,
}

fn due(last: Option<Instant>, period: Duration, now: Instant) -> bool {
    last.map_or(true, |at| now.duration_since(at) >= period)
}

impl<L, B> Scheduler<L, B>
where
    L: Transport,
    B: Transport + TelemetrySink,
{
    pub fn new(
        shared: SharedState,
        link: L,
        broker: B,
        publisher: TelemetryPublisher,
        schedule: &ScheduleConfig,
        connectivity: &ConnectivityConfig,
    ) -> Self {
        let window = Duration::from_millis(connectivity.reconnect_window_ms);
        Self {
            shared,
            link,
            link_sup: Supervisor::new(RetryPolicy {
                retry_delay: Duration::from_millis(connectivity.link_retry_ms),
                window,
            }),
            broker,
            broker_sup: Supervisor::new(RetryPolicy {
                retry_delay: Duration::from_millis(connectivity.broker_retry_ms),
                window,
            }),
            publisher,
            tick_period: schedule.web_interval(),
            automation_period: schedule.automation_interval(),
            publish_period: schedule.publish_interval(),
            last_automation: None,
            last_publish: None,
        }
    }

    /// Runs until a supervisor escalates; the error means "restart me".
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = interval(self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            tick_ms = self.tick_period.as_millis() as u64,
            automation_ms = self.automation_period.as_millis() as u64,
            publish_ms = self.publish_period.as_millis() as u64,
            "scheduler started"
        );

        loop {
            ticker.tick().await;
            self.tick(Instant::now()).await?;
        }
    }

    pub async fn tick(&mut self, now: Instant) -> Result<TickReport> {
        self.supervise(now).await?;

        let mut report = TickReport::default();
        if due(self.last_automation, self.automation_period, now) {
            self.last_automation = Some(now);
            report.automation = self.automation_phase().await;
        }
        if due(self.last_publish, self.publish_period, now) {
            let telemetry = self.telemetry_phase().await;
            // A skipped cycle leaves the period open, so the first tick after
            // a reconnect publishes.
            if !telemetry.skipped {
                self.last_publish = Some(now);
            }
            report.telemetry = Some(telemetry);
        }
        Ok(report)
    }

    // -- Phases -------------------------------------------------------------

    async fn supervise(&mut self, now: Instant) -> Result<()> {
        let link = self.link_sup.poll(&mut self.link, now);
        // The broker is only worth chasing once the host has a route, and its
        // window must not run out behind a dead link.
        let broker = if link == Verdict::Connected {
            self.broker_sup.poll(&mut self.broker, now)
        } else {
            self.broker_sup.suspend();
            Verdict::Pending
        };

        let mut st = self.shared.write().await;
        st.record_connectivity(self.link_sup.state(), self.broker_sup.state());

        for (verdict, name) in [(link, self.link.name()), (broker, self.broker.name())] {
            if verdict == Verdict::Escalate {
                error!(transport = name, "connectivity lost for the whole window");
                st.record_error(format!("{name} unreachable, restart required"));
                bail!("{name} reconnection window exhausted");
            }
        }
        Ok(())
    }

    /// `None` when automatic mode is off.
    async fn automation_phase(&mut self) -> Option<Vec<Decision>> {
        let mut guard = self.shared.write().await;
        let st = &mut *guard;
        if !st.automatic {
            return None;
        }

        let snapshot = st.snapshot();
        let decisions = automation::decide(&snapshot, &st.thresholds);
        let applied = automation::apply(&decisions, &mut st.actuators);
        st.record_automation(&applied);
        Some(applied)
    }

    async fn telemetry_phase(&mut self) -> PublishReport {
        let mut st = self.shared.write().await;
        let snapshot = if self.broker.is_connected() {
            st.snapshot()
        } else {
            Vec::new()
        };

        let report = self.publisher.cycle(&snapshot, &mut self.broker);
        if report.rejected > 0 {
            st.record_telemetry(format!(
                "{} of {} telemetry messages rejected",
                report.rejected,
                report.published + report.rejected
            ));
        }
        report
    }
}

// ===========================================================================
// Tests
// ===========================================================================
