use anyhow::{Context, Result};
use std::{env, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use agriflow_controller::actuators::ActuatorController;
use agriflow_controller::config;
use agriflow_controller::connectivity::NetworkLink;
use agriflow_controller::mqtt::BrokerSession;
use agriflow_controller::scheduler::Scheduler;
use agriflow_controller::sensors::SensorReader;
use agriflow_controller::sim::SimSource;
use agriflow_controller::state::SystemState;
use agriflow_controller::telemetry::{PayloadCipher, TelemetryPublisher};
use agriflow_controller::web;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Hardware ────────────────────────────────────────────────────
    let mut actuators =
        ActuatorController::new(&cfg.actuators.mapping(), cfg.actuators.active_low)
            .context("failed to initialise actuator outputs")?;
    actuators.all_off();

    let source = SimSource::new(cfg.calibration.full_scale_code, cfg.sensors.sim_dropout_prob);
    let sensors = SensorReader::new(Box::new(source), cfg.sensors.clone(), cfg.calibration.clone());

    // ── Shared state ────────────────────────────────────────────────
    let mut st = SystemState::new(sensors, actuators, cfg.automation.enabled);
    st.record_system("controller started".to_string());
    let shared = st.into_shared();

    // ── Web server ──────────────────────────────────────────────────
    let web_state = Arc::clone(&shared);
    let web_port = cfg.web.port;
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state, web_port).await {
            error!("web server stopped: {e:#}");
        }
    });

    // ── Broker session ──────────────────────────────────────────────
    let (broker, driver) = BrokerSession::new(&cfg.mqtt);
    tokio::spawn(driver.run());

    // ── Scheduler ───────────────────────────────────────────────────
    let cipher = PayloadCipher::from_hex(&cfg.telemetry.key_hex, &cfg.telemetry.iv_hex)?;
    let publisher = TelemetryPublisher::new(cipher, cfg.telemetry.topic_prefix.clone());
    let link = NetworkLink::new(cfg.mqtt.host.clone(), cfg.mqtt.port);
    let scheduler = Scheduler::new(
        Arc::clone(&shared),
        link,
        broker,
        publisher,
        &cfg.schedule,
        &cfg.connectivity,
    );

    let outcome = tokio::select! {
        result = scheduler.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    };

    // Best-effort fail-safe: everything off before the process exits.
    {
        let mut st = shared.write().await;
        st.actuators.all_off();
        if outcome.is_err() {
            warn!("all actuators off, exiting for restart");
        }
    }

    outcome.context("controller loop stopped, restart required")
}
