mod api;
mod cli;
mod config;
mod controller;
mod domain;
mod error;
mod hardware;
mod notify;
mod repo;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::RwLock;
use tokio_serial::SerialPortBuilderExt;
use tracing::{error, info, warn};

use cli::Cli;
use config::AppConfig;
use controller::AppState;
use domain::types::InverterSnapshot;
use domain::{ChargeBand, ChargerCurrentParams, Electrolyser, HeaterController, VehicleApi};
use hardware::can::CanSource;
use hardware::temperature::TemperaturePoller;
use hardware::{HardwareMode, SiteHardware};
use notify::{NoopNotificationSink, NotificationSink, SmtpNotificationSink};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = AppConfig::load(cli.config.as_deref())?;
    apply_cli_overrides(&mut cfg, &cli);

    telemetry::init_tracing(&cfg.telemetry.log_level, cfg.telemetry.log_json);

    let token = domain::TokenFile::load(&cfg.vehicle_api.token_file_path)
        .context("failed to load persisted vehicle API token")?;

    let mode = if cli.dry_run { HardwareMode::Simulated } else { HardwareMode::Real };
    let hardware = SiteHardware::build(
        mode,
        cfg.heater.element_gpio_pins.clone(),
        cfg.heater.pump_gpio_pin,
        cfg.electrolyser.base_url.clone(),
        cfg.vehicle_api.base_url.clone(),
        token.access_token.clone(),
    )
    .await
    .context("failed to build site hardware")?;

    let notify: Arc<dyn NotificationSink> = build_notifier();

    let vehicle_api = Arc::new(VehicleApi::new(
        hardware.vehicle_transport,
        hardware.vehicle_id.clone(),
        notify,
    ));

    let charge_band = Arc::new(
        ChargeBand::from_file(&cfg.quintic.coefficient_file)
            .context("failed to load charge-band quintic coefficients")?,
    );
    let charger_params = Arc::new(ChargerCurrentParams::new());
    let heater = HeaterController::new(hardware.heater_gpio, cfg.heater.element_count);
    let electrolyser = Arc::new(Electrolyser::new(hardware.electrolyser_client));
    let repos = Arc::new(repo::Repositories::new(&cfg).await.context("failed to set up repositories")?);

    let state = AppState {
        cfg: Arc::new(cfg.clone()),
        inverter: Arc::new(RwLock::new(InverterSnapshot::default())),
        charge_band,
        charger_params,
        heater,
        electrolyser,
        vehicle_api,
        slaves_snapshot: Arc::new(RwLock::new(Vec::new())),
        repos,
        started_at: chrono::Utc::now(),
    };

    let can_source: Box<dyn CanSource> = open_can_source(&cfg)?;
    let twc_port = open_twc_port(&cfg)?;
    let temperature_poller =
        Arc::new(TemperaturePoller::new(hardware.http.clone(), cfg.temperature.endpoints.clone()));

    controller::coordinator::spawn_controller_tasks(
        state.clone(),
        can_source,
        twc_port,
        cfg.twc.master_address,
        Duration::from_secs(cfg.controller.tick_seconds),
        temperature_poller,
    );

    let app = api::router(state, &cfg);
    let addr = cfg.server.socket_addr()?;
    info!(%addr, "starting dispatch controller");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(telemetry::shutdown_signal()).await?;
    warn!("shutdown complete");
    Ok(())
}

fn apply_cli_overrides(cfg: &mut AppConfig, cli: &Cli) {
    if let Some(serial_port) = &cli.serial_port {
        cfg.twc.serial_port = serial_port.clone();
    }
    if let Some(baud) = cli.baud {
        cfg.twc.baud = baud;
    }
    if let Some(master_address) = cli.master_address {
        cfg.twc.master_address = master_address;
    }
    if let Some(api_port) = cli.api_port {
        cfg.server.port = api_port;
    }
    if let Some(db) = cfg.database.as_mut() {
        if let Some(host) = &cli.db_host {
            db.host = host.clone();
        }
        if let Some(port) = cli.db_port {
            db.port = port;
        }
        if let Some(name) = &cli.db_name {
            db.name = name.clone();
        }
        if let Some(user) = &cli.db_user {
            db.user = user.clone();
        }
        if let Some(password) = &cli.db_password {
            db.password = password.clone();
        }
    }
}

/// Builds the operator alert sink from environment variables: an SMTP
/// relay if fully configured, otherwise a logging no-op, so a site with
/// no alerting configured yet still starts cleanly.
fn build_notifier() -> Arc<dyn NotificationSink> {
    let relay = std::env::var("DISPATCH_SMTP_RELAY").ok();
    let username = std::env::var("DISPATCH_SMTP_USERNAME").ok();
    let password = std::env::var("DISPATCH_SMTP_PASSWORD").ok();
    let from = std::env::var("DISPATCH_ALERT_FROM").ok();
    let to = std::env::var("DISPATCH_ALERT_TO").ok();

    if let (Some(relay), Some(username), Some(password), Some(from), Some(to)) =
        (relay, username, password, from, to)
    {
        let recipients: Vec<String> = to.split(',').map(|s| s.trim().to_string()).collect();
        match SmtpNotificationSink::new(&relay, username, password, from, recipients) {
            Ok(sink) => return Arc::new(sink),
            Err(e) => error!(error = %e, "failed to build SMTP notification sink, falling back to no-op"),
        }
    }
    Arc::new(NoopNotificationSink)
}

/// A configured CAN interface that fails to open is fatal — telemetry
/// ingest is the controller's only input, and running blind on it is worse
/// than refusing to start. Builds without the `can` feature run against
/// `NullCanSource` by design, not by fallback.
fn open_can_source(cfg: &AppConfig) -> Result<Box<dyn CanSource>> {
    #[cfg(feature = "can")]
    {
        let source = hardware::can::SocketCanSource::open(&cfg.can.interface)
            .with_context(|| format!("failed to open CAN interface {}", cfg.can.interface))?;
        return Ok(Box::new(source));
    }
    #[cfg(not(feature = "can"))]
    {
        let _ = cfg;
        Ok(Box::new(hardware::can::NullCanSource))
    }
}

fn open_twc_port(cfg: &AppConfig) -> Result<tokio_serial::SerialStream> {
    tokio_serial::new(&cfg.twc.serial_port, cfg.twc.baud)
        .open_native_async()
        .with_context(|| format!("failed to open TWC serial port {}", cfg.twc.serial_port))
}
