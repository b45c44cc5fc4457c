//! Task wiring: CAN ingest, the TWC Master Loop, the Load Coordinator tick,
//! the temperature poller, and the time-series logger, each a named
//! `tokio::spawn` owning its own slice of state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Timelike, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use crate::domain::estimate_level;
use crate::domain::twc::codec::{CODE_SLAVE_HEARTBEAT, CODE_SLAVE_LINK_READY};
use crate::domain::twc::{
    Escalation, Frame, FrameReader, LinkReadyAction, SlaveTable, CODE_MASTER_HEARTBEAT,
    CODE_MASTER_LINK_READY_1, CODE_MASTER_LINK_READY_2,
};
use crate::domain::types::ChargeLevel;
use crate::error::DispatchError;
use crate::hardware::can::{self, CanSource};
use crate::hardware::temperature::TemperaturePoller;

use super::AppState;

/// Spawns every background task this controller runs, per the task table:
/// CAN ingest, the Load Coordinator tick, the TWC Master Loop, the
/// temperature poller, and (when built with `db`) the time-series logger.
/// Each owns its own slice of `AppState` and never unwinds into the others.
pub fn spawn_controller_tasks(
    state: AppState,
    can_source: Box<dyn CanSource>,
    twc_port: tokio_serial::SerialStream,
    master_address: u16,
    tick: Duration,
    temperature_poller: Arc<TemperaturePoller>,
) {
    tokio::spawn(can_ingest_task(state.clone(), can_source));
    tokio::spawn(load_coordinator_task(state.clone(), tick));
    tokio::spawn(twc_master_task(state.clone(), twc_port, master_address));
    tokio::spawn(temperature_poll_task(temperature_poller));
    #[cfg(feature = "db")]
    tokio::spawn(time_series_task(state));
}

/// Drains CAN frames into the shared inverter snapshot. A single
/// `RwLock<InverterSnapshot>` write gives field-group atomicity: the whole
/// struct is replaced in one critical section rather than field-by-field.
pub async fn can_ingest_task(state: AppState, mut source: Box<dyn CanSource>) {
    loop {
        let frame = match source.recv().await {
            Ok(frame) => frame,
            Err(e) => {
                let classified = DispatchError::Protocol(e.to_string());
                warn!(error = %classified, recoverable = classified.is_recoverable(), "CAN read failed, retrying");
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };
        let Some(update) = can::decode(&frame) else { continue };
        let mut snapshot = state.inverter.write().await;
        match update {
            can::InverterUpdate::BatteryElectrical { volts, amps, soc_percent } => {
                snapshot.battery_volts = volts;
                snapshot.battery_amps = amps;
                snapshot.soc_percent = soc_percent;
            }
            can::InverterUpdate::Setpoint { volts } => snapshot.setpoint_volts = volts,
            can::InverterUpdate::Frequency { hz } => snapshot.frequency_hz = hz,
            can::InverterUpdate::Status { flags, max_current_amps } => {
                snapshot.generator_running = flags.generator_running;
                snapshot.flags = flags;
                snapshot.max_current_amps = max_current_amps;
            }
        }
    }
}

/// Load Coordinator: fires every `tick_seconds`, reads the charge level
/// once, and applies the per-tick priority ladder.
pub async fn load_coordinator_task(state: AppState, tick: Duration) {
    let mut previous_level = ChargeLevel::Hold;
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        let snapshot = *state.inverter.read().await;
        let level = estimate_level(&state.charge_band, &snapshot);

        // Battery discharging at more than 1 A: react immediately rather
        // than waiting for the next tick's priority ladder to get there.
        if snapshot.battery_amps > 1.0 {
            state.heater.decrease(true);
        }

        if snapshot.generator_running {
            state.charger_params.set_max_amps_ca(0);
            state.heater.set_heater(0);
            let _ = state.electrolyser.force_rate(0).await;
            previous_level = level;
            continue;
        }

        let car_current_ca: i32 = {
            let snapshots = state.slaves_snapshot.read().await;
            snapshots.iter().map(|s| s.reported_current_ca as i32).sum()
        };

        if previous_level == ChargeLevel::Reduce
            && level == ChargeLevel::Hold
            && Utc::now().hour() < 12
        {
            let _ = state.electrolyser.preheat().await;
        }

        match level {
            ChargeLevel::Accept => raise_load(&state, car_current_ca, snapshot.frequency_hz).await,
            ChargeLevel::Reduce => lower_load(&state, car_current_ca).await,
            ChargeLevel::Hold => {}
        }

        previous_level = level;
    }
}

async fn raise_load(state: &AppState, car_current_ca: i32, frequency_hz: f64) {
    let electrolyser_full = state.electrolyser.rate() >= 100;
    state.charger_params.set_max_amps_ca(if electrolyser_full { 4800 } else { 1000 });

    if car_current_ca < -100 {
        let delta_ca = -(car_current_ca / 10);
        if state.charger_params.change_current(delta_ca) {
            return;
        }
        if state.electrolyser.increase(1).await {
            return;
        }
        let _ = state.heater.increase(frequency_hz);
    } else {
        state.charger_params.set_max_amps_ca(1500);
        let step = if frequency_hz > 60.9 { 100 } else { 1 };
        if state.electrolyser.increase(step).await {
            return;
        }
        let _ = state.heater.increase(frequency_hz);
    }
}

async fn lower_load(state: &AppState, car_current_ca: i32) {
    if state.heater.decrease(false) {
        return;
    }
    if car_current_ca > 1000 {
        let delta_ca = -(car_current_ca / 5);
        state.charger_params.change_current(delta_ca);
        return;
    }
    if state.electrolyser.rate() > 0 {
        state.electrolyser.decrease(1).await;
        return;
    }
    state.charger_params.change_current(-100);
}

/// TWC Master Loop: 1 Hz tick for link-ready/current-division/heartbeat
/// bookkeeping, with a concurrent byte-at-a-time serial reader feeding the
/// frame codec. The serial port is owned exclusively here.
pub async fn twc_master_task(
    state: AppState,
    mut port: tokio_serial::SerialStream,
    master_address: u16,
) {
    let mut table = SlaveTable::new();
    let mut reader = FrameReader::new();
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut byte = [0u8; 1];

    loop {
        tokio::select! {
            _ = tick.tick() => {
                run_master_tick(&state, &mut table, &mut port, master_address).await;
                *state.slaves_snapshot.write().await = table.snapshots();
            }
            result = port.read_exact(&mut byte) => {
                match result {
                    Ok(_) => match reader.push_byte(byte[0]) {
                        Ok(Some(frame)) => dispatch_frame(&mut table, frame),
                        Ok(None) => {}
                        Err(e) => warn!(error = ?e, "TWC codec rejected frame"),
                    },
                    Err(e) => {
                        let classified = DispatchError::TransientIo(e);
                        warn!(error = %classified, recoverable = classified.is_recoverable(), "serial read failed");
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                }
            }
        }
    }
}

fn dispatch_frame(table: &mut SlaveTable, frame: Frame) {
    match frame.code {
        CODE_SLAVE_HEARTBEAT => {
            table.on_heartbeat(frame.from_addr, frame.command, frame.setpoint_ca, frame.current_ca)
        }
        CODE_SLAVE_LINK_READY => table.on_link_ready(frame.from_addr),
        other => warn!(code = format!("{other:#06x}"), "ignoring unrecognised TWC frame code"),
    }
}

async fn run_master_tick(
    state: &AppState,
    table: &mut SlaveTable,
    port: &mut tokio_serial::SerialStream,
    master_address: u16,
) {
    for address in table.evict_timed_out() {
        info!(address, "evicted silent TWC slave");
    }
    table.zero_out_silent_kept_slaves();

    match table.link_ready_action() {
        LinkReadyAction::EmitLinkReady1 => send_frame(port, CODE_MASTER_LINK_READY_1, master_address, 0, 0, 0).await,
        LinkReadyAction::EmitLinkReady2 => send_frame(port, CODE_MASTER_LINK_READY_2, master_address, 0, 0, 0).await,
        LinkReadyAction::None => {}
    }

    let max_amps_ca = state.charger_params.max_amps_ca() as i16;
    let soc_percent = state.inverter.read().await.soc_percent;
    table.divide_current(max_amps_ca, soc_percent);

    for (address, escalation) in table.tick_escalations() {
        apply_escalation(state, address, escalation).await;
    }

    for (address, setpoint_ca) in table.heartbeat_setpoints() {
        send_frame(port, CODE_MASTER_HEARTBEAT, master_address, address, setpoint_ca, 0).await;
    }
}

async fn apply_escalation(state: &AppState, address: u16, escalation: Escalation) {
    match escalation {
        Escalation::None => {}
        Escalation::InvokeStop => {
            info!(address, "escalation: invoking vehicle API stop");
            state.vehicle_api.stop().await;
        }
        Escalation::OperatorAlertAndDisable => {
            warn!(address, "escalation: slave disabled, heartbeats suspended");
        }
        Escalation::InvokeStart => {
            info!(address, "escalation: resume, invoking vehicle API start");
            state.vehicle_api.start().await;
        }
    }
}

async fn send_frame(
    port: &mut tokio_serial::SerialStream,
    code: u16,
    from_addr: u16,
    to_addr: u16,
    setpoint_ca: i16,
    current_ca: i16,
) {
    let frame = Frame { code, from_addr, to_addr, command: 0, setpoint_ca, current_ca };
    let total_len = if to_addr == 0 { 14 } else { 16 };
    let bytes = frame.encode(total_len);
    if let Err(e) = port.write_all(&bytes).await {
        warn!(error = %e, code = format!("{code:#06x}"), "failed to write TWC frame");
    }
}

/// 5 s ESP temperature poll; updates are logged but have no dispatch
/// effect — they exist for the status API and operator alerts.
pub async fn temperature_poll_task(poller: Arc<TemperaturePoller>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        for (endpoint, reading) in poller.poll_all().await {
            info!(endpoint, temp_c = reading.temperature_c, humidity = reading.humidity_percent, "climate reading");
        }
    }
}

/// 1 Hz time-series logger (feature `db`); change-detection lives in the
/// repo itself so a steady plant doesn't flood the table.
#[cfg(feature = "db")]
pub async fn time_series_task(state: AppState) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        let Some(db) = state.repos.db.as_ref() else { continue };
        let snapshot = *state.inverter.read().await;
        let car_current_ca: i32 = {
            let snapshots = state.slaves_snapshot.read().await;
            snapshots.iter().map(|s| s.reported_current_ca as i32).sum()
        };
        let sample = crate::repo::pg::Sample {
            battery_volts: snapshot.battery_volts,
            battery_amps: snapshot.battery_amps,
            soc_percent: snapshot.soc_percent,
            frequency_hz: snapshot.frequency_hz,
            car_current_ca,
            heater_setting: state.heater.setting() as u32,
            electrolyser_rate: state.electrolyser.rate(),
        };
        if let Err(e) = db.record_if_changed(sample, Utc::now()).await {
            warn!(error = %e, "failed to record time-series sample");
        }

        // Fail safe to the cutoff threshold whenever the reading is stale
        // or missing: a quiet sensor must not be read as "cool enough".
        let hot_tank_decic = db.latest_hot_tank_decic().await.unwrap_or(crate::domain::heater::HOT_TANK_FAILSAFE_DECIC);
        state.heater.set_hot_tank_decic(hot_tank_decic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_frame_codes_are_distinct() {
        assert_ne!(CODE_MASTER_LINK_READY_1, CODE_MASTER_LINK_READY_2);
        assert_ne!(CODE_MASTER_LINK_READY_1, CODE_MASTER_HEARTBEAT);
    }
}
