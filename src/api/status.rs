use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::response::ApiResponse;
use crate::controller::AppState;
use crate::domain::types::{ElectrolyserStatus, InverterSnapshot, SlaveSnapshot};

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    timestamp: DateTime<Utc>,
    uptime_seconds: i64,
    inverter: InverterSnapshot,
    heater: HeaterStatus,
    electrolyser: ElectrolyserStatusInfo,
    vehicle_api: VehicleApiStatus,
    twc_slave_count: usize,
    tick_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct HeaterStatus {
    setting: u8,
    pump_on: bool,
    enabled: bool,
    hot_tank_decic: i16,
}

#[derive(Debug, Serialize)]
pub struct ElectrolyserStatusInfo {
    rate_percent: u8,
    status: ElectrolyserStatus,
}

#[derive(Debug, Serialize)]
pub struct VehicleApiStatus {
    api_disabled: bool,
    in_hold_off: bool,
}

/// `GET /api/v1/status` — a rollup of every subsystem, for the operator
/// dashboard's landing view.
pub async fn get_status(State(state): State<AppState>) -> Json<ApiResponse<SystemStatus>> {
    let status = SystemStatus {
        timestamp: Utc::now(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        inverter: *state.inverter.read().await,
        heater: HeaterStatus {
            setting: state.heater.setting(),
            pump_on: state.heater.pump_on(),
            enabled: state.heater.enabled(),
            hot_tank_decic: state.heater.hot_tank_decic(),
        },
        electrolyser: ElectrolyserStatusInfo {
            rate_percent: state.electrolyser.rate(),
            status: state.electrolyser.status(),
        },
        vehicle_api: VehicleApiStatus {
            api_disabled: state.vehicle_api.is_api_disabled(),
            in_hold_off: state.vehicle_api.in_hold_off(),
        },
        twc_slave_count: state.slaves_snapshot.read().await.len(),
        tick_seconds: state.cfg.controller.tick_seconds,
    };
    Json(ApiResponse::success(status))
}

/// `GET /api/v1/inverter`
pub async fn get_inverter(State(state): State<AppState>) -> Json<ApiResponse<InverterSnapshot>> {
    Json(ApiResponse::success(*state.inverter.read().await))
}

/// `GET /api/v1/twc/slaves`
pub async fn get_twc_slaves(State(state): State<AppState>) -> Json<ApiResponse<Vec<SlaveSnapshot>>> {
    Json(ApiResponse::success(state.slaves_snapshot.read().await.clone()))
}

/// `GET /api/v1/heater`
pub async fn get_heater(State(state): State<AppState>) -> Json<ApiResponse<HeaterStatus>> {
    Json(ApiResponse::success(HeaterStatus {
        setting: state.heater.setting(),
        pump_on: state.heater.pump_on(),
        enabled: state.heater.enabled(),
        hot_tank_decic: state.heater.hot_tank_decic(),
    }))
}

/// `GET /api/v1/electrolyser`
pub async fn get_electrolyser(
    State(state): State<AppState>,
) -> Json<ApiResponse<ElectrolyserStatusInfo>> {
    Json(ApiResponse::success(ElectrolyserStatusInfo {
        rate_percent: state.electrolyser.rate(),
        status: state.electrolyser.status(),
    }))
}

