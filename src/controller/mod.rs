pub mod coordinator;

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::domain::types::{InverterSnapshot, SlaveSnapshot};
use crate::domain::{ChargeBand, ChargerCurrentParams, Electrolyser, HeaterController, VehicleApi};
use crate::repo::Repositories;

/// Shared handle injected into every task and into the axum router. Each
/// component owns its own locking; `AppState` just bundles the `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<AppConfig>,
    pub inverter: Arc<RwLock<InverterSnapshot>>,
    pub charge_band: Arc<ChargeBand>,
    pub charger_params: Arc<ChargerCurrentParams>,
    pub heater: Arc<HeaterController>,
    pub electrolyser: Arc<Electrolyser>,
    pub vehicle_api: Arc<VehicleApi>,
    /// Published by the TWC Master Loop once per second; every other
    /// reader (Load Coordinator, status API) only ever sees this snapshot.
    pub slaves_snapshot: Arc<RwLock<Vec<SlaveSnapshot>>>,
    pub repos: Arc<Repositories>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}
