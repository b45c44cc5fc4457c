use axum::{
    routing::{get, post},
    Router,
};

use crate::{config::AppConfig, controller::AppState};

/// Unauthenticated read/control surface for the site LAN — no operator
/// auth layer, matching the upstream electrolyser and ESP endpoints this
/// crate itself talks to.
pub fn router(state: AppState, _cfg: &AppConfig) -> Router {
    Router::new()
        .route("/status", get(crate::api::status::get_status))
        .route("/inverter", get(crate::api::status::get_inverter))
        .route("/twc/slaves", get(crate::api::status::get_twc_slaves))
        .route("/heater", get(crate::api::status::get_heater))
        .route("/electrolyser", get(crate::api::status::get_electrolyser))
        .route("/charging/start", post(crate::api::control::start_charging))
        .route("/charging/stop", post(crate::api::control::stop_charging))
        .with_state(state)
}
