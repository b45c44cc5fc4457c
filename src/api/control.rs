//! Operator-triggered vehicle charging commands, bypassing the Load
//! Coordinator's automatic dispatch.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::api::response::ApiResponse;
use crate::controller::AppState;

#[derive(Debug, Serialize)]
pub struct CommandResult {
    accepted: bool,
}

pub async fn start_charging(State(state): State<AppState>) -> Json<ApiResponse<CommandResult>> {
    let accepted = state.vehicle_api.start().await;
    Json(ApiResponse::success(CommandResult { accepted }))
}

pub async fn stop_charging(State(state): State<AppState>) -> Json<ApiResponse<CommandResult>> {
    let accepted = state.vehicle_api.stop().await;
    Json(ApiResponse::success(CommandResult { accepted }))
}
