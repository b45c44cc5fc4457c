use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::controller::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    #[cfg(feature = "db")]
    database: ComponentHealth,
    twc_link: ComponentHealth,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self { status: "healthy".to_string(), error: None }
    }

    fn unhealthy(error: String) -> Self {
        Self { status: "unhealthy".to_string(), error: Some(error) }
    }

    fn degraded(note: &str) -> Self {
        Self { status: "not configured".to_string(), error: Some(note.to_string()) }
    }
}

/// `GET /health` — overall status, `503` if any checked dependency is down.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    #[cfg(feature = "db")]
    let database = match &state.repos.db {
        Some(db) => match sqlx::query("SELECT 1").execute(db.pool()).await {
            Ok(_) => ComponentHealth::healthy(),
            Err(e) => ComponentHealth::unhealthy(e.to_string()),
        },
        None => ComponentHealth::degraded("no database configured"),
    };

    let twc_link = if state.slaves_snapshot.read().await.is_empty() {
        ComponentHealth::degraded("no TWC slaves registered yet")
    } else {
        ComponentHealth::healthy()
    };

    #[cfg(feature = "db")]
    let all_healthy = database.status != "unhealthy" && twc_link.status != "unhealthy";
    #[cfg(not(feature = "db"))]
    let all_healthy = twc_link.status != "unhealthy";

    let response = HealthResponse {
        status: if all_healthy { "healthy".to_string() } else { "degraded".to_string() },
        timestamp: chrono::Utc::now(),
        checks: HealthChecks {
            #[cfg(feature = "db")]
            database,
            twc_link,
        },
    };

    let status_code = if all_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(response))
}

/// `GET /health/ready` — Kubernetes readiness probe.
pub async fn readiness_check() -> impl IntoResponse {
    StatusCode::OK
}

/// `GET /health/live` — Kubernetes liveness probe.
pub async fn liveness_check() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_health_variants_report_expected_status_strings() {
        assert_eq!(ComponentHealth::healthy().status, "healthy");
        assert_eq!(ComponentHealth::unhealthy("x".into()).status, "unhealthy");
        assert_eq!(ComponentHealth::degraded("x").status, "not configured");
    }
}
