//! System endpoints: health check and the expiry sweep trigger.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::dto::SweepResponse;
use crate::app_state::AppState;
use crate::error::{CreditError, ErrorResponse};

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
}

/// `GET /health` — Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, and current timestamp.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// `POST /admin/expiry-sweep` — Run one expiry sweep now.
///
/// The entry point for external cron-style schedulers. Idempotent
/// across repeated invocations: each expired grant is reversed at most
/// once.
///
/// # Errors
///
/// Returns [`CreditError::StoreUnavailable`] when the candidate scan
/// fails; per-grant failures are reported in the body instead.
#[utoipa::path(
    post,
    path = "/admin/expiry-sweep",
    tag = "System",
    summary = "Run the expiry sweep",
    description = "Neutralizes expired, unconsumed grants in bounded batches. Safe to invoke repeatedly.",
    responses(
        (status = 200, description = "Sweep summary", body = SweepResponse),
        (status = 503, description = "Store unavailable, retry later", body = ErrorResponse),
    )
)]
pub async fn expiry_sweep_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, CreditError> {
    let report = state.credit_service.run_expiry_sweep().await?;
    Ok(Json(SweepResponse {
        scanned: report.scanned,
        reversed: report.reversed,
        reclaimed: report.reclaimed,
        failures: report.failures,
    }))
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/admin/expiry-sweep", post(expiry_sweep_handler))
}
