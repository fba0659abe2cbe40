//! Ledger read endpoint handlers: balance and history.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{BalanceResponse, LedgerEntryDto, LedgerPageResponse, LedgerQuery};
use crate::app_state::AppState;
use crate::domain::UserCode;
use crate::error::{CreditError, ErrorResponse};

/// Default page size for ledger history.
const DEFAULT_PAGE_LIMIT: i64 = 50;

/// `GET /users/:user_code/credits/balance` — Current balance projection.
///
/// # Errors
///
/// Returns [`CreditError`] on validation or store failure.
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_code}/credits/balance",
    tag = "Ledger",
    summary = "Read balance",
    description = "Returns the visible balance, the open-hold reserve, and the availability left for new holds.",
    params(
        ("user_code" = String, Path, description = "User identifier"),
    ),
    responses(
        (status = 200, description = "Balance projection", body = BalanceResponse),
        (status = 400, description = "Invalid user code", body = ErrorResponse),
    )
)]
pub async fn balance(
    State(state): State<AppState>,
    Path(user_code): Path<String>,
) -> Result<impl IntoResponse, CreditError> {
    let user = UserCode::new(user_code);
    let view = state.credit_service.balance(&user).await?;

    Ok(Json(BalanceResponse {
        user_code: user.into_inner(),
        balance: view.balance,
        reserved: view.reserved,
        available: view.available,
    }))
}

/// `GET /users/:user_code/credits/ledger` — Paginated history.
///
/// # Errors
///
/// Returns [`CreditError`] on validation or store failure.
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_code}/credits/ledger",
    tag = "Ledger",
    summary = "List ledger entries",
    description = "Returns the user's credit movements newest first. Page with the `before` cursor from the previous response.",
    params(
        ("user_code" = String, Path, description = "User identifier"),
        ("limit" = Option<i64>, Query, description = "Page size (1..=200, default 50)"),
        ("before" = Option<i64>, Query, description = "Return entries older than this entry id"),
    ),
    responses(
        (status = 200, description = "One page of entries", body = LedgerPageResponse),
        (status = 400, description = "Invalid user code", body = ErrorResponse),
    )
)]
pub async fn ledger(
    State(state): State<AppState>,
    Path(user_code): Path<String>,
    Query(query): Query<LedgerQuery>,
) -> Result<impl IntoResponse, CreditError> {
    let user = UserCode::new(user_code);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let entries = state
        .credit_service
        .ledger(&user, limit, query.before)
        .await?;

    let full_page = i64::try_from(entries.len()).unwrap_or(i64::MAX) >= limit.clamp(1, 200);
    let next_before = if full_page {
        entries.last().map(|e| e.id)
    } else {
        None
    };

    Ok(Json(LedgerPageResponse {
        entries: entries.into_iter().map(LedgerEntryDto::from).collect(),
        next_before,
    }))
}

/// Ledger read routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users/{user_code}/credits/balance", get(balance))
        .route("/users/{user_code}/credits/ledger", get(ledger))
}
