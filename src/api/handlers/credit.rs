//! Credit mutation endpoint handlers: authorize, capture, void, grant,
//! debit.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{
    AuthorizeRequest, AuthorizeResponse, CaptureRequest, CaptureResponse, DebitRequest,
    DebitResponse, GrantRequest, GrantResponse, VoidRequest, VoidResponse,
};
use crate::app_state::AppState;
use crate::domain::{AuthorizeOutcome, UserCode};
use crate::error::{CreditError, ErrorResponse};
use crate::service::GrantMeta;

/// `POST /users/:user_code/credits/authorize` — Reserve credits.
///
/// # Errors
///
/// Returns [`CreditError`] on validation failure, insufficient
/// availability, or reference reuse with a different amount.
#[utoipa::path(
    post,
    path = "/api/v1/users/{user_code}/credits/authorize",
    tag = "Credits",
    summary = "Authorize a hold",
    description = "Reserves an amount against the user's available balance without moving the visible balance. Retries with the same ref are idempotent.",
    params(
        ("user_code" = String, Path, description = "User identifier"),
    ),
    request_body = AuthorizeRequest,
    responses(
        (status = 200, description = "Hold authorized or replayed", body = AuthorizeResponse),
        (status = 400, description = "Invalid parameters", body = ErrorResponse),
        (status = 402, description = "Insufficient available balance", body = ErrorResponse),
        (status = 409, description = "Reference reused with different amount", body = ErrorResponse),
    )
)]
pub async fn authorize(
    State(state): State<AppState>,
    Path(user_code): Path<String>,
    Json(req): Json<AuthorizeRequest>,
) -> Result<impl IntoResponse, CreditError> {
    let user = UserCode::new(user_code);
    let outcome = state
        .credit_service
        .authorize(&user, req.amount, &req.op_ref)
        .await?;

    let amount = match outcome {
        AuthorizeOutcome::New { amount } | AuthorizeOutcome::Exists { amount } => amount,
    };
    Ok(Json(AuthorizeResponse {
        status: outcome.status().to_string(),
        op_ref: req.op_ref,
        amount,
    }))
}

/// `POST /users/:user_code/credits/capture` — Finalize a hold.
///
/// # Errors
///
/// Returns [`CreditError`] on validation failure, a missing hold, or
/// reference reuse with a different amount.
#[utoipa::path(
    post,
    path = "/api/v1/users/{user_code}/credits/capture",
    tag = "Credits",
    summary = "Capture a hold",
    description = "Finalizes a previously authorized hold into a debit. Partial capture releases the remainder. A hold already voided replays the void outcome.",
    params(
        ("user_code" = String, Path, description = "User identifier"),
    ),
    request_body = CaptureRequest,
    responses(
        (status = 200, description = "Capture applied or replayed", body = CaptureResponse),
        (status = 400, description = "Invalid parameters", body = ErrorResponse),
        (status = 404, description = "No hold for the reference", body = ErrorResponse),
        (status = 409, description = "Reference reused with different amount", body = ErrorResponse),
    )
)]
pub async fn capture(
    State(state): State<AppState>,
    Path(user_code): Path<String>,
    Json(req): Json<CaptureRequest>,
) -> Result<impl IntoResponse, CreditError> {
    let user = UserCode::new(user_code);
    let outcome = state
        .credit_service
        .capture(&user, req.amount, &req.op_ref)
        .await?;

    Ok(Json(CaptureResponse {
        status: outcome.status().to_string(),
        op_ref: req.op_ref,
        balance: outcome.balance(),
    }))
}

/// `POST /users/:user_code/credits/void` — Release a hold.
///
/// # Errors
///
/// Returns [`CreditError`] on validation failure or a missing hold.
#[utoipa::path(
    post,
    path = "/api/v1/users/{user_code}/credits/void",
    tag = "Credits",
    summary = "Void a hold",
    description = "Releases a hold with no economic effect. A hold already captured replays the capture outcome and never credits back.",
    params(
        ("user_code" = String, Path, description = "User identifier"),
    ),
    request_body = VoidRequest,
    responses(
        (status = 200, description = "Void applied or replayed", body = VoidResponse),
        (status = 400, description = "Invalid parameters", body = ErrorResponse),
        (status = 404, description = "No hold for the reference", body = ErrorResponse),
    )
)]
pub async fn void_hold(
    State(state): State<AppState>,
    Path(user_code): Path<String>,
    Json(req): Json<VoidRequest>,
) -> Result<impl IntoResponse, CreditError> {
    let user = UserCode::new(user_code);
    let outcome = state
        .credit_service
        .void(&user, req.amount, &req.op_ref)
        .await?;

    Ok(Json(VoidResponse {
        status: outcome.status().to_string(),
        op_ref: req.op_ref,
        balance: outcome.balance(),
    }))
}

/// `POST /users/:user_code/credits/grant` — Credit the user.
///
/// # Errors
///
/// Returns [`CreditError`] on validation failure or reference reuse
/// with a different base amount.
#[utoipa::path(
    post,
    path = "/api/v1/users/{user_code}/credits/grant",
    tag = "Credits",
    summary = "Grant credits",
    description = "Adds credits to the user's balance, applying the single winning promotion for the given action. Unresolvable promotion configuration degrades to the base amount.",
    params(
        ("user_code" = String, Path, description = "User identifier"),
    ),
    request_body = GrantRequest,
    responses(
        (status = 200, description = "Grant applied or replayed", body = GrantResponse),
        (status = 400, description = "Invalid parameters", body = ErrorResponse),
        (status = 409, description = "Reference reused with different amount", body = ErrorResponse),
    )
)]
pub async fn grant(
    State(state): State<AppState>,
    Path(user_code): Path<String>,
    Json(req): Json<GrantRequest>,
) -> Result<impl IntoResponse, CreditError> {
    let user = UserCode::new(user_code);
    let meta = GrantMeta {
        action: req.action,
        group_code: req.group_code,
    };
    let outcome = state
        .credit_service
        .grant(&user, req.amount, &req.op_ref, &meta)
        .await?;

    Ok(Json(GrantResponse {
        balance: outcome.balance,
        granted: outcome.granted,
        promo_id: outcome.promo_id,
        expires_at: outcome.expires_at,
        replayed: outcome.replayed,
    }))
}

/// `POST /users/:user_code/credits/debit` — Direct debit.
///
/// # Errors
///
/// Returns [`CreditError`] on validation failure, insufficient
/// balance, or reference reuse with a different amount.
#[utoipa::path(
    post,
    path = "/api/v1/users/{user_code}/credits/debit",
    tag = "Credits",
    summary = "Debit directly",
    description = "Debits the user without a prior hold, with the same idempotency and non-negative-balance guarantees as capture.",
    params(
        ("user_code" = String, Path, description = "User identifier"),
    ),
    request_body = DebitRequest,
    responses(
        (status = 200, description = "Debit applied or replayed", body = DebitResponse),
        (status = 400, description = "Invalid parameters", body = ErrorResponse),
        (status = 402, description = "Insufficient balance", body = ErrorResponse),
        (status = 409, description = "Reference reused with different amount", body = ErrorResponse),
    )
)]
pub async fn debit(
    State(state): State<AppState>,
    Path(user_code): Path<String>,
    Json(req): Json<DebitRequest>,
) -> Result<impl IntoResponse, CreditError> {
    let user = UserCode::new(user_code);
    let outcome = state
        .credit_service
        .debit(&user, req.amount, &req.op_ref)
        .await?;

    Ok(Json(DebitResponse {
        balance: outcome.balance,
        replayed: outcome.replayed,
    }))
}

/// Credit mutation routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users/{user_code}/credits/authorize", post(authorize))
        .route("/users/{user_code}/credits/capture", post(capture))
        .route("/users/{user_code}/credits/void", post(void_hold))
        .route("/users/{user_code}/credits/grant", post(grant))
        .route("/users/{user_code}/credits/debit", post(debit))
}
