//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::service::CreditService;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Credit service for all business logic.
    pub credit_service: Arc<CreditService>,
}
