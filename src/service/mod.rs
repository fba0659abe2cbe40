//! Service layer: business logic orchestration.
//!
//! [`CreditService`] implements the hold lifecycle, idempotent replay
//! decisions, promotion application, and balance reads on top of a
//! [`crate::persistence::LedgerStore`]. The expiry sweeper lives in
//! [`expiry`].

pub mod credit_service;
pub mod expiry;

pub use credit_service::{CreditService, GrantMeta};
pub use expiry::spawn_sweeper;
