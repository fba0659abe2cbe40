//! # credit-engine
//!
//! Transactional credit ledger engine with an authorize → capture/void
//! hold lifecycle, promotion-boosted grants, and expiry reconciliation.
//!
//! Every balance-affecting operation is idempotent under a
//! caller-supplied reference: retried requests, duplicate deliveries,
//! and concurrent races all collapse to exactly one economic effect.
//! Balances are never negative as an externally observable value, and
//! the append-only ledger remains the single source of truth — the
//! denormalized balance cache is updated only inside the same
//! transaction as each ledger append.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── CreditService (service/)
//!     │     ├── hold lifecycle + idempotent replay
//!     │     ├── promotion resolution (domain/)
//!     │     └── expiry sweeper (service/expiry)
//!     │
//!     └── LedgerStore (persistence/)
//!           ├── PostgreSQL (production)
//!           └── in-memory (tests, local dev)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
