//! Domain layer: core credit types, operation outcomes, and promotion
//! resolution.
//!
//! This module contains the engine's domain model: the opaque user
//! identifier, the immutable ledger entry with its kind taxonomy, typed
//! per-operation results, and the promotion model with its pure
//! resolution function.

pub mod ledger_entry;
pub mod outcome;
pub mod promotion;
pub mod user_code;

pub use ledger_entry::{EntryKind, LedgerEntry, NewLedgerEntry};
pub use outcome::{
    AuthorizeOutcome, BalanceView, CaptureOutcome, DebitOutcome, GrantOutcome, SweepReport,
    VoidOutcome,
};
pub use promotion::{Promotion, Resolution, ResolveError, resolve};
pub use user_code::UserCode;
