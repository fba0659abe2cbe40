//! Persistence layer: durable ledger storage behind the [`LedgerStore`]
//! trait.
//!
//! Provides the [`LedgerStore`] trait for transactional, append-only
//! storage of credit movements plus promotion reads. The production
//! implementation uses `sqlx::PgPool` for async PostgreSQL access; an
//! in-memory implementation backs tests and local development.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{EntryKind, LedgerEntry, NewLedgerEntry, Promotion, UserCode};

/// Failures reported by a [`LedgerStore`].
///
/// `DuplicateRef` and `HoldResolved` are expected under retries and
/// races; the service layer turns them into idempotent replays.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A row for `(user_code, op_ref, kind)` already exists.
    #[error("duplicate reference ({user_code}, {op_ref}, {kind})")]
    DuplicateRef {
        /// Owning user.
        user_code: UserCode,
        /// Idempotency reference.
        op_ref: String,
        /// Entry kind of the existing row.
        kind: EntryKind,
    },

    /// The hold for `(user_code, op_ref)` was already captured or voided.
    #[error("hold ({user_code}, {op_ref}) already resolved")]
    HoldResolved {
        /// Owning user.
        user_code: UserCode,
        /// Idempotency reference of the hold.
        op_ref: String,
    },

    /// The append would drive the balance (or availability) negative.
    #[error("insufficient balance: requested {requested}, available {available}")]
    Insufficient {
        /// Amount the operation needed.
        requested: i64,
        /// Amount actually available.
        available: i64,
    },

    /// Transient infrastructure failure; safe to retry with the same
    /// reference.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Transactional, append-only storage of credit movements.
///
/// Every `append_entry` call executes its read-check-write sequence in
/// one atomic transaction: the user's balance row is locked, the
/// availability rule for the entry kind is checked, the ledger row is
/// inserted, and the denormalized balance is updated. Uniqueness of
/// `(user_code, op_ref, kind)` and capture/void exclusivity are enforced
/// by the store so concurrent retries serialize on it.
#[async_trait]
pub trait LedgerStore: Send + Sync + std::fmt::Debug {
    /// Appends a ledger entry atomically with its balance check.
    ///
    /// Availability rules by kind: a `hold` requires
    /// `balance - open_holds >= amount`; any entry with a negative
    /// `delta` requires the resulting balance to stay non-negative;
    /// grants and voids always pass.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateRef`] if the `(user_code, op_ref, kind)`
    /// row exists, [`StoreError::HoldResolved`] if a terminal entry for
    /// the hold exists, [`StoreError::Insufficient`] when the
    /// availability rule fails, [`StoreError::Unavailable`] on
    /// infrastructure failure.
    async fn append_entry(&self, new: NewLedgerEntry) -> Result<LedgerEntry, StoreError>;

    /// Looks up the entry for `(user_code, op_ref, kind)`, if committed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on infrastructure failure.
    async fn find_entry(
        &self,
        user_code: &UserCode,
        op_ref: &str,
        kind: EntryKind,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    /// Current visible balance for the user (zero if never seen).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on infrastructure failure.
    async fn balance(&self, user_code: &UserCode) -> Result<i64, StoreError>;

    /// Sum of the user's currently open hold amounts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on infrastructure failure.
    async fn reserved(&self, user_code: &UserCode) -> Result<i64, StoreError>;

    /// Ledger entries for the user, newest first, paginated by an `id`
    /// cursor (`before` excludes that id and everything newer).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on infrastructure failure.
    async fn entries_for_user(
        &self,
        user_code: &UserCode,
        limit: i64,
        before: Option<i64>,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Active promotions for the action whose window contains `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on infrastructure failure.
    async fn promotions_for_action(
        &self,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Promotion>, StoreError>;

    /// Expired grants with no reversal yet, oldest first, at most
    /// `batch` rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on infrastructure failure.
    async fn expired_grants(
        &self,
        now: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Reverses the unconsumed portion of an expired grant, at most
    /// once. Returns `Ok(None)` when another sweep already reversed it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on infrastructure failure.
    async fn reverse_expired_grant(
        &self,
        grant: &LedgerEntry,
    ) -> Result<Option<LedgerEntry>, StoreError>;
}
