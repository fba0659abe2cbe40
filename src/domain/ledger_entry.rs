//! Ledger entry model: one immutable, signed credit movement.
//!
//! The ledger is append-only. Historical rows are never updated or
//! deleted; corrections land as new offsetting entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::UserCode;

/// Discriminator for the economic meaning of a ledger entry.
///
/// Maps to the `entry_kind` PostgreSQL enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "entry_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Credit added to the balance, possibly promotion-boosted.
    Grant,
    /// Reservation against available balance; carries `delta = 0`.
    Hold,
    /// Finalization of a hold into an actual debit.
    Capture,
    /// Cancellation of a hold with no economic effect.
    Void,
    /// Direct debit without a prior hold.
    Debit,
    /// Offsetting entry neutralizing an expired, unconsumed grant.
    ExpiryReversal,
}

impl EntryKind {
    /// Returns the snake_case string used on the wire and in SQL.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Grant => "grant",
            Self::Hold => "hold",
            Self::Capture => "capture",
            Self::Void => "void",
            Self::Debit => "debit",
            Self::ExpiryReversal => "expiry_reversal",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A committed row from the `ledger_entries` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Auto-increment row ID, assigned at insert time.
    pub id: i64,
    /// Owning user.
    pub user_code: UserCode,
    /// Economic meaning of the entry.
    pub kind: EntryKind,
    /// Signed movement in credit units. Positive for grants, negative
    /// for captures/debits/expiry reversals, zero for holds and voids.
    pub delta: i64,
    /// Operation amount as requested by the caller: the reserved amount
    /// for holds, the base (pre-promotion) amount for grants, the
    /// original grant amount for expiry reversals.
    pub amount: i64,
    /// Caller-supplied idempotency reference, unique per
    /// `(user_code, op_ref, kind)`.
    pub op_ref: String,
    /// Promotion that produced this grant, if any.
    pub promo_id: Option<Uuid>,
    /// For expiry reversals, the grant entry being neutralized.
    pub source_entry_id: Option<i64>,
    /// When set on a grant, the moment it becomes eligible for reversal.
    pub expires_at: Option<DateTime<Utc>>,
    /// Running balance immediately after this entry committed.
    pub balance_after: i64,
    /// Insertion timestamp.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Whether this entry terminates a hold lifecycle for its `op_ref`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.kind, EntryKind::Capture | EntryKind::Void)
    }
}

/// Input for a ledger append; the store assigns `id`, `balance_after`,
/// and `created_at` inside the append transaction.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    /// Owning user.
    pub user_code: UserCode,
    /// Economic meaning of the entry.
    pub kind: EntryKind,
    /// Signed movement in credit units.
    pub delta: i64,
    /// Operation amount, see [`LedgerEntry::amount`].
    pub amount: i64,
    /// Caller-supplied idempotency reference.
    pub op_ref: String,
    /// Promotion that produced this grant, if any.
    pub promo_id: Option<Uuid>,
    /// For expiry reversals, the grant entry being neutralized.
    pub source_entry_id: Option<i64>,
    /// Grant shelf life, if any.
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewLedgerEntry {
    /// A hold reserving `amount` without moving the visible balance.
    #[must_use]
    pub fn hold(user_code: UserCode, amount: i64, op_ref: impl Into<String>) -> Self {
        Self {
            user_code,
            kind: EntryKind::Hold,
            delta: 0,
            amount,
            op_ref: op_ref.into(),
            promo_id: None,
            source_entry_id: None,
            expires_at: None,
        }
    }

    /// A capture finalizing `amount` of a previously held reservation.
    #[must_use]
    pub fn capture(user_code: UserCode, amount: i64, op_ref: impl Into<String>) -> Self {
        Self {
            user_code,
            kind: EntryKind::Capture,
            delta: -amount,
            amount,
            op_ref: op_ref.into(),
            promo_id: None,
            source_entry_id: None,
            expires_at: None,
        }
    }

    /// A void releasing a hold with no economic effect.
    #[must_use]
    pub fn void(user_code: UserCode, held_amount: i64, op_ref: impl Into<String>) -> Self {
        Self {
            user_code,
            kind: EntryKind::Void,
            delta: 0,
            amount: held_amount,
            op_ref: op_ref.into(),
            promo_id: None,
            source_entry_id: None,
            expires_at: None,
        }
    }

    /// A grant crediting `granted` units from a `base_amount` request.
    #[must_use]
    pub fn grant(
        user_code: UserCode,
        base_amount: i64,
        granted: i64,
        op_ref: impl Into<String>,
        promo_id: Option<Uuid>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            user_code,
            kind: EntryKind::Grant,
            delta: granted,
            amount: base_amount,
            op_ref: op_ref.into(),
            promo_id,
            source_entry_id: None,
            expires_at,
        }
    }

    /// A direct debit without a prior hold.
    #[must_use]
    pub fn debit(user_code: UserCode, amount: i64, op_ref: impl Into<String>) -> Self {
        Self {
            user_code,
            kind: EntryKind::Debit,
            delta: -amount,
            amount,
            op_ref: op_ref.into(),
            promo_id: None,
            source_entry_id: None,
            expires_at: None,
        }
    }

    /// An expiry reversal neutralizing `reversed` units of grant `source`.
    #[must_use]
    pub fn expiry_reversal(user_code: UserCode, source: &LedgerEntry, reversed: i64) -> Self {
        Self {
            user_code,
            kind: EntryKind::ExpiryReversal,
            delta: -reversed,
            amount: source.delta,
            op_ref: format!("expiry-{}", source.id),
            promo_id: source.promo_id,
            source_entry_id: Some(source.id),
            expires_at: None,
        }
    }
}
