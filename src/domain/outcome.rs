//! Typed results for every mutating credit operation.
//!
//! Callers pattern-match on these instead of inspecting ad hoc response
//! fields. Idempotent replays and capture/void crossovers are encoded as
//! variants, not errors, so retries stay safe.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Result of an `authorize` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// A new hold was written.
    New {
        /// Reserved amount.
        amount: i64,
    },
    /// The reference was already authorized; no additional effect.
    Exists {
        /// Amount reserved by the original authorization.
        amount: i64,
    },
}

impl AuthorizeOutcome {
    /// Wire status string: `"new"` or `"exists"`.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::New { .. } => "new",
            Self::Exists { .. } => "exists",
        }
    }
}

/// Result of a `capture` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The hold was finalized into a debit by this call.
    Captured {
        /// Balance after the capture committed.
        balance: i64,
    },
    /// The reference was already captured; the original result returns.
    Replayed {
        /// Balance recorded by the original capture.
        balance: i64,
    },
    /// The hold was voided before this capture arrived; nothing was
    /// charged.
    AlreadyVoided {
        /// Balance recorded when the void committed.
        balance: i64,
    },
}

impl CaptureOutcome {
    /// Wire status string.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Captured { .. } => "captured",
            Self::Replayed { .. } => "replayed",
            Self::AlreadyVoided { .. } => "already_voided",
        }
    }

    /// Balance carried by any variant.
    #[must_use]
    pub const fn balance(&self) -> i64 {
        match self {
            Self::Captured { balance }
            | Self::Replayed { balance }
            | Self::AlreadyVoided { balance } => *balance,
        }
    }
}

/// Result of a `void` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoidOutcome {
    /// The hold was released by this call.
    Voided {
        /// Balance after the void committed (unchanged by the void).
        balance: i64,
    },
    /// The reference was already voided; no additional effect.
    Replayed {
        /// Balance recorded by the original void.
        balance: i64,
    },
    /// The hold was captured before this void arrived; the capture's
    /// result returns and nothing is credited back.
    AlreadyCaptured {
        /// Balance recorded by the capture.
        balance: i64,
    },
}

impl VoidOutcome {
    /// Wire status string.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Voided { .. } => "voided",
            Self::Replayed { .. } => "replayed",
            Self::AlreadyCaptured { .. } => "already_captured",
        }
    }

    /// Balance carried by any variant.
    #[must_use]
    pub const fn balance(&self) -> i64 {
        match self {
            Self::Voided { balance }
            | Self::Replayed { balance }
            | Self::AlreadyCaptured { balance } => *balance,
        }
    }
}

/// Result of a `grant` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantOutcome {
    /// Balance after the grant.
    pub balance: i64,
    /// Credits actually granted after promotion resolution.
    pub granted: i64,
    /// Winning promotion, if one applied.
    pub promo_id: Option<Uuid>,
    /// When the granted credits expire, if ever.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether this was an idempotent replay of an earlier grant.
    pub replayed: bool,
}

/// Result of a direct `debit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebitOutcome {
    /// Balance after the debit.
    pub balance: i64,
    /// Whether this was an idempotent replay of an earlier debit.
    pub replayed: bool,
}

/// Current balance projection for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceView {
    /// Visible balance: sum of all ledger deltas.
    pub balance: i64,
    /// Sum of currently open hold amounts.
    pub reserved: i64,
    /// Balance minus reserve, clamped at zero.
    pub available: i64,
}

impl BalanceView {
    /// Builds a view from the raw balance and open-hold reserve.
    #[must_use]
    pub const fn new(balance: i64, reserved: i64) -> Self {
        let available = balance - reserved;
        Self {
            balance,
            reserved,
            available: if available > 0 { available } else { 0 },
        }
    }
}

/// Summary of one expiry sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired grants examined.
    pub scanned: u64,
    /// Reversal entries written.
    pub reversed: u64,
    /// Credit units reclaimed across all reversals.
    pub reclaimed: i64,
    /// Grants whose reversal failed and was left for the next run.
    pub failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_status_strings() {
        assert_eq!(AuthorizeOutcome::New { amount: 5 }.status(), "new");
        assert_eq!(AuthorizeOutcome::Exists { amount: 5 }.status(), "exists");
    }

    #[test]
    fn capture_balance_is_uniform_across_variants() {
        assert_eq!(CaptureOutcome::Captured { balance: 40 }.balance(), 40);
        assert_eq!(CaptureOutcome::Replayed { balance: 40 }.balance(), 40);
        assert_eq!(CaptureOutcome::AlreadyVoided { balance: 45 }.balance(), 45);
    }

    #[test]
    fn balance_view_clamps_available_at_zero() {
        let view = BalanceView::new(10, 25);
        assert_eq!(view.balance, 10);
        assert_eq!(view.reserved, 25);
        assert_eq!(view.available, 0);

        let view = BalanceView::new(45, 5);
        assert_eq!(view.available, 40);
    }
}
