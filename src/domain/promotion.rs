//! Promotion model and resolution.
//!
//! Promotions are created and retired by external admin tooling; the
//! engine only reads them at grant time. [`resolve`] picks the single
//! winning promotion for a grant — promotions never stack.

use std::cmp::Reverse;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserCode;

/// A time- and scope-bounded rule boosting grants for one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    /// Unique promotion ID.
    pub id: Uuid,
    /// Human-readable name, used in operator logs.
    pub name: String,
    /// Action category this promotion boosts (e.g. `"daily"`).
    pub action: String,
    /// Multiplier applied to the base amount before the flat bonus.
    pub multiplier: f64,
    /// Flat add-on applied after the multiplier.
    pub bonus: i64,
    /// Start of the activity window.
    pub start_at: DateTime<Utc>,
    /// End of the activity window.
    pub end_at: DateTime<Utc>,
    /// Shelf life of granted credits in days; `None` = never expires.
    pub expires_after_days: Option<i32>,
    /// Restricts the promotion to one group, unless user-scoped.
    pub applies_to_group: Option<String>,
    /// Restricts the promotion to one user.
    pub applies_to_user: Option<UserCode>,
    /// Lower value = higher precedence.
    pub priority: i32,
    /// Admin kill switch.
    pub is_active: bool,
}

impl Promotion {
    /// Whether this promotion applies to the given grant.
    #[must_use]
    pub fn matches(
        &self,
        action: &str,
        user_code: &UserCode,
        group_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.is_active || self.action != action {
            return false;
        }
        if now < self.start_at || now > self.end_at {
            return false;
        }
        match (&self.applies_to_user, &self.applies_to_group) {
            // User scoping wins over group scoping when both are set.
            (Some(user), _) => user == user_code,
            (None, Some(group)) => group_code == Some(group.as_str()),
            (None, None) => true,
        }
    }

    /// Scope specificity: user-scoped (0) beats group-scoped (1) beats
    /// global (2).
    #[must_use]
    pub const fn scope_rank(&self) -> u8 {
        match (&self.applies_to_user, &self.applies_to_group) {
            (Some(_), _) => 0,
            (None, Some(_)) => 1,
            (None, None) => 2,
        }
    }

    /// Final grant amount: `round(base * multiplier) + bonus`, never
    /// negative.
    #[must_use]
    pub fn applied_amount(&self, base_amount: i64) -> i64 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let boosted = (base_amount as f64 * self.multiplier).round() as i64;
        boosted.saturating_add(self.bonus).max(0)
    }

    /// Expiry timestamp for credits granted now, if the promotion sets a
    /// shelf life.
    #[must_use]
    pub fn grant_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_after_days
            .map(|days| now + Duration::days(i64::from(days)))
    }
}

/// Outcome of promotion resolution for one grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Final amount to grant.
    pub amount: i64,
    /// Winning promotion, if any matched.
    pub promo_id: Option<Uuid>,
    /// Expiry of the granted credits, if the winner sets one.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Promotion configuration that cannot be resolved deterministically.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Two matching promotions tie on priority, scope, and start time.
    #[error("ambiguous promotions for action {action}: {first} and {second} tie on priority, scope, and start")]
    Ambiguous {
        /// Action being granted.
        action: String,
        /// Name of one tied promotion.
        first: String,
        /// Name of the other tied promotion.
        second: String,
    },
}

/// Picks the winning promotion and computes the final grant amount.
///
/// Winner selection: lowest `priority` value, ties broken by most
/// specific scope (user > group > global), then by most recent
/// `start_at`. No matching promotion leaves the base amount untouched.
///
/// # Errors
///
/// Returns [`ResolveError::Ambiguous`] when two matching promotions tie
/// on all three keys; callers are expected to log and fall back to the
/// base amount rather than block the grant.
pub fn resolve(
    candidates: &[Promotion],
    action: &str,
    base_amount: i64,
    user_code: &UserCode,
    group_code: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Resolution, ResolveError> {
    let mut matched: Vec<&Promotion> = candidates
        .iter()
        .filter(|p| p.matches(action, user_code, group_code, now))
        .collect();

    matched.sort_by_key(|p| (p.priority, p.scope_rank(), Reverse(p.start_at)));

    if let (Some(first), Some(second)) = (matched.first(), matched.get(1)) {
        if (first.priority, first.scope_rank(), first.start_at)
            == (second.priority, second.scope_rank(), second.start_at)
        {
            return Err(ResolveError::Ambiguous {
                action: action.to_string(),
                first: first.name.clone(),
                second: second.name.clone(),
            });
        }
    }

    match matched.first() {
        Some(winner) => Ok(Resolution {
            amount: winner.applied_amount(base_amount),
            promo_id: Some(winner.id),
            expires_at: winner.grant_expiry(now),
        }),
        None => Ok(Resolution {
            amount: base_amount,
            promo_id: None,
            expires_at: None,
        }),
    }
}
