//! Credit service: orchestrates every balance-affecting operation.
//!
//! Stateless coordinator over a [`LedgerStore`]. Every mutation method
//! follows the pattern: validate → check for an existing row under the
//! caller's reference (idempotent replay) → append through the store's
//! atomic balance check → on a lost race, re-read the winner's row and
//! return its result.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::promotion::{self, Resolution};
use crate::domain::{
    AuthorizeOutcome, BalanceView, CaptureOutcome, DebitOutcome, EntryKind, GrantOutcome,
    LedgerEntry, NewLedgerEntry, UserCode, VoidOutcome,
};
use crate::error::CreditError;
use crate::persistence::{LedgerStore, StoreError};

/// Longest accepted idempotency reference.
const MAX_REF_LEN: usize = 128;
/// Longest accepted user code.
const MAX_USER_CODE_LEN: usize = 128;

/// Caller-supplied context for a grant.
///
/// `action` selects the promotion pool; `group_code` is the user's
/// group as known to the surrounding application, used only for
/// promotion scoping.
#[derive(Debug, Clone, Default)]
pub struct GrantMeta {
    /// Action category being rewarded (e.g. `"daily"`, `"referral"`).
    pub action: Option<String>,
    /// Group the user belongs to, if the caller tracks one.
    pub group_code: Option<String>,
}

/// Orchestration layer for all credit operations.
///
/// Holds no authoritative state of its own: correctness under
/// concurrent workers comes entirely from the store's transactional
/// guarantees, so any number of `CreditService` instances may run
/// against the same database.
#[derive(Debug, Clone)]
pub struct CreditService {
    store: Arc<dyn LedgerStore>,
    sweep_batch_size: i64,
}

impl CreditService {
    /// Creates a new `CreditService`.
    ///
    /// `sweep_batch_size` bounds how many expired grants one sweep
    /// transaction batch processes; see [`Self::run_expiry_sweep`].
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, sweep_batch_size: i64) -> Self {
        Self {
            store,
            sweep_batch_size,
        }
    }

    /// Returns a reference to the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Configured expiry sweep batch size.
    #[must_use]
    pub const fn sweep_batch_size(&self) -> i64 {
        self.sweep_batch_size
    }

    /// Reserves `amount` against the user's available balance without
    /// moving the visible balance.
    ///
    /// # Errors
    ///
    /// [`CreditError::InsufficientBalance`] when availability is too
    /// low (no ledger row is written), [`CreditError::IdempotencyConflict`]
    /// when `op_ref` was authorized with a different amount,
    /// [`CreditError::StoreUnavailable`] on transient store failure
    /// (safe to retry with the same `op_ref`).
    pub async fn authorize(
        &self,
        user_code: &UserCode,
        amount: i64,
        op_ref: &str,
    ) -> Result<AuthorizeOutcome, CreditError> {
        Self::validate(user_code, amount, op_ref)?;

        if let Some(hold) = self.find(user_code, op_ref, EntryKind::Hold).await? {
            return Self::replay_authorize(&hold, amount);
        }

        let new = NewLedgerEntry::hold(user_code.clone(), amount, op_ref);
        match self.store.append_entry(new).await {
            Ok(_) => {
                tracing::info!(%user_code, amount, op_ref, "hold authorized");
                Ok(AuthorizeOutcome::New { amount })
            }
            // Lost the race to a concurrent retry; adopt its result.
            Err(StoreError::DuplicateRef { .. }) => {
                let hold = self.require(user_code, op_ref, EntryKind::Hold).await?;
                Self::replay_authorize(&hold, amount)
            }
            Err(e) => Err(Self::store_error(user_code, e)),
        }
    }

    /// Finalizes a previously authorized hold into a debit. Partial
    /// capture is allowed; the unused remainder is implicitly released.
    ///
    /// # Errors
    ///
    /// [`CreditError::HoldNotFound`] when `op_ref` was never
    /// authorized, [`CreditError::InvalidRequest`] when `amount`
    /// exceeds the held amount, [`CreditError::IdempotencyConflict`]
    /// when a replay carries a different amount than the original
    /// capture. A hold already voided is not an error: the original
    /// void outcome returns.
    pub async fn capture(
        &self,
        user_code: &UserCode,
        amount: i64,
        op_ref: &str,
    ) -> Result<CaptureOutcome, CreditError> {
        Self::validate(user_code, amount, op_ref)?;

        if let Some(capture) = self.find(user_code, op_ref, EntryKind::Capture).await? {
            return Self::replay_capture(&capture, amount);
        }
        if let Some(void) = self.find(user_code, op_ref, EntryKind::Void).await? {
            return Ok(CaptureOutcome::AlreadyVoided {
                balance: void.balance_after,
            });
        }
        let Some(hold) = self.find(user_code, op_ref, EntryKind::Hold).await? else {
            return Err(CreditError::HoldNotFound {
                user_code: user_code.to_string(),
                op_ref: op_ref.to_string(),
            });
        };
        if amount > hold.amount {
            return Err(CreditError::InvalidRequest(format!(
                "capture amount {amount} exceeds held amount {}",
                hold.amount
            )));
        }

        let new = NewLedgerEntry::capture(user_code.clone(), amount, op_ref);
        match self.store.append_entry(new).await {
            Ok(entry) => {
                tracing::info!(%user_code, amount, op_ref, balance = entry.balance_after, "hold captured");
                Ok(CaptureOutcome::Captured {
                    balance: entry.balance_after,
                })
            }
            Err(StoreError::DuplicateRef { .. } | StoreError::HoldResolved { .. }) => {
                self.adopt_capture_winner(user_code, op_ref, amount).await
            }
            Err(e) => Err(Self::store_error(user_code, e)),
        }
    }

    /// Releases a hold with no economic effect. The `amount` argument
    /// is accepted for wire symmetry; a void always releases the full
    /// remaining hold.
    ///
    /// # Errors
    ///
    /// [`CreditError::HoldNotFound`] when `op_ref` was never
    /// authorized. A hold already captured is not an error: the
    /// original capture outcome returns and nothing is credited back.
    pub async fn void(
        &self,
        user_code: &UserCode,
        amount: i64,
        op_ref: &str,
    ) -> Result<VoidOutcome, CreditError> {
        Self::validate(user_code, amount, op_ref)?;

        if let Some(void) = self.find(user_code, op_ref, EntryKind::Void).await? {
            return Ok(VoidOutcome::Replayed {
                balance: void.balance_after,
            });
        }
        if let Some(capture) = self.find(user_code, op_ref, EntryKind::Capture).await? {
            return Ok(VoidOutcome::AlreadyCaptured {
                balance: capture.balance_after,
            });
        }
        let Some(hold) = self.find(user_code, op_ref, EntryKind::Hold).await? else {
            return Err(CreditError::HoldNotFound {
                user_code: user_code.to_string(),
                op_ref: op_ref.to_string(),
            });
        };

        let new = NewLedgerEntry::void(user_code.clone(), hold.amount, op_ref);
        match self.store.append_entry(new).await {
            Ok(entry) => {
                tracing::info!(%user_code, released = hold.amount, op_ref, "hold voided");
                Ok(VoidOutcome::Voided {
                    balance: entry.balance_after,
                })
            }
            Err(StoreError::DuplicateRef { .. } | StoreError::HoldResolved { .. }) => {
                if let Some(void) = self.find(user_code, op_ref, EntryKind::Void).await? {
                    return Ok(VoidOutcome::Replayed {
                        balance: void.balance_after,
                    });
                }
                let capture = self.require(user_code, op_ref, EntryKind::Capture).await?;
                Ok(VoidOutcome::AlreadyCaptured {
                    balance: capture.balance_after,
                })
            }
            Err(e) => Err(Self::store_error(user_code, e)),
        }
    }

    /// Credits the user, applying the winning promotion for
    /// `meta.action` if one is active. Unresolvable promotion
    /// configuration degrades to the base amount with a warning.
    ///
    /// # Errors
    ///
    /// [`CreditError::IdempotencyConflict`] when a replay carries a
    /// different base amount, [`CreditError::StoreUnavailable`] on
    /// transient store failure.
    pub async fn grant(
        &self,
        user_code: &UserCode,
        base_amount: i64,
        op_ref: &str,
        meta: &GrantMeta,
    ) -> Result<GrantOutcome, CreditError> {
        Self::validate(user_code, base_amount, op_ref)?;

        if let Some(grant) = self.find(user_code, op_ref, EntryKind::Grant).await? {
            return Self::replay_grant(&grant, base_amount);
        }

        let now = Utc::now();
        let resolution = self
            .resolve_promotion(user_code, base_amount, meta, now)
            .await?;

        let new = NewLedgerEntry::grant(
            user_code.clone(),
            base_amount,
            resolution.amount,
            op_ref,
            resolution.promo_id,
            resolution.expires_at,
        );
        match self.store.append_entry(new).await {
            Ok(entry) => {
                tracing::info!(
                    %user_code,
                    granted = entry.delta,
                    op_ref,
                    promo = ?entry.promo_id,
                    balance = entry.balance_after,
                    "credits granted"
                );
                Ok(GrantOutcome {
                    balance: entry.balance_after,
                    granted: entry.delta,
                    promo_id: entry.promo_id,
                    expires_at: entry.expires_at,
                    replayed: false,
                })
            }
            Err(StoreError::DuplicateRef { .. }) => {
                let grant = self.require(user_code, op_ref, EntryKind::Grant).await?;
                Self::replay_grant(&grant, base_amount)
            }
            Err(e) => Err(Self::store_error(user_code, e)),
        }
    }

    /// Debits the user directly, without a prior hold.
    ///
    /// # Errors
    ///
    /// [`CreditError::InsufficientBalance`] when the balance is too
    /// low, [`CreditError::IdempotencyConflict`] when a replay carries
    /// a different amount.
    pub async fn debit(
        &self,
        user_code: &UserCode,
        amount: i64,
        op_ref: &str,
    ) -> Result<DebitOutcome, CreditError> {
        Self::validate(user_code, amount, op_ref)?;

        if let Some(debit) = self.find(user_code, op_ref, EntryKind::Debit).await? {
            return Self::replay_debit(&debit, amount);
        }

        let new = NewLedgerEntry::debit(user_code.clone(), amount, op_ref);
        match self.store.append_entry(new).await {
            Ok(entry) => {
                tracing::info!(%user_code, amount, op_ref, balance = entry.balance_after, "direct debit");
                Ok(DebitOutcome {
                    balance: entry.balance_after,
                    replayed: false,
                })
            }
            Err(StoreError::DuplicateRef { .. }) => {
                let debit = self.require(user_code, op_ref, EntryKind::Debit).await?;
                Self::replay_debit(&debit, amount)
            }
            Err(e) => Err(Self::store_error(user_code, e)),
        }
    }

    /// Current balance projection: visible balance, open-hold reserve,
    /// and the availability left for new holds.
    ///
    /// # Errors
    ///
    /// Returns [`CreditError::StoreUnavailable`] on transient store
    /// failure.
    pub async fn balance(&self, user_code: &UserCode) -> Result<BalanceView, CreditError> {
        Self::validate_user(user_code)?;
        let balance = self
            .store
            .balance(user_code)
            .await
            .map_err(|e| Self::store_error(user_code, e))?;
        let reserved = self
            .store
            .reserved(user_code)
            .await
            .map_err(|e| Self::store_error(user_code, e))?;
        Ok(BalanceView::new(balance, reserved))
    }

    /// Ledger history for the user, newest first. `limit` is clamped
    /// to 1..=200; `before` pages past the given entry id.
    ///
    /// # Errors
    ///
    /// Returns [`CreditError::StoreUnavailable`] on transient store
    /// failure.
    pub async fn ledger(
        &self,
        user_code: &UserCode,
        limit: i64,
        before: Option<i64>,
    ) -> Result<Vec<LedgerEntry>, CreditError> {
        Self::validate_user(user_code)?;
        let limit = limit.clamp(1, 200);
        self.store
            .entries_for_user(user_code, limit, before)
            .await
            .map_err(|e| Self::store_error(user_code, e))
    }

    async fn resolve_promotion(
        &self,
        user_code: &UserCode,
        base_amount: i64,
        meta: &GrantMeta,
        now: DateTime<Utc>,
    ) -> Result<Resolution, CreditError> {
        let base = Resolution {
            amount: base_amount,
            promo_id: None,
            expires_at: None,
        };
        let Some(action) = meta.action.as_deref() else {
            return Ok(base);
        };
        let candidates = self
            .store
            .promotions_for_action(action, now)
            .await
            .map_err(|e| Self::store_error(user_code, e))?;
        match promotion::resolve(
            &candidates,
            action,
            base_amount,
            user_code,
            meta.group_code.as_deref(),
            now,
        ) {
            Ok(resolution) => Ok(resolution),
            Err(e) => {
                tracing::warn!(%user_code, action, error = %e, "promotion resolution failed; granting base amount");
                Ok(base)
            }
        }
    }

    /// Re-reads the capture-or-void winner after a lost append race.
    async fn adopt_capture_winner(
        &self,
        user_code: &UserCode,
        op_ref: &str,
        amount: i64,
    ) -> Result<CaptureOutcome, CreditError> {
        if let Some(capture) = self.find(user_code, op_ref, EntryKind::Capture).await? {
            return Self::replay_capture(&capture, amount);
        }
        let void = self.require(user_code, op_ref, EntryKind::Void).await?;
        Ok(CaptureOutcome::AlreadyVoided {
            balance: void.balance_after,
        })
    }

    fn replay_authorize(hold: &LedgerEntry, amount: i64) -> Result<AuthorizeOutcome, CreditError> {
        if hold.amount != amount {
            return Err(CreditError::IdempotencyConflict {
                op_ref: hold.op_ref.clone(),
                detail: format!(
                    "authorize amount {amount} differs from original {}",
                    hold.amount
                ),
            });
        }
        Ok(AuthorizeOutcome::Exists { amount })
    }

    fn replay_capture(capture: &LedgerEntry, amount: i64) -> Result<CaptureOutcome, CreditError> {
        if capture.amount != amount {
            return Err(CreditError::IdempotencyConflict {
                op_ref: capture.op_ref.clone(),
                detail: format!(
                    "capture amount {amount} differs from original {}",
                    capture.amount
                ),
            });
        }
        Ok(CaptureOutcome::Replayed {
            balance: capture.balance_after,
        })
    }

    fn replay_grant(grant: &LedgerEntry, base_amount: i64) -> Result<GrantOutcome, CreditError> {
        if grant.amount != base_amount {
            return Err(CreditError::IdempotencyConflict {
                op_ref: grant.op_ref.clone(),
                detail: format!(
                    "grant base amount {base_amount} differs from original {}",
                    grant.amount
                ),
            });
        }
        Ok(GrantOutcome {
            balance: grant.balance_after,
            granted: grant.delta,
            promo_id: grant.promo_id,
            expires_at: grant.expires_at,
            replayed: true,
        })
    }

    fn replay_debit(debit: &LedgerEntry, amount: i64) -> Result<DebitOutcome, CreditError> {
        if debit.amount != amount {
            return Err(CreditError::IdempotencyConflict {
                op_ref: debit.op_ref.clone(),
                detail: format!(
                    "debit amount {amount} differs from original {}",
                    debit.amount
                ),
            });
        }
        Ok(DebitOutcome {
            balance: debit.balance_after,
            replayed: true,
        })
    }

    async fn find(
        &self,
        user_code: &UserCode,
        op_ref: &str,
        kind: EntryKind,
    ) -> Result<Option<LedgerEntry>, CreditError> {
        self.store
            .find_entry(user_code, op_ref, kind)
            .await
            .map_err(|e| Self::store_error(user_code, e))
    }

    /// Like [`Self::find`] but for rows the store just reported as
    /// existing; absence is an internal inconsistency.
    async fn require(
        &self,
        user_code: &UserCode,
        op_ref: &str,
        kind: EntryKind,
    ) -> Result<LedgerEntry, CreditError> {
        self.find(user_code, op_ref, kind).await?.ok_or_else(|| {
            CreditError::Internal(format!(
                "entry ({user_code}, {op_ref}, {kind}) vanished after duplicate report"
            ))
        })
    }

    fn validate(user_code: &UserCode, amount: i64, op_ref: &str) -> Result<(), CreditError> {
        Self::validate_user(user_code)?;
        if op_ref.is_empty() || op_ref.len() > MAX_REF_LEN {
            return Err(CreditError::InvalidRequest(format!(
                "ref must be 1..={MAX_REF_LEN} characters"
            )));
        }
        if amount <= 0 {
            return Err(CreditError::InvalidRequest(format!(
                "amount must be positive, got {amount}"
            )));
        }
        Ok(())
    }

    fn validate_user(user_code: &UserCode) -> Result<(), CreditError> {
        if user_code.as_str().is_empty() || user_code.as_str().len() > MAX_USER_CODE_LEN {
            return Err(CreditError::InvalidRequest(format!(
                "user_code must be 1..={MAX_USER_CODE_LEN} characters"
            )));
        }
        Ok(())
    }

    fn store_error(user_code: &UserCode, error: StoreError) -> CreditError {
        match error {
            StoreError::Insufficient {
                requested,
                available,
            } => CreditError::InsufficientBalance {
                user_code: user_code.to_string(),
                requested,
                available,
            },
            StoreError::Unavailable(detail) => CreditError::StoreUnavailable(detail),
            other @ (StoreError::DuplicateRef { .. } | StoreError::HoldResolved { .. }) => {
                CreditError::Internal(other.to_string())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::memory::MemoryLedgerStore;

    fn make_service() -> (CreditService, Arc<MemoryLedgerStore>) {
        let store = Arc::new(MemoryLedgerStore::new());
        let service = CreditService::new(Arc::clone(&store) as Arc<dyn LedgerStore>, 100);
        (service, store)
    }

    fn user() -> UserCode {
        UserCode::new("U1")
    }

    async fn seed(service: &CreditService, amount: i64) {
        let result = service
            .grant(&user(), amount, &format!("seed-{amount}"), &GrantMeta::default())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn grant_authorize_capture_walkthrough() {
        let (service, _) = make_service();

        let grant = service
            .grant(&user(), 45, "daily-2024-01-01", &GrantMeta::default())
            .await;
        let Ok(grant) = grant else {
            panic!("grant failed");
        };
        assert_eq!(grant.balance, 45);
        assert_eq!(grant.granted, 45);

        let authorize = service.authorize(&user(), 5, "turn-1").await;
        assert!(matches!(authorize, Ok(AuthorizeOutcome::New { amount: 5 })));

        // The hold reserves availability but leaves the balance alone.
        let view = service.balance(&user()).await;
        let Ok(view) = view else {
            panic!("balance read failed");
        };
        assert_eq!(view.balance, 45);
        assert_eq!(view.reserved, 5);
        assert_eq!(view.available, 40);

        let capture = service.capture(&user(), 5, "turn-1").await;
        assert!(matches!(capture, Ok(CaptureOutcome::Captured { balance: 40 })));

        let view = service.balance(&user()).await;
        let Ok(view) = view else {
            panic!("balance read failed");
        };
        assert_eq!(view.balance, 40);
        assert_eq!(view.reserved, 0);
        assert_eq!(view.available, 40);
    }

    #[tokio::test]
    async fn authorize_beyond_available_writes_nothing() {
        let (service, store) = make_service();
        seed(&service, 45).await;

        let result = service.authorize(&user(), 50, "turn-1").await;
        let Err(CreditError::InsufficientBalance {
            requested,
            available,
            ..
        }) = result
        else {
            panic!("expected insufficient balance");
        };
        assert_eq!(requested, 50);
        assert_eq!(available, 45);

        // No hold row was written and the balance is untouched.
        let entries = service.ledger(&user(), 50, None).await;
        let Ok(entries) = entries else {
            panic!("ledger read failed");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(store.recomputed_balance(&user()), 45);
    }

    #[tokio::test]
    async fn authorize_replay_writes_one_hold() {
        let (service, _) = make_service();
        seed(&service, 45).await;

        let first = service.authorize(&user(), 10, "R1").await;
        assert!(matches!(first, Ok(AuthorizeOutcome::New { amount: 10 })));

        let second = service.authorize(&user(), 10, "R1").await;
        assert!(matches!(second, Ok(AuthorizeOutcome::Exists { amount: 10 })));

        let entries = service.ledger(&user(), 50, None).await;
        let Ok(entries) = entries else {
            panic!("ledger read failed");
        };
        let holds = entries
            .iter()
            .filter(|e| e.kind == EntryKind::Hold)
            .count();
        assert_eq!(holds, 1);
    }

    #[tokio::test]
    async fn authorize_replay_with_new_amount_conflicts() {
        let (service, _) = make_service();
        seed(&service, 45).await;

        let first = service.authorize(&user(), 10, "R1").await;
        assert!(first.is_ok());

        let second = service.authorize(&user(), 11, "R1").await;
        assert!(matches!(
            second,
            Err(CreditError::IdempotencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_authorize_yields_one_hold() {
        let (service, _) = make_service();
        seed(&service, 45).await;

        let service = Arc::new(service);
        let a = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.authorize(&UserCode::new("U1"), 10, "R1").await }
        });
        let b = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.authorize(&UserCode::new("U1"), 10, "R1").await }
        });

        let (a, b) = (a.await, b.await);
        let (Ok(Ok(_)), Ok(Ok(_))) = (a, b) else {
            panic!("both racers should succeed");
        };

        let entries = service.ledger(&user(), 50, None).await;
        let Ok(entries) = entries else {
            panic!("ledger read failed");
        };
        let holds = entries
            .iter()
            .filter(|e| e.kind == EntryKind::Hold)
            .count();
        assert_eq!(holds, 1);
    }

    #[tokio::test]
    async fn capture_replay_returns_original_balance() {
        let (service, _) = make_service();
        seed(&service, 45).await;

        let authorize = service.authorize(&user(), 5, "turn-1").await;
        assert!(authorize.is_ok());

        let first = service.capture(&user(), 5, "turn-1").await;
        assert!(matches!(first, Ok(CaptureOutcome::Captured { balance: 40 })));

        let second = service.capture(&user(), 5, "turn-1").await;
        assert!(matches!(second, Ok(CaptureOutcome::Replayed { balance: 40 })));
    }

    #[tokio::test]
    async fn concurrent_capture_writes_one_debit() {
        let (service, store) = make_service();
        seed(&service, 45).await;
        let authorize = service.authorize(&user(), 5, "turn-1").await;
        assert!(authorize.is_ok());

        let service = Arc::new(service);
        let a = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.capture(&UserCode::new("U1"), 5, "turn-1").await }
        });
        let b = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.capture(&UserCode::new("U1"), 5, "turn-1").await }
        });

        let (a, b) = (a.await, b.await);
        let (Ok(Ok(a)), Ok(Ok(b))) = (a, b) else {
            panic!("both racers should succeed");
        };
        assert_eq!(a.balance(), 40);
        assert_eq!(b.balance(), 40);
        assert_eq!(store.recomputed_balance(&user()), 40);
    }

    #[tokio::test]
    async fn void_after_capture_never_credits_back() {
        let (service, store) = make_service();
        seed(&service, 45).await;

        let authorize = service.authorize(&user(), 10, "R1").await;
        assert!(authorize.is_ok());
        let capture = service.capture(&user(), 10, "R1").await;
        assert!(matches!(capture, Ok(CaptureOutcome::Captured { balance: 35 })));

        let void = service.void(&user(), 10, "R1").await;
        assert!(matches!(
            void,
            Ok(VoidOutcome::AlreadyCaptured { balance: 35 })
        ));
        assert_eq!(store.recomputed_balance(&user()), 35);
    }

    #[tokio::test]
    async fn capture_after_void_charges_nothing() {
        let (service, store) = make_service();
        seed(&service, 45).await;

        let authorize = service.authorize(&user(), 10, "R1").await;
        assert!(authorize.is_ok());
        let void = service.void(&user(), 10, "R1").await;
        assert!(matches!(void, Ok(VoidOutcome::Voided { balance: 45 })));

        let capture = service.capture(&user(), 10, "R1").await;
        assert!(matches!(
            capture,
            Ok(CaptureOutcome::AlreadyVoided { balance: 45 })
        ));
        assert_eq!(store.recomputed_balance(&user()), 45);
    }

    #[tokio::test]
    async fn partial_capture_releases_the_remainder() {
        let (service, _) = make_service();
        seed(&service, 45).await;

        let authorize = service.authorize(&user(), 10, "R1").await;
        assert!(authorize.is_ok());

        let capture = service.capture(&user(), 4, "R1").await;
        assert!(matches!(capture, Ok(CaptureOutcome::Captured { balance: 41 })));

        // The hold is terminal, so nothing stays reserved.
        let view = service.balance(&user()).await;
        let Ok(view) = view else {
            panic!("balance read failed");
        };
        assert_eq!(view.reserved, 0);
        assert_eq!(view.available, 41);
    }

    #[tokio::test]
    async fn capture_exceeding_hold_is_rejected() {
        let (service, _) = make_service();
        seed(&service, 45).await;

        let authorize = service.authorize(&user(), 10, "R1").await;
        assert!(authorize.is_ok());

        let capture = service.capture(&user(), 11, "R1").await;
        assert!(matches!(capture, Err(CreditError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn capture_without_hold_is_hold_not_found() {
        let (service, _) = make_service();
        seed(&service, 45).await;

        let capture = service.capture(&user(), 5, "never-authorized").await;
        assert!(matches!(capture, Err(CreditError::HoldNotFound { .. })));
        let void = service.void(&user(), 5, "never-authorized").await;
        assert!(matches!(void, Err(CreditError::HoldNotFound { .. })));
    }

    #[tokio::test]
    async fn direct_debit_respects_balance_and_replays() {
        let (service, _) = make_service();
        seed(&service, 45).await;

        let debit = service.debit(&user(), 40, "spend-1").await;
        let Ok(outcome) = debit else {
            panic!("debit failed");
        };
        assert_eq!(outcome.balance, 5);
        assert!(!outcome.replayed);

        let replay = service.debit(&user(), 40, "spend-1").await;
        let Ok(outcome) = replay else {
            panic!("debit replay failed");
        };
        assert_eq!(outcome.balance, 5);
        assert!(outcome.replayed);

        let too_much = service.debit(&user(), 6, "spend-2").await;
        assert!(matches!(
            too_much,
            Err(CreditError::InsufficientBalance { .. })
        ));
    }

    #[tokio::test]
    async fn grant_applies_winning_promotion() {
        let (service, store) = make_service();
        store.insert_promotion(crate::domain::Promotion {
            id: uuid::Uuid::new_v4(),
            name: "double-daily".to_string(),
            action: "daily".to_string(),
            multiplier: 2.0,
            bonus: 5,
            start_at: Utc::now() - chrono::Duration::days(1),
            end_at: Utc::now() + chrono::Duration::days(1),
            expires_after_days: Some(7),
            applies_to_group: None,
            applies_to_user: None,
            priority: 10,
            is_active: true,
        });

        let meta = GrantMeta {
            action: Some("daily".to_string()),
            group_code: None,
        };
        let grant = service.grant(&user(), 45, "daily-2024-01-01", &meta).await;
        let Ok(outcome) = grant else {
            panic!("grant failed");
        };
        assert_eq!(outcome.granted, 95);
        assert_eq!(outcome.balance, 95);
        assert!(outcome.promo_id.is_some());
        assert!(outcome.expires_at.is_some());
    }

    #[tokio::test]
    async fn ambiguous_promotions_fall_back_to_base() {
        let (service, store) = make_service();
        let start = Utc::now() - chrono::Duration::days(1);
        for name in ["promo-a", "promo-b"] {
            store.insert_promotion(crate::domain::Promotion {
                id: uuid::Uuid::new_v4(),
                name: name.to_string(),
                action: "daily".to_string(),
                multiplier: 2.0,
                bonus: 0,
                start_at: start,
                end_at: Utc::now() + chrono::Duration::days(1),
                expires_after_days: None,
                applies_to_group: None,
                applies_to_user: None,
                priority: 1,
                is_active: true,
            });
        }

        let meta = GrantMeta {
            action: Some("daily".to_string()),
            group_code: None,
        };
        let grant = service.grant(&user(), 45, "daily-2024-01-01", &meta).await;
        let Ok(outcome) = grant else {
            panic!("grant failed");
        };
        assert_eq!(outcome.granted, 45);
        assert_eq!(outcome.promo_id, None);
    }

    #[tokio::test]
    async fn grant_replay_returns_original_outcome() {
        let (service, _) = make_service();

        let first = service
            .grant(&user(), 45, "daily-2024-01-01", &GrantMeta::default())
            .await;
        let Ok(first) = first else {
            panic!("grant failed");
        };
        let second = service
            .grant(&user(), 45, "daily-2024-01-01", &GrantMeta::default())
            .await;
        let Ok(second) = second else {
            panic!("grant replay failed");
        };
        assert!(second.replayed);
        assert_eq!(second.balance, first.balance);
        assert_eq!(second.granted, first.granted);

        let conflicting = service
            .grant(&user(), 44, "daily-2024-01-01", &GrantMeta::default())
            .await;
        assert!(matches!(
            conflicting,
            Err(CreditError::IdempotencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn balance_always_equals_ledger_sum() {
        let (service, store) = make_service();
        seed(&service, 45).await;

        let authorize = service.authorize(&user(), 10, "R1").await;
        assert!(authorize.is_ok());
        let capture = service.capture(&user(), 7, "R1").await;
        assert!(capture.is_ok());
        let authorize = service.authorize(&user(), 20, "R2").await;
        assert!(authorize.is_ok());
        let void = service.void(&user(), 20, "R2").await;
        assert!(void.is_ok());
        let debit = service.debit(&user(), 8, "spend-1").await;
        assert!(debit.is_ok());
        let grant = service
            .grant(&user(), 12, "bonus-1", &GrantMeta::default())
            .await;
        assert!(grant.is_ok());

        let view = service.balance(&user()).await;
        let Ok(view) = view else {
            panic!("balance read failed");
        };
        assert_eq!(view.balance, store.recomputed_balance(&user()));
        assert_eq!(view.balance, 45 - 7 - 8 + 12);

        // Every entry's snapshot agrees with the running sum.
        let entries = service.ledger(&user(), 50, None).await;
        let Ok(mut entries) = entries else {
            panic!("ledger read failed");
        };
        entries.sort_by_key(|e| e.id);
        let mut running = 0;
        for entry in &entries {
            running += entry.delta;
            assert_eq!(entry.balance_after, running);
        }
    }

    #[tokio::test]
    async fn ledger_pages_newest_first() {
        let (service, _) = make_service();
        for i in 1..=5 {
            let grant = service
                .grant(&user(), i, &format!("g-{i}"), &GrantMeta::default())
                .await;
            assert!(grant.is_ok());
        }

        let page = service.ledger(&user(), 2, None).await;
        let Ok(page) = page else {
            panic!("ledger read failed");
        };
        assert_eq!(page.len(), 2);
        let Some(first) = page.first() else {
            panic!("empty page");
        };
        assert_eq!(first.amount, 5);

        let cursor = page.last().map(|e| e.id);
        let next = service.ledger(&user(), 2, cursor).await;
        let Ok(next) = next else {
            panic!("ledger read failed");
        };
        assert_eq!(next.len(), 2);
        let Some(first) = next.first() else {
            panic!("empty page");
        };
        assert_eq!(first.amount, 3);
    }

    #[tokio::test]
    async fn validation_rejects_bad_input() {
        let (service, _) = make_service();

        let zero = service.authorize(&user(), 0, "R1").await;
        assert!(matches!(zero, Err(CreditError::InvalidRequest(_))));
        let negative = service.debit(&user(), -5, "R1").await;
        assert!(matches!(negative, Err(CreditError::InvalidRequest(_))));
        let empty_ref = service.authorize(&user(), 5, "").await;
        assert!(matches!(empty_ref, Err(CreditError::InvalidRequest(_))));
        let empty_user = service.balance(&UserCode::new("")).await;
        assert!(matches!(empty_user, Err(CreditError::InvalidRequest(_))));
    }
}
