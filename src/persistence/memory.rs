//! In-memory implementation of the ledger store.
//!
//! Mirrors the transactional semantics of the PostgreSQL store behind a
//! single mutex: per-user appends are serialized, idempotency and
//! capture/void exclusivity are checked before any state changes. Used
//! by the test suite and for local development without a database.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::{LedgerStore, StoreError};
use crate::domain::{EntryKind, LedgerEntry, NewLedgerEntry, Promotion, UserCode};

/// Ledger store holding everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<LedgerEntry>,
    balances: HashMap<UserCode, i64>,
    promotions: Vec<Promotion>,
    next_id: i64,
}

impl Inner {
    fn balance(&self, user_code: &UserCode) -> i64 {
        self.balances.get(user_code).copied().unwrap_or(0)
    }

    fn has_terminal(&self, user_code: &UserCode, op_ref: &str) -> bool {
        self.entries.iter().any(|e| {
            e.is_terminal() && e.user_code == *user_code && e.op_ref == op_ref
        })
    }

    fn open_hold_sum(&self, user_code: &UserCode) -> i64 {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::Hold && e.user_code == *user_code)
            .filter(|e| !self.has_terminal(&e.user_code, &e.op_ref))
            .map(|e| e.amount)
            .sum()
    }

    fn push(&mut self, new: &NewLedgerEntry, balance_after: i64) -> LedgerEntry {
        self.next_id += 1;
        let entry = LedgerEntry {
            id: self.next_id,
            user_code: new.user_code.clone(),
            kind: new.kind,
            delta: new.delta,
            amount: new.amount,
            op_ref: new.op_ref.clone(),
            promo_id: new.promo_id,
            source_entry_id: new.source_entry_id,
            expires_at: new.expires_at,
            balance_after,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        self.balances
            .insert(new.user_code.clone(), balance_after);
        entry
    }
}

impl MemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a promotion, standing in for the external admin
    /// tooling that writes the `promotions` table in production.
    pub fn insert_promotion(&self, promotion: Promotion) {
        self.lock().promotions.push(promotion);
    }

    /// Recomputes the balance from scratch as the sum of all deltas.
    ///
    /// Exists so tests can assert the cached balance never drifts from
    /// the ledger.
    #[must_use]
    pub fn recomputed_balance(&self, user_code: &UserCode) -> i64 {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.user_code == *user_code)
            .map(|e| e.delta)
            .sum()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn append_entry(&self, new: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let mut inner = self.lock();

        if inner.entries.iter().any(|e| {
            e.user_code == new.user_code && e.op_ref == new.op_ref && e.kind == new.kind
        }) {
            return Err(StoreError::DuplicateRef {
                user_code: new.user_code.clone(),
                op_ref: new.op_ref.clone(),
                kind: new.kind,
            });
        }

        if matches!(new.kind, EntryKind::Capture | EntryKind::Void)
            && inner.has_terminal(&new.user_code, &new.op_ref)
        {
            return Err(StoreError::HoldResolved {
                user_code: new.user_code.clone(),
                op_ref: new.op_ref.clone(),
            });
        }

        if new.kind == EntryKind::ExpiryReversal {
            if let Some(source) = new.source_entry_id {
                if inner.entries.iter().any(|e| {
                    e.kind == EntryKind::ExpiryReversal && e.source_entry_id == Some(source)
                }) {
                    return Err(StoreError::DuplicateRef {
                        user_code: new.user_code.clone(),
                        op_ref: new.op_ref.clone(),
                        kind: new.kind,
                    });
                }
            }
        }

        let balance = inner.balance(&new.user_code);

        if new.kind == EntryKind::Hold {
            let available = balance - inner.open_hold_sum(&new.user_code);
            if available < new.amount {
                return Err(StoreError::Insufficient {
                    requested: new.amount,
                    available,
                });
            }
        }

        let balance_after = balance
            .checked_add(new.delta)
            .ok_or_else(|| StoreError::Unavailable("balance overflow".to_string()))?;
        if balance_after < 0 {
            return Err(StoreError::Insufficient {
                requested: -new.delta,
                available: balance,
            });
        }

        Ok(inner.push(&new, balance_after))
    }

    async fn find_entry(
        &self,
        user_code: &UserCode,
        op_ref: &str,
        kind: EntryKind,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self
            .lock()
            .entries
            .iter()
            .find(|e| e.user_code == *user_code && e.op_ref == op_ref && e.kind == kind)
            .cloned())
    }

    async fn balance(&self, user_code: &UserCode) -> Result<i64, StoreError> {
        Ok(self.lock().balance(user_code))
    }

    async fn reserved(&self, user_code: &UserCode) -> Result<i64, StoreError> {
        Ok(self.lock().open_hold_sum(user_code))
    }

    async fn entries_for_user(
        &self,
        user_code: &UserCode,
        limit: i64,
        before: Option<i64>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let inner = self.lock();
        let mut entries: Vec<LedgerEntry> = inner
            .entries
            .iter()
            .filter(|e| e.user_code == *user_code)
            .filter(|e| before.is_none_or(|cursor| e.id < cursor))
            .cloned()
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.id));
        entries.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(entries)
    }

    async fn promotions_for_action(
        &self,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Promotion>, StoreError> {
        Ok(self
            .lock()
            .promotions
            .iter()
            .filter(|p| p.is_active && p.action == action && p.start_at <= now && p.end_at >= now)
            .cloned()
            .collect())
    }

    async fn expired_grants(
        &self,
        now: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let inner = self.lock();
        let mut grants: Vec<LedgerEntry> = inner
            .entries
            .iter()
            .filter(|e| e.kind == EntryKind::Grant)
            .filter(|e| e.expires_at.is_some_and(|at| at < now))
            .filter(|e| {
                !inner.entries.iter().any(|r| {
                    r.kind == EntryKind::ExpiryReversal && r.source_entry_id == Some(e.id)
                })
            })
            .cloned()
            .collect();
        grants.sort_by_key(|e| e.id);
        grants.truncate(usize::try_from(batch).unwrap_or(0));
        Ok(grants)
    }

    async fn reverse_expired_grant(
        &self,
        grant: &LedgerEntry,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let mut inner = self.lock();

        if inner.entries.iter().any(|e| {
            e.kind == EntryKind::ExpiryReversal && e.source_entry_id == Some(grant.id)
        }) {
            return Ok(None);
        }

        let balance = inner.balance(&grant.user_code);
        let reversed = grant.delta.min(balance).max(0);
        let new = NewLedgerEntry::expiry_reversal(grant.user_code.clone(), grant, reversed);
        let balance_after = balance - reversed;

        Ok(Some(inner.push(&new, balance_after)))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn user() -> UserCode {
        UserCode::new("u1")
    }

    async fn seed_grant(store: &MemoryLedgerStore, amount: i64) {
        let result = store
            .append_entry(NewLedgerEntry::grant(
                user(),
                amount,
                amount,
                format!("seed-{amount}"),
                None,
                None,
            ))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn duplicate_ref_is_rejected() {
        let store = MemoryLedgerStore::new();
        seed_grant(&store, 45).await;

        let first = store
            .append_entry(NewLedgerEntry::hold(user(), 5, "turn-1"))
            .await;
        assert!(first.is_ok());

        let second = store
            .append_entry(NewLedgerEntry::hold(user(), 5, "turn-1"))
            .await;
        assert!(matches!(second, Err(StoreError::DuplicateRef { .. })));
    }

    #[tokio::test]
    async fn capture_and_void_are_mutually_exclusive() {
        let store = MemoryLedgerStore::new();
        seed_grant(&store, 45).await;

        let hold = store
            .append_entry(NewLedgerEntry::hold(user(), 5, "turn-1"))
            .await;
        assert!(hold.is_ok());

        let capture = store
            .append_entry(NewLedgerEntry::capture(user(), 5, "turn-1"))
            .await;
        assert!(capture.is_ok());

        let void = store
            .append_entry(NewLedgerEntry::void(user(), 5, "turn-1"))
            .await;
        assert!(matches!(void, Err(StoreError::HoldResolved { .. })));
    }

    #[tokio::test]
    async fn hold_checks_availability_not_balance() {
        let store = MemoryLedgerStore::new();
        seed_grant(&store, 45).await;

        let first = store
            .append_entry(NewLedgerEntry::hold(user(), 40, "turn-1"))
            .await;
        assert!(first.is_ok());

        // Balance is still 45, but only 5 is available.
        let second = store
            .append_entry(NewLedgerEntry::hold(user(), 10, "turn-2"))
            .await;
        let Err(StoreError::Insufficient {
            requested,
            available,
        }) = second
        else {
            panic!("expected insufficient availability");
        };
        assert_eq!(requested, 10);
        assert_eq!(available, 5);
    }

    #[tokio::test]
    async fn debit_cannot_drive_balance_negative() {
        let store = MemoryLedgerStore::new();
        seed_grant(&store, 10).await;

        let result = store
            .append_entry(NewLedgerEntry::debit(user(), 11, "spend-1"))
            .await;
        assert!(matches!(result, Err(StoreError::Insufficient { .. })));
        let balance = store.balance(&user()).await;
        let Ok(balance) = balance else {
            panic!("balance read failed");
        };
        assert_eq!(balance, 10);
    }

    #[tokio::test]
    async fn expiry_reversal_fires_once() {
        let store = MemoryLedgerStore::new();
        let grant = store
            .append_entry(NewLedgerEntry::grant(
                user(),
                45,
                45,
                "daily-2024-01-01",
                None,
                Some(Utc::now() - chrono::Duration::hours(1)),
            ))
            .await;
        let Ok(grant) = grant else {
            panic!("grant failed");
        };

        let first = store.reverse_expired_grant(&grant).await;
        let Ok(Some(reversal)) = first else {
            panic!("expected a reversal entry");
        };
        assert_eq!(reversal.delta, -45);

        let second = store.reverse_expired_grant(&grant).await;
        let Ok(None) = second else {
            panic!("expected the second sweep to be a no-op");
        };
    }

    #[tokio::test]
    async fn cached_balance_matches_recomputation() {
        let store = MemoryLedgerStore::new();
        seed_grant(&store, 45).await;
        let hold = store
            .append_entry(NewLedgerEntry::hold(user(), 5, "turn-1"))
            .await;
        assert!(hold.is_ok());
        let capture = store
            .append_entry(NewLedgerEntry::capture(user(), 5, "turn-1"))
            .await;
        assert!(capture.is_ok());

        let balance = store.balance(&user()).await;
        let Ok(balance) = balance else {
            panic!("balance read failed");
        };
        assert_eq!(balance, 40);
        assert_eq!(store.recomputed_balance(&user()), 40);
    }
}
