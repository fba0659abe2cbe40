//! PostgreSQL implementation of the ledger store.
//!
//! Every balance-affecting append runs inside one transaction that
//! first locks the user's `user_balances` row with `SELECT ... FOR
//! UPDATE`, serializing concurrent appends for that user. Idempotency
//! and capture/void exclusivity ride on unique constraints so that
//! concurrent retries lose cleanly and re-read the winner's row.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{LedgerStore, StoreError};
use crate::domain::{EntryKind, LedgerEntry, NewLedgerEntry, Promotion, UserCode};

/// Partial unique index making capture and void mutually exclusive.
const TERMINAL_CONSTRAINT: &str = "ledger_entries_terminal_key";

/// Entry row tuple as selected from `ledger_entries`.
type EntryRow = (
    i64,
    String,
    EntryKind,
    i64,
    i64,
    String,
    Option<Uuid>,
    Option<i64>,
    Option<DateTime<Utc>>,
    i64,
    DateTime<Utc>,
);

/// Column list matching [`EntryRow`].
const ENTRY_COLUMNS: &str = "id, user_code, kind, delta, amount, op_ref, promo_id, \
     source_entry_id, expires_at, balance_after, created_at";

/// PostgreSQL-backed ledger store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new store with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts the `user_balances` row if absent and returns the
    /// current balance with the row locked for the transaction.
    async fn lock_balance(
        tx: &mut Transaction<'_, Postgres>,
        user_code: &UserCode,
    ) -> Result<i64, StoreError> {
        sqlx::query("INSERT INTO user_balances (user_code) VALUES ($1) ON CONFLICT (user_code) DO NOTHING")
            .bind(user_code.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        sqlx::query_scalar::<_, i64>(
            "SELECT balance FROM user_balances WHERE user_code = $1 FOR UPDATE",
        )
        .bind(user_code.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Sum of open hold amounts for the user. Callers needing a
    /// consistent value run this after [`Self::lock_balance`].
    async fn open_hold_sum<'e, E>(executor: E, user_code: &UserCode) -> Result<i64, StoreError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(h.amount), 0)::BIGINT FROM ledger_entries h \
             WHERE h.user_code = $1 AND h.kind = 'hold' \
             AND NOT EXISTS (SELECT 1 FROM ledger_entries t \
                 WHERE t.user_code = h.user_code AND t.op_ref = h.op_ref \
                 AND t.kind IN ('capture', 'void'))",
        )
        .bind(user_code.as_str())
        .fetch_one(executor)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Inserts the ledger row and bumps the balance cache; does not
    /// commit.
    async fn insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        new: &NewLedgerEntry,
        balance_after: i64,
    ) -> Result<LedgerEntry, StoreError> {
        let (id, created_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            "INSERT INTO ledger_entries \
             (user_code, kind, delta, amount, op_ref, promo_id, source_entry_id, expires_at, balance_after) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING id, created_at",
        )
        .bind(new.user_code.as_str())
        .bind(new.kind)
        .bind(new.delta)
        .bind(new.amount)
        .bind(&new.op_ref)
        .bind(new.promo_id)
        .bind(new.source_entry_id)
        .bind(new.expires_at)
        .bind(balance_after)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_insert_error(e, new))?;

        sqlx::query("UPDATE user_balances SET balance = $2, updated_at = now() WHERE user_code = $1")
            .bind(new.user_code.as_str())
            .bind(balance_after)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(LedgerEntry {
            id,
            user_code: new.user_code.clone(),
            kind: new.kind,
            delta: new.delta,
            amount: new.amount,
            op_ref: new.op_ref.clone(),
            promo_id: new.promo_id,
            source_entry_id: new.source_entry_id,
            expires_at: new.expires_at,
            balance_after,
            created_at,
        })
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn append_entry(&self, new: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let balance = Self::lock_balance(&mut tx, &new.user_code).await?;

        if new.kind == EntryKind::Hold {
            let reserved = Self::open_hold_sum(&mut *tx, &new.user_code).await?;
            let available = balance - reserved;
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

        let entry = Self::insert_entry(&mut tx, &new, balance_after).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(entry)
    }

    async fn find_entry(
        &self,
        user_code: &UserCode,
        op_ref: &str,
        kind: EntryKind,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
             WHERE user_code = $1 AND op_ref = $2 AND kind = $3",
        ))
        .bind(user_code.as_str())
        .bind(op_ref)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(row.map(entry_from_row))
    }

    async fn balance(&self, user_code: &UserCode) -> Result<i64, StoreError> {
        let balance = sqlx::query_scalar::<_, i64>(
            "SELECT balance FROM user_balances WHERE user_code = $1",
        )
        .bind(user_code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(balance.unwrap_or(0))
    }

    async fn reserved(&self, user_code: &UserCode) -> Result<i64, StoreError> {
        Self::open_hold_sum(&self.pool, user_code).await
    }

    async fn entries_for_user(
        &self,
        user_code: &UserCode,
        limit: i64,
        before: Option<i64>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = if let Some(before_id) = before {
            sqlx::query_as::<_, EntryRow>(&format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
                 WHERE user_code = $1 AND id < $2 ORDER BY id DESC LIMIT $3",
            ))
            .bind(user_code.as_str())
            .bind(before_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, EntryRow>(&format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
                 WHERE user_code = $1 ORDER BY id DESC LIMIT $2",
            ))
            .bind(user_code.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(rows.into_iter().map(entry_from_row).collect())
    }

    async fn promotions_for_action(
        &self,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Promotion>, StoreError> {
        let rows = sqlx::query_as::<_, PromotionRow>(
            "SELECT id, name, action, multiplier, bonus, start_at, end_at, \
             expires_after_days, applies_to_group, applies_to_user, priority, is_active \
             FROM promotions \
             WHERE is_active AND action = $1 AND start_at <= $2 AND end_at >= $2",
        )
        .bind(action)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(rows.into_iter().map(promotion_from_row).collect())
    }

    async fn expired_grants(
        &self,
        now: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries g \
             WHERE g.kind = 'grant' AND g.expires_at IS NOT NULL AND g.expires_at < $1 \
             AND NOT EXISTS (SELECT 1 FROM ledger_entries r \
                 WHERE r.kind = 'expiry_reversal' AND r.source_entry_id = g.id) \
             ORDER BY g.id LIMIT $2",
        ))
        .bind(now)
        .bind(batch)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(rows.into_iter().map(entry_from_row).collect())
    }

    async fn reverse_expired_grant(
        &self,
        grant: &LedgerEntry,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let balance = Self::lock_balance(&mut tx, &grant.user_code).await?;

        // Re-check under the lock so two sweeps cannot both fire.
        let already = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM ledger_entries WHERE kind = 'expiry_reversal' AND source_entry_id = $1",
        )
        .bind(grant.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if already.is_some() {
            return Ok(None);
        }

        let reversed = grant.delta.min(balance).max(0);
        let new = NewLedgerEntry::expiry_reversal(grant.user_code.clone(), grant, reversed);
        let balance_after = balance - reversed;

        let entry = match Self::insert_entry(&mut tx, &new, balance_after).await {
            Ok(entry) => entry,
            // Lost a race with a concurrent sweep: the grant is handled.
            Err(StoreError::DuplicateRef { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        tx.commit()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Some(entry))
    }
}

/// Promotion row tuple as selected from `promotions`.
type PromotionRow = (
    Uuid,
    String,
    String,
    f64,
    i64,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<i32>,
    Option<String>,
    Option<String>,
    i32,
    bool,
);

fn entry_from_row(row: EntryRow) -> LedgerEntry {
    let (
        id,
        user_code,
        kind,
        delta,
        amount,
        op_ref,
        promo_id,
        source_entry_id,
        expires_at,
        balance_after,
        created_at,
    ) = row;
    LedgerEntry {
        id,
        user_code: UserCode::new(user_code),
        kind,
        delta,
        amount,
        op_ref,
        promo_id,
        source_entry_id,
        expires_at,
        balance_after,
        created_at,
    }
}

fn promotion_from_row(row: PromotionRow) -> Promotion {
    let (
        id,
        name,
        action,
        multiplier,
        bonus,
        start_at,
        end_at,
        expires_after_days,
        applies_to_group,
        applies_to_user,
        priority,
        is_active,
    ) = row;
    Promotion {
        id,
        name,
        action,
        multiplier,
        bonus,
        start_at,
        end_at,
        expires_after_days,
        applies_to_group,
        applies_to_user: applies_to_user.map(UserCode::new),
        priority,
        is_active,
    }
}

/// Classifies an insert failure by the violated constraint.
fn map_insert_error(error: sqlx::Error, new: &NewLedgerEntry) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        if db.is_unique_violation() {
            if db.constraint() == Some(TERMINAL_CONSTRAINT) {
                return StoreError::HoldResolved {
                    user_code: new.user_code.clone(),
                    op_ref: new.op_ref.clone(),
                };
            }
            // ledger_entries_user_ref_kind_key and the expiry-source
            // index both mean this logical operation already has a row.
            return StoreError::DuplicateRef {
                user_code: new.user_code.clone(),
                op_ref: new.op_ref.clone(),
                kind: new.kind,
            };
        }
    }
    StoreError::Unavailable(error.to_string())
}
