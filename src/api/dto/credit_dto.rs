//! Credit operation DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::{EntryKind, LedgerEntry};

/// Request body for `POST /users/:user_code/credits/authorize`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizeRequest {
    /// Amount to reserve against the available balance.
    pub amount: i64,
    /// Caller-chosen idempotency reference for the hold lifecycle.
    #[serde(rename = "ref")]
    pub op_ref: String,
}

/// Response body for `POST /users/:user_code/credits/authorize`.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuthorizeResponse {
    /// `"new"` on first authorization, `"exists"` on idempotent replay.
    pub status: String,
    /// Reference of the hold.
    #[serde(rename = "ref")]
    pub op_ref: String,
    /// Reserved amount.
    pub amount: i64,
}

/// Request body for `POST /users/:user_code/credits/capture`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CaptureRequest {
    /// Amount to finalize; must not exceed the held amount.
    pub amount: i64,
    /// Reference of the hold being captured.
    #[serde(rename = "ref")]
    pub op_ref: String,
}

/// Response body for `POST /users/:user_code/credits/capture`.
#[derive(Debug, Serialize, ToSchema)]
pub struct CaptureResponse {
    /// `"captured"`, `"replayed"`, or `"already_voided"`.
    pub status: String,
    /// Reference of the hold.
    #[serde(rename = "ref")]
    pub op_ref: String,
    /// Balance after the operation (or its original outcome).
    pub balance: i64,
}

/// Request body for `POST /users/:user_code/credits/void`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct VoidRequest {
    /// Amount originally authorized; accepted for symmetry, the void
    /// always releases the full remaining hold.
    pub amount: i64,
    /// Reference of the hold being voided.
    #[serde(rename = "ref")]
    pub op_ref: String,
}

/// Response body for `POST /users/:user_code/credits/void`.
#[derive(Debug, Serialize, ToSchema)]
pub struct VoidResponse {
    /// `"voided"`, `"replayed"`, or `"already_captured"`.
    pub status: String,
    /// Reference of the hold.
    #[serde(rename = "ref")]
    pub op_ref: String,
    /// Balance after the operation (or its original outcome).
    pub balance: i64,
}

/// Request body for `POST /users/:user_code/credits/grant`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantRequest {
    /// Base amount before promotion resolution.
    pub amount: i64,
    /// Caller-chosen idempotency reference.
    #[serde(rename = "ref")]
    pub op_ref: String,
    /// Action category for promotion matching (e.g. `"daily"`).
    #[serde(default)]
    pub action: Option<String>,
    /// User's group for promotion scoping, as known to the caller.
    #[serde(default)]
    pub group_code: Option<String>,
}

/// Response body for `POST /users/:user_code/credits/grant`.
#[derive(Debug, Serialize, ToSchema)]
pub struct GrantResponse {
    /// Balance after the grant.
    pub balance: i64,
    /// Credits actually granted after promotion resolution.
    pub granted: i64,
    /// Winning promotion, if one applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promo_id: Option<Uuid>,
    /// When the granted credits expire, if ever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether this was an idempotent replay.
    pub replayed: bool,
}

/// Request body for `POST /users/:user_code/credits/debit`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DebitRequest {
    /// Amount to debit directly, without a prior hold.
    pub amount: i64,
    /// Caller-chosen idempotency reference.
    #[serde(rename = "ref")]
    pub op_ref: String,
}

/// Response body for `POST /users/:user_code/credits/debit`.
#[derive(Debug, Serialize, ToSchema)]
pub struct DebitResponse {
    /// Balance after the debit.
    pub balance: i64,
    /// Whether this was an idempotent replay.
    pub replayed: bool,
}

/// Response body for `GET /users/:user_code/credits/balance`.
#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceResponse {
    /// User the balance belongs to.
    pub user_code: String,
    /// Visible balance.
    pub balance: i64,
    /// Sum of open hold amounts.
    pub reserved: i64,
    /// Availability for new holds.
    pub available: i64,
}

/// Query parameters for `GET /users/:user_code/credits/ledger`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LedgerQuery {
    /// Page size (1..=200). Defaults to 50.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Return entries older than this entry id.
    #[serde(default)]
    pub before: Option<i64>,
}

/// One ledger entry as exposed on the wire.
#[derive(Debug, Serialize, ToSchema)]
pub struct LedgerEntryDto {
    /// Entry id, usable as a `before` cursor.
    pub id: i64,
    /// Economic meaning of the entry.
    pub kind: EntryKind,
    /// Signed movement in credit units.
    pub delta: i64,
    /// Operation amount as requested.
    pub amount: i64,
    /// Idempotency reference.
    #[serde(rename = "ref")]
    pub op_ref: String,
    /// Promotion that produced this entry, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promo_id: Option<Uuid>,
    /// Grant expiry, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Running balance snapshot after this entry.
    pub balance_after: i64,
    /// Insertion timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntry> for LedgerEntryDto {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id,
            kind: entry.kind,
            delta: entry.delta,
            amount: entry.amount,
            op_ref: entry.op_ref,
            promo_id: entry.promo_id,
            expires_at: entry.expires_at,
            balance_after: entry.balance_after,
            created_at: entry.created_at,
        }
    }
}

/// Response body for `GET /users/:user_code/credits/ledger`.
#[derive(Debug, Serialize, ToSchema)]
pub struct LedgerPageResponse {
    /// Entries, newest first.
    pub entries: Vec<LedgerEntryDto>,
    /// Cursor for the next page, absent on the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_before: Option<i64>,
}

/// Response body for `POST /admin/expiry-sweep`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SweepResponse {
    /// Expired grants examined.
    pub scanned: u64,
    /// Reversal entries written.
    pub reversed: u64,
    /// Credit units reclaimed.
    pub reclaimed: i64,
    /// Grants left for the next run after a failure.
    pub failures: u64,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn requests_use_ref_on_the_wire() {
        let req: Result<AuthorizeRequest, _> =
            serde_json::from_str(r#"{"amount": 5, "ref": "turn-1"}"#);
        let Ok(req) = req else {
            panic!("deserialization failed");
        };
        assert_eq!(req.amount, 5);
        assert_eq!(req.op_ref, "turn-1");
    }

    #[test]
    fn grant_request_defaults_optional_fields() {
        let req: Result<GrantRequest, _> =
            serde_json::from_str(r#"{"amount": 45, "ref": "daily-2024-01-01"}"#);
        let Ok(req) = req else {
            panic!("deserialization failed");
        };
        assert_eq!(req.action, None);
        assert_eq!(req.group_code, None);
    }

    #[test]
    fn grant_response_omits_absent_promo() {
        let response = GrantResponse {
            balance: 45,
            granted: 45,
            promo_id: None,
            expires_at: None,
            replayed: false,
        };
        let json = serde_json::to_string(&response).ok();
        let Some(json) = json else {
            panic!("serialization failed");
        };
        assert!(!json.contains("promo_id"));
        assert!(!json.contains("expires_at"));
    }
}
