//! Account-scoped invoices grouping completed order details.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Statement {
    pub statement_id: Uuid,
    /// Sequential human-facing number; feeds the invoice number format.
    pub statement_number: i64,
    pub account_id: Uuid,
    pub facility_id: Uuid,
    pub parent_statement_id: Option<Uuid>,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub created_by: Uuid,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl Statement {
    pub fn is_canceled(&self) -> bool {
        self.canceled_at.is_some()
    }
}

/// Reconciliation rollup for a statement, derived from its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementReconciliation {
    /// Canceled statements sit outside both scopes.
    Canceled,
    /// Every attached row has been reconciled.
    Reconciled,
    /// At least one attached row is not reconciled.
    Unreconciled,
}

/// Standalone invoice number: `{account_number}-{statement_number}`.
pub fn root_invoice_number(account_number: i64, statement_number: i64) -> String {
    format!("{}-{}", account_number, statement_number)
}

/// Chained invoice number for a corrected/split statement. The first child
/// of a parent is `{parent}-2`; each later child of the same parent takes
/// the next suffix. Callers must read `existing_children` with the parent
/// row locked, inside the same transaction as the insert.
pub fn child_invoice_number(parent_invoice_number: &str, existing_children: i64) -> String {
    format!("{}-{}", parent_invoice_number, existing_children + 2)
}
