//! Facilities and payment-source accounts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Facility {
    pub facility_id: Uuid,
    pub name: String,
    pub abbreviation: String,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

/// Closed registry of payment-source kinds. Request input goes through
/// [`AccountKind::from_key`]; there is no dynamic type lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    /// General-ledger chart string; billed through accounting journals.
    ChartString,
    /// Purchase order; billed through statements.
    PurchaseOrder,
    /// Credit card; billed through statements.
    CreditCard,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChartString => "chart_string",
            Self::PurchaseOrder => "purchase_order",
            Self::CreditCard => "credit_card",
        }
    }

    /// Strict whitelist lookup for user-supplied keys.
    pub fn from_key(s: &str) -> Option<Self> {
        match s {
            "chart_string" => Some(Self::ChartString),
            "purchase_order" => Some(Self::PurchaseOrder),
            "credit_card" => Some(Self::CreditCard),
            _ => None,
        }
    }

    /// Lenient variant for values read back from the database.
    pub fn from_str(s: &str) -> Self {
        Self::from_key(s).unwrap_or(Self::PurchaseOrder)
    }

    /// Whether rows on this account are exported through accounting journals.
    pub fn supports_journal(&self) -> bool {
        matches!(self, Self::ChartString)
    }

    /// Whether rows on this account are invoiced through statements.
    pub fn supports_statements(&self) -> bool {
        matches!(self, Self::PurchaseOrder | Self::CreditCard)
    }

    /// Whether a row on this account can be reconciled, given its current
    /// statement/journal linkage. Statemented kinds reconcile once
    /// statemented; chart strings reconcile once journaled.
    pub fn can_reconcile(&self, has_statement: bool, has_journal: bool) -> bool {
        match self {
            Self::PurchaseOrder | Self::CreditCard => has_statement,
            Self::ChartString => has_journal,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Account {
    pub account_id: Uuid,
    /// Human-facing sequential number; feeds the invoice number format.
    pub account_number: i64,
    pub kind: String,
    pub description: String,
    pub owner_user_id: Uuid,
    pub owner_email: String,
    /// None = cross-facility account.
    pub facility_id: Option<Uuid>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl Account {
    pub fn kind(&self) -> AccountKind {
        AccountKind::from_str(&self.kind)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended_at.is_some()
    }
}
