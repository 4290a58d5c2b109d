//! Order details: the unit of billable work.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::account::AccountKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    New,
    InProcess,
    Complete,
    Canceled,
    Reconciled,
    Unrecoverable,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProcess => "in_process",
            Self::Complete => "complete",
            Self::Canceled => "canceled",
            Self::Reconciled => "reconciled",
            Self::Unrecoverable => "unrecoverable",
        }
    }

    /// Strict whitelist lookup for user-supplied keys.
    pub fn from_key(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "in_process" => Some(Self::InProcess),
            "complete" => Some(Self::Complete),
            "canceled" => Some(Self::Canceled),
            "reconciled" => Some(Self::Reconciled),
            "unrecoverable" => Some(Self::Unrecoverable),
            _ => None,
        }
    }

    pub fn from_str(s: &str) -> Self {
        Self::from_key(s).unwrap_or(Self::New)
    }

    /// Terminal reconciliation states reachable from `complete`.
    pub fn is_reconciliation_target(&self) -> bool {
        matches!(self, Self::Reconciled | Self::Unrecoverable)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OrderDetail {
    pub order_detail_id: Uuid,
    pub order_id: Uuid,
    pub account_id: Uuid,
    pub product_id: Uuid,
    pub facility_id: Uuid,
    pub state: String,
    pub ordered_at: DateTime<Utc>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub dispute_at: Option<DateTime<Utc>>,
    pub dispute_resolved_at: Option<DateTime<Utc>>,
    pub statement_id: Option<Uuid>,
    pub journal_id: Option<Uuid>,
    pub price_policy_id: Option<Uuid>,
    pub actual_cost: Option<Decimal>,
    pub actual_subsidy: Option<Decimal>,
    pub problem: bool,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub reconciled_note: Option<String>,
    pub unrecoverable_note: Option<String>,
    pub deposit_number: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl OrderDetail {
    pub fn state(&self) -> OrderState {
        OrderState::from_str(&self.state)
    }

    /// Billable amount: actual cost less subsidy, when costed.
    pub fn total_cost(&self) -> Option<Decimal> {
        self.actual_cost
            .map(|cost| cost - self.actual_subsidy.unwrap_or(Decimal::ZERO))
    }

    pub fn is_disputed(&self) -> bool {
        self.dispute_at.is_some() && self.dispute_resolved_at.is_none()
    }
}

/// Review/billing eligibility sets. Each is a SQL predicate over the
/// standard search relation (`order_details od JOIN accounts a`), so it
/// composes with transaction-search filters without loading rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDetailScope {
    NeedNotification,
    InReview,
    InDispute,
    NeedJournal,
    NeedStatement,
}

impl OrderDetailScope {
    pub fn from_key(s: &str) -> Option<Self> {
        match s {
            "need_notification" => Some(Self::NeedNotification),
            "in_review" => Some(Self::InReview),
            "in_dispute" => Some(Self::InDispute),
            "need_journal" => Some(Self::NeedJournal),
            "need_statement" => Some(Self::NeedStatement),
            _ => None,
        }
    }

    pub fn where_sql(&self) -> &'static str {
        match self {
            Self::NeedNotification => {
                "od.state = 'complete' AND od.price_policy_id IS NOT NULL \
                 AND od.reviewed_at IS NULL AND od.problem = FALSE"
            }
            Self::InReview => {
                "od.state = 'complete' AND od.reviewed_at IS NOT NULL \
                 AND od.reviewed_at > NOW() \
                 AND (od.dispute_at IS NULL OR od.dispute_resolved_at IS NOT NULL)"
            }
            Self::InDispute => {
                "od.dispute_at IS NOT NULL AND od.dispute_resolved_at IS NULL"
            }
            Self::NeedJournal => {
                "od.state = 'complete' AND od.price_policy_id IS NOT NULL \
                 AND od.reviewed_at IS NOT NULL AND od.reviewed_at <= NOW() \
                 AND (od.dispute_at IS NULL OR od.dispute_resolved_at IS NOT NULL) \
                 AND od.journal_id IS NULL AND a.kind = 'chart_string'"
            }
            Self::NeedStatement => {
                "od.state = 'complete' AND od.price_policy_id IS NOT NULL \
                 AND od.reviewed_at IS NOT NULL AND od.reviewed_at <= NOW() \
                 AND (od.dispute_at IS NULL OR od.dispute_resolved_at IS NOT NULL) \
                 AND od.statement_id IS NULL \
                 AND a.kind IN ('purchase_order', 'credit_card')"
            }
        }
    }
}

/// Per-row reconciliation date check. `anchor` is the row's most recent
/// statement or journal date; a row may not be reconciled before it, nor in
/// the future.
pub fn validate_reconcile_date(
    reconciled_at: Option<NaiveDate>,
    today: NaiveDate,
    anchor: Option<NaiveDate>,
) -> Result<NaiveDate, String> {
    let date = reconciled_at.ok_or_else(|| "Reconciliation Date is required.".to_string())?;

    if date > today {
        return Err("Reconciliation Date cannot be in the future.".to_string());
    }

    if let Some(anchor) = anchor {
        if date < anchor {
            return Err(format!(
                "Reconciliation Date cannot precede the statement/journal date ({})",
                anchor
            ));
        }
    }

    Ok(date)
}

/// Full per-row eligibility check, shared by `reconcile_all`.
pub struct ReconcileCandidate {
    pub state: OrderState,
    pub kind: AccountKind,
    pub has_statement: bool,
    pub has_journal: bool,
    /// `None` while the journal is still open. Rows become reconcilable
    /// only once their journal closes as successful; a failed close
    /// detaches the rows instead.
    pub journal_successful: Option<bool>,
    pub statement_date: Option<NaiveDate>,
    pub journal_date: Option<NaiveDate>,
}

impl ReconcileCandidate {
    /// Latest of the row's statement and journal dates.
    pub fn anchor_date(&self) -> Option<NaiveDate> {
        match (self.statement_date, self.journal_date) {
            (Some(s), Some(j)) => Some(s.max(j)),
            (s, j) => s.or(j),
        }
    }

    pub fn validate(
        &self,
        reconciled_at: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<NaiveDate, String> {
        if self.state != OrderState::Complete {
            return Err("must be complete before it can be reconciled".to_string());
        }
        let journal_closed = self.has_journal && self.journal_successful == Some(true);
        if !self.kind.can_reconcile(self.has_statement, journal_closed) {
            return Err(if self.has_journal {
                "journal has not been closed as successful yet".to_string()
            } else {
                "account type does not support reconciliation yet".to_string()
            });
        }
        validate_reconcile_date(reconciled_at, today, self.anchor_date())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn candidate() -> ReconcileCandidate {
        ReconcileCandidate {
            state: OrderState::Complete,
            kind: AccountKind::PurchaseOrder,
            has_statement: true,
            has_journal: false,
            journal_successful: None,
            statement_date: Some(date(2024, 3, 1)),
            journal_date: None,
        }
    }

    #[test]
    fn missing_date_is_required_error() {
        let err = validate_reconcile_date(None, date(2024, 3, 15), None).unwrap_err();
        assert_eq!(err, "Reconciliation Date is required.");
    }

    #[test]
    fn future_date_is_rejected() {
        let err =
            validate_reconcile_date(Some(date(2024, 3, 16)), date(2024, 3, 15), None).unwrap_err();
        assert!(err.contains("future"));
    }

    #[test]
    fn date_before_anchor_is_rejected() {
        let err = candidate()
            .validate(Some(date(2024, 2, 28)), date(2024, 3, 15))
            .unwrap_err();
        assert!(err.contains("cannot precede"));
    }

    #[test]
    fn anchor_uses_latest_of_statement_and_journal() {
        let mut c = candidate();
        c.journal_date = Some(date(2024, 3, 10));
        assert_eq!(c.anchor_date(), Some(date(2024, 3, 10)));
    }

    #[test]
    fn valid_date_passes() {
        let ok = candidate()
            .validate(Some(date(2024, 3, 15)), date(2024, 3, 15))
            .unwrap();
        assert_eq!(ok, date(2024, 3, 15));
    }

    #[test]
    fn incomplete_row_cannot_reconcile() {
        let mut c = candidate();
        c.state = OrderState::InProcess;
        assert!(c
            .validate(Some(date(2024, 3, 15)), date(2024, 3, 15))
            .is_err());
    }

    #[test]
    fn row_on_an_open_journal_cannot_reconcile() {
        let mut c = candidate();
        c.kind = AccountKind::ChartString;
        c.has_statement = false;
        c.statement_date = None;
        c.has_journal = true;
        c.journal_date = Some(date(2024, 3, 1));

        // Open journal: is_successful is still NULL.
        let err = c
            .validate(Some(date(2024, 3, 15)), date(2024, 3, 15))
            .unwrap_err();
        assert!(err.contains("not been closed as successful"));

        c.journal_successful = Some(true);
        assert!(c
            .validate(Some(date(2024, 3, 15)), date(2024, 3, 15))
            .is_ok());
    }

    #[test]
    fn unstatemented_purchase_order_cannot_reconcile() {
        let mut c = candidate();
        c.has_statement = false;
        c.statement_date = None;
        assert!(c
            .validate(Some(date(2024, 3, 15)), date(2024, 3, 15))
            .is_err());
    }

    #[test]
    fn scope_keys_round_trip() {
        assert_eq!(
            OrderDetailScope::from_key("need_journal"),
            Some(OrderDetailScope::NeedJournal)
        );
        assert_eq!(OrderDetailScope::from_key("everything"), None);
    }
}
