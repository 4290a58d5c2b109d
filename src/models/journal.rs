//! Accounting journals: facility-scoped (or cross-facility) batch exports
//! of order details into the general ledger.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Journal {
    pub journal_id: Uuid,
    /// None = cross-facility journal.
    pub facility_id: Option<Uuid>,
    pub journal_date: NaiveDate,
    /// None = open/pending, Some(true/false) = closed.
    pub is_successful: Option<bool>,
    pub reference: Option<String>,
    pub amount: Decimal,
    pub created_by: Uuid,
    pub updated_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalStatus {
    Open,
    Successful,
    Failed,
}

impl Journal {
    pub fn status(&self) -> JournalStatus {
        match self.is_successful {
            None => JournalStatus::Open,
            Some(true) => JournalStatus::Successful,
            Some(false) => JournalStatus::Failed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_successful.is_none()
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct JournalRow {
    pub journal_row_id: Uuid,
    pub journal_id: Uuid,
    pub order_detail_id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub description: String,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct JournalCutoffDate {
    pub cutoff_id: Uuid,
    pub cutoff_date: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("valid first of month")
}

fn first_of_previous_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("valid first of month")
}

/// Earliest permitted journal date given the configured cutoffs.
///
/// The cutoff for the current month closes last month's journaling window:
/// before it, journals may date back to the first of the previous month;
/// after it, only the current month. With no cutoff configured for the
/// current month there is no lower bound.
pub fn journal_date_window_start(
    now: DateTime<Utc>,
    cutoffs: &[DateTime<Utc>],
) -> Option<NaiveDate> {
    let today = now.date_naive();
    let current_month_cutoff = cutoffs.iter().find(|c| {
        c.year() == today.year() && c.month() == today.month()
    })?;

    if now >= *current_month_cutoff {
        Some(first_of_month(today))
    } else {
        Some(first_of_previous_month(today))
    }
}

/// Journal date validation: never in the future, never before the window
/// opened by the cutoff configuration. Failures are hard errors, not
/// silent corrections.
pub fn validate_journal_date(
    journal_date: NaiveDate,
    now: DateTime<Utc>,
    cutoffs: &[DateTime<Utc>],
) -> Result<(), String> {
    if journal_date > now.date_naive() {
        return Err("Journal Date cannot be in the future.".to_string());
    }

    if let Some(window_start) = journal_date_window_start(now, cutoffs) {
        if journal_date < window_start {
            return Err(format!(
                "Journal Date cannot be before {} (journaling window closed by cutoff)",
                window_start
            ));
        }
    }

    Ok(())
}
