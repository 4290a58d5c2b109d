//! Journal lifecycle: creation guarded by the one-open-journal-per-facility
//! invariant, atomic row attachment, closing, and reconciliation rollups.

use crate::config::Settings;
use crate::error::AppError;
use crate::models::journal::validate_journal_date;
use crate::models::{EventType, Journal, JournalRow};
use crate::services::database::Database;
use crate::services::export::{JournalExport, JournalExporter};
use crate::services::log_events::LogEventService;
use crate::services::metrics::{record_billing_operation, DB_QUERY_DURATION};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::Row;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

const JOURNAL_COLUMNS: &str =
    "journal_id, facility_id, journal_date, is_successful, reference, amount, \
     created_by, updated_by, created_utc, updated_utc";

/// Journal creation failures that are business-rule conflicts rather than
/// validation problems.
#[derive(Debug, Error)]
pub enum JournalCreationError {
    #[error("An open journal already exists for: {}", facilities.join(", "))]
    OpenJournalExists { facilities: Vec<String> },
}

impl From<JournalCreationError> for AppError {
    fn from(err: JournalCreationError) -> Self {
        AppError::Conflict(anyhow::Error::new(err))
    }
}

#[derive(Debug, Clone)]
pub struct NewJournal {
    /// One facility for a single-facility journal, several for a
    /// cross-facility journal.
    pub facility_ids: Vec<Uuid>,
    pub journal_date: NaiveDate,
    pub created_by: Uuid,
    pub order_detail_ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct JournalService {
    db: Arc<Database>,
    settings: Settings,
    log: LogEventService,
    exporter: Arc<dyn JournalExporter>,
}

impl JournalService {
    pub fn new(
        db: Arc<Database>,
        settings: Settings,
        log: LogEventService,
        exporter: Arc<dyn JournalExporter>,
    ) -> Self {
        Self {
            db,
            settings,
            log,
            exporter,
        }
    }

    /// Create a journal and attach every selected order detail, or nothing.
    ///
    /// The open-journal invariant is enforced twice: a pre-check inside the
    /// transaction produces the user-facing conflict naming the facilities,
    /// and the partial unique index on `journal_facilities (facility_id)
    /// WHERE open` wins any remaining race between concurrent admins.
    #[instrument(skip(self, params), fields(facilities = params.facility_ids.len(), rows = params.order_detail_ids.len()))]
    pub async fn create(&self, params: NewJournal) -> Result<Journal, AppError> {
        if params.facility_ids.is_empty() {
            return Err(AppError::ValidationError(
                "At least one facility is required.".to_string(),
            ));
        }
        if params.order_detail_ids.is_empty() {
            return Err(AppError::ValidationError(
                "No order details selected.".to_string(),
            ));
        }
        if params.order_detail_ids.len() > self.settings.max_bulk_rows {
            return Err(AppError::ValidationError(format!(
                "Batch exceeds the maximum of {} rows.",
                self.settings.max_bulk_rows
            )));
        }

        let cutoffs: Vec<_> = self
            .db
            .list_journal_cutoffs()
            .await?
            .into_iter()
            .map(|c| c.cutoff_date)
            .collect();
        validate_journal_date(params.journal_date, Utc::now(), &cutoffs)
            .map_err(AppError::ValidationError)?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_journal"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // Pre-check: any open claim on a target facility is a conflict.
        let conflicting: Vec<String> = sqlx::query(
            r#"
            SELECT f.name
            FROM journal_facilities jf
            JOIN facilities f ON f.facility_id = jf.facility_id
            WHERE jf.open AND jf.facility_id = ANY($1)
            FOR UPDATE OF jf
            "#,
        )
        .bind(&params.facility_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to check open journals: {}", e))
        })?
        .into_iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();

        if !conflicting.is_empty() {
            record_billing_operation("create_journal", "conflict");
            return Err(JournalCreationError::OpenJournalExists {
                facilities: conflicting,
            }
            .into());
        }

        let journal_id = Uuid::new_v4();
        let facility_id = if params.facility_ids.len() == 1 {
            Some(params.facility_ids[0])
        } else {
            None
        };

        let insert_sql = format!(
            r#"
            INSERT INTO journals (journal_id, facility_id, journal_date, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            JOURNAL_COLUMNS
        );
        let journal = sqlx::query_as::<_, Journal>(&insert_sql)
            .bind(journal_id)
            .bind(facility_id)
            .bind(params.journal_date)
            .bind(params.created_by)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create journal: {}", e))
            })?;

        for target_facility in &params.facility_ids {
            sqlx::query(
                "INSERT INTO journal_facilities (journal_id, facility_id, open) \
                 VALUES ($1, $2, TRUE)",
            )
            .bind(journal_id)
            .bind(target_facility)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // The partial unique index catches the check-then-insert race.
                if e.as_database_error()
                    .map(|db| db.is_unique_violation())
                    .unwrap_or(false)
                {
                    AppError::from(JournalCreationError::OpenJournalExists {
                        facilities: vec![target_facility.to_string()],
                    })
                } else {
                    AppError::DatabaseError(anyhow::anyhow!(
                        "Failed to claim facility for journal: {}",
                        e
                    ))
                }
            })?;
        }

        let total = self
            .attach_rows(&mut tx, journal_id, &params)
            .await?;

        let update_sql = format!(
            "UPDATE journals SET amount = $2, updated_utc = NOW() \
             WHERE journal_id = $1 RETURNING {}",
            JOURNAL_COLUMNS
        );
        let journal = sqlx::query_as::<_, Journal>(&update_sql)
            .bind(journal_id)
            .bind(total)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to set journal amount: {}", e))
            })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit journal: {}", e))
        })?;

        timer.observe_duration();
        record_billing_operation("create_journal", "success");
        info!(journal_id = %journal.journal_id, amount = %journal.amount, "Journal created");

        self.log
            .record(
                "journal",
                journal.journal_id,
                EventType::JournalCreated,
                Some(params.created_by),
                json!({
                    "facilities": params.facility_ids,
                    "order_details": params.order_detail_ids.len(),
                    "amount": journal.amount,
                }),
            )
            .await;

        Ok(journal)
    }

    /// Claim each selected row and write its journal row. Any ineligible
    /// row fails the whole batch (the caller's transaction rolls back).
    async fn attach_rows(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        journal_id: Uuid,
        params: &NewJournal,
    ) -> Result<Decimal, AppError> {
        let mut total = Decimal::ZERO;

        for order_detail_id in &params.order_detail_ids {
            let claimed = sqlx::query(
                r#"
                UPDATE order_details od
                SET journal_id = $1, updated_utc = NOW()
                FROM accounts a
                WHERE od.order_detail_id = $2
                  AND a.account_id = od.account_id
                  AND od.journal_id IS NULL
                  AND od.state = 'complete'
                  AND od.price_policy_id IS NOT NULL
                  AND od.reviewed_at IS NOT NULL
                  AND od.reviewed_at <= NOW()
                  AND (od.dispute_at IS NULL OR od.dispute_resolved_at IS NOT NULL)
                  AND a.kind = 'chart_string'
                  AND od.facility_id = ANY($3)
                RETURNING od.account_id, od.product_id, od.actual_cost, od.actual_subsidy
                "#,
            )
            .bind(journal_id)
            .bind(order_detail_id)
            .bind(&params.facility_ids)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to claim order detail: {}", e))
            })?;

            let row = claimed.ok_or_else(|| {
                record_billing_operation("create_journal", "row_rejected");
                AppError::ValidationError(format!(
                    "Order detail {} is not journalable (already journaled, not \
                     complete, not costed, still in review or dispute, or wrong \
                     account type).",
                    order_detail_id
                ))
            })?;

            let account_id: Uuid = row.get("account_id");
            let product_id: Uuid = row.get("product_id");
            let cost: Option<Decimal> = row.get("actual_cost");
            let subsidy: Option<Decimal> = row.get("actual_subsidy");
            let amount = cost.unwrap_or(Decimal::ZERO) - subsidy.unwrap_or(Decimal::ZERO);
            total += amount;

            sqlx::query(
                r#"
                INSERT INTO journal_rows
                    (journal_row_id, journal_id, order_detail_id, account_id, amount, description)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(journal_id)
            .bind(order_detail_id)
            .bind(account_id)
            .bind(amount)
            .bind(format!("Order detail {} / product {}", order_detail_id, product_id))
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create journal row: {}", e))
            })?;
        }

        Ok(total)
    }

    #[instrument(skip(self), fields(journal_id = %journal_id))]
    pub async fn get(&self, journal_id: Uuid) -> Result<Option<Journal>, AppError> {
        let sql = format!(
            "SELECT {} FROM journals WHERE journal_id = $1",
            JOURNAL_COLUMNS
        );
        sqlx::query_as::<_, Journal>(&sql)
            .bind(journal_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get journal: {}", e)))
    }

    #[instrument(skip(self), fields(journal_id = %journal_id))]
    pub async fn list_rows(&self, journal_id: Uuid) -> Result<Vec<JournalRow>, AppError> {
        sqlx::query_as::<_, JournalRow>(
            r#"
            SELECT journal_row_id, journal_id, order_detail_id, account_id, amount, description,
                   created_utc
            FROM journal_rows
            WHERE journal_id = $1
            ORDER BY created_utc, journal_row_id
            "#,
        )
        .bind(journal_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list journal rows: {}", e)))
    }

    /// Close an open journal as successful or failed. Closing releases the
    /// open facility claims; a failed close also detaches the rows so they
    /// can be journaled again. Terminal states never reopen.
    #[instrument(skip(self), fields(journal_id = %journal_id, is_successful = is_successful))]
    pub async fn close(
        &self,
        journal_id: Uuid,
        is_successful: bool,
        reference: Option<String>,
        updated_by: Uuid,
    ) -> Result<Journal, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["close_journal"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let close_sql = format!(
            r#"
            UPDATE journals
            SET is_successful = $2, reference = $3, updated_by = $4, updated_utc = NOW()
            WHERE journal_id = $1 AND is_successful IS NULL
            RETURNING {}
            "#,
            JOURNAL_COLUMNS
        );
        let journal = sqlx::query_as::<_, Journal>(&close_sql)
            .bind(journal_id)
            .bind(is_successful)
            .bind(&reference)
            .bind(updated_by)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to close journal: {}", e))
            })?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!("Journal not found or already closed"))
            })?;

        sqlx::query("UPDATE journal_facilities SET open = FALSE WHERE journal_id = $1")
            .bind(journal_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to release facility claims: {}", e))
            })?;

        if !is_successful {
            // Rows on a failed journal go back to the need-journal pool.
            sqlx::query(
                "UPDATE order_details SET journal_id = NULL, updated_utc = NOW() \
                 WHERE journal_id = $1",
            )
            .bind(journal_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to detach journal rows: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit journal close: {}", e))
        })?;

        timer.observe_duration();
        record_billing_operation(
            "close_journal",
            if is_successful { "successful" } else { "failed" },
        );
        info!(journal_id = %journal_id, is_successful = is_successful, "Journal closed");

        if is_successful {
            // Best effort after the close commits; a failed artifact is
            // re-exported out of band, never by reopening the journal.
            if let Err(e) = self.export_closed_journal(&journal).await {
                record_billing_operation("export_journal", "failure");
                tracing::warn!(journal_id = %journal_id, error = %e, "Journal export failed");
            } else {
                record_billing_operation("export_journal", "success");
            }
        }

        self.log
            .record(
                "journal",
                journal_id,
                EventType::JournalClosed,
                Some(updated_by),
                json!({
                    "is_successful": is_successful,
                    "reference": journal.reference,
                }),
            )
            .await;

        Ok(journal)
    }

    async fn export_closed_journal(&self, journal: &Journal) -> Result<(), AppError> {
        let rows = self.list_rows(journal.journal_id).await?;
        let export = JournalExport::from_journal(journal, rows);
        self.exporter.export(&export).await
    }

    /// Every attached row reconciled?
    #[instrument(skip(self), fields(journal_id = %journal_id))]
    pub async fn is_reconciled(&self, journal_id: Uuid) -> Result<bool, AppError> {
        let unreconciled: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM order_details \
             WHERE journal_id = $1 AND reconciled_at IS NULL",
        )
        .bind(journal_id)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to count unreconciled rows: {}", e))
        })?
        .get("n");

        Ok(unreconciled == 0)
    }

    /// Ready for submission to the accounting system: closed successfully
    /// and not yet fully reconciled.
    #[instrument(skip(self), fields(journal_id = %journal_id))]
    pub async fn is_submittable(&self, journal_id: Uuid) -> Result<bool, AppError> {
        let journal = self
            .get(journal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Journal not found")))?;

        Ok(journal.is_successful == Some(true) && !self.is_reconciled(journal_id).await?)
    }
}
