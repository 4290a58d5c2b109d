//! Statement lifecycle: creation with transactional row claims and
//! invoice numbering, cancelation, row removal with destroy-on-empty,
//! and reconciliation rollups.

use crate::config::Settings;
use crate::error::AppError;
use crate::models::statement::{child_invoice_number, root_invoice_number};
use crate::models::{Account, EventType, Statement, StatementReconciliation};
use crate::services::database::Database;
use crate::services::log_events::LogEventService;
use crate::services::metrics::{record_billing_operation, DB_QUERY_DURATION};
use chrono::NaiveDate;
use serde_json::json;
use sqlx::Row;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

const STATEMENT_COLUMNS: &str =
    "statement_id, statement_number, account_id, facility_id, parent_statement_id, \
     invoice_number, invoice_date, created_by, canceled_at, created_utc";

#[derive(Debug, Clone)]
pub struct NewStatement {
    pub account_id: Uuid,
    pub facility_id: Uuid,
    pub invoice_date: NaiveDate,
    pub created_by: Uuid,
    pub parent_statement_id: Option<Uuid>,
    pub order_detail_ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct StatementService {
    db: Arc<Database>,
    settings: Settings,
    log: LogEventService,
}

impl StatementService {
    pub fn new(db: Arc<Database>, settings: Settings, log: LogEventService) -> Self {
        Self { db, settings, log }
    }

    /// Create a statement from a batch of need-statement order details.
    ///
    /// Row claims and invoice numbering run in one transaction: every
    /// selected row is claimed (re-validated as still unclaimed at write
    /// time) or the whole batch rolls back. Child numbering reads the
    /// sibling count with the parent row locked.
    #[instrument(skip(self, params), fields(account_id = %params.account_id, rows = params.order_detail_ids.len()))]
    pub async fn create(&self, params: NewStatement) -> Result<Statement, AppError> {
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

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_statement"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, account_number, kind, description, owner_user_id, owner_email,
                   facility_id, suspended_at, created_utc
            FROM accounts
            WHERE account_id = $1
            "#,
        )
        .bind(params.account_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load account: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account not found")))?;

        if !account.kind().supports_statements() {
            return Err(AppError::ValidationError(format!(
                "Account {} ({}) is not billed by statement.",
                account.account_number, account.kind
            )));
        }

        // Lock the parent (when chaining) before reading the sibling count,
        // so concurrent child creation cannot duplicate a sequence number.
        let parent = match params.parent_statement_id {
            Some(parent_id) => {
                let sql = format!(
                    "SELECT {} FROM statements WHERE statement_id = $1 FOR UPDATE",
                    STATEMENT_COLUMNS
                );
                let parent = sqlx::query_as::<_, Statement>(&sql)
                    .bind(parent_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| {
                        AppError::DatabaseError(anyhow::anyhow!(
                            "Failed to lock parent statement: {}",
                            e
                        ))
                    })?
                    .ok_or_else(|| {
                        AppError::NotFound(anyhow::anyhow!("Parent statement not found"))
                    })?;
                Some(parent)
            }
            None => None,
        };

        let insert_sql = format!(
            r#"
            INSERT INTO statements
                (statement_id, account_id, facility_id, parent_statement_id,
                 invoice_number, invoice_date, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            STATEMENT_COLUMNS
        );

        let statement_id = Uuid::new_v4();
        // The root format needs the generated statement_number; insert with
        // a placeholder and assign the real invoice number in the same
        // transaction.
        let statement = sqlx::query_as::<_, Statement>(&insert_sql)
            .bind(statement_id)
            .bind(params.account_id)
            .bind(params.facility_id)
            .bind(params.parent_statement_id)
            .bind(statement_id.to_string())
            .bind(params.invoice_date)
            .bind(params.created_by)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create statement: {}", e))
            })?;

        let invoice_number = match &parent {
            Some(parent) if self.settings.reference_statement_invoice_numbering => {
                let existing_children: i64 = sqlx::query(
                    "SELECT COUNT(*) AS n FROM statements \
                     WHERE parent_statement_id = $1 AND statement_id <> $2",
                )
                .bind(parent.statement_id)
                .bind(statement_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to count children: {}", e))
                })?
                .get("n");
                child_invoice_number(&parent.invoice_number, existing_children)
            }
            _ => root_invoice_number(account.account_number, statement.statement_number),
        };

        let update_sql = format!(
            "UPDATE statements SET invoice_number = $2 WHERE statement_id = $1 RETURNING {}",
            STATEMENT_COLUMNS
        );
        let statement = sqlx::query_as::<_, Statement>(&update_sql)
            .bind(statement_id)
            .bind(&invoice_number)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to assign invoice number: {}", e))
            })?;

        // Claim every selected row, re-validating it is still unclaimed and
        // statement-eligible at write time. Any failure rolls the batch back.
        for order_detail_id in &params.order_detail_ids {
            let claimed = sqlx::query(
                r#"
                UPDATE order_details
                SET statement_id = $1, updated_utc = NOW()
                WHERE order_detail_id = $2
                  AND account_id = $3
                  AND statement_id IS NULL
                  AND state = 'complete'
                  AND price_policy_id IS NOT NULL
                  AND reviewed_at IS NOT NULL
                  AND reviewed_at <= NOW()
                  AND (dispute_at IS NULL OR dispute_resolved_at IS NOT NULL)
                "#,
            )
            .bind(statement_id)
            .bind(order_detail_id)
            .bind(params.account_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to claim order detail: {}", e))
            })?;

            if claimed.rows_affected() == 0 {
                record_billing_operation("create_statement", "conflict");
                return Err(AppError::ValidationError(format!(
                    "Order detail {} is not eligible for this statement (already \
                     statemented, wrong account, not complete, or still in review \
                     or dispute).",
                    order_detail_id
                )));
            }
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit statement: {}", e))
        })?;

        timer.observe_duration();
        record_billing_operation("create_statement", "success");
        info!(
            statement_id = %statement.statement_id,
            invoice_number = %statement.invoice_number,
            "Statement created"
        );

        self.log
            .record(
                "statement",
                statement.statement_id,
                EventType::StatementCreated,
                Some(params.created_by),
                json!({
                    "invoice_number": statement.invoice_number,
                    "order_details": params.order_detail_ids.len(),
                }),
            )
            .await;

        Ok(statement)
    }

    #[instrument(skip(self), fields(statement_id = %statement_id))]
    pub async fn get(&self, statement_id: Uuid) -> Result<Option<Statement>, AppError> {
        let sql = format!(
            "SELECT {} FROM statements WHERE statement_id = $1",
            STATEMENT_COLUMNS
        );
        sqlx::query_as::<_, Statement>(&sql)
            .bind(statement_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get statement: {}", e)))
    }

    /// Soft-cancel a statement. Canceled statements keep their rows for
    /// history but sit outside the reconciled/unreconciled scopes.
    #[instrument(skip(self), fields(statement_id = %statement_id))]
    pub async fn cancel(&self, statement_id: Uuid, canceled_by: Uuid) -> Result<Statement, AppError> {
        let sql = format!(
            r#"
            UPDATE statements
            SET canceled_at = NOW()
            WHERE statement_id = $1 AND canceled_at IS NULL
            RETURNING {}
            "#,
            STATEMENT_COLUMNS
        );

        let statement = sqlx::query_as::<_, Statement>(&sql)
            .bind(statement_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to cancel statement: {}", e))
            })?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "Statement not found or already canceled"
                ))
            })?;

        record_billing_operation("cancel_statement", "success");
        self.log
            .record(
                "statement",
                statement_id,
                EventType::StatementCanceled,
                Some(canceled_by),
                json!({ "invoice_number": statement.invoice_number }),
            )
            .await;

        Ok(statement)
    }

    /// Detach one order detail; destroying the statement when its last row
    /// is removed.
    #[instrument(skip(self), fields(statement_id = %statement_id, order_detail_id = %order_detail_id))]
    pub async fn remove_order_detail(
        &self,
        statement_id: Uuid,
        order_detail_id: Uuid,
        removed_by: Uuid,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["remove_statement_row"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let detached = sqlx::query(
            r#"
            UPDATE order_details
            SET statement_id = NULL, updated_utc = NOW()
            WHERE order_detail_id = $1 AND statement_id = $2
            "#,
        )
        .bind(order_detail_id)
        .bind(statement_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to detach order detail: {}", e))
        })?;

        if detached.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Order detail is not on this statement"
            )));
        }

        let remaining: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM order_details WHERE statement_id = $1")
                .bind(statement_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to count rows: {}", e))
                })?
                .get("n");

        let destroyed = remaining == 0;
        if destroyed {
            sqlx::query("DELETE FROM statements WHERE statement_id = $1")
                .bind(statement_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to destroy statement: {}", e))
                })?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit row removal: {}", e))
        })?;

        timer.observe_duration();

        if destroyed {
            info!(statement_id = %statement_id, "Statement destroyed with its last order detail");
            self.log
                .record(
                    "statement",
                    statement_id,
                    EventType::StatementDestroyed,
                    Some(removed_by),
                    json!({ "last_order_detail": order_detail_id }),
                )
                .await;
        }

        Ok(destroyed)
    }

    /// Rollup over attached rows: a statement is reconciled exactly when no
    /// attached row remains unreconciled. Canceled statements sit outside
    /// both scopes.
    #[instrument(skip(self), fields(statement_id = %statement_id))]
    pub async fn reconciliation_status(
        &self,
        statement_id: Uuid,
    ) -> Result<StatementReconciliation, AppError> {
        let statement = self
            .get(statement_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Statement not found")))?;

        if statement.is_canceled() {
            return Ok(StatementReconciliation::Canceled);
        }

        let unreconciled: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM order_details \
             WHERE statement_id = $1 AND reconciled_at IS NULL",
        )
        .bind(statement_id)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to count unreconciled rows: {}", e))
        })?
        .get("n");

        Ok(if unreconciled == 0 {
            StatementReconciliation::Reconciled
        } else {
            StatementReconciliation::Unreconciled
        })
    }
}
