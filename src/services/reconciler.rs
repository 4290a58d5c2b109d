//! Bulk reconciliation over selected order details. Each row is validated
//! and updated in its own transaction, so a bad row never blocks the rest
//! of the batch.

use crate::config::Settings;
use crate::error::AppError;
use crate::models::account::AccountKind;
use crate::models::order_detail::{OrderState, ReconcileCandidate};
use crate::models::EventType;
use crate::services::authorization::{Actor, Role};
use crate::services::database::Database;
use crate::services::log_events::LogEventService;
use crate::services::metrics::{record_reconciled_rows, DB_QUERY_DURATION};
use crate::services::search::parse_search_date;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::Row;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Per-row form parameters, keyed by order detail id in the request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RowParams {
    #[serde(default)]
    pub selected: bool,
    pub reconciled_note: Option<String>,
    pub unrecoverable_note: Option<String>,
    pub deposit_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileRequest {
    /// Row id to its submitted parameters. Unselected rows are ignored.
    #[serde(default)]
    pub rows: BTreeMap<Uuid, RowParams>,
    /// Locale `MM/DD/YYYY` date, shared by every selected row.
    pub reconciled_at: Option<String>,
    /// Target state: `reconciled` or `unrecoverable`.
    pub order_status: String,
    /// When set, the bulk note and deposit number override per-row values.
    #[serde(default)]
    pub bulk_reconcile: bool,
    pub bulk_note: Option<String>,
    pub bulk_deposit_number: Option<String>,
}

/// Partial-success result of a bulk reconcile or unreconcile.
#[derive(Debug, Default, serde::Serialize)]
pub struct ReconciliationOutcome {
    /// Rows actually transitioned in this call.
    pub count: usize,
    /// Row id to its validation failure, for rows left untouched.
    pub full_errors: BTreeMap<Uuid, String>,
    pub order_detail_ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct Reconciler {
    db: Arc<Database>,
    settings: Settings,
    log: LogEventService,
}

impl Reconciler {
    pub fn new(db: Arc<Database>, settings: Settings, log: LogEventService) -> Self {
        Self { db, settings, log }
    }

    fn selected_ids(request: &ReconcileRequest) -> Vec<Uuid> {
        request
            .rows
            .iter()
            .filter(|(_, params)| params.selected)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Reconcile every selected row, collecting per-row errors instead of
    /// failing the batch. Already-reconciled rows are skipped silently so a
    /// resubmitted form stays idempotent.
    #[instrument(skip(self, request), fields(actor = %actor.user_id, rows = request.rows.len()))]
    pub async fn reconcile_all(
        &self,
        actor: &Actor,
        request: &ReconcileRequest,
    ) -> Result<ReconciliationOutcome, AppError> {
        let selected = Self::selected_ids(request);
        if selected.is_empty() {
            return Err(AppError::ValidationError(
                "No order details selected.".to_string(),
            ));
        }
        if selected.len() > self.settings.max_bulk_rows {
            return Err(AppError::ValidationError(format!(
                "Batch exceeds the maximum of {} rows.",
                self.settings.max_bulk_rows
            )));
        }

        let target = OrderState::from_key(&request.order_status)
            .filter(OrderState::is_reconciliation_target)
            .ok_or_else(|| {
                AppError::ValidationError(format!(
                    "Invalid order status '{}'.",
                    request.order_status
                ))
            })?;

        let reconciled_at = request
            .reconciled_at
            .as_deref()
            .and_then(parse_search_date);
        let today = Utc::now().date_naive();

        let timer = DB_QUERY_DURATION
            .with_label_values(&["reconcile_all"])
            .start_timer();

        let mut outcome = ReconciliationOutcome::default();

        for order_detail_id in selected {
            let params = &request.rows[&order_detail_id];
            match self
                .reconcile_one(order_detail_id, params, request, target, reconciled_at, today)
                .await
            {
                Ok(true) => {
                    outcome.count += 1;
                    outcome.order_detail_ids.push(order_detail_id);
                    self.log
                        .record(
                            "order_detail",
                            order_detail_id,
                            EventType::Reconciled,
                            Some(actor.user_id),
                            json!({
                                "state": target.as_str(),
                                "reconciled_at": reconciled_at,
                            }),
                        )
                        .await;
                }
                Ok(false) => {} // already reconciled, skip silently
                Err(message) => {
                    warn!(order_detail_id = %order_detail_id, error = %message, "Row not reconciled");
                    outcome.full_errors.insert(order_detail_id, message);
                }
            }
        }

        timer.observe_duration();
        record_reconciled_rows("reconcile", target.as_str(), outcome.count as u64);
        info!(
            reconciled = outcome.count,
            errors = outcome.full_errors.len(),
            "Bulk reconcile complete"
        );

        Ok(outcome)
    }

    /// Returns Ok(true) on transition, Ok(false) when the row is already
    /// reconciled, Err with a user-facing message otherwise.
    async fn reconcile_one(
        &self,
        order_detail_id: Uuid,
        params: &RowParams,
        request: &ReconcileRequest,
        target: OrderState,
        reconciled_at: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<bool, String> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| format!("could not begin transaction: {}", e))?;

        let row = sqlx::query(
            r#"
            SELECT od.state, od.reconciled_at, a.kind,
                   od.statement_id, od.journal_id, j.is_successful,
                   s.invoice_date AS statement_date, j.journal_date
            FROM order_details od
            JOIN accounts a ON a.account_id = od.account_id
            LEFT JOIN statements s ON s.statement_id = od.statement_id
            LEFT JOIN journals j ON j.journal_id = od.journal_id
            WHERE od.order_detail_id = $1
            FOR UPDATE OF od
            "#,
        )
        .bind(order_detail_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| format!("could not load order detail: {}", e))?
        .ok_or_else(|| "not found".to_string())?;

        if row.get::<Option<chrono::DateTime<Utc>>, _>("reconciled_at").is_some() {
            return Ok(false);
        }

        let candidate = ReconcileCandidate {
            state: OrderState::from_str(row.get::<String, _>("state").as_str()),
            kind: AccountKind::from_str(row.get::<String, _>("kind").as_str()),
            has_statement: row.get::<Option<Uuid>, _>("statement_id").is_some(),
            has_journal: row.get::<Option<Uuid>, _>("journal_id").is_some(),
            journal_successful: row.get("is_successful"),
            statement_date: row.get("statement_date"),
            journal_date: row.get("journal_date"),
        };
        let date = candidate.validate(reconciled_at, today)?;

        let (note, deposit_number) = if request.bulk_reconcile {
            (request.bulk_note.clone(), request.bulk_deposit_number.clone())
        } else {
            (
                match target {
                    OrderState::Unrecoverable => params.unrecoverable_note.clone(),
                    _ => params.reconciled_note.clone(),
                },
                params.deposit_number.clone(),
            )
        };

        let reconciled_utc = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| "invalid reconciliation date".to_string())?
            .and_utc();

        sqlx::query(
            r#"
            UPDATE order_details
            SET state = $2,
                reconciled_at = $3,
                reconciled_note = CASE WHEN $2 = 'reconciled' THEN $4 ELSE reconciled_note END,
                unrecoverable_note = CASE WHEN $2 = 'unrecoverable' THEN $4 ELSE unrecoverable_note END,
                deposit_number = $5,
                updated_utc = NOW()
            WHERE order_detail_id = $1
            "#,
        )
        .bind(order_detail_id)
        .bind(target.as_str())
        .bind(reconciled_utc)
        .bind(&note)
        .bind(&deposit_number)
        .execute(&mut *tx)
        .await
        .map_err(|e| format!("could not update order detail: {}", e))?;

        tx.commit()
            .await
            .map_err(|e| format!("could not commit: {}", e))?;

        Ok(true)
    }

    /// Undo reconciliation for selected rows, restoring them to `complete`.
    /// Guarded by configuration and restricted to global administrators.
    /// Never-reconciled rows are skipped silently.
    #[instrument(skip(self, request), fields(actor = %actor.user_id, rows = request.rows.len()))]
    pub async fn unreconcile_all(
        &self,
        actor: &Actor,
        request: &ReconcileRequest,
    ) -> Result<ReconciliationOutcome, AppError> {
        if !self.settings.allow_unreconcile {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Unreconcile is disabled"
            )));
        }
        if actor.role != Role::GlobalAdmin {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Only global administrators may unreconcile"
            )));
        }

        let selected = Self::selected_ids(request);
        if selected.is_empty() {
            return Err(AppError::ValidationError(
                "No order details selected.".to_string(),
            ));
        }
        if selected.len() > self.settings.max_bulk_rows {
            return Err(AppError::ValidationError(format!(
                "Batch exceeds the maximum of {} rows.",
                self.settings.max_bulk_rows
            )));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["unreconcile_all"])
            .start_timer();

        let mut outcome = ReconciliationOutcome::default();

        for order_detail_id in selected {
            let reverted = sqlx::query(
                r#"
                UPDATE order_details
                SET state = 'complete',
                    reconciled_at = NULL,
                    reconciled_note = NULL,
                    unrecoverable_note = NULL,
                    deposit_number = NULL,
                    updated_utc = NOW()
                WHERE order_detail_id = $1 AND reconciled_at IS NOT NULL
                "#,
            )
            .bind(order_detail_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to unreconcile row: {}", e))
            })?
            .rows_affected();

            if reverted > 0 {
                outcome.count += 1;
                outcome.order_detail_ids.push(order_detail_id);
                self.log
                    .record(
                        "order_detail",
                        order_detail_id,
                        EventType::Unreconciled,
                        Some(actor.user_id),
                        json!({}),
                    )
                    .await;
            }
        }

        timer.observe_duration();
        record_reconciled_rows("unreconcile", "complete", outcome.count as u64);
        info!(unreconciled = outcome.count, "Bulk unreconcile complete");

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(rows: Vec<(Uuid, bool)>) -> ReconcileRequest {
        ReconcileRequest {
            rows: rows
                .into_iter()
                .map(|(id, selected)| {
                    (
                        id,
                        RowParams {
                            selected,
                            ..Default::default()
                        },
                    )
                })
                .collect(),
            reconciled_at: Some("03/15/2024".to_string()),
            order_status: "reconciled".to_string(),
            bulk_reconcile: false,
            bulk_note: None,
            bulk_deposit_number: None,
        }
    }

    #[test]
    fn only_selected_rows_are_considered() {
        let keep = Uuid::new_v4();
        let skip = Uuid::new_v4();
        let req = request(vec![(keep, true), (skip, false)]);
        assert_eq!(Reconciler::selected_ids(&req), vec![keep]);
    }

    #[test]
    fn target_state_must_be_terminal() {
        assert!(OrderState::from_key("complete")
            .filter(OrderState::is_reconciliation_target)
            .is_none());
        assert!(OrderState::from_key("unrecoverable")
            .filter(OrderState::is_reconciliation_target)
            .is_some());
    }
}
