//! Database service: connection pool plus facility/account/order-detail
//! persistence operations.

#![allow(clippy::too_many_arguments)]

use crate::error::AppError;
use crate::models::{Account, Facility, JournalCutoffDate, LogEvent, OrderDetail, OrderState};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

pub const ORDER_DETAIL_COLUMNS: &str =
    "od.order_detail_id, od.order_id, od.account_id, od.product_id, od.facility_id, od.state, \
     od.ordered_at, od.fulfilled_at, od.reviewed_at, od.dispute_at, od.dispute_resolved_at, \
     od.statement_id, od.journal_id, od.price_policy_id, od.actual_cost, od.actual_subsidy, \
     od.problem, od.reconciled_at, od.reconciled_note, od.unrecoverable_note, od.deposit_number, \
     od.created_utc, od.updated_utc";

/// Parameters for creating an order detail. Orders arrive from the ordering
/// subsystem; this surface exists so the billing lifecycle can be driven
/// end to end.
#[derive(Debug, Clone)]
pub struct NewOrderDetail {
    pub order_id: Uuid,
    pub account_id: Uuid,
    pub product_id: Uuid,
    pub facility_id: Uuid,
    pub state: OrderState,
    pub ordered_at: Option<DateTime<Utc>>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub price_policy_id: Option<Uuid>,
    pub actual_cost: Option<Decimal>,
    pub actual_subsidy: Option<Decimal>,
    pub problem: bool,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "facility-billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Facility Operations
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn create_facility(
        &self,
        name: &str,
        abbreviation: &str,
    ) -> Result<Facility, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_facility"])
            .start_timer();

        let facility = sqlx::query_as::<_, Facility>(
            r#"
            INSERT INTO facilities (facility_id, name, abbreviation)
            VALUES ($1, $2, $3)
            RETURNING facility_id, name, abbreviation, is_active, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(abbreviation)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create facility: {}", e)))?;

        timer.observe_duration();
        info!(facility_id = %facility.facility_id, "Facility created");

        Ok(facility)
    }

    #[instrument(skip(self), fields(facility_id = %facility_id))]
    pub async fn get_facility(&self, facility_id: Uuid) -> Result<Option<Facility>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_facility"])
            .start_timer();

        let facility = sqlx::query_as::<_, Facility>(
            r#"
            SELECT facility_id, name, abbreviation, is_active, created_utc
            FROM facilities
            WHERE facility_id = $1
            "#,
        )
        .bind(facility_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get facility: {}", e)))?;

        timer.observe_duration();
        Ok(facility)
    }

    // =========================================================================
    // Account Operations
    // =========================================================================

    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn create_account(
        &self,
        kind: &str,
        description: &str,
        owner_user_id: Uuid,
        owner_email: &str,
        facility_id: Option<Uuid>,
    ) -> Result<Account, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (account_id, kind, description, owner_user_id, owner_email, facility_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING account_id, account_number, kind, description, owner_user_id, owner_email,
                      facility_id, suspended_at, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(kind)
        .bind(description)
        .bind(owner_user_id)
        .bind(owner_email)
        .bind(facility_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create account: {}", e)))?;

        timer.observe_duration();
        info!(account_id = %account.account_id, "Account created");

        Ok(account)
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, account_number, kind, description, owner_user_id, owner_email,
                   facility_id, suspended_at, created_utc
            FROM accounts
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get account: {}", e)))?;

        timer.observe_duration();
        Ok(account)
    }

    // =========================================================================
    // Order Detail Operations
    // =========================================================================

    #[instrument(skip(self, params), fields(account_id = %params.account_id))]
    pub async fn create_order_detail(
        &self,
        params: &NewOrderDetail,
    ) -> Result<OrderDetail, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_order_detail"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO order_details AS od
                (order_detail_id, order_id, account_id, product_id, facility_id, state,
                 ordered_at, fulfilled_at, reviewed_at, price_policy_id,
                 actual_cost, actual_subsidy, problem)
            VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, NOW()), $8, $9, $10, $11, $12, $13)
            RETURNING {}
            "#,
            ORDER_DETAIL_COLUMNS
        );

        let order_detail = sqlx::query_as::<_, OrderDetail>(&sql)
            .bind(Uuid::new_v4())
            .bind(params.order_id)
            .bind(params.account_id)
            .bind(params.product_id)
            .bind(params.facility_id)
            .bind(params.state.as_str())
            .bind(params.ordered_at)
            .bind(params.fulfilled_at)
            .bind(params.reviewed_at)
            .bind(params.price_policy_id)
            .bind(params.actual_cost)
            .bind(params.actual_subsidy)
            .bind(params.problem)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create order detail: {}", e))
            })?;

        timer.observe_duration();
        info!(order_detail_id = %order_detail.order_detail_id, "Order detail created");

        Ok(order_detail)
    }

    #[instrument(skip(self), fields(order_detail_id = %order_detail_id))]
    pub async fn get_order_detail(
        &self,
        order_detail_id: Uuid,
    ) -> Result<Option<OrderDetail>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_order_detail"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM order_details od WHERE od.order_detail_id = $1",
            ORDER_DETAIL_COLUMNS
        );

        let order_detail = sqlx::query_as::<_, OrderDetail>(&sql)
            .bind(order_detail_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to get order detail: {}", e))
            })?;

        timer.observe_duration();
        Ok(order_detail)
    }

    // =========================================================================
    // Journal Cutoff Dates
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn list_journal_cutoffs(&self) -> Result<Vec<JournalCutoffDate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_journal_cutoffs"])
            .start_timer();

        let cutoffs = sqlx::query_as::<_, JournalCutoffDate>(
            r#"
            SELECT cutoff_id, cutoff_date, created_utc
            FROM journal_cutoff_dates
            ORDER BY cutoff_date
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list cutoffs: {}", e)))?;

        timer.observe_duration();
        Ok(cutoffs)
    }

    // =========================================================================
    // Log Events
    // =========================================================================

    #[instrument(skip(self), fields(loggable_id = %loggable_id))]
    pub async fn list_log_events(
        &self,
        loggable_type: &str,
        loggable_id: Uuid,
    ) -> Result<Vec<LogEvent>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_log_events"])
            .start_timer();

        let events = sqlx::query_as::<_, LogEvent>(
            r#"
            SELECT log_event_id, loggable_type, loggable_id, event_type, user_id, metadata, event_at
            FROM log_events
            WHERE loggable_type = $1 AND loggable_id = $2
            ORDER BY event_at
            "#,
        )
        .bind(loggable_type)
        .bind(loggable_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list log events: {}", e)))?;

        timer.observe_duration();
        Ok(events)
    }
}
