//! Account-owner notifications for order details entering the review
//! window. Stamping `reviewed_at` is one atomic UPDATE so two concurrent
//! runs never notify the same row twice.

use crate::config::{Settings, SmtpConfig};
use crate::error::AppError;
use crate::models::EventType;
use crate::services::database::Database;
use crate::services::log_events::LogEventService;
use crate::services::metrics::{record_notification, DB_QUERY_DURATION};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use sqlx::Row;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_text: String,
}

/// Outbound email seam. The SMTP client is swapped for a recording stub in
/// tests.
#[async_trait]
pub trait EmailClient: Send + Sync {
    async fn send(&self, email: &EmailMessage) -> Result<(), AppError>;
}

pub struct SmtpEmailClient {
    config: SmtpConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpEmailClient {
    pub fn new(config: SmtpConfig) -> Result<Self, AppError> {
        if !config.enabled {
            return Ok(Self {
                config,
                transport: None,
            });
        }

        let creds = Credentials::new(config.user.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Failed to create SMTP relay: {}", e))
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            config,
            transport: Some(transport),
        })
    }
}

#[async_trait]
impl EmailClient for SmtpEmailClient {
    async fn send(&self, email: &EmailMessage) -> Result<(), AppError> {
        let transport = match &self.transport {
            Some(transport) => transport,
            // Delivery disabled: log and report success so the review
            // window still opens in development environments.
            None => {
                info!(to = %email.to, subject = %email.subject, "SMTP disabled, skipping delivery");
                return Ok(());
            }
        };

        let from_mailbox: Mailbox =
            format!("{} <{}>", self.config.from_name, self.config.from_email)
                .parse()
                .map_err(|e| {
                    AppError::EmailError(format!("Invalid from address: {}", e))
                })?;
        let to_mailbox: Mailbox = email
            .to
            .parse()
            .map_err(|e| AppError::EmailError(format!("Invalid recipient: {}", e)))?;

        let message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(&email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body_text.clone())
            .map_err(|e| AppError::EmailError(format!("Failed to build message: {}", e)))?;

        transport
            .send(message)
            .await
            .map_err(|e| AppError::EmailError(format!("Failed to send email: {}", e)))?;

        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct NotificationSummary {
    /// Order details stamped with a review deadline in this run.
    pub order_detail_count: usize,
    /// Accounts an email was composed for.
    pub account_count: usize,
    /// Accounts whose email failed to deliver (rows stay stamped).
    pub failed_account_count: usize,
}

struct NotifiedRow {
    order_detail_id: Uuid,
    account_id: Uuid,
    account_name: String,
    owner_email: String,
    amount: Decimal,
    review_deadline: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NotificationSender {
    db: Arc<Database>,
    settings: Settings,
    email: Arc<dyn EmailClient>,
    log: LogEventService,
}

impl NotificationSender {
    pub fn new(
        db: Arc<Database>,
        settings: Settings,
        email: Arc<dyn EmailClient>,
        log: LogEventService,
    ) -> Self {
        Self {
            db,
            settings,
            email,
            log,
        }
    }

    /// Stamp every notifiable order detail with its review deadline, then
    /// email each affected account owner one digest. Email failure is
    /// recorded but never unwinds the stamp.
    #[instrument(skip(self), fields(facility = ?facility_id))]
    pub async fn deliver(
        &self,
        facility_id: Option<Uuid>,
        triggered_by: Option<Uuid>,
    ) -> Result<NotificationSummary, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["deliver_notifications"])
            .start_timer();

        let rows: Vec<NotifiedRow> = sqlx::query(
            r#"
            UPDATE order_details od
            SET reviewed_at = NOW() + make_interval(hours => $1),
                updated_utc = NOW()
            FROM accounts a
            WHERE a.account_id = od.account_id
              AND od.state = 'complete'
              AND od.price_policy_id IS NOT NULL
              AND od.reviewed_at IS NULL
              AND od.problem = FALSE
              AND ($2::uuid IS NULL OR od.facility_id = $2)
            RETURNING od.order_detail_id, od.account_id, a.description AS account_name,
                      a.owner_email,
                      COALESCE(od.actual_cost, 0) - COALESCE(od.actual_subsidy, 0) AS amount,
                      od.reviewed_at AS review_deadline
            "#,
        )
        .bind(self.settings.review_period_hours as i32)
        .bind(facility_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to stamp notifications: {}", e))
        })?
        .into_iter()
        .map(|row| NotifiedRow {
            order_detail_id: row.get("order_detail_id"),
            account_id: row.get("account_id"),
            account_name: row.get("account_name"),
            owner_email: row.get("owner_email"),
            amount: row.get("amount"),
            review_deadline: row.get("review_deadline"),
        })
        .collect();

        timer.observe_duration();

        if rows.is_empty() {
            return Ok(NotificationSummary {
                order_detail_count: 0,
                account_count: 0,
                failed_account_count: 0,
            });
        }

        let order_detail_count = rows.len();
        let mut by_account: BTreeMap<Uuid, Vec<NotifiedRow>> = BTreeMap::new();
        for row in rows {
            by_account.entry(row.account_id).or_default().push(row);
        }

        let account_count = by_account.len();
        let mut failed_account_count = 0;

        for (account_id, account_rows) in by_account {
            let delivered = self.notify_account(account_id, &account_rows).await;
            if delivered {
                record_notification("sent");
            } else {
                record_notification("failed");
                failed_account_count += 1;
            }

            self.insert_notification(account_id, &account_rows, delivered)
                .await?;
            self.log
                .record(
                    "account",
                    account_id,
                    EventType::NotificationSent,
                    triggered_by,
                    json!({
                        "order_details": account_rows.len(),
                        "delivered": delivered,
                    }),
                )
                .await;
        }

        info!(
            order_details = order_detail_count,
            accounts = account_count,
            failed = failed_account_count,
            "Notifications delivered"
        );

        Ok(NotificationSummary {
            order_detail_count,
            account_count,
            failed_account_count,
        })
    }

    async fn notify_account(&self, account_id: Uuid, rows: &[NotifiedRow]) -> bool {
        let first = &rows[0];
        let total: Decimal = rows.iter().map(|r| r.amount).sum();
        let deadline = rows
            .iter()
            .map(|r| r.review_deadline)
            .max()
            .unwrap_or_else(Utc::now);

        let mut body = format!(
            "Orders on account {} are ready for review.\n\n\
             {} order(s) totaling {} will be billed after {}.\n\n",
            first.account_name,
            rows.len(),
            total,
            deadline.format("%Y-%m-%d")
        );
        for row in rows {
            body.push_str(&format!("  - order detail {}: {}\n", row.order_detail_id, row.amount));
        }

        let email = EmailMessage {
            to: first.owner_email.clone(),
            subject: format!("Orders ready for review on {}", first.account_name),
            body_text: body,
        };

        match self.email.send(&email).await {
            Ok(()) => true,
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "Notification email failed");
                false
            }
        }
    }

    async fn insert_notification(
        &self,
        account_id: Uuid,
        rows: &[NotifiedRow],
        delivered: bool,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO notifications
                (notification_id, account_id, recipient_email, order_detail_count, delivered)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(&rows[0].owner_email)
        .bind(rows.len() as i32)
        .bind(delivered)
        .execute(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record notification: {}", e))
        })?;

        Ok(())
    }
}
