//! Audit log events recorded after state-changing operations commit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    JournalCreated,
    JournalClosed,
    StatementCreated,
    StatementCanceled,
    StatementDestroyed,
    Reconciled,
    Unreconciled,
    NotificationSent,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JournalCreated => "journal_created",
            Self::JournalClosed => "journal_closed",
            Self::StatementCreated => "statement_created",
            Self::StatementCanceled => "statement_canceled",
            Self::StatementDestroyed => "statement_destroyed",
            Self::Reconciled => "reconciled",
            Self::Unreconciled => "unreconciled",
            Self::NotificationSent => "notification_sent",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LogEvent {
    pub log_event_id: Uuid,
    pub loggable_type: String,
    pub loggable_id: Uuid,
    pub event_type: String,
    pub user_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub event_at: DateTime<Utc>,
}
