//! Post-commit audit event sink. Services call `record` after the mutation
//! they document has committed; a failed write is logged, never propagated
//! into the billing path.

use crate::error::AppError;
use crate::models::EventType;
use crate::services::database::Database;
use crate::services::metrics::DB_QUERY_DURATION;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct LogEventService {
    db: Arc<Database>,
}

impl LogEventService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, metadata), fields(loggable_id = %loggable_id, event_type = %event_type.as_str()))]
    pub async fn record(
        &self,
        loggable_type: &str,
        loggable_id: Uuid,
        event_type: EventType,
        user_id: Option<Uuid>,
        metadata: serde_json::Value,
    ) {
        if let Err(e) = self
            .insert(loggable_type, loggable_id, event_type, user_id, metadata)
            .await
        {
            warn!(error = %e, "Failed to record log event");
        }
    }

    async fn insert(
        &self,
        loggable_type: &str,
        loggable_id: Uuid,
        event_type: EventType,
        user_id: Option<Uuid>,
        metadata: serde_json::Value,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_log_event"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO log_events (log_event_id, loggable_type, loggable_id, event_type, user_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(loggable_type)
        .bind(loggable_id)
        .bind(event_type.as_str())
        .bind(user_id)
        .bind(metadata)
        .execute(self.db.pool())
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record log event: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }
}
