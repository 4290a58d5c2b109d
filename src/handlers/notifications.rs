//! Notification delivery endpoint.

use crate::error::AppError;
use crate::middleware::RequestActor;
use crate::services::authorization::Operation;
use crate::startup::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct DeliverRequest {
    /// Restrict delivery to one facility's order details.
    pub facility_id: Option<Uuid>,
}

pub async fn deliver_notifications(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(request): Json<DeliverRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::SendNotifications, request.facility_id)
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let summary = state
        .notifications
        .deliver(request.facility_id, Some(actor.user_id))
        .await?;
    Ok(Json(summary))
}
