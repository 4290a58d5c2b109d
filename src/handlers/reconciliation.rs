//! Bulk reconcile/unreconcile endpoints.

use crate::error::AppError;
use crate::middleware::RequestActor;
use crate::services::authorization::Operation;
use crate::services::reconciler::ReconcileRequest;
use crate::startup::AppState;
use axum::{extract::State, response::IntoResponse, Json};

pub async fn reconcile(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(request): Json<ReconcileRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::Reconcile, None)
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let outcome = state.reconciler.reconcile_all(&actor, &request).await?;
    Ok(Json(outcome))
}

pub async fn unreconcile(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(request): Json<ReconcileRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::Unreconcile, None)
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let outcome = state.reconciler.unreconcile_all(&actor, &request).await?;
    Ok(Json(outcome))
}
