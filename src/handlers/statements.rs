//! Statement lifecycle endpoints.

use crate::error::AppError;
use crate::middleware::RequestActor;
use crate::services::authorization::Operation;
use crate::services::statements::NewStatement;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateStatementRequest {
    pub account_id: Uuid,
    pub facility_id: Uuid,
    pub invoice_date: NaiveDate,
    /// Set to chain a corrected statement under an earlier one.
    pub parent_statement_id: Option<Uuid>,
    pub order_detail_ids: Vec<Uuid>,
}

pub async fn create_statement(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(request): Json<CreateStatementRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::CreateStatement, Some(request.facility_id))
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let statement = state
        .statements
        .create(NewStatement {
            account_id: request.account_id,
            facility_id: request.facility_id,
            invoice_date: request.invoice_date,
            created_by: actor.user_id,
            parent_statement_id: request.parent_statement_id,
            order_detail_ids: request.order_detail_ids,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(statement)))
}

#[derive(Debug, Serialize)]
pub struct StatementResponse {
    #[serde(flatten)]
    pub statement: crate::models::Statement,
    pub reconciliation: crate::models::StatementReconciliation,
}

pub async fn get_statement(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(statement_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::SearchTransactions, None)
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let statement = state
        .statements
        .get(statement_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Statement not found")))?;
    let reconciliation = state.statements.reconciliation_status(statement_id).await?;

    Ok(Json(StatementResponse {
        statement,
        reconciliation,
    }))
}

pub async fn cancel_statement(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(statement_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::CancelStatement, None)
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let statement = state.statements.cancel(statement_id, actor.user_id).await?;
    Ok(Json(statement))
}

pub async fn remove_statement_row(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path((statement_id, order_detail_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::CancelStatement, None)
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let destroyed = state
        .statements
        .remove_order_detail(statement_id, order_detail_id, actor.user_id)
        .await?;
    Ok(Json(json!({ "statement_destroyed": destroyed })))
}
