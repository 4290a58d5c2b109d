//! Journal lifecycle endpoints.

use crate::error::AppError;
use crate::middleware::RequestActor;
use crate::services::authorization::Operation;
use crate::services::journals::NewJournal;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateJournalRequest {
    pub facility_ids: Vec<Uuid>,
    pub journal_date: NaiveDate,
    pub order_detail_ids: Vec<Uuid>,
}

pub async fn create_journal(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(request): Json<CreateJournalRequest>,
) -> Result<impl IntoResponse, AppError> {
    let facility_scope = if request.facility_ids.len() == 1 {
        Some(request.facility_ids[0])
    } else {
        None
    };
    if !state
        .authorizer
        .may(&actor, Operation::CreateJournal, facility_scope)
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let journal = state
        .journals
        .create(NewJournal {
            facility_ids: request.facility_ids,
            journal_date: request.journal_date,
            created_by: actor.user_id,
            order_detail_ids: request.order_detail_ids,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(journal)))
}

#[derive(Debug, Serialize)]
pub struct JournalResponse {
    #[serde(flatten)]
    pub journal: crate::models::Journal,
    pub status: crate::models::JournalStatus,
    pub rows: Vec<crate::models::JournalRow>,
    pub is_reconciled: bool,
    /// Closed successfully with rows still awaiting reconciliation.
    pub is_submittable: bool,
}

pub async fn get_journal(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(journal_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::SearchTransactions, None)
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let journal = state
        .journals
        .get(journal_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Journal not found")))?;
    let rows = state.journals.list_rows(journal_id).await?;
    let is_reconciled = state.journals.is_reconciled(journal_id).await?;
    let is_submittable = state.journals.is_submittable(journal_id).await?;

    Ok(Json(JournalResponse {
        status: journal.status(),
        journal,
        rows,
        is_reconciled,
        is_submittable,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CloseJournalRequest {
    pub is_successful: bool,
    /// Accounting system reference for a successful export.
    pub reference: Option<String>,
}

pub async fn close_journal(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(journal_id): Path<Uuid>,
    Json(request): Json<CloseJournalRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::CloseJournal, None)
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let journal = state
        .journals
        .close(journal_id, request.is_successful, request.reference, actor.user_id)
        .await?;
    Ok(Json(journal))
}
