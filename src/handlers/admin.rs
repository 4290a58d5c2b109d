//! Record management: facilities, accounts, and order details arriving
//! from the ordering subsystem, plus the audit trail readout.

use crate::error::AppError;
use crate::middleware::RequestActor;
use crate::models::{AccountKind, OrderState};
use crate::services::authorization::Operation;
use crate::services::database::NewOrderDetail;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateFacilityRequest {
    pub name: String,
    pub abbreviation: String,
}

pub async fn create_facility(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(request): Json<CreateFacilityRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::ManageRecords, None)
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let facility = state
        .db
        .create_facility(&request.name, &request.abbreviation)
        .await?;
    Ok((StatusCode::CREATED, Json(facility)))
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub kind: String,
    pub description: String,
    pub owner_user_id: Uuid,
    pub owner_email: String,
    pub facility_id: Option<Uuid>,
}

pub async fn create_account(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(request): Json<CreateAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::ManageRecords, request.facility_id)
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let kind = AccountKind::from_key(&request.kind).ok_or_else(|| {
        AppError::ValidationError(format!("Unknown account kind '{}'.", request.kind))
    })?;

    let account = state
        .db
        .create_account(
            kind.as_str(),
            &request.description,
            request.owner_user_id,
            &request.owner_email,
            request.facility_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderDetailRequest {
    pub order_id: Uuid,
    pub account_id: Uuid,
    pub product_id: Uuid,
    pub facility_id: Uuid,
    pub state: Option<String>,
    pub ordered_at: Option<DateTime<Utc>>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub price_policy_id: Option<Uuid>,
    pub actual_cost: Option<Decimal>,
    pub actual_subsidy: Option<Decimal>,
    #[serde(default)]
    pub problem: bool,
}

pub async fn create_order_detail(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(request): Json<CreateOrderDetailRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::ManageRecords, Some(request.facility_id))
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let order_state = match &request.state {
        Some(key) => OrderState::from_key(key).ok_or_else(|| {
            AppError::ValidationError(format!("Unknown order state '{}'.", key))
        })?,
        None => OrderState::New,
    };

    let order_detail = state
        .db
        .create_order_detail(&NewOrderDetail {
            order_id: request.order_id,
            account_id: request.account_id,
            product_id: request.product_id,
            facility_id: request.facility_id,
            state: order_state,
            ordered_at: request.ordered_at,
            fulfilled_at: request.fulfilled_at,
            reviewed_at: request.reviewed_at,
            price_policy_id: request.price_policy_id,
            actual_cost: request.actual_cost,
            actual_subsidy: request.actual_subsidy,
            problem: request.problem,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(order_detail)))
}

pub async fn get_order_detail(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(order_detail_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::SearchTransactions, None)
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let order_detail = state
        .db
        .get_order_detail(order_detail_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order detail not found")))?;
    Ok(Json(order_detail))
}

pub async fn list_log_events(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path((loggable_type, loggable_id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::ManageRecords, None)
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let events = state.db.list_log_events(&loggable_type, loggable_id).await?;
    Ok(Json(events))
}
