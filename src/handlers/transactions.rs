//! Transaction search endpoint shared by the billing screens.

use crate::error::AppError;
use crate::middleware::RequestActor;
use crate::models::OrderDetailScope;
use crate::services::authorization::Operation;
use crate::services::search::{RawSearchParams, SearchDefaults, SearchForm};
use crate::startup::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    /// One of the billing eligibility scopes, or absent for all rows.
    pub scope: Option<String>,
    #[serde(flatten)]
    pub params: RawSearchParams,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub order_details: Vec<crate::models::OrderDetail>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

pub async fn search_transactions(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(request): Json<SearchRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .authorizer
        .may(&actor, Operation::SearchTransactions, None)
        .await
    {
        return Err(AppError::Forbidden(anyhow::anyhow!("Not authorized")));
    }

    let scope = match &request.scope {
        Some(key) => Some(OrderDetailScope::from_key(key).ok_or_else(|| {
            AppError::ValidationError(format!("Unknown search scope '{}'.", key))
        })?),
        None => None,
    };

    let form = SearchForm::new(request.params, SearchDefaults::default());
    let result = state.searcher.search(state.db.as_ref(), &form, scope).await?;

    Ok(Json(SearchResponse {
        order_details: result.order_details,
        total: result.total,
        limit: form.limit,
        offset: form.offset,
    }))
}
