use crate::error::AppError;
use crate::services::authorization::{Actor, Role};
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

/// Actor extractor for facility-billing-service.
///
/// Identity arrives on `X-User-ID` / `X-User-Role` headers from the
/// authenticating frontend. An unknown or absent role degrades to staff,
/// the least-privileged rung, so a misconfigured caller can never gain
/// access by omission.
#[derive(Debug, Clone, Copy)]
pub struct RequestActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-ID")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Missing or invalid X-User-ID header"))
            })?;

        let role = parts
            .headers
            .get("X-User-Role")
            .and_then(|v| v.to_str().ok())
            .and_then(Role::from_key)
            .unwrap_or(Role::Staff);

        tracing::Span::current().record("user_id", user_id.to_string());

        Ok(RequestActor(Actor { user_id, role }))
    }
}
