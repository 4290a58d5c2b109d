use crate::services::metrics::HTTP_REQUESTS;
use axum::{extract::Request, middleware::Next, response::Response};

/// Counts every request by route and response status.
pub async fn track_http_metrics(req: Request, next: Next) -> Response {
    let route = format!("{} {}", req.method(), req.uri().path());

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    HTTP_REQUESTS.with_label_values(&[&route, &status]).inc();

    response
}
