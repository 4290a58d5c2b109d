//! HTTP surface smoke tests.

mod common;

use common::init_tracing;
use facility_billing_service::config::{
    BillingConfig, DatabaseConfig, ExportConfig, Settings, SmtpConfig,
};
use facility_billing_service::services::Database;
use facility_billing_service::startup::Application;
use serial_test::serial;
use std::sync::Arc;

async fn spawn_app() -> Option<String> {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;

    let db = Arc::new(
        Database::new(&database_url, 4, 1)
            .await
            .expect("Failed to connect to test database"),
    );
    db.run_migrations().await.expect("Failed to run migrations");

    let config = BillingConfig {
        port: 0,
        service_name: "facility-billing-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        database: DatabaseConfig {
            url: database_url,
            max_connections: 2,
            min_connections: 1,
        },
        smtp: SmtpConfig {
            enabled: false,
            host: "localhost".to_string(),
            port: 587,
            user: String::new(),
            password: String::new(),
            from_email: "billing@example.org".to_string(),
            from_name: "Facility Billing".to_string(),
        },
        export: ExportConfig::default(),
        settings: Settings::default(),
    };

    let app = Application::build_with_db(config, db)
        .await
        .expect("Failed to build application");
    let port = app.port();

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    Some(format!("http://127.0.0.1:{}", port))
}

#[tokio::test]
#[serial]
async fn health_check_reports_ok() {
    let Some(base) = spawn_app().await else { return };

    let response = reqwest::get(format!("{}/health", base))
        .await
        .expect("Failed to reach /health");
    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
#[serial]
async fn metrics_endpoint_serves_prometheus_text() {
    let Some(base) = spawn_app().await else { return };

    // A request through the stack feeds the per-route counter.
    reqwest::get(format!("{}/health", base))
        .await
        .expect("Failed to reach /health");

    let response = reqwest::get(format!("{}/metrics", base))
        .await
        .expect("Failed to reach /metrics");
    assert!(response.status().is_success());
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));

    let body = response.text().await.unwrap();
    assert!(body.contains("billing_http_requests_total"));
}

#[tokio::test]
#[serial]
async fn mutating_endpoints_reject_staff_actors() {
    let Some(base) = spawn_app().await else { return };

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/reconciliation/reconcile", base))
        .header("X-User-ID", uuid::Uuid::new_v4().to_string())
        .header("X-User-Role", "staff")
        .json(&serde_json::json!({
            "rows": {},
            "order_status": "reconciled"
        }))
        .send()
        .await
        .expect("Failed to reach reconcile endpoint");

    assert_eq!(response.status().as_u16(), 403);
}
