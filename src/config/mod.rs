//! Configuration for facility-billing-service.

use crate::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub port: u16,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub smtp: SmtpConfig,
    pub export: ExportConfig,
    pub settings: Settings,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExportConfig {
    /// Spool directory for journal export artifacts. Unset disables the
    /// export step; closing journals still succeeds.
    pub output_dir: Option<String>,
}

/// Feature flags and operational limits. Constructed once at startup and
/// passed to the services that need them; there is no mutable global
/// configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Child statements derive their invoice number from the parent's
    /// (`{parent}-2`, `{parent}-3`, ...) instead of the standalone format.
    pub reference_statement_invoice_numbering: bool,
    /// Whether the unreconcile bulk action is available at all.
    pub allow_unreconcile: bool,
    /// Hours between notification and journal/statement eligibility.
    pub review_period_hours: u32,
    /// Upper bound on rows accepted by any bulk action.
    pub max_bulk_rows: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reference_statement_invoice_numbering: true,
            allow_unreconcile: true,
            review_period_hours: 168,
            max_bulk_rows: 500,
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let defaults = Settings::default();

        Ok(Self {
            port: env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "facility-billing-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            smtp: SmtpConfig {
                enabled: env_bool("SMTP_ENABLED", false),
                host: env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env::var("SMTP_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(587),
                user: env::var("SMTP_USER").unwrap_or_default(),
                password: env::var("SMTP_PASSWORD").unwrap_or_default(),
                from_email: env::var("SMTP_FROM_EMAIL")
                    .unwrap_or_else(|_| "billing@example.org".to_string()),
                from_name: env::var("SMTP_FROM_NAME")
                    .unwrap_or_else(|_| "Facility Billing".to_string()),
            },
            export: ExportConfig {
                output_dir: env::var("EXPORT_OUTPUT_DIR").ok(),
            },
            settings: Settings {
                reference_statement_invoice_numbering: env_bool(
                    "REFERENCE_STATEMENT_INVOICE_NUMBERING",
                    defaults.reference_statement_invoice_numbering,
                ),
                allow_unreconcile: env_bool("ALLOW_UNRECONCILE", defaults.allow_unreconcile),
                review_period_hours: env::var("REVIEW_PERIOD_HOURS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.review_period_hours),
                max_bulk_rows: env::var("MAX_BULK_ROWS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.max_bulk_rows),
            },
        })
    }
}
