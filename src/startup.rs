use crate::config::BillingConfig;
use crate::handlers;
use crate::middleware::track_http_metrics;
use crate::services::{
    Authorizer, CsvJournalExporter, Database, JournalService, LogEventService, NotificationSender,
    Reconciler, RoleAuthorizer, Searcher, SmtpEmailClient, StatementService,
};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub db: Arc<Database>,
    pub searcher: Arc<Searcher>,
    pub statements: StatementService,
    pub journals: JournalService,
    pub reconciler: Reconciler,
    pub notifications: NotificationSender,
    pub authorizer: Arc<dyn Authorizer>,
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
}

impl Application {
    pub async fn build(config: BillingConfig) -> Result<Self, crate::error::AppError> {
        let db = Arc::new(
            Database::new(
                &config.database.url,
                config.database.max_connections,
                config.database.min_connections,
            )
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to PostgreSQL: {}", e);
                e
            })?,
        );
        db.run_migrations().await.map_err(|e| {
            tracing::error!("Failed to run migrations: {}", e);
            e
        })?;

        Self::build_with_db(config, db).await
    }

    /// Assemble the application over an already-migrated pool. Used by the
    /// integration tests, which manage their own schema.
    pub async fn build_with_db(
        config: BillingConfig,
        db: Arc<Database>,
    ) -> Result<Self, crate::error::AppError> {
        let log = LogEventService::new(db.clone());
        let email = Arc::new(SmtpEmailClient::new(config.smtp.clone())?);
        let exporter = Arc::new(CsvJournalExporter::new(&config.export));

        let state = AppState {
            db: db.clone(),
            searcher: Arc::new(Searcher::standard()),
            statements: StatementService::new(db.clone(), config.settings.clone(), log.clone()),
            journals: JournalService::new(
                db.clone(),
                config.settings.clone(),
                log.clone(),
                exporter,
            ),
            reconciler: Reconciler::new(db.clone(), config.settings.clone(), log.clone()),
            notifications: NotificationSender::new(
                db.clone(),
                config.settings.clone(),
                email,
                log,
            ),
            authorizer: Arc::new(RoleAuthorizer),
            config: config.clone(),
        };

        let app = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_endpoint))
            .route("/facilities", post(handlers::create_facility))
            .route("/accounts", post(handlers::create_account))
            .route("/order-details", post(handlers::create_order_detail))
            .route("/order-details/:id", get(handlers::get_order_detail))
            .route("/transactions/search", post(handlers::search_transactions))
            .route("/statements", post(handlers::create_statement))
            .route("/statements/:id", get(handlers::get_statement))
            .route("/statements/:id/cancel", post(handlers::cancel_statement))
            .route(
                "/statements/:id/order-details/:order_detail_id",
                delete(handlers::remove_statement_row),
            )
            .route("/journals", post(handlers::create_journal))
            .route("/journals/:id", get(handlers::get_journal))
            .route("/journals/:id/close", post(handlers::close_journal))
            .route("/reconciliation/reconcile", post(handlers::reconcile))
            .route("/reconciliation/unreconcile", post(handlers::unreconcile))
            .route("/notifications/run", post(handlers::deliver_notifications))
            .route(
                "/log-events/:loggable_type/:loggable_id",
                get(handlers::list_log_events),
            )
            .layer(axum::middleware::from_fn(track_http_metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            crate::error::AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app);

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}
