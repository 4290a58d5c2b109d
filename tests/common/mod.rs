//! Common test utilities for facility-billing-service integration tests.
//!
//! These tests need a PostgreSQL instance; set TEST_DATABASE_URL to run
//! them. Without it every test returns early so the suite stays green in
//! environments without a database.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use facility_billing_service::config::Settings;
use facility_billing_service::models::{Account, Facility, OrderDetail, OrderState};
use facility_billing_service::services::authorization::{Actor, Role};
use facility_billing_service::services::database::{Database, NewOrderDetail};
use facility_billing_service::config::ExportConfig;
use facility_billing_service::services::{
    CsvJournalExporter, JournalExporter, JournalService, LogEventService, Reconciler,
    StatementService,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,facility_billing_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestContext {
    pub db: Arc<Database>,
    pub settings: Settings,
    pub statements: StatementService,
    pub journals: JournalService,
    pub reconciler: Reconciler,
}

/// Connect to the test database, or None when TEST_DATABASE_URL is unset.
pub async fn setup() -> Option<TestContext> {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;

    let db = Arc::new(
        Database::new(&database_url, 4, 1)
            .await
            .expect("Failed to connect to test database"),
    );
    db.run_migrations().await.expect("Failed to run migrations");

    Some(context_with_settings(db, Settings::default()))
}

pub fn context_with_settings(db: Arc<Database>, settings: Settings) -> TestContext {
    let exporter = Arc::new(CsvJournalExporter::new(&ExportConfig::default()));
    context_with_exporter(db, settings, exporter)
}

pub fn context_with_exporter(
    db: Arc<Database>,
    settings: Settings,
    exporter: Arc<dyn JournalExporter>,
) -> TestContext {
    let log = LogEventService::new(db.clone());
    TestContext {
        statements: StatementService::new(db.clone(), settings.clone(), log.clone()),
        journals: JournalService::new(db.clone(), settings.clone(), log.clone(), exporter),
        reconciler: Reconciler::new(db.clone(), settings.clone(), log),
        db,
        settings,
    }
}

pub fn global_admin() -> Actor {
    Actor {
        user_id: Uuid::new_v4(),
        role: Role::GlobalAdmin,
    }
}

pub fn facility_admin() -> Actor {
    Actor {
        user_id: Uuid::new_v4(),
        role: Role::FacilityAdmin,
    }
}

pub async fn create_test_facility(ctx: &TestContext) -> Facility {
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    ctx.db
        .create_facility(
            &format!("Test Facility {}", suffix),
            &format!("tf-{}", suffix),
        )
        .await
        .expect("Failed to create facility")
}

pub async fn create_test_account(ctx: &TestContext, kind: &str, facility: &Facility) -> Account {
    ctx.db
        .create_account(
            kind,
            "Test account",
            Uuid::new_v4(),
            "owner@example.org",
            Some(facility.facility_id),
        )
        .await
        .expect("Failed to create account")
}

/// A complete, costed, past-review order detail: eligible for statements
/// (with a purchase-order/credit-card account) or journals (chart string).
pub async fn create_billable_order_detail(
    ctx: &TestContext,
    account: &Account,
    facility: &Facility,
) -> OrderDetail {
    ctx.db
        .create_order_detail(&NewOrderDetail {
            order_id: Uuid::new_v4(),
            account_id: account.account_id,
            product_id: Uuid::new_v4(),
            facility_id: facility.facility_id,
            state: OrderState::Complete,
            ordered_at: Some(Utc::now() - Duration::days(10)),
            fulfilled_at: Some(Utc::now() - Duration::days(9)),
            reviewed_at: Some(Utc::now() - Duration::days(1)),
            price_policy_id: Some(Uuid::new_v4()),
            actual_cost: Some(Decimal::new(10000, 2)),
            actual_subsidy: Some(Decimal::new(2500, 2)),
            problem: false,
        })
        .await
        .expect("Failed to create order detail")
}

/// An order detail that is still in process, ineligible for billing.
pub async fn create_unbillable_order_detail(
    ctx: &TestContext,
    account: &Account,
    facility: &Facility,
) -> OrderDetail {
    ctx.db
        .create_order_detail(&NewOrderDetail {
            order_id: Uuid::new_v4(),
            account_id: account.account_id,
            product_id: Uuid::new_v4(),
            facility_id: facility.facility_id,
            state: OrderState::InProcess,
            ordered_at: None,
            fulfilled_at: None,
            reviewed_at: None,
            price_policy_id: None,
            actual_cost: None,
            actual_subsidy: None,
            problem: false,
        })
        .await
        .expect("Failed to create order detail")
}
