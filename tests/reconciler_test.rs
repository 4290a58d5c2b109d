//! Bulk reconciliation integration tests.

mod common;

use common::{
    context_with_settings, create_billable_order_detail, create_test_account,
    create_test_facility, facility_admin, global_admin, setup,
};
use chrono::{Duration, Utc};
use facility_billing_service::config::Settings;
use facility_billing_service::error::AppError;
use facility_billing_service::services::journals::NewJournal;
use facility_billing_service::services::reconciler::{ReconcileRequest, RowParams};
use facility_billing_service::services::statements::NewStatement;
use serial_test::serial;
use std::collections::BTreeMap;
use uuid::Uuid;

fn request_for(rows: Vec<Uuid>, reconciled_at: Option<String>) -> ReconcileRequest {
    let mut map = BTreeMap::new();
    for id in rows {
        map.insert(
            id,
            RowParams {
                selected: true,
                reconciled_note: Some("matched deposit".to_string()),
                ..Default::default()
            },
        );
    }
    ReconcileRequest {
        rows: map,
        reconciled_at,
        order_status: "reconciled".to_string(),
        bulk_reconcile: false,
        bulk_note: None,
        bulk_deposit_number: None,
    }
}

fn today_string() -> String {
    Utc::now().format("%m/%d/%Y").to_string()
}

/// Statement a purchase-order row so it becomes reconcilable.
async fn statemented_row(ctx: &common::TestContext) -> Uuid {
    let facility = create_test_facility(ctx).await;
    let account = create_test_account(ctx, "purchase_order", &facility).await;
    let row = create_billable_order_detail(ctx, &account, &facility).await;
    ctx.statements
        .create(NewStatement {
            account_id: account.account_id,
            facility_id: facility.facility_id,
            invoice_date: Utc::now().date_naive(),
            created_by: Uuid::new_v4(),
            parent_statement_id: None,
            order_detail_ids: vec![row.order_detail_id],
        })
        .await
        .expect("Failed to create statement");
    row.order_detail_id
}

#[tokio::test]
#[serial]
async fn bad_rows_collect_errors_while_good_rows_proceed() {
    let Some(ctx) = setup().await else { return };

    let good = statemented_row(&ctx).await;

    // A row with no statement or journal cannot be reconciled yet.
    let facility = create_test_facility(&ctx).await;
    let account = create_test_account(&ctx, "purchase_order", &facility).await;
    let bad = create_billable_order_detail(&ctx, &account, &facility)
        .await
        .order_detail_id;

    let outcome = ctx
        .reconciler
        .reconcile_all(&global_admin(), &request_for(vec![good, bad], Some(today_string())))
        .await
        .unwrap();

    assert_eq!(outcome.count, 1);
    assert_eq!(outcome.order_detail_ids, vec![good]);
    assert!(outcome.full_errors.contains_key(&bad));

    let reconciled = ctx.db.get_order_detail(good).await.unwrap().unwrap();
    assert_eq!(reconciled.state, "reconciled");
    assert!(reconciled.reconciled_at.is_some());
    assert_eq!(reconciled.reconciled_note.as_deref(), Some("matched deposit"));
}

#[tokio::test]
#[serial]
async fn journaled_rows_reconcile_only_after_a_successful_close() {
    let Some(ctx) = setup().await else { return };

    let facility = create_test_facility(&ctx).await;
    let account = create_test_account(&ctx, "chart_string", &facility).await;
    let row = create_billable_order_detail(&ctx, &account, &facility).await;

    let journal = ctx
        .journals
        .create(NewJournal {
            facility_ids: vec![facility.facility_id],
            journal_date: Utc::now().date_naive(),
            created_by: Uuid::new_v4(),
            order_detail_ids: vec![row.order_detail_id],
        })
        .await
        .unwrap();

    // The journal is still open, so the row stays untouched.
    let pending = ctx
        .reconciler
        .reconcile_all(
            &global_admin(),
            &request_for(vec![row.order_detail_id], Some(today_string())),
        )
        .await
        .unwrap();
    assert_eq!(pending.count, 0);
    assert!(pending.full_errors[&row.order_detail_id].contains("not been closed"));

    ctx.journals
        .close(journal.journal_id, true, Some("GL-42".to_string()), Uuid::new_v4())
        .await
        .unwrap();
    assert!(ctx.journals.is_submittable(journal.journal_id).await.unwrap());

    let closed = ctx
        .reconciler
        .reconcile_all(
            &global_admin(),
            &request_for(vec![row.order_detail_id], Some(today_string())),
        )
        .await
        .unwrap();
    assert_eq!(closed.count, 1);

    // Fully reconciled journals have nothing left to submit.
    assert!(!ctx.journals.is_submittable(journal.journal_id).await.unwrap());
}

#[tokio::test]
#[serial]
async fn missing_date_fails_every_row() {
    let Some(ctx) = setup().await else { return };

    let row = statemented_row(&ctx).await;
    let outcome = ctx
        .reconciler
        .reconcile_all(&global_admin(), &request_for(vec![row], None))
        .await
        .unwrap();

    assert_eq!(outcome.count, 0);
    assert_eq!(
        outcome.full_errors.get(&row).map(String::as_str),
        Some("Reconciliation Date is required.")
    );
}

#[tokio::test]
#[serial]
async fn future_date_is_rejected() {
    let Some(ctx) = setup().await else { return };

    let row = statemented_row(&ctx).await;
    let tomorrow = (Utc::now() + Duration::days(1)).format("%m/%d/%Y").to_string();
    let outcome = ctx
        .reconciler
        .reconcile_all(&global_admin(), &request_for(vec![row], Some(tomorrow)))
        .await
        .unwrap();

    assert_eq!(outcome.count, 0);
    assert!(outcome.full_errors[&row].contains("future"));
}

#[tokio::test]
#[serial]
async fn resubmitting_reconciled_rows_is_idempotent() {
    let Some(ctx) = setup().await else { return };

    let row = statemented_row(&ctx).await;
    let request = request_for(vec![row], Some(today_string()));

    let first = ctx
        .reconciler
        .reconcile_all(&global_admin(), &request)
        .await
        .unwrap();
    assert_eq!(first.count, 1);

    let second = ctx
        .reconciler
        .reconcile_all(&global_admin(), &request)
        .await
        .unwrap();
    assert_eq!(second.count, 0);
    assert!(second.full_errors.is_empty());
}

#[tokio::test]
#[serial]
async fn bulk_note_overrides_per_row_values() {
    let Some(ctx) = setup().await else { return };

    let row = statemented_row(&ctx).await;
    let mut request = request_for(vec![row], Some(today_string()));
    request.bulk_reconcile = true;
    request.bulk_note = Some("deposit batch 7".to_string());
    request.bulk_deposit_number = Some("D-0007".to_string());

    let outcome = ctx
        .reconciler
        .reconcile_all(&global_admin(), &request)
        .await
        .unwrap();
    assert_eq!(outcome.count, 1);

    let reconciled = ctx.db.get_order_detail(row).await.unwrap().unwrap();
    assert_eq!(reconciled.reconciled_note.as_deref(), Some("deposit batch 7"));
    assert_eq!(reconciled.deposit_number.as_deref(), Some("D-0007"));
}

#[tokio::test]
#[serial]
async fn unreconcile_restores_rows_and_skips_untouched_ones() {
    let Some(ctx) = setup().await else { return };

    let reconciled = statemented_row(&ctx).await;
    ctx.reconciler
        .reconcile_all(&global_admin(), &request_for(vec![reconciled], Some(today_string())))
        .await
        .unwrap();

    let untouched = statemented_row(&ctx).await;

    let outcome = ctx
        .reconciler
        .unreconcile_all(
            &global_admin(),
            &request_for(vec![reconciled, untouched], Some(today_string())),
        )
        .await
        .unwrap();

    assert_eq!(outcome.count, 1);
    assert_eq!(outcome.order_detail_ids, vec![reconciled]);

    let restored = ctx.db.get_order_detail(reconciled).await.unwrap().unwrap();
    assert_eq!(restored.state, "complete");
    assert!(restored.reconciled_at.is_none());
    assert!(restored.reconciled_note.is_none());
    assert!(restored.deposit_number.is_none());
}

#[tokio::test]
#[serial]
async fn unreconcile_requires_a_global_admin() {
    let Some(ctx) = setup().await else { return };

    let row = statemented_row(&ctx).await;
    let result = ctx
        .reconciler
        .unreconcile_all(&facility_admin(), &request_for(vec![row], Some(today_string())))
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[tokio::test]
#[serial]
async fn unreconcile_honors_the_feature_flag() {
    let Some(ctx) = setup().await else { return };

    let row = statemented_row(&ctx).await;

    let locked_down = context_with_settings(
        ctx.db.clone(),
        Settings {
            allow_unreconcile: false,
            ..Settings::default()
        },
    );
    let result = locked_down
        .reconciler
        .unreconcile_all(&global_admin(), &request_for(vec![row], Some(today_string())))
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
}
