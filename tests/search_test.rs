//! Transaction search integration tests. Each test scopes its assertions
//! to a fresh facility so runs do not interfere with existing rows.

mod common;

use common::{
    create_billable_order_detail, create_test_account, create_test_facility,
    create_unbillable_order_detail, setup,
};
use chrono::{Duration, Utc};
use facility_billing_service::models::OrderDetailScope;
use facility_billing_service::services::search::{
    RawSearchParams, SearchDefaults, SearchForm, Searcher,
};
use serial_test::serial;
use uuid::Uuid;

fn form_for_facility(facility_id: Uuid, raw: RawSearchParams) -> SearchForm {
    SearchForm::new(
        RawSearchParams {
            facilities: Some(vec![facility_id]),
            ..raw
        },
        SearchDefaults::default(),
    )
}

#[tokio::test]
#[serial]
async fn blank_filters_return_every_row_in_scope() {
    let Some(ctx) = setup().await else { return };

    let facility = create_test_facility(&ctx).await;
    let account = create_test_account(&ctx, "purchase_order", &facility).await;
    for _ in 0..3 {
        create_billable_order_detail(&ctx, &account, &facility).await;
    }

    let searcher = Searcher::standard();
    let form = form_for_facility(facility.facility_id, RawSearchParams::default());
    let result = searcher.search(ctx.db.as_ref(), &form, None).await.unwrap();

    assert_eq!(result.total, 3);
    assert_eq!(result.order_details.len(), 3);
}

#[tokio::test]
#[serial]
async fn account_filter_narrows_without_affecting_blank_filters() {
    let Some(ctx) = setup().await else { return };

    let facility = create_test_facility(&ctx).await;
    let first = create_test_account(&ctx, "purchase_order", &facility).await;
    let second = create_test_account(&ctx, "credit_card", &facility).await;
    create_billable_order_detail(&ctx, &first, &facility).await;
    create_billable_order_detail(&ctx, &second, &facility).await;

    let searcher = Searcher::standard();
    let form = form_for_facility(
        facility.facility_id,
        RawSearchParams {
            accounts: Some(vec![first.account_id]),
            ..Default::default()
        },
    );
    let result = searcher.search(ctx.db.as_ref(), &form, None).await.unwrap();

    assert_eq!(result.total, 1);
    assert_eq!(result.order_details[0].account_id, first.account_id);
}

#[tokio::test]
#[serial]
async fn status_filter_drops_unknown_keys_and_keeps_known_ones() {
    let Some(ctx) = setup().await else { return };

    let facility = create_test_facility(&ctx).await;
    let account = create_test_account(&ctx, "purchase_order", &facility).await;
    create_billable_order_detail(&ctx, &account, &facility).await;
    create_unbillable_order_detail(&ctx, &account, &facility).await;

    let searcher = Searcher::standard();
    let form = form_for_facility(
        facility.facility_id,
        RawSearchParams {
            order_statuses: Some(vec!["complete".to_string(), "bogus".to_string()]),
            ..Default::default()
        },
    );
    let result = searcher.search(ctx.db.as_ref(), &form, None).await.unwrap();

    assert_eq!(result.total, 1);
    assert_eq!(result.order_details[0].state, "complete");
}

#[tokio::test]
#[serial]
async fn date_range_uses_the_selected_field() {
    let Some(ctx) = setup().await else { return };

    let facility = create_test_facility(&ctx).await;
    let account = create_test_account(&ctx, "purchase_order", &facility).await;
    create_billable_order_detail(&ctx, &account, &facility).await;

    let searcher = Searcher::standard();

    // Ordered ten days ago: a window starting tomorrow excludes it.
    let tomorrow = (Utc::now() + Duration::days(1)).format("%m/%d/%Y").to_string();
    let form = form_for_facility(
        facility.facility_id,
        RawSearchParams {
            date_field: Some("ordered_at".to_string()),
            start_date: Some(tomorrow),
            ..Default::default()
        },
    );
    assert_eq!(searcher.search(ctx.db.as_ref(), &form, None).await.unwrap().total, 0);

    // An unparseable date degrades to no filter.
    let form = form_for_facility(
        facility.facility_id,
        RawSearchParams {
            date_field: Some("ordered_at".to_string()),
            start_date: Some("13/45/20xx".to_string()),
            ..Default::default()
        },
    );
    assert_eq!(searcher.search(ctx.db.as_ref(), &form, None).await.unwrap().total, 1);
}

#[tokio::test]
#[serial]
async fn need_journal_scope_only_matches_chart_string_rows() {
    let Some(ctx) = setup().await else { return };

    let facility = create_test_facility(&ctx).await;
    let chart_string = create_test_account(&ctx, "chart_string", &facility).await;
    let purchase_order = create_test_account(&ctx, "purchase_order", &facility).await;
    let journalable = create_billable_order_detail(&ctx, &chart_string, &facility).await;
    create_billable_order_detail(&ctx, &purchase_order, &facility).await;

    let searcher = Searcher::standard();
    let form = form_for_facility(facility.facility_id, RawSearchParams::default());
    let result = searcher
        .search(ctx.db.as_ref(), &form, Some(OrderDetailScope::NeedJournal))
        .await
        .unwrap();

    assert_eq!(result.total, 1);
    assert_eq!(
        result.order_details[0].order_detail_id,
        journalable.order_detail_id
    );
}

#[tokio::test]
#[serial]
async fn paging_is_stable_under_a_sort_key() {
    let Some(ctx) = setup().await else { return };

    let facility = create_test_facility(&ctx).await;
    let account = create_test_account(&ctx, "purchase_order", &facility).await;
    for _ in 0..5 {
        create_billable_order_detail(&ctx, &account, &facility).await;
    }

    let searcher = Searcher::standard();
    let mut seen = Vec::new();
    for page in 0..3 {
        let form = form_for_facility(
            facility.facility_id,
            RawSearchParams {
                sort: Some("ordered_at".to_string()),
                limit: Some(2),
                offset: Some(page * 2),
                ..Default::default()
            },
        );
        let result = searcher.search(ctx.db.as_ref(), &form, None).await.unwrap();
        seen.extend(result.order_details.into_iter().map(|od| od.order_detail_id));
    }

    assert_eq!(seen.len(), 5);
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 5, "pages must not repeat rows");
}
