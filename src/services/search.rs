//! Transaction search: a composable filter/sort/paginate layer shared by
//! every admin listing screen (billing, statements, journals).
//!
//! `SearchForm` normalizes raw user parameters (locale dates, multi-select
//! lists) into typed fields; `Searcher` applies a chain of `SearchFilter`s
//! to a base relation. Malformed input degrades to "filter absent" and
//! never errors.

use crate::error::AppError;
use crate::models::{OrderDetail, OrderDetailScope, OrderState};
use crate::services::database::{Database, ORDER_DETAIL_COLUMNS};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

/// Which date column a date-range filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateField {
    #[default]
    Ordered,
    Fulfilled,
    Reviewed,
    JournalOrStatement,
    Reconciled,
}

impl DateField {
    pub fn from_key(s: &str) -> Option<Self> {
        match s {
            "ordered_at" => Some(Self::Ordered),
            "fulfilled_at" => Some(Self::Fulfilled),
            "reviewed_at" => Some(Self::Reviewed),
            "journal_or_statement_date" => Some(Self::JournalOrStatement),
            "reconciled_at" => Some(Self::Reconciled),
            _ => None,
        }
    }

    fn column_sql(&self) -> &'static str {
        match self {
            Self::Ordered => "od.ordered_at",
            Self::Fulfilled => "od.fulfilled_at",
            Self::Reviewed => "od.reviewed_at",
            Self::JournalOrStatement => "COALESCE(j.journal_date, s.invoice_date)",
            Self::Reconciled => "od.reconciled_at",
        }
    }
}

/// Whitelisted sort keys; unknown keys fall back to ordered-at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    OrderedAt,
    FulfilledAt,
    ReconciledAt,
    AccountNumber,
    State,
}

impl SortKey {
    pub fn from_key(s: &str) -> Option<Self> {
        match s {
            "ordered_at" => Some(Self::OrderedAt),
            "fulfilled_at" => Some(Self::FulfilledAt),
            "reconciled_at" => Some(Self::ReconciledAt),
            "account_number" => Some(Self::AccountNumber),
            "state" => Some(Self::State),
            _ => None,
        }
    }

    fn column_sql(&self) -> &'static str {
        match self {
            Self::OrderedAt => "od.ordered_at",
            Self::FulfilledAt => "od.fulfilled_at",
            Self::ReconciledAt => "od.reconciled_at",
            Self::AccountNumber => "a.account_number",
            Self::State => "od.state",
        }
    }
}

/// Raw, user-submitted search parameters. Everything is optional and
/// loosely typed; normalization happens in [`SearchForm::new`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSearchParams {
    pub date_field: Option<String>,
    /// Locale-formatted `MM/DD/YYYY` boundaries.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub accounts: Option<Vec<Uuid>>,
    pub account_owners: Option<Vec<Uuid>>,
    pub products: Option<Vec<Uuid>>,
    pub facilities: Option<Vec<Uuid>>,
    pub statements: Option<Vec<Uuid>>,
    pub order_statuses: Option<Vec<String>>,
    pub sort: Option<String>,
    pub sort_descending: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Defaults applied for blank fields, supplied by the calling screen.
#[derive(Debug, Clone, Default)]
pub struct SearchDefaults {
    pub date_field: DateField,
    pub facilities: Vec<Uuid>,
}

/// Normalized search form. Blank multi-selects mean "no filter"; invalid
/// dates are treated as absent.
#[derive(Debug, Clone)]
pub struct SearchForm {
    pub date_field: DateField,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub accounts: Vec<Uuid>,
    pub account_owners: Vec<Uuid>,
    pub products: Vec<Uuid>,
    pub facilities: Vec<Uuid>,
    pub statements: Vec<Uuid>,
    pub order_statuses: Vec<OrderState>,
    pub sort_key: SortKey,
    pub sort_descending: bool,
    pub limit: i64,
    pub offset: i64,
}

/// Parse a locale `MM/DD/YYYY` date. Unparseable input is an absent
/// filter, never a partial date or an error.
pub fn parse_search_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%m/%d/%Y").ok()
}

impl SearchForm {
    pub fn new(raw: RawSearchParams, defaults: SearchDefaults) -> Self {
        let date_field = raw
            .date_field
            .as_deref()
            .and_then(DateField::from_key)
            .unwrap_or(defaults.date_field);

        let order_statuses = raw
            .order_statuses
            .unwrap_or_default()
            .iter()
            .filter_map(|s| OrderState::from_key(s))
            .collect();

        let facilities = raw.facilities.filter(|f| !f.is_empty());

        Self {
            date_field,
            start_date: raw.start_date.as_deref().and_then(parse_search_date),
            end_date: raw.end_date.as_deref().and_then(parse_search_date),
            accounts: raw.accounts.unwrap_or_default(),
            account_owners: raw.account_owners.unwrap_or_default(),
            products: raw.products.unwrap_or_default(),
            facilities: facilities.unwrap_or(defaults.facilities),
            statements: raw.statements.unwrap_or_default(),
            order_statuses,
            sort_key: raw
                .sort
                .as_deref()
                .and_then(SortKey::from_key)
                .unwrap_or_default(),
            sort_descending: raw.sort_descending.unwrap_or(false),
            limit: raw.limit.unwrap_or(50).clamp(1, 500),
            offset: raw.offset.unwrap_or(0).max(0),
        }
    }
}

/// One narrowing concern in the filter chain. Implementations must be a
/// strict no-op when their form field is blank.
pub trait SearchFilter: Send + Sync {
    fn apply<'qb>(&self, builder: &mut QueryBuilder<'qb, Postgres>, form: &SearchForm);
}

fn push_uuid_in_clause<'qb>(
    builder: &mut QueryBuilder<'qb, Postgres>,
    column: &str,
    ids: &[Uuid],
) {
    if ids.is_empty() {
        return;
    }
    builder.push(" AND ");
    builder.push(column);
    builder.push(" IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

pub struct AccountFilter;

impl SearchFilter for AccountFilter {
    fn apply<'qb>(&self, builder: &mut QueryBuilder<'qb, Postgres>, form: &SearchForm) {
        push_uuid_in_clause(builder, "od.account_id", &form.accounts);
    }
}

pub struct AccountOwnerFilter;

impl SearchFilter for AccountOwnerFilter {
    fn apply<'qb>(&self, builder: &mut QueryBuilder<'qb, Postgres>, form: &SearchForm) {
        push_uuid_in_clause(builder, "a.owner_user_id", &form.account_owners);
    }
}

pub struct ProductFilter;

impl SearchFilter for ProductFilter {
    fn apply<'qb>(&self, builder: &mut QueryBuilder<'qb, Postgres>, form: &SearchForm) {
        push_uuid_in_clause(builder, "od.product_id", &form.products);
    }
}

/// Facility visibility: restricts to the facilities the current screen is
/// scoped to (cross-facility admin screens pass none).
pub struct FacilityFilter;

impl SearchFilter for FacilityFilter {
    fn apply<'qb>(&self, builder: &mut QueryBuilder<'qb, Postgres>, form: &SearchForm) {
        push_uuid_in_clause(builder, "od.facility_id", &form.facilities);
    }
}

pub struct StatementFilter;

impl SearchFilter for StatementFilter {
    fn apply<'qb>(&self, builder: &mut QueryBuilder<'qb, Postgres>, form: &SearchForm) {
        push_uuid_in_clause(builder, "od.statement_id", &form.statements);
    }
}

pub struct OrderStatusFilter;

impl SearchFilter for OrderStatusFilter {
    fn apply<'qb>(&self, builder: &mut QueryBuilder<'qb, Postgres>, form: &SearchForm) {
        if form.order_statuses.is_empty() {
            return;
        }
        builder.push(" AND od.state IN (");
        let mut separated = builder.separated(", ");
        for state in &form.order_statuses {
            separated.push_bind(state.as_str());
        }
        separated.push_unseparated(")");
    }
}

pub struct DateRangeFilter;

impl SearchFilter for DateRangeFilter {
    fn apply<'qb>(&self, builder: &mut QueryBuilder<'qb, Postgres>, form: &SearchForm) {
        let column = form.date_field.column_sql();
        if let Some(start) = form.start_date {
            builder.push(format!(" AND ({})::date >= ", column));
            builder.push_bind(start);
        }
        if let Some(end) = form.end_date {
            builder.push(format!(" AND ({})::date <= ", column));
            builder.push_bind(end);
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub order_details: Vec<OrderDetail>,
    pub total: i64,
}

/// Composes the configured filter chain over the order-detail relation.
pub struct Searcher {
    filters: Vec<Box<dyn SearchFilter>>,
}

const SEARCH_RELATION: &str = " FROM order_details od \
     JOIN accounts a ON a.account_id = od.account_id \
     LEFT JOIN statements s ON s.statement_id = od.statement_id \
     LEFT JOIN journals j ON j.journal_id = od.journal_id \
     WHERE 1=1";

impl Searcher {
    pub fn new(filters: Vec<Box<dyn SearchFilter>>) -> Self {
        Self { filters }
    }

    /// The filter chain used by the admin transaction screens.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(FacilityFilter),
            Box::new(AccountFilter),
            Box::new(AccountOwnerFilter),
            Box::new(ProductFilter),
            Box::new(StatementFilter),
            Box::new(OrderStatusFilter),
            Box::new(DateRangeFilter),
        ])
    }

    fn compose<'qb>(
        &self,
        builder: &mut QueryBuilder<'qb, Postgres>,
        form: &SearchForm,
        scope: Option<OrderDetailScope>,
    ) {
        if let Some(scope) = scope {
            builder.push(" AND (");
            builder.push(scope.where_sql());
            builder.push(")");
        }
        for filter in &self.filters {
            filter.apply(builder, form);
        }
    }

    #[instrument(skip(self, db, form), fields(scope = ?scope))]
    pub async fn search(
        &self,
        db: &Database,
        form: &SearchForm,
        scope: Option<OrderDetailScope>,
    ) -> Result<SearchResult, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["search_transactions"])
            .start_timer();

        let mut count_builder =
            QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*){}", SEARCH_RELATION));
        self.compose(&mut count_builder, form, scope);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(db.pool())
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to count search results: {}", e))
            })?;

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {}{}",
            ORDER_DETAIL_COLUMNS, SEARCH_RELATION
        ));
        self.compose(&mut builder, form, scope);
        builder.push(" ORDER BY ");
        builder.push(form.sort_key.column_sql());
        builder.push(if form.sort_descending { " DESC" } else { " ASC" });
        // Stable tiebreak for paging.
        builder.push(", od.order_detail_id");
        builder.push(" LIMIT ");
        builder.push_bind(form.limit);
        builder.push(" OFFSET ");
        builder.push_bind(form.offset);

        let order_details = builder
            .build_query_as::<OrderDetail>()
            .fetch_all(db.pool())
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to search order details: {}", e))
            })?;

        timer.observe_duration();

        Ok(SearchResult {
            order_details,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_form() -> SearchForm {
        SearchForm::new(RawSearchParams::default(), SearchDefaults::default())
    }

    #[test]
    fn locale_dates_parse_and_garbage_is_absent() {
        assert_eq!(
            parse_search_date("03/15/2024"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(parse_search_date("2024-03-15"), None);
        assert_eq!(parse_search_date("13/45/2024"), None);
        assert_eq!(parse_search_date("  "), None);
    }

    #[test]
    fn unknown_statuses_and_sort_keys_degrade() {
        let raw = RawSearchParams {
            order_statuses: Some(vec!["complete".into(), "bogus".into()]),
            sort: Some("nope".into()),
            ..Default::default()
        };
        let form = SearchForm::new(raw, SearchDefaults::default());
        assert_eq!(form.order_statuses, vec![OrderState::Complete]);
        assert_eq!(form.sort_key, SortKey::OrderedAt);
    }

    #[test]
    fn blank_facilities_fall_back_to_defaults() {
        let facility = Uuid::new_v4();
        let raw = RawSearchParams {
            facilities: Some(vec![]),
            ..Default::default()
        };
        let defaults = SearchDefaults {
            facilities: vec![facility],
            ..Default::default()
        };
        let form = SearchForm::new(raw, defaults);
        assert_eq!(form.facilities, vec![facility]);
    }

    #[test]
    fn limit_is_clamped() {
        let raw = RawSearchParams {
            limit: Some(10_000),
            offset: Some(-5),
            ..Default::default()
        };
        let form = SearchForm::new(raw, SearchDefaults::default());
        assert_eq!(form.limit, 500);
        assert_eq!(form.offset, 0);
    }

    /// Blank-field filters must leave the composed SQL untouched.
    #[test]
    fn blank_filters_are_strict_no_ops() {
        let form = blank_form();
        let filters: Vec<Box<dyn SearchFilter>> = vec![
            Box::new(AccountFilter),
            Box::new(AccountOwnerFilter),
            Box::new(ProductFilter),
            Box::new(FacilityFilter),
            Box::new(StatementFilter),
            Box::new(OrderStatusFilter),
            Box::new(DateRangeFilter),
        ];
        for filter in &filters {
            let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 WHERE 1=1");
            filter.apply(&mut builder, &form);
            assert_eq!(builder.sql(), "SELECT 1 WHERE 1=1");
        }
    }

    #[test]
    fn populated_filters_append_clauses() {
        let mut form = blank_form();
        form.accounts = vec![Uuid::new_v4(), Uuid::new_v4()];
        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 WHERE 1=1");
        AccountFilter.apply(&mut builder, &form);
        assert!(builder.sql().contains("od.account_id IN ($1, $2)"));
    }

    #[test]
    fn date_range_uses_the_active_field() {
        let mut form = blank_form();
        form.date_field = DateField::JournalOrStatement;
        form.start_date = NaiveDate::from_ymd_opt(2024, 3, 1);
        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 WHERE 1=1");
        DateRangeFilter.apply(&mut builder, &form);
        assert!(builder
            .sql()
            .contains("COALESCE(j.journal_date, s.invoice_date)"));
    }
}
