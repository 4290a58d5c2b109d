pub mod admin;
pub mod health;
pub mod journals;
pub mod notifications;
pub mod reconciliation;
pub mod statements;
pub mod transactions;

pub use admin::{
    create_account, create_facility, create_order_detail, get_order_detail, list_log_events,
};
pub use health::{health_check, metrics_endpoint, readiness_check};
pub use journals::{close_journal, create_journal, get_journal};
pub use notifications::deliver_notifications;
pub use reconciliation::{reconcile, unreconcile};
pub use statements::{cancel_statement, create_statement, get_statement, remove_statement_row};
pub use transactions::search_transactions;
