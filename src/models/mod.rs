//! Domain models for facility-billing-service.

pub mod account;
pub mod journal;
pub mod log_event;
pub mod order_detail;
pub mod statement;

pub use account::{Account, AccountKind, Facility};
pub use journal::{Journal, JournalCutoffDate, JournalRow, JournalStatus};
pub use log_event::{EventType, LogEvent};
pub use order_detail::{OrderDetail, OrderDetailScope, OrderState, ReconcileCandidate};
pub use statement::{Statement, StatementReconciliation};
