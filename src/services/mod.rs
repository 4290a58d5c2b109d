pub mod authorization;
pub mod database;
pub mod export;
pub mod journals;
pub mod log_events;
pub mod metrics;
pub mod notifications;
pub mod reconciler;
pub mod search;
pub mod statements;

pub use authorization::{Actor, Authorizer, Operation, Role, RoleAuthorizer};
pub use database::Database;
pub use export::{CsvJournalExporter, JournalExport, JournalExporter};
pub use journals::{JournalService, NewJournal};
pub use log_events::LogEventService;
pub use notifications::{EmailClient, NotificationSender, SmtpEmailClient};
pub use reconciler::{ReconcileRequest, Reconciler};
pub use search::{SearchForm, Searcher};
pub use statements::{NewStatement, StatementService};
