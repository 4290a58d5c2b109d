pub mod actor;
pub mod metrics;

pub use actor::RequestActor;
pub use metrics::track_http_metrics;
