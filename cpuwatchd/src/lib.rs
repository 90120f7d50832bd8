pub mod agent;
pub mod alerts;
pub mod collectors;
pub mod config;
pub mod error;
pub mod notify;
pub mod types;

pub use agent::{Agent, SnapshotBuilder};
pub use alerts::{AlertEngine, EvaluationReport};
pub use config::Config;
pub use error::EvalError;
pub use notify::{NotificationSink, Notifier};
pub use types::{Alert, AlertKind, HostMetrics, ProcessSample, Snapshot, VmRecord};
