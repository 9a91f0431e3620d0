pub mod error;
pub mod event_log;
pub mod loader;
pub mod reconcile;
pub mod replica;

pub use error::StoreError;
pub use event_log::{EventLog, LoggedEvent};
pub use loader::{HydrateReport, SnapshotLoader, SnapshotSource};
pub use reconcile::{ApplyOutcome, ReconcileStats, Reconciler};
pub use replica::{Replica, ReplicaStore, DEFAULT_EVENT_LOG_CAPACITY};
