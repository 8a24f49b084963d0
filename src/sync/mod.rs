pub mod client;
pub mod config;
pub mod coordinator;
pub mod reconcile;
pub mod remote;
pub mod scheduler;

pub use client::{HttpRemote, RemoteError, RemoteStore, SyncResponse};
pub use config::{CacheKind, ConfigError, Connectivity, RemoteBackend, SyncConfig, SyncStatus};
pub use coordinator::{
    CoordinatorError, Effect, EffectRunner, ImportSummary, NoteEdit, Outcome, StateCoordinator,
    TextExport,
};
pub use remote::{InProcessRemote, RemoteCollection, SharedCollection};
pub use scheduler::{
    spawn_coordinator, Clock, CoordinatorHandle, DriverStopped, ManualClock, SystemClock,
};
