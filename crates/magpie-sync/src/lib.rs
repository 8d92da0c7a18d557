mod caller;
mod catalog;
mod engine;
mod events;
mod queue;
mod reconcile;
mod resolver;
mod rpc;

pub use caller::{ApiCaller, CallMethod, CallSpec, RetryBudget};
pub use catalog::{
    CATALOG_FLUSH_DEBOUNCE, CATALOG_MAX_ENTRIES, CATALOG_RETENTION_DAYS, EndpointCatalog,
};
pub use engine::{
    ApplyEventsReport, AuthStatus, EngineOptions, FULL_SYNC_THROTTLE_SECS, MaintenanceReport,
    MirrorEngine, ObserveOutcome, SOFT_SYNC_THROTTLE_SECS, SyncReport,
};
pub use events::{
    EVENT_COALESCE_WINDOW_MS, EVENT_MAX_AGE_HOURS, EVENT_QUEUE_MAX, EventPipeline, EventPlan,
    resolve_bookmark_event_plan,
};
pub use queue::{FetchQueue, Pacing, QueueTask, TaskHandle};
pub use reconcile::{ReconcileOutcome, reconcile};
pub use resolver::{EndpointResolver, QUERY_ID_TTL};
pub use rpc::{Request, Response, dispatch};
