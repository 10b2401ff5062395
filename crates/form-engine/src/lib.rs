#![allow(missing_docs)]

pub mod analytics;
pub mod config;
pub mod engine;
pub mod error;
pub mod navigation;
pub mod persistence;
pub mod pipeline;
pub mod resolver;
pub mod store;
pub mod tasks;
pub mod widgets;

pub use analytics::{
    AnalyticsEvent, AnalyticsRecord, AnalyticsSink, AnalyticsSummary, AnalyticsTracker,
    FieldStats, PerformanceMetrics, ScreenSummary, TimelineRecorder, TracingSink,
};
pub use config::{ConfigError, CrossFieldScope, EngineConfig};
pub use engine::{EngineBuilder, FormEngine, SubmitHandler, SubmitOutcome};
pub use error::{BoxError, EngineError, StorageError, SubmitError};
pub use navigation::{Completion, NavOutcome, NavigationController, Screen, ScreenState};
pub use persistence::{
    Exclusions, FileStore, KeyValueStore, MemoryStore, PersistedSnapshot, PersistenceManager,
};
pub use pipeline::{ASYNC_FAILURE_MESSAGE, AsyncValidator, ValidationPipeline};
pub use resolver::VisibilityResolver;
pub use store::{FieldMeta, FormEvent, FormStatus, SubscriptionId, ValueStore};
pub use tasks::{Debouncer, LatestTask};
pub use widgets::{FieldProps, Widget, WidgetAction, WidgetRegistry};

pub use form_spec;
pub use tokio_util::sync::CancellationToken;
