// Infrastructure layer modules
pub mod logging;
pub mod orchestrator;
pub mod raw_event_store;
pub mod warehouse;

// Re-exports
pub use logging::init_logging;
pub use orchestrator::{
    AirflowTrigger, OrchestratorConfig, OrchestratorError, OrchestratorTrigger,
};
pub use raw_event_store::{
    RawEventKey, RawEventStore, RawEventStoreError, S3RawEventStore, StorageConfig,
    StorageConfigError,
};
pub use warehouse::{
    SnowflakeSink, WarehouseConfig, WarehouseConfigError, WarehouseError, WarehouseSink,
};
