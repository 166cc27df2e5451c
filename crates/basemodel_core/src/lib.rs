//! Activity-aware base entity core.
//! Soft-delete, kind polymorphism and time-windowed activity for stored
//! records, plus the maintenance pass that keeps activity flags reconciled.

pub mod clock;
pub mod config;
pub mod db;
pub mod health;
pub mod logging;
pub mod model;
pub mod repo;
pub mod scheduler;
pub mod service;

pub use clock::{Clock, EpochMs, FixedClock, SystemClock};
pub use config::{
    load_config, BaseModelConfig, ConfigError, HealthConfig, LoggingConfig, MaintenanceConfig,
    ReconcileConfig,
};
pub use health::{
    HealthCheckError, HealthSignal, HeartbeatHealthCheck, StaticHealthCheck, WorkerHealthCheck,
};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::activity::{ActivityFilter, ActivitySignals, ActivityWindow};
pub use model::entity::{
    Activatable, DeletionState, Entity, EntityId, EntityKind, Polymorphic, SoftDeletable,
    ValidationError, Visibility,
};
pub use repo::entity_repo::{
    ActivityQuery, EntityListQuery, EntityRepository, EntityScope, RepoError, RepoResult,
    SqliteEntityRepository,
};
pub use scheduler::registrar::{
    register_maintenance_job, JobRegistration, NoopJobRegistrar, PeriodicJob,
    PeriodicJobRegistrar, RegisteredJob, RegistrarError, RegistrationOutcome, SqliteJobRegistrar,
};
pub use scheduler::registry::{EntityTypeInfo, EntityTypeRegistry, TypeRegistryError};
pub use scheduler::tasks::{
    ActivityMaintenance, FanOutReport, InlineTaskQueue, KindReconcileTask, TaskError, TaskQueue,
    ThreadedTaskQueue,
};
pub use service::entity_service::EntityService;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
