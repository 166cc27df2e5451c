//! Activity maintenance tasks run by the periodic job.
//!
//! # Responsibility
//! - Reconcile one registered kind (`update_kind_activity`).
//! - Fan out one per-kind task for every concrete kind
//!   (`update_activity_status`) through a [`TaskQueue`].
//!
//! # Invariants
//! - Per-kind failures are logged and propagated, never swallowed.
//! - A failing kind never keeps the remaining kinds of a group from running.
//! - Per-kind tasks share no mutable state; each uses its own repository.

use crate::clock::Clock;
use crate::db::{open_db, DbError};
use crate::health::HealthSignal;
use crate::model::entity::EntityKind;
use crate::repo::entity_repo::{EntityScope, RepoError, SqliteEntityRepository};
use crate::scheduler::registry::{EntityTypeRegistry, TypeRegistryError};
use crate::service::entity_service::EntityService;
use log::{debug, error, info};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug)]
pub enum TaskError {
    Registry(TypeRegistryError),
    Repo(RepoError),
    Db(DbError),
    Queue(String),
}

impl Display for TaskError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Queue(message) => write!(f, "task queue failure: {message}"),
        }
    }
}

impl Error for TaskError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Registry(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Queue(_) => None,
        }
    }
}

impl From<TypeRegistryError> for TaskError {
    fn from(value: TypeRegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<RepoError> for TaskError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<DbError> for TaskError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

/// Payload of one per-kind maintenance task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindReconcileTask {
    pub kind: EntityKind,
}

/// Summary of one aggregate maintenance run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutReport {
    pub kinds: Vec<EntityKind>,
}

impl FanOutReport {
    pub fn scheduled(&self) -> usize {
        self.kinds.len()
    }

    pub fn summary(&self) -> String {
        if self.kinds.is_empty() {
            "No kinds to update".to_string()
        } else {
            format!("Started update for {} kinds", self.kinds.len())
        }
    }
}

/// Dispatch seam for per-kind tasks.
pub trait TaskQueue {
    /// Submits all tasks as one group.
    fn enqueue_group(&self, tasks: Vec<KindReconcileTask>) -> Result<(), TaskError>;
}

/// Maintenance task set bound to one kind registry.
pub struct ActivityMaintenance {
    registry: EntityTypeRegistry,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl ActivityMaintenance {
    pub fn new(registry: EntityTypeRegistry, clock: Arc<dyn Clock>, batch_size: usize) -> Self {
        Self {
            registry,
            clock,
            batch_size,
        }
    }

    pub fn registry(&self) -> &EntityTypeRegistry {
        &self.registry
    }

    /// Reconciles every live row of the kind named by `label`.
    ///
    /// Returns how many stored flags changed.
    pub fn update_kind_activity(&self, conn: &Connection, label: &str) -> Result<usize, TaskError> {
        let result = self.reconcile_kind(conn, label);
        match &result {
            Ok(changed) => debug!(
                "event=update_kind_activity module=scheduler status=ok kind={} changed={changed}",
                label.trim()
            ),
            Err(err) => error!(
                "event=update_kind_activity module=scheduler status=error kind={} error={err}",
                label.trim()
            ),
        }
        result
    }

    fn reconcile_kind(&self, conn: &Connection, label: &str) -> Result<usize, TaskError> {
        let kind = self.registry.resolve_concrete(label)?;
        let repo = SqliteEntityRepository::try_new(conn)?;
        // Reconciliation is health-independent; no probe is needed here.
        let service = EntityService::new(repo, self.clock.clone(), HealthSignal::absent());
        Ok(service.reconcile_activity(&EntityScope::of_kind(kind), self.batch_size)?)
    }

    /// Schedules one per-kind task for every concrete registered kind.
    pub fn update_activity_status(&self, queue: &dyn TaskQueue) -> Result<FanOutReport, TaskError> {
        let kinds = self.registry.concrete_kinds();
        if kinds.is_empty() {
            debug!("event=update_activity_status module=scheduler status=skip reason=no_kinds");
            return Ok(FanOutReport { kinds });
        }

        let tasks = kinds
            .iter()
            .cloned()
            .map(|kind| KindReconcileTask { kind })
            .collect();
        queue.enqueue_group(tasks)?;

        info!(
            "event=update_activity_status module=scheduler status=ok scheduled={}",
            kinds.len()
        );
        Ok(FanOutReport { kinds })
    }
}

/// Runs each task immediately, in order, on one connection.
pub struct InlineTaskQueue<'a> {
    conn: &'a Connection,
    maintenance: &'a ActivityMaintenance,
}

impl<'a> InlineTaskQueue<'a> {
    pub fn new(conn: &'a Connection, maintenance: &'a ActivityMaintenance) -> Self {
        Self { conn, maintenance }
    }
}

impl TaskQueue for InlineTaskQueue<'_> {
    fn enqueue_group(&self, tasks: Vec<KindReconcileTask>) -> Result<(), TaskError> {
        let results = tasks
            .iter()
            .map(|task| {
                self.maintenance
                    .update_kind_activity(self.conn, task.kind.as_str())
            })
            .collect();
        first_error(results)
    }
}

/// Every task has already run; reports the first failure, if any.
fn first_error(results: Vec<Result<usize, TaskError>>) -> Result<(), TaskError> {
    results.into_iter().try_for_each(|result| result.map(|_| ()))
}

/// Runs tasks on worker threads, each with its own connection to `db_path`.
///
/// At most `max_workers` tasks run at once. Kinds are disjoint scopes, so
/// tasks never contend on rows; SQLite's write lock serializes the
/// statements themselves.
pub struct ThreadedTaskQueue<'a> {
    db_path: PathBuf,
    maintenance: &'a ActivityMaintenance,
    max_workers: usize,
}

impl<'a> ThreadedTaskQueue<'a> {
    /// Bounded by the available parallelism of the host.
    pub fn new(db_path: impl Into<PathBuf>, maintenance: &'a ActivityMaintenance) -> Self {
        let max_workers = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self {
            db_path: db_path.into(),
            maintenance,
            max_workers,
        }
    }

    /// Overrides the worker bound; `0` is treated as `1`.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn run_chunk(&self, chunk: &[KindReconcileTask]) -> Vec<Result<usize, TaskError>> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|task| {
                    scope.spawn(move || -> Result<usize, TaskError> {
                        let conn = open_db(&self.db_path)?;
                        self.maintenance
                            .update_kind_activity(&conn, task.kind.as_str())
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(TaskError::Queue("maintenance worker thread panicked".to_string()))
                    })
                })
                .collect()
        })
    }
}

impl TaskQueue for ThreadedTaskQueue<'_> {
    fn enqueue_group(&self, tasks: Vec<KindReconcileTask>) -> Result<(), TaskError> {
        let results = tasks
            .chunks(self.max_workers)
            .flat_map(|chunk| self.run_chunk(chunk))
            .collect();
        first_error(results)
    }
}
