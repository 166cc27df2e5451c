//! Periodic maintenance job registration.
//!
//! # Responsibility
//! - Define the contract for asking an external scheduler to run the
//!   maintenance task at a fixed interval.
//! - Ensure the job exists exactly once, keyed by name.
//!
//! # Invariants
//! - Registration never fails its caller: an absent scheduler or missing
//!   scheduler tables is logged and reported as `Skipped`.

use crate::config::MaintenanceConfig;
use crate::db::DbError;
use log::{debug, error, info};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

const SCHEDULER_TABLES: [&str; 2] = ["interval_schedules", "periodic_jobs"];

#[derive(Debug)]
pub enum RegistrarError {
    /// Scheduler storage exists but is not provisioned yet.
    MissingTable(&'static str),
    InvalidInterval,
    Db(DbError),
}

impl Display for RegistrarError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTable(table) => write!(f, "scheduler table `{table}` does not exist"),
            Self::InvalidInterval => write!(f, "job interval must be at least one second"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RegistrarError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for RegistrarError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Job definition handed to a registrar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicJob {
    pub name: String,
    pub task: String,
    pub every: Duration,
}

impl PeriodicJob {
    pub fn from_config(config: &MaintenanceConfig) -> Self {
        Self {
            name: config.job_name.clone(),
            task: config.task_name.clone(),
            every: config.interval(),
        }
    }
}

/// Result of a successful `ensure_job`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRegistration {
    Created,
    AlreadyPresent,
}

/// Outcome reported by [`register_maintenance_job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Created,
    AlreadyPresent,
    Skipped,
}

/// External scheduler seam.
pub trait PeriodicJobRegistrar {
    fn registrar_name(&self) -> &'static str;

    /// `false` when no scheduler component is installed.
    fn is_available(&self) -> bool {
        true
    }

    /// Get-or-create by job name.
    fn ensure_job(&self, job: &PeriodicJob) -> Result<JobRegistration, RegistrarError>;
}

/// Registrar used when no scheduler is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopJobRegistrar;

impl PeriodicJobRegistrar for NoopJobRegistrar {
    fn registrar_name(&self) -> &'static str {
        "noop"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn ensure_job(&self, _job: &PeriodicJob) -> Result<JobRegistration, RegistrarError> {
        Ok(JobRegistration::AlreadyPresent)
    }
}

/// Job row as stored by [`SqliteJobRegistrar`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredJob {
    pub name: String,
    pub task: String,
    pub every_secs: u64,
    pub enabled: bool,
}

/// Scheduler backed by `interval_schedules` + `periodic_jobs` tables.
pub struct SqliteJobRegistrar<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteJobRegistrar<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Lists jobs ordered by name.
    pub fn list_jobs(&self) -> Result<Vec<RegisteredJob>, RegistrarError> {
        ensure_scheduler_tables(self.conn)?;
        let mut stmt = self.conn.prepare(
            "SELECT j.name, j.task, s.every_secs, j.enabled
             FROM periodic_jobs j
             JOIN interval_schedules s ON s.id = j.schedule_id
             ORDER BY j.name ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next()? {
            jobs.push(RegisteredJob {
                name: row.get(0)?,
                task: row.get(1)?,
                every_secs: row.get(2)?,
                enabled: row.get(3)?,
            });
        }
        Ok(jobs)
    }
}

impl PeriodicJobRegistrar for SqliteJobRegistrar<'_> {
    fn registrar_name(&self) -> &'static str {
        "sqlite"
    }

    fn ensure_job(&self, job: &PeriodicJob) -> Result<JobRegistration, RegistrarError> {
        let every_secs = i64::try_from(job.every.as_secs()).unwrap_or(i64::MAX);
        if every_secs == 0 {
            return Err(RegistrarError::InvalidInterval);
        }
        ensure_scheduler_tables(self.conn)?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT OR IGNORE INTO interval_schedules (every_secs) VALUES (?1);",
            [every_secs],
        )?;
        let schedule_id: i64 = tx.query_row(
            "SELECT id FROM interval_schedules WHERE every_secs = ?1;",
            [every_secs],
            |row| row.get(0),
        )?;

        let existing = tx
            .query_row(
                "SELECT 1 FROM periodic_jobs WHERE name = ?1;",
                [job.name.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        let registration = if existing.is_some() {
            JobRegistration::AlreadyPresent
        } else {
            tx.execute(
                "INSERT INTO periodic_jobs (name, task, schedule_id, enabled, created_at)
                 VALUES (?1, ?2, ?3, 1, (strftime('%s', 'now') * 1000));",
                params![job.name.as_str(), job.task.as_str(), schedule_id],
            )?;
            JobRegistration::Created
        };
        tx.commit()?;

        Ok(registration)
    }
}

fn ensure_scheduler_tables(conn: &Connection) -> Result<(), RegistrarError> {
    for table in SCHEDULER_TABLES {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RegistrarError::MissingTable(table));
        }
    }
    Ok(())
}

/// Ensures the activity maintenance job is registered.
///
/// Failures are logged and reported as `Skipped` so that startup and
/// unrelated maintenance commands keep running.
pub fn register_maintenance_job(
    registrar: &dyn PeriodicJobRegistrar,
    config: &MaintenanceConfig,
) -> RegistrationOutcome {
    if !registrar.is_available() {
        debug!(
            "event=register_job module=scheduler status=skip registrar={} reason=scheduler_absent",
            registrar.registrar_name()
        );
        return RegistrationOutcome::Skipped;
    }

    let job = PeriodicJob::from_config(config);
    match registrar.ensure_job(&job) {
        Ok(registration) => {
            info!(
                "event=register_job module=scheduler status=ok registrar={} job={:?} every_secs={} created={}",
                registrar.registrar_name(),
                job.name,
                job.every.as_secs(),
                registration == JobRegistration::Created
            );
            match registration {
                JobRegistration::Created => RegistrationOutcome::Created,
                JobRegistration::AlreadyPresent => RegistrationOutcome::AlreadyPresent,
            }
        }
        Err(err) => {
            error!(
                "event=register_job module=scheduler status=error registrar={} job={:?} error={err}",
                registrar.registrar_name(),
                job.name
            );
            RegistrationOutcome::Skipped
        }
    }
}
