//! Maintenance CLI over a basemodel database file.
//!
//! # Responsibility
//! - Run one activity reconciliation pass on demand.
//! - Ensure the periodic maintenance job is registered.
//! - Print job and schema status for quick local checks.

use basemodel_core::db::migrations::latest_version;
use basemodel_core::db::open_db;
use basemodel_core::{
    core_version, init_logging, load_config, register_maintenance_job, ActivityMaintenance,
    BaseModelConfig, EntityRepository, EntityTypeRegistry, FanOutReport, InlineTaskQueue,
    RegistrationOutcome, SqliteEntityRepository, SqliteJobRegistrar, SystemClock,
    ThreadedTaskQueue,
};
use clap::{Parser, Subcommand};
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "basemodel", version, about = "Activity maintenance for basemodel databases")]
struct Cli {
    /// SQLite database file.
    #[arg(long)]
    db: PathBuf,

    /// Optional JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconcile activity flags for every kind stored in the database.
    Reconcile {
        /// Restrict to these kinds instead of every stored kind. Repeats are ignored.
        #[arg(long = "kind")]
        kinds: Vec<String>,
        /// Run one thread per kind.
        #[arg(long)]
        parallel: bool,
    },
    /// Ensure the periodic maintenance job exists.
    RegisterJob,
    /// Print schema version and registered jobs.
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BaseModelConfig::default(),
    };
    init_logging(&config.logging)?;

    let conn = open_db(&cli.db)?;
    info!("event=cli_run module=cli status=start command={:?}", cli.command);

    match cli.command {
        Command::Reconcile { kinds, parallel } => {
            let labels: Vec<String> = if kinds.is_empty() {
                SqliteEntityRepository::try_new(&conn)?
                    .list_kinds()?
                    .into_iter()
                    .map(|kind| kind.to_string())
                    .collect()
            } else {
                kinds
            };

            let registry = EntityTypeRegistry::from_concrete_labels(&labels)?;
            let maintenance =
                ActivityMaintenance::new(registry, Arc::new(SystemClock), config.reconcile.batch_size);

            let report: FanOutReport = if parallel {
                maintenance.update_activity_status(&ThreadedTaskQueue::new(&cli.db, &maintenance))?
            } else {
                maintenance.update_activity_status(&InlineTaskQueue::new(&conn, &maintenance))?
            };
            println!("{}", report.summary());
        }
        Command::RegisterJob => {
            let registrar = SqliteJobRegistrar::new(&conn);
            let outcome = register_maintenance_job(&registrar, &config.maintenance);
            println!("job `{}`: {}", config.maintenance.job_name, outcome_label(outcome));
        }
        Command::Status => {
            println!("basemodel_core version={}", core_version());
            println!("schema version={}", latest_version());
            for job in SqliteJobRegistrar::new(&conn).list_jobs()? {
                println!(
                    "job name={:?} task={} every_secs={} enabled={}",
                    job.name, job.task, job.every_secs, job.enabled
                );
            }
        }
    }

    Ok(())
}

fn outcome_label(outcome: RegistrationOutcome) -> &'static str {
    match outcome {
        RegistrationOutcome::Created => "created",
        RegistrationOutcome::AlreadyPresent => "already present",
        RegistrationOutcome::Skipped => "skipped",
    }
}
