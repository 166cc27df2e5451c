//! Scheduler glue for periodic activity maintenance.
//!
//! The scheduler itself is external. This module only defines the seams it
//! is reached through (job registrar, task queue) and the maintenance tasks
//! it runs.

pub mod registrar;
pub mod registry;
pub mod tasks;
