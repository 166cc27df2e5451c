//! Activity policy: derive "is this entity active right now".
//!
//! # Responsibility
//! - Evaluate the effective activity of one record from its stored flag,
//!   its activity window and the worker health signal.
//! - Express the same rule as composable SQL so bulk filters and the
//!   reconciliation pass never fetch rows into application code.
//!
//! # Invariants
//! - Window bounds are inclusive on both ends.
//! - With no bounds at all, the stored flag is the only signal.
//! - Healthy workers make the stored flag authoritative for reads.
//! - Reconciliation ignores health entirely.

use crate::clock::EpochMs;
use serde::{Deserialize, Serialize};

/// Closed interval `[start, end]` bounding validity. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityWindow {
    pub start: Option<EpochMs>,
    pub end: Option<EpochMs>,
}

impl ActivityWindow {
    pub fn new(start: Option<EpochMs>, end: Option<EpochMs>) -> Self {
        Self { start, end }
    }

    /// Window with neither bound set.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// `false` only when both bounds are set and `end < start`.
    pub fn is_ordered(&self) -> bool {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end >= start,
            _ => true,
        }
    }

    /// Returns whether `now` falls inside the window. Missing bounds are open.
    pub fn contains(&self, now: EpochMs) -> bool {
        self.start.map_or(true, |start| start <= now) && self.end.map_or(true, |end| end >= now)
    }
}

/// The three stored signals that feed the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySignals {
    pub is_active: bool,
    pub window: ActivityWindow,
}

impl ActivitySignals {
    pub fn new(is_active: bool, window: ActivityWindow) -> Self {
        Self { is_active, window }
    }

    /// Read-time activity.
    ///
    /// Healthy workers keep the flag reconciled, so it is trusted as-is.
    /// Otherwise the window decides, unless there is no window.
    pub fn effective_active(&self, now: EpochMs, workers_healthy: bool) -> bool {
        if workers_healthy || self.window.is_unbounded() {
            return self.is_active;
        }
        self.window.contains(now)
    }

    /// Flag value a reconciliation pass would store at `now`.
    pub fn reconciled_flag(&self, now: EpochMs) -> bool {
        if self.window.is_unbounded() {
            return self.is_active;
        }
        self.window.contains(now)
    }
}

/// Set-based activity filter for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityFilter {
    Active,
    Inactive,
}

impl ActivityFilter {
    /// Boolean SQL condition over `is_active`, `active_start`, `active_end`.
    ///
    /// `now_param` is the placeholder bound to the evaluation time (for
    /// example `?3`); it may appear several times but binds one value.
    /// The condition never evaluates to NULL, so negation is exact.
    pub fn condition_sql(self, workers_healthy: bool, now_param: &str) -> String {
        match (self, workers_healthy) {
            (Self::Active, true) => "is_active = 1".to_string(),
            (Self::Inactive, true) => "is_active = 0".to_string(),
            (Self::Active, false) => active_condition_sql(now_param),
            (Self::Inactive, false) => format!("NOT {}", active_condition_sql(now_param)),
        }
    }
}

fn active_condition_sql(now: &str) -> String {
    format!(
        "((is_active = 1 AND active_start IS NULL AND active_end IS NULL)
          OR (active_start IS NOT NULL AND active_end IS NOT NULL
              AND active_start <= {now} AND active_end >= {now})
          OR (active_start IS NOT NULL AND active_end IS NULL AND active_start <= {now})
          OR (active_start IS NULL AND active_end IS NOT NULL AND active_end >= {now}))"
    )
}

/// Rows the reconciliation pass may touch: at least one bound set.
pub const WINDOWED_ROWS_SQL: &str = "(active_start IS NOT NULL OR active_end IS NOT NULL)";

/// `CASE` expression computing the reconciled flag for windowed rows.
///
/// Only meaningful together with [`WINDOWED_ROWS_SQL`]; rows without a
/// window keep their flag and are never selected.
pub fn reconciled_flag_sql(now: &str) -> String {
    format!(
        "(CASE
            WHEN active_start IS NOT NULL AND active_end IS NOT NULL
                THEN (active_start <= {now} AND active_end >= {now})
            WHEN active_start IS NOT NULL
                THEN (active_start <= {now})
            ELSE (active_end >= {now})
         END)"
    )
}
