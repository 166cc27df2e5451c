//! Worker-pool health signal consumed by the activity policy.
//!
//! # Responsibility
//! - Define the probe contract for "are maintenance workers alive".
//! - Normalize every probe failure to "unhealthy" at one boundary.
//!
//! # Invariants
//! - `HealthSignal::is_healthy()` never fails and never panics.
//! - An absent probe is a valid state and reads as unhealthy.
//! - Probe failures are logged locally, never returned to policy callers.

use crate::clock::{Clock, EpochMs};
use crate::config::HealthConfig;
use log::{log, warn, Level};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Failure raised inside a probe implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckError {
    /// Probe exists but has no data source yet.
    NotInitialized(&'static str),
    /// Probe backend failed while answering.
    Unavailable(String),
}

impl Display for HealthCheckError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized(probe) => write!(f, "health probe `{probe}` is not initialized"),
            Self::Unavailable(message) => write!(f, "health probe unavailable: {message}"),
        }
    }
}

impl Error for HealthCheckError {}

impl HealthCheckError {
    /// A probe still waiting for its first data point is expected at
    /// startup and only warrants a warning.
    pub fn log_level(&self) -> Level {
        match self {
            Self::NotInitialized(_) => Level::Warn,
            Self::Unavailable(_) => Level::Error,
        }
    }
}

/// Probe contract implemented by worker-pool integrations.
pub trait WorkerHealthCheck: Send + Sync {
    /// Short stable name used in diagnostics.
    fn probe_name(&self) -> &'static str;

    fn check(&self) -> Result<bool, HealthCheckError>;
}

/// Injected health capability with an explicit "absent" state.
#[derive(Clone, Default)]
pub struct HealthSignal {
    probe: Option<Arc<dyn WorkerHealthCheck>>,
}

impl HealthSignal {
    pub fn new(probe: Arc<dyn WorkerHealthCheck>) -> Self {
        Self { probe: Some(probe) }
    }

    /// No probe wired; every read falls back to the activity window.
    pub fn absent() -> Self {
        Self { probe: None }
    }

    /// Fixed answer, for deployments without a worker pool and for tests.
    pub fn fixed(healthy: bool) -> Self {
        Self::new(Arc::new(StaticHealthCheck::new(healthy)))
    }

    pub fn is_present(&self) -> bool {
        self.probe.is_some()
    }

    pub fn is_healthy(&self) -> bool {
        let Some(probe) = self.probe.as_ref() else {
            warn!(
                "event=health_check module=health status=skip reason=probe_absent healthy=false"
            );
            return false;
        };

        match probe.check() {
            Ok(healthy) => healthy,
            Err(err) => {
                let status = match err.log_level() {
                    Level::Error => "error",
                    _ => "skip",
                };
                log!(
                    err.log_level(),
                    "event=health_check module=health status={status} probe={} healthy=false error={}",
                    probe.probe_name(),
                    err
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for HealthSignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthSignal")
            .field("probe", &self.probe.as_ref().map(|probe| probe.probe_name()))
            .finish()
    }
}

/// Probe that always returns the configured answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticHealthCheck {
    healthy: bool,
}

impl StaticHealthCheck {
    pub fn new(healthy: bool) -> Self {
        Self { healthy }
    }
}

impl WorkerHealthCheck for StaticHealthCheck {
    fn probe_name(&self) -> &'static str {
        "static"
    }

    fn check(&self) -> Result<bool, HealthCheckError> {
        Ok(self.healthy)
    }
}

/// Probe fed by worker heartbeats.
///
/// Workers call [`HeartbeatHealthCheck::record_heartbeat`] on every cycle;
/// the pool is healthy while the latest beat is no older than `max_age`.
pub struct HeartbeatHealthCheck {
    clock: Arc<dyn Clock>,
    max_age_ms: i64,
    last_beat: Mutex<Option<EpochMs>>,
}

impl HeartbeatHealthCheck {
    pub fn new(clock: Arc<dyn Clock>, max_age: Duration) -> Self {
        Self {
            clock,
            max_age_ms: i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX),
            last_beat: Mutex::new(None),
        }
    }

    pub fn from_config(clock: Arc<dyn Clock>, config: &HealthConfig) -> Self {
        Self::new(clock, config.heartbeat_max_age())
    }

    /// Records one worker heartbeat at the current clock time.
    pub fn record_heartbeat(&self) -> Result<(), HealthCheckError> {
        let now = self.clock.now_ms();
        let mut last_beat = self.last_beat.lock().map_err(|_| {
            HealthCheckError::Unavailable("heartbeat state lock poisoned".to_string())
        })?;
        // Out-of-order beats never move the mark backwards.
        *last_beat = Some(last_beat.map_or(now, |previous| previous.max(now)));
        Ok(())
    }

    pub fn last_heartbeat(&self) -> Option<EpochMs> {
        self.last_beat.lock().ok().and_then(|guard| *guard)
    }
}

impl WorkerHealthCheck for HeartbeatHealthCheck {
    fn probe_name(&self) -> &'static str {
        "heartbeat"
    }

    fn check(&self) -> Result<bool, HealthCheckError> {
        let last_beat = self.last_beat.lock().map_err(|_| {
            HealthCheckError::Unavailable("heartbeat state lock poisoned".to_string())
        })?;
        let Some(last_beat) = *last_beat else {
            return Err(HealthCheckError::NotInitialized("heartbeat"));
        };
        Ok(self.clock.now_ms().saturating_sub(last_beat) <= self.max_age_ms)
    }
}
