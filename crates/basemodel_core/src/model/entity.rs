//! Base entity record and its capability traits.
//!
//! # Responsibility
//! - Define the canonical record shared by every concrete entity kind.
//! - Compose soft-delete, polymorphism and activity as separate
//!   capabilities implemented on one record type.
//!
//! # Invariants
//! - `id` is stable, non-nil and never reused.
//! - `deletion` is the source of truth for tombstone state.
//! - `active_end` is never earlier than `active_start` when both are set.
//! - `updated_at >= created_at`.

use crate::clock::EpochMs;
use crate::health::HealthSignal;
use crate::model::activity::{ActivitySignals, ActivityWindow};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of one entity row.
pub type EntityId = Uuid;

/// Validation failure reported at write-validation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    NilId,
    InvalidKind(String),
    InvalidActivityWindow { start: EpochMs, end: EpochMs },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "entity id must not be nil"),
            Self::InvalidKind(label) => write!(
                f,
                "entity kind `{label}` must be dot-separated lowercase segments"
            ),
            Self::InvalidActivityWindow { start, end } => write!(
                f,
                "active_end ({end}) must be >= active_start ({start})"
            ),
        }
    }
}

impl Error for ValidationError {}

/// Polymorphic type discriminator, e.g. `catalog.product`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EntityKind(String);

impl EntityKind {
    /// Parses a kind label; surrounding whitespace is trimmed.
    pub fn parse(label: &str) -> Result<Self, ValidationError> {
        let normalized = label.trim();
        if !is_valid_kind_label(normalized) {
            return Err(ValidationError::InvalidKind(normalized.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EntityKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

fn is_valid_kind_label(value: &str) -> bool {
    !value.is_empty()
        && value.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        })
}

/// Soft-delete state of one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "at")]
pub enum DeletionState {
    #[default]
    Live,
    Deleted(EpochMs),
}

impl DeletionState {
    pub fn from_deleted_at(deleted_at: Option<EpochMs>) -> Self {
        deleted_at.map_or(Self::Live, Self::Deleted)
    }

    pub fn deleted_at(self) -> Option<EpochMs> {
        match self {
            Self::Live => None,
            Self::Deleted(at) => Some(at),
        }
    }
}

/// Which rows a read or bulk write can see, relative to soft-deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Deleted rows hidden.
    #[default]
    Visible,
    /// Deleted rows included.
    All,
    DeletedOnly,
}

impl Visibility {
    pub(crate) fn condition_sql(self) -> Option<&'static str> {
        match self {
            Self::Visible => Some("deleted_at IS NULL"),
            Self::All => None,
            Self::DeletedOnly => Some("deleted_at IS NOT NULL"),
        }
    }
}

/// Soft-delete capability.
pub trait SoftDeletable {
    fn deletion(&self) -> DeletionState;

    fn set_deletion(&mut self, state: DeletionState);

    fn is_deleted(&self) -> bool {
        matches!(self.deletion(), DeletionState::Deleted(_))
    }

    /// Tombstones the record; the first deletion time is kept.
    fn soft_delete(&mut self, now: EpochMs) {
        if !self.is_deleted() {
            self.set_deletion(DeletionState::Deleted(now));
        }
    }

    fn restore(&mut self) {
        self.set_deletion(DeletionState::Live);
    }
}

/// Type-polymorphism capability.
pub trait Polymorphic {
    fn kind(&self) -> &EntityKind;

    fn is_kind(&self, kind: &EntityKind) -> bool {
        self.kind() == kind
    }
}

/// Time-windowed activity capability.
pub trait Activatable {
    fn activity(&self) -> ActivitySignals;

    /// Read-time activity: stored flag when workers are healthy, the window
    /// otherwise. Never writes.
    fn effective_active(&self, health: &HealthSignal, now: EpochMs) -> bool {
        self.activity().effective_active(now, health.is_healthy())
    }
}

/// Canonical base record for every concrete entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EntityWire")]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub created_at: EpochMs,
    pub updated_at: EpochMs,
    pub is_active: bool,
    pub active_start: Option<EpochMs>,
    pub active_end: Option<EpochMs>,
    pub deletion: DeletionState,
    /// Fields owned by the concrete kind.
    pub attributes: Map<String, Value>,
}

impl Entity {
    /// Creates an active, unwindowed, live record with a generated id.
    pub fn new(kind: EntityKind, now: EpochMs) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            created_at: now,
            updated_at: now,
            is_active: true,
            active_start: None,
            active_end: None,
            deletion: DeletionState::Live,
            attributes: Map::new(),
        }
    }

    /// Creates a record with a caller-provided id (import paths).
    pub fn with_id(id: EntityId, kind: EntityKind, now: EpochMs) -> Result<Self, ValidationError> {
        if id.is_nil() {
            return Err(ValidationError::NilId);
        }
        let mut entity = Self::new(kind, now);
        entity.id = id;
        Ok(entity)
    }

    pub fn window(&self) -> ActivityWindow {
        ActivityWindow::new(self.active_start, self.active_end)
    }

    pub fn set_window(&mut self, window: ActivityWindow) {
        self.active_start = window.start;
        self.active_end = window.end;
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Checks record invariants. Equal bounds are a valid one-instant window.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_nil() {
            return Err(ValidationError::NilId);
        }
        if let (Some(start), Some(end)) = (self.active_start, self.active_end) {
            if end < start {
                return Err(ValidationError::InvalidActivityWindow { start, end });
            }
        }
        Ok(())
    }
}

impl SoftDeletable for Entity {
    fn deletion(&self) -> DeletionState {
        self.deletion
    }

    fn set_deletion(&mut self, state: DeletionState) {
        self.deletion = state;
    }
}

impl Polymorphic for Entity {
    fn kind(&self) -> &EntityKind {
        &self.kind
    }
}

impl Activatable for Entity {
    fn activity(&self) -> ActivitySignals {
        ActivitySignals::new(self.is_active, self.window())
    }
}

#[derive(Deserialize)]
struct EntityWire {
    id: EntityId,
    kind: EntityKind,
    created_at: EpochMs,
    updated_at: EpochMs,
    is_active: bool,
    active_start: Option<EpochMs>,
    active_end: Option<EpochMs>,
    #[serde(default)]
    deletion: DeletionState,
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl TryFrom<EntityWire> for Entity {
    type Error = ValidationError;

    fn try_from(wire: EntityWire) -> Result<Self, Self::Error> {
        let entity = Self {
            id: wire.id,
            kind: wire.kind,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
            is_active: wire.is_active,
            active_start: wire.active_start,
            active_end: wire.active_end,
            deletion: wire.deletion,
            attributes: wire.attributes,
        };
        entity.validate()?;
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityKind, ValidationError};

    #[test]
    fn kind_accepts_dotted_lowercase_labels() {
        assert_eq!(
            EntityKind::parse(" catalog.product ").expect("valid label").as_str(),
            "catalog.product"
        );
        assert!(EntityKind::parse("billing_v2.invoice_line").is_ok());
    }

    #[test]
    fn kind_rejects_malformed_labels() {
        for label in ["", "Catalog.Product", "catalog..product", "catalog.", "cat alog"] {
            let err = EntityKind::parse(label).expect_err("label must be rejected");
            assert!(matches!(err, ValidationError::InvalidKind(_)));
        }
    }
}
