//! Registry of entity kinds participating in activity maintenance.

use crate::model::entity::{EntityKind, ValidationError};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Kind registration/lookup errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRegistryError {
    InvalidKind(ValidationError),
    DuplicateKind(String),
    UnknownKind(String),
    /// Abstract kinds have no rows of their own.
    AbstractKind(String),
}

impl Display for TypeRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKind(err) => write!(f, "{err}"),
            Self::DuplicateKind(label) => write!(f, "entity kind already registered: {label}"),
            Self::UnknownKind(label) => write!(f, "entity kind not registered: {label}"),
            Self::AbstractKind(label) => write!(f, "entity kind is abstract: {label}"),
        }
    }
}

impl Error for TypeRegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidKind(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for TypeRegistryError {
    fn from(value: ValidationError) -> Self {
        Self::InvalidKind(value)
    }
}

/// One registered entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeInfo {
    pub kind: EntityKind,
    pub is_abstract: bool,
}

/// In-process registry of entity kinds, ordered by label.
#[derive(Debug, Default)]
pub struct EntityTypeRegistry {
    types: BTreeMap<EntityKind, EntityTypeInfo>,
}

impl EntityTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry of concrete kinds from labels. A label repeated
    /// after trimming is registered once.
    pub fn from_concrete_labels<I, S>(labels: I) -> Result<Self, TypeRegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let kinds = labels
            .into_iter()
            .map(|label| EntityKind::parse(label.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()?;

        let mut registry = Self::new();
        for kind in kinds {
            registry.register(EntityTypeInfo {
                kind,
                is_abstract: false,
            })?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, info: EntityTypeInfo) -> Result<(), TypeRegistryError> {
        if self.types.contains_key(&info.kind) {
            return Err(TypeRegistryError::DuplicateKind(info.kind.to_string()));
        }
        self.types.insert(info.kind.clone(), info);
        Ok(())
    }

    /// Registers a kind that owns rows and takes part in maintenance.
    pub fn register_concrete(&mut self, label: &str) -> Result<EntityKind, TypeRegistryError> {
        let kind = EntityKind::parse(label)?;
        self.register(EntityTypeInfo {
            kind: kind.clone(),
            is_abstract: false,
        })?;
        Ok(kind)
    }

    /// Registers a grouping kind that is skipped by maintenance.
    pub fn register_abstract(&mut self, label: &str) -> Result<EntityKind, TypeRegistryError> {
        let kind = EntityKind::parse(label)?;
        self.register(EntityTypeInfo {
            kind: kind.clone(),
            is_abstract: true,
        })?;
        Ok(kind)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&EntityTypeInfo> {
        let kind = EntityKind::parse(label).ok()?;
        self.types.get(&kind)
    }

    /// Resolves a label to a concrete registered kind.
    pub fn resolve_concrete(&self, label: &str) -> Result<EntityKind, TypeRegistryError> {
        let info = self
            .get(label)
            .ok_or_else(|| TypeRegistryError::UnknownKind(label.trim().to_string()))?;
        if info.is_abstract {
            return Err(TypeRegistryError::AbstractKind(info.kind.to_string()));
        }
        Ok(info.kind.clone())
    }

    /// Concrete kinds in label order.
    pub fn concrete_kinds(&self) -> Vec<EntityKind> {
        self.types
            .values()
            .filter(|info| !info.is_abstract)
            .map(|info| info.kind.clone())
            .collect()
    }
}
