//! Entity lifecycle service.
//!
//! # Responsibility
//! - Expose single-record `activate`/`deactivate`, derived activity and
//!   soft-delete entry points.
//! - Run bulk reconciliation passes with one clock reading per pass.
//!
//! # Invariants
//! - Service APIs never bypass repository validation.
//! - Health is read at most once per call and only on read paths.

use crate::clock::{Clock, EpochMs};
use crate::health::HealthSignal;
use crate::model::activity::{ActivityFilter, ActivityWindow};
use crate::model::entity::{Activatable, Entity, EntityId, EntityKind, Visibility};
use crate::repo::entity_repo::{
    ActivityQuery, EntityListQuery, EntityRepository, EntityScope, RepoError, RepoResult,
};
use log::{error, info};
use std::sync::Arc;
use std::time::Instant;

/// Use-case service wrapper around an entity repository.
pub struct EntityService<R: EntityRepository> {
    repo: R,
    clock: Arc<dyn Clock>,
    health: HealthSignal,
}

impl<R: EntityRepository> EntityService<R> {
    pub fn new(repo: R, clock: Arc<dyn Clock>, health: HealthSignal) -> Self {
        Self {
            repo,
            clock,
            health,
        }
    }

    pub fn health(&self) -> &HealthSignal {
        &self.health
    }

    pub fn now(&self) -> EpochMs {
        self.clock.now_ms()
    }

    /// Builds an unsaved record stamped with the current time.
    pub fn new_entity(&self, kind: EntityKind) -> Entity {
        Entity::new(kind, self.now())
    }

    pub fn create(&self, entity: &Entity) -> RepoResult<EntityId> {
        self.repo.create_entity(entity)
    }

    /// Saves every mutable field and refreshes `entity.updated_at`.
    pub fn update(&self, entity: &mut Entity) -> RepoResult<()> {
        entity.updated_at = self.repo.update_entity(entity, self.now())?;
        Ok(())
    }

    pub fn get(&self, id: EntityId) -> RepoResult<Option<Entity>> {
        self.repo.get_entity(id, Visibility::Visible)
    }

    pub fn get_with_visibility(
        &self,
        id: EntityId,
        visibility: Visibility,
    ) -> RepoResult<Option<Entity>> {
        self.repo.get_entity(id, visibility)
    }

    pub fn list(&self, query: &EntityListQuery) -> RepoResult<Vec<Entity>> {
        self.repo.list_entities(query)
    }

    /// Sets the flag and persists only `is_active` + `updated_at`.
    pub fn activate(&self, entity: &mut Entity) -> RepoResult<()> {
        self.write_flag(entity, true)
    }

    /// Clears the flag and persists only `is_active` + `updated_at`.
    pub fn deactivate(&self, entity: &mut Entity) -> RepoResult<()> {
        self.write_flag(entity, false)
    }

    fn write_flag(&self, entity: &mut Entity, is_active: bool) -> RepoResult<()> {
        let updated_at = self.repo.set_active(entity.id, is_active, self.now())?;
        entity.is_active = is_active;
        entity.updated_at = updated_at;
        Ok(())
    }

    /// Read-time activity of `entity`. Never writes.
    pub fn effective_active(&self, entity: &Entity) -> bool {
        entity.effective_active(&self.health, self.now())
    }

    /// Live records that are active right now.
    pub fn list_active(&self, kind: Option<EntityKind>) -> RepoResult<Vec<Entity>> {
        self.list_by_activity(kind, ActivityFilter::Active)
    }

    /// Live records that are inactive right now.
    pub fn list_inactive(&self, kind: Option<EntityKind>) -> RepoResult<Vec<Entity>> {
        self.list_by_activity(kind, ActivityFilter::Inactive)
    }

    fn list_by_activity(
        &self,
        kind: Option<EntityKind>,
        filter: ActivityFilter,
    ) -> RepoResult<Vec<Entity>> {
        let query = EntityListQuery {
            kind,
            activity: Some(ActivityQuery {
                filter,
                workers_healthy: self.health.is_healthy(),
                now: self.now(),
            }),
            ..EntityListQuery::default()
        };
        self.repo.list_entities(&query)
    }

    pub fn bulk_activate(&self, scope: &EntityScope) -> RepoResult<usize> {
        self.repo.bulk_set_active(scope, true, self.now())
    }

    pub fn bulk_deactivate(&self, scope: &EntityScope) -> RepoResult<usize> {
        self.repo.bulk_set_active(scope, false, self.now())
    }

    pub fn bulk_set_window(&self, scope: &EntityScope, window: ActivityWindow) -> RepoResult<usize> {
        self.repo.bulk_set_window(scope, window, self.now())
    }

    /// Recomputes stored flags from activity windows across `scope`.
    ///
    /// Health is not consulted. Returns how many flags flipped.
    pub fn reconcile_activity(&self, scope: &EntityScope, batch_size: usize) -> RepoResult<usize> {
        let started_at = Instant::now();
        let now = self.now();
        let kind = scope.kind.as_ref().map_or("*", |kind| kind.as_str());

        match self.repo.reconcile_activity(scope, now, batch_size) {
            Ok(changed) => {
                info!(
                    "event=reconcile_activity module=service status=ok kind={kind} batch_size={batch_size} changed={changed} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(changed)
            }
            Err(err) => {
                error!(
                    "event=reconcile_activity module=service status=error kind={kind} duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    pub fn soft_delete(&self, entity: &mut Entity) -> RepoResult<()> {
        self.repo.soft_delete_entity(entity.id, self.now())?;
        self.reload_into(entity)
    }

    pub fn restore(&self, entity: &mut Entity) -> RepoResult<()> {
        self.repo.restore_entity(entity.id, self.now())?;
        self.reload_into(entity)
    }

    fn reload_into(&self, entity: &mut Entity) -> RepoResult<()> {
        *entity = self
            .repo
            .get_entity(entity.id, Visibility::All)?
            .ok_or(RepoError::NotFound(entity.id))?;
        Ok(())
    }
}
