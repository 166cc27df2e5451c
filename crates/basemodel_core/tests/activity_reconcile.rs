use basemodel_core::db::open_db_in_memory;
use basemodel_core::{
    ActivityWindow, Entity, EntityKind, EntityRepository, EntityScope, EntityService, FixedClock,
    HealthSignal, RepoError, SqliteEntityRepository, ValidationError, Visibility,
};
use rusqlite::{params, Connection};
use std::sync::Arc;
use uuid::Uuid;

const NOW: i64 = 1_700_000_000_000;
const DAY: i64 = 86_400_000;
const BATCH: usize = 1_000;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn service(conn: &Connection, health: HealthSignal) -> EntityService<SqliteEntityRepository<'_>> {
    let repo = SqliteEntityRepository::try_new(conn).unwrap();
    EntityService::new(repo, Arc::new(FixedClock::new(NOW)), health)
}

fn kind(label: &str) -> EntityKind {
    EntityKind::parse(label).unwrap()
}

fn insert(
    conn: &Connection,
    label: &str,
    is_active: bool,
    start: Option<i64>,
    end: Option<i64>,
) -> Entity {
    let repo = SqliteEntityRepository::try_new(conn).unwrap();
    let mut entity = Entity::new(kind(label), NOW - 7 * DAY);
    entity.is_active = is_active;
    entity.set_window(ActivityWindow::new(start, end));
    repo.create_entity(&entity).unwrap();
    entity
}

fn stored(conn: &Connection, id: Uuid) -> Entity {
    SqliteEntityRepository::try_new(conn)
        .unwrap()
        .get_entity(id, Visibility::All)
        .unwrap()
        .unwrap()
}

fn ids(entities: &[Entity]) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = entities.iter().map(|entity| entity.id).collect();
    ids.sort();
    ids
}

fn sorted(mut ids: Vec<Uuid>) -> Vec<Uuid> {
    ids.sort();
    ids
}

#[test]
fn reconcile_flips_flags_to_match_windows() {
    let conn = setup();
    let started = insert(&conn, "catalog.product", false, Some(NOW - 2 * DAY), None);
    let expired = insert(&conn, "catalog.product", true, None, Some(NOW - DAY));
    let unbounded = insert(&conn, "catalog.product", true, None, None);

    let service = service(&conn, HealthSignal::absent());
    let changed = service
        .reconcile_activity(&EntityScope::of_kind(kind("catalog.product")), BATCH)
        .unwrap();

    assert_eq!(changed, 2);
    assert!(stored(&conn, started.id).is_active);
    assert!(!stored(&conn, expired.id).is_active);
    assert!(stored(&conn, unbounded.id).is_active);
}

#[test]
fn reconcile_covers_all_bound_combinations() {
    let conn = setup();
    let both_inside = insert(&conn, "catalog.product", false, Some(NOW - DAY), Some(NOW + DAY));
    let both_future = insert(&conn, "catalog.product", true, Some(NOW + DAY), Some(NOW + 2 * DAY));
    let start_future = insert(&conn, "catalog.product", true, Some(NOW + DAY), None);
    let end_future = insert(&conn, "catalog.product", false, None, Some(NOW + DAY));
    let edge_start = insert(&conn, "catalog.product", false, Some(NOW), None);
    let edge_end = insert(&conn, "catalog.product", false, None, Some(NOW));
    let unbounded_off = insert(&conn, "catalog.product", false, None, None);

    let service = service(&conn, HealthSignal::absent());
    service
        .reconcile_activity(&EntityScope::of_kind(kind("catalog.product")), BATCH)
        .unwrap();

    assert!(stored(&conn, both_inside.id).is_active);
    assert!(!stored(&conn, both_future.id).is_active);
    assert!(!stored(&conn, start_future.id).is_active);
    assert!(stored(&conn, end_future.id).is_active);
    assert!(stored(&conn, edge_start.id).is_active);
    assert!(stored(&conn, edge_end.id).is_active);
    assert!(!stored(&conn, unbounded_off.id).is_active);
}

#[test]
fn reconcile_is_idempotent_and_reports_only_flipped_rows() {
    let conn = setup();
    insert(&conn, "catalog.product", false, Some(NOW - DAY), None);
    insert(&conn, "catalog.product", true, Some(NOW - DAY), None);

    let service = service(&conn, HealthSignal::absent());
    let scope = EntityScope::of_kind(kind("catalog.product"));
    assert_eq!(service.reconcile_activity(&scope, BATCH).unwrap(), 1);
    assert_eq!(service.reconcile_activity(&scope, BATCH).unwrap(), 0);
}

#[test]
fn reconcile_never_touches_updated_at() {
    let conn = setup();
    let entity = insert(&conn, "catalog.product", false, Some(NOW - DAY), None);

    let service = service(&conn, HealthSignal::absent());
    service
        .reconcile_activity(&EntityScope::of_kind(kind("catalog.product")), BATCH)
        .unwrap();

    let after = stored(&conn, entity.id);
    assert!(after.is_active);
    assert_eq!(after.updated_at, entity.updated_at);
}

#[test]
fn reconcile_ignores_worker_health() {
    for health in [HealthSignal::fixed(true), HealthSignal::fixed(false), HealthSignal::absent()] {
        let conn = setup();
        let entity = insert(&conn, "catalog.product", true, None, Some(NOW - DAY));

        let changed = service(&conn, health)
            .reconcile_activity(&EntityScope::of_kind(kind("catalog.product")), BATCH)
            .unwrap();
        assert_eq!(changed, 1);
        assert!(!stored(&conn, entity.id).is_active);
    }
}

#[test]
fn reconcile_skips_soft_deleted_rows_by_default() {
    let conn = setup();
    let entity = insert(&conn, "catalog.product", false, Some(NOW - DAY), None);
    SqliteEntityRepository::try_new(&conn)
        .unwrap()
        .soft_delete_entity(entity.id, NOW)
        .unwrap();

    let service = service(&conn, HealthSignal::absent());
    let changed = service
        .reconcile_activity(&EntityScope::of_kind(kind("catalog.product")), BATCH)
        .unwrap();
    assert_eq!(changed, 0);
    assert!(!stored(&conn, entity.id).is_active);

    let everything = EntityScope {
        visibility: Visibility::All,
        ..EntityScope::of_kind(kind("catalog.product"))
    };
    assert_eq!(service.reconcile_activity(&everything, BATCH).unwrap(), 1);
}

#[test]
fn reconcile_is_scoped_to_one_kind() {
    let conn = setup();
    let product = insert(&conn, "catalog.product", false, Some(NOW - DAY), None);
    let banner = insert(&conn, "promo.banner", false, Some(NOW - DAY), None);

    let service = service(&conn, HealthSignal::absent());
    let changed = service
        .reconcile_activity(&EntityScope::of_kind(kind("catalog.product")), BATCH)
        .unwrap();

    assert_eq!(changed, 1);
    assert!(stored(&conn, product.id).is_active);
    assert!(!stored(&conn, banner.id).is_active);
}

#[test]
fn reconcile_explicit_ids_in_batches() {
    let conn = setup();
    let targets: Vec<Entity> = (0..5)
        .map(|_| insert(&conn, "catalog.product", false, Some(NOW - DAY), None))
        .collect();
    let untouched = insert(&conn, "catalog.product", false, Some(NOW - DAY), None);

    let service = service(&conn, HealthSignal::absent());
    let scope = EntityScope::of_ids(targets.iter().map(|entity| entity.id).collect());
    assert_eq!(service.reconcile_activity(&scope, 2).unwrap(), 5);

    for entity in &targets {
        assert!(stored(&conn, entity.id).is_active);
    }
    assert!(!stored(&conn, untouched.id).is_active);
}

/// Inserts `count` pending rows of one kind in a single transaction.
fn insert_many_pending(conn: &Connection, count: usize) -> Vec<Uuid> {
    let tx = conn.unchecked_transaction().unwrap();
    let mut ids = Vec::with_capacity(count);
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO entities (id, kind, created_at, updated_at, is_active, active_start)
                 VALUES (?1, 'catalog.product', ?2, ?2, 0, ?3);",
            )
            .unwrap();
        for _ in 0..count {
            let id = Uuid::new_v4();
            stmt.execute(params![id.to_string(), NOW - DAY, NOW - DAY])
                .unwrap();
            ids.push(id);
        }
    }
    tx.commit().unwrap();
    ids
}

#[test]
fn reconcile_large_id_set_with_oversized_batch_size() {
    let conn = setup();
    let ids = insert_many_pending(&conn, 40_000);

    let service = service(&conn, HealthSignal::absent());
    let scope = EntityScope::of_ids(ids);
    assert_eq!(service.reconcile_activity(&scope, 50_000).unwrap(), 40_000);
    assert_eq!(service.reconcile_activity(&scope, 50_000).unwrap(), 0);
}

#[test]
fn bulk_writes_accept_large_id_sets() {
    let conn = setup();
    let ids = insert_many_pending(&conn, 35_000);

    let service = service(&conn, HealthSignal::absent());
    let scope = EntityScope::of_ids(ids);
    assert_eq!(service.bulk_activate(&scope).unwrap(), 35_000);
    assert_eq!(
        service
            .bulk_set_window(&scope, ActivityWindow::new(None, Some(NOW + DAY)))
            .unwrap(),
        35_000
    );
}

#[test]
fn reconcile_empty_id_set_changes_nothing() {
    let conn = setup();
    insert(&conn, "catalog.product", false, Some(NOW - DAY), None);

    let service = service(&conn, HealthSignal::absent());
    let changed = service
        .reconcile_activity(&EntityScope::of_ids(Vec::new()), BATCH)
        .unwrap();
    assert_eq!(changed, 0);
}

#[test]
fn reconcile_rejects_zero_batch_size() {
    let conn = setup();
    let service = service(&conn, HealthSignal::absent());
    let err = service
        .reconcile_activity(&EntityScope::default(), 0)
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidBatchSize));
}

struct Fixture {
    /// Unbounded, flag on.
    a: Entity,
    /// Unbounded, flag off.
    b: Entity,
    /// Flag on, window expired.
    c: Entity,
    /// Flag off, window open.
    d: Entity,
}

fn list_fixture(conn: &Connection) -> Fixture {
    Fixture {
        a: insert(conn, "catalog.product", true, None, None),
        b: insert(conn, "catalog.product", false, None, None),
        c: insert(conn, "catalog.product", true, Some(NOW - 2 * DAY), Some(NOW - DAY)),
        d: insert(conn, "catalog.product", false, Some(NOW - DAY), Some(NOW + DAY)),
    }
}

#[test]
fn list_active_uses_flag_when_workers_are_healthy() {
    let conn = setup();
    let fx = list_fixture(&conn);
    let service = service(&conn, HealthSignal::fixed(true));

    let active = service.list_active(None).unwrap();
    let inactive = service.list_inactive(None).unwrap();

    assert_eq!(ids(&active), sorted(vec![fx.a.id, fx.c.id]));
    assert_eq!(ids(&inactive), sorted(vec![fx.b.id, fx.d.id]));
}

#[test]
fn list_active_uses_window_when_workers_are_unhealthy() {
    for health in [HealthSignal::fixed(false), HealthSignal::absent()] {
        let conn = setup();
        let fx = list_fixture(&conn);
        let service = service(&conn, health);

        let active = service.list_active(None).unwrap();
        let inactive = service.list_inactive(None).unwrap();

        assert_eq!(ids(&active), sorted(vec![fx.a.id, fx.d.id]));
        assert_eq!(ids(&inactive), sorted(vec![fx.b.id, fx.c.id]));
    }
}

#[test]
fn list_filters_agree_with_effective_active() {
    for health in [HealthSignal::fixed(true), HealthSignal::absent()] {
        let conn = setup();
        list_fixture(&conn);
        insert(&conn, "catalog.product", true, Some(NOW + DAY), None);
        insert(&conn, "catalog.product", false, None, Some(NOW));
        let service = service(&conn, health);

        for entity in service.list_active(None).unwrap() {
            assert!(service.effective_active(&entity), "{} listed active", entity.id);
        }
        for entity in service.list_inactive(None).unwrap() {
            assert!(!service.effective_active(&entity), "{} listed inactive", entity.id);
        }
    }
}

#[test]
fn list_active_respects_kind_and_hides_deleted() {
    let conn = setup();
    let product = insert(&conn, "catalog.product", true, None, None);
    let banner = insert(&conn, "promo.banner", true, None, None);
    let deleted = insert(&conn, "catalog.product", true, None, None);
    SqliteEntityRepository::try_new(&conn)
        .unwrap()
        .soft_delete_entity(deleted.id, NOW)
        .unwrap();

    let service = service(&conn, HealthSignal::fixed(true));
    let active = service.list_active(Some(kind("catalog.product"))).unwrap();
    assert_eq!(ids(&active), vec![product.id]);
    assert!(!ids(&service.list_active(None).unwrap()).contains(&deleted.id));
    assert!(ids(&service.list_active(None).unwrap()).contains(&banner.id));
}

#[test]
fn activate_and_deactivate_update_flag_and_timestamp() {
    let conn = setup();
    let mut entity = insert(&conn, "catalog.product", true, None, None);
    let service = service(&conn, HealthSignal::fixed(true));

    service.activate(&mut entity).unwrap();
    let after_activate = entity.updated_at;
    service.deactivate(&mut entity).unwrap();

    assert!(!entity.is_active);
    assert!(entity.updated_at > after_activate);
    let persisted = stored(&conn, entity.id);
    assert!(!persisted.is_active);
    assert_eq!(persisted.updated_at, entity.updated_at);
}

#[test]
fn bulk_activate_and_deactivate_refresh_updated_at() {
    let conn = setup();
    let first = insert(&conn, "catalog.product", false, None, None);
    let second = insert(&conn, "catalog.product", false, None, None);
    let other = insert(&conn, "promo.banner", false, None, None);
    let service = service(&conn, HealthSignal::fixed(true));

    let scope = EntityScope::of_kind(kind("catalog.product"));
    assert_eq!(service.bulk_activate(&scope).unwrap(), 2);
    for entity in [&first, &second] {
        let persisted = stored(&conn, entity.id);
        assert!(persisted.is_active);
        assert!(persisted.updated_at > entity.updated_at);
    }
    assert!(!stored(&conn, other.id).is_active);

    let only_first = EntityScope::of_ids(vec![first.id]);
    assert_eq!(service.bulk_deactivate(&only_first).unwrap(), 1);
    assert!(!stored(&conn, first.id).is_active);
    assert!(stored(&conn, second.id).is_active);
}

#[test]
fn bulk_set_window_assigns_bounds_and_rejects_reversed_windows() {
    let conn = setup();
    let entity = insert(&conn, "catalog.product", true, None, None);
    let service = service(&conn, HealthSignal::absent());
    let scope = EntityScope::of_ids(vec![entity.id]);

    let err = service
        .bulk_set_window(&scope, ActivityWindow::new(Some(NOW), Some(NOW - 1)))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::InvalidActivityWindow { .. })
    ));

    let window = ActivityWindow::new(Some(NOW + DAY), None);
    assert_eq!(service.bulk_set_window(&scope, window).unwrap(), 1);
    let persisted = stored(&conn, entity.id);
    assert_eq!(persisted.window(), window);
    assert!(persisted.updated_at > entity.updated_at);

    service.reconcile_activity(&scope, BATCH).unwrap();
    assert!(!stored(&conn, entity.id).is_active);
}

#[test]
fn soft_delete_and_restore_through_service_reload_record() {
    let conn = setup();
    let mut entity = insert(&conn, "catalog.product", true, None, None);
    let service = service(&conn, HealthSignal::absent());

    service.soft_delete(&mut entity).unwrap();
    assert_eq!(entity.deletion.deleted_at(), Some(NOW));
    assert!(service.get(entity.id).unwrap().is_none());

    service.restore(&mut entity).unwrap();
    assert_eq!(entity.deletion.deleted_at(), None);
    assert!(service.get(entity.id).unwrap().is_some());
}
