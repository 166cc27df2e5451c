//! Entity repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide lifecycle and set-based activity APIs over `entities`.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Write paths call `Entity::validate()` before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Every user-initiated write sets `updated_at = max(now, updated_at + 1)`.
//! - The reconciliation pass writes `is_active` only, never `updated_at`,
//!   and binds one `now` for the whole pass.

use crate::clock::EpochMs;
use crate::db::migrations::{current_version, latest_version};
use crate::db::DbError;
use crate::model::activity::{
    reconciled_flag_sql, ActivityFilter, ActivityWindow, WINDOWED_ROWS_SQL,
};
use crate::model::entity::{
    DeletionState, Entity, EntityId, EntityKind, ValidationError, Visibility,
};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use serde_json::{Map, Value as JsonValue};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const ENTITY_SELECT_SQL: &str = "SELECT
    id,
    kind,
    created_at,
    updated_at,
    is_active,
    active_start,
    active_end,
    deleted_at,
    attributes
FROM entities";

/// Upper bound on ids bound by one statement. SQLite caps host parameters
/// at 32766; the rest of the statement uses a handful.
pub const MAX_IDS_PER_STATEMENT: usize = 30_000;

/// Refreshes the modified timestamp so it strictly increases. `?1` is `now`.
const TOUCH_UPDATED_AT_SQL: &str = "updated_at = MAX(?1, updated_at + 1)";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for entity persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Db(DbError),
    NotFound(EntityId),
    InvalidData(String),
    /// Reconciliation chunk size must be positive.
    InvalidBatchSize,
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "entity not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted entity data: {message}"),
            Self::InvalidBatchSize => write!(f, "batch size must be greater than zero"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "entity repository requires schema version {expected_version}, got {actual_version}"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Rows targeted by a bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityScope {
    pub kind: Option<EntityKind>,
    pub visibility: Visibility,
    /// Explicit id set; `None` means every row matching the other filters.
    pub ids: Option<Vec<EntityId>>,
}

impl EntityScope {
    /// Default "all instances" scope for one kind: every live row.
    pub fn of_kind(kind: EntityKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn of_ids(ids: Vec<EntityId>) -> Self {
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }
}

/// Activity condition for list queries, resolved against one health reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityQuery {
    pub filter: ActivityFilter,
    pub workers_healthy: bool,
    pub now: EpochMs,
}

/// Query options for listing entities.
#[derive(Debug, Clone, Default)]
pub struct EntityListQuery {
    pub kind: Option<EntityKind>,
    pub visibility: Visibility,
    pub activity: Option<ActivityQuery>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Repository interface for entity lifecycle and bulk activity writes.
pub trait EntityRepository {
    fn create_entity(&self, entity: &Entity) -> RepoResult<EntityId>;
    /// Full save. Returns the refreshed `updated_at`.
    fn update_entity(&self, entity: &Entity, now: EpochMs) -> RepoResult<EpochMs>;
    fn get_entity(&self, id: EntityId, visibility: Visibility) -> RepoResult<Option<Entity>>;
    fn list_entities(&self, query: &EntityListQuery) -> RepoResult<Vec<Entity>>;
    /// Distinct kinds present in storage, deleted rows included.
    fn list_kinds(&self) -> RepoResult<Vec<EntityKind>>;
    /// Writes `is_active` and `updated_at` of one live row only.
    fn set_active(&self, id: EntityId, is_active: bool, now: EpochMs) -> RepoResult<EpochMs>;
    /// Set-based flag write over a scope; refreshes `updated_at`.
    fn bulk_set_active(&self, scope: &EntityScope, is_active: bool, now: EpochMs)
        -> RepoResult<usize>;
    /// Set-based window assignment over a scope; refreshes `updated_at`.
    fn bulk_set_window(
        &self,
        scope: &EntityScope,
        window: ActivityWindow,
        now: EpochMs,
    ) -> RepoResult<usize>;
    /// Recomputes `is_active` from the window; returns rows whose flag changed.
    fn reconcile_activity(
        &self,
        scope: &EntityScope,
        now: EpochMs,
        batch_size: usize,
    ) -> RepoResult<usize>;
    fn soft_delete_entity(&self, id: EntityId, now: EpochMs) -> RepoResult<()>;
    fn restore_entity(&self, id: EntityId, now: EpochMs) -> RepoResult<()>;
}

/// SQLite-backed entity repository.
pub struct SqliteEntityRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEntityRepository<'conn> {
    /// Creates repository from a fully migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        let expected_version = latest_version();
        let actual_version = current_version(conn)?;
        if actual_version != expected_version {
            return Err(RepoError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }
        Ok(Self { conn })
    }
}

impl EntityRepository for SqliteEntityRepository<'_> {
    fn create_entity(&self, entity: &Entity) -> RepoResult<EntityId> {
        entity.validate()?;

        self.conn.execute(
            "INSERT INTO entities (
                id,
                kind,
                created_at,
                updated_at,
                is_active,
                active_start,
                active_end,
                deleted_at,
                attributes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                entity.id.to_string(),
                entity.kind.as_str(),
                entity.created_at,
                entity.updated_at.max(entity.created_at),
                entity.is_active,
                entity.active_start,
                entity.active_end,
                entity.deletion.deleted_at(),
                attributes_to_db(&entity.attributes)?,
            ],
        )?;

        Ok(entity.id)
    }

    fn update_entity(&self, entity: &Entity, now: EpochMs) -> RepoResult<EpochMs> {
        entity.validate()?;

        let updated_at = self
            .conn
            .query_row(
                &format!(
                    "UPDATE entities
                     SET
                        kind = ?2,
                        is_active = ?3,
                        active_start = ?4,
                        active_end = ?5,
                        deleted_at = ?6,
                        attributes = ?7,
                        {TOUCH_UPDATED_AT_SQL}
                     WHERE id = ?8
                     RETURNING updated_at;"
                ),
                params![
                    now,
                    entity.kind.as_str(),
                    entity.is_active,
                    entity.active_start,
                    entity.active_end,
                    entity.deletion.deleted_at(),
                    attributes_to_db(&entity.attributes)?,
                    entity.id.to_string(),
                ],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        updated_at.ok_or(RepoError::NotFound(entity.id))
    }

    fn get_entity(&self, id: EntityId, visibility: Visibility) -> RepoResult<Option<Entity>> {
        let mut sql = format!("{ENTITY_SELECT_SQL} WHERE id = ?1");
        if let Some(condition) = visibility.condition_sql() {
            sql.push_str(" AND ");
            sql.push_str(condition);
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_entity_row(row)?));
        }

        Ok(None)
    }

    fn list_entities(&self, query: &EntityListQuery) -> RepoResult<Vec<Entity>> {
        let mut filter = SqlFilter::starting_at(1);
        if let Some(condition) = query.visibility.condition_sql() {
            filter.push(condition.to_string());
        }
        if let Some(kind) = &query.kind {
            let param = filter.bind(Value::Text(kind.as_str().to_string()));
            filter.push(format!("kind = {param}"));
        }
        if let Some(activity) = query.activity {
            let condition = if activity.workers_healthy {
                activity.filter.condition_sql(true, "")
            } else {
                let param = filter.bind(Value::Integer(activity.now));
                activity.filter.condition_sql(false, &param)
            };
            filter.push(condition);
        }

        let mut sql = format!("{ENTITY_SELECT_SQL}{}", filter.where_sql());
        sql.push_str(" ORDER BY updated_at DESC, id ASC");

        if let Some(limit) = query.limit {
            let param = filter.bind(Value::Integer(i64::from(limit)));
            sql.push_str(&format!(" LIMIT {param}"));
            if query.offset > 0 {
                let param = filter.bind(Value::Integer(i64::from(query.offset)));
                sql.push_str(&format!(" OFFSET {param}"));
            }
        } else if query.offset > 0 {
            let param = filter.bind(Value::Integer(i64::from(query.offset)));
            sql.push_str(&format!(" LIMIT -1 OFFSET {param}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(filter.params))?;
        let mut entities = Vec::new();

        while let Some(row) = rows.next()? {
            entities.push(parse_entity_row(row)?);
        }

        Ok(entities)
    }

    fn list_kinds(&self) -> RepoResult<Vec<EntityKind>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT kind FROM entities ORDER BY kind ASC;")?;
        let mut rows = stmt.query([])?;
        let mut kinds = Vec::new();
        while let Some(row) = rows.next()? {
            let label: String = row.get(0)?;
            let kind = EntityKind::parse(&label).map_err(|_| {
                RepoError::InvalidData(format!("invalid kind `{label}` in entities.kind"))
            })?;
            kinds.push(kind);
        }
        Ok(kinds)
    }

    fn set_active(&self, id: EntityId, is_active: bool, now: EpochMs) -> RepoResult<EpochMs> {
        let updated_at = self
            .conn
            .query_row(
                &format!(
                    "UPDATE entities
                     SET
                        is_active = ?2,
                        {TOUCH_UPDATED_AT_SQL}
                     WHERE id = ?3
                       AND deleted_at IS NULL
                     RETURNING updated_at;"
                ),
                params![now, is_active, id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        updated_at.ok_or(RepoError::NotFound(id))
    }

    fn bulk_set_active(
        &self,
        scope: &EntityScope,
        is_active: bool,
        now: EpochMs,
    ) -> RepoResult<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut changed = 0;
        for chunk_scope in scope_chunks(scope, MAX_IDS_PER_STATEMENT) {
            let mut filter = SqlFilter::starting_at(3);
            filter.push_scope(&chunk_scope);
            changed += tx.execute(
                &format!(
                    "UPDATE entities
                     SET is_active = ?2, {TOUCH_UPDATED_AT_SQL}{}",
                    filter.where_sql()
                ),
                params_from_iter(
                    [Value::Integer(now), Value::Integer(i64::from(is_active))]
                        .into_iter()
                        .chain(filter.params),
                ),
            )?;
        }
        tx.commit()?;

        Ok(changed)
    }

    fn bulk_set_window(
        &self,
        scope: &EntityScope,
        window: ActivityWindow,
        now: EpochMs,
    ) -> RepoResult<usize> {
        if let (Some(start), Some(end)) = (window.start, window.end) {
            if end < start {
                return Err(ValidationError::InvalidActivityWindow { start, end }.into());
            }
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut changed = 0;
        for chunk_scope in scope_chunks(scope, MAX_IDS_PER_STATEMENT) {
            let mut filter = SqlFilter::starting_at(4);
            filter.push_scope(&chunk_scope);
            changed += tx.execute(
                &format!(
                    "UPDATE entities
                     SET active_start = ?2, active_end = ?3, {TOUCH_UPDATED_AT_SQL}{}",
                    filter.where_sql()
                ),
                params_from_iter(
                    [
                        Value::Integer(now),
                        optional_integer(window.start),
                        optional_integer(window.end),
                    ]
                    .into_iter()
                    .chain(filter.params),
                ),
            )?;
        }
        tx.commit()?;

        Ok(changed)
    }

    fn reconcile_activity(
        &self,
        scope: &EntityScope,
        now: EpochMs,
        batch_size: usize,
    ) -> RepoResult<usize> {
        if batch_size == 0 {
            return Err(RepoError::InvalidBatchSize);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut changed = 0;
        for chunk_scope in scope_chunks(scope, batch_size.min(MAX_IDS_PER_STATEMENT)) {
            changed += reconcile_statement(&tx, &chunk_scope, now)?;
        }
        tx.commit()?;

        Ok(changed)
    }

    fn soft_delete_entity(&self, id: EntityId, now: EpochMs) -> RepoResult<()> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE entities
                 SET
                    deleted_at = COALESCE(deleted_at, ?1),
                    {TOUCH_UPDATED_AT_SQL}
                 WHERE id = ?2;"
            ),
            params![now, id.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }

    fn restore_entity(&self, id: EntityId, now: EpochMs) -> RepoResult<()> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE entities
                 SET
                    deleted_at = NULL,
                    {TOUCH_UPDATED_AT_SQL}
                 WHERE id = ?2;"
            ),
            params![now, id.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }
}

/// Splits an explicit id scope into sub-scopes of at most `chunk_size` ids.
/// Other scopes, including an empty id set, stay one statement.
fn scope_chunks(scope: &EntityScope, chunk_size: usize) -> Vec<EntityScope> {
    match &scope.ids {
        Some(ids) if !ids.is_empty() => ids
            .chunks(chunk_size)
            .map(|chunk| EntityScope {
                ids: Some(chunk.to_vec()),
                ..scope.clone()
            })
            .collect(),
        _ => vec![scope.clone()],
    }
}

/// One set-based `UPDATE ... SET is_active = CASE ...` over `scope`.
///
/// Rows without a window and rows already holding the reconciled value are
/// excluded, so the affected count equals the number of flipped flags.
fn reconcile_statement(conn: &Connection, scope: &EntityScope, now: EpochMs) -> RepoResult<usize> {
    let reconciled = reconciled_flag_sql("?1");
    let mut filter = SqlFilter::starting_at(2);
    filter.push(WINDOWED_ROWS_SQL.to_string());
    filter.push(format!("is_active <> {reconciled}"));
    filter.push_scope(scope);

    let changed = conn.execute(
        &format!(
            "UPDATE entities SET is_active = {reconciled}{}",
            filter.where_sql()
        ),
        params_from_iter(std::iter::once(Value::Integer(now)).chain(filter.params)),
    )?;

    debug!(
        "event=reconcile_statement module=repo status=ok kind={} changed={changed}",
        scope.kind.as_ref().map_or("*", |kind| kind.as_str())
    );
    Ok(changed)
}

/// `WHERE` clause accumulator with explicitly numbered placeholders.
struct SqlFilter {
    next_index: usize,
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl SqlFilter {
    fn starting_at(first_index: usize) -> Self {
        Self {
            next_index: first_index,
            clauses: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Registers one bound value and returns its placeholder.
    fn bind(&mut self, value: Value) -> String {
        let placeholder = format!("?{}", self.next_index);
        self.next_index += 1;
        self.params.push(value);
        placeholder
    }

    fn push(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    fn push_scope(&mut self, scope: &EntityScope) {
        if let Some(condition) = scope.visibility.condition_sql() {
            self.push(condition.to_string());
        }
        if let Some(kind) = &scope.kind {
            let param = self.bind(Value::Text(kind.as_str().to_string()));
            self.push(format!("kind = {param}"));
        }
        if let Some(ids) = &scope.ids {
            if ids.is_empty() {
                self.push("0 = 1".to_string());
            } else {
                let placeholders: Vec<String> = ids
                    .iter()
                    .map(|id| self.bind(Value::Text(id.to_string())))
                    .collect();
                self.push(format!("id IN ({})", placeholders.join(", ")));
            }
        }
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            return String::new();
        }
        format!(" WHERE {}", self.clauses.join(" AND "))
    }
}

fn parse_entity_row(row: &Row<'_>) -> RepoResult<Entity> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text).map_err(|_| {
        RepoError::InvalidData(format!("invalid uuid value `{id_text}` in entities.id"))
    })?;

    let kind_text: String = row.get("kind")?;
    let kind = EntityKind::parse(&kind_text).map_err(|_| {
        RepoError::InvalidData(format!("invalid kind `{kind_text}` in entities.kind"))
    })?;

    let is_active = match row.get::<_, i64>("is_active")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid is_active value `{other}` in entities.is_active"
            )));
        }
    };

    let attributes_text: String = row.get("attributes")?;
    let attributes = match serde_json::from_str::<JsonValue>(&attributes_text) {
        Ok(JsonValue::Object(map)) => map,
        _ => {
            return Err(RepoError::InvalidData(format!(
                "entities.attributes for {id} is not a JSON object"
            )));
        }
    };

    let entity = Entity {
        id,
        kind,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        is_active,
        active_start: row.get("active_start")?,
        active_end: row.get("active_end")?,
        deletion: DeletionState::from_deleted_at(row.get("deleted_at")?),
        attributes,
    };
    entity.validate().map_err(|err| {
        RepoError::InvalidData(format!("entity {id} violates invariants: {err}"))
    })?;
    Ok(entity)
}

fn attributes_to_db(attributes: &Map<String, JsonValue>) -> RepoResult<String> {
    serde_json::to_string(attributes)
        .map_err(|err| RepoError::InvalidData(format!("attributes are not serializable: {err}")))
}

fn optional_integer(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}
