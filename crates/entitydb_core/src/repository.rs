//! The repository contract: the single interface the rest of the system
//! depends on.

use crate::entity::Entity;
use crate::entity_id::EntityId;
use crate::error::Result;
use crate::lifecycle::LifecycleState;
use crate::query::Query;
use serde::{Deserialize, Serialize};

/// What happened to a namespace between two points in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Namespace appeared.
    Added,
    /// Namespace's latest value changed.
    Modified,
    /// Namespace disappeared.
    Removed,
}

/// A single observed change to an entity's tag state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityChange {
    /// Change classification.
    pub kind: ChangeKind,
    /// Nanosecond timestamp of the change.
    pub timestamp: i64,
    /// Previous value, absent for additions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    /// New value, absent for removals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    /// The entity the change belongs to.
    pub entity_id: EntityId,
}

/// Outcome of an index health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexHealth {
    /// Incremental maintenance agrees with a fresh rebuild.
    Ok,
    /// The two diverged; details name the first mismatches found.
    Inconsistent {
        /// Human-readable description of each divergence.
        details: Vec<String>,
    },
}

impl IndexHealth {
    /// Returns true for [`IndexHealth::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, IndexHealth::Ok)
    }
}

/// Optional maintenance capabilities a backend may support beyond the core
/// contract. Detected at runtime via
/// [`EntityRepository::maintenance_ops`].
pub trait MaintenanceOps {
    /// Forces buffered writes to durable storage.
    fn flush(&self) -> Result<()>;

    /// Synchronizes in-memory state with the durable form.
    fn sync(&self) -> Result<()>;

    /// Writes a named durable checkpoint (e.g. for backup tooling).
    fn checkpoint(&self, name: &str) -> Result<()>;
}

/// The storage and temporal-query contract.
///
/// Every operation is safe under concurrent callers. Mutations are visible
/// in all indexes once the call returns.
pub trait EntityRepository: Send + Sync {
    /// Persists a new entity. Mandatory tags are validated, the id must be
    /// unused, and the entity is durable before return.
    fn create(&self, entity: Entity) -> Result<()>;

    /// Returns the latest snapshot of an entity, all historical tags
    /// included.
    fn get_by_id(&self, id: EntityId) -> Result<Entity>;

    /// Persists tag/content changes to an existing entity. Tags are
    /// appended, never rewritten in place; `updated_at` is bumped.
    fn update(&self, entity: Entity) -> Result<()>;

    /// Removes an entity and its temporal history from storage and all
    /// indexes.
    fn delete(&self, id: EntityId) -> Result<()>;

    /// Returns all entities. May be large.
    fn list(&self) -> Result<Vec<Entity>>;

    /// Returns entities carrying the payload (any timestamp) after
    /// stripping.
    fn list_by_tag(&self, payload: &str) -> Result<Vec<Entity>>;

    /// Returns entities matching all (`all = true`) or any of the
    /// payloads.
    fn list_by_tags(&self, payloads: &[&str], all: bool) -> Result<Vec<Entity>>;

    /// Returns entities with a stripped tag matching the glob pattern
    /// (`*`, `?`).
    fn list_by_tag_wildcard(&self, pattern: &str) -> Result<Vec<Entity>>;

    /// Returns entities with any tag in the namespace.
    fn list_by_namespace(&self, namespace: &str) -> Result<Vec<Entity>>;

    /// Returns entities with a stripped tag matching the SQL-style `%`
    /// pattern.
    fn list_by_tag_sql(&self, pattern: &str) -> Result<Vec<Entity>>;

    /// Returns entities whose content contains the substring.
    fn search_content(&self, needle: &str) -> Result<Vec<Entity>>;

    /// Appends a freshly-stamped tag to an existing entity.
    fn add_tag(&self, id: EntityId, payload: &str) -> Result<()>;

    /// Removes every occurrence of the payload from an existing entity.
    fn remove_tag(&self, id: EntityId, payload: &str) -> Result<()>;

    /// Reconstructs the entity as it was at the given timestamp: per
    /// namespace, the latest temporal tag at or before `ts` survives;
    /// non-temporal tags and content are preserved as-is.
    fn get_entity_as_of(&self, id: EntityId, ts: i64) -> Result<Entity>;

    /// Returns up to `limit` changes for one entity, newest first.
    fn get_entity_history(&self, id: EntityId, limit: usize) -> Result<Vec<EntityChange>>;

    /// Returns up to `limit` changes across all entities, newest first.
    fn get_recent_changes(&self, limit: usize) -> Result<Vec<EntityChange>>;

    /// Returns the (before, after) snapshots at `t1`/`t2` plus the change
    /// list between them.
    fn get_entity_diff(
        &self,
        id: EntityId,
        t1: i64,
        t2: i64,
    ) -> Result<(Entity, Entity, Vec<EntityChange>)>;

    /// Returns a fresh query builder; run it with
    /// [`EntityRepository::search`].
    fn query(&self) -> Query {
        Query::new()
    }

    /// Executes a query plan against this repository.
    fn search(&self, query: &Query) -> Result<Vec<Entity>>;

    /// Rebuilds all indexes from entity data. Safe to run concurrently
    /// with reads.
    fn reindex_tags(&self) -> Result<()>;

    /// Compares incremental index maintenance against a fresh rebuild.
    fn verify_index_health(&self) -> Result<IndexHealth>;

    /// Returns entities currently in the active state.
    fn list_active(&self) -> Result<Vec<Entity>> {
        self.list_by_lifecycle_state(LifecycleState::Active)
    }

    /// Returns soft-deleted entities.
    fn list_soft_deleted(&self) -> Result<Vec<Entity>> {
        self.list_by_lifecycle_state(LifecycleState::SoftDeleted)
    }

    /// Returns archived entities.
    fn list_archived(&self) -> Result<Vec<Entity>> {
        self.list_by_lifecycle_state(LifecycleState::Archived)
    }

    /// Returns entities in the given lifecycle state.
    fn list_by_lifecycle_state(&self, state: LifecycleState) -> Result<Vec<Entity>>;

    /// Runs a batch of mutations atomically: either every change in the
    /// batch becomes visible at once, or none does.
    fn transaction(&self, f: &mut dyn FnMut(&mut TransactionBatch) -> Result<()>) -> Result<()>;

    /// Returns the backend's optional maintenance capabilities, if it has
    /// any.
    fn maintenance_ops(&self) -> Option<&dyn MaintenanceOps> {
        None
    }
}

/// Mutations collected inside [`EntityRepository::transaction`].
///
/// The closure stages creates, updates and deletes; the repository applies
/// them atomically after the closure returns Ok.
#[derive(Default)]
pub struct TransactionBatch {
    pub(crate) creates: Vec<Entity>,
    pub(crate) updates: Vec<Entity>,
    pub(crate) deletes: Vec<EntityId>,
}

impl TransactionBatch {
    /// Stages an entity creation.
    pub fn create(&mut self, entity: Entity) {
        self.creates.push(entity);
    }

    /// Stages an entity update.
    pub fn update(&mut self, entity: Entity) {
        self.updates.push(entity);
    }

    /// Stages an entity deletion.
    pub fn delete(&mut self, id: EntityId) {
        self.deletes.push(id);
    }

    /// Returns true if nothing was staged.
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}
