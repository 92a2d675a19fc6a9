//! Durable repository backed by a single redb data file with in-memory
//! temporal indexes.
//!
//! Entity records are postcard-encoded; large content is zstd-compressed.
//! Every mutation commits to the data file before it becomes visible in
//! the in-memory state, so `create`/`update` return only once durable.
//! Indexes are rebuilt from the data file at open and maintained
//! incrementally afterwards; `reindex_tags` re-derives them and
//! `verify_index_health` compares the two.

use crate::entity::Entity;
use crate::entity_id::EntityId;
use crate::error::{EntityDbError, Result};
use crate::index::TemporalIndexes;
use crate::lifecycle::{self, LifecycleState};
use crate::query::{sql_like_match, Query};
use crate::repository::{
    ChangeKind, EntityChange, EntityRepository, IndexHealth, MaintenanceOps, TransactionBatch,
};
use crate::temporal;
use fs2::FileExt;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Store schema version for migration support.
pub const STORE_SCHEMA_VERSION: u32 = 1;

const METADATA_TABLE: TableDefinition<&str, u32> = TableDefinition::new("metadata");
const ENTITIES_TABLE: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("entities");

/// Content below this size is stored uncompressed.
const COMPRESSION_THRESHOLD: usize = 512;

/// Tuning knobs for a [`Store`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Name of the unified data file inside the data directory.
    pub filename: String,
    /// Zstd level for content compression (1-22).
    pub compression_level: i32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            filename: "entitydb.redb".to_string(),
            compression_level: 3,
        }
    }
}

/// Durable form of one entity.
#[derive(Serialize, Deserialize)]
struct EntityRecord {
    tags: Vec<String>,
    content: Option<Vec<u8>>,
    content_compressed: bool,
    created_at: i64,
    updated_at: i64,
}

impl EntityRecord {
    fn from_entity(entity: &Entity, compression_level: i32) -> Result<Self> {
        let (content, compressed) = match &entity.content {
            Some(bytes) if bytes.len() >= COMPRESSION_THRESHOLD => {
                let packed = zstd::encode_all(bytes.as_slice(), compression_level)
                    .map_err(|e| EntityDbError::Storage(format!("compress: {e}")))?;
                (Some(packed), true)
            }
            Some(bytes) => (Some(bytes.clone()), false),
            None => (None, false),
        };
        Ok(Self {
            tags: entity.tags.clone(),
            content,
            content_compressed: compressed,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }

    fn into_entity(self, id: EntityId) -> Result<Entity> {
        let content = match (self.content, self.content_compressed) {
            (Some(bytes), true) => Some(
                zstd::decode_all(bytes.as_slice())
                    .map_err(|e| EntityDbError::Storage(format!("decompress: {e}")))?,
            ),
            (Some(bytes), false) => Some(bytes),
            (None, _) => None,
        };

        let mut entity = Entity::new(id);
        entity.set_tags(self.tags);
        entity.content = content;
        entity.created_at = self.created_at;
        entity.updated_at = self.updated_at;
        Ok(entity)
    }
}

/// Shared in-memory state: current snapshots plus the indexes over them.
/// One lock keeps the two consistent.
#[derive(Default, Debug)]
struct StoreState {
    entities: HashMap<EntityId, Entity>,
    indexes: TemporalIndexes,
}

/// Redb-durable entity repository.
#[derive(Debug)]
pub struct Store {
    db: Database,
    state: RwLock<StoreState>,
    options: StoreOptions,
    root: PathBuf,
    /// Held for the store's lifetime to fence off other processes.
    _lock_file: File,
}

impl Store {
    /// Opens (or initializes) a store in the given data directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(dir, StoreOptions::default())
    }

    /// Opens a store with explicit options.
    ///
    /// # Errors
    ///
    /// Fails if the directory lock is held by another process, the data
    /// file can't be opened, or the schema version mismatches.
    pub fn open_with(dir: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let lock_path = root.join("LOCK");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock_file.try_lock_exclusive().map_err(|_| {
            EntityDbError::Storage(format!(
                "data directory locked by another process: {}",
                root.display()
            ))
        })?;

        let db_path = root.join(&options.filename);
        let db = Database::create(&db_path)?;

        let store = Self {
            db,
            state: RwLock::new(StoreState::default()),
            options,
            root,
            _lock_file: lock_file,
        };
        store.init_schema()?;
        store.load_all()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(METADATA_TABLE)?;
            let existing = table.get("version")?.map(|guard| guard.value());
            match existing {
                Some(version) if version != STORE_SCHEMA_VERSION => {
                    return Err(EntityDbError::Storage(format!(
                        "store schema version mismatch: found {version}, expected {STORE_SCHEMA_VERSION}"
                    )));
                }
                Some(_) => {}
                None => {
                    table.insert("version", STORE_SCHEMA_VERSION)?;
                }
            }
            txn.open_table(ENTITIES_TABLE)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Loads every record and builds the in-memory indexes.
    fn load_all(&self) -> Result<()> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTITIES_TABLE)?;

        let mut entities = HashMap::new();
        for row in table.iter()? {
            let (key, value) = row?;
            let id = EntityId::from_bytes(*key.value());
            let record: EntityRecord = postcard::from_bytes(value.value())
                .map_err(|e| EntityDbError::Deserialization(e.to_string()))?;
            entities.insert(id, record.into_entity(id)?);
        }

        let indexes = TemporalIndexes::rebuild(entities.values());
        let mut state = self.state.write();
        state.entities = entities;
        state.indexes = indexes;
        info!(
            entities = state.entities.len(),
            path = %self.root.display(),
            "store opened"
        );
        Ok(())
    }

    /// Writes one record durably.
    fn persist(&self, entity: &Entity) -> Result<()> {
        let record = EntityRecord::from_entity(entity, self.options.compression_level)?;
        let bytes =
            postcard::to_allocvec(&record).map_err(|e| EntityDbError::Serialization(e.to_string()))?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTITIES_TABLE)?;
            table.insert(entity.id.as_bytes(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn persist_delete(&self, id: EntityId) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTITIES_TABLE)?;
            table.remove(id.as_bytes())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn fetch(&self, id: EntityId) -> Result<Entity> {
        self.state
            .read()
            .entities
            .get(&id)
            .cloned()
            .ok_or_else(|| EntityDbError::EntityNotFound(id.to_string()))
    }

    fn collect(&self, ids: Vec<EntityId>) -> Vec<Entity> {
        let state = self.state.read();
        ids.into_iter()
            .filter_map(|id| state.entities.get(&id).cloned())
            .collect()
    }

    /// Derives the ordered change list for one entity from its history.
    fn changes_for(&self, id: EntityId) -> Result<Vec<EntityChange>> {
        let state = self.state.read();
        let history = state
            .indexes
            .history_of(id)
            .ok_or_else(|| EntityDbError::EntityNotFound(id.to_string()))?;

        let mut latest: HashMap<String, String> = HashMap::new();
        let mut changes = Vec::new();

        for (&(nanos, _), payload) in history {
            let Some(split) = payload.rfind(':') else {
                continue;
            };
            let key = payload[..split].to_string();
            let value = payload[split + 1..].to_string();

            let change = match latest.get(&key) {
                None => EntityChange {
                    kind: ChangeKind::Added,
                    timestamp: nanos,
                    old_value: None,
                    new_value: Some(value.clone()),
                    entity_id: id,
                },
                Some(previous) if previous != &value => EntityChange {
                    kind: ChangeKind::Modified,
                    timestamp: nanos,
                    old_value: Some(previous.clone()),
                    new_value: Some(value.clone()),
                    entity_id: id,
                },
                Some(_) => {
                    latest.insert(key, value);
                    continue;
                }
            };
            latest.insert(key, value);
            changes.push(change);
        }

        Ok(changes)
    }

    /// Reassembles an entity's content, following chunk entities when the
    /// content was streamed in chunked form.
    ///
    /// Each chunk's recorded checksum is verified during reassembly, and
    /// the whole stream is verified against the parent's `content:checksum`
    /// tag when present.
    ///
    /// # Errors
    ///
    /// Returns `ChecksumMismatch` on corrupt chunks and `EntityNotFound`
    /// for missing chunk entities.
    pub fn load_content(&self, id: EntityId) -> Result<Vec<u8>> {
        let entity = self.fetch(id)?;
        if let Some(content) = &entity.content {
            return Ok(content.clone());
        }

        let chunk_count: usize = match entity.get_tag_value("content:chunks").parse() {
            Ok(n) => n,
            Err(_) => return Ok(Vec::new()),
        };

        let mut chunks: Vec<(usize, Entity)> = Vec::with_capacity(chunk_count);
        for chunk in self.list_by_tag(&format!("parent:{id}"))? {
            if chunk.get_tag_value("type") != "chunk" {
                continue;
            }
            if let Ok(index) = chunk.get_tag_value("content:chunk").parse() {
                chunks.push((index, chunk));
            }
        }
        chunks.sort_by_key(|(index, _)| *index);

        if chunks.len() != chunk_count {
            return Err(EntityDbError::EntityNotFound(format!(
                "chunks of {id}: expected {chunk_count}, found {}",
                chunks.len()
            )));
        }

        let mut data = Vec::new();
        for (_, chunk) in &chunks {
            let body = chunk.content.as_deref().unwrap_or(&[]);
            let expected = chunk.get_tag_value("content:checksum");
            let actual = blake3::hash(body).to_hex().to_string();
            if !expected.is_empty() && expected != actual {
                return Err(EntityDbError::ChecksumMismatch {
                    entity: chunk.id.to_string(),
                    expected,
                    actual,
                });
            }
            data.extend_from_slice(body);
        }

        let expected = entity.get_tag_value("content:checksum");
        if !expected.is_empty() {
            let actual = blake3::hash(&data).to_hex().to_string();
            if expected != actual {
                return Err(EntityDbError::ChecksumMismatch {
                    entity: id.to_string(),
                    expected,
                    actual,
                });
            }
        }
        Ok(data)
    }

    /// Namespace → latest value at or before `ts`, plus the raw winning tag.
    fn snapshot_map(entity: &Entity, ts: i64) -> BTreeMap<String, (i64, usize, String, String)> {
        let mut winners: BTreeMap<String, (i64, usize, String, String)> = BTreeMap::new();
        for (pos, raw) in entity.tags.iter().enumerate() {
            let (nanos, payload) = temporal::parse_any(raw);
            if nanos > ts {
                continue;
            }
            let Some(split) = payload.rfind(':') else {
                continue;
            };
            let key = payload[..split].to_string();
            let value = payload[split + 1..].to_string();

            match winners.get(&key) {
                Some((n, p, _, _)) if (*n, *p) > (nanos, pos) => {}
                _ => {
                    winners.insert(key, (nanos, pos, value, raw.clone()));
                }
            }
        }
        winners
    }
}

impl EntityRepository for Store {
    fn create(&self, entity: Entity) -> Result<()> {
        if entity.id.is_nil() {
            return Err(EntityDbError::InvalidEntityId(entity.id.to_string()));
        }
        entity.validate_mandatory_tags()?;

        let mut state = self.state.write();
        if state.entities.contains_key(&entity.id) {
            return Err(EntityDbError::AlreadyExists(entity.id.to_string()));
        }

        self.persist(&entity)?;
        state.indexes.index_entity(&entity);
        state.entities.insert(entity.id, entity);
        Ok(())
    }

    fn get_by_id(&self, id: EntityId) -> Result<Entity> {
        self.fetch(id)
    }

    fn update(&self, mut entity: Entity) -> Result<()> {
        let mut state = self.state.write();
        let existing = state
            .entities
            .get(&entity.id)
            .ok_or_else(|| EntityDbError::EntityNotFound(entity.id.to_string()))?;

        if existing.created_at != entity.created_at {
            return Err(EntityDbError::TransactionConflict(format!(
                "update of {} does not descend from the stored entity",
                entity.id
            )));
        }

        entity.updated_at = entity.updated_at.max(temporal::now_nanos());
        self.persist(&entity)?;

        let before = state.entities.get(&entity.id).cloned();
        if let Some(before) = before {
            state.indexes.reindex_entity(&before, &entity);
        }
        state.entities.insert(entity.id, entity);
        Ok(())
    }

    fn delete(&self, id: EntityId) -> Result<()> {
        let mut state = self.state.write();
        let entity = state
            .entities
            .remove(&id)
            .ok_or_else(|| EntityDbError::EntityNotFound(id.to_string()))?;

        if let Err(e) = self.persist_delete(id) {
            // Keep memory and disk consistent if the durable delete failed.
            state.entities.insert(id, entity);
            return Err(e);
        }
        state.indexes.remove_entity(&entity);
        debug!(entity = %id, "deleted");
        Ok(())
    }

    fn list(&self) -> Result<Vec<Entity>> {
        Ok(self.state.read().entities.values().cloned().collect())
    }

    fn list_by_tag(&self, payload: &str) -> Result<Vec<Entity>> {
        let ids = self.state.read().indexes.ids_for_tag(payload);
        Ok(self.collect(ids))
    }

    fn list_by_tags(&self, payloads: &[&str], all: bool) -> Result<Vec<Entity>> {
        let state = self.state.read();
        let mut sets = payloads
            .iter()
            .map(|p| state.indexes.ids_for_tag(p).into_iter().collect::<BTreeSet<_>>());

        let combined: BTreeSet<EntityId> = match sets.next() {
            None => BTreeSet::new(),
            Some(first) => {
                if all {
                    sets.fold(first, |acc, s| acc.intersection(&s).copied().collect())
                } else {
                    sets.fold(first, |mut acc, s| {
                        acc.extend(s);
                        acc
                    })
                }
            }
        };
        drop(state);
        Ok(self.collect(combined.into_iter().collect()))
    }

    fn list_by_tag_wildcard(&self, pattern: &str) -> Result<Vec<Entity>> {
        let ids = self.state.read().indexes.ids_for_glob(pattern);
        Ok(self.collect(ids))
    }

    fn list_by_namespace(&self, namespace: &str) -> Result<Vec<Entity>> {
        let ids = self.state.read().indexes.ids_for_namespace(namespace);
        Ok(self.collect(ids))
    }

    fn list_by_tag_sql(&self, pattern: &str) -> Result<Vec<Entity>> {
        let ids = self
            .state
            .read()
            .indexes
            .ids_matching(|payload| sql_like_match(pattern, payload));
        Ok(self.collect(ids))
    }

    fn search_content(&self, needle: &str) -> Result<Vec<Entity>> {
        let state = self.state.read();
        Ok(state
            .entities
            .values()
            .filter(|e| {
                let content = e.content.as_deref().unwrap_or(&[]);
                String::from_utf8_lossy(content).contains(needle)
            })
            .cloned()
            .collect())
    }

    fn add_tag(&self, id: EntityId, payload: &str) -> Result<()> {
        let mut state = self.state.write();
        let entity = state
            .entities
            .get(&id)
            .ok_or_else(|| EntityDbError::EntityNotFound(id.to_string()))?;

        let before = entity.clone();
        let mut after = before.clone();
        after.add_tag(payload);

        self.persist(&after)?;
        state.indexes.reindex_entity(&before, &after);
        state.entities.insert(id, after);
        Ok(())
    }

    fn remove_tag(&self, id: EntityId, payload: &str) -> Result<()> {
        let mut state = self.state.write();
        let entity = state
            .entities
            .get(&id)
            .ok_or_else(|| EntityDbError::EntityNotFound(id.to_string()))?;

        let before = entity.clone();
        let mut after = before.clone();
        after.remove_tag(payload);

        self.persist(&after)?;
        state.indexes.reindex_entity(&before, &after);
        state.entities.insert(id, after);
        Ok(())
    }

    fn get_entity_as_of(&self, id: EntityId, ts: i64) -> Result<Entity> {
        let entity = self.fetch(id)?;

        let mut tags = Vec::new();
        // Non-temporal tags survive as-is.
        for raw in &entity.tags {
            if temporal::classify(raw) == temporal::TagKind::NonTemporal {
                tags.push(raw.clone());
            }
        }
        // Per namespace, the latest temporal tag at or before ts survives.
        for (_, (_, _, _, raw)) in Self::snapshot_map(&entity, ts) {
            if temporal::classify(&raw) == temporal::TagKind::Temporal {
                tags.push(raw);
            }
        }

        let mut snapshot = Entity::new(id);
        snapshot.set_tags(tags);
        snapshot.content = entity.content.clone();
        snapshot.created_at = entity.created_at;
        snapshot.updated_at = ts;
        Ok(snapshot)
    }

    fn get_entity_history(&self, id: EntityId, limit: usize) -> Result<Vec<EntityChange>> {
        if limit == 0 {
            return Err(EntityDbError::InvalidFilter("limit must be positive".into()));
        }
        let mut changes = self.changes_for(id)?;
        changes.reverse();
        changes.truncate(limit);
        Ok(changes)
    }

    fn get_recent_changes(&self, limit: usize) -> Result<Vec<EntityChange>> {
        if limit == 0 {
            return Err(EntityDbError::InvalidFilter("limit must be positive".into()));
        }
        let ids = self.state.read().indexes.known_ids();

        let mut changes = Vec::new();
        for id in ids {
            changes.extend(self.changes_for(id)?);
        }
        changes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        changes.truncate(limit);
        Ok(changes)
    }

    fn get_entity_diff(
        &self,
        id: EntityId,
        t1: i64,
        t2: i64,
    ) -> Result<(Entity, Entity, Vec<EntityChange>)> {
        if t1 > t2 {
            return Err(EntityDbError::InvalidFilter(
                "diff times must be ordered: t1 <= t2".into(),
            ));
        }

        let entity = self.fetch(id)?;
        let before_map = Self::snapshot_map(&entity, t1);
        let after_map = Self::snapshot_map(&entity, t2);

        let mut changes = Vec::new();
        for (key, (nanos, _, value, _)) in &after_map {
            match before_map.get(key) {
                None => changes.push(EntityChange {
                    kind: ChangeKind::Added,
                    timestamp: *nanos,
                    old_value: None,
                    new_value: Some(value.clone()),
                    entity_id: id,
                }),
                Some((_, _, old, _)) if old != value => changes.push(EntityChange {
                    kind: ChangeKind::Modified,
                    timestamp: *nanos,
                    old_value: Some(old.clone()),
                    new_value: Some(value.clone()),
                    entity_id: id,
                }),
                Some(_) => {}
            }
        }
        for (key, (nanos, _, old, _)) in &before_map {
            if !after_map.contains_key(key) {
                changes.push(EntityChange {
                    kind: ChangeKind::Removed,
                    timestamp: *nanos,
                    old_value: Some(old.clone()),
                    new_value: None,
                    entity_id: id,
                });
            }
        }
        changes.sort_by_key(|c| c.timestamp);

        let before = self.get_entity_as_of(id, t1)?;
        let after = self.get_entity_as_of(id, t2)?;
        Ok((before, after, changes))
    }

    fn search(&self, query: &Query) -> Result<Vec<Entity>> {
        // Primary index choice, most selective first: exact tag(s), then
        // wildcard, then namespace, then content, then full scan.
        let candidates = if !query.tags.is_empty() {
            let payloads: Vec<&str> = query.tags.iter().map(String::as_str).collect();
            self.list_by_tags(&payloads, true)?
        } else if let Some(first) = query.wildcard_tags.first() {
            self.list_by_tag_wildcard(first)?
        } else if let Some(namespace) = &query.namespace {
            self.list_by_namespace(namespace)?
        } else if let Some(needle) = &query.content_search {
            self.search_content(needle)?
        } else {
            self.list()?
        };

        query.apply(candidates)
    }

    fn reindex_tags(&self) -> Result<()> {
        // Build from a snapshot so reads stay unblocked during the rebuild.
        let snapshot: Vec<Entity> = self.list()?;
        let rebuilt = TemporalIndexes::rebuild(snapshot.iter());

        let mut state = self.state.write();
        state.indexes = rebuilt;
        info!(tags = state.indexes.tag_count(), "indexes rebuilt");
        Ok(())
    }

    fn verify_index_health(&self) -> Result<IndexHealth> {
        let state = self.state.read();
        let rebuilt = TemporalIndexes::rebuild(state.entities.values());
        let details = state.indexes.diff(&rebuilt);

        if details.is_empty() {
            Ok(IndexHealth::Ok)
        } else {
            warn!(divergences = details.len(), "index health check failed");
            Ok(IndexHealth::Inconsistent { details })
        }
    }

    fn list_by_lifecycle_state(&self, state: LifecycleState) -> Result<Vec<Entity>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|e| lifecycle::current_state(e) == state)
            .collect())
    }

    fn transaction(&self, f: &mut dyn FnMut(&mut TransactionBatch) -> Result<()>) -> Result<()> {
        let mut batch = TransactionBatch::default();
        f(&mut batch)?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write();

        // Validate the whole batch before touching anything.
        for entity in &batch.creates {
            if entity.id.is_nil() {
                return Err(EntityDbError::InvalidEntityId(entity.id.to_string()));
            }
            entity.validate_mandatory_tags()?;
            if state.entities.contains_key(&entity.id) {
                return Err(EntityDbError::TransactionConflict(format!(
                    "create of existing entity {}",
                    entity.id
                )));
            }
        }
        for entity in &batch.updates {
            if !state.entities.contains_key(&entity.id) {
                return Err(EntityDbError::EntityNotFound(entity.id.to_string()));
            }
        }
        for id in &batch.deletes {
            if !state.entities.contains_key(id) {
                return Err(EntityDbError::EntityNotFound(id.to_string()));
            }
        }

        // One redb transaction: all durable or none.
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTITIES_TABLE)?;
            for entity in batch.creates.iter().chain(batch.updates.iter()) {
                let record = EntityRecord::from_entity(entity, self.options.compression_level)?;
                let bytes = postcard::to_allocvec(&record)
                    .map_err(|e| EntityDbError::Serialization(e.to_string()))?;
                table.insert(entity.id.as_bytes(), bytes.as_slice())?;
            }
            for id in &batch.deletes {
                table.remove(id.as_bytes())?;
            }
        }
        txn.commit()?;

        // Mirror into memory; readers see the batch atomically because the
        // state lock is held throughout.
        for entity in batch.creates {
            state.indexes.index_entity(&entity);
            state.entities.insert(entity.id, entity);
        }
        for entity in batch.updates {
            if let Some(before) = state.entities.get(&entity.id).cloned() {
                state.indexes.reindex_entity(&before, &entity);
            }
            state.entities.insert(entity.id, entity);
        }
        for id in batch.deletes {
            if let Some(before) = state.entities.remove(&id) {
                state.indexes.remove_entity(&before);
            }
        }
        Ok(())
    }

    fn maintenance_ops(&self) -> Option<&dyn MaintenanceOps> {
        Some(self)
    }
}

impl MaintenanceOps for Store {
    fn flush(&self) -> Result<()> {
        // Commits are durable as they happen; nothing is buffered.
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTITIES_TABLE)?;
        let durable = table.len()? as usize;
        let resident = self.state.read().entities.len();
        if durable != resident {
            return Err(EntityDbError::Internal(format!(
                "durable store holds {durable} entities, memory holds {resident}"
            )));
        }
        Ok(())
    }

    fn checkpoint(&self, name: &str) -> Result<()> {
        let backups = self.root.join("backups");
        fs::create_dir_all(&backups)?;

        // Hold the write lock so the copied file is a quiescent snapshot.
        let _guard = self.state.write();
        let src = self.root.join(&self.options.filename);
        let dst = backups.join(format!("{name}.redb"));
        fs::copy(&src, &dst)?;
        info!(backup = %dst.display(), "checkpoint written");
        Ok(())
    }
}
