//! In-memory temporal indexes: tag → entities, namespace prefix →
//! entities, and per-entity timestamp-ordered history.
//!
//! The indexes are rebuildable from entity data at any time; the store
//! keeps them current incrementally and uses a fresh rebuild to check
//! index health.

use crate::entity::Entity;
use crate::entity_id::EntityId;
use crate::query::glob_match;
use crate::temporal;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One history event: a payload observed at a timestamp.
///
/// The sequence number is the tag's position in the entity, which breaks
/// ties between equal timestamps and keeps re-appends of the same payload
/// distinct.
pub type HistoryKey = (i64, u32);

/// The three behavioral indexes of the engine.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TemporalIndexes {
    /// Stripped payload → ids carrying it (at any timestamp).
    tag_index: HashMap<String, BTreeSet<EntityId>>,

    /// Namespace prefix (every leading path, e.g. `rbac` and `rbac:perm`
    /// for `rbac:perm:x:y`) → ids with a tag under it.
    namespace_index: HashMap<String, BTreeSet<EntityId>>,

    /// Entity id → ordered (timestamp, position) → payload.
    history: HashMap<EntityId, BTreeMap<HistoryKey, String>>,
}

impl TemporalIndexes {
    /// Creates empty indexes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds all indexes from scratch.
    pub fn rebuild<'a>(entities: impl IntoIterator<Item = &'a Entity>) -> Self {
        let mut indexes = Self::new();
        for entity in entities {
            indexes.index_entity(entity);
        }
        indexes
    }

    /// Adds every tag of an entity to all three indexes.
    pub fn index_entity(&mut self, entity: &Entity) {
        let history = self.history.entry(entity.id).or_default();
        for (pos, raw) in entity.tags.iter().enumerate() {
            let (nanos, payload) = temporal::parse_any(raw);

            self.tag_index
                .entry(payload.to_string())
                .or_default()
                .insert(entity.id);

            for prefix in namespace_prefixes(payload) {
                self.namespace_index
                    .entry(prefix.to_string())
                    .or_default()
                    .insert(entity.id);
            }

            history.insert((nanos, pos as u32), payload.to_string());
        }
    }

    /// Removes an entity from all indexes.
    pub fn remove_entity(&mut self, entity: &Entity) {
        for raw in &entity.tags {
            let payload = temporal::strip_timestamp(raw);

            if let Some(ids) = self.tag_index.get_mut(payload) {
                ids.remove(&entity.id);
                if ids.is_empty() {
                    self.tag_index.remove(payload);
                }
            }
            for prefix in namespace_prefixes(payload) {
                if let Some(ids) = self.namespace_index.get_mut(prefix) {
                    ids.remove(&entity.id);
                    if ids.is_empty() {
                        self.namespace_index.remove(prefix);
                    }
                }
            }
        }
        self.history.remove(&entity.id);
    }

    /// Replaces an entity's index entries after a mutation.
    pub fn reindex_entity(&mut self, before: &Entity, after: &Entity) {
        self.remove_entity(before);
        self.index_entity(after);
    }

    /// Ids carrying the stripped payload.
    pub fn ids_for_tag(&self, payload: &str) -> Vec<EntityId> {
        self.tag_index
            .get(payload)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ids with any tag under the namespace prefix.
    pub fn ids_for_namespace(&self, namespace: &str) -> Vec<EntityId> {
        self.namespace_index
            .get(namespace)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ids with a stripped payload matching the glob pattern.
    pub fn ids_for_glob(&self, pattern: &str) -> Vec<EntityId> {
        let mut out = BTreeSet::new();
        for (payload, ids) in &self.tag_index {
            if glob_match(pattern, payload) {
                out.extend(ids.iter().copied());
            }
        }
        out.into_iter().collect()
    }

    /// Ids with a stripped payload matching an arbitrary predicate.
    pub fn ids_matching(&self, mut pred: impl FnMut(&str) -> bool) -> Vec<EntityId> {
        let mut out = BTreeSet::new();
        for (payload, ids) in &self.tag_index {
            if pred(payload) {
                out.extend(ids.iter().copied());
            }
        }
        out.into_iter().collect()
    }

    /// The full ordered history of one entity, oldest first.
    pub fn history_of(&self, id: EntityId) -> Option<&BTreeMap<HistoryKey, String>> {
        self.history.get(&id)
    }

    /// All ids present in the history index.
    pub fn known_ids(&self) -> Vec<EntityId> {
        self.history.keys().copied().collect()
    }

    /// Number of distinct indexed payloads.
    pub fn tag_count(&self) -> usize {
        self.tag_index.len()
    }

    /// Compares these indexes against another build, returning divergence
    /// descriptions (empty means equivalent).
    pub fn diff(&self, other: &TemporalIndexes) -> Vec<String> {
        let mut details = Vec::new();

        compare_keyed(
            "tag index",
            &self.tag_index,
            &other.tag_index,
            &mut details,
        );
        compare_keyed(
            "namespace index",
            &self.namespace_index,
            &other.namespace_index,
            &mut details,
        );

        let ours: BTreeSet<_> = self.history.keys().collect();
        let theirs: BTreeSet<_> = other.history.keys().collect();
        for id in ours.symmetric_difference(&theirs) {
            details.push(format!("history index: entity {id} present on one side only"));
        }
        for (id, events) in &self.history {
            if let Some(other_events) = other.history.get(id) {
                if events != other_events {
                    details.push(format!("history index: entity {id} events diverge"));
                }
            }
        }

        details
    }
}

/// Every leading path of a payload: `a:b:c` yields `a` and `a:b`.
fn namespace_prefixes(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .char_indices()
        .filter(|&(_, c)| c == ':')
        .map(|(idx, _)| &payload[..idx])
}

fn compare_keyed(
    label: &str,
    ours: &HashMap<String, BTreeSet<EntityId>>,
    theirs: &HashMap<String, BTreeSet<EntityId>>,
    details: &mut Vec<String>,
) {
    let our_keys: BTreeSet<_> = ours.keys().collect();
    let their_keys: BTreeSet<_> = theirs.keys().collect();
    for key in our_keys.symmetric_difference(&their_keys) {
        details.push(format!("{label}: key {key:?} present on one side only"));
    }
    for key in our_keys.intersection(&their_keys) {
        if ours[*key] != theirs[*key] {
            details.push(format!("{label}: key {key:?} id sets diverge"));
        }
    }
}
