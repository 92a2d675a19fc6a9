//! The universal entity record: temporal tags, content, derived caches.

use crate::entity_id::EntityId;
use crate::error::{EntityDbError, Result};
use crate::interner::Interner;
use crate::tag;
use crate::temporal::{self, format_temporal};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

/// Tag namespaces every entity must carry at creation.
pub const MANDATORY_TAGS: [&str; 5] = ["type", "dataset", "created_at", "created_by", "uuid"];

/// Maximum content size accepted by the inline path (100 MB).
/// This prevents OOM from unbounded streams.
pub const MAX_CONTENT_SIZE: usize = 100 * 1024 * 1024;

/// Chunking configuration for streamed content.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Content at or below this size is stored inline on the entity.
    pub inline_threshold: usize,
    /// Size of each chunk entity's content.
    pub chunk_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            inline_threshold: 4 * 1024 * 1024,
            chunk_size: 4 * 1024 * 1024,
        }
    }
}

/// Derived tag views, rebuilt lazily after any mutation.
///
/// `valid_len` records the tag-vector length the caches were built against;
/// a read first checks it so a stale cache is never served.
#[derive(Default)]
struct TagCaches {
    valid_len: usize,
    values: HashMap<String, Arc<str>>,
    clean: Option<Arc<Vec<Arc<str>>>>,
}

/// The single universal record: an id, an ordered temporal tag sequence,
/// and optional opaque content.
///
/// Insertion order of `tags` is preserved; temporal ordering is by the
/// embedded timestamp, with later position breaking ties.
#[derive(Serialize, Deserialize)]
pub struct Entity {
    /// Immutable 32-char lowercase hex id.
    pub id: EntityId,

    /// Ordered temporal tag strings (`nanos│payload`, or legacy payloads).
    pub tags: Vec<String>,

    /// Opaque content bytes; empty for tag-only entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,

    /// Creation time, nanoseconds since the Unix epoch.
    pub created_at: i64,

    /// Last mutation time, nanoseconds since the Unix epoch.
    pub updated_at: i64,

    #[serde(skip)]
    caches: Mutex<TagCaches>,
}

impl Entity {
    /// Creates an empty entity with the given id.
    pub fn new(id: EntityId) -> Self {
        let now = temporal::now_nanos();
        Self {
            id,
            tags: Vec::new(),
            content: None,
            created_at: now,
            updated_at: now,
            caches: Mutex::new(TagCaches::default()),
        }
    }

    /// Creates an entity pre-populated with the five mandatory tags.
    pub fn with_mandatory_tags(
        id: EntityId,
        entity_type: &str,
        dataset: &str,
        created_by: EntityId,
    ) -> Self {
        let mut entity = Self::new(id);
        entity.add_tag(&format!("type:{entity_type}"));
        entity.add_tag(&format!("dataset:{dataset}"));
        entity.add_tag(&format!("created_at:{}", entity.created_at));
        entity.add_tag(&format!("created_by:{created_by}"));
        entity.add_tag(&format!("uuid:{id}"));
        entity
    }

    /// Appends a payload stamped with the current nanosecond clock.
    pub fn add_tag(&mut self, payload: &str) {
        self.add_tag_at(payload, temporal::now_nanos());
    }

    /// Appends a payload with an explicit timestamp.
    pub fn add_tag_at(&mut self, payload: &str, nanos: i64) {
        let canonical = Interner::global().intern(payload);
        self.tags.push(format_temporal(&canonical, nanos));
        self.updated_at = self.updated_at.max(nanos).max(temporal::now_nanos());
        self.invalidate_caches();
    }

    /// Replaces the whole tag vector with raw tag strings as stored.
    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.tags = tags;
        self.updated_at = temporal::now_nanos();
        self.invalidate_caches();
    }

    /// Removes every tag whose stripped payload equals the given payload.
    ///
    /// Returns true if anything was removed.
    pub fn remove_tag(&mut self, payload: &str) -> bool {
        let before = self.tags.len();
        self.tags
            .retain(|t| temporal::strip_timestamp(t) != payload);
        let removed = self.tags.len() != before;
        if removed {
            self.updated_at = temporal::now_nanos();
            self.invalidate_caches();
        }
        removed
    }

    /// Returns true if any tag's stripped payload equals the given payload.
    pub fn has_tag(&self, payload: &str) -> bool {
        self.tags
            .iter()
            .any(|t| temporal::strip_timestamp(t) == payload)
    }

    /// Returns the value of the most recent tag whose payload begins with
    /// `namespace:`, or the empty string if none does.
    ///
    /// Equal timestamps resolve to the later position in the tag vector.
    pub fn get_tag_value(&self, namespace: &str) -> String {
        let mut caches = self.caches.lock();
        self.ensure_valid(&mut caches);

        if let Some(value) = caches.values.get(namespace) {
            return value.to_string();
        }

        let mut best: Option<(i64, usize, &str)> = None;
        for (pos, raw) in self.tags.iter().enumerate() {
            let (nanos, payload) = temporal::parse_any(raw);
            let Some(value) = tag::value_of(payload, namespace) else {
                continue;
            };
            // Position breaks timestamp ties: later append is newer.
            if best.map_or(true, |(n, p, _)| (nanos, pos) >= (n, p)) {
                best = Some((nanos, pos, value));
            }
        }

        let value: Arc<str> = Interner::global().intern(best.map_or("", |(_, _, v)| v));
        caches
            .values
            .insert(namespace.to_string(), Arc::clone(&value));
        value.to_string()
    }

    /// Returns every payload in original order, timestamps stripped.
    pub fn get_tags_without_timestamp(&self) -> Vec<String> {
        let mut caches = self.caches.lock();
        self.ensure_valid(&mut caches);

        let clean = caches.clean.get_or_insert_with(|| {
            let interner = Interner::global();
            Arc::new(
                self.tags
                    .iter()
                    .map(|t| interner.intern(temporal::strip_timestamp(t)))
                    .collect(),
            )
        });
        clean.iter().map(|s| s.to_string()).collect()
    }

    /// Returns the deduplicated latest value per namespace, sorted.
    ///
    /// The dedup key is everything before the payload's last `:`; for each
    /// key only the most recent value survives.
    pub fn get_current_tags(&self) -> Vec<String> {
        let mut latest: HashMap<&str, (i64, usize, &str)> = HashMap::new();
        for (pos, raw) in self.tags.iter().enumerate() {
            let (nanos, payload) = temporal::parse_any(raw);
            let Some(split) = payload.rfind(':') else {
                continue;
            };
            let key = &payload[..split];
            let entry = latest.entry(key).or_insert((nanos, pos, payload));
            if (nanos, pos) >= (entry.0, entry.1) {
                *entry = (nanos, pos, payload);
            }
        }

        let mut current: Vec<String> = latest
            .into_values()
            .map(|(_, _, payload)| payload.to_string())
            .collect();
        current.sort();
        current
    }

    /// Records a relationship as a `<reltype>:<target>` tag.
    ///
    /// Relationships have no separate table; they are ordinary tags whose
    /// value is the target entity's id.
    pub fn add_relationship(&mut self, reltype: &str, target: EntityId) {
        self.add_tag(&format!("{reltype}:{target}"));
    }

    /// Returns the target ids of every relationship tag of the given type.
    ///
    /// Tags whose value is not a well-formed entity id are skipped.
    pub fn get_relationships(&self, reltype: &str) -> Vec<EntityId> {
        self.tags
            .iter()
            .filter_map(|raw| tag::value_of(raw, reltype))
            .filter_map(|value| EntityId::parse(value).ok())
            .collect()
    }

    /// Returns all payloads within a namespace, preserving temporal history.
    pub fn get_tags_by_namespace(&self, namespace: &str) -> Vec<String> {
        self.tags
            .iter()
            .map(|t| temporal::strip_timestamp(t))
            .filter(|p| tag::is_namespace(p, namespace))
            .map(|p| p.to_string())
            .collect()
    }

    /// Consumes a reader and attaches its bytes as content.
    ///
    /// Content at or below the inline threshold is stored on the entity with
    /// `content:type`, `content:size` and `content:checksum` tags. Larger
    /// streams are split into chunk entities (returned for the caller to
    /// persist) while this entity keeps empty content plus `content:chunks:N`
    /// and `content:chunk-size:S` tags.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the stream exceeds [`MAX_CONTENT_SIZE`], or
    /// the reader's I/O error.
    pub fn set_content_from_stream(
        &mut self,
        reader: &mut dyn Read,
        mime: &str,
        cfg: &ChunkConfig,
    ) -> Result<Vec<Entity>> {
        let mut data = Vec::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            if data.len() > MAX_CONTENT_SIZE {
                return Err(EntityDbError::ContentTooLarge {
                    size: data.len(),
                    limit: MAX_CONTENT_SIZE,
                });
            }
        }

        let checksum = blake3::hash(&data);
        self.add_tag(&format!("content:type:{mime}"));
        self.add_tag(&format!("content:size:{}", data.len()));
        self.add_tag(&format!("content:checksum:{}", checksum.to_hex()));

        if data.len() <= cfg.inline_threshold {
            self.content = Some(data);
            return Ok(Vec::new());
        }

        let dataset = self.get_tag_value("dataset");
        let created_by = self.get_tag_value("created_by");
        let chunks: Vec<&[u8]> = data.chunks(cfg.chunk_size.max(1)).collect();

        self.add_tag(&format!("content:chunks:{}", chunks.len()));
        self.add_tag(&format!("content:chunk-size:{}", cfg.chunk_size));
        self.content = None;

        let mut chunk_entities = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.into_iter().enumerate() {
            let chunk_id = EntityId::generate(&[]);
            let mut chunk_entity = Entity::new(chunk_id);
            chunk_entity.add_tag("type:chunk");
            if !dataset.is_empty() {
                chunk_entity.add_tag(&format!("dataset:{dataset}"));
            }
            if !created_by.is_empty() {
                chunk_entity.add_tag(&format!("created_by:{created_by}"));
            }
            chunk_entity.add_tag(&format!("created_at:{}", chunk_entity.created_at));
            chunk_entity.add_tag(&format!("uuid:{chunk_id}"));
            chunk_entity.add_tag(&format!("parent:{}", self.id));
            chunk_entity.add_tag(&format!("content:chunk:{i}"));
            chunk_entity.add_tag(&format!("content:size:{}", chunk.len()));
            chunk_entity.add_tag(&format!("content:checksum:{}", blake3::hash(chunk).to_hex()));
            chunk_entity.content = Some(chunk.to_vec());
            chunk_entities.push(chunk_entity);
        }

        Ok(chunk_entities)
    }

    /// Validates that all five mandatory tags are present.
    ///
    /// # Errors
    ///
    /// Returns `MissingMandatoryTag` naming the first absent namespace.
    pub fn validate_mandatory_tags(&self) -> Result<()> {
        for mandatory in MANDATORY_TAGS {
            if self.get_tag_value(mandatory).is_empty() {
                return Err(EntityDbError::MissingMandatoryTag {
                    entity: self.id.to_string(),
                    tag: mandatory,
                });
            }
        }
        // The uuid tag must agree with the record id.
        let claimed = self.get_tag_value("uuid");
        if claimed != self.id.as_hex() {
            return Err(EntityDbError::Internal(format!(
                "entity {} carries uuid tag {claimed}",
                self.id
            )));
        }
        Ok(())
    }

    fn invalidate_caches(&self) {
        *self.caches.lock() = TagCaches::default();
    }

    fn ensure_valid(&self, caches: &mut TagCaches) {
        if caches.valid_len != self.tags.len() {
            *caches = TagCaches {
                valid_len: self.tags.len(),
                ..TagCaches::default()
            };
        }
    }
}

impl Clone for Entity {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tags: self.tags.clone(),
            content: self.content.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            caches: Mutex::new(TagCaches::default()),
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.tags == other.tags
            && self.content == other.content
            && self.created_at == other.created_at
            && self.updated_at == other.updated_at
    }
}

impl Eq for Entity {}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("tags", &self.tags.len())
            .field("content", &self.content.as_ref().map(Vec::len))
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}
