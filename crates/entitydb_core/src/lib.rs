//! EntityDB Core Library
//!
//! A temporal, tag-oriented storage engine: every fact about an entity is
//! a timestamped tag, so the database answers both "what is true now" and
//! "what was true at time T" uniformly. This crate is the storage and
//! temporal-query core:
//! - The entity data model with lifecycle states
//! - Temporal tag representation and indexes
//! - The repository contract (CRUD, tag search, point-in-time
//!   reconstruction, history, diff)
//! - Tag-indexed sessions with cached validation
//! - Tag-based RBAC with wildcard permissions
//!
//! # Quick Start
//!
//! ```
//! use entitydb_core::{Entity, EntityId, EntityRepository, Store};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let store = Store::open(tmp.path().join("data")).unwrap();
//!
//! let mut entity = Entity::with_mandatory_tags(
//!     EntityId::generate(&[]),
//!     "document",
//!     "default",
//!     EntityId::generate(&[]),
//! );
//! entity.add_tag("status:draft");
//! let id = entity.id;
//!
//! store.create(entity).unwrap();
//!
//! let loaded = store.get_by_id(id).unwrap();
//! assert_eq!(loaded.get_tag_value("status"), "draft");
//! ```
//!
//! # Temporal queries
//!
//! ```
//! use entitydb_core::{Entity, EntityId, EntityRepository, Store};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let store = Store::open(tmp.path().join("data")).unwrap();
//!
//! let mut entity = Entity::with_mandatory_tags(
//!     EntityId::generate(&[]),
//!     "document",
//!     "default",
//!     EntityId::generate(&[]),
//! );
//! let t0 = entitydb_core::temporal::now_nanos();
//! entity.add_tag_at("status:draft", t0);
//! entity.add_tag_at("status:published", t0 + 1_000_000_000);
//! let id = entity.id;
//! store.create(entity).unwrap();
//!
//! // What was true half a second in?
//! let snapshot = store.get_entity_as_of(id, t0 + 500_000_000).unwrap();
//! assert_eq!(snapshot.get_tag_value("status"), "draft");
//! ```

mod bootstrap;
mod config;
mod entity;
mod entity_id;
mod error;
mod index;
mod interner;
mod lifecycle;
mod maintenance;
mod query;
mod rbac;
mod repository;
mod retention;
mod session;
mod store;
mod tag;
pub mod temporal;

pub use bootstrap::{
    authenticate, ensure_system, verify_with_timeout, BootstrapReport, PasswordHasher,
    Sha256PasswordHasher, VERIFY_TIMEOUT,
};
pub use config::{
    Config, HttpConfig, LoggingConfig, RateLimitConfig, SecurityConfig, ServerConfig,
    StorageConfig, ThrottleConfig,
};
pub use entity::{ChunkConfig, Entity, MANDATORY_TAGS, MAX_CONTENT_SIZE};
pub use entity_id::EntityId;
pub use error::{EntityDbError, ErrorKind, Result};
pub use index::TemporalIndexes;
pub use interner::{Interner, InternerConfig, InternerStats};
pub use lifecycle::{
    archive, current_state, purge, recovery_history, restore, soft_delete, state_entered_at,
    transition, transition_at, LifecycleState, TransitionRecord,
};
pub use maintenance::{
    interner_trim_task, retention_task, session_cleanup_task, MaintenanceScheduler,
};
pub use query::{
    glob_match, parse_time_literal, sql_like_match, Connector, Filter, FilterOp, Query,
    SortDirection,
};
pub use rbac::{check_permission, is_allowed};
pub use repository::{
    ChangeKind, EntityChange, EntityRepository, IndexHealth, MaintenanceOps, TransactionBatch,
};
pub use retention::{
    parse_duration_nanos, parse_size_bytes, AgeBasis, AppliedTransition, Condition,
    EvaluationReport, Policy, RetentionEngine, Rule, Selector,
};
pub use session::{SessionStore, DEFAULT_SESSION_TTL};
pub use store::{Store, StoreOptions, STORE_SCHEMA_VERSION};
pub use tag::{has_permission, is_namespace, parse as parse_tag, value_of, ParsedTag};
pub use temporal::{
    classify, format_temporal, now_nanos, parse_temporal, strip_timestamp, TagKind,
    TEMPORAL_SEPARATOR,
};

/// Time provider trait for testing.
///
/// Allows injecting controlled time into sessions and retention sweeps to
/// test expiry behavior. Production code uses the system clock unless a
/// provider is set via the respective `with_time_provider()`.
pub trait TimeProvider: Send + Sync {
    /// Returns the current time in nanoseconds since the Unix epoch.
    fn now_nanos(&self) -> i64;
}

impl<F> TimeProvider for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now_nanos(&self) -> i64 {
        self()
    }
}
