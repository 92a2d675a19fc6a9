//! Temporal tag-indexed sessions with cached validation.
//!
//! Sessions are ordinary entities (`type:session`) found through the tag
//! index by their `token:` tag. Validation results are cached briefly per
//! token; the user entity is still re-fetched on every hit because
//! permission checks read its tags.

use crate::config::SecurityConfig;
use crate::entity::Entity;
use crate::entity_id::EntityId;
use crate::error::{EntityDbError, Result};
use crate::repository::EntityRepository;
use crate::temporal;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(2 * 3600);

/// How long a validation verdict may be served from cache.
const VALIDATION_CACHE_TTL: Duration = Duration::from_secs(30);

/// Bounded wait for a fresh token to become index-visible.
const CREATE_RETRIES: u32 = 5;
const CREATE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Bounded retry for token lookups.
const LOOKUP_RETRIES: u32 = 3;
const LOOKUP_RETRY_DELAY: Duration = Duration::from_millis(25);

struct CachedValidation {
    session_id: EntityId,
    user_id: EntityId,
    expires_at: DateTime<Utc>,
    cached_at: Instant,
}

/// Session creation, validation, refresh and invalidation over a
/// repository.
pub struct SessionStore {
    repo: Arc<dyn EntityRepository>,
    ttl: Duration,
    token_secret: String,
    cache: RwLock<HashMap<String, CachedValidation>>,
    time_provider: Option<Arc<dyn Fn() -> i64 + Send + Sync>>,
}

impl SessionStore {
    /// Creates a session store with the default 2 h TTL.
    pub fn new(repo: Arc<dyn EntityRepository>) -> Self {
        Self {
            repo,
            ttl: DEFAULT_SESSION_TTL,
            token_secret: String::new(),
            cache: RwLock::new(HashMap::new()),
            time_provider: None,
        }
    }

    /// Creates a session store configured from the security section.
    pub fn with_config(repo: Arc<dyn EntityRepository>, security: &SecurityConfig) -> Self {
        Self {
            repo,
            ttl: security.session_ttl(),
            token_secret: security.token_secret.clone(),
            cache: RwLock::new(HashMap::new()),
            time_provider: None,
        }
    }

    /// Overrides the session TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Injects a controlled clock for expiry tests.
    pub fn with_time_provider(
        mut self,
        provider: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Self {
        self.time_provider = Some(Arc::new(provider));
        self
    }

    fn now(&self) -> DateTime<Utc> {
        let nanos = match &self.time_provider {
            Some(provider) => provider(),
            None => temporal::now_nanos(),
        };
        DateTime::from_timestamp_nanos(nanos)
    }

    /// Creates a session entity for the user and waits until its token is
    /// findable through the tag index.
    ///
    /// # Errors
    ///
    /// Returns `RetryExhausted` if the token never became visible.
    pub fn create(&self, user: &Entity, ip: &str, user_agent: &str) -> Result<Entity> {
        let token = self.mint_token();
        let expires = self.now() + self.ttl;

        let session_id = EntityId::generate(&[]);
        let mut session = Entity::with_mandatory_tags(session_id, "session", "system", user.id);
        session.add_tag(&format!("token:{token}"));
        session.add_tag(&format!(
            "expires:{}",
            expires.to_rfc3339_opts(SecondsFormat::Nanos, true)
        ));
        session.add_tag(&format!("authenticated_as:{}", user.id));
        session.add_tag(&format!("ip:{ip}"));
        session.add_tag(&format!("user_agent:{user_agent}"));
        session.add_tag("session:active");

        self.repo.create(session)?;

        // The index may lag the write under some backends; wait it out.
        let token_tag = format!("token:{token}");
        for attempt in 0..CREATE_RETRIES {
            match self.repo.list_by_tag(&token_tag)?.into_iter().next() {
                Some(entity) => {
                    debug!(session = %entity.id, user = %user.id, "session created");
                    return Ok(entity);
                }
                None if attempt + 1 < CREATE_RETRIES => {
                    std::thread::sleep(CREATE_RETRY_DELAY)
                }
                None => {}
            }
        }
        Err(EntityDbError::RetryExhausted {
            operation: "session token",
            attempts: CREATE_RETRIES,
        })
    }

    /// Validates a token and returns the authenticated user entity.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` if no session carries the token after bounded
    /// retries, `SessionInvalidated`/`SessionExpired` for dead sessions,
    /// and `EntityNotFound` if the user has vanished.
    pub fn validate(&self, token: &str) -> Result<Entity> {
        // Fast path under the read lock.
        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(token) {
                if entry.cached_at.elapsed() < VALIDATION_CACHE_TTL {
                    if entry.expires_at <= self.now() {
                        return Err(EntityDbError::SessionExpired);
                    }
                    // Permission checks read tags, so the user entity must
                    // be fresh even on a cache hit.
                    return self.repo.get_by_id(entry.user_id);
                }
            }
        }

        let mut cache = self.cache.write();

        let session = self.find_session(token)?;
        if session.has_tag("status:invalidated") {
            return Err(EntityDbError::SessionInvalidated);
        }

        let expires_at = parse_expires(&session)?;
        if expires_at <= self.now() {
            return Err(EntityDbError::SessionExpired);
        }

        let user_value = session.get_tag_value("authenticated_as");
        let user_id = EntityId::parse(&user_value)
            .map_err(|_| EntityDbError::Internal(format!("session {} has no user", session.id)))?;
        let user = self.repo.get_by_id(user_id)?;

        cache.insert(
            token.to_string(),
            CachedValidation {
                session_id: session.id,
                user_id,
                expires_at,
                cached_at: Instant::now(),
            },
        );
        Ok(user)
    }

    /// Extends the session by a full TTL from now.
    pub fn refresh(&self, token: &str) -> Result<Entity> {
        let session = self.find_session(token)?;

        let old_expires = session.get_tag_value("expires");
        if !old_expires.is_empty() {
            self.repo
                .remove_tag(session.id, &format!("expires:{old_expires}"))?;
        }
        let new_expires = self.now() + self.ttl;
        self.repo.add_tag(
            session.id,
            &format!(
                "expires:{}",
                new_expires.to_rfc3339_opts(SecondsFormat::Nanos, true)
            ),
        )?;

        self.cache.write().remove(token);
        self.repo.get_by_id(session.id)
    }

    /// Invalidates the session: expiry in the past plus a
    /// `status:invalidated` marker, and the cache entry evicted.
    pub fn invalidate(&self, token: &str) -> Result<()> {
        let session = self.find_session(token)?;

        let past = self.now() - Duration::from_secs(1);
        self.repo.add_tag(
            session.id,
            &format!("expires:{}", past.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        )?;
        self.repo.add_tag(session.id, "status:invalidated")?;

        self.cache.write().remove(token);
        debug!(session = %session.id, "session invalidated");
        Ok(())
    }

    /// Deletes sessions whose expiry is in the past. Run by the
    /// maintenance scheduler.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.now();
        let mut purged = 0;

        for session in self.repo.list_by_tag("type:session")? {
            let Ok(expires_at) = parse_expires(&session) else {
                continue;
            };
            if expires_at <= now {
                self.repo.delete(session.id)?;
                purged += 1;
            }
        }

        if purged > 0 {
            // Drop cache entries whose sessions are gone.
            let mut cache = self.cache.write();
            cache.retain(|_, entry| self.repo.get_by_id(entry.session_id).is_ok());
        }
        Ok(purged)
    }

    /// Empties the validation cache (test teardown, logout-all).
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    fn find_session(&self, token: &str) -> Result<Entity> {
        let token_tag = format!("token:{token}");
        for attempt in 0..LOOKUP_RETRIES {
            if let Some(session) = self.repo.list_by_tag(&token_tag)?.into_iter().next() {
                return Ok(session);
            }
            if attempt + 1 < LOOKUP_RETRIES {
                std::thread::sleep(LOOKUP_RETRY_DELAY);
            }
        }
        Err(EntityDbError::SessionNotFound)
    }

    /// Mints a 256-bit hex token, mixed with the configured secret when
    /// one is set.
    fn mint_token(&self) -> String {
        let mut random = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut random);

        if self.token_secret.is_empty() {
            return hex::encode(random);
        }

        let mut hasher = Sha256::new();
        hasher.update(self.token_secret.as_bytes());
        hasher.update(random);
        hex::encode(hasher.finalize())
    }
}

fn parse_expires(session: &Entity) -> Result<DateTime<Utc>> {
    let value = session.get_tag_value("expires");
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            EntityDbError::Internal(format!(
                "session {} has unparseable expires tag {value:?}",
                session.id
            ))
        })
}
