use anyhow::{Context, Result};
use entitydb_core::{
    ensure_system, Entity, EntityId, EntityRepository, SecurityConfig, SessionStore,
    Sha256PasswordHasher, Store,
};
use std::sync::Arc;
use tempfile::TempDir;

/// An isolated, bootstrapped store in a temp directory.
pub struct TestWorkspace {
    dir: TempDir,
    store: Arc<Store>,
    /// System user id from bootstrap.
    pub system: EntityId,
    /// Default admin id from bootstrap.
    pub admin: EntityId,
    security: SecurityConfig,
}

/// Installs a log subscriber once per test binary; `RUST_LOG` filters.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

impl TestWorkspace {
    /// Creates a workspace with a fresh store and bootstrapped users.
    pub fn new() -> Result<Self> {
        init_tracing();
        let dir = TempDir::new().context("failed to create temp directory")?;
        let store = Arc::new(Store::open(dir.path().join("data"))?);

        let security = SecurityConfig {
            password_hash_cost: 6,
            ..SecurityConfig::default()
        };
        let hasher = Sha256PasswordHasher::new(security.password_hash_cost);
        let report = ensure_system(store.as_ref(), &hasher, &security)?;

        Ok(Self {
            dir,
            store,
            system: report.system_user,
            admin: report.admin_user,
            security,
        })
    }

    /// The repository under test.
    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    /// The security section the workspace was bootstrapped with.
    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }

    /// A session store over this workspace's repository.
    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(self.store())
    }

    /// The bootstrapped admin entity.
    pub fn admin_entity(&self) -> Result<Entity> {
        Ok(self.store.get_by_id(self.admin)?)
    }

    /// Creates and persists an entity of the given type with extra tags.
    pub fn create_entity(&self, entity_type: &str, tags: &[&str]) -> Result<EntityId> {
        let mut entity = Entity::with_mandatory_tags(
            EntityId::generate(&[self.system]),
            entity_type,
            "default",
            self.admin,
        );
        for tag in tags {
            entity.add_tag(tag);
        }
        let id = entity.id;
        self.store.create(entity)?;
        Ok(id)
    }

    /// Creates a user entity carrying the given rbac tags.
    pub fn create_user(&self, username: &str, rbac_tags: &[&str]) -> Result<Entity> {
        let mut user = Entity::with_mandatory_tags(
            EntityId::generate(&[self.system]),
            "user",
            "system",
            self.system,
        );
        user.add_tag(&format!("username:{username}"));
        for tag in rbac_tags {
            user.add_tag(tag);
        }
        self.store.create(user.clone())?;
        Ok(user)
    }

    /// Drops the store (releasing the directory lock) and reopens it from
    /// the same data directory.
    pub fn reopen(&mut self) -> Result<()> {
        let placeholder = Arc::new(Store::open(self.dir.path().join("reopen-scratch"))?);
        let old = std::mem::replace(&mut self.store, placeholder);
        drop(old);

        self.store = Arc::new(Store::open(self.dir.path().join("data"))?);
        Ok(())
    }
}
