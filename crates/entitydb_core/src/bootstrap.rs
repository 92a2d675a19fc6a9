//! System bootstrap: the system user, the default admin, and password
//! verification.
//!
//! The system user is the ownership root every bootstrap entity descends
//! from; it is the only entity allowed to name itself as creator. The
//! password-hashing primitive is pluggable behind [`PasswordHasher`]; the
//! shipped implementation is an iterated salted SHA-256 digest.

use crate::config::SecurityConfig;
use crate::entity::Entity;
use crate::entity_id::EntityId;
use crate::error::{EntityDbError, ErrorKind, Result};
use crate::repository::EntityRepository;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Budget for one password verification.
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Digest format marker for the shipped hasher.
const DIGEST_PREFIX: &str = "edb1";

/// Pluggable salted password digest producer/verifier.
pub trait PasswordHasher: Send + Sync {
    /// Produces a salted digest for storage in a user entity's content.
    fn hash(&self, password: &str) -> Result<Vec<u8>>;

    /// Checks a password against a stored digest.
    fn verify(&self, password: &str, digest: &[u8]) -> Result<bool>;
}

/// Iterated salted SHA-256 digest: `edb1$<cost>$<salt>$<digest>`.
///
/// The cost is a power-of-two exponent for the iteration count, so cost 12
/// means 4096 rounds.
pub struct Sha256PasswordHasher {
    cost: u32,
}

impl Sha256PasswordHasher {
    /// Creates a hasher with the given cost exponent (clamped to [4, 20]).
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(4, 20),
        }
    }

    fn digest(&self, password: &str, salt: &[u8], cost: u32) -> Vec<u8> {
        let mut acc = Sha256::new()
            .chain_update(salt)
            .chain_update(password.as_bytes())
            .finalize();
        for _ in 1..(1u64 << cost) {
            acc = Sha256::new().chain_update(acc).finalize();
        }
        acc.to_vec()
    }
}

impl Default for Sha256PasswordHasher {
    fn default() -> Self {
        Self::new(12)
    }
}

impl PasswordHasher for Sha256PasswordHasher {
    fn hash(&self, password: &str) -> Result<Vec<u8>> {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);

        let digest = self.digest(password, &salt, self.cost);
        Ok(format!(
            "{DIGEST_PREFIX}${}${}${}",
            self.cost,
            hex::encode(salt),
            hex::encode(digest)
        )
        .into_bytes())
    }

    fn verify(&self, password: &str, digest: &[u8]) -> Result<bool> {
        let text = std::str::from_utf8(digest)
            .map_err(|_| EntityDbError::Internal("stored digest is not UTF-8".into()))?;
        let mut parts = text.split('$');
        let (prefix, cost, salt_hex, digest_hex) = match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(p), Some(c), Some(s), Some(d)) => (p, c, s, d),
            _ => {
                return Err(EntityDbError::Internal(
                    "stored digest has unknown shape".into(),
                ))
            }
        };
        if prefix != DIGEST_PREFIX {
            return Err(EntityDbError::Internal(format!(
                "unknown digest format {prefix:?}"
            )));
        }

        let cost: u32 = cost
            .parse()
            .map_err(|_| EntityDbError::Internal("bad digest cost".into()))?;
        let salt =
            hex::decode(salt_hex).map_err(|_| EntityDbError::Internal("bad digest salt".into()))?;
        let expected = hex::decode(digest_hex)
            .map_err(|_| EntityDbError::Internal("bad digest bytes".into()))?;

        let actual = self.digest(password, &salt, cost);
        // Constant-time-ish comparison; length mismatch fails immediately.
        if actual.len() != expected.len() {
            return Ok(false);
        }
        let mut diff = 0u8;
        for (a, b) in actual.iter().zip(expected.iter()) {
            diff |= a ^ b;
        }
        Ok(diff == 0)
    }
}

/// Verifies a password against a digest, racing a timer.
///
/// # Errors
///
/// Returns `AuthenticationTimeout` if verification loses the 5 s race.
pub fn verify_with_timeout(
    hasher: Arc<dyn PasswordHasher>,
    password: &str,
    digest: &[u8],
) -> Result<bool> {
    let (sender, receiver) = crossbeam_channel::bounded(1);
    let password = password.to_string();
    let digest = digest.to_vec();

    std::thread::spawn(move || {
        let _ = sender.send(hasher.verify(&password, &digest));
    });

    match receiver.recv_timeout(VERIFY_TIMEOUT) {
        Ok(result) => result,
        Err(_) => Err(EntityDbError::AuthenticationTimeout {
            seconds: VERIFY_TIMEOUT.as_secs(),
        }),
    }
}

/// What bootstrap found or created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// The system user's id.
    pub system_user: EntityId,
    /// The admin user's id.
    pub admin_user: EntityId,
    /// True if the system user was created (or replaced) this run.
    pub system_created: bool,
    /// True if the admin user was created (or replaced) this run.
    pub admin_created: bool,
}

/// Ensures the system user and default admin exist.
///
/// Recovery placeholders (`status:recovered`, `recovery:placeholder`) are
/// replaced by fresh entities without further validation.
pub fn ensure_system(
    repo: &dyn EntityRepository,
    hasher: &dyn PasswordHasher,
    security: &SecurityConfig,
) -> Result<BootstrapReport> {
    let system_id = EntityId::parse(&security.system_user_id)?;
    if system_id.is_nil() {
        return Err(EntityDbError::InvalidEntityId(
            "system user id must not be the null UUID".into(),
        ));
    }

    let system_created = ensure_system_user(repo, system_id)?;
    let (admin_user, admin_created) = ensure_admin_user(repo, hasher, security, system_id)?;

    Ok(BootstrapReport {
        system_user: system_id,
        admin_user,
        system_created,
        admin_created,
    })
}

fn is_recovery_placeholder(entity: &Entity) -> bool {
    entity.has_tag("status:recovered") || entity.has_tag("recovery:placeholder")
}

fn ensure_system_user(repo: &dyn EntityRepository, system_id: EntityId) -> Result<bool> {
    match repo.get_by_id(system_id) {
        Ok(existing) if is_recovery_placeholder(&existing) => {
            repo.delete(system_id)?;
        }
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    // The one permitted self-reference: the system user creates itself.
    let mut system = Entity::with_mandatory_tags(system_id, "user", "system", system_id);
    system.add_tag("system:root");
    system.add_tag("rbac:role:admin");
    system.add_tag("status:active");
    repo.create(system)?;
    info!(id = %system_id, "system user created");
    Ok(true)
}

fn ensure_admin_user(
    repo: &dyn EntityRepository,
    hasher: &dyn PasswordHasher,
    security: &SecurityConfig,
    system_id: EntityId,
) -> Result<(EntityId, bool)> {
    let username_tag = format!("username:{}", security.default_admin_username);

    let existing = repo
        .list_by_tag(&username_tag)?
        .into_iter()
        .find(|e| e.get_tag_value("type") == "user");
    if let Some(existing) = existing {
        if !is_recovery_placeholder(&existing) {
            return Ok((existing.id, false));
        }
        repo.delete(existing.id)?;
    }

    let admin_id = EntityId::generate(&[system_id]);
    let mut admin = Entity::with_mandatory_tags(admin_id, "user", "system", system_id);
    admin.add_tag(&username_tag);
    admin.add_tag(&format!("email:{}", security.default_admin_email));
    admin.add_tag("rbac:role:admin");
    admin.add_tag("status:active");
    admin.content = Some(hasher.hash(&security.default_admin_password)?);
    repo.create(admin)?;
    info!(id = %admin_id, username = %security.default_admin_username, "admin user created");
    Ok((admin_id, true))
}

/// Authenticates a username/password pair against stored user entities.
///
/// Both an unknown username and a wrong password surface as the same
/// `AuthenticationFailed`; nothing reveals which half was wrong.
pub fn authenticate(
    repo: &dyn EntityRepository,
    hasher: Arc<dyn PasswordHasher>,
    username: &str,
    password: &str,
) -> Result<Entity> {
    let user = repo
        .list_by_tag(&format!("username:{username}"))?
        .into_iter()
        .find(|e| e.get_tag_value("type") == "user");

    let Some(user) = user else {
        return Err(EntityDbError::AuthenticationFailed);
    };
    let Some(digest) = user.content.as_deref() else {
        return Err(EntityDbError::AuthenticationFailed);
    };

    match verify_with_timeout(hasher, password, digest) {
        Ok(true) => Ok(user),
        Ok(false) => Err(EntityDbError::AuthenticationFailed),
        Err(e) if e.kind() == ErrorKind::Timeout => Err(e),
        Err(_) => Err(EntityDbError::AuthenticationFailed),
    }
}
