//! Tag-based RBAC: permission checks over a user entity's stripped tags.

use crate::entity::Entity;
use crate::error::{EntityDbError, Result};
use crate::tag;

/// Role tag that short-circuits every permission check.
const ADMIN_ROLE_TAG: &str = "rbac:role:admin";

/// Checks whether a user may perform `resource:action`.
///
/// The user's stripped tags are scanned for, in order: `rbac:role:admin`
/// (grant everything), the global wildcards `rbac:perm:*` /
/// `rbac:perm:*:*`, the exact `rbac:perm:<resource>:<action>`, and the
/// resource wildcard `rbac:perm:<resource>:*`. A missing user fails
/// closed.
pub fn check_permission(user: Option<&Entity>, resource_action: &str) -> Result<()> {
    let required = format!("rbac:perm:{resource_action}");

    let Some(user) = user else {
        return Err(EntityDbError::PermissionDenied { required });
    };

    let tags = user.get_tags_without_timestamp();
    if tags.iter().any(|payload| payload == ADMIN_ROLE_TAG) {
        return Ok(());
    }
    if tag::has_permission(&tags, &required) {
        return Ok(());
    }

    Err(EntityDbError::PermissionDenied { required })
}

/// Boolean form of [`check_permission`].
pub fn is_allowed(user: Option<&Entity>, resource_action: &str) -> bool {
    check_permission(user, resource_action).is_ok()
}
