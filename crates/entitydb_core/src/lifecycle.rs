//! Entity lifecycle state machine, stored entirely in tags.
//!
//! The current state is whatever the latest `lifecycle:state:` tag says
//! (absence means active). A transition appends the new state tag, audit
//! tags, and a `transition:from->to` marker, all stamped with one shared
//! timestamp so history reconstruction can correlate them.

use crate::entity::Entity;
use crate::entity_id::EntityId;
use crate::error::{EntityDbError, Result};
use crate::tag;
use crate::temporal;

/// The four lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Normal, visible state; the default for entities with no state tag.
    Active,
    /// Tombstoned but recoverable.
    SoftDeleted,
    /// Cold storage; no longer restorable to active directly.
    Archived,
    /// Terminal; eligible for physical deletion.
    Purged,
}

impl LifecycleState {
    /// Wire name used in `lifecycle:state:` tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::SoftDeleted => "soft_deleted",
            Self::Archived => "archived",
            Self::Purged => "purged",
        }
    }

    /// Parses a wire name back into a state.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "soft_deleted" => Some(Self::SoftDeleted),
            "archived" => Some(Self::Archived),
            "purged" => Some(Self::Purged),
            _ => None,
        }
    }

    /// The set of states this state may transition into.
    pub fn allowed_transitions(&self) -> &'static [LifecycleState] {
        match self {
            Self::Active => &[Self::SoftDeleted],
            Self::SoftDeleted => &[Self::Active, Self::Archived],
            Self::Archived => &[Self::Purged],
            Self::Purged => &[],
        }
    }

    /// Returns true if moving to `target` is legal from this state.
    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        self.allowed_transitions().contains(&target)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit tag names for a given transition.
struct AuditNames {
    by: &'static str,
    reason: &'static str,
    policy: &'static str,
}

fn audit_names(from: LifecycleState, to: LifecycleState) -> AuditNames {
    match (from, to) {
        (LifecycleState::Active, LifecycleState::SoftDeleted) => AuditNames {
            by: "deleted_by",
            reason: "delete_reason",
            policy: "deletion_policy",
        },
        (LifecycleState::SoftDeleted, LifecycleState::Active) => AuditNames {
            by: "restored_by",
            reason: "restore_reason",
            policy: "restore_policy",
        },
        (LifecycleState::SoftDeleted, LifecycleState::Archived) => AuditNames {
            by: "archived_by",
            reason: "archive_reason",
            policy: "archive_policy",
        },
        (LifecycleState::Archived, LifecycleState::Purged) => AuditNames {
            by: "purged_by",
            reason: "purge_reason",
            policy: "purge_policy",
        },
        // Unreachable for legal transitions; transition() validates first.
        _ => AuditNames {
            by: "changed_by",
            reason: "change_reason",
            policy: "change_policy",
        },
    }
}

/// Returns the entity's current lifecycle state.
///
/// The latest-timestamped `lifecycle:state:` tag decides; position breaks
/// ties; no such tag means active.
pub fn current_state(entity: &Entity) -> LifecycleState {
    let value = entity.get_tag_value("lifecycle:state");
    LifecycleState::parse(&value).unwrap_or(LifecycleState::Active)
}

/// Returns when the entity last entered the given state, if it ever did.
pub fn state_entered_at(entity: &Entity, state: LifecycleState) -> Option<i64> {
    let wanted = format!("lifecycle:state:{state}");
    entity
        .tags
        .iter()
        .enumerate()
        .filter_map(|(pos, raw)| {
            let (nanos, payload) = temporal::parse_any(raw);
            (payload == wanted).then_some((nanos, pos))
        })
        .max()
        .map(|(nanos, _)| nanos)
}

/// Applies a lifecycle transition, appending state, audit and marker tags.
///
/// All tags of one transition share a single timestamp.
///
/// # Errors
///
/// Returns `IllegalTransition` (without mutating the entity) if the target
/// is not in the current state's transition set.
pub fn transition(
    entity: &mut Entity,
    target: LifecycleState,
    actor: EntityId,
    reason: &str,
    policy: Option<&str>,
) -> Result<()> {
    transition_at(entity, target, actor, reason, policy, temporal::now_nanos())
}

/// [`transition`] with an explicit timestamp; retention sweeps stamp with
/// their own clock so state ages line up under test time.
pub fn transition_at(
    entity: &mut Entity,
    target: LifecycleState,
    actor: EntityId,
    reason: &str,
    policy: Option<&str>,
    stamp: i64,
) -> Result<()> {
    let from = current_state(entity);
    if !from.can_transition_to(target) {
        return Err(EntityDbError::IllegalTransition {
            from: from.as_str(),
            to: target.as_str(),
        });
    }

    let names = audit_names(from, target);

    entity.add_tag_at(&format!("lifecycle:state:{target}"), stamp);
    entity.add_tag_at(&format!("{}:{actor}", names.by), stamp);
    entity.add_tag_at(&format!("{}:{reason}", names.reason), stamp);
    if let Some(policy) = policy {
        entity.add_tag_at(&format!("{}:{policy}", names.policy), stamp);
    }
    entity.add_tag_at(&format!("transition:{from}->{target}"), stamp);

    Ok(())
}

/// Soft-deletes an active entity.
pub fn soft_delete(
    entity: &mut Entity,
    actor: EntityId,
    reason: &str,
    policy: Option<&str>,
) -> Result<()> {
    transition(entity, LifecycleState::SoftDeleted, actor, reason, policy)
}

/// Restores a soft-deleted entity to active.
pub fn restore(
    entity: &mut Entity,
    actor: EntityId,
    reason: &str,
    policy: Option<&str>,
) -> Result<()> {
    transition(entity, LifecycleState::Active, actor, reason, policy)
}

/// Archives a soft-deleted entity.
pub fn archive(
    entity: &mut Entity,
    actor: EntityId,
    reason: &str,
    policy: Option<&str>,
) -> Result<()> {
    transition(entity, LifecycleState::Archived, actor, reason, policy)
}

/// Purges an archived entity. Terminal.
pub fn purge(
    entity: &mut Entity,
    actor: EntityId,
    reason: &str,
    policy: Option<&str>,
) -> Result<()> {
    transition(entity, LifecycleState::Purged, actor, reason, policy)
}

/// One reconstructed transition with its correlated audit metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    /// State left behind.
    pub from: String,
    /// State entered.
    pub to: String,
    /// Shared timestamp of the transition's tags.
    pub timestamp: i64,
    /// Actor id from the `_by` audit tag, when present.
    pub by: Option<String>,
    /// Reason text, when present.
    pub reason: Option<String>,
    /// Policy name, when the transition was policy-driven.
    pub policy: Option<String>,
}

/// Reconstructs the transition history from `transition:` tags.
///
/// Audit tags are matched to their transition by identical timestamp.
/// Records are returned oldest first.
pub fn recovery_history(entity: &Entity) -> Vec<TransitionRecord> {
    let mut records = Vec::new();

    for raw in &entity.tags {
        let (nanos, payload) = temporal::parse_any(raw);
        let Some(rest) = tag::value_of(payload, "transition") else {
            continue;
        };
        let Some((from, to)) = rest.split_once("->") else {
            continue;
        };

        let mut record = TransitionRecord {
            from: from.to_string(),
            to: to.to_string(),
            timestamp: nanos,
            by: None,
            reason: None,
            policy: None,
        };

        for other in &entity.tags {
            let (other_nanos, other_payload) = temporal::parse_any(other);
            if other_nanos != nanos {
                continue;
            }
            if let Some(v) = suffix_value(other_payload, "_by") {
                record.by = Some(v.to_string());
            } else if let Some(v) = suffix_value(other_payload, "_reason") {
                record.reason = Some(v.to_string());
            } else if let Some(v) = suffix_value(other_payload, "_policy") {
                record.policy = Some(v.to_string());
            }
        }

        records.push(record);
    }

    records.sort_by_key(|r| r.timestamp);
    records
}

/// Matches payloads like `deleted_by:<v>` by namespace suffix.
fn suffix_value<'a>(payload: &'a str, suffix: &str) -> Option<&'a str> {
    let (namespace, value) = payload.split_once(':')?;
    namespace.ends_with(suffix).then_some(value)
}
