//! Retention policies: selectors and rules that drive lifecycle
//! transitions on a schedule.

use crate::entity::Entity;
use crate::entity_id::EntityId;
use crate::error::{EntityDbError, Result};
use crate::lifecycle::{self, LifecycleState};
use crate::repository::EntityRepository;
use crate::temporal;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Which timestamp an age condition measures against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBasis {
    /// Age since entity creation.
    CreatedAt,
    /// Age since the last mutation.
    UpdatedAt,
}

/// A rule's trigger condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Entity older than the duration, measured against the chosen basis.
    Age {
        /// Duration literal, e.g. `24h`, `7d`.
        duration: String,
        /// Timestamp the age is measured from.
        basis: AgeBasis,
    },
    /// Entity has been in its current state longer than the duration.
    StateAge {
        /// Duration literal.
        duration: String,
    },
    /// Inline content is at least this large.
    Size {
        /// Size literal with optional `k`/`m`/`g` suffix, e.g. `512k`.
        at_least: String,
    },
    /// The entity carries the given stripped payload.
    TagExists {
        /// Payload to look for.
        tag: String,
    },
    /// The entity does not carry the given stripped payload.
    TagMissing {
        /// Payload that must be absent.
        tag: String,
    },
    /// Unconditional.
    Always,
}

impl Condition {
    /// Builds a condition from configuration strings.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCondition` for an unrecognized kind.
    pub fn from_config(kind: &str, value: &str) -> Result<Self> {
        match kind {
            "age" => Ok(Self::Age {
                duration: value.to_string(),
                basis: AgeBasis::CreatedAt,
            }),
            "state_age" => Ok(Self::StateAge {
                duration: value.to_string(),
            }),
            "size" => Ok(Self::Size {
                at_least: value.to_string(),
            }),
            "tag_exists" => Ok(Self::TagExists {
                tag: value.to_string(),
            }),
            "tag_missing" => Ok(Self::TagMissing {
                tag: value.to_string(),
            }),
            "always" => Ok(Self::Always),
            other => Err(EntityDbError::UnknownCondition(other.to_string())),
        }
    }
}

/// Chooses which entities a policy applies to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selector {
    /// Every payload here must be present.
    #[serde(default)]
    pub all_of: Vec<String>,

    /// No payload here may be present.
    #[serde(default)]
    pub none_of: Vec<String>,

    /// Each pattern must match at least one stripped payload.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// If non-empty, the entity's `type:` value must be listed.
    #[serde(default)]
    pub types: Vec<String>,

    /// If non-empty, the entity's `dataset:` value must be listed.
    #[serde(default)]
    pub datasets: Vec<String>,

    /// Minimum age against `created_at`, as a duration literal.
    #[serde(default)]
    pub min_age: Option<String>,

    /// Maximum age against `created_at`, as a duration literal.
    #[serde(default)]
    pub max_age: Option<String>,
}

impl Selector {
    /// Evaluates the selector against one entity.
    ///
    /// # Errors
    ///
    /// Returns `Validation` errors for malformed duration literals or
    /// regex patterns.
    pub fn matches(&self, entity: &Entity, now: i64) -> Result<bool> {
        for payload in &self.all_of {
            if !entity.has_tag(payload) {
                return Ok(false);
            }
        }
        for payload in &self.none_of {
            if entity.has_tag(payload) {
                return Ok(false);
            }
        }

        if !self.patterns.is_empty() {
            let clean = entity.get_tags_without_timestamp();
            for pattern in &self.patterns {
                let re = Regex::new(pattern)
                    .map_err(|e| EntityDbError::ConfigError(format!("bad pattern {pattern}: {e}")))?;
                if !clean.iter().any(|payload| re.is_match(payload)) {
                    return Ok(false);
                }
            }
        }

        if !self.types.is_empty() && !self.types.contains(&entity.get_tag_value("type")) {
            return Ok(false);
        }
        if !self.datasets.is_empty() && !self.datasets.contains(&entity.get_tag_value("dataset")) {
            return Ok(false);
        }

        let age = now.saturating_sub(entity.created_at);
        if let Some(min) = &self.min_age {
            if age < parse_duration_nanos(min)? {
                return Ok(false);
            }
        }
        if let Some(max) = &self.max_age {
            if age > parse_duration_nanos(max)? {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// A single state-transition rule inside a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// State the entity must be in for the rule to apply.
    pub from_state: String,
    /// State the rule moves the entity into.
    pub to_state: String,
    /// Trigger condition.
    pub condition: Condition,
    /// Reason recorded in the transition's audit tags.
    pub reason: String,
    /// Disabled rules are skipped.
    pub enabled: bool,
}

/// A named retention policy: a selector plus ordered rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Policy name, recorded in `<op>_policy:` audit tags.
    pub name: String,
    /// Disabled policies are skipped entirely.
    pub enabled: bool,
    /// Policies evaluate in ascending priority order.
    pub priority: i32,
    /// Which entities the policy applies to.
    pub selector: Selector,
    /// Transition rules, tried in order.
    pub rules: Vec<Rule>,
    /// Whether transitions record audit tags (reason + policy name).
    pub audit: bool,
}

/// One transition performed during an evaluation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransition {
    /// Entity that moved.
    pub entity_id: EntityId,
    /// Policy that triggered the move.
    pub policy: String,
    /// State left behind.
    pub from: LifecycleState,
    /// State entered.
    pub to: LifecycleState,
    /// The rule's reason.
    pub reason: String,
}

/// Report from one evaluation run.
#[derive(Debug, Default)]
pub struct EvaluationReport {
    /// Entities examined across all policies.
    pub entities_examined: usize,
    /// Policies that were enabled and ran.
    pub policies_applied: usize,
    /// Transitions performed.
    pub transitions: Vec<AppliedTransition>,
    /// Non-fatal per-entity errors.
    pub errors: Vec<String>,
}

/// Evaluates retention policies against a repository.
pub struct RetentionEngine {
    policies: Vec<Policy>,
    /// Acts-as identity for audit tags on policy-driven transitions.
    actor: EntityId,
    time_provider: Option<Arc<dyn Fn() -> i64 + Send + Sync>>,
}

impl RetentionEngine {
    /// Creates an engine over the given policies; `actor` is recorded in
    /// the `_by` audit tags (normally the system user).
    pub fn new(policies: Vec<Policy>, actor: EntityId) -> Self {
        Self {
            policies,
            actor,
            time_provider: None,
        }
    }

    /// Injects a controlled clock for testing age conditions.
    pub fn with_time_provider(
        mut self,
        provider: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Self {
        self.time_provider = Some(Arc::new(provider));
        self
    }

    fn now(&self) -> i64 {
        match &self.time_provider {
            Some(provider) => provider(),
            None => temporal::now_nanos(),
        }
    }

    /// Runs every enabled policy in ascending priority order.
    ///
    /// Each applicable entity gets at most one transition per policy per
    /// run; per-entity failures are collected in the report rather than
    /// aborting the sweep.
    pub fn evaluate(&self, repo: &dyn EntityRepository) -> Result<EvaluationReport> {
        let mut report = EvaluationReport::default();
        let now = self.now();

        let mut ordered: Vec<&Policy> = self.policies.iter().filter(|p| p.enabled).collect();
        ordered.sort_by_key(|p| p.priority);

        for policy in ordered {
            report.policies_applied += 1;
            let entities = repo.list()?;

            for entity in entities {
                report.entities_examined += 1;

                match self.apply_policy(policy, entity, now, repo) {
                    Ok(Some(applied)) => {
                        debug!(
                            policy = %applied.policy,
                            entity = %applied.entity_id,
                            from = %applied.from,
                            to = %applied.to,
                            "retention transition"
                        );
                        report.transitions.push(applied);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(policy = %policy.name, error = %e, "retention rule failed");
                        report.errors.push(format!("{}: {e}", policy.name));
                    }
                }
            }
        }

        Ok(report)
    }

    fn apply_policy(
        &self,
        policy: &Policy,
        mut entity: Entity,
        now: i64,
        repo: &dyn EntityRepository,
    ) -> Result<Option<AppliedTransition>> {
        if !policy.selector.matches(&entity, now)? {
            return Ok(None);
        }

        let current = lifecycle::current_state(&entity);
        for rule in policy.rules.iter().filter(|r| r.enabled) {
            let from = LifecycleState::parse(&rule.from_state).ok_or_else(|| {
                EntityDbError::ConfigError(format!("unknown from_state {}", rule.from_state))
            })?;
            let to = LifecycleState::parse(&rule.to_state).ok_or_else(|| {
                EntityDbError::ConfigError(format!("unknown to_state {}", rule.to_state))
            })?;

            if from != current || !condition_holds(&rule.condition, &entity, now)? {
                continue;
            }

            let (reason, policy_name) = if policy.audit {
                (rule.reason.as_str(), Some(policy.name.as_str()))
            } else {
                ("", None)
            };
            lifecycle::transition_at(&mut entity, to, self.actor, reason, policy_name, now)?;
            let entity_id = entity.id;
            repo.update(entity)?;

            return Ok(Some(AppliedTransition {
                entity_id,
                policy: policy.name.clone(),
                from: current,
                to,
                reason: rule.reason.clone(),
            }));
        }

        Ok(None)
    }
}

fn condition_holds(condition: &Condition, entity: &Entity, now: i64) -> Result<bool> {
    match condition {
        Condition::Age { duration, basis } => {
            let since = match basis {
                AgeBasis::CreatedAt => entity.created_at,
                AgeBasis::UpdatedAt => entity.updated_at,
            };
            Ok(now.saturating_sub(since) >= parse_duration_nanos(duration)?)
        }
        Condition::StateAge { duration } => {
            let state = lifecycle::current_state(entity);
            let entered = lifecycle::state_entered_at(entity, state).unwrap_or(entity.created_at);
            Ok(now.saturating_sub(entered) >= parse_duration_nanos(duration)?)
        }
        Condition::Size { at_least } => {
            let bytes = entity.content.as_ref().map_or(0, Vec::len) as i64;
            Ok(bytes >= parse_size_bytes(at_least)?)
        }
        Condition::TagExists { tag } => Ok(entity.has_tag(tag)),
        Condition::TagMissing { tag } => Ok(!entity.has_tag(tag)),
        Condition::Always => Ok(true),
    }
}

/// Parses a duration literal (`30s`, `90m`, `24h`, `7d`) into nanoseconds.
///
/// # Errors
///
/// Returns `InvalidDuration` on a missing or unknown suffix, or a
/// non-numeric magnitude.
pub fn parse_duration_nanos(literal: &str) -> Result<i64> {
    let literal = literal.trim();
    let split = literal
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| EntityDbError::InvalidDuration(literal.to_string()))?;
    let (digits, suffix) = literal.split_at(split);
    let magnitude: i64 = digits
        .parse()
        .map_err(|_| EntityDbError::InvalidDuration(literal.to_string()))?;

    let per_unit = match suffix {
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        "d" => 86_400 * 1_000_000_000,
        _ => return Err(EntityDbError::InvalidDuration(literal.to_string())),
    };

    magnitude
        .checked_mul(per_unit)
        .ok_or_else(|| EntityDbError::InvalidDuration(literal.to_string()))
}

/// Parses a size literal (`4096`, `512k`, `10m`, `1g`) into bytes.
///
/// # Errors
///
/// Returns `InvalidSize` on an unknown suffix or non-numeric magnitude.
pub fn parse_size_bytes(literal: &str) -> Result<i64> {
    let literal = literal.trim();
    let split = literal
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(literal.len());
    let (digits, suffix) = literal.split_at(split);
    let magnitude: i64 = digits
        .parse()
        .map_err(|_| EntityDbError::InvalidSize(literal.to_string()))?;

    let per_unit = match suffix {
        "" => 1,
        "k" | "K" => 1024,
        "m" | "M" => 1024 * 1024,
        "g" | "G" => 1024 * 1024 * 1024,
        _ => return Err(EntityDbError::InvalidSize(literal.to_string())),
    };

    magnitude
        .checked_mul(per_unit)
        .ok_or_else(|| EntityDbError::InvalidSize(literal.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_literals() {
        assert_eq!(parse_duration_nanos("30s").unwrap(), 30 * 1_000_000_000);
        assert_eq!(parse_duration_nanos("90m").unwrap(), 90 * 60 * 1_000_000_000);
        assert_eq!(
            parse_duration_nanos("24h").unwrap(),
            24 * 3_600 * 1_000_000_000
        );
        assert_eq!(
            parse_duration_nanos("7d").unwrap(),
            7 * 86_400 * 1_000_000_000
        );
    }

    #[test]
    fn test_bad_duration_literals() {
        for bad in ["", "h", "12", "5y", "1.5h"] {
            assert!(
                matches!(
                    parse_duration_nanos(bad),
                    Err(EntityDbError::InvalidDuration(_))
                ),
                "literal {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_size_literals() {
        assert_eq!(parse_size_bytes("4096").unwrap(), 4096);
        assert_eq!(parse_size_bytes("512k").unwrap(), 512 * 1024);
        assert_eq!(parse_size_bytes("10M").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size_bytes("1g").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_bad_size_literals() {
        for bad in ["", "k", "5t"] {
            assert!(matches!(
                parse_size_bytes(bad),
                Err(EntityDbError::InvalidSize(_))
            ));
        }
    }

    #[test]
    fn test_condition_from_config_unknown_kind() {
        assert!(matches!(
            Condition::from_config("frobnicate", "1"),
            Err(EntityDbError::UnknownCondition(_))
        ));
        assert_eq!(
            Condition::from_config("always", "").unwrap(),
            Condition::Always
        );
    }

    fn entity_of(entity_type: &str, dataset: &str) -> Entity {
        Entity::with_mandatory_tags(
            EntityId::generate(&[]),
            entity_type,
            dataset,
            EntityId::generate(&[]),
        )
    }

    #[test]
    fn test_selector_all_none_of() {
        let entity = entity_of("temp", "default");
        let now = temporal::now_nanos();

        let hit = Selector {
            all_of: vec!["type:temp".into()],
            ..Selector::default()
        };
        assert!(hit.matches(&entity, now).unwrap());

        let blocked = Selector {
            all_of: vec!["type:temp".into()],
            none_of: vec!["dataset:default".into()],
            ..Selector::default()
        };
        assert!(!blocked.matches(&entity, now).unwrap());
    }

    #[test]
    fn test_selector_whitelists_and_patterns() {
        let entity = entity_of("temp", "scratch");
        let now = temporal::now_nanos();

        let selector = Selector {
            types: vec!["temp".into(), "cache".into()],
            datasets: vec!["scratch".into()],
            patterns: vec!["^type:t".into()],
            ..Selector::default()
        };
        assert!(selector.matches(&entity, now).unwrap());

        let wrong_type = Selector {
            types: vec!["user".into()],
            ..Selector::default()
        };
        assert!(!wrong_type.matches(&entity, now).unwrap());
    }

    #[test]
    fn test_selector_age_window() {
        let mut entity = entity_of("temp", "default");
        let now = temporal::now_nanos();
        entity.created_at = now - parse_duration_nanos("2d").unwrap();

        let old_enough = Selector {
            min_age: Some("1d".into()),
            ..Selector::default()
        };
        assert!(old_enough.matches(&entity, now).unwrap());

        let too_old = Selector {
            max_age: Some("1d".into()),
            ..Selector::default()
        };
        assert!(!too_old.matches(&entity, now).unwrap());
    }

    #[test]
    fn test_condition_age_and_state_age() {
        let mut entity = entity_of("temp", "default");
        let now = temporal::now_nanos();
        entity.created_at = now - parse_duration_nanos("25h").unwrap();

        let day_old = Condition::Age {
            duration: "24h".into(),
            basis: AgeBasis::CreatedAt,
        };
        assert!(condition_holds(&day_old, &entity, now).unwrap());

        let week_old = Condition::Age {
            duration: "7d".into(),
            basis: AgeBasis::CreatedAt,
        };
        assert!(!condition_holds(&week_old, &entity, now).unwrap());

        // No state tag yet: state age falls back to created_at.
        let state_age = Condition::StateAge {
            duration: "24h".into(),
        };
        assert!(condition_holds(&state_age, &entity, now).unwrap());
    }

    #[test]
    fn test_condition_size_and_tags() {
        let mut entity = entity_of("file", "default");
        entity.content = Some(vec![0u8; 2048]);
        let now = temporal::now_nanos();

        assert!(condition_holds(
            &Condition::Size {
                at_least: "1k".into()
            },
            &entity,
            now
        )
        .unwrap());
        assert!(!condition_holds(
            &Condition::Size {
                at_least: "1m".into()
            },
            &entity,
            now
        )
        .unwrap());
        assert!(condition_holds(
            &Condition::TagExists {
                tag: "type:file".into()
            },
            &entity,
            now
        )
        .unwrap());
        assert!(condition_holds(
            &Condition::TagMissing {
                tag: "status:keep".into()
            },
            &entity,
            now
        )
        .unwrap());
    }
}
