//! Hierarchical tag payload parsing and wildcard permission matching.

use crate::error::{EntityDbError, Result};
use crate::temporal;

/// A tag payload split into its hierarchy: `namespace:sub:…:value`.
///
/// `path` holds every segment except the last; `value` is the last segment.
/// For `rbac:perm:entity:create` that is `path = [rbac, perm, entity]`,
/// `value = create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTag<'a> {
    /// Leftmost segment.
    pub namespace: &'a str,
    /// All segments but the last.
    pub path: Vec<&'a str>,
    /// Last segment.
    pub value: &'a str,
}

/// Parses a tag payload into namespace, path and value.
///
/// The timestamp prefix, if present, is stripped first.
///
/// # Errors
///
/// Returns `InvalidTag` if the payload has no `:` separator.
pub fn parse(tag: &str) -> Result<ParsedTag<'_>> {
    let payload = temporal::strip_timestamp(tag);
    if !payload.contains(':') {
        return Err(EntityDbError::InvalidTag(payload.to_string()));
    }

    let segments: Vec<&str> = payload.split(':').collect();
    let (value, path) = segments.split_last().expect("split produced no segments");

    Ok(ParsedTag {
        namespace: path[0],
        path: path.to_vec(),
        value,
    })
}

/// Returns true if the tag's payload lives in the given namespace.
pub fn is_namespace(tag: &str, namespace: &str) -> bool {
    let payload = temporal::strip_timestamp(tag);
    payload
        .strip_prefix(namespace)
        .is_some_and(|rest| rest.starts_with(':'))
}

/// Returns the value of a payload within a namespace prefix.
///
/// `value_of("status:published", "status")` is `Some("published")`;
/// nested namespaces keep the remainder: `value_of("rbac:role:admin",
/// "rbac:role")` is `Some("admin")`.
pub fn value_of<'a>(tag: &'a str, namespace: &str) -> Option<&'a str> {
    let payload = temporal::strip_timestamp(tag);
    payload
        .strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix(':'))
}

/// Checks a required permission tag against a set of stripped tag payloads.
///
/// Matching rules, in order:
/// 1. an exact match wins;
/// 2. `rbac:perm:*` or `rbac:perm:*:*` grants everything;
/// 3. a tag whose path is a prefix of the required path and whose value is
///    `*` grants the match;
/// 4. only tags in the `rbac` namespace are considered at all.
pub fn has_permission(tags: &[String], required: &str) -> bool {
    let required_parsed = match parse(required) {
        Ok(p) => p,
        Err(_) => return false,
    };

    for tag in tags {
        let payload = temporal::strip_timestamp(tag);

        if !is_namespace(payload, "rbac") {
            continue;
        }
        if payload == required {
            return true;
        }
        if payload == "rbac:perm:*" || payload == "rbac:perm:*:*" {
            return true;
        }

        let Ok(candidate) = parse(payload) else {
            continue;
        };
        if candidate.value == "*"
            && candidate.path.len() <= required_parsed.path.len()
            && candidate.path == required_parsed.path[..candidate.path.len()]
        {
            return true;
        }
    }

    false
}
