//! Fluent query composition over tags, content and temporal fields.
//!
//! A [`Query`] is a filter plan: the repository picks the most selective
//! primary index from it, then applies the residual predicates, sort and
//! pagination via [`Query::apply`].

use crate::entity::Entity;
use crate::error::{EntityDbError, Result};
use crate::tag;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Comparison operators. Strings support `Eq`/`Ne`/`Like`/`In`; numeric and
/// time fields support `Eq`/`Ne`/`Gt`/`Lt`/`Gte`/`Lte`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// SQL-style `%` pattern match.
    Like,
    /// Comma-separated membership.
    In,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater or equal.
    Gte,
    /// Less or equal.
    Lte,
}

/// How a filter combines with the predicate built so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connector {
    /// Both must hold.
    And,
    /// Either may hold.
    Or,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// A single typed filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    /// Field name: `created_at`, `updated_at`, `id`, `tag_count`,
    /// `content_type`, `content_value`, or `tag:<namespace>`.
    pub field: String,
    /// Operator.
    pub op: FilterOp,
    /// Literal; time literals accept RFC3339Nano, decimal nanoseconds or
    /// plain integers.
    pub value: String,
    /// Connector to the preceding filters.
    pub connector: Connector,
}

/// A composable filter plan with sort and paging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    /// Exact tag payloads, AND-combined.
    pub tags: Vec<String>,
    /// Glob patterns (`*`, `?`); the first is the primary index probe,
    /// subsequent ones form an OR-group of residual filters.
    pub wildcard_tags: Vec<String>,
    /// Substring to look for in entity content.
    pub content_search: Option<String>,
    /// Namespace the entity must have at least one tag in.
    pub namespace: Option<String>,
    /// Typed field filters.
    pub filters: Vec<Filter>,
    /// Sort field and direction.
    pub sort: Option<(String, SortDirection)>,
    /// Rows to skip after sorting.
    pub offset: usize,
    /// Maximum rows to return after the offset.
    pub limit: Option<usize>,

    #[serde(skip)]
    pending_connector: Connector,
}

impl Default for Connector {
    fn default() -> Self {
        Connector::And
    }
}

impl Query {
    /// Creates an empty query matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires an exact tag payload; multiple calls AND together.
    pub fn has_tag(mut self, payload: &str) -> Self {
        self.tags.push(payload.to_string());
        self
    }

    /// Requires a glob tag pattern (`*` and `?`).
    pub fn has_wildcard_tag(mut self, pattern: &str) -> Self {
        self.wildcard_tags.push(pattern.to_string());
        self
    }

    /// Requires the content to contain the given substring.
    pub fn search_content(mut self, needle: &str) -> Self {
        self.content_search = Some(needle.to_string());
        self
    }

    /// Requires at least one tag in the given namespace.
    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Adds a typed filter joined by the pending connector (AND unless
    /// [`Query::or`] was called since the previous filter).
    pub fn add_filter(mut self, field: &str, op: FilterOp, value: &str) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: value.to_string(),
            connector: self.pending_connector,
        });
        self.pending_connector = Connector::And;
        self
    }

    /// Joins the next filter with AND (the default).
    pub fn and(mut self) -> Self {
        self.pending_connector = Connector::And;
        self
    }

    /// Joins the next filter with OR.
    pub fn or(mut self) -> Self {
        self.pending_connector = Connector::Or;
        self
    }

    /// Sorts by `created_at`, `updated_at`, `id` or `tag_count`.
    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.sort = Some((field.to_string(), direction));
        self
    }

    /// Skips the first `n` rows after sorting.
    pub fn offset(mut self, n: usize) -> Self {
        self.offset = n;
        self
    }

    /// Caps the result at `n` rows.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Evaluates the residual predicate against one entity.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` for unknown fields, type-incompatible
    /// operators, or unparseable literals.
    pub fn matches(&self, entity: &Entity) -> Result<bool> {
        for payload in &self.tags {
            if !entity.has_tag(payload) {
                return Ok(false);
            }
        }

        if let Some((first, rest)) = self.wildcard_tags.split_first() {
            if !entity_matches_glob(entity, first) {
                return Ok(false);
            }
            if !rest.is_empty() && !rest.iter().any(|p| entity_matches_glob(entity, p)) {
                return Ok(false);
            }
        }

        if let Some(namespace) = &self.namespace {
            let any = entity
                .tags
                .iter()
                .any(|t| tag::is_namespace(t, namespace));
            if !any {
                return Ok(false);
            }
        }

        if let Some(needle) = &self.content_search {
            let content = entity.content.as_deref().unwrap_or(&[]);
            if !String::from_utf8_lossy(content).contains(needle.as_str()) {
                return Ok(false);
            }
        }

        let mut verdict: Option<bool> = None;
        for filter in &self.filters {
            let hit = eval_filter(entity, filter)?;
            verdict = Some(match (verdict, filter.connector) {
                (None, _) => hit,
                (Some(acc), Connector::And) => acc && hit,
                (Some(acc), Connector::Or) => acc || hit,
            });
        }

        Ok(verdict.unwrap_or(true))
    }

    /// Filters, sorts and paginates a candidate list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` for malformed filters or an unknown sort
    /// field.
    pub fn apply(&self, candidates: Vec<Entity>) -> Result<Vec<Entity>> {
        let mut rows = Vec::with_capacity(candidates.len());
        for entity in candidates {
            if self.matches(&entity)? {
                rows.push(entity);
            }
        }

        if let Some((field, direction)) = &self.sort {
            sort_rows(&mut rows, field, *direction)?;
        }

        let rows: Vec<Entity> = rows
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(rows)
    }
}

/// Matches a glob pattern with `*` (any run) and `?` (any one char).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    // Iterative matcher with single-star backtracking.
    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut star, mut mark) = (None::<usize>, 0usize);

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Matches a SQL-style pattern where `%` is any run of characters.
/// Every other character, `*` and `?` included, matches literally.
pub fn sql_like_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut percent, mut mark) = (None::<usize>, 0usize);

    while ti < t.len() {
        if pi < p.len() && p[pi] != '%' && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '%' {
            percent = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = percent {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}

fn entity_matches_glob(entity: &Entity, pattern: &str) -> bool {
    entity
        .get_tags_without_timestamp()
        .iter()
        .any(|payload| glob_match(pattern, payload))
}

/// Field values are either textual or numeric; time fields are numeric
/// nanoseconds.
enum FieldValue {
    Text(String),
    Number(i64),
}

fn field_value(entity: &Entity, field: &str) -> Result<FieldValue> {
    if let Some(namespace) = field.strip_prefix("tag:") {
        return Ok(FieldValue::Text(entity.get_tag_value(namespace)));
    }
    match field {
        "created_at" => Ok(FieldValue::Number(entity.created_at)),
        "updated_at" => Ok(FieldValue::Number(entity.updated_at)),
        "id" => Ok(FieldValue::Text(entity.id.as_hex())),
        "tag_count" => Ok(FieldValue::Number(entity.tags.len() as i64)),
        "content_type" => Ok(FieldValue::Text(entity.get_tag_value("content:type"))),
        "content_value" => Ok(FieldValue::Text(
            String::from_utf8_lossy(entity.content.as_deref().unwrap_or(&[])).into_owned(),
        )),
        other => Err(EntityDbError::InvalidFilter(format!(
            "unknown field: {other}"
        ))),
    }
}

/// Parses a time or numeric literal: decimal nanoseconds, plain integer,
/// or RFC3339Nano.
pub fn parse_time_literal(value: &str) -> Result<i64> {
    if let Ok(n) = value.parse::<i64>() {
        return Ok(n);
    }
    if let Some(nanos) = DateTime::parse_from_rfc3339(value)
        .ok()
        .and_then(|dt| dt.timestamp_nanos_opt())
    {
        return Ok(nanos);
    }
    Err(EntityDbError::InvalidFilter(format!(
        "unparseable time literal: {value}"
    )))
}

fn eval_filter(entity: &Entity, filter: &Filter) -> Result<bool> {
    match field_value(entity, &filter.field)? {
        FieldValue::Text(actual) => match filter.op {
            FilterOp::Eq => Ok(actual == filter.value),
            FilterOp::Ne => Ok(actual != filter.value),
            FilterOp::Like => Ok(sql_like_match(&filter.value, &actual)),
            FilterOp::In => Ok(filter
                .value
                .split(',')
                .map(str::trim)
                .any(|candidate| candidate == actual)),
            _ => Err(EntityDbError::InvalidFilter(format!(
                "operator {:?} not valid for string field {}",
                filter.op, filter.field
            ))),
        },
        FieldValue::Number(actual) => {
            let literal = parse_time_literal(&filter.value)?;
            match filter.op {
                FilterOp::Eq => Ok(actual == literal),
                FilterOp::Ne => Ok(actual != literal),
                FilterOp::Gt => Ok(actual > literal),
                FilterOp::Lt => Ok(actual < literal),
                FilterOp::Gte => Ok(actual >= literal),
                FilterOp::Lte => Ok(actual <= literal),
                _ => Err(EntityDbError::InvalidFilter(format!(
                    "operator {:?} not valid for numeric field {}",
                    filter.op, filter.field
                ))),
            }
        }
    }
}

fn sort_rows(rows: &mut [Entity], field: &str, direction: SortDirection) -> Result<()> {
    match field {
        "created_at" => rows.sort_by_key(|e| e.created_at),
        "updated_at" => rows.sort_by_key(|e| e.updated_at),
        "id" => rows.sort_by_key(|e| e.id),
        "tag_count" => rows.sort_by_key(|e| e.tags.len()),
        other => {
            return Err(EntityDbError::InvalidFilter(format!(
                "unsortable field: {other}"
            )))
        }
    }
    if direction == SortDirection::Desc {
        rows.reverse();
    }
    Ok(())
}
