//! Entity identifiers: 32-character lowercase hex UUIDs.

use crate::error::{EntityDbError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A 128-bit entity identifier, rendered as 32 lowercase hex characters.
///
/// EntityIds are UUIDs stripped of hyphens. Equality is case-sensitive on
/// the wire form, so parsing rejects uppercase input rather than folding it.
///
/// # Examples
///
/// ```
/// use entitydb_core::EntityId;
///
/// let id: EntityId = "0123456789abcdef0123456789abcdef".parse().unwrap();
/// assert_eq!(id.to_string().len(), 32);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(#[serde(with = "uuid::serde::simple")] Uuid);

impl EntityId {
    /// The length of an EntityId in its hex wire form.
    pub const HEX_LEN: usize = 32;

    /// The all-zero reserved id.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns true for the all-zero id.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Creates an EntityId from raw UUID bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the underlying 16 bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Returns this id as its canonical 32-char lowercase hex string.
    pub fn as_hex(&self) -> String {
        self.0.simple().to_string()
    }

    /// Generates a fresh random id, never returning a reserved one.
    ///
    /// The null UUID and every id in `reserved` are rejected; generation
    /// retries until a non-reserved id comes up (in practice, once).
    pub fn generate(reserved: &[EntityId]) -> Self {
        loop {
            let candidate = Self(Uuid::new_v4());
            if candidate.is_nil() || reserved.contains(&candidate) {
                continue;
            }
            return candidate;
        }
    }

    /// Parses an EntityId from its 32-char lowercase hex form.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEntityId` if the string is not exactly 32 lowercase
    /// hex characters.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != Self::HEX_LEN {
            return Err(EntityDbError::InvalidEntityId(format!(
                "expected {} hex chars, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }
        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(EntityDbError::InvalidEntityId(format!(
                "uppercase hex rejected: {s}"
            )));
        }
        let uuid = Uuid::try_parse(s)
            .map_err(|e| EntityDbError::InvalidEntityId(format!("{s}: {e}")))?;
        Ok(Self(uuid))
    }
}

impl FromStr for EntityId {
    type Err = EntityDbError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}...)", &self.as_hex()[..8])
    }
}
