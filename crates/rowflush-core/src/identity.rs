//! Logical row identities.
//!
//! A [`RowIdentity`] names one database row: the entity plus either the
//! primary-key snapshot (permanent) or a placeholder number handed out before
//! the key is known (temporary). Identities are the keys of every index the
//! flush engine builds, so equality and hashing go through
//! [`Value::key_eq`]/[`Value::hash_key`].

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// The key part of a [`RowIdentity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IdentityKey {
    /// Primary-key column/value pairs, sorted by column name.
    Permanent(Vec<(String, Value)>),
    /// Placeholder for a row whose key is not known yet.
    Temporary(u64),
}

/// Identity of one logical row: `(entity, key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowIdentity {
    entity: String,
    key: IdentityKey,
}

impl RowIdentity {
    /// Identity built from known primary-key values.
    pub fn permanent<C, V>(entity: impl Into<String>, pk: impl IntoIterator<Item = (C, V)>) -> Self
    where
        C: Into<String>,
        V: Into<Value>,
    {
        let mut pairs: Vec<(String, Value)> = pk
            .into_iter()
            .map(|(c, v)| (c.into(), v.into()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            entity: entity.into(),
            key: IdentityKey::Permanent(pairs),
        }
    }

    /// Placeholder identity for a row whose key is generated later.
    pub fn temporary(entity: impl Into<String>, id: u64) -> Self {
        Self {
            entity: entity.into(),
            key: IdentityKey::Temporary(id),
        }
    }

    /// Entity name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self.key, IdentityKey::Temporary(_))
    }

    /// Value of one primary-key column, if this identity is permanent and has it.
    pub fn value(&self, column: &str) -> Option<&Value> {
        match &self.key {
            IdentityKey::Permanent(pairs) => pairs
                .iter()
                .find(|(c, _)| c == column)
                .map(|(_, v)| v),
            IdentityKey::Temporary(_) => None,
        }
    }

    /// Primary-key pairs (empty for temporary identities).
    pub fn values(&self) -> &[(String, Value)] {
        match &self.key {
            IdentityKey::Permanent(pairs) => pairs,
            IdentityKey::Temporary(_) => &[],
        }
    }

    /// True if every listed column has a non-null value in this identity.
    pub fn is_fully_known(&self, pk_columns: &[String]) -> bool {
        !pk_columns.is_empty()
            && pk_columns
                .iter()
                .all(|c| self.value(c).is_some_and(|v| !v.is_null()))
    }
}

impl PartialEq for RowIdentity {
    fn eq(&self, other: &Self) -> bool {
        if self.entity != other.entity {
            return false;
        }
        match (&self.key, &other.key) {
            (IdentityKey::Temporary(a), IdentityKey::Temporary(b)) => a == b,
            (IdentityKey::Permanent(a), IdentityKey::Permanent(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ca, va), (cb, vb))| ca == cb && va.key_eq(vb))
            }
            _ => false,
        }
    }
}

impl Eq for RowIdentity {}

impl Hash for RowIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity.hash(state);
        match &self.key {
            IdentityKey::Temporary(id) => {
                0u8.hash(state);
                id.hash(state);
            }
            IdentityKey::Permanent(pairs) => {
                1u8.hash(state);
                pairs.len().hash(state);
                for (c, v) in pairs {
                    c.hash(state);
                    v.hash_key(state);
                }
            }
        }
    }
}

impl fmt::Display for RowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            IdentityKey::Temporary(id) => write!(f, "{}<temp:{}>", self.entity, id),
            IdentityKey::Permanent(pairs) => {
                write!(f, "{}{{", self.entity)?;
                for (i, (c, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{c}={v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Allocator for temporary identities.
///
/// One allocator is owned by whatever tracks new objects (usually one per
/// session); numbers are never reused within it.
#[derive(Debug, Default)]
pub struct TemporaryKeys {
    next: u64,
}

impl TemporaryKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next temporary identity for `entity`.
    pub fn next(&mut self, entity: impl Into<String>) -> RowIdentity {
        self.next += 1;
        RowIdentity::temporary(entity, self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn permanent_identity_sorts_columns() {
        let a = RowIdentity::permanent("link", [("b", 2_i64), ("a", 1_i64)]);
        let b = RowIdentity::permanent("link", [("a", 1_i64), ("b", 2_i64)]);
        assert_eq!(a, b);
        assert_eq!(a.values()[0].0, "a");
    }

    #[test]
    fn identity_equality_ignores_integer_width() {
        let a = RowIdentity::permanent("artist", [("id", Value::Int(5))]);
        let b = RowIdentity::permanent("artist", [("id", Value::BigInt(5))]);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn temporary_never_equals_permanent() {
        let t = RowIdentity::temporary("artist", 1);
        let p = RowIdentity::permanent("artist", [("id", 1_i64)]);
        assert_ne!(t, p);
        assert!(t.is_temporary());
        assert!(t.values().is_empty());
    }

    #[test]
    fn entity_is_part_of_identity() {
        let a = RowIdentity::permanent("artist", [("id", 1_i64)]);
        let b = RowIdentity::permanent("gallery", [("id", 1_i64)]);
        assert_ne!(a, b);
    }

    #[test]
    fn fully_known_requires_non_null_values() {
        let pk = vec!["a".to_string(), "b".to_string()];
        let full = RowIdentity::permanent("link", [("a", 1_i64), ("b", 2_i64)]);
        let partial = RowIdentity::permanent("link", [("a", Value::BigInt(1)), ("b", Value::Null)]);
        assert!(full.is_fully_known(&pk));
        assert!(!partial.is_fully_known(&pk));
        assert!(!RowIdentity::temporary("link", 9).is_fully_known(&pk));
    }

    #[test]
    fn temporary_keys_are_unique() {
        let mut keys = TemporaryKeys::new();
        let a = keys.next("artist");
        let b = keys.next("artist");
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "artist<temp:1>");
    }

    #[test]
    fn display_permanent() {
        let id = RowIdentity::permanent("artist", [("id", 3_i64)]);
        assert_eq!(id.to_string(), "artist{id=3}");
    }
}
