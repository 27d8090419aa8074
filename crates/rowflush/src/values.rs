//! Column values carried by inserts and updates.

use rowflush_core::{RowIdentity, Value};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A column value that may not be known until an earlier operation runs.
#[derive(Debug, Clone, Serialize)]
pub enum ColumnValue {
    /// A literal value.
    Value(Value),
    /// The value of `column` in the primary key of the row named by
    /// `identity`, resolved once that row has a permanent key.
    KeyOf { identity: RowIdentity, column: String },
}

impl ColumnValue {
    /// The literal value, if already known.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ColumnValue::Value(v) => Some(v),
            ColumnValue::KeyOf { .. } => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, ColumnValue::KeyOf { .. })
    }

    /// Resolve against an identity that is already permanent.
    ///
    /// A deferred value pointing at a permanent identity is collapsed to the
    /// literal; anything else is returned unchanged.
    pub fn normalized(&self) -> ColumnValue {
        match self {
            ColumnValue::KeyOf { identity, column } if !identity.is_temporary() => identity
                .value(column)
                .map_or_else(|| self.clone(), |v| ColumnValue::Value(v.clone())),
            _ => self.clone(),
        }
    }
}

impl PartialEq for ColumnValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ColumnValue::Value(a), ColumnValue::Value(b)) => a == b,
            (
                ColumnValue::KeyOf {
                    identity: ia,
                    column: ca,
                },
                ColumnValue::KeyOf {
                    identity: ib,
                    column: cb,
                },
            ) => ia == ib && ca == cb,
            _ => false,
        }
    }
}

impl From<Value> for ColumnValue {
    fn from(v: Value) -> Self {
        ColumnValue::Value(v)
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Value(v) => write!(f, "{v}"),
            ColumnValue::KeyOf { identity, column } => write!(f, "{identity}.{column}"),
        }
    }
}

/// Accumulated column writes for one row.
///
/// Plain attribute writes and foreign-key writes are kept apart. The
/// foreign-key map is laid over the attribute map when the snapshot is taken,
/// so a relationship write always beats a scalar write to the same column no
/// matter which happened first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Values {
    attributes: BTreeMap<String, ColumnValue>,
    foreign_keys: BTreeMap<String, ColumnValue>,
    /// Every column written through this accumulator.
    updated: BTreeSet<String>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value. Later writes to the same column in the same submap
    /// replace earlier ones.
    pub fn add_value(&mut self, column: impl Into<String>, value: impl Into<ColumnValue>, is_foreign_key: bool) {
        let column = column.into();
        self.updated.insert(column.clone());
        let target = if is_foreign_key {
            &mut self.foreign_keys
        } else {
            &mut self.attributes
        };
        target.insert(column, value.into());
    }

    /// Fold `other` into this accumulator.
    ///
    /// Columns already present here are kept; columns only present in `other`
    /// are copied in. A submap with no entries adopts the other's wholesale.
    pub fn merge(&mut self, other: &Values) {
        merge_submap(&mut self.attributes, &other.attributes);
        merge_submap(&mut self.foreign_keys, &other.foreign_keys);
        self.updated.extend(other.updated.iter().cloned());
    }

    /// Column map to write: attributes with foreign keys laid over them.
    pub fn snapshot(&self) -> BTreeMap<String, ColumnValue> {
        let mut snapshot = self.attributes.clone();
        for (column, value) in &self.foreign_keys {
            snapshot.insert(column.clone(), value.clone());
        }
        snapshot
    }

    /// Snapshot for an insert of the row named by `identity`.
    ///
    /// The row's own key values are included only if the identity is
    /// permanent, i.e. the row carries a literal key rather than a generated
    /// one. Explicit writes to key columns take precedence.
    pub fn insert_snapshot(&self, identity: &RowIdentity) -> BTreeMap<String, ColumnValue> {
        let mut snapshot: BTreeMap<String, ColumnValue> = identity
            .values()
            .iter()
            .map(|(c, v)| (c.clone(), ColumnValue::Value(v.clone())))
            .collect();
        snapshot.extend(self.snapshot());
        snapshot
    }

    /// Value currently written for `column`, foreign key first.
    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.foreign_keys
            .get(column)
            .or_else(|| self.attributes.get(column))
    }

    /// Columns written, in canonical (sorted) order.
    pub fn updated_attributes(&self) -> Vec<String> {
        self.updated.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.foreign_keys.is_empty()
    }

    /// True if any written value is still deferred.
    pub fn has_deferred(&self) -> bool {
        self.attributes
            .values()
            .chain(self.foreign_keys.values())
            .any(ColumnValue::is_deferred)
    }

    /// Rewrite every value in place.
    pub(crate) fn rewrite<F>(&mut self, mut f: F) -> rowflush_core::Result<()>
    where
        F: FnMut(&str, &ColumnValue) -> rowflush_core::Result<Option<ColumnValue>>,
    {
        for (column, value) in self
            .attributes
            .iter_mut()
            .chain(self.foreign_keys.iter_mut())
        {
            if let Some(replacement) = f(column, value)? {
                *value = replacement;
            }
        }
        Ok(())
    }
}

fn merge_submap(target: &mut BTreeMap<String, ColumnValue>, source: &BTreeMap<String, ColumnValue>) {
    if target.is_empty() {
        target.clone_from(source);
        return;
    }
    for (column, value) in source {
        target
            .entry(column.clone())
            .or_insert_with(|| value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(v: i64) -> ColumnValue {
        ColumnValue::Value(Value::BigInt(v))
    }

    #[test]
    fn foreign_key_write_wins_in_either_order() {
        let mut a = Values::new();
        a.add_value("artist_id", Value::BigInt(1), false);
        a.add_value("artist_id", Value::BigInt(2), true);
        assert_eq!(a.snapshot()["artist_id"], lit(2));

        let mut b = Values::new();
        b.add_value("artist_id", Value::BigInt(2), true);
        b.add_value("artist_id", Value::BigInt(1), false);
        assert_eq!(b.snapshot()["artist_id"], lit(2));
    }

    #[test]
    fn merge_keeps_existing_columns() {
        let mut a = Values::new();
        a.add_value("name", Value::from("new"), false);
        let mut b = Values::new();
        b.add_value("name", Value::from("old"), false);
        b.add_value("year", Value::BigInt(1900), false);

        a.merge(&b);
        let snapshot = a.snapshot();
        assert_eq!(snapshot["name"], ColumnValue::Value(Value::from("new")));
        assert_eq!(snapshot["year"], lit(1900));
        assert_eq!(a.updated_attributes(), vec!["name", "year"]);
    }

    #[test]
    fn empty_accumulator_adopts_other() {
        let mut a = Values::new();
        let mut b = Values::new();
        b.add_value("artist_id", Value::BigInt(4), true);
        a.merge(&b);
        assert_eq!(a, b);
    }

    #[test]
    fn merged_foreign_key_overrides_attribute() {
        let mut a = Values::new();
        a.add_value("artist_id", Value::BigInt(1), false);
        let mut b = Values::new();
        b.add_value("artist_id", Value::BigInt(9), true);
        a.merge(&b);
        assert_eq!(a.snapshot()["artist_id"], lit(9));
    }

    #[test]
    fn insert_snapshot_includes_literal_key_only() {
        let mut values = Values::new();
        values.add_value("name", Value::from("Ada"), false);

        let temp = RowIdentity::temporary("artist", 1);
        assert!(!values.insert_snapshot(&temp).contains_key("id"));

        let permanent = RowIdentity::permanent("artist", [("id", 5_i64)]);
        let snapshot = values.insert_snapshot(&permanent);
        assert_eq!(snapshot["id"], lit(5));
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn deferred_values_normalize_against_permanent_identity() {
        let permanent = ColumnValue::KeyOf {
            identity: RowIdentity::permanent("artist", [("id", 5_i64)]),
            column: "id".into(),
        };
        assert_eq!(permanent.normalized(), lit(5));

        let temp = ColumnValue::KeyOf {
            identity: RowIdentity::temporary("artist", 1),
            column: "id".into(),
        };
        assert!(temp.normalized().is_deferred());
        assert_eq!(temp.to_string(), "artist<temp:1>.id");
    }

    #[test]
    fn get_prefers_foreign_key() {
        let mut values = Values::new();
        values.add_value("c", Value::BigInt(1), false);
        assert_eq!(values.get("c"), Some(&lit(1)));
        values.add_value("c", Value::BigInt(2), true);
        assert_eq!(values.get("c"), Some(&lit(2)));
        assert!(values.get("d").is_none());
        assert!(!values.has_deferred());
    }
}
