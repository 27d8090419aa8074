//! Row-match conditions for updates and deletes.

use rowflush_core::{RowIdentity, Value};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Which row an update or delete targets.
///
/// Always the primary key, plus optional extra column constraints. When the
/// key is fully known the extra constraints are only applied under
/// optimistic locking; when it is not, they are always applied since they
/// are the only way left to identify the row.
///
/// Extra constraints with a `NULL` value are kept apart from the equality
/// map: the statement layer must render them as `IS NULL`.
#[derive(Debug, Clone, Serialize)]
pub struct Qualifier {
    identity: RowIdentity,
    pk_columns: Vec<String>,
    additional: BTreeMap<String, Value>,
    null_names: BTreeSet<String>,
    optimistic_lock: bool,
}

impl Qualifier {
    /// Qualifier matching the row named by `identity`.
    pub fn new(identity: RowIdentity, pk_columns: Vec<String>) -> Self {
        Self {
            identity,
            pk_columns,
            additional: BTreeMap::new(),
            null_names: BTreeSet::new(),
            optimistic_lock: false,
        }
    }

    /// Extend the match condition with `column = value` (or `column IS NULL`).
    pub fn add_additional_qualifier(
        &mut self,
        column: impl Into<String>,
        value: impl Into<Value>,
        is_optimistic_lock: bool,
    ) {
        let column = column.into();
        let value = value.into();
        if is_optimistic_lock {
            self.optimistic_lock = true;
        }
        if value.is_null() {
            self.additional.remove(&column);
            self.null_names.insert(column);
        } else {
            self.null_names.remove(&column);
            self.additional.insert(column, value);
        }
    }

    /// True if every primary key column has a non-null value.
    pub fn is_pk_known(&self) -> bool {
        self.identity.is_fully_known(&self.pk_columns)
    }

    pub fn uses_optimistic_locking(&self) -> bool {
        self.optimistic_lock
    }

    fn includes_additional(&self) -> bool {
        !self.is_pk_known() || self.optimistic_lock
    }

    fn known_pk(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.pk_columns.iter().filter_map(|c| {
            self.identity
                .value(c)
                .filter(|v| !v.is_null())
                .map(|v| (c, v))
        })
    }

    /// Equality match map: known key values, plus the extra non-null
    /// constraints when they apply.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        let mut snapshot: BTreeMap<String, Value> = self
            .known_pk()
            .map(|(c, v)| (c.clone(), v.clone()))
            .collect();
        if self.includes_additional() {
            for (column, value) in &self.additional {
                snapshot.insert(column.clone(), value.clone());
            }
        }
        snapshot
    }

    /// Columns that take part in equality matching, in statement order:
    /// key columns first, then extra constraints.
    pub fn qualifier_attributes(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.known_pk().map(|(c, _)| c.clone()).collect();
        if self.includes_additional() {
            columns.extend(
                self.additional
                    .keys()
                    .filter(|c| !self.pk_columns.contains(*c))
                    .cloned(),
            );
        }
        columns
    }

    /// Columns to be matched with `IS NULL`.
    pub fn null_qualifier_names(&self) -> BTreeSet<String> {
        if self.includes_additional() {
            self.null_names.clone()
        } else {
            BTreeSet::new()
        }
    }

    pub fn identity(&self) -> &RowIdentity {
        &self.identity
    }

    pub(crate) fn set_identity(&mut self, identity: RowIdentity) {
        self.identity = identity;
    }

    /// Same statement shape: same equality columns and same `IS NULL` columns.
    pub fn same_shape(&self, other: &Qualifier) -> bool {
        self.qualifier_attributes() == other.qualifier_attributes()
            && self.null_qualifier_names() == other.null_qualifier_names()
    }
}
