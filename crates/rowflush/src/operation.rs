//! Pending row operations.
//!
//! One [`RowOperation`] describes one change to one logical row. The diff
//! layer produces inserts, updates and deletes; the merger may combine a
//! delete and an insert of the same row into
//! [`RowOperation::DeleteThenInsert`].

use crate::object::ObjectRef;
use crate::qualifier::Qualifier;
use crate::values::{ColumnValue, Values};
use rowflush_core::{EntityInfo, RowIdentity, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Kind of a row operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    DeleteThenInsert,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            OperationKind::Insert => "INSERT",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
            OperationKind::DeleteThenInsert => "DELETE+INSERT",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insert a new row.
#[derive(Debug, Clone)]
pub struct InsertOp {
    pub identity: RowIdentity,
    pub entity: Arc<EntityInfo>,
    pub values: Values,
    pub object: ObjectRef,
}

/// Update columns of an existing row.
#[derive(Debug, Clone)]
pub struct UpdateOp {
    pub identity: RowIdentity,
    pub entity: Arc<EntityInfo>,
    pub values: Values,
    pub qualifier: Qualifier,
    pub object: ObjectRef,
}

/// Delete an existing row.
#[derive(Debug, Clone)]
pub struct DeleteOp {
    pub identity: RowIdentity,
    pub entity: Arc<EntityInfo>,
    pub qualifier: Qualifier,
    pub object: ObjectRef,
}

impl InsertOp {
    /// Insert of `object`'s row, under the object's current identity.
    pub fn new(entity: Arc<EntityInfo>, object: ObjectRef) -> Self {
        Self {
            identity: object.identity(),
            entity,
            values: Values::new(),
            object,
        }
    }

    /// Write a plain column value.
    #[must_use]
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.add_value(column, value.into(), false);
        self
    }

    /// Write a foreign-key column value (literal or deferred).
    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.values.add_value(column, value, true);
        self
    }

    /// Column map to write, including the row's own literal key.
    pub fn snapshot(&self) -> BTreeMap<String, ColumnValue> {
        self.values.insert_snapshot(&self.identity)
    }
}

impl UpdateOp {
    pub fn new(entity: Arc<EntityInfo>, object: ObjectRef) -> Self {
        let identity = object.identity();
        let qualifier = Qualifier::new(identity.clone(), entity.primary_key_columns());
        Self {
            identity,
            entity,
            values: Values::new(),
            qualifier,
            object,
        }
    }

    #[must_use]
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.add_value(column, value.into(), false);
        self
    }

    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.values.add_value(column, value, true);
        self
    }

    /// Add an extra match constraint.
    #[must_use]
    pub fn qualify(mut self, column: impl Into<String>, value: impl Into<Value>, optimistic_lock: bool) -> Self {
        self.qualifier
            .add_additional_qualifier(column, value, optimistic_lock);
        self
    }
}

impl DeleteOp {
    pub fn new(entity: Arc<EntityInfo>, object: ObjectRef) -> Self {
        let identity = object.identity();
        let qualifier = Qualifier::new(identity.clone(), entity.primary_key_columns());
        Self {
            identity,
            entity,
            qualifier,
            object,
        }
    }

    #[must_use]
    pub fn qualify(mut self, column: impl Into<String>, value: impl Into<Value>, optimistic_lock: bool) -> Self {
        self.qualifier
            .add_additional_qualifier(column, value, optimistic_lock);
        self
    }
}

/// One pending change to one logical row.
#[derive(Debug, Clone)]
pub enum RowOperation {
    Insert(InsertOp),
    Update(UpdateOp),
    Delete(DeleteOp),
    /// The row's key is deleted and then inserted again. Produced only by
    /// merging.
    DeleteThenInsert { delete: DeleteOp, insert: InsertOp },
}

impl RowOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            RowOperation::Insert(_) => OperationKind::Insert,
            RowOperation::Update(_) => OperationKind::Update,
            RowOperation::Delete(_) => OperationKind::Delete,
            RowOperation::DeleteThenInsert { .. } => OperationKind::DeleteThenInsert,
        }
    }

    /// Logical identity. For a delete-then-insert this is the deleted row's.
    pub fn identity(&self) -> &RowIdentity {
        match self {
            RowOperation::Insert(op) => &op.identity,
            RowOperation::Update(op) => &op.identity,
            RowOperation::Delete(op) => &op.identity,
            RowOperation::DeleteThenInsert { delete, .. } => &delete.identity,
        }
    }

    pub fn entity(&self) -> &Arc<EntityInfo> {
        match self {
            RowOperation::Insert(op) => &op.entity,
            RowOperation::Update(op) => &op.entity,
            RowOperation::Delete(op) => &op.entity,
            RowOperation::DeleteThenInsert { delete, .. } => &delete.entity,
        }
    }

    pub fn entity_name(&self) -> &str {
        self.entity().name()
    }

    /// Handle to the originating object.
    pub fn object(&self) -> &ObjectRef {
        match self {
            RowOperation::Insert(op) => &op.object,
            RowOperation::Update(op) => &op.object,
            RowOperation::Delete(op) => &op.object,
            RowOperation::DeleteThenInsert { insert, .. } => &insert.object,
        }
    }

    /// Written values (the insert side for a delete-then-insert).
    pub fn values(&self) -> Option<&Values> {
        match self {
            RowOperation::Insert(op) => Some(&op.values),
            RowOperation::Update(op) => Some(&op.values),
            RowOperation::Delete(_) => None,
            RowOperation::DeleteThenInsert { insert, .. } => Some(&insert.values),
        }
    }

    pub(crate) fn values_mut(&mut self) -> Option<&mut Values> {
        match self {
            RowOperation::Insert(op) => Some(&mut op.values),
            RowOperation::Update(op) => Some(&mut op.values),
            RowOperation::Delete(_) => None,
            RowOperation::DeleteThenInsert { insert, .. } => Some(&mut insert.values),
        }
    }

    /// Row-match condition (the delete side for a delete-then-insert).
    pub fn qualifier(&self) -> Option<&Qualifier> {
        match self {
            RowOperation::Insert(_) => None,
            RowOperation::Update(op) => Some(&op.qualifier),
            RowOperation::Delete(op) => Some(&op.qualifier),
            RowOperation::DeleteThenInsert { delete, .. } => Some(&delete.qualifier),
        }
    }

    /// Column map this operation writes. Empty for deletes.
    pub fn write_snapshot(&self) -> BTreeMap<String, ColumnValue> {
        match self {
            RowOperation::Insert(op) => op.snapshot(),
            RowOperation::Update(op) => op.values.snapshot(),
            RowOperation::Delete(_) => BTreeMap::new(),
            RowOperation::DeleteThenInsert { insert, .. } => insert.snapshot(),
        }
    }

    /// Replace `old` with `new` wherever it names this operation's row.
    ///
    /// Returns true if anything changed.
    pub fn replace_identity(&mut self, old: &RowIdentity, new: &RowIdentity) -> bool {
        let mut changed = false;
        let mut swap = |identity: &mut RowIdentity, qualifier: Option<&mut Qualifier>| {
            if identity == old {
                *identity = new.clone();
                if let Some(q) = qualifier {
                    q.set_identity(new.clone());
                }
                changed = true;
            }
        };
        match self {
            RowOperation::Insert(op) => swap(&mut op.identity, None),
            RowOperation::Update(op) => swap(&mut op.identity, Some(&mut op.qualifier)),
            RowOperation::Delete(op) => swap(&mut op.identity, Some(&mut op.qualifier)),
            RowOperation::DeleteThenInsert { delete, insert } => {
                swap(&mut delete.identity, Some(&mut delete.qualifier));
                swap(&mut insert.identity, None);
            }
        }
        changed
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, RowOperation::Insert(_))
    }

    pub fn is_update(&self) -> bool {
        matches!(self, RowOperation::Update(_))
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, RowOperation::Delete(_))
    }

    pub fn is_delete_then_insert(&self) -> bool {
        matches!(self, RowOperation::DeleteThenInsert { .. })
    }
}

impl From<InsertOp> for RowOperation {
    fn from(op: InsertOp) -> Self {
        RowOperation::Insert(op)
    }
}

impl From<UpdateOp> for RowOperation {
    fn from(op: UpdateOp) -> Self {
        RowOperation::Update(op)
    }
}

impl From<DeleteOp> for RowOperation {
    fn from(op: DeleteOp) -> Self {
        RowOperation::Delete(op)
    }
}

impl fmt::Display for RowOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflush_core::ColumnInfo;

    fn artist() -> Arc<EntityInfo> {
        Arc::new(
            EntityInfo::new("artist")
                .column(ColumnInfo::generated_key("id"))
                .column(ColumnInfo::new("name")),
        )
    }

    #[test]
    fn accessors_follow_variant() {
        let object = ObjectRef::new(RowIdentity::temporary("artist", 1));
        let op: RowOperation = InsertOp::new(artist(), object).value("name", "Ada").into();
        assert!(op.is_insert());
        assert_eq!(op.kind(), OperationKind::Insert);
        assert_eq!(op.entity_name(), "artist");
        assert!(op.qualifier().is_none());
        assert_eq!(op.to_string(), "INSERT artist<temp:1>");
    }

    #[test]
    fn update_qualifier_uses_entity_key() {
        let object = ObjectRef::new(RowIdentity::permanent("artist", [("id", 4_i64)]));
        let op: RowOperation = UpdateOp::new(artist(), object)
            .value("name", "Bea")
            .qualify("version", 2_i64, true)
            .into();
        let qualifier = op.qualifier().unwrap();
        assert_eq!(qualifier.qualifier_attributes(), vec!["id", "version"]);
        assert_eq!(op.write_snapshot().len(), 1);
    }

    #[test]
    fn replace_identity_updates_qualifier() {
        let temp = RowIdentity::temporary("artist", 1);
        let permanent = RowIdentity::permanent("artist", [("id", 8_i64)]);
        let mut op: RowOperation = UpdateOp::new(artist(), ObjectRef::new(temp.clone())).into();
        assert!(op.replace_identity(&temp, &permanent));
        assert_eq!(op.identity(), &permanent);
        assert_eq!(op.qualifier().unwrap().identity(), &permanent);
        assert!(!op.replace_identity(&temp, &permanent));
    }

    #[test]
    fn delete_then_insert_exposes_both_sides() {
        let identity = RowIdentity::permanent("artist", [("id", 2_i64)]);
        let object = ObjectRef::new(identity.clone());
        let op = RowOperation::DeleteThenInsert {
            delete: DeleteOp::new(artist(), object.clone()),
            insert: InsertOp::new(artist(), object).value("name", "Cy"),
        };
        assert_eq!(op.identity(), &identity);
        assert!(op.values().is_some());
        assert!(op.qualifier().is_some());
        assert_eq!(op.write_snapshot().len(), 2);
    }
}
