//! Combining operations that target the same logical row.
//!
//! [`merge`] is asymmetric: `existing` is the operation already tracked for
//! the row and `incoming` the one just produced. For value merges the
//! incoming operation wins when its identity is still the object's own
//! current identity; if the object's key has been replaced since, the
//! existing operation wins instead. Delete-involving combinations depend on
//! call order and are not commutative.

use crate::object::ObjectRef;
use crate::operation::{InsertOp, RowOperation, UpdateOp};
use crate::qualifier::Qualifier;
use crate::values::{ColumnValue, Values};
use rowflush_core::{EntityInfo, MergeError, MergeErrorKind, Result, RowIdentity};
use std::collections::HashMap;
use std::sync::Arc;

/// Combine two operations tracked under the same logical identity.
///
/// | existing | incoming | result |
/// |---|---|---|
/// | Delete | Insert | DeleteThenInsert (existing delete, incoming insert) |
/// | Delete | Update | existing Delete |
/// | Delete | Delete | existing Delete if same identity, else error |
/// | Insert | Delete | incoming Delete if same identity, else DeleteThenInsert with existing as insert side |
/// | Update | Delete | incoming Delete |
/// | Insert/Update | Insert/Update | values merged, Insert if either side is |
/// | DeleteThenInsert | Insert/Update | incoming folded into the insert side |
/// | DeleteThenInsert | Delete | the compound's delete |
/// | any | DeleteThenInsert | error |
pub fn merge(existing: RowOperation, incoming: RowOperation) -> Result<RowOperation> {
    let label = existing.identity().to_string();
    let existing_kind = existing.kind();
    let incoming_kind = incoming.kind();

    let merged = match (existing, incoming) {
        (RowOperation::Delete(delete), RowOperation::Insert(insert)) => {
            RowOperation::DeleteThenInsert { delete, insert }
        }
        (RowOperation::Delete(delete), RowOperation::Update(_)) => RowOperation::Delete(delete),
        (RowOperation::Delete(a), RowOperation::Delete(b)) => {
            if a.identity != b.identity {
                return Err(MergeError::new(
                    MergeErrorKind::ConflictingDeletes,
                    label,
                    format!("deletes of {} and {} share one slot", a.identity, b.identity),
                )
                .into());
            }
            RowOperation::Delete(a)
        }
        (RowOperation::Insert(insert), RowOperation::Delete(delete)) => {
            if insert.identity == delete.identity {
                RowOperation::Delete(delete)
            } else {
                RowOperation::DeleteThenInsert { delete, insert }
            }
        }
        (RowOperation::Update(_), RowOperation::Delete(delete)) => RowOperation::Delete(delete),
        (RowOperation::Insert(a), RowOperation::Insert(b)) => {
            merge_writes(Write::from_insert(a), Write::from_insert(b)).into_op()
        }
        (RowOperation::Insert(a), RowOperation::Update(b)) => {
            merge_writes(Write::from_insert(a), Write::from_update(b)).into_op()
        }
        (RowOperation::Update(a), RowOperation::Insert(b)) => {
            merge_writes(Write::from_update(a), Write::from_insert(b)).into_op()
        }
        (RowOperation::Update(a), RowOperation::Update(b)) => {
            merge_writes(Write::from_update(a), Write::from_update(b)).into_op()
        }
        (RowOperation::DeleteThenInsert { delete, insert }, RowOperation::Insert(b)) => {
            let folded = merge_writes(Write::from_insert(insert), Write::from_insert(b));
            RowOperation::DeleteThenInsert {
                delete,
                insert: folded.into_insert(),
            }
        }
        (RowOperation::DeleteThenInsert { delete, insert }, RowOperation::Update(b)) => {
            let folded = merge_writes(Write::from_insert(insert), Write::from_update(b));
            RowOperation::DeleteThenInsert {
                delete,
                insert: folded.into_insert(),
            }
        }
        (RowOperation::DeleteThenInsert { delete, .. }, RowOperation::Delete(_)) => {
            RowOperation::Delete(delete)
        }
        (_, RowOperation::DeleteThenInsert { .. }) => {
            return Err(MergeError::new(
                MergeErrorKind::IncompatibleKinds,
                label,
                format!("cannot merge {incoming_kind} into {existing_kind}"),
            )
            .into());
        }
    };

    tracing::trace!(
        identity = %merged.identity(),
        existing = %existing_kind,
        incoming = %incoming_kind,
        result = %merged.kind(),
        "Merged row operations"
    );
    Ok(merged)
}

/// Insert or update, flattened for value merging.
struct Write {
    identity: RowIdentity,
    entity: Arc<EntityInfo>,
    values: Values,
    qualifier: Option<Qualifier>,
    object: ObjectRef,
    is_insert: bool,
}

impl Write {
    fn from_insert(op: InsertOp) -> Self {
        Self {
            identity: op.identity,
            entity: op.entity,
            values: op.values,
            qualifier: None,
            object: op.object,
            is_insert: true,
        }
    }

    fn from_update(op: UpdateOp) -> Self {
        Self {
            identity: op.identity,
            entity: op.entity,
            values: op.values,
            qualifier: Some(op.qualifier),
            object: op.object,
            is_insert: false,
        }
    }

    fn into_insert(self) -> InsertOp {
        InsertOp {
            identity: self.identity,
            entity: self.entity,
            values: self.values,
            object: self.object,
        }
    }

    fn into_op(self) -> RowOperation {
        if self.is_insert {
            return RowOperation::Insert(self.into_insert());
        }
        let qualifier = self.qualifier.unwrap_or_else(|| {
            Qualifier::new(self.identity.clone(), self.entity.primary_key_columns())
        });
        RowOperation::Update(UpdateOp {
            identity: self.identity,
            entity: self.entity,
            values: self.values,
            qualifier,
            object: self.object,
        })
    }
}

fn merge_writes(existing: Write, incoming: Write) -> Write {
    let incoming_is_current = incoming.identity == incoming.object.identity();
    let (mut winner, loser) = if incoming_is_current {
        (incoming, existing)
    } else {
        (existing, incoming)
    };

    winner.values.merge(&loser.values);
    winner.is_insert |= loser.is_insert;

    if winner.identity.is_temporary() && !loser.identity.is_temporary() {
        winner.identity = loser.identity;
        if let Some(q) = winner.qualifier.as_mut() {
            q.set_identity(winner.identity.clone());
        }
    }
    winner
}

/// Arena of merged operations, indexed by logical identity.
///
/// Operations keep their slot for the whole collection phase, so re-keying
/// after an identity replacement never loses the entry, and
/// [`into_operations`](Self::into_operations) returns them in the order
/// their rows were first seen.
#[derive(Debug, Default)]
pub struct OperationIndex {
    slots: Vec<Option<RowOperation>>,
    by_identity: HashMap<RowIdentity, usize>,
}

impl OperationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an operation, merging it with any operation already tracked
    /// for the same row.
    pub fn add(&mut self, op: RowOperation) -> Result<()> {
        let identity = op.identity().clone();
        match self.by_identity.get(&identity).copied() {
            Some(slot) => {
                let existing = self.take(slot, &identity)?;
                self.by_identity.remove(&identity);
                let merged = merge(existing, op)?;
                self.place(slot, merged)
            }
            None => {
                self.by_identity.insert(identity, self.slots.len());
                self.slots.push(Some(op));
                Ok(())
            }
        }
    }

    /// Move the operation tracked as `old` to `new`, rewriting its identity.
    ///
    /// Deferred key references to `old` held by any tracked operation are
    /// redirected to `new` first, whether or not `old` itself has an
    /// operation. If another operation is already tracked as `new`, the two
    /// are merged with the re-keyed one as the incoming side. Returns false
    /// if nothing was tracked as `old`.
    pub fn rekey(&mut self, old: &RowIdentity, new: &RowIdentity) -> Result<bool> {
        let redirected = self.redirect_references(old, new)?;
        if redirected > 0 {
            tracing::trace!(old = %old, new = %new, redirected, "Redirected deferred keys");
        }
        let Some(slot) = self.by_identity.remove(old) else {
            return Ok(false);
        };
        let mut op = self.take(slot, old)?;
        op.replace_identity(old, new);
        self.place(slot, op)?;
        Ok(true)
    }

    /// The operation currently tracked for `identity`.
    pub fn get(&self, identity: &RowIdentity) -> Option<&RowOperation> {
        self.by_identity
            .get(identity)
            .and_then(|&slot| self.slots.get(slot))
            .and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RowOperation> {
        self.slots.iter().flatten()
    }

    /// Merged operations in first-seen order.
    pub fn into_operations(self) -> Vec<RowOperation> {
        self.slots.into_iter().flatten().collect()
    }

    /// Point every `KeyOf` reference to `old` at `new`. References to a
    /// permanent `new` collapse into literal values.
    fn redirect_references(&mut self, old: &RowIdentity, new: &RowIdentity) -> Result<usize> {
        let mut redirected = 0usize;
        for op in self.slots.iter_mut().flatten() {
            let Some(values) = op.values_mut() else {
                continue;
            };
            values.rewrite(|_, value| {
                Ok(match value {
                    ColumnValue::KeyOf { identity, column } if identity == old => {
                        redirected += 1;
                        Some(
                            ColumnValue::KeyOf {
                                identity: new.clone(),
                                column: column.clone(),
                            }
                            .normalized(),
                        )
                    }
                    _ => None,
                })
            })?;
        }
        Ok(redirected)
    }

    fn take(&mut self, slot: usize, identity: &RowIdentity) -> Result<RowOperation> {
        self.slots
            .get_mut(slot)
            .and_then(Option::take)
            .ok_or_else(|| {
                MergeError::new(
                    MergeErrorKind::IncompatibleKinds,
                    identity.to_string(),
                    "operation index slot is empty",
                )
                .into()
            })
    }

    /// Store `op` in `slot` under its own identity, folding it into another
    /// slot if that identity is already taken there.
    fn place(&mut self, slot: usize, op: RowOperation) -> Result<()> {
        let identity = op.identity().clone();
        match self.by_identity.get(&identity).copied() {
            Some(other) if other != slot => {
                let existing = self.take(other, &identity)?;
                let merged = merge(existing, op)?;
                self.by_identity.remove(&identity);
                self.place(other, merged)
            }
            _ => {
                self.by_identity.insert(identity, slot);
                self.slots[slot] = Some(op);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::DeleteOp;
    use crate::values::ColumnValue;
    use rowflush_core::{ColumnInfo, Value};

    fn artist() -> Arc<EntityInfo> {
        Arc::new(
            EntityInfo::new("artist")
                .column(ColumnInfo::primary_key("id"))
                .column(ColumnInfo::new("name"))
                .column(ColumnInfo::new("year")),
        )
    }

    fn pid(id: i64) -> RowIdentity {
        RowIdentity::permanent("artist", [("id", id)])
    }

    fn insert(object: &ObjectRef) -> InsertOp {
        InsertOp::new(artist(), object.clone())
    }

    fn update(object: &ObjectRef) -> UpdateOp {
        UpdateOp::new(artist(), object.clone())
    }

    fn delete(object: &ObjectRef) -> DeleteOp {
        DeleteOp::new(artist(), object.clone())
    }

    #[test]
    fn delete_then_insert() {
        let object = ObjectRef::new(pid(1));
        let merged = merge(delete(&object).into(), insert(&object).value("name", "A").into()).unwrap();
        assert!(merged.is_delete_then_insert());
        assert_eq!(merged.identity(), &pid(1));
    }

    #[test]
    fn update_after_delete_is_moot() {
        let object = ObjectRef::new(pid(1));
        let merged = merge(delete(&object).into(), update(&object).value("name", "A").into()).unwrap();
        assert!(merged.is_delete());
    }

    #[test]
    fn conflicting_deletes_are_internal_errors() {
        let a = ObjectRef::new(pid(1));
        let b = ObjectRef::new(pid(2));
        let err = merge(delete(&a).into(), delete(&b).into()).unwrap_err();
        assert!(err.is_internal());

        let same = merge(delete(&a).into(), delete(&a).into()).unwrap();
        assert!(same.is_delete());
    }

    #[test]
    fn insert_then_delete_is_order_sensitive() {
        let object = ObjectRef::new(pid(1));
        let same = merge(insert(&object).into(), delete(&object).into()).unwrap();
        assert!(same.is_delete());

        let other = ObjectRef::new(pid(2));
        let compound = merge(insert(&object).into(), delete(&other).into()).unwrap();
        let RowOperation::DeleteThenInsert { delete, insert } = compound else {
            panic!("expected delete-then-insert");
        };
        assert_eq!(delete.identity, pid(2));
        assert_eq!(insert.identity, pid(1));
    }

    #[test]
    fn update_then_delete_keeps_delete() {
        let object = ObjectRef::new(pid(1));
        let merged = merge(update(&object).into(), delete(&object).into()).unwrap();
        assert!(merged.is_delete());
    }

    #[test]
    fn incoming_compound_rejected() {
        let object = ObjectRef::new(pid(1));
        let compound = merge(delete(&object).into(), insert(&object).into()).unwrap();
        let err = merge(update(&object).into(), compound).unwrap_err();
        assert!(matches!(
            err,
            rowflush_core::Error::Merge(MergeError {
                kind: MergeErrorKind::IncompatibleKinds,
                ..
            })
        ));
    }

    #[test]
    fn insert_absorbs_update() {
        let object = ObjectRef::new(RowIdentity::temporary("artist", 1));
        let merged = merge(
            insert(&object).value("name", "A").value("year", 1900_i64).into(),
            update(&object).value("name", "B").into(),
        )
        .unwrap();
        assert!(merged.is_insert());
        let snapshot = merged.write_snapshot();
        assert_eq!(snapshot["name"], ColumnValue::Value(Value::from("B")));
        assert_eq!(snapshot["year"], ColumnValue::Value(Value::BigInt(1900)));
    }

    #[test]
    fn permanent_identity_replaces_temporary() {
        let object = ObjectRef::new(RowIdentity::temporary("artist", 1));
        let existing = insert(&object).value("name", "A");
        object.replace_identity(pid(7));
        let incoming = update(&object).value("year", 1901_i64);

        let merged = merge(existing.into(), incoming.into()).unwrap();
        assert!(merged.is_insert());
        assert_eq!(merged.identity(), &pid(7));
        assert_eq!(merged.write_snapshot().len(), 3);
    }

    #[test]
    fn stale_incoming_loses_to_existing() {
        let object = ObjectRef::new(pid(1));
        let stale = UpdateOp {
            identity: pid(99),
            ..update(&object).value("name", "stale")
        };
        let merged = merge(update(&object).value("name", "fresh").into(), stale.into()).unwrap();
        assert_eq!(merged.identity(), &pid(1));
        assert_eq!(
            merged.write_snapshot()["name"],
            ColumnValue::Value(Value::from("fresh"))
        );
    }

    #[test]
    fn compound_folds_later_writes() {
        let object = ObjectRef::new(pid(1));
        let compound = merge(delete(&object).into(), insert(&object).value("name", "A").into()).unwrap();
        let merged = merge(compound, update(&object).value("year", 2000_i64).into()).unwrap();
        assert!(merged.is_delete_then_insert());
        assert_eq!(merged.write_snapshot().len(), 3);

        let deleted = merge(merged, delete(&object).into()).unwrap();
        assert!(deleted.is_delete());
    }

    #[test]
    fn index_merges_and_preserves_first_seen_order() {
        let a = ObjectRef::new(pid(1));
        let b = ObjectRef::new(pid(2));
        let mut index = OperationIndex::new();
        index.add(update(&a).value("name", "A").into()).unwrap();
        index.add(update(&b).value("name", "B").into()).unwrap();
        index.add(delete(&a).into()).unwrap();

        assert_eq!(index.len(), 2);
        assert!(index.get(&pid(1)).is_some_and(RowOperation::is_delete));
        let ops = index.into_operations();
        assert_eq!(ops[0].identity(), &pid(1));
        assert_eq!(ops[1].identity(), &pid(2));
    }

    #[test]
    fn rekey_moves_entry() {
        let temp = RowIdentity::temporary("artist", 1);
        let object = ObjectRef::new(temp.clone());
        let mut index = OperationIndex::new();
        index.add(insert(&object).value("name", "A").into()).unwrap();

        assert!(index.rekey(&temp, &pid(5)).unwrap());
        assert!(index.get(&temp).is_none());
        assert_eq!(index.get(&pid(5)).map(RowOperation::identity), Some(&pid(5)));
        assert!(!index.rekey(&temp, &pid(6)).unwrap());
    }

    #[test]
    fn rekey_onto_tracked_identity_merges() {
        let temp = RowIdentity::temporary("artist", 1);
        let new_object = ObjectRef::new(temp.clone());
        let old_object = ObjectRef::new(pid(5));
        let mut index = OperationIndex::new();
        index.add(delete(&old_object).into()).unwrap();
        index.add(insert(&new_object).value("name", "A").into()).unwrap();

        index.rekey(&temp, &pid(5)).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.get(&pid(5)).is_some_and(RowOperation::is_delete_then_insert));
        assert_eq!(index.into_operations().len(), 1);
    }
}
