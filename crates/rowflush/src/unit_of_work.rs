//! Collection of pending row operations ahead of a flush.
//!
//! The Unit of Work is where the object-graph layer drops one operation per
//! affected row. Operations for the same row are merged as they arrive, so
//! the set handed to [`FlushAction`] is already one-per-row.
//!
//! # Example
//!
//! ```ignore
//! let mut uow = UnitOfWork::new();
//!
//! let artist = uow.new_object("artist");
//! uow.track_insert(InsertOp::new(artist_entity, artist.clone()).value("name", "Ada"))?;
//! uow.track_delete(DeleteOp::new(painting_entity, old_painting))?;
//!
//! // Plan only (no I/O), e.g. for logging
//! let plan = uow.compute_flush_plan(&action)?;
//!
//! // Or execute against a sink
//! let result = uow.flush(&cx, &action, &sink).await;
//! ```

use crate::flush::{FlushAction, FlushPlan, FlushResult, StatementSink};
use crate::merge::OperationIndex;
use crate::object::ObjectRef;
use crate::operation::{DeleteOp, InsertOp, RowOperation, UpdateOp};
use asupersync::{Cx, Outcome};
use rowflush_core::{Error, Result, RowIdentity, TemporaryKeys};

/// Tracks and merges all pending row operations of one flush cycle.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    /// Merged operations, one per logical row.
    operations: OperationIndex,

    /// Source of temporary identities for new objects.
    temporary_keys: TemporaryKeys,
}

impl UnitOfWork {
    /// Create a new empty Unit of Work.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle for a new object of `entity` with a fresh temporary
    /// identity.
    pub fn new_object(&mut self, entity: &str) -> ObjectRef {
        ObjectRef::new(self.temporary_keys.next(entity))
    }

    /// Track a pending INSERT.
    pub fn track_insert(&mut self, op: InsertOp) -> Result<()> {
        self.track(op.into())
    }

    /// Track a pending UPDATE.
    pub fn track_update(&mut self, op: UpdateOp) -> Result<()> {
        self.track(op.into())
    }

    /// Track a pending DELETE.
    pub fn track_delete(&mut self, op: DeleteOp) -> Result<()> {
        self.track(op.into())
    }

    /// Track any operation, merging it with the one already pending for the
    /// same row.
    ///
    /// # Errors
    ///
    /// Returns a `Merge` error if the two operations cannot be combined. The
    /// previously pending operation is lost in that case.
    pub fn track(&mut self, op: RowOperation) -> Result<()> {
        tracing::trace!(operation = %op, "Tracking operation");
        self.operations.add(op)
    }

    /// Move the pending operation of `old` over to `new`.
    ///
    /// Used when an object learns its permanent key before the flush runs.
    /// Pending references to `old` are pointed at `new` as well. Returns
    /// false if nothing is pending for `old`.
    pub fn rekey(&mut self, old: &RowIdentity, new: &RowIdentity) -> Result<bool> {
        let moved = self.operations.rekey(old, new)?;
        if moved {
            tracing::debug!(old = %old, new = %new, "Re-keyed pending operation");
        }
        Ok(moved)
    }

    /// The operation currently pending for `identity`.
    pub fn pending(&self, identity: &RowIdentity) -> Option<&RowOperation> {
        self.operations.get(identity)
    }

    /// Compute the flush plan without executing anything.
    ///
    /// # Errors
    ///
    /// Returns `Err` if an entity is unregistered or a dependency cycle is
    /// detected.
    pub fn compute_flush_plan(&self, action: &FlushAction) -> Result<FlushPlan> {
        action.plan(self.operations.iter().cloned())
    }

    /// Flush all pending operations through `sink`.
    ///
    /// Pending operations are cleared once the flush succeeds; on any other
    /// outcome they stay tracked.
    #[tracing::instrument(level = "debug", skip_all, fields(pending = self.operations.len()))]
    pub async fn flush<S: StatementSink>(
        &mut self,
        cx: &Cx,
        action: &FlushAction,
        sink: &S,
    ) -> Outcome<FlushResult, Error> {
        let plan = match self.compute_flush_plan(action) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        match action.execute(cx, sink, plan).await {
            Outcome::Ok(result) => {
                self.clear();
                Outcome::Ok(result)
            }
            other => other,
        }
    }

    /// Take the pending operations out, leaving the Unit of Work empty.
    pub fn take_operations(&mut self) -> Vec<RowOperation> {
        std::mem::take(&mut self.operations).into_operations()
    }

    /// Clear all tracked changes.
    pub fn clear(&mut self) {
        self.operations = OperationIndex::new();
    }

    /// Check if there are any pending changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.operations.is_empty()
    }

    /// Get the count of pending operations.
    #[must_use]
    pub fn pending_count(&self) -> PendingCounts {
        let mut counts = PendingCounts::default();
        for op in self.operations.iter() {
            match op {
                RowOperation::Insert(_) => counts.new += 1,
                RowOperation::Update(_) => counts.dirty += 1,
                RowOperation::Delete(_) => counts.deleted += 1,
                RowOperation::DeleteThenInsert { .. } => {
                    counts.new += 1;
                    counts.deleted += 1;
                }
            }
        }
        counts
    }
}

/// Count of pending operations by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    /// Rows pending INSERT.
    pub new: usize,
    /// Rows pending UPDATE.
    pub dirty: usize,
    /// Rows pending DELETE.
    pub deleted: usize,
}

impl PendingCounts {
    /// Total number of pending operations.
    #[must_use]
    pub fn total(&self) -> usize {
        self.new + self.dirty + self.deleted
    }

    /// Check if there are no pending operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new == 0 && self.dirty == 0 && self.deleted == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlushConfig;
    use crate::values::ColumnValue;
    use rowflush_core::{ColumnInfo, EntityInfo, EntityResolver, RelationshipInfo, Value};
    use std::sync::Arc;

    fn resolver() -> Arc<EntityResolver> {
        Arc::new(
            EntityResolver::builder()
                .entity(
                    EntityInfo::new("team")
                        .column(ColumnInfo::generated_key("id"))
                        .column(ColumnInfo::new("name")),
                )
                .entity(
                    EntityInfo::new("hero")
                        .column(ColumnInfo::generated_key("id"))
                        .column(ColumnInfo::new("name"))
                        .column(ColumnInfo::new("team_id").nullable(true)),
                )
                .relationship(RelationshipInfo::to_one("team", "hero", "team").join("team_id", "id"))
                .build()
                .unwrap(),
        )
    }

    fn entity(resolver: &EntityResolver, name: &str) -> Arc<EntityInfo> {
        Arc::clone(resolver.entity(name).unwrap())
    }

    #[test]
    fn test_unit_of_work_new() {
        let uow = UnitOfWork::new();
        assert!(!uow.has_changes());
        assert!(uow.pending_count().is_empty());
    }

    #[test]
    fn test_new_objects_get_distinct_temporary_identities() {
        let mut uow = UnitOfWork::new();
        let a = uow.new_object("team");
        let b = uow.new_object("team");
        assert!(a.identity().is_temporary());
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_track_merges_same_row() {
        let resolver = resolver();
        let mut uow = UnitOfWork::new();
        let hero = ObjectRef::new(RowIdentity::permanent("hero", [("id", 7_i64)]));

        uow.track_update(UpdateOp::new(entity(&resolver, "hero"), hero.clone()).value("name", "Spider"))
            .unwrap();
        uow.track_update(UpdateOp::new(entity(&resolver, "hero"), hero.clone()).value("team_id", 2_i64))
            .unwrap();

        let counts = uow.pending_count();
        assert_eq!(counts.dirty, 1);
        assert_eq!(counts.total(), 1);

        let pending = uow.pending(&hero.identity()).unwrap();
        let values = pending.values().unwrap();
        assert_eq!(values.updated_attributes(), vec!["name".to_string(), "team_id".to_string()]);
    }

    #[test]
    fn test_delete_then_insert_counts_both() {
        let resolver = resolver();
        let mut uow = UnitOfWork::new();
        let team = ObjectRef::new(RowIdentity::permanent("team", [("id", 1_i64)]));

        uow.track_delete(DeleteOp::new(entity(&resolver, "team"), team.clone())).unwrap();
        uow.track_insert(InsertOp::new(entity(&resolver, "team"), team).value("name", "Avengers"))
            .unwrap();

        let counts = uow.pending_count();
        assert_eq!(counts.new, 1);
        assert_eq!(counts.deleted, 1);
    }

    #[test]
    fn test_rekey_moves_pending_operation() {
        let resolver = resolver();
        let mut uow = UnitOfWork::new();
        let team = uow.new_object("team");
        let temporary = team.identity();
        uow.track_insert(InsertOp::new(entity(&resolver, "team"), team).value("name", "X-Men"))
            .unwrap();

        let permanent = RowIdentity::permanent("team", [("id", 5_i64)]);
        assert!(uow.rekey(&temporary, &permanent).unwrap());
        assert!(uow.pending(&temporary).is_none());
        assert!(uow.pending(&permanent).unwrap().is_insert());
        assert!(!uow.rekey(&temporary, &permanent).unwrap());
    }

    #[test]
    fn test_rekey_redirects_child_references() {
        let resolver = resolver();
        let action = FlushAction::new(Arc::clone(&resolver), FlushConfig::default()).unwrap();
        let mut uow = UnitOfWork::new();
        let team = uow.new_object("team");
        let hero = uow.new_object("hero");

        uow.track_insert(
            InsertOp::new(entity(&resolver, "hero"), hero.clone())
                .value("name", "Storm")
                .foreign_key(
                    "team_id",
                    ColumnValue::KeyOf {
                        identity: team.identity(),
                        column: "id".into(),
                    },
                ),
        )
        .unwrap();
        uow.track_insert(InsertOp::new(entity(&resolver, "team"), team.clone()).value("name", "X-Men"))
            .unwrap();

        let temporary = team.identity();
        let permanent = RowIdentity::permanent("team", [("id", 5_i64)]);
        team.replace_identity(permanent.clone());
        assert!(uow.rekey(&temporary, &permanent).unwrap());

        let child = uow.pending(&hero.identity()).unwrap();
        assert_eq!(
            child.values().unwrap().get("team_id"),
            Some(&ColumnValue::Value(Value::BigInt(5)))
        );

        let plan = uow.compute_flush_plan(&action).unwrap();
        let order: Vec<String> = plan.operations().map(ToString::to_string).collect();
        assert_eq!(order, vec!["INSERT team{id=5}", "INSERT hero<temp:2>"]);
    }

    #[test]
    fn test_rekey_without_pending_parent_still_redirects() {
        let resolver = resolver();
        let mut uow = UnitOfWork::new();
        let team = RowIdentity::temporary("team", 99);
        let hero = uow.new_object("hero");
        uow.track_insert(InsertOp::new(entity(&resolver, "hero"), hero.clone()).foreign_key(
            "team_id",
            ColumnValue::KeyOf {
                identity: team.clone(),
                column: "id".into(),
            },
        ))
        .unwrap();

        let permanent = RowIdentity::permanent("team", [("id", 12_i64)]);
        assert!(!uow.rekey(&team, &permanent).unwrap());
        let values = uow.pending(&hero.identity()).unwrap().values().unwrap();
        assert!(!values.has_deferred());
        assert_eq!(values.get("team_id"), Some(&ColumnValue::Value(Value::BigInt(12))));
    }

    #[test]
    fn test_compute_flush_plan_orders_parents_first() {
        let resolver = resolver();
        let action = FlushAction::new(Arc::clone(&resolver), FlushConfig::default()).unwrap();
        let mut uow = UnitOfWork::new();
        let team = uow.new_object("team");
        let hero = uow.new_object("hero");

        uow.track_insert(
            InsertOp::new(entity(&resolver, "hero"), hero)
                .value("name", "Storm")
                .foreign_key(
                    "team_id",
                    ColumnValue::KeyOf {
                        identity: team.identity(),
                        column: "id".into(),
                    },
                ),
        )
        .unwrap();
        uow.track_insert(InsertOp::new(entity(&resolver, "team"), team).value("name", "X-Men"))
            .unwrap();

        let plan = uow.compute_flush_plan(&action).unwrap();
        let order: Vec<&str> = plan.operations().map(RowOperation::entity_name).collect();
        assert_eq!(order, vec!["team", "hero"]);
        assert!(uow.has_changes());
    }

    #[test]
    fn test_take_operations_and_clear() {
        let resolver = resolver();
        let mut uow = UnitOfWork::new();
        let team = ObjectRef::new(RowIdentity::permanent("team", [("id", 1_i64)]));
        uow.track_delete(DeleteOp::new(entity(&resolver, "team"), team)).unwrap();

        let ops = uow.take_operations();
        assert_eq!(ops.len(), 1);
        assert!(!uow.has_changes());

        uow.track(ops.into_iter().next().unwrap()).unwrap();
        uow.clear();
        assert!(!uow.has_changes());
    }

    #[test]
    fn test_pending_counts() {
        let counts = PendingCounts {
            new: 2,
            dirty: 3,
            deleted: 1,
        };
        assert_eq!(counts.total(), 6);
        assert!(!counts.is_empty());
    }
}
