//! Grouping sorted operations into batches.
//!
//! A batch is a run of consecutive operations that one statement template
//! can execute with different parameters. Runs are broken as soon as the
//! statement shape changes, even when entity and kind stay the same.

use crate::config::FlushConfig;
use crate::operation::{OperationKind, RowOperation};
use rowflush_core::EntityInfo;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Can `a` and `b` share one batched statement?
///
/// Requires the same kind and the same entity in the same namespace, plus:
/// - inserts: the same written columns,
/// - updates: the same written columns, qualifier columns and `IS NULL`
///   columns,
/// - deletes: the same qualifier columns and `IS NULL` columns.
///
/// Delete-then-insert operations never share a batch.
pub fn is_same_batch(a: &RowOperation, b: &RowOperation) -> bool {
    if a.kind() != b.kind() || !a.entity().same_table(b.entity()) {
        return false;
    }
    match (a, b) {
        (RowOperation::Insert(x), RowOperation::Insert(y)) => {
            columns(&x.snapshot()) == columns(&y.snapshot())
        }
        (RowOperation::Update(x), RowOperation::Update(y)) => {
            x.values.updated_attributes() == y.values.updated_attributes()
                && x.qualifier.same_shape(&y.qualifier)
        }
        (RowOperation::Delete(x), RowOperation::Delete(y)) => x.qualifier.same_shape(&y.qualifier),
        _ => false,
    }
}

fn columns<V>(snapshot: &std::collections::BTreeMap<String, V>) -> BTreeSet<&str> {
    snapshot.keys().map(String::as_str).collect()
}

/// A run of operations executed with one statement template.
#[derive(Debug, Clone)]
pub struct Batch {
    kind: OperationKind,
    entity: Arc<EntityInfo>,
    operations: Vec<RowOperation>,
}

impl Batch {
    fn start(op: RowOperation) -> Self {
        Self {
            kind: op.kind(),
            entity: Arc::clone(op.entity()),
            operations: vec![op],
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn entity(&self) -> &Arc<EntityInfo> {
        &self.entity
    }

    pub fn operations(&self) -> &[RowOperation] {
        &self.operations
    }

    pub(crate) fn operations_mut(&mut self) -> &mut [RowOperation] {
        &mut self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Partition sorted operations into maximal same-shape runs.
#[tracing::instrument(level = "debug", skip_all, fields(operations = ops.len()))]
pub fn group_batches(ops: Vec<RowOperation>, config: &FlushConfig) -> Vec<Batch> {
    let limit = config.max_batch_size.unwrap_or(usize::MAX).max(1);
    let mut batches: Vec<Batch> = Vec::new();

    for op in ops {
        if let Some(current) = batches.last_mut() {
            let joins = config.batching
                && current.len() < limit
                && current
                    .operations
                    .last()
                    .is_some_and(|last| is_same_batch(last, &op));
            if joins {
                current.operations.push(op);
                continue;
            }
            tracing::trace!(
                entity = current.entity.name(),
                kind = %current.kind,
                size = current.len(),
                next = %op,
                "Batch boundary"
            );
        }
        batches.push(Batch::start(op));
    }

    tracing::debug!(batches = batches.len(), "Operations grouped");
    batches
}
