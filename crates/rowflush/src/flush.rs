//! Flush pipeline: merge, filter, sort, batch, execute.
//!
//! [`FlushAction::plan`] runs the pure stages and never touches the
//! database. [`FlushAction::execute`] hands the planned batches, in order,
//! to a [`StatementSink`]:
//! - deferred foreign-key values are resolved just before each batch, from
//!   the keys earlier inserts reported,
//! - keys generated by an insert batch are written back into the objects
//!   and recorded in the [`FlushResult`],
//! - the first failing batch aborts the flush.

use crate::batch::{Batch, group_batches};
use crate::config::FlushConfig;
use crate::merge::OperationIndex;
use crate::operation::{OperationKind, RowOperation};
use crate::sort::{GraphSorter, SnapshotSource};
use crate::values::ColumnValue;
use asupersync::{Cx, Outcome};
use rowflush_core::{
    EntityResolver, Error, ExecutionError, MergeError, MergeErrorKind, Result, RowIdentity, Value,
};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

/// Downstream executor of batched statements.
///
/// Implementations render one statement per batch (or one per row, if the
/// database cannot batch) and run it. Batches arrive strictly in flush order.
pub trait StatementSink: Send + Sync {
    fn execute_batch(
        &self,
        cx: &Cx,
        batch: &Batch,
    ) -> impl Future<Output = Outcome<BatchOutcome, Error>> + Send;
}

/// What the sink reports for one executed batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// Rows affected by the batch.
    pub rows_affected: u64,
    /// Database-generated key columns, one entry per row in batch order.
    /// Empty when nothing was generated.
    pub generated_keys: Vec<Vec<(String, Value)>>,
}

impl BatchOutcome {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            generated_keys: Vec::new(),
        }
    }

    /// Outcome of an insert batch that generated `keys`.
    pub fn with_generated_keys(rows_affected: u64, keys: Vec<Vec<(String, Value)>>) -> Self {
        Self {
            rows_affected,
            generated_keys: keys,
        }
    }
}

/// Ordered, batched operations ready for execution.
#[derive(Debug, Default)]
pub struct FlushPlan {
    batches: Vec<Batch>,
}

impl FlushPlan {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self { batches }
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Operations in execution order.
    pub fn operations(&self) -> impl Iterator<Item = &RowOperation> {
        self.batches.iter().flat_map(|b| b.operations().iter())
    }

    /// Check if the plan has any operations.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total number of operations in the plan.
    pub fn len(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    /// JSON rendering for logs and debugging.
    pub fn to_json(&self) -> serde_json::Value {
        let batches: Vec<serde_json::Value> = self
            .batches
            .iter()
            .enumerate()
            .map(|(index, batch)| {
                let rows: Vec<serde_json::Value> = batch.operations().iter().map(operation_json).collect();
                serde_json::json!({
                    "index": index,
                    "kind": batch.kind().as_str(),
                    "entity": batch.entity().name(),
                    "namespace": batch.entity().namespace_name(),
                    "rows": rows,
                })
            })
            .collect();
        serde_json::json!({
            "operations": self.len(),
            "batches": batches,
        })
    }
}

fn operation_json(op: &RowOperation) -> serde_json::Value {
    let values: serde_json::Map<String, serde_json::Value> = op
        .write_snapshot()
        .into_iter()
        .map(|(column, value)| (column, serde_json::Value::String(value.to_string())))
        .collect();
    let mut row = serde_json::json!({
        "identity": op.identity().to_string(),
        "values": values,
    });
    if let Some(qualifier) = op.qualifier() {
        let matched: serde_json::Map<String, serde_json::Value> = qualifier
            .snapshot()
            .into_iter()
            .map(|(column, value)| (column, serde_json::Value::String(value.to_string())))
            .collect();
        row["qualifier"] = serde_json::Value::Object(matched);
        row["is_null"] = serde_json::json!(qualifier.null_qualifier_names());
    }
    row
}

/// Result of a flush operation.
#[derive(Debug, Default, Clone)]
pub struct FlushResult {
    /// Number of rows inserted.
    pub inserted: usize,
    /// Number of rows updated.
    pub updated: usize,
    /// Number of rows deleted.
    pub deleted: usize,
    /// Batches executed.
    pub batches: usize,
    /// Sum of rows affected as reported by the sink.
    pub rows_affected: u64,
    /// Temporary identities replaced by generated keys, in execution order.
    pub replaced_identities: Vec<(RowIdentity, RowIdentity)>,
}

impl FlushResult {
    /// Create a new empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of operations performed.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    /// Permanent identity that replaced `temporary`, if any.
    pub fn replacement_for(&self, temporary: &RowIdentity) -> Option<&RowIdentity> {
        self.replaced_identities
            .iter()
            .find(|(old, _)| old == temporary)
            .map(|(_, new)| new)
    }

    fn count(&mut self, kind: OperationKind, n: usize) {
        match kind {
            OperationKind::Insert => self.inserted += n,
            OperationKind::Update => self.updated += n,
            OperationKind::Delete => self.deleted += n,
            OperationKind::DeleteThenInsert => {
                self.deleted += n;
                self.inserted += n;
            }
        }
    }
}

/// Runs one flush cycle over a set of candidate operations.
///
/// A `FlushAction` holds no per-flush state; one instance can serve any
/// number of flushes, sequentially or from several threads.
pub struct FlushAction {
    resolver: Arc<EntityResolver>,
    config: FlushConfig,
    snapshots: Option<Arc<dyn SnapshotSource + Send + Sync>>,
}

impl std::fmt::Debug for FlushAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushAction")
            .field("entities", &self.resolver.entity_count())
            .field("config", &self.config)
            .field("snapshots", &self.snapshots.is_some())
            .finish()
    }
}

impl FlushAction {
    /// Create a flush action over `resolver`'s catalog.
    pub fn new(resolver: Arc<EntityResolver>, config: FlushConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            resolver,
            config,
            snapshots: None,
        })
    }

    /// Attach a source of cached row snapshots for delete ordering.
    #[must_use]
    pub fn with_snapshot_source(mut self, source: Arc<dyn SnapshotSource + Send + Sync>) -> Self {
        self.snapshots = Some(source);
        self
    }

    pub fn config(&self) -> &FlushConfig {
        &self.config
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    /// Collapse operations that target the same row.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn merge(&self, ops: impl IntoIterator<Item = RowOperation>) -> Result<Vec<RowOperation>> {
        let mut index = OperationIndex::new();
        let mut seen = 0usize;
        for op in ops {
            self.resolver.require_entity(op.entity_name())?;
            index.add(op)?;
            seen += 1;
        }
        let merged = index.into_operations();
        tracing::debug!(input = seen, merged = merged.len(), "Operations merged");
        Ok(merged)
    }

    /// Drop operations with nothing to do.
    pub fn filter(&self, ops: Vec<RowOperation>) -> Vec<RowOperation> {
        if !self.config.filter_empty_updates {
            return ops;
        }
        ops.into_iter()
            .filter(|op| {
                let empty = op.is_update() && op.values().is_none_or(|v| v.is_empty());
                if empty {
                    tracing::warn!(operation = %op, "Skipping UPDATE with no values");
                }
                !empty
            })
            .collect()
    }

    /// Order operations by dependencies.
    pub fn sort(&self, ops: Vec<RowOperation>) -> Result<Vec<RowOperation>> {
        let mut sorter = GraphSorter::new(&self.resolver);
        if self.config.use_cached_snapshots {
            if let Some(source) = self.snapshots.as_deref() {
                sorter = sorter.with_snapshot_source(source);
            }
        }
        sorter.sort(ops)
    }

    /// Merge, filter, sort and batch. Performs no I/O.
    ///
    /// # Errors
    ///
    /// Returns `Err` for unregistered entities, invalid merges and
    /// dependency cycles. Nothing has been executed at that point.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn plan(&self, ops: impl IntoIterator<Item = RowOperation>) -> Result<FlushPlan> {
        let merged = self.merge(ops)?;
        let filtered = self.filter(merged);
        let sorted = self.sort(filtered)?;
        let plan = FlushPlan::new(group_batches(sorted, &self.config));
        tracing::debug!(
            operations = plan.len(),
            batches = plan.batches().len(),
            "Flush plan ready"
        );
        Ok(plan)
    }

    /// Plan and execute in one step.
    pub async fn flush<S: StatementSink>(
        &self,
        cx: &Cx,
        sink: &S,
        ops: impl IntoIterator<Item = RowOperation>,
    ) -> Outcome<FlushResult, Error> {
        match self.plan(ops) {
            Ok(plan) => self.execute(cx, sink, plan).await,
            Err(e) => Outcome::Err(e),
        }
    }

    /// Execute a plan's batches in order.
    #[tracing::instrument(level = "info", skip_all, fields(batches = plan.batches().len()))]
    pub async fn execute<S: StatementSink>(
        &self,
        cx: &Cx,
        sink: &S,
        mut plan: FlushPlan,
    ) -> Outcome<FlushResult, Error> {
        tracing::info!(operations = plan.len(), "Executing flush plan");

        let start = std::time::Instant::now();
        let mut result = FlushResult::default();
        let mut replacements: HashMap<RowIdentity, RowIdentity> = HashMap::new();

        for (batch_index, batch) in plan.batches.iter_mut().enumerate() {
            if let Some(reason) = cx.cancel_reason() {
                tracing::warn!(batch = batch_index, "Flush cancelled before batch");
                return Outcome::Cancelled(reason);
            }

            if let Err(e) = resolve_deferred(batch, &replacements) {
                return Outcome::Err(e);
            }

            tracing::debug!(
                batch = batch_index,
                entity = batch.entity().name(),
                kind = %batch.kind(),
                size = batch.len(),
                "Executing batch"
            );

            let outcome = match sink.execute_batch(cx, batch).await {
                Outcome::Ok(outcome) => outcome,
                Outcome::Err(e) => {
                    tracing::error!(
                        batch = batch_index,
                        entity = batch.entity().name(),
                        error = %e,
                        "Batch failed, aborting flush"
                    );
                    return Outcome::Err(Error::Execution(ExecutionError {
                        batch_index,
                        entity: batch.entity().name().to_string(),
                        message: e.to_string(),
                        source: Some(Box::new(e)),
                    }));
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            write_back(batch, &outcome, &mut replacements, &mut result);
            result.count(batch.kind(), batch.len());
            result.batches += 1;
            result.rows_affected += outcome.rows_affected;
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            replaced = result.replaced_identities.len(),
            "Flush complete"
        );

        Outcome::Ok(result)
    }
}

/// Replace deferred key references in `batch` with literal values.
fn resolve_deferred(batch: &mut Batch, replacements: &HashMap<RowIdentity, RowIdentity>) -> Result<()> {
    for op in batch.operations_mut() {
        let label = op.to_string();
        let Some(values) = op.values_mut() else {
            continue;
        };
        if !values.has_deferred() {
            continue;
        }
        values.rewrite(|column, value| {
            let ColumnValue::KeyOf { identity, column: key_column } = value else {
                return Ok(None);
            };
            let resolved = replacements.get(identity).unwrap_or(identity);
            match resolved.value(key_column) {
                Some(v) if !resolved.is_temporary() => {
                    tracing::trace!(operation = %label, column, value = %v, "Resolved deferred key");
                    Ok(Some(ColumnValue::Value(v.clone())))
                }
                _ => Err(MergeError::new(
                    MergeErrorKind::UnresolvedKey,
                    label.clone(),
                    format!("column '{column}' refers to {identity}, which has no key yet"),
                )
                .into()),
            }
        })?;
    }
    Ok(())
}

/// Apply generated keys and record written state after a batch ran.
fn write_back(
    batch: &mut Batch,
    outcome: &BatchOutcome,
    replacements: &mut HashMap<RowIdentity, RowIdentity>,
    result: &mut FlushResult,
) {
    for (row, op) in batch.operations_mut().iter_mut().enumerate() {
        let insert_identity = match op {
            RowOperation::Insert(insert) => Some(insert.identity.clone()),
            RowOperation::DeleteThenInsert { insert, .. } => Some(insert.identity.clone()),
            RowOperation::Update(_) | RowOperation::Delete(_) => None,
        };

        if let Some(old) = insert_identity.filter(RowIdentity::is_temporary) {
            let generated = outcome.generated_keys.get(row).map_or(&[][..], Vec::as_slice);
            match permanent_identity(op, generated) {
                Some(new) => {
                    if op.object().identity() == old {
                        op.object().replace_identity(new.clone());
                    }
                    op.replace_identity(&old, &new);
                    tracing::trace!(old = %old, new = %new, "Replaced temporary identity");
                    replacements.insert(old.clone(), new.clone());
                    result.replaced_identities.push((old, new));
                }
                None => {
                    tracing::warn!(
                        identity = %old,
                        "Insert reported no complete key; identity stays temporary"
                    );
                }
            }
        }

        let written: BTreeMap<String, Value> = op
            .write_snapshot()
            .into_iter()
            .filter_map(|(column, value)| value.as_value().cloned().map(|v| (column, v)))
            .collect();
        if !written.is_empty() {
            op.object().absorb_written(&written);
        }
    }
}

/// Permanent identity for an inserted row: generated key columns first,
/// then key columns the insert wrote itself.
fn permanent_identity(op: &RowOperation, generated: &[(String, Value)]) -> Option<RowIdentity> {
    let entity = op.entity();
    let written = op.write_snapshot();
    let mut pk = Vec::new();
    for column in entity.primary_key_columns() {
        let value = generated
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v.clone())
            .or_else(|| written.get(&column).and_then(|v| v.as_value().cloned()))?;
        if value.is_null() {
            return None;
        }
        pk.push((column, value));
    }
    Some(RowIdentity::permanent(entity.name(), pk))
}

/// Convert a flush outcome into a plain `Result`.
///
/// Cancellation becomes [`Error::Cancelled`]; a panic inside the sink
/// becomes [`Error::Custom`].
pub fn into_result<T>(outcome: Outcome<T, Error>) -> Result<T> {
    match outcome {
        Outcome::Ok(v) => Ok(v),
        Outcome::Err(e) => Err(e),
        Outcome::Cancelled(_) => Err(Error::Cancelled),
        Outcome::Panicked(p) => Err(Error::Custom(format!("statement sink panicked: {p:?}"))),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
