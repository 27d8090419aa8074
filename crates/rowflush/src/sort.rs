//! Dependency ordering of merged row operations.
//!
//! The sorter builds a directed graph over the operation set and emits a
//! topological order of it:
//!
//! 1. Every operation is indexed under its logical identity and its
//!    *effective* identity (a temporary identity whose key columns are all
//!    written as literals is indexed under the permanent key it will get).
//! 2. For each ordering relationship leaving an operation's entity, the
//!    parent row is resolved from the written values (inserts, updates) or
//!    from the object's last persisted snapshot (deletes, and the previous
//!    parent of an update or a delete-then-insert). A composite key that is only partly known yields
//!    no parent.
//! 3. Edges follow the pair of operation kinds:
//!
//!    | child | parent not deleted | parent deleted |
//!    |---|---|---|
//!    | insert | parent first | none |
//!    | update | parent first | child first |
//!    | delete | none | child first |
//!    | delete+insert | parent first | child first |
//!
//!    A delete+insert child also orders against the parent its deleted row
//!    referenced. A parent that is itself a delete-then-insert counts as
//!    deleted for a deleting child and for a persisted reference, and as
//!    not deleted otherwise.
//! 4. Operations sharing an effective identity are ordered so that deletes
//!    run after every other write to the same row.
//! 5. Kahn's algorithm emits the order, always picking the ready operation
//!    that came first in the input. Leftover operations form a cycle.

use crate::operation::{DeleteOp, OperationKind, RowOperation};
use crate::values::ColumnValue;
use rowflush_core::{EntityResolver, OrderingError, RelationshipInfo, Result, RowIdentity, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Last-resort source of persisted row snapshots.
///
/// Consulted only for deletes whose object no longer carries the foreign-key
/// columns needed to find the parent row. Implementations must answer from
/// memory; the sorter never waits on I/O.
pub trait SnapshotSource {
    fn cached_snapshot(&self, identity: &RowIdentity) -> Option<BTreeMap<String, Value>>;
}

impl<F> SnapshotSource for F
where
    F: Fn(&RowIdentity) -> Option<BTreeMap<String, Value>>,
{
    fn cached_snapshot(&self, identity: &RowIdentity) -> Option<BTreeMap<String, Value>> {
        self(identity)
    }
}

/// Topological sorter for one flush.
pub struct GraphSorter<'a> {
    resolver: &'a EntityResolver,
    snapshots: Option<&'a dyn SnapshotSource>,
}

impl<'a> GraphSorter<'a> {
    pub fn new(resolver: &'a EntityResolver) -> Self {
        Self {
            resolver,
            snapshots: None,
        }
    }

    /// Use `source` when a delete's parent cannot be found on its object.
    #[must_use]
    pub fn with_snapshot_source(mut self, source: &'a dyn SnapshotSource) -> Self {
        self.snapshots = Some(source);
        self
    }

    /// Order `ops` so that every dependency runs before its dependents.
    ///
    /// The result is deterministic: among operations free to run, the one
    /// earliest in `ops` goes first.
    #[tracing::instrument(level = "debug", skip_all, fields(operations = ops.len()))]
    pub fn sort(&self, ops: Vec<RowOperation>) -> Result<Vec<RowOperation>> {
        if ops.len() < 2 {
            return Ok(ops);
        }

        let effective: Vec<RowIdentity> = ops.iter().map(|op| self.effective_identity(op)).collect();

        let mut index: HashMap<&RowIdentity, Vec<usize>> = HashMap::new();
        for (i, op) in ops.iter().enumerate() {
            let mut keys = vec![op.identity(), &effective[i]];
            if let RowOperation::DeleteThenInsert { insert, .. } = op {
                keys.push(&insert.identity);
            }
            keys.dedup();
            for key in keys {
                let slot = index.entry(key).or_default();
                if !slot.contains(&i) {
                    slot.push(i);
                }
            }
        }

        let mut graph = Graph::new(ops.len());

        for (child, op) in ops.iter().enumerate() {
            for rel in self.resolver.ordering_relationships(op.entity_name()) {
                let (written, previous) = self.parents(op, rel);
                for (parent_id, from_values) in written
                    .into_iter()
                    .map(|p| (p, true))
                    .chain(previous.into_iter().map(|p| (p, false)))
                {
                    let Some(parents) = index.get(&parent_id) else {
                        continue;
                    };
                    for &parent in parents {
                        if parent == child {
                            continue;
                        }
                        let direction = edge_direction(op.kind(), ops[parent].kind(), from_values);
                        let added = match direction {
                            Some(Direction::ParentFirst) => graph.add_edge(parent, child),
                            Some(Direction::ChildFirst) => graph.add_edge(child, parent),
                            None => false,
                        };
                        if added {
                            tracing::trace!(
                                relationship = %rel.name,
                                child = %ops[child],
                                parent = %ops[parent],
                                direction = ?direction,
                                "Added foreign key edge"
                            );
                        }
                    }
                }
            }
        }

        let mut by_effective: HashMap<&RowIdentity, Vec<usize>> = HashMap::new();
        for (i, id) in effective.iter().enumerate() {
            by_effective.entry(id).or_default().push(i);
        }
        for (id, members) in by_effective.iter().filter(|(_, m)| m.len() > 1) {
            for &delete in members.iter().filter(|&&i| ops[i].is_delete()) {
                for &write in members.iter().filter(|&&i| !ops[i].is_delete()) {
                    if graph.add_edge(write, delete) {
                        tracing::trace!(row = %id, write = %ops[write], delete = %ops[delete], "Added same-row edge");
                    }
                }
            }
        }

        tracing::debug!(edges = graph.edges, "Dependency graph built");

        let order = match graph.topological_order() {
            Ok(order) => order,
            Err(remaining) => {
                let entities = remaining
                    .iter()
                    .map(|&i| ops[i].entity_name().to_string())
                    .collect();
                let identities: Vec<String> = remaining
                    .iter()
                    .map(|&i| ops[i].identity().to_string())
                    .collect();
                let err = OrderingError::cycle(entities, identities);
                tracing::error!(
                    unsorted = remaining.len(),
                    entities = ?err.entities,
                    "Dependency cycle between row operations"
                );
                return Err(err.into());
            }
        };

        let mut slots: Vec<Option<RowOperation>> = ops.into_iter().map(Some).collect();
        Ok(order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect())
    }

    /// Identity used to find this operation as a parent.
    fn effective_identity(&self, op: &RowOperation) -> RowIdentity {
        let identity = op.identity();
        if !identity.is_temporary() {
            return identity.clone();
        }
        let Some(values) = op.values() else {
            return identity.clone();
        };
        let pk_columns = op.entity().primary_key_columns();
        let mut pk = Vec::with_capacity(pk_columns.len());
        for column in pk_columns {
            match values.get(&column).map(ColumnValue::normalized) {
                Some(ColumnValue::Value(v)) if !v.is_null() => pk.push((column, v)),
                _ => return identity.clone(),
            }
        }
        let effective = RowIdentity::permanent(identity.entity(), pk);
        tracing::trace!(identity = %identity, effective = %effective, "Resolved effective identity");
        effective
    }

    /// Parent rows referenced through `rel`: the one named by the written
    /// values, and the one named by the persisted state.
    fn parents(&self, op: &RowOperation, rel: &RelationshipInfo) -> (Option<RowIdentity>, Option<RowIdentity>) {
        match op {
            RowOperation::Insert(insert) => {
                let written = parent_from(rel, |c| insert.values.get(c).cloned());
                (written, None)
            }
            RowOperation::DeleteThenInsert { delete, insert } => {
                let written = parent_from(rel, |c| insert.values.get(c).cloned());
                let previous = self
                    .persisted_parent(delete, rel)
                    .filter(|p| Some(p) != written.as_ref());
                (written, previous)
            }
            RowOperation::Update(update) => {
                let touches = rel.source_columns().any(|c| update.values.get(c).is_some());
                if !touches {
                    return (None, None);
                }
                let written = parent_from(rel, |c| {
                    update
                        .values
                        .get(c)
                        .cloned()
                        .or_else(|| update.object.persisted_value(c).map(ColumnValue::Value))
                });
                let previous = parent_from(rel, |c| {
                    update.object.persisted_value(c).map(ColumnValue::Value)
                })
                .filter(|p| Some(p) != written.as_ref());
                (written, previous)
            }
            RowOperation::Delete(delete) => (None, self.persisted_parent(delete, rel)),
        }
    }

    /// Parent the deleted row referenced: the object's persisted value,
    /// then the cached snapshot.
    fn persisted_parent(&self, delete: &DeleteOp, rel: &RelationshipInfo) -> Option<RowIdentity> {
        let mut cached: Option<Option<BTreeMap<String, Value>>> = None;
        parent_from(rel, |c| {
            delete
                .object
                .persisted_value(c)
                .or_else(|| {
                    let snapshot = cached.get_or_insert_with(|| {
                        self.snapshots
                            .and_then(|s| s.cached_snapshot(&delete.identity))
                    });
                    snapshot.as_ref().and_then(|s| s.get(c).cloned())
                })
                .map(ColumnValue::Value)
        })
    }
}

/// Resolve the parent identity named by `rel`'s join columns.
///
/// All columns must be known: either non-null literals, or deferred keys of
/// one and the same (not yet keyed) parent row.
fn parent_from<F>(rel: &RelationshipInfo, mut lookup: F) -> Option<RowIdentity>
where
    F: FnMut(&str) -> Option<ColumnValue>,
{
    let mut literals: Vec<(String, Value)> = Vec::with_capacity(rel.joins.len());
    let mut deferred: Option<RowIdentity> = None;

    for join in &rel.joins {
        match lookup(&join.source)?.normalized() {
            ColumnValue::Value(v) if v.is_null() => return None,
            ColumnValue::Value(v) => literals.push((join.target.clone(), v)),
            ColumnValue::KeyOf { identity, .. } => match &deferred {
                None => deferred = Some(identity),
                Some(existing) if *existing == identity => {}
                Some(_) => return None,
            },
        }
    }

    match deferred {
        None if !literals.is_empty() => Some(RowIdentity::permanent(&rel.target_entity, literals)),
        Some(identity) if literals.is_empty() && identity.entity() == rel.target_entity => {
            Some(identity)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ParentFirst,
    ChildFirst,
}

/// Edge between a child and its parent, by operation kinds.
///
/// `from_values` is false when the parent was found through the persisted
/// state (the row the child referenced before this flush); such parents
/// only matter when they are being deleted.
fn edge_direction(child: OperationKind, parent: OperationKind, from_values: bool) -> Option<Direction> {
    use OperationKind::{Delete, DeleteThenInsert, Insert, Update};

    let deleted = parent_row_deleted(child, parent, from_values);
    match child {
        Delete => deleted.then_some(Direction::ChildFirst),
        _ if !from_values => deleted.then_some(Direction::ChildFirst),
        Insert if deleted => None,
        Update | DeleteThenInsert if deleted => Some(Direction::ChildFirst),
        Insert | Update | DeleteThenInsert => Some(Direction::ParentFirst),
    }
}

/// Does `parent` remove the row the child references?
///
/// A delete-then-insert parent removes the old row, which is what a
/// deleting child or a persisted reference points at. A written reference
/// points at the re-inserted row.
fn parent_row_deleted(child: OperationKind, parent: OperationKind, from_values: bool) -> bool {
    match parent {
        OperationKind::Delete => true,
        OperationKind::DeleteThenInsert => child == OperationKind::Delete || !from_values,
        OperationKind::Insert | OperationKind::Update => false,
    }
}

/// Adjacency sets over operation positions.
struct Graph {
    successors: Vec<BTreeSet<usize>>,
    in_degree: Vec<usize>,
    edges: usize,
}

impl Graph {
    fn new(nodes: usize) -> Self {
        Self {
            successors: vec![BTreeSet::new(); nodes],
            in_degree: vec![0; nodes],
            edges: 0,
        }
    }

    /// `from` must run before `to`. Returns false for duplicates.
    fn add_edge(&mut self, from: usize, to: usize) -> bool {
        if from == to || !self.successors[from].insert(to) {
            return false;
        }
        self.in_degree[to] += 1;
        self.edges += 1;
        true
    }

    /// Kahn's algorithm with the lowest ready position first.
    ///
    /// On a cycle, returns the positions that could not be scheduled.
    fn topological_order(mut self) -> std::result::Result<Vec<usize>, Vec<usize>> {
        let mut ready: BTreeSet<usize> = self
            .in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.in_degree.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &next in &self.successors[node] {
                let degree = &mut self.in_degree[next];
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < self.in_degree.len() {
            let scheduled: BTreeSet<usize> = order.into_iter().collect();
            return Err((0..self.in_degree.len())
                .filter(|i| !scheduled.contains(i))
                .collect());
        }
        Ok(order)
    }
}
