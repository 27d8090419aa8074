//! Shared handles to the in-memory objects behind row operations.
//!
//! Every [`RowOperation`](crate::RowOperation) carries an [`ObjectRef`] back
//! to the object it was derived from. The merger reads the object's current
//! identity to decide which operation's key wins, the sorter reads its last
//! persisted snapshot to find the parents of a delete, and the executor writes
//! generated keys back into it.
//!
//! Handles compare by pointer, never by content, and do not take part in
//! operation equality or ordering.

use rowflush_core::{RowIdentity, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug)]
struct ObjectState {
    identity: RowIdentity,
    /// Column values as last read from or written to the database.
    persisted: Option<BTreeMap<String, Value>>,
}

/// Cheap, clonable handle to an object's identity and persisted state.
#[derive(Clone)]
pub struct ObjectRef {
    inner: Arc<RwLock<ObjectState>>,
}

impl ObjectRef {
    /// Handle for an object with no persisted state (a new object).
    pub fn new(identity: RowIdentity) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ObjectState {
                identity,
                persisted: None,
            })),
        }
    }

    /// Handle for an object loaded from the database.
    pub fn persisted<C, V>(identity: RowIdentity, snapshot: impl IntoIterator<Item = (C, V)>) -> Self
    where
        C: Into<String>,
        V: Into<Value>,
    {
        let object = Self::new(identity);
        object.set_persisted_snapshot(
            snapshot
                .into_iter()
                .map(|(c, v)| (c.into(), v.into()))
                .collect(),
        );
        object
    }

    /// The object's current identity.
    pub fn identity(&self) -> RowIdentity {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .identity
            .clone()
    }

    /// Replace the object's identity, returning the previous one.
    pub fn replace_identity(&self, identity: RowIdentity) -> RowIdentity {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut state.identity, identity)
    }

    /// Value of one column in the last persisted snapshot.
    pub fn persisted_value(&self, column: &str) -> Option<Value> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .persisted
            .as_ref()
            .and_then(|snapshot| snapshot.get(column).cloned())
    }

    pub fn has_persisted_snapshot(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .persisted
            .is_some()
    }

    /// Record the object's persisted column values.
    pub fn set_persisted_snapshot(&self, snapshot: BTreeMap<String, Value>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .persisted = Some(snapshot);
    }

    /// Merge written columns into the persisted snapshot (after a successful
    /// insert or update).
    pub fn absorb_written(&self, written: &BTreeMap<String, Value>) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let snapshot = state.persisted.get_or_insert_with(BTreeMap::new);
        for (column, value) in written {
            snapshot.insert(column.clone(), value.clone());
        }
    }

    /// Do both handles point at the same object?
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}
