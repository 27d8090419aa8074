//! Core types for the rowflush commit engine.
//!
//! This crate holds the vocabulary shared by everything that produces or
//! consumes row operations:
//!
//! - [`Value`] for dynamically-typed column values
//! - [`RowIdentity`] for naming rows, permanent or temporary
//! - [`EntityInfo`] / [`RelationshipInfo`] for catalog metadata
//! - [`EntityResolver`] for catalog lookups
//! - [`Error`] for everything that can go wrong during a flush
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct execution

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod entity;
pub mod error;
pub mod identity;
pub mod relationship;
pub mod resolver;
pub mod value;

pub use entity::{ColumnInfo, EntityInfo};
pub use error::{
    ConfigError, Error, ExecutionError, MergeError, MergeErrorKind, MetadataError,
    MetadataErrorKind, OrderingError, OrderingErrorKind, Result,
};
pub use identity::{IdentityKey, RowIdentity, TemporaryKeys};
pub use relationship::{JoinColumn, RelationshipInfo, RelationshipKind};
pub use resolver::{EntityResolver, EntityResolverBuilder};
pub use value::Value;
