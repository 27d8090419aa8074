//! Commit-flush ordering engine.
//!
//! `rowflush` is the **write-ordering layer** between an object-graph diff and
//! a relational store. It takes one pending row operation per changed row and
//! produces a merged, dependency-ordered, batched sequence of INSERT / UPDATE /
//! DELETE operations.
//!
//! # Role In The Architecture
//!
//! - **Merge**: operations that target the same logical row collapse into one.
//! - **Sort**: parents are inserted before children and deleted after them,
//!   purely from relationship metadata and runtime key values.
//! - **Batch**: consecutive operations with the same statement shape share one
//!   batched statement.
//! - **Execute**: batches run in order against a [`StatementSink`]; generated
//!   keys flow back into the objects and into later batches.
//!
//! # Design Philosophy
//!
//! - **Metadata driven**: ordering comes from [`EntityResolver`], never from
//!   entity names or registration order.
//! - **Stable**: with no constraint between two operations, they keep the
//!   order they were collected in.
//! - **Cancel-correct**: execution uses `Cx` + `Outcome` from asupersync.
//!
//! # Example
//!
//! ```ignore
//! let resolver = Arc::new(
//!     EntityResolver::builder()
//!         .entity(EntityInfo::new("artist").column(ColumnInfo::generated_key("id")))
//!         .entity(
//!             EntityInfo::new("painting")
//!                 .column(ColumnInfo::generated_key("id"))
//!                 .column(ColumnInfo::new("artist_id")),
//!         )
//!         .relationship(RelationshipInfo::to_one("artist", "painting", "artist").join("artist_id", "id"))
//!         .build()?,
//! );
//! let action = FlushAction::new(resolver, FlushConfig::default())?;
//!
//! let mut uow = UnitOfWork::new();
//! let artist = uow.new_object("artist");
//! uow.track_insert(InsertOp::new(artist_entity, artist.clone()).value("name", "Ada"))?;
//!
//! let result = uow.flush(&cx, &action, &sink).await;
//! ```

pub mod batch;
pub mod config;
pub mod flush;
pub mod merge;
pub mod object;
pub mod operation;
pub mod qualifier;
pub mod sort;
pub mod unit_of_work;
pub mod values;

pub use batch::{Batch, group_batches, is_same_batch};
pub use config::FlushConfig;
pub use flush::{
    BatchOutcome, FlushAction, FlushPlan, FlushResult, StatementSink, into_result,
};
pub use merge::{OperationIndex, merge};
pub use object::ObjectRef;
pub use operation::{DeleteOp, InsertOp, OperationKind, RowOperation, UpdateOp};
pub use qualifier::Qualifier;
pub use sort::{GraphSorter, SnapshotSource};
pub use unit_of_work::{PendingCounts, UnitOfWork};
pub use values::{ColumnValue, Values};

pub use rowflush_core::{
    ColumnInfo, Cx, EntityInfo, EntityResolver, Error, Outcome, RelationshipInfo,
    RelationshipKind, Result, RowIdentity, Value,
};
