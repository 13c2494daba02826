//! # Listsync Engine
//!
//! The local-first data layer for a multi-device list application.
//!
//! This crate holds a full reactive copy of a replica's data: tables of rows
//! of scalar cells, secondary indexes derived from them, listeners fired on
//! every commit, and the per-cell logical timestamps that let two replicas
//! merge deterministically after editing independently.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing about sockets, files or timers
//! - **Synchronous commits**: mutation, index maintenance and listener
//!   dispatch run to completion as one unit per call
//! - **Deterministic merges**: merging depends only on stamped logical time,
//!   never on wall-clock or arrival order
//!
//! ## Core Concepts
//!
//! ### Store
//!
//! [`Store`] is the ground truth of one replica: tables keyed by row id, rows
//! mapping cell ids to [`CellValue`]s. Writes go through [`Transaction`]s so
//! observers never see a partially applied patch.
//!
//! ### Indexes
//!
//! [`Indexes`] map a foreign-key cell value (e.g. a list id) to the ordered
//! row ids carrying it. They are derived state and updated inside the same
//! commit as the rows they follow.
//!
//! ### Listeners
//!
//! [`Pattern`]s select what a listener observes. Structural patterns
//! ([`Pattern::RowIds`], [`Pattern::SliceRowIds`]) fire on membership changes
//! only; value patterns ([`Pattern::Row`], [`Pattern::Cell`]) fire on any value
//! change, including creation and deletion.
//!
//! ### Mergeable replica
//!
//! [`MergeableStore`] wraps a [`Store`] and stamps every local write with a
//! [`LogicalTime`]. Merging two [`MergeableContent`]s keeps, per cell, the
//! value with the higher time; row tombstones hide every older cell.
//!
//! ## Quick Start
//!
//! ```rust
//! use listsync_engine::{row, schema, MergeableStore, Schema};
//!
//! let mut replica = MergeableStore::new("device-1", Schema::todo_app());
//! replica
//!     .set_index_definition(schema::TODOS_BY_LIST, schema::TODOS, schema::LIST_CELL)
//!     .unwrap();
//!
//! replica.set_row("lists", "L1", row([("title", "Groceries".into())])).unwrap();
//! let todo = replica
//!     .add_row(
//!         "todos",
//!         row([("text", "buy milk".into()), ("list", "L1".into()), ("done", false.into())]),
//!     )
//!     .unwrap();
//!
//! let bucket = replica.store().get_slice_row_ids(schema::TODOS_BY_LIST, "L1");
//! assert_eq!(bucket, [todo]);
//! ```
//!
//! ## Persistence
//!
//! Use [`MergeableStore::export_state`] and [`MergeableStore::import_state`]
//! with [`ReplicaSnapshot`]. Snapshots serialize to JSON with deterministic
//! ordering.

pub mod clock;
pub mod content;
pub mod error;
pub mod index;
pub mod protocol;
pub mod replica;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod subscription;
pub mod value;

// Re-export main types at crate root
pub use clock::{Clock, LogicalTime};
pub use content::{merge, MergeableContent, RowContent, StampedCell};
pub use error::Error;
pub use index::{IndexDefinition, Indexes};
pub use protocol::{ClientMessage, ServerMessage};
pub use replica::{MergeReport, MergeableStore};
pub use schema::{CellDef, CellType, Schema, TableSchema};
pub use snapshot::{ReplicaSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{Store, Table, Transaction};
pub use subscription::{Change, ListenerContext, Pattern, SubscriptionId};
pub use value::{row, CellValue, Row};

/// Type aliases for clarity
pub type TableId = String;
pub type RowId = String;
pub type CellId = String;
pub type ReplicaId = String;
pub type IndexId = String;
pub type SliceId = String;
