//! # keel-store
//!
//! The storage collaborator the governance core is written against: a generic
//! keyed store with conditional writes, partial updates, prefix range queries,
//! and all-or-nothing transactional writes.
//!
//! - **`MemoryRepository`**: in-process map, used by tests and the `memory` backend.
//! - **`SqliteRepository`**: single-table SQLite store (WAL mode), persistent.
//!
//! Every persisted entity lives under a partition key (a project, or the agent-wide
//! partition) and a typed, prefixed, sortable sort key built by [`keys`].

pub mod codec;
pub mod item;
pub mod keys;
pub mod memory;
pub mod repository;
pub mod sqlite;

pub use codec::{decode, encode};
pub use item::{Condition, Item, ItemKey, Order, Query, UpdateExpr, UpdateOp, WriteOp};
pub use memory::MemoryRepository;
pub use repository::Repository;
pub use sqlite::SqliteRepository;
