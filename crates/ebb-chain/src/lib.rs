//! Commit-snapshot chain for ebb.
//!
//! A chain is an append-only sequence of version maps, each describing the
//! reads and writes of one committed transaction. Consumers never see the
//! chain move under them: they take an immutable [`Snapshot`] and walk a
//! half-open range of maps. Watcher refcounts on each map decide when its
//! payload may be rolled forward into its successor and the map retired.
//!
//! [`Chain`] is the host side: it appends maps, wakes registered observer
//! actors, and reclaims unwatched maps eagerly.

pub mod chain;
pub mod delta;
pub mod error;
pub mod map;
pub mod object;
pub mod snapshot;

pub use chain::{Chain, CommitSource, Granularity};
pub use delta::{CounterDelta, Delta, IndexedDelta, KeyedDelta, KeyedOp, PlainDelta, PlainOp, WideDelta};
pub use error::ChainError;
pub use map::{Origin, VersionMap, VersionMapBuilder};
pub use object::{ObjectId, ObjectRef, ResourceId};
pub use snapshot::Snapshot;
