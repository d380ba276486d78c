//! Resumable walker over an ebb snapshot chain.
//!
//! An [`Observer`] owns an actor, wakes when its chain publishes, and walks
//! the unobserved tail of maps, dispatching merged per-object change records
//! to a [`Visitor`]. Any visitor callback may suspend the walk; the saved
//! [`Continuation`] resumes it at the exact nested position on the next run.
//!
//! [`Dispatcher`] is the friendly face: it implements [`Visitor`] by
//! decoding change records into semantic callbacks on a [`Subscriber`].

pub mod continuation;
pub mod dispatcher;
pub mod observer;
pub mod touched;
pub mod visitor;

pub use continuation::{Continuation, MapStep, SegmentStep, WorkspaceStep};
pub use dispatcher::{Dispatcher, MapAction, Subscriber};
pub use observer::{Observer, ObserverConfig};
pub use touched::{AddOutcome, TouchedSet};
pub use visitor::{Flow, MapDirective, Pass, Visitor};
