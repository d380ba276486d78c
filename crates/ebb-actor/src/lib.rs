//! Single-logical-thread task actors for ebb.
//!
//! This crate provides:
//! - The `Executor` trait boundary and two implementations
//!   (`ThreadPoolExecutor`, `InlineExecutor`)
//! - `Actor`: an atomic state machine plus two lock-free queues that
//!   guarantees at most one concurrent execution of its run loop,
//!   regardless of which pool thread invokes it
//! - `ActorHandler`: the seam through which an owner attaches per-run
//!   processing and close teardown

pub mod actor;
pub mod error;
pub mod executor;

pub use actor::{Actor, ActorHandler, ActorState};
pub use error::ActorError;
pub use executor::{Executor, InlineExecutor, Task, ThreadPoolConfig, ThreadPoolExecutor};
