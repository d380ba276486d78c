//! Ready-made change consumers for ebb.
//!
//! - [`ChangeLogger`]: a subscriber that mirrors every decoded event into
//!   structured log records
//! - [`Notifier`]: per-object listener registry with fault isolation; one
//!   panicking listener never starves the rest
//! - [`Latch`]: a one-shot gate for waiting on observer close completion

pub mod latch;
pub mod logger;
pub mod notifier;

pub use latch::Latch;
pub use logger::ChangeLogger;
pub use notifier::{ChangeEvent, ChangeKind, Notifier};
