//! Reconciliation machinery shared by every kind.
//!
//! - [`update`]: update masks and the per-name update stack
//! - [`mirror`]: spec mirrors used to rebuild masks after a restart
//! - [`shell`]: the reconcile pass, predicate and status writes
//! - [`workqueue`]: per-name serialized, rate-limited queue
//! - [`trigger`]: cross-kind event projections
//! - [`manager`]: watch dispatch and worker tasks

pub mod context;
pub mod manager;
pub mod mirror;
pub mod offering;
pub mod shell;
pub mod trigger;
pub mod update;
pub mod workqueue;

pub use context::Context;
pub use manager::{Manager, ManagerHandle};
pub use mirror::SpecMirror;
pub use offering::{settle, Offering, ERROR_REASON};
pub use shell::{write_status, Action, Controller, Reconciler, Runnable};
pub use update::{Update, UpdateStack};
pub use workqueue::WorkQueue;
