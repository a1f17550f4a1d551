//! Object store access: the [`ObjectStore`] seam, the typed [`Api`] wrapper
//! and the in-memory implementation used by tests and local runs.

mod api;
mod memory;
mod traits;

pub use api::Api;
pub use memory::{merge_patch, MemoryStore};
pub use traits::{object_key, ObjectStore, Subresource, WatchEvent, WatchEventType};
