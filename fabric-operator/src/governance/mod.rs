//! Governance: voter sets, tallying and proposal effects.
//!
//! The tally in [`policy`] is pure; [`voters`] and [`effects`] read and write
//! the object store on behalf of the proposal reconciler.

pub mod effects;
pub mod policy;
pub mod voters;

pub use effects::apply;
pub use policy::{evaluate, majority_of, Verdict};
pub use voters::{candidates, voters};
