//! Chaincode packaging and the lifecycle engine.

pub mod lifecycle;
pub mod package;

pub use lifecycle::{advance, majority};
