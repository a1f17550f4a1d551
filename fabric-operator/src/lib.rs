//! Fabric operator
//!
//! Control plane for permissioned blockchain networks. Organizations form
//! federations, federations host networks (one orderer each), networks carry
//! channels, and channels run chaincodes. Every change that affects more
//! than one organization goes through a proposal and per-organization votes.
//!
//! ## Layout
//!
//! - [`store`]: object store seam and the in-memory implementation
//! - [`sdk`]: blockchain SDK seam, connection profiles and the mock SDK
//! - [`controller`]: reconcile shell, update masks, work queues, manager
//! - [`reconcilers`]: one reconciler per kind
//! - [`governance`]: voters, tallying and proposal effects
//! - [`chaincode`]: package builder and the lifecycle state machine
//! - [`rbac`]: per-organization cluster-role rule sync
//! - [`admission`]: defaulting and validating webhooks

pub mod admission;
pub mod chaincode;
pub mod config;
pub mod controller;
pub mod error;
pub mod governance;
pub mod logging;
pub mod rbac;
pub mod reconcilers;
pub mod sdk;
pub mod store;

#[cfg(test)]
mod fixtures;

pub use config::{Args, OperatorConfig};
pub use controller::{Context, Manager};
pub use error::{OperatorError, Result, SdkError, StoreError};
