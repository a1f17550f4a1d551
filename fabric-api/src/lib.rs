//! Fabric API - custom resource schema for the blockchain control plane
//!
//! Typed definitions for every kind the operator reconciles, the status
//! vocabulary they share, the canonical label keys, and the endorsement
//! policy DSL.
//!
//! ## Kinds
//!
//! - **Organization**: administrative tenant owning a namespace
//! - **Federation**: agreement between organizations, governed by proposals
//! - **Network**: ordering service formed by a federation
//! - **Channel**: sub-ledger of a network with per-peer join state
//! - **EndorsePolicy**: named signature policy bound to a channel
//! - **Chaincode** / **ChaincodeBuild**: smart contracts and their images
//! - **Proposal** / **Vote**: governance requests and per-organization votes

pub mod meta;
pub mod status;
pub mod errors;
pub mod labels;
pub mod platform;
pub mod policy_dsl;

pub mod organization;
pub mod federation;
pub mod network;
pub mod channel;
pub mod endorse_policy;
pub mod chaincode;
pub mod chaincode_build;
pub mod proposal;
pub mod vote;

pub use chaincode::{Chaincode, ChaincodePhase, ChaincodeStage, ChaincodeStatus};
pub use chaincode_build::ChaincodeBuild;
pub use channel::Channel;
pub use endorse_policy::EndorsePolicy;
pub use errors::{ApiError, ErrorCode};
pub use federation::{Federation, Member, Policy};
pub use meta::{HasSpec, HasStatus, NamespacedName, ObjectKey, ObjectMeta, Resource};
pub use network::Network;
pub use organization::Organization;
pub use proposal::{Proposal, ProposalPhase, Purpose};
pub use status::{ConditionStatus, CrStatus, StatusEnvelope, StatusType};
pub use vote::Vote;
