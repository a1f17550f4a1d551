//! Admission webhooks.
//!
//! - [`review`]: the AdmissionReview envelope and JSON patches
//! - [`user`]: requesting principal and super-user check
//! - [`webhook`]: the per-kind [`Webhook`] trait and its untyped adapter
//! - [`router`]: path dispatch
//! - [`server`]: the HTTP listener
//!
//! Reconcilers assume admitted objects are valid; the rules live only here.

pub mod chaincode;
pub mod channel;
pub mod errors;
pub mod federation;
pub mod network;
pub mod organization;
pub mod proposal;
pub mod review;
pub mod router;
pub mod server;
pub mod user;
pub mod webhook;

pub use errors::{AdmissionError, AdmissionResult};
pub use review::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
pub use router::{webhook_path, webhooks, Mode, Router};
pub use server::WebhookState;
pub use user::{is_super_user, UserInfo};
pub use webhook::{Caller, Handler, Typed, Webhook};
