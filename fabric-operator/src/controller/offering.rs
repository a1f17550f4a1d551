//! Status behaviour the reconciler shell needs from each kind.

use chrono::{DateTime, Utc};
use fabric_api::proposal::ProposalConditionType;
use fabric_api::status::{ConditionStatus, CrStatus, StatusEnvelope, StatusType};
use fabric_api::{
    Chaincode, ChaincodeBuild, Channel, ErrorCode, Federation, HasSpec, HasStatus, Network,
    Organization, Proposal, Resource, Vote,
};
use serde_json::{json, Value};

use crate::error::OperatorError;

/// Reason written with the error status of a failed pass.
pub const ERROR_REASON: &str = "errorOccurredDuringReconcile";

pub trait Offering: Resource + HasSpec + HasStatus {
    /// Whether a previous pass has written a status.
    fn is_initialized(&self) -> bool;

    /// Record a failed pass in the status.
    fn record_error(&mut self, err: &OperatorError);

    /// Whether the status differs from `before` in anything but heartbeats.
    fn status_changed(&self, before: Option<&Self::Status>) -> bool {
        self.status() != before
    }

    /// Refresh the heartbeat before a status write.
    fn touch(&mut self, _now: DateTime<Utc>) {}

    /// Status merge patch that only refreshes the heartbeat.
    fn heartbeat(&self, _now: DateTime<Utc>) -> Option<Value> {
        None
    }
}

/// Replace the envelope with a settled state, keeping the heartbeat.
pub fn settle(cr: &mut CrStatus, status_type: StatusType, reason: &str, message: impl Into<String>) {
    let heartbeat = cr.last_heartbeat_time;
    let version = cr.version.take();
    *cr = CrStatus::new(status_type, reason, message);
    cr.last_heartbeat_time = heartbeat;
    cr.version = version;
}

fn without_heartbeat<S: StatusEnvelope + Clone>(status: Option<&S>) -> Option<S> {
    status.cloned().map(|mut s| {
        s.envelope_mut().last_heartbeat_time = None;
        s
    })
}

macro_rules! envelope_offering {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Offering for $ty {
                fn is_initialized(&self) -> bool {
                    self.status
                        .as_ref()
                        .and_then(|s| s.envelope().status_type)
                        .is_some()
                }

                fn record_error(&mut self, err: &OperatorError) {
                    let cr = self.status_or_default().envelope_mut();
                    cr.status_type = Some(StatusType::Error);
                    cr.status = ConditionStatus::True;
                    cr.reason = ERROR_REASON.to_string();
                    cr.message = err.to_string();
                    cr.error_code = err.code().map(ErrorCode::code);
                    cr.last_heartbeat_time = Some(Utc::now());
                }

                fn status_changed(&self, before: Option<&Self::Status>) -> bool {
                    without_heartbeat(self.status.as_ref()) != without_heartbeat(before)
                }

                fn touch(&mut self, now: DateTime<Utc>) {
                    if let Some(status) = self.status.as_mut() {
                        status.envelope_mut().last_heartbeat_time = Some(now);
                    }
                }

                fn heartbeat(&self, now: DateTime<Utc>) -> Option<Value> {
                    self.status
                        .as_ref()
                        .map(|_| json!({"status": {"lastHeartbeatTime": now}}))
                }
            }
        )*
    };
}

envelope_offering!(Organization, Federation, Network, Channel, Chaincode, ChaincodeBuild);

impl Offering for Proposal {
    fn is_initialized(&self) -> bool {
        self.status.is_some()
    }

    fn record_error(&mut self, err: &OperatorError) {
        self.status_or_default().set_condition(
            ProposalConditionType::Error,
            ConditionStatus::True,
            ERROR_REASON,
            err.to_string(),
        );
    }
}

impl Offering for Vote {
    fn is_initialized(&self) -> bool {
        self.status.is_some()
    }

    /// Votes carry no error state; failures are only logged.
    fn record_error(&mut self, _err: &OperatorError) {}
}
