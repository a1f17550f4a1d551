//! Vote: one organization's position on one proposal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::custom_resource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSpec {
    pub proposal_name: String,
    pub organization_name: String,
    /// Unset until the organization decides; immutable afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VotePhase {
    #[default]
    Created,
    Voted,
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStatus {
    #[serde(default)]
    pub phase: VotePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_time: Option<DateTime<Utc>>,
}

custom_resource! {
    /// Lives in the voting organization's namespace.
    Vote { spec: VoteSpec, status: VoteStatus, kind: "Vote", plural: "votes", namespaced: true }
}

impl Vote {
    pub fn phase(&self) -> VotePhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    pub fn vote_time(&self) -> Option<DateTime<Utc>> {
        self.status.as_ref().and_then(|s| s.vote_time)
    }
}

/// Name of the vote `org` casts on `proposal`.
pub fn vote_name(org: &str, proposal: &str) -> String {
    format!("vote-{}-{}", org, proposal)
}
