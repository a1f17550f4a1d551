//! Cross-kind triggers: events on one kind that request reconciles of
//! related objects of another kind.

use fabric_api::labels::VOTE_PROPOSAL;
use fabric_api::{ChaincodeBuild, Federation, ObjectKey, Organization, Proposal, Resource};
use serde_json::Value;

use crate::store::WatchEvent;

/// `(source kind, projection)` feeding the target kind's queue.
#[derive(Clone, Copy)]
pub struct Trigger {
    pub source: &'static str,
    pub target: &'static str,
    pub project: fn(&WatchEvent) -> Vec<ObjectKey>,
}

fn field_key(object: &Value, pointer: &str, kind: &str) -> Vec<ObjectKey> {
    object
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|name| vec![ObjectKey::new(kind, None, name)])
        .unwrap_or_default()
}

fn federation_of(event: &WatchEvent) -> Vec<ObjectKey> {
    field_key(&event.object, "/spec/federation", Federation::KIND)
}

fn network_of(event: &WatchEvent) -> Vec<ObjectKey> {
    field_key(&event.object, "/spec/network", fabric_api::Network::KIND)
}

fn member_organizations(event: &WatchEvent) -> Vec<ObjectKey> {
    let mut names: Vec<&str> = event.object["spec"]["members"]
        .as_array()
        .map(|ms| ms.iter().filter_map(|m| m["name"].as_str()).collect())
        .unwrap_or_default();
    // Removed members need their federation list refreshed too.
    if let Some(old) = &event.old {
        if let Some(ms) = old["spec"]["members"].as_array() {
            names.extend(ms.iter().filter_map(|m| m["name"].as_str()));
        }
    }
    names.sort_unstable();
    names.dedup();
    names
        .into_iter()
        .map(|n| ObjectKey::new(Organization::KIND, None, n))
        .collect()
}

fn owning_build(event: &WatchEvent) -> Vec<ObjectKey> {
    event.object["metadata"]["ownerReferences"]
        .as_array()
        .map(|refs| {
            refs.iter()
                .filter(|r| r["kind"].as_str() == Some(ChaincodeBuild::KIND))
                .filter_map(|r| r["name"].as_str())
                .map(|n| ObjectKey::new(ChaincodeBuild::KIND, None, n))
                .collect()
        })
        .unwrap_or_default()
}

fn voted_proposal(event: &WatchEvent) -> Vec<ObjectKey> {
    let by_label = event.object["metadata"]["labels"][VOTE_PROPOSAL].as_str();
    let by_spec = event.object["spec"]["proposalName"].as_str();
    by_label
        .or(by_spec)
        .map(|n| vec![ObjectKey::new(Proposal::KIND, None, n)])
        .unwrap_or_default()
}

/// Every trigger the operator registers.
pub fn registry() -> Vec<Trigger> {
    vec![
        Trigger {
            source: fabric_api::Network::KIND,
            target: Federation::KIND,
            project: federation_of,
        },
        Trigger {
            source: Proposal::KIND,
            target: Federation::KIND,
            project: federation_of,
        },
        Trigger {
            source: Federation::KIND,
            target: Organization::KIND,
            project: member_organizations,
        },
        Trigger {
            source: fabric_api::Channel::KIND,
            target: fabric_api::Network::KIND,
            project: network_of,
        },
        Trigger {
            source: fabric_api::platform::PipelineRun::KIND,
            target: ChaincodeBuild::KIND,
            project: owning_build,
        },
        Trigger {
            source: fabric_api::Vote::KIND,
            target: Proposal::KIND,
            project: voted_proposal,
        },
    ]
}
