//! Update masks and the per-name update stack.
//!
//! The predicate summarises each relevant event as an [`Update`]; the
//! reconciler drains them one pass at a time, oldest first.

use fabric_api::ObjectKey;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Which aspects of an object changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Update {
    pub spec_updated: bool,
    pub member_updated: bool,
    pub admin_or_ca_updated: bool,
    pub peers_updated: bool,
    pub orderer_create: bool,
    pub orderer_remove: bool,
    pub pipeline_spec_updated: bool,
    pub phase_updated: bool,
}

impl Update {
    /// Every aspect, used for fresh objects.
    pub fn full() -> Self {
        Self {
            spec_updated: true,
            member_updated: true,
            admin_or_ca_updated: true,
            peers_updated: true,
            orderer_create: true,
            orderer_remove: false,
            pipeline_spec_updated: true,
            phase_updated: true,
        }
    }

    pub fn spec() -> Self {
        Self {
            spec_updated: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn merge(self, other: Update) -> Self {
        Self {
            spec_updated: self.spec_updated || other.spec_updated,
            member_updated: self.member_updated || other.member_updated,
            admin_or_ca_updated: self.admin_or_ca_updated || other.admin_or_ca_updated,
            peers_updated: self.peers_updated || other.peers_updated,
            orderer_create: self.orderer_create || other.orderer_create,
            orderer_remove: self.orderer_remove || other.orderer_remove,
            pipeline_spec_updated: self.pipeline_spec_updated || other.pipeline_spec_updated,
            phase_updated: self.phase_updated || other.phase_updated,
        }
    }
}

/// Maximum masks kept per name; further masks fold into the newest.
pub const STACK_CAPACITY: usize = 8;

/// Per-name ordered masks, guarded by one lock per kind.
#[derive(Debug, Default)]
pub struct UpdateStack {
    stacks: Mutex<HashMap<ObjectKey, VecDeque<Update>>>,
}

impl UpdateStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `update` for `key`. Empty masks and duplicates of a queued
    /// mask are dropped.
    pub async fn push(&self, key: &ObjectKey, update: Update) {
        if update.is_empty() {
            return;
        }
        let mut stacks = self.stacks.lock().await;
        let stack = stacks.entry(key.clone()).or_default();
        if stack.contains(&update) {
            return;
        }
        if stack.len() >= STACK_CAPACITY {
            if let Some(newest) = stack.back_mut() {
                *newest = newest.merge(update);
            }
            return;
        }
        stack.push_back(update);
    }

    /// The oldest pending mask, or an empty one.
    pub async fn peek(&self, key: &ObjectKey) -> Update {
        self.stacks
            .lock()
            .await
            .get(key)
            .and_then(|s| s.front().copied())
            .unwrap_or_default()
    }

    /// Drop the oldest mask and return how many remain.
    pub async fn pop(&self, key: &ObjectKey) -> usize {
        let mut stacks = self.stacks.lock().await;
        let remaining = match stacks.get_mut(key) {
            Some(stack) => {
                stack.pop_front();
                stack.len()
            }
            None => 0,
        };
        if remaining == 0 {
            stacks.remove(key);
        }
        remaining
    }

    pub async fn clear(&self, key: &ObjectKey) {
        self.stacks.lock().await.remove(key);
    }

    pub async fn pending(&self, key: &ObjectKey) -> usize {
        self.stacks.lock().await.get(key).map(VecDeque::len).unwrap_or(0)
    }
}
