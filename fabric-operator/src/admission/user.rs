//! Requesting principal and super-user classification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::OperatorConfig;

pub const SYSTEM_MASTERS: &str = "system:masters";
pub const PRIVILEGED_SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:kube-system:";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Vec<String>>,
}

impl UserInfo {
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }
}

pub fn is_super_user(user: &UserInfo, config: &OperatorConfig) -> bool {
    user.username == config.service_account()
        || user.groups.iter().any(|g| g == SYSTEM_MASTERS)
        || user.username.starts_with(PRIVILEGED_SERVICE_ACCOUNT_PREFIX)
}
