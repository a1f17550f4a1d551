//! Configuration for the operator
//!
//! CLI arguments and environment variable handling using clap. [`Args`] is
//! parsed once at startup and turned into an [`OperatorConfig`], which is what
//! the controllers and webhooks hold.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Namespace file mounted into every pod by the platform.
pub const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Fabric operator
#[derive(Parser, Debug, Clone)]
#[command(name = "fabric-operator")]
#[command(about = "Control plane for permissioned blockchain networks")]
pub struct Args {
    /// Pod name; the operator's own service-account principal derives from it
    #[arg(long, env = "OPERATOR_NAME")]
    pub operator_name: String,

    /// Prefix applied to canonical labels
    #[arg(long, env = "OPERATOR_LABEL_PREFIX", default_value = "fabric")]
    pub label_prefix: String,

    /// Chaincode package directory
    #[arg(long, env = "STORE", default_value = "/bestchains/chaincodes")]
    pub store: PathBuf,

    /// Operator namespace (read from the namespace file when unset)
    #[arg(long, env = "OPERATOR_NAMESPACE")]
    pub operator_namespace: Option<String>,

    /// Admission webhook listen address
    #[arg(long, env = "WEBHOOK_LISTEN", default_value = "0.0.0.0:9443")]
    pub webhook_listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Interval between peer readiness polls
    #[arg(long, env = "PEER_POLL_INTERVAL_SECS", default_value = "5")]
    pub peer_poll_interval_secs: u64,

    /// Ceiling on peer readiness polling
    #[arg(long, env = "PEER_POLL_TIMEOUT_SECS", default_value = "50")]
    pub peer_poll_timeout_secs: u64,

    /// Attempts when writing a status
    #[arg(long, env = "STATUS_PATCH_RETRIES", default_value = "3")]
    pub status_patch_retries: u32,

    /// Concurrent reconcile workers per kind
    #[arg(long, env = "WORKERS_PER_KIND", default_value = "2")]
    pub workers_per_kind: usize,

    /// Enable development mode (in-memory object store and mock blockchain SDK)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.operator_name.trim().is_empty() {
            return Err("OPERATOR_NAME is required".to_string());
        }
        if self.label_prefix.is_empty() {
            return Err("OPERATOR_LABEL_PREFIX must not be empty".to_string());
        }
        if self.peer_poll_interval_secs == 0 || self.peer_poll_timeout_secs < self.peer_poll_interval_secs {
            return Err("peer poll timeout must be at least one poll interval".to_string());
        }
        if self.workers_per_kind == 0 {
            return Err("WORKERS_PER_KIND must be at least 1".to_string());
        }
        if !self.dev_mode {
            return Err("no cluster backend is available; DEV_MODE=true runs against the in-memory store".to_string());
        }
        Ok(())
    }

    /// Resolve the operator namespace: explicit setting first, then the
    /// platform namespace file.
    pub fn resolve_namespace(&self) -> anyhow::Result<String> {
        if let Some(ns) = &self.operator_namespace {
            return Ok(ns.clone());
        }
        let ns = std::fs::read_to_string(NAMESPACE_FILE)
            .map_err(|e| anyhow::anyhow!("reading {}: {}", NAMESPACE_FILE, e))?;
        Ok(ns.trim().to_string())
    }

    pub fn into_config(self) -> anyhow::Result<OperatorConfig> {
        self.validate().map_err(anyhow::Error::msg)?;
        let namespace = self.resolve_namespace()?;
        Ok(OperatorConfig {
            operator_name: self.operator_name,
            operator_namespace: namespace,
            label_prefix: self.label_prefix,
            store: self.store,
            webhook_listen: self.webhook_listen,
            peer_poll_interval: Duration::from_secs(self.peer_poll_interval_secs),
            peer_poll_timeout: Duration::from_secs(self.peer_poll_timeout_secs),
            status_patch_retries: self.status_patch_retries.max(1),
            workers_per_kind: self.workers_per_kind,
            lifecycle_retry_interval: Duration::from_secs(10),
            install_retries: 3,
            dev_mode: self.dev_mode,
        })
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub operator_name: String,
    pub operator_namespace: String,
    pub label_prefix: String,
    /// Chaincode package directory
    pub store: PathBuf,
    pub webhook_listen: SocketAddr,
    pub peer_poll_interval: Duration,
    pub peer_poll_timeout: Duration,
    pub status_patch_retries: u32,
    pub workers_per_kind: usize,
    /// Delay before a failed lifecycle stage is retried
    pub lifecycle_retry_interval: Duration,
    pub install_retries: u32,
    /// Run against the in-memory store and the mock SDK
    pub dev_mode: bool,
}

impl OperatorConfig {
    /// Principal the platform assigns to the operator's service account.
    pub fn service_account(&self) -> String {
        format!(
            "system:serviceaccount:{}:{}",
            self.operator_namespace, self.operator_name
        )
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_name: "fabric-operator".to_string(),
            operator_namespace: "fabric-system".to_string(),
            label_prefix: "fabric".to_string(),
            store: PathBuf::from("/bestchains/chaincodes"),
            webhook_listen: SocketAddr::from(([0, 0, 0, 0], 9443)),
            peer_poll_interval: Duration::from_secs(5),
            peer_poll_timeout: Duration::from_secs(50),
            status_patch_retries: 3,
            workers_per_kind: 2,
            lifecycle_retry_interval: Duration::from_secs(10),
            install_retries: 3,
            dev_mode: true,
        }
    }
}
