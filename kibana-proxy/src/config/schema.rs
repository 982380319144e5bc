//! Configuration schema types

use indexmap::IndexMap;
use kibana_tenancy::{Authorizer, IndexName, Principal, StaticMembership};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete proxy configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub tenancy: TenancyConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Static project membership: principal -> indices
    #[serde(default)]
    pub membership: IndexMap<String, Vec<String>>,
}

impl Config {
    /// Build the authorizer described by the tenancy section
    pub fn authorizer(&self) -> Authorizer {
        Authorizer::new(
            IndexName::new(self.tenancy.default_index.clone()),
            Principal::new(self.tenancy.bypass_principal.clone()),
        )
    }

    /// Build the in-memory membership table
    pub fn static_membership(&self) -> StaticMembership {
        self.membership
            .iter()
            .map(|(principal, indices)| {
                (
                    Principal::new(principal.clone()),
                    indices.iter().map(|i| IndexName::new(i.clone())).collect(),
                )
            })
            .collect()
    }
}

/// Listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Path prefix the proxy is mounted under; stripped before forwarding
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    /// Upper bound for request bodies buffered for inspection
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_listen() -> String {
    "127.0.0.1:5602".to_string()
}

fn default_mount_path() -> String {
    "/hopsworks-api/kibana".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            mount_path: default_mount_path(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Backend connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound for a response body that is buffered and filtered, both
    /// as received and after decompression
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:5601".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_response_bytes() -> usize {
    64 * 1024 * 1024
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout_secs: default_timeout_secs(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

/// Shared index and administrative identity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TenancyConfig {
    /// Index every principal may read
    #[serde(default = "default_index")]
    pub default_index: String,
    /// Principal exempt from all filtering
    #[serde(default = "default_bypass_principal")]
    pub bypass_principal: String,
}

fn default_index() -> String {
    "hopsworks".to_string()
}

fn default_bypass_principal() -> String {
    "agent@hops.io".to_string()
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            default_index: default_index(),
            bypass_principal: default_bypass_principal(),
        }
    }
}

/// Where the authenticated principal comes from
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    /// Header set by the authenticating front end
    #[serde(default = "default_identity_header")]
    pub header: String,
    /// Peers allowed to set the identity header (CIDR notation)
    #[serde(default = "default_trusted_proxies")]
    pub trusted_proxies: Vec<String>,
}

fn default_identity_header() -> String {
    "x-remote-user".to_string()
}

fn default_trusted_proxies() -> Vec<String> {
    vec!["127.0.0.0/8".to_string(), "::1/128".to_string()]
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            header: default_identity_header(),
            trusted_proxies: default_trusted_proxies(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log every forwarded request at info level
    #[serde(default)]
    pub log_requests: bool,
}
