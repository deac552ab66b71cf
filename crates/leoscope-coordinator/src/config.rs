//! Configuration types for the coordinator.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use leoscope_store::StorageConfig;

/// Coordinator configuration, loaded from `coordinator.toml` merged with
/// `LEOSCOPE_COORDINATOR_*` environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// HTTP API configuration.
    pub api: ApiConfig,
    /// Authentication configuration.
    pub auth: AuthConfig,
    /// Artifact storage configuration.
    pub artifacts: StorageConfig,
    /// Bootstrap configuration.
    pub bootstrap: BootstrapConfig,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Concurrent in-flight request ceiling.
    pub max_concurrency: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8070),
            max_concurrency: 10,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret for the signed-token path; unset disables it.
    pub jwt_secret: Option<String>,
}

/// First-boot bootstrap configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Id of the bootstrap admin user.
    pub admin_id: String,
    /// Static token for the bootstrap admin. A fresh token is generated
    /// and logged once when unset.
    pub admin_token: Option<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            admin_id: "admin".to_owned(),
            admin_token: None,
        }
    }
}
