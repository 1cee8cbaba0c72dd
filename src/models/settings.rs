// Settings Model
// Application-wide configuration

use serde::{Deserialize, Serialize};

fn default_log_retention_days() -> u32 {
    30
}

fn default_live_api_url() -> String {
    "http://127.0.0.1:8089".to_string()
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backend_port() -> u16 {
    8008
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Base URL of the live-production backend API
    #[serde(default = "default_live_api_url")]
    pub live_api_url: String,

    /// Bearer token for the live-production backend (encrypted at rest)
    #[serde(default)]
    pub live_api_token: String,

    /// Whether this server accepts connections from other hosts
    #[serde(default)]
    pub backend_remote_enabled: bool,

    /// Interface to bind the server to
    #[serde(default = "default_backend_host")]
    pub backend_host: String,

    /// Port to bind the server to
    #[serde(default = "default_backend_port")]
    pub backend_port: u16,

    /// Token clients must present to this server (empty = open access)
    #[serde(default)]
    pub backend_token: String,

    /// Days to keep server log files before pruning
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            live_api_url: default_live_api_url(),
            live_api_token: String::new(),
            backend_remote_enabled: false,
            backend_host: default_backend_host(),
            backend_port: default_backend_port(),
            backend_token: String::new(),
            log_retention_days: default_log_retention_days(),
        }
    }
}
