//! Process-wide SDK configuration.

use std::path::PathBuf;

/// TLS policy applied to every HTTPS and WebSocket connection.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// When false, any server certificate is accepted. Only sane against
    /// trust-anchored deployments.
    pub verify: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self { verify: false }
    }
}

/// Optional outbound proxy.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub url: String,
}

/// Configuration shared by all agents of an [`crate::AgentCp`] instance.
///
/// `ca_base` and `ap_base` must be set before `create_aid` / `online`.
#[derive(Debug, Clone)]
pub struct AcpConfig {
    pub ca_base: String,
    pub ap_base: String,
    pub storage_path: PathBuf,
    pub tls: TlsConfig,
    pub proxy: Option<ProxyConfig>,
}

impl Default for AcpConfig {
    fn default() -> Self {
        Self {
            ca_base: String::new(),
            ap_base: String::new(),
            storage_path: PathBuf::from("."),
            tls: TlsConfig::default(),
            proxy: None,
        }
    }
}

/// Message client tunables.
#[derive(Debug, Clone)]
pub struct MessageClientConfig {
    pub ping_interval: std::time::Duration,
    pub max_queue_size: usize,
    pub reconnect_base_interval: std::time::Duration,
    pub reconnect_max_interval: std::time::Duration,
    pub reconnect_backoff_factor: f64,
    pub max_message_size: usize,
    pub auto_reconnect: bool,
    pub verify_tls: bool,
}

impl Default for MessageClientConfig {
    fn default() -> Self {
        Self {
            ping_interval: std::time::Duration::from_secs(30),
            max_queue_size: 1024,
            reconnect_base_interval: std::time::Duration::from_millis(500),
            reconnect_max_interval: std::time::Duration::from_secs(10),
            reconnect_backoff_factor: 1.5,
            max_message_size: 16 * 1024 * 1024,
            auto_reconnect: true,
            verify_tls: false,
        }
    }
}
