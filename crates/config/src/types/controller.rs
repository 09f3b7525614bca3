use std::collections::HashMap;

use serde::Deserialize;

use super::BasicAuth;

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub ca_cert: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HardwareConfig {
    #[serde(default)]
    pub gpu_blacklist: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub base_url: String,
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    pub network: Option<String>,
    #[serde(default)]
    pub hardware: HardwareConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationHook {
    pub url: String,
    pub auth: Option<BasicAuth>,
}

fn default_image_prune_duration() -> u64 {
    // 7 days, matching the reference implementation's default retention window.
    7 * 24 * 60 * 60
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfig {
    pub nodes: HashMap<String, NodeConfig>,
    #[serde(default)]
    pub allow_insecure_capabilities: bool,
    #[serde(default = "default_image_prune_duration")]
    pub image_prune_duration: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    pub bind_socket_path: String,
    pub docker: DockerConfig,
    #[serde(default)]
    pub notification_hooks: Vec<NotificationHook>,
}
