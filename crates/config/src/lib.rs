pub mod types;

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

pub use types::{
    BasicAuth, BrokerAuthConfig, ControllerConfig, DockerConfig, HardwareConfig, MongoConfig,
    NodeConfig, NotificationHook, TlsConfig, TrusteeConfig,
};

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSection {
    #[serde(default)]
    pub auth: BrokerAuthConfig,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self { auth: BrokerAuthConfig::default() }
    }
}

/// The full on-disk configuration, mirroring spec.md §6's enumerated surface.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerSection,
    pub controller: ControllerConfig,
    pub trustee: TrusteeConfig,
    #[serde(default)]
    pub mongo: MongoConfig,
}

impl Config {
    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(raw).context("failed to parse configuration")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file at {}", path.display()))?;
        Self::from_yaml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let raw = r#"
controller:
  bind_socket_path: /run/cc-agency.sock
  docker:
    nodes:
      node1:
        base_url: "http://node1:2375"
trustee:
  internal_url: "http://broker:8080"
  username: admin
  password: secret
"#;
        let config = Config::from_yaml_str(raw).unwrap();
        assert_eq!(config.controller.docker.nodes.len(), 1);
        assert!(!config.controller.docker.allow_insecure_capabilities);
        assert_eq!(config.broker.auth.num_login_attempts, 5);
    }

    #[test]
    fn rejects_missing_required_fields() {
        let raw = "controller:\n  bind_socket_path: /x\n";
        assert!(Config::from_yaml_str(raw).is_err());
    }
}
