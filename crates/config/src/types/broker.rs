use serde::Deserialize;

/// `broker.auth` from spec.md §6. Governs the submission-path login flow; the orchestrator core
/// only reads it through to forward it to the (out-of-scope) HTTP submission API.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerAuthConfig {
    pub num_login_attempts: u32,
    pub block_for_seconds: u64,
    pub tokens_valid_for_seconds: u64,
}

impl Default for BrokerAuthConfig {
    fn default() -> Self {
        Self { num_login_attempts: 5, block_for_seconds: 300, tokens_valid_for_seconds: 86400 }
    }
}
