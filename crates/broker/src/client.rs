use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::BrokerError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Secret broker health, as reported by `GET /` on the broker.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerStatus {
    pub state: String,
    #[serde(default, alias = "debugInfo")]
    pub debug_info: Option<String>,
}

/// `key -> JSON value` map the broker escrows and returns verbatim; the broker never interprets
/// the stored values.
pub type SecretMap = HashMap<String, Value>;

/// The envelope `GET /secrets` actually responds with: `{state, debug_info?, secrets?}`, mirroring
/// the reference client's `response['secrets']` access (`cc_agency/controller/docker.py:402`). A
/// bare `key -> value` map was never the wire contract; only the `secrets` field is.
#[derive(Debug, Clone, Deserialize)]
struct SecretsEnvelope {
    state: String,
    #[serde(default, alias = "debugInfo")]
    debug_info: Option<String>,
    #[serde(default)]
    secrets: Option<SecretMap>,
}

/// HTTP client for the secret broker (referred to as "trustee" in the reference
/// implementation), escrowing connector credentials and image pull auth out of the store so the
/// node proxy only ever resolves them in memory, right before launching a container.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    inner: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl BrokerClient {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> reqwest::Result<Self> {
        let inner = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            inner,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    /// Escrows `secrets`, returning the same keys back once stored.
    pub async fn store(&self, secrets: &SecretMap) -> Result<(), BrokerError> {
        let response = self
            .inner
            .post(format!("{}/secrets", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .json(secrets)
            .send()
            .await
            .map_err(|err| self.classify(&err))?;
        self.ensure_success(response).await.map(|_| ())
    }

    /// Deletes `keys` from escrow, best-effort: callers typically invoke this while voiding
    /// protected keys on terminal batches and do not treat a missing key as an error.
    pub async fn delete(&self, keys: &[String]) -> Result<(), BrokerError> {
        let response = self
            .inner
            .delete(format!("{}/secrets", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .json(keys)
            .send()
            .await
            .map_err(|err| self.classify(&err))?;
        self.ensure_success(response).await.map(|_| ())
    }

    /// Resolves `keys` into their plaintext values, right before a batch is executed.
    pub async fn collect(&self, keys: &[String]) -> Result<SecretMap, BrokerError> {
        let response = self
            .inner
            .get(format!("{}/secrets", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .json(keys)
            .send()
            .await
            .map_err(|err| self.classify(&err))?;
        let body = self.ensure_success(response).await?;
        let envelope: SecretsEnvelope =
            serde_json::from_str(&body).map_err(|err| BrokerError::Malformed(err.to_string()))?;
        if envelope.state != "ok" {
            return Err(BrokerError::Unavailable(envelope.debug_info.unwrap_or(envelope.state)));
        }
        Ok(envelope.secrets.unwrap_or_default())
    }

    /// Health probe used by the scheduler's once-per-pass broker availability check (spec.md
    /// §4.5 step 3): batch placement is withheld while the broker cannot be reached.
    pub async fn inspect(&self) -> Result<BrokerStatus, BrokerError> {
        let response = self
            .inner
            .get(format!("{}/", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|err| self.classify(&err))?;
        let body = self.ensure_success(response).await?;
        let status: BrokerStatus = serde_json::from_str(&body).map_err(|err| BrokerError::Malformed(err.to_string()))?;
        if status.state != "ok" {
            return Err(BrokerError::Unavailable(status.debug_info.clone().unwrap_or_else(|| status.state.clone())));
        }
        Ok(status)
    }

    fn classify(&self, err: &reqwest::Error) -> BrokerError {
        if err.is_timeout() || err.is_connect() {
            BrokerError::Unavailable(err.to_string())
        } else {
            BrokerError::Malformed(err.to_string())
        }
    }

    async fn ensure_success(&self, response: reqwest::Response) -> Result<String, BrokerError> {
        let status = response.status();
        let body = response.text().await.map_err(|err| BrokerError::Malformed(err.to_string()))?;
        if status.is_server_error() {
            warn!(%status, "secret broker returned a server error");
            return Err(BrokerError::Unavailable(format!("http {status}")));
        }
        if !status.is_success() {
            return Err(BrokerError::Malformed(format!("http {status}: {body}")));
        }
        Ok(body)
    }
}

/// Result envelope a request to store secrets may carry alongside a batch, matching the
/// reference client's fallback shape when the broker itself could not be evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerOutcome {
    pub state: String,
    #[serde(default)]
    pub debug_info: Option<String>,
    #[serde(default)]
    pub disable_retry: bool,
}
