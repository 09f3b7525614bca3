/// Errors from talking to the secret broker. The `Unavailable`/`Malformed` split mirrors the
/// reference implementation's `TrusteeClient._evaluate_request`, which collapses both network
/// failures and non-2xx responses into a `{"state": "failed", ...}` envelope for its caller —
/// here the two are kept distinct so the node proxy can decide whether a broker outage should
/// hold a batch back for retry versus fail it outright.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker could not be reached, or responded with a 5xx/connection-level failure.
    /// Transient by nature: the caller should retry rather than bury the batch.
    #[error("secret broker unavailable: {0}")]
    Unavailable(String),

    /// The broker was reached but returned a response this client could not interpret (non-JSON
    /// body, unexpected envelope shape, or an unrecognised secret key).
    #[error("secret broker returned a malformed response: {0}")]
    Malformed(String),
}

impl BrokerError {
    /// Whether this failure is worth retrying rather than treated as a hard batch failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_))
    }
}
