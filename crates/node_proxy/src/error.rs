use cc_broker::BrokerError;
use cc_container::ContainerError;
use cc_store::StoreError;

/// Errors surfaced by a proxy cycle. All three loops catch these at the top level, log them, and
/// (for container/store faults) fall through to triggering a fresh inspection rather than
/// propagating, per spec.md §4.5's "all three loops catch and log exceptions".
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("agent result could not be parsed: {0}")]
    MalformedAgentResult(String),
}

impl ProxyError {
    /// Whether this failure means the node's container daemon itself is suspect and the
    /// inspection loop should be nudged rather than just failing the one batch in flight.
    pub fn triggers_inspection(&self) -> bool {
        match self {
            ProxyError::Container(err) => err.is_daemon_error(),
            _ => false,
        }
    }
}
