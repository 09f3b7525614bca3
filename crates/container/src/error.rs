#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("container runtime unreachable: {0}")]
    Unreachable(String),
    #[error("container runtime returned an error: {0}")]
    Runtime(String),
    #[error("container {0} not found")]
    NotFound(String),
    #[error("could not build tar archive: {0}")]
    Archive(String),
    #[error("could not decode container output: {0}")]
    Decode(String),
    #[error("mounting is required for this batch but the node's policy forbids insecure capabilities")]
    MountNotPermitted,
}

impl ContainerError {
    /// Whether the failure indicates the daemon itself is unreachable, which should trigger the
    /// node proxy's inspection loop rather than just failing the one batch (spec.md §4.5).
    pub fn is_daemon_error(&self) -> bool {
        matches!(self, ContainerError::Unreachable(_) | ContainerError::Runtime(_))
    }
}
