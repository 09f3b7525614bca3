#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("experiment \"{0}\" not found")]
    ExperimentNotFound(String),
    #[error("batch \"{0}\" not found")]
    BatchNotFound(String),
    #[error("node \"{0}\" not found")]
    NodeNotFound(String),
    #[error("store I/O error: {0}")]
    Io(String),
}
