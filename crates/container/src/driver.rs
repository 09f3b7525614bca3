use async_trait::async_trait;
use cc_types::GpuDevice;

use crate::error::ContainerError;
use crate::spec::{ContainerSpec, ContainerStatusFilter, ContainerSummary, ExecResult, ImageAuth, RuntimeInfo};

/// Abstraction over a host's container runtime, implemented today over a Docker Engine-API-style
/// HTTP endpoint (spec.md §4.3). Kept as a trait so the node proxy and scheduler logic are
/// testable without a real daemon, the same way the teacher abstracts its provider behind a
/// trait rather than calling a concrete HTTP client inline.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    async fn pull(&self, image: &str, auth: Option<&ImageAuth>) -> Result<(), ContainerError>;
    async fn create(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;
    async fn start(&self, container_id: &str) -> Result<(), ContainerError>;
    async fn stop(&self, container_id: &str) -> Result<(), ContainerError>;
    async fn remove(&self, container_id: &str, force: bool) -> Result<(), ContainerError>;
    async fn exec(&self, container_id: &str, command: &[String]) -> Result<ExecResult, ContainerError>;

    /// Reads the accumulated stdout/stderr of a container, including one that has already
    /// exited. This is how the proxy's exit-harvest loop retrieves the finalisation container's
    /// agent-result JSON, since `exec` only captures output produced by that specific exec call.
    async fn logs(&self, container_id: &str) -> Result<(String, String), ContainerError>;
    async fn put_archive(&self, container_id: &str, path: &str, tar_bytes: Vec<u8>) -> Result<(), ContainerError>;
    async fn get_archive(&self, container_id: &str, path: &str) -> Result<Vec<u8>, ContainerError>;
    async fn list(&self, status: ContainerStatusFilter) -> Result<Vec<ContainerSummary>, ContainerError>;
    async fn info(&self) -> Result<RuntimeInfo, ContainerError>;

    /// Runs a short-lived inspection container and parses `index, memory` CSV lines from its
    /// stdout into `GpuDevice`s (spec.md §4.3's "inspection image" convention).
    async fn inspect_gpus(&self) -> Result<Vec<GpuDevice>, ContainerError>;

    async fn prune_image(&self, image: &str) -> Result<(), ContainerError>;
}
