use std::collections::HashMap;

use cc_types::GpuDeviceId;

/// Everything needed to create one of the three per-batch containers (stage-in, execute,
/// stage-out), mirroring the shape `create_container_with_gpus` assembles in the reference
/// implementation's `cc_core/commons/docker_utils.py`.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub ram_mb: u64,
    pub environment: HashMap<String, String>,
    /// Name of the per-batch shared volume, bound at [`cc_types::SHARED_VOLUME_MOUNT`].
    pub volume_name: String,
    pub network: Option<String>,
    pub gpus: Vec<GpuDeviceId>,
    /// Whether this container needs `/dev/fuse` + `SYS_ADMIN` (a mounting batch).
    pub enable_fuse: bool,
}

impl ContainerSpec {
    pub fn devices(&self) -> Vec<&'static str> {
        if self.enable_fuse {
            vec![cc_types::FUSE_DEVICE]
        } else {
            vec![]
        }
    }

    pub fn capabilities(&self) -> Vec<&'static str> {
        if self.enable_fuse {
            vec![cc_types::SYS_ADMIN_CAPABILITY]
        } else {
            vec![]
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatusFilter {
    Running,
    Exited,
    Created,
    Any,
}

impl ContainerStatusFilter {
    pub fn as_str(self) -> Option<&'static str> {
        match self {
            ContainerStatusFilter::Running => Some("running"),
            ContainerStatusFilter::Exited => Some("exited"),
            ContainerStatusFilter::Created => Some("created"),
            ContainerStatusFilter::Any => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub status: String,
}

/// Host info needed by the inspection loop: total memory/cpus to record on the `Node`, plus
/// whether a native GPU runtime (e.g. `nvidia`) is registered.
#[derive(Debug, Clone)]
pub struct RuntimeInfo {
    pub ram_mb: u64,
    pub cpus: u32,
    pub has_native_gpu_runtime: bool,
}
