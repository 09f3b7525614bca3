pub mod agent;
pub mod batch;
pub mod command_builder;
pub mod experiment;
pub mod gpu;
pub mod node;
pub mod paths;

pub use agent::AgentResult;
pub use batch::{Batch, BatchHistoryEntry, BatchState, CloudAccess, ConnectorValue, LIVE_BATCH_STATES};
pub use experiment::{
    ArgumentPosition, CliArgument, CliContract, ContainerImage, Experiment, ExecutionSettings,
    ImageAuth, InputCategory, InputType, OutputDescriptor, ResourceSettings,
};
pub use gpu::{match_gpus, GpuDevice, GpuDeviceId, GpuRequirement, InsufficientGpuError, NVIDIA_GPU_VENDOR};
pub use node::{Node, NodeHistoryEntry, NodeState};
pub use paths::{
    AGENT_ARCHIVE_ROOT, FUSE_DEVICE, INPUT_CONNECTOR_ENTRY_POINT, OUTPUT_CONNECTOR_ENTRY_POINT,
    SHARED_VOLUME_MOUNT, SYS_ADMIN_CAPABILITY,
};
