use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gpu::GpuRequirement;

/// `execution.settings.batchConcurrencyLimit` default from the reference implementation.
pub const DEFAULT_CONCURRENCY_LIMIT: u32 = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerImage {
    pub url: String,
    pub auth: Option<ImageAuth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSettings {
    pub ram_mb: u64,
    pub gpus: Vec<GpuRequirement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    #[serde(default)]
    pub retry_if_failed: bool,
    #[serde(default = "default_concurrency_limit")]
    pub batch_concurrency_limit: u32,
}

fn default_concurrency_limit() -> u32 {
    DEFAULT_CONCURRENCY_LIMIT
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self { retry_if_failed: false, batch_concurrency_limit: DEFAULT_CONCURRENCY_LIMIT }
    }
}

/// Where an argument goes on the rendered command line. Mirrors `CliArgumentPosition` from the
/// reference implementation's `command_builder.py`: positional arguments sort by `position`
/// ahead of any named argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgumentPosition {
    Positional(i64),
    Named,
}

impl ArgumentPosition {
    fn sort_key(self) -> (i64, i64) {
        match self {
            ArgumentPosition::Positional(p) => (0, p),
            ArgumentPosition::Named => (1, 0),
        }
    }
}

impl PartialOrd for ArgumentPosition {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArgumentPosition {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputCategory {
    File,
    Directory,
    String,
    Int,
    Long,
    Float,
    Double,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputType {
    pub category: InputCategory,
    pub is_array: bool,
    pub is_optional: bool,
}

/// One entry of the CLI contract: how a declared input is rendered onto the command line.
/// Mirrors `CliArgument` in the reference implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliArgument {
    pub input_key: String,
    pub position: ArgumentPosition,
    pub input_type: InputType,
    pub prefix: Option<String>,
    pub separate: bool,
    pub item_separator: Option<String>,
}

/// The descriptor for a declared output (stage-out connector).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub output_key: String,
    /// `"stdout"` / `"stderr"` are the two special output types the scheduler cares about; any
    /// other value names a stage-out connector class handled opaquely by the in-container agent.
    pub output_class: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliContract {
    pub base_command: Vec<String>,
    pub inputs: Vec<CliArgument>,
    pub outputs: Vec<OutputDescriptor>,
    pub stdout_file: Option<String>,
    pub stderr_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub owner: String,
    pub registration_time: DateTime<Utc>,
    pub image: ContainerImage,
    pub resources: ResourceSettings,
    pub execution: ExecutionSettings,
    pub cli: CliContract,
    pub protected_keys_voided: bool,
    /// Opaque secret-broker keys escrowed at submission time, resolved into plaintext secrets
    /// (see `cc_broker`) right before a batch using this experiment is executed.
    pub secret_keys: Vec<String>,
}

impl Experiment {
    pub fn has_outputs_declared(&self, outputs: &HashMap<String, crate::batch::ConnectorValue>) -> bool {
        !self.cli.outputs.is_empty() && !outputs.is_empty()
    }
}
