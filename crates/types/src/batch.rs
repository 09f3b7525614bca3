use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentResult;
use crate::gpu::GpuDeviceId;

/// A batch's position in the transition DAG described in spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchState {
    Registered,
    Scheduled,
    ProcessingInput,
    Processing,
    ProcessingOutput,
    Succeeded,
    Failed,
    Cancelled,
}

/// States that count toward a node's current load and an experiment's concurrency limit: a batch
/// occupies its assigned node's resources from the moment it is scheduled until it reaches a
/// terminal state (spec.md §8's "sum over all batches in {scheduled, processing_*}" invariant).
pub const LIVE_BATCH_STATES: &[BatchState] =
    &[BatchState::Scheduled, BatchState::ProcessingInput, BatchState::Processing, BatchState::ProcessingOutput];

impl BatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn is_live(self) -> bool {
        LIVE_BATCH_STATES.contains(&self)
    }

    /// Whether `self -> next` is a legal edge in the transition DAG.
    ///
    /// `cancelled` is reachable from any non-terminal state and `registered` is reachable from
    /// any non-terminal state (retry), so those two are handled before the explicit DAG edges.
    pub fn can_transition_to(self, next: BatchState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == BatchState::Cancelled || next == BatchState::Registered {
            return true;
        }
        matches!(
            (self, next),
            (Self::Registered, Self::Scheduled)
                | (Self::Scheduled, Self::ProcessingInput)
                | (Self::ProcessingInput, Self::Processing)
                | (Self::Processing, Self::ProcessingOutput)
                | (Self::Processing, Self::Succeeded)
                | (Self::Processing, Self::Failed)
                | (Self::ProcessingOutput, Self::Succeeded)
                | (Self::ProcessingOutput, Self::Failed)
        )
    }
}

/// One append-only entry in a batch's history. Exactly one entry is appended per state write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchHistoryEntry {
    pub state: BatchState,
    pub time: DateTime<Utc>,
    pub debug_info: Option<String>,
    pub node: Option<String>,
    pub agent_result: Option<AgentResult>,
}

/// A resolved input or output value bound to a batch, after submission-time variable
/// substitution. The exact shape of `value` depends on the input's category (file, directory,
/// string, int, ...); we keep it as a JSON value since the core orchestrator only ever threads
/// it through to the container driver and command builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorValue {
    pub value: serde_json::Value,
    /// Present when this input/output requires a FUSE mount (cloud storage connectors).
    pub mount: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudAccess {
    pub access_key: String,
    pub access_secret_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub experiment_id: String,
    pub owner: String,
    pub registration_time: DateTime<Utc>,
    pub inputs: HashMap<String, ConnectorValue>,
    pub outputs: HashMap<String, ConnectorValue>,
    pub cloud: Option<CloudAccess>,
    pub state: BatchState,
    pub node: Option<String>,
    pub used_gpu_ids: Option<Vec<GpuDeviceId>>,
    pub mount: bool,
    pub attempts: u32,
    pub user_specified_stdout: bool,
    pub user_specified_stderr: bool,
    pub stdout_blob: Option<String>,
    pub stderr_blob: Option<String>,
    pub notifications_sent: bool,
    pub protected_keys_voided: bool,
    pub history: Vec<BatchHistoryEntry>,
}

impl Batch {
    pub fn new(id: String, experiment_id: String, owner: String, now: DateTime<Utc>) -> Self {
        let mut batch = Self {
            id,
            experiment_id,
            owner,
            registration_time: now,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            cloud: None,
            state: BatchState::Registered,
            node: None,
            used_gpu_ids: None,
            mount: false,
            attempts: 0,
            user_specified_stdout: false,
            user_specified_stderr: false,
            stdout_blob: None,
            stderr_blob: None,
            notifications_sent: false,
            protected_keys_voided: false,
            history: Vec::new(),
        };
        batch.history.push(BatchHistoryEntry {
            state: BatchState::Registered,
            time: now,
            debug_info: None,
            node: None,
            agent_result: None,
        });
        batch
    }

    pub fn stdout_blob_name(&self) -> String {
        format!("{}_stdout", self.id)
    }

    pub fn stderr_blob_name(&self) -> String {
        format!("{}_stderr", self.id)
    }

    /// The blob name the proxy uses for the finalisation/input/output connector container this
    /// batch is currently running, e.g. `"{id}_input"`.
    pub fn container_name(&self, suffix: Option<&str>) -> String {
        match suffix {
            Some(suffix) => format!("{}_{suffix}", self.id),
            None => self.id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_can_reach_scheduled_only() {
        assert!(BatchState::Registered.can_transition_to(BatchState::Scheduled));
        assert!(!BatchState::Registered.can_transition_to(BatchState::Processing));
    }

    #[test]
    fn cancelled_reachable_from_any_non_terminal_state() {
        for state in [
            BatchState::Registered,
            BatchState::Scheduled,
            BatchState::ProcessingInput,
            BatchState::Processing,
            BatchState::ProcessingOutput,
        ] {
            assert!(state.can_transition_to(BatchState::Cancelled));
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for state in [BatchState::Succeeded, BatchState::Failed, BatchState::Cancelled] {
            assert!(state.is_terminal());
            assert!(!state.can_transition_to(BatchState::Registered));
        }
    }

    #[test]
    fn registered_reachable_from_any_non_terminal_state_on_retry() {
        for state in [
            BatchState::Scheduled,
            BatchState::ProcessingInput,
            BatchState::Processing,
            BatchState::ProcessingOutput,
        ] {
            assert!(state.can_transition_to(BatchState::Registered));
        }
    }
}
