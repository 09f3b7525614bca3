use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gpu::GpuDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeState {
    Online,
    Offline,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHistoryEntry {
    pub state: NodeState,
    pub time: DateTime<Utc>,
    pub debug_info: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub state: NodeState,
    pub ram_mb: Option<u64>,
    pub cpus: Option<u32>,
    pub gpus: Vec<GpuDevice>,
    pub history: Vec<NodeHistoryEntry>,
}

impl Node {
    pub fn new(name: String) -> Self {
        Self {
            name,
            state: NodeState::Unknown,
            ram_mb: None,
            cpus: None,
            gpus: Vec::new(),
            history: vec![NodeHistoryEntry { state: NodeState::Unknown, time: Utc::now(), debug_info: None }],
        }
    }
}
