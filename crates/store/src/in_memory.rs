use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cc_types::{
    Batch, BatchState, Experiment, GpuDevice, ImageAuth, Node, NodeHistoryEntry, NodeState,
    LIVE_BATCH_STATES,
};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::gateway::Store;

/// In-memory backing for [`Store`]. The real persistent document store + blob store are out of
/// scope (spec.md §1); this gateway is the actual deliverable and is structured the way a
/// production implementation would shape its in-process cache, behind `Arc<RwLock<_>>` the same
/// way the teacher guards `InMemoryNodeInner`.
#[derive(Default)]
struct Inner {
    experiments: HashMap<String, Experiment>,
    batches: HashMap<String, Batch>,
    nodes: HashMap<String, Node>,
    blobs: HashMap<String, Vec<u8>>,
}

pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(Inner::default())) }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_experiment(&self, experiment: Experiment) -> Result<(), StoreError> {
        self.inner.write().await.experiments.insert(experiment.id.clone(), experiment);
        Ok(())
    }

    async fn find_experiment(&self, id: &str) -> Result<Option<Experiment>, StoreError> {
        Ok(self.inner.read().await.experiments.get(id).cloned())
    }

    async fn set_experiment_protected_keys_voided(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let experiment = inner
            .experiments
            .get_mut(id)
            .ok_or_else(|| StoreError::ExperimentNotFound(id.to_string()))?;
        experiment.protected_keys_voided = true;
        Ok(())
    }

    async fn list_experiments(&self) -> Result<Vec<Experiment>, StoreError> {
        Ok(self.inner.read().await.experiments.values().cloned().collect())
    }

    async fn distinct_image_urls_with_auth(&self) -> Result<Vec<(String, Option<ImageAuth>)>, StoreError> {
        let inner = self.inner.read().await;
        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();
        for experiment in inner.experiments.values() {
            if seen.insert(experiment.image.url.clone()) {
                result.push((experiment.image.url.clone(), experiment.image.auth.clone()));
            }
        }
        Ok(result)
    }

    async fn most_recent_registration_for_image(
        &self,
        image_url: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .experiments
            .values()
            .filter(|e| e.image.url == image_url)
            .map(|e| e.registration_time)
            .max())
    }

    async fn insert_batch(&self, batch: Batch) -> Result<(), StoreError> {
        self.inner.write().await.batches.insert(batch.id.clone(), batch);
        Ok(())
    }

    async fn find_batch(&self, id: &str) -> Result<Option<Batch>, StoreError> {
        Ok(self.inner.read().await.batches.get(id).cloned())
    }

    async fn list_batches_by_state(&self, state: BatchState) -> Result<Vec<Batch>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .batches
            .values()
            .filter(|b| b.state == state)
            .cloned()
            .collect())
    }

    async fn list_batches_by_node_and_states(
        &self,
        node: &str,
        states: &[BatchState],
    ) -> Result<Vec<Batch>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .batches
            .values()
            .filter(|b| b.node.as_deref() == Some(node) && states.contains(&b.state))
            .cloned()
            .collect())
    }

    async fn list_batches_by_experiment(&self, experiment_id: &str) -> Result<Vec<Batch>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .batches
            .values()
            .filter(|b| b.experiment_id == experiment_id)
            .cloned()
            .collect())
    }

    async fn count_batches_in_states(
        &self,
        experiment_id: &str,
        states: &[BatchState],
    ) -> Result<u32, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .batches
            .values()
            .filter(|b| b.experiment_id == experiment_id && states.contains(&b.state))
            .count() as u32)
    }

    async fn list_live_batches(&self) -> Result<Vec<Batch>, StoreError> {
        self.list_batches_by_node_and_states_any(LIVE_BATCH_STATES).await
    }

    async fn list_terminal_unnotified_batches(&self) -> Result<Vec<Batch>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .batches
            .values()
            .filter(|b| b.state.is_terminal() && !b.notifications_sent)
            .cloned()
            .collect())
    }

    async fn mark_notifications_sent(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        for id in ids {
            if let Some(batch) = inner.batches.get_mut(id) {
                batch.notifications_sent = true;
            }
        }
        Ok(())
    }

    async fn list_terminal_unvoided_batches(&self) -> Result<Vec<Batch>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .batches
            .values()
            .filter(|b| b.state.is_terminal() && !b.protected_keys_voided)
            .cloned()
            .collect())
    }

    async fn set_batch_protected_keys_voided(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let batch = inner.batches.get_mut(id).ok_or_else(|| StoreError::BatchNotFound(id.to_string()))?;
        batch.protected_keys_voided = true;
        Ok(())
    }

    async fn cas_batch(
        &self,
        id: &str,
        expected_state: BatchState,
        mutate: Box<dyn for<'a> FnOnce(&'a mut Batch) + Send + 'static>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let batch = inner.batches.get_mut(id).ok_or_else(|| StoreError::BatchNotFound(id.to_string()))?;
        if batch.state != expected_state {
            return Ok(false);
        }
        mutate(batch);
        Ok(true)
    }

    async fn upsert_node(&self, node: Node) -> Result<(), StoreError> {
        self.inner.write().await.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    async fn find_node(&self, name: &str) -> Result<Option<Node>, StoreError> {
        Ok(self.inner.read().await.nodes.get(name).cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        Ok(self.inner.read().await.nodes.values().cloned().collect())
    }

    async fn set_node_state(
        &self,
        name: &str,
        state: NodeState,
        debug_info: Option<String>,
        ram_mb: Option<u64>,
        cpus: Option<u32>,
        gpus: Option<Vec<GpuDevice>>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let node = inner.nodes.get_mut(name).ok_or_else(|| StoreError::NodeNotFound(name.to_string()))?;
        node.state = state;
        if let Some(ram_mb) = ram_mb {
            node.ram_mb = Some(ram_mb);
        }
        if let Some(cpus) = cpus {
            node.cpus = Some(cpus);
        }
        if let Some(gpus) = gpus {
            node.gpus = gpus;
        }
        node.history.push(NodeHistoryEntry { state, time: Utc::now(), debug_info });
        Ok(())
    }

    async fn put_blob(&self, name: &str, data: Vec<u8>) -> Result<(), StoreError> {
        self.inner.write().await.blobs.insert(name.to_string(), data);
        Ok(())
    }

    async fn get_blob(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.read().await.blobs.get(name).cloned())
    }
}

impl InMemoryStore {
    async fn list_batches_by_node_and_states_any(&self, states: &[BatchState]) -> Result<Vec<Batch>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .batches
            .values()
            .filter(|b| b.node.is_some() && states.contains(&b.state))
            .cloned()
            .collect())
    }
}
