use async_trait::async_trait;
use cc_types::{Batch, BatchState, Experiment, GpuDevice, ImageAuth, Node, NodeState};
use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// Typed, indexed access to the `experiments`, `batches`, `nodes` collections and the blob
/// store (spec.md §4.1). Every batch state transition is conditional on the batch's expected
/// prior state so concurrent cancellation is detected rather than overwritten — see
/// [`Store::cas_batch`].
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_experiment(&self, experiment: Experiment) -> Result<(), StoreError>;
    async fn find_experiment(&self, id: &str) -> Result<Option<Experiment>, StoreError>;
    async fn set_experiment_protected_keys_voided(&self, id: &str) -> Result<(), StoreError>;
    async fn list_experiments(&self) -> Result<Vec<Experiment>, StoreError>;

    /// Distinct image urls (with auth) across all known experiments, used for best-effort image
    /// pruning on each node (spec.md §4.5).
    async fn distinct_image_urls_with_auth(&self) -> Result<Vec<(String, Option<ImageAuth>)>, StoreError>;

    /// The most recent registration time of any experiment referencing `image_url`, used to
    /// decide whether a cached image has aged out.
    async fn most_recent_registration_for_image(
        &self,
        image_url: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn insert_batch(&self, batch: Batch) -> Result<(), StoreError>;
    async fn find_batch(&self, id: &str) -> Result<Option<Batch>, StoreError>;
    async fn list_batches_by_state(&self, state: BatchState) -> Result<Vec<Batch>, StoreError>;
    async fn list_batches_by_node_and_states(
        &self,
        node: &str,
        states: &[BatchState],
    ) -> Result<Vec<Batch>, StoreError>;
    async fn list_batches_by_experiment(&self, experiment_id: &str) -> Result<Vec<Batch>, StoreError>;
    async fn count_batches_in_states(
        &self,
        experiment_id: &str,
        states: &[BatchState],
    ) -> Result<u32, StoreError>;

    /// Snapshot of every batch live (scheduled or processing) on any node, used to compute the
    /// scheduler's per-pass cluster resource view (spec.md §4.4 step 5).
    async fn list_live_batches(&self) -> Result<Vec<Batch>, StoreError>;

    async fn list_terminal_unnotified_batches(&self) -> Result<Vec<Batch>, StoreError>;
    async fn mark_notifications_sent(&self, ids: &[String]) -> Result<(), StoreError>;

    async fn list_terminal_unvoided_batches(&self) -> Result<Vec<Batch>, StoreError>;
    async fn set_batch_protected_keys_voided(&self, id: &str) -> Result<(), StoreError>;

    /// Applies `mutate` to the batch identified by `id` iff its current state equals
    /// `expected_state`. `mutate` is responsible for pushing its own history entry when it changes
    /// `state` — this keeps the entry's `debug_info`/`agent_result` under the caller's control
    /// instead of forcing a bare one through the gateway. Returns `true` if the update applied,
    /// `false` if a concurrent writer (e.g. cancellation) had already moved the batch out of
    /// `expected_state`.
    async fn cas_batch(
        &self,
        id: &str,
        expected_state: BatchState,
        mutate: Box<dyn for<'a> FnOnce(&'a mut Batch) + Send + 'static>,
    ) -> Result<bool, StoreError>;

    async fn upsert_node(&self, node: Node) -> Result<(), StoreError>;
    async fn find_node(&self, name: &str) -> Result<Option<Node>, StoreError>;
    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError>;
    #[allow(clippy::too_many_arguments)]
    async fn set_node_state(
        &self,
        name: &str,
        state: NodeState,
        debug_info: Option<String>,
        ram_mb: Option<u64>,
        cpus: Option<u32>,
        gpus: Option<Vec<GpuDevice>>,
    ) -> Result<(), StoreError>;

    async fn put_blob(&self, name: &str, data: Vec<u8>) -> Result<(), StoreError>;
    async fn get_blob(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;
}
