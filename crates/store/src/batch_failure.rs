use cc_types::{BatchHistoryEntry, BatchState};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::gateway::Store;

/// The sole entry point for moving a batch out of a failed execution attempt, ported from
/// `cc-agency`'s `commons/helper.py::batch_failure`. Every caller — the node proxy on agent
/// failure, on a stale container, on a broker error — routes through here so the retry-vs-bury
/// decision is made in exactly one place.
///
/// Buries the batch (-> `Failed`, node kept for postmortem) if any of:
/// - this was already the batch's second or later attempt,
/// - `disable_retry` was requested by the caller (e.g. cancellation raced with failure), or
/// - the experiment opted out of retries.
///
/// Otherwise resets the batch to `Registered` so the scheduler can place it again, clearing its
/// node and reserved GPUs.
///
/// A no-op (returns `Ok(false)`) if `expected_state` no longer matches: calling this twice for the
/// same failure is safe.
pub async fn batch_failure(
    store: &dyn Store,
    batch_id: &str,
    expected_state: BatchState,
    debug_info: Option<String>,
    disable_retry: bool,
) -> Result<bool, StoreError> {
    let batch = store
        .find_batch(batch_id)
        .await?
        .ok_or_else(|| StoreError::BatchNotFound(batch_id.to_string()))?;
    if batch.state != expected_state {
        debug!(batch_id, "batch_failure: state already moved on, skipping");
        return Ok(false);
    }

    let experiment = store
        .find_experiment(&batch.experiment_id)
        .await?
        .ok_or_else(|| StoreError::ExperimentNotFound(batch.experiment_id.clone()))?;

    let bury = batch.attempts >= 2 || disable_retry || !experiment.execution.retry_if_failed;
    let attempts = batch.attempts;

    let applied = store
        .cas_batch(
            batch_id,
            expected_state,
            Box::new(move |batch| {
                batch.state = if bury { BatchState::Failed } else { BatchState::Registered };
                if !bury {
                    batch.node = None;
                    batch.used_gpu_ids = None;
                }
                batch.history.push(BatchHistoryEntry {
                    state: batch.state,
                    time: chrono::Utc::now(),
                    debug_info,
                    node: batch.node.clone(),
                    agent_result: None,
                });
            }),
        )
        .await?;

    if applied && bury {
        warn!(batch_id, attempts, "batch buried as failed");
    }

    Ok(applied)
}
