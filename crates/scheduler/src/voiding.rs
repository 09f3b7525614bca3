use serde_json::Value;
use tracing::warn;

use crate::error::SchedulerError;
use crate::scheduler::Scheduler;

/// Collects every string leaf out of a batch's inputs/outputs: the candidate set of opaque
/// broker keys a protected value could have been replaced with at submission time (spec.md §3
/// "Secret envelope"). Deleting a string that never was a broker key is harmless — `delete` is
/// documented best-effort.
fn collect_string_leaves(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|item| collect_string_leaves(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_string_leaves(item, out)),
        _ => {}
    }
}

impl Scheduler {
    /// Step 1: delete broker-escrowed secrets for batches/experiments that have gone terminal and
    /// haven't been voided yet.
    pub(crate) async fn void_protected_keys(&self) -> Result<(), SchedulerError> {
        let batches = self.store.list_terminal_unvoided_batches().await?;
        for batch in &batches {
            let mut keys = Vec::new();
            for value in batch.inputs.values().chain(batch.outputs.values()) {
                collect_string_leaves(&value.value, &mut keys);
            }
            if !keys.is_empty() {
                if let Err(err) = self.broker.delete(&keys).await {
                    warn!(batch = %batch.id, error = %err, "failed to void batch secret keys, will retry next pass");
                    continue;
                }
            }
            self.store.set_batch_protected_keys_voided(&batch.id).await?;
        }

        let experiments = self.store.list_experiments().await?;
        for experiment in experiments {
            if experiment.protected_keys_voided || experiment.secret_keys.is_empty() {
                continue;
            }
            let batches = self.store.list_batches_by_experiment(&experiment.id).await?;
            if batches.is_empty() || !batches.iter().all(|b| b.state.is_terminal()) {
                continue;
            }
            if let Err(err) = self.broker.delete(&experiment.secret_keys).await {
                warn!(experiment = %experiment.id, error = %err, "failed to void experiment secret keys, will retry next pass");
                continue;
            }
            self.store.set_experiment_protected_keys_voided(&experiment.id).await?;
        }

        Ok(())
    }
}
