use std::sync::Arc;

use cc_container::ContainerStatusFilter;
use cc_store::batch_failure;
use cc_types::{AgentResult, Batch, BatchHistoryEntry, BatchState};
use chrono::Utc;
use tokio::time::sleep;
use tracing::warn;

use crate::proxy::{NodeProxy, CHECK_EXITED_CONTAINERS_INTERVAL};

const CANCELLED_LOOKUP_STATES: &[BatchState] = &[BatchState::Cancelled];
const HARVESTABLE_STATES: &[BatchState] = &[BatchState::Processing, BatchState::ProcessingOutput];

impl NodeProxy {
    pub async fn check_exited_containers_loop(self: Arc<Self>) {
        loop {
            self.wait_online().await;
            if self.is_shutting_down() {
                return;
            }
            tokio::select! {
                _ = self.check_exited_containers_event.notified() => {}
                _ = sleep(CHECK_EXITED_CONTAINERS_INTERVAL) => {}
            }
            if self.is_shutting_down() {
                return;
            }
            if !self.is_online() {
                continue;
            }
            match self.run_check_exited_cycle().await {
                Ok(freed) if freed => self.scheduler_wake.notify_one(),
                Ok(_) => {}
                Err(err) => {
                    warn!(node = %self.name, error = %err, "check-exited-containers cycle failed");
                    if err.triggers_inspection() {
                        self.notify_inspection();
                    }
                }
            }
        }
    }

    pub(crate) async fn run_check_exited_cycle(&self) -> Result<bool, crate::error::ProxyError> {
        let mut freed = false;

        let cancelled = self.store.list_batches_by_node_and_states(&self.name, CANCELLED_LOOKUP_STATES).await?;
        for batch in &cancelled {
            for name in [batch.container_name(None), batch.container_name(Some("input")), batch.container_name(Some("output"))] {
                let _ = self.driver.remove(&name, true).await;
            }
            freed = true;
        }

        let containers = self.driver.list(ContainerStatusFilter::Exited).await?;
        for container in containers {
            let batch = match self.store.find_batch(&container.name).await? {
                Some(batch) if !batch.state.is_terminal() => batch,
                _ => continue,
            };
            self.harvest_exited_container(&batch, &container.id).await?;
            freed = true;
        }

        Ok(freed)
    }

    async fn harvest_exited_container(&self, batch: &Batch, container_id: &str) -> Result<(), crate::error::ProxyError> {
        let logs = self.driver.logs(container_id).await;
        let outcome = logs.and_then(|(stdout, stderr)| match AgentResult::parse(stdout.trim()) {
            Ok(result) => Ok((result, stdout, stderr)),
            Err(err) => Err(cc_container::ContainerError::Decode(format!(
                "{err}: raw stdout was {stdout:?}, stderr {stderr:?}"
            ))),
        });
        let _ = self.driver.remove(container_id, true).await;

        let (result, stdout, stderr) = match outcome {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(node = %self.name, batch = %batch.id, error = %err, "could not parse finalisation container output");
                batch_failure(self.store.as_ref(), &batch.id, batch.state, Some(err.to_string()), false).await?;
                return Ok(());
            }
        };

        if result.is_succeeded() && HARVESTABLE_STATES.contains(&batch.state) {
            self.archive_blobs(batch, &stdout, &stderr, batch.user_specified_stdout, batch.user_specified_stderr).await;
            let expected_state = batch.state;
            self.store
                .cas_batch(
                    &batch.id,
                    expected_state,
                    Box::new(move |batch| {
                        batch.state = BatchState::Succeeded;
                        batch.history.push(BatchHistoryEntry {
                            state: BatchState::Succeeded,
                            time: Utc::now(),
                            debug_info: None,
                            node: batch.node.clone(),
                            agent_result: Some(result),
                        });
                    }),
                )
                .await?;
        } else if result.is_succeeded() {
            // The agent succeeded but a concurrent cancellation moved the batch out of a
            // harvestable state; treat the success as moot and let batch-failure no-op.
            self.archive_blobs(batch, &stdout, &stderr, true, true).await;
            batch_failure(self.store.as_ref(), &batch.id, batch.state, Some("agent succeeded after cancellation".into()), true)
                .await?;
        } else {
            let debug_info = if let AgentResult::Failed { debug_info, .. } = &result { debug_info.clone() } else { None };
            self.archive_blobs(batch, &stdout, &stderr, true, true).await;
            batch_failure(self.store.as_ref(), &batch.id, batch.state, debug_info, false).await?;
        }
        Ok(())
    }

    async fn archive_blobs(&self, batch: &Batch, stdout: &str, stderr: &str, include_stdout: bool, include_stderr: bool) {
        if include_stdout {
            if let Err(err) = self.store.put_blob(&batch.stdout_blob_name(), stdout.as_bytes().to_vec()).await {
                warn!(node = %self.name, batch = %batch.id, error = %err, "failed to archive stdout blob");
            }
        }
        if include_stderr {
            if let Err(err) = self.store.put_blob(&batch.stderr_blob_name(), stderr.as_bytes().to_vec()).await {
                warn!(node = %self.name, batch = %batch.id, error = %err, "failed to archive stderr blob");
            }
        }
    }
}
