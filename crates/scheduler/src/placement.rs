use std::collections::HashMap;

use cc_types::{match_gpus, Batch, BatchHistoryEntry, BatchState, GpuDevice, Node};
use chrono::Utc;
use tracing::warn;

use crate::error::SchedulerError;
use crate::scheduler::Scheduler;

/// Per-node resource snapshot the placement pass mutates in place as it assigns batches, so a
/// later batch in the same pass sees the effect of an earlier one without re-querying the store.
struct CompleteNode {
    name: String,
    online: bool,
    ram_total: u64,
    ram_available: u64,
    gpus_total: Vec<GpuDevice>,
    gpus_available: Vec<GpuDevice>,
    running_count: u32,
}

impl CompleteNode {
    fn could_ever_fit(&self, ram_mb: u64, gpu_requirements: &[cc_types::GpuRequirement]) -> bool {
        self.ram_total >= ram_mb && match_gpus(&self.gpus_total, gpu_requirements).is_ok()
    }

    fn currently_fits(&self, ram_mb: u64, gpu_requirements: &[cc_types::GpuRequirement]) -> bool {
        self.online && self.ram_available >= ram_mb && match_gpus(&self.gpus_available, gpu_requirements).is_ok()
    }
}

fn build_snapshot(nodes: Vec<Node>, live_batches: &[Batch]) -> HashMap<String, CompleteNode> {
    let mut snapshot: HashMap<String, CompleteNode> = nodes
        .into_iter()
        .map(|node| {
            let ram_total = node.ram_mb.unwrap_or(0);
            (
                node.name.clone(),
                CompleteNode {
                    name: node.name,
                    online: node.state == cc_types::NodeState::Online,
                    ram_total,
                    ram_available: ram_total,
                    gpus_total: node.gpus.clone(),
                    gpus_available: node.gpus,
                    running_count: 0,
                },
            )
        })
        .collect();

    for batch in live_batches {
        let Some(node_name) = &batch.node else { continue };
        let Some(node) = snapshot.get_mut(node_name) else { continue };
        node.running_count += 1;
        // RAM consumed by a running batch is only known through its experiment; the caller binds
        // this by pre-loading experiments, see `place_batches`. This function is purely about
        // GPU accounting, which is self-contained on the batch.
        if let Some(used) = &batch.used_gpu_ids {
            node.gpus_available.retain(|gpu| !used.contains(&gpu.id));
        }
    }

    snapshot
}

impl Scheduler {
    /// Step 5: assign `registered` batches to nodes, oldest-first, respecting per-experiment
    /// concurrency limits and the insecure-capabilities policy. Returns how many batches were
    /// placed this pass.
    pub(crate) async fn place_batches(&self) -> Result<u32, SchedulerError> {
        let nodes = self.store.list_nodes().await?;
        let live_batches = self.store.list_live_batches().await?;
        let mut snapshot = build_snapshot(nodes, &live_batches);

        // RAM accounting needs each live batch's experiment; resolve once up front.
        let mut experiment_counts: HashMap<String, u32> = HashMap::new();
        for batch in &live_batches {
            *experiment_counts.entry(batch.experiment_id.clone()).or_default() += 1;
            let (Some(node_name), Ok(Some(experiment))) =
                (&batch.node, self.store.find_experiment(&batch.experiment_id).await)
            else {
                continue;
            };
            if let Some(node) = snapshot.get_mut(node_name) {
                node.ram_available = node.ram_available.saturating_sub(experiment.resources.ram_mb);
            }
        }

        let mut registered = self.store.list_batches_by_state(BatchState::Registered).await?;
        registered.sort_by_key(|batch| batch.registration_time);

        let mut placed = 0;
        for batch in registered {
            let experiment = match self.store.find_experiment(&batch.experiment_id).await? {
                Some(experiment) => experiment,
                None => {
                    cc_store::batch_failure(
                        self.store.as_ref(),
                        &batch.id,
                        BatchState::Registered,
                        Some("experiment not found".to_string()),
                        true,
                    )
                    .await?;
                    continue;
                }
            };

            let running_for_experiment = *experiment_counts.get(&experiment.id).unwrap_or(&0);
            if running_for_experiment >= experiment.execution.batch_concurrency_limit {
                continue;
            }

            if !snapshot.values().any(|node| node.could_ever_fit(experiment.resources.ram_mb, &experiment.resources.gpus)) {
                cc_store::batch_failure(
                    self.store.as_ref(),
                    &batch.id,
                    BatchState::Registered,
                    Some("no configured node can ever satisfy this batch's resource requirements".to_string()),
                    true,
                )
                .await?;
                continue;
            }

            let mount_required = batch.inputs.values().chain(batch.outputs.values()).any(|v| v.mount);
            if mount_required && !self.allow_insecure_capabilities {
                cc_store::batch_failure(
                    self.store.as_ref(),
                    &batch.id,
                    BatchState::Registered,
                    Some("batch requires a FUSE mount but allow_insecure_capabilities is disabled".to_string()),
                    true,
                )
                .await?;
                continue;
            }

            let mut candidates: Vec<&CompleteNode> = snapshot
                .values()
                .filter(|node| node.currently_fits(experiment.resources.ram_mb, &experiment.resources.gpus))
                .collect();
            candidates.sort_by_key(|node| (!node.gpus_total.is_empty(), node.running_count, node.ram_available));
            let Some(chosen) = candidates.first().map(|n| n.name.clone()) else { continue };

            let node = snapshot.get(&chosen).expect("chosen node exists in snapshot");
            let used_gpus = match match_gpus(&node.gpus_available, &experiment.resources.gpus) {
                Ok(gpus) => gpus,
                Err(err) => {
                    warn!(batch = %batch.id, node = %chosen, error = %err, "gpu match failed after candidate filtering, skipping this pass");
                    continue;
                }
            };
            let used_gpu_ids: Vec<cc_types::GpuDeviceId> = used_gpus.iter().map(|g| g.id).collect();

            let node_name = chosen.clone();
            let applied = self
                .store
                .cas_batch(
                    &batch.id,
                    BatchState::Registered,
                    Box::new(move |b| {
                        b.state = BatchState::Scheduled;
                        b.node = Some(node_name.clone());
                        b.used_gpu_ids = Some(used_gpu_ids);
                        b.mount = mount_required;
                        b.attempts += 1;
                        b.history.push(BatchHistoryEntry {
                            state: BatchState::Scheduled,
                            time: Utc::now(),
                            debug_info: None,
                            node: Some(node_name),
                            agent_result: None,
                        });
                    }),
                )
                .await?;

            if applied {
                placed += 1;
                let node = snapshot.get_mut(&chosen).expect("chosen node exists in snapshot");
                node.ram_available = node.ram_available.saturating_sub(experiment.resources.ram_mb);
                node.gpus_available.retain(|gpu| !used_gpus.iter().any(|used| used.id == gpu.id));
                node.running_count += 1;
                *experiment_counts.entry(experiment.id.clone()).or_default() += 1;
            }
        }

        Ok(placed)
    }
}
