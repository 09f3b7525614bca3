use std::collections::HashMap;
use std::sync::Arc;

use cc_container::{ContainerSpec, RuntimeInfo, INSPECTION_IMAGE};
use cc_store::batch_failure;
use cc_types::{BatchState, GpuDevice, NodeState};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::proxy::{NodeProxy, OFFLINE_POLL_INTERVAL};

const LIVE_STATES: &[BatchState] =
    &[BatchState::Scheduled, BatchState::ProcessingInput, BatchState::Processing, BatchState::ProcessingOutput];

impl NodeProxy {
    /// The inspection loop (spec.md §4.5): while online, waits for the inspection event and runs
    /// one probe; while offline, polls every 10s hoping the daemon has come back.
    pub async fn inspection_loop(self: Arc<Self>) {
        loop {
            if self.is_shutting_down() {
                return;
            }
            if self.is_online() {
                self.inspection_event.notified().await;
                if let Err(err) = self.probe_once().await {
                    warn!(node = %self.name, error = %err, "inspection probe failed, marking node offline");
                    self.go_offline(err.to_string()).await;
                }
            } else {
                sleep(OFFLINE_POLL_INTERVAL).await;
                match self.probe_once().await {
                    Ok(info) => self.go_online(info).await,
                    Err(err) => warn!(node = %self.name, error = %err, "node still unreachable"),
                }
            }
        }
    }

    /// Runs `echo test` in the inspection image and reads the daemon's `info()`, the liveness
    /// check both branches of the loop share.
    async fn probe_once(&self) -> Result<RuntimeInfo, cc_container::ContainerError> {
        self.driver.pull(INSPECTION_IMAGE, None).await?;
        let spec = ContainerSpec {
            name: format!("cc-inspect-{}", self.name),
            image: INSPECTION_IMAGE.to_string(),
            command: vec!["echo".to_string(), "test".to_string()],
            working_dir: "/".to_string(),
            ram_mb: 16,
            environment: HashMap::new(),
            volume_name: format!("cc-inspect-{}", self.name),
            network: None,
            gpus: vec![],
            enable_fuse: false,
        };
        // A stale inspection container from a previous crashed cycle must not block re-creation.
        let _ = self.driver.remove(&spec.name, true).await;
        let id = self.driver.create(&spec).await?;
        self.driver.start(&id).await?;
        let result = self.driver.exec(&id, &spec.command).await;
        let _ = self.driver.stop(&id).await;
        let _ = self.driver.remove(&id, true).await;
        result?;
        self.driver.info().await
    }

    async fn go_offline(&self, debug_info: String) {
        self.set_online(false);
        if let Err(err) = self
            .store
            .set_node_state(&self.name, NodeState::Offline, Some(debug_info.clone()), None, None, None)
            .await
        {
            warn!(node = %self.name, error = %err, "failed to record node offline");
        }

        let batches = match self.store.list_batches_by_node_and_states(&self.name, LIVE_STATES).await {
            Ok(batches) => batches,
            Err(err) => {
                warn!(node = %self.name, error = %err, "failed to list in-flight batches while going offline");
                return;
            }
        };
        for batch in batches {
            let state = batch.state;
            if let Err(err) =
                batch_failure(self.store.as_ref(), &batch.id, state, Some(debug_info.clone()), false).await
            {
                warn!(node = %self.name, batch = %batch.id, error = %err, "batch-failure call failed while going offline");
            }
        }
    }

    async fn go_online(&self, info: RuntimeInfo) {
        let gpus: Vec<GpuDevice> = match self.driver.inspect_gpus().await {
            Ok(gpus) => gpus.into_iter().filter(|gpu| !self.gpu_blacklist.contains(&gpu.id)).collect(),
            Err(err) => {
                warn!(node = %self.name, error = %err, "gpu inspection failed, recording node with no gpus");
                Vec::new()
            }
        };
        if let Err(err) = self
            .store
            .set_node_state(&self.name, NodeState::Online, None, Some(info.ram_mb), Some(info.cpus), Some(gpus))
            .await
        {
            warn!(node = %self.name, error = %err, "failed to record node online");
            return;
        }
        info!(node = %self.name, ram_mb = info.ram_mb, cpus = info.cpus, "node online");
        self.set_online(true);
    }
}
