mod error;
mod notifications;
mod placement;
mod scheduler;
mod voiding;

pub use error::SchedulerError;
pub use notifications::NotificationHookConfig;
pub use scheduler::Scheduler;

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use cc_broker::BrokerClient;
    use cc_store::{InMemoryStore, Store};
    use cc_types::{
        Batch, BatchState, CliContract, ConnectorValue, ContainerImage, Experiment, ExecutionSettings, GpuDevice,
        GpuRequirement, Node, NodeState, ResourceSettings,
    };
    use chrono::Utc;
    use tokio::sync::Notify;

    use super::*;

    fn experiment(id: &str, ram_mb: u64, gpus: Vec<GpuRequirement>, concurrency_limit: u32) -> Experiment {
        Experiment {
            id: id.to_string(),
            owner: "alice".to_string(),
            registration_time: Utc::now(),
            image: ContainerImage { url: "docker.io/busybox:latest".to_string(), auth: None },
            resources: ResourceSettings { ram_mb, gpus },
            execution: ExecutionSettings { retry_if_failed: true, batch_concurrency_limit: concurrency_limit },
            cli: CliContract { base_command: vec![], inputs: vec![], outputs: vec![], stdout_file: None, stderr_file: None },
            protected_keys_voided: false,
            secret_keys: vec![],
        }
    }

    fn online_node(name: &str, ram_mb: u64, gpus: Vec<GpuDevice>) -> Node {
        let mut node = Node::new(name.to_string());
        node.state = NodeState::Online;
        node.ram_mb = Some(ram_mb);
        node.cpus = Some(4);
        node.gpus = gpus;
        node
    }

    fn registered_batch(id: &str, experiment_id: &str) -> Batch {
        Batch::new(id.to_string(), experiment_id.to_string(), "alice".to_string(), Utc::now())
    }

    fn scheduler(store: Arc<InMemoryStore>) -> Scheduler {
        let broker = BrokerClient::new("http://127.0.0.1:0", "user", "pass").unwrap();
        Scheduler::new(store, broker, HashMap::new(), Vec::new(), false, Arc::new(Notify::new()))
    }

    #[tokio::test]
    async fn places_a_fitting_batch_onto_the_only_node() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_experiment(experiment("exp-1", 512, vec![], 4)).await.unwrap();
        store.upsert_node(online_node("node-a", 2048, vec![])).await.unwrap();
        store.insert_batch(registered_batch("batch-1", "exp-1")).await.unwrap();

        let sched = scheduler(Arc::clone(&store));
        let placed = sched.place_batches().await.unwrap();
        assert_eq!(placed, 1);

        let batch = store.find_batch("batch-1").await.unwrap().unwrap();
        assert_eq!(batch.state, BatchState::Scheduled);
        assert_eq!(batch.node.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn prefers_the_zero_gpu_node_when_no_gpu_is_required() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_experiment(experiment("exp-1", 256, vec![], 4)).await.unwrap();
        store.upsert_node(online_node("gpu-node", 4096, vec![GpuDevice { id: 0, vram: 16000, vendor: "nvidia".into() }])).await.unwrap();
        store.upsert_node(online_node("cpu-node", 4096, vec![])).await.unwrap();
        store.insert_batch(registered_batch("batch-1", "exp-1")).await.unwrap();

        let sched = scheduler(Arc::clone(&store));
        sched.place_batches().await.unwrap();

        let batch = store.find_batch("batch-1").await.unwrap().unwrap();
        assert_eq!(batch.node.as_deref(), Some("cpu-node"));
    }

    #[tokio::test]
    async fn permanently_fails_a_batch_no_node_can_ever_satisfy() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_experiment(experiment("exp-1", 1_000_000_000, vec![], 4)).await.unwrap();
        store.upsert_node(online_node("node-a", 2048, vec![])).await.unwrap();
        store.insert_batch(registered_batch("batch-1", "exp-1")).await.unwrap();

        let sched = scheduler(Arc::clone(&store));
        sched.place_batches().await.unwrap();

        let batch = store.find_batch("batch-1").await.unwrap().unwrap();
        assert_eq!(batch.state, BatchState::Failed);
    }

    #[tokio::test]
    async fn respects_per_experiment_concurrency_limit() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_experiment(experiment("exp-1", 256, vec![], 1)).await.unwrap();
        store.upsert_node(online_node("node-a", 4096, vec![])).await.unwrap();
        let mut running = registered_batch("batch-running", "exp-1");
        running.state = BatchState::Processing;
        running.node = Some("node-a".to_string());
        store.insert_batch(running).await.unwrap();
        store.insert_batch(registered_batch("batch-2", "exp-1")).await.unwrap();

        let sched = scheduler(Arc::clone(&store));
        let placed = sched.place_batches().await.unwrap();
        assert_eq!(placed, 0);

        let batch = store.find_batch("batch-2").await.unwrap().unwrap();
        assert_eq!(batch.state, BatchState::Registered);
    }

    #[tokio::test]
    async fn fails_mount_requiring_batch_when_insecure_capabilities_disallowed() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_experiment(experiment("exp-1", 256, vec![], 4)).await.unwrap();
        store.upsert_node(online_node("node-a", 4096, vec![])).await.unwrap();
        let mut batch = registered_batch("batch-1", "exp-1");
        batch.inputs.insert("in".to_string(), ConnectorValue { value: serde_json::json!("s3://bucket/key"), mount: true });
        store.insert_batch(batch).await.unwrap();

        let sched = scheduler(Arc::clone(&store));
        sched.place_batches().await.unwrap();

        let batch = store.find_batch("batch-1").await.unwrap().unwrap();
        assert_eq!(batch.state, BatchState::Failed);
    }

    #[tokio::test]
    async fn void_protected_keys_sets_the_batch_flag_once_terminal() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_experiment(experiment("exp-1", 256, vec![], 4)).await.unwrap();
        let mut batch = registered_batch("batch-1", "exp-1");
        batch.state = BatchState::Succeeded;
        store.insert_batch(batch).await.unwrap();

        let sched = scheduler(Arc::clone(&store));
        sched.void_protected_keys().await.unwrap();

        let batch = store.find_batch("batch-1").await.unwrap().unwrap();
        assert!(batch.protected_keys_voided);
    }
}
