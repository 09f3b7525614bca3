mod batch_failure;
mod error;
mod gateway;
mod in_memory;

pub use batch_failure::batch_failure;
pub use error::StoreError;
pub use gateway::Store;
pub use in_memory::InMemoryStore;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cc_types::{
        Batch, BatchState, ContainerImage, Experiment, ExecutionSettings, ResourceSettings,
    };
    use chrono::Utc;

    use super::*;

    fn experiment(id: &str, retry_if_failed: bool) -> Experiment {
        Experiment {
            id: id.to_string(),
            owner: "alice".to_string(),
            registration_time: Utc::now(),
            image: ContainerImage { url: "registry.example/img:latest".to_string(), auth: None },
            resources: ResourceSettings { ram_mb: 1024, gpus: vec![] },
            execution: ExecutionSettings { retry_if_failed, batch_concurrency_limit: 4 },
            cli: cc_types::CliContract {
                base_command: vec![],
                inputs: vec![],
                outputs: vec![],
                stdout_file: None,
                stderr_file: None,
            },
            protected_keys_voided: false,
            secret_keys: vec![],
        }
    }

    async fn seed(retry_if_failed: bool) -> (InMemoryStore, Batch) {
        let store = InMemoryStore::new();
        store.insert_experiment(experiment("exp-1", retry_if_failed)).await.unwrap();
        let mut batch = Batch::new("batch-1".to_string(), "exp-1".to_string(), "alice".to_string(), Utc::now());
        batch.state = BatchState::Processing;
        batch.node = Some("node-a".to_string());
        store.insert_batch(batch.clone()).await.unwrap();
        (store, batch)
    }

    #[tokio::test]
    async fn cas_batch_rejects_stale_expected_state() {
        let (store, _batch) = seed(true).await;
        let applied = store
            .cas_batch("batch-1", BatchState::Succeeded, Box::new(|b| b.state = BatchState::Failed))
            .await
            .unwrap();
        assert!(!applied);
        let batch = store.find_batch("batch-1").await.unwrap().unwrap();
        assert_eq!(batch.state, BatchState::Processing);
    }

    #[tokio::test]
    async fn batch_failure_retries_when_eligible() {
        let (store, _batch) = seed(true).await;
        let changed = batch_failure(&store, "batch-1", BatchState::Processing, Some("oom".into()), false)
            .await
            .unwrap();
        assert!(changed);
        let batch = store.find_batch("batch-1").await.unwrap().unwrap();
        assert_eq!(batch.state, BatchState::Registered);
        assert!(batch.node.is_none());
        assert_eq!(batch.history.last().unwrap().debug_info.as_deref(), Some("oom"));
    }

    #[tokio::test]
    async fn batch_failure_buries_when_retry_disabled_by_experiment() {
        let (store, _batch) = seed(false).await;
        let changed = batch_failure(&store, "batch-1", BatchState::Processing, None, false).await.unwrap();
        assert!(changed);
        let batch = store.find_batch("batch-1").await.unwrap().unwrap();
        assert_eq!(batch.state, BatchState::Failed);
    }

    #[tokio::test]
    async fn batch_failure_buries_after_second_attempt() {
        let (store, mut batch) = seed(true).await;
        batch.attempts = 2;
        store.insert_batch(batch).await.unwrap();
        let changed = batch_failure(&store, "batch-1", BatchState::Processing, None, false).await.unwrap();
        assert!(changed);
        let batch = store.find_batch("batch-1").await.unwrap().unwrap();
        assert_eq!(batch.state, BatchState::Failed);
    }

    #[tokio::test]
    async fn batch_failure_is_idempotent_once_state_moved_on() {
        let (store, _batch) = seed(true).await;
        assert!(batch_failure(&store, "batch-1", BatchState::Processing, None, false).await.unwrap());
        // second call against the same (now stale) expected_state is a no-op, not a double-bury
        let changed = batch_failure(&store, "batch-1", BatchState::Processing, None, false).await.unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn list_live_batches_includes_scheduled_and_processing_only() {
        let store = InMemoryStore::new();
        store.insert_experiment(experiment("exp-1", true)).await.unwrap();
        for (id, state) in [
            ("b-sched", BatchState::Scheduled),
            ("b-proc", BatchState::Processing),
            ("b-done", BatchState::Succeeded),
        ] {
            let mut batch = Batch::new(id.to_string(), "exp-1".to_string(), "alice".to_string(), Utc::now());
            batch.state = state;
            batch.node = Some("node-a".to_string());
            store.insert_batch(batch).await.unwrap();
        }
        let live = store.list_live_batches().await.unwrap();
        assert_eq!(live.len(), 2);
    }

    #[tokio::test]
    async fn store_is_usable_behind_a_trait_object() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        store.insert_experiment(experiment("exp-1", true)).await.unwrap();
        assert!(store.find_experiment("exp-1").await.unwrap().is_some());
    }
}
