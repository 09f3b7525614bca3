use std::collections::HashMap;
use std::sync::Arc;

use cc_store::batch_failure;
use cc_types::{BatchState, ImageAuth};
use chrono::Utc;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::proxy::{NodeProxy, CHECK_FOR_BATCHES_INTERVAL, IMAGE_PRUNE_INTERVAL};

/// Key used to group scheduled batches by the image they need pulled, so one failed pull
/// permanently fails every batch waiting on it instead of retrying per-batch (spec.md §4.5 step
/// 2 of the check-for-batches cycle).
#[derive(Clone, PartialEq, Eq, Hash)]
struct ImageKey {
    url: String,
    auth: Option<(String, String)>,
}

impl NodeProxy {
    pub async fn check_for_batches_loop(self: Arc<Self>) {
        loop {
            self.wait_online().await;
            if self.is_shutting_down() {
                return;
            }
            tokio::select! {
                _ = self.check_for_batches_event.notified() => {}
                _ = sleep(CHECK_FOR_BATCHES_INTERVAL) => {}
            }
            if self.is_shutting_down() {
                return;
            }
            if !self.is_online() {
                continue;
            }
            if let Err(err) = self.run_check_for_batches_cycle().await {
                warn!(node = %self.name, error = %err, "check-for-batches cycle failed");
                if err.triggers_inspection() {
                    self.notify_inspection();
                }
            }
            self.maybe_prune_images().await;
        }
    }

    pub(crate) async fn run_check_for_batches_cycle(&self) -> Result<(), crate::error::ProxyError> {
        let batches = self.store.list_batches_by_node_and_states(&self.name, &[BatchState::Scheduled]).await?;
        if batches.is_empty() {
            return Ok(());
        }

        let mut groups: HashMap<ImageKey, Vec<String>> = HashMap::new();
        let mut images: HashMap<ImageKey, (String, Option<ImageAuth>)> = HashMap::new();
        for batch in &batches {
            let experiment = match self.store.find_experiment(&batch.experiment_id).await? {
                Some(experiment) => experiment,
                None => {
                    batch_failure(self.store.as_ref(), &batch.id, batch.state, Some("experiment not found".into()), true)
                        .await?;
                    continue;
                }
            };
            let key = ImageKey {
                url: experiment.image.url.clone(),
                auth: experiment.image.auth.as_ref().map(|a| (a.username.clone(), a.password.clone())),
            };
            images.entry(key.clone()).or_insert_with(|| (experiment.image.url.clone(), experiment.image.auth.clone()));
            groups.entry(key).or_default().push(batch.id.clone());
        }

        let pull_outcomes = futures::future::join_all(groups.into_iter().map(|(key, batch_ids)| {
            let (url, auth) = images.get(&key).cloned().expect("image recorded alongside its group");
            async move {
                let _permit = self.pulls.acquire().await.expect("pulls semaphore never closed");
                let container_auth = auth.as_ref().map(|a| cc_container::ImageAuth {
                    username: a.username.clone(),
                    password: a.password.clone(),
                });
                let result = self.driver.pull(&url, container_auth.as_ref()).await;
                (url, batch_ids, result)
            }
        }))
        .await;

        let mut launchable = Vec::new();
        for (url, batch_ids, result) in pull_outcomes {
            match result {
                Ok(()) => launchable.extend(batch_ids),
                Err(err) => {
                    warn!(node = %self.name, image = %url, error = %err, "image pull failed, failing dependent batches");
                    for batch_id in batch_ids {
                        batch_failure(
                            self.store.as_ref(),
                            &batch_id,
                            BatchState::Scheduled,
                            Some(format!("failed to pull image {url}: {err}")),
                            true,
                        )
                        .await?;
                    }
                }
            }
        }

        futures::future::join_all(launchable.into_iter().map(|batch_id| async move {
            let _permit = self.launches.acquire().await.expect("launches semaphore never closed");
            if let Err(err) = self.run_batch(&batch_id).await {
                warn!(node = %self.name, batch = %batch_id, error = %err, "batch execution pipeline failed");
            }
        }))
        .await;

        Ok(())
    }

    /// Best-effort image pruning, at most once per hour per node (spec.md §4.5).
    async fn maybe_prune_images(&self) {
        let mut last = self.last_image_prune.lock().await;
        let now = Instant::now();
        if let Some(last) = *last {
            if now.duration_since(last) < IMAGE_PRUNE_INTERVAL {
                return;
            }
        }
        *last = Some(now);
        drop(last);

        let images = match self.store.distinct_image_urls_with_auth().await {
            Ok(images) => images,
            Err(err) => {
                warn!(node = %self.name, error = %err, "failed to list images for pruning");
                return;
            }
        };
        for (url, _auth) in images {
            let recent = match self.store.most_recent_registration_for_image(&url).await {
                Ok(recent) => recent,
                Err(err) => {
                    warn!(node = %self.name, image = %url, error = %err, "failed to check image registration age");
                    continue;
                }
            };
            let age = recent.map(|t| Utc::now().signed_duration_since(t));
            let stale = match age {
                Some(age) => age.to_std().unwrap_or_default() > self.image_prune_duration,
                None => true,
            };
            if !stale {
                continue;
            }
            if let Err(err) = self.driver.prune_image(&url).await {
                debug!(node = %self.name, image = %url, error = %err, "image prune skipped");
            }
        }
    }
}
