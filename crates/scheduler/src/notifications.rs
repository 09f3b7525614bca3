use serde::Serialize;
use tracing::warn;

use crate::scheduler::Scheduler;

#[derive(Debug, Clone)]
pub struct NotificationHookConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
struct NotificationBatch {
    #[serde(rename = "batchId")]
    batch_id: String,
    state: String,
}

#[derive(Debug, Serialize)]
struct NotificationBody {
    batches: Vec<NotificationBatch>,
}

impl Scheduler {
    /// Step 2: POST every terminal, not-yet-notified batch to every configured hook. A batch is
    /// only marked sent once every hook accepted it this pass; a hook outage leaves it pending
    /// for the next iteration instead of silently dropping the notification.
    pub(crate) async fn post_notifications(&self) {
        if self.notification_hooks.is_empty() {
            return;
        }
        let pending = match self.store.list_terminal_unnotified_batches().await {
            Ok(batches) => batches,
            Err(err) => {
                warn!(error = %err, "failed to list unnotified batches");
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        let body = NotificationBody {
            batches: pending.iter().map(|b| NotificationBatch { batch_id: b.id.clone(), state: b.state.to_string() }).collect(),
        };

        let mut all_delivered = true;
        for hook in &self.notification_hooks {
            let mut request = self.http.post(&hook.url).json(&body);
            if let Some(username) = &hook.username {
                request = request.basic_auth(username, hook.password.as_deref());
            }
            match request.send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    all_delivered = false;
                    warn!(hook = %hook.url, status = %response.status(), "notification hook rejected the batch");
                }
                Err(err) => {
                    all_delivered = false;
                    warn!(hook = %hook.url, error = %err, "notification hook unreachable");
                }
            }
        }

        if all_delivered {
            let ids: Vec<String> = pending.iter().map(|b| b.id.clone()).collect();
            if let Err(err) = self.store.mark_notifications_sent(&ids).await {
                warn!(error = %err, "failed to mark notifications sent");
            }
        }
    }
}
