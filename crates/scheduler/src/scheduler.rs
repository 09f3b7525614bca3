use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cc_broker::BrokerClient;
use cc_node_proxy::NodeProxy;
use cc_store::Store;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::SchedulerError;
use crate::notifications::NotificationHookConfig;

pub(crate) const WAKE_INTERVAL: Duration = Duration::from_secs(60);

/// The single-writer control loop (spec.md §4.4). Owns no batch-mutating state of its own beyond
/// the store: every step either reads a snapshot or CASes a batch, the same discipline the node
/// proxies follow for transitions past `scheduled`.
pub struct Scheduler {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) broker: BrokerClient,
    pub(crate) proxies: HashMap<String, Arc<NodeProxy>>,
    pub(crate) notification_hooks: Vec<NotificationHookConfig>,
    pub(crate) allow_insecure_capabilities: bool,
    pub(crate) http: reqwest::Client,
    wake: Arc<Notify>,
    shutdown: AtomicBool,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        broker: BrokerClient,
        proxies: HashMap<String, Arc<NodeProxy>>,
        notification_hooks: Vec<NotificationHookConfig>,
        allow_insecure_capabilities: bool,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            broker,
            proxies,
            notification_hooks,
            allow_insecure_capabilities,
            http: reqwest::Client::new(),
            wake,
            shutdown: AtomicBool::new(false),
        }
    }

    /// The handle to pass into each [`NodeProxy`] at construction so it can signal this scheduler
    /// without holding a reference back to it (spec.md §9, "cyclic reference" redesign note).
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Flags the control loop to stop after its current pass, rather than mid-write (spec.md §5,
    /// graceful shutdown). Wakes the loop if it is currently parked so it notices promptly.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub async fn run(self: Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = sleep(WAKE_INTERVAL) => {}
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            if let Err(err) = self.run_once().await {
                warn!(error = %err, "scheduler iteration failed, will retry after the wake interval");
            }
        }
    }

    pub(crate) async fn run_once(&self) -> Result<(), SchedulerError> {
        self.void_protected_keys().await?;
        self.post_notifications().await;

        if let Err(err) = self.broker.inspect().await {
            warn!(error = %err, "secret broker health check failed, deferring this pass");
            return Ok(());
        }

        for proxy in self.proxies.values() {
            proxy.notify_check_exited_containers();
        }

        let placed = self.place_batches().await?;
        if placed > 0 {
            info!(placed, "scheduler placed batches this pass");
        }

        for proxy in self.proxies.values() {
            proxy.notify_check_for_batches();
        }

        Ok(())
    }
}
