use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cc_broker::BrokerClient;
use cc_container::ContainerDriver;
use cc_store::Store;
use cc_types::GpuDeviceId;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::time::Instant;

pub(crate) const PULL_WORKERS: usize = 4;
pub(crate) const LAUNCH_WORKERS: usize = 4;
pub(crate) const OFFLINE_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub(crate) const CHECK_FOR_BATCHES_INTERVAL: Duration = Duration::from_secs(20);
pub(crate) const CHECK_EXITED_CONTAINERS_INTERVAL: Duration = Duration::from_secs(1);
pub(crate) const IMAGE_PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Owns everything scoped to one configured worker node: its container runtime handle, the three
/// cooperating loops' wake events, an online latch, and the two bounded worker pools (spec.md
/// §4.5). There is exactly one `NodeProxy` per entry in `controller.docker.nodes`.
pub struct NodeProxy {
    pub name: String,
    pub(crate) driver: Arc<dyn ContainerDriver>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) broker: BrokerClient,
    pub(crate) environment: HashMap<String, String>,
    pub(crate) network: Option<String>,
    pub(crate) gpu_blacklist: Vec<GpuDeviceId>,
    pub(crate) allow_insecure_capabilities: bool,
    pub(crate) image_prune_duration: Duration,
    online: AtomicBool,
    pub(crate) inspection_event: Notify,
    pub(crate) check_for_batches_event: Notify,
    pub(crate) check_exited_containers_event: Notify,
    shutdown: AtomicBool,
    /// Handle into the scheduler's wake event; signalled whenever this proxy frees resources
    /// (a cancellation or an exit), per spec.md §4.5 step 3 of the exit-harvest cycle.
    pub(crate) scheduler_wake: Arc<Notify>,
    pub(crate) pulls: Semaphore,
    pub(crate) launches: Semaphore,
    pub(crate) last_image_prune: Mutex<Option<Instant>>,
}

impl NodeProxy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        driver: Arc<dyn ContainerDriver>,
        store: Arc<dyn Store>,
        broker: BrokerClient,
        environment: HashMap<String, String>,
        network: Option<String>,
        gpu_blacklist: Vec<GpuDeviceId>,
        allow_insecure_capabilities: bool,
        image_prune_duration: Duration,
        scheduler_wake: Arc<Notify>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            driver,
            store,
            broker,
            environment,
            network,
            gpu_blacklist,
            allow_insecure_capabilities,
            image_prune_duration,
            online: AtomicBool::new(false),
            inspection_event: Notify::new(),
            check_for_batches_event: Notify::new(),
            check_exited_containers_event: Notify::new(),
            shutdown: AtomicBool::new(false),
            scheduler_wake,
            pulls: Semaphore::new(PULL_WORKERS),
            launches: Semaphore::new(LAUNCH_WORKERS),
            last_image_prune: Mutex::new(None),
        })
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Parks the check-for-batches/check-exited-containers loops while the node is offline; the
    /// inspection loop is the only writer of the online latch so this just polls it.
    pub(crate) async fn wait_online(&self) {
        while !self.is_online() && !self.is_shutting_down() {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Wakes the inspection loop; used after any container-daemon fault observed elsewhere in
    /// this proxy (spec.md §4.5: "a container-driver or transport error ... triggers the
    /// inspection event").
    pub fn notify_inspection(&self) {
        self.inspection_event.notify_one();
    }

    /// Scheduler-driven wakeups (spec.md §4.4 steps 4 and 6).
    pub fn notify_check_for_batches(&self) {
        self.check_for_batches_event.notify_one();
    }

    pub fn notify_check_exited_containers(&self) {
        self.check_exited_containers_event.notify_one();
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Flags all three loops to stop after their current cycle finishes, rather than mid-write
    /// (spec.md §5, graceful shutdown). Wakes any loop currently parked on an event so it notices
    /// the flag without waiting out its poll interval.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.inspection_event.notify_waiters();
        self.check_for_batches_event.notify_waiters();
        self.check_exited_containers_event.notify_waiters();
    }

    /// Spawns the three cooperating loops as independent tasks.
    pub fn spawn(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(self).inspection_loop()),
            tokio::spawn(Arc::clone(self).check_for_batches_loop()),
            tokio::spawn(Arc::clone(self).check_exited_containers_loop()),
        ]
    }
}
