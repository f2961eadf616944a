//! The refresh loop: owns the sampler, the scanner and the actions, and
//! publishes one [`Snapshot`] per tick through a `watch` channel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::config::Config;
use crate::system::actions::{ActionError, LifecycleActions};
use crate::system::apps::{ApplicationScanner, InstalledApplication, mark_running, running_bundle_ids};
use crate::system::cpu::CpuTracker;
use crate::system::kill::{Signaller, SysinfoSignaller};
use crate::system::process::ProcessEntry;
use crate::system::sampler::{ProcessSampler, ProcessSource, SysinfoSource, own_bundle_id};
use crate::system::snapshot::Snapshot;
use crate::system::trash::{Trash, user_trash};

/// The collaborators a [`Monitor`] drives. [`Monitor::new`] builds the
/// system-backed set; tests substitute their own.
pub struct MonitorParts {
    pub interval: Duration,
    pub sampler: ProcessSampler,
    pub scanner: ApplicationScanner,
    pub actions: LifecycleActions,
}

impl MonitorParts {
    pub fn from_config(config: &Config) -> Self {
        let extension = config.applications.bundle_extension.clone();
        let source: Box<dyn ProcessSource> = Box::new(SysinfoSource::new(extension.clone()));
        let own_id = own_bundle_id(config.processes.self_bundle_id.as_deref(), &extension);
        let policy = config.applications.uninstall_policy();
        let signaller: Box<dyn Signaller> = Box::new(SysinfoSignaller);
        let trash: Box<dyn Trash> = user_trash();

        MonitorParts {
            interval: Duration::from_millis(config.general.refresh_interval_ms.max(1)),
            sampler: ProcessSampler::new(
                source,
                CpuTracker::for_host(),
                config.processes.memory_policy(),
                own_id,
            ),
            scanner: ApplicationScanner::new(
                config.applications.resolved_search_roots(),
                extension,
                config.applications.skip_hidden,
                policy.clone(),
            ),
            actions: LifecycleActions::new(signaller, trash, policy),
        }
    }
}

struct Shared {
    interval: Duration,
    sampler: Arc<Mutex<ProcessSampler>>,
    scanner: Arc<ApplicationScanner>,
    actions: LifecycleActions,
    tx: watch::Sender<Snapshot>,
    /// Held for the whole of a tick so ticks never interleave.
    tick_gate: tokio::sync::Mutex<()>,
    ticks_started: AtomicU64,
    /// Uninstalled bundle paths, tagged with the newest tick that may have
    /// scanned the disk before the bundle left it.
    removed: Mutex<HashMap<PathBuf, u64>>,
    wake: Notify,
}

struct Driver {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Handle to a running (or idle) monitor. Cheap to share behind an `Arc`.
pub struct Monitor {
    shared: Arc<Shared>,
    driver: Mutex<Option<Driver>>,
}

impl Monitor {
    pub fn new(config: &Config) -> Self {
        Self::from_parts(MonitorParts::from_config(config))
    }

    pub fn from_parts(parts: MonitorParts) -> Self {
        let (tx, _) = watch::channel(Snapshot::default());
        Monitor {
            shared: Arc::new(Shared {
                interval: parts.interval,
                sampler: Arc::new(Mutex::new(parts.sampler)),
                scanner: Arc::new(parts.scanner),
                actions: parts.actions,
                tx,
                tick_gate: tokio::sync::Mutex::new(()),
                ticks_started: AtomicU64::new(0),
                removed: Mutex::new(HashMap::new()),
                wake: Notify::new(),
            }),
            driver: Mutex::new(None),
        }
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.tx.borrow().clone()
    }

    /// Receiver that observes every publish.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.tx.subscribe()
    }

    /// Start the periodic driver on the current tokio runtime. The first tick
    /// runs immediately. Calling `start` on a running monitor does nothing.
    pub fn start(&self) {
        let mut driver = lock(&self.driver);
        if driver.as_ref().is_some_and(|d| !d.task.is_finished()) {
            return;
        }
        let (stop, stop_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(drive(shared, stop_rx));
        *driver = Some(Driver { stop, task });
        tracing::debug!(interval_ms = self.shared.interval.as_millis() as u64, "monitor started");
    }

    /// Cancel future ticks. A tick already in flight still publishes.
    pub fn stop(&self) {
        if let Some(driver) = lock(&self.driver).as_ref() {
            let _ = driver.stop.send(true);
        }
    }

    /// Stop and wait for the driver task to finish its current tick.
    pub async fn shutdown(&self) {
        let driver = lock(&self.driver).take();
        if let Some(driver) = driver {
            let _ = driver.stop.send(true);
            if let Err(err) = driver.task.await {
                tracing::warn!(%err, "monitor driver ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.driver)
            .as_ref()
            .is_some_and(|d| !d.task.is_finished() && !*d.stop.borrow())
    }

    /// Run one tick now and return once it has published.
    pub async fn refresh(&self) {
        self.shared.tick().await;
    }

    /// Ask the driver for an early tick without waiting for it.
    pub fn request_refresh(&self) {
        self.shared.wake.notify_one();
    }

    pub fn terminate(&self, process: &ProcessEntry) -> Result<(), ActionError> {
        self.shared.actions.terminate(process)
    }

    pub fn force_kill(&self, process: &ProcessEntry) -> Result<(), ActionError> {
        self.shared.actions.force_kill(process)
    }

    /// Trash the bundle and drop it from the published snapshot right away.
    pub async fn uninstall(&self, app: &InstalledApplication) -> Result<PathBuf, ActionError> {
        let shared = Arc::clone(&self.shared);
        let target = app.clone();
        let outcome =
            tokio::task::spawn_blocking(move || shared.actions.uninstall(&target)).await;
        let destination = match outcome {
            Ok(result) => result?,
            Err(err) => {
                return Err(ActionError::Trash {
                    path: app.path.clone(),
                    source: std::io::Error::other(err.to_string()),
                });
            }
        };
        self.shared.forget(&app.path);
        Ok(destination)
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    async fn tick(&self) {
        let _gate = self.tick_gate.lock().await;
        let generation = self.ticks_started.fetch_add(1, Ordering::SeqCst) + 1;
        self.run_tick(generation)
            .instrument(tracing::debug_span!("monitor.tick", generation))
            .await;
    }

    async fn run_tick(&self, generation: u64) {
        self.tx.send_modify(|s| s.loading = true);

        let sampler = Arc::clone(&self.sampler);
        let scanner = Arc::clone(&self.scanner);
        let (processes, applications) = futures::future::join(
            tokio::task::spawn_blocking(move || lock(&*sampler).sample()),
            tokio::task::spawn_blocking(move || scanner.discover()),
        )
        .await;

        let (processes, mut applications) = match (processes, applications) {
            (Ok(processes), Ok(applications)) => (processes, applications),
            (processes, applications) => {
                for err in [processes.err(), applications.err()].into_iter().flatten() {
                    tracing::warn!(generation, %err, "refresh worker failed; keeping previous snapshot");
                }
                self.tx.send_modify(|s| s.loading = false);
                return;
            }
        };

        mark_running(&mut applications, &running_bundle_ids(&processes));
        {
            let mut removed = lock(&self.removed);
            removed.retain(|_, tick| *tick >= generation);
            applications.retain(|app| !removed.contains_key(&app.path));
        }

        tracing::debug!(
            generation,
            processes = processes.len(),
            applications = applications.len(),
            "publishing snapshot"
        );
        self.tx.send_replace(Snapshot {
            processes,
            applications,
            loading: false,
            generation,
        });
    }

    fn forget(&self, path: &Path) {
        {
            let mut removed = lock(&self.removed);
            let tick = self.ticks_started.load(Ordering::SeqCst);
            removed.insert(path.to_path_buf(), tick);
        }
        self.tx.send_modify(|s| s.applications.retain(|app| app.path != path));
    }
}

async fn drive(shared: Arc<Shared>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(shared.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            _ = interval.tick() => {}
            _ = shared.wake.notified() => interval.reset(),
        }
        if *stop.borrow() {
            break;
        }
        shared.tick().await;
    }
    tracing::debug!("monitor stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
