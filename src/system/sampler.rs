use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, Uid, UpdateKind};

use super::bundle::{self, BundleInfo};
use super::cpu::CpuTracker;
use super::platform;
use super::process::{MemoryPolicy, MemoryReading, ProcessEntry, sort_by_name};

/// How visible a process is to the person at the keyboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationPolicy {
    /// Runs from an application bundle.
    Regular,
    /// Runs from a bundle marked `LSUIElement` or `LSBackgroundOnly`.
    Accessory,
    /// Anything outside an application bundle, plus threads and other
    /// users' processes. Never listed.
    Prohibited,
}

/// Only processes launched from an identified application bundle owned by
/// the current user are user-facing. Shells, daemons and command-line tools
/// are not, on any platform.
pub fn activation_policy(
    has_exe: bool,
    is_thread: bool,
    foreign: bool,
    bundle: Option<&BundleInfo>,
) -> ActivationPolicy {
    if !has_exe || is_thread || foreign {
        return ActivationPolicy::Prohibited;
    }
    match bundle {
        Some(info) if info.background => ActivationPolicy::Accessory,
        Some(_) => ActivationPolicy::Regular,
        None => ActivationPolicy::Prohibited,
    }
}

/// One process as reported by a [`ProcessSource`], before any policy applies.
#[derive(Clone, Debug)]
pub struct RawProcess {
    pub pid: u32,
    pub name: Option<String>,
    pub bundle_id: Option<String>,
    pub icon: Option<PathBuf>,
    pub policy: ActivationPolicy,
    pub cpu_time_ns: Option<u64>,
    pub memory: MemoryReading,
}

/// Enumerates processes. Implemented over `sysinfo` for the real system and
/// by scripted fakes in tests.
pub trait ProcessSource: Send {
    fn processes(&mut self) -> Vec<RawProcess>;
}

pub struct SysinfoSource {
    sys: System,
    own_uid: Option<Uid>,
    bundle_extension: String,
    bundles: HashMap<PathBuf, Option<BundleInfo>>,
}

impl SysinfoSource {
    pub fn new(bundle_extension: impl Into<String>) -> Self {
        let mut sys = System::new();
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, Self::refresh_kind());
        let own_uid = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| sys.process(pid))
            .and_then(|p| p.user_id().cloned());
        SysinfoSource {
            sys,
            own_uid,
            bundle_extension: bundle_extension.into(),
            bundles: HashMap::new(),
        }
    }

    fn refresh_kind() -> ProcessRefreshKind {
        ProcessRefreshKind::nothing()
            .with_cpu()
            .with_memory()
            .with_exe(UpdateKind::OnlyIfNotSet)
            .with_user(UpdateKind::OnlyIfNotSet)
    }

    fn bundle_for(&mut self, exe: &Path) -> Option<BundleInfo> {
        let extension = &self.bundle_extension;
        self.bundles
            .entry(exe.to_path_buf())
            .or_insert_with(|| bundle::bundle_for_executable(exe, extension))
            .clone()
    }
}

impl ProcessSource for SysinfoSource {
    fn processes(&mut self) -> Vec<RawProcess> {
        self.sys
            .refresh_processes_specifics(ProcessesToUpdate::All, true, Self::refresh_kind());

        let listed: Vec<(Pid, Option<PathBuf>, bool, bool, String, u64, u64)> = self
            .sys
            .processes()
            .iter()
            .map(|(pid, process)| {
                let foreign = match (&self.own_uid, process.user_id()) {
                    (Some(own), Some(uid)) => own != uid,
                    _ => false,
                };
                (
                    *pid,
                    process.exe().map(Path::to_path_buf),
                    process.thread_kind().is_some(),
                    foreign,
                    process.name().to_string_lossy().into_owned(),
                    process.memory(),
                    process.accumulated_cpu_time(),
                )
            })
            .collect();

        let live_exes: HashSet<PathBuf> = listed.iter().filter_map(|l| l.1.clone()).collect();
        self.bundles.retain(|exe, _| live_exes.contains(exe));

        let mut out = Vec::with_capacity(listed.len());
        for (pid, exe, is_thread, foreign, name, resident, cpu_ms) in listed {
            let bundle = exe.as_deref().and_then(|exe| self.bundle_for(exe));
            let policy = activation_policy(exe.is_some(), is_thread, foreign, bundle.as_ref());
            if policy == ActivationPolicy::Prohibited {
                continue;
            }

            let pid = pid.as_u32();
            let detailed = platform::task_info(pid);
            let memory = match detailed {
                Some(info) => MemoryReading::Detailed {
                    resident: info.resident,
                    virtual_size: info.virtual_size,
                },
                None if resident > 0 => MemoryReading::Resident(resident),
                None => MemoryReading::Unavailable,
            };
            let cpu_time_ns = detailed
                .map(|info| info.cpu_time_ns)
                .or_else(|| Some(cpu_ms.saturating_mul(1_000_000)));

            let (bundle_id, icon, display_name) = match bundle {
                Some(info) => (info.identifier, info.icon, info.name),
                None => (None, None, None),
            };
            let name = display_name.or_else(|| (!name.trim().is_empty()).then_some(name));

            out.push(RawProcess {
                pid,
                name,
                bundle_id,
                icon,
                policy,
                cpu_time_ns,
                memory,
            });
        }
        out
    }
}

pub struct ProcessSampler {
    source: Box<dyn ProcessSource>,
    tracker: CpuTracker,
    memory_policy: MemoryPolicy,
    own_pid: u32,
    own_bundle_id: Option<String>,
}

impl ProcessSampler {
    pub fn new(
        source: Box<dyn ProcessSource>,
        tracker: CpuTracker,
        memory_policy: MemoryPolicy,
        own_bundle_id: Option<String>,
    ) -> Self {
        ProcessSampler {
            source,
            tracker,
            memory_policy,
            own_pid: std::process::id(),
            own_bundle_id,
        }
    }

    pub fn tracker(&self) -> &CpuTracker {
        &self.tracker
    }

    pub fn sample(&mut self) -> Vec<ProcessEntry> {
        self.sample_at(Instant::now())
    }

    /// One sampling pass with `now` as the measurement time for every pid.
    pub fn sample_at(&mut self, now: Instant) -> Vec<ProcessEntry> {
        let _span = tracing::debug_span!("sampler.sample").entered();

        let mut entries = Vec::new();
        for raw in self.source.processes() {
            if raw.policy == ActivationPolicy::Prohibited {
                continue;
            }
            let Some(name) = raw.name else {
                tracing::debug!(pid = raw.pid, "skipping process without a name");
                continue;
            };

            let cpu_percent = match raw.cpu_time_ns {
                Some(ns) => self.tracker.sample(raw.pid, ns, now),
                None => 0.0,
            };
            let killable = raw.pid != self.own_pid
                && match (&raw.bundle_id, &self.own_bundle_id) {
                    (Some(theirs), Some(ours)) => theirs != ours,
                    _ => true,
                };

            entries.push(ProcessEntry {
                pid: raw.pid,
                name,
                bundle_id: raw.bundle_id,
                cpu_percent,
                memory_bytes: self.memory_policy.estimate(raw.memory),
                icon: raw.icon,
                killable,
            });
        }

        let live: HashSet<u32> = entries.iter().map(|p| p.pid).collect();
        self.tracker.retain(&live);

        sort_by_name(&mut entries);
        tracing::debug!(count = entries.len(), "sampled processes");
        entries
    }
}

/// The monitor's own bundle identifier: the configured override, else the
/// identifier of the bundle enclosing the running executable.
pub fn own_bundle_id(configured: Option<&str>, bundle_extension: &str) -> Option<String> {
    if let Some(id) = configured {
        return Some(id.to_string());
    }
    let exe = std::env::current_exe().ok()?;
    bundle::bundle_for_executable(&exe, bundle_extension).and_then(|info| info.identifier)
}
