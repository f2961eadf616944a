use std::fmt;
use std::io;
use std::path::PathBuf;

use sysinfo::Signal;

use super::apps::{InstalledApplication, UninstallPolicy};
use super::kill::{KillResult, Signaller};
use super::process::ProcessEntry;
use super::trash::Trash;

#[derive(Debug)]
pub enum ActionError {
    NotKillable { pid: u32 },
    NotUninstallable { path: PathBuf },
    ProcessNotFound { pid: u32 },
    SignalFailed { pid: u32, message: String },
    PathUnavailable { path: PathBuf, source: io::Error },
    Trash { path: PathBuf, source: io::Error },
}

impl ActionError {
    /// True when the action was refused before anything was attempted.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ActionError::NotKillable { .. } | ActionError::NotUninstallable { .. }
        )
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionError::NotKillable { pid } => write!(f, "PID {pid} may not be terminated"),
            ActionError::NotUninstallable { path } => {
                write!(f, "{} is protected and cannot be uninstalled", path.display())
            }
            ActionError::ProcessNotFound { pid } => write!(f, "PID {pid} is no longer running"),
            ActionError::SignalFailed { message, .. } => f.write_str(message),
            ActionError::PathUnavailable { path, source } => {
                write!(f, "cannot resolve {}: {source}", path.display())
            }
            ActionError::Trash { path, source } => {
                write!(f, "failed to move {} to the trash: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ActionError::PathUnavailable { source, .. } | ActionError::Trash { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

/// Terminate, force-kill and uninstall, each guarded by the entity's flag
/// and, for uninstall, by the live path.
pub struct LifecycleActions {
    signaller: Box<dyn Signaller>,
    trash: Box<dyn Trash>,
    policy: UninstallPolicy,
}

impl LifecycleActions {
    pub fn new(
        signaller: Box<dyn Signaller>,
        trash: Box<dyn Trash>,
        policy: UninstallPolicy,
    ) -> Self {
        LifecycleActions {
            signaller,
            trash,
            policy,
        }
    }

    pub fn terminate(&self, process: &ProcessEntry) -> Result<(), ActionError> {
        self.signal(process, Signal::Term)
    }

    pub fn force_kill(&self, process: &ProcessEntry) -> Result<(), ActionError> {
        self.signal(process, Signal::Kill)
    }

    fn signal(&self, process: &ProcessEntry, signal: Signal) -> Result<(), ActionError> {
        if !process.killable {
            tracing::warn!(pid = process.pid, name = %process.name, "refusing to signal protected process");
            return Err(ActionError::NotKillable { pid: process.pid });
        }
        match self.signaller.send(process.pid, signal) {
            KillResult::Success(pid, signal_name) => {
                tracing::info!(pid, signal = signal_name, name = %process.name, "signal sent");
                Ok(())
            }
            KillResult::NotFound(pid) => {
                tracing::warn!(pid, "process vanished before it could be signalled");
                Err(ActionError::ProcessNotFound { pid })
            }
            KillResult::Failed(pid, message) => {
                tracing::warn!(pid, %message, "signal failed");
                Err(ActionError::SignalFailed { pid, message })
            }
        }
    }

    /// Move the bundle to the trash and return its new location.
    pub fn uninstall(&self, app: &InstalledApplication) -> Result<PathBuf, ActionError> {
        if !app.can_uninstall {
            tracing::warn!(path = %app.path.display(), "refusing to uninstall protected bundle");
            return Err(ActionError::NotUninstallable {
                path: app.path.clone(),
            });
        }
        match self.policy.allows_live(&app.path) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(path = %app.path.display(), "bundle now resolves into a protected root");
                return Err(ActionError::NotUninstallable {
                    path: app.path.clone(),
                });
            }
            Err(source) => {
                return Err(ActionError::PathUnavailable {
                    path: app.path.clone(),
                    source,
                });
            }
        }

        match self.trash.trash(&app.path) {
            Ok(destination) => {
                tracing::info!(
                    bundle_id = %app.bundle_id,
                    from = %app.path.display(),
                    to = %destination.display(),
                    "application moved to trash"
                );
                Ok(destination)
            }
            Err(source) => {
                tracing::warn!(path = %app.path.display(), %source, "uninstall failed");
                Err(ActionError::Trash {
                    path: app.path.clone(),
                    source,
                })
            }
        }
    }
}
