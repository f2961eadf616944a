use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KillResult {
    Success(u32, &'static str),
    Failed(u32, String),
    NotFound(u32),
}

pub fn signal_name(signal: Signal) -> &'static str {
    match signal {
        Signal::Term => "SIGTERM",
        Signal::Kill => "SIGKILL",
        _ => "signal",
    }
}

pub fn kill_process(sys: &System, pid: u32, signal: Signal) -> KillResult {
    match sys.process(Pid::from_u32(pid)) {
        Some(process) => deliver(pid, signal, process.kill_with(signal), || process.kill()),
        None => KillResult::NotFound(pid),
    }
}

/// Map the outcome of `kill_with` to a result. `sent` is `None` when the
/// platform cannot deliver `signal`; only a kill request may then fall back
/// to the platform's hard kill, so a termination request never escalates.
fn deliver(
    pid: u32,
    signal: Signal,
    sent: Option<bool>,
    hard_kill: impl FnOnce() -> bool,
) -> KillResult {
    let signal_name = signal_name(signal);
    match sent {
        Some(true) => KillResult::Success(pid, signal_name),
        Some(false) => {
            KillResult::Failed(pid, format!("Failed to send {signal_name} to PID {pid}"))
        }
        None if signal == Signal::Kill => {
            if hard_kill() {
                KillResult::Success(pid, signal_name)
            } else {
                KillResult::Failed(pid, format!("Failed to kill PID {pid} (permission denied?)"))
            }
        }
        None => KillResult::Failed(pid, format!("{signal_name} unsupported on this platform")),
    }
}

/// Delivers termination signals by pid.
pub trait Signaller: Send + Sync {
    fn send(&self, pid: u32, signal: Signal) -> KillResult;
}

/// Looks the pid up afresh on every call so a stale process table never
/// decides whether the target exists.
#[derive(Debug, Default)]
pub struct SysinfoSignaller;

impl Signaller for SysinfoSignaller {
    fn send(&self, pid: u32, signal: Signal) -> KillResult {
        let mut sys = System::new();
        let pids = [Pid::from_u32(pid)];
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::nothing(),
        );
        kill_process(&sys, pid, signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn delivered_signal_reports_its_name() {
        let result = deliver(7, Signal::Term, Some(true), || unreachable!());
        assert_eq!(result, KillResult::Success(7, "SIGTERM"));
        assert!(matches!(
            deliver(7, Signal::Kill, Some(false), || unreachable!()),
            KillResult::Failed(7, _)
        ));
    }

    #[test]
    fn unsupported_term_never_escalates() {
        let hard_killed = Cell::new(false);
        let result = deliver(7, Signal::Term, None, || {
            hard_killed.set(true);
            true
        });
        assert_eq!(
            result,
            KillResult::Failed(7, "SIGTERM unsupported on this platform".to_string())
        );
        assert!(!hard_killed.get());
    }

    #[test]
    fn unsupported_kill_falls_back_to_hard_kill() {
        let hard_killed = Cell::new(false);
        let result = deliver(7, Signal::Kill, None, || {
            hard_killed.set(true);
            true
        });
        assert_eq!(result, KillResult::Success(7, "SIGKILL"));
        assert!(hard_killed.get());
        assert!(matches!(
            deliver(7, Signal::Kill, None, || false),
            KillResult::Failed(7, _)
        ));
    }
}
