/// Per-process figures the platform can report beyond what `sysinfo` gives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    pub resident: u64,
    pub virtual_size: u64,
    /// User plus system time, in nanoseconds.
    pub cpu_time_ns: u64,
}

pub trait PlatformExtensions {
    fn task_info(pid: u32) -> Option<TaskInfo>;
}

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod other;

#[cfg(target_os = "linux")]
use linux as platform_impl;
#[cfg(target_os = "macos")]
use macos as platform_impl;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
use other as platform_impl;

pub fn task_info(pid: u32) -> Option<TaskInfo> {
    platform_impl::Platform::task_info(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_info_does_not_panic_for_current_pid() {
        let _ = task_info(std::process::id());
        let _ = task_info(u32::MAX);
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    #[test]
    fn current_process_has_resident_memory() {
        let info = task_info(std::process::id()).expect("task info for self");
        assert!(info.resident > 0);
        assert!(info.virtual_size >= info.resident);
    }
}
