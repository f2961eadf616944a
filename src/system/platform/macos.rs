use std::sync::OnceLock;

use libproc::libproc::proc_pid::pidinfo;
use libproc::libproc::task_info::TaskAllInfo;

use super::{PlatformExtensions, TaskInfo};

pub struct Platform;

impl PlatformExtensions for Platform {
    fn task_info(pid: u32) -> Option<TaskInfo> {
        let info = pidinfo::<TaskAllInfo>(pid as i32, 0).ok()?;
        let task = info.ptinfo;
        // pti_total_* are mach absolute time units, not nanoseconds, on arm64.
        let (numer, denom) = timebase();
        let ticks = task.pti_total_user.saturating_add(task.pti_total_system);
        let cpu_time_ns = (ticks as u128 * numer as u128 / denom as u128) as u64;
        Some(TaskInfo {
            resident: task.pti_resident_size,
            virtual_size: task.pti_virtual_size,
            cpu_time_ns,
        })
    }
}

#[allow(deprecated)]
fn timebase() -> (u32, u32) {
    static TIMEBASE: OnceLock<(u32, u32)> = OnceLock::new();
    *TIMEBASE.get_or_init(|| {
        let mut info = libc::mach_timebase_info_data_t { numer: 0, denom: 0 };
        let rc = unsafe { libc::mach_timebase_info(&mut info) };
        if rc != 0 || info.numer == 0 || info.denom == 0 {
            (1, 1)
        } else {
            (info.numer, info.denom)
        }
    })
}
