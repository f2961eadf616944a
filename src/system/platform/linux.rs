use std::sync::OnceLock;

use super::{PlatformExtensions, TaskInfo};

pub struct Platform;

impl PlatformExtensions for Platform {
    fn task_info(pid: u32) -> Option<TaskInfo> {
        // /proc/{pid}/statm: size resident shared text lib data dt (pages)
        let statm = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
        let mut pages = statm.split_whitespace().map(|f| f.parse::<u64>().ok());
        let size = pages.next()??;
        let resident = pages.next()??;

        let page = page_size();
        Some(TaskInfo {
            resident: resident.saturating_mul(page),
            virtual_size: size.saturating_mul(page),
            cpu_time_ns: cpu_time_ns(pid)?,
        })
    }
}

fn cpu_time_ns(pid: u32) -> Option<u64> {
    let contents = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // comm field may contain spaces and parens, so find the closing )
    let after_comm = contents.rfind(')')? + 1;
    let fields: Vec<&str> = contents[after_comm..].split_whitespace().collect();
    // Fields after comm: state(0) ... utime(11) stime(12)
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let ticks = utime.saturating_add(stime);
    Some(ticks.saturating_mul(1_000_000_000) / clock_ticks())
}

fn page_size() -> u64 {
    static PAGE: OnceLock<u64> = OnceLock::new();
    *PAGE.get_or_init(|| match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as u64,
        _ => 4096,
    })
}

fn clock_ticks() -> u64 {
    static TICKS: OnceLock<u64> = OnceLock::new();
    *TICKS.get_or_init(|| match unsafe { libc::sysconf(libc::_SC_CLK_TCK) } {
        n if n > 0 => n as u64,
        _ => 100,
    })
}
