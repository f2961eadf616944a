use std::collections::{HashMap, HashSet};
use std::time::Instant;

use sysinfo::{CpuRefreshKind, RefreshKind, System};

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Turns cumulative per-process CPU time into a percentage of the whole
/// machine over the interval since the previous sample of the same pid.
#[derive(Debug)]
pub struct CpuTracker {
    previous: HashMap<u32, (u64, Instant)>,
    logical_cpus: f64,
}

impl CpuTracker {
    pub fn new(logical_cpus: f64) -> Self {
        let logical_cpus = if logical_cpus.is_finite() && logical_cpus >= 1.0 {
            logical_cpus
        } else {
            1.0
        };
        Self {
            previous: HashMap::new(),
            logical_cpus,
        }
    }

    /// Tracker sized for the current machine.
    pub fn for_host() -> Self {
        Self::new(logical_cpu_count())
    }

    pub fn logical_cpus(&self) -> f64 {
        self.logical_cpus
    }

    pub fn sample(&mut self, pid: u32, cumulative_ns: u64, now: Instant) -> f64 {
        let Some((prev_ns, prev_at)) = self.previous.insert(pid, (cumulative_ns, now)) else {
            return 0.0;
        };

        // Out-of-order or identical timestamps yield no duration.
        let Some(elapsed) = now.checked_duration_since(prev_at) else {
            return 0.0;
        };
        let delta_time = elapsed.as_secs_f64();
        if delta_time <= 0.0 {
            return 0.0;
        }

        let delta_cpu = cumulative_ns.saturating_sub(prev_ns) as f64;
        let percent = (delta_cpu / NANOS_PER_SEC) / delta_time * 100.0 / self.logical_cpus;
        percent.clamp(0.0, 100.0)
    }

    /// Drop state for every pid not in `live`.
    pub fn retain(&mut self, live: &HashSet<u32>) {
        self.previous.retain(|pid, _| live.contains(pid));
    }

    pub fn is_tracking(&self, pid: u32) -> bool {
        self.previous.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }
}

impl Default for CpuTracker {
    fn default() -> Self {
        Self::for_host()
    }
}

/// Number of logical CPUs, or 1.0 when the platform reports none.
pub fn logical_cpu_count() -> f64 {
    let sys = System::new_with_specifics(
        RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing()),
    );
    match sys.cpus().len() {
        0 => 1.0,
        n => n as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SEC: u64 = 1_000_000_000;

    #[test]
    fn first_sample_is_zero() {
        let mut tracker = CpuTracker::new(4.0);
        assert_eq!(tracker.sample(7, 50 * SEC, Instant::now()), 0.0);
        assert!(tracker.is_tracking(7));
    }

    #[test]
    fn idle_process_reads_zero() {
        let mut tracker = CpuTracker::new(2.0);
        let t0 = Instant::now();
        tracker.sample(1, 3 * SEC, t0);
        let pct = tracker.sample(1, 3 * SEC, t0 + Duration::from_secs(2));
        assert_eq!(pct, 0.0);
    }

    #[test]
    fn one_busy_core_out_of_four() {
        let mut tracker = CpuTracker::new(4.0);
        let t0 = Instant::now();
        tracker.sample(1, 0, t0);
        let pct = tracker.sample(1, 2 * SEC, t0 + Duration::from_secs(2));
        assert!((pct - 25.0).abs() < 1e-9, "got {pct}");
    }

    #[test]
    fn only_latest_interval_counts() {
        let mut tracker = CpuTracker::new(1.0);
        let t0 = Instant::now();
        tracker.sample(1, 0, t0);
        tracker.sample(1, SEC, t0 + Duration::from_secs(1));
        let pct = tracker.sample(1, SEC + SEC / 2, t0 + Duration::from_secs(2));
        assert!((pct - 50.0).abs() < 1e-9, "got {pct}");
    }

    #[test]
    fn counter_rollback_clamps_to_zero() {
        let mut tracker = CpuTracker::new(1.0);
        let t0 = Instant::now();
        tracker.sample(1, 10 * SEC, t0);
        assert_eq!(tracker.sample(1, SEC, t0 + Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn same_timestamp_returns_zero() {
        let mut tracker = CpuTracker::new(1.0);
        let t0 = Instant::now();
        tracker.sample(1, 0, t0);
        assert_eq!(tracker.sample(1, 5 * SEC, t0), 0.0);
    }

    #[test]
    fn out_of_order_timestamp_returns_zero() {
        let mut tracker = CpuTracker::new(1.0);
        let t0 = Instant::now() + Duration::from_secs(10);
        tracker.sample(1, 0, t0);
        assert_eq!(tracker.sample(1, 5 * SEC, t0 - Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn saturated_counter_clamps_to_hundred() {
        let mut tracker = CpuTracker::new(1.0);
        let t0 = Instant::now();
        tracker.sample(1, 0, t0);
        assert_eq!(tracker.sample(1, 40 * SEC, t0 + Duration::from_secs(1)), 100.0);
    }

    #[test]
    fn retain_purges_dead_pids_and_reuse_starts_fresh() {
        let mut tracker = CpuTracker::new(1.0);
        let t0 = Instant::now();
        tracker.sample(1, 0, t0);
        tracker.sample(2, 0, t0);

        tracker.retain(&HashSet::from([2]));
        assert!(!tracker.is_tracking(1));
        assert!(tracker.is_tracking(2));
        assert_eq!(tracker.len(), 1);

        // pid 1 comes back with a much larger counter: no baseline, no spike.
        let pct = tracker.sample(1, 500 * SEC, t0 + Duration::from_secs(1));
        assert_eq!(pct, 0.0);
    }

    #[test]
    fn bogus_cpu_count_defaults_to_one() {
        assert_eq!(CpuTracker::new(0.0).logical_cpus(), 1.0);
        assert_eq!(CpuTracker::new(f64::NAN).logical_cpus(), 1.0);
    }

    #[test]
    fn host_has_at_least_one_cpu() {
        assert!(logical_cpu_count() >= 1.0);
    }
}
