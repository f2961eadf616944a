use std::path::PathBuf;

use serde::Serialize;

/// One running, user-visible process as of the latest tick.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub bundle_id: Option<String>,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub icon: Option<PathBuf>,
    pub killable: bool,
}

/// Whatever memory figures the platform could produce for one process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryReading {
    /// Resident and virtual sizes from the detailed task info.
    Detailed { resident: u64, virtual_size: u64 },
    /// Only the resident size from the basic query.
    Resident(u64),
    Unavailable,
}

/// Heuristic that pads resident size with a share of the non-resident
/// address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryPolicy {
    pub virtual_divisor: u64,
    pub resident_divisor: u64,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            virtual_divisor: 8,
            resident_divisor: 4,
        }
    }
}

impl MemoryPolicy {
    pub fn estimate(&self, reading: MemoryReading) -> u64 {
        match reading {
            MemoryReading::Detailed {
                resident,
                virtual_size,
            } if virtual_size > resident => {
                let extra = ((virtual_size - resident) / self.virtual_divisor.max(1))
                    .min(resident / self.resident_divisor.max(1));
                resident.saturating_add(extra)
            }
            MemoryReading::Detailed { resident, .. } => resident,
            MemoryReading::Resident(resident) => resident,
            MemoryReading::Unavailable => 0,
        }
    }
}

/// Case-insensitive name order, pid as tie-breaker so the order is total.
pub fn sort_by_name(entries: &mut [ProcessEntry]) {
    entries.sort_by_cached_key(|p| (p.name.to_lowercase(), p.pid));
}
