use serde::Serialize;

use super::apps::InstalledApplication;
use super::process::ProcessEntry;

/// Everything collaborators can see, replaced as a unit.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Snapshot {
    pub processes: Vec<ProcessEntry>,
    pub applications: Vec<InstalledApplication>,
    pub loading: bool,
    /// Tick that produced `processes` and `applications`; 0 before the first.
    pub generation: u64,
}

impl Snapshot {
    pub fn process(&self, pid: u32) -> Option<&ProcessEntry> {
        self.processes.iter().find(|p| p.pid == pid)
    }

    pub fn application_at(&self, path: &std::path::Path) -> Option<&InstalledApplication> {
        self.applications.iter().find(|a| a.path == path)
    }
}
