use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::bundle;
use super::dirsize::directory_size;
use super::process::ProcessEntry;

/// One application bundle found on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstalledApplication {
    pub name: String,
    pub bundle_id: String,
    pub version: Option<String>,
    pub path: PathBuf,
    pub icon: Option<PathBuf>,
    pub size_bytes: u64,
    pub is_running: bool,
    pub can_uninstall: bool,
}

/// Path-prefix rule deciding which bundles may be moved to the trash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UninstallPolicy {
    protected_roots: Vec<PathBuf>,
}

impl UninstallPolicy {
    pub fn new(protected_roots: Vec<PathBuf>) -> Self {
        Self { protected_roots }
    }

    pub fn allows(&self, path: &Path) -> bool {
        !self.protected_roots.iter().any(|root| path.starts_with(root))
    }

    /// Resolve `path` as it exists right now and apply the rule to the result,
    /// so a symlink into a protected root is refused.
    pub fn allows_live(&self, path: &Path) -> std::io::Result<bool> {
        let canonical = fs::canonicalize(path)?;
        Ok(self.allows(path) && self.allows(&canonical))
    }
}

impl Default for UninstallPolicy {
    fn default() -> Self {
        Self::new(vec![PathBuf::from("/System"), PathBuf::from("/usr")])
    }
}

pub struct ApplicationScanner {
    search_roots: Vec<PathBuf>,
    bundle_extension: String,
    skip_hidden: bool,
    policy: UninstallPolicy,
}

impl ApplicationScanner {
    pub fn new(
        search_roots: Vec<PathBuf>,
        bundle_extension: impl Into<String>,
        skip_hidden: bool,
        policy: UninstallPolicy,
    ) -> Self {
        ApplicationScanner {
            search_roots,
            bundle_extension: bundle_extension.into(),
            skip_hidden,
            policy,
        }
    }

    pub fn scan(&self, running_bundle_ids: &HashSet<String>) -> Vec<InstalledApplication> {
        let mut apps = self.discover();
        mark_running(&mut apps, running_bundle_ids);
        apps
    }

    /// Every bundle under the search roots, measured, with `is_running` unset.
    pub fn discover(&self) -> Vec<InstalledApplication> {
        let _span = tracing::debug_span!("scanner.discover").entered();

        let mut seen = HashSet::new();
        let mut apps = Vec::new();
        for root in &self.search_roots {
            let entries = match fs::read_dir(root) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::debug!(root = %root.display(), %err, "skipping search root");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !self.is_candidate(&path) {
                    continue;
                }
                let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
                if !seen.insert(canonical.clone()) {
                    continue;
                }
                if let Some(app) = self.inspect(canonical) {
                    apps.push(app);
                }
            }
        }

        sort_by_name(&mut apps);
        tracing::debug!(count = apps.len(), "discovered applications");
        apps
    }

    fn is_candidate(&self, path: &Path) -> bool {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if self.skip_hidden && file_name.starts_with('.') {
            return false;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.bundle_extension))
    }

    fn inspect(&self, path: PathBuf) -> Option<InstalledApplication> {
        let Some(info) = bundle::read_bundle(&path) else {
            tracing::debug!(path = %path.display(), "unreadable bundle metadata");
            return None;
        };
        let Some((bundle_id, name)) = info.identity() else {
            tracing::debug!(path = %path.display(), "bundle without identifier or name");
            return None;
        };

        Some(InstalledApplication {
            name: name.to_string(),
            bundle_id: bundle_id.to_string(),
            version: info.version.clone(),
            size_bytes: directory_size(&path),
            can_uninstall: self.policy.allows(&path),
            icon: info.icon.clone(),
            is_running: false,
            path,
        })
    }
}

pub fn running_bundle_ids(processes: &[ProcessEntry]) -> HashSet<String> {
    processes
        .iter()
        .filter_map(|p| p.bundle_id.clone())
        .collect()
}

pub fn mark_running(apps: &mut [InstalledApplication], running_bundle_ids: &HashSet<String>) {
    for app in apps {
        app.is_running = running_bundle_ids.contains(&app.bundle_id);
    }
}

pub fn sort_by_name(apps: &mut [InstalledApplication]) {
    apps.sort_by_cached_key(|a| (a.name.to_lowercase(), a.path.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_bundle(root: &Path, dir: &str, id: Option<&str>, name: Option<&str>) -> PathBuf {
        let bundle = root.join(dir);
        let contents = bundle.join("Contents");
        fs::create_dir_all(contents.join("MacOS")).unwrap();
        let mut plist = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<plist version=\"1.0\"><dict>\n",
        );
        if let Some(id) = id {
            plist.push_str(&format!("<key>CFBundleIdentifier</key><string>{id}</string>\n"));
        }
        if let Some(name) = name {
            plist.push_str(&format!("<key>CFBundleName</key><string>{name}</string>\n"));
        }
        plist.push_str("</dict></plist>\n");
        fs::write(contents.join("Info.plist"), plist).unwrap();
        fs::write(contents.join("MacOS").join("bin"), vec![0u8; 100]).unwrap();
        bundle
    }

    fn scanner(roots: Vec<PathBuf>) -> ApplicationScanner {
        ApplicationScanner::new(roots, "app", true, UninstallPolicy::default())
    }

    #[test]
    fn finds_bundles_one_level_deep() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "Zebra.app", Some("com.example.zebra"), Some("zebra"));
        write_bundle(dir.path(), "Atlas.app", Some("com.example.atlas"), Some("Atlas"));
        // Not a bundle, and a bundle nested one level too deep.
        fs::create_dir_all(dir.path().join("Tools")).unwrap();
        write_bundle(&dir.path().join("Tools"), "Deep.app", Some("com.example.deep"), Some("Deep"));

        let apps = scanner(vec![dir.path().to_path_buf()]).scan(&HashSet::new());
        let names: Vec<&str> = apps.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Atlas", "zebra"]);
        assert!(apps.iter().all(|a| a.size_bytes >= 100));
    }

    #[test]
    fn binary_info_plist_is_listed() {
        let dir = tempfile::tempdir().unwrap();
        let contents = dir.path().join("BinApp.app").join("Contents");
        fs::create_dir_all(&contents).unwrap();
        let mut info = plist::Dictionary::new();
        info.insert("CFBundleIdentifier".into(), plist::Value::String("com.example.bin".into()));
        info.insert("CFBundleName".into(), plist::Value::String("BinApp".into()));
        plist::Value::Dictionary(info)
            .to_file_binary(contents.join("Info.plist"))
            .unwrap();

        let apps = scanner(vec![dir.path().to_path_buf()]).scan(&HashSet::new());
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].bundle_id, "com.example.bin");
        assert_eq!(apps[0].name, "BinApp");
    }

    #[test]
    fn skips_unidentifiable_and_hidden_bundles() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "NoId.app", None, Some("NoId"));
        write_bundle(dir.path(), "NoName.app", Some("com.example.noname"), None);
        write_bundle(dir.path(), ".Hidden.app", Some("com.example.hidden"), Some("Hidden"));
        fs::create_dir_all(dir.path().join("Empty.app")).unwrap();

        let apps = scanner(vec![dir.path().to_path_buf()]).scan(&HashSet::new());
        assert!(apps.is_empty(), "{apps:?}");
    }

    #[test]
    fn running_flag_follows_bundle_ids() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "A.app", Some("com.example.a"), Some("A"));
        write_bundle(dir.path(), "B.app", Some("com.example.b"), Some("B"));

        let running = HashSet::from(["com.example.b".to_string()]);
        let apps = scanner(vec![dir.path().to_path_buf()]).scan(&running);
        assert!(!apps[0].is_running);
        assert!(apps[1].is_running);
    }

    #[test]
    fn missing_roots_and_duplicates_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "A.app", Some("com.example.a"), Some("A"));
        let roots = vec![
            dir.path().join("missing"),
            dir.path().to_path_buf(),
            dir.path().to_path_buf(),
        ];
        assert_eq!(scanner(roots).discover().len(), 1);
    }

    #[test]
    fn protected_roots_block_uninstall() {
        let policy = UninstallPolicy::default();
        assert!(!policy.allows(Path::new("/System/Applications/Notes.app")));
        assert!(!policy.allows(Path::new("/usr/local/Thing.app")));
        assert!(policy.allows(Path::new("/Applications/Notes.app")));
        assert!(policy.allows(Path::new("/SystemTools/Notes.app")));
    }

    #[test]
    fn bundle_under_protected_root_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        write_bundle(&root, "Core.app", Some("com.example.core"), Some("Core"));

        let policy = UninstallPolicy::new(vec![root.clone()]);
        let apps = ApplicationScanner::new(vec![root], "app", true, policy).discover();
        assert_eq!(apps.len(), 1);
        assert!(!apps[0].can_uninstall);
    }

    #[cfg(unix)]
    #[test]
    fn live_check_follows_symlinks_into_protected_roots() {
        let protected = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        let target = write_bundle(protected.path(), "Core.app", Some("c"), Some("C"));
        let link = user.path().join("Core.app");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let policy = UninstallPolicy::new(vec![fs::canonicalize(protected.path()).unwrap()]);
        assert!(policy.allows(&link));
        assert!(!policy.allows_live(&link).unwrap());
    }
}
