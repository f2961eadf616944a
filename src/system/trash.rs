//! Recoverable deletion: bundles are renamed into the user's trash, never
//! unlinked. A move across filesystems fails instead of falling back to a
//! copy-and-delete.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub trait Trash: Send + Sync {
    /// Move `path` into the trash and return where it ended up.
    fn trash(&self, path: &Path) -> io::Result<PathBuf>;
}

/// A trash directory. With `info_dir` set it follows the freedesktop.org
/// layout and writes a `.trashinfo` record next to each item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrashCan {
    files_dir: PathBuf,
    info_dir: Option<PathBuf>,
}

impl TrashCan {
    /// Flat trash directory, as `~/.Trash` on macOS.
    pub fn flat(dir: impl Into<PathBuf>) -> Self {
        TrashCan {
            files_dir: dir.into(),
            info_dir: None,
        }
    }

    /// freedesktop.org trash rooted at `root` (`files/` and `info/`).
    pub fn freedesktop(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        TrashCan {
            files_dir: root.join("files"),
            info_dir: Some(root.join("info")),
        }
    }

    #[cfg(target_os = "macos")]
    pub fn for_current_user() -> Option<Self> {
        dirs::home_dir().map(|home| Self::flat(home.join(".Trash")))
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    pub fn for_current_user() -> Option<Self> {
        dirs::data_dir().map(|data| Self::freedesktop(data.join("Trash")))
    }

    #[cfg(not(unix))]
    pub fn for_current_user() -> Option<Self> {
        None
    }

    fn free_name(&self, file_name: &str) -> String {
        let taken = |name: &str| {
            self.files_dir.join(name).symlink_metadata().is_ok()
                || self
                    .info_dir
                    .as_ref()
                    .is_some_and(|info| info.join(format!("{name}.trashinfo")).exists())
        };
        if !taken(file_name) {
            return file_name.to_string();
        }
        let path = Path::new(file_name);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());
        let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
        (2u32..)
            .map(|n| match &ext {
                Some(ext) => format!("{stem} {n}.{ext}"),
                None => format!("{stem} {n}"),
            })
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| file_name.to_string())
    }
}

impl Trash for TrashCan {
    fn trash(&self, path: &Path) -> io::Result<PathBuf> {
        let original = fs::canonicalize(path)?;
        let file_name = original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;

        fs::create_dir_all(&self.files_dir)?;
        let name = self.free_name(&file_name);
        let destination = self.files_dir.join(&name);

        let info_file = match &self.info_dir {
            Some(info_dir) => {
                fs::create_dir_all(info_dir)?;
                let info_file = info_dir.join(format!("{name}.trashinfo"));
                let deleted_at = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S");
                fs::write(
                    &info_file,
                    format!(
                        "[Trash Info]\nPath={}\nDeletionDate={deleted_at}\n",
                        percent_encode(&original)
                    ),
                )?;
                Some(info_file)
            }
            None => None,
        };

        if let Err(err) = fs::rename(&original, &destination) {
            if let Some(info_file) = info_file {
                let _ = fs::remove_file(info_file);
            }
            return Err(err);
        }
        Ok(destination)
    }
}

/// Stand-in when the platform has no trash location. Every move fails.
#[derive(Debug, Default)]
pub struct NoTrash;

impl Trash for NoTrash {
    fn trash(&self, _path: &Path) -> io::Result<PathBuf> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "no trash location for the current user",
        ))
    }
}

/// The current user's trash, or [`NoTrash`] when none can be located.
pub fn user_trash() -> Box<dyn Trash> {
    match TrashCan::for_current_user() {
        Some(can) => Box::new(can),
        None => Box::new(NoTrash),
    }
}

fn percent_encode(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bundle(root: &Path, name: &str) -> PathBuf {
        let bundle = root.join(name);
        fs::create_dir_all(bundle.join("Contents")).unwrap();
        fs::write(bundle.join("Contents").join("Info.plist"), "x").unwrap();
        bundle
    }

    #[test]
    fn flat_trash_moves_and_renames_on_collision() {
        let src = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir_in(src.path()).unwrap();
        let trash = TrashCan::flat(bin.path());

        let first = make_bundle(src.path(), "Notes.app");
        let moved = trash.trash(&first).unwrap();
        assert!(!first.exists());
        assert_eq!(moved.file_name().unwrap(), "Notes.app");
        assert!(moved.join("Contents").join("Info.plist").exists());

        let second = make_bundle(src.path(), "Notes.app");
        let moved_again = trash.trash(&second).unwrap();
        assert_eq!(moved_again.file_name().unwrap(), "Notes 2.app");
    }

    #[test]
    fn freedesktop_trash_writes_info_record() {
        let src = tempfile::tempdir().unwrap();
        let trash = TrashCan::freedesktop(src.path().join("Trash"));

        let bundle = make_bundle(src.path(), "My Tool.app");
        let canonical = fs::canonicalize(&bundle).unwrap();
        let moved = trash.trash(&bundle).unwrap();
        assert_eq!(moved, src.path().join("Trash").join("files").join("My Tool.app"));

        let info = fs::read_to_string(
            src.path()
                .join("Trash")
                .join("info")
                .join("My Tool.app.trashinfo"),
        )
        .unwrap();
        assert!(info.starts_with("[Trash Info]\n"));
        assert!(info.contains(&format!("Path={}", percent_encode(&canonical))));
        assert!(info.contains("%20Tool.app"));
        assert!(info.contains("DeletionDate="));
    }

    #[test]
    fn missing_source_is_an_error() {
        let src = tempfile::tempdir().unwrap();
        let trash = TrashCan::flat(src.path().join("bin"));
        let err = trash.trash(&src.path().join("Gone.app")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
