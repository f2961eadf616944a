use std::fs;
use std::path::Path;

/// Total length in bytes of every non-directory entry below `root`.
///
/// Symlinks are measured with `symlink_metadata` and never descended into,
/// so a link contributes its own length and cycles are impossible. Entries
/// that cannot be read contribute nothing.
pub fn directory_size(root: &Path) -> u64 {
    let mut total = 0u64;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(entry.path());
                continue;
            }
            if let Ok(meta) = fs::symlink_metadata(entry.path()) {
                total = total.saturating_add(meta.len());
            }
        }
    }
    total
}
