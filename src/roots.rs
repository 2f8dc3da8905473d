//! Enumeration of scan roots for whole-machine indexing.
//!
//! The catalog itself is indifferent to where roots come from; this is
//! the one place that knows how to find "everything plugged in" on the
//! current platform. Unreadable mount points are skipped.

use std::path::PathBuf;

#[cfg(not(windows))]
pub fn system_roots() -> Vec<PathBuf> {
    let mut roots = vec![PathBuf::from("/")];

    // Removable and secondary volumes mount one level below these.
    for mount_base in ["/media", "/mnt", "/Volumes"] {
        let entries = match std::fs::read_dir(mount_base) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                roots.push(path);
            }
        }
    }

    roots
}

#[cfg(windows)]
pub fn system_roots() -> Vec<PathBuf> {
    ('A'..='Z')
        .map(|letter| PathBuf::from(format!("{letter}:\\")))
        .filter(|drive| drive.exists())
        .collect()
}
