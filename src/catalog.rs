//! Filesystem discovery for indexable images.
//!
//! Walks a set of root directories and yields a [`FileRecord`] for every
//! image file that survives the exclusion policy. Traversal is lazy (one
//! `walkdir` iterator at a time), deterministic (entries sorted by file
//! name), and cycle-safe (each directory identity is entered at most once
//! per scan, so overlapping roots and bind/symlink mounts terminate).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use walkdir::WalkDir;

/// Extensions accepted for indexing, matched case-insensitively.
static IMAGE_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"]
        .into_iter()
        .collect()
});

/// Directory-name fragments pruned by default (lowercased substring match).
pub const DEFAULT_EXCLUDED_FRAGMENTS: [&str; 9] = [
    "system32",
    "windows",
    "program files",
    "appdata",
    ".git",
    "__pycache__",
    "temp",
    "tmp",
    "cache",
];

/// A candidate image observed during a scan.
///
/// Identity is the path; a later scan observing the same path with a
/// different size or mtime supersedes the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    /// Modification time as Unix milliseconds.
    pub modified_ms: i64,
}

/// Tunables for a scan, derived from config plus CLI overrides.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Lowercased fragments; a directory whose name contains one is pruned
    /// before it is ever listed.
    pub excluded_fragments: Vec<String>,
    pub min_file_size: u64,
    pub max_file_size: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            excluded_fragments: DEFAULT_EXCLUDED_FRAGMENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_file_size: 1024,
            max_file_size: 50 * 1024 * 1024,
        }
    }
}

/// Start a fresh traversal over `roots`.
///
/// The returned iterator is lazy and restartable (call `scan` again for a
/// new traversal) but not resumable. Unreadable entries are skipped with a
/// log line.
pub fn scan<'a>(roots: &[PathBuf], options: &'a ScanOptions) -> Scan<'a> {
    Scan {
        roots: roots.to_vec().into_iter(),
        current: None,
        visited: HashSet::new(),
        options,
    }
}

#[cfg(unix)]
type DirIdentity = (u64, u64);
#[cfg(not(unix))]
type DirIdentity = PathBuf;

#[cfg(unix)]
fn dir_identity(path: &Path) -> Option<DirIdentity> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).ok().map(|m| (m.dev(), m.ino()))
}

#[cfg(not(unix))]
fn dir_identity(path: &Path) -> Option<DirIdentity> {
    std::fs::canonicalize(path).ok()
}

/// Lazy iterator over discovered [`FileRecord`]s.
pub struct Scan<'a> {
    roots: std::vec::IntoIter<PathBuf>,
    current: Option<walkdir::IntoIter>,
    visited: HashSet<DirIdentity>,
    options: &'a ScanOptions,
}

fn is_excluded_dir(options: &ScanOptions, name: &str) -> bool {
    let name = name.to_lowercase();
    options
        .excluded_fragments
        .iter()
        .any(|fragment| name.contains(fragment.as_str()))
}

fn accepts_file(options: &ScanOptions, path: &Path, size: u64) -> bool {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_lowercase(),
        None => return false,
    };
    if !IMAGE_EXTENSIONS.contains(ext.as_str()) {
        return false;
    }
    size >= options.min_file_size && size <= options.max_file_size
}

impl Iterator for Scan<'_> {
    type Item = FileRecord;

    fn next(&mut self) -> Option<FileRecord> {
        let options = self.options;
        loop {
            let walker = match self.current.as_mut() {
                Some(walker) => walker,
                None => {
                    let root = self.roots.next()?;
                    self.current = Some(WalkDir::new(root).sort_by_file_name().into_iter());
                    continue;
                }
            };

            let entry = match walker.next() {
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    // Permission or read failure: recoverable skip.
                    log::debug!(
                        "skipping unreadable entry {}: {err}",
                        err.path().unwrap_or_else(|| Path::new("?")).display()
                    );
                    continue;
                }
                None => {
                    self.current = None;
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                let name = entry.file_name().to_string_lossy();
                if entry.depth() > 0 && is_excluded_dir(options, &name) {
                    walker.skip_current_dir();
                    continue;
                }
                if let Some(identity) = dir_identity(entry.path()) {
                    if !self.visited.insert(identity) {
                        walker.skip_current_dir();
                    }
                }
                continue;
            }

            if !entry.file_type().is_file() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    log::debug!("skipping {}: {err}", entry.path().display());
                    continue;
                }
            };

            if !accepts_file(options, entry.path(), metadata.len()) {
                continue;
            }

            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            return Some(FileRecord {
                path: entry.path().to_path_buf(),
                size: metadata.len(),
                modified_ms: DateTime::<Utc>::from(modified).timestamp_millis(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_without_size_gate() -> ScanOptions {
        ScanOptions {
            min_file_size: 0,
            ..ScanOptions::default()
        }
    }

    fn touch(path: &Path, bytes: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_collects_images_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.jpg"), b"jpg");
        touch(&dir.path().join("b.PNG"), b"png");
        touch(&dir.path().join("notes.txt"), b"text");
        touch(&dir.path().join("noext"), b"raw");

        let options = options_without_size_gate();
        let paths: Vec<_> = scan(&[dir.path().to_path_buf()], &options)
            .map(|r| r.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(paths, vec!["a.jpg", "b.PNG"]);
    }

    #[test]
    fn test_excluded_directories_are_never_entered() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("keep/a.jpg"), b"a");
        touch(&dir.path().join(".git/objects/b.jpg"), b"b");
        touch(&dir.path().join("thumb-cache/c.jpg"), b"c");

        let options = options_without_size_gate();
        let records: Vec<_> = scan(&[dir.path().to_path_buf()], &options).collect();

        assert_eq!(records.len(), 1);
        assert!(records[0].path.ends_with("keep/a.jpg"));
    }

    #[test]
    fn test_size_gate() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("tiny.jpg"), b"x");
        touch(&dir.path().join("ok.jpg"), &[0u8; 2048]);

        let options = ScanOptions {
            min_file_size: 1024,
            ..ScanOptions::default()
        };
        let records: Vec<_> = scan(&[dir.path().to_path_buf()], &options).collect();

        assert_eq!(records.len(), 1);
        assert!(records[0].path.ends_with("ok.jpg"));
    }

    #[test]
    fn test_scan_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["z.jpg", "a.jpg", "m/inner.png", "b/deep/leaf.webp"] {
            touch(&dir.path().join(name), b"img");
        }

        let options = options_without_size_gate();
        let roots = [dir.path().to_path_buf()];
        let first: Vec<_> = scan(&roots, &options).collect();
        let second: Vec<_> = scan(&roots, &options).collect();

        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn test_overlapping_roots_visit_once() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("sub/a.jpg"), b"a");

        let options = options_without_size_gate();
        let roots = [dir.path().to_path_buf(), dir.path().join("sub")];
        let records: Vec<_> = scan(&roots, &options).collect();

        assert_eq!(records.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_terminates() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("sub/a.jpg"), b"a");
        std::os::unix::fs::symlink(dir.path(), dir.path().join("sub/loop")).unwrap();

        let options = options_without_size_gate();
        let records: Vec<_> = scan(&[dir.path().to_path_buf()], &options).collect();

        assert_eq!(records.len(), 1);
    }
}
