//! Incremental-update planning.
//!
//! Compares the current scan against the freshness keys recorded in the
//! loaded index and decides which files need (re-)embedding and which
//! entries must be purged. Pure data comparison, no I/O, so the
//! incremental logic is testable in isolation.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::catalog::FileRecord;

/// (size, mtime) pair used to detect whether a file's content may have
/// changed since it was last embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessKey {
    pub size: u64,
    pub modified_ms: i64,
}

impl From<&FileRecord> for FreshnessKey {
    fn from(record: &FileRecord) -> Self {
        Self {
            size: record.size,
            modified_ms: record.modified_ms,
        }
    }
}

/// The work a build has to do on top of the existing index.
#[derive(Debug, Default)]
pub struct UpdatePlan {
    /// Records that are new or whose freshness key changed.
    pub to_embed: Vec<FileRecord>,
    /// Known paths that no longer appear in the scan.
    pub to_remove: Vec<PathBuf>,
}

/// Diff `records` against the `known` path → freshness mapping.
pub fn plan(records: &[FileRecord], known: &HashMap<PathBuf, FreshnessKey>) -> UpdatePlan {
    let mut seen = HashSet::with_capacity(records.len());
    let mut to_embed = Vec::new();

    for record in records {
        seen.insert(record.path.clone());
        match known.get(&record.path) {
            Some(key) if *key == FreshnessKey::from(record) => {}
            _ => to_embed.push(record.clone()),
        }
    }

    let mut to_remove: Vec<PathBuf> = known
        .keys()
        .filter(|path| !seen.contains(*path))
        .cloned()
        .collect();
    to_remove.sort();

    UpdatePlan { to_embed, to_remove }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, size: u64, modified_ms: i64) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            size,
            modified_ms,
        }
    }

    #[test]
    fn test_empty_known_embeds_everything() {
        let records = vec![record("/a.jpg", 10, 1), record("/b.jpg", 20, 2)];
        let plan = plan(&records, &HashMap::new());

        assert_eq!(plan.to_embed, records);
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn test_unchanged_records_are_skipped() {
        let records = vec![record("/a.jpg", 10, 1)];
        let known = HashMap::from([(
            PathBuf::from("/a.jpg"),
            FreshnessKey {
                size: 10,
                modified_ms: 1,
            },
        )]);

        let plan = plan(&records, &known);
        assert!(plan.to_embed.is_empty());
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn test_changed_size_or_mtime_triggers_reembed() {
        let known = HashMap::from([
            (
                PathBuf::from("/a.jpg"),
                FreshnessKey {
                    size: 10,
                    modified_ms: 1,
                },
            ),
            (
                PathBuf::from("/b.jpg"),
                FreshnessKey {
                    size: 20,
                    modified_ms: 2,
                },
            ),
        ]);
        let records = vec![record("/a.jpg", 11, 1), record("/b.jpg", 20, 3)];

        let plan = plan(&records, &known);
        assert_eq!(plan.to_embed.len(), 2);
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn test_missing_files_are_removed() {
        let known = HashMap::from([
            (
                PathBuf::from("/gone.jpg"),
                FreshnessKey {
                    size: 1,
                    modified_ms: 1,
                },
            ),
            (
                PathBuf::from("/kept.jpg"),
                FreshnessKey {
                    size: 2,
                    modified_ms: 2,
                },
            ),
        ]);
        let records = vec![record("/kept.jpg", 2, 2)];

        let plan = plan(&records, &known);
        assert!(plan.to_embed.is_empty());
        assert_eq!(plan.to_remove, vec![PathBuf::from("/gone.jpg")]);
    }
}
