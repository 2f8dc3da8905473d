//! Paired persistence for the vector index.
//!
//! Two artifacts per index location, always written and read together:
//!
//! `vectors.bin`: header (47 bytes) followed by packed rows:
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA-256 of the embedding model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of the header bytes before the checksum)
//! - rows: entry_count × dimensions × f32 (little-endian)
//!
//! `paths.json`: the ordered entry list (path, size, mtime); row *i* of
//! the binary artifact pairs with entry *i* here.
//!
//! Saves go through temp-then-rename so a crash mid-write never leaves a
//! partially written artifact in place. Any disagreement between the two
//! artifacts fails the load loudly; the caller's remedy is a rebuild.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::{IndexEntry, IndexState};

const FORMAT_VERSION: u8 = 1;
const HEADER_SIZE: usize = 47;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const PATHS_FILE: &str = "paths.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no index found")]
    NotFound,

    #[error("index pair is incomplete: {0} is missing")]
    MissingArtifact(&'static str),

    #[error("index pair disagrees: {vectors} vectors vs {paths} paths")]
    CorruptPair { vectors: u64, paths: u64 },

    #[error("index checksum mismatch")]
    ChecksumMismatch,

    #[error("index data is truncated")]
    Truncated,

    #[error("invalid index format: {0}")]
    InvalidFormat(String),

    #[error("unsupported index version {0} (supported: {1})")]
    VersionMismatch(u8, u8),

    #[error("index was built with a different embedding model")]
    ModelMismatch,

    #[error("dimension mismatch: expected {expected}, index has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl StoreError {
    /// Whether the on-disk pair is unusable and a rebuild is the remedy
    /// (as opposed to "there is simply no index yet").
    pub fn needs_rebuild(&self) -> bool {
        !matches!(self, StoreError::NotFound | StoreError::Io(_))
    }
}

/// Cheap artifact statistics, read without loading any vectors.
#[derive(Debug)]
pub struct IndexStats {
    pub entries: u64,
    pub dimensions: u16,
    pub vectors_bytes: u64,
    pub paths_bytes: u64,
}

pub struct IndexStore {
    vectors_path: PathBuf,
    paths_path: PathBuf,
}

impl IndexStore {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            vectors_path: base_dir.join(VECTORS_FILE),
            paths_path: base_dir.join(PATHS_FILE),
        }
    }

    /// Persist the pair atomically: both artifacts are written to temp
    /// files and fsynced before either rename happens, so the previously
    /// valid pair survives any mid-write crash.
    pub fn save(&self, state: &IndexState, model_id: &[u8; 32]) -> Result<(), StoreError> {
        let vectors_tmp = self.vectors_path.with_extension("bin.tmp");
        let paths_tmp = self.paths_path.with_extension("json.tmp");

        let written = self
            .write_vectors(&vectors_tmp, state, model_id)
            .and_then(|_| self.write_paths(&paths_tmp, state.entries()));

        if let Err(err) = written {
            let _ = std::fs::remove_file(&vectors_tmp);
            let _ = std::fs::remove_file(&paths_tmp);
            return Err(err);
        }

        std::fs::rename(&vectors_tmp, &self.vectors_path)?;
        std::fs::rename(&paths_tmp, &self.paths_path)?;
        Ok(())
    }

    /// Load and validate the pair.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<IndexState, StoreError> {
        match (self.vectors_path.exists(), self.paths_path.exists()) {
            (false, false) => return Err(StoreError::NotFound),
            (false, true) => return Err(StoreError::MissingArtifact(VECTORS_FILE)),
            (true, false) => return Err(StoreError::MissingArtifact(PATHS_FILE)),
            (true, true) => {}
        }

        let file = File::open(&self.vectors_path)?;
        let mut reader = BufReader::new(file);
        let header = read_header(&mut reader)?;

        if header.model_id != *expected_model_id {
            return Err(StoreError::ModelMismatch);
        }
        if header.dimensions as usize != expected_dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        let entries = self.read_entries()?;
        if entries.len() as u64 != header.entry_count {
            return Err(StoreError::CorruptPair {
                vectors: header.entry_count,
                paths: entries.len() as u64,
            });
        }

        let mut vectors = Vec::with_capacity(entries.len());
        let mut row = vec![0u8; header.dimensions as usize * 4];
        for _ in 0..header.entry_count {
            reader.read_exact(&mut row).map_err(|err| {
                if err.kind() == std::io::ErrorKind::UnexpectedEof {
                    StoreError::Truncated
                } else {
                    StoreError::Io(err)
                }
            })?;
            let vector: Vec<f32> = row
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            vectors.push(vector);
        }

        IndexState::from_parts(expected_dimensions, entries, vectors)
            .map_err(|err| StoreError::InvalidFormat(err.to_string()))
    }

    /// Entry count and artifact sizes from the headers alone.
    pub fn stats(&self) -> Result<IndexStats, StoreError> {
        if !self.vectors_path.exists() {
            return Err(StoreError::NotFound);
        }
        let file = File::open(&self.vectors_path)?;
        let mut reader = BufReader::new(file);
        let header = read_header(&mut reader)?;

        Ok(IndexStats {
            entries: header.entry_count,
            dimensions: header.dimensions,
            vectors_bytes: std::fs::metadata(&self.vectors_path)?.len(),
            paths_bytes: std::fs::metadata(&self.paths_path).map(|m| m.len()).unwrap_or(0),
        })
    }

    fn write_vectors(
        &self,
        path: &Path,
        state: &IndexState,
        model_id: &[u8; 32],
    ) -> Result<(), StoreError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            model_id: *model_id,
            dimensions: state.dimensions() as u16,
            entry_count: state.len() as u64,
        };
        writer.write_all(&header.to_bytes())?;

        for position in 0..state.len() {
            // Positions 0..len are always populated; the pairing invariant
            // guarantees a vector per entry.
            let vector = state
                .vector(position)
                .ok_or_else(|| StoreError::InvalidFormat(format!("no vector at {position}")))?;
            for value in vector {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        file.sync_all()?;
        Ok(())
    }

    fn write_paths(&self, path: &Path, entries: &[IndexEntry]) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(entries)
            .map_err(|err| StoreError::InvalidFormat(err.to_string()))?;
        let mut file = File::create(path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        Ok(())
    }

    fn read_entries(&self) -> Result<Vec<IndexEntry>, StoreError> {
        let data = std::fs::read(&self.paths_path)?;
        serde_json::from_slice(&data).map_err(|err| StoreError::InvalidFormat(err.to_string()))
    }
}

struct Header {
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

impl Header {
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = FORMAT_VERSION;
        bytes[1..33].copy_from_slice(&self.model_id);
        bytes[33..35].copy_from_slice(&self.dimensions.to_le_bytes());
        bytes[35..43].copy_from_slice(&self.entry_count.to_le_bytes());
        let checksum = crc32fast::hash(&bytes[0..43]);
        bytes[43..47].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }
}

fn read_header(reader: &mut impl Read) -> Result<Header, StoreError> {
    let mut bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut bytes).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            StoreError::Truncated
        } else {
            StoreError::Io(err)
        }
    })?;

    let version = bytes[0];
    if version != FORMAT_VERSION {
        return Err(StoreError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes([bytes[43], bytes[44], bytes[45], bytes[46]]);
    if stored_checksum != crc32fast::hash(&bytes[0..43]) {
        return Err(StoreError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&bytes[1..33]);
    let dimensions = u16::from_le_bytes([bytes[33], bytes[34]]);
    let entry_count = u64::from_le_bytes([
        bytes[35], bytes[36], bytes[37], bytes[38], bytes[39], bytes[40], bytes[41], bytes[42],
    ]);

    Ok(Header {
        model_id,
        dimensions,
        entry_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Seek;
    use std::path::PathBuf;

    fn model_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 0xAB;
        id[31] = 0xCD;
        id
    }

    fn entry(path: &str) -> IndexEntry {
        IndexEntry {
            path: PathBuf::from(path),
            size: 7,
            modified_ms: 42,
        }
    }

    fn sample_state() -> IndexState {
        let mut state = IndexState::new(3);
        state.upsert(entry("/a.jpg"), vec![1.0, 0.0, 0.0]).unwrap();
        state.upsert(entry("/b.jpg"), vec![0.0, 1.0, 0.0]).unwrap();
        state.upsert(entry("/c.jpg"), vec![0.0, 0.0, 1.0]).unwrap();
        state
    }

    #[test]
    fn test_round_trip_preserves_pairing() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        let state = sample_state();

        store.save(&state, &model_id()).unwrap();
        let loaded = store.load(&model_id(), 3).unwrap();

        assert_eq!(loaded.len(), state.len());
        for position in 0..state.len() {
            assert_eq!(loaded.entry(position), state.entry(position));
            assert_eq!(loaded.vector(position), state.vector(position));
        }
    }

    #[test]
    fn test_missing_pair_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        assert!(matches!(store.load(&model_id(), 3), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_missing_sidecar_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample_state(), &model_id()).unwrap();

        std::fs::remove_file(dir.path().join(PATHS_FILE)).unwrap();
        assert!(matches!(
            store.load(&model_id(), 3),
            Err(StoreError::MissingArtifact(PATHS_FILE))
        ));
    }

    #[test]
    fn test_count_mismatch_is_corrupt_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample_state(), &model_id()).unwrap();

        // Drop one entry from the sidecar only.
        let entries = vec![entry("/a.jpg"), entry("/b.jpg")];
        std::fs::write(
            dir.path().join(PATHS_FILE),
            serde_json::to_vec_pretty(&entries).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            store.load(&model_id(), 3),
            Err(StoreError::CorruptPair { vectors: 3, paths: 2 })
        ));
    }

    #[test]
    fn test_model_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample_state(), &model_id()).unwrap();

        let other = [0xFFu8; 32];
        assert!(matches!(
            store.load(&other, 3),
            Err(StoreError::ModelMismatch)
        ));
    }

    #[test]
    fn test_checksum_detects_header_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample_state(), &model_id()).unwrap();

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(dir.path().join(VECTORS_FILE))
            .unwrap();
        file.seek(std::io::SeekFrom::Start(10)).unwrap();
        file.write_all(&[0x5A]).unwrap();

        assert!(matches!(
            store.load(&model_id(), 3),
            Err(StoreError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_truncated_rows_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample_state(), &model_id()).unwrap();

        let data = std::fs::read(dir.path().join(VECTORS_FILE)).unwrap();
        std::fs::write(dir.path().join(VECTORS_FILE), &data[..data.len() - 6]).unwrap();

        assert!(matches!(
            store.load(&model_id(), 3),
            Err(StoreError::Truncated)
        ));
    }

    #[test]
    fn test_failed_save_cleans_temp_and_keeps_previous(){
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample_state(), &model_id()).unwrap();
        let before = std::fs::read(dir.path().join(VECTORS_FILE)).unwrap();

        // Point a second store at an unwritable destination.
        let bad = IndexStore::new(&dir.path().join("missing/sub"));
        assert!(bad.save(&sample_state(), &model_id()).is_err());

        assert_eq!(std::fs::read(dir.path().join(VECTORS_FILE)).unwrap(), before);
        assert!(!dir.path().join("missing").exists());
    }

    #[test]
    fn test_stats_without_loading() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample_state(), &model_id()).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.dimensions, 3);
        assert_eq!(stats.vectors_bytes, 47 + 3 * 3 * 4);
    }

    #[test]
    fn test_empty_state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&IndexState::new(4), &model_id()).unwrap();

        let loaded = store.load(&model_id(), 4).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimensions(), 4);
    }
}
