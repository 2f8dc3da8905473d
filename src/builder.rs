//! Index build orchestration.
//!
//! Drives scan → diff → embed → merge → persist on a worker thread and
//! reports progress over an mpsc channel. Phases run in order; the
//! cancellation flag is polled per record during scanning and embedding,
//! while merging and persisting finish their current unit so the on-disk
//! pair is never left half-written.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use crate::cache;
use crate::catalog::{self, FileRecord, ScanOptions};
use crate::embedder::ImageEmbedder;
use crate::index::{IndexEntry, IndexState, IndexStore, StoreError};

/// How often scanning emits a progress event, in discovered files.
const SCAN_PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Scanning,
    Embedding,
    Merging,
    Persisting,
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BuildPhase::Scanning => "scanning",
            BuildPhase::Embedding => "embedding",
            BuildPhase::Merging => "merging",
            BuildPhase::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

/// Events emitted to the front end. Consumers may drop intermediate
/// progress events; processed counts only ever grow within a phase.
#[derive(Debug)]
pub enum BuildEvent {
    /// `total == 0` means the total is not yet known (scanning).
    Progress {
        phase: BuildPhase,
        processed: usize,
        total: usize,
    },
    Done(BuildSummary),
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    /// Files newly embedded (first seen or changed on disk).
    pub embedded: usize,
    /// Entries purged because their file disappeared.
    pub removed: usize,
    /// Files skipped because they could not be read or embedded.
    pub skipped: usize,
    /// Files already indexed and unchanged.
    pub unchanged: usize,
    /// Final entry count of the persisted index.
    pub total_indexed: usize,
}

#[derive(Debug)]
pub struct BuildOptions {
    pub roots: Vec<PathBuf>,
    pub scan: ScanOptions,
    /// Reuse the previous index as a starting point. A missing or
    /// unusable previous pair degrades to a from-scratch build.
    pub incremental: bool,
}

#[derive(Debug, thiserror::Error)]
enum BuildError {
    #[error("no images found under the given roots")]
    NoImagesFound,

    #[error("{phase}: {source}")]
    Store {
        phase: BuildPhase,
        source: StoreError,
    },
}

pub struct IndexBuilder {
    embedder: Arc<dyn ImageEmbedder>,
    store: IndexStore,
    events: mpsc::Sender<BuildEvent>,
    cancel: Arc<AtomicBool>,
}

impl IndexBuilder {
    pub fn new(
        embedder: Arc<dyn ImageEmbedder>,
        store: IndexStore,
        events: mpsc::Sender<BuildEvent>,
    ) -> Self {
        Self {
            embedder,
            store,
            events,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag shared with the front end; setting it requests cancellation.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run the build to a terminal event. Intended for a worker thread;
    /// the receiver side of the channel drives the UI.
    pub fn run(self, options: BuildOptions) {
        match self.try_run(&options) {
            Ok(Some(summary)) => self.emit(BuildEvent::Done(summary)),
            Ok(None) => self.emit(BuildEvent::Cancelled),
            Err(err) => self.emit(BuildEvent::Failed(err.to_string())),
        }
    }

    fn try_run(&self, options: &BuildOptions) -> Result<Option<BuildSummary>, BuildError> {
        let mut state = self.previous_state(options.incremental);

        // Scanning: stream the catalog, checking for cancellation per
        // record. Exclusion filtering keeps the accumulated set tractable
        // even for whole-machine scans.
        let mut records: Vec<FileRecord> = Vec::new();
        for record in catalog::scan(&options.roots, &options.scan) {
            if self.cancelled() {
                return Ok(None);
            }
            records.push(record);
            if records.len() % SCAN_PROGRESS_EVERY == 0 {
                self.progress(BuildPhase::Scanning, records.len(), 0);
            }
        }
        self.progress(BuildPhase::Scanning, records.len(), records.len());
        if self.cancelled() {
            return Ok(None);
        }

        if records.is_empty() && state.is_empty() {
            return Err(BuildError::NoImagesFound);
        }

        let plan = cache::plan(&records, &state.known());
        let unchanged = records.len() - plan.to_embed.len();
        let total = plan.to_embed.len();
        log::info!(
            "{} to embed, {} to remove, {} unchanged",
            total,
            plan.to_remove.len(),
            unchanged
        );

        // Embedding: per-file failures are counted skips, never fatal.
        let mut embedded: Vec<(FileRecord, Vec<f32>)> = Vec::with_capacity(total);
        let mut skipped = 0usize;
        self.progress(BuildPhase::Embedding, 0, total);
        for (i, record) in plan.to_embed.into_iter().enumerate() {
            if self.cancelled() {
                return Ok(None);
            }
            match self.embedder.embed_file(&record.path) {
                Ok(vector) => embedded.push((record, vector)),
                Err(err) => {
                    log::warn!("skipping {}: {err}", record.path.display());
                    skipped += 1;
                }
            }
            self.progress(BuildPhase::Embedding, i + 1, total);
        }
        if self.cancelled() {
            return Ok(None);
        }

        // Merging: apply removals and upserts in memory. Cancellation is
        // not polled here; the merge completes as one unit.
        let work = plan.to_remove.len() + embedded.len();
        self.progress(BuildPhase::Merging, 0, work);
        let mut removed = 0usize;
        for path in &plan.to_remove {
            if state.remove_path(path) {
                removed += 1;
            }
        }
        let mut merged = 0usize;
        for (record, vector) in embedded {
            let entry = IndexEntry::from(&record);
            match state.upsert(entry, vector) {
                Ok(()) => merged += 1,
                Err(err) => {
                    log::warn!("skipping {}: {err}", record.path.display());
                    skipped += 1;
                }
            }
        }
        self.progress(BuildPhase::Merging, work, work);

        // A cancel that landed during the merge is honored here, before
        // anything touches the on-disk pair.
        if self.cancelled() {
            return Ok(None);
        }

        self.progress(BuildPhase::Persisting, 0, 1);
        self.store
            .save(&state, &self.embedder.model_id_hash())
            .map_err(|source| BuildError::Store {
                phase: BuildPhase::Persisting,
                source,
            })?;
        self.progress(BuildPhase::Persisting, 1, 1);

        Ok(Some(BuildSummary {
            embedded: merged,
            removed,
            skipped,
            unchanged,
            total_indexed: state.len(),
        }))
    }

    /// Seed state for the build: the loaded previous index when running
    /// incrementally, a fresh one otherwise. Anything unusable on disk
    /// degrades to from-scratch, which is exactly the rebuild path.
    fn previous_state(&self, incremental: bool) -> IndexState {
        let dimensions = self.embedder.dimensions();
        if !incremental {
            return IndexState::new(dimensions);
        }
        match self.store.load(&self.embedder.model_id_hash(), dimensions) {
            Ok(state) => {
                log::info!("loaded {} indexed entries", state.len());
                state
            }
            Err(StoreError::NotFound) => IndexState::new(dimensions),
            Err(err) => {
                log::warn!("previous index unusable ({err}), rebuilding from scratch");
                IndexState::new(dimensions)
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn progress(&self, phase: BuildPhase, processed: usize, total: usize) {
        self.emit(BuildEvent::Progress {
            phase,
            processed,
            total,
        });
    }

    fn emit(&self, event: BuildEvent) {
        // The receiver may have hung up (front end gone); builds finish
        // regardless.
        let _ = self.events.send(event);
    }
}
