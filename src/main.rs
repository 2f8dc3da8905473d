use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};

use anyhow::{bail, Context};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::error::InquireResult;

mod builder;
mod cache;
mod catalog;
mod cli;
mod config;
mod embedder;
mod index;
mod lock;
mod roots;
mod search;
#[cfg(test)]
mod tests;

use builder::{BuildEvent, BuildOptions, BuildPhase, IndexBuilder};
use config::Config;
use embedder::{ClipEmbedder, ImageEmbedder};
use index::{IndexStore, StoreError};
use lock::IndexLock;
use search::SearchEngine;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = cli::Args::parse();

    let base = config::base_dir();
    std::fs::create_dir_all(&base)
        .with_context(|| format!("failed to create data directory {}", base.display()))?;
    let config = Config::load_with(&base);

    match args.command {
        cli::Command::Index {
            paths,
            whole_machine,
            exclude,
            full,
            yes,
        } => run_index(&config, &base, paths, whole_machine, &exclude, full, yes),

        cli::Command::Search {
            image,
            limit,
            threshold,
            json,
        } => run_search(&config, &base, &image, limit, threshold, json),

        cli::Command::Info {} => run_info(&base),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_index(
    config: &Config,
    base: &std::path::Path,
    paths: Vec<PathBuf>,
    whole_machine: bool,
    exclude: &[String],
    full: bool,
    yes: bool,
) -> anyhow::Result<()> {
    let roots = if whole_machine {
        if !yes {
            match inquire::prompt_confirmation(
                "Scan the entire machine including mounted drives? This can take hours for large collections.",
            ) {
                InquireResult::Ok(true) => {}
                InquireResult::Ok(false) => return Ok(()),
                InquireResult::Err(err) => bail!("An error occurred: {}", err),
            }
        }
        roots::system_roots()
    } else {
        if paths.is_empty() {
            bail!("give at least one directory to index, or use --whole-machine");
        }
        let mut roots = Vec::with_capacity(paths.len());
        for path in paths {
            let root = std::fs::canonicalize(&path)
                .with_context(|| format!("cannot access {}", path.display()))?;
            if !root.is_dir() {
                bail!("{} is not a directory", root.display());
            }
            roots.push(root);
        }
        roots
    };

    let _lock = IndexLock::try_exclusive(base)
        .map_err(|_| anyhow::anyhow!("another lookalike process is using the index; try again later"))?;

    log::info!("loading embedding model '{}'", config.indexing.model);
    let embedder: Arc<dyn ImageEmbedder> =
        Arc::new(ClipEmbedder::new(&config.indexing.model, base.to_path_buf())?);

    let store = IndexStore::new(base);
    let (events_tx, events_rx) = mpsc::channel();
    let builder = IndexBuilder::new(embedder, store, events_tx);

    let cancel = builder.cancel_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nstopping after the current file...");
        cancel.store(true, Ordering::SeqCst);
    })
    .context("failed to install Ctrl+C handler")?;

    let options = BuildOptions {
        roots,
        scan: config.scan_options(exclude),
        incremental: !full,
    };
    let worker = std::thread::spawn(move || builder.run(options));

    let outcome = report_progress(events_rx);
    let _ = worker.join();

    match outcome {
        Some(BuildEvent::Done(summary)) => {
            println!(
                "indexed {} images ({} new, {} unchanged, {} removed)",
                summary.total_indexed, summary.embedded, summary.unchanged, summary.removed
            );
            if summary.skipped > 0 {
                println!(
                    "{} files could not be read and were skipped",
                    summary.skipped
                );
            }
            Ok(())
        }
        Some(BuildEvent::Cancelled) => {
            println!("indexing cancelled; the previous index is untouched");
            Ok(())
        }
        Some(BuildEvent::Failed(reason)) => bail!("indexing failed: {reason}"),
        _ => bail!("indexing worker exited without reporting a result"),
    }
}

/// Drain builder events into a progress bar; returns the terminal event.
fn report_progress(events: mpsc::Receiver<BuildEvent>) -> Option<BuildEvent> {
    let bar = ProgressBar::new_spinner();

    for event in events {
        match event {
            BuildEvent::Progress {
                phase: BuildPhase::Scanning,
                processed,
                ..
            } => {
                bar.set_message(format!("discovered {processed} images"));
                bar.tick();
            }
            BuildEvent::Progress {
                phase: BuildPhase::Embedding,
                processed,
                total,
            } => {
                if bar.length() != Some(total as u64) {
                    bar.set_length(total as u64);
                    bar.set_style(
                        ProgressStyle::with_template(
                            "{bar:40} {pos}/{len} {msg}",
                        )
                        .expect("valid progress template"),
                    );
                    bar.set_message("embedding");
                }
                bar.set_position(processed as u64);
            }
            BuildEvent::Progress { phase, .. } => {
                bar.set_message(phase.to_string());
                bar.tick();
            }
            terminal => {
                bar.finish_and_clear();
                return Some(terminal);
            }
        }
    }

    bar.finish_and_clear();
    None
}

fn run_search(
    config: &Config,
    base: &std::path::Path,
    image: &std::path::Path,
    limit: Option<usize>,
    threshold: Option<f32>,
    json: bool,
) -> anyhow::Result<()> {
    let threshold = threshold.unwrap_or(config.search.default_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        bail!("threshold must be between 0.0 and 1.0");
    }
    let limit = limit.unwrap_or(config.search.default_limit);

    log::info!("loading embedding model '{}'", config.indexing.model);
    let embedder: Arc<dyn ImageEmbedder> =
        Arc::new(ClipEmbedder::new(&config.indexing.model, base.to_path_buf())?);

    let state = {
        let _lock = IndexLock::try_shared(base).map_err(|_| {
            anyhow::anyhow!("an index build is in progress; try again when it finishes")
        })?;
        load_state(base, embedder.as_ref())?
    };

    let engine = SearchEngine::new(embedder, state);
    log::debug!("searching {} indexed images", engine.indexed_count());
    let results = engine.search(image, limit, threshold)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("no similar images found");
        return Ok(());
    }
    for result in &results {
        println!("{:5.1}%  {}", result.score * 100.0, result.path.display());
    }
    Ok(())
}

fn load_state(
    base: &std::path::Path,
    embedder: &dyn ImageEmbedder,
) -> anyhow::Result<index::IndexState> {
    let store = IndexStore::new(base);
    match store.load(&embedder.model_id_hash(), embedder.dimensions()) {
        Ok(state) => Ok(state),
        Err(StoreError::NotFound) => {
            bail!("no index found; build one first with `lookalike index <dir>`")
        }
        Err(err) if err.needs_rebuild() => {
            bail!("index is unusable ({err}); rebuild with `lookalike index --full <dir>`")
        }
        Err(err) => Err(err.into()),
    }
}

fn run_info(base: &std::path::Path) -> anyhow::Result<()> {
    let _lock = IndexLock::try_shared(base)
        .map_err(|_| anyhow::anyhow!("an index build is in progress; try again when it finishes"))?;

    let store = IndexStore::new(base);
    match store.stats() {
        Ok(stats) => {
            let megabytes =
                (stats.vectors_bytes + stats.paths_bytes) as f64 / (1024.0 * 1024.0);
            println!("{} images indexed", stats.entries);
            println!("{} dimensions per embedding", stats.dimensions);
            println!("{megabytes:.1} MB on disk ({})", base.display());
            Ok(())
        }
        Err(StoreError::NotFound) => {
            println!("no index found; build one with `lookalike index <dir>`");
            Ok(())
        }
        Err(err) => {
            bail!("cannot read index: {err}")
        }
    }
}
