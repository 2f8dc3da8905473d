use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Find images on local storage by visual similarity", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build or update the image index
    Index {
        /// Directories to scan
        paths: Vec<PathBuf>,

        /// Scan all drives and mounted volumes instead of specific paths
        #[clap(long)]
        whole_machine: bool,

        /// Additional directory-name fragment to exclude (repeatable)
        #[clap(short, long)]
        exclude: Vec<String>,

        /// Rebuild from scratch instead of updating incrementally
        #[clap(long)]
        full: bool,

        /// Skip the confirmation prompt for whole-machine scans
        #[clap(short, long)]
        yes: bool,
    },

    /// Find indexed images similar to a query image
    Search {
        /// The query image
        image: PathBuf,

        /// Maximum number of results
        #[clap(short, long)]
        limit: Option<usize>,

        /// Minimum similarity [0.0, 1.0]
        #[clap(short, long)]
        threshold: Option<f32>,

        /// Print results as JSON
        #[clap(long)]
        json: bool,
    },

    /// Show index statistics
    Info {},
}
