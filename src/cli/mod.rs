//! CLI interface for bucketlib.
//!
//! Provides command-line argument parsing using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::BackendKind;

/// Command-line interface for bucketlib.
#[derive(Parser)]
#[command(name = "bucketlib")]
#[command(author, version, about = "Document bucket keywords for test automation", long_about = None)]
pub struct Cli {
    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run a keyword script against the configured store.
    Run {
        /// Path to the script file.
        script: PathBuf,

        /// Store backend to use instead of the configured one.
        #[arg(short, long)]
        backend: Option<BackendKind>,

        /// Data directory of the local backend.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// List the available keywords and their arguments.
    Keywords,

    /// Create a bucket in the local backend's data directory.
    CreateBucket {
        /// Bucket name.
        name: String,

        /// Password required to connect to the bucket.
        #[arg(short, long)]
        password: Option<String>,

        /// Data directory of the local backend.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
}
