//! Command implementations behind the CLI.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::{BackendKind, Config};
use crate::keywords::BucketLibrary;
use crate::script::{Keyword, ScriptRunner};
use crate::store::local::LocalCluster;
use crate::store::memory::MemoryCluster;

/// Store selection after applying CLI overrides to the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSelection {
    pub backend: BackendKind,
    pub data_dir: PathBuf,
}

impl StoreSelection {
    #[must_use]
    pub fn resolve(
        config: &Config,
        backend: Option<BackendKind>,
        data_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            backend: backend.unwrap_or(config.store.backend),
            data_dir: data_dir.unwrap_or_else(|| config.data_dir()),
        }
    }

    /// Build a keyword library over the selected store.
    #[must_use]
    pub fn library(&self) -> BucketLibrary {
        match self.backend {
            BackendKind::Local => BucketLibrary::new(LocalCluster::new(self.data_dir.clone())),
            BackendKind::Memory => BucketLibrary::new(MemoryCluster::auto_create()),
        }
    }
}

/// Run a keyword script file, writing results to `out`.
///
/// # Returns
///
/// The number of keywords executed.
///
/// # Errors
///
/// Returns an error if the config or script cannot be read, or if a keyword
/// fails.
pub fn run_script<W: Write>(
    script: &Path,
    backend: Option<BackendKind>,
    data_dir: Option<PathBuf>,
    out: &mut W,
) -> anyhow::Result<usize> {
    let config = Config::load()?;
    let selection = StoreSelection::resolve(&config, backend, data_dir);

    let text = std::fs::read_to_string(script)
        .with_context(|| format!("reading script {}", script.display()))?;

    tracing::info!(
        script = %script.display(),
        backend = ?selection.backend,
        data_dir = %selection.data_dir.display(),
        "Running keyword script"
    );

    let mut runner = ScriptRunner::new(selection.library(), config.connection.network);
    runner.run(&text, out)
}

/// Create a bucket directory for the local backend.
///
/// # Returns
///
/// The path of the new bucket.
///
/// # Errors
///
/// Returns an error if the config cannot be loaded or the bucket cannot be
/// created.
pub fn create_bucket(
    name: &str,
    password: Option<&str>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<PathBuf> {
    let config = Config::load()?;
    let root = data_dir.unwrap_or_else(|| config.data_dir());

    let cluster = LocalCluster::new(root);
    cluster.create_bucket(name, password)?;
    Ok(cluster.root().join(name))
}

/// One line per keyword: its name followed by its arguments.
#[must_use]
pub fn keyword_list() -> Vec<String> {
    Keyword::ALL
        .iter()
        .map(|keyword| {
            let params = keyword.params();
            if params.is_empty() {
                keyword.name().to_string()
            } else {
                format!("{}  [{}]", keyword.name(), params.join(" | "))
            }
        })
        .collect()
}
