use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "PAPERBERT_DATA_DIR";
const APP_NAME: &str = "paperbert";

/// Where the data directory location came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirSource {
    Flag,
    Env,
    Xdg,
}

/// Layout of everything paperbert persists:
///
/// ```text
/// <root>/config.redb      roots and settings
/// <root>/papers.json      metadata index
/// <root>/papers.md        readable catalogue, rewritten by build-index
/// <root>/vectors.redb     vector index
/// <root>/dictionaries/    default dictionary directory
/// ```
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
    source: DataDirSource,
}

impl DataDir {
    /// Resolve and create the data directory. `--data-dir` beats
    /// `PAPERBERT_DATA_DIR`, which beats the XDG data home.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let env = std::env::var_os(DATA_DIR_ENV_VAR).filter(|v| !v.is_empty());
        let (root, source) = match (explicit, env) {
            (Some(path), _) => (path.to_path_buf(), DataDirSource::Flag),
            (None, Some(val)) => (PathBuf::from(val), DataDirSource::Env),
            (None, None) => (xdg_data_home()?, DataDirSource::Xdg),
        };

        if let Err(e) = std::fs::create_dir_all(&root) {
            tracing::error!(path = %root.display(), error = %e, "cannot create data directory");
            return Err(Error::DataDir(root));
        }
        tracing::debug!(path = %root.display(), ?source, "using data directory");
        Ok(Self { root, source })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> DataDirSource {
        self.source
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    pub fn papers_json(&self) -> PathBuf {
        self.root.join("papers.json")
    }

    pub fn catalog_md(&self) -> PathBuf {
        self.root.join("papers.md")
    }

    pub fn vectors_db(&self) -> PathBuf {
        self.root.join("vectors.redb")
    }

    /// Used unless the `dictionary_dir` setting points elsewhere.
    pub fn dictionary_dir(&self) -> PathBuf {
        self.root.join("dictionaries")
    }
}

fn xdg_data_home() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix(APP_NAME)
        .get_data_home()
        .ok_or_else(|| Error::Config("could not determine the XDG data home".into()))
}
