//! Source enumeration: local directory roots plus an optional metadata store.

use std::path::PathBuf;

use crate::{
    error::Result,
    metadata_store::{CatalogueRecord, MetadataStore},
    record::Origin,
    walker::{self, SkipPatterns},
};

/// A named local directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRoot {
    pub name: String,
    pub path: PathBuf,
}

/// One discovered file, before deduplication.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub origin: Origin,
    /// Absolute path of the file.
    pub path: PathBuf,
    pub size: u64,
    pub mtime: u64,
    /// Catalogue metadata, present for store-origin records.
    pub catalogue: Option<CatalogueRecord>,
}

impl RawRecord {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct ScanOutput {
    pub records: Vec<RawRecord>,
    /// The metadata store was configured but could not be read.
    pub store_unavailable: bool,
    /// Catalogue entries whose attachment file is missing or filtered.
    pub store_missing_files: usize,
}

pub struct Scanner<'a> {
    roots: &'a [LocalRoot],
    store: Option<&'a dyn MetadataStore>,
    skip: &'a SkipPatterns,
}

impl<'a> Scanner<'a> {
    pub fn new(
        roots: &'a [LocalRoot],
        store: Option<&'a dyn MetadataStore>,
        skip: &'a SkipPatterns,
    ) -> Self {
        Self { roots, store, skip }
    }

    /// Enumerate every supported file under each root and every catalogued
    /// attachment in the store.
    ///
    /// A missing root or an unreadable store is logged and skipped.
    pub fn scan(&self) -> Result<ScanOutput> {
        let mut out = ScanOutput::default();

        for root in self.roots {
            if !root.path.is_dir() {
                tracing::warn!(
                    root = %root.name,
                    path = %root.path.display(),
                    "root directory does not exist, skipping"
                );
                continue;
            }
            let files = walker::discover_files(&root.path, self.skip)?;
            tracing::info!(root = %root.name, files = files.len(), "scanned root");
            out.records.extend(files.into_iter().map(|f| RawRecord {
                origin: Origin::Local {
                    root: root.name.clone(),
                },
                path: f.absolute_path,
                size: f.size,
                mtime: f.mtime,
                catalogue: None,
            }));
        }

        if let Some(store) = self.store {
            match store.records() {
                Ok(entries) => {
                    let total = entries.len();
                    for entry in entries {
                        match self.store_record(entry) {
                            Some(raw) => out.records.push(raw),
                            None => out.store_missing_files += 1,
                        }
                    }
                    tracing::info!(
                        store = %store.location().display(),
                        catalogued = total,
                        missing = out.store_missing_files,
                        "scanned metadata store"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        store = %store.location().display(),
                        error = %e,
                        "metadata store unavailable, using local roots only"
                    );
                    out.store_unavailable = true;
                }
            }
        }

        Ok(out)
    }

    fn store_record(&self, entry: CatalogueRecord) -> Option<RawRecord> {
        let name = entry.path.file_name()?.to_string_lossy().into_owned();
        if self.skip.matches(&name) {
            return None;
        }
        let (size, mtime) = match walker::file_stamp(&entry.path) {
            Ok(stamp) => stamp,
            Err(_) => {
                tracing::debug!(path = %entry.path.display(), "catalogued file missing");
                return None;
            }
        };
        Some(RawRecord {
            origin: Origin::Store,
            path: entry.path.clone(),
            size,
            mtime,
            catalogue: Some(entry),
        })
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::path::Path;

    use super::*;
    use crate::error::Error;

    /// An in-memory catalogue, or an unavailable one.
    pub struct FakeStore {
        pub location: PathBuf,
        pub records: Option<Vec<CatalogueRecord>>,
    }

    impl MetadataStore for FakeStore {
        fn location(&self) -> &Path {
            &self.location
        }

        fn records(&self) -> Result<Vec<CatalogueRecord>> {
            self.records.clone().ok_or_else(|| Error::NotFound {
                kind: "metadata store",
                name: self.location.display().to_string(),
            })
        }
    }
}
