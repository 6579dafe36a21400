use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

/// A discovered document file.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the root directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Last modification time as seconds since the Unix epoch.
    pub mtime: u64,
    pub size: u64,
}

/// Supported file extensions for document discovery.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "md", "txt"];

/// File-name globs for attachments that are not papers: supplementary
/// material, review files and translated copies.
///
/// Each English phrase appears twice, at the start of the name and after a
/// separator, and must be followed by a separator, so `supplementation` or
/// `open peer review practices` are still indexed.
pub const DEFAULT_SKIP_PATTERNS: &[&str] = &[
    "supplement[!a-z0-9]*",
    "*[!a-z0-9]supplement[!a-z0-9]*",
    "supplementary[!a-z0-9]*",
    "*[!a-z0-9]supplementary[!a-z0-9]*",
    "supplemental material*",
    "*[!a-z0-9]supplemental material*",
    "supporting information*",
    "*[!a-z0-9]supporting information*",
    "transparent peer review*",
    "*[!a-z0-9]transparent peer review*",
    "peer review file*",
    "*[!a-z0-9]peer review file*",
    "*中文翻译*",
    "*中译全文*",
    "*中文全译*",
    "*补充材料*",
];

/// Case-insensitive file-name filter.
#[derive(Debug, Clone)]
pub struct SkipPatterns {
    set: GlobSet,
}

impl SkipPatterns {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = GlobBuilder::new(pattern.as_ref())
                .case_insensitive(true)
                .literal_separator(false)
                .build()
                .map_err(|e| {
                    Error::Config(format!(
                        "invalid skip pattern '{}': {e}",
                        pattern.as_ref()
                    ))
                })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| Error::Config(format!("invalid skip patterns: {e}")))?;
        Ok(Self { set })
    }

    pub fn none() -> Self {
        Self {
            set: GlobSet::empty(),
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.set.is_match(file_name)
    }
}

impl Default for SkipPatterns {
    fn default() -> Self {
        Self::new(DEFAULT_SKIP_PATTERNS).unwrap_or_else(|_| Self::none())
    }
}

/// Recursively walk a directory and discover eligible document files.
///
/// Skips hidden files/directories (names starting with `.`), files whose
/// name matches `skip`, and files without a supported extension.
pub fn discover_files(
    root: &Path,
    skip: &SkipPatterns,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, skip, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    skip: &SkipPatterns,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        // Skip hidden files and directories.
        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &entry.path(), skip, results)?;
        } else if file_type.is_symlink() {
            let resolved = match entry.path().canonicalize() {
                Ok(p) => p,
                Err(_) => continue, // Skip broken symlinks
            };
            // Cycle prevention.
            if resolved.starts_with(root) && resolved.is_dir() {
                continue;
            }
            if resolved.is_file() && is_eligible(&resolved, &name, skip) {
                results.push(make_discovered(root, &entry.path(), &resolved)?);
            }
        } else if file_type.is_file() && is_eligible(&entry.path(), &name, skip)
        {
            let abs = entry.path().canonicalize()?;
            results.push(make_discovered(root, &entry.path(), &abs)?);
        }
    }

    Ok(())
}

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        })
}

fn is_eligible(path: &Path, name: &str, skip: &SkipPatterns) -> bool {
    if !is_supported(path) {
        return false;
    }
    if skip.matches(name) {
        tracing::debug!(file = name, "skipping attachment");
        return false;
    }
    true
}

/// Size and modification time of a file, as used for change detection.
pub fn file_stamp(path: &Path) -> Result<(u64, u64)> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    Ok((meta.len(), mtime))
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
) -> Result<DiscoveredFile> {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();
    let (size, mtime) = file_stamp(absolute_path)?;

    Ok(DiscoveredFile {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
        mtime,
        size,
    })
}
