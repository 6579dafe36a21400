use std::{
    collections::BTreeMap,
    io::Write,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{
    doc_id::DocumentId,
    error::{Error, Result},
    record::DocumentRecord,
};

const FORMAT_VERSION: u32 = 1;

/// Write `contents` to a sibling temp file, sync it, then rename it over
/// `path`. A failed write leaves the previous file intact.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Counts from the most recent build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    /// Canonical records after deduplication.
    pub discovered: usize,
    /// Records extracted and written by the build.
    pub indexed: usize,
    pub unchanged: usize,
    /// Records newly marked removed.
    pub removed: usize,
    /// Removed records that reappeared.
    pub restored: usize,
    /// Extraction failures.
    pub skipped: usize,
}

/// On-disk layout of `papers.json`.
#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    built_at: u64,
    key_strategy: String,
    stats: BuildStats,
    papers: BTreeMap<String, DocumentRecord>,
}

/// The persisted set of document records, keyed by numeric id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataIndex {
    pub key_strategy: String,
    /// Seconds since the Unix epoch of the last save.
    pub built_at: u64,
    pub stats: BuildStats,
    records: BTreeMap<u64, DocumentRecord>,
}

impl MetadataIndex {
    pub fn new(key_strategy: &str) -> Self {
        Self {
            key_strategy: key_strategy.to_string(),
            ..Default::default()
        }
    }

    /// Load `papers.json`; a missing file yields an empty index.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let file: IndexFile = serde_json::from_str(&content)?;
        if file.version != FORMAT_VERSION {
            return Err(Error::Config(format!(
                "{} has format version {}, expected {FORMAT_VERSION}; rebuild with build-index",
                path.display(),
                file.version
            )));
        }

        let records = file
            .papers
            .into_values()
            .map(|r| (r.id.numeric, r))
            .collect();
        Ok(Self {
            key_strategy: file.key_strategy,
            built_at: file.built_at,
            stats: file.stats,
            records,
        })
    }

    /// Serialize and write with [`write_atomic`].
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.built_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let file = IndexFile {
            version: FORMAT_VERSION,
            built_at: self.built_at,
            key_strategy: self.key_strategy.clone(),
            stats: self.stats,
            papers: self
                .records
                .values()
                .map(|r| (r.id.hex(), r.clone()))
                .collect(),
        };

        write_atomic(path, &serde_json::to_vec_pretty(&file)?)?;
        tracing::debug!(path = %path.display(), records = self.records.len(), "saved metadata index");
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&DocumentRecord> {
        self.records.get(&id)
    }

    pub fn insert(&mut self, record: DocumentRecord) {
        self.records.insert(record.id.numeric, record);
    }

    /// Every record, removed ones included, in id order.
    pub fn records(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.records.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut DocumentRecord> {
        self.records.values_mut()
    }

    /// Records that take part in ranking, in id order.
    pub fn live(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.records.values().filter(|r| !r.removed)
    }

    pub fn live_count(&self) -> usize {
        self.live().count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Resolve a user-supplied reference: `#short` or full hex id, then a
    /// case-insensitive title or file-name substring. Only live records
    /// match.
    pub fn find(&self, reference: &str) -> Option<&DocumentRecord> {
        let reference = reference.trim();
        if let Some(id) = DocumentId::parse_hex(reference)
            && let Some(r) = self.get(id.numeric).filter(|r| !r.removed)
        {
            return Some(r);
        }
        if let Some(short) = reference.strip_prefix('#') {
            let short = short.to_ascii_lowercase();
            let mut matches = self.live().filter(|r| r.id.hex().starts_with(&short));
            let first = matches.next();
            if matches.next().is_none() {
                return first;
            }
            return None;
        }
        let needle = reference.to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.live()
            .find(|r| r.title.to_lowercase() == needle)
            .or_else(|| {
                self.live().find(|r| {
                    r.title.to_lowercase().contains(&needle)
                        || r.file_name().to_lowercase().contains(&needle)
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::record;

    #[test]
    fn missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let index = MetadataIndex::load(&tmp.path().join("papers.json")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn save_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("papers.json");

        let mut index = MetadataIndex::new("file_name");
        index.insert(record("a.pdf", "Runoff trends"));
        let mut gone = record("b.pdf", "Old paper");
        gone.removed = true;
        index.insert(gone);
        index.stats.indexed = 2;
        index.save(&path).unwrap();

        assert!(!tmp.path().join("papers.json.tmp").exists());
        let loaded = MetadataIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.live_count(), 1);
        assert_eq!(loaded.key_strategy, "file_name");
    }

    #[test]
    fn resave_leaves_only_the_index_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data").join("papers.json");

        let mut index = MetadataIndex::new("file_name");
        index.insert(record("a.pdf", "Runoff trends"));
        index.save(&path).unwrap();
        index.insert(record("b.pdf", "Snowmelt timing"));
        index.save(&path).unwrap();

        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("papers.json")]);
        assert_eq!(MetadataIndex::load(&path).unwrap().len(), 2);
    }

    #[test]
    fn failed_save_keeps_target_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        // A directory in the way makes the final rename fail.
        let path = tmp.path().join("papers.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "x").unwrap();

        let mut index = MetadataIndex::new("file_name");
        index.insert(record("a.pdf", "A"));
        assert!(index.save(&path).is_err());

        assert!(path.join("keep").exists());
        let stray: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n != "papers.json")
            .collect();
        assert!(stray.is_empty(), "{stray:?}");
    }

    #[test]
    fn papers_keyed_by_hex_id() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("papers.json");
        let r = record("a.pdf", "A");
        let hex = r.id.hex();

        let mut index = MetadataIndex::new("file_name");
        index.insert(r);
        index.save(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["papers"][&hex]["title"], "A");
    }

    #[test]
    fn wrong_version_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("papers.json");
        std::fs::write(
            &path,
            r#"{"version": 99, "built_at": 0, "key_strategy": "file_name",
                "stats": {"discovered":0,"indexed":0,"unchanged":0,"removed":0,"restored":0,"skipped":0},
                "papers": {}}"#,
        )
        .unwrap();
        assert!(matches!(MetadataIndex::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn find_by_id_title_and_file_name() {
        let mut index = MetadataIndex::new("file_name");
        let a = record("smith2020.pdf", "Runoff trends in alpine basins");
        let b = record("li2021.pdf", "Runoff");
        let a_hex = a.id.hex();
        let a_short = a.id.short.clone();
        index.insert(a);
        index.insert(b);

        let find_title = |q: &str| index.find(q).map(|r| r.title.clone());
        assert_eq!(find_title(&a_hex).as_deref(), Some("Runoff trends in alpine basins"));
        assert_eq!(
            find_title(&format!("#{a_short}")).as_deref(),
            Some("Runoff trends in alpine basins")
        );
        assert_eq!(find_title("runoff").as_deref(), Some("Runoff"));
        assert_eq!(find_title("alpine").as_deref(), Some("Runoff trends in alpine basins"));
        assert_eq!(find_title("li2021").as_deref(), Some("Runoff"));
        assert_eq!(find_title("nothing"), None);
    }
}
