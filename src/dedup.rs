//! Merging raw records that refer to the same paper.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    doc_id::DocumentId,
    error::{Error, Result},
    record::Provenance,
    scanner::RawRecord,
};

/// Derives the identity key shared by all raw records of one paper.
///
/// Implementations must be total and deterministic.
pub trait KeyStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn key(&self, raw: &RawRecord) -> Result<String>;
}

/// Normalized file name: numbering prefixes, whitespace and case removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileNameKey;

impl KeyStrategy for FileNameKey {
    fn name(&self) -> &'static str {
        "file_name"
    }

    fn key(&self, raw: &RawRecord) -> Result<String> {
        Ok(normalize_file_name(&raw.file_name()))
    }
}

/// BLAKE3 digest of the file contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHashKey;

impl KeyStrategy for ContentHashKey {
    fn name(&self) -> &'static str {
        "content_hash"
    }

    fn key(&self, raw: &RawRecord) -> Result<String> {
        let file = std::fs::File::open(&raw.path)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update_reader(file)?;
        Ok(hasher.finalize().to_hex().to_string())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    #[default]
    FileName,
    ContentHash,
}

impl DedupKey {
    pub fn strategy(self) -> Box<dyn KeyStrategy> {
        match self {
            DedupKey::FileName => Box::new(FileNameKey),
            DedupKey::ContentHash => Box::new(ContentHashKey),
        }
    }
}

impl std::str::FromStr for DedupKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file_name" => Ok(DedupKey::FileName),
            "content_hash" => Ok(DedupKey::ContentHash),
            other => Err(Error::Config(format!(
                "unknown dedup key '{other}' (expected file_name or content_hash)"
            ))),
        }
    }
}

/// Strip a leading `论文53-` / `39.` style numbering prefix, drop
/// whitespace and lowercase.
pub fn normalize_file_name(name: &str) -> String {
    let trimmed = name.trim();
    let rest = trimmed.strip_prefix("论文").unwrap_or(trimmed);
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let stripped = if digits > 0 {
        let after = &rest[digits..];
        let seps = after
            .chars()
            .take_while(|c| matches!(c, '.' | '-' | ' ' | '\t'))
            .map(char::len_utf8)
            .sum::<usize>();
        if seps > 0 && seps < after.len() {
            &after[seps..]
        } else {
            trimmed
        }
    } else {
        trimmed
    };
    stripped
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// One paper after merging every raw record that shares its key.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub id: DocumentId,
    pub key: String,
    /// The file text is extracted from; local copies win over store copies.
    pub primary: PathBuf,
    pub title: String,
    /// `title` came from the metadata store rather than the file name.
    pub title_from_store: bool,
    pub authors: Vec<String>,
    pub year: Option<u16>,
    pub tags: BTreeSet<String>,
    pub provenance: BTreeSet<Provenance>,
    pub change_token: String,
}

/// Merge raw records into canonical records, sorted by id.
///
/// The input order does not affect the output. Records whose key cannot be
/// computed are logged and dropped.
pub fn merge(
    raws: Vec<RawRecord>,
    strategy: &dyn KeyStrategy,
) -> Vec<CanonicalRecord> {
    let mut keyed: Vec<(String, RawRecord)> = raws
        .into_iter()
        .filter_map(|raw| match strategy.key(&raw) {
            Ok(key) => Some((key, raw)),
            Err(e) => {
                tracing::warn!(
                    path = %raw.path.display(),
                    error = %e,
                    "cannot compute dedup key, skipping"
                );
                None
            }
        })
        .collect();
    keyed.sort_by(|(ka, a), (kb, b)| {
        ka.cmp(kb)
            .then_with(|| a.origin.cmp(&b.origin))
            .then_with(|| a.path.cmp(&b.path))
    });

    let mut groups: BTreeMap<String, Vec<RawRecord>> = BTreeMap::new();
    for (key, raw) in keyed {
        groups.entry(key).or_default().push(raw);
    }

    let mut merged: BTreeMap<u64, CanonicalRecord> = BTreeMap::new();
    for (key, group) in groups {
        let record = merge_group(key, &group);
        if let Some(existing) = merged.get(&record.id.numeric) {
            tracing::warn!(
                kept = %existing.primary.display(),
                dropped = %record.primary.display(),
                "document id collision"
            );
            continue;
        }
        merged.insert(record.id.numeric, record);
    }

    merged.into_values().collect()
}

fn merge_group(key: String, group: &[RawRecord]) -> CanonicalRecord {
    let primary_raw = group
        .iter()
        .find(|r| r.origin.is_local())
        .unwrap_or(&group[0]);

    let mut title = String::new();
    let mut title_rank = (false, 0usize);
    let mut authors: Vec<String> = Vec::new();
    let mut year = None;
    let mut tags = BTreeSet::new();
    let mut provenance = BTreeSet::new();

    for raw in group {
        provenance.insert(Provenance {
            origin: raw.origin.clone(),
            path: raw.path.clone(),
        });

        let Some(cat) = &raw.catalogue else {
            continue;
        };
        let cat_title = cat.title.trim();
        let rank = (true, cat_title.chars().count());
        if !cat_title.is_empty() && rank > title_rank {
            title = cat_title.to_string();
            title_rank = rank;
        }
        if cat.authors.len() > authors.len() {
            authors = cat.authors.clone();
        }
        if year.is_none() {
            year = cat.year;
        }
        for tag in cat.tags.iter().chain(&cat.collections) {
            let tag = tag.trim();
            if !tag.is_empty() {
                tags.insert(tag.to_string());
            }
        }
    }

    let title_from_store = title_rank.0;
    if !title_from_store {
        title = file_stem(&primary_raw.path);
    }

    let change_token = change_token(primary_raw, &title, &authors, year, &tags, &provenance);

    CanonicalRecord {
        id: DocumentId::from_key(&key),
        key,
        primary: primary_raw.path.clone(),
        title,
        title_from_store,
        authors,
        year,
        tags,
        provenance,
        change_token,
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().trim().to_string())
        .unwrap_or_default()
}

/// Digest over the primary file's size and mtime, the merged catalogue
/// metadata and the provenance set.
fn change_token(
    primary: &RawRecord,
    title: &str,
    authors: &[String],
    year: Option<u16>,
    tags: &BTreeSet<String>,
    provenance: &BTreeSet<Provenance>,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(primary.path.to_string_lossy().as_bytes());
    hasher.update(&primary.size.to_le_bytes());
    hasher.update(&primary.mtime.to_le_bytes());
    hasher.update(title.as_bytes());
    hasher.update(b"\0");
    for author in authors {
        hasher.update(author.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(&year.unwrap_or(0).to_le_bytes());
    for tag in tags {
        hasher.update(tag.as_bytes());
        hasher.update(b"\0");
    }
    for p in provenance {
        hasher.update(p.origin.label().as_bytes());
        hasher.update(p.path.to_string_lossy().as_bytes());
        hasher.update(b"\0");
    }
    hasher.finalize().to_hex()[..32].to_string()
}
