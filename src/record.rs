use std::{collections::BTreeSet, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::doc_id::DocumentId;

/// Where a raw record was discovered.
///
/// Local roots sort before the metadata store, which is how a merged
/// record picks its primary file.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    Local { root: String },
    Store,
}

impl Origin {
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local { .. })
    }

    pub fn label(&self) -> &str {
        match self {
            Origin::Local { root } => root,
            Origin::Store => "store",
        }
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Provenance {
    pub origin: Origin,
    pub path: PathBuf,
}

/// One canonical paper in the metadata index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<u16>,
    pub language: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    /// The abstract is the first content paragraph or a text snippet, not
    /// a marked abstract section.
    #[serde(default)]
    pub abstract_fallback: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Keywords were generated from term frequency rather than read from
    /// the paper's own keyword line.
    #[serde(default)]
    pub keywords_auto: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Source-language tags assigned by the reverse tag map.
    #[serde(default)]
    pub synthetic_tags: BTreeSet<String>,
    pub provenance: BTreeSet<Provenance>,
    /// The file the text was extracted from.
    pub path: PathBuf,
    #[serde(default)]
    pub page_count: usize,
    /// Long document carrying thesis or dissertation front matter.
    #[serde(default)]
    pub thesis: bool,
    pub change_token: String,
    #[serde(default)]
    pub removed: bool,
}

impl DocumentRecord {
    /// The fixed embedding input: title, newline, abstract.
    pub fn embedding_input(&self) -> String {
        format!("{}\n{}", self.title, self.abstract_text)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Whether any provenance entry comes from the named root
    /// (`store` selects the metadata store).
    pub fn from_root(&self, root: &str) -> bool {
        self.provenance.iter().any(|p| p.origin.label() == root)
    }
}
