//! Corpus statistics and the readable Markdown catalogue of the library.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

use serde::Serialize;

use crate::{
    analysis::truncate_chars,
    error::Result,
    metadata_index::{MetadataIndex, write_atomic},
    record::DocumentRecord,
};

const CATALOG_KEYWORD_CHARS: usize = 300;
const CATALOG_ABSTRACT_CHARS: usize = 400;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RootSummary {
    pub papers: usize,
    pub with_abstract: usize,
    pub thesis: usize,
}

/// Counts over the live records of a metadata index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorpusSummary {
    pub papers: usize,
    /// Papers per detected language.
    pub languages: BTreeMap<String, usize>,
    /// Papers with a marked abstract section.
    pub with_abstract: usize,
    /// Papers whose abstract is a text fallback.
    pub abstract_fallback: usize,
    pub with_keywords: usize,
    pub keywords_auto: usize,
    pub thesis: usize,
    /// Per root label; a paper found under several roots counts in each.
    pub roots: BTreeMap<String, RootSummary>,
    /// Most frequent keywords (lowercased) with their paper counts.
    pub top_keywords: Vec<(String, usize)>,
}

impl CorpusSummary {
    pub fn of(index: &MetadataIndex, top_keywords: usize) -> Self {
        let mut summary = Self::default();
        let mut keyword_counts: HashMap<String, usize> = HashMap::new();

        for record in index.live() {
            summary.papers += 1;
            *summary.languages.entry(record.language.clone()).or_default() += 1;
            let marked = has_marked_abstract(record);
            if marked {
                summary.with_abstract += 1;
            } else if !record.abstract_text.is_empty() {
                summary.abstract_fallback += 1;
            }
            if !record.keywords.is_empty() {
                summary.with_keywords += 1;
                if record.keywords_auto {
                    summary.keywords_auto += 1;
                }
            }
            if record.thesis {
                summary.thesis += 1;
            }

            for label in root_labels(record) {
                let root = summary.roots.entry(label.to_string()).or_default();
                root.papers += 1;
                root.with_abstract += usize::from(marked);
                root.thesis += usize::from(record.thesis);
            }

            let mut seen = Vec::new();
            for keyword in &record.keywords {
                let keyword = keyword.trim().to_lowercase();
                if !keyword.is_empty() && !seen.contains(&keyword) {
                    *keyword_counts.entry(keyword.clone()).or_default() += 1;
                    seen.push(keyword);
                }
            }
        }

        let mut ranked: Vec<(String, usize)> = keyword_counts.into_iter().collect();
        ranked.sort_by(|(ka, a), (kb, b)| b.cmp(a).then_with(|| ka.cmp(kb)));
        ranked.truncate(top_keywords);
        summary.top_keywords = ranked;
        summary
    }

    pub fn language(&self, language: &str) -> usize {
        self.languages.get(language).copied().unwrap_or(0)
    }
}

fn has_marked_abstract(record: &DocumentRecord) -> bool {
    !record.abstract_text.is_empty() && !record.abstract_fallback
}

/// Distinct root labels in provenance order.
fn root_labels(record: &DocumentRecord) -> Vec<&str> {
    let mut labels: Vec<&str> = Vec::new();
    for p in &record.provenance {
        let label = p.origin.label();
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    labels
}

/// The catalogue: corpus totals, then one section per root listing its
/// papers by title.
pub fn render_markdown(index: &MetadataIndex) -> String {
    let summary = CorpusSummary::of(index, 0);
    let mut lines = vec![
        "# Paper catalogue".to_string(),
        String::new(),
        format!(
            "Papers: {} | with abstract: {} ({} from text fallback) | with keywords: {} | zh: {} | en: {} | theses: {}",
            summary.papers,
            summary.with_abstract,
            summary.abstract_fallback,
            summary.with_keywords,
            summary.language("zh"),
            summary.language("en"),
            summary.thesis,
        ),
    ];

    let mut by_root: BTreeMap<&str, Vec<&DocumentRecord>> = BTreeMap::new();
    for record in index.live() {
        for label in root_labels(record) {
            by_root.entry(label).or_default().push(record);
        }
    }

    for (root, mut papers) in by_root {
        papers.sort_by_cached_key(|r| (r.title.to_lowercase(), r.id.numeric));
        let stats = summary.roots.get(root).cloned().unwrap_or_default();
        lines.push(String::new());
        lines.push(format!(
            "## {root} ({} papers, {} with abstract)",
            stats.papers, stats.with_abstract
        ));
        lines.push(String::new());
        for record in papers {
            lines.extend(entry(record));
        }
    }

    lines.push(String::new());
    lines.join("\n")
}

fn entry(record: &DocumentRecord) -> Vec<String> {
    let mut meta = vec![record.language.clone()];
    if let Some(year) = record.year {
        meta.insert(0, year.to_string());
    }
    if record.page_count > 0 {
        meta.push(format!("{} pages", record.page_count));
    }
    if record.thesis {
        meta.push("thesis".to_string());
    }

    let mut lines = vec![
        format!("- **{}** ({}) {}", record.title, meta.join(", "), record.id),
        format!("  - file: {}", record.file_name()),
    ];
    if !record.keywords.is_empty() {
        let label = if record.keywords_auto { "keywords (auto)" } else { "keywords" };
        lines.push(format!(
            "  - {label}: {}",
            ellipsize(&record.keywords.join("; "), CATALOG_KEYWORD_CHARS)
        ));
    }
    if !record.abstract_text.is_empty() {
        let label = if record.abstract_fallback { "excerpt" } else { "abstract" };
        lines.push(format!(
            "  - {label}: {}",
            ellipsize(&record.abstract_text, CATALOG_ABSTRACT_CHARS)
        ));
    }
    lines
}

fn ellipsize(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", truncate_chars(text, max))
    } else {
        text.to_string()
    }
}

/// Render the catalogue and write it atomically to `path`.
pub fn write_catalog(index: &MetadataIndex, path: &Path) -> Result<()> {
    write_atomic(path, render_markdown(index).as_bytes())?;
    tracing::debug!(path = %path.display(), "wrote catalogue");
    Ok(())
}
