use std::path::Path;

use pdf_oxide::PdfDocument;

use crate::error::{Error, Result};

/// Pages read from an ordinary paper.
const FRONT_PAGES: usize = 3;
/// Pages read from a thesis, whose abstract sits after a long front matter.
const THESIS_PAGES: usize = 10;
/// A document shorter than this is never treated as a thesis.
const THESIS_MIN_PAGES: usize = 30;

const THESIS_MARKERS: &[&str] = &[
    "学位论文",
    "硕士",
    "博士",
    "学位类别",
    "指导教师",
    "导师",
    "论文答辩",
    "学科专业",
    "研究方向",
    "论文提交",
    "thesis",
    "dissertation",
    "degree",
    "supervisor",
    "submitted to",
    "fulfillment",
    "requirements for",
];

/// Text and best-effort metadata pulled from one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    pub page_count: usize,
    /// A title the file format states explicitly, such as a markdown heading.
    pub title: Option<String>,
    pub authors: Vec<String>,
}

/// Turns a document file into text.
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Extraction>;
}

/// PDF through `pdf_oxide`, markdown and plain text read directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileExtractor;

impl Extractor for FileExtractor {
    fn extract(&self, path: &Path) -> Result<Extraction> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("pdf") => extract_pdf(path),
            Some("md") => {
                let text = std::fs::read_to_string(path)?;
                let title = markdown_title(&text);
                Ok(Extraction {
                    text,
                    page_count: 1,
                    title,
                    authors: Vec::new(),
                })
            }
            Some("txt") => Ok(Extraction {
                text: std::fs::read_to_string(path)?,
                page_count: 1,
                ..Default::default()
            }),
            _ => Err(Error::Extraction {
                path: path.to_path_buf(),
                reason: "unsupported file type".to_string(),
            }),
        }
    }
}

fn extract_pdf(path: &Path) -> Result<Extraction> {
    let failed = |e: &dyn std::fmt::Display| Error::Extraction {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut doc = PdfDocument::open(path).map_err(|e| failed(&e))?;
    let page_count = doc.page_count().map_err(|e| failed(&e))?;

    let mut text = String::new();
    let front = page_count.min(FRONT_PAGES);
    for page in 0..front {
        text.push_str(&doc.extract_text(page).map_err(|e| failed(&e))?);
        text.push('\n');
    }

    if is_thesis(&text, page_count) {
        tracing::debug!(path = %path.display(), "thesis detected, reading more pages");
        for page in front..page_count.min(THESIS_PAGES) {
            text.push_str(&doc.extract_text(page).map_err(|e| failed(&e))?);
            text.push('\n');
        }
    }

    if text.trim().is_empty() {
        return Err(failed(&"no extractable text (scanned document?)"));
    }

    Ok(Extraction {
        text,
        page_count,
        title: None,
        authors: Vec::new(),
    })
}

/// A long document whose front pages carry at least two degree markers.
pub fn is_thesis(front_text: &str, page_count: usize) -> bool {
    if page_count < THESIS_MIN_PAGES {
        return false;
    }
    let lower = front_text.to_lowercase();
    THESIS_MARKERS.iter().filter(|m| lower.contains(*m)).count() >= 2
}

/// The first non-empty `# ` heading.
fn markdown_title(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let heading = line.trim().strip_prefix("# ")?.trim();
        (!heading.is_empty()).then(|| heading.to_string())
    })
}
