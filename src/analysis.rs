//! Per-document enrichment: language, abstract, keywords, title and year.

use std::collections::{BTreeSet, HashMap};

use crate::{
    dedup::CanonicalRecord,
    dictionary::Dictionaries,
    extraction::Extraction,
    record::DocumentRecord,
    tokenizer::{DomainTokenizer, is_cjk},
};

const MAX_ABSTRACT_CHARS: usize = 2000;
const MIN_ABSTRACT_CHARS: usize = 50;
const SNIPPET_CHARS: usize = 600;
const MAX_KEYWORDS: usize = 8;
const MAX_TITLE_CHARS: usize = 200;
/// Share of CJK characters above which text counts as Chinese.
const ZH_THRESHOLD: f64 = 0.15;

const ABSTRACT_END_EN: &[&str] = &[
    "keywords",
    "keyword",
    "indexterms",
    "introduction",
    "©",
    "copyright",
    "backgroundandsummary",
];
const ABSTRACT_END_ZH: &[&str] =
    &["关键词", "关键字", "keywords", "keyword", "abstract", "中图分类号"];

/// Lines or paragraphs containing these are front matter, not content.
const FRONT_MATTER: &[&str] = &[
    "http",
    "doi:",
    "issn",
    "©",
    "copyright",
    "received",
    "收稿日期",
    "基金项目",
    "作者简介",
    "目录",
    "参考文献",
    "cite this",
    "accepted",
    "published online",
    "supplementary",
];

const TITLE_SKIP: &[&str] = &[
    "doi:",
    "http",
    "journal",
    "volume",
    "issn",
    "收稿日期",
    "基金项目",
    "作者简介",
    "分类号",
    "密级",
    "编号",
    "scientific data",
    "scientific reports",
    "www.",
];

const GENERIC_TITLES: &[&str] = &[
    "article",
    "research article",
    "research papers",
    "original research article",
    "硕士学位论文",
    "博士学位论文",
    "学位论文",
];

/// Front-matter phrases of theses and dissertations, matched lowercase.
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
const THESIS_MIN_PAGES: usize = 30;

/// First plausible year (1900-2099) in `s`.
pub fn find_year(s: &str) -> Option<u16> {
    years(s).next()
}

fn years(s: &str) -> impl Iterator<Item = u16> + '_ {
    let bytes = s.as_bytes();
    (0..bytes.len().saturating_sub(3)).filter_map(move |i| {
        let window = &bytes[i..i + 4];
        if !window.iter().all(u8::is_ascii_digit) {
            return None;
        }
        if !(window.starts_with(b"19") || window.starts_with(b"20")) {
            return None;
        }
        let before = i > 0 && bytes[i - 1].is_ascii_digit();
        let after = bytes.get(i + 4).is_some_and(u8::is_ascii_digit);
        if before || after {
            return None;
        }
        std::str::from_utf8(window).ok()?.parse().ok()
    })
}

/// Most frequent year in the opening of the text, earliest occurrence on a
/// tie.
fn year_from_text(text: &str) -> Option<u16> {
    let head: String = text.chars().take(3000).collect();
    let mut counts: Vec<(u16, usize)> = Vec::new();
    for year in years(&head) {
        match counts.iter_mut().find(|(y, _)| *y == year) {
            Some((_, n)) => *n += 1,
            None => counts.push((year, 1)),
        }
    }
    counts
        .iter()
        .enumerate()
        .max_by(|(ia, (_, a)), (ib, (_, b))| a.cmp(b).then_with(|| ib.cmp(ia)))
        .map(|(_, (year, _))| *year)
}

/// `zh` when CJK characters exceed 15% of the text, `unknown` when empty.
pub fn detect_language(text: &str) -> &'static str {
    let total = text.trim().chars().count();
    if total == 0 {
        return "unknown";
    }
    let cjk = text.chars().filter(|c| is_cjk(*c)).count();
    if cjk as f64 / total as f64 > ZH_THRESHOLD {
        "zh"
    } else {
        "en"
    }
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Find `word` in `hay` starting at byte `from`, allowing whitespace
/// between its characters (`摘 要`, `A B S T R A C T`). `hay` must already
/// be lowercased. Returns the byte range of the match.
fn find_spaced(hay: &str, word: &str, from: usize) -> Option<(usize, usize)> {
    let mut pattern = word.chars();
    let first = pattern.next()?;
    let rest: Vec<char> = pattern.collect();

    for (start, c) in hay[from..].char_indices() {
        if c != first {
            continue;
        }
        let start = from + start;
        let mut pos = start + c.len_utf8();
        let mut matched = true;
        for want in &rest {
            let tail = &hay[pos..];
            let skipped = tail.len() - tail.trim_start().len();
            pos += skipped;
            match hay[pos..].chars().next() {
                Some(got) if got == *want => pos += got.len_utf8(),
                _ => {
                    matched = false;
                    break;
                }
            }
        }
        if matched {
            return Some((start, pos));
        }
    }
    None
}

fn earliest_end(lower: &str, from: usize, terminators: &[&str]) -> usize {
    terminators
        .iter()
        .filter_map(|t| find_spaced(lower, t, from).map(|(s, _)| s))
        .min()
        .unwrap_or(lower.len())
}

fn skip_separators(text: &str, pos: usize) -> usize {
    let rest = &text[pos..];
    let trimmed =
        rest.trim_start_matches(|c: char| c.is_whitespace() || ".:：—–-()（）".contains(c));
    pos + (rest.len() - trimmed.len())
}

/// Text between a section marker and the earliest terminator.
fn section_after(
    text: &str,
    lower: &str,
    markers: &[&str],
    terminators: &[&str],
) -> Option<String> {
    for marker in markers {
        let mut from = 0;
        while let Some((_, end)) = find_spaced(lower, marker, from) {
            let start = skip_separators(text, end);
            let stop = earliest_end(lower, start, terminators);
            let body = collapse_whitespace(&text[start..stop.max(start)]);
            if body.chars().count() > MIN_ABSTRACT_CHARS {
                return Some(truncate_chars(&body, MAX_ABSTRACT_CHARS));
            }
            from = end;
        }
    }
    None
}

/// The paper's own abstract, if it has a marked section.
pub fn marked_abstract(text: &str, language: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    let en = || section_after(text, &lower, &["abstract", "summary"], ABSTRACT_END_EN);
    let zh = || {
        section_after(
            text,
            &lower,
            &["中文摘要", "内容摘要", "摘要"],
            ABSTRACT_END_ZH,
        )
    };
    if language == "zh" {
        zh().or_else(en)
    } else {
        en().or_else(zh)
    }
}

fn is_content_paragraph(paragraph: &str, language: &str) -> bool {
    if paragraph.chars().count() < 150 {
        return false;
    }
    let lower = paragraph.to_lowercase();
    if FRONT_MATTER.iter().any(|m| lower.contains(m)) {
        return false;
    }
    if language == "zh" {
        paragraph.chars().filter(|c| is_cjk(*c)).count() > 50
    } else {
        paragraph.split_whitespace().count() > 40 && paragraph.contains('.')
    }
}

/// First paragraph that reads like body text.
pub fn fallback_abstract(text: &str, language: &str) -> Option<String> {
    let mut paragraph = Vec::new();
    for line in text.lines().chain(std::iter::once("")) {
        if !line.trim().is_empty() {
            paragraph.push(line.trim());
            continue;
        }
        if paragraph.is_empty() {
            continue;
        }
        let joined = collapse_whitespace(&paragraph.join(" "));
        paragraph.clear();
        if is_content_paragraph(&joined, language) {
            return Some(truncate_chars(&joined, MAX_ABSTRACT_CHARS));
        }
    }
    None
}

/// Explicit keyword lines (`Keywords:`, `关键词：`), split on the usual
/// separators.
pub fn keyword_line(text: &str) -> Vec<String> {
    let lower = text.to_ascii_lowercase();
    let mut keywords: Vec<String> = Vec::new();

    let mut take = |marker: &str, terminators: &[&str]| {
        let Some((_, end)) = find_spaced(&lower, marker, 0) else {
            return;
        };
        let start = skip_separators(text, end);
        let line_end = text[start..]
            .find(['\n', '\r'])
            .map_or(text.len(), |p| start + p);
        let stop = earliest_end(&lower, start, terminators).min(line_end);
        for item in text[start..stop].split([';', '；', ',', '，', '|', '、', '·']) {
            let item = collapse_whitespace(item.trim_matches(|c: char| c == '.' || c == '。'));
            let len = item.chars().count();
            if (2..=80).contains(&len)
                && !keywords.iter().any(|k| k.eq_ignore_ascii_case(&item))
            {
                keywords.push(item);
            }
        }
    };

    take("关键词", &["abstract", "中图分类号", "分类号"]);
    take("关键字", &["abstract", "中图分类号", "分类号"]);
    take("keywords", &["introduction", "copyright", "©"]);
    take("indexterms", &["introduction"]);
    keywords
}

/// The most frequent domain tokens, ties broken alphabetically.
pub fn auto_keywords(text: &str, tokenizer: &DomainTokenizer) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in tokenizer.tokenize(text) {
        let latin = token.chars().all(|c| c.is_ascii());
        if latin && token.len() < 3 {
            continue;
        }
        *counts.entry(token).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|(ta, a), (tb, b)| b.cmp(a).then_with(|| ta.cmp(tb)));

    let mut keywords: Vec<String> = Vec::new();
    for (token, _) in ranked {
        if keywords.iter().any(|k| k.contains(token.as_str())) {
            continue;
        }
        keywords.push(token);
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }
    keywords
}

/// At least two thesis markers in a document of thesis length.
pub fn is_thesis(text: &str, page_count: usize) -> bool {
    if page_count < THESIS_MIN_PAGES {
        return false;
    }
    let lower = text.to_lowercase();
    THESIS_MARKERS.iter().filter(|m| lower.contains(*m)).count() >= 2
}

/// Garbled, empty, boilerplate or generic titles.
pub fn is_title_low_quality(title: &str) -> bool {
    let t = title.trim().to_lowercase();
    if t.is_empty() || t.contains('\u{fffd}') {
        return true;
    }
    let control = t.chars().filter(|c| c.is_control()).count();
    if control > 0 && control * 10 >= t.chars().count() {
        return true;
    }
    if GENERIC_TITLES.contains(&t.as_str()) {
        return true;
    }
    ["copyright", "unauthenticated", "downloaded"]
        .iter()
        .any(|k| t.contains(k))
}

/// First meaningful line among the opening lines of the text.
pub fn title_from_text(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(8)
        .find(|line| {
            let lower = line.to_lowercase();
            let len = line.chars().count();
            len > 5
                && len < MAX_TITLE_CHARS
                && !TITLE_SKIP.iter().any(|s| lower.contains(s))
                && !is_title_low_quality(line)
        })
        .map(str::to_string)
}

/// Build the indexed record for a merged document from its extracted text.
pub fn enrich(
    canonical: &CanonicalRecord,
    extraction: &Extraction,
    dicts: &Dictionaries,
    tokenizer: &DomainTokenizer,
    source_language: &str,
) -> DocumentRecord {
    let text = &extraction.text;
    let language = detect_language(text);

    let title = if canonical.title_from_store && !is_title_low_quality(&canonical.title)
    {
        canonical.title.clone()
    } else {
        extraction
            .title
            .clone()
            .filter(|t| !is_title_low_quality(t))
            .or_else(|| title_from_text(text))
            .unwrap_or_else(|| canonical.title.clone())
    };
    let title = truncate_chars(title.trim(), MAX_TITLE_CHARS);

    let collapsed = collapse_whitespace(text);
    let marked = marked_abstract(text, language);
    let abstract_fallback = marked.is_none();
    let abstract_text = marked
        .or_else(|| fallback_abstract(text, language))
        .unwrap_or_else(|| {
            let snippet = truncate_chars(&collapsed, SNIPPET_CHARS);
            if snippet.is_empty() { title.clone() } else { snippet }
        });

    let mut keywords = keyword_line(text);
    let keywords_auto = keywords.is_empty();
    if keywords_auto {
        let head = truncate_chars(&collapsed, 1000);
        keywords = auto_keywords(&format!("{abstract_text} {head}"), tokenizer);
        if keywords.is_empty() {
            keywords = tokenizer.unique_tokens(&title);
            keywords.truncate(MAX_KEYWORDS);
        }
    }

    let year = canonical
        .year
        .or_else(|| {
            canonical
                .primary
                .file_name()
                .and_then(|n| find_year(&n.to_string_lossy()))
        })
        .or_else(|| year_from_text(text));

    let authors = if canonical.authors.is_empty() {
        extraction.authors.clone()
    } else {
        canonical.authors.clone()
    };

    let synthetic_tags = if language != source_language {
        let haystack = format!("{title}\n{abstract_text}\n{}", keywords.join("; "));
        let mut tags = dicts.reverse_tags.tags_for(&haystack);
        tags.extend(canonical.tags.iter().cloned());
        dicts.compound_tags.apply(&mut tags);
        tags.retain(|t| !canonical.tags.contains(t));
        tags
    } else {
        BTreeSet::new()
    };

    DocumentRecord {
        id: canonical.id.clone(),
        title,
        authors,
        year,
        language: language.to_string(),
        abstract_text,
        abstract_fallback,
        keywords,
        keywords_auto,
        tags: canonical.tags.clone(),
        synthetic_tags,
        provenance: canonical.provenance.clone(),
        path: canonical.primary.clone(),
        page_count: extraction.page_count,
        thesis: is_thesis(text, extraction.page_count),
        change_token: canonical.change_token.clone(),
        removed: false,
    }
}
