//! Domain dictionaries: independent lookup tables loaded from JSON.
//!
//! | file                     | shape                                  |
//! |--------------------------|----------------------------------------|
//! | `protected_terms.json`   | `["term", ...]`                        |
//! | `topic_expansions.json`  | `{"concept": ["syn", ...]}`            |
//! | `term_translations.json` | `{"source": "target words"}`           |
//! | `reverse_tags.json`      | `{"pattern": "tag"}`                   |
//! | `compound_tags.json`     | `[{"all": ["tag", ...], "tag": "t"}]`  |
//!
//! A missing or malformed file loads as an empty table with a warning, and
//! individual malformed entries are dropped with a warning.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use serde_json::Value;

use crate::tokenizer::{is_cjk, is_word_char, is_word_start};

pub const PROTECTED_TERMS_FILE: &str = "protected_terms.json";
pub const TOPIC_EXPANSIONS_FILE: &str = "topic_expansions.json";
pub const TERM_TRANSLATIONS_FILE: &str = "term_translations.json";
pub const REVERSE_TAGS_FILE: &str = "reverse_tags.json";
pub const COMPOUND_TAGS_FILE: &str = "compound_tags.json";

/// Characters ignored when translating a query: CJK punctuation and
/// function characters. Whitespace still separates words.
const TRANSLATION_SKIP: &[char] = &[
    '，', '。', '、', '：', '；', '？', '！', '“', '”', '‘', '’', '（', '）',
    '(', ')', '的', '与', '和', '对', '在', '于', '中',
];

/// Multi-character domain terms the tokenizer never splits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectedTerms {
    terms: BTreeSet<String>,
}

impl ProtectedTerms {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .filter_map(|t| normalize_term(t.as_ref()))
            .filter(|t| t.chars().count() >= 2)
            .collect();
        Self { terms }
    }

    pub fn contains(&self, term: &str) -> bool {
        self.terms.contains(term)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Concept to cross-lingual synonyms, applied to query tokens only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicExpansions {
    map: BTreeMap<String, Vec<String>>,
}

impl TopicExpansions {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = BTreeMap::new();
        for (concept, synonyms) in entries {
            let Some(concept) = normalize_term(concept.as_ref()) else {
                continue;
            };
            let synonyms: Vec<String> = synonyms
                .iter()
                .filter_map(|s| normalize_term(s.as_ref()))
                .collect();
            if !synonyms.is_empty() {
                map.insert(concept, synonyms);
            }
        }
        Self { map }
    }

    /// Synonyms for an exact concept match.
    pub fn synonyms(&self, token: &str) -> Option<&[String]> {
        self.map.get(token).map(Vec::as_slice)
    }

    pub fn concepts(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Source-language term to target-language words. Several source terms may
/// share one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermTranslationMap {
    map: BTreeMap<String, String>,
    /// Keys as char vectors, longest first, for greedy matching.
    by_length: Vec<Vec<char>>,
}

impl TermTranslationMap {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let map: BTreeMap<String, String> = entries
            .into_iter()
            .filter_map(|(k, v)| {
                Some((normalize_term(k.as_ref())?, normalize_term(v.as_ref())?))
            })
            .collect();
        let mut by_length: Vec<Vec<char>> =
            map.keys().map(|k| k.chars().collect()).collect();
        by_length.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Self { map, by_length }
    }

    pub fn get(&self, term: &str) -> Option<&str> {
        self.map.get(term).map(String::as_str)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Word-level translation of a whole query by greedy longest match.
    ///
    /// Other words (identifiers such as `pd-1` included) pass through
    /// unchanged. Returns `None` when the query
    /// has no CJK text or when less than half of its CJK characters are
    /// covered by a dictionary entry.
    pub fn translate_query(&self, query: &str) -> Option<String> {
        let chars: Vec<char> = query
            .chars()
            .flat_map(char::to_lowercase)
            .filter(|c| !TRANSLATION_SKIP.contains(c))
            .collect();
        let total_cjk = chars.iter().filter(|c| is_cjk(**c)).count();
        if total_cjk == 0 {
            return None;
        }

        let mut parts: Vec<&str> = Vec::new();
        let mut latin: Vec<String> = Vec::new();
        let mut covered = 0usize;
        let mut i = 0;
        while i < chars.len() {
            if let Some(key) =
                self.by_length.iter().find(|k| chars[i..].starts_with(k.as_slice()))
            {
                let source: String = key.iter().collect();
                if let Some(target) = self.map.get(&source)
                    && !parts.contains(&target.as_str())
                {
                    parts.push(target);
                }
                covered += key.iter().filter(|c| is_cjk(**c)).count();
                i += key.len();
                continue;
            }
            if is_word_start(chars[i]) {
                let end = chars[i..]
                    .iter()
                    .position(|c| !is_word_char(*c))
                    .map_or(chars.len(), |p| i + p);
                let word: String = chars[i..end]
                    .iter()
                    .collect::<String>()
                    .trim_end_matches(['-', '_'])
                    .to_string();
                if !latin.contains(&word) {
                    latin.push(word);
                }
                i = end;
                continue;
            }
            i += 1;
        }

        if parts.is_empty() || covered * 2 < total_cjk {
            return None;
        }
        let mut out: Vec<String> = parts.into_iter().map(str::to_string).collect();
        out.extend(latin);
        Some(out.join(" "))
    }
}

/// Target-language pattern to synthetic source-language tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReverseTagMap {
    patterns: BTreeMap<String, String>,
}

impl ReverseTagMap {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let patterns = entries
            .into_iter()
            .filter_map(|(k, v)| {
                Some((normalize_term(k.as_ref())?, normalize_term(v.as_ref())?))
            })
            .collect();
        Self { patterns }
    }

    /// Every tag whose pattern occurs in `text` (case-insensitive).
    pub fn tags_for(&self, text: &str) -> BTreeSet<String> {
        let lower = text.to_lowercase();
        self.patterns
            .iter()
            .filter(|(pattern, _)| lower.contains(pattern.as_str()))
            .map(|(_, tag)| tag.clone())
            .collect()
    }

    pub fn is_tag(&self, token: &str) -> bool {
        self.patterns.values().any(|t| t == token)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.patterns.values().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// A tag granted when a paper already carries every tag in `all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundRule {
    pub all: BTreeSet<String>,
    pub tag: String,
}

/// Ordered rules combining tags into cross-topic tags. A tag granted by
/// one rule can satisfy a later rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundTagRules {
    rules: Vec<CompoundRule>,
}

impl CompoundTagRules {
    pub fn new<I, C, S, T>(rules: I) -> Self
    where
        I: IntoIterator<Item = (C, T)>,
        C: IntoIterator<Item = S>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let rules = rules
            .into_iter()
            .filter_map(|(all, tag)| {
                let all: BTreeSet<String> = all
                    .into_iter()
                    .filter_map(|t| normalize_term(t.as_ref()))
                    .collect();
                let tag = normalize_term(tag.as_ref())?;
                (!all.is_empty()).then_some(CompoundRule { all, tag })
            })
            .collect();
        Self { rules }
    }

    /// Add the tag of every rule whose conditions `tags` satisfies, in
    /// rule order.
    pub fn apply(&self, tags: &mut BTreeSet<String>) {
        for rule in &self.rules {
            if rule.all.is_subset(tags) {
                tags.insert(rule.tag.clone());
            }
        }
    }

    pub fn is_tag(&self, token: &str) -> bool {
        self.rules.iter().any(|r| r.tag == token)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.tag.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// The dictionary tables, loaded once and shared read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictionaries {
    pub protected: ProtectedTerms,
    pub expansions: TopicExpansions,
    pub translations: TermTranslationMap,
    pub reverse_tags: ReverseTagMap,
    pub compound_tags: CompoundTagRules,
}

impl Dictionaries {
    /// Load every table from `dir`. Never fails.
    pub fn load(dir: &Path) -> Self {
        let dicts = Self {
            protected: load_protected(dir),
            expansions: load_expansions(dir),
            translations: load_translations(dir),
            reverse_tags: load_reverse_tags(dir),
            compound_tags: load_compound_tags(dir),
        };
        tracing::debug!(
            dir = %dir.display(),
            protected = dicts.protected.len(),
            expansions = dicts.expansions.len(),
            translations = dicts.translations.len(),
            reverse_tags = dicts.reverse_tags.len(),
            compound_tags = dicts.compound_tags.len(),
            "loaded dictionaries"
        );
        dicts
    }

    /// Tags assigned at build time rather than read from a catalogue.
    pub fn is_synthetic_tag(&self, token: &str) -> bool {
        self.reverse_tags.is_tag(token) || self.compound_tags.is_tag(token)
    }

    /// Every term the tokenizer keeps whole.
    pub fn vocabulary(&self) -> impl Iterator<Item = &str> {
        self.protected
            .iter()
            .chain(self.expansions.concepts())
            .chain(self.translations.sources())
            .chain(self.reverse_tags.tags())
            .chain(self.compound_tags.tags())
    }
}

fn normalize_term(term: &str) -> Option<String> {
    let term = term.trim().to_lowercase();
    (!term.is_empty()).then_some(term)
}

fn read_json(dir: &Path, file: &str) -> Option<Value> {
    let path = dir.join(file);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "dictionary unavailable, using an empty table"
            );
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "malformed dictionary, using an empty table"
            );
            None
        }
    }
}

fn warn_entry(file: &str, entry: &str, reason: &str) {
    tracing::warn!(file, entry, reason, "rejected dictionary entry");
}

fn load_protected(dir: &Path) -> ProtectedTerms {
    let Some(value) = read_json(dir, PROTECTED_TERMS_FILE) else {
        return ProtectedTerms::default();
    };
    let Value::Array(items) = value else {
        warn_entry(PROTECTED_TERMS_FILE, "<root>", "expected an array");
        return ProtectedTerms::default();
    };
    let mut terms = Vec::new();
    for item in items {
        match item {
            Value::String(s) if s.trim().chars().count() >= 2 => terms.push(s),
            Value::String(s) => {
                warn_entry(PROTECTED_TERMS_FILE, &s, "shorter than two characters")
            }
            other => {
                warn_entry(PROTECTED_TERMS_FILE, &other.to_string(), "not a string")
            }
        }
    }
    ProtectedTerms::new(terms)
}

fn load_object(dir: &Path, file: &str) -> Option<serde_json::Map<String, Value>> {
    match read_json(dir, file)? {
        Value::Object(map) => Some(map),
        _ => {
            warn_entry(file, "<root>", "expected an object");
            None
        }
    }
}

fn load_expansions(dir: &Path) -> TopicExpansions {
    let Some(map) = load_object(dir, TOPIC_EXPANSIONS_FILE) else {
        return TopicExpansions::default();
    };
    let mut entries = Vec::new();
    for (concept, value) in map {
        if concept.trim().is_empty() {
            warn_entry(TOPIC_EXPANSIONS_FILE, &concept, "empty concept");
            continue;
        }
        let Value::Array(items) = value else {
            warn_entry(TOPIC_EXPANSIONS_FILE, &concept, "synonyms must be an array");
            continue;
        };
        let mut synonyms = Vec::new();
        for item in items {
            match item {
                Value::String(s) if !s.trim().is_empty() => synonyms.push(s),
                other => warn_entry(
                    TOPIC_EXPANSIONS_FILE,
                    &format!("{concept}: {other}"),
                    "synonym must be a non-empty string",
                ),
            }
        }
        if synonyms.is_empty() {
            warn_entry(TOPIC_EXPANSIONS_FILE, &concept, "no valid synonyms");
            continue;
        }
        entries.push((concept, synonyms));
    }
    TopicExpansions::new(entries)
}

fn string_pairs(file: &str, map: serde_json::Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in map {
        match value {
            Value::String(v) if !key.trim().is_empty() && !v.trim().is_empty() => {
                pairs.push((key, v))
            }
            Value::String(_) => warn_entry(file, &key, "empty key or value"),
            _ => warn_entry(file, &key, "value must be a string"),
        }
    }
    pairs
}

fn load_translations(dir: &Path) -> TermTranslationMap {
    load_object(dir, TERM_TRANSLATIONS_FILE)
        .map(|map| TermTranslationMap::new(string_pairs(TERM_TRANSLATIONS_FILE, map)))
        .unwrap_or_default()
}

fn load_reverse_tags(dir: &Path) -> ReverseTagMap {
    load_object(dir, REVERSE_TAGS_FILE)
        .map(|map| ReverseTagMap::new(string_pairs(REVERSE_TAGS_FILE, map)))
        .unwrap_or_default()
}

fn load_compound_tags(dir: &Path) -> CompoundTagRules {
    let Some(value) = read_json(dir, COMPOUND_TAGS_FILE) else {
        return CompoundTagRules::default();
    };
    let Value::Array(items) = value else {
        warn_entry(COMPOUND_TAGS_FILE, "<root>", "expected an array");
        return CompoundTagRules::default();
    };
    let mut rules = Vec::new();
    for item in items {
        let entry = item.to_string();
        let tag = item.get("tag").and_then(Value::as_str).map(str::to_string);
        let all: Option<Vec<String>> = item.get("all").and_then(Value::as_array).map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .collect()
        });
        match (all, tag) {
            (Some(all), Some(tag)) if !all.is_empty() && !tag.trim().is_empty() => {
                rules.push((all, tag))
            }
            _ => warn_entry(
                COMPOUND_TAGS_FILE,
                &entry,
                "needs a non-empty \"all\" array and a \"tag\" string",
            ),
        }
    }
    CompoundTagRules::new(rules)
}


#[cfg(test)]
mod tests {
    use super::{fixtures::dictionaries, *};

    #[test]
    fn missing_directory_loads_empty_tables() {
        let dicts = Dictionaries::load(Path::new("/nonexistent/dictionaries"));
        assert_eq!(dicts, Dictionaries::default());
    }

    #[test]
    fn malformed_file_degrades_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(PROTECTED_TERMS_FILE), "[not json").unwrap();
        std::fs::write(
            tmp.path().join(TERM_TRANSLATIONS_FILE),
            r#"{"径流": "runoff"}"#,
        )
        .unwrap();

        let dicts = Dictionaries::load(tmp.path());
        assert!(dicts.protected.is_empty());
        assert_eq!(dicts.translations.get("径流"), Some("runoff"));
    }

    #[test]
    fn rejects_invalid_entries() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(PROTECTED_TERMS_FILE),
            r#"["物候期", "a", 42, "  "]"#,
        )
        .unwrap();
        std::fs::write(
            tmp.path().join(TOPIC_EXPANSIONS_FILE),
            r#"{"物候": ["Phenology", 3, ""], "空": [], "bad": "x"}"#,
        )
        .unwrap();
        std::fs::write(
            tmp.path().join(REVERSE_TAGS_FILE),
            r#"{"Runoff": "径流", "empty": "", "num": 1}"#,
        )
        .unwrap();

        let dicts = Dictionaries::load(tmp.path());
        assert_eq!(dicts.protected.iter().collect::<Vec<_>>(), vec!["物候期"]);
        assert_eq!(dicts.expansions.len(), 1);
        assert_eq!(
            dicts.expansions.synonyms("物候").unwrap(),
            &["phenology".to_string()]
        );
        assert_eq!(dicts.reverse_tags.len(), 1);
        assert!(dicts.reverse_tags.is_tag("径流"));
    }

    #[test]
    fn reverse_tags_match_substrings_case_insensitively() {
        let dicts = dictionaries();
        let tags = dicts
            .reverse_tags
            .tags_for("Spring Phenology shifts and RUNOFF timing");
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["径流", "物候"]);
    }

    #[test]
    fn translates_covered_query() {
        let dicts = dictionaries();
        assert_eq!(
            dicts.translations.translate_query("物候与径流"),
            Some("phenology phenological runoff streamflow".to_string())
        );
        assert_eq!(
            dicts.translations.translate_query("免疫治疗 PD-1"),
            Some("immunotherapy pd-1".to_string())
        );
    }

    #[test]
    fn translation_keeps_non_ascii_words() {
        let dicts = dictionaries();
        assert_eq!(
            dicts.translations.translate_query("径流 Ångström CO2"),
            Some("runoff streamflow ångström co2".to_string())
        );
    }

    #[test]
    fn compound_rules_chain_in_order() {
        let rules = CompoundTagRules::new([
            (vec!["物候", "径流"], "物候水文"),
            (vec!["物候水文", "森林"], "森林物候水文"),
            (vec!["干旱"], "干旱响应"),
        ]);
        let mut tags: BTreeSet<String> =
            ["物候", "径流", "森林"].map(String::from).into();
        rules.apply(&mut tags);
        assert!(tags.contains("物候水文"));
        assert!(tags.contains("森林物候水文"));
        assert!(!tags.contains("干旱响应"));
        assert!(rules.is_tag("森林物候水文"));
    }

    #[test]
    fn loads_compound_rules_and_drops_bad_ones() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(COMPOUND_TAGS_FILE),
            r#"[
                {"all": ["物候", "蒸散发"], "tag": "物候变化水文效应"},
                {"all": [], "tag": "空"},
                {"all": ["干旱"]},
                "nonsense"
            ]"#,
        )
        .unwrap();

        let dicts = Dictionaries::load(tmp.path());
        assert_eq!(dicts.compound_tags.len(), 1);
        assert!(dicts.is_synthetic_tag("物候变化水文效应"));
        assert!(dicts.vocabulary().any(|t| t == "物候变化水文效应"));
    }

    #[test]
    fn refuses_poorly_covered_query() {
        let dicts = dictionaries();
        assert_eq!(dicts.translations.translate_query("西辽河流域物候"), None);
        assert_eq!(dicts.translations.translate_query("phenology"), None);
    }

    #[test]
    fn vocabulary_spans_all_tables() {
        let dicts = dictionaries();
        let vocab: BTreeSet<&str> = dicts.vocabulary().collect();
        for term in ["物候期", "水文", "径流", "免疫治疗"] {
            assert!(vocab.contains(term), "{term}");
        }
    }
}
