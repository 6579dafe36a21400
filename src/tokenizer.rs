//! Domain-aware tokenization for mixed Chinese / English text.
//!
//! Vocabulary terms (protected terms and every dictionary key or tag) are
//! matched greedily, longest first, and emitted whole. Remaining text in
//! alphabetic scripts (Latin, Cyrillic, Hangul and so on) becomes lowercase
//! words; remaining CJK runs become overlapping bigrams.

use std::collections::{HashMap, HashSet};

use crate::dictionary::Dictionaries;

const STOPWORDS_EN: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of",
    "with", "by", "from", "as", "is", "was", "are", "were", "be", "been",
    "being", "have", "has", "had", "do", "does", "did", "will", "would",
    "could", "should", "may", "might", "shall", "can", "it", "its", "this",
    "that", "these", "those", "we", "our", "they", "their", "he", "she", "his",
    "her", "not", "no", "than", "more", "also", "between", "during", "under",
    "over", "about", "into", "through", "using", "used", "based", "both",
    "each", "such", "which", "where", "when", "how", "what", "who", "whom",
    "there", "here", "all", "any", "some", "most", "very", "well", "while",
    "however", "although", "because", "since", "after", "before", "then",
    "only", "just", "other", "new", "first", "two", "three", "one", "many",
    "much", "high", "low", "large", "small", "long", "short", "different",
    "same", "main", "major", "important", "significant", "total", "per",
    "respectively", "including", "particularly", "especially", "overall",
    "among", "within", "without", "above", "below", "across", "along",
    "further", "still", "even", "thus", "therefore", "hence", "moreover",
    "results", "study", "studies", "research", "paper", "analysis", "method",
    "methods", "data", "found", "showed", "show", "shows", "indicate",
    "indicates", "indicated", "suggest", "suggests", "observed", "compared",
    "effect", "effects", "impact", "impacts", "increase", "increased",
    "decrease", "decreased", "change", "changes", "changed", "significantly",
    "higher", "lower", "university", "institute", "department", "college",
    "school", "laboratory", "center", "journal", "proceedings", "press", "doi",
    "http", "https", "www", "fig", "figure", "table", "section", "abstract",
    "keywords", "acknowledgement", "acknowledgements", "references",
    "appendix",
];

const STOPWORDS_ZH: &[&str] = &[
    "的", "了", "在", "是", "和", "与", "对", "及", "等", "为", "中", "上", "下",
    "有", "无", "不", "也", "又", "被", "或", "将", "把", "从", "到", "以", "用",
    "可", "能", "会", "要", "就", "都", "而", "但", "这", "那", "其", "之", "所",
    "者", "此", "个", "已", "由", "于", "则", "并", "且", "如", "进行", "通过",
    "利用", "采用", "分析", "研究", "结果", "表明", "显示", "提出", "提高",
    "基于", "方法", "影响", "变化", "条件", "不同", "情况", "关系", "作用",
    "具有", "相关", "较大", "较小", "明显", "主要", "一定", "同时", "以及",
    "大学", "学院", "学报", "教授", "博士", "硕士", "导师", "作者", "工程",
    "学位", "论文", "专业", "科学", "中文", "英文", "翻译", "全文", "摘要",
    "关键", "参考", "文献",
];

/// CJK Unified Ideographs.
pub fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Letters and digits of any script except CJK ideographs.
pub(crate) fn is_word_start(c: char) -> bool {
    c.is_alphanumeric() && !is_cjk(c)
}

/// Joiners keep identifiers such as `green-up` and `pd-1` in one word.
pub(crate) fn is_word_char(c: char) -> bool {
    is_word_start(c) || c == '_' || c == '-'
}

/// A tokenizer whose vocabulary is fixed at construction.
#[derive(Debug, Clone)]
pub struct DomainTokenizer {
    /// Vocabulary terms keyed by first character, longest first.
    vocab: HashMap<char, Vec<Vec<char>>>,
    stopwords: HashSet<&'static str>,
}

impl DomainTokenizer {
    pub fn new(dicts: &Dictionaries) -> Self {
        Self::with_vocabulary(dicts.vocabulary())
    }

    pub fn with_vocabulary<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocab: HashMap<char, Vec<Vec<char>>> = HashMap::new();
        for term in terms {
            let chars: Vec<char> =
                term.as_ref().trim().chars().flat_map(char::to_lowercase).collect();
            if chars.len() < 2 {
                continue;
            }
            let bucket = vocab.entry(chars[0]).or_default();
            if !bucket.contains(&chars) {
                bucket.push(chars);
            }
        }
        for bucket in vocab.values_mut() {
            bucket.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        }
        let stopwords = STOPWORDS_EN.iter().chain(STOPWORDS_ZH).copied().collect();
        Self { vocab, stopwords }
    }

    pub fn is_stopword(&self, token: &str) -> bool {
        self.stopwords.contains(token)
    }

    /// Tokens in text order, duplicates included.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            if let Some(len) = self.vocab_match(&chars, i) {
                tokens.push(chars[i..i + len].iter().collect());
                i += len;
                continue;
            }

            let c = chars[i];
            if is_word_start(c) {
                let end = chars[i..]
                    .iter()
                    .position(|c| !is_word_char(*c))
                    .map_or(chars.len(), |p| i + p);
                let word: String = chars[i..end]
                    .iter()
                    .collect::<String>()
                    .trim_end_matches(['-', '_'])
                    .to_string();
                // Bare numbers and single letters carry no topic.
                if c.is_alphabetic()
                    && word.chars().count() >= 2
                    && !self.is_stopword(&word)
                {
                    tokens.push(word);
                }
                i = end;
            } else if is_cjk(c) {
                let mut end = i + 1;
                while end < chars.len()
                    && is_cjk(chars[end])
                    && self.vocab_match(&chars, end).is_none()
                {
                    end += 1;
                }
                for pair in chars[i..end].windows(2) {
                    let bigram: String = pair.iter().collect();
                    if !self.is_stopword(&bigram) {
                        tokens.push(bigram);
                    }
                }
                i = end;
            } else {
                i += 1;
            }
        }

        tokens
    }

    /// Tokens in first-occurrence order, each once.
    pub fn unique_tokens(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tokenize(text)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }

    /// Length of the longest vocabulary term starting at `i`.
    ///
    /// Terms that begin or end with a word character only match on word
    /// boundaries, so `rain` never matches inside `training`.
    fn vocab_match(&self, chars: &[char], i: usize) -> Option<usize> {
        let bucket = self.vocab.get(&chars[i])?;
        bucket
            .iter()
            .find(|term| {
                if !chars[i..].starts_with(term.as_slice()) {
                    return false;
                }
                let first = term[0];
                let last = term[term.len() - 1];
                if is_word_start(first) && i > 0 && is_word_char(chars[i - 1]) {
                    return false;
                }
                let after = i + term.len();
                !(is_word_start(last)
                    && after < chars.len()
                    && is_word_char(chars[after]))
            })
            .map(Vec::len)
    }
}

impl Default for DomainTokenizer {
    fn default() -> Self {
        Self::with_vocabulary(std::iter::empty::<&str>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::fixtures::dictionaries;

    fn tokenizer() -> DomainTokenizer {
        DomainTokenizer::new(&dictionaries())
    }

    #[test]
    fn protected_terms_stay_whole() {
        let tokens = tokenizer().tokenize("物候期提前");
        assert_eq!(tokens, vec!["物候期", "提前"]);
    }

    #[test]
    fn longest_vocabulary_term_wins() {
        let t = DomainTokenizer::with_vocabulary(["物候", "物候期"]);
        assert_eq!(t.tokenize("物候期"), vec!["物候期"]);
        assert_eq!(t.tokenize("物候变化"), vec!["物候"]);
    }

    #[test]
    fn cjk_runs_become_bigrams_without_stopwords() {
        let t = DomainTokenizer::default();
        assert_eq!(t.tokenize("植被恢复"), vec!["植被", "被恢", "恢复"]);
        assert!(t.tokenize("研究").is_empty());
        assert!(t.tokenize("水").is_empty());
    }

    #[test]
    fn latin_words_lowercased_and_filtered() {
        let t = DomainTokenizer::default();
        assert_eq!(
            t.tokenize("The Green-up of SOS-based NDVI in 2020, a study"),
            vec!["green-up", "sos-based", "ndvi"]
        );
    }

    #[test]
    fn non_ascii_scripts_form_whole_words() {
        let t = DomainTokenizer::default();
        assert_eq!(
            t.tokenize("Über die Phänologie, café, Москва снег, 강수량"),
            vec!["über", "die", "phänologie", "café", "москва", "снег", "강수량"]
        );
    }

    #[test]
    fn identifiers_keep_their_digits() {
        let t = DomainTokenizer::default();
        assert_eq!(
            t.tokenize("PD-1 blockade, CO2 uptake, 3 sites, MODIS_C6"),
            vec!["pd-1", "blockade", "co2", "uptake", "sites", "modis_c6"]
        );
    }

    #[test]
    fn word_runs_stop_at_ideographs() {
        let t = DomainTokenizer::default();
        assert_eq!(t.tokenize("NDVI时间序列"), vec!["ndvi", "时间", "间序", "序列"]);
    }

    #[test]
    fn accented_vocabulary_respects_word_boundaries() {
        let t = DomainTokenizer::with_vocabulary(["évapotranspiration"]);
        assert_eq!(
            t.tokenize("L'évapotranspiration réelle"),
            vec!["évapotranspiration", "réelle"]
        );
        assert_eq!(t.tokenize("préévapotranspiration"), vec!["préévapotranspiration"]);
    }

    #[test]
    fn latin_vocabulary_respects_word_boundaries() {
        let t = DomainTokenizer::with_vocabulary(["rain", "growing season"]);
        assert_eq!(t.tokenize("training"), vec!["training"]);
        assert_eq!(
            t.tokenize("Rain in the growing season"),
            vec!["rain", "growing season"]
        );
    }

    #[test]
    fn mixed_text() {
        let tokens = tokenizer().tokenize("免疫治疗 immunotherapy 蒸散发");
        assert_eq!(tokens, vec!["免疫治疗", "immunotherapy", "蒸散发"]);
    }

    #[test]
    fn unique_tokens_keep_first_occurrence() {
        let t = DomainTokenizer::default();
        assert_eq!(
            t.unique_tokens("runoff trends, runoff timing"),
            vec!["runoff", "trends", "timing"]
        );
    }
}
