//! In-memory BM25 index over the metadata fields of live records.
//!
//! The index is rebuilt from the metadata index whenever a snapshot loads;
//! it is small (a few fields per paper) and never persisted.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tantivy::{
    Index,
    IndexReader,
    ReloadPolicy,
    TantivyDocument,
    Term,
    collector::TopDocs,
    query::{BooleanQuery, BoostQuery, ConstScoreQuery, Occur, Query, TermQuery},
    schema::{
        FAST,
        Field,
        IndexRecordOption,
        STORED,
        STRING,
        Schema,
        TextFieldIndexing,
        TextOptions,
        Value,
    },
    tokenizer::{RemoveLongFilter, TextAnalyzer, Token, TokenStream, Tokenizer},
};

use crate::{
    dictionary::Dictionaries,
    error::Result,
    record::DocumentRecord,
    tokenizer::DomainTokenizer,
};

/// Name the domain analyzer is registered under.
pub const DOMAIN_ANALYZER: &str = "domain";

const WRITER_MEMORY_BUDGET: usize = 15_000_000;

/// Field names used in the schema.
pub mod fields {
    pub const DOC_NUM_ID: &str = "doc_num_id";
    pub const TITLE: &str = "title";
    pub const ABSTRACT: &str = "abstract";
    pub const KEYWORDS: &str = "keywords";
    pub const TAGS: &str = "tags";
    pub const SYNTHETIC: &str = "synthetic";
}

const TITLE_BOOST: f32 = 3.5;
const ABSTRACT_BOOST: f32 = 4.0;
const KEYWORDS_BOOST: f32 = 5.0;
const TAGS_BOOST: f32 = 3.0;
/// Added once per query token that names a reverse-map tag the paper carries.
const SYNTHETIC_TAG_SCORE: f32 = 2.0;

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
struct LexicalFields {
    doc_num_id: Field,
    title: Field,
    abstract_text: Field,
    keywords: Field,
    tags: Field,
    synthetic: Field,
}

impl LexicalFields {
    fn weighted(&self) -> [(Field, f32); 4] {
        [
            (self.title, TITLE_BOOST),
            (self.abstract_text, ABSTRACT_BOOST),
            (self.keywords, KEYWORDS_BOOST),
            (self.tags, TAGS_BOOST),
        ]
    }
}

fn build_schema() -> (Schema, LexicalFields) {
    let mut builder = Schema::builder();

    let text_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(DOMAIN_ANALYZER)
            .set_index_option(IndexRecordOption::WithFreqs),
    );

    let doc_num_id = builder.add_u64_field(fields::DOC_NUM_ID, STORED | FAST);
    let title = builder.add_text_field(fields::TITLE, text_opts.clone());
    let abstract_text = builder.add_text_field(fields::ABSTRACT, text_opts.clone());
    let keywords = builder.add_text_field(fields::KEYWORDS, text_opts.clone());
    let tags = builder.add_text_field(fields::TAGS, text_opts);
    let synthetic = builder.add_text_field(fields::SYNTHETIC, STRING);

    let fields = LexicalFields {
        doc_num_id,
        title,
        abstract_text,
        keywords,
        tags,
        synthetic,
    };
    (builder.build(), fields)
}

/// Adapts [`DomainTokenizer`] to tantivy so documents and queries are
/// segmented identically.
#[derive(Clone)]
pub struct DomainAnalyzer {
    tokenizer: Arc<DomainTokenizer>,
}

impl DomainAnalyzer {
    pub fn new(tokenizer: Arc<DomainTokenizer>) -> Self {
        Self { tokenizer }
    }
}

pub struct DomainTokenStream {
    tokens: std::vec::IntoIter<Token>,
    current: Token,
}

impl Tokenizer for DomainAnalyzer {
    type TokenStream<'a> = DomainTokenStream;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> DomainTokenStream {
        let tokens: Vec<Token> = self
            .tokenizer
            .tokenize(text)
            .into_iter()
            .enumerate()
            .map(|(position, text)| Token {
                offset_from: 0,
                offset_to: 0,
                position,
                text,
                position_length: 1,
            })
            .collect();
        DomainTokenStream {
            tokens: tokens.into_iter(),
            current: Token::default(),
        }
    }
}

impl TokenStream for DomainTokenStream {
    fn advance(&mut self) -> bool {
        match self.tokens.next() {
            Some(token) => {
                self.current = token;
                true
            }
            None => false,
        }
    }

    fn token(&self) -> &Token {
        &self.current
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.current
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandedQuery {
    pub tokens: Vec<String>,
    /// Topic concepts found in the query, in query order.
    pub topics: Vec<String>,
}

/// Query-side view of the lexical channel.
pub struct LexicalIndex {
    reader: IndexReader,
    fields: LexicalFields,
    dicts: Arc<Dictionaries>,
    tokenizer: Arc<DomainTokenizer>,
}

impl LexicalIndex {
    /// Index `records` in memory.
    pub fn build<'r>(
        records: impl IntoIterator<Item = &'r DocumentRecord>,
        dicts: Arc<Dictionaries>,
        tokenizer: Arc<DomainTokenizer>,
    ) -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        let analyzer = TextAnalyzer::builder(DomainAnalyzer::new(tokenizer.clone()))
            .filter(RemoveLongFilter::limit(80))
            .build();
        index.tokenizers().register(DOMAIN_ANALYZER, analyzer);

        // One thread keeps segment layout, and therefore BM25 statistics,
        // independent of scheduling.
        let mut writer =
            index.writer_with_num_threads::<TantivyDocument>(1, WRITER_MEMORY_BUDGET)?;
        let mut count = 0usize;
        for record in records {
            writer.add_document(to_document(record, &fields, &dicts))?;
            count += 1;
        }
        writer.commit()?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        tracing::debug!(documents = count, "built lexical index");

        Ok(Self {
            reader,
            fields,
            dicts,
            tokenizer,
        })
    }

    /// Query tokens after topic and translation expansion, each once.
    ///
    /// Synonyms and translations are re-tokenized so they match what the
    /// analyzer stored.
    pub fn expand_query(&self, text: &str) -> Vec<String> {
        self.expand(text).tokens
    }

    /// Expanded tokens plus the topic concepts that contributed synonyms.
    pub fn expand(&self, text: &str) -> ExpandedQuery {
        let base = self.tokenizer.unique_tokens(text);
        let mut expanded = base.clone();
        let mut topics = Vec::new();
        for token in &base {
            if let Some(synonyms) = self.dicts.expansions.synonyms(token) {
                for synonym in synonyms {
                    expanded.extend(self.tokenizer.tokenize(synonym));
                }
                topics.push(token.clone());
            }
            if let Some(translation) = self.dicts.translations.get(token) {
                expanded.extend(self.tokenizer.tokenize(translation));
            }
        }

        let mut seen = HashSet::new();
        expanded.retain(|t| seen.insert(t.clone()));
        ExpandedQuery {
            tokens: expanded,
            topics,
        }
    }

    /// Raw lexical scores for `text`, keyed by numeric document id.
    /// Documents with no matching token are absent.
    pub fn scores(&self, text: &str) -> Result<HashMap<u64, f32>> {
        self.score_tokens(&self.expand_query(text))
    }

    /// The query tokens `record` contains in an indexed field, in query
    /// order.
    pub fn matched_terms(&self, record: &DocumentRecord, tokens: &[String]) -> Vec<String> {
        let mut present: HashSet<String> = HashSet::new();
        let texts = [&record.title, &record.abstract_text]
            .into_iter()
            .chain(&record.keywords)
            .chain(&record.tags)
            .chain(&record.synthetic_tags);
        for text in texts {
            present.extend(self.tokenizer.tokenize(text));
        }
        present.extend(record.synthetic_tags.iter().cloned());
        tokens
            .iter()
            .filter(|t| present.contains(String::as_str(t)))
            .cloned()
            .collect()
    }

    pub fn score_tokens(&self, tokens: &[String]) -> Result<HashMap<u64, f32>> {
        if tokens.is_empty() {
            return Ok(HashMap::new());
        }

        let f = self.fields;
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for token in tokens {
            for (field, boost) in f.weighted() {
                let term = TermQuery::new(
                    Term::from_field_text(field, token),
                    IndexRecordOption::WithFreqs,
                );
                clauses.push((Occur::Should, Box::new(BoostQuery::new(Box::new(term), boost))));
            }
            if self.dicts.is_synthetic_tag(token) {
                let term = TermQuery::new(
                    Term::from_field_text(f.synthetic, token),
                    IndexRecordOption::Basic,
                );
                clauses.push((
                    Occur::Should,
                    Box::new(ConstScoreQuery::new(Box::new(term), SYNTHETIC_TAG_SCORE)),
                ));
            }
        }
        let query = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let limit = (searcher.num_docs() as usize).max(1);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut scores = HashMap::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(id) = doc.get_first(f.doc_num_id).and_then(|v| v.as_u64()) {
                scores.insert(id, score);
            }
        }
        Ok(scores)
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex").finish_non_exhaustive()
    }
}

fn to_document(
    record: &DocumentRecord,
    f: &LexicalFields,
    dicts: &Dictionaries,
) -> TantivyDocument {
    let mut doc = TantivyDocument::new();
    doc.add_u64(f.doc_num_id, record.id.numeric);
    doc.add_text(f.title, &record.title);
    doc.add_text(f.abstract_text, &record.abstract_text);
    for keyword in &record.keywords {
        doc.add_text(f.keywords, keyword);
    }
    for tag in record.tags.iter().chain(&record.synthetic_tags) {
        doc.add_text(f.tags, tag);
    }
    for tag in record
        .synthetic_tags
        .iter()
        .chain(record.tags.iter().filter(|t| dicts.is_synthetic_tag(t)))
    {
        doc.add_text(f.synthetic, tag);
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dictionary::fixtures::dictionaries, record::fixtures::record};

    fn index(records: &[DocumentRecord]) -> LexicalIndex {
        let dicts = Arc::new(dictionaries());
        let tokenizer = Arc::new(DomainTokenizer::new(&dicts));
        LexicalIndex::build(records, dicts, tokenizer).unwrap()
    }

    fn paper(key: &str, title: &str, abstract_text: &str) -> DocumentRecord {
        let mut r = record(key, title);
        r.abstract_text = abstract_text.to_string();
        r
    }

    #[test]
    fn expansion_adds_synonyms_and_translations() {
        let idx = index(&[]);
        let tokens = idx.expand_query("物候");
        assert_eq!(tokens[0], "物候");
        assert!(tokens.contains(&"phenology".to_string()));
        assert!(tokens.contains(&"phenological".to_string()));
        assert!(tokens.contains(&"green-up".to_string()));
        // CJK synonyms outside the vocabulary arrive as bigrams, like the
        // documents they have to match.
        assert!(tokens.contains(&"返青".to_string()));
        assert!(tokens.contains(&"青期".to_string()));
        assert_eq!(tokens.iter().filter(|t| *t == "phenology").count(), 1);
    }

    #[test]
    fn expansion_reports_matched_topics() {
        let idx = index(&[]);
        let expanded = idx.expand("水文 物候 径流");
        assert_eq!(expanded.topics, vec!["水文", "物候"]);
        assert!(idx.expand("径流").topics.is_empty());
    }

    #[test]
    fn matched_terms_follow_query_order() {
        let mut p = paper("a", "Spring phenology of alpine meadows", "Green-up dates advance.");
        p.synthetic_tags.insert("物候".to_string());
        let idx = index(&[p.clone()]);

        let tokens = idx.expand_query("物候 runoff");
        assert_eq!(idx.matched_terms(&p, &tokens), vec!["物候", "phenology", "green-up"]);
    }

    #[test]
    fn compound_tags_score_like_reverse_tags() {
        let plain = paper("a", "Snowmelt runoff", "Spring phenology and runoff.");
        let mut tagged = plain.clone();
        tagged.id = record("b", "").id;
        tagged.synthetic_tags.insert("物候变化水文效应".to_string());

        let idx = index(&[plain.clone(), tagged.clone()]);
        let scores = idx.scores("物候变化水文效应").unwrap();
        assert!(scores.contains_key(&tagged.id.numeric));
        assert!(!scores.contains_key(&plain.id.numeric));
    }

    #[test]
    fn chinese_query_finds_english_paper() {
        let idx = index(&[
            paper("a", "Spring phenology of alpine meadows", "Green-up dates advance."),
            paper("b", "Soil carbon in croplands", "Tillage and carbon stocks."),
        ]);
        let scores = idx.scores("物候").unwrap();
        assert!(scores.contains_key(&record("a", "").id.numeric));
        assert!(!scores.contains_key(&record("b", "").id.numeric));
    }

    #[test]
    fn synthetic_tag_adds_boost() {
        let plain = paper("a", "Runoff generation", "Runoff in catchments.");
        let mut tagged = paper("b", "Runoff generation", "Runoff in catchments.");
        tagged.synthetic_tags.insert("径流".to_string());

        let idx = index(&[plain.clone(), tagged.clone()]);
        let scores = idx.scores("径流").unwrap();
        assert!(scores[&tagged.id.numeric] > scores[&plain.id.numeric]);
    }

    #[test]
    fn keywords_outweigh_abstract() {
        let mut kw = paper("a", "Catchment survey", "glacier melt timing");
        kw.keywords = vec!["snowmelt".to_string()];
        let mut abs = paper("b", "Catchment survey", "snowmelt melt timing");
        abs.keywords = vec!["glacier".to_string()];

        let idx = index(&[kw.clone(), abs.clone()]);
        let scores = idx.scores("snowmelt").unwrap();
        assert!(scores[&kw.id.numeric] > scores[&abs.id.numeric]);
    }

    #[test]
    fn empty_query_scores_nothing() {
        let idx = index(&[paper("a", "Runoff", "")]);
        assert!(idx.scores("the of and").unwrap().is_empty());
        assert_eq!(idx.num_docs(), 1);
    }

    #[test]
    fn analyzer_keeps_protected_terms_whole() {
        let dicts = dictionaries();
        let mut analyzer = DomainAnalyzer::new(Arc::new(DomainTokenizer::new(&dicts)));
        let mut stream = analyzer.token_stream("物候期提前");
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        assert_eq!(tokens[0], "物候期");
    }
}
