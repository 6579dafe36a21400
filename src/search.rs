use std::{cmp::Ordering, time::Instant};

use serde::Serialize;

use crate::{
    embedding::{Embedder, embed_query_one},
    error::{Error, Result},
    record::DocumentRecord,
    snapshot::Snapshot,
};

/// Which channels contribute to the combined score.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Lexical,
    #[default]
    Hybrid,
}

impl SearchMode {
    /// `(semantic, lexical)` fusion weights.
    pub fn weights(self) -> (f32, f32) {
        match self {
            SearchMode::Semantic => (1.0, 0.0),
            SearchMode::Lexical => (0.0, 1.0),
            SearchMode::Hybrid => (0.6, 0.4),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Query {
    pub primary: String,
    /// Optional second phrasing, usually in the papers' language.
    pub secondary: Option<String>,
    pub top_k: usize,
    pub mode: SearchMode,
}

impl Query {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: None,
            top_k: 10,
            mode: SearchMode::Hybrid,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub deadline: Option<Instant>,
    /// Only documents with a provenance entry from this root.
    pub root: Option<String>,
    /// Derive a secondary query from the translation map when none is given.
    pub auto_translate: bool,
    /// Ignore lexical matches on papers whose abstract is a text fallback.
    pub exclude_fallback: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedResult<'a> {
    pub rank: usize,
    pub score: f32,
    /// Max-normalized semantic component.
    pub semantic: f32,
    /// Max-normalized lexical component.
    pub lexical: f32,
    /// Expanded query tokens found in the paper's indexed fields.
    pub matched_terms: Vec<String>,
    pub document: &'a DocumentRecord,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchOutcome<'a> {
    pub results: Vec<RankedResult<'a>>,
    /// Secondary query actually used, supplied or derived.
    pub secondary: Option<String>,
    /// Topic concepts that expanded the query.
    pub topics: Vec<String>,
    /// Why the semantic channel did not contribute, when it should have.
    pub degraded: Option<String>,
}

/// Fuses the semantic and lexical channels over a [`Snapshot`].
pub struct Ranker<'a> {
    snapshot: &'a Snapshot,
    embedder: Option<&'a dyn Embedder>,
}

impl<'a> Ranker<'a> {
    pub fn new(snapshot: &'a Snapshot, embedder: Option<&'a dyn Embedder>) -> Self {
        Self { snapshot, embedder }
    }

    pub fn search(&self, query: &Query, opts: &SearchOptions) -> Result<SearchOutcome<'a>> {
        check_deadline(opts.deadline)?;

        let secondary = query
            .secondary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| {
                opts.auto_translate
                    .then(|| {
                        self.snapshot
                            .dictionaries()
                            .translations
                            .translate_query(&query.primary)
                    })
                    .flatten()
            });
        if let Some(secondary) = &secondary {
            tracing::debug!(%secondary, "secondary query");
        }

        let (w_sem, w_lex) = query.mode.weights();
        let mut degraded = None;

        let semantic = if w_sem > 0.0 {
            let mut texts = vec![query.primary.as_str()];
            texts.extend(secondary.as_deref());
            match self.query_similarities(&texts) {
                Ok(scores) => Some(scores),
                Err(e) if query.mode == SearchMode::Hybrid && degradable(&e) => {
                    tracing::warn!(error = %e, "semantic channel unavailable, ranking lexically");
                    degraded = Some(e.to_string());
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };
        check_deadline(opts.deadline)?;

        let text = match &secondary {
            Some(s) => format!("{} {s}", query.primary),
            None => query.primary.clone(),
        };
        let expanded = self.snapshot.lexical().expand(&text);
        let lexical = if w_lex > 0.0 {
            let scores = self.snapshot.lexical().score_tokens(&expanded.tokens)?;
            Some(self.lexical_by_position(&scores, opts.exclude_fallback))
        } else {
            None
        };
        check_deadline(opts.deadline)?;

        let mut results = self.fuse(
            semantic.as_deref(),
            lexical.as_deref(),
            query.mode,
            opts.root.as_deref(),
            None,
            query.top_k,
        );
        self.annotate(&mut results, &expanded.tokens);
        Ok(SearchOutcome {
            results,
            secondary,
            topics: expanded.topics,
            degraded,
        })
    }

    /// Rank the corpus against an indexed paper, excluding the paper.
    ///
    /// The stored vector drives the semantic channel and the paper's
    /// keywords (or title, if it has none) drive the lexical channel.
    pub fn similar(
        &self,
        reference: &str,
        top_k: usize,
        opts: &SearchOptions,
    ) -> Result<(&'a DocumentRecord, SearchOutcome<'a>)> {
        check_deadline(opts.deadline)?;
        let snapshot = self.snapshot;
        let record = snapshot.find(reference).ok_or_else(|| Error::NotFound {
            kind: "paper",
            name: reference.to_string(),
        })?;
        let position = snapshot.position(record.id.numeric).ok_or_else(|| Error::NotFound {
            kind: "paper",
            name: reference.to_string(),
        })?;

        let mut degraded = None;
        let semantic = match snapshot.vectors() {
            Some(matrix) => Some(clamp(matrix.similarities(matrix.row(position)))),
            None => {
                tracing::warn!("no vector index, ranking similar papers lexically");
                degraded = Some("no vector index".to_string());
                None
            }
        };

        let tokenizer = snapshot.tokenizer();
        let mut tokens: Vec<String> = record
            .keywords
            .iter()
            .flat_map(|k| tokenizer.tokenize(k))
            .collect();
        if tokens.is_empty() {
            tokens = tokenizer.tokenize(&record.title);
        }
        let mut seen = std::collections::HashSet::new();
        tokens.retain(|t| seen.insert(t.clone()));
        let scores = snapshot.lexical().score_tokens(&tokens)?;
        let lexical = self.lexical_by_position(&scores, opts.exclude_fallback);
        check_deadline(opts.deadline)?;

        let mut results = self.fuse(
            semantic.as_deref(),
            Some(&lexical),
            SearchMode::Hybrid,
            opts.root.as_deref(),
            Some(position),
            top_k,
        );
        self.annotate(&mut results, &tokens);
        Ok((
            record,
            SearchOutcome {
                results,
                secondary: None,
                topics: Vec::new(),
                degraded,
            },
        ))
    }

    /// Per-position semantic scores: the elementwise maximum over the
    /// query texts, clamped at zero.
    fn query_similarities(&self, texts: &[&str]) -> Result<Vec<f32>> {
        let matrix = self.snapshot.vectors().ok_or_else(|| Error::NotFound {
            kind: "vector index",
            name: "run build-embeddings".to_string(),
        })?;
        let embedder = self
            .embedder
            .ok_or_else(|| Error::Embedding("no embedder configured".to_string()))?;
        if embedder.model_id() != matrix.model {
            tracing::warn!(
                index = %matrix.model,
                query = embedder.model_id(),
                "query model differs from the model the index was built with"
            );
        }

        let mut best: Option<Vec<f32>> = None;
        for text in texts {
            let vector = embed_query_one(embedder, text)?;
            if vector.len() != matrix.dimension() {
                return Err(Error::Embedding(format!(
                    "query vector has dimension {}, index has {}",
                    vector.len(),
                    matrix.dimension()
                )));
            }
            let scores = matrix.similarities(&vector);
            best = Some(match best {
                None => scores,
                Some(prev) => prev.iter().zip(&scores).map(|(a, b)| a.max(*b)).collect(),
            });
        }
        Ok(clamp(best.unwrap_or_else(|| vec![0.0; self.snapshot.len()])))
    }

    fn lexical_by_position(
        &self,
        scores: &std::collections::HashMap<u64, f32>,
        exclude_fallback: bool,
    ) -> Vec<f32> {
        self.snapshot
            .ids()
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let fallback = exclude_fallback
                    && self.snapshot.record(i).is_some_and(|r| r.abstract_fallback);
                if fallback {
                    0.0
                } else {
                    scores.get(id).copied().unwrap_or(0.0)
                }
            })
            .collect()
    }

    fn annotate(&self, results: &mut [RankedResult<'a>], tokens: &[String]) {
        let lexical = self.snapshot.lexical();
        for r in results {
            r.matched_terms = lexical.matched_terms(r.document, tokens);
        }
    }

    fn fuse(
        &self,
        semantic: Option<&[f32]>,
        lexical: Option<&[f32]>,
        mode: SearchMode,
        root: Option<&str>,
        exclude: Option<usize>,
        top_k: usize,
    ) -> Vec<RankedResult<'a>> {
        let snapshot = self.snapshot;
        let (w_sem, w_lex) = mode.weights();
        let n = snapshot.len();
        let semantic = normalized(semantic, n, exclude);
        let lexical = normalized(lexical, n, exclude);

        let mut scored: Vec<(usize, f32)> = (0..n)
            .filter(|i| Some(*i) != exclude)
            .map(|i| (i, w_sem * semantic[i] + w_lex * lexical[i]))
            .filter(|(_, combined)| *combined > 0.0)
            .collect();
        let ids = snapshot.ids();
        scored.sort_by(|a, b| match b.1.total_cmp(&a.1) {
            Ordering::Equal => ids[a.0].cmp(&ids[b.0]),
            other => other,
        });

        scored
            .into_iter()
            .filter_map(|(i, score)| {
                let document = snapshot.record(i)?;
                if let Some(root) = root
                    && !document.from_root(root)
                {
                    return None;
                }
                Some((i, score, document))
            })
            .take(top_k)
            .enumerate()
            .map(|(rank, (i, score, document))| RankedResult {
                rank: rank + 1,
                score,
                semantic: semantic[i],
                lexical: lexical[i],
                matched_terms: Vec::new(),
                document,
            })
            .collect()
    }
}

/// Errors after which a hybrid query continues lexically.
fn degradable(e: &Error) -> bool {
    matches!(e, Error::Embedding(_) | Error::NotFound { .. })
}

fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(d) if Instant::now() >= d => Err(Error::DeadlineExceeded),
        _ => Ok(()),
    }
}

fn clamp(mut scores: Vec<f32>) -> Vec<f32> {
    scores.iter_mut().for_each(|s| *s = s.max(0.0));
    scores
}

/// Divide by the channel maximum; an absent or all-zero channel is zeros.
fn normalized(scores: Option<&[f32]>, n: usize, exclude: Option<usize>) -> Vec<f32> {
    let Some(scores) = scores else {
        return vec![0.0; n];
    };
    let max = scores
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != exclude)
        .map(|(_, s)| *s)
        .fold(0.0f32, f32::max);
    if max <= 0.0 {
        return vec![0.0; n];
    }
    scores.iter().map(|s| (s / max).max(0.0)).collect()
}

/// Format results for human-readable terminal output.
pub fn format_human(outcome: &SearchOutcome<'_>) {
    if let Some(secondary) = &outcome.secondary {
        println!("Also searching: {secondary}");
    }
    if !outcome.topics.is_empty() {
        println!("Expanded topics: {}", outcome.topics.join(", "));
    }
    if outcome.results.is_empty() {
        println!("No results found.");
        return;
    }

    for r in &outcome.results {
        let doc = r.document;
        let year = doc.year.map(|y| format!(" ({y})")).unwrap_or_default();
        println!("{:>3}. [{:.3}] {}{year} {}", r.rank, r.score, doc.title, doc.id);
        let mut authors = doc.authors.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
        if doc.authors.len() > 3 {
            authors.push_str(" et al.");
        }
        if !authors.is_empty() {
            println!("     {authors}");
        }
        let thesis = if doc.thesis { ", thesis" } else { "" };
        println!(
            "     sem {:.3}  lex {:.3}  [{}{thesis}] {}",
            r.semantic,
            r.lexical,
            doc.language,
            doc.path.display()
        );
        if !r.matched_terms.is_empty() {
            println!("     matched: {}", r.matched_terms.join(", "));
        }
    }
    println!("\n{} result(s)", outcome.results.len());
}

/// Format results as JSON output.
pub fn format_json(outcome: &SearchOutcome<'_>, query: &str, mode: SearchMode) -> Result<()> {
    let value = serde_json::json!({
        "query": query,
        "secondary": outcome.secondary,
        "topics": outcome.topics,
        "mode": mode,
        "degraded": outcome.degraded,
        "result_count": outcome.results.len(),
        "results": outcome.results,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        dictionary::fixtures::dictionaries,
        index_builder::BuildMode,
        metadata_index::MetadataIndex,
        record::{Origin, Provenance, fixtures::record},
        vector_builder::VectorBuilder,
        vector_index::VectorIndex,
    };

    /// One dimension per topic, matched in either language, plus a bias.
    struct TopicEmbedder;

    const TOPICS: &[&[&str]] = &[
        &["phenology", "物候"],
        &["runoff", "径流"],
        &["immunotherapy", "免疫治疗"],
    ];

    impl Embedder for TopicEmbedder {
        fn model_id(&self) -> &str {
            "topic"
        }

        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    let mut v: Vec<f32> = TOPICS
                        .iter()
                        .map(|words| words.iter().map(|w| t.matches(w).count()).sum::<usize>() as f32)
                        .collect();
                    v.push(0.1);
                    v
                })
                .collect())
        }
    }

    fn paper(key: &str, title: &str, abstract_text: &str) -> DocumentRecord {
        let mut r = record(key, title);
        r.abstract_text = abstract_text.to_string();
        r
    }

    fn corpus() -> MetadataIndex {
        let mut index = MetadataIndex::new("file_name");
        index.insert(paper(
            "pheno",
            "Spring phenology of alpine meadows",
            "Green-up dates advance under warming.",
        ));
        index.insert(paper(
            "runoff",
            "Runoff generation in snowmelt catchments",
            "Runoff and streamflow respond to snow.",
        ));
        let mut store = paper(
            "immuno",
            "Checkpoint immunotherapy outcomes",
            "Immunotherapy response in melanoma.",
        );
        store.provenance = [Provenance {
            origin: Origin::Store,
            path: "/zotero/immuno.pdf".into(),
        }]
        .into();
        index.insert(store);
        index
    }

    fn snapshot_with_vectors(dir: &std::path::Path) -> Snapshot {
        let meta = corpus();
        let vectors = VectorIndex::open(&dir.join("vectors.redb")).unwrap();
        VectorBuilder::new(&TopicEmbedder)
            .build(&meta, &vectors, BuildMode::Full)
            .unwrap();
        Snapshot::from_parts(meta, Some(&vectors), dictionaries()).unwrap()
    }

    fn titles(outcome: &SearchOutcome<'_>) -> Vec<String> {
        outcome.results.iter().map(|r| r.document.title.clone()).collect()
    }

    #[test]
    fn hybrid_ranks_cross_lingual_match_first() {
        let tmp = tempfile::tempdir().unwrap();
        let snap = snapshot_with_vectors(tmp.path());
        let ranker = Ranker::new(&snap, Some(&TopicEmbedder));

        let outcome = ranker.search(&Query::new("物候"), &SearchOptions::default()).unwrap();
        assert!(outcome.degraded.is_none());
        assert_eq!(outcome.results[0].document.title, "Spring phenology of alpine meadows");
        assert_eq!(outcome.results[0].semantic, 1.0);
        assert_eq!(outcome.results[0].lexical, 1.0);
        for (i, r) in outcome.results.iter().enumerate() {
            assert_eq!(r.rank, i + 1);
            assert!(r.score > 0.0);
        }
    }

    #[test]
    fn scores_are_descending_and_truncated() {
        let tmp = tempfile::tempdir().unwrap();
        let snap = snapshot_with_vectors(tmp.path());
        let ranker = Ranker::new(&snap, Some(&TopicEmbedder));

        let mut query = Query::new("径流");
        query.top_k = 2;
        let outcome = ranker.search(&query, &SearchOptions::default()).unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results[0].score >= outcome.results[1].score);
        assert_eq!(outcome.results[0].document.title, "Runoff generation in snowmelt catchments");
    }

    #[test]
    fn lexical_mode_needs_no_embedder() {
        let snap = Snapshot::from_parts(corpus(), None, dictionaries()).unwrap();
        let ranker = Ranker::new(&snap, None);

        let mut query = Query::new("免疫治疗");
        query.mode = SearchMode::Lexical;
        let outcome = ranker.search(&query, &SearchOptions::default()).unwrap();
        assert_eq!(titles(&outcome), vec!["Checkpoint immunotherapy outcomes"]);
        assert_eq!(outcome.results[0].semantic, 0.0);
    }

    #[test]
    fn hybrid_without_vectors_degrades() {
        let snap = Snapshot::from_parts(corpus(), None, dictionaries()).unwrap();
        let ranker = Ranker::new(&snap, Some(&TopicEmbedder));

        let outcome = ranker.search(&Query::new("物候"), &SearchOptions::default()).unwrap();
        assert!(outcome.degraded.is_some());
        assert_eq!(titles(&outcome), vec!["Spring phenology of alpine meadows"]);

        let mut query = Query::new("物候");
        query.mode = SearchMode::Semantic;
        assert!(ranker.search(&query, &SearchOptions::default()).is_err());
    }

    #[test]
    fn ties_break_on_document_id() {
        let mut meta = MetadataIndex::new("file_name");
        meta.insert(paper("x", "Runoff", ""));
        meta.insert(paper("y", "Runoff", ""));
        meta.insert(paper("z", "Runoff", ""));
        let snap = Snapshot::from_parts(meta, None, dictionaries()).unwrap();
        let ranker = Ranker::new(&snap, None);

        let mut query = Query::new("runoff");
        query.mode = SearchMode::Lexical;
        let outcome = ranker.search(&query, &SearchOptions::default()).unwrap();
        let ids: Vec<u64> = outcome.results.iter().map(|r| r.document.id.numeric).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 3);

        let again = ranker.search(&query, &SearchOptions::default()).unwrap();
        assert_eq!(titles(&again), titles(&outcome));
    }

    #[test]
    fn root_filter_restricts_results() {
        let tmp = tempfile::tempdir().unwrap();
        let snap = snapshot_with_vectors(tmp.path());
        let ranker = Ranker::new(&snap, Some(&TopicEmbedder));

        let opts = SearchOptions {
            root: Some("store".to_string()),
            ..Default::default()
        };
        let outcome = ranker.search(&Query::new("immunotherapy phenology"), &opts).unwrap();
        assert_eq!(titles(&outcome), vec!["Checkpoint immunotherapy outcomes"]);
    }

    #[test]
    fn expired_deadline_fails() {
        let snap = Snapshot::from_parts(corpus(), None, dictionaries()).unwrap();
        let ranker = Ranker::new(&snap, None);
        let opts = SearchOptions {
            deadline: Some(Instant::now() - Duration::from_millis(1)),
            ..Default::default()
        };
        let err = ranker.search(&Query::new("runoff"), &opts).unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
    }

    #[test]
    fn auto_translate_derives_secondary_query() {
        let snap = Snapshot::from_parts(corpus(), None, dictionaries()).unwrap();
        let ranker = Ranker::new(&snap, None);
        let mut query = Query::new("径流");
        query.mode = SearchMode::Lexical;
        let opts = SearchOptions {
            auto_translate: true,
            ..Default::default()
        };
        let outcome = ranker.search(&query, &opts).unwrap();
        assert_eq!(outcome.secondary.as_deref(), Some("runoff streamflow"));
    }

    #[test]
    fn similar_excludes_the_reference() {
        let tmp = tempfile::tempdir().unwrap();
        let snap = snapshot_with_vectors(tmp.path());
        let ranker = Ranker::new(&snap, None);

        let (reference, outcome) = ranker
            .similar("Spring phenology", 10, &SearchOptions::default())
            .unwrap();
        assert_eq!(reference.title, "Spring phenology of alpine meadows");
        assert!(outcome.results.iter().all(|r| r.document.id != reference.id));

        let err = ranker.similar("no such paper", 10, &SearchOptions::default()).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn exclude_fallback_drops_lexical_matches_only() {
        let mut meta = corpus();
        let mut fallback = paper(
            "runoff-notes",
            "Runoff field notes",
            "Runoff gauges were read twice a day.",
        );
        fallback.abstract_fallback = true;
        meta.insert(fallback);
        let snap = Snapshot::from_parts(meta, None, dictionaries()).unwrap();
        let ranker = Ranker::new(&snap, None);

        let mut query = Query::new("runoff");
        query.mode = SearchMode::Lexical;
        let all = ranker.search(&query, &SearchOptions::default()).unwrap();
        assert!(titles(&all).contains(&"Runoff field notes".to_string()));

        let opts = SearchOptions {
            exclude_fallback: true,
            ..Default::default()
        };
        let strict = ranker.search(&query, &opts).unwrap();
        assert_eq!(titles(&strict), vec!["Runoff generation in snowmelt catchments"]);
    }

    #[test]
    fn results_report_matched_terms_and_topics() {
        let snap = Snapshot::from_parts(corpus(), None, dictionaries()).unwrap();
        let ranker = Ranker::new(&snap, None);

        let mut query = Query::new("物候");
        query.mode = SearchMode::Lexical;
        let outcome = ranker.search(&query, &SearchOptions::default()).unwrap();
        assert_eq!(outcome.topics, vec!["物候"]);
        assert_eq!(outcome.results[0].matched_terms, vec!["phenology", "green-up"]);

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["results"][0]["matched_terms"][0], "phenology");
        assert_eq!(json["topics"][0], "物候");
    }

    /// Counts query-side encodings; paper encodings go through `embed`.
    struct QueryCounting {
        queries: std::sync::atomic::AtomicUsize,
    }

    impl Embedder for QueryCounting {
        fn model_id(&self) -> &str {
            "topic"
        }

        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            TopicEmbedder.embed(texts)
        }

        fn embed_query(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.queries
                .fetch_add(texts.len(), std::sync::atomic::Ordering::SeqCst);
            TopicEmbedder.embed(texts)
        }
    }

    #[test]
    fn queries_use_the_query_encoding() {
        let tmp = tempfile::tempdir().unwrap();
        let snap = snapshot_with_vectors(tmp.path());
        let embedder = QueryCounting {
            queries: Default::default(),
        };
        let ranker = Ranker::new(&snap, Some(&embedder));

        let mut query = Query::new("物候");
        query.secondary = Some("phenology".to_string());
        let outcome = ranker.search(&query, &SearchOptions::default()).unwrap();
        assert!(outcome.degraded.is_none());
        assert_eq!(embedder.queries.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn normalization_divides_by_channel_max() {
        assert_eq!(normalized(Some(&[2.0, 1.0, 0.0]), 3, None), vec![1.0, 0.5, 0.0]);
        assert_eq!(normalized(Some(&[0.0, 0.0]), 2, None), vec![0.0, 0.0]);
        assert_eq!(normalized(None, 2, None), vec![0.0, 0.0]);
        assert_eq!(normalized(Some(&[4.0, 2.0]), 2, Some(0)), vec![2.0, 1.0]);
    }
}
