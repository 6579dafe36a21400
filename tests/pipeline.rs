use std::path::{Path, PathBuf};

use paperbert::{
    Dictionaries,
    DocumentRecord,
    DomainTokenizer,
    MetadataIndex,
    Result,
    Snapshot,
    VectorIndex,
    dedup::{FileNameKey, KeyStrategy},
    dictionary::{
        CompoundTagRules,
        ProtectedTerms,
        ReverseTagMap,
        TermTranslationMap,
        TopicExpansions,
    },
    embedding::Embedder,
    extraction::FileExtractor,
    index_builder::{BuildMode, IndexBuilder},
    metadata_store::{CatalogueRecord, MetadataStore},
    scanner::{LocalRoot, RawRecord, Scanner},
    search::{Query, Ranker, SearchMode, SearchOptions},
    vector_builder::VectorBuilder,
    walker::SkipPatterns,
};

/// Stands in for a multilingual model: one dimension per concept, matched
/// in either language, plus a constant bias.
struct ConceptEmbedder;

const CONCEPTS: &[&[&str]] = &[
    &["immunotherapy", "免疫治疗"],
    &["drug resistance", "耐药"],
    &["phenology", "物候"],
    &["runoff", "径流"],
    &["snowmelt", "融雪"],
];

impl Embedder for ConceptEmbedder {
    fn model_id(&self) -> &str {
        "concept"
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let text = text.to_lowercase();
                let mut v: Vec<f32> = CONCEPTS
                    .iter()
                    .map(|words| {
                        words.iter().map(|w| text.matches(w).count()).sum::<usize>() as f32
                    })
                    .collect();
                v.push(0.05);
                v
            })
            .collect())
    }
}

struct CatalogueFake {
    dir: PathBuf,
    records: Vec<CatalogueRecord>,
}

impl MetadataStore for CatalogueFake {
    fn location(&self) -> &Path {
        &self.dir
    }

    fn records(&self) -> Result<Vec<CatalogueRecord>> {
        Ok(self.records.clone())
    }
}

fn dictionaries() -> Dictionaries {
    Dictionaries {
        protected: ProtectedTerms::new(["免疫治疗", "物候期"]),
        expansions: TopicExpansions::new([("物候", vec!["phenology", "green-up"])]),
        translations: TermTranslationMap::new([
            ("免疫治疗", "immunotherapy"),
            ("物候", "phenology"),
            ("径流", "runoff streamflow"),
        ]),
        reverse_tags: ReverseTagMap::new([
            ("immunotherapy", "免疫治疗"),
            ("phenology", "物候"),
            ("runoff", "径流"),
        ]),
        compound_tags: CompoundTagRules::new([(["物候", "径流"], "物候变化水文效应")]),
    }
}

fn write_paper(dir: &Path, name: &str, title: &str, abstract_text: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(
        &path,
        format!("# {title}\n\nAbstract: {abstract_text}\n\nIntroduction\n\n{abstract_text}\n"),
    )
    .unwrap();
    path
}

struct Library {
    _tmp: tempfile::TempDir,
    papers: PathBuf,
    data: PathBuf,
}

impl Library {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let papers = tmp.path().join("papers");
        let data = tmp.path().join("data");
        std::fs::create_dir_all(&papers).unwrap();
        std::fs::create_dir_all(&data).unwrap();
        Self {
            _tmp: tmp,
            papers,
            data,
        }
    }

    fn roots(&self) -> Vec<LocalRoot> {
        vec![LocalRoot {
            name: "papers".to_string(),
            path: self.papers.clone(),
        }]
    }

    fn scan(&self, store: Option<&dyn MetadataStore>) -> Vec<RawRecord> {
        let roots = self.roots();
        let skip = SkipPatterns::default();
        Scanner::new(&roots, store, &skip).scan().unwrap().records
    }
}

fn build(raws: Vec<RawRecord>, index: &mut MetadataIndex, mode: BuildMode) {
    let dicts = dictionaries();
    let tokenizer = DomainTokenizer::new(&dicts);
    let key: &dyn KeyStrategy = &FileNameKey;
    IndexBuilder::new(&FileExtractor, &dicts, &tokenizer, key)
        .build(raws, index, mode)
        .unwrap();
}

fn live(index: &MetadataIndex) -> Vec<DocumentRecord> {
    index.live().cloned().collect()
}

fn seed_three(lib: &Library) {
    write_paper(
        &lib.papers,
        "phenology.md",
        "Spring phenology of alpine grasslands",
        "We track phenology and green-up timing of alpine grasslands across a warming gradient.",
    );
    write_paper(
        &lib.papers,
        "runoff.md",
        "Snowmelt runoff in mountain catchments",
        "Snowmelt controls runoff timing and streamflow volume in high mountain catchments.",
    );
    write_paper(
        &lib.papers,
        "resistance.md",
        "Mechanisms of acquired drug resistance",
        "Tumour cells acquire drug resistance through efflux pumps and target mutation pathways.",
    );
}

#[test]
fn full_build_is_idempotent_and_order_independent() {
    let lib = Library::new();
    seed_three(&lib);

    let raws = lib.scan(None);
    let mut first = MetadataIndex::default();
    build(raws.clone(), &mut first, BuildMode::Full);
    let snapshot = live(&first);
    assert_eq!(snapshot.len(), 3);

    build(raws.clone(), &mut first, BuildMode::Full);
    assert_eq!(live(&first), snapshot);

    let mut reversed_raws = raws;
    reversed_raws.reverse();
    let mut reversed = MetadataIndex::default();
    build(reversed_raws, &mut reversed, BuildMode::Full);
    assert_eq!(live(&reversed), snapshot);
}

#[test]
fn store_and_local_copies_merge_into_one_record() {
    let lib = Library::new();
    let abstract_text =
        "Checkpoint blockade immunotherapy improves survival in advanced melanoma patients.";
    write_paper(&lib.papers, "12. Checkpoint blockade.md", "checkpoint", abstract_text);
    let store_dir = lib.papers.parent().unwrap().join("zotero");
    let store_file = write_paper(&store_dir, "Checkpoint blockade.md", "checkpoint", abstract_text);

    let store = CatalogueFake {
        dir: store_dir,
        records: vec![CatalogueRecord {
            path: store_file,
            title: "Checkpoint blockade immunotherapy in melanoma".to_string(),
            authors: vec!["Smith John".to_string(), "Li Wei".to_string()],
            year: Some(2021),
            tags: vec!["oncology".to_string()],
            collections: vec!["thesis".to_string()],
        }],
    };

    let raws = lib.scan(Some(&store));
    assert_eq!(raws.len(), 2);

    let mut index = MetadataIndex::default();
    build(raws, &mut index, BuildMode::Full);
    let records = live(&index);
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.title, "Checkpoint blockade immunotherapy in melanoma");
    assert_eq!(record.authors, vec!["Smith John", "Li Wei"]);
    assert_eq!(record.year, Some(2021));
    assert!(record.tags.contains("oncology"));
    assert!(record.tags.contains("thesis"));
    assert_eq!(record.provenance.len(), 2);
    assert!(record.from_root("papers"));
    assert!(record.from_root("store"));
}

#[test]
fn incremental_build_matches_full_rebuild() {
    let lib = Library::new();
    seed_three(&lib);

    let mut incremental = MetadataIndex::default();
    build(lib.scan(None), &mut incremental, BuildMode::Full);

    write_paper(
        &lib.papers,
        "phenology-2.md",
        "Autumn phenology and leaf senescence",
        "Leaf senescence marks the end of the growing season and responds to autumn phenology.",
    );
    std::fs::remove_file(lib.papers.join("resistance.md")).unwrap();
    build(lib.scan(None), &mut incremental, BuildMode::Incremental);

    let mut full = MetadataIndex::default();
    build(lib.scan(None), &mut full, BuildMode::Full);

    assert_eq!(live(&incremental), live(&full));
    assert_eq!(incremental.live_count(), 3);
    assert_eq!(incremental.len(), 4);
}

#[test]
fn vector_build_keeps_alignment_through_changes() {
    let lib = Library::new();
    seed_three(&lib);
    let mut index = MetadataIndex::default();
    build(lib.scan(None), &mut index, BuildMode::Full);

    let vectors = VectorIndex::open(&lib.data.join("vectors.redb")).unwrap();
    VectorBuilder::new(&ConceptEmbedder)
        .build(&index, &vectors, BuildMode::Full)
        .unwrap();

    std::fs::remove_file(lib.papers.join("runoff.md")).unwrap();
    write_paper(
        &lib.papers,
        "snow.md",
        "Snowmelt timing under warming",
        "Earlier snowmelt shifts the seasonal runoff peak in snow dominated basins.",
    );
    build(lib.scan(None), &mut index, BuildMode::Incremental);
    let report = VectorBuilder::new(&ConceptEmbedder)
        .build(&index, &vectors, BuildMode::Incremental)
        .unwrap();
    assert_eq!(report.encoded, 1);
    assert_eq!(report.dropped, 1);

    let ids: Vec<u64> = vectors.load_all().unwrap().iter().map(|r| r.id).collect();
    let live_ids: Vec<u64> = index.live().map(|r| r.id.numeric).collect();
    assert_eq!(ids, live_ids);

    Snapshot::from_parts(index, Some(&vectors), dictionaries()).unwrap();
}

fn cross_lingual_library() -> (Library, Snapshot) {
    let lib = Library::new();
    let store_dir = lib.papers.parent().unwrap().join("zotero");
    let a = write_paper(
        &store_dir,
        "a.md",
        "PD-1 blockade in metastatic melanoma",
        "Immunotherapy with PD-1 antibodies extends survival in metastatic melanoma cohorts.",
    );
    let b = write_paper(
        &store_dir,
        "b.md",
        "Efflux pumps in tumour cells",
        "Drug resistance arises from efflux pump overexpression in cultured tumour cells.",
    );
    let c = write_paper(
        &store_dir,
        "c.md",
        "肿瘤免疫治疗的临床进展",
        "本文综述了肿瘤免疫治疗的临床进展，重点讨论检查点抑制剂在黑色素瘤和肺癌中的疗效与安全性，并展望未来的联合治疗策略与生物标志物研究方向。",
    );
    let catalogue = |path: PathBuf, title: &str, tag: &str| CatalogueRecord {
        path,
        title: title.to_string(),
        tags: vec![tag.to_string()],
        ..Default::default()
    };
    let store = CatalogueFake {
        dir: store_dir,
        records: vec![
            catalogue(a, "PD-1 blockade in metastatic melanoma", "immunotherapy"),
            catalogue(b, "Efflux pumps in tumour cells", "drug resistance"),
            catalogue(c, "肿瘤免疫治疗的临床进展", "免疫治疗"),
        ],
    };

    let mut index = MetadataIndex::default();
    build(lib.scan(Some(&store)), &mut index, BuildMode::Full);
    let vectors = VectorIndex::open(&lib.data.join("vectors.redb")).unwrap();
    VectorBuilder::new(&ConceptEmbedder)
        .build(&index, &vectors, BuildMode::Full)
        .unwrap();
    let snapshot = Snapshot::from_parts(index, Some(&vectors), dictionaries()).unwrap();
    (lib, snapshot)
}

#[test]
fn source_language_query_ranks_tagged_papers_first() {
    let (_lib, snapshot) = cross_lingual_library();
    let ranker = Ranker::new(&snapshot, Some(&ConceptEmbedder));

    let outcome = ranker
        .search(&Query::new("免疫治疗"), &SearchOptions::default())
        .unwrap();
    let titles: Vec<&str> = outcome.results.iter().map(|r| r.document.title.as_str()).collect();
    let rank = |title: &str| titles.iter().position(|t| *t == title);

    let b = rank("Efflux pumps in tumour cells");
    let a = rank("PD-1 blockade in metastatic melanoma").unwrap();
    let c = rank("肿瘤免疫治疗的临床进展").unwrap();
    if let Some(b) = b {
        assert!(a < b && c < b, "unexpected order: {titles:?}");
    }
    assert!(a < 2 && c < 2);
}

#[test]
fn ranking_is_deterministic() {
    let (_lib, snapshot) = cross_lingual_library();
    let ranker = Ranker::new(&snapshot, Some(&ConceptEmbedder));
    let query = Query::new("免疫治疗 melanoma");

    let first = ranker.search(&query, &SearchOptions::default()).unwrap();
    for _ in 0..3 {
        let again = ranker.search(&query, &SearchOptions::default()).unwrap();
        let pairs = |o: &paperbert::search::SearchOutcome<'_>| {
            o.results
                .iter()
                .map(|r| (r.document.id.numeric, r.score))
                .collect::<Vec<_>>()
        };
        assert_eq!(pairs(&again), pairs(&first));
    }
}

#[test]
fn exact_title_ranks_its_paper_first_semantically() {
    let lib = Library::new();
    seed_three(&lib);
    let mut index = MetadataIndex::default();
    build(lib.scan(None), &mut index, BuildMode::Full);
    let vectors = VectorIndex::open(&lib.data.join("vectors.redb")).unwrap();
    VectorBuilder::new(&ConceptEmbedder)
        .build(&index, &vectors, BuildMode::Full)
        .unwrap();
    let snapshot = Snapshot::from_parts(index, Some(&vectors), dictionaries()).unwrap();
    let ranker = Ranker::new(&snapshot, Some(&ConceptEmbedder));

    let mut query = Query::new("Snowmelt runoff in mountain catchments");
    query.mode = SearchMode::Semantic;
    let outcome = ranker.search(&query, &SearchOptions::default()).unwrap();
    assert_eq!(
        outcome.results[0].document.title,
        "Snowmelt runoff in mountain catchments"
    );
}

#[test]
fn deleted_vector_index_falls_back_to_lexical() {
    let lib = Library::new();
    seed_three(&lib);
    let papers_json = lib.data.join("papers.json");
    let vectors_db = lib.data.join("vectors.redb");

    let mut index = MetadataIndex::default();
    build(lib.scan(None), &mut index, BuildMode::Full);
    index.save(&papers_json).unwrap();
    {
        let vectors = VectorIndex::open(&vectors_db).unwrap();
        VectorBuilder::new(&ConceptEmbedder)
            .build(&index, &vectors, BuildMode::Full)
            .unwrap();
    }
    std::fs::remove_file(&vectors_db).unwrap();

    let snapshot = Snapshot::load(&papers_json, &vectors_db, dictionaries()).unwrap();
    let ranker = Ranker::new(&snapshot, Some(&ConceptEmbedder));
    let outcome = ranker
        .search(&Query::new("物候"), &SearchOptions::default())
        .unwrap();

    assert!(outcome.degraded.is_some());
    assert_eq!(
        outcome.results[0].document.title,
        "Spring phenology of alpine grasslands"
    );
    assert_eq!(outcome.results[0].semantic, 0.0);
}
