use std::{
    io::IsTerminal,
    path::Path,
    time::{Duration, Instant},
};

use clap::Parser;
use paperbert::{
    ConfigDb,
    DataDir,
    Dictionaries,
    DomainTokenizer,
    Error,
    MetadataIndex,
    ModelManager,
    Result,
    catalog::{self, CorpusSummary},
    Snapshot,
    VectorIndex,
    embedding::Embedder,
    extraction::FileExtractor,
    index_builder::{BuildMode, IndexBuilder},
    metadata_store::{MetadataStore, ZoteroStore},
    scanner::{LocalRoot, Scanner},
    search::{self, Query, Ranker, SearchOptions},
    settings::{self, Settings},
    vector_builder::VectorBuilder,
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ConfigAction, RootAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("PAPERBERT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    let settings = Settings::load(&config_db)?;
    let progress = !cli.quiet && std::io::stderr().is_terminal();

    match &cli.command {
        Command::Root { action } => match action {
            RootAction::Add { path, name } => root_add(&config_db, path, name)?,
            RootAction::Remove { name } => root_remove(&config_db, name)?,
            RootAction::List { json } => root_list(&config_db, *json)?,
        },
        Command::Config { action } => match action {
            ConfigAction::Show { json } => {
                config_show(&settings, cli.model.as_deref(), *json)?;
            }
            ConfigAction::Set { key, value } => {
                Settings::validate(key, value)?;
                config_db.set_setting(key, value.trim())?;
                println!("Set {key} = {}", value.trim());
            }
            ConfigAction::Unset { key } => {
                if !settings::KEYS.contains(&key.as_str()) {
                    return Err(Error::Config(format!("unknown setting '{key}'")));
                }
                if config_db.remove_setting(key)? {
                    println!("Cleared {key}");
                } else {
                    println!("{key} was not set");
                }
            }
        },
        Command::BuildIndex(args) => {
            cmd_build_index(&config_db, &data_dir, &settings, args, progress)?;
        }
        Command::BuildEmbeddings(args) => {
            let index = MetadataIndex::load(&data_dir.papers_json())?;
            let model = ModelManager::resolve(cli.model.as_deref(), settings.model.as_deref());
            let vectors = VectorIndex::open(&data_dir.vectors_db())?;
            let mode = if args.incremental {
                BuildMode::Incremental
            } else {
                BuildMode::Full
            };

            let report = VectorBuilder::new(&model)
                .progress(progress)
                .build(&index, &vectors, mode)?;
            eprintln!(
                "Encoded {} papers with {} ({} reused, {} dropped)",
                report.encoded,
                model.model_id(),
                report.reused,
                report.dropped
            );
        }
        Command::Search(args) => {
            let snapshot = load_snapshot(&data_dir, &settings)?;
            let model = ModelManager::resolve(cli.model.as_deref(), settings.model.as_deref());
            let ranker = Ranker::new(&snapshot, Some(&model));

            let query = Query {
                primary: args.query.clone(),
                secondary: args.also.clone(),
                top_k: args.top,
                mode: args.mode,
            };
            let opts = SearchOptions {
                deadline: args
                    .timeout_ms
                    .map(|ms| Instant::now() + Duration::from_millis(ms)),
                root: args.root.clone(),
                auto_translate: args.translate,
                exclude_fallback: args.no_fallback,
            };
            let outcome = ranker.search(&query, &opts)?;

            if args.json {
                search::format_json(&outcome, &args.query, args.mode)?;
            } else {
                if let Some(reason) = &outcome.degraded {
                    eprintln!("Semantic ranking unavailable ({reason}); showing lexical results.");
                }
                search::format_human(&outcome);
            }
        }
        Command::Similar(args) => {
            let snapshot = load_snapshot(&data_dir, &settings)?;
            let ranker = Ranker::new(&snapshot, None);
            let (reference, outcome) =
                ranker.similar(&args.reference, args.top, &SearchOptions::default())?;

            if args.json {
                let value = serde_json::json!({
                    "reference": reference,
                    "degraded": outcome.degraded,
                    "result_count": outcome.results.len(),
                    "results": outcome.results,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Papers similar to {} {}\n", reference.title, reference.id);
                search::format_human(&outcome);
            }
        }
        Command::Status(args) => {
            cmd_status(&config_db, &data_dir, &settings, cli.model.as_deref(), args)?;
        }
        Command::Catalog(args) => {
            let index = MetadataIndex::load(&data_dir.papers_json())?;
            match &args.output {
                Some(path) => {
                    catalog::write_catalog(&index, path)?;
                    eprintln!("Wrote {}", path.display());
                }
                None => print!("{}", catalog::render_markdown(&index)),
            }
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn load_snapshot(data_dir: &DataDir, settings: &Settings) -> Result<Snapshot> {
    let dicts = Dictionaries::load(&settings.dictionary_dir(data_dir));
    Snapshot::load(&data_dir.papers_json(), &data_dir.vectors_db(), dicts)
}

fn root_add(config_db: &ConfigDb, path: &Path, name: &str) -> Result<()> {
    if name.is_empty() || name == "store" {
        return Err(Error::Config(format!("'{name}' cannot be used as a root name")));
    }
    if !path.is_dir() {
        return Err(Error::Config(format!(
            "path is not a directory: {}",
            path.display()
        )));
    }

    let abs_path = path.canonicalize().map_err(|e| {
        Error::Config(format!("cannot resolve path {}: {e}", path.display()))
    })?;

    if config_db.get_root(name)?.is_some() {
        return Err(Error::Config(format!("root '{name}' already exists")));
    }

    config_db.set_root(name, &abs_path.to_string_lossy())?;
    println!("Added root '{name}' -> {}", abs_path.display());
    Ok(())
}

fn root_remove(config_db: &ConfigDb, name: &str) -> Result<()> {
    if !config_db.remove_root(name)? {
        return Err(Error::NotFound {
            kind: "root",
            name: name.to_string(),
        });
    }
    println!("Removed root '{name}'; run build-index to drop its papers");
    Ok(())
}

fn root_list(config_db: &ConfigDb, json: bool) -> Result<()> {
    let roots = config_db.list_roots()?;

    if json {
        let value: Vec<_> = roots
            .iter()
            .map(|(name, path)| serde_json::json!({ "name": name, "path": path }))
            .collect();
        println!("{}", serde_json::to_string(&value)?);
    } else if roots.is_empty() {
        println!("No roots registered.");
    } else {
        for (name, path) in &roots {
            println!("{name}\t{path}");
        }
    }
    Ok(())
}

fn config_show(settings: &Settings, model_flag: Option<&str>, json: bool) -> Result<()> {
    let effective_model = ModelManager::resolve(model_flag, settings.model.as_deref());
    let entries = settings.entries();

    if json {
        let mut map: serde_json::Map<String, serde_json::Value> = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.into()))
            .collect();
        map.insert("effective_model".into(), effective_model.model_id().into());
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (key, value) in &entries {
            println!("{key} = {value}");
        }
        println!("(effective model: {})", effective_model.model_id());
    }
    Ok(())
}

fn cmd_build_index(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    settings: &Settings,
    args: &cli::BuildIndexArgs,
    progress: bool,
) -> Result<()> {
    let roots: Vec<LocalRoot> = config_db
        .list_roots()?
        .into_iter()
        .map(|(name, path)| LocalRoot {
            name,
            path: path.into(),
        })
        .collect();
    let store = (!args.no_store)
        .then(|| settings.metadata_store_dir())
        .flatten()
        .map(ZoteroStore::new);
    if roots.is_empty() && store.is_none() {
        return Err(Error::Config(
            "no roots registered and no metadata store found; use `paperbert root add`".into(),
        ));
    }

    let skip = settings.skip()?;
    let scan = Scanner::new(&roots, store.as_ref().map(|s| s as &dyn MetadataStore), &skip)
        .scan()?;
    if scan.store_unavailable {
        eprintln!("Warning: metadata store unavailable, indexed local roots only");
    }

    let dicts = Dictionaries::load(&settings.dictionary_dir(data_dir));
    let tokenizer = DomainTokenizer::new(&dicts);
    let key = settings.dedup_key.strategy();
    let extractor = FileExtractor;

    let papers_json = data_dir.papers_json();
    let mut index = MetadataIndex::load(&papers_json)?;
    let mode = if args.incremental {
        BuildMode::Incremental
    } else {
        BuildMode::Full
    };

    let report = IndexBuilder::new(&extractor, &dicts, &tokenizer, &*key)
        .source_language(&settings.source_language)
        .progress(progress)
        .build(scan.records, &mut index, mode)?;
    index.save(&papers_json)?;
    catalog::write_catalog(&index, &data_dir.catalog_md())?;

    let s = report.stats;
    eprintln!(
        "Indexed {} papers ({} discovered, {} unchanged, {} removed, {} restored, {} skipped)",
        s.indexed, s.discovered, s.unchanged, s.removed, s.restored, s.skipped
    );
    for (path, reason) in &report.skipped {
        eprintln!("  skipped {}: {reason}", path.display());
    }
    if s.indexed + s.removed + s.restored > 0 {
        eprintln!("Run `paperbert build-embeddings --incremental` to update the vector index.");
    }
    Ok(())
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    settings: &Settings,
    model_flag: Option<&str>,
    args: &cli::StatusArgs,
) -> Result<()> {
    let roots = config_db.list_roots()?;
    let index = MetadataIndex::load(&data_dir.papers_json())?;
    let summary = CorpusSummary::of(&index, args.top_keywords);
    let live = summary.papers;
    let removed = index.len() - live;
    let model = ModelManager::resolve(model_flag, settings.model.as_deref());

    let (vector_rows, vector_info) = match VectorIndex::open_existing(&data_dir.vectors_db())? {
        Some(vectors) => (vectors.len()?, vectors.info()?),
        None => (0, None),
    };
    let aligned = vector_rows == live;

    if args.json {
        let value = serde_json::json!({
            "data_dir": data_dir.root(),
            "model": model.model_id(),
            "roots": roots.iter().map(|(n, p)| serde_json::json!({"name": n, "path": p})).collect::<Vec<_>>(),
            "metadata_store": settings.metadata_store_dir(),
            "papers": live,
            "removed": removed,
            "built_at": index.built_at,
            "key_strategy": index.key_strategy,
            "last_build": index.stats,
            "vectors": vector_rows,
            "vector_model": vector_info.as_ref().map(|i| i.model.clone()),
            "vector_dimension": vector_info.as_ref().map(|i| i.dimension),
            "aligned": aligned,
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Model: {}", model.model_id());
        println!("Roots: {}", roots.len());
        for (name, path) in &roots {
            println!("  {name}: {path}");
        }
        match settings.metadata_store_dir() {
            Some(dir) => println!("Metadata store: {}", dir.display()),
            None => println!("Metadata store: none"),
        }
        println!("Papers: {live} ({removed} removed)");
        print_summary(&summary);
        match &vector_info {
            Some(info) => println!(
                "Vectors: {vector_rows} ({}, dimension {})",
                info.model, info.dimension
            ),
            None => println!("Vectors: none"),
        }
        if !aligned && live > 0 {
            println!("Vector index is out of date; run `paperbert build-embeddings --incremental`.");
        }
    }
    Ok(())
}

fn print_summary(summary: &CorpusSummary) {
    if summary.papers == 0 {
        return;
    }
    let languages: Vec<String> = summary
        .languages
        .iter()
        .map(|(lang, n)| format!("{lang} {n}"))
        .collect();
    println!("  Languages: {}", languages.join(", "));
    println!(
        "  With abstract: {} ({} more from text fallback)",
        summary.with_abstract, summary.abstract_fallback
    );
    println!(
        "  With keywords: {} ({} generated)",
        summary.with_keywords, summary.keywords_auto
    );
    println!("  Theses: {}", summary.thesis);
    println!("  By root:");
    for (root, s) in &summary.roots {
        println!(
            "    {root}: {} papers, {} with abstract, {} theses",
            s.papers, s.with_abstract, s.thesis
        );
    }
    if !summary.top_keywords.is_empty() {
        println!("  Top keywords:");
        for (keyword, count) in &summary.top_keywords {
            println!("    {keyword}: {count}");
        }
    }
}
