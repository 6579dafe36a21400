//! paperbert - cross-lingual hybrid search over a local research paper library.
//!
//! Papers are discovered from registered directories and a reference-manager
//! catalogue, deduplicated, and indexed twice: a metadata index searched
//! lexically with a dictionary-aware tokenizer, and a dense vector index
//! built with a multilingual [ColBERT](https://github.com/stanford-futuredata/ColBERT)
//! model. Queries written in one language find papers written in another.
//!
//! # Quick start
//!
//! ```no_run
//! use paperbert::{DataDir, Dictionaries, ModelManager, Snapshot};
//! use paperbert::search::{Query, Ranker, SearchOptions};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let dicts = Dictionaries::load(&data_dir.dictionary_dir());
//! let snapshot =
//!     Snapshot::load(&data_dir.papers_json(), &data_dir.vectors_db(), dicts).unwrap();
//! let model = ModelManager::resolve(None, None);
//!
//! let ranker = Ranker::new(&snapshot, Some(&model));
//! let outcome = ranker
//!     .search(&Query::new("植被物候对气候变化的响应"), &SearchOptions::default())
//!     .unwrap();
//! for r in &outcome.results {
//!     println!("{} (score: {:.3})", r.document.title, r.score);
//! }
//! ```

pub mod analysis;
pub mod catalog;
pub mod config_db;
pub mod data_dir;
pub mod dedup;
pub mod dictionary;
pub mod doc_id;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod incremental;
pub mod index_builder;
pub mod lexical;
pub mod metadata_index;
pub mod metadata_store;
pub mod model_manager;
pub mod record;
pub mod scanner;
pub mod search;
pub mod settings;
pub mod snapshot;
pub mod tokenizer;
pub mod vector_builder;
pub mod vector_index;
pub mod walker;

pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use dictionary::Dictionaries;
pub use doc_id::DocumentId;
pub use error::{Error, Result};
pub use metadata_index::MetadataIndex;
pub use model_manager::ModelManager;
pub use record::DocumentRecord;
pub use snapshot::Snapshot;
pub use tokenizer::DomainTokenizer;
pub use vector_index::VectorIndex;
