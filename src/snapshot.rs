use std::{collections::HashMap, path::Path, sync::Arc};

use crate::{
    dictionary::Dictionaries,
    embedding::dot,
    error::{Error, Result},
    lexical::LexicalIndex,
    metadata_index::MetadataIndex,
    record::DocumentRecord,
    tokenizer::DomainTokenizer,
    vector_index::VectorIndex,
};

/// Dense row-major matrix; row `i` belongs to the `i`-th live record.
#[derive(Debug, Clone)]
pub struct VectorMatrix {
    pub model: String,
    dimension: usize,
    data: Vec<f32>,
}

impl VectorMatrix {
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dimension..(i + 1) * self.dimension]
    }

    pub fn rows(&self) -> usize {
        self.data.len() / self.dimension.max(1)
    }

    /// Dot product of `query` against every row.
    pub fn similarities(&self, query: &[f32]) -> Vec<f32> {
        self.data
            .chunks_exact(self.dimension.max(1))
            .map(|row| dot(row, query))
            .collect()
    }
}

/// Immutable, query-ready view of both indices.
///
/// Loaded once per process and shared read-only between queries.
pub struct Snapshot {
    metadata: MetadataIndex,
    /// Live record ids, ascending.
    live: Vec<u64>,
    positions: HashMap<u64, usize>,
    vectors: Option<VectorMatrix>,
    lexical: LexicalIndex,
    dicts: Arc<Dictionaries>,
    tokenizer: Arc<DomainTokenizer>,
}

impl Snapshot {
    /// Load the persisted indices.
    ///
    /// A missing or empty vector index is tolerated; a vector index that
    /// disagrees with the metadata index is not.
    pub fn load(papers_json: &Path, vectors_db: &Path, dicts: Dictionaries) -> Result<Self> {
        let metadata = MetadataIndex::load(papers_json)?;
        let vectors = VectorIndex::open_existing(vectors_db)?;
        if vectors.is_none() {
            tracing::warn!(
                path = %vectors_db.display(),
                "no vector index found, semantic ranking disabled; run build-embeddings"
            );
        }
        Self::from_parts(metadata, vectors.as_ref(), dicts)
    }

    pub fn from_parts(
        metadata: MetadataIndex,
        vectors: Option<&VectorIndex>,
        dicts: Dictionaries,
    ) -> Result<Self> {
        let live: Vec<u64> = metadata.live().map(|r| r.id.numeric).collect();
        if live.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        let positions = live.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let vectors = match vectors {
            Some(index) => load_matrix(index, &live)?,
            None => None,
        };

        let dicts = Arc::new(dicts);
        let tokenizer = Arc::new(DomainTokenizer::new(&dicts));
        let lexical = LexicalIndex::build(metadata.live(), dicts.clone(), tokenizer.clone())?;

        tracing::debug!(
            documents = live.len(),
            vectors = vectors.is_some(),
            "loaded snapshot"
        );
        Ok(Self {
            metadata,
            live,
            positions,
            vectors,
            lexical,
            dicts,
            tokenizer,
        })
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// The live record at position `i`.
    pub fn record(&self, i: usize) -> Option<&DocumentRecord> {
        self.metadata.get(*self.live.get(i)?)
    }

    pub fn records(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.live.iter().filter_map(|id| self.metadata.get(*id))
    }

    pub fn position(&self, id: u64) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn ids(&self) -> &[u64] {
        &self.live
    }

    /// Resolve a user reference to a live record.
    pub fn find(&self, reference: &str) -> Option<&DocumentRecord> {
        self.metadata.find(reference)
    }

    pub fn vectors(&self) -> Option<&VectorMatrix> {
        self.vectors.as_ref()
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    pub fn dictionaries(&self) -> &Dictionaries {
        &self.dicts
    }

    pub fn tokenizer(&self) -> &DomainTokenizer {
        &self.tokenizer
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("documents", &self.live.len())
            .field("vectors", &self.vectors.is_some())
            .finish_non_exhaustive()
    }
}

fn load_matrix(index: &VectorIndex, live: &[u64]) -> Result<Option<VectorMatrix>> {
    let Some(info) = index.info()? else {
        tracing::warn!("vector index is empty, semantic ranking disabled");
        return Ok(None);
    };
    let rows = index.load_all()?;
    if rows.is_empty() {
        tracing::warn!("vector index is empty, semantic ranking disabled");
        return Ok(None);
    }

    if rows.len() != live.len() {
        return Err(Error::Misaligned(format!(
            "{} vectors for {} live documents; run build-embeddings",
            rows.len(),
            live.len()
        )));
    }

    let mut data = Vec::with_capacity(rows.len() * info.dimension);
    // Both sides are sorted by id.
    for (row, id) in rows.iter().zip(live) {
        if row.id != *id {
            return Err(Error::Misaligned(format!(
                "vector index holds {:016x} where {:016x} was expected; run build-embeddings",
                row.id, id
            )));
        }
        if row.vector.len() != info.dimension {
            return Err(Error::Misaligned(format!(
                "vector {:016x} has dimension {}, index records {}",
                row.id,
                row.vector.len(),
                info.dimension
            )));
        }
        data.extend_from_slice(&row.vector);
    }

    Ok(Some(VectorMatrix {
        model: info.model,
        dimension: info.dimension,
        data,
    }))
}
