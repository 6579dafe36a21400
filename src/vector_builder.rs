use std::collections::HashSet;

use kdam::{BarExt, tqdm};

use crate::{
    embedding::{Embedder, normalize},
    error::{Error, Result},
    index_builder::BuildMode,
    metadata_index::MetadataIndex,
    vector_index::{IndexInfo, TextHash, VectorIndex, VectorRow, text_hash},
};

const DEFAULT_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VectorReport {
    pub encoded: usize,
    /// Rows kept because their input text did not change.
    pub reused: usize,
    /// Rows deleted for removed or vanished documents.
    pub dropped: usize,
}

struct Pending {
    id: u64,
    text: String,
    hash: TextHash,
}

/// Encodes live document records into the vector index.
pub struct VectorBuilder<'a> {
    embedder: &'a dyn Embedder,
    batch_size: usize,
    progress: bool,
}

impl<'a> VectorBuilder<'a> {
    pub fn new(embedder: &'a dyn Embedder) -> Self {
        Self {
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
            progress: false,
        }
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Bring `vectors` in line with the live records of `metadata`.
    ///
    /// Every vector is computed before anything is written, so an embedder
    /// failure leaves the previous index intact.
    pub fn build(
        &self,
        metadata: &MetadataIndex,
        vectors: &VectorIndex,
        mode: BuildMode,
    ) -> Result<VectorReport> {
        let live: Vec<Pending> = metadata
            .live()
            .map(|r| {
                let text = r.embedding_input();
                Pending {
                    id: r.id.numeric,
                    hash: text_hash(&text),
                    text,
                }
            })
            .collect();
        if live.is_empty() {
            return Err(Error::EmptyCorpus);
        }

        let previous = vectors.info()?;
        let mode = match (&previous, mode) {
            (Some(info), BuildMode::Incremental) if info.model != self.embedder.model_id() => {
                tracing::warn!(
                    previous = %info.model,
                    current = self.embedder.model_id(),
                    "embedding model changed, re-encoding everything"
                );
                BuildMode::Full
            }
            (None, _) => BuildMode::Full,
            (_, mode) => mode,
        };

        let stored = vectors.text_hashes()?;
        let live_ids: HashSet<u64> = live.iter().map(|p| p.id).collect();
        let to_encode: Vec<&Pending> = live
            .iter()
            .filter(|p| mode == BuildMode::Full || stored.get(&p.id) != Some(&p.hash))
            .collect();
        let dropped: Vec<u64> = stored
            .keys()
            .copied()
            .filter(|id| !live_ids.contains(id))
            .collect();

        tracing::info!(
            live = live.len(),
            encode = to_encode.len(),
            drop = dropped.len(),
            model = self.embedder.model_id(),
            "planned vector build"
        );

        let rows = self.encode(&to_encode)?;

        let dimension = match (rows.first(), &previous) {
            (Some(row), _) => row.vector.len(),
            (None, Some(info)) => info.dimension,
            (None, None) => 0,
        };
        if mode == BuildMode::Incremental
            && let Some(info) = &previous
            && info.dimension != dimension
        {
            return Err(Error::Config(format!(
                "embedding dimension changed from {} to {dimension}; \
                 run build-embeddings without --incremental",
                info.dimension
            )));
        }

        let info = IndexInfo {
            model: self.embedder.model_id().to_string(),
            dimension,
        };
        match mode {
            BuildMode::Full => vectors.replace_all(&info, &rows)?,
            BuildMode::Incremental => vectors.apply(&info, &rows, &dropped)?,
        }
        let report = VectorReport {
            encoded: rows.len(),
            reused: live.len() - rows.len(),
            dropped: dropped.len(),
        };

        tracing::info!(
            encoded = report.encoded,
            reused = report.reused,
            dropped = report.dropped,
            "vector build finished"
        );
        Ok(report)
    }

    fn encode(&self, pending: &[&Pending]) -> Result<Vec<VectorRow>> {
        let mut pb = tqdm!(
            total = pending.len(),
            desc = "Embedding",
            unit = " docs",
            disable = !self.progress
        );

        let mut rows = Vec::with_capacity(pending.len());
        let mut dimension = None;
        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let vectors = self.embedder.embed(&texts)?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }

            for (p, mut vector) in batch.iter().zip(vectors) {
                let expected = *dimension.get_or_insert(vector.len());
                if vector.is_empty() || vector.len() != expected {
                    return Err(Error::Embedding(format!(
                        "inconsistent vector dimension {} (expected {expected})",
                        vector.len()
                    )));
                }
                normalize(&mut vector);
                rows.push(VectorRow {
                    id: p.id,
                    text_hash: p.hash,
                    vector,
                });
            }
            let _ = pb.update(batch.len());
        }

        let _ = pb.refresh();
        if self.progress && !pending.is_empty() {
            eprintln!();
        }
        Ok(rows)
    }
}
