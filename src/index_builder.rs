use std::{path::PathBuf, sync::Mutex};

use kdam::{BarExt, tqdm};
use rayon::prelude::*;

use crate::{
    analysis,
    dedup::{self, CanonicalRecord, KeyStrategy},
    dictionary::Dictionaries,
    error::{Error, Result},
    extraction::Extractor,
    incremental::{self, DiffResult},
    metadata_index::{BuildStats, MetadataIndex},
    record::DocumentRecord,
    scanner::RawRecord,
    tokenizer::DomainTokenizer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Full,
    Incremental,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub stats: BuildStats,
    /// Files whose extraction failed, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Drives extraction and enrichment into the metadata index.
pub struct IndexBuilder<'a> {
    extractor: &'a dyn Extractor,
    dicts: &'a Dictionaries,
    tokenizer: &'a DomainTokenizer,
    key: &'a dyn KeyStrategy,
    source_language: String,
    progress: bool,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(
        extractor: &'a dyn Extractor,
        dicts: &'a Dictionaries,
        tokenizer: &'a DomainTokenizer,
        key: &'a dyn KeyStrategy,
    ) -> Self {
        Self {
            extractor,
            dicts,
            tokenizer,
            key,
            source_language: "zh".to_string(),
            progress: false,
        }
    }

    /// Language of the user's queries; papers in any other language get
    /// synthetic tags.
    pub fn source_language(mut self, language: &str) -> Self {
        self.source_language = language.to_string();
        self
    }

    pub fn progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Merge, diff and extract `raws` into `index`.
    ///
    /// The index is left untouched when nothing was discovered. Saving is
    /// the caller's responsibility.
    pub fn build(
        &self,
        raws: Vec<RawRecord>,
        index: &mut MetadataIndex,
        mode: BuildMode,
    ) -> Result<BuildReport> {
        let canonical = dedup::merge(raws, self.key);
        if canonical.is_empty() {
            return Err(Error::EmptyCorpus);
        }

        let mode = if mode == BuildMode::Incremental
            && !index.is_empty()
            && index.key_strategy != self.key.name()
        {
            tracing::warn!(
                previous = %index.key_strategy,
                current = self.key.name(),
                "dedup key strategy changed, running a full build"
            );
            BuildMode::Full
        } else {
            mode
        };

        let diff = match mode {
            BuildMode::Full => incremental::full(index, &canonical),
            BuildMode::Incremental => incremental::diff(index, &canonical),
        };
        tracing::info!(
            discovered = canonical.len(),
            to_extract = diff.to_extract.len(),
            vanished = diff.vanished.len(),
            "planned index build"
        );

        let extracted = self.extract_all(&diff.to_extract);
        Ok(self.apply(index, canonical.len(), diff, extracted))
    }

    fn extract_all(
        &self,
        records: &[CanonicalRecord],
    ) -> Vec<(u64, PathBuf, Result<DocumentRecord>)> {
        let pb = Mutex::new(tqdm!(
            total = records.len(),
            desc = "Extracting",
            unit = " docs",
            disable = !self.progress
        ));

        let mut results: Vec<_> = records
            .par_iter()
            .map(|canonical| {
                let record = self.extractor.extract(&canonical.primary).map(|extraction| {
                    analysis::enrich(
                        canonical,
                        &extraction,
                        self.dicts,
                        self.tokenizer,
                        &self.source_language,
                    )
                });
                if let Ok(mut pb) = pb.lock() {
                    let _ = pb.update(1);
                }
                (canonical.id.numeric, canonical.primary.clone(), record)
            })
            .collect();

        if let Ok(mut pb) = pb.lock() {
            let _ = pb.refresh();
        }
        if self.progress {
            eprintln!();
        }

        results.sort_by_key(|(id, _, _)| *id);
        results
    }

    fn apply(
        &self,
        index: &mut MetadataIndex,
        discovered: usize,
        diff: DiffResult,
        extracted: Vec<(u64, PathBuf, Result<DocumentRecord>)>,
    ) -> BuildReport {
        let mut report = BuildReport {
            stats: BuildStats {
                discovered,
                unchanged: diff.unchanged,
                restored: diff.restored,
                removed: diff.vanished.len(),
                ..Default::default()
            },
            skipped: Vec::new(),
        };

        for (id, path, result) in extracted {
            match result {
                Ok(record) => {
                    index.insert(record);
                    report.stats.indexed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        kept_previous = index.get(id).is_some(),
                        "extraction failed, skipping"
                    );
                    report.stats.skipped += 1;
                    report.skipped.push((path, e.to_string()));
                }
            }
        }

        let to_restore: std::collections::HashSet<u64> =
            diff.to_restore.into_iter().collect();
        let vanished: std::collections::HashSet<u64> =
            diff.vanished.into_iter().collect();
        for record in index.records_mut() {
            if to_restore.contains(&record.id.numeric) {
                record.removed = false;
            } else if vanished.contains(&record.id.numeric) {
                record.removed = true;
            }
        }

        index.key_strategy = self.key.name().to_string();
        index.stats = report.stats;

        tracing::info!(
            indexed = report.stats.indexed,
            unchanged = report.stats.unchanged,
            removed = report.stats.removed,
            restored = report.stats.restored,
            skipped = report.stats.skipped,
            "index build finished"
        );
        report
    }
}
