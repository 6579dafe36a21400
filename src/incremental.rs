use std::collections::HashSet;

use crate::{dedup::CanonicalRecord, metadata_index::MetadataIndex};

/// Result of comparing discovered records against the persisted index.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// Records that must be extracted: new ids, changed tokens, and removed
    /// records that reappeared with a different token.
    pub to_extract: Vec<CanonicalRecord>,
    /// Removed records that reappeared unchanged; un-deleted in place.
    pub to_restore: Vec<u64>,
    /// Every discovered id that was marked removed.
    pub restored: usize,
    pub unchanged: usize,
    /// Live ids that are no longer discovered.
    pub vanished: Vec<u64>,
}

/// Classify each discovered record by its change token.
pub fn diff(index: &MetadataIndex, discovered: &[CanonicalRecord]) -> DiffResult {
    let mut result = DiffResult::default();
    let mut seen = HashSet::new();

    for canonical in discovered {
        seen.insert(canonical.id.numeric);
        match index.get(canonical.id.numeric) {
            None => result.to_extract.push(canonical.clone()),
            Some(stored) => {
                let same = stored.change_token == canonical.change_token;
                if stored.removed {
                    result.restored += 1;
                    if same {
                        result.to_restore.push(canonical.id.numeric);
                    } else {
                        result.to_extract.push(canonical.clone());
                    }
                } else if same {
                    result.unchanged += 1;
                } else {
                    result.to_extract.push(canonical.clone());
                }
            }
        }
    }

    result.vanished = index
        .live()
        .map(|r| r.id.numeric)
        .filter(|id| !seen.contains(id))
        .collect();

    result
}

/// Everything is extracted again; only vanished ids carry over (as removed).
pub fn full(index: &MetadataIndex, discovered: &[CanonicalRecord]) -> DiffResult {
    let seen: HashSet<u64> = discovered.iter().map(|c| c.id.numeric).collect();
    DiffResult {
        to_extract: discovered.to_vec(),
        to_restore: Vec::new(),
        restored: discovered
            .iter()
            .filter(|c| index.get(c.id.numeric).is_some_and(|r| r.removed))
            .count(),
        unchanged: 0,
        vanished: index
            .live()
            .map(|r| r.id.numeric)
            .filter(|id| !seen.contains(id))
            .collect(),
    }
}
