//! Per-artist recording and release indexes, built on first use.
//!
//! Each shard worker keeps one cache for its whole lifetime. Entries are never
//! evicted: a shard serves a bounded set of artists and a rebuild would show
//! up as a latency spike. [`ArtistIndexCache::stats`] reports growth.

use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::debug;

use crate::config::Backend;
use crate::error::Result;
use crate::fuzzy_index::FuzzyIndex;
use crate::models::{MappingRow, RecordingGroup, RecordingRef, ReleaseGroup};
use crate::normalize::encode;
use crate::row_store::RowStore;

/// Everything needed to search one artist's catalog.
pub struct ArtistIndexes {
    /// Ids are positions in `recordings`.
    pub recording_index: FuzzyIndex<usize>,
    /// Ids are positions in `releases`.
    pub release_index: FuzzyIndex<usize>,
    pub recordings: Vec<RecordingGroup>,
    pub releases: Vec<ReleaseGroup>,
    /// recording_id → every release_id it appeared on.
    pub recording_releases: FxHashMap<i64, Vec<i64>>,
}

impl ArtistIndexes {
    /// Group rows by normalized text and build both indexes.
    /// Returns `None` when no row has a non-empty recording text.
    pub fn build(rows: &[MappingRow], backend: Backend) -> Option<Self> {
        let (recordings, releases, recording_releases) = group_rows(rows);
        if recordings.is_empty() {
            return None;
        }

        let (recording_index, release_index) = rayon::join(
            || {
                let mut index = FuzzyIndex::new(backend);
                index.build(recordings.iter().enumerate().map(|(i, g)| (g.text.as_str(), i)));
                index
            },
            || {
                let mut index = FuzzyIndex::new(backend);
                index.build(releases.iter().enumerate().map(|(i, g)| (g.text.as_str(), i)));
                index
            },
        );

        Some(Self {
            recording_index,
            release_index,
            recordings,
            releases,
            recording_releases,
        })
    }
}

/// Collapse rows into recording groups, release groups and the
/// recording → releases cross-reference. Groups keep first-seen order.
fn group_rows(
    rows: &[MappingRow],
) -> (Vec<RecordingGroup>, Vec<ReleaseGroup>, FxHashMap<i64, Vec<i64>>) {
    let mut recordings: Vec<RecordingGroup> = Vec::new();
    let mut recording_pos: FxHashMap<String, usize> = FxHashMap::default();
    let mut releases: Vec<ReleaseGroup> = Vec::new();
    let mut release_pos: FxHashMap<String, usize> = FxHashMap::default();
    let mut recording_releases: FxHashMap<i64, Vec<i64>> = FxHashMap::default();

    for row in rows {
        recording_releases
            .entry(row.recording_id)
            .or_default()
            .push(row.release_id);

        let recording_text = encode(&row.recording_name);
        if !recording_text.is_empty() {
            let pos = *recording_pos.entry(recording_text.clone()).or_insert_with(|| {
                recordings.push(RecordingGroup {
                    text: recording_text,
                    rows: Vec::new(),
                });
                recordings.len() - 1
            });
            recordings[pos].rows.push(RecordingRef {
                recording_id: row.recording_id,
                release_id: row.release_id,
                score: row.score,
            });
        }

        let release_text = encode(&row.release_name);
        if !release_text.is_empty() {
            let pos = *release_pos.entry(release_text.clone()).or_insert_with(|| {
                releases.push(ReleaseGroup {
                    text: release_text,
                    releases: Vec::new(),
                });
                releases.len() - 1
            });
            let group = &mut releases[pos];
            // Same release seen through several recordings: keep one entry, lowest score
            match group.releases.iter_mut().find(|(id, _)| *id == row.release_id) {
                Some(entry) => entry.1 = entry.1.min(row.score),
                None => group.releases.push((row.release_id, row.score)),
            }
        }
    }

    (recordings, releases, recording_releases)
}

enum CacheSlot {
    Built(ArtistIndexes),
    /// Looked up, nothing to index on this shard.
    Missing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub built: usize,
    pub missing: usize,
    pub store_reads: usize,
}

impl CacheStats {
    pub fn entries(&self) -> usize {
        self.built + self.missing
    }
}

/// Memoized per-artist indexes. Absent key = never attempted.
pub struct ArtistIndexCache {
    backend: Backend,
    slots: FxHashMap<i64, CacheSlot>,
    store_reads: usize,
}

impl ArtistIndexCache {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            slots: FxHashMap::default(),
            store_reads: 0,
        }
    }

    /// Indexes for `artist_credit_id`, reading the row store on first use only.
    /// `Ok(None)` means the artist has nothing to index here; that outcome is
    /// memoized too. Store errors are returned and not memoized.
    pub fn get_or_build(
        &mut self,
        artist_credit_id: i64,
        store: &dyn RowStore,
    ) -> Result<Option<&ArtistIndexes>> {
        if !self.slots.contains_key(&artist_credit_id) {
            self.store_reads += 1;
            let rows = store.rows_for_artist(artist_credit_id)?;
            let slot = match ArtistIndexes::build(&rows, self.backend) {
                Some(indexes) => {
                    debug!(
                        artist_credit_id,
                        rows = rows.len(),
                        recordings = indexes.recordings.len(),
                        releases = indexes.releases.len(),
                        "built artist indexes"
                    );
                    CacheSlot::Built(indexes)
                }
                None => {
                    debug!(artist_credit_id, "no indexable rows for artist");
                    CacheSlot::Missing
                }
            };
            self.slots.insert(artist_credit_id, slot);
        }

        Ok(match self.slots.get(&artist_credit_id) {
            Some(CacheSlot::Built(indexes)) => Some(indexes),
            _ => None,
        })
    }

    /// True once a lookup for this artist has completed (hit or miss).
    pub fn is_attempted(&self, artist_credit_id: i64) -> bool {
        self.slots.contains_key(&artist_credit_id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let built = self
            .slots
            .values()
            .filter(|s| matches!(s, CacheSlot::Built(_)))
            .count();
        CacheStats {
            built,
            missing: self.slots.len() - built,
            store_reads: self.store_reads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArtistEntry, MappingRow};
    use crate::row_store::tests::row;
    use crate::row_store::MemoryRowStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts `rows_for_artist` calls.
    struct CountingStore {
        inner: MemoryRowStore,
        reads: AtomicUsize,
    }

    impl RowStore for CountingStore {
        fn rows_for_artist(&self, artist_credit_id: i64) -> Result<Vec<MappingRow>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.rows_for_artist(artist_credit_id)
        }

        fn artist_histogram(&self) -> Result<FxHashMap<i64, u64>> {
            self.inner.artist_histogram()
        }

        fn artists(&self) -> Result<Vec<ArtistEntry>> {
            self.inner.artists()
        }

        fn all_rows(&self) -> Result<Vec<MappingRow>> {
            self.inner.all_rows()
        }
    }

    fn counting_store() -> CountingStore {
        CountingStore {
            inner: MemoryRowStore::new(vec![
                row(1, "The Beatles", (10, "Let It Be"), (100, "Let It Be"), 1),
                row(1, "The Beatles", (10, "Let It Be"), (101, "Let It Be... Naked"), 3),
                row(1, "The Beatles", (11, "Let it be!"), (102, "Past Masters"), 2),
                row(1, "The Beatles", (12, "Get Back"), (100, "Let It Be"), 1),
                row(3, "Nobody", (30, "!!!"), (300, "???"), 1),
            ]),
            reads: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_grouping_by_normalized_text() {
        let store = counting_store();
        let rows = store.rows_for_artist(1).unwrap();
        let indexes = ArtistIndexes::build(&rows, Backend::InvertedIndex).unwrap();

        // "Let It Be" (two releases) and "Let it be!" share one group of three rows
        assert_eq!(indexes.recordings.len(), 2);
        assert_eq!(indexes.recordings[0].text, "letitbe");
        assert_eq!(indexes.recordings[0].rows.len(), 3);
        assert_eq!(indexes.recordings[1].text, "getback");

        let let_it_be = indexes.releases.iter().find(|g| g.text == "letitbe").unwrap();
        // Release 100 reached through two recordings collapses to one entry
        assert_eq!(let_it_be.releases, vec![(100, 1)]);
        assert_eq!(indexes.releases.len(), 3);

        assert_eq!(indexes.recording_releases[&10], vec![100, 101]);
        assert_eq!(indexes.recording_index.len(), 2);
        assert_eq!(indexes.release_index.len(), 3);
    }

    #[test]
    fn test_memoizes_hits_without_second_read() {
        let store = counting_store();
        let mut cache = ArtistIndexCache::new(Backend::InvertedIndex);

        let first = cache
            .get_or_build(1, &store)
            .unwrap()
            .map(|i| (i.recordings.clone(), i.releases.clone()));
        let second = cache
            .get_or_build(1, &store)
            .unwrap()
            .map(|i| (i.recordings.clone(), i.releases.clone()));

        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { built: 1, missing: 0, store_reads: 1 });
    }

    #[test]
    fn test_memoizes_misses() {
        let store = counting_store();
        let mut cache = ArtistIndexCache::new(Backend::InvertedIndex);

        assert!(!cache.is_attempted(99));
        assert!(cache.get_or_build(99, &store).unwrap().is_none());
        assert!(cache.is_attempted(99));
        assert!(cache.get_or_build(99, &store).unwrap().is_none());
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);

        // Rows exist but nothing survives normalization
        assert!(cache.get_or_build(3, &store).unwrap().is_none());
        assert_eq!(cache.stats().missing, 2);
        assert_eq!(cache.len(), 2);
    }
}
