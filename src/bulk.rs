//! Offline bulk construction of per-artist recording indexes.
//!
//! The whole catalog is cut into batches of roughly `bulk_batch_rows` rows
//! along artist boundaries. Batches go to a fixed set of worker threads over a
//! bounded channel; each worker builds one recording index per artist in its
//! batch and hands the results back. The main thread merges batches in
//! completion order (artist ids never repeat across batches), then builds the
//! catalog-wide artist index.

use crossbeam_channel::{bounded, Receiver, Sender};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::artist::ArtistResolver;
use crate::config::{Backend, SearchConfig};
use crate::fuzzy_index::FuzzyIndex;
use crate::models::{ArtistEntry, MappingRow};
use crate::normalize::encode;
use crate::progress::{create_progress_bar, format_duration, log_progress};

/// One artist's rows.
type ArtistRows<'a> = &'a [MappingRow];

struct BatchOutcome {
    rows: usize,
    indexes: Vec<(i64, FuzzyIndex<i64>)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkStats {
    pub rows: usize,
    pub batches: usize,
    pub artists: usize,
    pub indexed_artists: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Hit from a bulk index: artist stage and recording stage confidences.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkMatch {
    pub artist_credit_id: i64,
    pub artist_name: String,
    pub artist_confidence: f32,
    pub recording_id: i64,
    pub recording_text: String,
    pub recording_confidence: f32,
}

/// Result of a bulk build.
pub struct BulkIndex {
    recording_indexes: FxHashMap<i64, FuzzyIndex<i64>>,
    artists: ArtistResolver,
    neighbors: usize,
    pub stats: BulkStats,
}

impl BulkIndex {
    /// For every artist resolved above the bulk threshold, the nearest
    /// recordings to `recording_name` in that artist's catalog.
    pub fn search(&self, artist_name: &str, recording_name: &str) -> Vec<BulkMatch> {
        let recording_name = encode(recording_name);
        if recording_name.is_empty() {
            return Vec::new();
        }

        let mut matches = Vec::new();
        for artist in self.artists.resolve(artist_name) {
            let Some(index) = self.recording_indexes.get(&artist.artist_credit_id) else {
                debug!(artist_credit_id = artist.artist_credit_id, "artist has no recording index");
                continue;
            };
            for hit in index.search(&recording_name, 0.0, self.neighbors) {
                matches.push(BulkMatch {
                    artist_credit_id: artist.artist_credit_id,
                    artist_name: artist.name.clone(),
                    artist_confidence: artist.confidence,
                    recording_id: hit.id,
                    recording_text: hit.text,
                    recording_confidence: hit.confidence,
                });
            }
        }
        matches
    }

    pub fn recording_index(&self, artist_credit_id: i64) -> Option<&FuzzyIndex<i64>> {
        self.recording_indexes.get(&artist_credit_id)
    }

    pub fn artists(&self) -> &ArtistResolver {
        &self.artists
    }

    /// Number of artists with a recording index.
    pub fn len(&self) -> usize {
        self.recording_indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recording_indexes.is_empty()
    }
}

pub struct BulkIndexBuilder {
    config: SearchConfig,
}

impl BulkIndexBuilder {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    /// Build every artist's recording index plus the artist index.
    /// Rows are grouped by artist credit id first, so any order is accepted.
    pub fn build(&self, mut rows: Vec<MappingRow>) -> BulkIndex {
        let t0 = Instant::now();
        rows.sort_by_key(|r| r.artist_credit_id);

        let workers = self.config.effective_bulk_workers();
        let backend = self.config.backend;
        let batches = plan_batches(&rows, self.config.bulk_batch_rows);
        let batch_count = batches.len();
        let artists = artist_entries(&rows);
        info!(
            rows = rows.len(),
            artists = artists.len(),
            batches = batch_count,
            workers,
            "bulk index build starting"
        );

        let pb = create_progress_bar(rows.len() as u64, "Indexing recordings");
        let mut recording_indexes: FxHashMap<i64, FuzzyIndex<i64>> = FxHashMap::default();
        recording_indexes.reserve(artists.len());

        std::thread::scope(|scope| {
            let (job_tx, job_rx) = bounded::<Vec<ArtistRows>>(workers * 2);
            let (out_tx, out_rx) = bounded::<BatchOutcome>(workers * 2);

            for worker_id in 0..workers {
                let rx = job_rx.clone();
                let tx = out_tx.clone();
                scope.spawn(move || batch_worker_loop(worker_id, rx, tx, backend));
            }
            drop(job_rx);
            drop(out_tx); // merge loop ends once every worker is done

            scope.spawn(move || {
                for batch in batches {
                    if job_tx.send(batch).is_err() {
                        break;
                    }
                }
            });

            let mut done = 0u64;
            for outcome in out_rx.iter() {
                done += outcome.rows as u64;
                recording_indexes.extend(outcome.indexes);
                pb.inc(outcome.rows as u64);
                log_progress("Indexing recordings", done, rows.len() as u64, 1);
            }
        });
        pb.finish_with_message(format!("Indexed {} artists", recording_indexes.len()));

        let resolver = ArtistResolver::build(&artists, &self.config)
            .with_min_confidence(self.config.bulk_artist_confidence);

        let stats = BulkStats {
            rows: rows.len(),
            batches: batch_count,
            artists: resolver.len(),
            indexed_artists: recording_indexes.len(),
            elapsed: t0.elapsed(),
        };
        info!(
            indexed_artists = stats.indexed_artists,
            elapsed = %format_duration(stats.elapsed),
            "bulk index build done"
        );

        BulkIndex {
            recording_indexes,
            artists: resolver,
            neighbors: self.config.neighbors,
            stats,
        }
    }
}

/// Cut artist-sorted rows into batches of at least `batch_rows` rows without
/// splitting an artist. The last batch may be smaller.
fn plan_batches(rows: &[MappingRow], batch_rows: usize) -> Vec<Vec<ArtistRows<'_>>> {
    let mut batches = Vec::new();
    let mut batch: Vec<ArtistRows> = Vec::new();
    let mut batch_len = 0usize;

    for group in rows.chunk_by(|a, b| a.artist_credit_id == b.artist_credit_id) {
        batch_len += group.len();
        batch.push(group);
        if batch_len >= batch_rows {
            batches.push(std::mem::take(&mut batch));
            batch_len = 0;
        }
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

fn artist_entries(rows: &[MappingRow]) -> Vec<ArtistEntry> {
    rows.chunk_by(|a, b| a.artist_credit_id == b.artist_credit_id)
        .filter_map(|group| group.first())
        .map(|row| ArtistEntry {
            artist_credit_id: row.artist_credit_id,
            name: row.artist_credit_name.clone(),
            sort_name: row.artist_credit_sortname.clone(),
        })
        .collect()
}

fn batch_worker_loop(
    worker_id: usize,
    rx: Receiver<Vec<ArtistRows>>,
    tx: Sender<BatchOutcome>,
    backend: Backend,
) {
    while let Ok(batch) = rx.recv() {
        let t0 = Instant::now();
        let rows: usize = batch.iter().map(|group| group.len()).sum();
        let indexes: Vec<(i64, FuzzyIndex<i64>)> = batch
            .into_iter()
            .filter_map(|group| build_recording_index(group, backend))
            .collect();
        debug!(
            worker_id,
            rows,
            artists = indexes.len(),
            elapsed = %format_duration(t0.elapsed()),
            "indexed batch"
        );
        if tx.send(BatchOutcome { rows, indexes }).is_err() {
            break;
        }
    }
}

/// Recording index for one artist keyed by recording id; `None` when no
/// recording name survives normalization.
fn build_recording_index(group: ArtistRows, backend: Backend) -> Option<(i64, FuzzyIndex<i64>)> {
    let artist_credit_id = group.first()?.artist_credit_id;
    let mut seen: FxHashSet<(String, i64)> = FxHashSet::default();
    let pairs: Vec<(String, i64)> = group
        .iter()
        .map(|row| (encode(&row.recording_name), row.recording_id))
        .filter(|(text, _)| !text.is_empty())
        .filter(|pair| seen.insert(pair.clone()))
        .collect();
    if pairs.is_empty() {
        return None;
    }

    let mut index = FuzzyIndex::new(backend);
    index.build(pairs);
    Some((artist_credit_id, index))
}
