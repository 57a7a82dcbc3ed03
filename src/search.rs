//! Multi-stage search within one shard.
//!
//! For each candidate artist, in request order:
//! 1. load (or build) the artist's indexes,
//! 2. fuzzy-match the recording name and fan hits out to their rows,
//! 3. without a release name, answer with the top recording candidates,
//! 4. otherwise fuzzy-match the release name the same way,
//! 5. cross the top recording and release candidates, averaging confidences,
//! 6. answer with the single best pair.
//!
//! The first artist that produces an answer wins; later candidates are not
//! consulted even if they might score higher. This keeps latency flat for
//! artists with large catalogs.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::artist_cache::{ArtistIndexCache, ArtistIndexes, CacheStats};
use crate::config::SearchConfig;
use crate::error::{MappingError, Result};
use crate::models::{RecordingCandidate, ReleaseCandidate, SearchRequest, SearchResult};
use crate::normalize::{encode, encode_symbolic};
use crate::row_store::RowStore;
use crate::shard::ShardAssignment;

/// Reject requests that can never be answered.
pub fn validate_request(request: &SearchRequest) -> Result<()> {
    if request.id.trim().is_empty() {
        return Err(MappingError::MalformedRequest("missing request id".to_string()));
    }
    if encode(&request.recording_name).is_empty() {
        return Err(MappingError::MalformedRequest(format!(
            "recording name {:?} has nothing to match on",
            request.recording_name
        )));
    }
    if request.artist_ids.is_empty()
        && encode(&request.artist_name).is_empty()
        && encode_symbolic(&request.artist_name).is_empty()
    {
        return Err(MappingError::MalformedRequest(
            "request has neither candidate artist ids nor an artist name".to_string(),
        ));
    }
    Ok(())
}

/// Restricts an engine to the artists one shard owns.
#[derive(Clone)]
pub struct ShardFilter {
    pub shard: usize,
    pub assignment: Arc<ShardAssignment>,
}

/// Where a shard-local search ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchProgress {
    /// Final answer for the request, possibly empty.
    Found(Vec<SearchResult>),
    /// Continue with candidate `cursor` on `shard`.
    Forward { shard: usize, cursor: usize },
}

pub struct SearchEngine {
    store: Box<dyn RowStore>,
    cache: ArtistIndexCache,
    config: SearchConfig,
    shard: Option<ShardFilter>,
}

impl SearchEngine {
    pub fn new(store: Box<dyn RowStore>, config: SearchConfig) -> Self {
        Self {
            cache: ArtistIndexCache::new(config.backend),
            store,
            config,
            shard: None,
        }
    }

    /// Only search artists that `assignment` places on `shard`.
    pub fn with_shard(mut self, shard: usize, assignment: Arc<ShardAssignment>) -> Self {
        self.shard = Some(ShardFilter { shard, assignment });
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Resolve a request to at most `top_candidates` results (no release name)
    /// or exactly one result (with a release name). Empty when no candidate
    /// artist produces a match. With a shard filter, candidates owned by other
    /// shards are skipped.
    pub fn search(&mut self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        validate_request(request)?;
        match self.walk(request, 0, false)? {
            SearchProgress::Found(results) => Ok(results),
            SearchProgress::Forward { .. } => Ok(Vec::new()),
        }
    }

    /// Search candidates from position `cursor` on, in request order.
    ///
    /// Stops at the first candidate owned by another shard and reports where
    /// to continue, so that candidate order is kept across shards. Candidates
    /// with no shard at all are skipped.
    pub fn search_from(
        &mut self,
        request: &SearchRequest,
        cursor: usize,
    ) -> Result<SearchProgress> {
        validate_request(request)?;
        self.walk(request, cursor, true)
    }

    fn walk(
        &mut self,
        request: &SearchRequest,
        cursor: usize,
        hand_off: bool,
    ) -> Result<SearchProgress> {
        let recording_name = encode(&request.recording_name);
        let release_name = request
            .release_name
            .as_deref()
            .map(encode)
            .filter(|name| !name.is_empty());

        for (position, &artist_id) in request.artist_ids.iter().enumerate().skip(cursor) {
            if let Some(filter) = &self.shard {
                match filter.assignment.shard_for(artist_id) {
                    Some(owner) if owner == filter.shard => {}
                    Some(owner) if hand_off => {
                        return Ok(SearchProgress::Forward {
                            shard: owner,
                            cursor: position,
                        });
                    }
                    _ => {
                        debug!(artist_id, shard = filter.shard, "artist not on this shard");
                        continue;
                    }
                }
            }

            let indexes = match self.cache.get_or_build(artist_id, self.store.as_ref()) {
                Ok(Some(indexes)) => indexes,
                Ok(None) => {
                    let error = MappingError::ArtistNotFound(artist_id);
                    debug!(error = %error, "skipping candidate artist");
                    continue;
                }
                Err(e) => {
                    warn!(artist_id, error = %e, "row store read failed, skipping artist");
                    continue;
                }
            };
            let config = &self.config;

            let recordings = recording_candidates(indexes, &recording_name, config);
            if recordings.is_empty() {
                continue;
            }

            let Some(release_name) = &release_name else {
                return Ok(SearchProgress::Found(
                    recordings
                        .iter()
                        .take(config.top_candidates)
                        .map(|r| SearchResult {
                            release_id: r.release_id,
                            recording_id: r.recording_id,
                            confidence: r.confidence,
                            request_id: request.id.clone(),
                        })
                        .collect(),
                ));
            };

            let releases = release_candidates(indexes, release_name, config);
            let top = config.top_candidates;
            if let Some(hit) = best_combination(indexes, &recordings, &releases, top) {
                return Ok(SearchProgress::Found(vec![SearchResult {
                    release_id: hit.release_id,
                    recording_id: hit.recording_id,
                    confidence: hit.confidence,
                    request_id: request.id.clone(),
                }]));
            }
        }

        Ok(SearchProgress::Found(Vec::new()))
    }
}

/// Recording hits fanned out to rows, by confidence then catalog score.
pub fn recording_candidates(
    indexes: &ArtistIndexes,
    query: &str,
    config: &SearchConfig,
) -> Vec<RecordingCandidate> {
    let mut candidates: Vec<RecordingCandidate> = indexes
        .recording_index
        .search(query, config.recording_confidence, config.neighbors)
        .into_iter()
        .flat_map(|hit| {
            indexes.recordings[hit.id].rows.iter().map(move |r| RecordingCandidate {
                recording_id: r.recording_id,
                release_id: r.release_id,
                score: r.score,
                confidence: hit.confidence,
                text: hit.text.clone(),
            })
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| config.score_order.compare(a.score, b.score))
    });
    candidates
}

/// Release hits fanned out to release ids, ordered like recordings.
pub fn release_candidates(
    indexes: &ArtistIndexes,
    query: &str,
    config: &SearchConfig,
) -> Vec<ReleaseCandidate> {
    let mut candidates: Vec<ReleaseCandidate> = indexes
        .release_index
        .search(query, config.release_confidence, config.neighbors)
        .into_iter()
        .flat_map(|hit| {
            indexes.releases[hit.id]
                .releases
                .iter()
                .map(move |&(release_id, score)| ReleaseCandidate {
                    release_id,
                    score,
                    confidence: hit.confidence,
                    text: hit.text.clone(),
                })
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| config.score_order.compare(a.score, b.score))
    });
    candidates
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinedHit {
    pub recording_id: i64,
    pub release_id: i64,
    pub confidence: f32,
}

/// Best (recording, release) pair among the top `top` of each list.
///
/// Recordings never seen on any release are skipped. Confidence is the mean
/// of the two; on ties the first pair in recording-major order wins.
pub fn best_combination(
    indexes: &ArtistIndexes,
    recordings: &[RecordingCandidate],
    releases: &[ReleaseCandidate],
    top: usize,
) -> Option<CombinedHit> {
    let mut best: Option<CombinedHit> = None;
    for rec in recordings.iter().take(top) {
        if !indexes.recording_releases.contains_key(&rec.recording_id) {
            continue;
        }
        for rel in releases.iter().take(top) {
            let confidence = (rec.confidence + rel.confidence) / 2.0;
            if best.map_or(true, |b| confidence > b.confidence) {
                best = Some(CombinedHit {
                    recording_id: rec.recording_id,
                    release_id: rel.release_id,
                    confidence,
                });
            }
        }
    }
    best
}
