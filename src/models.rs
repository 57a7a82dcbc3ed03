//! Core data models for the mapping lookup.
//!
//! This module contains the record types that flow between the row store,
//! the per-artist index cache, the search engine and the shard workers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Type Aliases
// ============================================================================

/// Opaque request identifier chosen by the caller.
pub type RequestId = String;

// ============================================================================
// Catalog Models
// ============================================================================

/// One distinct artist credit in the catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtistEntry {
    pub artist_credit_id: i64,
    pub name: String,
    pub sort_name: Option<String>, // Only indexed when `name` is not Latin-only
}

/// Raw catalog row as served by the row store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappingRow {
    pub artist_credit_id: i64,
    pub artist_credit_name: String,
    pub artist_credit_sortname: Option<String>,
    pub recording_id: i64,
    pub recording_name: String,
    pub release_id: i64,
    pub release_name: String,
    pub score: i64, // Catalog ordering; lower is more canonical by default
}

// ============================================================================
// Per-artist Index Models
// ============================================================================

/// One underlying row behind a recording group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordingRef {
    pub recording_id: i64,
    pub release_id: i64,
    pub score: i64,
}

/// Distinct normalized recording text for one artist and every row sharing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingGroup {
    pub text: String,
    pub rows: Vec<RecordingRef>,
}

/// Distinct normalized release text for one artist.
/// `releases` holds (release_id, score), one entry per release id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseGroup {
    pub text: String,
    pub releases: Vec<(i64, i64)>,
}

/// Expanded recording-stage candidate: one group hit fanned out to one row.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordingCandidate {
    pub recording_id: i64,
    pub release_id: i64,
    pub score: i64,
    pub confidence: f32,
    pub text: String,
}

/// Expanded release-stage candidate.
#[derive(Clone, Debug, PartialEq)]
pub struct ReleaseCandidate {
    pub release_id: i64,
    pub score: i64,
    pub confidence: f32,
    pub text: String,
}

// ============================================================================
// Request / Response Models
// ============================================================================

/// Search request handed to a shard.
///
/// `artist_ids` are candidate artist credits, best first. When empty, the
/// shard pool fills them from the catalog-wide artist resolver using
/// `artist_name`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub id: RequestId,
    #[serde(default)]
    pub artist_ids: Vec<i64>,
    #[serde(default)]
    pub artist_name: String,
    #[serde(default)]
    pub release_name: Option<String>,
    pub recording_name: String,
}

/// One resolved (release, recording) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub release_id: i64,
    pub recording_id: i64,
    pub confidence: f32,
    pub request_id: RequestId,
}

/// What a shard worker publishes for one request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub request_id: RequestId,
    pub results: Vec<SearchResult>,
    pub rejected: Option<String>, // Set when the request was malformed
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl SearchOutcome {
    pub fn empty(request_id: RequestId) -> Self {
        Self {
            request_id,
            results: Vec::new(),
            rejected: None,
            elapsed: Duration::ZERO,
        }
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

// ============================================================================
// Artist Resolution Models
// ============================================================================

/// Catalog-wide artist hit.
#[derive(Clone, Debug, PartialEq)]
pub struct ArtistMatch {
    pub artist_credit_id: i64,
    pub name: String,
    pub confidence: f32,
}
