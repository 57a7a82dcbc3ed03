//! Catalog-wide artist resolution.
//!
//! Turns a free-text artist name into ranked artist credit ids. Two indexes:
//! - the main index over `encode_string` names, plus the sort name as an alias
//!   for credits not written in Latin script,
//! - a symbolic index for credits whose name is nothing but punctuation.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::info;

use crate::config::{Backend, SearchConfig};
use crate::fuzzy_index::FuzzyIndex;
use crate::models::{ArtistEntry, ArtistMatch};
use crate::normalize::{encode, encode_symbolic, is_latin_only};

pub struct ArtistResolver {
    index: FuzzyIndex<i64>,
    symbolic_index: FuzzyIndex<i64>,
    names: FxHashMap<i64, String>,
    min_confidence: f32,
    neighbors: usize,
}

impl ArtistResolver {
    /// Build both artist indexes from the catalog's artist listing.
    pub fn build(entries: &[ArtistEntry], config: &SearchConfig) -> Self {
        let mut texts: Vec<(String, i64)> = Vec::with_capacity(entries.len());
        let mut symbolic: Vec<(String, i64)> = Vec::new();
        let mut names: FxHashMap<i64, String> = FxHashMap::default();
        let mut aliases = 0usize;

        for entry in entries {
            let encoded = encode(&entry.name);
            if encoded.is_empty() {
                let encoded = encode_symbolic(&entry.name);
                if encoded.is_empty() {
                    continue;
                }
                symbolic.push((encoded, entry.artist_credit_id));
            } else {
                texts.push((encoded, entry.artist_credit_id));
                // 幾何学模様 is also findable as "Kikagaku Moyo"
                if !is_latin_only(&entry.name) {
                    let alias = entry
                        .sort_name
                        .as_deref()
                        .map(encode)
                        .filter(|a| !a.is_empty());
                    if let Some(alias) = alias {
                        texts.push((alias, entry.artist_credit_id));
                        aliases += 1;
                    }
                }
            }
            names.insert(entry.artist_credit_id, entry.name.clone());
        }

        info!(
            artists = names.len(),
            aliases,
            symbolic = symbolic.len(),
            "building artist indexes"
        );

        let mut index = FuzzyIndex::new(config.backend);
        index.build(texts);
        let mut symbolic_index = FuzzyIndex::new(config.backend);
        if !symbolic.is_empty() {
            symbolic_index.build(symbolic);
        }

        Self {
            index,
            symbolic_index,
            names,
            min_confidence: config.artist_confidence,
            neighbors: config.neighbors,
        }
    }

    /// Same indexes, different acceptance threshold.
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Distinct candidate artists for `name`, best first.
    ///
    /// Names that normalize to nothing are looked up in the symbolic index.
    /// An artist reached through both its name and its alias is reported once,
    /// at its best rank.
    pub fn resolve(&self, name: &str) -> Vec<ArtistMatch> {
        let encoded = encode(name);
        let hits = if encoded.is_empty() {
            let symbolic = encode_symbolic(name);
            if symbolic.is_empty() {
                return Vec::new();
            }
            self.symbolic_index.search(&symbolic, self.min_confidence, self.neighbors * 2)
        } else {
            self.index.search(&encoded, self.min_confidence, self.neighbors * 2)
        };

        let mut seen: FxHashSet<i64> = FxHashSet::default();
        hits.into_iter()
            .filter(|hit| seen.insert(hit.id))
            .take(self.neighbors)
            .map(|hit| ArtistMatch {
                artist_credit_id: hit.id,
                name: self.names.get(&hit.id).cloned().unwrap_or(hit.text),
                confidence: hit.confidence,
            })
            .collect()
    }

    /// Candidate ids only, as carried in a search request.
    pub fn resolve_ids(&self, name: &str) -> Vec<i64> {
        self.resolve(name).into_iter().map(|m| m.artist_credit_id).collect()
    }

    pub fn name_of(&self, artist_credit_id: i64) -> Option<&str> {
        self.names.get(&artist_credit_id).map(String::as_str)
    }

    /// Number of distinct artists indexed.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn backend(&self) -> Backend {
        self.index.backend()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, name: &str, sort_name: Option<&str>) -> ArtistEntry {
        ArtistEntry {
            artist_credit_id: id,
            name: name.to_string(),
            sort_name: sort_name.map(str::to_string),
        }
    }

    fn resolver() -> ArtistResolver {
        ArtistResolver::build(
            &[
                entry(1, "The Beatles", Some("Beatles, The")),
                entry(2, "Blur", Some("Blur")),
                entry(3, "幾何学模様", Some("Kikagaku Moyo")),
                entry(4, "!!!", Some("!!!")),
                entry(5, "Кино", Some("Kino")),
                entry(6, "   ", None),
            ],
            &SearchConfig::default(),
        )
    }

    #[test]
    fn test_resolves_partial_name() {
        let resolver = resolver();
        let matches = resolver.resolve("beatles");
        assert_eq!(matches[0].artist_credit_id, 1);
        assert_eq!(matches[0].name, "The Beatles");
        assert!(matches[0].confidence > 0.45);
    }

    #[test]
    fn test_sort_name_alias_for_non_latin_names() {
        let resolver = resolver();
        assert_eq!(resolver.resolve_ids("Kikagaku Moyo").first(), Some(&3));
        assert_eq!(resolver.resolve_ids("幾何学模様").first(), Some(&3));
        // Latin names do not get their sort name indexed
        assert!(resolver.resolve("Beatles, The").iter().all(|m| m.confidence < 0.99));
    }

    #[test]
    fn test_alias_and_name_reported_once() {
        let resolver = resolver();
        let matches = resolver.resolve("kino");
        assert_eq!(matches.iter().filter(|m| m.artist_credit_id == 5).count(), 1);
        assert_eq!(matches[0].artist_credit_id, 5);
    }

    #[test]
    fn test_symbolic_names() {
        let resolver = resolver();
        let matches = resolver.resolve("!!!");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].artist_credit_id, 4);
        assert_eq!(resolver.name_of(4), Some("!!!"));
        assert!(resolver.resolve("   ").is_empty());
        assert_eq!(resolver.len(), 5);
    }

    #[test]
    fn test_threshold_filters() {
        let resolver = resolver().with_min_confidence(0.99);
        assert!(resolver.resolve("beatles").is_empty());
        assert_eq!(resolver.resolve_ids("The Beatles"), vec![1]);
    }

    #[test]
    fn test_unavailable_backend() {
        let config = SearchConfig {
            backend: Backend::Unavailable,
            ..SearchConfig::default()
        };
        let resolver = ArtistResolver::build(&[entry(1, "Blur", None)], &config);
        assert!(resolver.resolve("blur").is_empty());
        assert_eq!(resolver.backend(), Backend::Unavailable);
    }
}
