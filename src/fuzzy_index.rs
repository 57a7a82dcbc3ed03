//! Trigram TF-IDF fuzzy index.
//!
//! # Algorithm
//!
//! Each indexed text is padded with one space on either side and cut into
//! overlapping 3-character windows. Trigram weights are term frequency times
//! smoothed inverse document frequency, computed over this index's own corpus
//! only, and every vector is L2-normalized. Lookups walk a posting list per
//! query trigram and accumulate dot products, so the similarity of two
//! non-empty vectors lies in [0, 1].
//!
//! Vocabularies are private to one index: ids and scores from two different
//! indexes are not comparable.

use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::config::Backend;
use crate::error::{MappingError, Result};

/// Set once the missing-backend warning has been logged for this process.
static BACKEND_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_backend_unavailable() {
    if !BACKEND_WARNED.swap(true, Ordering::Relaxed) {
        warn!("nearest-neighbor backend unavailable; fuzzy searches will return no matches");
    }
}

/// Report a missing backend to the caller at startup.
pub fn ensure_backend(backend: Backend) -> Result<()> {
    match backend {
        Backend::InvertedIndex => Ok(()),
        Backend::Unavailable => {
            warn_backend_unavailable();
            Err(MappingError::BackendUnavailable)
        }
    }
}

/// Padded character trigrams of an already normalized string.
/// e.g., "war" → [" wa", "war", "ar "]
pub fn ngrams(text: &str) -> Vec<String> {
    let padded: Vec<char> = std::iter::once(' ')
        .chain(text.chars())
        .chain(std::iter::once(' '))
        .collect();
    padded.windows(3).map(|w| w.iter().collect()).collect()
}

/// Sparse vector as (term id, weight), sorted by term id.
type SparseVector = Vec<(u32, f32)>;

fn l2_normalize(vector: &mut SparseVector) {
    let norm = vector.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
    if norm > 0.0 {
        for (_, w) in vector.iter_mut() {
            *w /= norm;
        }
    }
}

// ============================================================================
// Vectorizer
// ============================================================================

struct TfidfVectorizer {
    vocabulary: FxHashMap<String, u32>,
    idf: Vec<f32>,
}

impl TfidfVectorizer {
    /// Learn the vocabulary and idf weights from `docs` and return their vectors.
    fn fit_transform(docs: &[&str]) -> (Self, Vec<SparseVector>) {
        let mut vocabulary: FxHashMap<String, u32> = FxHashMap::default();
        let mut doc_freq: Vec<u32> = Vec::new();
        let mut counts: Vec<FxHashMap<u32, u32>> = Vec::with_capacity(docs.len());

        for doc in docs {
            let mut tf: FxHashMap<u32, u32> = FxHashMap::default();
            for gram in ngrams(doc) {
                let next_id = vocabulary.len() as u32;
                let term = *vocabulary.entry(gram).or_insert(next_id);
                if term as usize == doc_freq.len() {
                    doc_freq.push(0);
                }
                *tf.entry(term).or_insert(0) += 1;
            }
            for term in tf.keys() {
                doc_freq[*term as usize] += 1;
            }
            counts.push(tf);
        }

        let n = docs.len() as f32;
        let idf = doc_freq
            .iter()
            .map(|&df| ((1.0 + n) / (1.0 + df as f32)).ln() + 1.0)
            .collect();

        let vectorizer = TfidfVectorizer { vocabulary, idf };
        let vectors = counts.into_iter().map(|tf| vectorizer.weigh(tf)).collect();
        (vectorizer, vectors)
    }

    /// Vector for a query; trigrams outside the vocabulary are dropped.
    fn transform(&self, text: &str) -> SparseVector {
        let mut tf: FxHashMap<u32, u32> = FxHashMap::default();
        for gram in ngrams(text) {
            if let Some(&term) = self.vocabulary.get(&gram) {
                *tf.entry(term).or_insert(0) += 1;
            }
        }
        self.weigh(tf)
    }

    fn weigh(&self, tf: FxHashMap<u32, u32>) -> SparseVector {
        let mut vector: SparseVector = tf
            .into_iter()
            .map(|(term, count)| (term, count as f32 * self.idf[term as usize]))
            .collect();
        vector.sort_unstable_by_key(|(term, _)| *term);
        l2_normalize(&mut vector);
        vector
    }
}

// ============================================================================
// Index
// ============================================================================

/// One search hit.
#[derive(Clone, Debug, PartialEq)]
pub struct FuzzyMatch<I> {
    pub id: I,
    /// Indexed (normalized) text of the hit.
    pub text: String,
    pub confidence: f32,
}

struct BuiltIndex<I> {
    vectorizer: TfidfVectorizer,
    /// Posting list per term id: (document position, weight).
    postings: Vec<Vec<(u32, f32)>>,
    ids: Vec<I>,
    texts: Vec<String>,
}

/// Searchable set of (normalized text, id) pairs.
///
/// Constructed empty, built once, then queried any number of times. An index
/// that was never built, or whose backend is unavailable, answers every query
/// with no matches.
pub struct FuzzyIndex<I> {
    backend: Backend,
    built: Option<BuiltIndex<I>>,
}

impl<I: Copy> FuzzyIndex<I> {
    pub fn new(backend: Backend) -> Self {
        Self { backend, built: None }
    }

    /// Build from `(normalized text, id)` pairs. Only the first call has any effect.
    pub fn build<T: Into<String>>(&mut self, pairs: impl IntoIterator<Item = (T, I)>) {
        if self.backend == Backend::Unavailable {
            warn_backend_unavailable();
            return;
        }
        if self.built.is_some() {
            debug!("fuzzy index already built; ignoring rebuild");
            return;
        }

        let (texts, ids): (Vec<String>, Vec<I>) =
            pairs.into_iter().map(|(t, id)| (t.into(), id)).unzip();
        let docs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let (vectorizer, vectors) = TfidfVectorizer::fit_transform(&docs);

        let mut postings: Vec<Vec<(u32, f32)>> = vec![Vec::new(); vectorizer.idf.len()];
        for (doc, vector) in vectors.iter().enumerate() {
            for &(term, weight) in vector {
                postings[term as usize].push((doc as u32, weight));
            }
        }

        self.built = Some(BuiltIndex {
            vectorizer,
            postings,
            ids,
            texts,
        });
    }

    /// Up to `k` nearest entries to `query`, best first, keeping those with
    /// `confidence >= min_confidence`. Ties keep build order.
    pub fn search(&self, query: &str, min_confidence: f32, k: usize) -> Vec<FuzzyMatch<I>> {
        if self.backend == Backend::Unavailable {
            warn_backend_unavailable();
            return Vec::new();
        }
        let built = match &self.built {
            Some(built) if !built.ids.is_empty() => built,
            _ => return Vec::new(),
        };

        let query_vector = built.vectorizer.transform(query);
        if query_vector.is_empty() {
            return Vec::new();
        }

        let mut scores: FxHashMap<u32, f32> = FxHashMap::default();
        for (term, query_weight) in query_vector {
            for &(doc, weight) in &built.postings[term as usize] {
                *scores.entry(doc).or_insert(0.0) += query_weight * weight;
            }
        }

        let mut ranked: Vec<(u32, f32)> = scores.into_iter().collect();
        ranked.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);

        ranked
            .into_iter()
            .map(|(doc, similarity)| FuzzyMatch {
                id: built.ids[doc as usize],
                text: built.texts[doc as usize].clone(),
                confidence: similarity.abs(),
            })
            .filter(|m| m.confidence >= min_confidence)
            .collect()
    }

    /// Number of indexed entries (0 when unbuilt).
    pub fn len(&self) -> usize {
        self.built.as_ref().map_or(0, |b| b.ids.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::encode;

    fn index_of(texts: &[&str]) -> FuzzyIndex<usize> {
        let mut index = FuzzyIndex::new(Backend::InvertedIndex);
        index.build(texts.iter().enumerate().map(|(i, t)| (encode(t), i)));
        index
    }

    #[test]
    fn test_ngrams_padding() {
        assert_eq!(ngrams("war"), vec![" wa", "war", "ar "]);
        assert_eq!(ngrams("a"), vec![" a "]);
        assert!(ngrams("").is_empty());
    }

    #[test]
    fn test_exact_text_is_best_match() {
        let names = [
            "Let It Be",
            "Let It Bleed",
            "Hey Jude",
            "Yesterday",
            "Help!",
            "Here Comes the Sun",
            "Something",
            "Come Together",
        ];
        let index = index_of(&names);
        for (id, name) in names.iter().enumerate() {
            let hits = index.search(&encode(name), 0.0, 3);
            assert!(!hits.is_empty(), "no hits for {}", name);
            let own = hits.iter().find(|h| h.id == id).expect("self not in top-k");
            for other in &hits {
                assert!(own.confidence >= other.confidence);
            }
            assert!((own.confidence - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_partial_overlap_confidence() {
        let index = index_of(&["Let It Be"]);
        let hits = index.search(&encode("lemme be"), 0.0, 3);
        assert_eq!(hits.len(), 1);
        // Two shared trigrams out of seven: 2 / sqrt(7 * 2)
        assert!((hits[0].confidence - 0.5345).abs() < 1e-3);
        assert_eq!(hits[0].text, "letitbe");
    }

    #[test]
    fn test_no_shared_trigrams() {
        let index = index_of(&["war"]);
        assert!(index.search("xyz123", 0.0, 3).is_empty());
    }

    #[test]
    fn test_min_confidence_and_k() {
        let index = index_of(&["abcdef", "abcxyz", "abcdeg", "qqq"]);
        let all = index.search("abcdef", 0.0, 10);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, 0);
        assert!(all.windows(2).all(|w| w[0].confidence >= w[1].confidence));

        let top = index.search("abcdef", 0.0, 1);
        assert_eq!(top.len(), 1);

        let strict = index.search("abcdef", 0.99, 10);
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].id, 0);
    }

    #[test]
    fn test_unbuilt_and_empty_indexes() {
        let unbuilt: FuzzyIndex<i64> = FuzzyIndex::new(Backend::InvertedIndex);
        assert!(unbuilt.search("anything", 0.0, 3).is_empty());
        assert!(!unbuilt.is_built());

        let mut empty: FuzzyIndex<i64> = FuzzyIndex::new(Backend::InvertedIndex);
        empty.build(Vec::<(String, i64)>::new());
        assert!(empty.is_built());
        assert!(empty.is_empty());
        assert!(empty.search("anything", 0.0, 3).is_empty());
    }

    #[test]
    fn test_unavailable_backend_returns_nothing() {
        let mut index: FuzzyIndex<i64> = FuzzyIndex::new(Backend::Unavailable);
        index.build(vec![("letitbe".to_string(), 1)]);
        assert!(!index.is_built());
        assert!(index.search("letitbe", 0.0, 3).is_empty());
        assert!(matches!(
            ensure_backend(Backend::Unavailable),
            Err(MappingError::BackendUnavailable)
        ));
        assert!(ensure_backend(Backend::InvertedIndex).is_ok());
    }

    #[test]
    fn test_rebuild_is_ignored() {
        let mut index = FuzzyIndex::new(Backend::InvertedIndex);
        index.build(vec![("war".to_string(), 1i64)]);
        index.build(vec![("peace".to_string(), 2i64)]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.search("war", 0.5, 3)[0].id, 1);
    }
}
