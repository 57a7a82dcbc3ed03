//! Fuzzy lookup of catalog ids from noisy (artist, release, recording) names.

pub mod artist;
pub mod artist_cache;
pub mod bulk;
pub mod config;
pub mod error;
pub mod fuzzy_index;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod row_store;
pub mod search;
pub mod shard;
pub mod worker;

pub use artist::ArtistResolver;
pub use artist_cache::{ArtistIndexCache, ArtistIndexes, CacheStats};
pub use bulk::{BulkIndex, BulkIndexBuilder, BulkMatch};
pub use config::{Backend, ScoreOrder, SearchConfig};
pub use error::{MappingError, Result};
pub use fuzzy_index::{FuzzyIndex, FuzzyMatch};
pub use models::{ArtistEntry, MappingRow, SearchOutcome, SearchRequest, SearchResult};
pub use row_store::{MemoryRowStore, RowStore, SqliteRowStore};
pub use search::{SearchEngine, SearchProgress};
pub use shard::{plan_shards, ShardAssignment};
pub use worker::{
    ResultStore, SearchJob, ShardMessage, ShardPool, ShardWorker, WorkerReport, WorkerState,
};
