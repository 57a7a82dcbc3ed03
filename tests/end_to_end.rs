use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mapping_lookup::{
    plan_shards, ArtistResolver, MappingRow, MemoryRowStore, RowStore, SearchConfig, SearchEngine,
    SearchRequest, ShardPool, SqliteRowStore,
};
use rusqlite::{params, Connection};

const WAIT: Duration = Duration::from_secs(10);

fn row(
    artist: i64,
    name: &str,
    recording: (i64, &str),
    release: (i64, &str),
    score: i64,
) -> MappingRow {
    MappingRow {
        artist_credit_id: artist,
        artist_credit_name: name.to_string(),
        artist_credit_sortname: None,
        recording_id: recording.0,
        recording_name: recording.1.to_string(),
        release_id: release.0,
        release_name: release.1.to_string(),
        score,
    }
}

fn catalog() -> Vec<MappingRow> {
    vec![
        row(1, "The Beatles", (100, "Let It Be"), (1000, "Let It Be"), 1),
        row(2, "Edwin Starr", (200, "War"), (2000, "War & Peace"), 1),
        row(3, "Numbers Band", (300, "XYZ 123"), (3000, "Digits"), 1),
        row(4, "Jay Sean", (400, "Yesterday"), (4000, "Tomorrow"), 3),
        row(4, "Jay Sean", (401, "Yesterday"), (4001, "All or Nothing"), 1),
        row(4, "Jay Sean", (402, "Yesterday"), (4002, "Me Against Myself"), 2),
        row(4, "Jay Sean", (403, "Yesterday"), (4003, "Neon"), 4),
        row(4, "Jay Sean", (404, "Ride It"), (4000, "Tomorrow"), 1),
    ]
}

fn request(
    id: &str,
    artist_ids: &[i64],
    artist: &str,
    release: Option<&str>,
    recording: &str,
) -> SearchRequest {
    SearchRequest {
        id: id.to_string(),
        artist_ids: artist_ids.to_vec(),
        artist_name: artist.to_string(),
        release_name: release.map(str::to_string),
        recording_name: recording.to_string(),
    }
}

fn engine() -> SearchEngine {
    SearchEngine::new(Box::new(MemoryRowStore::new(catalog())), SearchConfig::default())
}

fn memory_pool(shards: usize) -> ShardPool {
    let store = MemoryRowStore::new(catalog());
    let config = SearchConfig {
        num_shards: shards,
        ..SearchConfig::default()
    };
    let assignment = Arc::new(plan_shards(&store.artist_histogram().unwrap(), shards).unwrap());
    let resolver = Arc::new(ArtistResolver::build(&store.artists().unwrap(), &config));
    ShardPool::start(assignment, &config, Some(resolver), move |_| {
        Ok(Box::new(store.clone()) as Box<dyn RowStore>)
    })
    .unwrap()
}

#[test]
fn scenario_a_noisy_names_resolve() {
    let pool = memory_pool(2);
    let outcome = pool
        .search(request("a", &[], "beatles", Some("let it be"), "lemme be"), WAIT)
        .unwrap()
        .unwrap();
    assert!(outcome.rejected.is_none());
    assert_eq!(outcome.results.len(), 1);
    let hit = &outcome.results[0];
    assert_eq!(hit.recording_id, 100);
    assert_eq!(hit.release_id, 1000);
    assert_eq!(hit.request_id, "a");
    assert!(hit.confidence > 0.5);
    assert!(hit.confidence <= 1.0);
    pool.shutdown();
}

#[test]
fn scenario_b_no_shared_trigrams() {
    let mut engine = engine();
    assert!(engine
        .search(&request("b1", &[2], "", None, "xyz123"))
        .unwrap()
        .is_empty());

    // Falls through to the next candidate artist
    let results = engine
        .search(&request("b2", &[2, 3], "", None, "xyz123"))
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].recording_id, 300);
}

#[test]
fn scenario_c_recording_only() {
    let mut engine = engine();
    let results = engine
        .search(&request("c", &[4], "Jay Sean", None, "Yesterday"))
        .unwrap();
    assert!(!results.is_empty());
    assert!(results.len() <= 3);
    assert!(results.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    assert!(results.iter().all(|r| r.request_id == "c"));
    // Equal confidence: lowest catalog score first
    assert_eq!(results[0].release_id, 4001);
    assert_eq!(results[1].release_id, 4002);
}

#[test]
fn scenario_d_unknown_artist_is_skipped() {
    let mut engine = engine();
    let results = engine
        .search(&request("d", &[999, 1], "", Some("Let It Be"), "Let It Be"))
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].recording_id, 100);

    let pool = memory_pool(3);
    let outcome = pool
        .search(request("d", &[999, 1], "", Some("Let It Be"), "Let It Be"), WAIT)
        .unwrap()
        .unwrap();
    assert_eq!(outcome.results[0].recording_id, 100);
    pool.shutdown();
}

#[test]
fn repeated_requests_hit_the_cache() {
    let pool = memory_pool(2);
    for i in 0..5 {
        let id = format!("repeat-{}", i);
        let outcome = pool
            .search(request(&id, &[4], "", None, "yesterday"), WAIT)
            .unwrap()
            .unwrap();
        assert_eq!(outcome.request_id, id);
        assert_eq!(outcome.results.len(), 3);
    }
    let reports = pool.shutdown();
    let cached: usize = reports.iter().map(|r| r.cache.built).sum();
    let reads: usize = reports.iter().map(|r| r.cache.store_reads).sum();
    assert_eq!(cached, 1);
    assert_eq!(reads, 1);
}

fn write_catalog(path: &Path, rows: &[MappingRow]) {
    let mut conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE mapping (
            artist_credit_id INTEGER NOT NULL,
            artist_credit_name TEXT NOT NULL,
            artist_credit_sortname TEXT,
            recording_id INTEGER NOT NULL,
            recording_name TEXT NOT NULL,
            release_id INTEGER NOT NULL,
            release_name TEXT NOT NULL,
            score INTEGER NOT NULL
        );
        CREATE INDEX mapping_artist_credit_id ON mapping (artist_credit_id);",
    )
    .unwrap();
    let tx = conn.transaction().unwrap();
    {
        let mut stmt = tx
            .prepare("INSERT INTO mapping VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)")
            .unwrap();
        for r in rows {
            stmt.execute(params![
                r.artist_credit_id,
                r.artist_credit_name,
                r.artist_credit_sortname,
                r.recording_id,
                r.recording_name,
                r.release_id,
                r.release_name,
                r.score,
            ])
            .unwrap();
        }
    }
    tx.commit().unwrap();
}

#[test]
fn sqlite_backed_pool() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mapping.db");
    write_catalog(&path, &catalog());

    let store = SqliteRowStore::open(&path).unwrap();
    let config = SearchConfig::default();
    let assignment = Arc::new(plan_shards(&store.artist_histogram().unwrap(), 2).unwrap());
    let resolver = Arc::new(ArtistResolver::build(&store.artists().unwrap(), &config));
    drop(store);

    let db = path.clone();
    let pool = ShardPool::start(assignment, &config, Some(resolver), move |_| {
        Ok(Box::new(SqliteRowStore::open(&db)?) as Box<dyn RowStore>)
    })
    .unwrap();

    let outcome = pool
        .search(request("sql", &[], "Edwin Starr", Some("war and peace"), "War!"), WAIT)
        .unwrap()
        .unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].recording_id, 200);
    assert_eq!(outcome.results[0].release_id, 2000);
    pool.shutdown();
}
