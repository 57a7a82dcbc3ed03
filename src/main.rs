use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use mapping_lookup::fuzzy_index::ensure_backend;
use mapping_lookup::normalize::encode;
use mapping_lookup::progress::{create_spinner, format_duration, set_log_only};
use mapping_lookup::shard::first_char_histogram;
use mapping_lookup::{
    logging, plan_shards, ArtistResolver, BulkIndexBuilder, MappingError, RowStore, SearchConfig,
    SearchOutcome, SearchRequest, ShardPool, SqliteRowStore,
};

#[derive(Parser)]
#[command(name = "mapping-lookup")]
#[command(about = "Fuzzy lookup of release/recording ids from artist, release and recording names")]
struct Args {
    /// TOML file with search settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Hide progress bars, log progress lines instead
    #[arg(long, global = true)]
    log_only: bool,

    /// Debug logging for this crate (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the configured shard count
    #[arg(long, global = true)]
    shards: Option<usize>,

    /// Build threads (0 = all cores)
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the shard plan for a catalog
    Plan {
        catalog: PathBuf,

        /// Balance first-character buckets of artist names instead of artist ids
        #[arg(long)]
        by_first_char: bool,
    },

    /// Bulk build every artist's recording index and report timings
    Build {
        catalog: PathBuf,

        /// Query the built index with "artist,recording"
        #[arg(long)]
        query: Option<String>,
    },

    /// Resolve one request through a shard pool
    Search {
        catalog: PathBuf,

        #[arg(long)]
        recording: String,

        #[arg(long, default_value = "")]
        artist: String,

        #[arg(long)]
        release: Option<String>,

        /// Candidate artist credit ids, best first (skips artist resolution)
        #[arg(long = "artist-id")]
        artist_ids: Vec<i64>,

        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
    },

    /// JSON-lines requests in, JSON-lines outcomes out
    Batch {
        catalog: PathBuf,

        /// Input file (stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, default_value = "30000")]
        timeout_ms: u64,
    },
}

fn load_config(args: &Args) -> Result<SearchConfig> {
    let mut config = match &args.config {
        Some(path) => SearchConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SearchConfig::default(),
    };
    if let Some(shards) = args.shards {
        config.num_shards = shards;
    }
    if let Some(workers) = args.workers {
        config.bulk_workers = workers;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open_catalog(path: &Path) -> Result<SqliteRowStore> {
    SqliteRowStore::open(path).with_context(|| format!("Failed to open catalog {}", path.display()))
}

fn start_pool(catalog: &Path, config: &SearchConfig) -> Result<ShardPool> {
    let spinner = create_spinner("Planning shards and indexing artists");
    let store = open_catalog(catalog)?;
    let histogram = store.artist_histogram()?;
    let assignment = plan_shards(&histogram, config.num_shards)?;
    let resolver = ArtistResolver::build(&store.artists()?, config);
    spinner.finish_with_message(format!(
        "{} artists over {} shards",
        assignment.len(),
        assignment.num_shards()
    ));
    drop(store);

    let catalog = catalog.to_path_buf();
    let pool = ShardPool::start(Arc::new(assignment), config, Some(Arc::new(resolver)), move |_| {
        Ok(Box::new(SqliteRowStore::open(&catalog)?) as Box<dyn RowStore>)
    })?;
    Ok(pool)
}

fn run_plan(catalog: &Path, by_first_char: bool, config: &SearchConfig) -> Result<()> {
    let store = open_catalog(catalog)?;

    if by_first_char {
        let names: Vec<String> = store.artists()?.iter().map(|a| encode(&a.name)).collect();
        let histogram = first_char_histogram(names.iter().map(String::as_str));
        let plan = plan_shards(&histogram, config.num_shards)?;
        for shard in 0..plan.num_shards() {
            let mut chars = plan.keys_for(shard);
            chars.sort_unstable();
            let chars: String = chars.into_iter().collect();
            println!("{:>3}: {:>10} artists  [{}]", shard, plan.totals()[shard], chars);
        }
        return Ok(());
    }

    let histogram = store.artist_histogram()?;
    let plan = plan_shards(&histogram, config.num_shards)?;
    let total: u64 = plan.totals().iter().sum();
    for shard in 0..plan.num_shards() {
        let rows = plan.totals()[shard];
        println!(
            "{:>3}: {:>12} rows {:>8} artists ({:.1}%)",
            shard,
            rows,
            plan.keys_for(shard).len(),
            if total > 0 { 100.0 * rows as f64 / total as f64 } else { 0.0 }
        );
    }
    Ok(())
}

fn run_build(catalog: &Path, query: Option<&str>, config: &SearchConfig) -> Result<()> {
    let start = Instant::now();
    let rows = open_catalog(catalog)?.all_rows().context("Failed to read catalog rows")?;
    info!(rows = rows.len(), elapsed = %format_duration(start.elapsed()), "catalog loaded");

    let index = BulkIndexBuilder::new(config.clone()).build(rows);

    println!("\n{:=<60}", "");
    println!("Bulk build complete!");
    println!("  Rows: {}", index.stats.rows);
    println!("  Batches: {}", index.stats.batches);
    println!("  Artists: {}", index.stats.artists);
    println!("  Recording indexes: {}", index.stats.indexed_artists);
    println!("  Elapsed: {:.2}s", start.elapsed().as_secs_f64());
    println!("{:=<60}", "");

    if let Some(query) = query {
        let Some((artist, recording)) = query.split_once(',') else {
            bail!("Query must be artist then recording, separated by comma");
        };
        let t0 = Instant::now();
        let matches = index.search(artist, recording);
        let elapsed = t0.elapsed();
        for m in &matches {
            println!(
                "{:<40} {:.3} {:>8} {:<40} {:.3} {:>8}",
                m.artist_name,
                m.artist_confidence,
                m.artist_credit_id,
                m.recording_text,
                m.recording_confidence,
                m.recording_id
            );
        }
        if matches.is_empty() {
            println!("No results found.");
        }
        println!("{}", format_duration(elapsed));
    }
    Ok(())
}

fn run_search(
    catalog: &Path,
    request: SearchRequest,
    timeout: Duration,
    config: &SearchConfig,
) -> Result<()> {
    let pool = start_pool(catalog, config)?;
    let outcome = pool.search(request, timeout)?;
    let reports = pool.shutdown();

    match outcome {
        Some(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
        None => bail!("No outcome within {}", format_duration(timeout)),
    }
    for report in reports {
        info!(
            shard = report.shard,
            processed = report.processed,
            forwarded = report.forwarded,
            cached = report.cache.entries(),
            "shard report"
        );
    }
    Ok(())
}

fn rejected(request_id: String, reason: String) -> SearchOutcome {
    SearchOutcome {
        rejected: Some(reason),
        ..SearchOutcome::empty(request_id)
    }
}

fn run_batch(
    catalog: &Path,
    input: Option<&Path>,
    output: Option<&Path>,
    timeout: Duration,
    config: &SearchConfig,
) -> Result<()> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };

    let pool = start_pool(catalog, config)?;
    let start = Instant::now();

    // Local outcomes for requests that never reached a worker
    let mut pending: Vec<(String, Option<SearchOutcome>)> = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read request line")?;
        if line.trim().is_empty() {
            continue;
        }
        let request: SearchRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                let id = format!("line-{}", line_no + 1);
                pending.push((id.clone(), Some(rejected(id, format!("invalid JSON: {}", e)))));
                continue;
            }
        };
        let id = request.id.clone();
        match pool.submit(request) {
            Ok(_) => pending.push((id, None)),
            Err(e @ MappingError::MalformedRequest(_)) => {
                pending.push((id.clone(), Some(rejected(id, e.to_string()))))
            }
            Err(e) => return Err(e).context("Failed to submit request"),
        }
    }

    let (mut found, mut empty, mut refused, mut timed_out) = (0usize, 0usize, 0usize, 0usize);
    let mut busy = Duration::ZERO;
    for (id, local) in pending {
        let outcome = match local {
            Some(outcome) => outcome,
            None => match pool.results().wait(&id, timeout) {
                Some(outcome) => outcome,
                None => {
                    warn!(request_id = %id, "no outcome before timeout");
                    timed_out += 1;
                    continue;
                }
            },
        };
        if outcome.rejected.is_some() {
            refused += 1;
        } else if outcome.results.is_empty() {
            empty += 1;
        } else {
            found += 1;
        }
        busy += outcome.elapsed;
        serde_json::to_writer(&mut writer, &outcome)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    let reports = pool.shutdown();
    let processed: usize = reports.iter().map(|r| r.processed).sum();
    eprintln!("\n{:=<60}", "");
    eprintln!("Batch complete!");
    eprintln!("  Matched: {}", found);
    eprintln!("  No match: {}", empty);
    eprintln!("  Rejected: {}", refused);
    eprintln!("  Timed out: {}", timed_out);
    if processed > 0 {
        eprintln!("  Mean search time: {}", format_duration(busy / processed as u32));
    }
    eprintln!("  Elapsed: {:.2}s", start.elapsed().as_secs_f64());
    eprintln!("{:=<60}", "");
    for report in reports {
        eprintln!(
            "  shard {:>3}: {:>8} requests, {:>8} artists cached ({} without rows)",
            report.shard,
            report.processed,
            report.cache.entries(),
            report.cache.missing
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);
    set_log_only(args.log_only);

    let config = load_config(&args)?;
    if let Err(e) = ensure_backend(config.backend) {
        warn!("{}", e);
    }

    if let Some(workers) = args.workers.filter(|w| *w > 0) {
        rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    match &args.command {
        Command::Plan { catalog, by_first_char } => run_plan(catalog, *by_first_char, &config),
        Command::Build { catalog, query } => run_build(catalog, query.as_deref(), &config),
        Command::Search {
            catalog,
            recording,
            artist,
            release,
            artist_ids,
            timeout_ms,
        } => {
            let request = SearchRequest {
                id: "cli".to_string(),
                artist_ids: artist_ids.clone(),
                artist_name: artist.clone(),
                release_name: release.clone(),
                recording_name: recording.clone(),
            };
            run_search(catalog, request, Duration::from_millis(*timeout_ms), &config)
        }
        Command::Batch {
            catalog,
            input,
            output,
            timeout_ms,
        } => run_batch(
            catalog,
            input.as_deref(),
            output.as_deref(),
            Duration::from_millis(*timeout_ms),
            &config,
        ),
    }
}
