//! Shard workers and the pool that routes requests to them.
//!
//! One worker thread per shard. Each worker owns its [`SearchEngine`] (and so
//! its artist index cache and row-store handle) outright; nothing index-related
//! is shared between threads. Requests arrive on a bounded per-shard channel.
//! A request whose next candidate artist lives on another shard is handed to
//! that shard's worker over an unbounded hand-off channel, and only the worker
//! that finishes the candidate list publishes to the [`ResultStore`].

use crossbeam_channel::{bounded, never, select, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::artist::ArtistResolver;
use crate::artist_cache::CacheStats;
use crate::config::SearchConfig;
use crate::error::{MappingError, Result};
use crate::models::{RequestId, SearchOutcome, SearchRequest};
use crate::row_store::RowStore;
use crate::search::{validate_request, SearchEngine, SearchProgress};
use crate::shard::ShardAssignment;

// ============================================================================
// Messages and state
// ============================================================================

/// A request in flight, plus how far down its candidate list it has got.
#[derive(Debug, Clone)]
pub struct SearchJob {
    pub request: SearchRequest,
    /// Index into `request.artist_ids` of the next candidate to try.
    pub cursor: usize,
    /// Time already spent on other shards.
    pub elapsed: Duration,
}

impl SearchJob {
    pub fn new(request: SearchRequest, cursor: usize) -> Self {
        Self {
            request,
            cursor,
            elapsed: Duration::ZERO,
        }
    }
}

pub enum ShardMessage {
    Search(SearchJob),
    /// Stop after the current request; nothing queued behind it is processed.
    Exit,
}

impl ShardMessage {
    /// A fresh request starting at its first candidate.
    pub fn search(request: SearchRequest) -> Self {
        ShardMessage::Search(SearchJob::new(request, 0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Waiting for the next message.
    Ready,
    /// Running one search.
    Processing,
    /// Received exit; terminal.
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub shard: usize,
    pub processed: usize,
    /// Requests passed on to another shard instead of answered here.
    pub forwarded: usize,
    pub cache: CacheStats,
}

// ============================================================================
// Result store
// ============================================================================

#[derive(Default)]
struct Slots {
    ready: FxHashMap<RequestId, SearchOutcome>,
    /// Ids whose waiter timed out. Their outcome is dropped on arrival.
    abandoned: FxHashSet<RequestId>,
}

/// Outcomes keyed by request id. Each id is written by exactly one worker.
///
/// An outcome stays until it is taken, except when [`ResultStore::wait`]
/// gave up on that id first: a late outcome for it is discarded.
#[derive(Clone, Default)]
pub struct ResultStore {
    inner: Arc<(Mutex<Slots>, Condvar)>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, outcome: SearchOutcome) {
        let (slots, ready) = &*self.inner;
        let mut slots = slots.lock();
        if slots.abandoned.remove(&outcome.request_id) {
            debug!(request_id = %outcome.request_id, "dropping outcome nobody waits for");
            return;
        }
        let request_id = outcome.request_id.clone();
        if slots.ready.insert(request_id, outcome).is_some() {
            warn!("request id published twice, keeping the latest outcome");
        }
        ready.notify_all();
    }

    /// Remove and return an outcome if it is already there.
    pub fn take(&self, request_id: &str) -> Option<SearchOutcome> {
        self.inner.0.lock().ready.remove(request_id)
    }

    /// Block until the outcome for `request_id` is published or `timeout`
    /// passes. On timeout the id is abandoned.
    pub fn wait(&self, request_id: &str, timeout: Duration) -> Option<SearchOutcome> {
        let deadline = Instant::now() + timeout;
        let (slots, ready) = &*self.inner;
        let mut slots = slots.lock();
        loop {
            if let Some(outcome) = slots.ready.remove(request_id) {
                return Some(outcome);
            }
            if ready.wait_until(&mut slots, deadline).timed_out() {
                let late = slots.ready.remove(request_id);
                if late.is_none() {
                    slots.abandoned.insert(request_id.to_string());
                }
                return late;
            }
        }
    }

    /// Outcomes published and not yet taken.
    pub fn len(&self) -> usize {
        self.inner.0.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Worker
// ============================================================================

pub struct ShardWorker {
    shard: usize,
    engine: SearchEngine,
    state: WorkerState,
    processed: usize,
    forwarded: usize,
    /// Hand-off senders indexed by shard. Empty for a standalone worker,
    /// which answers every request itself.
    handoffs: Vec<Sender<SearchJob>>,
}

impl ShardWorker {
    pub fn new(shard: usize, engine: SearchEngine) -> Self {
        Self {
            shard,
            engine,
            state: WorkerState::Ready,
            processed: 0,
            forwarded: 0,
            handoffs: Vec::new(),
        }
    }

    pub fn with_handoffs(mut self, handoffs: Vec<Sender<SearchJob>>) -> Self {
        self.handoffs = handoffs;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Process one message and return the state the worker is left in.
    /// A stopped worker ignores everything.
    pub fn handle(&mut self, message: ShardMessage, results: &ResultStore) -> WorkerState {
        if self.state == WorkerState::Stopped {
            return self.state;
        }

        match message {
            ShardMessage::Exit => {
                info!(
                    shard = self.shard,
                    processed = self.processed,
                    forwarded = self.forwarded,
                    "shard worker stopping"
                );
                self.state = WorkerState::Stopped;
            }
            ShardMessage::Search(job) => {
                self.state = WorkerState::Processing;
                if let Some(outcome) = self.step(job) {
                    debug!(
                        shard = self.shard,
                        request_id = %outcome.request_id,
                        results = outcome.results.len(),
                        elapsed_ms = outcome.elapsed.as_secs_f64() * 1000.0,
                        "request done"
                    );
                    results.publish(outcome);
                }
                self.processed += 1;
                self.state = WorkerState::Ready;
            }
        }
        self.state
    }

    /// Run the shard-local part of a job. `None` when it went to another shard.
    fn step(&mut self, job: SearchJob) -> Option<SearchOutcome> {
        let SearchJob {
            request,
            cursor,
            elapsed,
        } = job;
        let t0 = Instant::now();
        let progress = if self.handoffs.is_empty() {
            self.engine.search(&request).map(SearchProgress::Found)
        } else {
            self.engine.search_from(&request, cursor)
        };

        match progress {
            Ok(SearchProgress::Found(found)) => Some(SearchOutcome {
                request_id: request.id,
                results: found,
                rejected: None,
                elapsed: elapsed + t0.elapsed(),
            }),
            Ok(SearchProgress::Forward { shard, cursor }) => {
                let job = SearchJob {
                    request,
                    cursor,
                    elapsed: elapsed + t0.elapsed(),
                };
                let request_id = job.request.id.clone();
                match self.forward(shard, job) {
                    Ok(()) => {
                        debug!(from = self.shard, to = shard, %request_id, "request handed off");
                        self.forwarded += 1;
                        None
                    }
                    Err(job) => {
                        warn!(shard, %request_id, "hand-off target gone, answering empty");
                        let mut outcome = SearchOutcome::empty(job.request.id);
                        outcome.elapsed = job.elapsed;
                        Some(outcome)
                    }
                }
            }
            Err(e) => {
                warn!(shard = self.shard, request_id = %request.id, error = %e, "request rejected");
                Some(SearchOutcome {
                    request_id: request.id,
                    results: Vec::new(),
                    rejected: Some(e.to_string()),
                    elapsed: elapsed + t0.elapsed(),
                })
            }
        }
    }

    fn forward(&self, shard: usize, job: SearchJob) -> std::result::Result<(), SearchJob> {
        match self.handoffs.get(shard) {
            Some(tx) => tx.send(job).map_err(|e| e.into_inner()),
            None => Err(job),
        }
    }

    /// Serve `rx` until an exit message arrives or every sender is gone.
    pub fn run(self, rx: Receiver<ShardMessage>, results: ResultStore) -> WorkerReport {
        self.run_with_handoff(rx, never(), results)
    }

    /// Like [`ShardWorker::run`], also taking jobs handed over by other shards.
    /// Handed-over jobs go first.
    pub fn run_with_handoff(
        mut self,
        rx: Receiver<ShardMessage>,
        handoff: Receiver<SearchJob>,
        results: ResultStore,
    ) -> WorkerReport {
        info!(shard = self.shard, "shard worker ready");
        let mut handoff_open = true;
        loop {
            let message = match handoff.try_recv() {
                Ok(job) => ShardMessage::Search(job),
                Err(_) if !handoff_open => match rx.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                },
                Err(_) => select! {
                    recv(handoff) -> job => match job {
                        Ok(job) => ShardMessage::Search(job),
                        Err(_) => {
                            handoff_open = false;
                            continue;
                        }
                    },
                    recv(rx) -> message => match message {
                        Ok(message) => message,
                        Err(_) => break,
                    },
                },
            };
            if self.handle(message, &results) == WorkerState::Stopped {
                break;
            }
        }
        self.state = WorkerState::Stopped;
        WorkerReport {
            shard: self.shard,
            processed: self.processed,
            forwarded: self.forwarded,
            cache: self.engine.cache_stats(),
        }
    }
}

// ============================================================================
// Pool
// ============================================================================

/// One worker thread per shard plus request routing.
pub struct ShardPool {
    senders: Vec<Sender<ShardMessage>>,
    handles: Vec<JoinHandle<WorkerReport>>,
    assignment: Arc<ShardAssignment>,
    resolver: Option<Arc<ArtistResolver>>,
    results: ResultStore,
}

impl ShardPool {
    /// Spawn a worker for every shard of `assignment`. `open_store` is called
    /// once per shard so each worker gets its own row-store handle.
    pub fn start<F>(
        assignment: Arc<ShardAssignment>,
        config: &SearchConfig,
        resolver: Option<Arc<ArtistResolver>>,
        open_store: F,
    ) -> Result<Self>
    where
        F: Fn(usize) -> Result<Box<dyn RowStore>>,
    {
        let num_shards = assignment.num_shards();
        let results = ResultStore::new();
        let mut senders = Vec::with_capacity(num_shards);
        let mut handles = Vec::with_capacity(num_shards);

        let (handoff_tx, handoff_rx): (Vec<_>, Vec<_>) =
            (0..num_shards).map(|_| unbounded::<SearchJob>()).unzip();

        for (shard, handoff) in handoff_rx.into_iter().enumerate() {
            let store = open_store(shard)?;
            let engine =
                SearchEngine::new(store, config.clone()).with_shard(shard, assignment.clone());
            let worker = ShardWorker::new(shard, engine).with_handoffs(handoff_tx.clone());
            let (tx, rx) = bounded::<ShardMessage>(config.queue_capacity);
            let results = results.clone();

            handles.push(
                std::thread::Builder::new()
                    .name(format!("shard-{}", shard))
                    .spawn(move || worker.run_with_handoff(rx, handoff, results))?,
            );
            senders.push(tx);
        }

        info!(shards = senders.len(), artists = assignment.len(), "shard pool started");
        Ok(Self {
            senders,
            handles,
            assignment,
            resolver,
            results,
        })
    }

    /// Queue a request on the shard that owns its first assigned candidate
    /// artist and return that shard. Later candidates owned by other shards
    /// are reached by hand-off between workers.
    ///
    /// Requests without candidate ids get them from the artist resolver.
    /// `Ok(None)` means no candidate is assigned anywhere; an empty outcome
    /// has already been published. Malformed requests are rejected here and
    /// never reach a worker.
    pub fn submit(&self, mut request: SearchRequest) -> Result<Option<usize>> {
        validate_request(&request)?;

        if request.artist_ids.is_empty() {
            if let Some(resolver) = &self.resolver {
                request.artist_ids = resolver.resolve_ids(&request.artist_name);
            }
        }

        let Some((cursor, shard)) = request
            .artist_ids
            .iter()
            .enumerate()
            .find_map(|(position, id)| Some((position, self.assignment.shard_for(*id)?)))
        else {
            debug!(request_id = %request.id, "no candidate artist on any shard");
            self.results.publish(SearchOutcome::empty(request.id));
            return Ok(None);
        };

        self.senders[shard]
            .send(ShardMessage::Search(SearchJob::new(request, cursor)))
            .map_err(|_| MappingError::WorkerDisconnected(shard))?;
        Ok(Some(shard))
    }

    /// Submit and wait for the outcome. `Ok(None)` on timeout.
    pub fn search(
        &self,
        request: SearchRequest,
        timeout: Duration,
    ) -> Result<Option<SearchOutcome>> {
        let request_id = request.id.clone();
        self.submit(request)?;
        Ok(self.results.wait(&request_id, timeout))
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn num_shards(&self) -> usize {
        self.senders.len()
    }

    /// Send every worker the exit message and wait for them to finish.
    pub fn shutdown(self) -> Vec<WorkerReport> {
        for (shard, tx) in self.senders.iter().enumerate() {
            if tx.send(ShardMessage::Exit).is_err() {
                warn!(shard, "shard worker already gone");
            }
        }
        drop(self.senders);

        self.handles
            .into_iter()
            .filter_map(|handle| match handle.join() {
                Ok(report) => Some(report),
                Err(_) => {
                    warn!("shard worker panicked");
                    None
                }
            })
            .collect()
    }
}
