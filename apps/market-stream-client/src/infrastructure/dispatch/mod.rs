//! Event Dispatch Engine
//!
//! Decouples the stream reader from application handlers. Events go into a
//! bounded queue read by a single dispatcher thread, which fans each event
//! out as one job per registered handler onto a second queue served by a
//! fixed pool of worker threads.
//!
//! # Ordering
//!
//! Events reach the dispatcher in stream order, and the handlers registered
//! for one event type are queued in registration order. Workers run jobs
//! concurrently, so arrival order per handler holds only with a pool size
//! of 1.
//!
//! # Generations
//!
//! Every [`EventDispatcher::start`] bumps a generation counter. Jobs carry the
//! generation they were queued under and workers discard jobs from an older
//! one, so a stop/start cycle never runs leftover work from the previous run.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::application::ports::{EventSink, MappedPayload};
use crate::domain::streaming::{EventType, MarketDataResponse, PayloadFormat};
use crate::infrastructure::metrics;

/// Application callback for one event type.
pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Errors starting the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A dispatcher or worker thread could not be spawned.
    #[error("failed to spawn thread {name}: {message}")]
    SpawnFailed {
        /// Thread name.
        name: String,
        /// OS error message.
        message: String,
    },
}

// =============================================================================
// Event
// =============================================================================

/// An event delivered to handlers.
pub struct Event {
    event_type: EventType,
    raw: Arc<MarketDataResponse>,
    mapped: Option<MappedPayload>,
    received_at: DateTime<Utc>,
}

impl Event {
    /// Event type.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Wire payload.
    #[must_use]
    pub fn raw(&self) -> &MarketDataResponse {
        &self.raw
    }

    /// Mapped payload, present when a handler asked for it and the mapper
    /// produced one.
    #[must_use]
    pub const fn mapped(&self) -> Option<&MappedPayload> {
        self.mapped.as_ref()
    }

    /// Mapped payload downcast to `T`.
    #[must_use]
    pub fn mapped_as<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.mapped.as_deref()?.downcast_ref::<T>()
    }

    /// Time the dispatcher accepted the event.
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("event_type", &self.event_type)
            .field("raw", &self.raw)
            .field("mapped", &self.mapped.is_some())
            .field("received_at", &self.received_at)
            .finish()
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the dispatch engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Number of worker threads.
    pub pool_size: usize,
    /// Capacity of the incoming event queue.
    pub event_queue_capacity: usize,
    /// Capacity of the handler job queue.
    pub job_queue_capacity: usize,
    /// How long `stop` waits for threads to finish.
    pub shutdown_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            event_queue_capacity: 10_000,
            job_queue_capacity: 10_000,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchStats {
    /// Whether the dispatcher is running.
    pub running: bool,
    /// Current generation.
    pub generation: u64,
    /// Worker pool size.
    pub pool_size: usize,
    /// Events accepted.
    pub events_received: u64,
    /// Events dropped because the queue was full or the dispatcher stopped.
    pub events_dropped: u64,
    /// Handler invocations completed.
    pub handlers_invoked: u64,
    /// Handler invocations that returned an error or panicked.
    pub handler_errors: u64,
    /// Jobs discarded for belonging to an older generation.
    pub stale_jobs_discarded: u64,
    /// Mean handler latency in milliseconds.
    pub avg_handler_latency_ms: f64,
    /// Slowest handler latency in milliseconds.
    pub max_handler_latency_ms: f64,
    /// Accepted events per type.
    pub events_by_type: BTreeMap<EventType, u64>,
}

#[derive(Debug, Default)]
struct Counters {
    events_received: AtomicU64,
    events_dropped: AtomicU64,
    handlers_invoked: AtomicU64,
    handler_errors: AtomicU64,
    stale_jobs: AtomicU64,
    total_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
    by_type: Mutex<BTreeMap<EventType, u64>>,
}

// =============================================================================
// Engine
// =============================================================================

struct Registration {
    format: PayloadFormat,
    handler: Handler,
}

struct Job {
    generation: u64,
    event: Arc<Event>,
    handler: Handler,
}

struct Shared {
    handlers: RwLock<HashMap<EventType, Vec<Registration>>>,
    generation: AtomicU64,
    counters: Counters,
}

struct Running {
    generation: u64,
    event_tx: mpsc::Sender<Arc<Event>>,
    threads: Vec<JoinHandle<()>>,
    #[cfg(test)]
    job_tx: mpsc::Sender<Job>,
}

/// Bounded-queue event dispatcher with a fixed worker pool.
pub struct EventDispatcher {
    config: DispatchConfig,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

impl EventDispatcher {
    /// Create a stopped dispatcher. A pool size of zero is raised to one.
    #[must_use]
    pub fn new(config: DispatchConfig) -> Self {
        let config = DispatchConfig {
            pool_size: config.pool_size.max(1),
            event_queue_capacity: config.event_queue_capacity.max(1),
            job_queue_capacity: config.job_queue_capacity.max(1),
            ..config
        };
        Self {
            config,
            shared: Arc::new(Shared {
                handlers: RwLock::new(HashMap::new()),
                generation: AtomicU64::new(0),
                counters: Counters::default(),
            }),
            running: Mutex::new(None),
        }
    }

    /// Register a handler for `event_type`.
    ///
    /// Handlers for the same type run in registration order per event.
    pub fn on<F>(&self, event_type: EventType, format: PayloadFormat, handler: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared
            .handlers
            .write()
            .entry(event_type)
            .or_default()
            .push(Registration {
                format,
                handler: Arc::new(handler),
            });
    }

    /// Check whether the dispatcher is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Start the dispatcher and its workers under a new generation.
    ///
    /// Does nothing if already running.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::SpawnFailed`] if a thread cannot be spawned.
    pub fn start(&self) -> Result<(), DispatchError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (event_tx, event_rx) = mpsc::channel::<Arc<Event>>(self.config.event_queue_capacity);
        let (job_tx, job_rx) = mpsc::channel::<Job>(self.config.job_queue_capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut threads = Vec::with_capacity(self.config.pool_size + 1);
        for index in 0..self.config.pool_size {
            let name = format!("market-stream-worker-{index}");
            let shared = Arc::clone(&self.shared);
            let job_rx = Arc::clone(&job_rx);
            threads.push(spawn(name, move || worker_loop(&shared, &job_rx))?);
        }

        let shared = Arc::clone(&self.shared);
        #[cfg(test)]
        let injected_tx = job_tx.clone();
        threads.push(spawn("market-stream-dispatcher".to_string(), move || {
            dispatcher_loop(&shared, generation, event_rx, &job_tx);
        })?);

        *running = Some(Running {
            generation,
            event_tx,
            threads,
            #[cfg(test)]
            job_tx: injected_tx,
        });
        drop(running);

        tracing::info!(
            generation,
            pool_size = self.config.pool_size,
            "Event dispatcher started"
        );
        Ok(())
    }

    /// Stop the dispatcher.
    ///
    /// Closes the event queue so the dispatcher and workers drain what is
    /// already queued, then waits up to the shutdown timeout for the threads
    /// to exit. Threads still busy after the timeout are left to finish on
    /// their own. Calling `stop` on a stopped dispatcher does nothing.
    pub async fn stop(&self) {
        let Some(mut running) = self.running.lock().take() else {
            return;
        };
        let generation = running.generation;
        let threads = std::mem::take(&mut running.threads);
        drop(running);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        while threads.iter().any(|t| !t.is_finished()) {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    generation,
                    timeout_ms = u64::try_from(self.config.shutdown_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                    "Dispatcher threads did not finish before timeout"
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for thread in threads {
            if thread.join().is_err() {
                tracing::error!(generation, "Dispatcher thread panicked");
            }
        }
        tracing::info!(generation, "Event dispatcher stopped");
    }

    /// Snapshot of dispatcher counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        let counters = &self.shared.counters;
        let handlers_invoked = counters.handlers_invoked.load(Ordering::Relaxed);
        let total_us = counters.total_latency_us.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let avg_handler_latency_ms = if handlers_invoked == 0 {
            0.0
        } else {
            total_us as f64 / handlers_invoked as f64 / 1000.0
        };
        #[allow(clippy::cast_precision_loss)]
        let max_handler_latency_ms =
            counters.max_latency_us.load(Ordering::Relaxed) as f64 / 1000.0;

        DispatchStats {
            running: self.is_running(),
            generation: self.generation(),
            pool_size: self.config.pool_size,
            events_received: counters.events_received.load(Ordering::Relaxed),
            events_dropped: counters.events_dropped.load(Ordering::Relaxed),
            handlers_invoked,
            handler_errors: counters.handler_errors.load(Ordering::Relaxed),
            stale_jobs_discarded: counters.stale_jobs.load(Ordering::Relaxed),
            avg_handler_latency_ms,
            max_handler_latency_ms,
            events_by_type: counters.by_type.lock().clone(),
        }
    }

    fn record_drop(&self, event_type: EventType) {
        self.shared
            .counters
            .events_dropped
            .fetch_add(1, Ordering::Relaxed);
        metrics::record_event_dropped(event_type);
    }

    #[cfg(test)]
    fn inject_job(&self, generation: u64, event: Arc<Event>, handler: Handler) {
        let running = self.running.lock();
        let tx = &running.as_ref().unwrap().job_tx;
        tx.try_send(Job {
            generation,
            event,
            handler,
        })
        .unwrap_or_else(|_| panic!("job queue full"));
    }
}

impl EventSink for EventDispatcher {
    fn needs_mapped_payload(&self, event_type: EventType) -> bool {
        self.shared
            .handlers
            .read()
            .get(&event_type)
            .is_some_and(|regs| regs.iter().any(|r| r.format == PayloadFormat::Mapped))
    }

    fn emit(
        &self,
        event_type: EventType,
        raw: Arc<MarketDataResponse>,
        mapped: Option<MappedPayload>,
    ) -> bool {
        let event = Arc::new(Event {
            event_type,
            raw,
            mapped,
            received_at: Utc::now(),
        });

        let result = {
            let running = self.running.lock();
            match running.as_ref() {
                Some(running) => running.event_tx.try_send(event),
                None => Err(TrySendError::Closed(event)),
            }
        };

        match result {
            Ok(()) => {
                let counters = &self.shared.counters;
                counters.events_received.fetch_add(1, Ordering::Relaxed);
                *counters.by_type.lock().entry(event_type).or_default() += 1;
                metrics::record_event_received(event_type);
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(event_type = %event_type, "Event queue full, dropping event");
                self.record_drop(event_type);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(event_type = %event_type, "Dispatcher not running, dropping event");
                self.record_drop(event_type);
                false
            }
        }
    }
}

fn spawn<F>(name: String, f: F) -> Result<JoinHandle<()>, DispatchError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|e| DispatchError::SpawnFailed {
            name,
            message: e.to_string(),
        })
}

fn dispatcher_loop(
    shared: &Shared,
    generation: u64,
    mut event_rx: mpsc::Receiver<Arc<Event>>,
    job_tx: &mpsc::Sender<Job>,
) {
    while let Some(event) = event_rx.blocking_recv() {
        let handlers: Vec<Handler> = shared
            .handlers
            .read()
            .get(&event.event_type)
            .map(|regs| regs.iter().map(|r| Arc::clone(&r.handler)).collect())
            .unwrap_or_default();

        for handler in handlers {
            let job = Job {
                generation,
                event: Arc::clone(&event),
                handler,
            };
            if job_tx.blocking_send(job).is_err() {
                tracing::debug!(generation, "Job queue closed, dispatcher exiting");
                return;
            }
        }
    }
    tracing::debug!(generation, "Event queue closed, dispatcher exiting");
}

fn worker_loop(shared: &Shared, job_rx: &Mutex<mpsc::Receiver<Job>>) {
    loop {
        let Some(job) = job_rx.lock().blocking_recv() else {
            break;
        };

        if job.generation != shared.generation.load(Ordering::SeqCst) {
            shared.counters.stale_jobs.fetch_add(1, Ordering::Relaxed);
            metrics::record_stale_job();
            continue;
        }

        execute(shared, &job);
    }
}

fn execute(shared: &Shared, job: &Job) {
    let event_type = job.event.event_type;
    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| (job.handler)(&job.event)));
    let elapsed = started.elapsed();
    let latency_ms = elapsed.as_secs_f64() * 1000.0;

    let failed = match outcome {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            tracing::warn!(
                event_type = %event_type,
                latency_ms,
                error = %e,
                "Event handler failed"
            );
            true
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(
                event_type = %event_type,
                latency_ms,
                error = %message,
                "Event handler panicked"
            );
            true
        }
    };

    let counters = &shared.counters;
    counters.handlers_invoked.fetch_add(1, Ordering::Relaxed);
    if failed {
        counters.handler_errors.fetch_add(1, Ordering::Relaxed);
    }
    let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
    counters.total_latency_us.fetch_add(micros, Ordering::Relaxed);
    counters.max_latency_us.fetch_max(micros, Ordering::Relaxed);
    metrics::record_handler(event_type, elapsed, failed);
}
