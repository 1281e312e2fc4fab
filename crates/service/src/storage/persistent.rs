use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures_util::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{sync::Mutex as AsyncMutex, task::JoinHandle};
use tracing::{debug, error, warn};

use crate::errors::{StoreError, UpdateError};
use crate::storage::{
    codec::JsonCodec, file_store::FileStore, metrics::StoreMetrics, queue::{Ticket, UpdateQueue},
};

/// Bounds every stored document type has to meet.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Document for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Handle onto one named, JSON-backed document.
///
/// Reads and writes go through a FIFO queue per key, so concurrent
/// read-modify-write cycles never interleave or lose updates. Writes land in
/// memory first and reach the backing store after a short debounce; call
/// [`PersistentJson::flush_now`] (or drain the registry) to force them out.
///
/// Handles are cheap to clone and all clones share the same entry.
///
/// ```
/// use std::sync::Arc;
/// use service::storage::{metrics::StoreMetrics, MemoryFileStore, StoreOptions, StoreRegistry};
///
/// let registry = StoreRegistry::with_metrics(
///     Arc::new(MemoryFileStore::new()),
///     StoreOptions::default(),
///     StoreMetrics::unregistered().unwrap(),
/// );
/// let counter = registry.open("counter", 0u64).unwrap();
/// // `update` spawns onto the ambient runtime, so build the future inside it.
/// let next = tokio_test::block_on(async {
///     counter
///         .update(|n| -> Result<u64, ()> {
///             *n += 1;
///             Ok(*n)
///         })
///         .await
/// })
/// .unwrap();
/// assert_eq!(next, 1);
/// ```
pub struct PersistentJson<T> {
    pub(crate) entry: Arc<Entry<T>>,
}

impl<T> Clone for PersistentJson<T> {
    fn clone(&self) -> Self {
        Self { entry: Arc::clone(&self.entry) }
    }
}

pub(crate) struct Entry<T> {
    key: String,
    default: T,
    backend: Arc<dyn FileStore>,
    codec: JsonCodec,
    metrics: StoreMetrics,
    debounce: Duration,
    queue: UpdateQueue,
    state: AsyncMutex<EntryState<T>>,
    schedule: Mutex<FlushSchedule>,
    write_lock: AsyncMutex<()>,
}

struct EntryState<T> {
    cached: Option<T>,
    version: u64,
    persisted_version: u64,
}

#[derive(Default)]
struct FlushSchedule {
    timer: Option<JoinHandle<()>>,
    closed: bool,
}

#[derive(Clone)]
pub(crate) struct EntryOptions {
    pub codec: JsonCodec,
    pub metrics: StoreMetrics,
    pub debounce: Duration,
}

impl<T: Document> Entry<T> {
    pub(crate) fn new(key: &str, default: T, backend: Arc<dyn FileStore>, opts: EntryOptions) -> Self {
        Self {
            key: key.to_string(),
            default,
            backend,
            codec: opts.codec,
            metrics: opts.metrics,
            debounce: opts.debounce,
            queue: UpdateQueue::new(),
            state: AsyncMutex::new(EntryState { cached: None, version: 0, persisted_version: 0 }),
            schedule: Mutex::new(FlushSchedule::default()),
            write_lock: AsyncMutex::new(()),
        }
    }

    /// Materialize the cached value on first touch. Only called by the turn holder.
    async fn loaded<'a>(&self, state: &'a mut EntryState<T>) -> Result<&'a mut T, StoreError> {
        let value = match state.cached.take() {
            Some(value) => value,
            None => self.load().await?,
        };
        Ok(state.cached.insert(value))
    }

    async fn load(&self) -> Result<T, StoreError> {
        let Some(bytes) = self.backend.load(&self.key).await? else {
            debug!(key = %self.key, "no durable record, using default");
            return Ok(self.default.clone());
        };
        match self.codec.decode::<T>(&bytes) {
            Ok(value) => Ok(value),
            Err(e) => {
                error!(key = %self.key, error = %e, "stored record is corrupt, falling back to default");
                self.metrics.corrupt_loads.with_label_values(&[self.key.as_str()]).inc();
                if let Err(qe) = self.backend.quarantine(&self.key, &bytes).await {
                    warn!(key = %self.key, error = %qe, "could not keep a copy of the corrupt record");
                }
                Ok(self.default.clone())
            }
        }
    }

    fn mark_dirty(&self, state: &mut EntryState<T>) {
        state.version += 1;
        self.metrics.mutations.with_label_values(&[self.key.as_str()]).inc();
    }

    fn schedule_flush(self: &Arc<Self>) {
        let mut schedule = self.schedule.lock().unwrap_or_else(PoisonError::into_inner);
        if schedule.closed || schedule.timer.is_some() {
            return;
        }
        let entry = Arc::clone(self);
        schedule.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(entry.debounce).await;
            // disarm first so mutations landing mid-flush start the next cycle
            entry.schedule.lock().unwrap_or_else(PoisonError::into_inner).timer = None;
            if let Err(e) = entry.flush_once().await {
                warn!(key = %entry.key, error = %e, "debounced flush failed, will retry");
                entry.schedule_flush();
            }
        }));
    }

    fn cancel_timer(&self, close: bool) {
        let mut schedule = self.schedule.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = schedule.timer.take() {
            timer.abort();
        }
        schedule.closed |= close;
    }

    /// Write the cached value if it diverged from the last durable write.
    async fn flush_once(&self) -> Result<(), StoreError> {
        let _write = self.write_lock.lock().await;
        let (bytes, version) = {
            let state = self.state.lock().await;
            if state.version == state.persisted_version {
                return Ok(());
            }
            let Some(value) = state.cached.as_ref() else {
                return Ok(());
            };
            let bytes = self.codec.encode(value).map_err(|source| {
                self.metrics.flush_failures.with_label_values(&[self.key.as_str()]).inc();
                StoreError::Encode { key: self.key.clone(), source }
            })?;
            (bytes, state.version)
        };

        if let Err(e) = self.backend.replace(&self.key, &bytes).await {
            self.metrics.flush_failures.with_label_values(&[self.key.as_str()]).inc();
            return Err(e);
        }
        self.state.lock().await.persisted_version = version;
        self.metrics.flushes.with_label_values(&[self.key.as_str()]).inc();
        debug!(key = %self.key, version, "flushed");
        Ok(())
    }
}

impl<T: Document> PersistentJson<T> {
    pub(crate) fn from_entry(entry: Arc<Entry<T>>) -> Self {
        Self { entry }
    }

    pub fn key(&self) -> &str {
        &self.entry.key
    }

    /// Snapshot of the current document.
    ///
    /// Runs as a no-op turn on the queue, so it observes every update enqueued
    /// before it. The result is a copy; changes to it go nowhere.
    pub async fn get(&self) -> Result<T, StoreError> {
        let ticket = self.entry.queue.enqueue();
        let _turn = ticket.wait().await;
        let mut state = self.entry.state.lock().await;
        let value = self.entry.loaded(&mut state).await?;
        Ok(value.clone())
    }

    /// Queue `mutator` against the document.
    ///
    /// The request takes its place in the queue when this is called, and runs
    /// even if the returned future is dropped. The future resolves once the
    /// mutator has been applied in memory; it does not wait for the flush.
    /// Mutators get no rollback: fail before changing anything.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime; the mutation is spawned onto it.
    pub fn update<R, E, F>(&self, mutator: F) -> impl Future<Output = Result<R, UpdateError<E>>> + Send + 'static
    where
        F: FnOnce(&mut T) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
    {
        let ticket = self.entry.queue.enqueue();
        let task = tokio::spawn(run_update(Arc::clone(&self.entry), ticket, mutator));
        let key = self.entry.key.clone();
        async move { task.await.unwrap_or_else(|_| Err(UpdateError::Store(StoreError::Closed(key)))) }
    }

    /// Like [`update`](Self::update), for mutators that await while holding the turn.
    ///
    /// The mutator receives a working copy and hands it back; the copy replaces
    /// the cached document when the mutator returns. If the mutator panics the
    /// document is left untouched.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime; the mutation is spawned onto it.
    pub fn update_async<R, E, F, Fut>(&self, mutator: F) -> impl Future<Output = Result<R, UpdateError<E>>> + Send + 'static
    where
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = (T, Result<R, E>)> + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
    {
        let ticket = self.entry.queue.enqueue();
        let task = tokio::spawn(run_update_async(Arc::clone(&self.entry), ticket, mutator));
        let key = self.entry.key.clone();
        async move { task.await.unwrap_or_else(|_| Err(UpdateError::Store(StoreError::Closed(key)))) }
    }

    /// Wait for every queued mutation, then write immediately, skipping the debounce.
    pub async fn flush_now(&self) -> Result<(), StoreError> {
        let ticket = self.entry.queue.enqueue();
        let _turn = ticket.wait().await;
        self.entry.cancel_timer(false);
        self.entry.flush_once().await
    }

    /// Final flush for process shutdown; no timers are armed afterwards.
    pub(crate) async fn close(&self) -> Result<(), StoreError> {
        let ticket = self.entry.queue.enqueue();
        let _turn = ticket.wait().await;
        self.entry.cancel_timer(true);
        self.entry.flush_once().await
    }

    /// Whether the cached document diverged from the last durable write.
    pub async fn is_dirty(&self) -> bool {
        let state = self.entry.state.lock().await;
        state.version != state.persisted_version
    }
}

async fn run_update<T, R, E, F>(entry: Arc<Entry<T>>, ticket: Ticket, mutator: F) -> Result<R, UpdateError<E>>
where
    T: Document,
    F: FnOnce(&mut T) -> Result<R, E>,
{
    let _turn = ticket.wait().await;
    let outcome = {
        let mut state = entry.state.lock().await;
        let value = entry.loaded(&mut state).await?;
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(move || mutator(value)));
        entry.mark_dirty(&mut state);
        outcome
    };
    entry.schedule_flush();
    match outcome {
        Ok(Ok(r)) => Ok(r),
        Ok(Err(e)) => Err(UpdateError::Rejected(e)),
        Err(_) => {
            error!(key = %entry.key, "mutator panicked");
            Err(UpdateError::Panicked)
        }
    }
}

async fn run_update_async<T, R, E, F, Fut>(entry: Arc<Entry<T>>, ticket: Ticket, mutator: F) -> Result<R, UpdateError<E>>
where
    T: Document,
    F: FnOnce(T) -> Fut,
    Fut: Future<Output = (T, Result<R, E>)>,
{
    let _turn = ticket.wait().await;
    let working = {
        let mut state = entry.state.lock().await;
        entry.loaded(&mut state).await?.clone()
    };
    let Ok((next, result)) = AssertUnwindSafe(async move { mutator(working).await })
        .catch_unwind()
        .await
    else {
        error!(key = %entry.key, "async mutator panicked");
        return Err(UpdateError::Panicked);
    };
    {
        let mut state = entry.state.lock().await;
        state.cached = Some(next);
        entry.mark_dirty(&mut state);
    }
    entry.schedule_flush();
    result.map_err(UpdateError::Rejected)
}
