//  Copyright 2024 Foyer Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! The eviction scheduler (spec §4.4): turns heap-pressure notifications
//! into batched, chunked, worker-pool eviction rounds, and coordinates
//! backpressure against the single `P` gate.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::{
    codec,
    error::BackpressureError,
    handle::Handle,
    metrics::Metrics,
    persistence::PersistencePort,
    table::HandleTable,
};

/// Whether a worker writes a handle's body before clearing it regardless of
/// the dirty bit, or only when dirty (spec §4.4's "Always-write-on-evict vs
/// dirty-only").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionMode {
    /// Always write before clearing. Default; safe when the upstream
    /// cannot reliably mark handles dirty.
    Conservative,
    /// Skip the write when `dirty == false`.
    DirtyOnly,
}

impl Default for EvictionMode {
    fn default() -> Self {
        EvictionMode::Conservative
    }
}

/// Tunables from spec §4.4's configuration table.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub worker_count: usize,
    pub max_backpressure_wait: Option<Duration>,
    pub eviction_mode: EvictionMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100_000,
            worker_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            max_backpressure_wait: None,
            eviction_mode: EvictionMode::Conservative,
        }
    }
}

struct Job {
    handles: Vec<Arc<Handle>>,
    remaining: Arc<AtomicUsize>,
}

struct SchedulerInner {
    table: Arc<HandleTable>,
    persistence: Arc<dyn PersistencePort>,
    metrics: Arc<Metrics>,
    config: SchedulerConfig,
    /// Spec §4.4's `P`: count of eviction rounds currently running. The
    /// protocol never dispatches a second round while one is in flight
    /// (`begin_round`'s `compare_exchange` enforces this), so this is
    /// always observed as 0 or 1 (see DESIGN.md).
    p: AtomicUsize,
    p_notify: Notify,
    closed: std::sync::atomic::AtomicBool,
    job_tx: async_channel::Sender<Job>,
    workers: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// Drives eviction rounds. Cheap to clone (an `Arc` handle to shared
/// scheduler state), matching the rest of this crate's facade types.
#[derive(Clone)]
pub struct EvictionScheduler {
    inner: Arc<SchedulerInner>,
}

impl EvictionScheduler {
    pub fn new(
        table: Arc<HandleTable>,
        persistence: Arc<dyn PersistencePort>,
        metrics: Arc<Metrics>,
        config: SchedulerConfig,
    ) -> Self {
        let worker_count = config.worker_count.max(1);
        let (job_tx, job_rx) = async_channel::unbounded();

        let inner = Arc::new(SchedulerInner {
            table,
            persistence,
            metrics,
            config,
            p: AtomicUsize::new(0),
            p_notify: Notify::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
            job_tx,
            workers: parking_lot::Mutex::new(Vec::new()),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            workers.push(spawn_worker(inner.clone(), job_rx.clone()));
        }
        *inner.workers.lock() = workers;

        Self { inner }
    }

    /// Spec §4.4's pressure-notification callback. Synchronous and
    /// non-blocking: it drains and dispatches, it does not wait for the
    /// round to finish.
    pub fn on_heap_above_threshold(&self) {
        if self.inner.closed.load(Ordering::Acquire) {
            debug!("on_heap_above_threshold called after close(), ignoring");
            return;
        }
        self.begin_round(self.inner.config.batch_size);
    }

    /// Attempt to start a round draining up to `limit` handles. Returns
    /// `true` if a round was actually dispatched.
    fn begin_round(&self, limit: usize) -> bool {
        if self.inner.p.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire).is_err() {
            debug!("eviction round already in flight, dropping notification");
            return false;
        }

        let drained = self.inner.table.drain_up_to(limit);
        if drained.is_empty() {
            self.inner.p.store(0, Ordering::Release);
            self.inner.p_notify.notify_waiters();
            return false;
        }

        let total = drained.len();
        self.inner.metrics.record_round_started(1);
        info!(handles = total, "eviction round started");

        let chunk_size = div_ceil(total, self.inner.config.worker_count.max(1)).max(1);
        let chunks: Vec<Vec<Arc<Handle>>> = drained.chunks(chunk_size).map(<[_]>::to_vec).collect();
        let remaining = Arc::new(AtomicUsize::new(chunks.len()));

        for chunk in chunks {
            self.inner.metrics.record_chunk_dispatched();
            let job = Job {
                handles: chunk,
                remaining: remaining.clone(),
            };
            // Unbounded channel closed only at `close()`, after which no new
            // round can begin (the `closed` check above), so this cannot fail.
            let _ = self.inner.job_tx.try_send(job);
        }

        true
    }

    /// Spec §4.4's `apply_backpressure`: block cooperatively while `P > 0`.
    /// `cancel` resolves to signal the wait should be abandoned; pass
    /// `std::future::pending()` for "never cancel".
    pub async fn apply_backpressure(&self, cancel: impl Future<Output = ()>) -> Result<(), BackpressureError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BackpressureError::Shutdown);
        }

        tokio::pin!(cancel);
        loop {
            if self.inner.p.load(Ordering::Acquire) == 0 {
                return Ok(());
            }

            // Construct the notified() future before re-checking the
            // condition, so a notification that fires between the check
            // above and this await is not lost (tokio::sync::Notify's
            // documented race-safe pattern).
            let notified = self.inner.p_notify.notified();
            tokio::pin!(notified);

            if self.inner.p.load(Ordering::Acquire) == 0 {
                return Ok(());
            }

            match self.inner.config.max_backpressure_wait {
                Some(timeout) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(timeout) => return Err(BackpressureError::TimedOut),
                        _ = &mut cancel => return Err(BackpressureError::Cancelled),
                    }
                }
                None => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = &mut cancel => return Err(BackpressureError::Cancelled),
                    }
                }
            }
        }
    }

    /// Spec §4.4's `drain_all`: block until the handle table is empty,
    /// idempotent and safe against concurrent `on_heap_above_threshold`.
    pub async fn drain_all(&self) -> Result<(), BackpressureError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BackpressureError::Shutdown);
        }

        loop {
            // Wait out any round already in flight (ours or a concurrent
            // `on_heap_above_threshold`'s) before looking at the table.
            self.apply_backpressure(std::future::pending::<()>()).await?;

            if self.inner.table.is_empty() {
                return Ok(());
            }

            self.begin_round(usize::MAX);
            self.apply_backpressure(std::future::pending::<()>()).await?;
        }
    }

    /// Cooperative shutdown: stop accepting new rounds, let in-flight work
    /// finish, then join the worker pool.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.job_tx.close();
        let handles: Vec<_> = self.inner.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub fn rounds_in_flight(&self) -> usize {
        self.inner.p.load(Ordering::Acquire)
    }
}

fn div_ceil(n: usize, d: usize) -> usize {
    (n + d - 1) / d
}

fn spawn_worker(inner: Arc<SchedulerInner>, rx: async_channel::Receiver<Job>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(job) = rx.recv().await {
            process_chunk(&inner, job).await;
        }
    })
}

async fn process_chunk(inner: &Arc<SchedulerInner>, job: Job) {
    for handle in &job.handles {
        if let Err(error) = process_one(inner, handle).await {
            warn!(id = handle.id(), %error, "eviction worker caught error, handle left resident");
        }
    }

    if job.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
        inner.p.store(0, Ordering::Release);
        inner.metrics.record_round_completed(0);
        info!("eviction round completed");
        inner.p_notify.notify_waiters();
    }
}

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error("encode failed: {0}")]
    Encode(#[from] crate::error::CodecError),
    #[error("persist failed: {0}")]
    Persist(#[from] crate::error::PersistenceError),
}

/// Process a single drained handle: encode-and-put per the configured
/// eviction mode, then clear. On any failure the handle is *not* cleared
/// and is re-registered so the next pressure notification retries it
/// (spec §7: "per-handle failures never abort a round").
async fn process_one(inner: &Arc<SchedulerInner>, handle: &Arc<Handle>) -> Result<(), WorkerError> {
    let (body, dirty) = handle.snapshot();

    let Some(body) = body else {
        // Already evicted; nothing to do (spec §4.4's worker body).
        return Ok(());
    };

    let should_write = match inner.config.eviction_mode {
        EvictionMode::Conservative => true,
        EvictionMode::DirtyOnly => dirty,
    };

    if should_write {
        let result: Result<(), WorkerError> = async {
            let bytes = codec::encode(&body)?;
            inner.persistence.put(handle.id(), bytes).await?;
            Ok(())
        }
        .await;

        if let Err(error) = result {
            match &error {
                WorkerError::Encode(_) => inner.metrics.record_unencodable_skip(),
                WorkerError::Persist(_) => inner.metrics.record_persistence_failure(),
            }
            inner.table.register(handle.clone());
            return Err(error);
        }
    }

    handle.clear();
    inner.metrics.record_handle_cleared();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::NodeBody, persistence::InMemoryPort};

    fn scheduler(config: SchedulerConfig, port: Arc<InMemoryPort>) -> (EvictionScheduler, Arc<HandleTable>) {
        let table = Arc::new(HandleTable::new());
        let metrics = Arc::new(Metrics::new());
        let scheduler = EvictionScheduler::new(table.clone(), port, metrics, config);
        (scheduler, table)
    }

    fn registered_handle(table: &HandleTable, id: u64) -> Arc<Handle> {
        let handle = Arc::new(Handle::with_body(id, "T", NodeBody::new(id, "T")));
        table.register(handle.clone());
        handle
    }

    #[test_log::test(tokio::test)]
    async fn empty_table_is_a_no_op() {
        let port = Arc::new(InMemoryPort::new());
        let (scheduler, _table) = scheduler(SchedulerConfig::default(), port.clone());
        scheduler.on_heap_above_threshold();
        scheduler.apply_backpressure(std::future::pending::<()>()).await.unwrap();
        assert_eq!(port.len(), 0);
        scheduler.close().await;
    }

    #[test_log::test(tokio::test)]
    async fn pressure_eviction_drains_batch_and_leaves_remainder() {
        let port = Arc::new(InMemoryPort::new());
        let config = SchedulerConfig {
            batch_size: 100,
            worker_count: 4,
            ..Default::default()
        };
        let (scheduler, table) = scheduler(config, port.clone());

        for id in 0..250u64 {
            registered_handle(&table, id);
        }

        scheduler.on_heap_above_threshold();
        scheduler.apply_backpressure(std::future::pending::<()>()).await.unwrap();

        assert_eq!(port.len(), 100);
        assert_eq!(table.len(), 150);
        scheduler.close().await;
    }

    #[test_log::test(tokio::test)]
    async fn drain_all_empties_the_table() {
        let port = Arc::new(InMemoryPort::new());
        let (scheduler, table) = scheduler(SchedulerConfig::default(), port.clone());
        for id in 0..5u64 {
            registered_handle(&table, id);
        }

        scheduler.drain_all().await.unwrap();

        assert!(table.is_empty());
        assert_eq!(port.len(), 5);
        scheduler.close().await;
    }

    #[test_log::test(tokio::test)]
    async fn error_isolation_keeps_failing_handle_resident() {
        let port = Arc::new(InMemoryPort::new());
        port.fail_put(3);
        let (scheduler, table) = scheduler(SchedulerConfig::default(), port.clone());
        for id in 0..10u64 {
            registered_handle(&table, id);
        }

        scheduler.on_heap_above_threshold();
        scheduler.apply_backpressure(std::future::pending::<()>()).await.unwrap();

        assert_eq!(port.len(), 9);
        assert_eq!(table.len(), 1);
        assert_eq!(scheduler.rounds_in_flight(), 0);
        scheduler.close().await;
    }

    #[test_log::test(tokio::test)]
    async fn apply_backpressure_respects_cancellation() {
        let port = Arc::new(InMemoryPort::new());
        let (scheduler, table) = scheduler(SchedulerConfig::default(), port);
        // Hold the gate open by claiming it directly, simulating an
        // in-flight round, then cancel the wait immediately.
        scheduler.inner.p.store(1, Ordering::Release);
        let _ = &table;

        let err = scheduler.apply_backpressure(async {}).await.unwrap_err();
        assert_eq!(err, BackpressureError::Cancelled);

        scheduler.inner.p.store(0, Ordering::Release);
        scheduler.close().await;
    }

    #[test_log::test(tokio::test)]
    async fn dirty_only_mode_skips_clean_handles() {
        let port = Arc::new(InMemoryPort::new());
        let config = SchedulerConfig {
            eviction_mode: EvictionMode::DirtyOnly,
            ..Default::default()
        };
        let (scheduler, table) = scheduler(config, port.clone());

        let handle = Arc::new(Handle::new(1, "T"));
        handle.set_body_clean(NodeBody::new(1, "T"));
        table.register(handle.clone());

        scheduler.on_heap_above_threshold();
        scheduler.apply_backpressure(std::future::pending::<()>()).await.unwrap();

        assert!(!handle.is_set());
        scheduler.close().await;
    }

    /// A `PersistencePort` whose `put` blocks until [`Self::release`] is
    /// called, so a test can hold a round in flight deterministically.
    struct GatedPort {
        inner: InMemoryPort,
        gate: tokio::sync::Notify,
        released: std::sync::atomic::AtomicBool,
    }

    impl GatedPort {
        fn new() -> Self {
            Self {
                inner: InMemoryPort::new(),
                gate: tokio::sync::Notify::new(),
                released: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn release(&self) {
            self.released.store(true, Ordering::Release);
            self.gate.notify_waiters();
        }
    }

    #[async_trait::async_trait]
    impl PersistencePort for GatedPort {
        async fn put(&self, id: u64, bytes: Vec<u8>) -> Result<(), crate::error::PersistenceError> {
            while !self.released.load(Ordering::Acquire) {
                self.gate.notified().await;
            }
            self.inner.put(id, bytes).await
        }

        async fn get(&self, id: u64) -> Result<Option<Vec<u8>>, crate::error::PersistenceError> {
            self.inner.get(id).await
        }

        async fn delete(&self, id: u64) -> Result<(), crate::error::PersistenceError> {
            self.inner.delete(id).await
        }
    }

    #[test_log::test(tokio::test)]
    async fn second_dispatch_while_round_in_flight_is_dropped() {
        let port = Arc::new(GatedPort::new());
        let config = SchedulerConfig {
            batch_size: 4,
            worker_count: 1,
            ..Default::default()
        };
        let table = Arc::new(HandleTable::new());
        let metrics = Arc::new(Metrics::new());
        let scheduler = EvictionScheduler::new(table.clone(), port.clone(), metrics, config);

        for id in 0..4u64 {
            registered_handle(&table, id);
        }

        // First round dispatches and blocks every worker inside `put`.
        scheduler.on_heap_above_threshold();
        assert_eq!(scheduler.rounds_in_flight(), 1);

        // A second notification while P > 0 must be a no-op: no new round,
        // no handles drained beyond the first batch.
        scheduler.on_heap_above_threshold();
        assert_eq!(scheduler.rounds_in_flight(), 1);
        assert_eq!(table.len(), 0);

        port.release();
        scheduler.apply_backpressure(std::future::pending::<()>()).await.unwrap();

        assert_eq!(port.inner.len(), 4);
        scheduler.close().await;
    }
}
