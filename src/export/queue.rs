//! Bounded export queue with a single background consumer
//!
//! - Bounded channel (capacity from config) shared by every producer
//! - Policy on full: block for a bounded time, drop the new job, or evict
//!   the oldest queued job
//! - Consumer batches (size or interval window) and pushes to a [`JobSink`]
//! - Shutdown drains what is left, best effort

use super::job::ExportJob;
use super::loki::JobSink;
use super::Exporter;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::RuntimeFlavor;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// What `enqueue` does when the queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for room, up to the configured block timeout, then drop the job
    ///
    /// On a multi-thread tokio runtime the wait runs under
    /// [`block_in_place`](tokio::task::block_in_place), so other tasks move
    /// to the remaining workers. A current-thread runtime cannot run the
    /// consumer while the producer waits, so there a full queue drops the
    /// job at once. Outside any runtime the calling thread waits.
    #[default]
    Block,
    /// Drop the job being enqueued
    DropNewest,
    /// Evict the oldest queued job to make room
    DropOldest,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub capacity: usize,
    pub policy: BackpressurePolicy,
    pub block_timeout: Duration,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 1000,
            policy: BackpressurePolicy::Block,
            block_timeout: Duration::from_millis(100),
            batch_size: 100,
            flush_interval: Duration::from_millis(500),
        }
    }
}

/// Result of a single enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued after evicting the oldest job
    Displaced,
    Dropped,
}

/// Producer side of the export queue. Cheap to clone.
#[derive(Clone)]
pub struct ExportQueue {
    sender: flume::Sender<ExportJob>,
    // Kept so drop-oldest can evict from the producer side
    evictor: flume::Receiver<ExportJob>,
    policy: BackpressurePolicy,
    block_timeout: Duration,
    dropped: Arc<AtomicU64>,
}

/// Handle on the background consumer task
pub struct ExportWorker {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ExportQueue {
    /// Create the queue and spawn its consumer on the current tokio runtime
    pub fn spawn(sink: Arc<dyn JobSink>, settings: QueueSettings) -> (Self, ExportWorker) {
        let (sender, receiver) = flume::bounded(settings.capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(export_task(
            receiver.clone(),
            sink,
            settings.batch_size.max(1),
            settings.flush_interval,
            shutdown_rx,
        ));

        let queue = Self {
            sender,
            evictor: receiver,
            policy: settings.policy,
            block_timeout: settings.block_timeout,
            dropped: Arc::new(AtomicU64::new(0)),
        };

        (queue, ExportWorker { shutdown_tx, handle })
    }

    pub fn enqueue(&self, job: ExportJob) -> EnqueueOutcome {
        let outcome = match self.policy {
            BackpressurePolicy::Block => self.send_blocking(job),
            BackpressurePolicy::DropNewest => match self.sender.try_send(job) {
                Ok(()) => EnqueueOutcome::Queued,
                Err(_) => EnqueueOutcome::Dropped,
            },
            BackpressurePolicy::DropOldest => match self.sender.try_send(job) {
                Ok(()) => EnqueueOutcome::Queued,
                Err(flume::TrySendError::Full(job)) => {
                    if self.evictor.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    match self.sender.try_send(job) {
                        Ok(()) => EnqueueOutcome::Displaced,
                        Err(_) => EnqueueOutcome::Dropped,
                    }
                }
                Err(flume::TrySendError::Disconnected(_)) => EnqueueOutcome::Dropped,
            },
        };

        if outcome == EnqueueOutcome::Dropped {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                policy = ?self.policy,
                dropped_total = total,
                "Export queue full, dropping log entry"
            );
        }

        outcome
    }

    fn send_blocking(&self, job: ExportJob) -> EnqueueOutcome {
        let sent = match tokio::runtime::Handle::try_current().map(|h| h.runtime_flavor()) {
            Ok(RuntimeFlavor::MultiThread) => {
                tokio::task::block_in_place(|| self.sender.send_timeout(job, self.block_timeout)).is_ok()
            }
            Ok(_) => self.sender.try_send(job).is_ok(),
            Err(_) => self.sender.send_timeout(job, self.block_timeout).is_ok(),
        };

        if sent {
            EnqueueOutcome::Queued
        } else {
            EnqueueOutcome::Dropped
        }
    }

    /// Jobs waiting for the consumer
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    /// Jobs lost to backpressure so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Exporter for ExportQueue {
    fn send(&self, job: ExportJob) {
        self.enqueue(job);
    }
}

impl ExportWorker {
    /// Stop the consumer after it drains and flushes what is queued
    ///
    /// Gives up after `timeout`; anything still queued is lost.
    pub async fn shutdown(self, timeout: Duration) {
        let _ = self.shutdown_tx.send(());
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Export task failed during shutdown"),
            Err(_) => tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Export task did not finish before shutdown timeout"
            ),
        }
    }
}

/// Background consumer
///
/// Batches jobs and pushes them when the batch is full, when the flush
/// interval elapses, or on shutdown.
async fn export_task(
    rx: flume::Receiver<ExportJob>,
    sink: Arc<dyn JobSink>,
    batch_size: usize,
    flush_interval: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut batch: Vec<ExportJob> = Vec::with_capacity(batch_size);

    let mut flush_timer = tokio::time::interval(flush_interval.max(Duration::from_millis(1)));
    flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            received = rx.recv_async() => {
                match received {
                    Ok(job) => {
                        batch.push(job);
                        if batch.len() >= batch_size {
                            flush(sink.as_ref(), &mut batch).await;
                        }
                    }
                    Err(_) => break,
                }
            }

            _ = flush_timer.tick() => {
                if !batch.is_empty() {
                    flush(sink.as_ref(), &mut batch).await;
                }
            }

            _ = &mut shutdown_rx => {
                while let Ok(job) = rx.try_recv() {
                    batch.push(job);
                    if batch.len() >= batch_size {
                        flush(sink.as_ref(), &mut batch).await;
                    }
                }
                break;
            }
        }
    }

    flush(sink.as_ref(), &mut batch).await;
    tracing::info!("Export task shutting down");
}

async fn flush(sink: &dyn JobSink, batch: &mut Vec<ExportJob>) {
    if batch.is_empty() {
        return;
    }

    let count = batch.len();
    let start = std::time::Instant::now();

    match sink.push(batch).await {
        Ok(()) => {
            tracing::debug!(
                count = count,
                duration_ms = start.elapsed().as_millis() as u64,
                "Flushed export batch"
            );
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                count = count,
                "Failed to push export batch"
            );
        }
    }

    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Severity;
    use crate::testing::MemorySink;

    fn job(message: &str) -> ExportJob {
        ExportJob {
            severity: Severity::Info,
            message: message.to_string(),
            trace_id: "t".repeat(32),
            span_id: "s".repeat(16),
            job: "job".to_string(),
            service: "svc".to_string(),
            timestamp_ns: 1,
        }
    }

    fn settings(capacity: usize, policy: BackpressurePolicy) -> QueueSettings {
        QueueSettings {
            capacity,
            policy,
            block_timeout: Duration::from_millis(20),
            batch_size: 10,
            flush_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_jobs_reach_sink_in_order() {
        let sink = Arc::new(MemorySink::new());
        let (queue, worker) = ExportQueue::spawn(sink.clone(), settings(16, BackpressurePolicy::Block));

        for i in 0..5 {
            assert_eq!(queue.enqueue(job(&format!("m{}", i))), EnqueueOutcome::Queued);
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        worker.shutdown(Duration::from_secs(1)).await;

        assert_eq!(sink.messages(), vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_jobs() {
        let sink = Arc::new(MemorySink::new());
        let mut cfg = settings(16, BackpressurePolicy::Block);
        cfg.flush_interval = Duration::from_secs(60);
        let (queue, worker) = ExportQueue::spawn(sink.clone(), cfg);

        queue.enqueue(job("a"));
        queue.enqueue(job("b"));
        worker.shutdown(Duration::from_secs(1)).await;

        assert_eq!(sink.messages(), vec!["a", "b"]);
    }

    // The current-thread runtime cannot run the consumer while the test body
    // holds the thread, so the queue fills deterministically.
    #[tokio::test]
    async fn test_drop_newest_when_full() {
        let sink = Arc::new(MemorySink::new());
        let (queue, worker) = ExportQueue::spawn(sink.clone(), settings(2, BackpressurePolicy::DropNewest));

        assert_eq!(queue.enqueue(job("a")), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(job("b")), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(job("c")), EnqueueOutcome::Dropped);
        assert_eq!(queue.dropped(), 1);

        worker.shutdown(Duration::from_secs(1)).await;
        assert_eq!(sink.messages(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_drop_oldest_when_full() {
        let sink = Arc::new(MemorySink::new());
        let (queue, worker) = ExportQueue::spawn(sink.clone(), settings(2, BackpressurePolicy::DropOldest));

        queue.enqueue(job("a"));
        queue.enqueue(job("b"));
        assert_eq!(queue.enqueue(job("c")), EnqueueOutcome::Displaced);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 2);

        worker.shutdown(Duration::from_secs(1)).await;
        assert_eq!(sink.messages(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_block_on_current_thread_drops_without_waiting() {
        let sink = Arc::new(MemorySink::new());
        let mut cfg = settings(1, BackpressurePolicy::Block);
        cfg.block_timeout = Duration::from_secs(5);
        let (queue, worker) = ExportQueue::spawn(sink.clone(), cfg);

        assert_eq!(queue.enqueue(job("a")), EnqueueOutcome::Queued);

        let start = std::time::Instant::now();
        assert_eq!(queue.enqueue(job("b")), EnqueueOutcome::Dropped);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(queue.dropped(), 1);

        worker.shutdown(Duration::from_secs(1)).await;
        assert_eq!(sink.messages(), vec!["a"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_block_on_multi_thread_waits_for_consumer() {
        let sink = Arc::new(MemorySink::new());
        let mut cfg = settings(1, BackpressurePolicy::Block);
        cfg.block_timeout = Duration::from_secs(5);
        cfg.batch_size = 1;
        let (queue, worker) = ExportQueue::spawn(sink.clone(), cfg);

        for i in 0..5 {
            assert_eq!(queue.enqueue(job(&format!("m{}", i))), EnqueueOutcome::Queued);
        }
        assert_eq!(queue.dropped(), 0);

        worker.shutdown(Duration::from_secs(1)).await;
        assert_eq!(sink.messages(), vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_zero_flush_interval_keeps_consumer_alive() {
        let sink = Arc::new(MemorySink::new());
        let mut cfg = settings(16, BackpressurePolicy::DropNewest);
        cfg.flush_interval = Duration::ZERO;
        let (queue, worker) = ExportQueue::spawn(sink.clone(), cfg);

        for name in ["a", "b", "c"] {
            queue.enqueue(job(name));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.messages(), vec!["a", "b", "c"]);

        worker.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_consumer() {
        let sink = Arc::new(MemorySink::failing_first(1));
        let mut cfg = settings(16, BackpressurePolicy::Block);
        cfg.batch_size = 1;
        let (queue, worker) = ExportQueue::spawn(sink.clone(), cfg);

        queue.enqueue(job("lost"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.enqueue(job("kept"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.shutdown(Duration::from_secs(1)).await;

        assert_eq!(sink.messages(), vec!["kept"]);
        assert_eq!(sink.attempts(), 2);
    }
}
