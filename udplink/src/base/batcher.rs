use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::{bounded, Receiver, Sender};
use log::{debug, trace};
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::Point;

#[derive(Debug, Default)]
pub struct BatcherStats {
    batch_total: AtomicU64,
    point_total: AtomicU64,
    size_total: AtomicU64,
    timeout_total: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatcherStatsSnapshot {
    /// Batches released
    pub batch_total: u64,
    /// Points accepted
    pub point_total: u64,
    /// Batches released because they were full
    pub size_total: u64,
    /// Batches released because of the flush timeout
    pub timeout_total: u64,
}

impl BatcherStats {
    pub fn snapshot(&self) -> BatcherStatsSnapshot {
        BatcherStatsSnapshot {
            batch_total: self.batch_total.load(Ordering::Relaxed),
            point_total: self.point_total.load(Ordering::Relaxed),
            size_total: self.size_total.load(Ordering::Relaxed),
            timeout_total: self.timeout_total.load(Ordering::Relaxed),
        }
    }
}

/// Accumulates points and releases them as batches, when `size` points are collected or
/// `timeout` has elapsed since the first point of the current batch, whichever comes first.
///
/// Input buffers up to `pending * size` points and output holds up to `pending` released
/// batches. Once both are full, senders block, which is how a slow consumer of batches pushes
/// back on producers.
pub struct PointBatcher {
    size: usize,
    timeout: Duration,
    in_tx: Sender<Point>,
    in_rx: Receiver<Point>,
    out_tx: Sender<Vec<Point>>,
    out_rx: Receiver<Vec<Point>>,
    flush_tx: Sender<()>,
    flush_rx: Receiver<()>,
    stop: CancellationToken,
    stats: Arc<BatcherStats>,
    handle: Option<JoinHandle<()>>,
}

impl PointBatcher {
    /// A `size` of 0 releases every point as a batch of its own, a zero `timeout`
    /// disables time based flushes.
    pub fn new(size: usize, pending: usize, timeout: Duration) -> PointBatcher {
        let (in_tx, in_rx) = bounded(pending.saturating_mul(size));
        let (out_tx, out_rx) = bounded(pending);
        let (flush_tx, flush_rx) = bounded(1);

        PointBatcher {
            size,
            timeout,
            in_tx,
            in_rx,
            out_tx,
            out_rx,
            flush_tx,
            flush_rx,
            stop: CancellationToken::new(),
            stats: Arc::new(BatcherStats::default()),
            handle: None,
        }
    }

    /// Spawns the batching task. Has to be called before points are sent in,
    /// calling it again is a no-op.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let batch_loop = BatchLoop {
            size: self.size,
            timeout: self.timeout,
            in_rx: self.in_rx.clone(),
            out_tx: self.out_tx.clone(),
            flush_rx: self.flush_rx.clone(),
            stop: self.stop.clone(),
            stats: self.stats.clone(),
            batch: Vec::with_capacity(self.size),
            deadline: None,
        };

        self.handle = Some(tokio::spawn(batch_loop.run()));
    }

    /// Stops the batching task and waits for it to exit. A partial batch is handed
    /// out only if the output has room for it, otherwise it is dropped.
    pub async fn stop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                debug!("Batcher task failed. Error = {e:?}");
            }
        }
    }

    /// Releases the current batch, if any, without waiting for size or timeout
    pub fn flush(&self) {
        // A full channel means a flush is already queued
        let _ = self.flush_tx.try_send(());
    }

    /// Handle to send points into the batcher
    pub fn input(&self) -> Sender<Point> {
        self.in_tx.clone()
    }

    /// Handle to receive released batches
    pub fn output(&self) -> Receiver<Vec<Point>> {
        self.out_rx.clone()
    }

    pub fn stats(&self) -> BatcherStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for PointBatcher {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct BatchLoop {
    size: usize,
    timeout: Duration,
    in_rx: Receiver<Point>,
    out_tx: Sender<Vec<Point>>,
    flush_rx: Receiver<()>,
    stop: CancellationToken,
    stats: Arc<BatcherStats>,
    batch: Vec<Point>,
    deadline: Option<Instant>,
}

impl BatchLoop {
    async fn run(mut self) {
        loop {
            let deadline = self.deadline;
            select! {
                biased;

                _ = self.stop.cancelled() => {
                    self.release_on_stop();
                    break;
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.stats.timeout_total.fetch_add(1, Ordering::Relaxed);
                    if !self.emit().await {
                        break;
                    }
                }
                Ok(()) = self.flush_rx.recv_async() => {
                    if !self.batch.is_empty() && !self.emit().await {
                        break;
                    }
                }
                point = self.in_rx.recv_async() => {
                    let Ok(point) = point else {
                        break;
                    };

                    self.stats.point_total.fetch_add(1, Ordering::Relaxed);
                    if self.batch.is_empty() && !self.timeout.is_zero() {
                        self.deadline = Some(Instant::now() + self.timeout);
                    }

                    self.batch.push(point);
                    if self.batch.len() >= self.size {
                        self.stats.size_total.fetch_add(1, Ordering::Relaxed);
                        if !self.emit().await {
                            break;
                        }
                    }
                }
            }
        }

        trace!("Batcher stopped");
    }

    // Returns batch content, replacing with empty batch in-place
    fn take_batch(&mut self) -> Vec<Point> {
        self.deadline = None;
        mem::replace(&mut self.batch, Vec::with_capacity(self.size))
    }

    /// Hands the current batch out, returns false if the batcher was stopped meanwhile
    async fn emit(&mut self) -> bool {
        let batch = self.take_batch();
        trace!("Releasing batch of {} points", batch.len());

        select! {
            biased;

            _ = self.stop.cancelled() => false,
            r = self.out_tx.send_async(batch) => {
                if r.is_err() {
                    return false;
                }

                self.stats.batch_total.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    fn release_on_stop(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        let batch = self.take_batch();
        let count = batch.len();
        match self.out_tx.try_send(batch) {
            Ok(()) => {
                self.stats.batch_total.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => debug!("Dropping partial batch of {count} points on stop"),
        }
    }
}
