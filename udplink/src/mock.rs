//! Collaborators with scripted behaviour, for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use flume::{bounded, Receiver, Sender};

use crate::base::writer::{Catalog, ConsistencyLevel, Error, PointsWriter};
use crate::base::Point;

/// A write as observed by [`MockWriter`]
#[derive(Debug, Clone)]
pub struct Write {
    pub database: String,
    pub retention_policy: String,
    pub consistency: ConsistencyLevel,
    pub points: Vec<Point>,
    /// Whether the write was reported as failed
    pub failed: bool,
}

pub struct MockWriter {
    writes_tx: Sender<Write>,
    failures: AtomicUsize,
    delay: Duration,
}

impl MockWriter {
    /// Writer reporting every attempted write on the returned channel
    pub fn new() -> (MockWriter, Receiver<Write>) {
        let (writes_tx, writes_rx) = bounded(100);
        (MockWriter { writes_tx, failures: AtomicUsize::new(0), delay: Duration::ZERO }, writes_rx)
    }

    /// Fail the next `count` writes
    pub fn fail_next(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    /// Take `delay` to complete every write
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait::async_trait]
impl PointsWriter for MockWriter {
    async fn write_points_privileged(
        &self,
        database: &str,
        retention_policy: &str,
        consistency: ConsistencyLevel,
        points: &[Point],
    ) -> Result<(), Error> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let write = Write {
            database: database.to_owned(),
            retention_policy: retention_policy.to_owned(),
            consistency,
            points: points.to_vec(),
            failed,
        };
        // Nobody listening is fine, observers are optional
        let _ = self.writes_tx.try_send(write);

        if failed {
            return Err(Error::Unavailable("scripted write failure".to_owned()));
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct MockCatalog {
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl MockCatalog {
    pub fn new() -> MockCatalog {
        MockCatalog::default()
    }

    /// Fail the next `count` database creations
    pub fn fail_next(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    /// Number of times database creation was attempted
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Catalog for MockCatalog {
    async fn create_database(&self, name: &str) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
        {
            return Err(Error::Unavailable(format!("scripted failure creating {name}")));
        }

        Ok(())
    }
}
