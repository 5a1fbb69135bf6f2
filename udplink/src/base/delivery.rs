use std::sync::Arc;

use flume::Receiver;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use super::stats::Statistics;
use super::writer::{Catalog, ConsistencyLevel, Error, PointsWriter};
use super::Point;
use crate::config::Config;

/// Drains released batches into the storage backend, one write at a time.
///
/// The database is created lazily before the first write. If that fails the batch
/// at hand is dropped and the next batch tries again. Failed writes are counted and
/// dropped as well, nothing is retried.
pub struct Delivery {
    config: Arc<Config>,
    batches_rx: Receiver<Vec<Point>>,
    writer: Arc<dyn PointsWriter>,
    catalog: Arc<dyn Catalog>,
    stats: Arc<Statistics>,
    /// Has the required database been created?
    ready: bool,
}

impl Delivery {
    pub fn new(
        config: Arc<Config>,
        batches_rx: Receiver<Vec<Point>>,
        writer: Arc<dyn PointsWriter>,
        catalog: Arc<dyn Catalog>,
        stats: Arc<Statistics>,
    ) -> Delivery {
        Delivery { config, batches_rx, writer, catalog, stats, ready: false }
    }

    pub async fn start(mut self, cancel: CancellationToken) {
        loop {
            select! {
                _ = cancel.cancelled() => break,
                batch = self.batches_rx.recv_async() => {
                    let Ok(batch) = batch else {
                        break;
                    };

                    self.deliver(batch).await;
                }
            }
        }

        trace!("Delivery stopped");
    }

    async fn deliver(&mut self, batch: Vec<Point>) {
        let config = self.config.clone();
        let database = &config.database;
        if let Err(e) = self.create_database().await {
            info!("Required database {database} does not yet exist. Error = {e}");
            return;
        }

        let result = self
            .writer
            .write_points_privileged(
                database,
                &config.retention_policy,
                ConsistencyLevel::Any,
                &batch,
            )
            .await;

        match result {
            Ok(()) => self.stats.batch_transmitted(batch.len() as u64),
            Err(e) => {
                info!("Failed to write point batch to database {database}. Error = {e}");
                self.stats.increment_transmit_fail();
            }
        }
    }

    /// Ensures that the required database has been created
    async fn create_database(&mut self) -> Result<(), Error> {
        if self.ready {
            return Ok(());
        }

        self.catalog.create_database(&self.config.database).await?;
        self.ready = true;
        Ok(())
    }
}
