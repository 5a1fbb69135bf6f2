use std::sync::Arc;

use flume::{Receiver, Sender};
use log::{info, trace};
use tokio::select;
use tokio_util::sync::CancellationToken;

use super::udp::Datagram;
use crate::base::protocol::parse_points_with_precision;
use crate::base::stats::Statistics;
use crate::base::{unix_nanos, Point};
use crate::config::Precision;

/// Decodes relayed datagrams into points and feeds them to the batcher
pub struct Parser {
    precision: Precision,
    relay_rx: Receiver<Datagram>,
    points_tx: Sender<Point>,
    stats: Arc<Statistics>,
}

impl Parser {
    pub fn new(
        precision: Precision,
        relay_rx: Receiver<Datagram>,
        points_tx: Sender<Point>,
        stats: Arc<Statistics>,
    ) -> Parser {
        Parser { precision, relay_rx, points_tx, stats }
    }

    pub async fn start(self, cancel: CancellationToken) {
        loop {
            select! {
                _ = cancel.cancelled() => break,
                datagram = self.relay_rx.recv_async() => {
                    let Ok(datagram) = datagram else {
                        break;
                    };

                    if !self.parse(datagram, &cancel).await {
                        break;
                    }
                }
            }
        }

        trace!("Parser stopped");
    }

    /// Returns false once points can't be forwarded anymore
    async fn parse(&self, datagram: Datagram, cancel: &CancellationToken) -> bool {
        let received_at = unix_nanos(datagram.received_at);
        let points =
            match parse_points_with_precision(&datagram.payload, received_at, self.precision) {
                Ok(points) => points,
                Err(e) => {
                    self.stats.increment_parse_fail();
                    info!("Failed to parse points. Error = {e}");
                    return true;
                }
            };

        let count = points.len() as u64;
        for point in points {
            select! {
                _ = cancel.cancelled() => return false,
                r = self.points_tx.send_async(point) => if r.is_err() {
                    return false;
                }
            }
        }

        self.stats.add_points_received(count);
        true
    }
}
