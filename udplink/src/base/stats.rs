use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters of a udp service. Every counter is updated independently, a snapshot
/// is consistent per counter but not across counters.
#[derive(Debug, Default)]
pub struct Statistics {
    points_received: AtomicU64,
    bytes_received: AtomicU64,
    points_parse_fail: AtomicU64,
    read_fail: AtomicU64,
    batches_transmitted: AtomicU64,
    points_transmitted: AtomicU64,
    batches_transmit_fail: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_points_received(&self, count: u64) {
        self.points_received.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_parse_fail(&self) {
        self.points_parse_fail.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_read_fail(&self) {
        self.read_fail.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successfully written batch of `points` points
    #[inline]
    pub fn batch_transmitted(&self, points: u64) {
        self.batches_transmitted.fetch_add(1, Ordering::Relaxed);
        self.points_transmitted.fetch_add(points, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_transmit_fail(&self) {
        self.batches_transmit_fail.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            points_received: self.points_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            points_parse_fail: self.points_parse_fail.load(Ordering::Relaxed),
            read_fail: self.read_fail.load(Ordering::Relaxed),
            batches_transmitted: self.batches_transmitted.load(Ordering::Relaxed),
            points_transmitted: self.points_transmitted.load(Ordering::Relaxed),
            batches_transmit_fail: self.batches_transmit_fail.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    #[serde(rename = "pointsRx")]
    pub points_received: u64,
    #[serde(rename = "bytesRx")]
    pub bytes_received: u64,
    #[serde(rename = "pointsParseFail")]
    pub points_parse_fail: u64,
    #[serde(rename = "readFail")]
    pub read_fail: u64,
    #[serde(rename = "batchesTx")]
    pub batches_transmitted: u64,
    #[serde(rename = "pointsTx")]
    pub points_transmitted: u64,
    #[serde(rename = "batchesTxFail")]
    pub batches_transmit_fail: u64,
}

/// Tagged snapshot handed out for periodic monitoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistic {
    pub name: &'static str,
    pub tags: BTreeMap<String, String>,
    pub values: StatisticsSnapshot,
}
