//! Configuration of a udp listener and of the application running them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds, DurationSecondsWithFrac};

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8089";
pub const DEFAULT_DATABASE: &str = "udp";
pub const DEFAULT_RETENTION_POLICY: &str = "";
pub const DEFAULT_BATCH_SIZE: usize = 5000;
pub const DEFAULT_BATCH_PENDING: usize = 10;
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_READ_BUFFER: usize = 0;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("bind address has to be specified in config")]
    MissingBindAddress,
    #[error("database has to be specified in config")]
    MissingDatabase,
    #[error("stats_interval has to be at least a second")]
    ZeroStatsInterval,
}

/// Precision of timestamps in incoming line protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum Precision {
    #[default]
    #[serde(rename = "n", alias = "ns", alias = "")]
    Nanoseconds,
    #[serde(rename = "u", alias = "us")]
    Microseconds,
    #[serde(rename = "ms")]
    Milliseconds,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
}

impl Precision {
    /// Nanoseconds in one unit of this precision
    pub fn multiplier(&self) -> i64 {
        match self {
            Precision::Nanoseconds => 1,
            Precision::Microseconds => 1_000,
            Precision::Milliseconds => 1_000_000,
            Precision::Seconds => 1_000_000_000,
            Precision::Minutes => 60_000_000_000,
            Precision::Hours => 3_600_000_000_000,
        }
    }

    /// Rounds a nanosecond timestamp down to this precision
    pub fn truncate(&self, timestamp: i64) -> i64 {
        timestamp - timestamp.rem_euclid(self.multiplier())
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub enabled: bool,
    pub bind_address: String,
    pub database: String,
    pub retention_policy: String,
    pub precision: Precision,
    pub batch_size: usize,
    pub batch_pending: usize,
    /// Duration(in seconds) after the first point of a batch arrives, before it is flushed
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub batch_timeout: Duration,
    /// SO_RCVBUF of the listener socket, 0 leaves the OS default in place
    pub read_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: false,
            bind_address: DEFAULT_BIND_ADDRESS.to_owned(),
            database: DEFAULT_DATABASE.to_owned(),
            retention_policy: DEFAULT_RETENTION_POLICY.to_owned(),
            precision: Precision::Nanoseconds,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pending: DEFAULT_BATCH_PENDING,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }
}

impl Config {
    /// Copy of this config with zero valued batch options replaced by defaults.
    /// Bind address and database are left alone, they have to be set explicitly.
    pub fn with_defaults(&self) -> Config {
        let mut d = self.clone();
        if d.batch_size == 0 {
            d.batch_size = DEFAULT_BATCH_SIZE;
        }
        if d.batch_pending == 0 {
            d.batch_pending = DEFAULT_BATCH_PENDING;
        }
        if d.batch_timeout.is_zero() {
            d.batch_timeout = DEFAULT_BATCH_TIMEOUT;
        }

        d
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.bind_address.trim().is_empty() {
            return Err(Error::MissingBindAddress);
        }
        if self.database.trim().is_empty() {
            return Err(Error::MissingDatabase);
        }

        Ok(())
    }

    /// Bind address in a form the resolver accepts, `:8089` means every interface
    pub fn resolvable_address(&self) -> String {
        let addr = self.bind_address.trim();
        match addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => addr.to_owned(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    /// Base url of the http api, e.g. `http://localhost:8086`
    pub url: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

/// Configuration of the udplink binary, one pipeline per enabled `[[udp]]` entry
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Interval(in seconds) between statistics logs
    #[serde_as(as = "DurationSeconds<u64>")]
    pub stats_interval: Duration,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub udp: Vec<Config>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.stats_interval.is_zero() {
            return Err(Error::ZeroStatsInterval);
        }

        Ok(())
    }
}
