use super::Point;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Http error {0}")]
    Http(#[from] reqwest::Error),
    #[error("Destination responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Destination unavailable: {0}")]
    Unavailable(String),
}

/// Number of replicas that have to acknowledge a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyLevel {
    /// Acknowledged without confirmation from any replica, best effort
    Any,
    One,
    Quorum,
    All,
}

impl ConsistencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyLevel::Any => "any",
            ConsistencyLevel::One => "one",
            ConsistencyLevel::Quorum => "quorum",
            ConsistencyLevel::All => "all",
        }
    }
}

/// Write path of the storage backend
#[async_trait::async_trait]
pub trait PointsWriter: Send + Sync {
    /// Writes `points` into `database`, bypassing authorization of the caller
    async fn write_points_privileged(
        &self,
        database: &str,
        retention_policy: &str,
        consistency: ConsistencyLevel,
        points: &[Point],
    ) -> Result<(), Error>;
}

/// Directory of databases known to the storage backend
#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    /// Creates `name` if it doesn't exist yet. Succeeds if it already exists.
    async fn create_database(&self, name: &str) -> Result<(), Error>;
}
