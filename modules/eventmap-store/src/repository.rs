//! The retrieval seam between filters and storage.

use async_trait::async_trait;
use thiserror::Error;

use eventmap_common::{Event, EventPage};

use crate::filter::FilterSpec;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("event store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to load seed events: {0}")]
    Seed(String),
}

impl RepositoryError {
    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RepositoryError::Unavailable(_) => true,
            RepositoryError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            RepositoryError::Seed(_) => false,
        }
    }
}

/// Executes a `FilterSpec` against a store of events.
///
/// Implementations must apply every restriction in the filter, order results by
/// start date descending (ties by id descending), and count matches without
/// pagination applied.
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn query(&self, spec: &FilterSpec) -> Result<EventPage, RepositoryError>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Event>, RepositoryError>;
}
