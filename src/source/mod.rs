mod http;

use crate::core::catalog::Catalog;
use async_trait::async_trait;

pub use http::HttpSource;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("service returned HTTP {status}")]
    Status { status: u16 },
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// The remote library service, reduced to the two calls the core needs.
/// Scraping and authentication live behind this boundary.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch a complete replacement snapshot of the library. Errors are
    /// expected to be transient; callers keep the previous snapshot.
    async fn fetch_snapshot(&self) -> Result<Catalog, FetchError>;

    async fn is_reachable(&self) -> bool;
}
