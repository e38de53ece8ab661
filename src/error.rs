use std::error::Error as StdError;
use thiserror::Error;

/// Failure classes for one sync run.
///
/// `Listing` is fatal to the whole run (nothing to cluster without it); the
/// per-table classes are caught by the coordinator, logged, and the run moves
/// on to the next table.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("listing blobs in container `{container}` failed: {source}")]
    Listing {
        container: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("fetching blob `{key}` failed: {source}")]
    Fetch {
        key: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("reading parquet schema from `{key}` failed: {source}")]
    SchemaRead {
        key: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("warehouse rejected statement ({kind}): {message}")]
    Statement { kind: &'static str, message: String },

    #[error("blob key `{key}` has no date token in its filename")]
    MalformedKey { key: String },
}
