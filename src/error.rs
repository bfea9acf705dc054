use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

/// Failures a query can surface to the request layer.
///
/// Malformed log lines never show up here; the scanner skips and counts them.
/// A point lookup that finds nothing is `Ok(None)`, not an error.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Bad client parameters, rejected before any scan starts.
    #[error("invalid query: {0}")]
    InvalidInput(String),

    #[error("unknown site `{0}`")]
    UnknownSite(String),

    #[error("no {0} log configured for this site")]
    MissingLog(&'static str),

    #[error("log `{path}` has {found} usable readings, need at least {needed}")]
    InsufficientData {
        path: PathBuf,
        found: usize,
        needed: usize,
    },

    #[error("query task failed: {0}")]
    Internal(String),

    #[error("reading log `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl QueryError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        QueryError::InvalidInput(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        QueryError::Io {
            path: path.into(),
            source,
        }
    }
}
