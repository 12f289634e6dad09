use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the graph store, its codec and the table driver.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid schema, view, processor list or store option. Fatal at construction.
    #[error("configuration error: {0}")]
    Config(String),
    /// The table driver could not reach the cluster after its own retry budget.
    #[error("connectivity error: {0}")]
    Connectivity(String),
    /// An undecodable cell or an element that cannot be encoded.
    #[error("data error: {0}")]
    Data(String),
    /// The storage layer explicitly refused the requested authorizations.
    #[error("authorization denied: {0}")]
    Authorization(String),
    /// The caller asked for an operation the store has no handler for.
    #[error("operation not supported: {0}")]
    Unsupported(String),
    /// A table with this name already exists.
    #[error("table already exists: {0}")]
    TableExists(String),
    /// The named table does not exist or is disabled.
    #[error("table not found: {0}")]
    TableNotFound(String),
    /// The resource was used after being closed.
    #[error("{0} is closed")]
    Closed(&'static str),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// JSON (de)serialisation error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        StoreError::Config(msg.into())
    }

    pub(crate) fn data(msg: impl Into<String>) -> Self {
        StoreError::Data(msg.into())
    }

    /// Returns `true` for errors scoped to a single cell or element.
    ///
    /// Scan processors drop and count cells failing with a data error instead
    /// of terminating the stream.
    pub fn is_data(&self) -> bool {
        matches!(self, StoreError::Data(_))
    }
}
