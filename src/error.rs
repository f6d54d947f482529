//! Error types for the chroma-index library

use std::path::PathBuf;
use thiserror::Error;

/// Library-level error type.
///
/// Build entry points surface every failure through this enum; read-side
/// accessors on a well-formed store do not fail (out-of-range ids are
/// contract violations and assert).
#[derive(Debug, Error)]
pub enum Error {
    /// Caller misuse: id out of range, unsorted input list, double build.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Parameters that cannot produce a valid build, detected before the
    /// expensive phases start.
    #[error("infeasible parameters: {0}")]
    InfeasibleParams(String),

    /// An encoded list came out non-strictly-ascending. This is an
    /// algorithmic bug, not an environmental failure.
    #[error("encoding invariant violated: {0}")]
    EncodingInvariant(String),

    /// File I/O failure, with the path that was being touched.
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A serialized artifact failed validation (magic, version, CRC, size).
    #[error("bad artifact {path}: {reason}")]
    Format { path: PathBuf, reason: String },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
