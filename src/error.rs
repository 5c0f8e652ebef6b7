//! Typed errors at the library boundary.
//!
//! `anyhow` is used everywhere *inside* a command's implementation (matching
//! the teacher's style), but a handful of error shapes are part of the
//! public contract named in the design notes — callers (and `main.rs`) need
//! to match on them rather than just printing a message.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    InputNotFound(String),

    #[error("decode error at {path}:{line}: {message}")]
    DecodeError {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error(
        "embeddings index is incompatible: built with backend={old_backend} model={old_model} dim={old_dim}, \
         current is backend={new_backend} model={new_model} dim={new_dim}. Run `{rebuild_command}` to rebuild."
    )]
    SchemaIncompat {
        old_backend: String,
        old_model: String,
        old_dim: i64,
        new_backend: String,
        new_model: String,
        new_dim: i64,
        rebuild_command: String,
    },

    #[error("already applied: {0}")]
    DuplicateKey(String),

    #[error("no results: {0}")]
    FilterYieldsEmpty(String),

    #[error("adapter invalid ({origin}): {message}")]
    AdapterInvalid { origin: String, message: String },

    #[error("embedding backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("query error: {0}")]
    QueryError(String),

    #[error("copy error: {0}")]
    CopyError(String),

    #[error("index compatibility error: {0}")]
    IndexCompatError(String),

    #[error("embeddings not available: {0}")]
    EmbeddingsNotAvailable(String),

    #[error("incremental index build incompatible: {0}")]
    IncrementalCompatError(String),

    #[error("ambiguous session: {0}")]
    AmbiguousSessionError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
