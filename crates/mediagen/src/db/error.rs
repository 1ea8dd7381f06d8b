use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot prepare database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema upgrade to v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored value no longer parses into the model (bad status, bad
    /// timestamp, corrupt JSON parameters).
    #[error("Column '{column}' holds an invalid value: {reason}")]
    InvalidRow { column: &'static str, reason: String },

    #[error("Job database lock poisoned by a panicking writer")]
    LockPoisoned,

    #[error("Blocking database task failed: {0}")]
    Task(String),

    #[error("Job repository unavailable: {0}")]
    Unavailable(String),
}
