use std::{io, path::PathBuf};

/// Every fatal condition the pipeline can hit.
/// Messages name the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum BrcError {
    #[error("config: {0}")]
    InvalidConfig(&'static str),

    #[error("mmap: failed to open `{}`", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("chunk producer: read failed")]
    Read(#[source] io::Error),

    /// A full buffer contained no newline and more input followed,
    /// so no record boundary can be found.
    #[error("chunk producer: record at byte {offset} doesn't fit in a {limit} byte chunk")]
    RecordTooLong { offset: u64, limit: usize },

    #[error("worker: malformed record at byte {offset}: {reason}")]
    MalformedRecord { offset: u64, reason: &'static str },

    #[error("worker: value `{value}` at byte {offset} is out of range")]
    ValueOverflow { offset: u64, value: String },

    #[error("worker: key at byte {offset} is not valid utf-8")]
    InvalidKey { offset: u64 },

    #[error("worker: aggregate table is full ({capacity} slots)")]
    TableFull { capacity: usize },

    #[error("pipeline: cancelled")]
    Cancelled,
}
