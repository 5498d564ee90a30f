//! Error kinds surfaced by the core.
//!
//! Transport-level failures are propagated with `anyhow` and handled by
//! closing/retrying the connection; these variants are for conditions
//! callers branch on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FyreError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk CRC mismatch for chunk of type '{chunk_type}'")]
    CorruptChunk { chunk_type: String },

    #[error("unexpected end of stream inside a chunk")]
    UnexpectedEnd,

    #[error("unrecognized chunk type '{chunk_type}'")]
    UnknownChunkType { chunk_type: String },

    #[error("unknown parameter '{name}'")]
    UnknownProperty { name: String },

    #[error("bad value {value:?} for parameter '{name}'")]
    BadValue { name: String, value: String },

    #[error("image does not contain Fyre metadata")]
    NoMetadata,

    #[error("protocol error: {0}")]
    ProtocolError(String),
}
