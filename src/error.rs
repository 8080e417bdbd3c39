//! Error types for the forwarder

use std::time::Duration;

use thiserror::Error;

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Malformed or unencodable wire data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("buffer truncated at offset {offset}")]
    Truncated { offset: usize },

    #[error("label too long ({0} bytes, max 63)")]
    LabelTooLong(usize),

    #[error("empty label in name {0:?}")]
    EmptyLabel(String),

    #[error("name too long ({0} encoded bytes, max 255)")]
    NameTooLong(usize),

    #[error("compression pointer to {target} outside buffer of {len} bytes")]
    PointerOutOfRange { target: usize, len: usize },

    #[error("compression loop at offset {0}")]
    CompressionLoop(usize),

    #[error("too many entries in section ({0})")]
    TooManyEntries(usize),

    #[error("rdata too long ({0} bytes)")]
    RdataTooLong(usize),
}

/// Errors that can occur while forwarding a query
#[derive(Debug, Error)]
pub enum Error {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("upstream did not reply within {0:?}")]
    Timeout(Duration),

    #[error("message {0} is a response, not a query")]
    NotAQuery(u16),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}
