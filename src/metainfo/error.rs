use thiserror::Error;

use crate::bencode::BencodeError;

/// Errors that can occur when interpreting a `.torrent` file.
#[derive(Debug, Error)]
pub enum MetainfoError {
    /// The torrent file contains invalid bencode.
    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    /// A required field is missing from the torrent file.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field has the wrong type or an out-of-range value.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    /// The number of piece hashes does not cover the content length.
    #[error("{actual} piece hashes for content needing {expected}")]
    PieceCountMismatch { expected: usize, actual: usize },

    /// The info hash has an invalid length (must be 20 bytes).
    #[error("invalid info hash length")]
    InvalidInfoHashLength,
}
