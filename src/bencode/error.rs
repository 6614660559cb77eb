use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    /// The input is not valid bencode.
    #[error("malformed encoding at byte {pos}: {kind}")]
    Malformed { pos: usize, kind: MalformedKind },

    /// Lists and dictionaries are nested deeper than the decoder allows.
    #[error("nesting deeper than {0} levels")]
    DepthExceeded(usize),

    /// A byte string or container is larger than the decoder allows.
    #[error("length {len} exceeds limit of {limit}")]
    LengthExceeded { len: usize, limit: usize },
}

impl BencodeError {
    pub(crate) fn malformed(pos: usize, kind: MalformedKind) -> Self {
        BencodeError::Malformed { pos, kind }
    }
}

/// The specific way an input violates the bencode grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedKind {
    UnexpectedEof,
    UnexpectedChar(u8),
    InvalidInteger(String),
    InvalidStringLength,
    NonStringKey,
    DuplicateKey,
    UnsortedKey,
    TrailingData,
}

impl fmt::Display for MalformedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedKind::UnexpectedEof => write!(f, "unexpected end of input"),
            MalformedKind::UnexpectedChar(c) => write!(f, "unexpected byte 0x{:02x}", c),
            MalformedKind::InvalidInteger(s) => write!(f, "invalid integer: {}", s),
            MalformedKind::InvalidStringLength => write!(f, "invalid string length"),
            MalformedKind::NonStringKey => write!(f, "dictionary key is not a byte string"),
            MalformedKind::DuplicateKey => write!(f, "duplicate dictionary key"),
            MalformedKind::UnsortedKey => write!(f, "dictionary keys out of order"),
            MalformedKind::TrailingData => write!(f, "trailing data after value"),
        }
    }
}
