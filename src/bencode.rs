//! Bencode encoding and decoding ([BEP-3]).
//!
//! Bencode is the serialization format used throughout BitTorrent for storing
//! and transmitting structured data, including `.torrent` files and tracker
//! responses.
//!
//! # Data Types
//!
//! | Type | Format | Example |
//! |------|--------|---------|
//! | Integer | `i<number>e` | `i42e` → 42 |
//! | Byte String | `<length>:<data>` | `4:spam` → "spam" |
//! | List | `l<items>e` | `l4:spami42ee` → ["spam", 42] |
//! | Dictionary | `d<key><value>...e` | `d3:foo3:bare` → {"foo": "bar"} |
//!
//! # Examples
//!
//! ```
//! use leech::bencode::{decode, encode, Value};
//!
//! let value = decode(b"d3:cow3:moo4:spaml1:a1:bee").unwrap();
//! assert_eq!(value.get(b"cow").and_then(|v| v.as_str()), Some("moo"));
//! assert_eq!(value.get(b"spam").and_then(|v| v.as_list()).map(|l| l.len()), Some(2));
//!
//! // Decoded values re-encode to the bytes they came from.
//! assert_eq!(encode(&value), b"d3:cow3:moo4:spaml1:a1:bee");
//! ```
//!
//! Producers of `.torrent` files and tracker responses are untrusted, so the
//! decoder keeps dictionary keys in the order it read them and only rejects
//! unsorted keys when asked to via [`Decoder::strict`]:
//!
//! ```
//! use leech::bencode::{decode, Decoder};
//!
//! assert!(decode(b"d1:bi1e1:ai2ee").is_ok());
//! assert!(Decoder::new(b"d1:bi1e1:ai2ee").strict(true).decode_next().is_err());
//! ```
//!
//! # Error Handling
//!
//! - [`BencodeError::Malformed`] - The input violates the grammar (see [`MalformedKind`])
//! - [`BencodeError::DepthExceeded`] - Lists/dictionaries nested too deeply (default 64 levels)
//! - [`BencodeError::LengthExceeded`] - A string or container is larger than allowed
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{
    decode, decode_prefix, raw_dict_entry, Decoder, DEFAULT_MAX_DEPTH, DEFAULT_MAX_LENGTH,
};
pub use encode::encode;
pub use error::{BencodeError, MalformedKind};
pub use value::{Dict, Value};

#[cfg(test)]
mod tests;
