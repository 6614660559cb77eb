use super::error::{BencodeError, MalformedKind};
use super::value::{Dict, Value};
use bytes::Bytes;
use std::collections::HashSet;

pub const DEFAULT_MAX_DEPTH: usize = 64;
pub const DEFAULT_MAX_LENGTH: usize = 64 * 1024 * 1024;

/// Decodes a complete bencode value.
///
/// The whole input must be consumed by exactly one value.
///
/// # Examples
///
/// ```
/// use leech::bencode::{decode, Value};
///
/// assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
/// assert!(decode(b"i42eextra").is_err());
/// ```
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let mut decoder = Decoder::new(data);
    let value = decoder.decode_next()?;
    decoder.finish()?;
    Ok(value)
}

/// Decodes one value from the front of `data`, returning it together with
/// the number of bytes it occupied.
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), BencodeError> {
    let mut decoder = Decoder::new(data);
    let value = decoder.decode_next()?;
    Ok((value, decoder.position()))
}

/// Returns the undecoded bytes of `key`'s value in the top-level dictionary.
///
/// Used to hash the `info` dictionary exactly as it appeared on the wire.
/// Returns `Ok(None)` if the input is a dictionary without that key.
pub fn raw_dict_entry<'a>(data: &'a [u8], key: &[u8]) -> Result<Option<&'a [u8]>, BencodeError> {
    let mut decoder = Decoder::new(data);
    decoder.expect(b'd')?;

    loop {
        match decoder.peek()? {
            b'e' => return Ok(None),
            b'0'..=b'9' => {}
            _ => {
                return Err(BencodeError::malformed(
                    decoder.pos,
                    MalformedKind::NonStringKey,
                ))
            }
        }

        let entry_key = decoder.decode_bytes()?;
        let start = decoder.pos;
        decoder.decode_value(1)?;

        if entry_key.as_ref() == key {
            return Ok(Some(&data[start..decoder.pos]));
        }
    }
}

/// A single-pass bencode decoder over a byte slice.
///
/// The decoder never backtracks. Nesting depth and the size of strings and
/// containers are capped so hostile input is rejected before it can exhaust
/// memory or the stack.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    max_depth: usize,
    max_length: usize,
    strict: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            max_length: DEFAULT_MAX_LENGTH,
            strict: false,
        }
    }

    /// Allows at most `depth` nested lists and dictionaries.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Caps both byte string lengths and the number of items in a container.
    pub fn max_length(mut self, length: usize) -> Self {
        self.max_length = length;
        self
    }

    /// In strict mode dictionary keys must appear in ascending order.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn decode_next(&mut self) -> Result<Value, BencodeError> {
        self.decode_value(0)
    }

    /// Fails if any input remains after the values decoded so far.
    pub fn finish(self) -> Result<(), BencodeError> {
        if self.pos != self.data.len() {
            return Err(BencodeError::malformed(
                self.pos,
                MalformedKind::TrailingData,
            ));
        }
        Ok(())
    }

    fn peek(&self) -> Result<u8, BencodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| BencodeError::malformed(self.pos, MalformedKind::UnexpectedEof))
    }

    fn expect(&mut self, byte: u8) -> Result<(), BencodeError> {
        let c = self.peek()?;
        if c != byte {
            return Err(BencodeError::malformed(
                self.pos,
                MalformedKind::UnexpectedChar(c),
            ));
        }
        self.pos += 1;
        Ok(())
    }

    fn decode_value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        let c = self.peek()?;
        if matches!(c, b'l' | b'd') && depth >= self.max_depth {
            return Err(BencodeError::DepthExceeded(self.max_depth));
        }

        match c {
            b'i' => self.decode_integer(),
            b'l' => self.decode_list(depth),
            b'd' => self.decode_dict(depth),
            b'0'..=b'9' | b'-' => self.decode_bytes().map(Value::Bytes),
            c => Err(BencodeError::malformed(
                self.pos,
                MalformedKind::UnexpectedChar(c),
            )),
        }
    }

    fn decode_integer(&mut self) -> Result<Value, BencodeError> {
        self.pos += 1;
        let start = self.pos;

        while self.peek()? != b'e' {
            self.pos += 1;
        }

        let digits = &self.data[start..self.pos];
        let invalid = |reason: &str| {
            BencodeError::malformed(start, MalformedKind::InvalidInteger(reason.into()))
        };

        let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
        if unsigned.is_empty() {
            return Err(invalid("empty"));
        }
        if !unsigned.iter().all(u8::is_ascii_digit) {
            return Err(invalid("non-digit"));
        }
        if unsigned[0] == b'0' && (unsigned.len() > 1 || unsigned.len() != digits.len()) {
            return Err(invalid("leading zero"));
        }

        // All bytes are ASCII at this point.
        let text = std::str::from_utf8(digits).map_err(|_| invalid("non-digit"))?;
        let value: i64 = text.parse().map_err(|_| invalid("out of range"))?;

        self.pos += 1;
        Ok(Value::Integer(value))
    }

    fn decode_bytes(&mut self) -> Result<Bytes, BencodeError> {
        let start = self.pos;
        let mut len: usize = 0;

        loop {
            match self.peek()? {
                b':' => break,
                c @ b'0'..=b'9' => {
                    len = len
                        .checked_mul(10)
                        .and_then(|l| l.checked_add((c - b'0') as usize))
                        .ok_or(BencodeError::LengthExceeded {
                            len: usize::MAX,
                            limit: self.max_length,
                        })?;
                    self.pos += 1;
                }
                _ => {
                    return Err(BencodeError::malformed(
                        start,
                        MalformedKind::InvalidStringLength,
                    ))
                }
            }
        }

        let prefix = &self.data[start..self.pos];
        if prefix.is_empty() || (prefix[0] == b'0' && prefix.len() > 1) {
            return Err(BencodeError::malformed(
                start,
                MalformedKind::InvalidStringLength,
            ));
        }

        if len > self.max_length {
            return Err(BencodeError::LengthExceeded {
                len,
                limit: self.max_length,
            });
        }

        self.pos += 1;

        if len > self.data.len() - self.pos {
            return Err(BencodeError::malformed(
                self.data.len(),
                MalformedKind::UnexpectedEof,
            ));
        }

        let bytes = Bytes::copy_from_slice(&self.data[self.pos..self.pos + len]);
        self.pos += len;

        Ok(bytes)
    }

    fn decode_list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut list = Vec::new();

        while self.peek()? != b'e' {
            if list.len() >= self.max_length {
                return Err(BencodeError::LengthExceeded {
                    len: list.len() + 1,
                    limit: self.max_length,
                });
            }
            list.push(self.decode_value(depth + 1)?);
        }

        self.pos += 1;
        Ok(Value::List(list))
    }

    fn decode_dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut dict = Dict::new();
        let mut last_key: Option<Bytes> = None;
        let mut seen: HashSet<Bytes> = HashSet::new();

        loop {
            let key_pos = self.pos;
            match self.peek()? {
                b'e' => break,
                b'0'..=b'9' => {}
                _ => {
                    return Err(BencodeError::malformed(
                        key_pos,
                        MalformedKind::NonStringKey,
                    ))
                }
            }

            if dict.len() >= self.max_length {
                return Err(BencodeError::LengthExceeded {
                    len: dict.len() + 1,
                    limit: self.max_length,
                });
            }

            let key = self.decode_bytes()?;

            if !seen.insert(key.clone()) {
                return Err(BencodeError::malformed(
                    key_pos,
                    MalformedKind::DuplicateKey,
                ));
            }

            if self.strict && matches!(last_key, Some(ref last) if key < *last) {
                return Err(BencodeError::malformed(
                    key_pos,
                    MalformedKind::UnsortedKey,
                ));
            }

            let value = self.decode_value(depth + 1)?;
            last_key = Some(key.clone());
            dict.push_unchecked(key, value);
        }

        self.pos += 1;
        Ok(Value::Dict(dict))
    }
}
