use bytes::Bytes;

use super::error::PeerError;

/// The set of pieces a peer has.
///
/// Bits are numbered from the high bit of the first byte, so piece 0 is
/// `0x80` of byte 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    /// Creates an empty bitfield for the given number of pieces.
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
            piece_count,
        }
    }

    /// Creates a bitfield with every piece set.
    pub fn full(piece_count: usize) -> Self {
        let mut bf = Self {
            bits: vec![0xFF; piece_count.div_ceil(8)],
            piece_count,
        };
        bf.clear_spare_bits();
        bf
    }

    /// Parses the payload of a `bitfield` message.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::Protocol`] if the payload is not exactly
    /// `ceil(piece_count / 8)` bytes or any spare trailing bit is set.
    pub fn try_from_payload(payload: &[u8], piece_count: usize) -> Result<Self, PeerError> {
        let expected = piece_count.div_ceil(8);
        if payload.len() != expected {
            return Err(PeerError::Protocol(format!(
                "bitfield is {} bytes, expected {}",
                payload.len(),
                expected
            )));
        }

        let bf = Self {
            bits: payload.to_vec(),
            piece_count,
        };
        if bf.spare_mask() & bf.bits.last().copied().unwrap_or(0) != 0 {
            return Err(PeerError::Protocol("bitfield has spare bits set".into()));
        }
        Ok(bf)
    }

    pub fn has_piece(&self, index: usize) -> bool {
        if index >= self.piece_count {
            return false;
        }
        (self.bits[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    /// Out-of-range indices are ignored.
    pub fn set_piece(&mut self, index: usize) {
        if index < self.piece_count {
            self.bits[index / 8] |= 1 << (7 - index % 8);
        }
    }

    pub fn clear_piece(&mut self, index: usize) {
        if index < self.piece_count {
            self.bits[index / 8] &= !(1 << (7 - index % 8));
        }
    }

    /// Number of pieces set.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.count() == self.piece_count
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    /// Indices of the pieces that are set, in ascending order.
    pub fn pieces(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.piece_count).filter(move |&i| self.has_piece(i))
    }

    /// Bits of the last byte that do not correspond to a piece.
    fn spare_mask(&self) -> u8 {
        let spare = self.bits.len() * 8 - self.piece_count;
        if spare == 0 {
            0
        } else {
            0xFFu8 >> (8 - spare)
        }
    }

    fn clear_spare_bits(&mut self) {
        let mask = self.spare_mask();
        if let Some(last) = self.bits.last_mut() {
            *last &= !mask;
        }
    }
}
