use crate::constants::BLOCK_SIZE;

/// A block of a piece, addressed by piece index and byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub piece: u32,
    pub offset: u32,
    pub length: u32,
}

impl BlockRequest {
    pub fn new(piece: u32, offset: u32, length: u32) -> Self {
        Self {
            piece,
            offset,
            length,
        }
    }

    /// Index of this block within its piece.
    pub fn block_index(&self) -> u32 {
        self.offset / BLOCK_SIZE
    }
}

/// Number of [`BLOCK_SIZE`] blocks in a piece of `piece_size` bytes.
pub fn block_count(piece_size: u64) -> u32 {
    piece_size.div_ceil(BLOCK_SIZE as u64) as u32
}

/// Length of block `block_index`; only the last block of a piece is short.
pub fn block_length(piece_size: u64, block_index: u32) -> u32 {
    let offset = block_index as u64 * BLOCK_SIZE as u64;
    piece_size.saturating_sub(offset).min(BLOCK_SIZE as u64) as u32
}
