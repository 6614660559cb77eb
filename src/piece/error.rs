use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PieceError {
    /// The assembled piece did not match its expected hash; it was reset.
    #[error("hash mismatch for piece {0}")]
    HashMismatch(u32),

    /// The block does not fit the piece's geometry.
    #[error("invalid block: piece {piece}, offset {offset}, length {length}")]
    InvalidBlock { piece: u32, offset: u32, length: u32 },

    /// The sink rejected a verified piece. The cause is kept by the
    /// [`PieceManager`](super::PieceManager) for the download to report.
    #[error("output sink failed")]
    SinkFailed,

    /// The sink could not take the verified piece yet. The piece was reset
    /// and will be downloaded again.
    #[error("output sink busy, piece {0} reset")]
    SinkBusy(u32),
}
