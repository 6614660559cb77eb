use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use super::error::PieceError;
use crate::constants::{BLOCK_SIZE, MAX_HASH_FAILURES, MAX_HASH_FAILURE_PEERS};
use crate::metainfo::Info;
use crate::peer::{block_count, block_length, Bitfield, BlockRequest};
use crate::storage::{PieceSink, StorageError};

/// Order in which missing pieces are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PickStrategy {
    /// Pieces held by the fewest connected peers first, ties by lowest index.
    #[default]
    RarestFirst,
    /// Lowest index first.
    Sequential,
}

/// A snapshot of download progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub pieces_verified: usize,
    pub pieces_total: usize,
    pub bytes_verified: u64,
    pub active_peers: usize,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.pieces_verified == self.pieces_total
    }
}

/// What happened to a submitted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Stored; the piece still has blocks outstanding.
    Accepted,
    /// Already received, or the piece is already verified. Nothing changed.
    Duplicate,
    /// The block completed its piece, which passed verification and was
    /// written to the sink.
    PieceVerified(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PieceStatus {
    Missing,
    InFlight,
    Verified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Open,
    Claimed,
    Received,
}

struct PieceState {
    status: PieceStatus,
    size: u64,
    blocks: Vec<BlockState>,
    received: usize,
    buffer: Option<Vec<u8>>,
    failures: u32,
    contributors: HashSet<SocketAddr>,
    failed_peers: HashSet<SocketAddr>,
}

impl PieceState {
    fn new(size: u64) -> Self {
        Self {
            status: PieceStatus::Missing,
            size,
            blocks: vec![BlockState::Open; block_count(size) as usize],
            received: 0,
            buffer: None,
            failures: 0,
            contributors: HashSet::new(),
            failed_peers: HashSet::new(),
        }
    }

    fn first_open_block(&self) -> Option<usize> {
        self.blocks.iter().position(|b| *b == BlockState::Open)
    }

    fn reset(&mut self) {
        self.status = PieceStatus::Missing;
        self.blocks.fill(BlockState::Open);
        self.received = 0;
        self.buffer = None;
        self.contributors.clear();
    }
}

struct Inner {
    pieces: Vec<PieceState>,
    availability: Vec<u32>,
    verified: usize,
    bytes_verified: u64,
    active_peers: usize,
    exhausted: Option<(u32, u32)>,
    storage_error: Option<StorageError>,
}

/// Download state shared by every peer session.
///
/// Owns the piece table: which blocks are claimed, the buffers of pieces
/// being assembled, and per-piece availability. Completed pieces are hashed
/// here and only written to the sink once they verify. Every method takes
/// one lock, so sessions never observe a half-applied update.
pub struct PieceManager {
    piece_length: u64,
    hashes: Vec<[u8; 20]>,
    sink: Arc<dyn PieceSink>,
    strategy: PickStrategy,
    max_hash_failures: u32,
    max_hash_failure_peers: usize,
    inner: Mutex<Inner>,
    work_tx: watch::Sender<u64>,
}

impl PieceManager {
    pub fn new(info: &Info, sink: Arc<dyn PieceSink>) -> Self {
        let pieces: Vec<PieceState> = (0..info.piece_count() as u32)
            .map(|index| PieceState::new(info.piece_size(index)))
            .collect();
        let (work_tx, _) = watch::channel(0);

        Self {
            piece_length: info.piece_length,
            hashes: info.pieces.clone(),
            sink,
            strategy: PickStrategy::default(),
            max_hash_failures: MAX_HASH_FAILURES,
            max_hash_failure_peers: MAX_HASH_FAILURE_PEERS,
            inner: Mutex::new(Inner {
                availability: vec![0; pieces.len()],
                pieces,
                verified: 0,
                bytes_verified: 0,
                active_peers: 0,
                exhausted: None,
                storage_error: None,
            }),
            work_tx,
        }
    }

    pub fn with_strategy(mut self, strategy: PickStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// A piece is given up on after `max_failures` failed hash checks, or
    /// once data from `max_peers` distinct peers has failed it.
    pub fn with_hash_budget(mut self, max_failures: u32, max_peers: usize) -> Self {
        self.max_hash_failures = max_failures;
        self.max_hash_failure_peers = max_peers;
        self
    }

    pub fn piece_count(&self) -> usize {
        self.hashes.len()
    }

    /// Reserves the next block to request from a peer holding `have`.
    ///
    /// Pieces that already have blocks in flight or received come first, so
    /// buffers are completed and released early. Among untouched pieces the
    /// [`PickStrategy`] decides. Returns `None` when the peer holds nothing
    /// that is still open.
    pub fn claim_block(&self, have: &Bitfield) -> Option<BlockRequest> {
        let mut inner = self.inner.lock();

        let candidate = |state: &PieceState| {
            state.status != PieceStatus::Verified && state.first_open_block().is_some()
        };

        let partial = inner.pieces.iter().enumerate().find(|(index, state)| {
            state.status == PieceStatus::InFlight && candidate(state) && have.has_piece(*index)
        });

        let index = match partial {
            Some((index, _)) => index,
            None => {
                let missing = inner.pieces.iter().enumerate().filter(|(index, state)| {
                    state.status == PieceStatus::Missing && candidate(state) && have.has_piece(*index)
                });
                match self.strategy {
                    PickStrategy::Sequential => missing.map(|(index, _)| index).next()?,
                    PickStrategy::RarestFirst => missing
                        .map(|(index, _)| index)
                        .min_by_key(|&index| (inner.availability[index], index))?,
                }
            }
        };

        let state = &mut inner.pieces[index];
        let block = state.first_open_block()?;
        state.blocks[block] = BlockState::Claimed;
        state.status = PieceStatus::InFlight;

        let request = BlockRequest::new(
            index as u32,
            block as u32 * BLOCK_SIZE,
            block_length(state.size, block as u32),
        );
        trace!(piece = request.piece, offset = request.offset, "block claimed");
        Some(request)
    }

    /// Stores a block received from `peer`.
    ///
    /// Blocks that were never claimed, or whose claim was abandoned, are
    /// still accepted as long as the block itself is missing.
    ///
    /// # Errors
    ///
    /// - [`PieceError::InvalidBlock`] if the block does not match the piece
    ///   geometry (unknown piece, unaligned offset, wrong length)
    /// - [`PieceError::HashMismatch`] if the block completed a piece that
    ///   failed verification; the piece is back to missing
    /// - [`PieceError::SinkFailed`] if the sink refused the verified piece
    pub fn submit_block(
        &self,
        peer: SocketAddr,
        piece: u32,
        offset: u32,
        data: &[u8],
    ) -> Result<BlockOutcome, PieceError> {
        let invalid = || PieceError::InvalidBlock {
            piece,
            offset,
            length: data.len() as u32,
        };

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let state = inner.pieces.get_mut(piece as usize).ok_or_else(invalid)?;

        if offset % BLOCK_SIZE != 0 {
            return Err(invalid());
        }
        let block = (offset / BLOCK_SIZE) as usize;
        if block >= state.blocks.len() || data.len() != block_length(state.size, block as u32) as usize
        {
            return Err(invalid());
        }

        if state.status == PieceStatus::Verified || state.blocks[block] == BlockState::Received {
            return Ok(BlockOutcome::Duplicate);
        }

        let size = state.size as usize;
        let buffer = state.buffer.get_or_insert_with(|| vec![0u8; size]);
        let start = offset as usize;
        buffer[start..start + data.len()].copy_from_slice(data);
        state.blocks[block] = BlockState::Received;
        state.received += 1;
        state.status = PieceStatus::InFlight;
        state.contributors.insert(peer);

        if state.received < state.blocks.len() {
            return Ok(BlockOutcome::Accepted);
        }

        let buffer = state.buffer.take().unwrap_or_default();
        let digest: [u8; 20] = Sha1::digest(&buffer).into();

        if digest != self.hashes[piece as usize] {
            state.failed_peers.extend(state.contributors.drain());
            state.reset();
            state.failures += 1;
            warn!(
                piece,
                failures = state.failures,
                peers = state.failed_peers.len(),
                "piece failed hash check"
            );
            if state.failures >= self.max_hash_failures
                || state.failed_peers.len() >= self.max_hash_failure_peers
            {
                inner.exhausted.get_or_insert((piece, state.failures));
            }
            drop(guard);
            self.notify_work();
            return Err(PieceError::HashMismatch(piece));
        }

        let position = piece as u64 * self.piece_length;
        match self.sink.write_piece(piece, position, Bytes::from(buffer)) {
            Ok(()) => {}
            Err(StorageError::WriterBusy) => {
                debug!(piece, "sink busy, piece reset");
                state.reset();
                drop(guard);
                self.notify_work();
                return Err(PieceError::SinkBusy(piece));
            }
            Err(e) => {
                warn!(piece, error = %e, "sink rejected verified piece");
                state.reset();
                inner.storage_error.get_or_insert(e);
                return Err(PieceError::SinkFailed);
            }
        }

        state.status = PieceStatus::Verified;
        state.contributors.clear();
        inner.verified += 1;
        inner.bytes_verified += state.size;
        debug!(
            piece,
            verified = inner.verified,
            total = inner.pieces.len(),
            "piece verified"
        );
        drop(guard);
        self.notify_work();
        Ok(BlockOutcome::PieceVerified(piece))
    }

    /// Returns a claimed block to the pool. Received blocks are left alone.
    pub fn abandon_block(&self, piece: u32, offset: u32) {
        let returned = {
            let mut inner = self.inner.lock();
            release(&mut inner, piece, offset)
        };
        if returned {
            self.notify_work();
        }
    }

    pub fn abandon_blocks<I>(&self, requests: I)
    where
        I: IntoIterator<Item = BlockRequest>,
    {
        let mut returned = false;
        {
            let mut inner = self.inner.lock();
            for request in requests {
                returned |= release(&mut inner, request.piece, request.offset);
            }
        }
        if returned {
            self.notify_work();
        }
    }

    /// Registers a connected peer, and the pieces it starts out with.
    pub fn peer_connected(&self, have: &Bitfield) {
        let mut inner = self.inner.lock();
        inner.active_peers += 1;
        for index in have.pieces() {
            if let Some(count) = inner.availability.get_mut(index) {
                *count += 1;
            }
        }
    }

    /// Adds every piece of a late `bitfield` message to the availability counts.
    pub fn peer_has(&self, have: &Bitfield) {
        let mut inner = self.inner.lock();
        for index in have.pieces() {
            if let Some(count) = inner.availability.get_mut(index) {
                *count += 1;
            }
        }
    }

    /// Records a `have` message.
    pub fn peer_have(&self, piece: u32) {
        if let Some(count) = self.inner.lock().availability.get_mut(piece as usize) {
            *count += 1;
        }
    }

    /// Withdraws a disconnected peer and everything it advertised.
    pub fn peer_gone(&self, have: &Bitfield) {
        let mut inner = self.inner.lock();
        inner.active_peers = inner.active_peers.saturating_sub(1);
        for index in have.pieces() {
            if let Some(count) = inner.availability.get_mut(index) {
                *count = count.saturating_sub(1);
            }
        }
    }

    /// True if the peer holds at least one piece that is not yet verified.
    pub fn peer_is_useful(&self, have: &Bitfield) -> bool {
        let inner = self.inner.lock();
        have.pieces()
            .any(|index| matches!(inner.pieces.get(index), Some(s) if s.status != PieceStatus::Verified))
    }

    /// True if some connected peer holds a piece with an unclaimed block.
    pub fn has_available_work(&self) -> bool {
        let inner = self.inner.lock();
        inner.pieces.iter().enumerate().any(|(index, state)| {
            state.status != PieceStatus::Verified
                && inner.availability[index] > 0
                && state.first_open_block().is_some()
        })
    }

    /// Blocks currently claimed by some session and not yet received.
    pub fn claimed_blocks(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .pieces
            .iter()
            .filter(|state| state.status == PieceStatus::InFlight)
            .map(|state| {
                state
                    .blocks
                    .iter()
                    .filter(|b| **b == BlockState::Claimed)
                    .count()
            })
            .sum()
    }

    pub fn is_complete(&self) -> bool {
        let inner = self.inner.lock();
        inner.verified == inner.pieces.len()
    }

    pub fn is_verified(&self, piece: u32) -> bool {
        matches!(
            self.inner.lock().pieces.get(piece as usize),
            Some(state) if state.status == PieceStatus::Verified
        )
    }

    /// The first piece to run out of hash-check attempts, with its failure count.
    pub fn exhausted_piece(&self) -> Option<(u32, u32)> {
        self.inner.lock().exhausted
    }

    /// The first error the sink returned, if any. Taking it clears it.
    pub fn take_storage_error(&self) -> Option<StorageError> {
        self.inner.lock().storage_error.take()
    }

    pub fn progress(&self) -> Progress {
        let inner = self.inner.lock();
        Progress {
            pieces_verified: inner.verified,
            pieces_total: inner.pieces.len(),
            bytes_verified: inner.bytes_verified,
            active_peers: inner.active_peers,
        }
    }

    /// Changes whenever blocks return to the pool or a piece is verified.
    ///
    /// Idle sessions wait on this instead of polling.
    pub fn work_changed(&self) -> watch::Receiver<u64> {
        self.work_tx.subscribe()
    }

    fn notify_work(&self) {
        self.work_tx.send_modify(|generation| *generation += 1);
    }
}

fn release(inner: &mut Inner, piece: u32, offset: u32) -> bool {
    let Some(state) = inner.pieces.get_mut(piece as usize) else {
        return false;
    };
    match state.blocks.get_mut((offset / BLOCK_SIZE) as usize) {
        Some(block) if *block == BlockState::Claimed => {
            *block = BlockState::Open;
            trace!(piece, offset, "block abandoned");
            true
        }
        _ => false,
    }
}
