use super::*;
use crate::peer::{Bitfield, BlockRequest};
use crate::storage::{MemorySink, PieceSink, StorageError};
use bytes::Bytes;
use futures::future::BoxFuture;
use crate::test_util::{pattern, TorrentFixture};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const PIECE_LENGTH: usize = 32768;

// Three pieces: two full (two blocks each) and a short one (one block).
const CONTENT_LEN: usize = 2 * PIECE_LENGTH + 14464;

fn setup() -> (Vec<u8>, Arc<MemorySink>, PieceManager) {
    let fixture = TorrentFixture::new(pattern(CONTENT_LEN), PIECE_LENGTH);
    let info = fixture.metainfo().info;
    let sink = Arc::new(MemorySink::new(info.total_length));
    let manager = PieceManager::new(&info, sink.clone());
    (fixture.content().to_vec(), sink, manager)
}

fn peer(n: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, n], 6881))
}

fn bitfield(pieces: &[usize]) -> Bitfield {
    let mut bf = Bitfield::new(3);
    for &piece in pieces {
        bf.set_piece(piece);
    }
    bf
}

fn block_data(content: &[u8], request: &BlockRequest) -> Vec<u8> {
    let start = request.piece as usize * PIECE_LENGTH + request.offset as usize;
    content[start..start + request.length as usize].to_vec()
}

fn submit(
    manager: &PieceManager,
    from: SocketAddr,
    content: &[u8],
    request: &BlockRequest,
) -> Result<BlockOutcome, PieceError> {
    manager.submit_block(from, request.piece, request.offset, &block_data(content, request))
}

#[test]
fn test_claims_cover_every_block_once() {
    let (_, _, manager) = setup();
    let have = Bitfield::full(3);

    let mut seen = HashSet::new();
    while let Some(request) = manager.claim_block(&have) {
        assert!(seen.insert(request), "block handed out twice: {:?}", request);
    }

    assert_eq!(seen.len(), 5);
    assert!(seen.contains(&BlockRequest::new(2, 0, 14464)));
    assert!(seen.contains(&BlockRequest::new(1, 16384, 16384)));
}

#[test]
fn test_download_writes_each_piece_once() {
    let (content, sink, manager) = setup();
    let have = Bitfield::full(3);
    manager.peer_connected(&have);

    let mut verified = Vec::new();
    while let Some(request) = manager.claim_block(&have) {
        let outcome = submit(&manager, peer(1), &content, &request).unwrap();
        if let BlockOutcome::PieceVerified(index) = outcome {
            verified.push(index);
        }
    }

    verified.sort();
    assert_eq!(verified, vec![0, 1, 2]);
    assert!(manager.is_complete());
    assert_eq!(sink.writes(), 3);
    assert_eq!(sink.contents(), content);

    let progress = manager.progress();
    assert_eq!(progress.pieces_verified, 3);
    assert_eq!(progress.pieces_total, 3);
    assert_eq!(progress.bytes_verified, CONTENT_LEN as u64);
    assert_eq!(progress.active_peers, 1);
    assert!(progress.is_complete());
}

#[test]
fn test_only_claims_pieces_the_peer_has() {
    let (_, _, manager) = setup();
    let have = bitfield(&[1]);

    let first = manager.claim_block(&have).unwrap();
    let second = manager.claim_block(&have).unwrap();
    assert_eq!(first.piece, 1);
    assert_eq!(second.piece, 1);
    assert!(manager.claim_block(&have).is_none());
    assert!(manager.claim_block(&Bitfield::new(3)).is_none());
}

#[test]
fn test_rarest_piece_first() {
    let (_, _, manager) = setup();
    manager.peer_connected(&Bitfield::full(3));
    manager.peer_connected(&bitfield(&[0, 1]));

    let request = manager.claim_block(&Bitfield::full(3)).unwrap();
    assert_eq!(request.piece, 2);
}

#[test]
fn test_partial_piece_before_rarer_piece() {
    let (_, _, manager) = setup();
    manager.peer_connected(&Bitfield::full(3));
    manager.peer_has(&bitfield(&[2]));

    let have = Bitfield::full(3);
    assert_eq!(manager.claim_block(&have).unwrap(), BlockRequest::new(0, 0, 16384));
    assert_eq!(manager.claim_block(&have).unwrap(), BlockRequest::new(0, 16384, 16384));

    // Piece 0 is fully claimed; piece 1 is rarer than piece 2.
    assert_eq!(manager.claim_block(&have).unwrap().piece, 1);

    // Another peer joins in on the piece that is already in flight.
    manager.peer_have(2);
    assert_eq!(manager.claim_block(&have).unwrap(), BlockRequest::new(1, 16384, 16384));
}

#[test]
fn test_sequential_strategy() {
    let (_, sink, _) = setup();
    let fixture = TorrentFixture::new(pattern(CONTENT_LEN), PIECE_LENGTH);
    let manager =
        PieceManager::new(&fixture.metainfo().info, sink).with_strategy(PickStrategy::Sequential);
    manager.peer_connected(&Bitfield::full(3));
    manager.peer_connected(&bitfield(&[0, 1]));

    assert_eq!(manager.claim_block(&Bitfield::full(3)).unwrap().piece, 0);
}

#[test]
fn test_hash_mismatch_resets_piece() {
    let (content, sink, manager) = setup();
    let have = bitfield(&[0]);

    let first = manager.claim_block(&have).unwrap();
    let second = manager.claim_block(&have).unwrap();
    assert_eq!(submit(&manager, peer(1), &content, &first), Ok(BlockOutcome::Accepted));

    let mut corrupt = block_data(&content, &second);
    corrupt[100] ^= 0xFF;
    let result = manager.submit_block(peer(1), second.piece, second.offset, &corrupt);
    assert_eq!(result, Err(PieceError::HashMismatch(0)));
    assert_eq!(sink.writes(), 0);
    assert!(!manager.is_verified(0));
    assert_eq!(manager.exhausted_piece(), None);

    // Every block of the piece is open again.
    let retry_first = manager.claim_block(&have).unwrap();
    let retry_second = manager.claim_block(&have).unwrap();
    assert_eq!(retry_first, first);
    assert_eq!(retry_second, second);

    submit(&manager, peer(2), &content, &retry_second).unwrap();
    let outcome = submit(&manager, peer(2), &content, &retry_first).unwrap();
    assert_eq!(outcome, BlockOutcome::PieceVerified(0));
    assert_eq!(sink.piece_at(0).unwrap().as_ref(), &content[..PIECE_LENGTH]);
}

#[test]
fn test_duplicate_blocks_ignored() {
    let (content, sink, manager) = setup();
    let request = manager.claim_block(&bitfield(&[0])).unwrap();

    assert_eq!(submit(&manager, peer(1), &content, &request), Ok(BlockOutcome::Accepted));
    assert_eq!(submit(&manager, peer(2), &content, &request), Ok(BlockOutcome::Duplicate));

    let short = BlockRequest::new(2, 0, 14464);
    assert_eq!(submit(&manager, peer(1), &content, &short), Ok(BlockOutcome::PieceVerified(2)));
    assert_eq!(submit(&manager, peer(1), &content, &short), Ok(BlockOutcome::Duplicate));
    assert_eq!(sink.writes(), 1);
}

#[test]
fn test_invalid_blocks_rejected() {
    let (_, _, manager) = setup();

    let unaligned = manager.submit_block(peer(1), 0, 100, &[0u8; 16384]);
    assert!(matches!(unaligned, Err(PieceError::InvalidBlock { offset: 100, .. })));

    let wrong_length = manager.submit_block(peer(1), 0, 0, &[0u8; 1000]);
    assert!(matches!(wrong_length, Err(PieceError::InvalidBlock { length: 1000, .. })));

    let past_piece = manager.submit_block(peer(1), 2, 16384, &[0u8; 16384]);
    assert!(matches!(past_piece, Err(PieceError::InvalidBlock { .. })));

    let unknown_piece = manager.submit_block(peer(1), 3, 0, &[0u8; 16384]);
    assert!(matches!(unknown_piece, Err(PieceError::InvalidBlock { piece: 3, .. })));
}

#[test]
fn test_abandoned_block_is_reclaimed() {
    let (content, _, manager) = setup();
    let have = bitfield(&[0]);
    let work = manager.work_changed();

    assert_eq!(manager.claimed_blocks(), 0);
    let first = manager.claim_block(&have).unwrap();
    let second = manager.claim_block(&have).unwrap();
    assert!(manager.claim_block(&have).is_none());
    assert!(!work.has_changed().unwrap());
    assert_eq!(manager.claimed_blocks(), 2);
    assert!(!manager.has_available_work());

    manager.abandon_block(first.piece, first.offset);
    assert!(work.has_changed().unwrap());
    assert_eq!(manager.claimed_blocks(), 1);
    assert_eq!(manager.claim_block(&have).unwrap(), first);

    // Received blocks are not returned to the pool.
    submit(&manager, peer(1), &content, &second).unwrap();
    assert_eq!(manager.claimed_blocks(), 1);
    manager.abandon_blocks([first, second]);
    assert_eq!(manager.claimed_blocks(), 0);
    assert_eq!(manager.claim_block(&have).unwrap(), first);
    assert!(manager.claim_block(&have).is_none());
}

#[test]
fn test_hash_failure_budget_by_count() {
    let fixture = TorrentFixture::new(pattern(CONTENT_LEN), PIECE_LENGTH);
    let sink = Arc::new(MemorySink::new(CONTENT_LEN as u64));
    let manager = PieceManager::new(&fixture.metainfo().info, sink).with_hash_budget(2, 10);

    let garbage = vec![0u8; 14464];
    for attempt in 1..=2 {
        let result = manager.submit_block(peer(1), 2, 0, &garbage);
        assert_eq!(result, Err(PieceError::HashMismatch(2)));
        if attempt == 1 {
            assert_eq!(manager.exhausted_piece(), None);
        }
    }
    assert_eq!(manager.exhausted_piece(), Some((2, 2)));
}

#[test]
fn test_hash_failure_budget_by_peers() {
    let fixture = TorrentFixture::new(pattern(CONTENT_LEN), PIECE_LENGTH);
    let sink = Arc::new(MemorySink::new(CONTENT_LEN as u64));
    let manager = PieceManager::new(&fixture.metainfo().info, sink).with_hash_budget(10, 2);

    let garbage = vec![0u8; 14464];
    let _ = manager.submit_block(peer(1), 2, 0, &garbage);
    let _ = manager.submit_block(peer(1), 2, 0, &garbage);
    assert_eq!(manager.exhausted_piece(), None);

    let _ = manager.submit_block(peer(2), 2, 0, &garbage);
    assert_eq!(manager.exhausted_piece(), Some((2, 3)));
}

#[test]
fn test_peer_bookkeeping() {
    let (content, _, manager) = setup();
    let have = bitfield(&[2]);
    manager.peer_connected(&have);

    assert!(manager.peer_is_useful(&have));
    assert!(manager.has_available_work());

    let request = manager.claim_block(&have).unwrap();
    assert!(!manager.has_available_work());
    submit(&manager, peer(1), &content, &request).unwrap();

    assert!(!manager.peer_is_useful(&have));
    assert!(manager.peer_is_useful(&Bitfield::full(3)));
    assert_eq!(manager.progress().active_peers, 1);

    manager.peer_gone(&have);
    assert_eq!(manager.progress().active_peers, 0);
    assert!(!manager.has_available_work());
}

#[test]
fn test_sink_failure_is_reported() {
    let fixture = TorrentFixture::new(pattern(CONTENT_LEN), PIECE_LENGTH);
    let content = fixture.content().to_vec();
    let manager = PieceManager::new(&fixture.metainfo().info, Arc::new(MemorySink::new(100)));

    let request = BlockRequest::new(2, 0, 14464);
    let result = submit(&manager, peer(1), &content, &request);
    assert_eq!(result, Err(PieceError::SinkFailed));
    assert!(!manager.is_verified(2));
    assert!(manager.take_storage_error().is_some());
    assert!(manager.take_storage_error().is_none());
}

/// Refuses its first write as a full disk queue would.
struct BusyOnce {
    busy: AtomicBool,
    inner: MemorySink,
}

impl PieceSink for BusyOnce {
    fn write_piece(&self, index: u32, offset: u64, data: Bytes) -> Result<(), StorageError> {
        if self.busy.swap(false, Ordering::SeqCst) {
            return Err(StorageError::WriterBusy);
        }
        self.inner.write_piece(index, offset, data)
    }

    fn flush(&self) -> BoxFuture<'_, Result<(), StorageError>> {
        self.inner.flush()
    }
}

#[test]
fn test_busy_sink_resets_piece_without_failing() {
    let fixture = TorrentFixture::new(pattern(CONTENT_LEN), PIECE_LENGTH);
    let content = fixture.content().to_vec();
    let sink = Arc::new(BusyOnce {
        busy: AtomicBool::new(true),
        inner: MemorySink::new(CONTENT_LEN as u64),
    });
    let manager = PieceManager::new(&fixture.metainfo().info, sink.clone());
    let have = bitfield(&[2]);

    let request = manager.claim_block(&have).unwrap();
    assert_eq!(request, BlockRequest::new(2, 0, 14464));
    let result = submit(&manager, peer(1), &content, &request);
    assert_eq!(result, Err(PieceError::SinkBusy(2)));
    assert!(!manager.is_verified(2));
    assert!(manager.take_storage_error().is_none());
    assert_eq!(sink.inner.writes(), 0);

    let retry = manager.claim_block(&have).unwrap();
    assert_eq!(retry, request);
    let outcome = submit(&manager, peer(1), &content, &retry).unwrap();
    assert_eq!(outcome, BlockOutcome::PieceVerified(2));
    assert_eq!(sink.inner.writes(), 1);
}

#[test]
fn test_concurrent_submissions() {
    let (content, sink, manager) = setup();
    let manager = Arc::new(manager);
    let content = Arc::new(content);

    let requests = vec![
        BlockRequest::new(0, 0, 16384),
        BlockRequest::new(0, 16384, 16384),
        BlockRequest::new(1, 0, 16384),
        BlockRequest::new(1, 16384, 16384),
        BlockRequest::new(2, 0, 14464),
    ];

    let handles: Vec<_> = (0..8u8)
        .map(|n| {
            let manager = manager.clone();
            let content = content.clone();
            let mut requests = requests.clone();
            let len = requests.len();
            requests.rotate_left(n as usize % len);
            std::thread::spawn(move || {
                for request in &requests {
                    submit(&manager, peer(n), &content, request).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(manager.is_complete());
    assert_eq!(sink.writes(), 3);
    assert_eq!(sink.contents(), *content);
}
