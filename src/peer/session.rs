use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, trace, warn};

use super::bitfield::Bitfield;
use super::error::PeerError;
use super::message::{Handshake, Message};
use super::peer_id::PeerId;
use super::piece::BlockRequest;
use super::transport::PeerTransport;
use crate::constants::{
    CONNECTION_TIMEOUT, HANDSHAKE_TIMEOUT, HAVE_GRACE_PERIOD, KEEPALIVE_INTERVAL,
    MAX_REQUESTS_PER_PEER, PEER_READ_TIMEOUT, REQUEST_TIMEOUT,
};
use crate::metainfo::InfoHash;
use crate::piece::{BlockOutcome, PieceError, PieceManager};

/// Timeouts and pipelining for one peer connection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Receive silence longer than this ends the session.
    pub read_timeout: Duration,
    /// Send silence longer than this triggers a keep-alive.
    pub keepalive_interval: Duration,
    /// Outstanding requests older than this are cancelled and returned.
    pub request_timeout: Duration,
    /// Maximum outstanding requests.
    pub pipeline_depth: usize,
    /// A peer that sends no bitfield is kept this long after connecting
    /// while it announces pieces with `have`.
    pub have_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECTION_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            read_timeout: PEER_READ_TIMEOUT,
            keepalive_interval: KEEPALIVE_INTERVAL,
            request_timeout: REQUEST_TIMEOUT,
            pipeline_depth: MAX_REQUESTS_PER_PEER,
            have_grace: HAVE_GRACE_PERIOD,
        }
    }
}

/// Why a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// Every piece is verified.
    Complete,
    /// The peer holds nothing we still need.
    NotUseful,
    /// The download asked all sessions to stop.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    /// Waiting for the peer's first message, which may be its bitfield.
    BitfieldExchange,
    /// Nothing outstanding.
    Ready,
    /// At least one request outstanding.
    Requesting,
}

/// Downloads from a single peer until it has nothing left to give.
///
/// Blocks are claimed from the shared [`PieceManager`] and requested in a
/// pipeline of up to `pipeline_depth`. However the session ends, including
/// when its task is aborted, outstanding claims go back to the manager and
/// the peer's pieces are withdrawn from the availability counts.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use leech::metainfo::Metainfo;
/// use leech::peer::{PeerId, PeerSession};
/// use leech::piece::PieceManager;
/// use leech::storage::MemorySink;
///
/// # async fn example(torrent: Metainfo) -> Result<(), leech::peer::PeerError> {
/// let sink = Arc::new(MemorySink::new(torrent.info.total_length));
/// let manager = Arc::new(PieceManager::new(&torrent.info, sink));
/// let (_stop, shutdown) = tokio::sync::watch::channel(false);
///
/// let session = PeerSession::new(
///     "192.168.1.100:6881".parse().unwrap(),
///     torrent.info_hash,
///     PeerId::generate(),
///     manager,
///     shutdown,
/// );
/// let exit = session.run().await?;
/// println!("session ended: {:?}", exit);
/// # Ok(())
/// # }
/// ```
pub struct PeerSession {
    addr: SocketAddr,
    info_hash: InfoHash,
    peer_id: PeerId,
    manager: Arc<PieceManager>,
    shutdown: watch::Receiver<bool>,
    config: SessionConfig,
}

impl PeerSession {
    pub fn new(
        addr: SocketAddr,
        info_hash: InfoHash,
        peer_id: PeerId,
        manager: Arc<PieceManager>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            addr,
            info_hash,
            peer_id,
            manager,
            shutdown,
            config: SessionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connects, handshakes and downloads until the session ends.
    ///
    /// # Errors
    ///
    /// Any [`PeerError`]: connect or handshake failures, a foreign info hash,
    /// malformed messages, or silence past the read timeout.
    pub async fn run(self) -> Result<SessionExit, PeerError> {
        let addr = self.addr;
        trace!(peer = %addr, "connecting");
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Timeout)??;

        trace!(peer = %addr, "handshaking");
        let mut transport = PeerTransport::new(stream);
        let ours = Handshake::new(*self.info_hash.as_bytes(), *self.peer_id.as_bytes());
        let theirs = transport
            .handshake(&ours, self.config.handshake_timeout)
            .await?;
        if theirs.info_hash != *self.info_hash.as_bytes() {
            return Err(PeerError::HandshakeMismatch);
        }
        debug!(
            peer = %addr,
            client = ?PeerId::from_bytes(&theirs.peer_id),
            "handshake complete"
        );

        let mut connection = Connection::new(addr, transport, self.manager, self.config);
        let result = connection.drive(self.shutdown).await;
        match &result {
            Ok(exit) => {
                debug!(peer = %addr, ?exit, "session ended");
                let _ = connection.transport.shutdown().await;
            }
            Err(e) => debug!(peer = %addr, error = %e, "session failed"),
        }
        result
    }
}

struct Pending {
    request: BlockRequest,
    sent_at: Instant,
}

/// A handshaken connection. Dropping it returns every claim it holds.
struct Connection {
    addr: SocketAddr,
    transport: PeerTransport,
    manager: Arc<PieceManager>,
    config: SessionConfig,
    state: PeerState,
    have: Bitfield,
    got_bitfield: bool,
    peer_choking: bool,
    am_interested: bool,
    pending: Vec<Pending>,
    last_sent: Instant,
    last_received: Instant,
    connected_at: Instant,
}

impl Connection {
    fn new(
        addr: SocketAddr,
        transport: PeerTransport,
        manager: Arc<PieceManager>,
        config: SessionConfig,
    ) -> Self {
        let have = Bitfield::new(manager.piece_count());
        manager.peer_connected(&have);
        let now = Instant::now();

        Self {
            addr,
            transport,
            manager,
            config,
            state: PeerState::BitfieldExchange,
            have,
            got_bitfield: false,
            peer_choking: true,
            am_interested: false,
            pending: Vec::new(),
            last_sent: now,
            last_received: now,
            connected_at: now,
        }
    }

    async fn drive(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<SessionExit, PeerError> {
        let mut work = self.manager.work_changed();

        loop {
            if *shutdown.borrow_and_update() {
                return Ok(SessionExit::Shutdown);
            }
            if self.manager.is_complete() {
                return Ok(SessionExit::Complete);
            }
            if let Some(exit) = self.update_interest().await? {
                return Ok(exit);
            }
            self.fill_pipeline().await?;

            let deadline = self.next_deadline();
            tokio::select! {
                message = self.transport.receive_message() => {
                    self.last_received = Instant::now();
                    self.handle_message(message?).await?;
                }
                _ = sleep_until(deadline) => {
                    self.on_timer().await?;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(SessionExit::Shutdown);
                    }
                }
                _ = work.changed() => {}
            }
        }
    }

    async fn send(&mut self, message: Message) -> Result<(), PeerError> {
        self.transport.send_message(&message).await?;
        self.last_sent = Instant::now();
        Ok(())
    }

    /// Keeps our interest in step with what the peer holds. Returns an exit
    /// once the peer has shown its pieces and none of them are wanted. A peer
    /// without a bitfield has shown them when its grace period ends.
    async fn update_interest(&mut self) -> Result<Option<SessionExit>, PeerError> {
        if self.manager.peer_is_useful(&self.have) {
            if !self.am_interested {
                self.am_interested = true;
                self.send(Message::Interested).await?;
                trace!(peer = %self.addr, "interested");
            }
            return Ok(None);
        }

        if !self.pending.is_empty() || self.awaiting_have(Instant::now()) {
            return Ok(None);
        }
        if self.am_interested {
            self.am_interested = false;
            self.send(Message::NotInterested).await?;
        }
        Ok(Some(SessionExit::NotUseful))
    }

    /// End of the window in which a peer without a bitfield may still
    /// announce pieces.
    fn have_deadline(&self) -> Option<Instant> {
        (!self.got_bitfield).then(|| self.connected_at + self.config.have_grace)
    }

    fn awaiting_have(&self, now: Instant) -> bool {
        self.have_deadline().is_some_and(|deadline| now < deadline)
    }

    async fn fill_pipeline(&mut self) -> Result<(), PeerError> {
        if self.peer_choking || !self.am_interested {
            return Ok(());
        }

        while self.pending.len() < self.config.pipeline_depth {
            let Some(request) = self.manager.claim_block(&self.have) else {
                break;
            };
            // Tracked before sending so a failed send still returns the claim.
            self.pending.push(Pending {
                request,
                sent_at: Instant::now(),
            });
            self.send(Message::Request {
                index: request.piece,
                begin: request.offset,
                length: request.length,
            })
            .await?;
            trace!(peer = %self.addr, piece = request.piece, offset = request.offset, "requested");
        }

        if self.state != PeerState::BitfieldExchange {
            self.state = if self.pending.is_empty() {
                PeerState::Ready
            } else {
                PeerState::Requesting
            };
        }
        Ok(())
    }

    fn next_deadline(&self) -> Instant {
        let mut deadline = (self.last_received + self.config.read_timeout)
            .min(self.last_sent + self.config.keepalive_interval);
        if let Some(oldest) = self.pending.iter().map(|p| p.sent_at).min() {
            deadline = deadline.min(oldest + self.config.request_timeout);
        }
        if let Some(grace) = self.have_deadline().filter(|&at| at > Instant::now()) {
            deadline = deadline.min(grace);
        }
        deadline
    }

    async fn on_timer(&mut self) -> Result<(), PeerError> {
        let now = Instant::now();
        if now >= self.last_received + self.config.read_timeout {
            return Err(PeerError::Timeout);
        }

        let request_timeout = self.config.request_timeout;
        let (stale, live): (Vec<Pending>, Vec<Pending>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| now >= p.sent_at + request_timeout);
        self.pending = live;

        if !stale.is_empty() {
            debug!(peer = %self.addr, count = stale.len(), "requests timed out");
            self.manager.abandon_blocks(stale.iter().map(|p| p.request));
            for p in stale {
                self.send(Message::Cancel {
                    index: p.request.piece,
                    begin: p.request.offset,
                    length: p.request.length,
                })
                .await?;
            }
        }

        if now >= self.last_sent + self.config.keepalive_interval {
            self.send(Message::KeepAlive).await?;
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: Message) -> Result<(), PeerError> {
        let first = self.state == PeerState::BitfieldExchange;
        if !matches!(message, Message::KeepAlive) {
            self.state = PeerState::Ready;
        }

        match message {
            Message::KeepAlive => {}
            Message::Choke => {
                self.peer_choking = true;
                if !self.pending.is_empty() {
                    trace!(peer = %self.addr, count = self.pending.len(), "choked, returning requests");
                    self.manager
                        .abandon_blocks(self.pending.drain(..).map(|p| p.request));
                }
            }
            Message::Unchoke => {
                self.peer_choking = false;
            }
            Message::Interested | Message::NotInterested => {}
            Message::Have { piece } => {
                let index = piece as usize;
                if index >= self.have.piece_count() {
                    return Err(PeerError::Protocol(format!("have for unknown piece {}", piece)));
                }
                if !self.have.has_piece(index) {
                    self.have.set_piece(index);
                    self.manager.peer_have(piece);
                }
            }
            Message::Bitfield(payload) => {
                if !first {
                    return Err(PeerError::Protocol("bitfield after first message".into()));
                }
                let have = Bitfield::try_from_payload(&payload, self.have.piece_count())?;
                self.manager.peer_has(&have);
                self.have = have;
                self.got_bitfield = true;
            }
            Message::Request { .. } | Message::Cancel { .. } => {
                trace!(peer = %self.addr, "ignoring upload request");
            }
            Message::Piece { index, begin, data } => {
                let Some(position) = self
                    .pending
                    .iter()
                    .position(|p| p.request.piece == index && p.request.offset == begin)
                else {
                    trace!(peer = %self.addr, piece = index, offset = begin, "unrequested block dropped");
                    return Ok(());
                };
                let request = self.pending.swap_remove(position).request;
                if data.len() != request.length as usize {
                    self.manager.abandon_block(request.piece, request.offset);
                    return Err(PeerError::Protocol(format!(
                        "block {}:{} has {} bytes, requested {}",
                        index,
                        begin,
                        data.len(),
                        request.length
                    )));
                }

                match self.manager.submit_block(self.addr, index, begin, &data) {
                    Ok(BlockOutcome::PieceVerified(piece)) => {
                        trace!(peer = %self.addr, piece, "completed piece");
                    }
                    Ok(_) => {}
                    Err(PieceError::HashMismatch(piece)) => {
                        warn!(peer = %self.addr, piece, "piece from this peer failed verification");
                    }
                    Err(PieceError::SinkBusy(piece)) => {
                        debug!(peer = %self.addr, piece, "output busy, piece will be fetched again");
                    }
                    Err(e) => {
                        warn!(peer = %self.addr, error = %e, "block rejected");
                    }
                }
            }
            Message::Port(_) => {}
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.manager
            .abandon_blocks(self.pending.drain(..).map(|p| p.request));
        self.manager.peer_gone(&self.have);
    }
}
