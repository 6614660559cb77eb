//! Protocol constants and tuning parameters.
//!
//! Defaults for [`DownloadConfig`](crate::config::DownloadConfig) live here,
//! alongside the fixed values of the wire protocols.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style)
pub const CLIENT_PREFIX: &str = "-LE0001-";

/// User agent string for HTTP requests
pub const USER_AGENT: &str = concat!("leech/", env!("CARGO_PKG_VERSION"));

/// Default port reported to trackers
pub const DEFAULT_PORT: u16 = 6881;

// ============================================================================
// Connection limits
// ============================================================================

/// Maximum simultaneous peer sessions per download
pub const MAX_PEERS_PER_TORRENT: usize = 50;

/// Outstanding block requests per peer (request pipelining)
pub const MAX_REQUESTS_PER_PEER: usize = 5;

// ============================================================================
// Block and piece sizes
// ============================================================================

/// Standard block size (16KB)
pub const BLOCK_SIZE: u32 = 16384;

/// Largest piece length accepted from a torrent (64MB)
pub const MAX_PIECE_LENGTH: u64 = 64 * 1024 * 1024;

/// Verified pieces the disk writer may hold before refusing more
pub const DISK_QUEUE_CAPACITY: usize = 32;

/// Maximum message size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16777216;

/// Read buffer size for peer connections
pub const READ_BUFFER_SIZE: usize = 65536;

// ============================================================================
// Timeouts - Peer
// ============================================================================

/// TCP connection timeout
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshake timeout after TCP connect
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Silence from a peer longer than this ends the session
pub const PEER_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Keepalive message interval
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// An outstanding block request older than this is cancelled and returned
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a peer without a bitfield may take to announce pieces with `have`
pub const HAVE_GRACE_PERIOD: Duration = Duration::from_secs(5);

// ============================================================================
// Timeouts - Tracker
// ============================================================================

/// HTTP tracker request timeout
pub const HTTP_TRACKER_TIMEOUT: Duration = Duration::from_secs(30);

/// UDP tracker request timeout (doubled on every retry)
pub const UDP_TRACKER_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// UDP tracker retransmissions before giving up (BEP-15 allows up to 8)
pub const UDP_TRACKER_MAX_RETRIES: u32 = 3;

/// Lifetime of a UDP tracker connection ID (BEP-15)
pub const UDP_CONNECTION_ID_TTL: Duration = Duration::from_secs(60);

// ============================================================================
// Intervals - Tracker
// ============================================================================

/// Default tracker announce interval
pub const TRACKER_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1800);

/// Minimum tracker announce interval
pub const TRACKER_MIN_INTERVAL: Duration = Duration::from_secs(60);

/// Base delay for tracker retry backoff
pub const TRACKER_RETRY_BASE_DELAY: Duration = Duration::from_secs(15);

/// Upper bound for tracker retry backoff
pub const TRACKER_RETRY_MAX_DELAY: Duration = Duration::from_secs(600);

/// Failed announces per tracker before it is given up on
pub const TRACKER_MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// Download supervision
// ============================================================================

/// No progress and no peers for this long fails the download
pub const STALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Interval between orchestrator housekeeping ticks
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Grace period for sessions to exit before they are aborted
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Failed connections to one address before it is forgotten
pub const MAX_PEER_CONNECT_ATTEMPTS: u32 = 3;

/// Wait before reconnecting to an address whose session failed
pub const PEER_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Hash failures tolerated per piece
pub const MAX_HASH_FAILURES: u32 = 5;

/// Distinct peers whose data may fail a piece's hash check before giving up
pub const MAX_HASH_FAILURE_PEERS: usize = 3;

// ============================================================================
// Protocol constants
// ============================================================================

/// BitTorrent protocol string
pub const PROTOCOL_STRING: &str = "BitTorrent protocol";

/// Reserved bytes in handshake; no extensions are advertised
pub const RESERVED_BYTES: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 0];

// ============================================================================
// UDP tracker protocol constants
// ============================================================================

/// UDP tracker protocol ID (magic number)
pub const UDP_TRACKER_PROTOCOL_ID: u64 = 0x41727101980;

/// UDP tracker connect action
pub const UDP_ACTION_CONNECT: u32 = 0;

/// UDP tracker announce action
pub const UDP_ACTION_ANNOUNCE: u32 = 1;

/// UDP tracker error action
pub const UDP_ACTION_ERROR: u32 = 3;
