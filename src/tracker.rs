//! Tracker protocol (BEP-3, BEP-15, BEP-23)
//!
//! HTTP and UDP announce for peer discovery, plus the retry and failover
//! policy the download uses on top of them.
//!
//! ```no_run
//! use std::time::{Duration, Instant};
//! use leech::tracker::{AnnounceRequest, Announcer, Backoff, TrackerEvent};
//! # use leech::metainfo::InfoHash;
//!
//! # async fn run(info_hash: InfoHash) -> Result<(), leech::tracker::TrackerError> {
//! let urls = vec![
//!     "http://tracker.example.com/announce".to_string(),
//!     "udp://backup.example.com:6969/announce".to_string(),
//! ];
//! let backoff = Backoff::new(Duration::from_secs(15), Duration::from_secs(600), 5);
//! let mut announcer = Announcer::new(&urls, backoff, Duration::from_secs(30));
//!
//! let request = AnnounceRequest {
//!     info_hash,
//!     peer_id: *b"-LE0001-000000000000",
//!     port: 6881,
//!     uploaded: 0,
//!     downloaded: 0,
//!     left: 1024,
//!     event: TrackerEvent::Started,
//! };
//! let response = announcer.announce(&request, Instant::now()).await?;
//! println!("{} peers", response.peers.len());
//! # Ok(())
//! # }
//! ```

mod announcer;
mod backoff;
mod error;
mod http;
mod response;
mod udp;

pub use announcer::{Announcer, Tracker};
pub use backoff::Backoff;
pub use error::TrackerError;
pub use http::HttpTracker;
pub use response::{
    parse_compact_peers, parse_compact_peers6, AnnounceRequest, AnnounceResponse, TrackerEvent,
};
pub use udp::UdpTracker;
