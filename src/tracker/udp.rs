use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng as _;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

use super::error::TrackerError;
use super::response::{parse_compact_peers, AnnounceRequest, AnnounceResponse};
use crate::constants::{
    UDP_ACTION_ANNOUNCE, UDP_ACTION_CONNECT, UDP_ACTION_ERROR, UDP_CONNECTION_ID_TTL,
    UDP_TRACKER_MAX_RETRIES, UDP_TRACKER_PROTOCOL_ID, UDP_TRACKER_REQUEST_TIMEOUT,
};

/// A BEP-15 UDP tracker.
///
/// The socket is bound and the tracker host resolved on first use. The
/// connection ID is cached for its one minute lifetime.
pub struct UdpTracker {
    url: String,
    host: String,
    socket: Option<UdpSocket>,
    connection: Option<(u64, Instant)>,
    request_timeout: Duration,
    max_retries: u32,
}

impl UdpTracker {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        let host = parse_udp_url(url)?;
        Ok(Self {
            url: url.to_string(),
            host,
            socket: None,
            connection: None,
            request_timeout: UDP_TRACKER_REQUEST_TIMEOUT,
            max_retries: UDP_TRACKER_MAX_RETRIES,
        })
    }

    /// Sets the first retransmission timeout; later attempts double it.
    pub fn with_timeout(mut self, request_timeout: Duration, max_retries: u32) -> Self {
        self.request_timeout = request_timeout;
        self.max_retries = max_retries.max(1);
        self
    }

    pub async fn announce(
        &mut self,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, TrackerError> {
        let connection_id = self.connection_id().await?;

        let transaction_id: u32 = rand::rng().random();
        let key: u32 = rand::rng().random();

        let mut packet = Vec::with_capacity(98);
        packet.extend_from_slice(&connection_id.to_be_bytes());
        packet.extend_from_slice(&UDP_ACTION_ANNOUNCE.to_be_bytes());
        packet.extend_from_slice(&transaction_id.to_be_bytes());
        packet.extend_from_slice(request.info_hash.as_bytes());
        packet.extend_from_slice(&request.peer_id);
        packet.extend_from_slice(&request.downloaded.to_be_bytes());
        packet.extend_from_slice(&request.left.to_be_bytes());
        packet.extend_from_slice(&request.uploaded.to_be_bytes());
        packet.extend_from_slice(&request.event.as_udp_id().to_be_bytes());
        packet.extend_from_slice(&0u32.to_be_bytes()); // IP address (0 = default)
        packet.extend_from_slice(&key.to_be_bytes());
        packet.extend_from_slice(&(-1i32).to_be_bytes()); // num_want (-1 = default)
        packet.extend_from_slice(&request.port.to_be_bytes());

        debug!(tracker = %self.url, event = request.event.as_str(), "udp announce");
        let response = self.send_and_receive(&packet, transaction_id, 20).await;
        let response = match response {
            Err(e @ TrackerError::Timeout) => {
                // The tracker may have forgotten our connection ID.
                self.connection = None;
                return Err(e);
            }
            other => other?,
        };

        let action = read_u32(&response, 0);
        if action != UDP_ACTION_ANNOUNCE {
            return Err(TrackerError::MalformedResponse(format!(
                "unexpected action {} in announce response",
                action
            )));
        }

        let interval = read_u32(&response, 8);
        let leechers = read_u32(&response, 12);
        let seeders = read_u32(&response, 16);

        let mut result = AnnounceResponse::new(interval);
        result.complete = Some(seeders);
        result.incomplete = Some(leechers);
        result.peers = parse_compact_peers(&response[20..])?;

        Ok(result)
    }

    async fn connection_id(&mut self) -> Result<u64, TrackerError> {
        if let Some((id, obtained)) = self.connection {
            if obtained.elapsed() < UDP_CONNECTION_ID_TTL {
                return Ok(id);
            }
        }

        let transaction_id: u32 = rand::rng().random();

        let mut packet = Vec::with_capacity(16);
        packet.extend_from_slice(&UDP_TRACKER_PROTOCOL_ID.to_be_bytes());
        packet.extend_from_slice(&UDP_ACTION_CONNECT.to_be_bytes());
        packet.extend_from_slice(&transaction_id.to_be_bytes());

        let response = self.send_and_receive(&packet, transaction_id, 16).await?;

        if read_u32(&response, 0) != UDP_ACTION_CONNECT {
            return Err(TrackerError::MalformedResponse(
                "connect response mismatch".into(),
            ));
        }

        let mut id = [0u8; 8];
        id.copy_from_slice(&response[8..16]);
        let id = u64::from_be_bytes(id);
        self.connection = Some((id, Instant::now()));
        trace!(tracker = %self.url, "udp connection id {:#x}", id);

        Ok(id)
    }

    async fn socket(&mut self) -> Result<&UdpSocket, TrackerError> {
        if self.socket.is_none() {
            let addr = resolve(&self.host).await?;
            let bind: SocketAddr = if addr.is_ipv4() {
                ([0, 0, 0, 0], 0).into()
            } else {
                ([0u16; 8], 0).into()
            };
            let socket = UdpSocket::bind(bind).await?;
            socket.connect(addr).await?;
            self.socket = Some(socket);
        }
        self.socket
            .as_ref()
            .ok_or_else(|| TrackerError::InvalidUrl(self.url.clone()))
    }

    /// Sends `packet` and waits for a reply carrying `transaction_id`,
    /// retransmitting with a doubling timeout. Replies for other
    /// transactions are dropped.
    async fn send_and_receive(
        &mut self,
        packet: &[u8],
        transaction_id: u32,
        min_response_size: usize,
    ) -> Result<Vec<u8>, TrackerError> {
        let request_timeout = self.request_timeout;
        let max_retries = self.max_retries;
        let socket = self.socket().await?;
        let mut buf = vec![0u8; 2048];

        for attempt in 0..max_retries {
            socket.send(packet).await?;

            let deadline = Instant::now() + request_timeout * (1 << attempt);
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let n = match timeout(remaining, socket.recv(&mut buf)).await {
                    Ok(result) => result?,
                    Err(_) => break,
                };

                if n < 8 || read_u32(&buf, 4) != transaction_id {
                    trace!("ignoring stray udp tracker packet");
                    continue;
                }

                if read_u32(&buf, 0) == UDP_ACTION_ERROR {
                    let message = String::from_utf8_lossy(&buf[8..n]).into_owned();
                    return Err(TrackerError::Failure(message));
                }

                if n < min_response_size {
                    return Err(TrackerError::MalformedResponse("response too short".into()));
                }

                return Ok(buf[..n].to_vec());
            }
        }

        Err(TrackerError::Timeout)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Extracts `host:port` from `udp://host:port[/path]`.
fn parse_udp_url(url: &str) -> Result<String, TrackerError> {
    let rest = url
        .strip_prefix("udp://")
        .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))?;

    let host = rest.split(['/', '?']).next().unwrap_or(rest);
    match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(host.to_string())
        }
        _ => Err(TrackerError::InvalidUrl(url.to_string())),
    }
}

async fn resolve(host: &str) -> Result<SocketAddr, TrackerError> {
    lookup_host(host)
        .await?
        .next()
        .ok_or_else(|| TrackerError::InvalidUrl(host.to_string()))
}
